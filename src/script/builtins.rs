//! Global objects and prototype methods available to candidate code.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;

use log::debug;

use super::interp::{to_uint32, ErrorKind, Interp, Scope};
use super::value::*;

/// Prototypes and constructors the evaluator needs direct access to.
pub struct Intrinsics {
    pub object_proto: ObjRef,
    pub function_proto: ObjRef,
    pub array_proto: ObjRef,
    pub string_proto: ObjRef,
    pub number_proto: ObjRef,
    pub boolean_proto: ObjRef,
    pub promise_proto: ObjRef,
    pub set_proto: ObjRef,
    pub map_proto: ObjRef,
    pub error_proto: ObjRef,
    pub type_error_proto: ObjRef,
    pub range_error_proto: ObjRef,
    pub reference_error_proto: ObjRef,
    pub syntax_error_proto: ObjRef,
}

pub fn native(
    function_proto: &ObjRef,
    name: &str,
    f: impl Fn(&Interp, &Value, &[Value]) -> JsResult<Value> + 'static,
) -> ObjRef {
    Obj::new(
        ObjKind::Function(Callable::Native {
            name: Rc::from(name),
            call: Rc::new(f),
            construct: None,
        }),
        Some(function_proto.clone()),
    )
}

fn constructor(
    function_proto: &ObjRef,
    name: &str,
    prototype: &ObjRef,
    call: impl Fn(&Interp, &Value, &[Value]) -> JsResult<Value> + 'static,
    construct: impl Fn(&Interp, &ObjRef, &[Value]) -> JsResult<Value> + 'static,
) -> ObjRef {
    let ctor = Obj::new(
        ObjKind::Function(Callable::Native {
            name: Rc::from(name),
            call: Rc::new(call),
            construct: Some(Rc::new(construct)),
        }),
        Some(function_proto.clone()),
    );
    link(&ctor, prototype);
    ctor
}

fn link(ctor: &ObjRef, prototype: &ObjRef) {
    ctor.set_own(Rc::from("prototype"), Value::Object(prototype.clone()));
    prototype.set_own(Rc::from("constructor"), Value::Object(ctor.clone()));
}

fn method(
    target: &ObjRef,
    function_proto: &ObjRef,
    name: &str,
    f: impl Fn(&Interp, &Value, &[Value]) -> JsResult<Value> + 'static,
) {
    target.set_own(Rc::from(name), Value::Object(native(function_proto, name, f)));
}

fn constant(target: &ObjRef, name: &str, value: Value) {
    target.set_own(Rc::from(name), value);
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn to_integer(interp: &Interp, value: &Value) -> JsResult<f64> {
    let n = interp.to_number(value)?;
    Ok(if n.is_nan() { 0.0 } else { n.trunc() })
}

/// Resolves a possibly negative index against `len`, clamped to `0..=len`.
fn relative(interp: &Interp, value: &Value, len: usize, default: usize) -> JsResult<usize> {
    if matches!(value, Value::Undefined) {
        return Ok(default);
    }
    let n = to_integer(interp, value)?;
    let len = len as f64;
    Ok(if n < 0.0 { (len + n).max(0.0) } else { n.min(len) } as usize)
}

fn callback(interp: &Interp, value: &Value) -> JsResult<Value> {
    if value.is_callable() {
        Ok(value.clone())
    } else {
        Err(interp.type_error(format!("{} is not a function", interp.inspect(value))))
    }
}

fn thrown_value(abrupt: Abrupt) -> JsResult<Value> {
    match abrupt {
        Abrupt::Throw(value) => Ok(value),
        other => Err(other),
    }
}

fn declare(globals: &Rc<Scope>, name: &str, value: Value) {
    globals.declare(Rc::from(name), value, true, true);
}

pub(super) fn install(globals: &Rc<Scope>) -> Intrinsics {
    let object_proto = Obj::new(ObjKind::Plain, None);
    let function_proto = native(&object_proto, "", |_, _, _| Ok(Value::Undefined));
    let derive = |parent: &ObjRef| Obj::new(ObjKind::Plain, Some(parent.clone()));
    let error_proto = derive(&object_proto);
    let intrinsics = Intrinsics {
        array_proto: derive(&object_proto),
        string_proto: derive(&object_proto),
        number_proto: derive(&object_proto),
        boolean_proto: derive(&object_proto),
        promise_proto: derive(&object_proto),
        set_proto: derive(&object_proto),
        map_proto: derive(&object_proto),
        type_error_proto: derive(&error_proto),
        range_error_proto: derive(&error_proto),
        reference_error_proto: derive(&error_proto),
        syntax_error_proto: derive(&error_proto),
        error_proto,
        object_proto,
        function_proto,
    };
    install_object(globals, &intrinsics);
    install_function(&intrinsics);
    install_array(globals, &intrinsics);
    install_string(globals, &intrinsics);
    install_number(globals, &intrinsics);
    install_math(globals, &intrinsics);
    install_json(globals, &intrinsics);
    install_errors(globals, &intrinsics);
    install_collections(globals, &intrinsics);
    install_promise(globals, &intrinsics);
    install_host(globals, &intrinsics);
    intrinsics
}

// --- Object ---

fn own_keys_of(interp: &Interp, value: &Value) -> JsResult<Vec<Rc<str>>> {
    match value {
        Value::Undefined | Value::Null => Err(interp.type_error("Cannot convert undefined or null to object")),
        Value::Object(obj) => Ok(obj.own_keys()),
        Value::Str(s) => Ok((0..s.chars().count()).map(|i| Rc::from(i.to_string().as_str())).collect()),
        _ => Ok(Vec::new()),
    }
}

fn install_object(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    let proto = &i.object_proto;
    method(proto, fp, "hasOwnProperty", |interp, this, args| {
        let key = interp.to_key(&arg(args, 0))?;
        Ok(Value::Bool(match this {
            Value::Object(obj) => obj.has_own(&key),
            Value::Str(s) => &*key == "length" || array_index(&key).is_some_and(|i| (i as usize) < s.chars().count()),
            _ => false,
        }))
    });
    method(proto, fp, "toString", |_, this, _| {
        let tag = match this {
            Value::Undefined => "Undefined",
            Value::Null => "Null",
            Value::Object(obj) => match obj.kind {
                ObjKind::Array(_) => "Array",
                ObjKind::Function(_) => "Function",
                ObjKind::Error(_) => "Error",
                _ => "Object",
            },
            _ => "Object",
        };
        Ok(Value::from(format!("[object {}]", tag)))
    });
    method(proto, fp, "valueOf", |_, this, _| Ok(this.clone()));

    let to_object = |interp: &Interp, args: &[Value]| -> JsResult<Value> {
        match arg(args, 0) {
            Value::Object(obj) => Ok(Value::Object(obj)),
            _ => Ok(Value::Object(interp.new_object())),
        }
    };
    let ctor = constructor(fp, "Object", proto, move |interp, _, args| to_object(interp, args), move |interp, _, args| {
        to_object(interp, args)
    });
    method(&ctor, fp, "keys", |interp, _, args| {
        let keys = own_keys_of(interp, &arg(args, 0))?;
        Ok(interp.new_array(keys.into_iter().map(Value::Str).collect()))
    });
    method(&ctor, fp, "getOwnPropertyNames", |interp, _, args| {
        let keys = own_keys_of(interp, &arg(args, 0))?;
        Ok(interp.new_array(keys.into_iter().map(Value::Str).collect()))
    });
    method(&ctor, fp, "values", |interp, _, args| {
        let target = arg(args, 0);
        let mut values = Vec::new();
        for key in own_keys_of(interp, &target)? {
            values.push(interp.get_value(&target, &key)?);
        }
        Ok(interp.new_array(values))
    });
    method(&ctor, fp, "entries", |interp, _, args| {
        let target = arg(args, 0);
        let mut entries = Vec::new();
        for key in own_keys_of(interp, &target)? {
            let value = interp.get_value(&target, &key)?;
            entries.push(interp.new_array(vec![Value::Str(key), value]));
        }
        Ok(interp.new_array(entries))
    });
    method(&ctor, fp, "assign", |interp, _, args| {
        let target = arg(args, 0);
        let Value::Object(obj) = &target else {
            return Err(interp.type_error("Cannot convert undefined or null to object"));
        };
        for source in args.iter().skip(1) {
            interp.copy_properties(obj, source);
        }
        Ok(target)
    });
    method(&ctor, fp, "fromEntries", |interp, _, args| {
        let obj = interp.new_object();
        for entry in interp.iterate(&arg(args, 0))? {
            let key = interp.get_value(&entry, "0")?;
            let value = interp.get_value(&entry, "1")?;
            obj.set_own(interp.to_key(&key)?, value);
        }
        Ok(Value::Object(obj))
    });
    method(&ctor, fp, "freeze", |_, _, args| Ok(arg(args, 0)));
    method(&ctor, fp, "isFrozen", |_, _, _| Ok(Value::Bool(false)));
    method(&ctor, fp, "create", |interp, _, args| match arg(args, 0) {
        Value::Object(proto) => Ok(Value::Object(Obj::new(ObjKind::Plain, Some(proto)))),
        Value::Null => Ok(Value::Object(Obj::new(ObjKind::Plain, None))),
        other => Err(interp.type_error(format!(
            "Object prototype may only be an Object or null: {}",
            interp.inspect(&other)
        ))),
    });
    method(&ctor, fp, "getPrototypeOf", |interp, _, args| {
        let proto = match arg(args, 0) {
            Value::Object(obj) => obj.proto(),
            Value::Str(_) => Some(interp.intrinsics.string_proto.clone()),
            Value::Number(_) => Some(interp.intrinsics.number_proto.clone()),
            Value::Bool(_) => Some(interp.intrinsics.boolean_proto.clone()),
            _ => return Err(interp.type_error("Cannot convert undefined or null to object")),
        };
        Ok(proto.map(Value::Object).unwrap_or(Value::Null))
    });
    method(&ctor, fp, "setPrototypeOf", |_, _, args| {
        let target = arg(args, 0);
        if let Value::Object(obj) = &target {
            *obj.proto.borrow_mut() = match arg(args, 1) {
                Value::Object(proto) => Some(proto),
                _ => None,
            };
        }
        Ok(target)
    });
    method(&ctor, fp, "is", |_, _, args| {
        let (a, b) = (arg(args, 0), arg(args, 1));
        Ok(Value::Bool(match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => (x.is_nan() && y.is_nan()) || (x == y && x.is_sign_negative() == y.is_sign_negative()),
            _ => a.strict_equals(&b),
        }))
    });
    method(&ctor, fp, "hasOwn", |interp, _, args| {
        let key = interp.to_key(&arg(args, 1))?;
        Ok(Value::Bool(matches!(arg(args, 0), Value::Object(obj) if obj.has_own(&key))))
    });
    declare(globals, "Object", Value::Object(ctor));
}

// --- Function.prototype ---

fn install_function(i: &Intrinsics) {
    let fp = &i.function_proto;
    method(fp, fp, "call", |interp, this, args| {
        interp.call(this, arg(args, 0), args.get(1..).unwrap_or_default())
    });
    method(fp, fp, "apply", |interp, this, args| {
        let list = match arg(args, 1) {
            Value::Undefined | Value::Null => Vec::new(),
            other => interp.iterate(&other)?,
        };
        interp.call(this, arg(args, 0), &list)
    });
    method(fp, fp, "bind", |interp, this, args| {
        let Some(target) = this.as_object().filter(|o| o.is_callable()) else {
            return Err(interp.type_error("Bind must be called on a function"));
        };
        Ok(Value::Object(Obj::new(
            ObjKind::Function(Callable::Bound {
                target: target.clone(),
                this: arg(args, 0),
                args: args.get(1..).unwrap_or_default().to_vec(),
            }),
            Some(interp.intrinsics.function_proto.clone()),
        )))
    });
    method(fp, fp, "toString", |_, this, _| {
        let name = match this {
            Value::Object(obj) => obj.callable().map(|c| c.name()).unwrap_or_else(|| Rc::from("")),
            _ => Rc::from(""),
        };
        Ok(Value::from(format!("function {}() {{ [native code] }}", name)))
    });
}

// --- Array ---

fn this_array<'v>(interp: &Interp, this: &'v Value) -> JsResult<&'v RefCell<Vec<Value>>> {
    match this {
        Value::Object(obj) => match &obj.kind {
            ObjKind::Array(items) => Ok(items),
            _ => Err(interp.type_error("Array.prototype method called on incompatible receiver")),
        },
        _ => Err(interp.type_error("Array.prototype method called on incompatible receiver")),
    }
}

fn item_at(items: &RefCell<Vec<Value>>, i: usize) -> Option<Value> {
    items.borrow().get(i).cloned()
}

fn join(interp: &Interp, items: &[Value], separator: &str) -> JsResult<String> {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        if !item.is_nullish() {
            let text = interp.to_string(item)?;
            interp.check_string_length(out.len() + text.len())?;
            out.push_str(&text);
        }
    }
    Ok(out)
}

/// Deepest array nesting `flat` follows before giving up.
const MAX_FLAT_NESTING: usize = 10_000;

fn flatten_into(interp: &Interp, out: &mut Vec<Value>, items: Vec<Value>, depth: f64, nesting: usize) -> JsResult<()> {
    if nesting > MAX_FLAT_NESTING {
        return Err(interp.throw(ErrorKind::Range, "Maximum call stack size exceeded"));
    }
    for item in items {
        interp.step()?;
        match item.as_object().and_then(|o| o.array_items()) {
            Some(inner) if depth >= 1.0 => flatten_into(interp, out, inner, depth - 1.0, nesting + 1)?,
            _ => {
                interp.check_array_length(out.len() + 1)?;
                out.push(item);
            }
        }
    }
    Ok(())
}

fn merge_sort(mut items: Vec<Value>, cmp: &mut dyn FnMut(&Value, &Value) -> JsResult<Ordering>) -> JsResult<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, cmp)?;
    let right = merge_sort(right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        if cmp(r, l)? == Ordering::Less {
            out.extend(right.next());
        } else {
            out.extend(left.next());
        }
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

fn sort_values(interp: &Interp, items: Vec<Value>, comparator: &Value) -> JsResult<Vec<Value>> {
    if !comparator.is_callable() && !matches!(comparator, Value::Undefined) {
        return Err(interp.type_error("The comparison function must be either a function or undefined"));
    }
    let (defined, undefined): (Vec<Value>, Vec<Value>) = items.into_iter().partition(|v| !matches!(v, Value::Undefined));
    let mut sorted = merge_sort(defined, &mut |a, b| {
        if comparator.is_callable() {
            let n = interp.to_number(&interp.call(comparator, Value::Undefined, &[a.clone(), b.clone()])?)?;
            Ok(if n < 0.0 {
                Ordering::Less
            } else if n > 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            })
        } else {
            Ok(interp.to_string(a)?.cmp(&interp.to_string(b)?))
        }
    })?;
    sorted.extend(undefined);
    Ok(sorted)
}

fn array_from(interp: &Interp, source: &Value) -> JsResult<Vec<Value>> {
    if let Ok(items) = interp.iterate(source) {
        return Ok(items);
    }
    if let Value::Object(obj) = source {
        let len = to_integer(interp, &obj.get("length").unwrap_or_default())?.max(0.0);
        if len > MAX_ARRAY_LENGTH as f64 {
            return Err(interp.throw(ErrorKind::Range, "Invalid array length"));
        }
        let len = len as usize;
        return Ok((0..len).map(|i| obj.get(&i.to_string()).unwrap_or_default()).collect());
    }
    Ok(Vec::new())
}

/// Iterates `this` calling `cb(value, index, array)`; `visit` decides whether to stop.
fn each(
    interp: &Interp,
    this: &Value,
    args: &[Value],
    reverse: bool,
    mut visit: impl FnMut(usize, Value, Value) -> Option<Value>,
) -> JsResult<Option<Value>> {
    let items = this_array(interp, this)?;
    let cb = callback(interp, &arg(args, 0))?;
    let this_arg = arg(args, 1);
    let len = items.borrow().len();
    for step in 0..len {
        let i = if reverse { len - 1 - step } else { step };
        let value = item_at(items, i).unwrap_or_default();
        let result = interp.call(&cb, this_arg.clone(), &[value.clone(), Value::Number(i as f64), this.clone()])?;
        if let Some(done) = visit(i, value, result) {
            return Ok(Some(done));
        }
    }
    Ok(None)
}

fn install_array(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    let proto = &i.array_proto;

    let create = |interp: &Interp, args: &[Value]| -> JsResult<Value> {
        if let [Value::Number(n)] = args {
            if *n < 0.0 || n.fract() != 0.0 || *n > MAX_ARRAY_LENGTH as f64 {
                return Err(interp.throw(ErrorKind::Range, "Invalid array length"));
            }
            return Ok(interp.new_array(vec![Value::Undefined; *n as usize]));
        }
        Ok(interp.new_array(args.to_vec()))
    };
    let ctor = constructor(fp, "Array", proto, move |interp, _, args| create(interp, args), move |interp, _, args| {
        create(interp, args)
    });
    method(&ctor, fp, "isArray", |_, _, args| {
        Ok(Value::Bool(matches!(arg(args, 0), Value::Object(o) if o.is_array())))
    });
    method(&ctor, fp, "of", |interp, _, args| Ok(interp.new_array(args.to_vec())));
    method(&ctor, fp, "from", |interp, _, args| {
        let items = array_from(interp, &arg(args, 0))?;
        let map = arg(args, 1);
        if matches!(map, Value::Undefined) {
            return Ok(interp.new_array(items));
        }
        let map = callback(interp, &map)?;
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            out.push(interp.call(&map, Value::Undefined, &[item, Value::Number(i as f64)])?);
        }
        Ok(interp.new_array(out))
    });

    method(proto, fp, "push", |interp, this, args| {
        let items = this_array(interp, this)?;
        interp.check_array_length(items.borrow().len() + args.len())?;
        items.borrow_mut().extend_from_slice(args);
        let len = items.borrow().len();
        Ok(Value::Number(len as f64))
    });
    method(proto, fp, "pop", |interp, this, _| {
        Ok(this_array(interp, this)?.borrow_mut().pop().unwrap_or_default())
    });
    method(proto, fp, "shift", |interp, this, _| {
        let items = this_array(interp, this)?;
        let mut items = items.borrow_mut();
        Ok(if items.is_empty() { Value::Undefined } else { items.remove(0) })
    });
    method(proto, fp, "unshift", |interp, this, args| {
        let items = this_array(interp, this)?;
        interp.check_array_length(items.borrow().len() + args.len())?;
        let mut items = items.borrow_mut();
        items.splice(0..0, args.iter().cloned());
        Ok(Value::Number(items.len() as f64))
    });
    method(proto, fp, "slice", |interp, this, args| {
        let items = this_array(interp, this)?.borrow().clone();
        let start = relative(interp, &arg(args, 0), items.len(), 0)?;
        let end = relative(interp, &arg(args, 1), items.len(), items.len())?;
        Ok(interp.new_array(items.get(start..end.max(start)).unwrap_or_default().to_vec()))
    });
    method(proto, fp, "splice", |interp, this, args| {
        let items = this_array(interp, this)?;
        let len = items.borrow().len();
        let start = relative(interp, &arg(args, 0), len, 0)?;
        let delete = match args.len() {
            0 => 0,
            1 => len - start,
            _ => (to_integer(interp, &args[1])?.max(0.0) as usize).min(len - start),
        };
        let inserted = args.get(2..).unwrap_or_default().to_vec();
        interp.check_array_length(len - delete + inserted.len())?;
        let removed: Vec<Value> = items.borrow_mut().splice(start..start + delete, inserted).collect();
        Ok(interp.new_array(removed))
    });
    method(proto, fp, "concat", |interp, this, args| {
        let mut out = this_array(interp, this)?.borrow().clone();
        for value in args {
            match value.as_object().and_then(|o| o.array_items()) {
                Some(items) => {
                    interp.check_array_length(out.len() + items.len())?;
                    out.extend(items);
                }
                None => {
                    interp.check_array_length(out.len() + 1)?;
                    out.push(value.clone());
                }
            }
        }
        Ok(interp.new_array(out))
    });
    method(proto, fp, "join", |interp, this, args| {
        let items = this_array(interp, this)?.borrow().clone();
        let separator = match arg(args, 0) {
            Value::Undefined => Rc::from(","),
            other => interp.to_string(&other)?,
        };
        Ok(Value::from(join(interp, &items, &separator)?))
    });
    method(proto, fp, "toString", |interp, this, _| {
        let items = this_array(interp, this)?.borrow().clone();
        Ok(Value::from(join(interp, &items, ",")?))
    });
    method(proto, fp, "reverse", |interp, this, _| {
        this_array(interp, this)?.borrow_mut().reverse();
        Ok(this.clone())
    });
    method(proto, fp, "toReversed", |interp, this, _| {
        let mut items = this_array(interp, this)?.borrow().clone();
        items.reverse();
        Ok(interp.new_array(items))
    });
    method(proto, fp, "sort", |interp, this, args| {
        let items = this_array(interp, this)?;
        let snapshot = items.borrow().clone();
        let sorted = sort_values(interp, snapshot, &arg(args, 0))?;
        *items.borrow_mut() = sorted;
        Ok(this.clone())
    });
    method(proto, fp, "toSorted", |interp, this, args| {
        let snapshot = this_array(interp, this)?.borrow().clone();
        Ok(interp.new_array(sort_values(interp, snapshot, &arg(args, 0))?))
    });
    method(proto, fp, "fill", |interp, this, args| {
        let items = this_array(interp, this)?;
        let len = items.borrow().len();
        let start = relative(interp, &arg(args, 1), len, 0)?;
        let end = relative(interp, &arg(args, 2), len, len)?;
        let value = arg(args, 0);
        for slot in items.borrow_mut().iter_mut().take(end).skip(start) {
            *slot = value.clone();
        }
        Ok(this.clone())
    });
    method(proto, fp, "copyWithin", |interp, this, args| {
        let items = this_array(interp, this)?;
        let len = items.borrow().len();
        let to = relative(interp, &arg(args, 0), len, 0)?;
        let from = relative(interp, &arg(args, 1), len, 0)?;
        let end = relative(interp, &arg(args, 2), len, len)?;
        let count = end.saturating_sub(from).min(len - to);
        if count > 0 {
            let mut items = items.borrow_mut();
            let chunk = items[from..from + count].to_vec();
            items[to..to + count].clone_from_slice(&chunk);
        }
        Ok(this.clone())
    });
    method(proto, fp, "indexOf", |interp, this, args| {
        let items = this_array(interp, this)?.borrow().clone();
        let from = relative(interp, &arg(args, 1), items.len(), 0)?;
        let target = arg(args, 0);
        let found = items.iter().enumerate().skip(from).find(|(_, v)| v.strict_equals(&target));
        Ok(Value::Number(found.map(|(i, _)| i as f64).unwrap_or(-1.0)))
    });
    method(proto, fp, "lastIndexOf", |interp, this, args| {
        let items = this_array(interp, this)?.borrow().clone();
        let target = arg(args, 0);
        let found = items.iter().rposition(|v| v.strict_equals(&target));
        Ok(Value::Number(found.map(|i| i as f64).unwrap_or(-1.0)))
    });
    method(proto, fp, "includes", |interp, this, args| {
        let items = this_array(interp, this)?.borrow().clone();
        let from = relative(interp, &arg(args, 1), items.len(), 0)?;
        let target = arg(args, 0);
        Ok(Value::Bool(items.iter().skip(from).any(|v| v.same_value_zero(&target))))
    });
    method(proto, fp, "at", |interp, this, args| {
        let items = this_array(interp, this)?;
        let len = items.borrow().len() as f64;
        let n = to_integer(interp, &arg(args, 0))?;
        let i = if n < 0.0 { len + n } else { n };
        Ok(if i < 0.0 { Value::Undefined } else { item_at(items, i as usize).unwrap_or_default() })
    });
    method(proto, fp, "forEach", |interp, this, args| {
        each(interp, this, args, false, |_, _, _| None)?;
        Ok(Value::Undefined)
    });
    method(proto, fp, "map", |interp, this, args| {
        let mut out = Vec::new();
        each(interp, this, args, false, |_, _, result| {
            out.push(result);
            None
        })?;
        Ok(interp.new_array(out))
    });
    method(proto, fp, "filter", |interp, this, args| {
        let mut out = Vec::new();
        each(interp, this, args, false, |_, value, result| {
            if result.truthy() {
                out.push(value);
            }
            None
        })?;
        Ok(interp.new_array(out))
    });
    method(proto, fp, "find", |interp, this, args| {
        let found = each(interp, this, args, false, |_, value, result| result.truthy().then_some(value))?;
        Ok(found.unwrap_or_default())
    });
    method(proto, fp, "findLast", |interp, this, args| {
        let found = each(interp, this, args, true, |_, value, result| result.truthy().then_some(value))?;
        Ok(found.unwrap_or_default())
    });
    method(proto, fp, "findIndex", |interp, this, args| {
        let found = each(interp, this, args, false, |i, _, result| result.truthy().then_some(Value::Number(i as f64)))?;
        Ok(found.unwrap_or(Value::Number(-1.0)))
    });
    method(proto, fp, "findLastIndex", |interp, this, args| {
        let found = each(interp, this, args, true, |i, _, result| result.truthy().then_some(Value::Number(i as f64)))?;
        Ok(found.unwrap_or(Value::Number(-1.0)))
    });
    method(proto, fp, "some", |interp, this, args| {
        let found = each(interp, this, args, false, |_, _, result| result.truthy().then_some(Value::Bool(true)))?;
        Ok(Value::Bool(found.is_some()))
    });
    method(proto, fp, "every", |interp, this, args| {
        let failed = each(interp, this, args, false, |_, _, result| (!result.truthy()).then_some(Value::Bool(false)))?;
        Ok(Value::Bool(failed.is_none()))
    });
    for (name, reverse) in [("reduce", false), ("reduceRight", true)] {
        method(proto, fp, name, move |interp, this, args| {
            let items = this_array(interp, this)?;
            let cb = callback(interp, &arg(args, 0))?;
            let len = items.borrow().len();
            let order: Vec<usize> = if reverse { (0..len).rev().collect() } else { (0..len).collect() };
            let mut order = order.into_iter();
            let mut acc = if args.len() >= 2 {
                args[1].clone()
            } else {
                match order.next() {
                    Some(i) => item_at(items, i).unwrap_or_default(),
                    None => return Err(interp.type_error("Reduce of empty array with no initial value")),
                }
            };
            for i in order {
                let value = item_at(items, i).unwrap_or_default();
                acc = interp.call(&cb, Value::Undefined, &[acc, value, Value::Number(i as f64), this.clone()])?;
            }
            Ok(acc)
        });
    }
    method(proto, fp, "flat", |interp, this, args| {
        let items = this_array(interp, this)?.borrow().clone();
        let depth = match arg(args, 0) {
            Value::Undefined => 1.0,
            other => to_integer(interp, &other)?,
        };
        let mut out = Vec::new();
        flatten_into(interp, &mut out, items, depth, 0)?;
        Ok(interp.new_array(out))
    });
    method(proto, fp, "flatMap", |interp, this, args| {
        let mut mapped = Vec::new();
        each(interp, this, args, false, |_, _, result| {
            mapped.push(result);
            None
        })?;
        let mut out = Vec::new();
        flatten_into(interp, &mut out, mapped, 1.0, 0)?;
        Ok(interp.new_array(out))
    });
    method(proto, fp, "keys", |interp, this, _| {
        let len = this_array(interp, this)?.borrow().len();
        Ok(interp.new_array((0..len).map(|i| Value::Number(i as f64)).collect()))
    });
    method(proto, fp, "values", |interp, this, _| {
        let items = this_array(interp, this)?.borrow().clone();
        Ok(interp.new_array(items))
    });
    method(proto, fp, "entries", |interp, this, _| {
        let items = this_array(interp, this)?.borrow().clone();
        let entries = items
            .into_iter()
            .enumerate()
            .map(|(i, v)| interp.new_array(vec![Value::Number(i as f64), v]))
            .collect();
        Ok(interp.new_array(entries))
    });
    declare(globals, "Array", Value::Object(ctor));
}

// --- String ---

fn this_str(interp: &Interp, this: &Value) -> JsResult<Rc<str>> {
    match this {
        Value::Str(s) => Ok(s.clone()),
        Value::Undefined | Value::Null => Err(interp.type_error("String.prototype method called on null or undefined")),
        other => interp.to_string(other),
    }
}

fn find_chars(hay: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(hay.len()));
    }
    (from..=hay.len().saturating_sub(needle.len()))
        .find(|&i| hay.get(i..i + needle.len()) == Some(needle))
}

fn rfind_chars(hay: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.len() > hay.len() {
        return None;
    }
    let last = (hay.len() - needle.len()).min(from);
    (0..=last).rev().find(|&i| hay.get(i..i + needle.len()) == Some(needle))
}

fn chars_of(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn collect(chars: &[char]) -> Value {
    Value::from(chars.iter().collect::<String>())
}

/// Applies `$&` and `$$` in a replacement template.
fn expand_replacement(template: &str, matched: &str) -> String {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('$', Some('&')) => {
                chars.next();
                out.push_str(matched);
            }
            ('$', Some('$')) => {
                chars.next();
                out.push('$');
            }
            _ => out.push(c),
        }
    }
    out
}

fn replace(interp: &Interp, this: &Value, args: &[Value], all: bool) -> JsResult<Value> {
    let s = this_str(interp, this)?;
    let pattern = interp.to_string(&arg(args, 0))?;
    let replacement = arg(args, 1);
    let mut out = String::new();
    let mut last = 0;
    let matches: Vec<usize> = if all {
        s.match_indices(&*pattern).map(|(i, _)| i).collect()
    } else {
        s.find(&*pattern).into_iter().collect()
    };
    for start in matches {
        interp.step()?;
        out.push_str(&s[last..start]);
        let piece = if replacement.is_callable() {
            let position = Value::Number(s[..start].chars().count() as f64);
            let result = interp.call(&replacement, Value::Undefined, &[Value::Str(pattern.clone()), position, Value::Str(s.clone())])?;
            interp.to_string(&result)?.to_string()
        } else {
            expand_replacement(&interp.to_string(&replacement)?, &pattern)
        };
        interp.check_string_length(out.len() + piece.len() + s.len() - start)?;
        out.push_str(&piece);
        last = start + pattern.len();
    }
    out.push_str(&s[last..]);
    Ok(Value::from(out))
}

fn pad(interp: &Interp, this: &Value, args: &[Value], at_start: bool) -> JsResult<Value> {
    let s = this_str(interp, this)?;
    let target = to_integer(interp, &arg(args, 0))?.max(0.0) as usize;
    let filler: Vec<char> = match arg(args, 1) {
        Value::Undefined => vec![' '],
        other => chars_of(&interp.to_string(&other)?),
    };
    let len = s.chars().count();
    if target <= len || filler.is_empty() {
        return Ok(Value::Str(s));
    }
    let widest = filler.iter().map(|c| c.len_utf8()).max().unwrap_or(1);
    interp.check_string_length(s.len().saturating_add((target - len).saturating_mul(widest)))?;
    let padding: String = filler.iter().cycle().take(target - len).collect();
    Ok(Value::from(if at_start { format!("{}{}", padding, s) } else { format!("{}{}", s, padding) }))
}

fn install_string(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    let proto = &i.string_proto;
    let ctor = native(fp, "String", |interp, _, args| match args.first() {
        None => Ok(Value::from("")),
        Some(value) => Ok(Value::Str(interp.to_string(value)?)),
    });
    link(&ctor, proto);
    method(&ctor, fp, "fromCharCode", |_, _, args| {
        let s: String = args
            .iter()
            .map(|v| match v {
                Value::Number(n) => char::from_u32(to_uint32(*n) & 0xFFFF).unwrap_or('\u{FFFD}'),
                _ => '\u{0}',
            })
            .collect();
        Ok(Value::from(s))
    });
    method(&ctor, fp, "fromCodePoint", |interp, _, args| {
        let mut s = String::new();
        for v in args {
            let n = interp.to_number(v)?;
            match char::from_u32(n as u32).filter(|_| n >= 0.0 && n.fract() == 0.0) {
                Some(c) => s.push(c),
                None => return Err(interp.throw(ErrorKind::Range, format!("Invalid code point {}", number_to_string(n)))),
            }
        }
        Ok(Value::from(s))
    });

    method(proto, fp, "toString", |interp, this, _| Ok(Value::Str(this_str(interp, this)?)));
    method(proto, fp, "valueOf", |interp, this, _| Ok(Value::Str(this_str(interp, this)?)));
    method(proto, fp, "charAt", |interp, this, args| {
        let s = this_str(interp, this)?;
        let i = to_integer(interp, &arg(args, 0))?;
        Ok(Value::from(if i < 0.0 { String::new() } else { s.chars().nth(i as usize).map(String::from).unwrap_or_default() }))
    });
    method(proto, fp, "charCodeAt", |interp, this, args| {
        let s = this_str(interp, this)?;
        let i = to_integer(interp, &arg(args, 0))?;
        let c = if i < 0.0 { None } else { s.chars().nth(i as usize) };
        Ok(Value::Number(c.map(|c| c as u32 as f64).unwrap_or(f64::NAN)))
    });
    method(proto, fp, "codePointAt", |interp, this, args| {
        let s = this_str(interp, this)?;
        let i = to_integer(interp, &arg(args, 0))?;
        let c = if i < 0.0 { None } else { s.chars().nth(i as usize) };
        Ok(c.map(|c| Value::Number(c as u32 as f64)).unwrap_or_default())
    });
    method(proto, fp, "at", |interp, this, args| {
        let chars = chars_of(&this_str(interp, this)?);
        let n = to_integer(interp, &arg(args, 0))?;
        let i = if n < 0.0 { chars.len() as f64 + n } else { n };
        Ok(if i < 0.0 {
            Value::Undefined
        } else {
            chars.get(i as usize).map(|c| Value::from(c.to_string())).unwrap_or_default()
        })
    });
    method(proto, fp, "indexOf", |interp, this, args| {
        let hay = chars_of(&this_str(interp, this)?);
        let needle = chars_of(&interp.to_string(&arg(args, 0))?);
        let from = relative(interp, &arg(args, 1), hay.len(), 0)?;
        Ok(Value::Number(find_chars(&hay, &needle, from).map(|i| i as f64).unwrap_or(-1.0)))
    });
    method(proto, fp, "lastIndexOf", |interp, this, args| {
        let hay = chars_of(&this_str(interp, this)?);
        let needle = chars_of(&interp.to_string(&arg(args, 0))?);
        let from = match arg(args, 1) {
            Value::Undefined => hay.len(),
            other => to_integer(interp, &other)?.max(0.0) as usize,
        };
        Ok(Value::Number(rfind_chars(&hay, &needle, from).map(|i| i as f64).unwrap_or(-1.0)))
    });
    method(proto, fp, "includes", |interp, this, args| {
        let hay = chars_of(&this_str(interp, this)?);
        let needle = chars_of(&interp.to_string(&arg(args, 0))?);
        let from = relative(interp, &arg(args, 1), hay.len(), 0)?;
        Ok(Value::Bool(find_chars(&hay, &needle, from).is_some()))
    });
    method(proto, fp, "startsWith", |interp, this, args| {
        let hay = chars_of(&this_str(interp, this)?);
        let needle = chars_of(&interp.to_string(&arg(args, 0))?);
        let from = relative(interp, &arg(args, 1), hay.len(), 0)?;
        Ok(Value::Bool(hay.get(from..).is_some_and(|rest| rest.starts_with(&needle))))
    });
    method(proto, fp, "endsWith", |interp, this, args| {
        let hay = chars_of(&this_str(interp, this)?);
        let needle = chars_of(&interp.to_string(&arg(args, 0))?);
        let end = relative(interp, &arg(args, 1), hay.len(), hay.len())?;
        Ok(Value::Bool(hay.get(..end).is_some_and(|head| head.ends_with(&needle))))
    });
    method(proto, fp, "slice", |interp, this, args| {
        let chars = chars_of(&this_str(interp, this)?);
        let start = relative(interp, &arg(args, 0), chars.len(), 0)?;
        let end = relative(interp, &arg(args, 1), chars.len(), chars.len())?;
        Ok(collect(chars.get(start..end.max(start)).unwrap_or_default()))
    });
    method(proto, fp, "substring", |interp, this, args| {
        let chars = chars_of(&this_str(interp, this)?);
        let clamp = |v: &Value, default: usize| -> JsResult<usize> {
            Ok(match v {
                Value::Undefined => default,
                other => to_integer(interp, other)?.clamp(0.0, chars.len() as f64) as usize,
            })
        };
        let a = clamp(&arg(args, 0), 0)?;
        let b = clamp(&arg(args, 1), chars.len())?;
        Ok(collect(&chars[a.min(b)..a.max(b)]))
    });
    method(proto, fp, "substr", |interp, this, args| {
        let chars = chars_of(&this_str(interp, this)?);
        let start = relative(interp, &arg(args, 0), chars.len(), 0)?;
        let count = match arg(args, 1) {
            Value::Undefined => chars.len() - start,
            other => (to_integer(interp, &other)?.max(0.0) as usize).min(chars.len() - start),
        };
        Ok(collect(&chars[start..start + count]))
    });
    method(proto, fp, "toUpperCase", |interp, this, _| Ok(Value::from(this_str(interp, this)?.to_uppercase())));
    method(proto, fp, "toLowerCase", |interp, this, _| Ok(Value::from(this_str(interp, this)?.to_lowercase())));
    method(proto, fp, "trim", |interp, this, _| Ok(Value::from(this_str(interp, this)?.trim())));
    method(proto, fp, "trimStart", |interp, this, _| Ok(Value::from(this_str(interp, this)?.trim_start())));
    method(proto, fp, "trimEnd", |interp, this, _| Ok(Value::from(this_str(interp, this)?.trim_end())));
    method(proto, fp, "padStart", |interp, this, args| pad(interp, this, args, true));
    method(proto, fp, "padEnd", |interp, this, args| pad(interp, this, args, false));
    method(proto, fp, "repeat", |interp, this, args| {
        let s = this_str(interp, this)?;
        let n = to_integer(interp, &arg(args, 0))?;
        if n < 0.0 || n.is_infinite() {
            return Err(interp.throw(ErrorKind::Range, format!("Invalid count value: {}", number_to_string(n))));
        }
        if !s.is_empty() && n > (MAX_STRING_LENGTH / s.len()) as f64 {
            return Err(interp.throw(ErrorKind::Range, "Invalid string length"));
        }
        Ok(Value::from(s.repeat(n as usize)))
    });
    method(proto, fp, "split", |interp, this, args| {
        let s = this_str(interp, this)?;
        let limit = match arg(args, 1) {
            Value::Undefined => usize::MAX,
            other => to_uint32(interp.to_number(&other)?) as usize,
        };
        let parts: Vec<Value> = match arg(args, 0) {
            Value::Undefined => vec![Value::Str(s.clone())],
            separator => {
                let separator = interp.to_string(&separator)?;
                if separator.is_empty() {
                    s.chars().map(|c| Value::from(c.to_string())).collect()
                } else {
                    s.split(&*separator).map(Value::from).collect()
                }
            }
        };
        Ok(interp.new_array(parts.into_iter().take(limit).collect()))
    });
    method(proto, fp, "replace", |interp, this, args| replace(interp, this, args, false));
    method(proto, fp, "replaceAll", |interp, this, args| replace(interp, this, args, true));
    method(proto, fp, "concat", |interp, this, args| {
        let mut s = this_str(interp, this)?.to_string();
        for value in args {
            let text = interp.to_string(value)?;
            interp.check_string_length(s.len() + text.len())?;
            s.push_str(&text);
        }
        Ok(Value::from(s))
    });
    method(proto, fp, "localeCompare", |interp, this, args| {
        let a = this_str(interp, this)?;
        let b = interp.to_string(&arg(args, 0))?;
        Ok(Value::Number(match a.cmp(&b) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        }))
    });
    declare(globals, "String", Value::Object(ctor));
}

// --- Number, Boolean and numeric globals ---

fn this_number(interp: &Interp, this: &Value) -> JsResult<f64> {
    match this {
        Value::Number(n) => Ok(*n),
        _ => Err(interp.type_error("Number.prototype method called on incompatible receiver")),
    }
}

fn parse_int(text: &str, radix: u32) -> f64 {
    let text = text.trim_start();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, rest) = match (radix, rest.get(..2)) {
        (0 | 16, Some("0x" | "0X")) => (16, &rest[2..]),
        (0, _) => (10, rest),
        (r, _) => (r, rest),
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: Vec<u32> = rest.chars().map_while(|c| c.to_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits.iter().fold(0.0, |acc, &d| acc * radix as f64 + d as f64);
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if text.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if text.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    if end == digits_start || &text[digits_start..end] == "." {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    text[..end].parse().unwrap_or(f64::NAN)
}

fn install_number(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    let proto = &i.number_proto;
    let ctor = native(fp, "Number", |interp, _, args| match args.first() {
        None => Ok(Value::Number(0.0)),
        Some(value) => Ok(Value::Number(interp.to_number(value)?)),
    });
    link(&ctor, proto);
    let is_int = |v: &Value| matches!(v, Value::Number(n) if n.is_finite() && n.fract() == 0.0);
    method(&ctor, fp, "isInteger", move |_, _, args| Ok(Value::Bool(is_int(&arg(args, 0)))));
    method(&ctor, fp, "isSafeInteger", move |_, _, args| {
        let v = arg(args, 0);
        Ok(Value::Bool(is_int(&v) && matches!(v, Value::Number(n) if n.abs() <= 9_007_199_254_740_991.0)))
    });
    method(&ctor, fp, "isFinite", |_, _, args| {
        Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite())))
    });
    method(&ctor, fp, "isNaN", |_, _, args| Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_nan()))));
    constant(&ctor, "MAX_SAFE_INTEGER", Value::Number(9_007_199_254_740_991.0));
    constant(&ctor, "MIN_SAFE_INTEGER", Value::Number(-9_007_199_254_740_991.0));
    constant(&ctor, "MAX_VALUE", Value::Number(f64::MAX));
    constant(&ctor, "MIN_VALUE", Value::Number(5e-324));
    constant(&ctor, "EPSILON", Value::Number(f64::EPSILON));
    constant(&ctor, "POSITIVE_INFINITY", Value::Number(f64::INFINITY));
    constant(&ctor, "NEGATIVE_INFINITY", Value::Number(f64::NEG_INFINITY));
    constant(&ctor, "NaN", Value::Number(f64::NAN));

    let parse_int_fn = native(fp, "parseInt", |interp, _, args| {
        let text = interp.to_string(&arg(args, 0))?;
        let radix = match arg(args, 1) {
            Value::Undefined => 0,
            other => to_uint32(interp.to_number(&other)?),
        };
        Ok(Value::Number(parse_int(&text, radix)))
    });
    let parse_float_fn = native(fp, "parseFloat", |interp, _, args| {
        Ok(Value::Number(parse_float(&interp.to_string(&arg(args, 0))?)))
    });
    constant(&ctor, "parseInt", Value::Object(parse_int_fn.clone()));
    constant(&ctor, "parseFloat", Value::Object(parse_float_fn.clone()));
    declare(globals, "parseInt", Value::Object(parse_int_fn));
    declare(globals, "parseFloat", Value::Object(parse_float_fn));
    declare(
        globals,
        "isNaN",
        Value::Object(native(fp, "isNaN", |interp, _, args| {
            Ok(Value::Bool(interp.to_number(&arg(args, 0))?.is_nan()))
        })),
    );
    declare(
        globals,
        "isFinite",
        Value::Object(native(fp, "isFinite", |interp, _, args| {
            Ok(Value::Bool(interp.to_number(&arg(args, 0))?.is_finite()))
        })),
    );
    declare(globals, "NaN", Value::Number(f64::NAN));
    declare(globals, "Infinity", Value::Number(f64::INFINITY));
    declare(globals, "undefined", Value::Undefined);

    method(proto, fp, "toString", |interp, this, args| {
        let n = this_number(interp, this)?;
        let radix = match arg(args, 0) {
            Value::Undefined => 10.0,
            other => to_integer(interp, &other)?,
        };
        if !(2.0..=36.0).contains(&radix) {
            return Err(interp.throw(ErrorKind::Range, "toString() radix must be between 2 and 36"));
        }
        Ok(Value::from(number_to_radix(n, radix as u32)))
    });
    method(proto, fp, "toFixed", |interp, this, args| {
        let n = this_number(interp, this)?;
        let digits = to_integer(interp, &arg(args, 0))?;
        if !(0.0..=100.0).contains(&digits) {
            return Err(interp.throw(ErrorKind::Range, "toFixed() digits argument must be between 0 and 100"));
        }
        if !n.is_finite() || n.abs() >= 1e21 {
            return Ok(Value::from(number_to_string(n)));
        }
        Ok(Value::from(number_to_fixed(n, digits as usize)))
    });
    method(proto, fp, "toPrecision", |interp, this, args| {
        let n = this_number(interp, this)?;
        let precision = match arg(args, 0) {
            Value::Undefined => return Ok(Value::from(number_to_string(n))),
            other => to_integer(interp, &other)?,
        };
        if !n.is_finite() {
            return Ok(Value::from(number_to_string(n)));
        }
        if !(1.0..=100.0).contains(&precision) {
            return Err(interp.throw(ErrorKind::Range, "toPrecision() argument must be between 1 and 100"));
        }
        Ok(Value::from(number_to_precision(n, precision as usize)))
    });
    method(proto, fp, "valueOf", |interp, this, _| Ok(Value::Number(this_number(interp, this)?)));
    declare(globals, "Number", Value::Object(ctor));

    let boolean = native(fp, "Boolean", |_, _, args| Ok(Value::Bool(arg(args, 0).truthy())));
    link(&boolean, &i.boolean_proto);
    method(&i.boolean_proto, fp, "toString", |_, this, _| Ok(Value::from(if this.truthy() { "true" } else { "false" })));
    method(&i.boolean_proto, fp, "valueOf", |_, this, _| Ok(Value::Bool(this.truthy())));
    declare(globals, "Boolean", Value::Object(boolean));
}

// --- Math ---

fn install_math(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    let math = Obj::new(ObjKind::Plain, Some(i.object_proto.clone()));
    let unary: [(&str, fn(f64) -> f64); 20] = [
        ("abs", f64::abs),
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        ("trunc", f64::trunc),
        ("sqrt", f64::sqrt),
        ("cbrt", f64::cbrt),
        ("log", f64::ln),
        ("log2", f64::log2),
        ("log10", f64::log10),
        ("log1p", f64::ln_1p),
        ("exp", f64::exp),
        ("expm1", f64::exp_m1),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("tan", f64::tan),
        ("asin", f64::asin),
        ("acos", f64::acos),
        ("atan", f64::atan),
        ("round", |x| if x.is_finite() { (x + 0.5).floor() } else { x }),
        ("sign", |x| if x.is_nan() || x == 0.0 { x } else { x.signum() }),
    ];
    for (name, f) in unary {
        method(&math, fp, name, move |interp, _, args| Ok(Value::Number(f(interp.to_number(&arg(args, 0))?))));
    }
    method(&math, fp, "pow", |interp, _, args| {
        let (a, b) = (arg(args, 0), arg(args, 1));
        interp.binary(super::ast::BinOp::Exp, &a, &b)
    });
    method(&math, fp, "atan2", |interp, _, args| {
        Ok(Value::Number(interp.to_number(&arg(args, 0))?.atan2(interp.to_number(&arg(args, 1))?)))
    });
    method(&math, fp, "hypot", |interp, _, args| {
        let mut sum = 0.0;
        for v in args {
            let n = interp.to_number(v)?;
            sum += n * n;
        }
        Ok(Value::Number(sum.sqrt()))
    });
    method(&math, fp, "max", |interp, _, args| {
        let mut best = f64::NEG_INFINITY;
        for v in args {
            let n = interp.to_number(v)?;
            if n.is_nan() || best.is_nan() {
                best = f64::NAN;
            } else if n > best {
                best = n;
            }
        }
        Ok(Value::Number(best))
    });
    method(&math, fp, "min", |interp, _, args| {
        let mut best = f64::INFINITY;
        for v in args {
            let n = interp.to_number(v)?;
            if n.is_nan() || best.is_nan() {
                best = f64::NAN;
            } else if n < best {
                best = n;
            }
        }
        Ok(Value::Number(best))
    });
    method(&math, fp, "random", |interp, _, _| Ok(Value::Number(interp.random())));
    for (name, value) in [
        ("PI", std::f64::consts::PI),
        ("E", std::f64::consts::E),
        ("LN2", std::f64::consts::LN_2),
        ("LN10", std::f64::consts::LN_10),
        ("LOG2E", std::f64::consts::LOG2_E),
        ("LOG10E", std::f64::consts::LOG10_E),
        ("SQRT2", std::f64::consts::SQRT_2),
        ("SQRT1_2", std::f64::consts::FRAC_1_SQRT_2),
    ] {
        constant(&math, name, Value::Number(value));
    }
    declare(globals, "Math", Value::Object(math));
}

// --- JSON ---

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// `JSON.stringify`; `None` where the result would be `undefined`.
pub(super) fn json_stringify(interp: &Interp, value: &Value, indent: &str) -> JsResult<Option<String>> {
    let mut out = String::new();
    let written = json_write(interp, value, indent, &mut Vec::new(), &mut out)?;
    Ok(written.then_some(out))
}

/// Deepest container nesting `JSON.stringify` follows.
const MAX_JSON_DEPTH: usize = 10_000;

fn json_newline(out: &mut String, indent: &str, level: usize) {
    if !indent.is_empty() {
        out.push('\n');
        for _ in 0..level {
            out.push_str(indent);
        }
    }
}

/// Appends the JSON text of `value`; false when it has none (`undefined`,
/// functions).
fn json_write(interp: &Interp, value: &Value, indent: &str, stack: &mut Vec<*const Obj>, out: &mut String) -> JsResult<bool> {
    let value = match value {
        Value::Object(obj) => match obj.get("toJSON").filter(Value::is_callable) {
            Some(to_json) => interp.call(&to_json, value.clone(), &[])?,
            None => value.clone(),
        },
        other => other.clone(),
    };
    let obj = match &value {
        Value::Undefined => return Ok(false),
        Value::Null => {
            out.push_str("null");
            return Ok(true);
        }
        Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            return Ok(true);
        }
        Value::Number(n) if n.is_finite() => {
            out.push_str(&number_to_string(*n));
            return Ok(true);
        }
        Value::Number(_) => {
            out.push_str("null");
            return Ok(true);
        }
        Value::Str(s) => {
            out.push_str(&quote(s));
            interp.check_string_length(out.len())?;
            return Ok(true);
        }
        Value::Object(obj) if obj.is_callable() => return Ok(false),
        Value::Object(obj) => obj.clone(),
    };
    if stack.contains(&Rc::as_ptr(&obj)) {
        return Err(interp.type_error("Converting circular structure to JSON"));
    }
    if stack.len() >= MAX_JSON_DEPTH {
        return Err(interp.throw(ErrorKind::Range, "Maximum call stack size exceeded"));
    }
    stack.push(Rc::as_ptr(&obj));
    let level = stack.len();
    match &obj.kind {
        ObjKind::Array(items) => {
            let items = items.borrow().clone();
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                interp.step()?;
                if i > 0 {
                    out.push(',');
                }
                json_newline(out, indent, level);
                if !json_write(interp, item, indent, stack, out)? {
                    out.push_str("null");
                }
                interp.check_string_length(out.len())?;
            }
            if !items.is_empty() {
                json_newline(out, indent, level - 1);
            }
            out.push(']');
        }
        ObjKind::Plain => {
            out.push('{');
            let mut wrote_any = false;
            for key in obj.own_keys() {
                interp.step()?;
                let field = obj.get_own(&key).unwrap_or_default();
                let mark = out.len();
                if wrote_any {
                    out.push(',');
                }
                json_newline(out, indent, level);
                out.push_str(&quote(&key));
                out.push_str(if indent.is_empty() { ":" } else { ": " });
                if json_write(interp, &field, indent, stack, out)? {
                    wrote_any = true;
                } else {
                    out.truncate(mark);
                }
                interp.check_string_length(out.len())?;
            }
            if wrote_any {
                json_newline(out, indent, level - 1);
            }
            out.push('}');
        }
        _ => out.push_str("{}"),
    }
    stack.pop();
    Ok(true)
}

fn install_json(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    let json = Obj::new(ObjKind::Plain, Some(i.object_proto.clone()));
    method(&json, fp, "stringify", |interp, _, args| {
        let indent = match arg(args, 2) {
            Value::Number(n) => " ".repeat(n.clamp(0.0, 10.0) as usize),
            Value::Str(s) => s.chars().take(10).collect(),
            _ => String::new(),
        };
        Ok(json_stringify(interp, &arg(args, 0), &indent)?.map(Value::from).unwrap_or_default())
    });
    method(&json, fp, "parse", |interp, _, args| {
        let text = interp.to_string(&arg(args, 0))?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(parsed) => Ok(interp.from_json(&parsed)),
            Err(e) => Err(interp.throw(
                ErrorKind::Syntax,
                format!("Unexpected token in JSON at line {} column {}", e.line(), e.column()),
            )),
        }
    });
    declare(globals, "JSON", Value::Object(json));
}

// --- Errors ---

fn install_errors(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    constant(&i.error_proto, "message", Value::from(""));
    method(&i.error_proto, fp, "toString", |interp, this, _| {
        let name = interp.to_string(&interp.get_value(this, "name")?)?;
        let message = interp.to_string(&interp.get_value(this, "message")?)?;
        Ok(Value::from(match (name.is_empty(), message.is_empty()) {
            (_, true) => name.to_string(),
            (true, false) => message.to_string(),
            (false, false) => format!("{}: {}", name, message),
        }))
    });
    let kinds = [
        ("Error", ErrorKind::Error, &i.error_proto),
        ("TypeError", ErrorKind::Type, &i.type_error_proto),
        ("RangeError", ErrorKind::Range, &i.range_error_proto),
        ("ReferenceError", ErrorKind::Reference, &i.reference_error_proto),
        ("SyntaxError", ErrorKind::Syntax, &i.syntax_error_proto),
    ];
    for (name, kind, proto) in kinds {
        constant(proto, "name", Value::from(name));
        let build = move |interp: &Interp, proto: ObjRef, args: &[Value]| -> JsResult<Value> {
            let message = match arg(args, 0) {
                Value::Undefined => Rc::from(""),
                other => interp.to_string(&other)?,
            };
            let error = interp.make_error(proto, &message);
            if let Value::Object(options) = arg(args, 1) {
                if let Some(cause) = options.get("cause") {
                    error.set_own(Rc::from("cause"), cause);
                }
            }
            Ok(Value::Object(error))
        };
        let ctor = constructor(
            fp,
            name,
            proto,
            move |interp, _, args| {
                let proto = match kind {
                    ErrorKind::Error => &interp.intrinsics.error_proto,
                    ErrorKind::Type => &interp.intrinsics.type_error_proto,
                    ErrorKind::Range => &interp.intrinsics.range_error_proto,
                    ErrorKind::Reference => &interp.intrinsics.reference_error_proto,
                    ErrorKind::Syntax => &interp.intrinsics.syntax_error_proto,
                };
                build(interp, proto.clone(), args)
            },
            move |interp, new_target, args| {
                let fallback = match new_target.get("prototype") {
                    Some(Value::Object(p)) => p,
                    _ => interp.intrinsics.error_proto.clone(),
                };
                build(interp, fallback, args)
            },
        );
        declare(globals, name, Value::Object(ctor));
    }
}

// --- Set and Map ---

fn this_set<'v>(interp: &Interp, this: &'v Value) -> JsResult<&'v RefCell<OrderedMap<Value>>> {
    match this {
        Value::Object(obj) => match &obj.kind {
            ObjKind::Set(set) => Ok(set),
            _ => Err(interp.type_error("Set method called on incompatible receiver")),
        },
        _ => Err(interp.type_error("Set method called on incompatible receiver")),
    }
}

fn this_map<'v>(interp: &Interp, this: &'v Value) -> JsResult<&'v RefCell<OrderedMap<(Value, Value)>>> {
    match this {
        Value::Object(obj) => match &obj.kind {
            ObjKind::Map(map) => Ok(map),
            _ => Err(interp.type_error("Map method called on incompatible receiver")),
        },
        _ => Err(interp.type_error("Map method called on incompatible receiver")),
    }
}

/// Normalises `-0` so it shares a slot with `0`.
fn collection_key(value: Value) -> Value {
    match value {
        Value::Number(n) if n == 0.0 => Value::Number(0.0),
        other => other,
    }
}

fn install_collections(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;

    let set_proto = &i.set_proto;
    let set = constructor(
        fp,
        "Set",
        set_proto,
        |interp, _, _| Err(interp.type_error("Constructor Set requires 'new'")),
        |interp, new_target, args| {
            let proto = interp.prototype_from(new_target, &interp.intrinsics.set_proto);
            let mut entries = OrderedMap::new();
            let source = arg(args, 0);
            if !source.is_nullish() {
                for value in interp.iterate(&source)? {
                    let value = collection_key(value);
                    entries.insert(HashKey::of(&value), value);
                }
            }
            Ok(Value::Object(Obj::new(ObjKind::Set(RefCell::new(entries)), Some(proto))))
        },
    );
    method(set_proto, fp, "add", |interp, this, args| {
        let value = collection_key(arg(args, 0));
        this_set(interp, this)?.borrow_mut().insert(HashKey::of(&value), value);
        Ok(this.clone())
    });
    method(set_proto, fp, "has", |interp, this, args| {
        let key = HashKey::of(&collection_key(arg(args, 0)));
        Ok(Value::Bool(this_set(interp, this)?.borrow().get(&key).is_some()))
    });
    method(set_proto, fp, "delete", |interp, this, args| {
        let key = HashKey::of(&collection_key(arg(args, 0)));
        Ok(Value::Bool(this_set(interp, this)?.borrow_mut().remove(&key)))
    });
    method(set_proto, fp, "clear", |interp, this, _| {
        this_set(interp, this)?.borrow_mut().clear();
        Ok(Value::Undefined)
    });
    method(set_proto, fp, "forEach", |interp, this, args| {
        let values = this_set(interp, this)?.borrow().values();
        let cb = callback(interp, &arg(args, 0))?;
        for value in values {
            interp.call(&cb, arg(args, 1), &[value.clone(), value, this.clone()])?;
        }
        Ok(Value::Undefined)
    });
    for name in ["values", "keys"] {
        method(set_proto, fp, name, |interp, this, _| {
            let values = this_set(interp, this)?.borrow().values();
            Ok(interp.new_array(values))
        });
    }
    method(set_proto, fp, "entries", |interp, this, _| {
        let values = this_set(interp, this)?.borrow().values();
        Ok(interp.new_array(values.into_iter().map(|v| interp.new_array(vec![v.clone(), v])).collect()))
    });
    declare(globals, "Set", Value::Object(set));

    let map_proto = &i.map_proto;
    let map = constructor(
        fp,
        "Map",
        map_proto,
        |interp, _, _| Err(interp.type_error("Constructor Map requires 'new'")),
        |interp, new_target, args| {
            let proto = interp.prototype_from(new_target, &interp.intrinsics.map_proto);
            let mut entries = OrderedMap::new();
            let source = arg(args, 0);
            if !source.is_nullish() {
                for entry in interp.iterate(&source)? {
                    let key = collection_key(interp.get_value(&entry, "0")?);
                    let value = interp.get_value(&entry, "1")?;
                    entries.insert(HashKey::of(&key), (key, value));
                }
            }
            Ok(Value::Object(Obj::new(ObjKind::Map(RefCell::new(entries)), Some(proto))))
        },
    );
    method(map_proto, fp, "get", |interp, this, args| {
        let key = HashKey::of(&collection_key(arg(args, 0)));
        Ok(this_map(interp, this)?.borrow().get(&key).map(|(_, v)| v.clone()).unwrap_or_default())
    });
    method(map_proto, fp, "set", |interp, this, args| {
        let key = collection_key(arg(args, 0));
        this_map(interp, this)?.borrow_mut().insert(HashKey::of(&key), (key, arg(args, 1)));
        Ok(this.clone())
    });
    method(map_proto, fp, "has", |interp, this, args| {
        let key = HashKey::of(&collection_key(arg(args, 0)));
        Ok(Value::Bool(this_map(interp, this)?.borrow().get(&key).is_some()))
    });
    method(map_proto, fp, "delete", |interp, this, args| {
        let key = HashKey::of(&collection_key(arg(args, 0)));
        Ok(Value::Bool(this_map(interp, this)?.borrow_mut().remove(&key)))
    });
    method(map_proto, fp, "clear", |interp, this, _| {
        this_map(interp, this)?.borrow_mut().clear();
        Ok(Value::Undefined)
    });
    method(map_proto, fp, "forEach", |interp, this, args| {
        let entries = this_map(interp, this)?.borrow().values();
        let cb = callback(interp, &arg(args, 0))?;
        for (key, value) in entries {
            interp.call(&cb, arg(args, 1), &[value, key, this.clone()])?;
        }
        Ok(Value::Undefined)
    });
    method(map_proto, fp, "keys", |interp, this, _| {
        let entries = this_map(interp, this)?.borrow().values();
        Ok(interp.new_array(entries.into_iter().map(|(k, _)| k).collect()))
    });
    method(map_proto, fp, "values", |interp, this, _| {
        let entries = this_map(interp, this)?.borrow().values();
        Ok(interp.new_array(entries.into_iter().map(|(_, v)| v).collect()))
    });
    method(map_proto, fp, "entries", |interp, this, _| {
        let entries = this_map(interp, this)?.borrow().values();
        Ok(interp.new_array(entries.into_iter().map(|(k, v)| interp.new_array(vec![k, v])).collect()))
    });
    declare(globals, "Map", Value::Object(map));
}

// --- Promise ---

fn this_promise(interp: &Interp, this: &Value) -> JsResult<ObjRef> {
    match this {
        Value::Object(obj) if matches!(obj.kind, ObjKind::Promise(_)) => Ok(obj.clone()),
        _ => Err(interp.type_error("Promise.prototype method called on incompatible receiver")),
    }
}

fn rejected(interp: &Interp, reason: Value) -> Value {
    let promise = interp.new_promise();
    interp.settle(&promise, Err(reason));
    Value::Object(promise)
}

/// Iterable argument of a combinator; a non-iterable rejects the result.
fn combinator_items(interp: &Interp, args: &[Value]) -> JsResult<Result<Vec<Value>, Value>> {
    match interp.iterate(&arg(args, 0)) {
        Ok(items) => Ok(Ok(items)),
        Err(abrupt) => Ok(Err(rejected(interp, thrown_value(abrupt)?))),
    }
}

fn aggregate_error(interp: &Interp, errors: Vec<Value>) -> Value {
    let error = interp.make_error(interp.intrinsics.error_proto.clone(), "All promises were rejected");
    error.set_own(Rc::from("name"), Value::from("AggregateError"));
    error.set_own(Rc::from("errors"), interp.new_array(errors));
    Value::Object(error)
}

fn install_promise(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    let proto = &i.promise_proto;
    let ctor = constructor(
        fp,
        "Promise",
        proto,
        |interp, _, _| Err(interp.type_error("Promise constructor cannot be invoked without 'new'")),
        |interp, new_target, args| {
            let executor = arg(args, 0);
            if !executor.is_callable() {
                return Err(interp.type_error(format!("Promise resolver {} is not a function", interp.inspect(&executor))));
            }
            let promise = interp.new_promise_with_proto(interp.prototype_from(new_target, &interp.intrinsics.promise_proto));
            let (resolve, reject) = interp.resolving_functions(&promise);
            if let Err(abrupt) = interp.call(&executor, Value::Undefined, &[resolve, reject.clone()]) {
                let reason = thrown_value(abrupt)?;
                interp.call(&reject, Value::Undefined, &[reason])?;
            }
            Ok(Value::Object(promise))
        },
    );
    method(&ctor, fp, "resolve", |interp, _, args| Ok(Value::Object(interp.promise_resolve(arg(args, 0)))));
    method(&ctor, fp, "reject", |interp, _, args| Ok(rejected(interp, arg(args, 0))));
    method(&ctor, fp, "all", |interp, _, args| {
        let items = match combinator_items(interp, args)? {
            Ok(items) => items,
            Err(rejection) => return Ok(rejection),
        };
        let result = interp.new_promise();
        if items.is_empty() {
            interp.settle(&result, Ok(interp.new_array(Vec::new())));
            return Ok(Value::Object(result));
        }
        let values = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
        let remaining = Rc::new(Cell::new(items.len()));
        for (index, item) in items.into_iter().enumerate() {
            let (values, remaining, result) = (values.clone(), remaining.clone(), result.clone());
            let source = interp.promise_resolve(item);
            interp.on_settle(
                &source,
                Reaction::Native(Rc::new(move |interp, outcome| {
                    match outcome {
                        Ok(value) => {
                            if let Some(slot) = values.borrow_mut().get_mut(index) {
                                *slot = value;
                            }
                            remaining.set(remaining.get() - 1);
                            if remaining.get() == 0 {
                                let array = interp.new_array(values.borrow().clone());
                                interp.settle(&result, Ok(array));
                            }
                        }
                        Err(reason) => interp.settle(&result, Err(reason)),
                    }
                    Ok(())
                })),
            );
        }
        Ok(Value::Object(result))
    });
    method(&ctor, fp, "allSettled", |interp, _, args| {
        let items = match combinator_items(interp, args)? {
            Ok(items) => items,
            Err(rejection) => return Ok(rejection),
        };
        let result = interp.new_promise();
        if items.is_empty() {
            interp.settle(&result, Ok(interp.new_array(Vec::new())));
            return Ok(Value::Object(result));
        }
        let values = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
        let remaining = Rc::new(Cell::new(items.len()));
        for (index, item) in items.into_iter().enumerate() {
            let (values, remaining, result) = (values.clone(), remaining.clone(), result.clone());
            let source = interp.promise_resolve(item);
            interp.on_settle(
                &source,
                Reaction::Native(Rc::new(move |interp, outcome| {
                    let entry = interp.new_object();
                    match outcome {
                        Ok(value) => {
                            entry.set_own(Rc::from("status"), Value::from("fulfilled"));
                            entry.set_own(Rc::from("value"), value);
                        }
                        Err(reason) => {
                            entry.set_own(Rc::from("status"), Value::from("rejected"));
                            entry.set_own(Rc::from("reason"), reason);
                        }
                    }
                    if let Some(slot) = values.borrow_mut().get_mut(index) {
                        *slot = Value::Object(entry);
                    }
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let array = interp.new_array(values.borrow().clone());
                        interp.settle(&result, Ok(array));
                    }
                    Ok(())
                })),
            );
        }
        Ok(Value::Object(result))
    });
    method(&ctor, fp, "race", |interp, _, args| {
        let items = match combinator_items(interp, args)? {
            Ok(items) => items,
            Err(rejection) => return Ok(rejection),
        };
        let result = interp.new_promise();
        for item in items {
            let result = result.clone();
            let source = interp.promise_resolve(item);
            interp.on_settle(
                &source,
                Reaction::Native(Rc::new(move |interp, outcome| {
                    interp.settle(&result, outcome);
                    Ok(())
                })),
            );
        }
        Ok(Value::Object(result))
    });
    method(&ctor, fp, "any", |interp, _, args| {
        let items = match combinator_items(interp, args)? {
            Ok(items) => items,
            Err(rejection) => return Ok(rejection),
        };
        if items.is_empty() {
            return Ok(rejected(interp, aggregate_error(interp, Vec::new())));
        }
        let result = interp.new_promise();
        let errors = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
        let remaining = Rc::new(Cell::new(items.len()));
        for (index, item) in items.into_iter().enumerate() {
            let (errors, remaining, result) = (errors.clone(), remaining.clone(), result.clone());
            let source = interp.promise_resolve(item);
            interp.on_settle(
                &source,
                Reaction::Native(Rc::new(move |interp, outcome| {
                    match outcome {
                        Ok(value) => interp.settle(&result, Ok(value)),
                        Err(reason) => {
                            if let Some(slot) = errors.borrow_mut().get_mut(index) {
                                *slot = reason;
                            }
                            remaining.set(remaining.get() - 1);
                            if remaining.get() == 0 {
                                let error = aggregate_error(interp, errors.borrow().clone());
                                interp.settle(&result, Err(error));
                            }
                        }
                    }
                    Ok(())
                })),
            );
        }
        Ok(Value::Object(result))
    });

    method(proto, fp, "then", |interp, this, args| {
        let promise = this_promise(interp, this)?;
        let keep = |v: Value| if v.is_callable() { v } else { Value::Undefined };
        Ok(Value::Object(interp.then(&promise, keep(arg(args, 0)), keep(arg(args, 1)))))
    });
    method(proto, fp, "catch", |interp, this, args| {
        let promise = this_promise(interp, this)?;
        let handler = arg(args, 0);
        let handler = if handler.is_callable() { handler } else { Value::Undefined };
        Ok(Value::Object(interp.then(&promise, Value::Undefined, handler)))
    });
    method(proto, fp, "finally", |interp, this, args| {
        let promise = this_promise(interp, this)?;
        let on_finally = arg(args, 0);
        if !on_finally.is_callable() {
            return Ok(Value::Object(interp.then(&promise, Value::Undefined, Value::Undefined)));
        }
        let finally = on_finally.clone();
        let on_fulfilled = interp.native_function("", move |interp, _, args| {
            let result = interp.call(&finally, Value::Undefined, &[])?;
            let waited = interp.promise_resolve(result);
            let value = arg(args, 0);
            let pass = interp.native_function("", move |_, _, _| Ok(value.clone()));
            Ok(Value::Object(interp.then(&waited, pass, Value::Undefined)))
        });
        let on_rejected = interp.native_function("", move |interp, _, args| {
            let result = interp.call(&on_finally, Value::Undefined, &[])?;
            let waited = interp.promise_resolve(result);
            let reason = arg(args, 0);
            let rethrow = interp.native_function("", move |_, _, _| Err(Abrupt::Throw(reason.clone())));
            Ok(Value::Object(interp.then(&waited, rethrow, Value::Undefined)))
        });
        Ok(Value::Object(interp.then(&promise, on_fulfilled, on_rejected)))
    });
    declare(globals, "Promise", Value::Object(ctor));
}

// --- host: timers, console, clocks ---

fn install_host(globals: &Rc<Scope>, i: &Intrinsics) {
    let fp = &i.function_proto;
    for (name, repeat) in [("setTimeout", false), ("setInterval", true)] {
        let timer = native(fp, name, move |interp, _, args| {
            let cb = callback(interp, &arg(args, 0))?;
            let delay = match arg(args, 1) {
                Value::Undefined => 0.0,
                other => interp.to_number(&other)?,
            };
            let extra = args.get(2..).unwrap_or_default().to_vec();
            Ok(Value::Number(interp.set_timer(cb, delay, extra, repeat) as f64))
        });
        declare(globals, name, Value::Object(timer));
    }
    for name in ["clearTimeout", "clearInterval"] {
        let clear = native(fp, name, |interp, _, args| {
            if let Value::Number(id) = arg(args, 0) {
                if id >= 1.0 && id.fract() == 0.0 {
                    interp.clear_timer(id as u64);
                }
            }
            Ok(Value::Undefined)
        });
        declare(globals, name, Value::Object(clear));
    }
    declare(
        globals,
        "queueMicrotask",
        Value::Object(native(fp, "queueMicrotask", |interp, _, args| {
            let cb = callback(interp, &arg(args, 0))?;
            interp.enqueue(super::runtime::Job::Call(cb, Vec::new()));
            Ok(Value::Undefined)
        })),
    );

    let console = Obj::new(ObjKind::Plain, Some(i.object_proto.clone()));
    for level in ["log", "info", "warn", "error", "debug"] {
        method(&console, fp, level, move |interp, _, args| {
            let line = args.iter().map(|v| interp.inspect(v)).collect::<Vec<_>>().join(" ");
            debug!("console.{}: {}", level, line);
            interp.log_line(line);
            Ok(Value::Undefined)
        });
    }
    declare(globals, "console", Value::Object(console));

    let date = Obj::new(ObjKind::Plain, Some(i.object_proto.clone()));
    method(&date, fp, "now", |interp, _, _| Ok(Value::Number((interp.epoch_ms() + interp.now_ms()).floor())));
    declare(globals, "Date", Value::Object(date));

    let performance = Obj::new(ObjKind::Plain, Some(i.object_proto.clone()));
    method(&performance, fp, "now", |interp, _, _| Ok(Value::Number(interp.now_ms())));
    declare(globals, "performance", Value::Object(performance));
}

#[cfg(test)]
mod tests {
    use super::super::interp::Limits;
    use super::super::parser::parse_expression_source;
    use super::*;

    fn eval(src: &str) -> (Rc<Interp>, Value) {
        let interp = Interp::new(Limits::default(), 0.0);
        let expr = parse_expression_source(src).unwrap();
        let value = match interp.eval_standalone(&expr) {
            Ok(v) => v,
            Err(Abrupt::Throw(e)) => panic!("threw {}", interp.describe_error(&e)),
            Err(other) => panic!("{:?}", other),
        };
        (interp, value)
    }

    fn json(src: &str) -> String {
        let (interp, value) = eval(src);
        json_stringify(&interp, &value, "").unwrap().unwrap_or_else(|| "undefined".into())
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(json("[3, 1, 2].map(x => x * 2).filter(x => x > 2)"), "[6,4]");
        assert_eq!(json("[1, 2, 3, 4].reduce((a, b) => a + b)"), "10");
        assert_eq!(json("[10, 9, 1, 2].sort()"), "[1,10,2,9]");
        assert_eq!(json("[10, 9, 1, 2].sort((a, b) => a - b)"), "[1,2,9,10]");
        assert_eq!(json("[1, [2, [3, [4]]]].flat(2)"), "[1,2,3,[4]]");
        assert_eq!(json("(() => { const a = [1, 2, 3, 4, 5]; const r = a.splice(1, 2, 'x'); return [a, r]; })()"), "[[1,\"x\",4,5],[2,3]]");
        assert_eq!(json("[NaN].includes(NaN) && [NaN].indexOf(NaN)"), "-1");
        assert_eq!(json("Array.from({ length: 3 }, (_, i) => i * i)"), "[0,1,4]");
        assert_eq!(json("[1, 2, 3].at(-1)"), "3");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(json("'a-b-c'.split('-')"), "[\"a\",\"b\",\"c\"]");
        assert_eq!(json("'hello'.slice(-3).toUpperCase()"), "\"LLO\"");
        assert_eq!(json("'5'.padStart(3, '0')"), "\"005\"");
        assert_eq!(json("'aaa'.replaceAll('a', 'b') + 'abc'.replace('b', '[$&]')"), "\"bbba[b]c\"");
        assert_eq!(json("'héllo'.indexOf('l')"), "2");
        assert_eq!(json("'  x '.trim().length"), "1");
    }

    #[test]
    fn test_collections() {
        assert_eq!(json("[...new Set([7, 3, 7, 3, 1, 3, 7])]"), "[7,3,1]");
        assert_eq!(json("(() => { const m = new Map([['a', 1]]); m.set('b', 2); return [m.size, m.get('b'), [...m.keys()]]; })()"), "[2,2,[\"a\",\"b\"]]");
        assert_eq!(json("new Set([1])"), "{}");
    }

    #[test]
    fn test_json_round_trip_and_indent() {
        assert_eq!(json("JSON.parse('{\"b\":1,\"a\":[true,null]}')"), "{\"b\":1,\"a\":[true,null]}");
        let (interp, value) = eval("({ a: [1], b: undefined, c: () => 1 })");
        assert_eq!(json_stringify(&interp, &value, "  ").unwrap().unwrap(), "{\n  \"a\": [\n    1\n  ]\n}");
    }

    #[test]
    fn test_json_rejects_cycles() {
        let (interp, value) = eval("(() => { const a = {}; a.self = a; return a; })()");
        assert!(matches!(json_stringify(&interp, &value, ""), Err(Abrupt::Throw(_))));
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(json("(255).toString(16) + (1.005).toFixed(1)"), "\"ff1.0\"");
        assert_eq!(json("parseInt('42px') + parseFloat('3.5e1x')"), "77");
        assert_eq!(json("Number('') + Number(' 12 ')"), "12");
        assert_eq!(json("Math.max() === -Infinity && Math.round(-2.5)"), "-2");
    }

    #[test]
    fn test_to_fixed_rounds_exact_decimal_value() {
        assert_eq!(json("[(12.5).toFixed(0), (-2.5).toFixed(0), (1.005).toFixed(2), (1.45).toFixed(1)]"), r#"["13","-3","1.00","1.4"]"#);
        assert_eq!(json("[(0.000001).toFixed(2), (-0).toFixed(1), (0.5).toFixed(0), (99.99).toFixed(1)]"), r#"["0.00","0.0","1","100.0"]"#);
    }

    #[test]
    fn test_to_precision() {
        assert_eq!(json("[(123.456).toPrecision(4), (0.000123).toPrecision(2), (123456).toPrecision(2)]"), r#"["123.5","0.00012","1.2e+5"]"#);
        assert_eq!(json("[(1e-7).toPrecision(1), (0).toPrecision(3), (-9.99).toPrecision(2), (5).toPrecision()]"), r#"["1e-7","0.00","-10","5"]"#);
        assert_eq!(json("(() => { try { (1).toPrecision(0); } catch (e) { return e instanceof RangeError; } })()"), "true");
    }

    #[test]
    fn test_copy_within() {
        assert_eq!(json("[1, 2, 3, 4, 5].copyWithin(0, 3)"), "[4,5,3,4,5]");
        assert_eq!(json("[1, 2, 3, 4, 5].copyWithin(1, 0, 3)"), "[1,1,2,3,5]");
        assert_eq!(json("[1, 2, 3, 4, 5].copyWithin(-2, -4, -3)"), "[1,2,3,2,5]");
    }

    #[test]
    fn test_math_random_is_deterministic() {
        let (_, a) = eval("[Math.random(), Math.random()]");
        let (_, b) = eval("[Math.random(), Math.random()]");
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }
}
