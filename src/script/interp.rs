//! Tree-walking evaluator.
//!
//! Evaluation is written as boxed local futures so that `await` can suspend
//! an async function in the middle of any expression. Synchronous functions
//! are polled exactly once: the parser only accepts `await` inside async
//! bodies, so they always complete on the first poll.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::task::noop_waker_ref;

use super::ast::*;
use super::builtins::{self, Intrinsics};
use super::lexer::Span;
use super::runtime::EventLoop;
use super::value::*;

/// Execution limits applied per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub step_budget: u64,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            step_budget: 5_000_000,
            max_call_depth: 3_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    Type,
    Range,
    Reference,
    Syntax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Default,
    Number,
    String,
}

pub enum Flow {
    Normal,
    Return(Value),
    Break(Option<Name>),
    Continue(Option<Name>),
}

enum LoopStep {
    Next,
    Stop,
    Exit(Flow),
}

#[derive(Clone)]
struct Binding {
    name: Name,
    value: Value,
    mutable: bool,
    initialized: bool,
}

/// Function-level context: receiver, `super` home and class being built.
pub struct Frame {
    this: RefCell<Option<Value>>,
    home: Option<ObjRef>,
    new_target: Option<ObjRef>,
    class: Option<ObjRef>,
}

pub struct Scope {
    vars: RefCell<Vec<Binding>>,
    parent: Option<Rc<Scope>>,
    frame: Option<Rc<Frame>>,
}

enum Lookup {
    Found(Value),
    Uninitialized,
    Missing,
}

enum Assigned {
    Done,
    Uninitialized,
    Constant,
    Missing,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(Vec::new()),
            parent,
            frame: None,
        })
    }

    fn with_frame(parent: Rc<Scope>, frame: Frame) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(Vec::new()),
            parent: Some(parent),
            frame: Some(Rc::new(frame)),
        })
    }

    /// Creates or replaces a binding in this scope.
    pub fn declare(&self, name: Name, value: Value, mutable: bool, initialized: bool) {
        let mut vars = self.vars.borrow_mut();
        let binding = Binding {
            name,
            value,
            mutable,
            initialized,
        };
        match vars.iter_mut().find(|b| b.name == binding.name) {
            Some(slot) => *slot = binding,
            None => vars.push(binding),
        }
    }

    fn has_local(&self, name: &str) -> bool {
        self.vars.borrow().iter().any(|b| &*b.name == name)
    }

    fn lookup(&self, name: &str) -> Lookup {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(b) = scope.vars.borrow().iter().find(|b| &*b.name == name) {
                return if b.initialized {
                    Lookup::Found(b.value.clone())
                } else {
                    Lookup::Uninitialized
                };
            }
            current = scope.parent.as_deref();
        }
        Lookup::Missing
    }

    fn assign(&self, name: &str, value: Value) -> Assigned {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(b) = scope.vars.borrow_mut().iter_mut().find(|b| &*b.name == name) {
                if !b.initialized {
                    return Assigned::Uninitialized;
                }
                if !b.mutable {
                    return Assigned::Constant;
                }
                b.value = value;
                return Assigned::Done;
            }
            current = scope.parent.as_deref();
        }
        Assigned::Missing
    }

    fn frame(&self) -> Option<Rc<Frame>> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(frame) = &scope.frame {
                return Some(frame.clone());
            }
            current = scope.parent.as_deref();
        }
        None
    }

    /// Fresh copy of this scope's bindings, for per-iteration `let`.
    fn copy(&self) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(self.vars.borrow().clone()),
            parent: self.parent.clone(),
            frame: None,
        })
    }
}

#[derive(Clone, Copy)]
enum Bind {
    Param,
    Let,
    Const,
    Var,
    Assign,
}

enum Reference {
    Binding(Name),
    Property(Value, Rc<str>),
}

pub struct Interp {
    me: Weak<Interp>,
    pub(super) intrinsics: Intrinsics,
    pub(super) globals: Rc<Scope>,
    pub(super) event_loop: EventLoop,
    limits: Limits,
    fuel: Cell<u64>,
    depth: Cell<usize>,
    fatal: RefCell<Option<FatalError>>,
    span: Cell<Span>,
    console: RefCell<Vec<String>>,
    rng: Cell<u64>,
    epoch_ms: f64,
}

impl Interp {
    pub fn new(limits: Limits, epoch_ms: f64) -> Rc<Interp> {
        let globals = Scope::new(None);
        let intrinsics = builtins::install(&globals);
        Rc::new_cyclic(|me| Interp {
            me: me.clone(),
            intrinsics,
            globals,
            event_loop: EventLoop::new(),
            limits,
            fuel: Cell::new(limits.step_budget),
            depth: Cell::new(0),
            fatal: RefCell::new(None),
            span: Cell::new(Span::default()),
            console: RefCell::new(Vec::new()),
            rng: Cell::new(0x2545_f491_4f6c_dd1d),
            epoch_ms,
        })
    }

    pub(super) fn rc(&self) -> JsResult<Rc<Interp>> {
        self.me
            .upgrade()
            .ok_or_else(|| Abrupt::Throw(Value::from("realm is no longer available")))
    }

    // --- errors and budget ---

    /// Refuses arrays that would grow past `MAX_ARRAY_LENGTH`.
    pub fn check_array_length(&self, len: usize) -> JsResult<()> {
        if len > MAX_ARRAY_LENGTH {
            return Err(self.throw(ErrorKind::Range, "Invalid array length"));
        }
        Ok(())
    }

    /// Refuses strings that would grow past `MAX_STRING_LENGTH` bytes.
    pub fn check_string_length(&self, len: usize) -> JsResult<()> {
        if len > MAX_STRING_LENGTH {
            return Err(self.throw(ErrorKind::Range, "Invalid string length"));
        }
        Ok(())
    }

    pub fn throw(&self, kind: ErrorKind, message: impl Into<String>) -> Abrupt {
        let proto = match kind {
            ErrorKind::Error => &self.intrinsics.error_proto,
            ErrorKind::Type => &self.intrinsics.type_error_proto,
            ErrorKind::Range => &self.intrinsics.range_error_proto,
            ErrorKind::Reference => &self.intrinsics.reference_error_proto,
            ErrorKind::Syntax => &self.intrinsics.syntax_error_proto,
        };
        let message: String = message.into();
        Abrupt::Throw(Value::Object(self.make_error(proto.clone(), &message)))
    }

    pub fn type_error(&self, message: impl Into<String>) -> Abrupt {
        self.throw(ErrorKind::Type, message)
    }

    pub fn make_error(&self, proto: ObjRef, message: &str) -> ObjRef {
        let error = Obj::new(ObjKind::Error(self.span.get()), Some(proto));
        error.set_own(Rc::from("message"), Value::from(message));
        error
    }

    fn at(&self, span: Span) {
        self.span.set(span);
    }

    pub(super) fn step(&self) -> JsResult<()> {
        let fuel = self.fuel.get();
        if fuel == 0 {
            let error = FatalError::BudgetExhausted(self.limits.step_budget);
            self.set_fatal(error.clone());
            return Err(Abrupt::Fatal(error));
        }
        self.fuel.set(fuel - 1);
        Ok(())
    }

    pub(super) fn set_fatal(&self, error: FatalError) {
        self.fuel.set(0);
        self.fatal.borrow_mut().get_or_insert(error);
    }

    pub fn fatal(&self) -> Option<FatalError> {
        self.fatal.borrow().clone()
    }

    /// Refills the step budget for the next invocation.
    pub fn reset_budget(&self) {
        self.fuel.set(self.limits.step_budget);
        self.fatal.borrow_mut().take();
    }

    pub fn steps_used(&self) -> u64 {
        self.limits.step_budget - self.fuel.get()
    }

    pub(super) fn log_line(&self, line: String) {
        self.console.borrow_mut().push(line);
    }

    pub fn take_console(&self) -> Vec<String> {
        std::mem::take(&mut *self.console.borrow_mut())
    }

    /// Deterministic xorshift64* generator behind `Math.random`.
    pub(super) fn random(&self) -> f64 {
        let mut x = self.rng.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng.set(x);
        (x.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 11) as f64 / (1u64 << 53) as f64
    }

    pub(super) fn epoch_ms(&self) -> f64 {
        self.epoch_ms
    }

    // --- objects ---

    pub fn new_object(&self) -> ObjRef {
        Obj::new(ObjKind::Plain, Some(self.intrinsics.object_proto.clone()))
    }

    pub fn new_array(&self, items: Vec<Value>) -> Value {
        Value::Object(Obj::new(
            ObjKind::Array(RefCell::new(items)),
            Some(self.intrinsics.array_proto.clone()),
        ))
    }

    pub(super) fn native_function(
        &self,
        name: &str,
        f: impl Fn(&Interp, &Value, &[Value]) -> JsResult<Value> + 'static,
    ) -> Value {
        Value::Object(builtins::native(&self.intrinsics.function_proto, name, f))
    }

    pub fn prototype_from(&self, new_target: &ObjRef, fallback: &ObjRef) -> ObjRef {
        match new_target.get("prototype") {
            Some(Value::Object(proto)) => proto,
            _ => fallback.clone(),
        }
    }

    fn make_closure(&self, func: &Rc<Function>, scope: &Rc<Scope>, home: Option<ObjRef>) -> Value {
        let is_method = home.is_some();
        let obj = Obj::new(
            ObjKind::Function(Callable::Script(Closure {
                func: func.clone(),
                env: scope.clone(),
                home,
            })),
            Some(self.intrinsics.function_proto.clone()),
        );
        if !func.is_arrow && !func.is_async && !is_method {
            let proto = self.new_object();
            proto.set_own(Rc::from("constructor"), Value::Object(obj.clone()));
            obj.set_own(Rc::from("prototype"), Value::Object(proto));
        }
        Value::Object(obj)
    }

    // --- property access and conversions ---

    pub fn get_value(&self, base: &Value, key: &str) -> JsResult<Value> {
        match base {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                if matches!(base, Value::Null) { "null" } else { "undefined" },
                key
            ))),
            Value::Object(obj) => Ok(obj.get(key).unwrap_or_default()),
            Value::Str(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                if let Some(i) = array_index(key) {
                    return Ok(s
                        .chars()
                        .nth(i as usize)
                        .map(|c| Value::from(c.to_string()))
                        .unwrap_or_default());
                }
                Ok(self.intrinsics.string_proto.get(key).unwrap_or_default())
            }
            Value::Number(_) => Ok(self.intrinsics.number_proto.get(key).unwrap_or_default()),
            Value::Bool(_) => Ok(self.intrinsics.boolean_proto.get(key).unwrap_or_default()),
        }
    }

    pub fn set_value(&self, base: &Value, key: Rc<str>, value: Value) -> JsResult<()> {
        match base {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                if matches!(base, Value::Null) { "null" } else { "undefined" },
                key
            ))),
            Value::Object(obj) => {
                if obj.set_own(key, value) {
                    Ok(())
                } else {
                    Err(self.throw(ErrorKind::Range, "Invalid array length"))
                }
            }
            _ => Ok(()),
        }
    }

    pub fn to_key(&self, value: &Value) -> JsResult<Rc<str>> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            Value::Number(n) => Ok(Rc::from(number_to_string(*n).as_str())),
            other => self.to_string(other),
        }
    }

    pub fn to_primitive(&self, value: &Value, hint: Hint) -> JsResult<Value> {
        let Value::Object(obj) = value else {
            return Ok(value.clone());
        };
        let order = if hint == Hint::String {
            ["toString", "valueOf"]
        } else {
            ["valueOf", "toString"]
        };
        for name in order {
            if let Some(method) = obj.get(name) {
                if method.is_callable() {
                    let result = self.call(&method, value.clone(), &[])?;
                    if !matches!(result, Value::Object(_)) {
                        return Ok(result);
                    }
                }
            }
        }
        Err(self.type_error("Cannot convert object to primitive value"))
    }

    pub fn to_string(&self, value: &Value) -> JsResult<Rc<str>> {
        Ok(match value {
            Value::Undefined => Rc::from("undefined"),
            Value::Null => Rc::from("null"),
            Value::Bool(b) => Rc::from(if *b { "true" } else { "false" }),
            Value::Number(n) => Rc::from(number_to_string(*n).as_str()),
            Value::Str(s) => s.clone(),
            Value::Object(_) => {
                let primitive = self.to_primitive(value, Hint::String)?;
                return self.to_string(&primitive);
            }
        })
    }

    pub fn to_number(&self, value: &Value) -> JsResult<f64> {
        Ok(match value {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Object(_) => {
                let primitive = self.to_primitive(value, Hint::Number)?;
                return self.to_number(&primitive);
            }
        })
    }

    pub fn to_int32(&self, value: &Value) -> JsResult<i32> {
        Ok(to_uint32(self.to_number(value)?) as i32)
    }

    pub fn loose_equals(&self, a: &Value, b: &Value) -> JsResult<bool> {
        Ok(match (a, b) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
                self.to_number(a)? == self.to_number(b)?
            }
            (Value::Bool(_), _) => return self.loose_equals(&Value::Number(self.to_number(a)?), b),
            (_, Value::Bool(_)) => return self.loose_equals(a, &Value::Number(self.to_number(b)?)),
            (Value::Object(_), Value::Object(_)) => a.strict_equals(b),
            (Value::Object(_), _) => return self.loose_equals(&self.to_primitive(a, Hint::Default)?, b),
            (_, Value::Object(_)) => return self.loose_equals(a, &self.to_primitive(b, Hint::Default)?),
            _ => a.strict_equals(b),
        })
    }

    /// Values produced by `for...of`, spread and destructuring.
    pub fn iterate(&self, value: &Value) -> JsResult<Vec<Value>> {
        if let Value::Str(s) = value {
            return Ok(s.chars().map(|c| Value::from(c.to_string())).collect());
        }
        if let Value::Object(obj) = value {
            match &obj.kind {
                ObjKind::Array(items) => return Ok(items.borrow().clone()),
                ObjKind::Set(set) => return Ok(set.borrow().values()),
                ObjKind::Map(map) => {
                    let entries = map.borrow().values();
                    return Ok(entries.into_iter().map(|(k, v)| self.new_array(vec![k, v])).collect());
                }
                _ => {}
            }
        }
        let shown = match value {
            Value::Object(o) if o.is_callable() => "function".to_string(),
            Value::Object(_) => "object".to_string(),
            Value::Str(s) => format!("\"{}\"", s),
            other => format!("{:?}", other),
        };
        Err(self.type_error(format!("{} is not iterable", shown)))
    }

    /// Converts parsed JSON into sandbox values.
    pub fn from_json(&self, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => self.new_array(items.iter().map(|v| self.from_json(v)).collect()),
            serde_json::Value::Object(map) => {
                let obj = self.new_object();
                for (key, value) in map {
                    obj.set_own(Rc::from(key.as_str()), self.from_json(value));
                }
                Value::Object(obj)
            }
        }
    }

    /// Console-style rendering (`console.log`).
    pub fn inspect(&self, value: &Value) -> String {
        match value {
            Value::Str(s) => s.to_string(),
            other => self.inspect_nested(other, 0, &mut Vec::new()),
        }
    }

    fn inspect_nested(&self, value: &Value, depth: usize, seen: &mut Vec<*const Obj>) -> String {
        let obj = match value {
            Value::Str(s) => return format!("'{}'", s),
            Value::Object(obj) => obj,
            other => return format!("{:?}", other),
        };
        if seen.contains(&Rc::as_ptr(obj)) {
            return "[Circular]".into();
        }
        if depth > 2 {
            return if obj.is_array() { "[Array]".into() } else { "[Object]".into() };
        }
        seen.push(Rc::as_ptr(obj));
        let text = match &obj.kind {
            ObjKind::Function(c) => match c {
                Callable::Class(_) => format!("[class {}]", c.name()),
                _ => format!("[Function: {}]", c.name()),
            },
            ObjKind::Error(_) => self.describe_error(value),
            ObjKind::Promise(state) => match &*state.borrow() {
                PromiseState::Pending(_) => "Promise { <pending> }".into(),
                PromiseState::Fulfilled(v) => {
                    let v = v.clone();
                    format!("Promise {{ {} }}", self.inspect_nested(&v, depth + 1, seen))
                }
                PromiseState::Rejected(v) => {
                    let v = v.clone();
                    format!("Promise {{ <rejected> {} }}", self.inspect_nested(&v, depth + 1, seen))
                }
            },
            ObjKind::Array(items) => {
                let items = items.borrow().clone();
                let parts: Vec<String> = items.iter().map(|v| self.inspect_nested(v, depth + 1, seen)).collect();
                if parts.is_empty() {
                    "[]".into()
                } else {
                    format!("[ {} ]", parts.join(", "))
                }
            }
            ObjKind::Set(set) => {
                let values = set.borrow().values();
                let parts: Vec<String> = values.iter().map(|v| self.inspect_nested(v, depth + 1, seen)).collect();
                format!("Set({}) {{ {} }}", parts.len(), parts.join(", "))
            }
            ObjKind::Map(map) => {
                let entries = map.borrow().values();
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "{} => {}",
                            self.inspect_nested(k, depth + 1, seen),
                            self.inspect_nested(v, depth + 1, seen)
                        )
                    })
                    .collect();
                format!("Map({}) {{ {} }}", parts.len(), parts.join(", "))
            }
            ObjKind::Plain => {
                let keys = obj.own_keys();
                let parts: Vec<String> = keys
                    .iter()
                    .map(|k| {
                        let v = obj.get_own(k).unwrap_or_default();
                        format!("{}: {}", k, self.inspect_nested(&v, depth + 1, seen))
                    })
                    .collect();
                if parts.is_empty() {
                    "{}".into()
                } else {
                    format!("{{ {} }}", parts.join(", "))
                }
            }
        };
        seen.pop();
        text
    }

    /// Renders a thrown value: `TypeError: message (line:col)` for errors.
    pub fn describe_error(&self, value: &Value) -> String {
        if let Value::Object(obj) = value {
            if let ObjKind::Error(span) = &obj.kind {
                let name = obj.get("name").map(|v| self.display_plain(&v)).unwrap_or_else(|| "Error".into());
                let message = obj.get("message").map(|v| self.display_plain(&v)).unwrap_or_default();
                let head = if message.is_empty() {
                    name
                } else {
                    format!("{}: {}", name, message)
                };
                return if span.line > 0 {
                    format!("{} ({})", head, span)
                } else {
                    head
                };
            }
        }
        self.display_plain(value)
    }

    fn display_plain(&self, value: &Value) -> String {
        match self.to_string(value) {
            Ok(s) => s.to_string(),
            Err(_) => self.inspect(value),
        }
    }

    // --- calls ---

    fn enter(&self) -> JsResult<()> {
        if self.depth.get() >= self.limits.max_call_depth {
            return Err(self.throw(ErrorKind::Range, "Maximum call stack size exceeded"));
        }
        self.depth.set(self.depth.get() + 1);
        Ok(())
    }

    fn leave(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }

    pub fn call(&self, f: &Value, this: Value, args: &[Value]) -> JsResult<Value> {
        let Some(obj) = f.as_object().filter(|o| o.is_callable()) else {
            return Err(self.type_error(format!("{} is not a function", self.inspect(f))));
        };
        self.enter()?;
        let result = self.call_object(obj, this, args);
        self.leave();
        result
    }

    fn call_object(&self, obj: &ObjRef, this: Value, args: &[Value]) -> JsResult<Value> {
        match obj.callable() {
            Some(Callable::Native { call, .. }) => call(self, &this, args),
            Some(Callable::Bound {
                target,
                this: bound_this,
                args: bound_args,
            }) => {
                let mut all = bound_args.clone();
                all.extend_from_slice(args);
                self.call(&Value::Object(target.clone()), bound_this.clone(), &all)
            }
            Some(Callable::Class(data)) => Err(self.type_error(format!(
                "Class constructor {} cannot be invoked without 'new'",
                data.def.name.as_deref().unwrap_or("")
            ))),
            Some(Callable::Script(closure)) => self.call_closure(closure, this, args, None),
            None => Err(self.type_error("value is not a function")),
        }
    }

    fn call_closure(&self, closure: &Closure, this: Value, args: &[Value], new_target: Option<ObjRef>) -> JsResult<Value> {
        let func = closure.func.clone();
        let scope = if func.is_arrow {
            Scope::new(Some(closure.env.clone()))
        } else {
            Scope::with_frame(
                closure.env.clone(),
                Frame {
                    this: RefCell::new(Some(this)),
                    home: closure.home.clone(),
                    new_target,
                    class: None,
                },
            )
        };
        let args = args.to_vec();
        if func.is_async {
            let interp = self.rc()?;
            let promise = self.new_promise();
            let settle = promise.clone();
            let task = async move {
                let result = interp.run_function(&func, &scope, &args).await;
                interp.finish_task(&settle, result);
            };
            self.spawn(task.boxed_local());
            Ok(Value::Object(promise))
        } else {
            self.run_sync(self.run_function(&func, &scope, &args))
        }
    }

    pub(super) fn finish_task(&self, promise: &ObjRef, result: JsResult<Value>) {
        match result {
            Ok(value) => self.resolve_promise(promise, value),
            Err(Abrupt::Throw(error)) => self.settle(promise, Err(error)),
            Err(Abrupt::Fatal(error)) => self.set_fatal(error),
            Err(Abrupt::ShortCircuit) => self.resolve_promise(promise, Value::Undefined),
        }
    }

    fn run_sync<'a>(&self, mut fut: LocalBoxFuture<'a, JsResult<Value>>) -> JsResult<Value> {
        let mut cx = Context::from_waker(noop_waker_ref());
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => Err(self.throw(
                ErrorKind::Syntax,
                "await is only valid in async functions and the top level bodies of modules",
            )),
        }
    }

    pub fn construct(&self, f: &Value, args: &[Value], new_target: Option<&ObjRef>) -> JsResult<Value> {
        let Some(obj) = f.as_object().filter(|o| o.is_callable()) else {
            return Err(self.type_error(format!("{} is not a constructor", self.inspect(f))));
        };
        let new_target = new_target.cloned().unwrap_or_else(|| obj.clone());
        self.enter()?;
        let result = self.construct_object(obj, args, new_target);
        self.leave();
        result
    }

    fn construct_object(&self, obj: &ObjRef, args: &[Value], new_target: ObjRef) -> JsResult<Value> {
        match obj.callable() {
            Some(Callable::Native {
                construct: Some(construct),
                ..
            }) => construct(self, &new_target, args),
            Some(Callable::Bound {
                target,
                args: bound_args,
                ..
            }) => {
                let mut all = bound_args.clone();
                all.extend_from_slice(args);
                let new_target = if Rc::ptr_eq(&new_target, obj) { target.clone() } else { new_target };
                self.construct(&Value::Object(target.clone()), &all, Some(&new_target))
            }
            Some(Callable::Script(closure)) if !closure.func.is_arrow && !closure.func.is_async && closure.home.is_none() => {
                let proto = self.prototype_from(&new_target, &self.intrinsics.object_proto);
                let instance = Obj::new(ObjKind::Plain, Some(proto));
                let result = self.call_closure(closure, Value::Object(instance.clone()), args, Some(new_target))?;
                Ok(match result {
                    Value::Object(o) => Value::Object(o),
                    _ => Value::Object(instance),
                })
            }
            Some(Callable::Class(data)) => self.construct_class(obj, data, args, new_target),
            _ => Err(self.type_error(format!("{} is not a constructor", obj.callable().map(|c| c.name().to_string()).unwrap_or_default()))),
        }
    }

    fn construct_class(&self, class: &ObjRef, data: &ClassData, args: &[Value], new_target: ObjRef) -> JsResult<Value> {
        let this = match data.parent {
            Some(_) => None,
            None => {
                let proto = self.prototype_from(&new_target, &self.intrinsics.object_proto);
                let instance = Obj::new(ObjKind::Plain, Some(proto));
                self.init_fields(data, &instance)?;
                Some(Value::Object(instance))
            }
        };
        let frame = Frame {
            this: RefCell::new(this),
            home: Some(data.prototype.clone()),
            new_target: Some(new_target),
            class: Some(class.clone()),
        };
        let scope = Scope::with_frame(data.env.clone(), frame);
        let returned = match &data.def.constructor {
            Some(func) => self.run_sync(self.run_function(func, &scope, args))?,
            None => {
                if data.parent.is_some() {
                    self.super_call(&scope, args.to_vec())?;
                }
                Value::Undefined
            }
        };
        if let Value::Object(o) = returned {
            return Ok(Value::Object(o));
        }
        let this = scope.frame().and_then(|f| f.this.borrow().clone());
        this.ok_or_else(|| {
            self.throw(
                ErrorKind::Reference,
                "Must call super constructor in derived class before accessing 'this' or returning from derived constructor",
            )
        })
    }

    fn super_call(&self, scope: &Rc<Scope>, args: Vec<Value>) -> JsResult<Value> {
        let frame = scope
            .frame()
            .ok_or_else(|| self.throw(ErrorKind::Syntax, "'super' keyword unexpected here"))?;
        let class = frame
            .class
            .clone()
            .ok_or_else(|| self.throw(ErrorKind::Syntax, "'super' keyword unexpected here"))?;
        let Some(Callable::Class(data)) = class.callable() else {
            return Err(self.throw(ErrorKind::Syntax, "'super' keyword unexpected here"));
        };
        let parent = data
            .parent
            .clone()
            .ok_or_else(|| self.throw(ErrorKind::Syntax, "'super' keyword unexpected here"))?;
        if frame.this.borrow().is_some() {
            return Err(self.throw(ErrorKind::Reference, "Super constructor may only be called once"));
        }
        let new_target = frame.new_target.clone().unwrap_or_else(|| class.clone());
        let instance = self.construct(&Value::Object(parent), &args, Some(&new_target))?;
        *frame.this.borrow_mut() = Some(instance.clone());
        if let Value::Object(obj) = &instance {
            self.init_fields(data, obj)?;
        }
        Ok(Value::Undefined)
    }

    fn init_fields(&self, data: &ClassData, instance: &ObjRef) -> JsResult<()> {
        let fields: Vec<&Option<Expr>> = data
            .def
            .members
            .iter()
            .filter(|m| !m.is_static)
            .filter_map(|m| match &m.kind {
                ClassMemberKind::Field(init) => Some(init),
                ClassMemberKind::Method(_) => None,
            })
            .collect();
        if fields.is_empty() {
            return Ok(());
        }
        let scope = Scope::with_frame(
            data.env.clone(),
            Frame {
                this: RefCell::new(Some(Value::Object(instance.clone()))),
                home: Some(data.prototype.clone()),
                new_target: None,
                class: None,
            },
        );
        for (init, key) in fields.into_iter().zip(data.field_keys.iter()) {
            let value = match init {
                Some(expr) => self.run_sync(self.eval(expr, &scope))?,
                None => Value::Undefined,
            };
            instance.set_own(key.clone(), value);
        }
        Ok(())
    }

    /// Evaluates candidate source (a function body) as an async function and
    /// returns its promise.
    pub fn start_body(&self, body: Vec<Stmt>, span: Span) -> JsResult<Value> {
        let func = Rc::new(Function {
            name: None,
            params: Vec::new(),
            body: FunctionBody::Block(body),
            is_async: true,
            is_arrow: false,
            span,
        });
        let closure = self.make_closure(&func, &self.globals, None);
        self.call(&closure, Value::Undefined, &[])
    }

    /// Evaluates a standalone expression in the global scope.
    pub fn eval_standalone(&self, expr: &Expr) -> JsResult<Value> {
        let globals = self.globals.clone();
        self.run_sync(self.eval(expr, &globals))
    }

    // --- function bodies and hoisting ---

    fn run_function<'a>(&'a self, func: &'a Function, scope: &'a Rc<Scope>, args: &'a [Value]) -> LocalBoxFuture<'a, JsResult<Value>> {
        async move {
            if !func.is_arrow {
                scope.declare(Rc::from("arguments"), self.new_array(args.to_vec()), true, true);
            }
            for (i, param) in func.params.iter().enumerate() {
                let value = if param.rest {
                    self.new_array(args.get(i..).map(|rest| rest.to_vec()).unwrap_or_default())
                } else {
                    args.get(i).cloned().unwrap_or_default()
                };
                let value = match (&param.default, &value) {
                    (Some(default), Value::Undefined) => self.eval(default, scope).await?,
                    _ => value,
                };
                self.bind(&param.pattern, value, scope, Bind::Param).await?;
            }
            match &func.body {
                FunctionBody::Expr(expr) => self.eval(expr, scope).await,
                FunctionBody::Block(stmts) => {
                    let mut names = Vec::new();
                    collect_var_names(stmts, &mut names);
                    for name in names {
                        if !scope.has_local(&name) {
                            scope.declare(name, Value::Undefined, true, true);
                        }
                    }
                    self.hoist_lexical(stmts, scope);
                    match self.exec_list(stmts, scope).await? {
                        Flow::Return(value) => Ok(value),
                        _ => Ok(Value::Undefined),
                    }
                }
            }
        }
        .boxed_local()
    }

    fn hoist_lexical(&self, stmts: &[Stmt], scope: &Rc<Scope>) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Var(decl) if decl.kind != DeclKind::Var => {
                    let mut names = Vec::new();
                    for (pattern, _) in &decl.decls {
                        pattern.bound_names(&mut names);
                    }
                    for name in names {
                        scope.declare(name, Value::Undefined, decl.kind == DeclKind::Let, false);
                    }
                }
                StmtKind::Class(class) => {
                    if let Some(name) = &class.name {
                        scope.declare(name.clone(), Value::Undefined, true, false);
                    }
                }
                StmtKind::Function(func) => {
                    if let Some(name) = &func.name {
                        let closure = self.make_closure(func, scope, None);
                        scope.declare(name.clone(), closure, true, true);
                    }
                }
                _ => {}
            }
        }
    }

    // --- statements ---

    fn exec_list<'a>(&'a self, stmts: &'a [Stmt], scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Flow>> {
        async move {
            for stmt in stmts {
                match self.exec(stmt, scope, &[]).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        }
        .boxed_local()
    }

    fn exec_block<'a>(&'a self, stmts: &'a [Stmt], scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Flow>> {
        async move {
            let inner = Scope::new(Some(scope.clone()));
            self.hoist_lexical(stmts, &inner);
            self.exec_list(stmts, &inner).await
        }
        .boxed_local()
    }

    fn exec<'a>(&'a self, stmt: &'a Stmt, scope: &'a Rc<Scope>, labels: &'a [Name]) -> LocalBoxFuture<'a, JsResult<Flow>> {
        async move {
            self.step()?;
            match &stmt.kind {
                StmtKind::Expr(expr) => {
                    self.eval(expr, scope).await?;
                    Ok(Flow::Normal)
                }
                StmtKind::Var(decl) => {
                    self.exec_var(decl, scope).await?;
                    Ok(Flow::Normal)
                }
                StmtKind::Function(_) | StmtKind::Empty => Ok(Flow::Normal),
                StmtKind::Class(class) => {
                    let value = self.eval_class(class, scope).await?;
                    if let Some(name) = &class.name {
                        scope.declare(name.clone(), value, true, true);
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval(expr, scope).await?,
                        None => Value::Undefined,
                    };
                    Ok(Flow::Return(value))
                }
                StmtKind::If(test, consequent, alternate) => {
                    if self.eval(test, scope).await?.truthy() {
                        self.exec(consequent, scope, &[]).await
                    } else if let Some(alternate) = alternate {
                        self.exec(alternate, scope, &[]).await
                    } else {
                        Ok(Flow::Normal)
                    }
                }
                StmtKind::Block(stmts) => {
                    let flow = self.exec_block(stmts, scope).await?;
                    Ok(match flow {
                        Flow::Break(Some(label)) if labels.contains(&label) => Flow::Normal,
                        other => other,
                    })
                }
                StmtKind::For {
                    init,
                    test,
                    update,
                    body,
                } => self.exec_for(init.as_ref(), test.as_ref(), update.as_ref(), body, scope, labels).await,
                StmtKind::ForOf(head, iterable, body) => self.exec_for_each(head, iterable, body, scope, labels, true).await,
                StmtKind::ForIn(head, object, body) => self.exec_for_each(head, object, body, scope, labels, false).await,
                StmtKind::While(test, body) => {
                    while self.eval(test, scope).await?.truthy() {
                        match loop_step(self.exec(body, scope, &[]).await?, labels) {
                            LoopStep::Next => {}
                            LoopStep::Stop => break,
                            LoopStep::Exit(flow) => return Ok(flow),
                        }
                        self.step()?;
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::DoWhile(body, test) => {
                    loop {
                        match loop_step(self.exec(body, scope, &[]).await?, labels) {
                            LoopStep::Next => {}
                            LoopStep::Stop => break,
                            LoopStep::Exit(flow) => return Ok(flow),
                        }
                        if !self.eval(test, scope).await?.truthy() {
                            break;
                        }
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::Break(label) => Ok(Flow::Break(label.clone())),
                StmtKind::Continue(label) => Ok(Flow::Continue(label.clone())),
                StmtKind::Throw(expr) => {
                    let value = self.eval(expr, scope).await?;
                    Err(Abrupt::Throw(value))
                }
                StmtKind::Try {
                    block,
                    handler,
                    finalizer,
                } => self.exec_try(block, handler.as_ref(), finalizer.as_deref(), scope).await,
                StmtKind::Switch(discriminant, cases) => self.exec_switch(discriminant, cases, scope).await,
                StmtKind::Labeled(label, inner) => {
                    let mut all = labels.to_vec();
                    all.push(label.clone());
                    let flow = self.exec(inner, scope, &all).await?;
                    Ok(match flow {
                        Flow::Break(Some(l)) if &l == label => Flow::Normal,
                        other => other,
                    })
                }
            }
        }
        .boxed_local()
    }

    fn exec_var<'a>(&'a self, decl: &'a VarDecl, scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<()>> {
        async move {
            let mode = match decl.kind {
                DeclKind::Var => Bind::Var,
                DeclKind::Let => Bind::Let,
                DeclKind::Const => Bind::Const,
            };
            for (pattern, init) in &decl.decls {
                let value = match init {
                    Some(expr) => self.eval(expr, scope).await?,
                    // `var x;` keeps any hoisted value
                    None if decl.kind == DeclKind::Var => continue,
                    None => Value::Undefined,
                };
                let value = name_anonymous(value, pattern);
                self.bind(pattern, value, scope, mode).await?;
            }
            Ok(())
        }
        .boxed_local()
    }

    fn exec_for<'a>(
        &'a self,
        init: Option<&'a ForInit>,
        test: Option<&'a Expr>,
        update: Option<&'a Expr>,
        body: &'a Stmt,
        scope: &'a Rc<Scope>,
        labels: &'a [Name],
    ) -> LocalBoxFuture<'a, JsResult<Flow>> {
        async move {
            let loop_scope = Scope::new(Some(scope.clone()));
            let mut per_iteration = false;
            match init {
                Some(ForInit::Var(decl)) => {
                    per_iteration = decl.kind != DeclKind::Var;
                    if per_iteration {
                        let mut names = Vec::new();
                        for (pattern, _) in &decl.decls {
                            pattern.bound_names(&mut names);
                        }
                        for name in names {
                            loop_scope.declare(name, Value::Undefined, decl.kind == DeclKind::Let, false);
                        }
                    }
                    self.exec_var(decl, &loop_scope).await?;
                }
                Some(ForInit::Expr(expr)) => {
                    self.eval(expr, &loop_scope).await?;
                }
                None => {}
            }
            let mut iteration = if per_iteration { loop_scope.copy() } else { loop_scope };
            loop {
                self.step()?;
                if let Some(test) = test {
                    if !self.eval(test, &iteration).await?.truthy() {
                        break;
                    }
                }
                match loop_step(self.exec(body, &iteration, &[]).await?, labels) {
                    LoopStep::Next => {}
                    LoopStep::Stop => break,
                    LoopStep::Exit(flow) => return Ok(flow),
                }
                if per_iteration {
                    iteration = iteration.copy();
                }
                if let Some(update) = update {
                    self.eval(update, &iteration).await?;
                }
            }
            Ok(Flow::Normal)
        }
        .boxed_local()
    }

    fn exec_for_each<'a>(
        &'a self,
        head: &'a ForHead,
        source: &'a Expr,
        body: &'a Stmt,
        scope: &'a Rc<Scope>,
        labels: &'a [Name],
        is_of: bool,
    ) -> LocalBoxFuture<'a, JsResult<Flow>> {
        async move {
            let value = self.eval(source, scope).await?;
            // arrays are walked live so pushes during iteration are seen
            let live = match (&value, is_of) {
                (Value::Object(obj), true) if obj.is_array() => Some(obj.clone()),
                _ => None,
            };
            let snapshot = match (&live, is_of) {
                (Some(_), _) => Vec::new(),
                (None, true) => {
                    self.at(source.span);
                    self.iterate(&value)?
                }
                (None, false) => self.for_in_keys(&value),
            };
            let mut index = 0;
            loop {
                let item = match &live {
                    Some(obj) => match &obj.kind {
                        ObjKind::Array(items) => items.borrow().get(index).cloned(),
                        _ => None,
                    },
                    None => snapshot.get(index).cloned(),
                };
                let Some(item) = item else { break };
                index += 1;
                self.step()?;
                let iteration = Scope::new(Some(scope.clone()));
                match head {
                    ForHead::Decl(kind, pattern) => {
                        let mode = match kind {
                            DeclKind::Var => Bind::Var,
                            DeclKind::Let => Bind::Let,
                            DeclKind::Const => Bind::Const,
                        };
                        self.bind(pattern, item, &iteration, mode).await?;
                    }
                    ForHead::Target(pattern) => self.bind(pattern, item, &iteration, Bind::Assign).await?,
                }
                match loop_step(self.exec(body, &iteration, &[]).await?, labels) {
                    LoopStep::Next => {}
                    LoopStep::Stop => break,
                    LoopStep::Exit(flow) => return Ok(flow),
                }
            }
            Ok(Flow::Normal)
        }
        .boxed_local()
    }

    fn for_in_keys(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::Object(obj) => obj.own_keys().into_iter().map(Value::Str).collect(),
            Value::Str(s) => (0..s.chars().count()).map(|i| Value::from(i.to_string())).collect(),
            _ => Vec::new(),
        }
    }

    fn exec_try<'a>(
        &'a self,
        block: &'a [Stmt],
        handler: Option<&'a CatchClause>,
        finalizer: Option<&'a [Stmt]>,
        scope: &'a Rc<Scope>,
    ) -> LocalBoxFuture<'a, JsResult<Flow>> {
        async move {
            let mut result = self.exec_block(block, scope).await;
            if let (Err(Abrupt::Throw(error)), Some(handler)) = (&result, handler) {
                let error = error.clone();
                let catch_scope = Scope::new(Some(scope.clone()));
                result = match &handler.param {
                    Some(param) => match self.bind(param, error, &catch_scope, Bind::Let).await {
                        Ok(()) => self.exec_block(&handler.body, &catch_scope).await,
                        Err(e) => Err(e),
                    },
                    None => self.exec_block(&handler.body, &catch_scope).await,
                };
            }
            if let Some(finalizer) = finalizer {
                if matches!(result, Err(Abrupt::Fatal(_))) {
                    return result;
                }
                match self.exec_block(finalizer, scope).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            result
        }
        .boxed_local()
    }

    fn exec_switch<'a>(&'a self, discriminant: &'a Expr, cases: &'a [SwitchCase], scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Flow>> {
        async move {
            let value = self.eval(discriminant, scope).await?;
            let inner = Scope::new(Some(scope.clone()));
            for case in cases {
                self.hoist_lexical(&case.body, &inner);
            }
            let mut start = None;
            for (i, case) in cases.iter().enumerate() {
                if let Some(test) = &case.test {
                    if self.eval(test, &inner).await?.strict_equals(&value) {
                        start = Some(i);
                        break;
                    }
                }
            }
            let start = start.or_else(|| cases.iter().position(|c| c.test.is_none()));
            let Some(start) = start else {
                return Ok(Flow::Normal);
            };
            for case in &cases[start..] {
                match self.exec_list(&case.body, &inner).await? {
                    Flow::Normal => {}
                    Flow::Break(None) => return Ok(Flow::Normal),
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        }
        .boxed_local()
    }

    // --- patterns ---

    fn bind<'a>(&'a self, pattern: &'a Pattern, value: Value, scope: &'a Rc<Scope>, mode: Bind) -> LocalBoxFuture<'a, JsResult<()>> {
        async move {
            match pattern {
                Pattern::Ident(name, span) => {
                    self.at(*span);
                    self.bind_name(name, value, scope, mode)
                }
                Pattern::Member(expr) => {
                    let reference = self.reference(expr, scope).await?;
                    self.put(&reference, value, scope)
                }
                Pattern::Array { items, rest } => {
                    let values = self.iterate(&value)?;
                    let mut values = values.into_iter();
                    for item in items {
                        let next = values.next().unwrap_or_default();
                        if let Some(item) = item {
                            let next = match (&item.default, &next) {
                                (Some(default), Value::Undefined) => self.eval(default, scope).await?,
                                _ => next,
                            };
                            self.bind(&item.target, next, scope, mode).await?;
                        }
                    }
                    if let Some(rest) = rest {
                        let remaining = self.new_array(values.collect());
                        self.bind(rest, remaining, scope, mode).await?;
                    }
                    Ok(())
                }
                Pattern::Object { props, rest } => {
                    if value.is_nullish() {
                        return Err(self.type_error(format!(
                            "Cannot destructure '{:?}' as it is {:?}.",
                            value, value
                        )));
                    }
                    let mut used = Vec::new();
                    for prop in props {
                        let key = self.prop_key(&prop.key, scope).await?;
                        let found = self.get_value(&value, &key)?;
                        used.push(key);
                        let found = match (&prop.default, &found) {
                            (Some(default), Value::Undefined) => self.eval(default, scope).await?,
                            _ => found,
                        };
                        self.bind(&prop.target, found, scope, mode).await?;
                    }
                    if let Some(rest) = rest {
                        let remaining = self.new_object();
                        if let Value::Object(source) = &value {
                            for key in source.own_keys() {
                                if !used.contains(&key) {
                                    remaining.set_own(key.clone(), source.get_own(&key).unwrap_or_default());
                                }
                            }
                        }
                        self.bind(rest, Value::Object(remaining), scope, mode).await?;
                    }
                    Ok(())
                }
            }
        }
        .boxed_local()
    }

    fn bind_name(&self, name: &Name, value: Value, scope: &Rc<Scope>, mode: Bind) -> JsResult<()> {
        match mode {
            Bind::Param | Bind::Let => {
                scope.declare(name.clone(), value, true, true);
                Ok(())
            }
            Bind::Const => {
                scope.declare(name.clone(), value, false, true);
                Ok(())
            }
            Bind::Var => {
                if let Assigned::Missing = scope.assign(name, value.clone()) {
                    scope.declare(name.clone(), value, true, true);
                }
                Ok(())
            }
            Bind::Assign => self.assign_name(name, value, scope),
        }
    }

    fn assign_name(&self, name: &str, value: Value, scope: &Rc<Scope>) -> JsResult<()> {
        match scope.assign(name, value) {
            Assigned::Done => Ok(()),
            Assigned::Uninitialized => Err(self.throw(
                ErrorKind::Reference,
                format!("Cannot access '{}' before initialization", name),
            )),
            Assigned::Constant => Err(self.type_error("Assignment to constant variable.")),
            Assigned::Missing => Err(self.throw(ErrorKind::Reference, format!("{} is not defined", name))),
        }
    }

    fn lookup_name(&self, name: &str, scope: &Rc<Scope>) -> JsResult<Value> {
        match scope.lookup(name) {
            Lookup::Found(value) => Ok(value),
            Lookup::Uninitialized => Err(self.throw(
                ErrorKind::Reference,
                format!("Cannot access '{}' before initialization", name),
            )),
            Lookup::Missing => Err(self.throw(ErrorKind::Reference, format!("{} is not defined", name))),
        }
    }

    fn prop_key<'a>(&'a self, key: &'a PropKey, scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Rc<str>>> {
        async move {
            match key {
                PropKey::Name(name) => Ok(name.clone()),
                PropKey::Computed(expr) => {
                    let value = self.eval(expr, scope).await?;
                    self.to_key(&value)
                }
            }
        }
        .boxed_local()
    }

    fn member_key<'a>(&'a self, prop: &'a MemberProp, scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Rc<str>>> {
        async move {
            match prop {
                MemberProp::Name(name) => Ok(name.clone()),
                MemberProp::Computed(expr) => {
                    let value = self.eval(expr, scope).await?;
                    self.to_key(&value)
                }
            }
        }
        .boxed_local()
    }

    fn current_this(&self, scope: &Rc<Scope>) -> JsResult<Value> {
        match scope.frame() {
            None => Ok(Value::Undefined),
            Some(frame) => frame.this.borrow().clone().ok_or_else(|| {
                self.throw(
                    ErrorKind::Reference,
                    "Must call super constructor in derived class before accessing 'this' or returning from derived constructor",
                )
            }),
        }
    }

    fn super_base(&self, scope: &Rc<Scope>) -> JsResult<Value> {
        let home = scope
            .frame()
            .and_then(|f| f.home.clone())
            .ok_or_else(|| self.throw(ErrorKind::Syntax, "'super' keyword unexpected here"))?;
        Ok(home.proto().map(Value::Object).unwrap_or(Value::Null))
    }

    fn reference<'a>(&'a self, expr: &'a Expr, scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Reference>> {
        async move {
            match &expr.kind {
                ExprKind::Ident(name) => Ok(Reference::Binding(name.clone())),
                ExprKind::Member { object, prop, .. } => {
                    let base = self.eval(object, scope).await?;
                    let key = self.member_key(prop, scope).await?;
                    Ok(Reference::Property(base, key))
                }
                ExprKind::SuperMember(prop) => {
                    let key = self.member_key(prop, scope).await?;
                    Ok(Reference::Property(self.current_this(scope)?, key))
                }
                _ => Err(self.throw(ErrorKind::Syntax, "Invalid left-hand side in assignment")),
            }
        }
        .boxed_local()
    }

    fn read(&self, reference: &Reference, scope: &Rc<Scope>) -> JsResult<Value> {
        match reference {
            Reference::Binding(name) => self.lookup_name(name, scope),
            Reference::Property(base, key) => self.get_value(base, key),
        }
    }

    fn put(&self, reference: &Reference, value: Value, scope: &Rc<Scope>) -> JsResult<()> {
        match reference {
            Reference::Binding(name) => self.assign_name(name, value, scope),
            Reference::Property(base, key) => self.set_value(base, key.clone(), value),
        }
    }

    // --- expressions ---

    pub(super) fn eval<'a>(&'a self, expr: &'a Expr, scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Value>> {
        async move {
            self.step()?;
            match &expr.kind {
                ExprKind::Number(n) => Ok(Value::Number(*n)),
                ExprKind::Str(s) => Ok(Value::Str(s.clone())),
                ExprKind::Bool(b) => Ok(Value::Bool(*b)),
                ExprKind::Null => Ok(Value::Null),
                ExprKind::Template { quasis, exprs } => {
                    let mut out = String::new();
                    for (i, quasi) in quasis.iter().enumerate() {
                        out.push_str(quasi);
                        if let Some(e) = exprs.get(i) {
                            let value = self.eval(e, scope).await?;
                            let text = self.to_string(&value)?;
                            self.check_string_length(out.len() + text.len())?;
                            out.push_str(&text);
                        }
                    }
                    Ok(Value::from(out))
                }
                ExprKind::Ident(name) => {
                    self.at(expr.span);
                    self.lookup_name(name, scope)
                }
                ExprKind::This => {
                    self.at(expr.span);
                    self.current_this(scope)
                }
                ExprKind::Array(items) => {
                    let values = self.eval_items(items, scope).await?;
                    Ok(self.new_array(values))
                }
                ExprKind::Object(props) => self.eval_object(props, scope).await,
                ExprKind::Function(func) => match &func.name {
                    // a named function expression sees its own name
                    Some(name) if !func.is_arrow => {
                        let own = Scope::new(Some(scope.clone()));
                        let closure = self.make_closure(func, &own, None);
                        own.declare(name.clone(), closure.clone(), false, true);
                        Ok(closure)
                    }
                    _ => Ok(self.make_closure(func, scope, None)),
                },
                ExprKind::Class(class) => self.eval_class(class, scope).await,
                ExprKind::Unary(op, operand) => self.eval_unary(*op, operand, scope).await,
                ExprKind::Update {
                    increment,
                    prefix,
                    target,
                } => {
                    let reference = self.reference(target, scope).await?;
                    self.at(expr.span);
                    let old = self.to_number(&self.read(&reference, scope)?)?;
                    let new = if *increment { old + 1.0 } else { old - 1.0 };
                    self.put(&reference, Value::Number(new), scope)?;
                    Ok(Value::Number(if *prefix { new } else { old }))
                }
                ExprKind::Binary(op, left, right) => {
                    let l = self.eval(left, scope).await?;
                    let r = self.eval(right, scope).await?;
                    self.at(expr.span);
                    self.binary(*op, &l, &r)
                }
                ExprKind::Logical(op, left, right) => {
                    let l = self.eval(left, scope).await?;
                    let short = match op {
                        LogicalOp::And => !l.truthy(),
                        LogicalOp::Or => l.truthy(),
                        LogicalOp::Nullish => !l.is_nullish(),
                    };
                    if short {
                        Ok(l)
                    } else {
                        self.eval(right, scope).await
                    }
                }
                ExprKind::Assign { op, target, value } => self.eval_assign(*op, target, value, scope, expr.span).await,
                ExprKind::Conditional(test, consequent, alternate) => {
                    if self.eval(test, scope).await?.truthy() {
                        self.eval(consequent, scope).await
                    } else {
                        self.eval(alternate, scope).await
                    }
                }
                ExprKind::Call { callee, args, optional } => self.eval_call(callee, args, *optional, scope, expr.span).await,
                ExprKind::New { callee, args } => {
                    let constructor = self.eval(callee, scope).await?;
                    let args = self.eval_items(args, scope).await?;
                    self.at(expr.span);
                    if !constructor.is_callable() {
                        return Err(self.type_error(format!("{} is not a constructor", expr_text(callee))));
                    }
                    self.construct(&constructor, &args, None)
                }
                ExprKind::Member { object, prop, optional } => {
                    let base = self.eval(object, scope).await?;
                    if *optional && base.is_nullish() {
                        return Err(Abrupt::ShortCircuit);
                    }
                    let key = self.member_key(prop, scope).await?;
                    self.at(expr.span);
                    self.get_value(&base, &key)
                }
                ExprKind::OptionalChain(inner) => match self.eval(inner, scope).await {
                    Err(Abrupt::ShortCircuit) => Ok(Value::Undefined),
                    other => other,
                },
                ExprKind::SuperCall(args) => {
                    let args = self.eval_items(args, scope).await?;
                    self.at(expr.span);
                    self.super_call(scope, args)
                }
                ExprKind::SuperMember(prop) => {
                    let key = self.member_key(prop, scope).await?;
                    let base = self.super_base(scope)?;
                    self.get_value(&base, &key)
                }
                ExprKind::Sequence(items) => {
                    let mut last = Value::Undefined;
                    for item in items {
                        last = self.eval(item, scope).await?;
                    }
                    Ok(last)
                }
                ExprKind::Await(operand) => {
                    let value = self.eval(operand, scope).await?;
                    self.await_value(value).await
                }
            }
        }
        .boxed_local()
    }

    fn eval_items<'a>(&'a self, items: &'a [ArrayItem], scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Vec<Value>>> {
        async move {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    ArrayItem::Item(expr) => values.push(self.eval(expr, scope).await?),
                    ArrayItem::Spread(expr) => {
                        let spread = self.eval(expr, scope).await?;
                        self.at(expr.span);
                        let spread = self.iterate(&spread)?;
                        self.check_array_length(values.len() + spread.len())?;
                        values.extend(spread);
                    }
                    ArrayItem::Hole => values.push(Value::Undefined),
                }
            }
            Ok(values)
        }
        .boxed_local()
    }

    fn eval_object<'a>(&'a self, props: &'a [PropDef], scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Value>> {
        async move {
            let obj = self.new_object();
            for prop in props {
                match prop {
                    PropDef::KeyValue(key, value) => {
                        let key = self.prop_key(key, scope).await?;
                        let value = self.eval(value, scope).await?;
                        obj.set_own(key, value);
                    }
                    PropDef::Shorthand(name, span) => {
                        self.at(*span);
                        obj.set_own(name.clone(), self.lookup_name(name, scope)?);
                    }
                    PropDef::Spread(expr) => {
                        let source = self.eval(expr, scope).await?;
                        self.copy_properties(&obj, &source);
                    }
                    PropDef::Method(key, func) => {
                        let key = self.prop_key(key, scope).await?;
                        let method = self.make_closure(func, scope, Some(obj.clone()));
                        obj.set_own(key, method);
                    }
                }
            }
            Ok(Value::Object(obj))
        }
        .boxed_local()
    }

    pub(super) fn copy_properties(&self, target: &ObjRef, source: &Value) {
        match source {
            Value::Object(src) => {
                for key in src.own_keys() {
                    let value = src.get_own(&key).unwrap_or_default();
                    target.set_own(key, value);
                }
            }
            Value::Str(s) => {
                for (i, c) in s.chars().enumerate() {
                    target.set_own(Rc::from(i.to_string().as_str()), Value::from(c.to_string()));
                }
            }
            _ => {}
        }
    }

    fn eval_class<'a>(&'a self, class: &'a Rc<Class>, scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Value>> {
        async move {
            let parent = match &class.superclass {
                Some(expr) => {
                    let value = self.eval(expr, scope).await?;
                    match value {
                        Value::Object(obj) if obj.is_callable() => Some(obj),
                        Value::Null => None,
                        other => {
                            self.at(expr.span);
                            return Err(self.type_error(format!(
                                "Class extends value {} is not a constructor or null",
                                self.inspect(&other)
                            )));
                        }
                    }
                }
                None => None,
            };
            let proto_parent = match &parent {
                Some(p) => match p.get("prototype") {
                    Some(Value::Object(proto)) => Some(proto),
                    Some(Value::Null) => None,
                    _ => return Err(self.type_error("Class extends value does not have valid prototype property")),
                },
                None if class.superclass.is_some() => None,
                None => Some(self.intrinsics.object_proto.clone()),
            };
            let prototype = Obj::new(ObjKind::Plain, proto_parent);
            let class_scope = Scope::new(Some(scope.clone()));
            if let Some(name) = &class.name {
                class_scope.declare(name.clone(), Value::Undefined, false, false);
            }

            let mut field_keys = Vec::new();
            for member in &class.members {
                if let (false, ClassMemberKind::Field(_)) = (member.is_static, &member.kind) {
                    field_keys.push(self.prop_key(&member.key, &class_scope).await?);
                }
            }

            let class_obj = Obj::new(
                ObjKind::Function(Callable::Class(ClassData {
                    def: class.clone(),
                    env: class_scope.clone(),
                    parent: parent.clone(),
                    prototype: prototype.clone(),
                    field_keys,
                })),
                Some(parent.clone().unwrap_or_else(|| self.intrinsics.function_proto.clone())),
            );
            class_obj.set_own(Rc::from("prototype"), Value::Object(prototype.clone()));
            prototype.set_own(Rc::from("constructor"), Value::Object(class_obj.clone()));

            for member in &class.members {
                if let ClassMemberKind::Method(func) = &member.kind {
                    let key = self.prop_key(&member.key, &class_scope).await?;
                    let target = if member.is_static { &class_obj } else { &prototype };
                    let method = self.make_closure(func, &class_scope, Some(target.clone()));
                    target.set_own(key, method);
                }
            }
            if let Some(name) = &class.name {
                class_scope.declare(name.clone(), Value::Object(class_obj.clone()), false, true);
            }

            let static_scope = Scope::with_frame(
                class_scope.clone(),
                Frame {
                    this: RefCell::new(Some(Value::Object(class_obj.clone()))),
                    home: Some(class_obj.clone()),
                    new_target: None,
                    class: None,
                },
            );
            for member in &class.members {
                if let (true, ClassMemberKind::Field(init)) = (member.is_static, &member.kind) {
                    let key = self.prop_key(&member.key, &static_scope).await?;
                    let value = match init {
                        Some(expr) => self.eval(expr, &static_scope).await?,
                        None => Value::Undefined,
                    };
                    class_obj.set_own(key, value);
                }
            }
            Ok(Value::Object(class_obj))
        }
        .boxed_local()
    }

    fn eval_unary<'a>(&'a self, op: UnaryOp, operand: &'a Expr, scope: &'a Rc<Scope>) -> LocalBoxFuture<'a, JsResult<Value>> {
        async move {
            match op {
                UnaryOp::TypeOf => {
                    if let ExprKind::Ident(name) = &operand.kind {
                        if let Lookup::Missing = scope.lookup(name) {
                            return Ok(Value::from("undefined"));
                        }
                    }
                    let value = self.eval(operand, scope).await?;
                    Ok(Value::from(value.type_of()))
                }
                UnaryOp::Delete => {
                    if let ExprKind::Member { object, prop, .. } = &operand.kind {
                        let base = self.eval(object, scope).await?;
                        let key = self.member_key(prop, scope).await?;
                        if let Value::Object(obj) = base {
                            obj.delete_own(&key);
                        }
                    }
                    Ok(Value::Bool(true))
                }
                _ => {
                    let value = self.eval(operand, scope).await?;
                    self.at(operand.span);
                    Ok(match op {
                        UnaryOp::Not => Value::Bool(!value.truthy()),
                        UnaryOp::Neg => Value::Number(-self.to_number(&value)?),
                        UnaryOp::Plus => Value::Number(self.to_number(&value)?),
                        UnaryOp::BitNot => Value::Number(!self.to_int32(&value)? as f64),
                        _ => Value::Undefined,
                    })
                }
            }
        }
        .boxed_local()
    }

    pub fn binary(&self, op: BinOp, l: &Value, r: &Value) -> JsResult<Value> {
        let num = |v: &Value| self.to_number(v);
        Ok(match op {
            BinOp::Add => {
                let lp = self.to_primitive(l, Hint::Default)?;
                let rp = self.to_primitive(r, Hint::Default)?;
                if matches!(lp, Value::Str(_)) || matches!(rp, Value::Str(_)) {
                    let (ls, rs) = (self.to_string(&lp)?, self.to_string(&rp)?);
                    self.check_string_length(ls.len() + rs.len())?;
                    let mut s = String::with_capacity(ls.len() + rs.len());
                    s.push_str(&ls);
                    s.push_str(&rs);
                    Value::from(s)
                } else {
                    Value::Number(self.to_number(&lp)? + self.to_number(&rp)?)
                }
            }
            BinOp::Sub => Value::Number(num(l)? - num(r)?),
            BinOp::Mul => Value::Number(num(l)? * num(r)?),
            BinOp::Div => Value::Number(num(l)? / num(r)?),
            BinOp::Rem => Value::Number(num(l)? % num(r)?),
            BinOp::Exp => Value::Number(js_pow(num(l)?, num(r)?)),
            BinOp::Eq => Value::Bool(self.loose_equals(l, r)?),
            BinOp::NotEq => Value::Bool(!self.loose_equals(l, r)?),
            BinOp::StrictEq => Value::Bool(l.strict_equals(r)),
            BinOp::StrictNotEq => Value::Bool(!l.strict_equals(r)),
            BinOp::Lt => Value::Bool(self.compare(l, r)? == Some(Ordering::Less)),
            BinOp::Gt => Value::Bool(self.compare(l, r)? == Some(Ordering::Greater)),
            BinOp::LtEq => Value::Bool(matches!(self.compare(l, r)?, Some(Ordering::Less | Ordering::Equal))),
            BinOp::GtEq => Value::Bool(matches!(self.compare(l, r)?, Some(Ordering::Greater | Ordering::Equal))),
            BinOp::Shl => Value::Number(self.to_int32(l)?.wrapping_shl(to_uint32(num(r)?) & 31) as f64),
            BinOp::Shr => Value::Number((self.to_int32(l)? >> (to_uint32(num(r)?) & 31)) as f64),
            BinOp::UShr => Value::Number((to_uint32(num(l)?) >> (to_uint32(num(r)?) & 31)) as f64),
            BinOp::BitAnd => Value::Number((self.to_int32(l)? & self.to_int32(r)?) as f64),
            BinOp::BitOr => Value::Number((self.to_int32(l)? | self.to_int32(r)?) as f64),
            BinOp::BitXor => Value::Number((self.to_int32(l)? ^ self.to_int32(r)?) as f64),
            BinOp::In => {
                let Value::Object(obj) = r else {
                    return Err(self.type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        self.to_string(l)?,
                        self.inspect(r)
                    )));
                };
                Value::Bool(obj.has(&self.to_key(l)?))
            }
            BinOp::InstanceOf => Value::Bool(self.instance_of(l, r)?),
        })
    }

    fn compare(&self, l: &Value, r: &Value) -> JsResult<Option<Ordering>> {
        let lp = self.to_primitive(l, Hint::Number)?;
        let rp = self.to_primitive(r, Hint::Number)?;
        if let (Value::Str(a), Value::Str(b)) = (&lp, &rp) {
            return Ok(Some(a.cmp(b)));
        }
        let a = self.to_number(&lp)?;
        let b = self.to_number(&rp)?;
        Ok(a.partial_cmp(&b))
    }

    pub fn instance_of(&self, value: &Value, class: &Value) -> JsResult<bool> {
        let Some(class_obj) = class.as_object().filter(|o| o.is_callable()) else {
            return Err(self.type_error("Right-hand side of 'instanceof' is not callable"));
        };
        if let Some(Callable::Bound { target, .. }) = class_obj.callable() {
            return self.instance_of(value, &Value::Object(target.clone()));
        }
        let Value::Object(obj) = value else {
            return Ok(false);
        };
        let Some(Value::Object(proto)) = class_obj.get("prototype") else {
            return Ok(false);
        };
        let mut current = obj.proto();
        while let Some(p) = current {
            if Rc::ptr_eq(&p, &proto) {
                return Ok(true);
            }
            current = p.proto();
        }
        Ok(false)
    }

    fn eval_assign<'a>(
        &'a self,
        op: Option<AssignOp>,
        target: &'a Pattern,
        value: &'a Expr,
        scope: &'a Rc<Scope>,
        span: Span,
    ) -> LocalBoxFuture<'a, JsResult<Value>> {
        async move {
            let reference = match target {
                Pattern::Ident(name, _) => Some(Reference::Binding(name.clone())),
                Pattern::Member(expr) => Some(self.reference(expr, scope).await?),
                _ => None,
            };
            let Some(reference) = reference else {
                // destructuring assignment
                let v = self.eval(value, scope).await?;
                self.at(span);
                self.bind(target, v.clone(), scope, Bind::Assign).await?;
                return Ok(v);
            };
            let result = match op {
                None => {
                    let v = self.eval(value, scope).await?;
                    name_anonymous(v, target)
                }
                Some(AssignOp::Arith(bin)) => {
                    self.at(span);
                    let old = self.read(&reference, scope)?;
                    let rhs = self.eval(value, scope).await?;
                    self.at(span);
                    self.binary(bin, &old, &rhs)?
                }
                Some(AssignOp::Logical(logical)) => {
                    self.at(span);
                    let old = self.read(&reference, scope)?;
                    let keep = match logical {
                        LogicalOp::And => !old.truthy(),
                        LogicalOp::Or => old.truthy(),
                        LogicalOp::Nullish => !old.is_nullish(),
                    };
                    if keep {
                        return Ok(old);
                    }
                    self.eval(value, scope).await?
                }
            };
            self.at(span);
            self.put(&reference, result.clone(), scope)?;
            Ok(result)
        }
        .boxed_local()
    }

    fn eval_call<'a>(
        &'a self,
        callee: &'a Expr,
        args: &'a [ArrayItem],
        optional: bool,
        scope: &'a Rc<Scope>,
        span: Span,
    ) -> LocalBoxFuture<'a, JsResult<Value>> {
        async move {
            let (function, this) = match &callee.kind {
                ExprKind::Member {
                    object,
                    prop,
                    optional: member_optional,
                } => {
                    let base = self.eval(object, scope).await?;
                    if *member_optional && base.is_nullish() {
                        return Err(Abrupt::ShortCircuit);
                    }
                    let key = self.member_key(prop, scope).await?;
                    self.at(callee.span);
                    (self.get_value(&base, &key)?, base)
                }
                ExprKind::SuperMember(prop) => {
                    let key = self.member_key(prop, scope).await?;
                    let base = self.super_base(scope)?;
                    (self.get_value(&base, &key)?, self.current_this(scope)?)
                }
                _ => (self.eval(callee, scope).await?, Value::Undefined),
            };
            if optional && function.is_nullish() {
                return Err(Abrupt::ShortCircuit);
            }
            let args = self.eval_items(args, scope).await?;
            self.at(span);
            if !function.is_callable() {
                return Err(self.type_error(format!("{} is not a function", expr_text(callee))));
            }
            self.call(&function, this, &args)
        }
        .boxed_local()
    }
}

/// Gives `const f = () => {}` its name.
fn name_anonymous(value: Value, target: &Pattern) -> Value {
    if let (Value::Object(obj), Pattern::Ident(name, _)) = (&value, target) {
        let anonymous = match obj.callable() {
            Some(Callable::Script(c)) => c.func.name.is_none(),
            Some(Callable::Class(c)) => c.def.name.is_none(),
            _ => false,
        };
        if anonymous && !obj.props.borrow().contains("name") {
            obj.set_own(Rc::from("name"), Value::Str(name.clone()));
        }
    }
    value
}

fn loop_step(flow: Flow, labels: &[Name]) -> LoopStep {
    match flow {
        Flow::Normal => LoopStep::Next,
        Flow::Break(None) => LoopStep::Stop,
        Flow::Break(Some(label)) if labels.contains(&label) => LoopStep::Stop,
        Flow::Continue(None) => LoopStep::Next,
        Flow::Continue(Some(label)) if labels.contains(&label) => LoopStep::Next,
        other => LoopStep::Exit(other),
    }
}

fn collect_var_names(stmts: &[Stmt], out: &mut Vec<Name>) {
    for stmt in stmts {
        var_names(stmt, out);
    }
}

fn var_names(stmt: &Stmt, out: &mut Vec<Name>) {
    match &stmt.kind {
        StmtKind::Var(decl) if decl.kind == DeclKind::Var => {
            for (pattern, _) in &decl.decls {
                pattern.bound_names(out);
            }
        }
        StmtKind::If(_, consequent, alternate) => {
            var_names(consequent, out);
            if let Some(alternate) = alternate {
                var_names(alternate, out);
            }
        }
        StmtKind::Block(stmts) => collect_var_names(stmts, out),
        StmtKind::For { init, body, .. } => {
            if let Some(ForInit::Var(decl)) = init {
                if decl.kind == DeclKind::Var {
                    for (pattern, _) in &decl.decls {
                        pattern.bound_names(out);
                    }
                }
            }
            var_names(body, out);
        }
        StmtKind::ForOf(head, _, body) | StmtKind::ForIn(head, _, body) => {
            if let ForHead::Decl(DeclKind::Var, pattern) = head {
                pattern.bound_names(out);
            }
            var_names(body, out);
        }
        StmtKind::While(_, body) | StmtKind::DoWhile(body, _) | StmtKind::Labeled(_, body) => var_names(body, out),
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            collect_var_names(block, out);
            if let Some(handler) = handler {
                collect_var_names(&handler.body, out);
            }
            if let Some(finalizer) = finalizer {
                collect_var_names(finalizer, out);
            }
        }
        StmtKind::Switch(_, cases) => {
            for case in cases {
                collect_var_names(&case.body, out);
            }
        }
        _ => {}
    }
}

/// Short source-like rendering of a callee for error messages.
fn expr_text(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Ident(name) => name.to_string(),
        ExprKind::This => "this".into(),
        ExprKind::Member {
            object,
            prop: MemberProp::Name(name),
            ..
        } => format!("{}.{}", expr_text(object), name),
        ExprKind::Member { object, .. } => format!("{}[...]", expr_text(object)),
        ExprKind::SuperMember(MemberProp::Name(name)) => format!("super.{}", name),
        ExprKind::Call { callee, .. } => format!("{}(...)", expr_text(callee)),
        ExprKind::OptionalChain(inner) => expr_text(inner),
        ExprKind::Function(_) => "function".into(),
        _ => "expression".into(),
    }
}

pub(super) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc() % 4_294_967_296.0;
    let m = if m < 0.0 { m + 4_294_967_296.0 } else { m };
    m as u32
}

fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_candidate;
    use super::*;

    /// Runs candidate source and returns the settled value of calling it.
    fn run(src: &str, args: &[Value]) -> Result<Value, String> {
        let interp = Interp::new(Limits::default(), 0.0);
        let body = parse_candidate(src).map_err(|e| e.to_string())?;
        let promise = interp.start_body(body, Span::default()).map_err(|_| "start failed".to_string())?;
        let Value::Object(promise) = promise else {
            return Err("no promise".into());
        };
        interp.run_until_settled(&promise).map_err(|e| e.to_string())?;
        let f = match super::super::runtime::promise_outcome(&promise) {
            Some(Ok(f)) => f,
            Some(Err(e)) => return Err(interp.describe_error(&e)),
            None => return Err("pending".into()),
        };
        match interp.call(&f, Value::Undefined, args) {
            Ok(Value::Object(p)) if matches!(p.kind, ObjKind::Promise(_)) => {
                interp.run_until_settled(&p).map_err(|e| e.to_string())?;
                match super::super::runtime::promise_outcome(&p) {
                    Some(Ok(v)) => Ok(v),
                    Some(Err(e)) => Err(interp.describe_error(&e)),
                    None => Err("pending".into()),
                }
            }
            Ok(v) => Ok(v),
            Err(Abrupt::Throw(e)) => Err(interp.describe_error(&e)),
            Err(other) => Err(format!("{:?}", other)),
        }
    }

    fn num(v: Result<Value, String>) -> f64 {
        match v {
            Ok(Value::Number(n)) => n,
            other => panic!("expected number, got {:?}", other),
        }
    }

    fn text(v: Result<Value, String>) -> String {
        match v {
            Ok(Value::Str(s)) => s.to_string(),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_closures_and_hoisting() {
        let src = "function outer(n) { return helper(n) * 2; }\nfunction helper(x) { let acc = 0; for (let i = 1; i <= x; i++) acc += i; return acc; }";
        assert_eq!(num(run(src, &[Value::Number(4.0)])), 20.0);
    }

    #[test]
    fn test_named_function_expression_recursion() {
        let src = "function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }";
        assert_eq!(num(run(src, &[Value::Number(10.0)])), 55.0);
    }

    #[test]
    fn test_per_iteration_let_bindings() {
        let src = "() => { const fns = []; for (let i = 0; i < 3; i++) fns.push(() => i); return fns.map(f => f()).join(','); }";
        assert_eq!(text(run(src, &[])), "0,1,2");
    }

    #[test]
    fn test_destructuring_defaults_and_rest() {
        let src = "({ a, b = 5, ...rest }) => { const [x, , y = 9, ...more] = [1, 2, undefined, 4, 5]; return `${a}-${b}-${Object.keys(rest)}-${x}-${y}-${more}`; }";
        let interp = Interp::new(Limits::default(), 0.0);
        let arg = interp.from_json(&serde_json::json!({"a": 1, "c": 3, "d": 4}));
        drop(interp);
        assert_eq!(text(run(src, &[arg])), "1-5-c,d-1-9-4,5");
    }

    #[test]
    fn test_classes_with_inheritance() {
        let src = r#"
            (() => {
                class Animal {
                    sound = "...";
                    constructor(name) { this.name = name; }
                    speak() { return `${this.name} says ${this.sound}`; }
                    static create(name) { return new this(name); }
                }
                class Dog extends Animal {
                    sound = "woof";
                    speak() { return super.speak() + "!"; }
                }
                return () => Dog.create("rex").speak();
            })()
        "#;
        assert_eq!(text(run(src, &[])), "rex says woof!");
    }

    #[test]
    fn test_try_catch_finally_and_error_location() {
        let src = "() => { let log = []; try { null.x; } catch (e) { log.push(e instanceof TypeError); } finally { log.push('done'); } return log.join(' '); }";
        assert_eq!(text(run(src, &[])), "true done");
        let err = run("function f() {\n  return undefinedThing + 1;\n}", &[]).unwrap_err();
        assert_eq!(err, "ReferenceError: undefinedThing is not defined (2:10)");
    }

    #[test]
    fn test_not_a_function_message() {
        let err = run("(arr) => arr.nope()", &[Value::Null]).unwrap_err();
        assert!(err.starts_with("TypeError: Cannot read properties of null (reading 'nope')"), "{}", err);
    }

    #[test]
    fn test_async_ordering_with_timers() {
        let src = r#"
            async function order() {
                const out = [];
                const wait = (ms, v) => new Promise(r => setTimeout(() => { out.push(v); r(v); }, ms));
                await Promise.all([wait(30, 'c'), wait(10, 'a'), wait(20, 'b')]);
                queueMicrotask(() => out.push('micro'));
                await null;
                return out.join('');
            }
        "#;
        assert_eq!(text(run(src, &[])), "abcmicro");
    }

    #[test]
    fn test_budget_exhaustion_is_fatal() {
        let interp = Interp::new(
            Limits {
                step_budget: 10_000,
                max_call_depth: 400,
            },
            0.0,
        );
        let body = parse_candidate("() => { try { while (true) {} } catch (e) { return 1; } }").unwrap();
        let promise = interp.start_body(body, Span::default()).unwrap();
        let Value::Object(promise) = promise else { panic!("no promise") };
        interp.run_until_settled(&promise).unwrap();
        let Some(Ok(f)) = super::super::runtime::promise_outcome(&promise) else { panic!("not settled") };
        interp.reset_budget();
        let result = interp.call(&f, Value::Undefined, &[]);
        assert!(matches!(result, Err(Abrupt::Fatal(FatalError::BudgetExhausted(10_000)))));
    }

    #[test]
    fn test_recursion_limit_is_catchable() {
        let src = "() => { function down(n) { return down(n + 1); } try { down(0); } catch (e) { return e.message; } }";
        let result = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(move || run(src, &[]).map(|v| format!("{:?}", v)))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(result.unwrap(), "\"Maximum call stack size exceeded\"");
    }

    #[test]
    fn test_switch_labels_and_loops() {
        let src = r#"(n) => {
            let out = '';
            outer: for (const i of [1, 2, 3]) {
                for (let j = 0; j < 3; j++) {
                    if (j === 1) continue outer;
                    if (i === 3) break outer;
                    out += i;
                }
            }
            switch (n) { case 1: out += 'one'; case 2: out += 'two'; break; default: out += 'other'; }
            return out;
        }"#;
        assert_eq!(text(run(src, &[Value::Number(1.0)])), "12onetwo");
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        let src = "(o) => [o?.a?.b, o.missing?.(), o.x ?? 'dflt', o.a.b].join('|')";
        let interp = Interp::new(Limits::default(), 0.0);
        let arg = interp.from_json(&serde_json::json!({"a": {"b": 2}, "x": null}));
        drop(interp);
        assert_eq!(text(run(src, &[arg])), "2||dflt|2");
    }
}
