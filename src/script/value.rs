use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use thiserror::Error;

use super::ast;
use super::interp::{Interp, Scope};
use super::lexer::Span;

/// Longest dense array the sandbox allocates.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;
/// Longest string the sandbox builds, in UTF-8 bytes.
pub const MAX_STRING_LENGTH: usize = (1 << 29) - 24;

pub type ObjRef = Rc<Obj>;
pub type JsResult<T> = Result<T, Abrupt>;

/// Native function body: `(interp, this, args)`.
pub type NativeFn = Rc<dyn Fn(&Interp, &Value, &[Value]) -> JsResult<Value>>;
/// Native constructor body: `(interp, new_target, args)`.
pub type NativeCtor = Rc<dyn Fn(&Interp, &ObjRef, &[Value]) -> JsResult<Value>>;
/// Settlement callback for promise combinators.
pub type NativeReaction = Rc<dyn Fn(&Interp, Result<Value, Value>) -> JsResult<()>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(ObjRef),
}

/// Failures the candidate cannot intercept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("execution budget exhausted after {0} steps")]
    BudgetExhausted(u64),
}

/// Non-normal completion of an evaluation.
#[derive(Debug, Clone)]
pub enum Abrupt {
    Throw(Value),
    Fatal(FatalError),
    /// A nullish link inside an optional chain.
    ShortCircuit,
}

pub struct Obj {
    pub kind: ObjKind,
    pub props: RefCell<PropMap>,
    pub proto: RefCell<Option<ObjRef>>,
}

pub enum ObjKind {
    Plain,
    Array(RefCell<Vec<Value>>),
    Function(Callable),
    Promise(RefCell<PromiseState>),
    Set(RefCell<OrderedMap<Value>>),
    Map(RefCell<OrderedMap<(Value, Value)>>),
    /// Error instance and where it was created.
    Error(Span),
}

pub enum Callable {
    Script(Closure),
    Native {
        name: Rc<str>,
        call: NativeFn,
        construct: Option<NativeCtor>,
    },
    Class(ClassData),
    Bound {
        target: ObjRef,
        this: Value,
        args: Vec<Value>,
    },
}

pub struct Closure {
    pub func: Rc<ast::Function>,
    pub env: Rc<Scope>,
    /// Object whose prototype `super.x` looks through.
    pub home: Option<ObjRef>,
}

pub struct ClassData {
    pub def: Rc<ast::Class>,
    pub env: Rc<Scope>,
    pub parent: Option<ObjRef>,
    pub prototype: ObjRef,
    /// Keys of the instance fields, in declaration order.
    pub field_keys: Vec<Rc<str>>,
}

pub enum PromiseState {
    Pending(Vec<Reaction>),
    Fulfilled(Value),
    Rejected(Value),
}

pub enum Reaction {
    Then {
        on_fulfilled: Value,
        on_rejected: Value,
        derived: Option<ObjRef>,
    },
    /// Wake a suspended task.
    Resume(u64),
    Native(NativeReaction),
}

/// Insertion-ordered map used for object properties.
#[derive(Default)]
pub struct PropMap {
    index: HashMap<Rc<str>, usize>,
    slots: Vec<Option<(Rc<str>, Value)>>,
}

impl PropMap {
    pub fn get(&self, key: &str) -> Option<Value> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn set(&mut self, key: Rc<str>, value: Value) {
        match self.index.get(&key) {
            Some(&slot) => self.slots[slot] = Some((key, value)),
            None => {
                self.index.insert(key.clone(), self.slots.len());
                self.slots.push(Some((key, value)));
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.index.remove(key) {
            Some(slot) => {
                self.slots[slot] = None;
                true
            }
            None => false,
        }
    }

    /// Integer-like keys ascending, then the rest in insertion order.
    pub fn keys(&self) -> Vec<Rc<str>> {
        let mut indices: Vec<(u32, Rc<str>)> = Vec::new();
        let mut named = Vec::new();
        for (key, _) in self.slots.iter().flatten() {
            match array_index(key) {
                Some(i) => indices.push((i, key.clone())),
                None => named.push(key.clone()),
            }
        }
        indices.sort_by_key(|(i, _)| *i);
        indices.into_iter().map(|(_, k)| k).chain(named).collect()
    }
}

/// Identity used by `Set`/`Map`: SameValueZero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    Str(Rc<str>),
    Object(usize),
}

impl HashKey {
    pub fn of(value: &Value) -> HashKey {
        match value {
            Value::Undefined => HashKey::Undefined,
            Value::Null => HashKey::Null,
            Value::Bool(b) => HashKey::Bool(*b),
            Value::Number(n) if n.is_nan() => HashKey::Number(f64::NAN.to_bits()),
            Value::Number(n) if *n == 0.0 => HashKey::Number(0f64.to_bits()),
            Value::Number(n) => HashKey::Number(n.to_bits()),
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Object(o) => HashKey::Object(Rc::as_ptr(o) as usize),
        }
    }
}

/// Insertion-ordered hash table backing `Set` and `Map`.
pub struct OrderedMap<T> {
    index: HashMap<HashKey, usize>,
    entries: Vec<Option<T>>,
    len: usize,
}

impl<T: Clone> OrderedMap<T> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
            len: 0,
        }
    }

    pub fn get(&self, key: &HashKey) -> Option<&T> {
        self.index.get(key).and_then(|&i| self.entries[i].as_ref())
    }

    pub fn insert(&mut self, key: HashKey, value: T) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i] = Some(value),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(Some(value));
                self.len += 1;
            }
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> bool {
        match self.index.remove(key) {
            Some(i) => {
                self.entries[i] = None;
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Live entries in insertion order.
    pub fn values(&self) -> Vec<T> {
        self.entries.iter().flatten().cloned().collect()
    }
}

impl<T: Clone> Default for OrderedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl Obj {
    pub fn new(kind: ObjKind, proto: Option<ObjRef>) -> ObjRef {
        Rc::new(Obj {
            kind,
            props: RefCell::new(PropMap::default()),
            proto: RefCell::new(proto),
        })
    }

    pub fn proto(&self) -> Option<ObjRef> {
        self.proto.borrow().clone()
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjKind::Function(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjKind::Array(_))
    }

    pub fn callable(&self) -> Option<&Callable> {
        match &self.kind {
            ObjKind::Function(c) => Some(c),
            _ => None,
        }
    }

    /// Own property lookup, including the virtual `length`/`size`/`name`.
    pub fn get_own(&self, key: &str) -> Option<Value> {
        match &self.kind {
            ObjKind::Array(items) => {
                if let Some(i) = array_index(key) {
                    return items.borrow().get(i as usize).cloned();
                }
                if key == "length" {
                    return Some(Value::Number(items.borrow().len() as f64));
                }
            }
            ObjKind::Set(set) if key == "size" => return Some(Value::Number(set.borrow().len() as f64)),
            ObjKind::Map(map) if key == "size" => return Some(Value::Number(map.borrow().len() as f64)),
            ObjKind::Function(callable) if key == "name" || key == "length" => {
                if let Some(v) = self.props.borrow().get(key) {
                    return Some(v);
                }
                return Some(if key == "name" {
                    Value::Str(callable.name())
                } else {
                    Value::Number(callable.arity() as f64)
                });
            }
            _ => {}
        }
        self.props.borrow().get(key)
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.get_own(key).is_some() || self.props.borrow().contains(key)
    }

    /// Property lookup through the prototype chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.get_own(key) {
            return Some(v);
        }
        let mut current = self.proto();
        while let Some(obj) = current {
            if let Some(v) = obj.get_own(key) {
                return Some(v);
            }
            current = obj.proto();
        }
        None
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Own property write. Returns false when the write is invalid
    /// (bad array length, or growth past `MAX_ARRAY_LENGTH`).
    pub fn set_own(&self, key: Rc<str>, value: Value) -> bool {
        if let ObjKind::Array(items) = &self.kind {
            if let Some(i) = array_index(&key) {
                let mut items = items.borrow_mut();
                let i = i as usize;
                if i >= MAX_ARRAY_LENGTH {
                    return false;
                }
                if i >= items.len() {
                    items.resize(i + 1, Value::Undefined);
                }
                items[i] = value;
                return true;
            }
            if &*key == "length" {
                let len = match value {
                    Value::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= MAX_ARRAY_LENGTH as f64 => n as usize,
                    _ => return false,
                };
                items.borrow_mut().resize(len, Value::Undefined);
                return true;
            }
        }
        self.props.borrow_mut().set(key, value);
        true
    }

    pub fn delete_own(&self, key: &str) -> bool {
        if let ObjKind::Array(items) = &self.kind {
            if let Some(i) = array_index(key) {
                if let Some(slot) = items.borrow_mut().get_mut(i as usize) {
                    *slot = Value::Undefined;
                }
                return true;
            }
        }
        self.props.borrow_mut().remove(key);
        true
    }

    /// Enumerable own keys in property order.
    pub fn own_keys(&self) -> Vec<Rc<str>> {
        let mut keys: Vec<Rc<str>> = match &self.kind {
            ObjKind::Array(items) => (0..items.borrow().len()).map(|i| Rc::from(i.to_string().as_str())).collect(),
            _ => Vec::new(),
        };
        keys.extend(self.props.borrow().keys());
        keys
    }

    pub fn array_items(&self) -> Option<Vec<Value>> {
        match &self.kind {
            ObjKind::Array(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }
}

impl Callable {
    pub fn name(&self) -> Rc<str> {
        match self {
            Callable::Script(c) => c.func.name.clone().unwrap_or_else(|| Rc::from("")),
            Callable::Native { name, .. } => name.clone(),
            Callable::Class(c) => c.def.name.clone().unwrap_or_else(|| Rc::from("")),
            Callable::Bound { target, .. } => match target.callable() {
                Some(inner) => Rc::from(format!("bound {}", inner.name()).as_str()),
                None => Rc::from("bound"),
            },
        }
    }

    pub fn arity(&self) -> usize {
        let params = |f: &ast::Function| f.params.iter().take_while(|p| p.default.is_none() && !p.rest).count();
        match self {
            Callable::Script(c) => params(&c.func),
            Callable::Class(c) => c.def.constructor.as_deref().map(params).unwrap_or(0),
            _ => 0,
        }
    }
}

impl Value {
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(|o| o.is_callable())
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(o) if o.is_callable() => "function",
            Value::Object(_) => "object",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(o) => match &o.kind {
                ObjKind::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
                ObjKind::Function(c) => write!(f, "[Function: {}]", c.name()),
                _ => write!(f, "[object]"),
            },
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Object(o)
    }
}

/// Canonical array index (`"0"`, `"17"`; never `"01"`).
pub fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || key.len() > 10 || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|&i| i != u32::MAX)
}

/// Number to string following the ECMAScript algorithm.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n == 0.0 {
        return "0".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    if n < 0.0 {
        return format!("-{}", number_to_string(-n));
    }

    // shortest round-trip digits, e.g. "1.2345e-7"
    let sci = format!("{:e}", n);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exp: i32 = exp.parse().unwrap_or(0);
    let k = digits.len() as i32;
    let point = exp + 1;

    if k <= point && point <= 21 {
        format!("{}{}", digits, "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        format!("{}.{}", &digits[..point as usize], &digits[point as usize..])
    } else if -6 < point && point <= 0 {
        format!("0.{}{}", "0".repeat((-point) as usize), digits)
    } else {
        let sign = if point - 1 < 0 { '-' } else { '+' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{}e{}{}", first, sign, (point - 1).abs())
        } else {
            format!("{}.{}e{}{}", first, rest, sign, (point - 1).abs())
        }
    }
}

/// Exact decimal digits of a finite, positive `n`, as `0.d1d2... × 10^point`.
fn exact_digits(n: f64) -> (Vec<u8>, i32) {
    // every finite double terminates within 1074 fraction digits
    let text = format!("{:.1074}", n);
    let (int, frac) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let mut digits: Vec<u8> = int.bytes().chain(frac.bytes()).map(|b| b - b'0').collect();
    let leading = digits.iter().take_while(|&&d| d == 0).count();
    digits.drain(..leading);
    while digits.last() == Some(&0) {
        digits.pop();
    }
    (digits, int.len() as i32 - leading as i32)
}

/// Keeps the first `keep` digits, rounding ties up.
fn round_digits(mut digits: Vec<u8>, mut point: i32, keep: i32) -> (Vec<u8>, i32) {
    if keep < 0 {
        return (Vec::new(), point);
    }
    let keep = keep as usize;
    if digits.len() <= keep {
        return (digits, point);
    }
    let round_up = digits[keep] >= 5;
    digits.truncate(keep);
    if round_up {
        let mut i = keep;
        loop {
            if i == 0 {
                digits.insert(0, 1);
                point += 1;
                break;
            }
            i -= 1;
            if digits[i] == 9 {
                digits[i] = 0;
            } else {
                digits[i] += 1;
                break;
            }
        }
    }
    (digits, point)
}

fn fixed_from_digits(digits: &[u8], point: i32, fraction: usize) -> String {
    let digit = |i: i32| match usize::try_from(i).ok().and_then(|i| digits.get(i)) {
        Some(d) => char::from(b'0' + d),
        None => '0',
    };
    let mut out = String::new();
    if point <= 0 {
        out.push('0');
    } else {
        out.extend((0..point).map(digit));
    }
    if fraction > 0 {
        out.push('.');
        out.extend((point..point + fraction as i32).map(digit));
    }
    out
}

/// `Number.prototype.toFixed` for finite values below 1e21.
pub fn number_to_fixed(n: f64, fraction: usize) -> String {
    let (digits, point) = if n == 0.0 {
        (Vec::new(), 1)
    } else {
        let (digits, point) = exact_digits(n.abs());
        round_digits(digits, point, point + fraction as i32)
    };
    let body = fixed_from_digits(&digits, point, fraction);
    if n < 0.0 {
        format!("-{}", body)
    } else {
        body
    }
}

/// `Number.prototype.toPrecision` for finite values and `1..=100` digits.
pub fn number_to_precision(n: f64, precision: usize) -> String {
    if n == 0.0 {
        return fixed_from_digits(&[], 1, precision - 1);
    }
    let (digits, point) = exact_digits(n.abs());
    let (digits, point) = round_digits(digits, point, precision as i32);
    let exponent = point - 1;
    let body = if exponent < -6 || exponent >= precision as i32 {
        let mantissa = fixed_from_digits(&digits, 1, precision - 1);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{}", mantissa, sign, exponent.abs())
    } else {
        fixed_from_digits(&digits, point, (precision as i32 - 1 - exponent) as usize)
    };
    if n < 0.0 {
        format!("-{}", body)
    } else {
        body
    }
}

/// `Number.prototype.toString(radix)`.
pub fn number_to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() {
        return number_to_string(n);
    }
    let negative = n < 0.0;
    let mut int = n.abs().trunc();
    let mut frac = n.abs().fract();
    let mut out = Vec::new();
    if int == 0.0 {
        out.push('0');
    }
    while int >= 1.0 {
        let digit = (int % radix as f64) as u32;
        out.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        int = (int / radix as f64).trunc();
    }
    out.reverse();
    let mut text: String = out.into_iter().collect();
    if frac > 0.0 {
        text.push('.');
        for _ in 0..20 {
            frac *= radix as f64;
            let digit = frac.trunc() as u32;
            text.push(std::char::from_digit(digit, radix).unwrap_or('0'));
            frac = frac.fract();
            if frac == 0.0 {
                break;
            }
        }
    }
    if negative {
        format!("-{}", text)
    } else {
        text
    }
}

/// String to number following `Number(string)`.
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    let radix = match t.get(..2) {
        Some("0x") | Some("0X") => 16,
        Some("0o") | Some("0O") => 8,
        Some("0b") | Some("0B") => 2,
        _ => 10,
    };
    if radix != 10 {
        return u64::from_str_radix(&t[2..], radix).map(|n| n as f64).unwrap_or(f64::NAN);
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let valid = t
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !valid {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(123456789012345680000.0), "123456789012345680000");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(1.5e-10), "1.5e-10");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(-f64::INFINITY), "-Infinity");
    }

    #[test]
    fn test_radix() {
        assert_eq!(number_to_radix(255.0, 16), "ff");
        assert_eq!(number_to_radix(-5.0, 2), "-101");
        assert_eq!(number_to_radix(0.5, 2), "0.1");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1f"), 31.0);
        assert!(string_to_number("12px").is_nan());
    }

    #[test]
    fn test_prop_map_orders_integer_keys_first() {
        let mut props = PropMap::default();
        props.set(Rc::from("b"), Value::Null);
        props.set(Rc::from("2"), Value::Null);
        props.set(Rc::from("a"), Value::Null);
        props.set(Rc::from("1"), Value::Null);
        let keys: Vec<String> = props.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["1", "2", "b", "a"]);
    }

    #[test]
    fn test_hash_key_same_value_zero() {
        assert_eq!(HashKey::of(&Value::Number(0.0)), HashKey::of(&Value::Number(-0.0)));
        assert_eq!(HashKey::of(&Value::Number(f64::NAN)), HashKey::of(&Value::Number(f64::NAN)));
        assert_ne!(HashKey::of(&Value::from("1")), HashKey::of(&Value::Number(1.0)));
    }

    #[test]
    fn test_ordered_map_keeps_insertion_order() {
        let mut set: OrderedMap<Value> = OrderedMap::new();
        for n in [7.0, 3.0, 7.0, 1.0] {
            set.insert(HashKey::of(&Value::Number(n)), Value::Number(n));
        }
        set.remove(&HashKey::of(&Value::Number(3.0)));
        let values: Vec<f64> = set
            .values()
            .into_iter()
            .map(|v| match v {
                Value::Number(n) => n,
                _ => f64::NAN,
            })
            .collect();
        assert_eq!(values, vec![7.0, 1.0]);
        assert_eq!(set.len(), 2);
    }
}
