//! The polymorphic script value handle
//!
//! A [`ScriptValue`] is an opaque handle whose behavior is supplied by an
//! engine-specific [`ScriptValueDelegate`] chosen at construction. The
//! wrapper enforces the cross-engine safety contract: any operation that
//! pairs a value with a [`ScriptState`] first checks that their engines
//! match, and on mismatch fails softly (false / `None` / a sentinel string)
//! instead of panicking. Mixing engines is a programmer error; the soft
//! failure is logged, never thrown.

use crate::realm::{Realm, RootedValue};
use crate::script_state::ScriptState;
use crate::script_type::ScriptType;
use crate::value::{ObjectKind, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

/// Sentinel returned when a string is requested through a state of the
/// wrong engine.
pub const CROSS_ENGINE_STRING_ERROR: &str =
    "ERROR: Trying to get a String from a ScriptValue from a different language.";

/// Engine-specific behavior behind a [`ScriptValue`].
pub trait ScriptValueDelegate {
    /// The engine tag; `None` for the empty (no-value) delegate.
    fn script_type(&self) -> Option<ScriptType>;

    /// True for a string primitive.
    fn is_string(&self) -> bool;
    /// True for the engine's null.
    fn is_null(&self) -> bool;
    /// True for the engine's undefined.
    fn is_undefined(&self) -> bool;
    /// True for any heap object.
    fn is_object(&self) -> bool;
    /// True for a callable object.
    fn is_function(&self) -> bool;
    /// True when the wrapper holds no engine value at all.
    fn has_no_value(&self) -> bool;
    /// True for either number representation.
    fn is_number(&self) -> bool;
    /// True for a number representable as an `i32`.
    fn is_int32(&self) -> bool;
    /// True for a boolean primitive.
    fn is_boolean(&self) -> bool;
    /// True for the boolean `true`.
    fn is_true(&self) -> bool;
    /// True for heap-allocated values (strings and objects).
    fn is_cell(&self) -> bool;

    /// The value as an `i32`; 0 when it is not one.
    fn as_int32(&self) -> i32;
    /// The value as a double; 0.0 when it is not a number.
    fn as_double(&self) -> f64;
    /// The numeric value, preferring the integer representation.
    fn as_number(&self) -> f64 {
        if self.is_int32() {
            self.as_int32() as f64
        } else {
            self.as_double()
        }
    }

    /// The string contents, for string primitives only.
    fn get_string(&self) -> Option<String>;
    /// Engine string coercion.
    fn coerce_to_string(&self) -> String;

    /// Engine equality against another value of the same engine.
    fn is_equal(&self, other: &ScriptValue) -> bool;

    /// Delegate-level equality (used by `ScriptValue == ScriptValue`).
    fn delegate_eq(&self, other: &dyn ScriptValueDelegate) -> bool;

    /// Drop the underlying engine value, keeping the wrapper alive.
    fn clear(&self);

    /// The raw engine heap handle; `Undefined` once cleared or empty.
    fn raw_value(&self) -> Value;

    /// The realm the value is rooted in, when there is one.
    fn realm(&self) -> Option<Realm>;
}

/// A cross-engine-agnostic value handle.
#[derive(Clone)]
pub struct ScriptValue {
    delegate: Rc<dyn ScriptValueDelegate>,
}

impl ScriptValue {
    /// The empty (no-value) handle. Engine-neutral.
    pub fn empty() -> ScriptValue {
        ScriptValue {
            delegate: Rc::new(EmptyScriptValueDelegate),
        }
    }

    /// Wrap an explicit delegate.
    pub fn from_delegate(delegate: Rc<dyn ScriptValueDelegate>) -> ScriptValue {
        ScriptValue { delegate }
    }

    /// Wrap a JavaScript heap value, rooting it in its realm.
    pub fn js(realm: &Realm, value: Value) -> ScriptValue {
        Self::from_delegate(JsScriptValue::create(realm, value))
    }

    /// Wrap a Ruby heap value, pinning it in its realm.
    pub fn rb(realm: &Realm, value: Value) -> ScriptValue {
        Self::from_delegate(RbScriptValue::create(realm, value))
    }

    /// Wrap a value in whichever engine owns `realm`.
    pub fn for_realm(realm: &Realm, value: Value) -> ScriptValue {
        match realm.script_type() {
            ScriptType::Js => Self::js(realm, value),
            ScriptType::Rb => Self::rb(realm, value),
        }
    }

    /// The delegate behind this handle.
    pub fn delegate(&self) -> &Rc<dyn ScriptValueDelegate> {
        &self.delegate
    }

    /// The engine tag; `None` for the empty handle.
    pub fn script_type(&self) -> Option<ScriptType> {
        self.delegate.script_type()
    }

    /// True when this value belongs to the same engine as `state`.
    pub fn matches_state(&self, state: &dyn ScriptState) -> bool {
        self.script_type() == Some(state.script_type())
    }

    /// True for a string primitive.
    pub fn is_string(&self) -> bool {
        self.delegate.is_string()
    }

    /// True for the engine's null.
    pub fn is_null(&self) -> bool {
        self.delegate.is_null()
    }

    /// True for the engine's undefined.
    pub fn is_undefined(&self) -> bool {
        self.delegate.is_undefined()
    }

    /// True for any heap object.
    pub fn is_object(&self) -> bool {
        self.delegate.is_object()
    }

    /// True for a callable object.
    pub fn is_function(&self) -> bool {
        self.delegate.is_function()
    }

    /// True when the wrapper holds no engine value.
    pub fn has_no_value(&self) -> bool {
        self.delegate.has_no_value()
    }

    /// True for either number representation.
    pub fn is_number(&self) -> bool {
        self.delegate.is_number()
    }

    /// True for a number representable as an `i32`.
    pub fn is_int32(&self) -> bool {
        self.delegate.is_int32()
    }

    /// True for a boolean primitive.
    pub fn is_boolean(&self) -> bool {
        self.delegate.is_boolean()
    }

    /// True for the boolean `true`.
    pub fn is_true(&self) -> bool {
        self.delegate.is_true()
    }

    /// True for heap-allocated values.
    pub fn is_cell(&self) -> bool {
        self.delegate.is_cell()
    }

    /// The value as an `i32`; 0 when it is not one.
    pub fn as_int32(&self) -> i32 {
        self.delegate.as_int32()
    }

    /// The value as a double; 0.0 when it is not a number.
    pub fn as_double(&self) -> f64 {
        self.delegate.as_double()
    }

    /// The numeric value, preferring the integer representation.
    pub fn as_number(&self) -> f64 {
        self.delegate.as_number()
    }

    /// String contents via `state`. `None` for non-strings and on engine
    /// mismatch.
    pub fn get_string(&self, state: &dyn ScriptState) -> Option<String> {
        if !self.matches_state(state) {
            warn!("getString on a ScriptValue from a different language");
            return None;
        }
        self.delegate.get_string()
    }

    /// String coercion via `state`; the sentinel error string on engine
    /// mismatch.
    pub fn to_string_in(&self, state: &dyn ScriptState) -> String {
        if !self.matches_state(state) {
            warn!("toString on a ScriptValue from a different language");
            return CROSS_ENGINE_STRING_ERROR.to_string();
        }
        self.delegate.coerce_to_string()
    }

    /// Engine equality via `state`; false on engine mismatch.
    pub fn is_equal(&self, state: &dyn ScriptState, other: &ScriptValue) -> bool {
        if !self.matches_state(state) {
            warn!("isEqual on a ScriptValue from a different language");
            return false;
        }
        self.delegate.is_equal(other)
    }

    /// The underlying JS value; JS null when this is not a JS value.
    pub fn js_value(&self) -> Value {
        if self.script_type() != Some(ScriptType::Js) {
            warn!("jsValue() on a non-JS ScriptValue");
            return Value::Null;
        }
        self.delegate.raw_value()
    }

    /// The underlying Ruby value; nil when this is not a Ruby value.
    pub fn rb_value(&self) -> Value {
        if self.script_type() != Some(ScriptType::Rb) {
            warn!("rbValue() on a non-RB ScriptValue");
            return Value::Null;
        }
        self.delegate.raw_value()
    }

    /// The raw engine handle without an engine check.
    pub fn raw_value(&self) -> Value {
        self.delegate.raw_value()
    }

    /// The realm the value lives in, when there is one.
    pub fn realm(&self) -> Option<Realm> {
        self.delegate.realm()
    }

    /// Drop the underlying engine value while keeping the wrapper alive.
    pub fn clear(&self) {
        self.delegate.clear();
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        self.delegate.delegate_eq(other.delegate.as_ref())
    }
}

impl std::fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.script_type() {
            Some(t) => write!(f, "ScriptValue({}, {:?})", t, self.delegate.raw_value()),
            None => write!(f, "ScriptValue(empty)"),
        }
    }
}

/// Format a number the way JS `ToString` does for the common cases.
fn format_number_js(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return format!("{}", n as i64);
    }
    format!("{}", n)
}

struct RootedSlot {
    realm: Realm,
    slot: RefCell<Option<RootedValue>>,
}

impl RootedSlot {
    fn new(realm: &Realm, value: Value) -> RootedSlot {
        RootedSlot {
            realm: realm.clone(),
            slot: RefCell::new(Some(realm.root(value))),
        }
    }

    fn value(&self) -> Option<Value> {
        self.slot.borrow().as_ref().map(|r| r.value().clone())
    }

    fn clear(&self) {
        self.slot.borrow_mut().take();
    }
}

/// JavaScript-backed delegate: wraps a rooted JS heap value.
pub struct JsScriptValue {
    rooted: RootedSlot,
}

impl JsScriptValue {
    /// Root `value` in `realm` and wrap it.
    pub fn create(realm: &Realm, value: Value) -> Rc<JsScriptValue> {
        debug_assert_eq!(realm.script_type(), ScriptType::Js);
        Rc::new(JsScriptValue {
            rooted: RootedSlot::new(realm, value),
        })
    }

    fn value(&self) -> Value {
        self.rooted.value().unwrap_or(Value::Undefined)
    }
}

impl ScriptValueDelegate for JsScriptValue {
    fn script_type(&self) -> Option<ScriptType> {
        Some(ScriptType::Js)
    }

    fn is_string(&self) -> bool {
        self.value().is_string()
    }

    fn is_null(&self) -> bool {
        self.value().is_null()
    }

    fn is_undefined(&self) -> bool {
        self.value().is_undefined()
    }

    fn is_object(&self) -> bool {
        self.value().is_object()
    }

    fn is_function(&self) -> bool {
        self.value()
            .as_object()
            .is_some_and(|o| matches!(o.kind(), ObjectKind::Function(_)))
    }

    fn has_no_value(&self) -> bool {
        self.rooted.value().is_none()
    }

    fn is_number(&self) -> bool {
        self.value().is_number()
    }

    fn is_int32(&self) -> bool {
        self.value()
            .as_int()
            .is_some_and(|i| i32::try_from(i).is_ok())
    }

    fn is_boolean(&self) -> bool {
        self.value().is_bool()
    }

    fn is_true(&self) -> bool {
        self.value().as_bool() == Some(true)
    }

    fn is_cell(&self) -> bool {
        let v = self.value();
        v.is_string() || v.is_object()
    }

    fn as_int32(&self) -> i32 {
        self.value()
            .as_int()
            .and_then(|i| i32::try_from(i).ok())
            .unwrap_or(0)
    }

    fn as_double(&self) -> f64 {
        self.value().as_number().unwrap_or(0.0)
    }

    fn get_string(&self) -> Option<String> {
        self.value().as_string().map(|s| s.to_string())
    }

    fn coerce_to_string(&self) -> String {
        match self.value() {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format_number_js(d),
            Value::String(s) => s.to_string(),
            Value::Object(o) => match o.kind() {
                ObjectKind::StringObject(s) => s.to_string(),
                ObjectKind::NumberObject(n) => format_number_js(*n),
                ObjectKind::BooleanObject(b) => b.to_string(),
                ObjectKind::RegExp { pattern, flags } => {
                    format!("/{}/{}", pattern, flags.to_flag_string())
                }
                ObjectKind::Function(name) => format!("function {}() {{ }}", name),
                ObjectKind::Array => "[object Array]".to_string(),
                _ => "[object Object]".to_string(),
            },
        }
    }

    fn is_equal(&self, other: &ScriptValue) -> bool {
        if other.script_type() != Some(ScriptType::Js) {
            return false;
        }
        self.value().strict_eq(&other.raw_value())
    }

    fn delegate_eq(&self, other: &dyn ScriptValueDelegate) -> bool {
        other.script_type() == Some(ScriptType::Js)
            && !other.has_no_value()
            && !self.has_no_value()
            && self.value().strict_eq(&other.raw_value())
    }

    fn clear(&self) {
        self.rooted.clear();
    }

    fn raw_value(&self) -> Value {
        self.value()
    }

    fn realm(&self) -> Option<Realm> {
        Some(self.rooted.realm.clone())
    }
}

/// Ruby-backed delegate: wraps a GC-pinned Ruby value.
///
/// Ruby has no distinct undefined; `nil` answers both `is_null` and
/// `is_undefined`.
pub struct RbScriptValue {
    rooted: RootedSlot,
}

impl RbScriptValue {
    /// Pin `value` in `realm` and wrap it.
    pub fn create(realm: &Realm, value: Value) -> Rc<RbScriptValue> {
        debug_assert_eq!(realm.script_type(), ScriptType::Rb);
        Rc::new(RbScriptValue {
            rooted: RootedSlot::new(realm, value),
        })
    }

    fn value(&self) -> Value {
        self.rooted.value().unwrap_or(Value::Null)
    }
}

impl ScriptValueDelegate for RbScriptValue {
    fn script_type(&self) -> Option<ScriptType> {
        Some(ScriptType::Rb)
    }

    fn is_string(&self) -> bool {
        self.value().is_string()
    }

    fn is_null(&self) -> bool {
        matches!(self.value(), Value::Null | Value::Undefined)
    }

    fn is_undefined(&self) -> bool {
        matches!(self.value(), Value::Null | Value::Undefined)
    }

    fn is_object(&self) -> bool {
        self.value().is_object()
    }

    fn is_function(&self) -> bool {
        self.value()
            .as_object()
            .is_some_and(|o| matches!(o.kind(), ObjectKind::Function(_)))
    }

    fn has_no_value(&self) -> bool {
        self.rooted.value().is_none()
    }

    fn is_number(&self) -> bool {
        self.value().is_number()
    }

    fn is_int32(&self) -> bool {
        self.value()
            .as_int()
            .is_some_and(|i| i32::try_from(i).is_ok())
    }

    fn is_boolean(&self) -> bool {
        self.value().is_bool()
    }

    fn is_true(&self) -> bool {
        self.value().as_bool() == Some(true)
    }

    fn is_cell(&self) -> bool {
        let v = self.value();
        v.is_string() || v.is_object()
    }

    fn as_int32(&self) -> i32 {
        self.value()
            .as_int()
            .and_then(|i| i32::try_from(i).ok())
            .unwrap_or(0)
    }

    fn as_double(&self) -> f64 {
        self.value().as_number().unwrap_or(0.0)
    }

    fn get_string(&self) -> Option<String> {
        self.value().as_string().map(|s| s.to_string())
    }

    fn coerce_to_string(&self) -> String {
        // Ruby to_s semantics: nil stringifies to the empty string.
        match self.value() {
            Value::Undefined | Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => {
                if d.fract() == 0.0 && d.is_finite() {
                    format!("{:.1}", d)
                } else {
                    format!("{}", d)
                }
            }
            Value::String(s) => s.to_string(),
            Value::Object(o) => match o.kind() {
                ObjectKind::StringObject(s) => s.to_string(),
                ObjectKind::NumberObject(n) => format!("{}", n),
                ObjectKind::BooleanObject(b) => b.to_string(),
                ObjectKind::RegExp { pattern, flags } => {
                    format!("(?{}-mix:{})", flags.to_flag_string(), pattern)
                }
                _ => format!("#<Object:0x{:012x}>", o.identity()),
            },
        }
    }

    fn is_equal(&self, other: &ScriptValue) -> bool {
        if other.script_type() != Some(ScriptType::Rb) {
            return false;
        }
        self.value().strict_eq(&other.raw_value())
    }

    fn delegate_eq(&self, other: &dyn ScriptValueDelegate) -> bool {
        other.script_type() == Some(ScriptType::Rb)
            && !other.has_no_value()
            && !self.has_no_value()
            && self.value().strict_eq(&other.raw_value())
    }

    fn clear(&self) {
        self.rooted.clear();
    }

    fn raw_value(&self) -> Value {
        self.value()
    }

    fn realm(&self) -> Option<Realm> {
        Some(self.rooted.realm.clone())
    }
}

/// The empty delegate: no value, no engine.
struct EmptyScriptValueDelegate;

impl ScriptValueDelegate for EmptyScriptValueDelegate {
    fn script_type(&self) -> Option<ScriptType> {
        None
    }

    fn is_string(&self) -> bool {
        false
    }

    fn is_null(&self) -> bool {
        true
    }

    fn is_undefined(&self) -> bool {
        true
    }

    fn is_object(&self) -> bool {
        false
    }

    fn is_function(&self) -> bool {
        false
    }

    fn has_no_value(&self) -> bool {
        true
    }

    fn is_number(&self) -> bool {
        false
    }

    fn is_int32(&self) -> bool {
        false
    }

    fn is_boolean(&self) -> bool {
        false
    }

    fn is_true(&self) -> bool {
        false
    }

    fn is_cell(&self) -> bool {
        false
    }

    fn as_int32(&self) -> i32 {
        0
    }

    fn as_double(&self) -> f64 {
        0.0
    }

    fn get_string(&self) -> Option<String> {
        None
    }

    fn coerce_to_string(&self) -> String {
        String::new()
    }

    fn is_equal(&self, other: &ScriptValue) -> bool {
        other.has_no_value()
    }

    fn delegate_eq(&self, other: &dyn ScriptValueDelegate) -> bool {
        other.has_no_value() && other.script_type().is_none()
    }

    fn clear(&self) {}

    fn raw_value(&self) -> Value {
        Value::Undefined
    }

    fn realm(&self) -> Option<Realm> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_state::{JsScriptState, RbScriptState};

    #[test]
    fn test_empty_value_is_engine_neutral() {
        let empty = ScriptValue::empty();
        assert_eq!(empty.script_type(), None);
        assert!(empty.has_no_value());
        assert!(empty.is_null());
        assert!(empty.is_undefined());
        assert_eq!(empty, ScriptValue::empty());
    }

    #[test]
    fn test_js_value_predicates() {
        let realm = Realm::new(ScriptType::Js);
        let v = ScriptValue::js(&realm, Value::Int(7));
        assert!(v.is_number());
        assert!(v.is_int32());
        assert_eq!(v.as_int32(), 7);
        assert_eq!(v.as_number(), 7.0);
        assert!(!v.is_string());
        assert_eq!(v.script_type(), Some(ScriptType::Js));
    }

    #[test]
    fn test_rb_nil_is_null_and_undefined() {
        let realm = Realm::new(ScriptType::Rb);
        let nil = ScriptValue::rb(&realm, Value::Null);
        assert!(nil.is_null());
        assert!(nil.is_undefined());
    }

    #[test]
    fn test_clear_drops_root_but_keeps_wrapper() {
        let realm = Realm::new(ScriptType::Js);
        let v = ScriptValue::js(&realm, Value::string("keep"));
        assert_eq!(realm.root_count(), 1);
        v.clear();
        assert_eq!(realm.root_count(), 0);
        assert!(v.has_no_value());
        assert!(!v.is_string());
    }

    #[test]
    fn test_value_drop_unroots() {
        let realm = Realm::new(ScriptType::Js);
        let v = ScriptValue::js(&realm, Value::Int(1));
        let w = v.clone();
        assert_eq!(realm.root_count(), 1); // shared delegate, one root
        drop(v);
        assert_eq!(realm.root_count(), 1);
        drop(w);
        assert_eq!(realm.root_count(), 0);
    }

    #[test]
    fn test_cross_engine_operations_fail_softly() {
        let js_realm = Realm::new(ScriptType::Js);
        let rb_realm = Realm::new(ScriptType::Rb);
        let js_state = JsScriptState::new(js_realm.clone());
        let rb_value = ScriptValue::rb(&rb_realm, Value::string("hello"));

        assert_eq!(rb_value.get_string(js_state.as_ref()), None);
        assert_eq!(
            rb_value.to_string_in(js_state.as_ref()),
            CROSS_ENGINE_STRING_ERROR
        );
        let other = ScriptValue::rb(&rb_realm, Value::string("hello"));
        assert!(!rb_value.is_equal(js_state.as_ref(), &other));
        assert!(rb_value.js_value().is_null());
    }

    #[test]
    fn test_same_engine_string_round_trip() {
        let realm = Realm::new(ScriptType::Rb);
        let state = RbScriptState::new(realm.clone());
        let v = ScriptValue::rb(&realm, Value::string("hello"));
        assert_eq!(v.get_string(state.as_ref()), Some("hello".to_string()));
        assert_eq!(v.to_string_in(state.as_ref()), "hello");
    }

    #[test]
    fn test_js_string_coercions() {
        let realm = Realm::new(ScriptType::Js);
        let state = JsScriptState::new(realm.clone());
        let cases: &[(Value, &str)] = &[
            (Value::Undefined, "undefined"),
            (Value::Null, "null"),
            (Value::Bool(true), "true"),
            (Value::Int(42), "42"),
            (Value::Double(1.5), "1.5"),
            (Value::Double(f64::NAN), "NaN"),
        ];
        for (value, expected) in cases {
            let v = ScriptValue::js(&realm, value.clone());
            assert_eq!(v.to_string_in(state.as_ref()), *expected);
        }
    }

    #[test]
    fn test_is_equal_same_engine() {
        let realm = Realm::new(ScriptType::Js);
        let state = JsScriptState::new(realm.clone());
        let a = ScriptValue::js(&realm, Value::Int(3));
        let b = ScriptValue::js(&realm, Value::Double(3.0));
        assert!(a.is_equal(state.as_ref(), &b));
        let obj = crate::value::ObjectRef::new_plain();
        let o1 = ScriptValue::js(&realm, Value::Object(obj.clone()));
        let o2 = ScriptValue::js(&realm, Value::Object(obj));
        assert!(o1.is_equal(state.as_ref(), &o2));
    }
}
