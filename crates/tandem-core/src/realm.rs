//! Per-engine realms and value rooting
//!
//! A [`Realm`] stands in for one live engine instance: the global object, the
//! pending-exception slot, the eval toggle, and the root set that keeps
//! bridge-held values alive across engine garbage collections.
//!
//! Rooting is strictly RAII: a [`RootedValue`] registers on construction and
//! unregisters on drop, with no escape hatch. The root count is observable so
//! tests can prove the pairing holds.
//!
//! Actual script execution belongs to the engine, which is an external
//! collaborator; hosts install it as an evaluator hook. A realm without an
//! evaluator yields `Undefined` for every program, which keeps the control
//! flow of controllers and the debugger exercisable without an engine.

use crate::call_stack::ScriptCallFrameInfo;
use crate::script_type::ScriptType;
use crate::value::{ObjectRef, Value};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

/// A piece of script source plus where it came from.
#[derive(Clone, Debug)]
pub struct SourceCode {
    /// The program text
    pub source: String,
    /// The URL the source was loaded from
    pub url: String,
    /// One-based first line of the source within its resource
    pub starting_line: u32,
}

impl SourceCode {
    /// Source with a URL, starting at line 1.
    pub fn new(source: impl Into<String>, url: impl Into<String>) -> SourceCode {
        SourceCode {
            source: source.into(),
            url: url.into(),
            starting_line: 1,
        }
    }
}

/// Outcome of running a program in a realm: a completion value or the
/// engine exception that ended it.
pub type EvalResult = Result<Value, Value>;

type Evaluator = Box<dyn Fn(&Realm, &SourceCode) -> EvalResult>;
type CallStackProvider = Box<dyn Fn(usize) -> Vec<ScriptCallFrameInfo>>;

struct RealmInner {
    script_type: ScriptType,
    global: ObjectRef,
    roots: RefCell<FxHashMap<u64, Value>>,
    next_root_id: Cell<u64>,
    exception: RefCell<Option<Value>>,
    eval_enabled: Cell<bool>,
    evaluator: RefCell<Option<Evaluator>>,
    call_stack_provider: RefCell<Option<CallStackProvider>>,
}

/// One engine instance's execution environment.
#[derive(Clone)]
pub struct Realm(Rc<RealmInner>);

impl Realm {
    /// Create a realm for the given engine.
    pub fn new(script_type: ScriptType) -> Realm {
        Realm(Rc::new(RealmInner {
            script_type,
            global: ObjectRef::new_plain(),
            roots: RefCell::new(FxHashMap::default()),
            next_root_id: Cell::new(1),
            exception: RefCell::new(None),
            eval_enabled: Cell::new(true),
            evaluator: RefCell::new(None),
            call_stack_provider: RefCell::new(None),
        }))
    }

    /// Which engine this realm belongs to.
    pub fn script_type(&self) -> ScriptType {
        self.0.script_type
    }

    /// The realm's global object (the window shell or top-level binding).
    pub fn global_object(&self) -> ObjectRef {
        self.0.global.clone()
    }

    /// True when both handles name the same realm.
    pub fn same_realm(&self, other: &Realm) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Pin a value for the lifetime of the returned guard.
    pub fn root(&self, value: Value) -> RootedValue {
        let id = self.0.next_root_id.get();
        self.0.next_root_id.set(id + 1);
        self.0.roots.borrow_mut().insert(id, value.clone());
        RootedValue {
            realm: self.clone(),
            id,
            value,
        }
    }

    fn unroot(&self, id: u64) {
        self.0.roots.borrow_mut().remove(&id);
    }

    /// Number of live roots. Exposed for leak checks.
    pub fn root_count(&self) -> usize {
        self.0.roots.borrow().len()
    }

    /// Whether an exception is pending. A poll: the slot is not cleared.
    pub fn has_exception(&self) -> bool {
        self.0.exception.borrow().is_some()
    }

    /// Record a pending exception.
    pub fn set_exception(&self, exception: Value) {
        *self.0.exception.borrow_mut() = Some(exception);
    }

    /// Consume the pending exception, clearing the slot.
    pub fn take_exception(&self) -> Option<Value> {
        self.0.exception.borrow_mut().take()
    }

    /// Whether `eval` is currently allowed in this realm.
    pub fn eval_enabled(&self) -> bool {
        self.0.eval_enabled.get()
    }

    /// Toggle `eval`.
    pub fn set_eval_enabled(&self, enabled: bool) {
        self.0.eval_enabled.set(enabled);
    }

    /// Install the engine execution hook.
    pub fn set_evaluator(&self, evaluator: impl Fn(&Realm, &SourceCode) -> EvalResult + 'static) {
        *self.0.evaluator.borrow_mut() = Some(Box::new(evaluator));
    }

    /// Install the engine stack-capture hook.
    pub fn set_call_stack_provider(
        &self,
        provider: impl Fn(usize) -> Vec<ScriptCallFrameInfo> + 'static,
    ) {
        *self.0.call_stack_provider.borrow_mut() = Some(Box::new(provider));
    }

    /// Capture up to `max_depth` frames of the live stack. Empty when the
    /// engine has not installed a provider.
    pub fn capture_stack(&self, max_depth: usize) -> Vec<ScriptCallFrameInfo> {
        match self.0.call_stack_provider.borrow().as_ref() {
            Some(provider) => provider(max_depth),
            None => Vec::new(),
        }
    }

    /// Run a program. Failures land in the exception slot and are also
    /// returned, so callers choose between polling and consuming.
    pub fn evaluate(&self, source: &SourceCode) -> EvalResult {
        trace!(engine = %self.script_type(), url = %source.url, "evaluate");
        let evaluator = self.0.evaluator.borrow();
        let Some(evaluator) = evaluator.as_ref() else {
            return Ok(Value::Undefined);
        };
        let result = evaluator(self, source);
        if let Err(exception) = &result {
            self.set_exception(exception.clone());
        }
        result
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Realm({}, roots={})",
            self.script_type(),
            self.root_count()
        )
    }
}

/// RAII pin on a realm value.
///
/// Holding the guard keeps the value in the realm's root set; dropping it
/// removes the root. There is deliberately no way to leak the registration.
pub struct RootedValue {
    realm: Realm,
    id: u64,
    value: Value,
}

impl RootedValue {
    /// The pinned value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The realm the value is rooted in.
    pub fn realm(&self) -> &Realm {
        &self.realm
    }
}

impl Drop for RootedValue {
    fn drop(&mut self) {
        self.realm.unroot(self.id);
    }
}

impl std::fmt::Debug for RootedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RootedValue({:?})", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unroot_balance() {
        let realm = Realm::new(ScriptType::Js);
        assert_eq!(realm.root_count(), 0);
        let a = realm.root(Value::Int(1));
        let b = realm.root(Value::string("x"));
        assert_eq!(realm.root_count(), 2);
        drop(a);
        assert_eq!(realm.root_count(), 1);
        drop(b);
        assert_eq!(realm.root_count(), 0);
    }

    #[test]
    fn test_exception_is_a_poll() {
        let realm = Realm::new(ScriptType::Rb);
        realm.set_exception(Value::string("boom"));
        assert!(realm.has_exception());
        assert!(realm.has_exception()); // polling does not clear
        let taken = realm.take_exception().unwrap();
        assert!(taken.strict_eq(&Value::string("boom")));
        assert!(!realm.has_exception());
    }

    #[test]
    fn test_default_evaluator_yields_undefined() {
        let realm = Realm::new(ScriptType::Js);
        let result = realm.evaluate(&SourceCode::new("1 + 1", "about:blank"));
        assert!(result.unwrap().is_undefined());
    }

    #[test]
    fn test_evaluator_failure_sets_exception() {
        let realm = Realm::new(ScriptType::Js);
        realm.set_evaluator(|_, _| Err(Value::string("SyntaxError")));
        let result = realm.evaluate(&SourceCode::new("(", "about:blank"));
        assert!(result.is_err());
        assert!(realm.has_exception());
    }
}
