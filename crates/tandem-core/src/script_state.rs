//! Execution environments abstracted over engines
//!
//! A [`ScriptState`] represents "an executing script's environment": the
//! realm it runs in, the owning execution context, and the window global when
//! the environment is DOM-backed. Each engine has its own state type; the
//! trait is the only surface callers touch.
//!
//! `had_exception` is a poll on both engines. The engine-specific consume
//! operation is `Realm::take_exception`, called explicitly by whoever owns
//! the error.

use crate::call_stack::ScriptCallStack;
use crate::realm::{Realm, RootedValue};
use crate::script_type::ScriptType;
use crate::value::{ObjectRef, Value};
use std::rc::Rc;

/// The owning execution context, as seen by the bridge.
///
/// The real document / worker context lives host-side; the bridge only ever
/// reports exceptions into it.
pub trait ExecutionContext {
    /// Surface a script error to the page console.
    fn report_exception(&self, message: &str, source_url: &str, line: u32);

    /// True for worker contexts.
    fn is_worker_context(&self) -> bool {
        false
    }
}

/// One executing script's environment.
pub trait ScriptState {
    /// The engine this state belongs to. Fixed at construction.
    fn script_type(&self) -> ScriptType;

    /// The realm backing this state.
    fn realm(&self) -> &Realm;

    /// Whether an exception is pending. A poll, never a pop.
    fn had_exception(&self) -> bool {
        self.realm().has_exception()
    }

    /// The owning execution context, when the environment is host-backed.
    fn execution_context(&self) -> Option<Rc<dyn ExecutionContext>>;

    /// The window global, when the environment is DOM-backed.
    fn dom_window(&self) -> Option<ObjectRef>;

    /// Whether `eval` is allowed here.
    fn eval_enabled(&self) -> bool {
        self.realm().eval_enabled()
    }

    /// Toggle `eval`.
    fn set_eval_enabled(&self, enabled: bool) {
        self.realm().set_eval_enabled(enabled);
    }

    /// Capture the live stack, up to `max_depth` frames.
    fn create_call_stack(&self, max_depth: usize) -> ScriptCallStack {
        ScriptCallStack::new(self.realm().capture_stack(max_depth), max_depth)
    }

    /// Capture the stack at console-message depth.
    fn create_call_stack_for_console(&self) -> ScriptCallStack {
        self.create_call_stack(ScriptCallStack::MAX_DEPTH_FOR_CONSOLE)
    }
}

/// JavaScript execution environment: one per global object per world.
pub struct JsScriptState {
    realm: Realm,
    context: Option<Rc<dyn ExecutionContext>>,
    window: Option<ObjectRef>,
}

impl JsScriptState {
    /// State for a realm with no host backing (introspection only).
    pub fn new(realm: Realm) -> Rc<JsScriptState> {
        Self::with_context(realm, None, None)
    }

    /// State for a DOM-backed realm.
    pub fn with_context(
        realm: Realm,
        context: Option<Rc<dyn ExecutionContext>>,
        window: Option<ObjectRef>,
    ) -> Rc<JsScriptState> {
        debug_assert_eq!(realm.script_type(), ScriptType::Js);
        Rc::new(JsScriptState {
            realm,
            context,
            window,
        })
    }
}

impl ScriptState for JsScriptState {
    fn script_type(&self) -> ScriptType {
        ScriptType::Js
    }

    fn realm(&self) -> &Realm {
        &self.realm
    }

    fn execution_context(&self) -> Option<Rc<dyn ExecutionContext>> {
        self.context.clone()
    }

    fn dom_window(&self) -> Option<ObjectRef> {
        self.window.clone()
    }
}

/// Ruby execution environment: one per binding context.
pub struct RbScriptState {
    realm: Realm,
    context: Option<Rc<dyn ExecutionContext>>,
    window: Option<ObjectRef>,
}

impl RbScriptState {
    /// State for a realm with no host backing.
    pub fn new(realm: Realm) -> Rc<RbScriptState> {
        Self::with_context(realm, None, None)
    }

    /// State for a DOM-backed binding.
    pub fn with_context(
        realm: Realm,
        context: Option<Rc<dyn ExecutionContext>>,
        window: Option<ObjectRef>,
    ) -> Rc<RbScriptState> {
        debug_assert_eq!(realm.script_type(), ScriptType::Rb);
        Rc::new(RbScriptState {
            realm,
            context,
            window,
        })
    }
}

impl ScriptState for RbScriptState {
    fn script_type(&self) -> ScriptType {
        ScriptType::Rb
    }

    fn realm(&self) -> &Realm {
        &self.realm
    }

    fn execution_context(&self) -> Option<Rc<dyn ExecutionContext>> {
        self.context.clone()
    }

    fn dom_window(&self) -> Option<ObjectRef> {
        self.window.clone()
    }
}

/// Keeps a state's global alive for the duration of an async callback.
///
/// The guard roots the state's global object in its realm, so the engine
/// cannot collect the environment while a host callback is in flight.
pub struct ScriptStateProtectedPtr {
    state: Rc<dyn ScriptState>,
    _global_root: RootedValue,
}

impl ScriptStateProtectedPtr {
    /// Protect `state` until the guard drops.
    pub fn new(state: Rc<dyn ScriptState>) -> ScriptStateProtectedPtr {
        let global = Value::Object(state.realm().global_object());
        let root = state.realm().root(global);
        ScriptStateProtectedPtr {
            state,
            _global_root: root,
        }
    }

    /// The protected state.
    pub fn get(&self) -> &Rc<dyn ScriptState> {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_carries_its_type() {
        let js = JsScriptState::new(Realm::new(ScriptType::Js));
        let rb = RbScriptState::new(Realm::new(ScriptType::Rb));
        assert_eq!(js.script_type(), ScriptType::Js);
        assert_eq!(rb.script_type(), ScriptType::Rb);
        assert!(js.dom_window().is_none());
        assert!(js.execution_context().is_none());
    }

    #[test]
    fn test_had_exception_polls() {
        let realm = Realm::new(ScriptType::Js);
        let state = JsScriptState::new(realm.clone());
        assert!(!state.had_exception());
        realm.set_exception(Value::string("err"));
        assert!(state.had_exception());
        assert!(state.had_exception());
        realm.take_exception();
        assert!(!state.had_exception());
    }

    #[test]
    fn test_protected_ptr_roots_global() {
        let realm = Realm::new(ScriptType::Rb);
        let state: Rc<dyn ScriptState> = RbScriptState::new(realm.clone());
        assert_eq!(realm.root_count(), 0);
        let protected = ScriptStateProtectedPtr::new(state);
        assert_eq!(realm.root_count(), 1);
        assert_eq!(protected.get().script_type(), ScriptType::Rb);
        drop(protected);
        assert_eq!(realm.root_count(), 0);
    }

    #[test]
    fn test_eval_toggle_reaches_realm() {
        let realm = Realm::new(ScriptType::Js);
        let state = JsScriptState::new(realm.clone());
        assert!(state.eval_enabled());
        state.set_eval_enabled(false);
        assert!(!realm.eval_enabled());
    }
}
