//! Per-frame, per-engine execution entry points
//!
//! A `ScriptController` owns one engine realm for one frame. Its
//! `execute_script` is the policy-gated entry: disallowed or paused
//! execution is a silent no-op returning the empty value, and an engine
//! exception during evaluation is reported to the owning document's console,
//! never thrown across the controller boundary.

use crate::host::{Frame, ReasonForCallingCanExecuteScripts};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tandem_core::{
    JsScriptState, RbScriptState, Realm, ScriptState, ScriptType, ScriptValue, SourceCode, Value,
};
use tandem_debug::DebugServerHandle;
use tracing::debug;

/// One engine's script machinery for one frame.
pub struct ScriptController {
    frame: Rc<Frame>,
    script_type: ScriptType,
    realm: Realm,
    paused: Cell<bool>,
    source_url: RefCell<Option<String>>,
    debugger: RefCell<Option<DebugServerHandle>>,
    disable_eval_message: RefCell<Option<String>>,
}

impl ScriptController {
    /// A controller for `script_type` owned by `frame`.
    pub fn new(frame: Rc<Frame>, script_type: ScriptType) -> ScriptController {
        ScriptController {
            frame,
            script_type,
            realm: Realm::new(script_type),
            paused: Cell::new(false),
            source_url: RefCell::new(None),
            debugger: RefCell::new(None),
            disable_eval_message: RefCell::new(None),
        }
    }

    /// The engine this controller drives.
    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    /// The engine realm.
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// The owning frame.
    pub fn frame(&self) -> &Rc<Frame> {
        &self.frame
    }

    /// The main-world execution environment for this controller.
    pub fn script_state(&self) -> Rc<dyn ScriptState> {
        let context = self
            .frame
            .document()
            .map(|d| d as Rc<dyn tandem_core::ExecutionContext>);
        let window = Some(self.realm.global_object());
        match self.script_type {
            ScriptType::Js => JsScriptState::with_context(self.realm.clone(), context, window),
            ScriptType::Rb => RbScriptState::with_context(self.realm.clone(), context, window),
        }
    }

    /// Whether this frame may run script right now.
    pub fn can_execute_scripts(&self, reason: ReasonForCallingCanExecuteScripts) -> bool {
        self.frame.can_execute_scripts(reason)
    }

    /// Pause or resume this controller. Paused controllers no-op every
    /// execution request.
    pub fn set_paused(&self, paused: bool) {
        self.paused.set(paused);
    }

    /// Whether this controller is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    /// URL of the script being evaluated right now, if any.
    pub fn source_url(&self) -> Option<String> {
        self.source_url.borrow().clone()
    }

    /// Run `script` against the current document.
    pub fn execute_script(&self, script: &str) -> ScriptValue {
        let url = self.frame.document().map(|d| d.url()).unwrap_or_default();
        self.execute_script_source(&SourceCode::new(script, url))
    }

    /// Run a source. Disallowed or paused execution returns the empty value
    /// without evaluating anything.
    pub fn execute_script_source(&self, source: &SourceCode) -> ScriptValue {
        if !self.can_execute_scripts(ReasonForCallingCanExecuteScripts::AboutToExecuteScript)
            || self.is_paused()
        {
            return ScriptValue::empty();
        }

        // Script execution can detach the document and frame that own this
        // controller; hold the frame until evaluation finishes.
        let _protect = self.frame.clone();

        self.evaluate(source)
    }

    fn evaluate(&self, source: &SourceCode) -> ScriptValue {
        *self.source_url.borrow_mut() = Some(source.url.clone());

        if let Some(message) = self.disable_eval_message.borrow_mut().take() {
            self.realm.set_exception(Value::string(message));
        }

        let result = if self.realm.has_exception() {
            Err(self.realm.take_exception().unwrap_or(Value::Undefined))
        } else {
            self.realm.evaluate(source)
        };

        *self.source_url.borrow_mut() = None;

        match result {
            Ok(value) => ScriptValue::for_realm(&self.realm, value),
            Err(exception) => {
                self.report_exception(&exception, &source.url);
                // The exception stops at the controller boundary.
                self.realm.take_exception();
                ScriptValue::empty()
            }
        }
    }

    fn report_exception(&self, exception: &Value, source_url: &str) {
        let message = ScriptValue::for_realm(&self.realm, exception.clone())
            .delegate()
            .coerce_to_string();
        debug!(engine = %self.script_type, url = %source_url, "script exception: {}", message);
        if let Some(document) = self.frame.document() {
            use tandem_core::ExecutionContext;
            document.report_exception(&message, source_url, 0);
        }
    }

    /// Allow `eval` again.
    pub fn enable_eval(&self) {
        self.disable_eval_message.borrow_mut().take();
        self.realm.set_eval_enabled(true);
    }

    /// Forbid `eval`; `error_message` is raised when something tries.
    pub fn disable_eval(&self, error_message: &str) {
        *self.disable_eval_message.borrow_mut() = Some(error_message.to_string());
        self.realm.set_eval_enabled(false);
    }

    /// The document changed identity (navigation); rebind the global.
    pub fn update_document(&self) {
        debug!(engine = %self.script_type, "updateDocument");
    }

    /// The document's security origin changed.
    pub fn update_security_origin(&self) {}

    /// Platform-specific script objects changed.
    pub fn update_platform_script_objects(&self) {}

    /// Drop every binding the page installed on the global.
    pub fn clear_script_objects(&self) {
        self.realm.global_object().clear_properties();
    }

    /// Replace the window shell for a new window object.
    ///
    /// Going into the page cache keeps the global's bindings so the page can
    /// be restored; a real teardown clears them.
    pub fn clear_window_shell(&self, going_into_page_cache: bool) {
        if !going_into_page_cache {
            self.realm.global_object().clear_properties();
        }
        self.realm.take_exception();
    }

    /// Attach a debugger front-end handle to this controller's engine.
    pub fn attach_debugger(&self, handle: DebugServerHandle) {
        *self.debugger.borrow_mut() = Some(handle);
    }

    /// Detach the debugger.
    pub fn detach_debugger(&self) {
        self.debugger.borrow_mut().take();
    }

    /// The attached debugger handle, if any.
    pub fn debugger(&self) -> Option<DebugServerHandle> {
        self.debugger.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::host::{Document, SandboxFlags};

    fn frame_with_document() -> Rc<Frame> {
        let frame = Frame::new(RuntimeConfig::default());
        frame.set_document(Document::new("https://example.com/"));
        frame
    }

    #[test]
    fn test_execute_returns_engine_value() {
        let frame = frame_with_document();
        let controller = ScriptController::new(frame, ScriptType::Js);
        controller
            .realm()
            .set_evaluator(|_, source| Ok(Value::Int(source.source.len() as i64)));
        let result = controller.execute_script("1 + 1");
        assert_eq!(result.as_int32(), 5);
        assert_eq!(result.script_type(), Some(ScriptType::Js));
    }

    #[test]
    fn test_sandboxed_execution_is_silent_noop() {
        let frame = frame_with_document();
        frame
            .document()
            .unwrap()
            .set_sandbox_flags(SandboxFlags::SCRIPTS);
        let controller = ScriptController::new(frame.clone(), ScriptType::Js);
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();
        controller.realm().set_evaluator(move |_, _| {
            ran_clone.set(true);
            Ok(Value::Undefined)
        });

        let result = controller.execute_script("1");
        assert!(result.has_no_value());
        assert!(!ran.get(), "sandboxed execution must not evaluate");
    }

    #[test]
    fn test_paused_controller_noops() {
        let frame = frame_with_document();
        let controller = ScriptController::new(frame, ScriptType::Rb);
        controller.set_paused(true);
        assert!(controller.execute_script("puts 1").has_no_value());
        controller.set_paused(false);
        assert!(!controller.is_paused());
    }

    #[test]
    fn test_exception_reported_to_console_not_thrown() {
        let frame = frame_with_document();
        let document = frame.document().unwrap();
        let controller = ScriptController::new(frame, ScriptType::Js);
        controller
            .realm()
            .set_evaluator(|_, _| Err(Value::string("ReferenceError: nope")));

        let result = controller.execute_script("nope");
        assert!(result.has_no_value());
        let messages = document.console().messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].message.contains("ReferenceError"));
        // The exception does not stay pending past the boundary.
        assert!(!controller.realm().has_exception());
    }

    #[test]
    fn test_disable_eval_raises_pending_message() {
        let frame = frame_with_document();
        let document = frame.document().unwrap();
        let controller = ScriptController::new(frame, ScriptType::Rb);
        controller.disable_eval("eval is disabled on this page");
        assert!(!controller.realm().eval_enabled());

        let result = controller.execute_script("eval('1')");
        assert!(result.has_no_value());
        assert!(
            document.console().messages()[0]
                .message
                .contains("eval is disabled")
        );

        controller.enable_eval();
        assert!(controller.realm().eval_enabled());
    }

    #[test]
    fn test_source_url_tracks_evaluation() {
        let frame = frame_with_document();
        let controller = ScriptController::new(frame, ScriptType::Js);
        assert!(controller.source_url().is_none());
        controller.execute_script("x");
        // Cleared once evaluation finishes.
        assert!(controller.source_url().is_none());
    }

    #[test]
    fn test_clear_window_shell_honors_page_cache() {
        let frame = frame_with_document();
        let controller = ScriptController::new(frame, ScriptType::Js);
        controller
            .realm()
            .global_object()
            .set_property("page_state", Value::Int(1));

        controller.clear_window_shell(true);
        assert!(
            controller
                .realm()
                .global_object()
                .get_property("page_state")
                .is_some()
        );

        controller.clear_window_shell(false);
        assert!(
            controller
                .realm()
                .global_object()
                .get_property("page_state")
                .is_none()
        );
    }
}
