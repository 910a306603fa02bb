//! Fan-out over both engines' controllers
//!
//! The manager owns one controller per engine, created with the frame and
//! living as long as it does. Lifecycle operations broadcast to every
//! controller in insertion order (JS first, then Ruby), so cross-engine
//! ordering is deterministic even though nothing may depend on it.

use crate::controller::ScriptController;
use crate::host::{Frame, Node, ReasonForCallingCanExecuteScripts};
use std::rc::Rc;
use tandem_core::{ScriptState, ScriptType, ScriptValue};

/// Both engines' controllers for one frame.
pub struct ScriptManager {
    frame: Rc<Frame>,
    controllers: Vec<ScriptController>,
}

impl ScriptManager {
    /// Build the per-engine controllers for `frame`.
    pub fn new(frame: Rc<Frame>) -> ScriptManager {
        let controllers = ScriptType::all()
            .into_iter()
            .map(|script_type| ScriptController::new(frame.clone(), script_type))
            .collect();
        ScriptManager { frame, controllers }
    }

    /// The owning frame.
    pub fn frame(&self) -> &Rc<Frame> {
        &self.frame
    }

    /// The controller for one engine.
    pub fn controller(&self, script_type: ScriptType) -> &ScriptController {
        self.controllers
            .iter()
            .find(|controller| controller.script_type() == script_type)
            .expect("a controller exists for every ScriptType")
    }

    /// Run `operation` on every controller, in insertion order.
    pub fn call_on_all(&self, mut operation: impl FnMut(&ScriptController)) {
        for controller in &self.controllers {
            operation(controller);
        }
    }

    /// Whether this frame may run script. The answer is engine-independent.
    pub fn can_execute_scripts(&self, reason: ReasonForCallingCanExecuteScripts) -> bool {
        self.frame.can_execute_scripts(reason)
    }

    /// Run `script` on the engine chosen by its MIME classification.
    pub fn execute_script(&self, script_type: ScriptType, script: &str) -> ScriptValue {
        self.controller(script_type).execute_script(script)
    }

    /// Broadcast: the document changed.
    pub fn update_document(&self) {
        self.call_on_all(ScriptController::update_document);
    }

    /// Broadcast: the security origin changed.
    pub fn update_security_origin(&self) {
        self.call_on_all(ScriptController::update_security_origin);
    }

    /// Broadcast: platform script objects changed.
    pub fn update_platform_script_objects(&self) {
        self.call_on_all(ScriptController::update_platform_script_objects);
    }

    /// Broadcast: drop page-installed bindings.
    pub fn clear_script_objects(&self) {
        self.call_on_all(ScriptController::clear_script_objects);
    }

    /// Broadcast: allow `eval`.
    pub fn enable_eval(&self) {
        self.call_on_all(ScriptController::enable_eval);
    }

    /// Broadcast: forbid `eval` with a diagnostic message.
    pub fn disable_eval(&self, error_message: &str) {
        self.call_on_all(|controller| controller.disable_eval(error_message));
    }

    /// Broadcast: replace the window shells for a new window object.
    pub fn clear_window_shell(&self, going_into_page_cache: bool) {
        self.call_on_all(|controller| controller.clear_window_shell(going_into_page_cache));
    }

    /// The main-world execution environment for one engine. `None` when the
    /// frame has no document to back it.
    pub fn main_world_script_state(&self, script_type: ScriptType) -> Option<Rc<dyn ScriptState>> {
        self.frame.document()?;
        Some(self.controller(script_type).script_state())
    }

    /// The execution environment reachable from a node. `None` when the
    /// node's frame is gone or script execution is disallowed there.
    pub fn script_state_from_node(
        &self,
        node: &Node,
        script_type: ScriptType,
    ) -> Option<Rc<dyn ScriptState>> {
        let frame = node.frame()?;
        frame.document()?;
        if !frame.can_execute_scripts(ReasonForCallingCanExecuteScripts::NotAboutToExecuteScript) {
            return None;
        }
        Some(self.controller(script_type).script_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::host::{Document, SandboxFlags};
    use tandem_core::Value;

    fn manager() -> ScriptManager {
        let frame = Frame::new(RuntimeConfig::default());
        frame.set_document(Document::new("https://example.com/"));
        ScriptManager::new(frame)
    }

    #[test]
    fn test_one_controller_per_engine() {
        let manager = manager();
        assert_eq!(
            manager.controller(ScriptType::Js).script_type(),
            ScriptType::Js
        );
        assert_eq!(
            manager.controller(ScriptType::Rb).script_type(),
            ScriptType::Rb
        );
    }

    #[test]
    fn test_broadcast_order_is_deterministic() {
        let manager = manager();
        let mut seen = Vec::new();
        manager.call_on_all(|controller| seen.push(controller.script_type()));
        assert_eq!(seen, [ScriptType::Js, ScriptType::Rb]);
    }

    #[test]
    fn test_broadcast_reaches_both_realms() {
        let manager = manager();
        manager.call_on_all(|controller| {
            controller
                .realm()
                .global_object()
                .set_property("shared", Value::Int(1));
        });
        manager.clear_script_objects();
        manager.call_on_all(|controller| {
            assert!(
                controller
                    .realm()
                    .global_object()
                    .get_property("shared")
                    .is_none()
            );
        });
    }

    #[test]
    fn test_disable_eval_broadcast() {
        let manager = manager();
        manager.disable_eval("no eval");
        assert!(!manager.controller(ScriptType::Js).realm().eval_enabled());
        assert!(!manager.controller(ScriptType::Rb).realm().eval_enabled());
        manager.enable_eval();
        assert!(manager.controller(ScriptType::Js).realm().eval_enabled());
    }

    #[test]
    fn test_main_world_state_requires_document() {
        let frame = Frame::new(RuntimeConfig::default());
        let manager = ScriptManager::new(frame);
        assert!(manager.main_world_script_state(ScriptType::Js).is_none());
    }

    #[test]
    fn test_state_from_node_respects_policy() {
        let manager = manager();
        let node = Node::new(manager.frame());
        assert!(manager.script_state_from_node(&node, ScriptType::Js).is_some());

        manager
            .frame()
            .document()
            .unwrap()
            .set_sandbox_flags(SandboxFlags::SCRIPTS);
        assert!(manager.script_state_from_node(&node, ScriptType::Js).is_none());
        // And the refusal produced no console noise (introspection reason).
        assert!(manager.frame().document().unwrap().console().is_empty());
    }

    #[test]
    fn test_state_from_node_with_dead_frame() {
        let manager = manager();
        let node = {
            let orphan = Frame::new(RuntimeConfig::default());
            orphan.set_document(Document::new("https://example.com/orphan"));
            Node::new(&orphan)
        };
        // The node's frame died with its last strong reference.
        assert!(manager.script_state_from_node(&node, ScriptType::Rb).is_none());
    }
}
