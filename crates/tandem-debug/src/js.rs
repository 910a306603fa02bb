//! JavaScript hook adapter
//!
//! JavaScriptCore-style debugging reports explicit boundary callbacks: a
//! call happened, a statement is about to execute, a function returned, an
//! exception was thrown. Each callback funnels into the shared core's
//! `pause_if_needed`. The adapter owns the frame-chain bookkeeping,
//! including the rule that stepping over a return behaves like stepping out.

use crate::call_frame::{CallFrame, TextPosition};
use crate::server::{PauseOnExceptionsState, ScriptDebugServer};
use std::rc::Rc;
use tandem_core::{ScriptType, Value};

/// What the engine knows about the frame a hook fired in.
#[derive(Debug, Clone)]
pub struct JsFrameInfo {
    /// Engine source identifier
    pub source_id: i64,
    /// One-based line
    pub line: i64,
    /// Zero-based column
    pub column: i64,
    /// Executing function, empty for program code
    pub function_name: String,
    /// The engine scope handle for evaluating in this frame
    pub scope: Value,
}

impl JsFrameInfo {
    fn position(&self) -> TextPosition {
        TextPosition::from_one_based_line(self.line, self.column)
    }
}

/// The JavaScript debug server: the shared state machine plus JSC-style
/// boundary hooks.
pub struct JsDebugServer {
    core: ScriptDebugServer,
}

impl JsDebugServer {
    /// A fresh server, running.
    pub fn new() -> JsDebugServer {
        JsDebugServer {
            core: ScriptDebugServer::new(ScriptType::Js),
        }
    }

    /// The shared state machine (breakpoints, stepping, listeners).
    pub fn core(&self) -> &ScriptDebugServer {
        &self.core
    }

    /// Mutable access to the shared state machine.
    pub fn core_mut(&mut self) -> &mut ScriptDebugServer {
        &mut self.core
    }

    fn create_call_frame(&mut self, info: &JsFrameInfo) {
        let frame = CallFrame::create(
            ScriptType::Js,
            self.core.current_call_frame(),
            info.source_id,
            info.position(),
            info.function_name.clone(),
            info.scope.clone(),
        );
        self.core.set_current_call_frame(Some(frame));
        self.core.note_entered_source(info.source_id);
    }

    fn update_call_frame_and_pause_if_needed(&mut self, info: &JsFrameInfo) {
        let Some(current) = self.core.current_call_frame() else {
            return;
        };
        current.update(info.source_id, info.position(), info.scope.clone());
        self.core.pause_if_needed();
    }

    /// A function was entered.
    pub fn call_event(&mut self, info: &JsFrameInfo) {
        if !self.core.is_paused() {
            self.create_call_frame(info);
            self.core.pause_if_needed();
        }
    }

    /// A statement is about to execute.
    pub fn at_statement(&mut self, info: &JsFrameInfo) {
        if !self.core.is_paused() {
            self.update_call_frame_and_pause_if_needed(info);
        }
    }

    /// The current function is returning.
    pub fn return_event(&mut self, info: &JsFrameInfo) {
        if self.core.is_paused() {
            return;
        }
        self.update_call_frame_and_pause_if_needed(info);

        let Some(current) = self.core.current_call_frame() else {
            return;
        };
        // Treat stepping over a return statement like stepping out.
        if self
            .core
            .pause_on_call_frame()
            .is_some_and(|target| Rc::ptr_eq(&target, &current))
        {
            self.core.set_pause_on_call_frame(current.caller());
        }
        self.core.set_current_call_frame(current.caller());
    }

    /// An exception was thrown; `has_handler` says whether anything on the
    /// stack will catch it.
    pub fn exception(&mut self, info: &JsFrameInfo, has_handler: bool) {
        if self.core.is_paused() {
            return;
        }
        match self.core.pause_on_exceptions_state() {
            PauseOnExceptionsState::PauseOnAllExceptions => {
                self.core.set_pause_on_next_statement(true);
            }
            PauseOnExceptionsState::PauseOnUncaughtExceptions if !has_handler => {
                self.core.set_pause_on_next_statement(true);
            }
            _ => {}
        }
        self.update_call_frame_and_pause_if_needed(info);
    }

    /// Top-level program code was entered.
    pub fn will_execute_program(&mut self, info: &JsFrameInfo) {
        if !self.core.is_paused() {
            self.create_call_frame(info);
            self.core.pause_if_needed();
        }
    }

    /// Top-level program code finished.
    pub fn did_execute_program(&mut self, info: &JsFrameInfo) {
        if self.core.is_paused() {
            return;
        }
        self.update_call_frame_and_pause_if_needed(info);

        let Some(current) = self.core.current_call_frame() else {
            return;
        };
        // Stepping over the end of a program behaves like stepping out.
        if self
            .core
            .pause_on_call_frame()
            .is_some_and(|target| Rc::ptr_eq(&target, &current))
        {
            self.core.set_pause_on_call_frame(current.caller());
        }
        self.core.set_current_call_frame(current.caller());
    }

    /// The engine hit a `debugger;` statement or equivalent.
    pub fn did_reach_breakpoint(&mut self, info: &JsFrameInfo) {
        if self.core.is_paused() {
            return;
        }
        self.core.set_pause_on_next_statement(true);
        self.update_call_frame_and_pause_if_needed(info);
    }

    /// A script was parsed (or failed to parse). Listener dispatch is
    /// guarded against re-entry by the core.
    pub fn source_parsed(&mut self, source_id: i64, url: &str, error: Option<(i64, &str)>) {
        match error {
            None => self.core.dispatch_did_parse_source(source_id, url),
            Some((line, message)) => self.core.dispatch_failed_to_parse_source(url, line, message),
        }
    }

    /// The global object this server was attached to is going away: tear
    /// down the frame chain and resume, since there is no point in staying
    /// paused once the window closes.
    pub fn detach(&mut self) {
        if self.core.current_call_frame().is_some() {
            self.core.set_current_call_frame(None);
            self.core.set_pause_on_call_frame(None);
            self.core.continue_program();
        }
    }
}

impl Default for JsDebugServer {
    fn default() -> Self {
        Self::new()
    }
}
