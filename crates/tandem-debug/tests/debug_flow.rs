//! End-to-end pause/step scenarios driven through the engine hook adapters.
//!
//! The nested command loop makes these tests single-threaded-friendly:
//! queueing a command on the handle before triggering a pause means the loop
//! consumes it immediately. The one cross-thread test resumes a genuinely
//! parked server from another thread.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::Value;
use tandem_debug::{
    CallFrame, JsDebugServer, JsFrameInfo, PauseOnExceptionsState, RbDebugServer, RubyEvent,
    ScriptBreakpoint, ScriptDebugListener, SourceIdRegistry,
};

#[derive(Default)]
struct RecordingListener {
    pauses: Cell<usize>,
    continues: Cell<usize>,
    pause_lines: RefCell<Vec<i64>>,
    parsed: RefCell<Vec<String>>,
}

impl ScriptDebugListener for RecordingListener {
    fn did_pause(&self, frame: &CallFrame) {
        self.pauses.set(self.pauses.get() + 1);
        self.pause_lines
            .borrow_mut()
            .push(frame.position().one_based_line());
    }

    fn did_continue(&self) {
        self.continues.set(self.continues.get() + 1);
    }

    fn did_parse_source(&self, _source_id: i64, url: &str) {
        self.parsed.borrow_mut().push(url.to_string());
    }
}

fn frame(source_id: i64, line: i64) -> JsFrameInfo {
    JsFrameInfo {
        source_id,
        line,
        column: 0,
        function_name: String::new(),
        scope: Value::Undefined,
    }
}

fn js_server_with_listener() -> (JsDebugServer, Rc<RecordingListener>) {
    let mut server = JsDebugServer::new();
    let listener = Rc::new(RecordingListener::default());
    server.core_mut().add_listener(listener.clone());
    (server, listener)
}

#[test]
fn test_breakpoint_pauses_and_same_line_does_not_repause() {
    let (mut server, listener) = js_server_with_listener();
    let result = server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::new(4, 0));
    assert_eq!(result.breakpoint_id, "1:4:0");

    server.will_execute_program(&frame(1, 1));
    assert_eq!(listener.pauses.get(), 0);

    // Line 5 (one-based) is zero-based line 4: hit.
    server.core().handle().continue_program();
    server.at_statement(&frame(1, 5));
    assert_eq!(listener.pauses.get(), 1);
    assert_eq!(listener.continues.get(), 1);
    assert!(!server.core().is_paused());

    // Hitting line 5 again without leaving it must not re-pause.
    server.at_statement(&frame(1, 5));
    assert_eq!(listener.pauses.get(), 1);

    // Leave the line and come back: eligible again.
    server.at_statement(&frame(1, 6));
    server.core().handle().continue_program();
    server.at_statement(&frame(1, 5));
    assert_eq!(listener.pauses.get(), 2);
    assert_eq!(listener.pause_lines.borrow().as_slice(), &[5, 5]);
}

#[test]
fn test_duplicate_breakpoint_set_is_idempotent() {
    let (mut server, _listener) = js_server_with_listener();
    let first = server
        .core_mut()
        .set_breakpoint(9, ScriptBreakpoint::new(5, 0));
    let second = server
        .core_mut()
        .set_breakpoint(9, ScriptBreakpoint::new(5, 0));
    assert!(!first.breakpoint_id.is_empty());
    assert!(second.breakpoint_id.is_empty());
}

#[test]
fn test_step_into_pauses_at_next_statement() {
    let (mut server, listener) = js_server_with_listener();
    server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::new(2, 0));

    server.will_execute_program(&frame(1, 1));
    server.core().handle().step_into_statement();
    server.at_statement(&frame(1, 3)); // hit breakpoint, step-into queued
    assert_eq!(listener.pauses.get(), 1);

    // The very next statement pauses again.
    server.core().handle().continue_program();
    server.at_statement(&frame(1, 4));
    assert_eq!(listener.pauses.get(), 2);
    assert_eq!(listener.pause_lines.borrow().as_slice(), &[3, 4]);
}

#[test]
fn test_step_over_skips_callee_frames() {
    let (mut server, listener) = js_server_with_listener();
    server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::new(4, 0));

    server.will_execute_program(&frame(1, 1));
    server.core().handle().step_over_statement();
    server.at_statement(&frame(1, 5)); // breakpoint; step-over queued
    assert_eq!(listener.pauses.get(), 1);

    // Enter a callee: its statements must not pause.
    server.call_event(&frame(1, 20));
    server.at_statement(&frame(1, 21));
    server.at_statement(&frame(1, 22));
    assert_eq!(listener.pauses.get(), 1);

    // Return to the stepped frame: the next statement pauses.
    server.return_event(&frame(1, 23));
    server.core().handle().continue_program();
    server.at_statement(&frame(1, 6));
    assert_eq!(listener.pauses.get(), 2);
    assert_eq!(listener.pause_lines.borrow().as_slice(), &[5, 6]);
}

#[test]
fn test_step_out_pauses_in_caller() {
    let (mut server, listener) = js_server_with_listener();
    server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::new(20, 0));

    server.will_execute_program(&frame(1, 1));
    server.call_event(&frame(1, 20)); // enter callee
    server.core().handle().step_out_of_function();
    server.at_statement(&frame(1, 21)); // breakpoint inside callee
    assert_eq!(listener.pauses.get(), 1);

    server.at_statement(&frame(1, 22)); // still in callee: no pause
    assert_eq!(listener.pauses.get(), 1);

    server.return_event(&frame(1, 23));
    server.core().handle().continue_program();
    server.at_statement(&frame(1, 6)); // back in the caller: pause
    assert_eq!(listener.pauses.get(), 2);
}

#[test]
fn test_pause_on_all_exceptions() {
    let (mut server, listener) = js_server_with_listener();
    server
        .core_mut()
        .set_pause_on_exceptions_state(PauseOnExceptionsState::PauseOnAllExceptions);

    server.will_execute_program(&frame(1, 1));
    server.core().handle().continue_program();
    server.exception(&frame(1, 7), true);
    assert_eq!(listener.pauses.get(), 1);
}

#[test]
fn test_pause_on_uncaught_exceptions_only() {
    let (mut server, listener) = js_server_with_listener();
    server
        .core_mut()
        .set_pause_on_exceptions_state(PauseOnExceptionsState::PauseOnUncaughtExceptions);

    server.will_execute_program(&frame(1, 1));
    server.exception(&frame(1, 7), true); // handled: no pause
    assert_eq!(listener.pauses.get(), 0);

    server.core().handle().continue_program();
    server.exception(&frame(1, 9), false); // unhandled: pause
    assert_eq!(listener.pauses.get(), 1);
}

#[test]
fn test_breakpoint_conditions() {
    let (mut server, listener) = js_server_with_listener();
    server.core_mut().set_condition_evaluator(|_frame, condition| match condition {
        "hit" => Ok(true),
        "miss" => Ok(false),
        _ => Err(()),
    });
    server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::with_condition(4, 0, "miss"));
    server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::with_condition(6, 0, "hit"));
    // A throwing condition counts as false, never as "pause".
    server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::with_condition(8, 0, "boom"));

    server.will_execute_program(&frame(1, 1));
    server.at_statement(&frame(1, 5)); // condition false
    assert_eq!(listener.pauses.get(), 0);

    server.core().handle().continue_program();
    server.at_statement(&frame(1, 7)); // condition true
    assert_eq!(listener.pauses.get(), 1);

    server.at_statement(&frame(1, 9)); // condition throws
    assert_eq!(listener.pauses.get(), 1);
}

#[test]
fn test_cross_thread_resume() {
    let (mut server, listener) = js_server_with_listener();
    server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::new(4, 0));

    let handle = server.core().handle();
    let resumer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        handle.continue_program();
    });

    server.will_execute_program(&frame(1, 1));
    // Blocks in the nested loop until the other thread resumes us.
    server.at_statement(&frame(1, 5));
    resumer.join().unwrap();

    assert_eq!(listener.pauses.get(), 1);
    assert_eq!(listener.continues.get(), 1);
    assert!(!server.core().is_paused());
}

#[test]
fn test_host_task_pump_runs_while_paused() {
    let (mut server, _listener) = js_server_with_listener();
    let pumped = Rc::new(Cell::new(0usize));
    let pumped_clone = pumped.clone();
    server.core_mut().set_host_task_pump(move || {
        pumped_clone.set(pumped_clone.get() + 1);
    });
    server
        .core_mut()
        .set_breakpoint(1, ScriptBreakpoint::new(4, 0));

    let handle = server.core().handle();
    let resumer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        handle.continue_program();
    });

    server.will_execute_program(&frame(1, 1));
    server.at_statement(&frame(1, 5));
    resumer.join().unwrap();

    assert!(pumped.get() > 0, "host tasks must keep flowing while paused");
}

#[test]
fn test_ruby_line_events_dedupe_same_line() {
    let mut server = RbDebugServer::new();
    let listener = Rc::new(RecordingListener::default());
    server.core_mut().add_listener(listener.clone());

    let url = "https://example.com/app.rb";
    let source_id = server.source_registry().source_id_for(url);
    server
        .core_mut()
        .set_breakpoint(source_id, ScriptBreakpoint::new(4, 0));

    server.core().handle().continue_program();
    server.process_event(RubyEvent::Line, url, 5, Value::Null);
    assert_eq!(listener.pauses.get(), 1);

    // The interpreter fires Line again for the same line.
    server.process_event(RubyEvent::Line, url, 5, Value::Null);
    assert_eq!(listener.pauses.get(), 1);

    server.process_event(RubyEvent::Line, url, 6, Value::Null);
    server.core().handle().continue_program();
    server.process_event(RubyEvent::Line, url, 5, Value::Null);
    assert_eq!(listener.pauses.get(), 2);
}

#[test]
fn test_ruby_announces_url_sources_once() {
    let mut server = RbDebugServer::new();
    let listener = Rc::new(RecordingListener::default());
    server.core_mut().add_listener(listener.clone());

    let url = "https://example.com/app.rb";
    server.process_event(RubyEvent::Line, url, 1, Value::Null);
    server.process_event(RubyEvent::Line, url, 2, Value::Null);
    // Non-URL filenames (eval frames) are never announced.
    server.process_event(RubyEvent::Line, "(eval)", 1, Value::Null);

    assert_eq!(listener.parsed.borrow().as_slice(), &[url.to_string()]);

    // A cleared window object re-announces on next sight.
    server.did_clear_main_frame_window_object();
    server.process_event(RubyEvent::Line, url, 3, Value::Null);
    assert_eq!(listener.parsed.borrow().len(), 2);
}

#[test]
fn test_ruby_call_and_return_maintain_frame_chain() {
    let mut server = RbDebugServer::new();
    let listener = Rc::new(RecordingListener::default());
    server.core_mut().add_listener(listener.clone());

    let url = "https://example.com/app.rb";
    server.process_event(RubyEvent::Line, url, 1, Value::Null);
    let outer = server.core().current_call_frame().unwrap();

    server.process_event(RubyEvent::Call, url, 10, Value::Null);
    let inner = server.core().current_call_frame().unwrap();
    assert!(inner.caller().is_some());
    assert!(!Rc::ptr_eq(&inner, &outer));

    server.process_event(RubyEvent::Return, url, 12, Value::Null);
    let after = server.core().current_call_frame().unwrap();
    assert!(Rc::ptr_eq(&after, &outer));
}

#[test]
fn test_ruby_raise_respects_exception_mode() {
    let mut server = RbDebugServer::new();
    let listener = Rc::new(RecordingListener::default());
    server.core_mut().add_listener(listener.clone());
    let url = "https://example.com/app.rb";

    server.process_event(RubyEvent::Raise, url, 3, Value::Null);
    assert_eq!(listener.pauses.get(), 0);

    server
        .core_mut()
        .set_pause_on_exceptions_state(PauseOnExceptionsState::PauseOnAllExceptions);
    server.core().handle().continue_program();
    server.process_event(RubyEvent::Raise, url, 4, Value::Null);
    assert_eq!(listener.pauses.get(), 1);
}

#[test]
fn test_shared_source_registry_across_servers() {
    let registry = Arc::new(SourceIdRegistry::new());
    let server_a = RbDebugServer::with_registry(registry.clone());
    let server_b = RbDebugServer::with_registry(registry.clone());
    let id_a = server_a
        .source_registry()
        .source_id_for("https://example.com/shared.rb");
    let id_b = server_b
        .source_registry()
        .source_id_for("https://example.com/shared.rb");
    assert_eq!(id_a, id_b);
    assert_eq!(registry.len(), 1);
}
