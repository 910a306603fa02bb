//! Ruby hook adapter
//!
//! MRI-style debugging is one process-wide event stream: every line, call,
//! return and raise in the interpreter arrives at a single hook tagged with
//! an event kind and the current source file. The adapter turns that stream
//! into the shared core's frame chain and pause decisions.
//!
//! Two quirks of the stream matter. Line events can repeat for the same
//! line, so they are deduped against the last executed line. And the hook
//! fires for the adapter's own work too (creating a binding runs Ruby code),
//! so event processing is suppressed while the adapter manipulates frames.

use crate::call_frame::{CallFrame, TextPosition};
use crate::server::{PauseOnExceptionsState, ScriptDebugServer};
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tandem_core::{ScriptType, Value};

/// Interpreter event kinds, as delivered by the global hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RubyEvent {
    /// A new source line is executing
    Line,
    /// A method was called
    Call,
    /// A method is returning
    Return,
    /// An exception was raised
    Raise,
    /// A class body was entered
    Class,
    /// A class body ended
    End,
    /// A C-implemented method was called
    CCall,
    /// A C-implemented method returned
    CReturn,
}

/// Process-wide map from source filenames to stable source ids.
///
/// Owned by the runtime and shared with whatever needs to translate
/// filenames (the adapter, breakpoint front ends); ids start at 1 because 0
/// is the invalid source id.
#[derive(Debug, Default)]
pub struct SourceIdRegistry {
    ids: DashMap<String, i64>,
    next_id: AtomicI64,
}

impl SourceIdRegistry {
    /// An empty registry.
    pub fn new() -> SourceIdRegistry {
        SourceIdRegistry {
            ids: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// The id for `filename`, allocating on first sight.
    pub fn source_id_for(&self, filename: &str) -> i64 {
        if let Some(id) = self.ids.get(filename) {
            return *id;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        *self
            .ids
            .entry(filename.to_string())
            .or_insert(id)
            .value()
    }

    /// How many files have been seen.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no file has been seen.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn is_valid_url(filename: &str) -> bool {
    filename.contains("://")
}

/// The Ruby debug server: the shared state machine plus the global
/// event-hook adapter.
pub struct RbDebugServer {
    core: ScriptDebugServer,
    process_events: Cell<bool>,
    parsed_script_ids: FxHashSet<i64>,
    registry: Arc<SourceIdRegistry>,
}

impl RbDebugServer {
    /// A fresh server with its own source registry.
    pub fn new() -> RbDebugServer {
        Self::with_registry(Arc::new(SourceIdRegistry::new()))
    }

    /// A fresh server sharing an existing source registry.
    pub fn with_registry(registry: Arc<SourceIdRegistry>) -> RbDebugServer {
        RbDebugServer {
            core: ScriptDebugServer::new(ScriptType::Rb),
            process_events: Cell::new(true),
            parsed_script_ids: FxHashSet::default(),
            registry,
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

    /// The filename → source id map this server consults.
    pub fn source_registry(&self) -> &Arc<SourceIdRegistry> {
        &self.registry
    }

    fn create_current_call_frame(&mut self, source_id: i64, line: i64, binding: Value) {
        // Building a binding executes interpreter code, which would re-fire
        // the hook; suppress processing for the duration.
        self.process_events.set(false);
        let guard = scopeguard::guard(&self.process_events, |flag| flag.set(true));

        let position = TextPosition::from_one_based_line(line, 0);
        let frame = CallFrame::create(
            ScriptType::Rb,
            self.core.current_call_frame(),
            source_id,
            position,
            String::new(),
            binding,
        );
        self.core.set_current_call_frame(Some(frame));
        self.core.note_entered_source(source_id);
        drop(guard);
    }

    fn update_current_call_frame(&mut self, source_id: i64, line: i64, binding: Value) {
        let Some(current) = self.core.current_call_frame() else {
            self.create_current_call_frame(source_id, line, binding);
            return;
        };
        self.process_events.set(false);
        let guard = scopeguard::guard(&self.process_events, |flag| flag.set(true));
        current.update(
            source_id,
            TextPosition::from_one_based_line(line, 0),
            binding,
        );
        drop(guard);
    }

    /// Feed one interpreter event through the state machine.
    ///
    /// `line` is one-based, as the interpreter reports it. `binding` is the
    /// engine handle for evaluating in the current scope.
    pub fn process_event(&mut self, event: RubyEvent, filename: &str, line: i64, binding: Value) {
        if !self.process_events.get() {
            return;
        }
        if filename.is_empty() {
            return;
        }
        let source_id = self.registry.source_id_for(filename);

        if !self.parsed_script_ids.contains(&source_id) && is_valid_url(filename) {
            if self.core.current_call_frame().is_none() {
                self.create_current_call_frame(source_id, line, binding.clone());
            }
            self.parsed_script_ids.insert(source_id);
            self.core.dispatch_did_parse_source(source_id, filename);
        }

        match event {
            RubyEvent::Line => {
                // Line events can fire repeatedly for the same line; never
                // pause twice without leaving it.
                if self.core.last_executed_line() == line - 1 {
                    return;
                }
                self.update_current_call_frame(source_id, line, binding);
                self.core.pause_if_needed();
            }
            RubyEvent::Call => {
                self.create_current_call_frame(source_id, line, binding);
                self.core.pause_if_needed();
            }
            RubyEvent::Return => {
                self.update_current_call_frame(source_id, line, binding);
                self.core.pause_if_needed();
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
            RubyEvent::Raise => {
                if self.core.is_paused() {
                    return;
                }
                // The interpreter does not say whether a handler exists;
                // assume unhandled.
                let has_handler = false;
                match self.core.pause_on_exceptions_state() {
                    PauseOnExceptionsState::PauseOnAllExceptions => {
                        self.core.set_pause_on_next_statement(true);
                    }
                    PauseOnExceptionsState::PauseOnUncaughtExceptions if !has_handler => {
                        self.core.set_pause_on_next_statement(true);
                    }
                    _ => {}
                }
                self.update_current_call_frame(source_id, line, binding);
                self.core.pause_if_needed();
            }
            RubyEvent::Class | RubyEvent::End | RubyEvent::CCall | RubyEvent::CReturn => {}
        }
    }

    /// The main frame's window object was cleared: forget announced sources
    /// so they re-announce on the next load.
    pub fn did_clear_main_frame_window_object(&mut self) {
        self.parsed_script_ids.clear();
    }
}

impl Default for RbDebugServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_registry_is_stable() {
        let registry = SourceIdRegistry::new();
        let a = registry.source_id_for("https://example.com/app.rb");
        let b = registry.source_id_for("https://example.com/lib.rb");
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(registry.source_id_for("https://example.com/app.rb"), a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_url_detection() {
        assert!(is_valid_url("https://example.com/app.rb"));
        assert!(!is_valid_url("(eval)"));
        assert!(!is_valid_url("app.rb"));
    }
}
