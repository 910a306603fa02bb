//! Debug-event listeners
//!
//! Inspector front ends (or anything else interested in pauses) implement
//! this trait and register with a debug server. Listener dispatch is guarded
//! against re-entry: a listener reacting to `did_pause` cannot cause a second
//! listener pass.

use crate::call_frame::CallFrame;

/// Receives the debug server's lifecycle events.
pub trait ScriptDebugListener {
    /// Execution paused at `frame`.
    fn did_pause(&self, frame: &CallFrame);

    /// Execution resumed.
    fn did_continue(&self);

    /// A new script was seen by the engine.
    fn did_parse_source(&self, source_id: i64, url: &str) {
        let _ = (source_id, url);
    }

    /// A script failed to parse.
    fn failed_to_parse_source(&self, url: &str, error_line: i64, error_message: &str) {
        let _ = (url, error_line, error_message);
    }
}
