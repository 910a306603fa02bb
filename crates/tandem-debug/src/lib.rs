//! # Tandem Debug
//!
//! The debugger state machine of the tandem bridge: breakpoints, the
//! pause/step/continue lifecycle, and the paused call-frame chain. The state
//! machine is shared between engines; each engine contributes only a hook
//! adapter that translates its native boundary events (JSC's debugger
//! callbacks, MRI's global event hook) into the shared core.
//!
//! While paused, the server runs a nested command loop: a front end on any
//! thread resumes or steps through a [`DebugServerHandle`], and an optional
//! host task pump keeps timers and events alive under the parked script.

#![warn(clippy::all)]

pub mod breakpoint;
pub mod call_frame;
pub mod js;
pub mod listener;
pub mod rb;
pub mod server;

pub use breakpoint::{BreakpointStore, ScriptBreakpoint, SetBreakpointResult};
pub use call_frame::{CallFrame, TextPosition};
pub use js::{JsDebugServer, JsFrameInfo};
pub use listener::ScriptDebugListener;
pub use rb::{RbDebugServer, RubyEvent, SourceIdRegistry};
pub use server::{
    DebugServerHandle, DebuggerCommand, PauseOnExceptionsState, ScriptDebugServer,
};
