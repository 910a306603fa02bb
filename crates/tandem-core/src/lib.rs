//! # Tandem Core
//!
//! Engine-agnostic abstractions for running two scripting engines
//! (JavaScript and Ruby) against the same host:
//!
//! - [`ScriptType`] — the closed engine tag plus MIME-type classification
//! - [`Value`] / [`ObjectRef`] — the live-heap value handle the bridge wraps
//! - [`Realm`] — one engine instance's rooted heap, exception slot and
//!   evaluator hook
//! - [`ScriptValue`] / [`ScriptValueDelegate`] — the polymorphic value handle
//!   whose behavior is supplied per engine
//! - [`ScriptState`] — one executing script's environment
//!
//! Cross-engine misuse (comparing a JS value against a Ruby state, say) is a
//! programmer error, not a runtime fault: every mixed-type operation fails
//! softly with a neutral value instead of panicking.

#![warn(clippy::all)]

pub mod array_buffer;
pub mod call_stack;
pub mod realm;
pub mod script_state;
pub mod script_type;
pub mod script_value;
pub mod value;

pub use array_buffer::{ArrayBufferData, ViewKind};
pub use call_stack::{ScriptCallFrameInfo, ScriptCallStack};
pub use realm::{EvalResult, Realm, RootedValue, SourceCode};
pub use script_state::{
    ExecutionContext, JsScriptState, RbScriptState, ScriptState, ScriptStateProtectedPtr,
};
pub use script_type::{ScriptType, ScriptTypeRegistry};
pub use script_value::{
    CROSS_ENGINE_STRING_ERROR, JsScriptValue, RbScriptValue, ScriptValue, ScriptValueDelegate,
};
pub use value::{FileData, ObjectKind, ObjectRef, RegExpFlags, Value};
