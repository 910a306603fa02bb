//! # Tandem Clone
//!
//! The structured-clone codec of the tandem bridge: walks a live object
//! graph in either engine, emits a versioned, explicitly tagged binary
//! format, and reconstructs the graph in either engine — including
//! cross-engine transfer for message passing.
//!
//! Properties the codec guarantees:
//!
//! - Cyclic and shared graphs round-trip through an insertion-ordered object
//!   pool and back-reference tags
//! - Traversal is iterative with an explicit work stack; depth beyond 40 000
//!   reports a result code instead of overflowing the native stack
//! - Timeouts are polled cooperatively every fixed number of visited members
//! - Transfer-listed ArrayBuffers move instead of copying, neutering their
//!   source
//! - Malformed input is a `ValidationError`, never undefined behavior
//!
//! Failures travel as result codes and become engine exceptions only at the
//! outermost public entry point.

#![warn(clippy::all)]

pub mod delegate;
pub mod deserializer;
pub mod serialized;
pub mod serializer;
pub mod tags;
pub mod wire;

pub use delegate::{
    DEFAULT_TICK_INTERVAL, EngineSerializationDelegate, EngineSpec, JsSerializationDelegate,
    JsSpec, RbSerializationDelegate, RbSpec, SerializationDelegate, serialization_delegate_for,
};
pub use deserializer::CloneDeserializer;
pub use serialized::{
    CROSS_ENGINE_SERIALIZE_ERROR, CloneError, SerializationErrorMode, SerializeScriptValue,
    SerializedScriptValue,
};
pub use serializer::{CloneSerializer, MAXIMUM_FILTER_RECURSION};
pub use tags::{CURRENT_VERSION, SerializationCode, SerializationTag};
