//! The persisted form of a structured clone
//!
//! A [`SerializedScriptValue`] is an immutable byte buffer plus the blob URLs
//! the graph referenced and, when transferables were involved, the moved-out
//! ArrayBuffer contents. Once constructed it never changes, which is why the
//! buffers can cross worker threads without locking.
//!
//! Result codes become engine exceptions here and only here: `Throwing` mode
//! routes the code through the delegate's `maybe_throw` before the public
//! `Result` is returned.

use crate::delegate::{SerializationDelegate, serialization_delegate_for};
use crate::deserializer::CloneDeserializer;
use crate::serializer::CloneSerializer;
use crate::tags::{CURRENT_VERSION, SerializationCode};
use rustc_hash::FxHashSet;
use std::rc::Rc;
use tandem_core::{ScriptState, ScriptValue};
use thiserror::Error;
use tracing::warn;

/// Sentinel payload produced when a value is serialized against a state of
/// the wrong engine.
pub const CROSS_ENGINE_SERIALIZE_ERROR: &str =
    "ERROR: Serializing a ScriptValue from a different language.";

/// Whether a failure should also raise an engine exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationErrorMode {
    /// Convert failure codes into the engine's pending exception.
    #[default]
    Throwing,
    /// Report the failure only through the returned code.
    NonThrowing,
}

/// A structured-clone failure, as surfaced at the public API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CloneError {
    /// The graph was nested beyond the traversal ceiling.
    #[error("object graph is nested too deeply")]
    StackOverflow,
    /// The host interrupted the pass.
    #[error("serialization was interrupted")]
    Interrupted,
    /// Malformed or out-of-range input.
    #[error("serialized data failed validation")]
    Validation,
    /// The graph reached an object that cannot be cloned.
    #[error("an object in the graph cannot be cloned")]
    DataClone,
    /// An exception was already pending when the walk read a property.
    #[error("an exception was pending during serialization")]
    ExistingException,
    /// Anything else.
    #[error("serialization failed")]
    Unspecified,
}

impl CloneError {
    fn from_code(code: SerializationCode) -> Option<CloneError> {
        Some(match code {
            SerializationCode::SuccessfullyCompleted => return None,
            SerializationCode::StackOverflowError => CloneError::StackOverflow,
            SerializationCode::InterruptedExecutionError => CloneError::Interrupted,
            SerializationCode::ValidationError => CloneError::Validation,
            SerializationCode::DataCloneError => CloneError::DataClone,
            SerializationCode::ExistingExceptionError => CloneError::ExistingException,
            SerializationCode::UnspecifiedError => CloneError::Unspecified,
        })
    }
}

/// An immutable, engine-agnostic structured clone.
#[derive(Debug)]
pub struct SerializedScriptValue {
    data: Vec<u8>,
    blob_urls: Vec<String>,
    array_buffer_contents: Option<Vec<Vec<u8>>>,
}

impl SerializedScriptValue {
    /// Serialize a value graph.
    ///
    /// ArrayBuffers named in `array_buffers` are transferred rather than
    /// copied: after success the sources read as neutered and the contents
    /// travel with the clone.
    pub fn create(
        delegate: &dyn SerializationDelegate,
        value: &ScriptValue,
        message_ports: Option<&[ScriptValue]>,
        array_buffers: Option<&[ScriptValue]>,
        mode: SerializationErrorMode,
    ) -> Result<Rc<SerializedScriptValue>, CloneError> {
        let (output, mut code) =
            CloneSerializer::serialize(delegate, value, message_ports, array_buffers);

        let mut contents = None;
        if let Some(buffers) = array_buffers {
            if code.is_success() {
                match Self::transfer_array_buffers(delegate, buffers) {
                    Ok(transferred) => contents = Some(transferred),
                    Err(transfer_code) => code = transfer_code,
                }
            }
        }

        if mode == SerializationErrorMode::Throwing {
            delegate.maybe_throw(code);
        }
        match CloneError::from_code(code) {
            None => Ok(Rc::new(SerializedScriptValue {
                data: output.bytes,
                blob_urls: output.blob_urls,
                array_buffer_contents: contents,
            })),
            Some(error) => Err(error),
        }
    }

    /// Move every transfer-listed buffer's contents out, neutering sources.
    ///
    /// Fails with `ValidationError` if any buffer is already neutered before
    /// the transfer begins. Duplicate list entries transfer once.
    fn transfer_array_buffers(
        delegate: &dyn SerializationDelegate,
        buffers: &[ScriptValue],
    ) -> Result<Vec<Vec<u8>>, SerializationCode> {
        for buffer in buffers {
            match delegate.array_buffer_bytes(buffer) {
                Some(Some(_)) => {}
                // Not a buffer, or already neutered.
                _ => return Err(SerializationCode::ValidationError),
            }
        }

        let mut visited = FxHashSet::default();
        let mut contents = Vec::new();
        for buffer in buffers {
            let Some(identity) = delegate.object_identity(buffer) else {
                return Err(SerializationCode::ValidationError);
            };
            if !visited.insert(identity) {
                continue;
            }
            match delegate.transfer_array_buffer(buffer) {
                Some(bytes) => contents.push(bytes),
                None => return Err(SerializationCode::ValidationError),
            }
        }
        Ok(contents)
    }

    /// The clone of no value at all: an empty buffer.
    pub fn empty() -> Rc<SerializedScriptValue> {
        Rc::new(SerializedScriptValue {
            data: Vec::new(),
            blob_urls: Vec::new(),
            array_buffer_contents: None,
        })
    }

    /// Adopt wire bytes received from elsewhere (another thread, a
    /// persisted store). The bytes are validated at deserialization time.
    pub fn from_wire_bytes(bytes: Vec<u8>) -> Rc<SerializedScriptValue> {
        Rc::new(SerializedScriptValue {
            data: bytes,
            blob_urls: Vec::new(),
            array_buffer_contents: None,
        })
    }

    /// A clone holding one string.
    pub fn from_string(s: &str) -> Rc<SerializedScriptValue> {
        Rc::new(SerializedScriptValue {
            data: CloneSerializer::serialize_string(s),
            blob_urls: Vec::new(),
            array_buffer_contents: None,
        })
    }

    /// A clone holding undefined.
    pub fn undefined_value() -> Rc<SerializedScriptValue> {
        Rc::new(SerializedScriptValue {
            data: CloneSerializer::serialize_undefined(),
            blob_urls: Vec::new(),
            array_buffer_contents: None,
        })
    }

    /// A clone holding null (the empty buffer deserializes as null).
    pub fn null_value() -> Rc<SerializedScriptValue> {
        Self::empty()
    }

    /// A clone holding one boolean.
    pub fn boolean_value(value: bool) -> Rc<SerializedScriptValue> {
        Rc::new(SerializedScriptValue {
            data: CloneSerializer::serialize_boolean(value),
            blob_urls: Vec::new(),
            array_buffer_contents: None,
        })
    }

    /// A clone holding one number.
    pub fn number_value(value: f64) -> Rc<SerializedScriptValue> {
        Rc::new(SerializedScriptValue {
            data: CloneSerializer::serialize_number(value),
            blob_urls: Vec::new(),
            array_buffer_contents: None,
        })
    }

    /// Reconstruct the graph in `delegate`'s engine. May be called many
    /// times, by different engines.
    pub fn deserialize(
        &self,
        delegate: &dyn SerializationDelegate,
        message_ports: Option<&[ScriptValue]>,
        mode: SerializationErrorMode,
    ) -> Result<ScriptValue, CloneError> {
        let (value, code) = CloneDeserializer::deserialize(
            delegate,
            message_ports,
            self.array_buffer_contents.as_deref(),
            &self.data,
        );
        if mode == SerializationErrorMode::Throwing {
            delegate.maybe_throw(code);
        }
        match CloneError::from_code(code) {
            None => Ok(value),
            Some(error) => Err(error),
        }
    }

    /// Reconstruct in whichever engine owns `state`.
    pub fn deserialize_for_state(
        &self,
        state: &dyn ScriptState,
        mode: SerializationErrorMode,
    ) -> Result<ScriptValue, CloneError> {
        let delegate = serialization_delegate_for(state.realm());
        self.deserialize(delegate.as_ref(), None, mode)
    }

    /// Decode a lone string payload without touching any engine.
    pub fn to_wire_string(&self) -> Option<String> {
        CloneDeserializer::deserialize_string(&self.data)
    }

    /// The wire bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Blob URLs referenced by the clone, in encounter order.
    pub fn blob_urls(&self) -> &[String] {
        &self.blob_urls
    }

    /// True when transferred ArrayBuffer contents travel with this clone.
    pub fn has_transferred_buffers(&self) -> bool {
        self.array_buffer_contents.is_some()
    }

    /// The wire-format version written by this build.
    pub const fn wire_format_version() -> u32 {
        CURRENT_VERSION
    }
}

/// Serialization entry points for [`ScriptValue`], gated by engine match.
pub trait SerializeScriptValue {
    /// Serialize this value against `state`'s engine.
    fn serialize(
        &self,
        state: &dyn ScriptState,
        mode: SerializationErrorMode,
    ) -> Result<Rc<SerializedScriptValue>, CloneError>;

    /// Serialize with transferables.
    fn serialize_with_transfer(
        &self,
        state: &dyn ScriptState,
        message_ports: Option<&[ScriptValue]>,
        array_buffers: Option<&[ScriptValue]>,
        mode: SerializationErrorMode,
    ) -> Result<Rc<SerializedScriptValue>, CloneError>;
}

impl SerializeScriptValue for ScriptValue {
    fn serialize(
        &self,
        state: &dyn ScriptState,
        mode: SerializationErrorMode,
    ) -> Result<Rc<SerializedScriptValue>, CloneError> {
        self.serialize_with_transfer(state, None, None, mode)
    }

    fn serialize_with_transfer(
        &self,
        state: &dyn ScriptState,
        message_ports: Option<&[ScriptValue]>,
        array_buffers: Option<&[ScriptValue]>,
        mode: SerializationErrorMode,
    ) -> Result<Rc<SerializedScriptValue>, CloneError> {
        // The empty value clones to the empty buffer, whichever engine asks.
        if self.script_type().is_none() {
            return Ok(SerializedScriptValue::empty());
        }
        if !self.matches_state(state) {
            warn!("serializing a ScriptValue from a different language");
            return Ok(SerializedScriptValue::from_string(
                CROSS_ENGINE_SERIALIZE_ERROR,
            ));
        }
        let delegate = serialization_delegate_for(state.realm());
        SerializedScriptValue::create(delegate.as_ref(), self, message_ports, array_buffers, mode)
    }
}
