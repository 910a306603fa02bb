//! The capability interface the codec calls into to stay engine-agnostic
//!
//! The serializer and deserializer never touch an engine heap directly;
//! every type test, terminal construction and property access goes through a
//! [`SerializationDelegate`]. One implementation exists per engine, built
//! over that engine's realm. Engine-native exceptions never cross this
//! boundary — failures travel as [`SerializationCode`]s and are converted to
//! an engine exception only by [`SerializationDelegate::maybe_throw`] at the
//! outermost public entry point.

use crate::tags::{SerializationCode, SerializationTag};
use std::rc::Rc;
use tandem_core::{
    FileData, ObjectKind, ObjectRef, Realm, RegExpFlags, ScriptType, ScriptValue, Value, ViewKind,
};

/// How many members the codec visits between host-termination polls.
pub const DEFAULT_TICK_INTERVAL: u32 = 1000;

/// Engine-specific services for the structured-clone codec.
pub trait SerializationDelegate {
    /// The engine this delegate serves.
    fn script_type(&self) -> ScriptType;

    /// The realm values are read from and constructed into.
    fn realm(&self) -> &Realm;

    /// True when an exception is already pending in the realm (a property
    /// getter threw mid-walk).
    fn should_terminate(&self) -> bool;

    /// Member visits between timeout polls.
    fn ticks_until_next_check(&self) -> u32;

    /// True when the host's execution deadline has passed.
    fn did_time_out(&self) -> bool;

    /// Convert a failure code into this engine's pending exception.
    fn maybe_throw(&self, code: SerializationCode);

    /// The closed-set tag for a host object, `None` for plain objects,
    /// arrays and anything non-cloneable.
    fn tag_for_object(&self, value: &ScriptValue) -> Option<SerializationTag>;

    /// True for arrays.
    fn is_array(&self, value: &ScriptValue) -> bool;

    /// True for Date objects.
    fn is_date(&self, value: &ScriptValue) -> bool;

    /// True for plain ("final") objects whose own properties are the whole
    /// story.
    fn is_final_object(&self, value: &ScriptValue) -> bool;

    /// Heap identity of an object value, used for duplicate detection.
    fn object_identity(&self, value: &ScriptValue) -> Option<usize>;

    /// Epoch milliseconds of a Date.
    fn as_date_value(&self, value: &ScriptValue) -> f64;

    /// Numeric value of a number or boxed Number.
    fn as_number(&self, value: &ScriptValue) -> f64;

    /// Shared string storage of a string or boxed String.
    fn as_string(&self, value: &ScriptValue) -> Rc<str>;

    /// Pattern and flags of a RegExp.
    fn regexp_info(&self, value: &ScriptValue) -> Option<(Rc<str>, RegExpFlags)>;

    /// File metadata.
    fn file_data(&self, value: &ScriptValue) -> Option<FileData>;

    /// FileList metadata.
    fn file_list(&self, value: &ScriptValue) -> Option<Vec<FileData>>;

    /// Blob url, content type and size.
    fn blob_info(&self, value: &ScriptValue) -> Option<(Rc<str>, Rc<str>, u64)>;

    /// ImageData dimensions and pixels.
    fn image_data(&self, value: &ScriptValue) -> Option<(i32, i32, Vec<u8>)>;

    /// ArrayBuffer contents. `None`: not a buffer. `Some(None)`: neutered.
    fn array_buffer_bytes(&self, value: &ScriptValue) -> Option<Option<Vec<u8>>>;

    /// Move an ArrayBuffer's contents out, neutering the source. `None` when
    /// the value is not a buffer or is already neutered.
    fn transfer_array_buffer(&self, value: &ScriptValue) -> Option<Vec<u8>>;

    /// View kind, byte offset, byte length and backing buffer object.
    fn view_info(&self, value: &ScriptValue) -> Option<(ViewKind, u32, u32, ScriptValue)>;

    /// Array length (0 for non-arrays).
    fn array_length(&self, value: &ScriptValue) -> u32;

    /// Indexed element; `None` for holes.
    fn object_at_index(&self, value: &ScriptValue, index: u32) -> Option<ScriptValue>;

    /// Named own properties in insertion order.
    fn get_own_property_names(&self, value: &ScriptValue) -> Vec<Rc<str>>;

    /// Named own properties of an array (the non-index section).
    fn get_own_non_index_property_names(&self, value: &ScriptValue) -> Vec<Rc<str>>;

    /// Named property read; `None` when the property vanished mid-walk.
    fn get_property(&self, value: &ScriptValue, name: &str) -> Option<ScriptValue>;

    /// This engine's undefined.
    fn undefined(&self) -> ScriptValue;

    /// This engine's null.
    fn null(&self) -> ScriptValue;

    /// The empty string.
    fn empty_string(&self) -> ScriptValue;

    /// An integer value.
    fn from_int(&self, value: i64) -> ScriptValue;

    /// A double value.
    fn from_double(&self, value: f64) -> ScriptValue;

    /// A boolean value.
    fn from_bool(&self, value: bool) -> ScriptValue;

    /// A string value sharing `storage`.
    fn from_shared_string(&self, storage: &Rc<str>) -> ScriptValue;

    /// A boxed Boolean object.
    fn boolean_object(&self, value: bool) -> ScriptValue;

    /// A boxed Number object.
    fn number_object(&self, value: f64) -> ScriptValue;

    /// A boxed String object.
    fn string_object(&self, storage: &Rc<str>) -> ScriptValue;

    /// A Date from epoch milliseconds.
    fn date(&self, epoch_ms: f64) -> ScriptValue;

    /// A RegExp from pattern source and a g/i/m flag string.
    fn regexp(&self, pattern: &Rc<str>, flags: &str) -> ScriptValue;

    /// A File object.
    fn file(&self, data: FileData) -> ScriptValue;

    /// A FileList object.
    fn file_list_value(&self, files: Vec<FileData>) -> ScriptValue;

    /// A Blob object.
    fn blob(&self, url: &Rc<str>, content_type: &Rc<str>, size: u64) -> ScriptValue;

    /// An ImageData object.
    fn image_data_value(&self, width: i32, height: i32, data: Vec<u8>) -> ScriptValue;

    /// An ArrayBuffer holding a copy of `bytes`.
    fn array_buffer(&self, bytes: &[u8]) -> ScriptValue;

    /// A view over an ArrayBuffer object; `None` when `buffer` is not one.
    fn array_buffer_view(
        &self,
        kind: ViewKind,
        buffer: &ScriptValue,
        byte_offset: u32,
        byte_length: u32,
    ) -> Option<ScriptValue>;

    /// An empty array of the given length.
    fn construct_empty_array(&self, length: u32) -> ScriptValue;

    /// An empty plain object.
    fn construct_empty_object(&self) -> ScriptValue;

    /// Write an indexed element during reconstruction.
    fn set_array_element(&self, array: &ScriptValue, index: u32, value: &ScriptValue);

    /// Write a named property during reconstruction.
    fn set_object_property(&self, object: &ScriptValue, name: &Rc<str>, value: &ScriptValue);
}

/// Engine-dependent corners of the delegate.
pub trait EngineSpec {
    /// The engine served.
    const SCRIPT_TYPE: ScriptType;

    /// The engine's "no value" (JS `undefined`, Ruby `nil`).
    fn undefined_value() -> Value;

    /// Exception text for a failure code; `None` for codes that must not
    /// replace an already-pending exception.
    fn exception_message(code: SerializationCode) -> Option<&'static str>;
}

/// JavaScript engine corners.
pub struct JsSpec;

impl EngineSpec for JsSpec {
    const SCRIPT_TYPE: ScriptType = ScriptType::Js;

    fn undefined_value() -> Value {
        Value::Undefined
    }

    fn exception_message(code: SerializationCode) -> Option<&'static str> {
        match code {
            SerializationCode::SuccessfullyCompleted => None,
            SerializationCode::StackOverflowError => {
                Some("RangeError: Maximum call stack size exceeded.")
            }
            SerializationCode::InterruptedExecutionError => {
                Some("Error: Script execution interrupted.")
            }
            SerializationCode::ValidationError => Some("Error: Unable to deserialize data."),
            SerializationCode::DataCloneError => {
                Some("DataCloneError: An object could not be cloned.")
            }
            // The walk hit a getter that already threw; that exception wins.
            SerializationCode::ExistingExceptionError => None,
            SerializationCode::UnspecifiedError => Some("Error: Serialization failed."),
        }
    }
}

/// Ruby engine corners.
pub struct RbSpec;

impl EngineSpec for RbSpec {
    const SCRIPT_TYPE: ScriptType = ScriptType::Rb;

    fn undefined_value() -> Value {
        Value::Null
    }

    fn exception_message(code: SerializationCode) -> Option<&'static str> {
        match code {
            SerializationCode::SuccessfullyCompleted => None,
            SerializationCode::StackOverflowError => {
                Some("SystemStackError: stack level too deep")
            }
            SerializationCode::InterruptedExecutionError => Some("Interrupt: script interrupted"),
            SerializationCode::ValidationError => {
                Some("ArgumentError: unable to deserialize data")
            }
            SerializationCode::DataCloneError => Some("TypeError: object cannot be cloned"),
            SerializationCode::ExistingExceptionError => None,
            SerializationCode::UnspecifiedError => Some("RuntimeError: serialization failed"),
        }
    }
}

type TimeoutCheck = Rc<dyn Fn() -> bool>;

/// The shared delegate machinery, instantiated per engine.
pub struct EngineSerializationDelegate<S: EngineSpec> {
    realm: Realm,
    tick_interval: u32,
    timeout_check: Option<TimeoutCheck>,
    _spec: std::marker::PhantomData<S>,
}

/// Delegate for JavaScript realms.
pub type JsSerializationDelegate = EngineSerializationDelegate<JsSpec>;
/// Delegate for Ruby realms.
pub type RbSerializationDelegate = EngineSerializationDelegate<RbSpec>;

impl<S: EngineSpec> EngineSerializationDelegate<S> {
    /// Delegate over `realm` with the default tick interval and no timeout.
    pub fn new(realm: &Realm) -> Self {
        debug_assert_eq!(realm.script_type(), S::SCRIPT_TYPE);
        EngineSerializationDelegate {
            realm: realm.clone(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            timeout_check: None,
            _spec: std::marker::PhantomData,
        }
    }

    /// Install a host timeout check, polled every `tick_interval` member
    /// visits.
    pub fn with_timeout_check(
        mut self,
        tick_interval: u32,
        check: impl Fn() -> bool + 'static,
    ) -> Self {
        self.tick_interval = tick_interval.max(1);
        self.timeout_check = Some(Rc::new(check));
        self
    }

    fn wrap(&self, value: Value) -> ScriptValue {
        ScriptValue::for_realm(&self.realm, value)
    }

    fn object_of(value: &ScriptValue) -> Option<ObjectRef> {
        value.raw_value().as_object().cloned()
    }
}

/// Build the delegate matching a realm's engine.
pub fn serialization_delegate_for(realm: &Realm) -> Box<dyn SerializationDelegate> {
    match realm.script_type() {
        ScriptType::Js => Box::new(JsSerializationDelegate::new(realm)),
        ScriptType::Rb => Box::new(RbSerializationDelegate::new(realm)),
    }
}

impl<S: EngineSpec> SerializationDelegate for EngineSerializationDelegate<S> {
    fn script_type(&self) -> ScriptType {
        S::SCRIPT_TYPE
    }

    fn realm(&self) -> &Realm {
        &self.realm
    }

    fn should_terminate(&self) -> bool {
        self.realm.has_exception()
    }

    fn ticks_until_next_check(&self) -> u32 {
        self.tick_interval
    }

    fn did_time_out(&self) -> bool {
        self.timeout_check.as_ref().is_some_and(|check| check())
    }

    fn maybe_throw(&self, code: SerializationCode) {
        if let Some(message) = S::exception_message(code) {
            self.realm.set_exception(Value::string(message));
        }
    }

    fn tag_for_object(&self, value: &ScriptValue) -> Option<SerializationTag> {
        let object = Self::object_of(value)?;
        Some(match object.kind() {
            ObjectKind::BooleanObject(true) => SerializationTag::TrueObject,
            ObjectKind::BooleanObject(false) => SerializationTag::FalseObject,
            ObjectKind::StringObject(_) => SerializationTag::StringObject,
            ObjectKind::NumberObject(_) => SerializationTag::NumberObject,
            ObjectKind::File(_) => SerializationTag::File,
            ObjectKind::FileList(_) => SerializationTag::FileList,
            ObjectKind::Blob { .. } => SerializationTag::Blob,
            ObjectKind::ImageData { .. } => SerializationTag::ImageData,
            ObjectKind::RegExp { .. } => SerializationTag::RegExp,
            ObjectKind::MessagePort(_) => SerializationTag::MessagePortReference,
            ObjectKind::ArrayBuffer(_) => SerializationTag::ArrayBuffer,
            ObjectKind::ArrayBufferView { .. } => SerializationTag::ArrayBufferView,
            ObjectKind::Plain
            | ObjectKind::Array
            | ObjectKind::Date(_)
            | ObjectKind::Function(_) => return None,
        })
    }

    fn is_array(&self, value: &ScriptValue) -> bool {
        Self::object_of(value).is_some_and(|o| o.is_array())
    }

    fn is_date(&self, value: &ScriptValue) -> bool {
        Self::object_of(value).is_some_and(|o| matches!(o.kind(), ObjectKind::Date(_)))
    }

    fn is_final_object(&self, value: &ScriptValue) -> bool {
        Self::object_of(value).is_some_and(|o| o.is_plain())
    }

    fn object_identity(&self, value: &ScriptValue) -> Option<usize> {
        Self::object_of(value).map(|o| o.identity())
    }

    fn as_date_value(&self, value: &ScriptValue) -> f64 {
        match Self::object_of(value).map(|o| match o.kind() {
            ObjectKind::Date(ms) => *ms,
            _ => f64::NAN,
        }) {
            Some(ms) => ms,
            None => f64::NAN,
        }
    }

    fn as_number(&self, value: &ScriptValue) -> f64 {
        if let Some(object) = Self::object_of(value) {
            if let ObjectKind::NumberObject(n) = object.kind() {
                return *n;
            }
        }
        value.as_number()
    }

    fn as_string(&self, value: &ScriptValue) -> Rc<str> {
        if let Some(s) = value.raw_value().as_string() {
            return s.clone();
        }
        if let Some(object) = Self::object_of(value) {
            if let ObjectKind::StringObject(s) = object.kind() {
                return s.clone();
            }
        }
        Rc::from("")
    }

    fn regexp_info(&self, value: &ScriptValue) -> Option<(Rc<str>, RegExpFlags)> {
        let object = Self::object_of(value)?;
        match object.kind() {
            ObjectKind::RegExp { pattern, flags } => Some((pattern.clone(), *flags)),
            _ => None,
        }
    }

    fn file_data(&self, value: &ScriptValue) -> Option<FileData> {
        let object = Self::object_of(value)?;
        match object.kind() {
            ObjectKind::File(data) => Some(data.clone()),
            _ => None,
        }
    }

    fn file_list(&self, value: &ScriptValue) -> Option<Vec<FileData>> {
        let object = Self::object_of(value)?;
        match object.kind() {
            ObjectKind::FileList(files) => Some(files.clone()),
            _ => None,
        }
    }

    fn blob_info(&self, value: &ScriptValue) -> Option<(Rc<str>, Rc<str>, u64)> {
        let object = Self::object_of(value)?;
        match object.kind() {
            ObjectKind::Blob {
                url,
                content_type,
                size,
            } => Some((url.clone(), content_type.clone(), *size)),
            _ => None,
        }
    }

    fn image_data(&self, value: &ScriptValue) -> Option<(i32, i32, Vec<u8>)> {
        let object = Self::object_of(value)?;
        match object.kind() {
            ObjectKind::ImageData {
                width,
                height,
                data,
            } => Some((*width, *height, data.clone())),
            _ => None,
        }
    }

    fn array_buffer_bytes(&self, value: &ScriptValue) -> Option<Option<Vec<u8>>> {
        let object = Self::object_of(value)?;
        let data = object.array_buffer_data()?;
        Some(data.to_vec())
    }

    fn transfer_array_buffer(&self, value: &ScriptValue) -> Option<Vec<u8>> {
        let object = Self::object_of(value)?;
        object.array_buffer_data()?.transfer()
    }

    fn view_info(&self, value: &ScriptValue) -> Option<(ViewKind, u32, u32, ScriptValue)> {
        let object = Self::object_of(value)?;
        match object.kind() {
            ObjectKind::ArrayBufferView {
                kind,
                buffer,
                byte_offset,
                byte_length,
            } => Some((
                *kind,
                *byte_offset,
                *byte_length,
                self.wrap(Value::Object(buffer.clone())),
            )),
            _ => None,
        }
    }

    fn array_length(&self, value: &ScriptValue) -> u32 {
        Self::object_of(value).map_or(0, |o| o.array_length())
    }

    fn object_at_index(&self, value: &ScriptValue, index: u32) -> Option<ScriptValue> {
        let object = Self::object_of(value)?;
        object.element(index).map(|v| self.wrap(v))
    }

    fn get_own_property_names(&self, value: &ScriptValue) -> Vec<Rc<str>> {
        Self::object_of(value).map_or_else(Vec::new, |o| o.own_property_names())
    }

    fn get_own_non_index_property_names(&self, value: &ScriptValue) -> Vec<Rc<str>> {
        // Arrays keep named properties apart from their elements, so the
        // named set already excludes indices.
        self.get_own_property_names(value)
    }

    fn get_property(&self, value: &ScriptValue, name: &str) -> Option<ScriptValue> {
        let object = Self::object_of(value)?;
        object.get_property(name).map(|v| self.wrap(v))
    }

    fn undefined(&self) -> ScriptValue {
        self.wrap(S::undefined_value())
    }

    fn null(&self) -> ScriptValue {
        self.wrap(Value::Null)
    }

    fn empty_string(&self) -> ScriptValue {
        self.wrap(Value::string(""))
    }

    fn from_int(&self, value: i64) -> ScriptValue {
        self.wrap(Value::Int(value))
    }

    fn from_double(&self, value: f64) -> ScriptValue {
        self.wrap(Value::Double(value))
    }

    fn from_bool(&self, value: bool) -> ScriptValue {
        self.wrap(Value::Bool(value))
    }

    fn from_shared_string(&self, storage: &Rc<str>) -> ScriptValue {
        self.wrap(Value::String(storage.clone()))
    }

    fn boolean_object(&self, value: bool) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(
            ObjectKind::BooleanObject(value),
        )))
    }

    fn number_object(&self, value: f64) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(ObjectKind::NumberObject(
            value,
        ))))
    }

    fn string_object(&self, storage: &Rc<str>) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(ObjectKind::StringObject(
            storage.clone(),
        ))))
    }

    fn date(&self, epoch_ms: f64) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(ObjectKind::Date(
            epoch_ms,
        ))))
    }

    fn regexp(&self, pattern: &Rc<str>, flags: &str) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(ObjectKind::RegExp {
            pattern: pattern.clone(),
            flags: RegExpFlags::from_flag_string(flags),
        })))
    }

    fn file(&self, data: FileData) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(ObjectKind::File(data))))
    }

    fn file_list_value(&self, files: Vec<FileData>) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(ObjectKind::FileList(
            files,
        ))))
    }

    fn blob(&self, url: &Rc<str>, content_type: &Rc<str>, size: u64) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(ObjectKind::Blob {
            url: url.clone(),
            content_type: content_type.clone(),
            size,
        })))
    }

    fn image_data_value(&self, width: i32, height: i32, data: Vec<u8>) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_host(ObjectKind::ImageData {
            width,
            height,
            data,
        })))
    }

    fn array_buffer(&self, bytes: &[u8]) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::array_buffer_from_bytes(bytes)))
    }

    fn array_buffer_view(
        &self,
        kind: ViewKind,
        buffer: &ScriptValue,
        byte_offset: u32,
        byte_length: u32,
    ) -> Option<ScriptValue> {
        let buffer_object = Self::object_of(buffer)?;
        buffer_object.array_buffer_data()?;
        Some(self.wrap(Value::Object(ObjectRef::new_host(
            ObjectKind::ArrayBufferView {
                kind,
                buffer: buffer_object,
                byte_offset,
                byte_length,
            },
        ))))
    }

    fn construct_empty_array(&self, length: u32) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_array(length)))
    }

    fn construct_empty_object(&self) -> ScriptValue {
        self.wrap(Value::Object(ObjectRef::new_plain()))
    }

    fn set_array_element(&self, array: &ScriptValue, index: u32, value: &ScriptValue) {
        if let Some(object) = Self::object_of(array) {
            object.set_element(index, value.raw_value());
        }
    }

    fn set_object_property(&self, object: &ScriptValue, name: &Rc<str>, value: &ScriptValue) {
        if let Some(object) = Self::object_of(object) {
            object.set_property(name.clone(), value.raw_value());
        }
    }
}
