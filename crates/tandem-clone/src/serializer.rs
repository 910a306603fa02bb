//! Graph walker that encodes a live object graph into the wire format
//!
//! The walk is an explicit iterative state machine, not recursion: array and
//! object traversal push and pop resumption states on heap-allocated stacks,
//! so arbitrarily deep graphs cannot exhaust the native call stack. Depth
//! beyond [`MAXIMUM_FILTER_RECURSION`] reports `StackOverflowError` as a
//! result code instead.
//!
//! Every composite value is recorded in an insertion-ordered object pool; a
//! second reference to a recorded value is written as a back-reference, which
//! is what makes cyclic and shared graphs serializable. Strings get the same
//! treatment in their own pool, keyed by string identity.

use crate::delegate::SerializationDelegate;
use crate::tags::{
    CURRENT_VERSION, NON_INDEX_PROPERTIES_TAG, STRING_POOL_TAG, SerializationCode,
    SerializationTag, TERMINATOR_TAG,
};
use crate::wire::WireWriter;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::rc::Rc;
use tandem_core::{ScriptValue, Value};

/// Traversal depth ceiling. Beyond this the walk reports
/// `StackOverflowError` rather than risking the native stack.
pub const MAXIMUM_FILTER_RECURSION: usize = 40_000;

/// Resumption states of the iterative walkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkerState {
    StateUnknown,
    ArrayStartState,
    ArrayStartVisitMember,
    ArrayEndVisitMember,
    ObjectStartState,
    ObjectStartVisitMember,
    ObjectEndVisitMember,
}

/// Encodes one value graph. Transient per call; the pools live only for the
/// duration of a single pass.
pub struct CloneSerializer<'a> {
    delegate: &'a dyn SerializationDelegate,
    writer: WireWriter,
    blob_urls: Vec<String>,
    failed: bool,

    object_pool: FxHashMap<usize, u32>,
    object_pool_pin: Vec<ScriptValue>,

    string_pool: FxHashMap<usize, u32>,
    string_pool_pin: Vec<Rc<str>>,

    transferred_message_ports: FxHashMap<usize, u32>,
    transferred_array_buffers: FxHashMap<usize, u32>,
}

/// Everything a successful serialize pass produces.
pub struct SerializerOutput {
    /// The wire bytes, version header included.
    pub bytes: Vec<u8>,
    /// Blob URLs referenced by the graph, in encounter order.
    pub blob_urls: Vec<String>,
}

impl<'a> CloneSerializer<'a> {
    /// Serialize `value`, resolving transferables against `message_ports`
    /// and `array_buffers`.
    pub fn serialize(
        delegate: &'a dyn SerializationDelegate,
        value: &ScriptValue,
        message_ports: Option<&[ScriptValue]>,
        array_buffers: Option<&[ScriptValue]>,
    ) -> (SerializerOutput, SerializationCode) {
        let mut serializer = CloneSerializer::new(delegate, message_ports, array_buffers);
        let code = serializer.run(value);
        let code = if code.is_success() && serializer.failed {
            SerializationCode::UnspecifiedError
        } else {
            code
        };
        (
            SerializerOutput {
                bytes: serializer.writer.into_bytes(),
                blob_urls: serializer.blob_urls,
            },
            code,
        )
    }

    /// Fast path: a lone string payload.
    pub fn serialize_string(s: &str) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_u32(CURRENT_VERSION);
        if s.is_empty() {
            writer.write_u8(SerializationTag::EmptyString as u8);
        } else {
            writer.write_u8(SerializationTag::String as u8);
            writer.write_u32(s.encode_utf16().count() as u32);
            writer.write_utf16_units(s);
        }
        writer.into_bytes()
    }

    /// Fast path: the undefined payload.
    pub fn serialize_undefined() -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_u32(CURRENT_VERSION);
        writer.write_u8(SerializationTag::Undefined as u8);
        writer.into_bytes()
    }

    /// Fast path: a lone boolean payload.
    pub fn serialize_boolean(value: bool) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_u32(CURRENT_VERSION);
        writer.write_u8(if value {
            SerializationTag::True as u8
        } else {
            SerializationTag::False as u8
        });
        writer.into_bytes()
    }

    /// Fast path: a lone double payload.
    pub fn serialize_number(value: f64) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_u32(CURRENT_VERSION);
        writer.write_u8(SerializationTag::Double as u8);
        writer.write_f64(value);
        writer.into_bytes()
    }

    fn new(
        delegate: &'a dyn SerializationDelegate,
        message_ports: Option<&[ScriptValue]>,
        array_buffers: Option<&[ScriptValue]>,
    ) -> CloneSerializer<'a> {
        let mut serializer = CloneSerializer {
            delegate,
            writer: WireWriter::new(),
            blob_urls: Vec::new(),
            failed: false,
            object_pool: FxHashMap::default(),
            object_pool_pin: Vec::new(),
            string_pool: FxHashMap::default(),
            string_pool_pin: Vec::new(),
            transferred_message_ports: FxHashMap::default(),
            transferred_array_buffers: FxHashMap::default(),
        };
        serializer.writer.write_u32(CURRENT_VERSION);
        serializer.transferred_message_ports = serializer.fill_transfer_map(message_ports);
        serializer.transferred_array_buffers = serializer.fill_transfer_map(array_buffers);
        serializer
    }

    /// Transfer-list entries keyed by identity; index is the position in the
    /// deduplicated list, matching the contents array built on transfer.
    fn fill_transfer_map(&self, input: Option<&[ScriptValue]>) -> FxHashMap<usize, u32> {
        let mut map = FxHashMap::default();
        let Some(input) = input else {
            return map;
        };
        for value in input {
            if value.has_no_value() {
                continue;
            }
            if let Some(identity) = self.delegate.object_identity(value) {
                let next = map.len() as u32;
                map.entry(identity).or_insert(next);
            }
        }
        map
    }

    fn write_tag(&mut self, tag: SerializationTag) {
        self.writer.write_u8(tag as u8);
    }

    fn write_pool_index(&mut self, pool_size: usize, index: u32) {
        if pool_size <= 0xFF {
            self.writer.write_u8(index as u8);
        } else if pool_size <= 0xFFFF {
            self.writer.write_u16(index as u16);
        } else {
            self.writer.write_u32(index);
        }
    }

    /// Write string data with constant-pool sharing keyed by identity.
    fn write_string_data(&mut self, s: &Rc<str>) {
        let identity = Rc::as_ptr(s) as *const u8 as usize;
        if let Some(&index) = self.string_pool.get(&identity) {
            self.writer.write_u32(STRING_POOL_TAG);
            self.write_pool_index(self.string_pool.len(), index);
            return;
        }
        let index = self.string_pool.len() as u32;
        self.string_pool.insert(identity, index);
        // The pin keeps the storage alive so its address cannot be reused by
        // a later, different string.
        self.string_pool_pin.push(s.clone());

        let length = s.encode_utf16().count();
        // Lengths at or above the reserved sentinels cannot be encoded.
        if length as u64 >= STRING_POOL_TAG as u64 {
            self.failed = true;
            return;
        }
        self.writer.write_u32(length as u32);
        self.writer.write_utf16_units(s);
    }

    fn dump_string(&mut self, s: &Rc<str>) {
        if s.is_empty() {
            self.write_tag(SerializationTag::EmptyString);
        } else {
            self.write_tag(SerializationTag::String);
            self.write_string_data(s);
        }
    }

    fn dump_string_object(&mut self, s: &Rc<str>) {
        if s.is_empty() {
            self.write_tag(SerializationTag::EmptyStringObject);
        } else {
            self.write_tag(SerializationTag::StringObject);
            self.write_string_data(s);
        }
    }

    /// True when `value` was already recorded and a back-reference was
    /// written instead.
    fn check_for_duplicate(&mut self, value: &ScriptValue) -> bool {
        let Some(identity) = self.delegate.object_identity(value) else {
            return false;
        };
        if let Some(&index) = self.object_pool.get(&identity) {
            self.write_tag(SerializationTag::ObjectReference);
            self.write_pool_index(self.object_pool.len(), index);
            return true;
        }
        false
    }

    fn record_object(&mut self, value: &ScriptValue) {
        if let Some(identity) = self.delegate.object_identity(value) {
            let index = self.object_pool.len() as u32;
            self.object_pool.insert(identity, index);
            self.object_pool_pin.push(value.clone());
        }
    }

    fn start_object_internal(&mut self, value: &ScriptValue) -> bool {
        if self.check_for_duplicate(value) {
            return false;
        }
        self.record_object(value);
        true
    }

    fn start_object(&mut self, value: &ScriptValue) -> bool {
        if !self.start_object_internal(value) {
            return false;
        }
        self.write_tag(SerializationTag::Object);
        true
    }

    fn start_array(&mut self, value: &ScriptValue, length: u32) -> bool {
        if !self.start_object_internal(value) {
            return false;
        }
        self.write_tag(SerializationTag::Array);
        self.writer.write_u32(length);
        true
    }

    fn end_composite(&mut self) {
        self.writer.write_u32(TERMINATOR_TAG);
    }

    fn dump_immediate(&mut self, value: &ScriptValue) {
        match value.raw_value() {
            Value::Null => self.write_tag(SerializationTag::Null),
            Value::Undefined => self.write_tag(SerializationTag::Undefined),
            Value::Int(0) => self.write_tag(SerializationTag::Zero),
            Value::Int(1) => self.write_tag(SerializationTag::One),
            Value::Int(i) => {
                self.write_tag(SerializationTag::Int);
                self.writer.write_i64(i);
            }
            Value::Double(d) => {
                self.write_tag(SerializationTag::Double);
                self.writer.write_f64(d);
            }
            Value::Bool(true) => self.write_tag(SerializationTag::True),
            Value::Bool(false) => self.write_tag(SerializationTag::False),
            // Cells are handled before dump_immediate is reached.
            Value::String(_) | Value::Object(_) => {}
        }
    }

    fn dump_array_buffer_view(&mut self, value: &ScriptValue) -> Result<(), SerializationCode> {
        self.write_tag(SerializationTag::ArrayBufferView);
        let Some((kind, byte_offset, byte_length, buffer)) = self.delegate.view_info(value) else {
            return Err(SerializationCode::ValidationError);
        };
        self.writer.write_u8(kind as u8);
        self.writer.write_u32(byte_offset);
        self.writer.write_u32(byte_length);
        match self.dump_if_terminal(&buffer)? {
            true => Ok(()),
            false => Err(SerializationCode::ValidationError),
        }
    }

    /// Encode `value` if it is a terminal (non-container). `Ok(false)` means
    /// the caller must walk it as a container.
    fn dump_if_terminal(&mut self, value: &ScriptValue) -> Result<bool, SerializationCode> {
        if !value.is_cell() {
            self.dump_immediate(value);
            return Ok(true);
        }

        if value.is_string() {
            let s = self.delegate.as_string(value);
            self.dump_string(&s);
            return Ok(true);
        }

        if value.is_number() {
            self.write_tag(SerializationTag::Double);
            self.writer.write_f64(value.as_number());
            return Ok(true);
        }

        if value.is_object() && self.delegate.is_date(value) {
            self.write_tag(SerializationTag::Date);
            self.writer.write_f64(self.delegate.as_date_value(value));
            return Ok(true);
        }

        if self.delegate.is_array(value) {
            return Ok(false);
        }

        if value.is_object() {
            let Some(tag) = self.delegate.tag_for_object(value) else {
                return Ok(false);
            };
            match tag {
                SerializationTag::TrueObject | SerializationTag::FalseObject => {
                    if !self.start_object_internal(value) {
                        return Ok(true); // duplicate, reference written
                    }
                    self.write_tag(tag);
                    Ok(true)
                }
                SerializationTag::StringObject => {
                    if !self.start_object_internal(value) {
                        return Ok(true);
                    }
                    let s = self.delegate.as_string(value);
                    self.dump_string_object(&s);
                    Ok(true)
                }
                SerializationTag::NumberObject => {
                    if !self.start_object_internal(value) {
                        return Ok(true);
                    }
                    self.write_tag(SerializationTag::NumberObject);
                    self.writer.write_f64(self.delegate.as_number(value));
                    Ok(true)
                }
                SerializationTag::File => {
                    let Some(file) = self.delegate.file_data(value) else {
                        return Err(SerializationCode::ValidationError);
                    };
                    self.write_tag(SerializationTag::File);
                    self.write_file(&file);
                    Ok(true)
                }
                SerializationTag::FileList => {
                    let Some(files) = self.delegate.file_list(value) else {
                        return Err(SerializationCode::ValidationError);
                    };
                    self.write_tag(SerializationTag::FileList);
                    self.writer.write_u32(files.len() as u32);
                    for file in &files {
                        self.write_file(file);
                    }
                    Ok(true)
                }
                SerializationTag::Blob => {
                    let Some((url, content_type, size)) = self.delegate.blob_info(value) else {
                        return Err(SerializationCode::ValidationError);
                    };
                    self.write_tag(SerializationTag::Blob);
                    self.blob_urls.push(url.to_string());
                    self.write_string_data(&url);
                    self.write_string_data(&content_type);
                    self.writer.write_u64(size);
                    Ok(true)
                }
                SerializationTag::ImageData => {
                    let Some((width, height, data)) = self.delegate.image_data(value) else {
                        return Err(SerializationCode::ValidationError);
                    };
                    self.write_tag(SerializationTag::ImageData);
                    self.writer.write_i32(width);
                    self.writer.write_i32(height);
                    self.writer.write_u32(data.len() as u32);
                    self.writer.write_bytes(&data);
                    Ok(true)
                }
                SerializationTag::RegExp => {
                    let Some((pattern, flags)) = self.delegate.regexp_info(value) else {
                        return Err(SerializationCode::ValidationError);
                    };
                    self.write_tag(SerializationTag::RegExp);
                    self.write_string_data(&pattern);
                    let flag_string: Rc<str> = Rc::from(flags.to_flag_string());
                    self.write_string_data(&flag_string);
                    Ok(true)
                }
                SerializationTag::MessagePortReference => {
                    let index = self
                        .delegate
                        .object_identity(value)
                        .and_then(|id| self.transferred_message_ports.get(&id).copied());
                    match index {
                        Some(index) => {
                            self.write_tag(SerializationTag::MessagePortReference);
                            self.writer.write_u32(index);
                            Ok(true)
                        }
                        // A port outside the transfer list cannot be cloned.
                        None => Err(SerializationCode::ValidationError),
                    }
                }
                SerializationTag::ArrayBuffer => {
                    let Some(contents) = self.delegate.array_buffer_bytes(value) else {
                        return Err(SerializationCode::ValidationError);
                    };
                    let Some(bytes) = contents else {
                        // Neutered buffers cannot be serialized.
                        return Err(SerializationCode::ValidationError);
                    };
                    if let Some(index) = self
                        .delegate
                        .object_identity(value)
                        .and_then(|id| self.transferred_array_buffers.get(&id).copied())
                    {
                        self.write_tag(SerializationTag::ArrayBufferTransfer);
                        self.writer.write_u32(index);
                        return Ok(true);
                    }
                    if !self.start_object_internal(value) {
                        return Ok(true);
                    }
                    self.write_tag(SerializationTag::ArrayBuffer);
                    self.writer.write_u32(bytes.len() as u32);
                    self.writer.write_bytes(&bytes);
                    Ok(true)
                }
                SerializationTag::ArrayBufferView => {
                    if self.check_for_duplicate(value) {
                        return Ok(true);
                    }
                    self.dump_array_buffer_view(value)?;
                    self.record_object(value);
                    Ok(true)
                }
                _ => Ok(false),
            }
        } else {
            // Any other cell kind serializes as null.
            self.write_tag(SerializationTag::Null);
            Ok(true)
        }
    }

    fn write_file(&mut self, file: &tandem_core::FileData) {
        self.blob_urls.push(file.url.to_string());
        self.write_string_data(&file.path);
        self.write_string_data(&file.url);
        self.write_string_data(&file.content_type);
    }

    fn run(&mut self, input: &ScriptValue) -> SerializationCode {
        let mut index_stack: SmallVec<[u32; 16]> = SmallVec::new();
        let mut length_stack: SmallVec<[u32; 16]> = SmallVec::new();
        let mut property_stack: Vec<Vec<Rc<str>>> = Vec::new();
        let mut input_object_stack: Vec<ScriptValue> = Vec::new();
        let mut state_stack: SmallVec<[WalkerState; 16]> = SmallVec::new();
        let mut state = WalkerState::StateUnknown;
        let mut in_value = input.clone();
        let mut tick_count = self.delegate.ticks_until_next_check();

        loop {
            match state {
                WalkerState::ArrayStartState => {
                    if input_object_stack.len() > MAXIMUM_FILTER_RECURSION {
                        return SerializationCode::StackOverflowError;
                    }
                    let length = self.delegate.array_length(&in_value);
                    if !self.start_array(&in_value, length) {
                        // Duplicate: the back-reference is the whole encoding.
                    } else {
                        input_object_stack.push(in_value.clone());
                        index_stack.push(0);
                        length_stack.push(length);
                        state = WalkerState::ArrayStartVisitMember;
                        continue;
                    }
                }
                WalkerState::ArrayStartVisitMember => {
                    tick_count -= 1;
                    if tick_count == 0 {
                        if self.delegate.did_time_out() {
                            return SerializationCode::InterruptedExecutionError;
                        }
                        tick_count = self.delegate.ticks_until_next_check();
                    }

                    let array = input_object_stack
                        .last()
                        .expect("array walk requires an input object")
                        .clone();
                    let index = *index_stack.last().expect("array walk requires an index");
                    if index == *length_stack.last().expect("array walk requires a length") {
                        index_stack.pop();
                        length_stack.pop();

                        let extra = self.delegate.get_own_non_index_property_names(&array);
                        if !extra.is_empty() {
                            self.writer.write_u32(NON_INDEX_PROPERTIES_TAG);
                            property_stack.push(extra);
                            index_stack.push(0);
                            state = WalkerState::ObjectStartVisitMember;
                            continue;
                        }

                        self.end_composite();
                        input_object_stack.pop();
                        // Composite finished; fall through to the pop logic.
                    } else {
                        match self.delegate.object_at_index(&array, index) {
                            None => {
                                // Hole: skip the index entirely.
                                *index_stack.last_mut().unwrap() += 1;
                                continue;
                            }
                            Some(element) => {
                                self.writer.write_u32(index);
                                in_value = element;
                                match self.dump_if_terminal(&in_value) {
                                    Err(code) => return code,
                                    Ok(true) => {
                                        *index_stack.last_mut().unwrap() += 1;
                                        continue;
                                    }
                                    Ok(false) => {
                                        state_stack.push(WalkerState::ArrayEndVisitMember);
                                        state = WalkerState::StateUnknown;
                                        continue;
                                    }
                                }
                            }
                        }
                    }
                }
                WalkerState::ArrayEndVisitMember => {
                    *index_stack.last_mut().expect("array walk requires an index") += 1;
                    state = WalkerState::ArrayStartVisitMember;
                    continue;
                }
                WalkerState::ObjectStartState => {
                    if input_object_stack.len() > MAXIMUM_FILTER_RECURSION {
                        return SerializationCode::StackOverflowError;
                    }
                    if !self.start_object(&in_value) {
                        // Duplicate: reference written.
                    } else {
                        // Every supported host object was handled as a
                        // terminal; a non-plain object reaching this point is
                        // not cloneable.
                        if !self.delegate.is_final_object(&in_value) {
                            return SerializationCode::DataCloneError;
                        }
                        let names = self.delegate.get_own_property_names(&in_value);
                        input_object_stack.push(in_value.clone());
                        index_stack.push(0);
                        property_stack.push(names);
                        state = WalkerState::ObjectStartVisitMember;
                        continue;
                    }
                }
                WalkerState::ObjectStartVisitMember => {
                    tick_count -= 1;
                    if tick_count == 0 {
                        if self.delegate.did_time_out() {
                            return SerializationCode::InterruptedExecutionError;
                        }
                        tick_count = self.delegate.ticks_until_next_check();
                    }

                    let object = input_object_stack
                        .last()
                        .expect("object walk requires an input object")
                        .clone();
                    let index = *index_stack.last().expect("object walk requires an index") as usize;
                    let properties = property_stack
                        .last()
                        .expect("object walk requires properties");
                    if index == properties.len() {
                        self.end_composite();
                        input_object_stack.pop();
                        index_stack.pop();
                        property_stack.pop();
                        // Composite finished; fall through to the pop logic.
                    } else {
                        let name = properties[index].clone();
                        let property = self.delegate.get_property(&object, &name);
                        if self.delegate.should_terminate() {
                            return SerializationCode::ExistingExceptionError;
                        }
                        match property {
                            None => {
                                // Property was removed during serialization.
                                *index_stack.last_mut().unwrap() += 1;
                                continue;
                            }
                            Some(property) => {
                                in_value = property;
                                self.write_string_data(&name);
                                if self.delegate.should_terminate() {
                                    return SerializationCode::ExistingExceptionError;
                                }
                                match self.dump_if_terminal(&in_value) {
                                    Err(code) => return code,
                                    Ok(true) => {
                                        state = WalkerState::ObjectEndVisitMember;
                                        continue;
                                    }
                                    Ok(false) => {
                                        state_stack.push(WalkerState::ObjectEndVisitMember);
                                        state = WalkerState::StateUnknown;
                                        continue;
                                    }
                                }
                            }
                        }
                    }
                }
                WalkerState::ObjectEndVisitMember => {
                    if self.delegate.should_terminate() {
                        return SerializationCode::ExistingExceptionError;
                    }
                    *index_stack.last_mut().expect("object walk requires an index") += 1;
                    state = WalkerState::ObjectStartVisitMember;
                    continue;
                }
                WalkerState::StateUnknown => match self.dump_if_terminal(&in_value) {
                    Err(code) => return code,
                    Ok(true) => {
                        // Terminal at the top of a walk segment; fall through
                        // to the pop logic.
                    }
                    Ok(false) => {
                        if self.delegate.is_array(&in_value) {
                            state = WalkerState::ArrayStartState;
                        } else {
                            state = WalkerState::ObjectStartState;
                        }
                        continue;
                    }
                },
            }

            // A composite (or top-level terminal) completed: resume the
            // suspended parent, or finish.
            let Some(resumed) = state_stack.pop() else {
                break;
            };
            state = resumed;

            tick_count -= 1;
            if tick_count == 0 {
                if self.delegate.did_time_out() {
                    return SerializationCode::InterruptedExecutionError;
                }
                tick_count = self.delegate.ticks_until_next_check();
            }
        }

        if self.failed {
            return SerializationCode::UnspecifiedError;
        }
        SerializationCode::SuccessfullyCompleted
    }
}
