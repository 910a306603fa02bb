//! Wire-format decoder that reconstructs a value graph in a destination
//! engine
//!
//! The decoder mirrors the serializer's iterative state machine and keeps its
//! own backreference pool, appended in exactly the order the serializer
//! recorded composites, so object-reference indices line up between the two
//! passes. Containers are rebuilt through the delegate's generic
//! constructors, which is what makes cross-engine transfer work: the bytes do
//! not care which engine produced them.
//!
//! All reads are bounds-checked; malformed input yields `ValidationError`,
//! never a crash.

use crate::delegate::SerializationDelegate;
use crate::serializer::{MAXIMUM_FILTER_RECURSION, WalkerState};
use crate::tags::{
    CURRENT_VERSION, NON_INDEX_PROPERTIES_TAG, STRING_POOL_TAG, SerializationCode,
    SerializationTag, TERMINATOR_TAG,
};
use crate::wire::WireReader;
use smallvec::SmallVec;
use std::rc::Rc;
use tandem_core::{FileData, ScriptValue, ViewKind};

/// Result of one deserialize pass.
pub type DeserializationResult = (ScriptValue, SerializationCode);

struct CachedString {
    storage: Rc<str>,
    script_value: Option<ScriptValue>,
}

enum StringData {
    Ref(usize),
    Terminator,
    Failed,
}

enum Terminal {
    Value(ScriptValue),
    NotTerminal,
    Failed,
}

/// Decodes one wire buffer. Transient per call.
pub struct CloneDeserializer<'a> {
    delegate: &'a dyn SerializationDelegate,
    reader: WireReader<'a>,
    version: u32,
    constant_pool: Vec<CachedString>,
    gc_buffer: Vec<ScriptValue>,
    message_ports: Option<&'a [ScriptValue]>,
    array_buffer_contents: Option<&'a [Vec<u8>]>,
    array_buffers: Vec<Option<ScriptValue>>,
    failed: bool,
}

impl<'a> CloneDeserializer<'a> {
    /// Decode `buffer` into `delegate`'s engine, resolving transferred ports
    /// and array-buffer contents.
    pub fn deserialize(
        delegate: &'a dyn SerializationDelegate,
        message_ports: Option<&'a [ScriptValue]>,
        array_buffer_contents: Option<&'a [Vec<u8>]>,
        buffer: &'a [u8],
    ) -> DeserializationResult {
        if buffer.is_empty() {
            return (delegate.null(), SerializationCode::UnspecifiedError);
        }
        let mut deserializer =
            CloneDeserializer::new(delegate, message_ports, array_buffer_contents, buffer);
        if !deserializer.is_valid() {
            return (ScriptValue::empty(), SerializationCode::ValidationError);
        }
        deserializer.run()
    }

    /// Fast path matching [`CloneSerializer::serialize_string`]: decode a
    /// lone non-empty string payload.
    ///
    /// [`CloneSerializer::serialize_string`]: crate::serializer::CloneSerializer::serialize_string
    pub fn deserialize_string(buffer: &[u8]) -> Option<String> {
        let mut reader = WireReader::new(buffer);
        let version = reader.read_u32()?;
        if version > CURRENT_VERSION {
            return None;
        }
        let tag = reader.read_u8()?;
        if tag != SerializationTag::String as u8 {
            return None;
        }
        let length = reader.read_u32()?;
        if length >= STRING_POOL_TAG {
            return None;
        }
        reader.read_utf16_string(length as usize)
    }

    fn new(
        delegate: &'a dyn SerializationDelegate,
        message_ports: Option<&'a [ScriptValue]>,
        array_buffer_contents: Option<&'a [Vec<u8>]>,
        buffer: &'a [u8],
    ) -> CloneDeserializer<'a> {
        let mut reader = WireReader::new(buffer);
        let version = reader.read_u32().unwrap_or(u32::MAX);
        let transferred = array_buffer_contents.map_or(0, <[Vec<u8>]>::len);
        CloneDeserializer {
            delegate,
            reader,
            version,
            constant_pool: Vec::new(),
            gc_buffer: Vec::new(),
            message_ports,
            array_buffer_contents,
            array_buffers: vec![None; transferred],
            failed: false,
        }
    }

    fn is_valid(&self) -> bool {
        self.version <= CURRENT_VERSION
    }

    fn fail(&mut self) {
        self.failed = true;
    }

    fn read_pool_index(&mut self, pool_size: usize) -> Option<u32> {
        if pool_size <= 0xFF {
            self.reader.read_u8().map(u32::from)
        } else if pool_size <= 0xFFFF {
            self.reader.read_u16().map(u32::from)
        } else {
            self.reader.read_u32()
        }
    }

    fn read_string_data(&mut self) -> StringData {
        if self.failed {
            return StringData::Failed;
        }
        let Some(length) = self.reader.read_u32() else {
            self.fail();
            return StringData::Failed;
        };
        if length == TERMINATOR_TAG {
            return StringData::Terminator;
        }
        if length == STRING_POOL_TAG {
            let index = match self.read_pool_index(self.constant_pool.len()) {
                Some(index) => index as usize,
                None => {
                    self.fail();
                    return StringData::Failed;
                }
            };
            if index >= self.constant_pool.len() {
                self.fail();
                return StringData::Failed;
            }
            return StringData::Ref(index);
        }
        let Some(string) = self.reader.read_utf16_string(length as usize) else {
            self.fail();
            return StringData::Failed;
        };
        self.constant_pool.push(CachedString {
            storage: Rc::from(string),
            script_value: None,
        });
        StringData::Ref(self.constant_pool.len() - 1)
    }

    fn cached_storage(&self, index: usize) -> Rc<str> {
        self.constant_pool[index].storage.clone()
    }

    /// The cached string's script value, created on first use so repeated
    /// pool references share one engine string.
    fn cached_script_value(&mut self, index: usize) -> ScriptValue {
        if self.constant_pool[index].script_value.is_none() {
            let value = self
                .delegate
                .from_shared_string(&self.constant_pool[index].storage);
            self.constant_pool[index].script_value = Some(value);
        }
        self.constant_pool[index]
            .script_value
            .clone()
            .expect("cached script value was just created")
    }

    fn read_tag(&mut self) -> SerializationTag {
        match self.reader.read_u8() {
            Some(byte) => SerializationTag::from_u8(byte).unwrap_or(SerializationTag::Error),
            None => SerializationTag::Error,
        }
    }

    fn read_file(&mut self) -> Option<FileData> {
        let StringData::Ref(path) = self.read_string_data() else {
            return None;
        };
        let StringData::Ref(url) = self.read_string_data() else {
            return None;
        };
        let StringData::Ref(content_type) = self.read_string_data() else {
            return None;
        };
        Some(FileData {
            path: self.cached_storage(path),
            url: self.cached_storage(url),
            content_type: self.cached_storage(content_type),
        })
    }

    fn read_array_buffer_view(&mut self) -> Option<ScriptValue> {
        let subtag = self.reader.read_u8()?;
        let kind = ViewKind::from_subtag(subtag)?;
        let byte_offset = self.reader.read_u32()?;
        let byte_length = self.reader.read_u32()?;

        let buffer = match self.read_terminal() {
            Terminal::Value(value) => value,
            Terminal::NotTerminal | Terminal::Failed => return None,
        };
        if self.delegate.tag_for_object(&buffer) != Some(SerializationTag::ArrayBuffer) {
            return None;
        }

        let element_size = kind.element_size();
        let length = byte_length / element_size;
        if length * element_size != byte_length {
            return None;
        }

        self.delegate
            .array_buffer_view(kind, &buffer, byte_offset, byte_length)
    }

    fn read_terminal(&mut self) -> Terminal {
        macro_rules! try_read {
            ($expr:expr) => {
                match $expr {
                    Some(v) => v,
                    None => {
                        self.fail();
                        return Terminal::Failed;
                    }
                }
            };
        }

        let tag = self.read_tag();
        match tag {
            SerializationTag::Undefined => Terminal::Value(self.delegate.undefined()),
            SerializationTag::Null => Terminal::Value(self.delegate.null()),
            SerializationTag::Int => {
                let i = try_read!(self.reader.read_i64());
                Terminal::Value(self.delegate.from_int(i))
            }
            SerializationTag::Zero => Terminal::Value(self.delegate.from_int(0)),
            SerializationTag::One => Terminal::Value(self.delegate.from_int(1)),
            SerializationTag::False => Terminal::Value(self.delegate.from_bool(false)),
            SerializationTag::True => Terminal::Value(self.delegate.from_bool(true)),
            SerializationTag::FalseObject => {
                let value = self.delegate.boolean_object(false);
                self.gc_buffer.push(value.clone());
                Terminal::Value(value)
            }
            SerializationTag::TrueObject => {
                let value = self.delegate.boolean_object(true);
                self.gc_buffer.push(value.clone());
                Terminal::Value(value)
            }
            SerializationTag::Double => {
                let d = try_read!(self.reader.read_f64());
                Terminal::Value(self.delegate.from_double(d))
            }
            SerializationTag::NumberObject => {
                let d = try_read!(self.reader.read_f64());
                let value = self.delegate.number_object(d);
                self.gc_buffer.push(value.clone());
                Terminal::Value(value)
            }
            SerializationTag::Date => {
                let d = try_read!(self.reader.read_f64());
                Terminal::Value(self.delegate.date(d))
            }
            SerializationTag::File => {
                let file = try_read!(self.read_file());
                Terminal::Value(self.delegate.file(file))
            }
            SerializationTag::FileList => {
                let length = try_read!(self.reader.read_u32());
                let mut files = Vec::with_capacity(length.min(4096) as usize);
                for _ in 0..length {
                    files.push(try_read!(self.read_file()));
                }
                Terminal::Value(self.delegate.file_list_value(files))
            }
            SerializationTag::ImageData => {
                let width = try_read!(self.reader.read_i32());
                let height = try_read!(self.reader.read_i32());
                let length = try_read!(self.reader.read_u32());
                let data = try_read!(self.reader.read_bytes(length as usize)).to_vec();
                Terminal::Value(self.delegate.image_data_value(width, height, data))
            }
            SerializationTag::Blob => {
                let StringData::Ref(url) = self.read_string_data() else {
                    self.fail();
                    return Terminal::Failed;
                };
                let StringData::Ref(content_type) = self.read_string_data() else {
                    self.fail();
                    return Terminal::Failed;
                };
                let size = try_read!(self.reader.read_u64());
                let url = self.cached_storage(url);
                let content_type = self.cached_storage(content_type);
                Terminal::Value(self.delegate.blob(&url, &content_type, size))
            }
            SerializationTag::String => match self.read_string_data() {
                StringData::Ref(index) => Terminal::Value(self.cached_script_value(index)),
                StringData::Terminator | StringData::Failed => {
                    self.fail();
                    Terminal::Failed
                }
            },
            SerializationTag::EmptyString => Terminal::Value(self.delegate.empty_string()),
            SerializationTag::StringObject => match self.read_string_data() {
                StringData::Ref(index) => {
                    let storage = self.cached_storage(index);
                    let value = self.delegate.string_object(&storage);
                    self.gc_buffer.push(value.clone());
                    Terminal::Value(value)
                }
                StringData::Terminator | StringData::Failed => {
                    self.fail();
                    Terminal::Failed
                }
            },
            SerializationTag::EmptyStringObject => {
                let value = self.delegate.string_object(&Rc::from(""));
                self.gc_buffer.push(value.clone());
                Terminal::Value(value)
            }
            SerializationTag::RegExp => {
                let StringData::Ref(pattern) = self.read_string_data() else {
                    self.fail();
                    return Terminal::Failed;
                };
                let StringData::Ref(flags) = self.read_string_data() else {
                    self.fail();
                    return Terminal::Failed;
                };
                let pattern = self.cached_storage(pattern);
                let flags = self.cached_storage(flags);
                Terminal::Value(self.delegate.regexp(&pattern, &flags))
            }
            SerializationTag::ObjectReference => {
                let index = match self.read_pool_index(self.gc_buffer.len()) {
                    Some(index) => index as usize,
                    None => {
                        self.fail();
                        return Terminal::Failed;
                    }
                };
                match self.gc_buffer.get(index) {
                    Some(value) => Terminal::Value(value.clone()),
                    None => {
                        self.fail();
                        Terminal::Failed
                    }
                }
            }
            SerializationTag::MessagePortReference => {
                let index = try_read!(self.reader.read_u32()) as usize;
                match self.message_ports.and_then(|ports| ports.get(index)) {
                    Some(port) => Terminal::Value(port.clone()),
                    None => {
                        self.fail();
                        Terminal::Failed
                    }
                }
            }
            SerializationTag::ArrayBuffer => {
                let length = try_read!(self.reader.read_u32());
                let bytes = try_read!(self.reader.read_bytes(length as usize));
                let value = self.delegate.array_buffer(bytes);
                self.gc_buffer.push(value.clone());
                Terminal::Value(value)
            }
            SerializationTag::ArrayBufferTransfer => {
                let index = try_read!(self.reader.read_u32()) as usize;
                let Some(contents) = self.array_buffer_contents else {
                    self.fail();
                    return Terminal::Failed;
                };
                if index >= contents.len() {
                    self.fail();
                    return Terminal::Failed;
                }
                if self.array_buffers[index].is_none() {
                    // Re-home the transferred contents into this engine once;
                    // later references share the same buffer.
                    self.array_buffers[index] = Some(self.delegate.array_buffer(&contents[index]));
                }
                Terminal::Value(
                    self.array_buffers[index]
                        .clone()
                        .expect("transferred buffer was just created"),
                )
            }
            SerializationTag::ArrayBufferView => match self.read_array_buffer_view() {
                Some(view) => {
                    self.gc_buffer.push(view.clone());
                    Terminal::Value(view)
                }
                None => {
                    self.fail();
                    Terminal::Failed
                }
            },
            SerializationTag::Array | SerializationTag::Object | SerializationTag::Error => {
                // Not a terminal: push the tag back for the container logic.
                self.reader.rewind_byte();
                Terminal::NotTerminal
            }
        }
    }

    fn put_indexed(&self, array: &ScriptValue, index: u32, value: &ScriptValue) {
        self.delegate.set_array_element(array, index, value);
    }

    fn put_named(&self, object: &ScriptValue, name: &Rc<str>, value: &ScriptValue) {
        self.delegate.set_object_property(object, name, value);
    }

    fn run(&mut self) -> DeserializationResult {
        let mut index_stack: SmallVec<[u32; 16]> = SmallVec::new();
        let mut property_name_stack: Vec<Rc<str>> = Vec::new();
        let mut output_object_stack: Vec<ScriptValue> = Vec::new();
        let mut state_stack: SmallVec<[WalkerState; 16]> = SmallVec::new();
        let mut state = WalkerState::StateUnknown;
        let mut out_value = ScriptValue::empty();
        let mut tick_count = self.delegate.ticks_until_next_check();

        loop {
            match state {
                WalkerState::ArrayStartState => {
                    let Some(length) = self.reader.read_u32() else {
                        return self.error();
                    };
                    let out_array = self.delegate.construct_empty_array(length);
                    self.gc_buffer.push(out_array.clone());
                    output_object_stack.push(out_array);
                    state = WalkerState::ArrayStartVisitMember;
                    continue;
                }
                WalkerState::ArrayStartVisitMember => {
                    tick_count -= 1;
                    if tick_count == 0 {
                        if self.delegate.did_time_out() {
                            return (
                                ScriptValue::empty(),
                                SerializationCode::InterruptedExecutionError,
                            );
                        }
                        tick_count = self.delegate.ticks_until_next_check();
                    }

                    let Some(index) = self.reader.read_u32() else {
                        return self.error();
                    };
                    if index == TERMINATOR_TAG {
                        out_value = output_object_stack
                            .pop()
                            .expect("array walk requires an output object");
                        // Composite finished; fall through to the pop logic.
                    } else if index == NON_INDEX_PROPERTIES_TAG {
                        state = WalkerState::ObjectStartVisitMember;
                        continue;
                    } else {
                        match self.read_terminal() {
                            Terminal::Value(terminal) => {
                                let array = output_object_stack
                                    .last()
                                    .expect("array walk requires an output object")
                                    .clone();
                                self.put_indexed(&array, index, &terminal);
                                continue;
                            }
                            Terminal::Failed => return self.error(),
                            Terminal::NotTerminal => {
                                index_stack.push(index);
                                state_stack.push(WalkerState::ArrayEndVisitMember);
                                state = WalkerState::StateUnknown;
                                continue;
                            }
                        }
                    }
                }
                WalkerState::ArrayEndVisitMember => {
                    let array = output_object_stack
                        .last()
                        .expect("array walk requires an output object")
                        .clone();
                    let index = index_stack.pop().expect("array walk requires an index");
                    self.put_indexed(&array, index, &out_value);
                    state = WalkerState::ArrayStartVisitMember;
                    continue;
                }
                WalkerState::ObjectStartState => {
                    if output_object_stack.len() > MAXIMUM_FILTER_RECURSION {
                        return (ScriptValue::empty(), SerializationCode::StackOverflowError);
                    }
                    let out_object = self.delegate.construct_empty_object();
                    self.gc_buffer.push(out_object.clone());
                    output_object_stack.push(out_object);
                    state = WalkerState::ObjectStartVisitMember;
                    continue;
                }
                WalkerState::ObjectStartVisitMember => {
                    tick_count -= 1;
                    if tick_count == 0 {
                        if self.delegate.did_time_out() {
                            return (
                                ScriptValue::empty(),
                                SerializationCode::InterruptedExecutionError,
                            );
                        }
                        tick_count = self.delegate.ticks_until_next_check();
                    }

                    match self.read_string_data() {
                        StringData::Failed => return self.error(),
                        StringData::Terminator => {
                            out_value = output_object_stack
                                .pop()
                                .expect("object walk requires an output object");
                            // Composite finished; fall through to the pop
                            // logic.
                        }
                        StringData::Ref(name_index) => {
                            let name = self.cached_storage(name_index);
                            match self.read_terminal() {
                                Terminal::Value(terminal) => {
                                    let object = output_object_stack
                                        .last()
                                        .expect("object walk requires an output object")
                                        .clone();
                                    self.put_named(&object, &name, &terminal);
                                    continue;
                                }
                                Terminal::Failed => return self.error(),
                                Terminal::NotTerminal => {
                                    state_stack.push(WalkerState::ObjectEndVisitMember);
                                    property_name_stack.push(name);
                                    state = WalkerState::StateUnknown;
                                    continue;
                                }
                            }
                        }
                    }
                }
                WalkerState::ObjectEndVisitMember => {
                    let object = output_object_stack
                        .last()
                        .expect("object walk requires an output object")
                        .clone();
                    let name = property_name_stack
                        .pop()
                        .expect("object walk requires a property name");
                    self.put_named(&object, &name, &out_value);
                    state = WalkerState::ObjectStartVisitMember;
                    continue;
                }
                WalkerState::StateUnknown => {
                    match self.read_terminal() {
                        Terminal::Value(terminal) => {
                            out_value = terminal;
                            // Fall through to the pop logic.
                        }
                        Terminal::Failed => return self.error(),
                        Terminal::NotTerminal => {
                            let tag = self.read_tag();
                            if tag == SerializationTag::Array {
                                state = WalkerState::ArrayStartState;
                                continue;
                            }
                            if tag == SerializationTag::Object {
                                state = WalkerState::ObjectStartState;
                                continue;
                            }
                            return self.error();
                        }
                    }
                }
            }

            let Some(resumed) = state_stack.pop() else {
                break;
            };
            state = resumed;

            tick_count -= 1;
            if tick_count == 0 {
                if self.delegate.did_time_out() {
                    return (
                        ScriptValue::empty(),
                        SerializationCode::InterruptedExecutionError,
                    );
                }
                tick_count = self.delegate.ticks_until_next_check();
            }
        }

        debug_assert!(!out_value.has_no_value());
        debug_assert!(!self.failed);
        (out_value, SerializationCode::SuccessfullyCompleted)
    }

    fn error(&mut self) -> DeserializationResult {
        self.fail();
        (ScriptValue::empty(), SerializationCode::ValidationError)
    }
}
