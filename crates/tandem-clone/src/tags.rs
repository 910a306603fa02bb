//! Wire-format tags and version constants
//!
//! These values are persisted: they can never be reordered or renumbered,
//! and any new tag must be appended to the end of the list.

/// Serialization format version.
///
/// Initial version was 1.
/// Version 2 added the object-reference tag and support for cyclic graphs.
/// Version 3 added the boxed Boolean/Number/String object tags.
/// Version 4 added non-index properties of arrays.
pub const CURRENT_VERSION: u32 = 4;

/// Terminates an object's property list and an array's member list.
pub const TERMINATOR_TAG: u32 = 0xFFFF_FFFF;
/// Marks a back-reference into the string constant pool.
pub const STRING_POOL_TAG: u32 = 0xFFFF_FFFE;
/// Introduces an array's named (non-index) property section.
pub const NON_INDEX_PROPERTIES_TAG: u32 = 0xFFFF_FFFD;

/// One-byte value tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SerializationTag {
    /// Array container
    Array = 1,
    /// Object container
    Object = 2,
    /// The undefined value
    Undefined = 3,
    /// The null value
    Null = 4,
    /// Generic int64 follows
    Int = 5,
    /// The integer zero
    Zero = 6,
    /// The integer one
    One = 7,
    /// Boolean false
    False = 8,
    /// Boolean true
    True = 9,
    /// A double follows
    Double = 10,
    /// A Date's epoch-milliseconds double follows
    Date = 11,
    /// File data follows
    File = 12,
    /// FileList data follows
    FileList = 13,
    /// ImageData pixels follow
    ImageData = 14,
    /// Blob registration follows
    Blob = 15,
    /// String data follows
    String = 16,
    /// The empty string
    EmptyString = 17,
    /// RegExp pattern and flags follow
    RegExp = 18,
    /// Back-reference into the object pool
    ObjectReference = 19,
    /// Index into the transferred message-port list
    MessagePortReference = 20,
    /// ArrayBuffer bytes follow
    ArrayBuffer = 21,
    /// ArrayBuffer view header follows
    ArrayBufferView = 22,
    /// Index into the transferred array-buffer list
    ArrayBufferTransfer = 23,
    /// Boxed Boolean true
    TrueObject = 24,
    /// Boxed Boolean false
    FalseObject = 25,
    /// Boxed String, string data follows
    StringObject = 26,
    /// Boxed empty String
    EmptyStringObject = 27,
    /// Boxed Number, double follows
    NumberObject = 28,
    /// Read past the end of the buffer
    Error = 255,
}

impl SerializationTag {
    /// Decode a tag byte. `None` for bytes outside the closed set.
    pub const fn from_u8(byte: u8) -> Option<SerializationTag> {
        Some(match byte {
            1 => SerializationTag::Array,
            2 => SerializationTag::Object,
            3 => SerializationTag::Undefined,
            4 => SerializationTag::Null,
            5 => SerializationTag::Int,
            6 => SerializationTag::Zero,
            7 => SerializationTag::One,
            8 => SerializationTag::False,
            9 => SerializationTag::True,
            10 => SerializationTag::Double,
            11 => SerializationTag::Date,
            12 => SerializationTag::File,
            13 => SerializationTag::FileList,
            14 => SerializationTag::ImageData,
            15 => SerializationTag::Blob,
            16 => SerializationTag::String,
            17 => SerializationTag::EmptyString,
            18 => SerializationTag::RegExp,
            19 => SerializationTag::ObjectReference,
            20 => SerializationTag::MessagePortReference,
            21 => SerializationTag::ArrayBuffer,
            22 => SerializationTag::ArrayBufferView,
            23 => SerializationTag::ArrayBufferTransfer,
            24 => SerializationTag::TrueObject,
            25 => SerializationTag::FalseObject,
            26 => SerializationTag::StringObject,
            27 => SerializationTag::EmptyStringObject,
            28 => SerializationTag::NumberObject,
            255 => SerializationTag::Error,
            _ => return None,
        })
    }
}

/// Outcome of a serialize or deserialize pass.
///
/// These are result codes, not exceptions: the codec reports them as data
/// and only the outermost public entry point converts them into an engine
/// exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationCode {
    /// The pass completed.
    SuccessfullyCompleted,
    /// The graph was nested beyond the traversal ceiling.
    StackOverflowError,
    /// The host signaled termination or a timeout expired.
    InterruptedExecutionError,
    /// Malformed, truncated or out-of-range input.
    ValidationError,
    /// An unsupported live object was reachable from the graph.
    DataCloneError,
    /// A property getter threw during the walk.
    ExistingExceptionError,
    /// Anything else.
    UnspecifiedError,
}

impl SerializationCode {
    /// True only for the success code.
    pub fn is_success(self) -> bool {
        self == SerializationCode::SuccessfullyCompleted
    }
}
