//! The live-heap value handle the bridge wraps
//!
//! A `Value` is a cheap-clone tagged handle to an engine heap value, playing
//! the role a protected `JSValueRef` or a pinned `VALUE` plays against a real
//! engine. Objects have reference identity (two handles to the same heap
//! object compare equal by pointer); primitives are carried inline.
//!
//! The closed set of host object kinds matches exactly what the structured
//! clone grammar can carry. Anything else reachable from a clone walk is a
//! `DataCloneError` at the codec layer.

use crate::array_buffer::{ArrayBufferData, ViewKind};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// An engine heap value handle.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The undefined value (JS `undefined`; Ruby has no distinct undefined)
    Undefined,
    /// The null value (JS `null`, Ruby `nil`)
    Null,
    /// A boolean primitive
    Bool(bool),
    /// An integer-representable number
    Int(i64),
    /// A double number
    Double(f64),
    /// An immutable, identity-shareable string
    String(Rc<str>),
    /// A heap object with reference identity
    Object(ObjectRef),
}

impl Value {
    /// Build a string value, sharing the given storage.
    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::String(s.into())
    }

    /// True for `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for either number representation.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    /// True for an inline integer.
    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    /// True for a boolean primitive.
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    /// True for a string primitive.
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// True for any heap object.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// The inline integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The numeric value, widening integers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string storage, if this is a string.
    pub fn as_string(&self) -> Option<&Rc<str>> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The object handle, if this is an object.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Strict equality: value equality for primitives, reference identity
    /// for objects. `NaN == NaN` is false, as in both engines.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.same_identity(b),
            (a, b) if a.is_number() && b.is_number() => {
                // as_number is Some for both arms here
                a.as_number() == b.as_number()
                    && !a.as_number().is_some_and(f64::is_nan)
            }
            _ => false,
        }
    }
}

/// Metadata for a single File host object on either side of the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileData {
    /// Filesystem path
    pub path: Rc<str>,
    /// Blob URL the file is registered under
    pub url: Rc<str>,
    /// MIME content type
    pub content_type: Rc<str>,
}

/// RegExp flags that survive a structured clone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegExpFlags {
    /// `g`
    pub global: bool,
    /// `i`
    pub ignore_case: bool,
    /// `m`
    pub multiline: bool,
}

impl RegExpFlags {
    /// Canonical flag string, always in `g` `i` `m` order.
    pub fn to_flag_string(self) -> String {
        let mut s = String::with_capacity(3);
        if self.global {
            s.push('g');
        }
        if self.ignore_case {
            s.push('i');
        }
        if self.multiline {
            s.push('m');
        }
        s
    }

    /// Parse a flag string; unknown characters are ignored.
    pub fn from_flag_string(flags: &str) -> RegExpFlags {
        RegExpFlags {
            global: flags.contains('g'),
            ignore_case: flags.contains('i'),
            multiline: flags.contains('m'),
        }
    }
}

/// What a heap object is, beyond its properties.
#[derive(Debug)]
pub enum ObjectKind {
    /// A plain ("final") object: only its own properties matter
    Plain,
    /// An array: indexed elements plus optional named properties
    Array,
    /// Boxed Boolean object
    BooleanObject(bool),
    /// Boxed Number object
    NumberObject(f64),
    /// Boxed String object
    StringObject(Rc<str>),
    /// Date, as milliseconds since the epoch
    Date(f64),
    /// RegExp source and flags; never compiled or executed by the bridge
    RegExp {
        /// Pattern source text
        pattern: Rc<str>,
        /// g/i/m flags
        flags: RegExpFlags,
    },
    /// An ArrayBuffer and its (detachable) byte store
    ArrayBuffer(ArrayBufferData),
    /// A typed array or DataView over an ArrayBuffer object
    ArrayBufferView {
        /// Which view type
        kind: ViewKind,
        /// The backing ArrayBuffer object
        buffer: ObjectRef,
        /// Offset into the buffer in bytes
        byte_offset: u32,
        /// View length in bytes
        byte_length: u32,
    },
    /// Blob host object (URL registration, not contents)
    Blob {
        /// Blob URL
        url: Rc<str>,
        /// MIME content type
        content_type: Rc<str>,
        /// Size in bytes
        size: u64,
    },
    /// File host object
    File(FileData),
    /// FileList host object
    FileList(Vec<FileData>),
    /// ImageData pixel block
    ImageData {
        /// Width in pixels
        width: i32,
        /// Height in pixels
        height: i32,
        /// RGBA bytes, `width * height * 4` long
        data: Vec<u8>,
    },
    /// A MessagePort; carries only an opaque identity, ports move via the
    /// transfer list
    MessagePort(u64),
    /// A function; present so non-cloneable graphs are expressible
    Function(Rc<str>),
}

struct HeapObject {
    kind: ObjectKind,
    properties: RefCell<IndexMap<Rc<str>, Value>>,
    elements: RefCell<Vec<Option<Value>>>,
}

/// A reference-identity handle to a heap object.
#[derive(Clone)]
pub struct ObjectRef(Rc<HeapObject>);

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectRef({:p}, {:?})", Rc::as_ptr(&self.0), self.0.kind)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}
impl Eq for ObjectRef {}

impl ObjectRef {
    fn with_kind(kind: ObjectKind) -> ObjectRef {
        ObjectRef(Rc::new(HeapObject {
            kind,
            properties: RefCell::new(IndexMap::new()),
            elements: RefCell::new(Vec::new()),
        }))
    }

    /// A fresh plain object.
    pub fn new_plain() -> ObjectRef {
        Self::with_kind(ObjectKind::Plain)
    }

    /// A fresh array with `length` holes.
    pub fn new_array(length: u32) -> ObjectRef {
        let obj = Self::with_kind(ObjectKind::Array);
        obj.0.elements.borrow_mut().resize(length as usize, None);
        obj
    }

    /// A fresh host object of the given kind.
    pub fn new_host(kind: ObjectKind) -> ObjectRef {
        Self::with_kind(kind)
    }

    /// A fresh ArrayBuffer of `byte_length` zeroed bytes.
    pub fn new_array_buffer(byte_length: usize) -> ObjectRef {
        Self::with_kind(ObjectKind::ArrayBuffer(ArrayBufferData::new(byte_length)))
    }

    /// A fresh ArrayBuffer holding a copy of `bytes`.
    pub fn array_buffer_from_bytes(bytes: &[u8]) -> ObjectRef {
        Self::with_kind(ObjectKind::ArrayBuffer(ArrayBufferData::from_bytes(bytes)))
    }

    /// The object's kind.
    pub fn kind(&self) -> &ObjectKind {
        &self.0.kind
    }

    /// True if this is an array.
    pub fn is_array(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Array)
    }

    /// True if this is a plain ("final") object.
    pub fn is_plain(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Plain)
    }

    /// Pointer identity of the heap object.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }

    /// True when both handles name the same heap object.
    pub fn same_identity(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The backing byte store, when this is an ArrayBuffer.
    pub fn array_buffer_data(&self) -> Option<&ArrayBufferData> {
        match &self.0.kind {
            ObjectKind::ArrayBuffer(data) => Some(data),
            _ => None,
        }
    }

    /// Set (or overwrite) a named own property.
    pub fn set_property(&self, name: impl Into<Rc<str>>, value: Value) {
        self.0.properties.borrow_mut().insert(name.into(), value);
    }

    /// Read a named own property.
    pub fn get_property(&self, name: &str) -> Option<Value> {
        self.0.properties.borrow().get(name).cloned()
    }

    /// Remove a named own property.
    pub fn remove_property(&self, name: &str) -> Option<Value> {
        self.0.properties.borrow_mut().shift_remove(name)
    }

    /// Named own property names in insertion order.
    pub fn own_property_names(&self) -> Vec<Rc<str>> {
        self.0.properties.borrow().keys().cloned().collect()
    }

    /// Drop every named own property.
    pub fn clear_properties(&self) {
        self.0.properties.borrow_mut().clear();
    }

    /// Array length; 0 for non-arrays.
    pub fn array_length(&self) -> u32 {
        self.0.elements.borrow().len() as u32
    }

    /// Write an array element, growing the array if needed.
    pub fn set_element(&self, index: u32, value: Value) {
        let mut elements = self.0.elements.borrow_mut();
        if elements.len() <= index as usize {
            elements.resize(index as usize + 1, None);
        }
        elements[index as usize] = Some(value);
    }

    /// Read an array element; `None` for holes and out-of-range reads.
    pub fn element(&self, index: u32) -> Option<Value> {
        self.0
            .elements
            .borrow()
            .get(index as usize)
            .and_then(|slot| slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_eq_primitives() {
        assert!(Value::Null.strict_eq(&Value::Null));
        assert!(Value::Int(1).strict_eq(&Value::Double(1.0)));
        assert!(!Value::Double(f64::NAN).strict_eq(&Value::Double(f64::NAN)));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        assert!(Value::string("a").strict_eq(&Value::string("a")));
    }

    #[test]
    fn test_object_identity() {
        let a = ObjectRef::new_plain();
        let b = a.clone();
        let c = ObjectRef::new_plain();
        assert!(Value::Object(a.clone()).strict_eq(&Value::Object(b)));
        assert!(!Value::Object(a).strict_eq(&Value::Object(c)));
    }

    #[test]
    fn test_property_insertion_order() {
        let obj = ObjectRef::new_plain();
        obj.set_property("b", Value::Int(1));
        obj.set_property("a", Value::Int(2));
        obj.set_property("c", Value::Int(3));
        let names: Vec<String> = obj
            .own_property_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn test_array_elements_and_holes() {
        let arr = ObjectRef::new_array(3);
        arr.set_element(0, Value::Int(10));
        arr.set_element(2, Value::Int(30));
        assert_eq!(arr.array_length(), 3);
        assert!(arr.element(1).is_none());
        assert!(arr.element(0).unwrap().strict_eq(&Value::Int(10)));
        arr.set_element(5, Value::Int(60));
        assert_eq!(arr.array_length(), 6);
    }

    #[test]
    fn test_regexp_flag_round_trip() {
        let flags = RegExpFlags {
            global: true,
            ignore_case: false,
            multiline: true,
        };
        assert_eq!(flags.to_flag_string(), "gm");
        assert_eq!(RegExpFlags::from_flag_string("gm"), flags);
    }
}
