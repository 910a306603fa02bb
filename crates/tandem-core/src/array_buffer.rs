//! ArrayBuffer backing storage
//!
//! The byte store behind ArrayBuffers and their views. A buffer can be
//! detached (after a transfer) at which point it reads as empty; views over a
//! detached buffer fail their reads.

use std::cell::RefCell;

/// Raw byte storage for an ArrayBuffer. `None` once detached.
#[derive(Debug)]
pub struct ArrayBufferData {
    data: RefCell<Option<Vec<u8>>>,
}

impl ArrayBufferData {
    /// Create a zero-filled buffer of the given byte length.
    pub fn new(byte_length: usize) -> Self {
        Self {
            data: RefCell::new(Some(vec![0; byte_length])),
        }
    }

    /// Create a buffer holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: RefCell::new(Some(bytes.to_vec())),
        }
    }

    /// Check if the buffer is detached
    pub fn is_detached(&self) -> bool {
        self.data.borrow().is_none()
    }

    /// Detach the buffer (for transfer operations)
    pub fn detach(&self) {
        *self.data.borrow_mut() = None;
    }

    /// Get the byte length (0 if detached)
    pub fn byte_length(&self) -> usize {
        self.data.borrow().as_ref().map_or(0, |d| d.len())
    }

    /// Move the contents out, leaving the buffer detached.
    ///
    /// Returns `None` if the buffer was already detached.
    pub fn transfer(&self) -> Option<Vec<u8>> {
        self.data.borrow_mut().take()
    }

    /// Copy the contents out without detaching.
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        self.data.borrow().as_ref().cloned()
    }

    /// Read a contiguous range; `None` if detached or out of bounds.
    pub fn read_bytes(&self, offset: usize, length: usize) -> Option<Vec<u8>> {
        let guard = self.data.borrow();
        let data = guard.as_ref()?;
        let end = offset.checked_add(length)?;
        if end > data.len() {
            return None;
        }
        Some(data[offset..end].to_vec())
    }

    /// Write bytes at an offset; false if detached or out of bounds.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> bool {
        let mut guard = self.data.borrow_mut();
        if let Some(data) = guard.as_mut() {
            if offset + src.len() <= data.len() {
                data[offset..offset + src.len()].copy_from_slice(src);
                return true;
            }
        }
        false
    }
}

/// The kind of an ArrayBuffer view.
///
/// Discriminant values are the wire subtags; they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ViewKind {
    /// DataView over arbitrary bytes
    DataView = 0,
    /// Int8Array
    Int8 = 1,
    /// Uint8Array
    Uint8 = 2,
    /// Uint8ClampedArray
    Uint8Clamped = 3,
    /// Int16Array
    Int16 = 4,
    /// Uint16Array
    Uint16 = 5,
    /// Int32Array
    Int32 = 6,
    /// Uint32Array
    Uint32 = 7,
    /// Float32Array
    Float32 = 8,
    /// Float64Array
    Float64 = 9,
}

impl ViewKind {
    /// Size of one element in bytes.
    pub const fn element_size(self) -> u32 {
        match self {
            ViewKind::DataView | ViewKind::Int8 | ViewKind::Uint8 | ViewKind::Uint8Clamped => 1,
            ViewKind::Int16 | ViewKind::Uint16 => 2,
            ViewKind::Int32 | ViewKind::Uint32 | ViewKind::Float32 => 4,
            ViewKind::Float64 => 8,
        }
    }

    /// Decode a wire subtag.
    pub const fn from_subtag(subtag: u8) -> Option<ViewKind> {
        Some(match subtag {
            0 => ViewKind::DataView,
            1 => ViewKind::Int8,
            2 => ViewKind::Uint8,
            3 => ViewKind::Uint8Clamped,
            4 => ViewKind::Int16,
            5 => ViewKind::Uint16,
            6 => ViewKind::Int32,
            7 => ViewKind::Uint32,
            8 => ViewKind::Float32,
            9 => ViewKind::Float64,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_read() {
        let ab = ArrayBufferData::new(8);
        assert_eq!(ab.byte_length(), 8);
        assert!(!ab.is_detached());
        assert!(ab.write_bytes(2, &[1, 2, 3]));
        assert_eq!(ab.read_bytes(2, 3), Some(vec![1, 2, 3]));
        assert_eq!(ab.read_bytes(6, 3), None); // Out of bounds
    }

    #[test]
    fn test_detach() {
        let ab = ArrayBufferData::new(4);
        ab.detach();
        assert!(ab.is_detached());
        assert_eq!(ab.byte_length(), 0);
        assert_eq!(ab.read_bytes(0, 1), None);
        assert!(!ab.write_bytes(0, &[1]));
    }

    #[test]
    fn test_transfer_detaches_source() {
        let ab = ArrayBufferData::from_bytes(&[9, 8, 7]);
        let contents = ab.transfer().unwrap();
        assert_eq!(contents, vec![9, 8, 7]);
        assert!(ab.is_detached());
        assert!(ab.transfer().is_none());
    }

    #[test]
    fn test_view_kind_subtags_round_trip() {
        for subtag in 0..10u8 {
            let kind = ViewKind::from_subtag(subtag).unwrap();
            assert_eq!(kind as u8, subtag);
        }
        assert!(ViewKind::from_subtag(10).is_none());
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(ViewKind::DataView.element_size(), 1);
        assert_eq!(ViewKind::Uint8Clamped.element_size(), 1);
        assert_eq!(ViewKind::Int16.element_size(), 2);
        assert_eq!(ViewKind::Uint32.element_size(), 4);
        assert_eq!(ViewKind::Float64.element_size(), 8);
    }
}
