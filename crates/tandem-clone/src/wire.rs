//! Little-endian wire primitives
//!
//! Multi-byte integers are little-endian on the wire regardless of host byte
//! order. Strings travel as UTF-16 code units. Every read is bounds-checked
//! before the buffer is touched; a failed read is a validation failure, never
//! undefined behavior.

/// Append-only wire writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    /// A fresh, empty writer.
    pub fn new() -> WireWriter {
        WireWriter { buffer: Vec::new() }
    }

    /// Take the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a little-endian u16.
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian u32.
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian i32.
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian i64.
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian u64.
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a double through its little-endian bit pattern.
    pub fn write_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a string's UTF-16 code units (no length prefix).
    pub fn write_utf16_units(&mut self, s: &str) {
        for unit in s.encode_utf16() {
            self.write_u16(unit);
        }
    }
}

/// Bounds-checked wire reader.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Read from the start of `data`.
    pub fn new(data: &'a [u8]) -> WireReader<'a> {
        WireReader { data, pos: 0 }
    }

    /// Bytes remaining.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True when the read position is at the end.
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Step back one byte (tag pushback).
    pub fn rewind_byte(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Read a little-endian u16.
    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian i32.
    pub fn read_i32(&mut self) -> Option<i32> {
        self.read_u32().map(|v| v as i32)
    }

    /// Read a little-endian i64.
    pub fn read_i64(&mut self) -> Option<i64> {
        self.read_u64().map(|v| v as i64)
    }

    /// Read a little-endian u64.
    pub fn read_u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    /// Read a double from its little-endian bit pattern.
    pub fn read_f64(&mut self) -> Option<f64> {
        self.read_u64().map(f64::from_bits)
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        self.take(n)
    }

    /// Read `length` UTF-16 code units into a string, replacing unpaired
    /// surrogates.
    pub fn read_utf16_string(&mut self, length: usize) -> Option<String> {
        // A length that cannot fit in the remaining buffer fails before any
        // allocation happens.
        let byte_len = length.checked_mul(2)?;
        if self.remaining() < byte_len {
            return None;
        }
        let mut units = Vec::with_capacity(length);
        for _ in 0..length {
            units.push(self.read_u16()?);
        }
        Some(String::from_utf16_lossy(&units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut w = WireWriter::new();
        w.write_u32(0x1122_3344);
        assert_eq!(w.into_bytes(), vec![0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_round_trip_integers() {
        let mut w = WireWriter::new();
        w.write_u8(7);
        w.write_u32(0xDEAD_BEEF);
        w.write_i64(-42);
        w.write_f64(1.5);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_u8(), Some(7));
        assert_eq!(r.read_u32(), Some(0xDEAD_BEEF));
        assert_eq!(r.read_i64(), Some(-42));
        assert_eq!(r.read_f64(), Some(1.5));
        assert!(r.is_at_end());
    }

    #[test]
    fn test_truncated_reads_fail() {
        let bytes = [1u8, 2];
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_u32(), None);
        // A failed read consumes nothing.
        assert_eq!(r.read_u16(), Some(0x0201));
    }

    #[test]
    fn test_utf16_round_trip() {
        let mut w = WireWriter::new();
        w.write_utf16_units("héllo ☃");
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        let s = r.read_utf16_string("héllo ☃".encode_utf16().count()).unwrap();
        assert_eq!(s, "héllo ☃");
    }

    #[test]
    fn test_utf16_length_overflow_is_checked() {
        let bytes = [0u8; 4];
        let mut r = WireReader::new(&bytes);
        assert!(r.read_utf16_string(usize::MAX).is_none());
    }
}
