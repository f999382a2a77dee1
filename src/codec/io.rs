//! Byte-level cursor and length-prefix helpers shared by every tagged value
//! encoder/decoder in [`super::value`].

use super::DecodeError;

/// Cursor over an immutable byte slice. Every multi-byte read is big-endian,
/// matching the wire format's framing.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof { offset: self.pos });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    pub fn utf8(&mut self, len: usize) -> Result<String, DecodeError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    /// Reads a u16-width declared length, rejecting negative (sign-extended)
    /// or out-of-range values before the caller allocates or slices.
    pub fn len16(&mut self) -> Result<usize, DecodeError> {
        let offset = self.pos;
        let raw = self.u16()? as i16 as i64;
        self.validate_len(raw, offset)
    }

    /// Reads a u32-width declared length with the same validation as
    /// [`Reader::len16`].
    pub fn len32(&mut self) -> Result<usize, DecodeError> {
        let offset = self.pos;
        let raw = self.u32()? as i32 as i64;
        self.validate_len(raw, offset)
    }

    fn validate_len(&self, raw: i64, offset: usize) -> Result<usize, DecodeError> {
        if raw < 0 {
            return Err(DecodeError::NegativeLength { offset });
        }
        let len = raw as usize;
        if len > self.remaining() {
            return Err(DecodeError::LengthOverflow { len, offset });
        }
        Ok(len)
    }
}

/// Extension trait for appending big-endian primitives to the output
/// buffer. Kept as a trait (rather than free functions) so call sites read
/// as `out.write_u16(...)`, mirroring the teacher's `tag_*` writer methods.
pub trait WriteExt {
    fn write_u8(&mut self, v: u8);
    fn write_i16(&mut self, v: i16);
    fn write_u16(&mut self, v: u16);
    fn write_i32(&mut self, v: i32);
    fn write_u32(&mut self, v: u32);
    fn write_i64(&mut self, v: i64);
    fn write_f32(&mut self, v: f32);
    fn write_f64(&mut self, v: f64);
    fn write_bytes(&mut self, v: &[u8]);
    fn write_str16(&mut self, v: &str);
}

impl WriteExt for Vec<u8> {
    fn write_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn write_i16(&mut self, v: i16) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn write_u16(&mut self, v: u16) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn write_i32(&mut self, v: i32) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn write_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn write_f32(&mut self, v: f32) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn write_f64(&mut self, v: f64) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn write_bytes(&mut self, v: &[u8]) {
        self.extend_from_slice(v);
    }

    fn write_str16(&mut self, v: &str) {
        self.write_u16(v.len() as u16);
        self.write_bytes(v.as_bytes());
    }
}
