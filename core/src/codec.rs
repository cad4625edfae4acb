//! Deterministic little-endian binary encoding.
//!
//! The wire format and the hashing format are the same encoding: there is
//! exactly one way to serialize any logical value, which is what makes
//! `SHA256d(signing_header(tx))` and `SHA256d(header_bytes)` meaningful as
//! identities rather than implementation details. No `serde`-derived format
//! is used here on purpose — a derive macro's layout is an implementation
//! detail of the macro and its attribute set, not a protocol guarantee.

use shared::error::ErrorKind;
use shared::Hash256;

/// A byte cursor over a decode buffer, tracking how much has been consumed.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ErrorKind> {
        if self.buf.len() - self.pos < n {
            return Err(ErrorKind::Codec(format!(
                "premature EOF: need {n} bytes, have {}",
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ErrorKind> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, ErrorKind> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64, ErrorKind> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_hash(&mut self) -> Result<Hash256, ErrorKind> {
        let bytes: [u8; 32] = self.take(32)?.try_into().unwrap();
        Ok(Hash256::from_bytes(bytes))
    }

    pub fn read_fixed(&mut self, n: usize) -> Result<Vec<u8>, ErrorKind> {
        Ok(self.take(n)?.to_vec())
    }

    /// Reads a `u32` length prefix followed by that many bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ErrorKind> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a `u32` count prefix, then calls `f` that many times.
    pub fn read_vec<T>(
        &mut self,
        mut f: impl FnMut(&mut Self) -> Result<T, ErrorKind>,
    ) -> Result<Vec<T>, ErrorKind> {
        let count = self.read_u32()?;
        // Guard against a count claiming more elements than bytes remain;
        // every element is at least 1 byte so this bound is always valid.
        if count as usize > self.buf.len() - self.pos {
            return Err(ErrorKind::Codec(format!(
                "count overflow: {count} exceeds remaining buffer"
            )));
        }
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(f(self)?);
        }
        Ok(out)
    }

    /// Returns an error if any bytes remain unconsumed.
    pub fn finish(self) -> Result<(), ErrorKind> {
        if self.pos != self.buf.len() {
            return Err(ErrorKind::Codec(format!(
                "{} trailing bytes after decode",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// An append-only byte buffer used to build the canonical encoding.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_hash(&mut self, v: &Hash256) -> &mut Self {
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    pub fn write_fixed(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Writes a `u32` length prefix followed by `v`.
    pub fn write_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.write_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    /// Writes a `u32` count prefix, then calls `f` for each element.
    pub fn write_vec<T>(&mut self, items: &[T], mut f: impl FnMut(&mut Self, &T)) -> &mut Self {
        self.write_u32(items.len() as u32);
        for item in items {
            f(self, item);
        }
        self
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Implemented by every type that has a canonical binary encoding.
pub trait Codec: Sized {
    fn encode(&self, w: &mut Writer);
    fn decode(r: &mut Reader) -> Result<Self, ErrorKind>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, ErrorKind> {
        let mut r = Reader::new(buf);
        let value = Self::decode(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrips() {
        let mut w = Writer::new();
        w.write_u32(0xDEAD_BEEF);
        let bytes = w.into_bytes();
        assert_eq!(bytes, 0xDEAD_BEEFu32.to_le_bytes());
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        r.finish().unwrap();
    }

    #[test]
    fn premature_eof_is_an_error() {
        let bytes = [1u8, 2];
        let mut r = Reader::new(&bytes);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn trailing_bytes_is_an_error() {
        let mut w = Writer::new();
        w.write_u8(1);
        let mut bytes = w.into_bytes();
        bytes.push(0xFF);
        let mut r = Reader::new(&bytes);
        r.read_u8().unwrap();
        assert!(r.finish().is_err());
    }

    #[test]
    fn count_overflow_is_rejected() {
        // Claims 1,000,000 elements but supplies none.
        let mut w = Writer::new();
        w.write_u32(1_000_000);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let result: Result<Vec<u8>, ErrorKind> = r.read_vec(|r| r.read_u8());
        assert!(result.is_err());
    }

    #[test]
    fn bytes_field_roundtrips() {
        let mut w = Writer::new();
        w.write_bytes(b"hello");
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_bytes().unwrap(), b"hello");
        r.finish().unwrap();
    }
}
