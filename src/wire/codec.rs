// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// Primitive encode/decode rules shared by every message body:
// integers are little-endian two's-complement; byte strings and strings are
// `u32 length_le || bytes`; vectors of structs are `u32 count_le || items`.
// The codec is forward-compatible: decoders read the fields they know about
// and ignore anything left in the buffer past that point.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::object_id::{Digest, ObjectId, ID_SIZE};

/// A growable little-endian encode buffer for a single message body.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.write_i32::<LittleEndian>(v).unwrap();
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.write_i64::<LittleEndian>(v).unwrap();
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.write_u32::<LittleEndian>(v).unwrap();
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.write_u64::<LittleEndian>(v).unwrap();
    }

    pub fn put_fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_id(&mut self, id: &ObjectId) {
        self.put_fixed(id.as_bytes());
    }

    pub fn put_digest(&mut self, d: &Digest) {
        self.put_fixed(d.as_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    pub fn put_vec<T, F: FnMut(&mut Encoder, &T)>(&mut self, items: &[T], mut write_one: F) {
        self.put_u32(items.len() as u32);
        for item in items {
            write_one(self, item);
        }
    }
}

/// A cursor-based decoder over a single message body. Reading past the end
/// of a known field set is fine: callers simply stop, satisfying the
/// forward-compatibility rule (unknown trailing fields are never read).
pub struct Decoder<'a> {
    cursor: io::Cursor<&'a [u8]>,
}

impl<'a> Decoder<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            cursor: io::Cursor::new(body),
        }
    }

    pub fn get_u8(&mut self) -> io::Result<u8> {
        self.cursor.read_u8()
    }

    pub fn get_bool(&mut self) -> io::Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_i32(&mut self) -> io::Result<i32> {
        self.cursor.read_i32::<LittleEndian>()
    }

    pub fn get_i64(&mut self) -> io::Result<i64> {
        self.cursor.read_i64::<LittleEndian>()
    }

    pub fn get_u32(&mut self) -> io::Result<u32> {
        self.cursor.read_u32::<LittleEndian>()
    }

    pub fn get_u64(&mut self) -> io::Result<u64> {
        self.cursor.read_u64::<LittleEndian>()
    }

    pub fn get_fixed(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.cursor.read_exact(&mut out)?;
        Ok(out)
    }

    pub fn get_id(&mut self) -> io::Result<ObjectId> {
        let bytes = self.get_fixed(ID_SIZE)?;
        ObjectId::from_slice(&bytes).ok_or_else(|| invalid("bad object id length"))
    }

    pub fn get_digest(&mut self) -> io::Result<Digest> {
        let bytes = self.get_fixed(ID_SIZE)?;
        Digest::from_slice(&bytes).ok_or_else(|| invalid("bad digest length"))
    }

    pub fn get_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        self.get_fixed(len)
    }

    pub fn get_str(&mut self) -> io::Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn get_vec<T, F: FnMut(&mut Decoder) -> io::Result<T>>(
        &mut self,
        mut read_one: F,
    ) -> io::Result<Vec<T>> {
        let count = self.get_u32()? as usize;
        let mut out = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            out.push(read_one(self)?);
        }
        Ok(out)
    }

    /// Whether there is any remaining data. Decoders that have finished
    /// reading their known fields never need to call this; it exists so
    /// tests can assert forward-compatible skipping works.
    pub fn remaining(&self) -> usize {
        let pos = self.cursor.position() as usize;
        self.cursor.get_ref().len().saturating_sub(pos)
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

pub fn write_all(w: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    w.write_all(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip() {
        let mut enc = Encoder::new();
        enc.put_u8(7);
        enc.put_bool(true);
        enc.put_i32(-42);
        enc.put_i64(-1_000_000_000_000);
        enc.put_u32(0xDEAD_BEEF);
        enc.put_u64(u64::MAX);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.get_u8().unwrap(), 7);
        assert!(dec.get_bool().unwrap());
        assert_eq!(dec.get_i32().unwrap(), -42);
        assert_eq!(dec.get_i64().unwrap(), -1_000_000_000_000);
        assert_eq!(dec.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(dec.get_u64().unwrap(), u64::MAX);
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn bytes_str_and_vec_round_trip() {
        let mut enc = Encoder::new();
        enc.put_bytes(&[1, 2, 3]);
        enc.put_str("plasma");
        enc.put_vec(&[10u32, 20, 30], |e, v| e.put_u32(*v));
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.get_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(dec.get_str().unwrap(), "plasma");
        let items = dec.get_vec(|d| d.get_u32()).unwrap();
        assert_eq!(items, vec![10, 20, 30]);
    }

    #[test]
    fn id_and_digest_round_trip() {
        let id = ObjectId::new([9u8; ID_SIZE]);
        let digest = Digest::new([3u8; ID_SIZE]);

        let mut enc = Encoder::new();
        enc.put_id(&id);
        enc.put_digest(&digest);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.get_id().unwrap(), id);
        assert_eq!(dec.get_digest().unwrap(), digest);
    }

    #[test]
    fn decoder_ignores_unread_trailing_bytes() {
        // Forward compatibility: a decoder that stops reading early should
        // not error just because the body has more bytes than it consumed.
        let mut enc = Encoder::new();
        enc.put_u32(1);
        enc.put_u32(2);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.get_u32().unwrap(), 1);
        assert_eq!(dec.remaining(), 4);
    }

    #[test]
    fn short_buffer_is_an_io_error_not_a_panic() {
        let bytes = [0u8; 2];
        let mut dec = Decoder::new(&bytes);
        assert!(dec.get_u64().is_err());
    }
}
