//! Support for encoding primitives and blittable types into output buffers.
#![allow(missing_docs)]

use bstr::BStr;
use zerocopy::{Immutable, IntoBytes};

/// A simple type which helps encode side-table records into a buffer.
pub struct Encoder<'a> {
    pub buf: &'a mut Vec<u8>,
}

/// The position of a `u32` that was written before its value was known.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub struct Placeholder(usize);

impl Placeholder {
    /// Byte offset of the placeholder within the buffer.
    pub fn offset(self) -> usize {
        self.0
    }
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn u32(&mut self, x: u32) {
        self.bytes(&x.to_le_bytes());
    }

    pub fn u64(&mut self, x: u64) {
        self.bytes(&x.to_le_bytes());
    }

    pub fn t<T: IntoBytes + Immutable>(&mut self, x: &T) {
        self.buf.extend_from_slice(x.as_bytes());
    }

    pub fn strz(&mut self, s: &BStr) {
        self.buf.extend_from_slice(s);
        self.buf.push(0);
    }

    /// Writes a zero `u32` whose value is filled in later with [`Self::set_u32`].
    pub fn u32_placeholder(&mut self) -> Placeholder {
        let pos = self.buf.len();
        self.u32(0);
        Placeholder(pos)
    }

    /// Back-patches a placeholder written by [`Self::u32_placeholder`].
    pub fn set_u32(&mut self, at: Placeholder, x: u32) {
        self.buf[at.0..at.0 + 4].copy_from_slice(&x.to_le_bytes());
    }
}

#[test]
fn back_patch() {
    let mut buf = Vec::new();
    let mut e = Encoder::new(&mut buf);
    let count = e.u32_placeholder();
    e.strz(BStr::new("ab"));
    e.u64(u64::MAX);
    e.set_u32(count, 0x0403_0201);
    assert_eq!(count.offset(), 0);
    assert_eq!(
        buf,
        [1, 2, 3, 4, b'a', b'b', 0, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
    );
}
