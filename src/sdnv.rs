//! Self-Delimiting Numeric Values.
//!
//! Unsigned integers are written big-endian in 7-bit groups; every byte but
//! the last carries the continuation bit `0x80`.

use thiserror::Error;

/// Longest encoding of a `u64` (ceil(64 / 7)).
pub const MAX_LEN: usize = 10;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdnvError {
    #[error("SDNV is truncated")]
    Truncated,

    #[error("SDNV value does not fit into 64 bits")]
    Overflow,
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Appends the encoding of `value` to `out`.
pub fn encode(value: u64, out: &mut Vec<u8>) {
    let len = encoded_len(value);
    for i in (0..len).rev() {
        let group = ((value >> (7 * i)) & 0x7f) as u8;
        if i == 0 {
            out.push(group);
        } else {
            out.push(group | 0x80);
        }
    }
}

/// Decodes one value from the front of `buf`, returning it together with the
/// number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), SdnvError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().enumerate() {
        if value > (u64::MAX >> 7) {
            return Err(SdnvError::Overflow);
        }
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(SdnvError::Truncated)
}

/// Cursor-style reader used by the decoders in this crate.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn number(&mut self) -> Result<u64, SdnvError> {
        let (value, used) = decode(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    pub(crate) fn byte(&mut self) -> Result<u8, SdnvError> {
        let byte = *self.buf.get(self.pos).ok_or(SdnvError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], SdnvError> {
        let end = self.pos.checked_add(len).ok_or(SdnvError::Overflow)?;
        let slice = self.buf.get(self.pos..end).ok_or(SdnvError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    /// A length-prefixed byte string.
    pub(crate) fn chunk(&mut self) -> Result<&'a [u8], SdnvError> {
        let len = self.number()?;
        let len = usize::try_from(len).map_err(|_| SdnvError::Overflow)?;
        self.bytes(len)
    }
}

/// Appends a length-prefixed byte string.
pub(crate) fn encode_chunk(data: &[u8], out: &mut Vec<u8>) {
    encode(data.len() as u64, out);
    out.extend_from_slice(data);
}
