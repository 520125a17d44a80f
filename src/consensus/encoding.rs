//! Consensus byte encoding
//!
//! Little-endian fixed-width integers and LEB128 variable-length integers.
//! Every consensus hash is taken over bytes produced here, so decoding is
//! strict: varints must be minimal and callers reject trailing bytes.

use thiserror::Error;

/// Maximum LEB128 length of a u64
const MAX_VARINT_LEN: usize = 10;

/// Encoding errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("Non-canonical varint")]
    NonCanonicalVarInt,
    #[error("Varint overflows u64")]
    VarIntOverflow,
    #[error("Length {length} exceeds maximum {max}")]
    TooLong { length: usize, max: usize },
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Append-only byte writer
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Varint length prefix followed by the bytes
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a byte slice
#[derive(Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < len {
            return Err(EncodingError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], EncodingError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.read_bytes(N)?);
        Ok(arr)
    }

    pub fn read_u8(&mut self) -> Result<u8, EncodingError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Look at the next byte without consuming it
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u16(&mut self) -> Result<u16, EncodingError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, EncodingError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_varint(&mut self) -> Result<u64, EncodingError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let bits = u64::from(byte & 0x7f);
            if i == MAX_VARINT_LEN - 1 && bits > 1 {
                return Err(EncodingError::VarIntOverflow);
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                // A zero final byte after the first means a longer-than-needed encoding
                if i > 0 && byte == 0 {
                    return Err(EncodingError::NonCanonicalVarInt);
                }
                return Ok(value);
            }
        }
        Err(EncodingError::VarIntOverflow)
    }

    /// Varint length prefix, bounded by `max`, followed by the bytes
    pub fn read_var_bytes(&mut self, max: usize) -> Result<&'a [u8], EncodingError> {
        let declared = self.read_varint()?;
        let length = usize::try_from(declared).unwrap_or(usize::MAX);
        if length > max {
            return Err(EncodingError::TooLong { length, max });
        }
        self.read_bytes(length)
    }

    /// Fail if any bytes were left unconsumed
    pub fn finish(self) -> Result<(), EncodingError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(EncodingError::TrailingBytes(n)),
        }
    }
}

/// Types with a canonical consensus byte encoding
pub trait ConsensusEncoding {
    fn consensus_encode(&self, encoder: &mut Encoder);

    fn to_consensus_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.consensus_encode(&mut encoder);
        encoder.finish()
    }
}

/// Types decodable from their canonical consensus encoding
pub trait ConsensusDecoding: Sized {
    fn consensus_decode(decoder: &mut Decoder<'_>) -> Result<Self, EncodingError>;

    /// Decode a complete buffer, rejecting trailing bytes
    fn from_consensus_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut decoder = Decoder::new(bytes);
        let value = Self::consensus_decode(&mut decoder)?;
        decoder.finish()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint_bytes(value: u64) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(value);
        encoder.finish()
    }

    #[test]
    fn test_varint_known_encodings() {
        assert_eq!(varint_bytes(0), vec![0x00]);
        assert_eq!(varint_bytes(127), vec![0x7f]);
        assert_eq!(varint_bytes(128), vec![0x80, 0x01]);
        assert_eq!(varint_bytes(300), vec![0xac, 0x02]);
        assert_eq!(varint_bytes(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_varint_max_roundtrip() {
        let bytes = varint_bytes(u64::MAX);
        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_varint().unwrap(), u64::MAX);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_non_canonical_varint_rejected() {
        let mut decoder = Decoder::new(&[0x80, 0x00]);
        assert_eq!(decoder.read_varint(), Err(EncodingError::NonCanonicalVarInt));
    }

    #[test]
    fn test_varint_overflow_rejected() {
        let bytes = [0xff; 11];
        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_varint(), Err(EncodingError::VarIntOverflow));
    }

    #[test]
    fn test_truncated_read() {
        let mut decoder = Decoder::new(&[1, 2, 3]);
        assert_eq!(
            decoder.read_u64(),
            Err(EncodingError::UnexpectedEof {
                needed: 8,
                remaining: 3
            })
        );
    }

    #[test]
    fn test_trailing_bytes() {
        let mut decoder = Decoder::new(&[1, 2]);
        decoder.read_u8().unwrap();
        assert_eq!(decoder.finish(), Err(EncodingError::TrailingBytes(1)));
    }

    #[test]
    fn test_var_bytes_limit() {
        let mut encoder = Encoder::new();
        encoder.write_var_bytes(&[7u8; 10]);
        let bytes = encoder.finish();
        let mut decoder = Decoder::new(&bytes);
        assert!(matches!(
            decoder.read_var_bytes(5),
            Err(EncodingError::TooLong { length: 10, max: 5 })
        ));
    }

    #[test]
    fn test_huge_length_prefix_rejected() {
        let mut encoder = Encoder::new();
        encoder.write_varint(u64::MAX);
        let bytes = encoder.finish();
        let mut decoder = Decoder::new(&bytes);
        assert!(matches!(
            decoder.read_var_bytes(1024),
            Err(EncodingError::TooLong { max: 1024, .. })
        ));
    }
}
