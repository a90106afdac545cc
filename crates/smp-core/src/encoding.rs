//! SMP wire encoding helpers.
//!
//! Short fields (correlation ids, entity ids, keys, signatures) carry a
//! one-byte length prefix. [`Reader`] walks a buffer and checks every length
//! against the bytes remaining before slicing.

use crate::error::ParseError;

/// Prepend a one-byte length to `bytes`.
///
/// # Errors
///
/// Returns [`ParseError::FieldTooLong`] if `bytes` exceeds 255 bytes.
pub fn encode_len_prefixed(bytes: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    push_len_prefixed(&mut out, bytes)?;
    Ok(out)
}

/// Append a one-byte length and `bytes` to `out`.
///
/// # Errors
///
/// Returns [`ParseError::FieldTooLong`] if `bytes` exceeds 255 bytes.
pub fn push_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ParseError> {
    let len = u8::try_from(bytes.len()).map_err(|_| ParseError::FieldTooLong(bytes.len()))?;
    out.push(len);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked cursor over a byte slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Current offset
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True when every byte has been consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedResponse`] if fewer remain.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if n > self.remaining() {
            return Err(ParseError::TruncatedResponse {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a fixed-size array.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedResponse`] if fewer than `N` bytes remain.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedResponse`] at end of input.
    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedResponse`] if fewer than 2 bytes remain.
    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedResponse`] if fewer than 8 bytes remain.
    pub fn read_u64(&mut self) -> Result<u64, ParseError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read a field with a one-byte length prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedResponse`] if the field overruns the input.
    pub fn read_short_field(&mut self) -> Result<&'a [u8], ParseError> {
        let len = self.read_u8()? as usize;
        self.read_bytes(len)
    }

    /// Consume an exact tag.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnexpectedCommand`] if the next bytes differ.
    pub fn expect(&mut self, tag: &[u8]) -> Result<(), ParseError> {
        let got = self.read_bytes(tag.len())?;
        if got == tag {
            Ok(())
        } else {
            Err(ParseError::UnexpectedCommand(
                String::from_utf8_lossy(got).into_owned(),
            ))
        }
    }

    /// Look at the next byte without consuming it
    #[must_use]
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Consume and return everything left
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_prefixed() {
        assert_eq!(encode_len_prefixed(b"abc").unwrap(), vec![3, b'a', b'b', b'c']);
        assert_eq!(encode_len_prefixed(&[]).unwrap(), vec![0]);
        assert_eq!(encode_len_prefixed(&[7u8; 255]).unwrap().len(), 256);
        assert_eq!(
            encode_len_prefixed(&[7u8; 256]),
            Err(ParseError::FieldTooLong(256))
        );
    }

    #[test]
    fn test_reader_fields() {
        let data = [0x00, 0x05, 2, 0xAA, 0xBB, b'O', b'K'];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_u16().unwrap(), 5);
        assert_eq!(reader.read_short_field().unwrap(), &[0xAA, 0xBB]);
        assert_eq!(reader.peek_u8(), Some(b'O'));
        reader.expect(b"OK").unwrap();
        assert!(reader.is_empty());
    }

    #[test]
    fn test_reader_truncated_field() {
        let data = [5, 1, 2];
        let mut reader = Reader::new(&data);
        assert_eq!(
            reader.read_short_field(),
            Err(ParseError::TruncatedResponse {
                needed: 5,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_reader_u64_and_rest() {
        let mut data = 42u64.to_be_bytes().to_vec();
        data.extend_from_slice(b"tail");
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_u64().unwrap(), 42);
        assert_eq!(reader.position(), 8);
        assert_eq!(reader.read_rest(), b"tail");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_expect_mismatch() {
        let mut reader = Reader::new(b"ERR AUTH");
        assert!(matches!(
            reader.expect(b"OK"),
            Err(ParseError::UnexpectedCommand(_))
        ));
    }
}
