//! Fixed-size block framing.
//!
//! ```text
//! block (16384) = [contentLen u16BE][content][ '#' padding ]
//! command content = [txCount u8 = 1][txLen u16BE][transmission]
//! ```

use crate::transport::{TransportError, TransportResult};

/// Size of every SMP transport block
pub const BLOCK_SIZE: usize = 16384;

/// Largest content that fits in a block
pub const MAX_BLOCK_CONTENT: usize = BLOCK_SIZE - 2;

/// Largest transmission that fits in a command block
pub const MAX_TRANSMISSION_LEN: usize = MAX_BLOCK_CONTENT - 3;

/// Padding byte
pub const PAD_BYTE: u8 = b'#';

/// Frame `content` into a padded block.
///
/// # Errors
///
/// Returns [`TransportError::BlockTooLarge`] if content exceeds 16382 bytes.
pub fn encode_block(content: &[u8]) -> TransportResult<Vec<u8>> {
    if content.len() > MAX_BLOCK_CONTENT {
        return Err(TransportError::BlockTooLarge(content.len()));
    }
    let mut block = Vec::with_capacity(BLOCK_SIZE);
    block.extend_from_slice(&(content.len() as u16).to_be_bytes());
    block.extend_from_slice(content);
    block.resize(BLOCK_SIZE, PAD_BYTE);
    Ok(block)
}

/// Extract the content from a full block.
///
/// # Errors
///
/// Returns [`TransportError::BlockTooLarge`] if the length prefix exceeds
/// 16382 and [`TransportError::InvalidHandshake`] if `block` is not a full block.
pub fn decode_block(block: &[u8]) -> TransportResult<&[u8]> {
    if block.len() != BLOCK_SIZE {
        return Err(TransportError::InvalidHandshake(format!(
            "block must be {BLOCK_SIZE} bytes, got {}",
            block.len()
        )));
    }
    let len = u16::from_be_bytes([block[0], block[1]]) as usize;
    if len > MAX_BLOCK_CONTENT {
        return Err(TransportError::BlockTooLarge(len));
    }
    Ok(&block[2..2 + len])
}

/// Wrap one transmission as command block content.
///
/// # Errors
///
/// Returns [`TransportError::BlockTooLarge`] if the transmission does not fit.
pub fn encode_command_content(transmission: &[u8]) -> TransportResult<Vec<u8>> {
    if transmission.len() > MAX_TRANSMISSION_LEN {
        return Err(TransportError::BlockTooLarge(transmission.len() + 3));
    }
    let mut content = Vec::with_capacity(3 + transmission.len());
    content.push(1);
    content.extend_from_slice(&(transmission.len() as u16).to_be_bytes());
    content.extend_from_slice(transmission);
    Ok(content)
}

/// Frame one transmission directly into a block.
///
/// # Errors
///
/// Returns [`TransportError::BlockTooLarge`] if the transmission does not fit.
pub fn encode_command_block(transmission: &[u8]) -> TransportResult<Vec<u8>> {
    encode_block(&encode_command_content(transmission)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_roundtrip() {
        let block = encode_block(b"hello").unwrap();
        assert_eq!(block.len(), BLOCK_SIZE);
        assert_eq!(&block[..2], &[0, 5]);
        assert!(block[7..].iter().all(|&b| b == PAD_BYTE));
        assert_eq!(decode_block(&block).unwrap(), b"hello");
    }

    #[test]
    fn test_max_content() {
        let content = vec![0x42; MAX_BLOCK_CONTENT];
        let block = encode_block(&content).unwrap();
        assert_eq!(decode_block(&block).unwrap(), &content[..]);
        assert!(matches!(
            encode_block(&[0u8; MAX_BLOCK_CONTENT + 1]),
            Err(TransportError::BlockTooLarge(16383))
        ));
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut block = vec![PAD_BYTE; BLOCK_SIZE];
        block[..2].copy_from_slice(&16383u16.to_be_bytes());
        assert!(matches!(
            decode_block(&block),
            Err(TransportError::BlockTooLarge(16383))
        ));
    }

    #[test]
    fn test_command_block_header() {
        let block = encode_command_block(&[0x11; 10]).unwrap();
        assert_eq!(block.len(), BLOCK_SIZE);
        assert_eq!(&block[..2], &13u16.to_be_bytes());
        assert_eq!(block[2], 1);
        assert_eq!(&block[3..5], &10u16.to_be_bytes());
        assert_eq!(&block[5..15], &[0x11; 10]);
        assert_eq!(block[15], PAD_BYTE);
    }

    #[test]
    fn test_empty_content() {
        let block = encode_block(&[]).unwrap();
        assert_eq!(decode_block(&block).unwrap(), b"");
    }
}
