//! Fuzz target for padded buffers
//!
//! Tests that padding and length-prefix stripping agree for arbitrary sizes.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use smp_core::agent::envelope::{pad_block, unpad_block};
use smp_core::parser::strip_length_prefix;

#[derive(Debug, Arbitrary)]
struct PaddingInput {
    padded_len: u16,
    body: Vec<u8>,
}

fuzz_target!(|input: PaddingInput| {
    let padded_len = usize::from(input.padded_len);

    match pad_block(&input.body, padded_len) {
        Ok(padded) => {
            assert_eq!(padded.len(), padded_len);
            assert_eq!(unpad_block(&padded).expect("unpad"), &input.body[..]);
        }
        Err(_) => assert!(input.body.len() + 2 > padded_len),
    }

    let _ = unpad_block(&input.body);
    let stripped = strip_length_prefix(&input.body);
    assert!(stripped.len() <= input.body.len());
});
