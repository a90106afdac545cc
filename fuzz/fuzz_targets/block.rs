//! Fuzz target for block framing and the server hello
//!
//! Tests that block decoding and hello parsing handle arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use smp_transport::block::{BLOCK_SIZE, decode_block, encode_block};
use smp_transport::handshake::{ClientHello, ServerHello};

fuzz_target!(|data: &[u8]| {
    // Stretch or cut the input to one block so the length prefix is exercised
    let mut block = data.to_vec();
    block.resize(BLOCK_SIZE, b'#');
    if let Ok(content) = decode_block(&block) {
        let reencoded = encode_block(content).expect("decoded content fits a block");
        assert_eq!(decode_block(&reencoded).expect("re-decode"), content);
    }

    let _ = ServerHello::parse(data);
    let _ = ClientHello::parse(data);
});
