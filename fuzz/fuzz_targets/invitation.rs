//! Fuzz target for invitation links and server addresses
//!
//! Tests that link parsing handles arbitrary text without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use smp_core::ServerAddress;
use smp_core::invitation::{parse_invitation, parse_queue_uri};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    if let Ok(peer) = parse_invitation(&text) {
        // A complete peer always names a queue
        if peer.is_complete() {
            assert!(!peer.queue_id.is_empty());
        }
    }
    let _ = parse_queue_uri(&text);
    let _ = text.parse::<ServerAddress>();
});
