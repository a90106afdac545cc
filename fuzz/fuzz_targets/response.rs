//! Fuzz target for server response parsing
//!
//! Tests that response blocks and queue info decode without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use smp_core::encoding::Reader;
use smp_core::queue::QueueInfo;
use smp_core::transmission::{MAX_ID_LEN, ServerMessage, parse_response_block};

fuzz_target!(|data: &[u8]| {
    if let Ok(responses) = parse_response_block(data) {
        for response in responses {
            // Ids from the server are bounded
            if let ServerMessage::Ids(ids) = response.message {
                assert!(ids.recipient_id.len() <= MAX_ID_LEN);
                assert!(ids.sender_id.len() <= MAX_ID_LEN);
            }
        }
    }

    let _ = ServerMessage::parse(data);
    let _ = QueueInfo::decode(&mut Reader::new(data));
});
