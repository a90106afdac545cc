//! Property-based tests for the SMP client
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Block Framing Properties
// ============================================================================

mod block_properties {
    use super::*;
    use smp_transport::block::{BLOCK_SIZE, MAX_BLOCK_CONTENT, decode_block, encode_block};

    proptest! {
        /// Every block is exactly 16384 bytes and gives back its content
        #[test]
        fn block_roundtrip(content in prop::collection::vec(any::<u8>(), 0..2048)) {
            let block = encode_block(&content).unwrap();
            prop_assert_eq!(block.len(), BLOCK_SIZE);
            prop_assert_eq!(decode_block(&block).unwrap(), &content[..]);
        }

        /// Padding after the content is all '#'
        #[test]
        fn block_padding(len in 0usize..MAX_BLOCK_CONTENT) {
            let block = encode_block(&vec![0u8; len]).unwrap();
            prop_assert!(block[2 + len..].iter().all(|&b| b == b'#'));
        }

        /// Arbitrary blocks never panic the decoder
        #[test]
        fn block_decode_arbitrary(prefix in any::<u16>(), fill in any::<u8>()) {
            let mut block = vec![fill; BLOCK_SIZE];
            block[..2].copy_from_slice(&prefix.to_be_bytes());
            let decoded = decode_block(&block);
            prop_assert_eq!(decoded.is_ok(), usize::from(prefix) <= MAX_BLOCK_CONTENT);
        }
    }
}

// ============================================================================
// Double Ratchet Padding Properties
// ============================================================================

mod ratchet_properties {
    use super::*;
    use smp_core::agent::envelope::{CONN_INFO_PADDED_LEN, HELLO_PADDED_LEN};
    use smp_crypto::RatchetError;
    use smp_crypto::ratchet::{ENCRYPTION_OVERHEAD, RatchetState};
    use smp_crypto::x448::{PrivateKey, PublicKey};

    /// Length-prefix bytes the ratchet adds before padding
    const LEN_PREFIX: usize = 8;

    fn keypair() -> (PrivateKey, PublicKey) {
        let private = PrivateKey::generate().unwrap();
        let public = private.public_key().unwrap();
        (private, public)
    }

    fn session_pair() -> (RatchetState, RatchetState) {
        let (s1, s1_pub) = keypair();
        let (s2, s2_pub) = keypair();
        let (r1, r1_pub) = keypair();
        let (r2, r2_pub) = keypair();
        (
            RatchetState::init_sender(&s1, &s2, &r1_pub, &r2_pub).unwrap(),
            RatchetState::init_receiver(&r1, &r2, &s1_pub, &s2_pub).unwrap(),
        )
    }

    fn padded_len() -> impl Strategy<Value = usize> {
        prop_oneof![
            Just(HELLO_PADDED_LEN),
            Just(CONN_INFO_PADDED_LEN),
            LEN_PREFIX..1024usize,
        ]
    }

    /// A padding target and a plaintext length that fits it
    fn fitting() -> impl Strategy<Value = (usize, usize)> {
        padded_len().prop_flat_map(|target| (Just(target), 0..=target - LEN_PREFIX))
    }

    #[test]
    fn ratchet_fills_targets_exactly() {
        for target in [HELLO_PADDED_LEN, CONN_INFO_PADDED_LEN] {
            let (mut sender, mut receiver) = session_pair();
            let plaintext = vec![b'x'; target - LEN_PREFIX];
            let out = sender.encrypt(&plaintext, target).unwrap();
            assert_eq!(out.len(), 1 + 123 + 16 + target);
            assert_eq!(receiver.decrypt(&out).unwrap(), plaintext);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Output length depends only on the target, and the peer reads back the plaintext
        #[test]
        fn ratchet_output_length((target, len) in fitting(), fill in any::<u8>()) {
            let (mut sender, mut receiver) = session_pair();
            let plaintext = vec![fill; len];
            let out = sender.encrypt(&plaintext, target).unwrap();
            prop_assert_eq!(out.len(), ENCRYPTION_OVERHEAD + target);
            prop_assert_eq!(out.len(), 1 + 123 + 16 + target);
            prop_assert_eq!(receiver.decrypt(&out).unwrap(), plaintext);
        }

        /// Plaintext longer than the target allows is refused, never truncated
        #[test]
        fn ratchet_rejects_oversized(target in padded_len(), over in 1usize..64) {
            let (mut sender, _) = session_pair();
            let len = target - LEN_PREFIX + over;
            let err = sender.encrypt(&vec![0u8; len], target).unwrap_err();
            prop_assert_eq!(err, RatchetError::MessageTooLarge { len, padded_len: target });
            prop_assert_eq!(sender.msg_num_send(), 0);
        }
    }
}

// ============================================================================
// Key Encoding and Signature Properties
// ============================================================================

mod key_properties {
    use super::*;
    use rand_core::OsRng;
    use smp_crypto::signatures::SigningKey;
    use smp_crypto::spki::{KeyAlgorithm, decode_spki, encode_spki, find_spki_header};

    fn algorithm() -> impl Strategy<Value = KeyAlgorithm> {
        prop_oneof![
            Just(KeyAlgorithm::Ed25519),
            Just(KeyAlgorithm::X25519),
            Just(KeyAlgorithm::X448),
        ]
    }

    proptest! {
        /// SPKI encoding is header ++ raw key and decodes back
        #[test]
        fn spki_roundtrip(algorithm in algorithm(), seed in any::<u8>()) {
            let raw = vec![seed; algorithm.key_len()];
            let encoded = encode_spki(algorithm, &raw).unwrap();
            prop_assert_eq!(encoded.len(), algorithm.encoded_len());
            prop_assert_eq!(decode_spki(algorithm, &encoded).unwrap(), &raw[..]);
        }

        /// Wrong key lengths are rejected
        #[test]
        fn spki_rejects_bad_length(algorithm in algorithm(), len in 0usize..80) {
            prop_assume!(len != algorithm.key_len());
            prop_assert!(encode_spki(algorithm, &vec![0u8; len]).is_err());
        }

        /// An embedded SPKI key is found at its offset
        #[test]
        fn spki_found_after_prefix(prefix in prop::collection::vec(0u8..0x30, 0..64)) {
            let key = [0x77u8; 32];
            let mut data = prefix.clone();
            data.extend_from_slice(&encode_spki(KeyAlgorithm::X25519, &key).unwrap());
            prop_assert_eq!(find_spki_header(KeyAlgorithm::X25519, &data), Some(prefix.len()));
        }

        /// Signatures verify for the signed message and no other
        #[test]
        fn signature_binds_message(
            message in prop::collection::vec(any::<u8>(), 1..512),
            flip in any::<prop::sample::Index>(),
        ) {
            let key = SigningKey::generate(&mut OsRng);
            let signature = key.sign(&message);
            prop_assert!(key.verifying_key().verify(&message, &signature).is_ok());

            let mut tampered = message.clone();
            let index = flip.index(tampered.len());
            tampered[index] ^= 0x01;
            prop_assert!(key.verifying_key().verify(&tampered, &signature).is_err());
        }
    }
}

// ============================================================================
// Transmission Properties
// ============================================================================

mod transmission_properties {
    use super::*;
    use smp_core::transmission::{MAX_ID_LEN, ServerMessage, parse_response_block};
    use smp_crypto::spki::X25519_SPKI_HEADER;

    fn ids_command(recipient: usize, sender: usize) -> Vec<u8> {
        let mut command = b"IDS ".to_vec();
        command.push(recipient as u8);
        command.extend(std::iter::repeat_n(0xAA, recipient));
        command.push(sender as u8);
        command.extend(std::iter::repeat_n(0xBB, sender));
        command.push(44);
        command.extend_from_slice(&X25519_SPKI_HEADER);
        command.extend_from_slice(&[9u8; 32]);
        command
    }

    proptest! {
        /// Queue ids up to 24 bytes are accepted, longer ones rejected
        #[test]
        fn ids_length_bound(recipient in 0usize..40, sender in 0usize..40) {
            let parsed = ServerMessage::parse(&ids_command(recipient, sender));
            if recipient <= MAX_ID_LEN && sender <= MAX_ID_LEN {
                let Ok(ServerMessage::Ids(ids)) = parsed else {
                    return Err(TestCaseError::fail("IDS not parsed"));
                };
                prop_assert_eq!(ids.recipient_id.len(), recipient);
                prop_assert_eq!(ids.sender_id.len(), sender);
            } else {
                prop_assert!(parsed.is_err());
            }
        }

        /// Arbitrary response blocks never panic the parser
        #[test]
        fn response_parse_arbitrary(content in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse_response_block(&content);
        }
    }
}

// ============================================================================
// Agent Layer Properties
// ============================================================================

mod agent_properties {
    use super::*;
    use rand_core::OsRng;
    use smp_core::agent::envelope::{pad_block, unpad_block};
    use smp_core::agent::{AgentBody, AgentMessage, MessageChain};
    use smp_core::parser::{IncomingMessage, parse_incoming, strip_length_prefix};
    use smp_crypto::hash::sha256;
    use smp_crypto::x25519;

    proptest! {
        /// Padded buffers have exactly the target length
        #[test]
        fn pad_to_target(body in prop::collection::vec(any::<u8>(), 1..1024), extra in 3usize..2048) {
            let target = body.len() + extra;
            let padded = pad_block(&body, target).unwrap();
            prop_assert_eq!(padded.len(), target);
            prop_assert_eq!(unpad_block(&padded).unwrap(), &body[..]);
            prop_assert_eq!(strip_length_prefix(&padded), &body[..]);
        }

        /// Bodies that do not fit are rejected
        #[test]
        fn pad_rejects_overflow(len in 10usize..200) {
            prop_assert!(pad_block(&vec![0u8; len], len + 1).is_err());
        }

        /// msgIds increase by one and each prevHash is the previous message's hash
        #[test]
        fn chain_links(texts in prop::collection::vec("[a-z ]{0,40}", 1..8)) {
            let mut chain = MessageChain::new();
            let mut previous: Option<Vec<u8>> = None;
            let first = chain.build_hello();
            let mut encoded = vec![first];
            for text in &texts {
                encoded.push(chain.build_text(text));
            }
            for (index, bytes) in encoded.iter().enumerate() {
                let message = AgentMessage::decode(bytes).unwrap();
                prop_assert_eq!(message.msg_id, index as u64 + 1);
                prop_assert_eq!(message.prev_hash, previous.as_deref().map(sha256));
                if index == 0 {
                    prop_assert_eq!(message.body, AgentBody::Hello);
                }
                previous = Some(bytes.clone());
            }
        }

        /// The parser never panics and garbage is never misread as a message
        #[test]
        fn parse_incoming_arbitrary(data in prop::collection::vec(any::<u8>(), 0..1024)) {
            let key = x25519::PrivateKey::generate(&mut OsRng);
            prop_assert_eq!(parse_incoming(&data, &key), IncomingMessage::Unknown);
        }

        /// Invitation parsing never panics on arbitrary text
        #[test]
        fn parse_invitation_arbitrary(text in ".{0,200}") {
            let _ = smp_core::invitation::parse_invitation(&text);
        }
    }
}
