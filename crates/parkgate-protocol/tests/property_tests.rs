//! Property-based tests for frame encoding and decoding.
//!
//! These tests generate arbitrary valid commands and replies and verify the
//! framing invariants: round trips are lossless and any single corrupted
//! byte in the checksum or payload is detected.

use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime};
use parkgate_core::constants::{NOVELTY_IDENTIFICATION_LENGTH, TIMESTAMP_FORMAT};
use parkgate_core::ModuleAddress;
use parkgate_protocol::{
    BusCodec, Command, FrameDirection, FrameError, Opcode, Reply, StatusReport, decode,
    decode_command, decode_reply, encode, encode_frame,
};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

/// Strategy for generating valid module addresses (1-99).
fn valid_address() -> impl Strategy<Value = ModuleAddress> {
    (1u8..=99u8).prop_map(|n| ModuleAddress::new(n).unwrap())
}

/// Strategy for timestamps representable as `YYMMDDHHMMSS`.
fn valid_timestamp() -> impl Strategy<Value = NaiveDateTime> {
    (2000i32..=2099, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_map(
        |(y, mo, d, h, mi, s)| {
            NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, s)
                .unwrap()
        },
    )
}

/// Strategy covering every command builder.
fn valid_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        valid_address().prop_map(Command::status),
        valid_address().prop_map(Command::continue_sequence),
        valid_address().prop_map(Command::stop_sequence),
        valid_address().prop_map(Command::ack_novelty),
        (valid_address(), valid_timestamp()).prop_map(|(a, t)| Command::set_time(a, t)),
        (valid_address(), 1u8..=8, 0u32..=9999)
            .prop_map(|(a, o, ms)| Command::pulse(a, o, ms).unwrap()),
    ]
}

/// Commands that carry a non-empty payload.
fn command_with_payload() -> impl Strategy<Value = Command> {
    prop_oneof![
        (valid_address(), valid_timestamp()).prop_map(|(a, t)| Command::set_time(a, t)),
        (valid_address(), 1u8..=8, 0u32..=9999)
            .prop_map(|(a, o, ms)| Command::pulse(a, o, ms).unwrap()),
    ]
}

/// Strategy for `S6` reply payloads: status block, space-padded
/// identification, module clock.
fn novelty_payload() -> impl Strategy<Value = ([u8; 2], String, NaiveDateTime, Vec<u8>)> {
    (any::<[u8; 2]>(), "[A-Z0-9]{1,8}", valid_timestamp()).prop_map(|(status, code, at)| {
        let mut payload = status.to_vec();
        payload.extend_from_slice(
            format!("{code:<width$}", width = NOVELTY_IDENTIFICATION_LENGTH).as_bytes(),
        );
        payload.extend_from_slice(at.format(TIMESTAMP_FORMAT).to_string().as_bytes());
        (status, code, at, payload)
    })
}

proptest! {
    /// Property: decoding an encoded command yields the same command.
    #[test]
    fn prop_command_roundtrip(command in valid_command()) {
        let bytes = encode(&command);
        prop_assert_eq!(bytes.len(), command.encoded_len());

        let parsed = decode_command(&bytes).unwrap();
        prop_assert_eq!(parsed.into_command().unwrap(), command);
    }

    /// Property: replacing a checksum byte with any byte that is not the same
    /// hex digit is reported as a checksum mismatch.
    #[test]
    fn prop_checksum_byte_replaced(
        command in valid_command(),
        which in 0usize..2,
        replacement in any::<u8>(),
    ) {
        let mut bytes = encode(&command).to_vec();
        let index = bytes.len() - 2 + which;
        // A case variant of the same hex digit is the same value.
        prop_assume!(replacement.to_ascii_uppercase() != bytes[index]);

        bytes[index] = replacement;
        let is_mismatch = matches!(
            decode_command(&bytes),
            Err(FrameError::ChecksumMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    /// Property: any change to a single request payload byte is detected.
    #[test]
    fn prop_request_payload_byte_changed(
        command in command_with_payload(),
        position in any::<prop::sample::Index>(),
        delta in 1u8..=255,
    ) {
        let mut bytes = encode(&command).to_vec();
        let index = 5 + position.index(command.payload().len());
        bytes[index] = bytes[index].wrapping_add(delta);

        let is_mismatch = matches!(
            decode_command(&bytes),
            Err(FrameError::ChecksumMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    /// Property: any change to a status reply byte is detected, including
    /// changes that produce an ETX inside the payload.
    #[test]
    fn prop_reply_payload_byte_changed(
        address in valid_address(),
        status in any::<[u8; 2]>(),
        which in 0usize..2,
        delta in 1u8..=255,
    ) {
        let mut bytes = encode_frame(address, Opcode::Status, &status).to_vec();
        bytes[5 + which] = bytes[5 + which].wrapping_add(delta);

        let is_mismatch = matches!(
            decode_reply(&bytes),
            Err(FrameError::ChecksumMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    /// Property: a novelty reply decodes to its status, identification and
    /// module clock.
    #[test]
    fn prop_novelty_reply_roundtrip(
        address in valid_address(),
        (status, code, at, payload) in novelty_payload(),
    ) {
        let bytes = encode_frame(address, Opcode::StatusNovelty, &payload);
        let frame = decode_reply(&bytes).unwrap();
        prop_assert_eq!(frame.payload.len(), 22);

        match Reply::from_frame(&frame).unwrap() {
            Reply::Novelty(novelty) => {
                prop_assert_eq!(novelty.status, StatusReport::parse(&status).unwrap());
                prop_assert_eq!(novelty.identification.as_str(), code.as_str());
                prop_assert_eq!(novelty.presented_at, Some(at));
            }
            other => prop_assert!(false, "expected a novelty, got {:?}", other),
        }
    }

    /// Property: any change to a single novelty reply byte is detected.
    #[test]
    fn prop_novelty_payload_byte_changed(
        address in valid_address(),
        (_, _, _, payload) in novelty_payload(),
        position in any::<prop::sample::Index>(),
        delta in 1u8..=255,
    ) {
        let mut bytes = encode_frame(address, Opcode::StatusNovelty, &payload).to_vec();
        let index = 5 + position.index(payload.len());
        bytes[index] = bytes[index].wrapping_add(delta);

        let is_mismatch = matches!(
            decode_reply(&bytes),
            Err(FrameError::ChecksumMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    /// Property: decoding never panics on arbitrary input.
    #[test]
    fn prop_decode_is_total(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = decode(&bytes, FrameDirection::Request);
        let _ = decode(&bytes, FrameDirection::Reply);
    }

    /// Property: the streaming codec recovers a status reply regardless of
    /// how the bytes are split and what noise precedes them.
    #[test]
    fn prop_codec_split_reply(
        address in valid_address(),
        status in any::<[u8; 2]>(),
        noise in prop::collection::vec(any::<u8>().prop_filter("no STX", |b| *b != 0x02), 0..16),
        split in any::<prop::sample::Index>(),
    ) {
        let frame = encode_frame(address, Opcode::Status, &status);
        let mut stream = noise.clone();
        stream.extend_from_slice(&frame);
        let cut = split.index(stream.len() + 1);

        let mut codec = BusCodec::replies();
        let mut buffer = BytesMut::from(&stream[..cut]);
        let first = codec.decode(&mut buffer).unwrap();

        let parsed = match first {
            Some(parsed) => parsed,
            None => {
                buffer.extend_from_slice(&stream[cut..]);
                codec.decode(&mut buffer).unwrap().unwrap()
            }
        };

        prop_assert_eq!(parsed.address, address);
        prop_assert_eq!(&parsed.payload[..], &status[..]);
    }
}
