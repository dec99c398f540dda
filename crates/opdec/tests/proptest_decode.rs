//! Property-based tests for the decoder.
//!
//! These verify the universal invariants: no panics on arbitrary input,
//! deterministic results, and the 1..=15 length bound.

use proptest::prelude::*;

use opdec::{decode, DecodeError, MAX_INSTR_LEN};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10000))]

    /// Decoding never panics, in either mode.
    #[test]
    fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..32), mode in prop_oneof![Just(32u32), Just(64u32)]) {
        let _ = decode(&data, mode, 0x1000);
    }

    /// Successful decodes consume between 1 and 15 bytes, never more than
    /// the buffer holds.
    #[test]
    fn length_is_bounded(data in prop::collection::vec(any::<u8>(), 0..32), mode in prop_oneof![Just(32u32), Just(64u32)]) {
        if let Ok(instr) = decode(&data, mode, 0x1000) {
            prop_assert!(instr.length() >= 1);
            prop_assert!(instr.length() <= MAX_INSTR_LEN);
            prop_assert!(instr.length() <= data.len());
        }
    }

    /// Decoding is a pure function: same input, same output.
    #[test]
    fn decode_is_deterministic(data in prop::collection::vec(any::<u8>(), 0..20)) {
        let a = decode(&data, 64, 0x4000);
        let b = decode(&data, 64, 0x4000);
        prop_assert_eq!(a, b);
    }

    /// Bytes past the reported length never matter: re-decoding the exact
    /// prefix yields the same instruction.
    #[test]
    fn trailing_bytes_are_ignored(data in prop::collection::vec(any::<u8>(), 1..24)) {
        if let Ok(instr) = decode(&data, 64, 0x2000) {
            let trimmed = decode(&data[..instr.length()], 64, 0x2000);
            prop_assert_eq!(trimmed, Ok(instr));
        }
    }

    /// A truncated valid instruction reports SHORT_BUFFER, not garbage.
    #[test]
    fn truncation_reports_short_buffer(data in prop::collection::vec(any::<u8>(), 1..16)) {
        if let Ok(instr) = decode(&data, 64, 0) {
            for len in 0..instr.length() {
                prop_assert_eq!(decode(&data[..len], 64, 0), Err(DecodeError::ShortBuffer));
            }
        }
    }

    /// Any mode other than 32/64 is rejected up front.
    #[test]
    fn bad_modes_are_rejected(data in prop::collection::vec(any::<u8>(), 0..16), mode in any::<u32>()) {
        prop_assume!(mode != 32 && mode != 64);
        prop_assert_eq!(decode(&data, mode, 0), Err(DecodeError::BadMode));
    }

    /// The formatter never panics and always NUL-terminates.
    #[test]
    fn formatter_never_panics(data in prop::collection::vec(any::<u8>(), 1..16), cap in 1usize..64) {
        if let Ok(instr) = decode(&data, 64, 0x1000) {
            let mut buf = vec![0xFFu8; cap];
            let len = opdec::format(&instr, &mut buf);
            prop_assert!(len < cap);
            prop_assert_eq!(buf[len], 0);
        }
    }
}
