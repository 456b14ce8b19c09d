//! Sample format conversion between the hardware wire format and canonical
//! packed PCM.
//!
//! The ADC delivers one 32-bit slot per channel with the 24-bit payload
//! MSB-aligned: little-endian slot bytes `[pad, lo, mid, hi]`. Canonical
//! frames are packed little-endian 24-bit, channel-interleaved, 6 bytes per
//! stereo frame. Conversion is a byte shuffle with no rounding; it must be
//! bit-exact.

/// Bytes per stereo frame on the wire from the ADC (two 32-bit slots).
pub const RAW_BYTES_PER_FRAME: usize = 8;

/// Bytes per canonical stereo frame (two packed 24-bit samples).
pub const CANONICAL_BYTES_PER_FRAME: usize = 6;

/// Convert raw 32-bit-slot frames into packed 24-bit frames, appending to
/// `out`. Only whole frames are converted; a partial trailing frame in `raw`
/// is ignored. Returns the number of frames converted.
pub fn raw_to_canonical(raw: &[u8], out: &mut Vec<u8>) -> usize {
    let frames = raw.len() / RAW_BYTES_PER_FRAME;
    out.reserve(frames * CANONICAL_BYTES_PER_FRAME);

    for frame in raw.chunks_exact(RAW_BYTES_PER_FRAME) {
        // Left: payload bytes 1..4 of the first slot.
        out.extend_from_slice(&frame[1..4]);
        // Right: payload bytes 5..8 of the second slot.
        out.extend_from_slice(&frame[5..8]);
    }
    frames
}

/// Truncate packed 24-bit frames to 16-bit by keeping the upper two bytes of
/// each sample. Appends to `out`; whole frames only. Returns the number of
/// frames converted.
pub fn downsample_24_to_16(canonical: &[u8], out: &mut Vec<u8>) -> usize {
    let frames = canonical.len() / CANONICAL_BYTES_PER_FRAME;
    out.reserve(frames * 4);

    for frame in canonical.chunks_exact(CANONICAL_BYTES_PER_FRAME) {
        out.extend_from_slice(&frame[1..3]);
        out.extend_from_slice(&frame[4..6]);
    }
    frames
}

/// Decode one packed little-endian 24-bit sample with sign extension.
pub fn decode_sample24(bytes: [u8; 3]) -> i32 {
    let mut value = bytes[0] as i32 | (bytes[1] as i32) << 8 | (bytes[2] as i32) << 16;
    if value & 0x80_0000 != 0 {
        value |= !0xFF_FFFF;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw_frame(left: u32, right: u32) -> [u8; 8] {
        let mut frame = [0u8; 8];
        frame[..4].copy_from_slice(&left.to_le_bytes());
        frame[4..].copy_from_slice(&right.to_le_bytes());
        frame
    }

    #[test]
    fn known_pattern_shuffles_correctly() {
        // 24-bit payload 0x123456 MSB-aligned in the slot: 0x12345600.
        let raw = raw_frame(0x1234_5600, 0x7890_AB00);
        let mut out = Vec::new();
        assert_eq!(raw_to_canonical(&raw, &mut out), 1);
        assert_eq!(out, [0x56, 0x34, 0x12, 0xAB, 0x90, 0x78]);
    }

    #[test]
    fn partial_trailing_frame_is_discarded() {
        let raw = raw_frame(0x0101_0100, 0x0202_0200);
        let mut with_tail = raw.to_vec();
        with_tail.extend_from_slice(&[0xFF; 5]);

        let mut out = Vec::new();
        assert_eq!(raw_to_canonical(&with_tail, &mut out), 1);
        assert_eq!(out.len(), CANONICAL_BYTES_PER_FRAME);
    }

    #[test]
    fn truncation_keeps_upper_bytes() {
        let canonical = [0x56, 0x34, 0x12, 0xAB, 0x90, 0x78];
        let mut out = Vec::new();
        assert_eq!(downsample_24_to_16(&canonical, &mut out), 1);
        assert_eq!(out, [0x34, 0x12, 0x90, 0x78]);
    }

    #[test]
    fn decode_sign_extends_negative_samples() {
        assert_eq!(decode_sample24([0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(decode_sample24([0x00, 0x00, 0x80]), -8_388_608);
        assert_eq!(decode_sample24([0xFF, 0xFF, 0x7F]), 8_388_607);
        assert_eq!(decode_sample24([0x00, 0x00, 0x00]), 0);
    }

    proptest! {
        /// For any pair of 32-bit slot values, the canonical bytes are
        /// exactly the upper three payload bytes of each slot.
        #[test]
        fn conversion_is_bit_exact(left: u32, right: u32) {
            let raw = raw_frame(left, right);
            let mut out = Vec::new();
            raw_to_canonical(&raw, &mut out);

            let l = left.to_le_bytes();
            let r = right.to_le_bytes();
            prop_assert_eq!(out, [l[1], l[2], l[3], r[1], r[2], r[3]]);
        }

        /// Decoding the canonical left sample recovers the slot's top 24
        /// bits, sign-extended.
        #[test]
        fn decode_matches_arithmetic_shift(left: u32, right: u32) {
            let raw = raw_frame(left, right);
            let mut out = Vec::new();
            raw_to_canonical(&raw, &mut out);

            let decoded = decode_sample24([out[0], out[1], out[2]]);
            prop_assert_eq!(decoded, (left as i32) >> 8);
        }

        /// Truncating to 16 bits matches an arithmetic shift of the decoded
        /// 24-bit value.
        #[test]
        fn truncation_matches_shift(sample in -8_388_608i32..8_388_608i32) {
            let bytes = sample.to_le_bytes();
            let canonical = [bytes[0], bytes[1], bytes[2], 0, 0, 0];
            let mut out = Vec::new();
            downsample_24_to_16(&canonical, &mut out);

            let value = i16::from_le_bytes([out[0], out[1]]);
            prop_assert_eq!(value as i32, sample >> 8);
        }
    }
}
