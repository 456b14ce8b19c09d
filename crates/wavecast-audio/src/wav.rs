//! Streaming WAV header.
//!
//! The RIFF and data chunk sizes are both 0xFFFFFFFF: the stream has no end,
//! and well-behaved players treat the maximum value as "read until the
//! connection closes".

use wavecast_foundation::StreamFormat;

pub const WAV_HEADER_LEN: usize = 44;

const INDETERMINATE: u32 = 0xFFFF_FFFF;
const FORMAT_PCM: u16 = 1;

/// Build the 44-byte header for an unbounded canonical PCM stream.
pub fn streaming_wav_header(format: &StreamFormat) -> [u8; WAV_HEADER_LEN] {
    let bytes_per_sample = format.bytes_per_sample() as u32;
    let byte_rate = format.sample_rate * format.channels as u32 * bytes_per_sample;
    let block_align = format.channels * bytes_per_sample as u16;

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&INDETERMINATE.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&INDETERMINATE.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_bit_exact_at_48k() {
        let format = StreamFormat::new(48_000).unwrap();
        let header = streaming_wav_header(&format);

        #[rustfmt::skip]
        let expected: [u8; WAV_HEADER_LEN] = [
            b'R', b'I', b'F', b'F',
            0xFF, 0xFF, 0xFF, 0xFF,
            b'W', b'A', b'V', b'E',
            b'f', b'm', b't', b' ',
            16, 0, 0, 0,
            1, 0,                   // PCM
            2, 0,                   // stereo
            0x80, 0xBB, 0x00, 0x00, // 48000
            0x00, 0x65, 0x04, 0x00, // 288000 = 48000 * 2 * 3
            6, 0,                   // block align
            24, 0,                  // bits per sample
            b'd', b'a', b't', b'a',
            0xFF, 0xFF, 0xFF, 0xFF,
        ];
        assert_eq!(header, expected);
    }

    #[test]
    fn byte_rate_tracks_sample_rate() {
        let format = StreamFormat::new(96_000).unwrap();
        let header = streaming_wav_header(&format);
        let byte_rate = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);
        assert_eq!(byte_rate, 96_000 * 6);
    }
}
