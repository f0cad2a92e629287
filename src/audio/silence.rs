//! Format-correct silence buffers

use crate::audio::format::{AudioBuffer, AudioFormat};

/// Build `duration_ms` of silence in `format`.
///
/// The length is `floor(sample_rate * duration_ms / 1000)` frames. Unsigned
/// 8-bit silence is 128 in every byte, signed formats are all zero.
pub fn make_silence(format: &AudioFormat, duration_ms: u32) -> AudioBuffer {
    let len = format.bytes_for_ms(duration_ms);
    let fill = format.sample_format().silence_byte();
    AudioBuffer::new(*format, vec![fill; len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_u8_silence() {
        let format = AudioFormat::new(16000, 8, 1).unwrap();
        let silence = make_silence(&format, 10);
        assert_eq!(silence.len(), 160);
        assert!(silence.data().iter().all(|&b| b == 128));
    }

    #[test]
    fn test_s16_stereo_silence() {
        let format = AudioFormat::new(44100, 16, 2).unwrap();
        let silence = make_silence(&format, 10);
        // 441 frames * 2 channels * 2 bytes
        assert_eq!(silence.len(), 1764);
        for pair in silence.data().chunks_exact(2) {
            assert_eq!(i16::from_le_bytes([pair[0], pair[1]]), 0);
        }
    }

    #[test]
    fn test_fractional_frames_round_down() {
        let format = AudioFormat::new(22050, 16, 1).unwrap();
        // 22050 * 3 / 1000 = 66.15 frames
        assert_eq!(make_silence(&format, 3).len(), 66 * 2);
        assert!(make_silence(&format, 0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_silence_length_and_value(
            rate in 1u32..96_000,
            bits in prop::sample::select(vec![8u16, 16]),
            channels in 1u16..=2,
            ms in 0u32..2_000,
        ) {
            let format = AudioFormat::new(rate, bits, channels).unwrap();
            let silence = make_silence(&format, ms);
            let frames = rate as u64 * ms as u64 / 1000;
            prop_assert_eq!(silence.len() as u64, frames * format.bytes_per_sample() as u64);
            let expected = if bits == 8 { 128u8 } else { 0u8 };
            prop_assert!(silence.data().iter().all(|&b| b == expected));
            prop_assert_eq!(silence.format(), &format);
        }
    }
}
