//! WAV encoding for in-memory and archived audio

use crate::error::{Error, Result};
use ndarray::Array2;
use std::io::Cursor;

/// Encode `(channels, samples)` audio as a 32-bit float WAV payload
///
/// Float samples keep the decoded values bit exact, so a cut moved to memory
/// loads the same samples it was built from.
pub fn encode_wav(audio: &Array2<f32>, sampling_rate: u32) -> Result<Vec<u8>> {
    let (num_channels, num_samples) = audio.dim();
    if num_channels == 0 || num_channels > u16::MAX as usize {
        return Err(Error::Codec(format!(
            "Cannot encode {} channels as WAV",
            num_channels
        )));
    }

    let spec = hound::WavSpec {
        channels: num_channels as u16,
        sample_rate: sampling_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut bytes = Vec::with_capacity(44 + num_channels * num_samples * 4);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
            .map_err(|e| Error::Codec(format!("WAV header write failed: {}", e)))?;
        for i in 0..num_samples {
            for ch in 0..num_channels {
                writer
                    .write_sample(audio[[ch, i]])
                    .map_err(|e| Error::Codec(format!("WAV write failed: {}", e)))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| Error::Codec(format!("WAV finalize failed: {}", e)))?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_header_and_size() {
        let audio = array![[0.1f32, 0.2, 0.3, 0.4]];
        let bytes = encode_wav(&audio, 16000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert!(bytes.len() >= 16);
    }

    #[test]
    fn test_zero_channels_rejected() {
        let audio = Array2::<f32>::zeros((0, 10));
        assert!(matches!(encode_wav(&audio, 16000), Err(Error::Codec(_))));
    }
}
