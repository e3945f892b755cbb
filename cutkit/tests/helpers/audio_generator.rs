//! Audio Test File Generation Utilities
//!
//! Generate deterministic WAV files with known characteristics, so tests can
//! check sample counts and channel layout after cut transforms and exports.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Standard test sample rate (16 kHz)
pub const TEST_SAMPLE_RATE: u32 = 16000;

/// Generate a mono 16-bit sine wave WAV file
///
/// # Arguments
/// * `path` - Output file path
/// * `duration_ms` - Duration in milliseconds
/// * `frequency_hz` - Sine wave frequency in Hz (e.g., 440.0 for A4)
/// * `amplitude` - Amplitude 0.0-1.0 (0.5 recommended to avoid clipping)
///
/// # Example
/// ```no_run
/// # use std::path::Path;
/// // 1 second of 440 Hz at 50% amplitude
/// generate_sine_wav(Path::new("/tmp/sine_440hz_1s.wav"), 1000, 440.0, 0.5)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    generate_tone_channels_wav(path, duration_ms, &[frequency_hz], amplitude)
}

/// Generate a 16-bit WAV file with one sine tone per channel
///
/// Channel `c` carries `frequencies_hz[c]`; a frequency of 0 gives silence.
pub fn generate_tone_channels_wav<P: AsRef<Path>>(
    path: P,
    duration_ms: u64,
    frequencies_hz: &[f32],
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: frequencies_hz.len() as u16,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = (TEST_SAMPLE_RATE as u64 * duration_ms) / 1000;
    let amplitude_i16 = amplitude * i16::MAX as f32;

    for frame_idx in 0..total_frames {
        let t = frame_idx as f32 / TEST_SAMPLE_RATE as f32;
        for freq in frequencies_hz {
            let sample_value = (2.0 * PI * freq * t).sin();
            writer.write_sample((sample_value * amplitude_i16) as i16)?;
        }
    }

    writer.finalize()?;
    Ok(())
}
