//! Audio decoding, encoding and effects
//!
//! Audio is passed around as an `ndarray::Array2<f32>` shaped
//! `(channels, samples)` with samples in `[-1.0, 1.0]`. Effects work on the
//! planar `Vec<Vec<f32>>` form that rubato expects.

pub mod decode;
pub mod effects;
pub mod encode;
pub mod resampler;
pub mod transform;

use ndarray::Array2;

pub use decode::{decode_bytes, decode_bytes_window, decode_file, decode_file_window, DecodedAudio, SampleWindow};
pub use encode::encode_wav;
pub use resampler::Resampler;
pub use transform::{AudioTransform, NarrowbandCodec};

/// Convert planar channels into a `(channels, samples)` array
///
/// Channels shorter than the longest one are zero padded.
pub fn planar_to_array(planar: &[Vec<f32>]) -> Array2<f32> {
    let frames = planar.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Array2::<f32>::zeros((planar.len(), frames));
    for (ch, samples) in planar.iter().enumerate() {
        for (i, s) in samples.iter().enumerate() {
            out[[ch, i]] = *s;
        }
    }
    out
}

/// Convert a `(channels, samples)` array into planar channels
pub fn array_to_planar(audio: &Array2<f32>) -> Vec<Vec<f32>> {
    audio.outer_iter().map(|row| row.to_vec()).collect()
}

/// Pad with zeros or truncate every channel to exactly `len` samples
pub fn fix_length(planar: &mut [Vec<f32>], len: usize) {
    for channel in planar.iter_mut() {
        channel.resize(len, 0.0);
    }
}
