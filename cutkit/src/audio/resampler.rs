//! Audio resampling using rubato
//!
//! Sample rate conversion for `resample`, speed perturbation (resampling by
//! `1 / factor` and keeping the nominal rate) and narrowband simulation.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Audio resampler using rubato for sample rate conversion.
pub struct Resampler;

impl Resampler {
    /// Resample planar audio from `input_rate` to `output_rate`.
    ///
    /// # Arguments
    /// - `input`: Planar audio samples, one `Vec` per channel
    /// - `input_rate`: Input sample rate
    /// - `output_rate`: Output sample rate
    ///
    /// # Returns
    /// Resampled planar audio with roughly `len × output_rate / input_rate`
    /// frames; callers fix the exact length themselves.
    ///
    /// # Notes
    /// If the rates are equal, returns a copy without resampling
    pub fn resample(input: &[Vec<f32>], input_rate: u32, output_rate: u32) -> Result<Vec<Vec<f32>>> {
        if input_rate == output_rate {
            debug!("Sample rate already at {}Hz, skipping resample", output_rate);
            return Ok(input.to_vec());
        }

        debug!(
            "Resampling from {}Hz to {}Hz ({} channels)",
            input_rate,
            output_rate,
            input.len()
        );
        Self::resample_ratio(input, output_rate as f64 / input_rate as f64)
    }

    /// Resample planar audio by an arbitrary `output / input` ratio.
    pub fn resample_ratio(input: &[Vec<f32>], ratio: f64) -> Result<Vec<Vec<f32>>> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(Error::Codec(format!("Invalid resampling ratio {}", ratio)));
        }

        let input_frames = input.first().map(Vec::len).unwrap_or(0);
        if input.is_empty() || input_frames == 0 {
            return Ok(vec![Vec::new(); input.len()]);
        }

        let mut resampler = Self::create_resampler(ratio, input.len(), input_frames)?;
        let output = resampler
            .process(input, None)
            .map_err(|e| Error::Codec(format!("Resampling failed: {}", e)))?;

        debug!(
            "Resampled {} input frames to {} output frames",
            input_frames,
            output.first().map(Vec::len).unwrap_or(0)
        );

        Ok(output)
    }

    /// Create a rubato resampler.
    ///
    /// Uses FastFixedIn with one chunk covering the whole input.
    fn create_resampler(ratio: f64, channels: usize, chunk_size: usize) -> Result<FastFixedIn<f32>> {
        FastFixedIn::<f32>::new(
            ratio,
            1.0, // max_relative_ratio (no runtime changes)
            rubato::PolynomialDegree::Septic,
            chunk_size,
            channels,
        )
        .map_err(|e| Error::Codec(format!("Failed to create resampler: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, rate: u32) -> Vec<f32> {
        (0..frames)
            .map(|i| {
                let t = i as f32 / rate as f32;
                (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5
            })
            .collect()
    }

    #[test]
    fn test_resample_same_rate() {
        let input = vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]];
        let output = Resampler::resample(&input, 16000, 16000).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_resample_different_rate() {
        let input_rate = 48000;
        let duration_frames = 1000;
        let channel = sine(duration_frames, input_rate);
        let input = vec![channel.clone(), channel];

        let output = Resampler::resample(&input, input_rate, 16000).unwrap();

        let expected_frames = duration_frames / 3;
        assert_eq!(output.len(), 2);
        let output_frames = output[0].len();
        // Allow some variance due to resampler internals
        assert!(
            output_frames + 10 >= expected_frames && output_frames <= expected_frames + 10,
            "Expected ~{} frames, got {}",
            expected_frames,
            output_frames
        );
    }

    #[test]
    fn test_resample_empty() {
        let input = vec![Vec::new()];
        let output = Resampler::resample(&input, 16000, 8000).unwrap();
        assert_eq!(output, vec![Vec::<f32>::new()]);
    }

    #[test]
    fn test_invalid_ratio() {
        let input = vec![vec![0.0; 10]];
        assert!(Resampler::resample_ratio(&input, 0.0).is_err());
        assert!(Resampler::resample_ratio(&input, f64::NAN).is_err());
    }
}
