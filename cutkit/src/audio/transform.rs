//! Lazily applied recording transforms
//!
//! A recording keeps an ordered list of transforms. Nothing is computed when a
//! transform is added; `Recording::load_audio` maps the requested window back
//! through the list to find the source samples, decodes them and then applies
//! every transform in order.

use crate::audio::{effects, Resampler};
use crate::error::{Error, Result};
use cutkit_common::timing::{compute_num_samples, perturb_num_samples, Seconds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sampling rate used by narrowband simulation
pub const NARROWBAND_SAMPLING_RATE: u32 = 8000;

/// Companding codec used by narrowband simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrowbandCodec {
    Mulaw,
    Alaw,
}

impl fmt::Display for NarrowbandCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NarrowbandCodec::Mulaw => write!(f, "mulaw"),
            NarrowbandCodec::Alaw => write!(f, "alaw"),
        }
    }
}

impl FromStr for NarrowbandCodec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mulaw" | "mu-law" | "ulaw" => Ok(NarrowbandCodec::Mulaw),
            "alaw" | "a-law" => Ok(NarrowbandCodec::Alaw),
            other => Err(Error::Precondition(format!(
                "Unknown narrowband codec '{}' (expected mulaw or alaw)",
                other
            ))),
        }
    }
}

/// One step of a recording's effect chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum AudioTransform {
    /// Speed perturbation: resampling by `1 / factor` at a fixed nominal rate
    Speed { factor: f64 },

    /// Tempo perturbation: duration change without pitch change
    Tempo { factor: f64 },

    /// Volume perturbation
    Volume { factor: f64 },

    Resample {
        source_sampling_rate: u32,
        target_sampling_rate: u32,
    },

    /// Telephone channel simulation
    Narrowband {
        codec: NarrowbandCodec,
        source_sampling_rate: u32,
        restore_orig_sr: bool,
    },

    /// RMS loudness normalization to `target` dBFS
    LoudnessNormalization { target: f64 },

    /// Weighted prediction error dereverberation
    DereverbWPE,
}

impl AudioTransform {
    /// Sampling rate of the audio that goes into this transform, given the
    /// rate that comes out of it
    pub fn input_sampling_rate(&self, output_rate: u32) -> u32 {
        match self {
            AudioTransform::Resample {
                source_sampling_rate,
                ..
            } => *source_sampling_rate,
            AudioTransform::Narrowband {
                source_sampling_rate,
                restore_orig_sr: false,
                ..
            } => *source_sampling_rate,
            _ => output_rate,
        }
    }

    /// Map an output window back to the input window
    ///
    /// `sampling_rate` is the rate of the transform's output. Speed and tempo
    /// scale through sample counts; rate changes keep the window in seconds.
    pub fn reverse_timestamps(
        &self,
        offset: Seconds,
        duration: Option<Seconds>,
        sampling_rate: u32,
    ) -> (Seconds, Option<Seconds>) {
        match self {
            AudioTransform::Speed { factor } | AudioTransform::Tempo { factor } => {
                let start = perturb_num_samples(compute_num_samples(offset, sampling_rate), 1.0 / factor);
                let num_samples = duration.map(|d| {
                    perturb_num_samples(compute_num_samples(d, sampling_rate), 1.0 / factor)
                });
                (
                    start as f64 / sampling_rate as f64,
                    num_samples.map(|n| n as f64 / sampling_rate as f64),
                )
            }
            _ => (offset, duration),
        }
    }

    /// Apply the transform to planar audio at `sampling_rate`
    ///
    /// # Returns
    /// The transformed audio and its sampling rate
    pub fn apply(&self, mut audio: Vec<Vec<f32>>, sampling_rate: u32) -> Result<(Vec<Vec<f32>>, u32)> {
        match self {
            AudioTransform::Speed { factor } => {
                Ok((Resampler::resample_ratio(&audio, 1.0 / factor)?, sampling_rate))
            }
            AudioTransform::Tempo { factor } => {
                let stretched = audio.iter().map(|ch| effects::time_stretch(ch, *factor)).collect();
                Ok((stretched, sampling_rate))
            }
            AudioTransform::Volume { factor } => {
                effects::apply_gain(&mut audio, *factor as f32);
                Ok((audio, sampling_rate))
            }
            AudioTransform::Resample {
                target_sampling_rate,
                ..
            } => Ok((
                Resampler::resample(&audio, sampling_rate, *target_sampling_rate)?,
                *target_sampling_rate,
            )),
            AudioTransform::Narrowband {
                codec,
                source_sampling_rate,
                restore_orig_sr,
            } => {
                let mut narrow = Resampler::resample(&audio, sampling_rate, NARROWBAND_SAMPLING_RATE)?;
                let round_trip = match codec {
                    NarrowbandCodec::Mulaw => effects::mulaw_round_trip,
                    NarrowbandCodec::Alaw => effects::alaw_round_trip,
                };
                for channel in narrow.iter_mut() {
                    for sample in channel.iter_mut() {
                        *sample = round_trip(*sample);
                    }
                }
                if *restore_orig_sr {
                    let restored =
                        Resampler::resample(&narrow, NARROWBAND_SAMPLING_RATE, *source_sampling_rate)?;
                    Ok((restored, *source_sampling_rate))
                } else {
                    Ok((narrow, NARROWBAND_SAMPLING_RATE))
                }
            }
            AudioTransform::LoudnessNormalization { target } => {
                effects::normalize_loudness(&mut audio, *target);
                Ok((audio, sampling_rate))
            }
            AudioTransform::DereverbWPE => Err(Error::Unsupported(
                "WPE dereverberation is recorded on manifests but not computed".to_string(),
            )),
        }
    }
}
