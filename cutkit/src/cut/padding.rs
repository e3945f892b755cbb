//! Padding cuts
//!
//! A `PaddingCut` stands for silence (audio) or a constant feature floor
//! (features) of a given length. It has no backing store; loading synthesizes
//! the payload from its metadata.

use crate::audio::transform::NARROWBAND_SAMPLING_RATE;
use crate::audio::NarrowbandCodec;
use crate::error::{ensure, Error, Result};
use cutkit_common::timing::{compute_num_frames, compute_num_samples, format_factor, perturb_num_samples, Seconds};
use cutkit_common::uuid_utils::random_id;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Log of a tiny energy, the usual floor for log-domain features
pub const LOG_EPSILON: f32 = -23.025_85;

/// Filler of a fixed length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddingCut {
    pub id: String,
    pub duration: Seconds,
    pub sampling_rate: u32,

    /// Value of every synthesized feature bin
    pub feat_value: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_frames: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_features: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_shift: Option<Seconds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_samples: Option<u64>,

    /// Pad values of custom fields, keyed by field name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Map<String, serde_json::Value>>,
}

impl PaddingCut {
    /// Audio-only padding of `duration` seconds
    pub fn new(id: impl Into<String>, duration: Seconds, sampling_rate: u32) -> Self {
        PaddingCut {
            id: id.into(),
            duration,
            sampling_rate,
            feat_value: LOG_EPSILON,
            num_frames: None,
            num_features: None,
            frame_shift: None,
            num_samples: Some(compute_num_samples(duration, sampling_rate).max(0) as u64),
            custom: None,
        }
    }

    /// Also pad features of `num_features` bins at `frame_shift`
    pub fn with_features(mut self, num_features: usize, frame_shift: Seconds, feat_value: f32) -> Self {
        self.num_frames = compute_num_frames(self.duration, frame_shift, self.sampling_rate)
            .ok()
            .map(|n| n.max(0) as u64);
        self.num_features = Some(num_features);
        self.frame_shift = Some(frame_shift);
        self.feat_value = feat_value;
        self
    }

    /// Drop the audio side (for padding feature-only cuts)
    pub fn without_audio(mut self) -> Self {
        self.num_samples = None;
        self
    }

    pub fn has_recording(&self) -> bool {
        self.num_samples.is_some()
    }

    pub fn has_features(&self) -> bool {
        self.num_frames.is_some()
    }

    /// Pad value of custom field `key`, 0 when none was given
    pub fn pad_value(&self, key: &str) -> f64 {
        self.custom
            .as_ref()
            .and_then(|c| c.get(key))
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Mono silence, shaped `(1, num_samples)`
    pub fn load_audio(&self) -> Result<Array2<f32>> {
        let num_samples = self
            .num_samples
            .ok_or_else(|| Error::Load(format!("Padding cut {} has no audio", self.id)))?;
        Ok(Array2::zeros((1, num_samples as usize)))
    }

    /// Constant matrix shaped `(num_frames, num_features)`
    pub fn load_features(&self) -> Result<Array2<f32>> {
        match (self.num_frames, self.num_features) {
            (Some(frames), Some(features)) => Ok(Array2::from_elem((frames as usize, features), self.feat_value)),
            _ => Err(Error::Load(format!("Padding cut {} has no features", self.id))),
        }
    }

    /// Same filler with a new length
    pub fn with_duration(&self, duration: Seconds) -> PaddingCut {
        PaddingCut {
            duration,
            num_samples: self
                .num_samples
                .map(|_| compute_num_samples(duration, self.sampling_rate).max(0) as u64),
            num_frames: self
                .frame_shift
                .and_then(|fs| compute_num_frames(duration, fs, self.sampling_rate).ok())
                .map(|n| n.max(0) as u64),
            ..self.clone()
        }
    }

    pub fn truncate(&self, offset: Seconds, duration: Option<Seconds>, preserve_id: bool) -> Result<PaddingCut> {
        ensure!(offset >= 0.0, "Offset for truncate must be non-negative, got {}", offset);
        let remaining = self.duration - offset;
        let new_duration = duration.map_or(remaining, |d| d.min(remaining));
        ensure!(
            new_duration > 0.0,
            "Truncating padding cut {} (duration {}) at offset {} leaves nothing",
            self.id,
            self.duration,
            offset
        );
        let mut out = self.with_duration(new_duration);
        if !preserve_id {
            out.id = random_id();
        }
        Ok(out)
    }

    pub fn resample(&self, sampling_rate: u32, affix_id: bool) -> PaddingCut {
        let mut out = self.drop_features("resample");
        out.sampling_rate = sampling_rate;
        out.num_samples = self
            .num_samples
            .map(|_| compute_num_samples(self.duration, sampling_rate).max(0) as u64);
        if affix_id {
            out.id = format!("{}_rs{}", self.id, sampling_rate);
        }
        out
    }

    pub fn perturb_speed(&self, factor: f64, affix_id: bool) -> PaddingCut {
        self.rescale(factor, affix_id.then(|| format!("_sp{}", format_factor(factor))))
    }

    pub fn perturb_tempo(&self, factor: f64, affix_id: bool) -> PaddingCut {
        self.rescale(factor, affix_id.then(|| format!("_tp{}", format_factor(factor))))
    }

    /// Silence stays silent; only the id changes
    pub fn perturb_volume(&self, factor: f64, affix_id: bool) -> PaddingCut {
        self.relabel(affix_id.then(|| format!("_vp{}", format_factor(factor))))
    }

    pub fn narrowband(&self, codec: NarrowbandCodec, restore_orig_sr: bool, affix_id: bool) -> PaddingCut {
        let mut out = self.relabel(affix_id.then(|| format!("_nb_{}", codec)));
        if !restore_orig_sr {
            out = PaddingCut {
                id: out.id.clone(),
                ..out.resample(NARROWBAND_SAMPLING_RATE, false)
            };
        }
        out
    }

    pub fn normalize_loudness(&self, target: f64, affix_id: bool) -> PaddingCut {
        self.relabel(affix_id.then(|| format!("_ln{}", format_factor(target))))
    }

    pub fn dereverb_wpe(&self, affix_id: bool) -> PaddingCut {
        self.relabel(affix_id.then(|| "_wpe".to_string()))
    }

    fn rescale(&self, factor: f64, suffix: Option<String>) -> PaddingCut {
        let mut out = self.drop_features("perturbation");
        let num_samples = perturb_num_samples(compute_num_samples(self.duration, self.sampling_rate), factor);
        out.duration = num_samples as f64 / self.sampling_rate as f64;
        out.num_samples = self.num_samples.map(|_| num_samples.max(0) as u64);
        if let Some(suffix) = suffix {
            out.id = format!("{}{}", self.id, suffix);
        }
        out
    }

    fn relabel(&self, suffix: Option<String>) -> PaddingCut {
        let mut out = self.clone();
        if let Some(suffix) = suffix {
            out.id = format!("{}{}", self.id, suffix);
        }
        out
    }

    fn drop_features(&self, operation: &str) -> PaddingCut {
        if self.has_features() {
            warn!("{} of padding cut {} drops its feature padding", operation, self.id);
        }
        PaddingCut {
            num_frames: None,
            num_features: None,
            frame_shift: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padding() -> PaddingCut {
        PaddingCut::new("pad", 1.0, 16000).with_features(4, 0.01, -10.0)
    }

    #[test]
    fn test_load() {
        let p = padding();
        let audio = p.load_audio().unwrap();
        assert_eq!(audio.dim(), (1, 16000));
        assert!(audio.iter().all(|v| *v == 0.0));
        let feats = p.load_features().unwrap();
        assert_eq!(feats.dim(), (100, 4));
        assert!(feats.iter().all(|v| *v == -10.0));
        assert!(PaddingCut::new("p", 1.0, 16000).load_features().is_err());
        assert!(p.clone().without_audio().load_audio().is_err());
    }

    #[test]
    fn test_truncate() {
        let t = padding().truncate(0.25, Some(0.5), true).unwrap();
        assert_eq!(t.id, "pad");
        assert_eq!(t.duration, 0.5);
        assert_eq!(t.num_samples, Some(8000));
        assert_eq!(t.num_frames, Some(50));

        let tail = padding().truncate(0.75, Some(5.0), false).unwrap();
        assert_eq!(tail.duration, 0.25);
        assert_ne!(tail.id, "pad");
        assert!(padding().truncate(1.0, None, true).is_err());
    }

    #[test]
    fn test_perturbations() {
        let fast = padding().perturb_speed(1.1, true);
        assert_eq!(fast.id, "pad_sp1.1");
        assert_eq!(fast.num_samples, Some(14545));
        assert!(!fast.has_features());

        assert_eq!(padding().perturb_volume(2.0, true).id, "pad_vp2.0");
        assert_eq!(padding().dereverb_wpe(false).id, "pad");

        let rs = padding().resample(8000, false);
        assert_eq!(rs.num_samples, Some(8000));
        assert_eq!(rs.duration, 1.0);

        let nb = padding().narrowband(NarrowbandCodec::Mulaw, false, true);
        assert_eq!(nb.id, "pad_nb_mulaw");
        assert_eq!(nb.sampling_rate, 8000);
    }

    #[test]
    fn test_pad_value() {
        let mut p = padding();
        assert_eq!(p.pad_value("ali"), 0.0);
        p.custom = Some(serde_json::Map::from_iter([("ali".to_string(), serde_json::json!(-1))]));
        assert_eq!(p.pad_value("ali"), -1.0);
    }
}
