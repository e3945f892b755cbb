//! Time-domain transforms of data cuts
//!
//! Every transform returns a new cut that shares the backing manifests of the
//! original. Boundaries move through sample counts (`add_durations`,
//! `perturb_num_samples`) so that chains of transforms do not drift.

use crate::audio::NarrowbandCodec;
use crate::cut::custom::CustomValue;
use crate::cut::data::DataCut;
use crate::cut::index::CutIndex;
use crate::error::{ensure, Error, Result};
use crate::manifest::Recording;
use crate::supervision::SupervisionSegment;
use cutkit_common::timing::{
    compute_num_frames, compute_num_samples, format_factor, overlap_ratio, overlaps, overspans,
    perturb_num_samples, Seconds, TimeSpan,
};
use cutkit_common::uuid_utils::random_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Widening of the envelope query used with a supervision index
const INDEX_ENVELOP_TOLERANCE: Seconds = 1e-3;

/// Minimum fraction of a supervision that must fall inside the window when
/// selecting through a supervision index
const MIN_OVERLAP_RATIO: f64 = 0.01;

/// Side of a cut an operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Both,
}

impl Direction {
    pub fn includes_left(self) -> bool {
        matches!(self, Direction::Left | Direction::Both)
    }

    pub fn includes_right(self) -> bool {
        matches!(self, Direction::Right | Direction::Both)
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "both" => Ok(Direction::Both),
            other => Err(Error::Precondition(format!(
                "Unknown direction '{}' (expected left, right or both)",
                other
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Both => "both",
        };
        f.write_str(name)
    }
}

/// Options of `truncate`
#[derive(Debug, Clone, Copy)]
pub struct TruncateOptions<'a> {
    /// Keep supervisions that only partially overlap the new window
    pub keep_excessive_supervisions: bool,

    /// Keep the cut id instead of drawing a new random one
    pub preserve_id: bool,

    /// Supervision index to select supervisions with
    pub index: Option<&'a CutIndex>,
}

impl Default for TruncateOptions<'_> {
    fn default() -> Self {
        Self {
            keep_excessive_supervisions: true,
            preserve_id: false,
            index: None,
        }
    }
}

/// Result of growing a data cut inside its recording
#[derive(Debug, Clone)]
pub(crate) struct Extension {
    pub cut: DataCut,
    /// Silence still needed on the left to honor the request
    pub pad_left: Seconds,
    /// Silence still needed on the right to honor the request
    pub pad_right: Seconds,
}

/// Supervisions kept by a truncation to `[offset, offset + duration]`,
/// re-expressed relative to the new window and sorted by start
pub(crate) fn select_supervisions(
    cut_id: &str,
    supervisions: &[SupervisionSegment],
    offset: Seconds,
    duration: Seconds,
    keep_excessive: bool,
    index: Option<&CutIndex>,
) -> Result<Vec<SupervisionSegment>> {
    let mut kept: Vec<SupervisionSegment> = match index {
        None => {
            let window = TimeSpan::new(0.0, duration);
            supervisions
                .iter()
                .map(|s| s.with_offset(-offset))
                .filter(|s| {
                    if keep_excessive {
                        overlaps(&window, s)
                    } else {
                        overspans(&window, s)
                    }
                })
                .collect()
        }
        Some(index) => {
            let tree = index.get(cut_id).ok_or_else(|| {
                Error::Precondition(format!("Supervision index has no entry for cut {}", cut_id))
            })?;
            let (begin, end) = (offset, offset + duration);
            let candidates = if keep_excessive {
                tree.overlap(begin, end)
            } else {
                tree.envelop(begin - INDEX_ENVELOP_TOLERANCE, end + INDEX_ENVELOP_TOLERANCE)
            };
            let window = TimeSpan::new(begin, end);
            candidates
                .into_iter()
                .filter(|s| overlap_ratio(*s, &window) > MIN_OVERLAP_RATIO)
                .map(|s| s.with_offset(-offset))
                .collect()
        }
    };
    kept.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(kept)
}

/// Whether a frame-indexed store starting at `store_start` with `num_frames`
/// frames fails to cover `[new_start, new_end]` (one frame of slack per side)
fn window_exceeds(
    new_start: Seconds,
    new_end: Seconds,
    store_start: Seconds,
    frame_shift: Seconds,
    num_frames: usize,
    sampling_rate: u32,
) -> Result<bool> {
    let start_frames = compute_num_frames(new_start, frame_shift, sampling_rate)?;
    let end_frames = compute_num_frames(new_end, frame_shift, sampling_rate)?;
    let store_start_frames = compute_num_frames(store_start, frame_shift, sampling_rate)?;
    let store_end_frames = store_start_frames + num_frames as i64;
    Ok(start_frames < store_start_frames - 1 || end_frames > store_end_frames + 1)
}

impl DataCut {
    /// Narrow the cut to `[offset, offset + duration]` of its current window
    ///
    /// # Arguments
    /// * `offset` - Seconds to drop from the start (must be non-negative)
    /// * `duration` - New duration; the end never moves past the current end
    /// * `options` - Supervision policy, id handling and optional index
    ///
    /// # Examples
    ///
    /// ```
    /// use cutkit::cut::{DataCut, TruncateOptions};
    ///
    /// let cut = DataCut::new("c", 2.0, 8.0, 0);
    /// let truncated = cut.truncate(3.0, Some(10.0), &TruncateOptions::default()).unwrap();
    /// assert_eq!(truncated.start, 5.0);
    /// assert_eq!(truncated.duration, 5.0);
    /// ```
    pub fn truncate(&self, offset: Seconds, duration: Option<Seconds>, options: &TruncateOptions) -> Result<DataCut> {
        ensure!(offset >= 0.0, "Offset for truncate must be non-negative, got {}", offset);

        let new_start = self.add(&[self.start, offset]).max(0.0);
        let until = self.add(&[offset, duration.unwrap_or(self.duration)]);
        let mut new_duration = self.add(&[until, -offset]);
        let past_end = self.add(&[new_start, new_duration, -self.start, -self.duration]);
        if past_end > 0.0 {
            new_duration = self.add(&[new_duration, -past_end]);
        }
        ensure!(
            new_duration > 0.0,
            "Truncating cut {} (duration {}) at offset {} leaves nothing",
            self.id,
            self.duration,
            offset
        );

        let supervisions = select_supervisions(
            &self.id,
            &self.supervisions,
            offset,
            new_duration,
            options.keep_excessive_supervisions,
            options.index,
        )?;

        Ok(DataCut {
            id: if options.preserve_id { self.id.clone() } else { random_id() },
            start: new_start,
            duration: new_duration,
            supervisions,
            ..self.clone()
        })
    }

    /// Grow the window inside the recording, reporting the shortfall
    pub(crate) fn extend_window(
        &self,
        duration: Seconds,
        direction: Direction,
        preserve_id: bool,
        pad_silence: bool,
    ) -> Result<Extension> {
        ensure!(duration >= 0.0, "Extension duration must be non-negative, got {}", duration);
        let recording = self.require_recording("extend_by")?;
        let sampling_rate = recording.sampling_rate;

        let mut new_start = self.start;
        let mut new_end = self.end();
        let mut pad_left = 0.0;
        let mut pad_right = 0.0;

        if direction.includes_left() {
            let wanted = self.add(&[self.start, -duration]);
            if wanted < 0.0 && pad_silence {
                pad_left = -wanted;
            }
            new_start = wanted.max(0.0);
        }
        if direction.includes_right() {
            let wanted = self.add(&[self.end(), duration]);
            if wanted > recording.duration && pad_silence {
                pad_right = self.add(&[wanted, -recording.duration]);
            }
            new_end = wanted.min(recording.duration);
        }

        let new_duration = self.add(&[new_end, -new_start]);
        let shift = self.add(&[self.start, -new_start]);

        let mut cut = DataCut {
            id: if preserve_id { self.id.clone() } else { random_id() },
            start: new_start,
            duration: new_duration,
            supervisions: self.supervisions.iter().map(|s| s.with_offset(shift)).collect(),
            ..self.clone()
        };

        if let Some(features) = &self.features {
            if window_exceeds(
                new_start,
                new_end,
                features.start,
                features.frame_shift,
                features.num_frames,
                sampling_rate,
            )? {
                warn!(
                    "Features of cut {} do not cover the extended window [{}, {}], dropping them",
                    self.id, new_start, new_end
                );
                cut.features = None;
            }
        }

        if let Some(custom) = cut.custom.as_mut() {
            let mut uncovered = Vec::new();
            for (key, value) in custom.iter() {
                let exceeds = match value {
                    CustomValue::TemporalArray(t) => window_exceeds(
                        new_start,
                        new_end,
                        t.start,
                        t.frame_shift,
                        t.num_frames(),
                        sampling_rate,
                    )?,
                    CustomValue::Features(f) => {
                        window_exceeds(new_start, new_end, f.start, f.frame_shift, f.num_frames, sampling_rate)?
                    }
                    _ => false,
                };
                if exceeds {
                    warn!(
                        "Custom field '{}' of cut {} does not cover the extended window, dropping it",
                        key, self.id
                    );
                    uncovered.push(key.to_string());
                }
            }
            custom.retain(|key, _| !uncovered.iter().any(|k| k == key));
        }

        Ok(Extension {
            cut,
            pad_left,
            pad_right,
        })
    }

    /// Resample the recording (and nested custom recordings)
    pub fn resample(&self, sampling_rate: u32, affix_id: bool) -> Result<DataCut> {
        let recording = self.require_recording("resample")?;
        let mut cut = self.detach_features("resample");
        cut.recording = Some(Arc::new(recording.resample(sampling_rate)));
        if let Some(custom) = &self.custom {
            cut.custom = Some(custom.map_values(|_, value| match value {
                CustomValue::Recording(r) => CustomValue::Recording(Arc::new(r.resample(sampling_rate))),
                other => other.clone(),
            }));
        }
        if affix_id {
            cut.id = format!("{}_rs{}", self.id, sampling_rate);
        }
        Ok(cut)
    }

    /// Speed perturbation: pitch and duration change together
    pub fn perturb_speed(&self, factor: f64, affix_id: bool) -> Result<DataCut> {
        check_factor(factor, "perturb_speed")?;
        let recording = self.require_recording("perturb_speed")?;
        let sampling_rate = recording.sampling_rate;
        let mut cut = self.rescale_time(factor, sampling_rate, "perturb_speed");
        cut.recording = Some(Arc::new(recording.perturb_speed(factor, affix_id)));
        cut.supervisions = self
            .supervisions
            .iter()
            .map(|s| s.perturb_speed(factor, sampling_rate, affix_id))
            .collect();
        if affix_id {
            cut.id = format!("{}_sp{}", self.id, format_factor(factor));
        }
        Ok(cut)
    }

    /// Tempo perturbation: duration changes, pitch does not
    pub fn perturb_tempo(&self, factor: f64, affix_id: bool) -> Result<DataCut> {
        check_factor(factor, "perturb_tempo")?;
        let recording = self.require_recording("perturb_tempo")?;
        let sampling_rate = recording.sampling_rate;
        let mut cut = self.rescale_time(factor, sampling_rate, "perturb_tempo");
        cut.recording = Some(Arc::new(recording.perturb_tempo(factor, affix_id)));
        cut.supervisions = self
            .supervisions
            .iter()
            .map(|s| s.perturb_tempo(factor, sampling_rate, affix_id))
            .collect();
        if affix_id {
            cut.id = format!("{}_tp{}", self.id, format_factor(factor));
        }
        Ok(cut)
    }

    pub fn perturb_volume(&self, factor: f64, affix_id: bool) -> Result<DataCut> {
        check_factor(factor, "perturb_volume")?;
        let recording = self.require_recording("perturb_volume")?;
        let suffix = format!("_vp{}", format_factor(factor));
        Ok(self.relabel(
            recording.perturb_volume(factor, affix_id),
            affix_id.then_some(suffix.as_str()),
            "perturb_volume",
        ))
    }

    /// Simulate a telephone channel
    pub fn narrowband(&self, codec: NarrowbandCodec, restore_orig_sr: bool, affix_id: bool) -> Result<DataCut> {
        let recording = self.require_recording("narrowband")?;
        let suffix = format!("_nb_{}", codec);
        Ok(self.relabel(
            recording.narrowband(codec, restore_orig_sr, affix_id),
            affix_id.then_some(suffix.as_str()),
            "narrowband",
        ))
    }

    /// Normalize loudness to `target` dBFS
    pub fn normalize_loudness(&self, target: f64, affix_id: bool) -> Result<DataCut> {
        let recording = self.require_recording("normalize_loudness")?;
        let suffix = format!("_ln{}", format_factor(target));
        Ok(self.relabel(
            recording.normalize_loudness(target, affix_id),
            affix_id.then_some(suffix.as_str()),
            "normalize_loudness",
        ))
    }

    /// Record WPE dereverberation (computed at load time, see `AudioTransform`)
    pub fn dereverb_wpe(&self, affix_id: bool) -> Result<DataCut> {
        let recording = self.require_recording("dereverb_wpe")?;
        Ok(self.relabel(
            recording.dereverb_wpe(affix_id),
            affix_id.then_some("_wpe"),
            "dereverb_wpe",
        ))
    }

    pub(crate) fn require_recording(&self, operation: &str) -> Result<&Arc<Recording>> {
        self.recording.as_ref().ok_or_else(|| {
            Error::Precondition(format!("{} requires a recording, cut {} has none", operation, self.id))
        })
    }

    /// Copy without features, warning when there were some
    fn detach_features(&self, operation: &str) -> DataCut {
        if self.has_features() {
            warn!(
                "{} of cut {} detaches its feature manifest; recompute features afterwards",
                operation, self.id
            );
        }
        DataCut {
            features: None,
            ..self.clone()
        }
    }

    /// Shared part of speed and tempo perturbation: new window in samples and
    /// time-indexed custom arrays detached
    fn rescale_time(&self, factor: f64, sampling_rate: u32, operation: &str) -> DataCut {
        let mut cut = self.detach_features(operation);
        let start_samples = perturb_num_samples(compute_num_samples(self.start, sampling_rate), factor);
        let num_samples = perturb_num_samples(compute_num_samples(self.duration, sampling_rate), factor);
        cut.start = start_samples as f64 / sampling_rate as f64;
        cut.duration = num_samples as f64 / sampling_rate as f64;
        if let Some(custom) = cut.custom.as_mut() {
            custom.retain(|key, value| {
                let timed = matches!(value, CustomValue::TemporalArray(_) | CustomValue::Features(_));
                if timed {
                    warn!("{} of cut {} detaches time-indexed custom field '{}'", operation, self.id, key);
                }
                !timed
            });
        }
        cut
    }

    /// Swap in a new recording and affix ids, for transforms that keep timing
    fn relabel(&self, recording: Recording, suffix: Option<&str>, operation: &str) -> DataCut {
        let mut cut = self.detach_features(operation);
        cut.recording = Some(Arc::new(recording));
        if let Some(suffix) = suffix {
            cut.id = format!("{}{}", self.id, suffix);
            cut.supervisions = self.supervisions.iter().map(|s| s.with_id_affix(suffix)).collect();
        }
        cut
    }
}

fn check_factor(factor: f64, operation: &str) -> Result<()> {
    ensure!(
        factor.is_finite() && factor > 0.0,
        "{} factor must be positive, got {}",
        operation,
        factor
    );
    Ok(())
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
