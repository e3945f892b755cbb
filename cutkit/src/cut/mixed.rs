//! Mixed cuts and padding
//!
//! A `MixedCut` overlays tracks, each a cut placed at an offset with an
//! optional signal-to-noise ratio relative to the first track. Padding is a
//! mix of a cut with a `PaddingCut`, so `pad` always produces a mix (or the
//! cut itself when nothing needs to be added).
//!
//! The mix starts at 0 and lasts until the end of its last track. Audio is
//! mixed channel by channel when every data track has the same number of
//! channels and down to mono otherwise; padding contributes silence to every
//! channel. Features are mixed in the log domain.

use crate::cut::custom::{CustomValue, Payload};
use crate::cut::data::MoveToMemory;
use crate::cut::merge::{merge_segments, MergeFn, MergePolicy};
use crate::cut::padding::{PaddingCut, LOG_EPSILON};
use crate::cut::transform::{Direction, TruncateOptions};
use crate::cut::Cut;
use crate::audio::NarrowbandCodec;
use crate::error::{ensure, Error, Result};
use crate::supervision::SupervisionSegment;
use cutkit_common::timing::{
    add_durations, compute_num_frames, compute_num_samples, format_factor, is_close, perturb_num_samples, Seconds,
};
use cutkit_common::uuid_utils::random_id;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One cut placed inside a mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixTrack {
    pub cut: Cut,
    #[serde(default)]
    pub offset: Seconds,

    /// Level of this track relative to the first track, in dB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
}

impl MixTrack {
    pub fn new(cut: Cut, offset: Seconds) -> Self {
        MixTrack { cut, offset, snr: None }
    }

    pub fn end(&self) -> Seconds {
        self.offset + self.cut.duration()
    }
}

/// Overlay of several cuts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedCut {
    pub id: String,
    pub tracks: Vec<MixTrack>,
}

/// Length a cut is padded to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PadTarget {
    Duration(Seconds),
    NumFrames(u64),
    NumSamples(u64),
}

/// Options of `pad`
#[derive(Debug, Clone, PartialEq)]
pub struct PadOptions {
    /// Feature value of the padded frames
    pub feat_value: f32,
    pub direction: Direction,
    pub preserve_id: bool,
    /// Pad values of custom fields
    pub pad_value_dict: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for PadOptions {
    fn default() -> Self {
        Self {
            feat_value: LOG_EPSILON,
            direction: Direction::Right,
            preserve_id: false,
            pad_value_dict: None,
        }
    }
}

impl MixedCut {
    pub fn new(id: impl Into<String>, tracks: Vec<MixTrack>) -> Self {
        MixedCut {
            id: id.into(),
            tracks,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn duration(&self) -> Seconds {
        let end = self.tracks.iter().map(MixTrack::end).fold(0.0, f64::max);
        (end * 1e8).round() / 1e8
    }

    /// First track that is not padding; the reference of SNR and metadata
    fn reference(&self) -> Option<&MixTrack> {
        self.tracks
            .iter()
            .find(|t| !matches!(t.cut, Cut::Padding(_)))
            .or_else(|| self.tracks.first())
    }

    fn data_tracks(&self) -> impl Iterator<Item = &MixTrack> {
        self.tracks.iter().filter(|t| !matches!(t.cut, Cut::Padding(_)))
    }

    pub fn sampling_rate(&self) -> Option<u32> {
        self.reference().and_then(|t| t.cut.sampling_rate())
    }

    pub fn has_recording(&self) -> bool {
        self.reference().map(|t| t.cut.has_recording()).unwrap_or(false)
    }

    pub fn has_features(&self) -> bool {
        self.reference().map(|t| t.cut.has_features()).unwrap_or(false)
    }

    pub fn has_video(&self) -> bool {
        self.reference().map(|t| t.cut.has_video()).unwrap_or(false)
    }

    pub fn frame_shift(&self) -> Option<Seconds> {
        self.reference().and_then(|t| t.cut.frame_shift())
    }

    pub fn num_features(&self) -> Option<usize> {
        self.reference().and_then(|t| t.cut.num_features())
    }

    /// Channels of the mixed audio: the common channel count of the data
    /// tracks, or 1 when they disagree
    pub fn num_channels(&self) -> usize {
        let mut counts = self.data_tracks().map(|t| t.cut.num_channels());
        match counts.next() {
            Some(first) if counts.all(|n| n == first) => first,
            _ => 1,
        }
    }

    pub fn num_samples(&self) -> Option<u64> {
        if !self.has_recording() {
            return None;
        }
        self.sampling_rate()
            .map(|sr| compute_num_samples(self.duration(), sr).max(0) as u64)
    }

    pub fn num_frames(&self) -> Option<u64> {
        match (self.has_features(), self.frame_shift(), self.sampling_rate()) {
            (true, Some(fs), Some(sr)) => compute_num_frames(self.duration(), fs, sr).ok().map(|n| n.max(0) as u64),
            _ => None,
        }
    }

    /// True when the reference track has custom field `key`
    pub fn has_custom(&self, key: &str) -> bool {
        self.reference().map(|t| t.cut.has(key)).unwrap_or(false)
    }

    /// Supervisions of every track, on the mix time axis
    pub fn supervisions(&self) -> Vec<SupervisionSegment> {
        let mut out: Vec<SupervisionSegment> = self
            .tracks
            .iter()
            .flat_map(|t| t.cut.supervisions().iter().map(|s| s.with_offset(t.offset)).collect::<Vec<_>>())
            .collect();
        out.sort_by(|a, b| a.start.total_cmp(&b.start));
        out
    }

    fn add(&self, durations: &[Seconds]) -> Seconds {
        match self.sampling_rate() {
            Some(sr) => add_durations(durations, sr),
            None => durations.iter().sum(),
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Mix of every track, shaped `(num_channels, num_samples)`
    pub fn load_audio(&self) -> Result<Array2<f32>> {
        let (Some(sr), Some(total)) = (self.sampling_rate(), self.num_samples()) else {
            return Err(Error::Load(format!("Mixed cut {} has no recording", self.id)));
        };
        let num_channels = self.num_channels();
        let mut mix = Array2::<f32>::zeros((num_channels, total as usize));
        let mut reference_energy: Option<f64> = None;

        for track in self.data_tracks() {
            let mut audio = track.cut.load_audio()?;
            if audio.nrows() != num_channels {
                audio = audio.mean_axis(Axis(0)).unwrap_or_default().insert_axis(Axis(0));
            }
            let energy = audio.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / audio.len().max(1) as f64;
            let gain = match (track.snr, reference_energy) {
                (Some(snr), Some(reference)) if energy > 0.0 => {
                    (reference / (energy * 10f64.powf(snr / 10.0))).sqrt() as f32
                }
                _ => 1.0,
            };
            reference_energy.get_or_insert(energy);

            let offset = compute_num_samples(track.offset, sr).max(0) as usize;
            for (mut out, channel) in mix.outer_iter_mut().zip(audio.outer_iter()) {
                for (slot, sample) in out.iter_mut().skip(offset).zip(channel.iter()) {
                    *slot += gain * sample;
                }
            }
        }
        debug!(
            "Mixed {} tracks of {} into {} channel(s) of {} samples",
            self.tracks.len(),
            self.id,
            num_channels,
            total
        );
        Ok(mix)
    }

    /// Log-domain mix of every track's features
    pub fn load_features(&self) -> Result<Array2<f32>> {
        let (Some(sr), Some(fs), Some(nf), Some(total)) = (
            self.sampling_rate(),
            self.frame_shift(),
            self.num_features(),
            self.num_frames(),
        ) else {
            return Err(Error::Load(format!("Mixed cut {} has no features", self.id)));
        };
        let mut mix = Array2::from_elem((total as usize, nf), f32::NEG_INFINITY);
        let mut reference_energy: Option<f64> = None;

        for track in &self.tracks {
            if !track.cut.has_features() {
                continue;
            }
            let feats = track.cut.load_features()?;
            let is_padding = matches!(track.cut, Cut::Padding(_));
            let mut log_gain = 0.0f32;
            if !is_padding {
                let energy: f64 = feats.iter().map(|v| (*v as f64).exp()).sum();
                if let (Some(snr), Some(reference)) = (track.snr, reference_energy) {
                    if energy > 0.0 {
                        log_gain = (reference / (energy * 10f64.powf(snr / 10.0))).ln() as f32;
                    }
                }
                reference_energy.get_or_insert(energy);
            }

            let offset = compute_num_frames(track.offset, fs, sr)?.max(0) as usize;
            for (row, frame) in feats.outer_iter().enumerate() {
                let index = offset + row;
                if index >= total as usize {
                    break;
                }
                for (slot, value) in mix.row_mut(index).iter_mut().zip(frame.iter()) {
                    *slot = log_add(*slot, value + log_gain);
                }
            }
        }
        mix.mapv_inplace(|v| if v == f32::NEG_INFINITY { LOG_EPSILON } else { v });
        Ok(mix)
    }

    /// Custom field `key` of the only data track that carries it, padded to
    /// the extent of the mix
    pub fn load_custom(&self, key: &str) -> Result<Payload> {
        let mut carriers = self.data_tracks().filter(|t| t.cut.has(key));
        let track = carriers
            .next()
            .ok_or_else(|| Error::Load(format!("Mixed cut {} has no custom field '{}'", self.id, key)))?;
        if carriers.next().is_some() {
            return Err(Error::Unsupported(format!(
                "Custom field '{}' of mixed cut {} is present on several tracks",
                key, self.id
            )));
        }
        let pad_value = self
            .tracks
            .iter()
            .find_map(|t| match &t.cut {
                Cut::Padding(p) if p.custom.as_ref().map(|c| c.contains_key(key)).unwrap_or(false) => {
                    Some(p.pad_value(key))
                }
                _ => None,
            })
            .unwrap_or(0.0);

        let payload = track.cut.load_custom(key)?;
        match (payload, track.cut.custom_value(key)) {
            (Payload::Audio { samples, sampling_rate }, _) => {
                let before = compute_num_samples(track.offset, sampling_rate).max(0) as usize;
                let total = compute_num_samples(self.duration(), sampling_rate).max(0) as usize;
                let mut out = Array2::from_elem((samples.nrows(), total), pad_value as f32);
                for (ch, channel) in samples.outer_iter().enumerate() {
                    for (i, s) in channel.iter().enumerate() {
                        if let Some(slot) = out.get_mut([ch, before + i]) {
                            *slot = *s;
                        }
                    }
                }
                Ok(Payload::Audio {
                    samples: out,
                    sampling_rate,
                })
            }
            (Payload::Tensor(tensor), Some(CustomValue::TemporalArray(t))) => {
                let padded = self.pad_temporal(&tensor, t.temporal_dim, t.frame_shift, track.offset, pad_value)?;
                Ok(Payload::Tensor(padded))
            }
            (Payload::Tensor(tensor), Some(CustomValue::Features(f))) => {
                let padded = self.pad_temporal(&tensor, 0, f.frame_shift, track.offset, pad_value)?;
                Ok(Payload::Tensor(padded))
            }
            (payload, _) => Ok(payload),
        }
    }

    fn pad_temporal(
        &self,
        tensor: &crate::manifest::Tensor,
        temporal_dim: usize,
        frame_shift: Seconds,
        offset: Seconds,
        pad_value: f64,
    ) -> Result<crate::manifest::Tensor> {
        let sr = self
            .sampling_rate()
            .ok_or_else(|| Error::Load(format!("Mixed cut {} has no sampling rate", self.id)))?;
        let before = compute_num_frames(offset, frame_shift, sr)?.max(0) as usize;
        let total = compute_num_frames(self.duration(), frame_shift, sr)?.max(0) as usize;
        let len = tensor.shape().get(temporal_dim).copied().unwrap_or(0);
        let after = total.saturating_sub(before + len);
        tensor.pad_axis(temporal_dim, before, after, pad_value)
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    /// Narrow the mix to `[offset, offset + duration]`, truncating every
    /// track that intersects the window
    pub fn truncate(&self, offset: Seconds, duration: Option<Seconds>, options: &TruncateOptions) -> Result<MixedCut> {
        ensure!(offset >= 0.0, "Offset for truncate must be non-negative, got {}", offset);
        let mix_duration = self.duration();
        let new_end = match duration {
            Some(d) => self.add(&[offset, d]).min(mix_duration),
            None => mix_duration,
        };
        ensure!(
            new_end > offset && !is_close(new_end, offset),
            "Truncating mixed cut {} (duration {}) at offset {} leaves nothing",
            self.id,
            mix_duration,
            offset
        );

        let track_options = TruncateOptions {
            preserve_id: true,
            index: None,
            ..*options
        };
        let mut tracks = Vec::new();
        for track in &self.tracks {
            let track_end = self.add(&[track.offset, track.cut.duration()]);
            if track.offset >= new_end || track_end <= offset || is_close(track_end, offset) {
                continue;
            }
            let cut_offset = self.add(&[offset, -track.offset]).max(0.0);
            let new_offset = self.add(&[track.offset, -offset]).max(0.0);
            let cut_duration = self.add(&[track_end.min(new_end), -track.offset.max(offset)]);
            tracks.push(MixTrack {
                cut: track.cut.truncate(cut_offset, Some(cut_duration), &track_options)?,
                offset: new_offset,
                snr: track.snr,
            });
        }
        ensure!(!tracks.is_empty(), "Truncating mixed cut {} leaves no tracks", self.id);

        Ok(MixedCut {
            id: if options.preserve_id { self.id.clone() } else { random_id() },
            tracks,
        })
    }

    pub fn resample(&self, sampling_rate: u32, affix_id: bool) -> Result<MixedCut> {
        self.map_tracks(affix_id.then(|| format!("_rs{}", sampling_rate)), |c| {
            c.resample(sampling_rate, affix_id)
        })
    }

    pub fn perturb_speed(&self, factor: f64, affix_id: bool) -> Result<MixedCut> {
        let mut out = self.map_tracks(affix_id.then(|| format!("_sp{}", format_factor(factor))), |c| {
            c.perturb_speed(factor, affix_id)
        })?;
        self.rescale_offsets(&mut out, factor);
        Ok(out)
    }

    pub fn perturb_tempo(&self, factor: f64, affix_id: bool) -> Result<MixedCut> {
        let mut out = self.map_tracks(affix_id.then(|| format!("_tp{}", format_factor(factor))), |c| {
            c.perturb_tempo(factor, affix_id)
        })?;
        self.rescale_offsets(&mut out, factor);
        Ok(out)
    }

    pub fn perturb_volume(&self, factor: f64, affix_id: bool) -> Result<MixedCut> {
        self.map_tracks(affix_id.then(|| format!("_vp{}", format_factor(factor))), |c| {
            c.perturb_volume(factor, affix_id)
        })
    }

    pub fn narrowband(&self, codec: NarrowbandCodec, restore_orig_sr: bool, affix_id: bool) -> Result<MixedCut> {
        self.map_tracks(affix_id.then(|| format!("_nb_{}", codec)), |c| {
            c.narrowband(codec, restore_orig_sr, affix_id)
        })
    }

    /// Normalizes every track separately
    pub fn normalize_loudness(&self, target: f64, affix_id: bool) -> Result<MixedCut> {
        self.map_tracks(affix_id.then(|| format!("_ln{}", format_factor(target))), |c| {
            c.normalize_loudness(target, affix_id)
        })
    }

    pub fn dereverb_wpe(&self, affix_id: bool) -> Result<MixedCut> {
        self.map_tracks(affix_id.then(|| "_wpe".to_string()), |c| c.dereverb_wpe(affix_id))
    }

    fn map_tracks(&self, suffix: Option<String>, mut f: impl FnMut(&Cut) -> Result<Cut>) -> Result<MixedCut> {
        let tracks = self
            .tracks
            .iter()
            .map(|t| {
                Ok(MixTrack {
                    cut: f(&t.cut)?,
                    ..t.clone()
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MixedCut {
            id: match suffix {
                Some(suffix) => format!("{}{}", self.id, suffix),
                None => self.id.clone(),
            },
            tracks,
        })
    }

    fn rescale_offsets(&self, out: &mut MixedCut, factor: f64) {
        if let Some(sr) = self.sampling_rate() {
            for track in &mut out.tracks {
                let samples = perturb_num_samples(compute_num_samples(track.offset, sr), factor);
                track.offset = samples as f64 / sr as f64;
            }
        }
    }

    // ========================================================================
    // Supervisions and memory
    // ========================================================================

    /// Merge every supervision of the mix into one, stored on the reference
    /// track; the other tracks lose their supervisions
    pub fn merge_supervisions(&self, policy: MergePolicy, merge_fn: Option<MergeFn<'_>>) -> MixedCut {
        let Some(merged) = merge_segments(&self.supervisions(), policy, merge_fn, self.sampling_rate()) else {
            return self.clone();
        };
        self.with_supervisions(vec![merged])
    }

    /// Same rules as for data cuts, on the mix time axis
    pub fn fill_supervision(&self, add_empty: bool, shrink_ok: bool) -> Result<MixedCut> {
        let duration = self.duration();
        let supervisions = self.supervisions();
        let supervision = match supervisions.as_slice() {
            [] => {
                if !add_empty {
                    return Ok(self.clone());
                }
                let recording_id = self
                    .reference()
                    .and_then(|t| t.cut.recording_id().map(str::to_string))
                    .unwrap_or_else(|| self.id.clone());
                SupervisionSegment::new(self.id.clone(), recording_id, 0.0, duration)
            }
            [only] => {
                if is_close(only.start, 0.0) && is_close(only.duration, duration) {
                    return Ok(self.clone());
                }
                let reaches_outside = only.start < 0.0 || (only.end() > duration && !is_close(only.end(), duration));
                if reaches_outside && !shrink_ok {
                    return Err(Error::Validation(format!(
                        "Supervision {} would shrink to fit mixed cut {} of duration {}",
                        only.id, self.id, duration
                    )));
                }
                SupervisionSegment {
                    start: 0.0,
                    duration,
                    ..only.clone()
                }
            }
            many => {
                return Err(Error::Precondition(format!(
                    "Mixed cut {} has {} supervisions; fill_supervision needs at most one",
                    self.id,
                    many.len()
                )))
            }
        };
        Ok(self.with_supervisions(vec![supervision]))
    }

    /// Replace every supervision of the mix: `supervisions` (on the mix time
    /// axis) go to the reference track, the other tracks get none
    pub fn with_supervisions(&self, supervisions: Vec<SupervisionSegment>) -> MixedCut {
        let reference = self
            .tracks
            .iter()
            .position(|t| !matches!(t.cut, Cut::Padding(_)))
            .unwrap_or(0);
        let tracks = self
            .tracks
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let supervisions = if i == reference {
                    supervisions.iter().map(|s| s.with_offset(-t.offset)).collect()
                } else {
                    Vec::new()
                };
                MixTrack {
                    cut: t.cut.with_supervisions(supervisions),
                    ..t.clone()
                }
            })
            .collect();
        MixedCut {
            id: self.id.clone(),
            tracks,
        }
    }

    pub fn move_to_memory(&self, options: MoveToMemory) -> Result<MixedCut> {
        self.map_tracks(None, |c| c.move_to_memory(options))
    }

    pub fn drop_in_memory_data(&self) -> MixedCut {
        MixedCut {
            id: self.id.clone(),
            tracks: self
                .tracks
                .iter()
                .map(|t| MixTrack {
                    cut: t.cut.drop_in_memory_data(),
                    ..t.clone()
                })
                .collect(),
        }
    }
}

/// `ln(exp(a) + exp(b))` without overflow
fn log_add(a: f32, b: f32) -> f32 {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    if lo == f32::NEG_INFINITY {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// Pad `cut` to `target` with silence and feature floor
///
/// Returns the cut unchanged when it already reaches the target. Padding a
/// mixed cut adds tracks to the same mix.
pub fn pad_cut(cut: &Cut, target: PadTarget, options: &PadOptions) -> Result<Cut> {
    let sampling_rate = cut
        .sampling_rate()
        .ok_or_else(|| Error::Precondition(format!("Cannot pad cut {} without a sampling rate", cut.id())))?;
    let pad_duration = match target {
        PadTarget::Duration(d) => add_durations(&[d, -cut.duration()], sampling_rate),
        PadTarget::NumFrames(n) => {
            let (Some(frames), Some(fs)) = (cut.num_frames(), cut.frame_shift()) else {
                return Err(Error::Precondition(format!(
                    "Cannot pad cut {} to a frame count without features",
                    cut.id()
                )));
            };
            (n as f64 - frames as f64) * fs
        }
        PadTarget::NumSamples(n) => {
            let samples = cut.num_samples().ok_or_else(|| {
                Error::Precondition(format!("Cannot pad cut {} to a sample count without audio", cut.id()))
            })?;
            (n as f64 - samples as f64) / sampling_rate as f64
        }
    };
    if pad_duration <= 0.0 || is_close(pad_duration, 0.0) {
        return Ok(cut.clone());
    }

    let padding = |duration: Seconds| -> PaddingCut {
        let mut p = PaddingCut::new(random_id(), duration, sampling_rate);
        if let (Some(nf), Some(fs)) = (cut.num_features(), cut.frame_shift()) {
            p = p.with_features(nf, fs, options.feat_value);
        }
        if !cut.has_recording() {
            p = p.without_audio();
        }
        p.custom = options.pad_value_dict.clone();
        p
    };

    let (left, right) = match options.direction {
        Direction::Right => (0.0, pad_duration),
        Direction::Left => (pad_duration, 0.0),
        Direction::Both => {
            let left = compute_num_samples(pad_duration / 2.0, sampling_rate) as f64 / sampling_rate as f64;
            (left, add_durations(&[pad_duration, -left], sampling_rate))
        }
    };

    let mut tracks = Vec::new();
    if left > 0.0 {
        let mut p = padding(left);
        if let (PadTarget::NumFrames(n), Direction::Left, Some(frames)) = (target, options.direction, cut.num_frames()) {
            p.num_frames = Some(n - frames);
        }
        if let (PadTarget::NumSamples(n), Direction::Left, Some(samples)) = (target, options.direction, cut.num_samples()) {
            p.num_samples = Some(n - samples);
        }
        tracks.push(MixTrack::new(Cut::Padding(p), 0.0));
    }
    match cut {
        Cut::Mixed(mixed) => tracks.extend(mixed.tracks.iter().map(|t| MixTrack {
            offset: add_durations(&[t.offset, left], sampling_rate),
            ..t.clone()
        })),
        other => tracks.push(MixTrack::new(other.clone(), left)),
    }
    if right > 0.0 {
        let mut p = padding(right);
        if let (PadTarget::NumFrames(n), Direction::Right, Some(frames)) = (target, options.direction, cut.num_frames()) {
            p.num_frames = Some(n - frames);
        }
        if let (PadTarget::NumSamples(n), Direction::Right, Some(samples)) = (target, options.direction, cut.num_samples()) {
            p.num_samples = Some(n - samples);
        }
        tracks.push(MixTrack::new(Cut::Padding(p), add_durations(&[left, cut.duration()], sampling_rate)));
    }

    Ok(Cut::Mixed(MixedCut {
        id: if options.preserve_id { cut.id().to_string() } else { random_id() },
        tracks,
    }))
}

#[cfg(test)]
#[path = "mixed_tests.rs"]
mod tests;
