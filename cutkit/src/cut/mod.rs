//! Cuts
//!
//! A `Cut` is one of four variants:
//! - `MonoCut`: a window into one channel of a recording and/or features
//! - `MultiCut`: the same over several channels
//! - `PaddingCut`: silence / feature floor filler
//! - `MixedCut`: an overlay of other cuts at offsets
//!
//! Every operation returns a new cut and leaves the backing stores untouched.
//! The variant is stored under `type` when serialized.

pub mod custom;
pub mod data;
pub mod index;
pub mod merge;
pub mod mixed;
pub mod padding;
pub mod transform;

pub use custom::{CustomFields, CustomValue, DataRef, Payload};
pub use data::{DataCut, MoveToMemory, RESERVED_FIELDS};
pub use index::{index_supervisions, CutIndex, IntervalTree, SupervisionIndex};
pub use merge::{merge_segments, MergeFn, MergePolicy};
pub use mixed::{pad_cut, MixTrack, MixedCut, PadOptions, PadTarget};
pub use padding::{PaddingCut, LOG_EPSILON};
pub use transform::{Direction, TruncateOptions};

use crate::audio::{encode_wav, NarrowbandCodec};
use crate::channel::Channel;
use crate::error::{ensure, Error, Result};
use crate::manifest::{Array, AudioSource, Compression, Features, Recording, TemporalArray};
use crate::supervision::SupervisionSegment;
use cutkit_common::timing::{add_durations, Seconds};
use cutkit_common::uuid_utils::random_id;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Any cut
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Cut {
    #[serde(rename = "MonoCut")]
    Mono(DataCut),
    #[serde(rename = "MultiCut")]
    Multi(DataCut),
    #[serde(rename = "PaddingCut")]
    Padding(PaddingCut),
    #[serde(rename = "MixedCut")]
    Mixed(MixedCut),
}

impl From<DataCut> for Cut {
    /// `MonoCut` for a single channel, `MultiCut` otherwise
    fn from(cut: DataCut) -> Self {
        match cut.channel {
            Channel::Single(_) => Cut::Mono(cut),
            Channel::Multiple(_) => Cut::Multi(cut),
        }
    }
}

impl From<PaddingCut> for Cut {
    fn from(cut: PaddingCut) -> Self {
        Cut::Padding(cut)
    }
}

impl From<MixedCut> for Cut {
    fn from(cut: MixedCut) -> Self {
        Cut::Mixed(cut)
    }
}

impl Cut {
    /// Cut spanning a whole recording and all of its channels
    pub fn from_recording(recording: Arc<Recording>) -> Cut {
        Cut::from(DataCut::from_recording(recording))
    }

    pub fn as_data(&self) -> Option<&DataCut> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_padding(&self) -> bool {
        matches!(self, Cut::Padding(_))
    }

    /// Same variant around a transformed data cut
    fn rewrap(&self, cut: DataCut) -> Cut {
        match self {
            Cut::Multi(_) => Cut::Multi(cut),
            _ => Cut::Mono(cut),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn id(&self) -> &str {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => &c.id,
            Cut::Padding(p) => &p.id,
            Cut::Mixed(m) => &m.id,
        }
    }

    /// Offset into the backing stores (always 0 for padding and mixes)
    pub fn start(&self) -> Seconds {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.start,
            _ => 0.0,
        }
    }

    pub fn duration(&self) -> Seconds {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.duration,
            Cut::Padding(p) => p.duration,
            Cut::Mixed(m) => m.duration(),
        }
    }

    pub fn end(&self) -> Seconds {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.end(),
            other => other.duration(),
        }
    }

    /// Supervisions relative to this cut's start
    pub fn supervisions(&self) -> Cow<'_, [SupervisionSegment]> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => Cow::Borrowed(&c.supervisions),
            Cut::Padding(_) => Cow::Borrowed(&[]),
            Cut::Mixed(m) => Cow::Owned(m.supervisions()),
        }
    }

    pub fn has_recording(&self) -> bool {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.has_recording(),
            Cut::Padding(p) => p.has_recording(),
            Cut::Mixed(m) => m.has_recording(),
        }
    }

    pub fn has_features(&self) -> bool {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.has_features(),
            Cut::Padding(p) => p.has_features(),
            Cut::Mixed(m) => m.has_features(),
        }
    }

    pub fn has_video(&self) -> bool {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.has_video(),
            Cut::Padding(_) => false,
            Cut::Mixed(m) => m.has_video(),
        }
    }

    /// True for `recording`, `features`, `video` when present and for custom keys
    pub fn has(&self, field: &str) -> bool {
        match field {
            "recording" => self.has_recording(),
            "features" => self.has_features(),
            "video" => self.has_video(),
            key => match self {
                Cut::Mono(c) | Cut::Multi(c) => c.has(key),
                Cut::Padding(_) => false,
                Cut::Mixed(m) => m.has_custom(key),
            },
        }
    }

    pub fn sampling_rate(&self) -> Option<u32> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.sampling_rate(),
            Cut::Padding(p) => Some(p.sampling_rate),
            Cut::Mixed(m) => m.sampling_rate(),
        }
    }

    pub fn num_samples(&self) -> Option<u64> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.num_samples(),
            Cut::Padding(p) => p.num_samples,
            Cut::Mixed(m) => m.num_samples(),
        }
    }

    pub fn num_frames(&self) -> Option<u64> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.num_frames(),
            Cut::Padding(p) => p.num_frames,
            Cut::Mixed(m) => m.num_frames(),
        }
    }

    pub fn num_features(&self) -> Option<usize> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.num_features(),
            Cut::Padding(p) => p.num_features,
            Cut::Mixed(m) => m.num_features(),
        }
    }

    pub fn frame_shift(&self) -> Option<Seconds> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.frame_shift(),
            Cut::Padding(p) => p.frame_shift,
            Cut::Mixed(m) => m.frame_shift(),
        }
    }

    pub fn features_type(&self) -> Option<&str> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.features_type(),
            Cut::Padding(_) => None,
            Cut::Mixed(m) => m.tracks.iter().find_map(|t| t.cut.features_type()),
        }
    }

    /// Channels of the loaded audio
    pub fn num_channels(&self) -> usize {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.num_channels(),
            Cut::Padding(_) => 1,
            Cut::Mixed(m) => m.num_channels(),
        }
    }

    pub fn recording_id(&self) -> Option<&str> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.recording_id(),
            Cut::Padding(_) => None,
            Cut::Mixed(m) => m.tracks.iter().find_map(|t| t.cut.recording_id()),
        }
    }

    /// Custom value stored under `key` (for mixes, on the reference track)
    pub fn custom_value(&self, key: &str) -> Option<&CustomValue> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.custom.as_ref().and_then(|f| f.get(key)),
            Cut::Padding(_) => None,
            Cut::Mixed(m) => m
                .tracks
                .iter()
                .filter(|t| !t.cut.is_padding())
                .find_map(|t| t.cut.custom_value(key)),
        }
    }

    /// Custom fields of the cut (for mixes, of the reference track)
    pub fn custom(&self) -> Option<&CustomFields> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.custom.as_ref(),
            Cut::Padding(_) => None,
            Cut::Mixed(m) => m.tracks.iter().filter(|t| !t.cut.is_padding()).find_map(|t| t.cut.custom()),
        }
    }

    /// Every data store referenced by the cut and its tracks
    pub fn iter_data(&self) -> std::vec::IntoIter<(&str, DataRef<'_>)> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.iter_data(),
            Cut::Padding(_) => Vec::new().into_iter(),
            Cut::Mixed(m) => m
                .tracks
                .iter()
                .flat_map(|t| t.cut.iter_data())
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.iter_data().any(|(_, d)| d.is_in_memory())
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.validate(),
            Cut::Padding(p) => {
                ensure!(p.duration > 0.0, "Padding cut {} has non-positive duration", p.id);
                Ok(())
            }
            Cut::Mixed(m) => {
                ensure!(!m.tracks.is_empty(), "Mixed cut {} has no tracks", m.id);
                m.tracks.iter().try_for_each(|t| t.cut.validate())
            }
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    pub fn load_audio(&self) -> Result<Array2<f32>> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.load_audio(),
            Cut::Padding(p) => p.load_audio(),
            Cut::Mixed(m) => m.load_audio(),
        }
    }

    pub fn load_features(&self) -> Result<Array2<f32>> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.load_features(),
            Cut::Padding(p) => p.load_features(),
            Cut::Mixed(m) => m.load_features(),
        }
    }

    pub fn load_video(&self) -> Result<Array2<f32>> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.load_video(),
            other if other.has_video() => Err(Error::Unsupported("Video decoding is not available".to_string())),
            other => Err(Error::Load(format!("Cut {} has no video", other.id()))),
        }
    }

    pub fn load_custom(&self, key: &str) -> Result<Payload> {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => c.load_custom(key),
            Cut::Padding(p) => Err(Error::Load(format!("Padding cut {} has no custom field '{}'", p.id, key))),
            Cut::Mixed(m) => m.load_custom(key),
        }
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    pub fn truncate(&self, offset: Seconds, duration: Option<Seconds>, options: &TruncateOptions) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.truncate(offset, duration, options)?),
            Cut::Padding(p) => Cut::Padding(p.truncate(offset, duration, options.preserve_id)?),
            Cut::Mixed(m) => Cut::Mixed(m.truncate(offset, duration, options)?),
        })
    }

    /// Grow the cut by `duration` on the given side(s)
    ///
    /// Data cuts grow inside their recording; whatever does not fit is padded
    /// with silence when `pad_silence` is set. Mixed cuts can only be padded.
    pub fn extend_by(&self, duration: Seconds, direction: Direction, preserve_id: bool, pad_silence: bool) -> Result<Cut> {
        ensure!(duration >= 0.0, "Extension duration must be non-negative, got {}", duration);
        let (pad_left, pad_right, base) = match self {
            Cut::Mono(c) | Cut::Multi(c) => {
                let ext = c.extend_window(duration, direction, preserve_id, pad_silence)?;
                (ext.pad_left, ext.pad_right, self.rewrap(ext.cut))
            }
            Cut::Padding(p) => {
                let grow = if direction == Direction::Both { 2.0 * duration } else { duration };
                let mut out = p.with_duration(add_durations(&[p.duration, grow], p.sampling_rate));
                if !preserve_id {
                    out.id = random_id();
                }
                return Ok(Cut::Padding(out));
            }
            Cut::Mixed(m) => {
                ensure!(
                    pad_silence,
                    "Mixed cut {} can only be extended with silence padding",
                    m.id
                );
                let left = if direction.includes_left() { duration } else { 0.0 };
                let right = if direction.includes_right() { duration } else { 0.0 };
                let mut out = self.clone();
                if !preserve_id {
                    if let Cut::Mixed(mixed) = &mut out {
                        mixed.id = random_id();
                    }
                }
                (left, right, out)
            }
        };

        let mut out = base;
        for (amount, side) in [(pad_left, Direction::Left), (pad_right, Direction::Right)] {
            if amount > 0.0 {
                let sampling_rate = out.sampling_rate().ok_or_else(|| {
                    Error::Precondition(format!("Cannot pad cut {} without a sampling rate", out.id()))
                })?;
                let target = add_durations(&[out.duration(), amount], sampling_rate);
                out = out.pad(
                    PadTarget::Duration(target),
                    &PadOptions {
                        direction: side,
                        preserve_id: true,
                        ..PadOptions::default()
                    },
                )?;
            }
        }
        Ok(out)
    }

    /// Pad to `target` (see `pad_cut`)
    pub fn pad(&self, target: PadTarget, options: &PadOptions) -> Result<Cut> {
        pad_cut(self, target, options)
    }

    pub fn resample(&self, sampling_rate: u32, affix_id: bool) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.resample(sampling_rate, affix_id)?),
            Cut::Padding(p) => Cut::Padding(p.resample(sampling_rate, affix_id)),
            Cut::Mixed(m) => Cut::Mixed(m.resample(sampling_rate, affix_id)?),
        })
    }

    pub fn perturb_speed(&self, factor: f64, affix_id: bool) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.perturb_speed(factor, affix_id)?),
            Cut::Padding(p) => Cut::Padding(p.perturb_speed(factor, affix_id)),
            Cut::Mixed(m) => Cut::Mixed(m.perturb_speed(factor, affix_id)?),
        })
    }

    pub fn perturb_tempo(&self, factor: f64, affix_id: bool) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.perturb_tempo(factor, affix_id)?),
            Cut::Padding(p) => Cut::Padding(p.perturb_tempo(factor, affix_id)),
            Cut::Mixed(m) => Cut::Mixed(m.perturb_tempo(factor, affix_id)?),
        })
    }

    pub fn perturb_volume(&self, factor: f64, affix_id: bool) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.perturb_volume(factor, affix_id)?),
            Cut::Padding(p) => Cut::Padding(p.perturb_volume(factor, affix_id)),
            Cut::Mixed(m) => Cut::Mixed(m.perturb_volume(factor, affix_id)?),
        })
    }

    pub fn narrowband(&self, codec: NarrowbandCodec, restore_orig_sr: bool, affix_id: bool) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.narrowband(codec, restore_orig_sr, affix_id)?),
            Cut::Padding(p) => Cut::Padding(p.narrowband(codec, restore_orig_sr, affix_id)),
            Cut::Mixed(m) => Cut::Mixed(m.narrowband(codec, restore_orig_sr, affix_id)?),
        })
    }

    pub fn normalize_loudness(&self, target: f64, affix_id: bool) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.normalize_loudness(target, affix_id)?),
            Cut::Padding(p) => Cut::Padding(p.normalize_loudness(target, affix_id)),
            Cut::Mixed(m) => Cut::Mixed(m.normalize_loudness(target, affix_id)?),
        })
    }

    pub fn dereverb_wpe(&self, affix_id: bool) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.dereverb_wpe(affix_id)?),
            Cut::Padding(p) => Cut::Padding(p.dereverb_wpe(affix_id)),
            Cut::Mixed(m) => Cut::Mixed(m.dereverb_wpe(affix_id)?),
        })
    }

    // ========================================================================
    // Supervisions
    // ========================================================================

    /// Merge supervisions: all into one for mono and mixed cuts, one per
    /// channel for multi-channel cuts
    pub fn merge_supervisions(&self, policy: MergePolicy, merge_fn: Option<MergeFn<'_>>) -> Cut {
        match self {
            Cut::Mono(c) => {
                let merged = merge_segments(&c.supervisions, policy, merge_fn, c.sampling_rate());
                Cut::Mono(c.clone().with_supervisions(merged.into_iter().collect()))
            }
            Cut::Multi(c) => {
                let mut groups: BTreeMap<Vec<u32>, Vec<SupervisionSegment>> = BTreeMap::new();
                for s in &c.supervisions {
                    let key = s.channel.as_ref().unwrap_or(&c.channel).to_vec();
                    groups.entry(key).or_default().push(s.clone());
                }
                let mut merged: Vec<SupervisionSegment> = groups
                    .values()
                    .filter_map(|group| merge_segments(group, policy, merge_fn, c.sampling_rate()))
                    .collect();
                merged.sort_by(|a, b| a.start.total_cmp(&b.start));
                Cut::Multi(c.clone().with_supervisions(merged))
            }
            Cut::Padding(_) => self.clone(),
            Cut::Mixed(m) => Cut::Mixed(m.merge_supervisions(policy, merge_fn)),
        }
    }

    pub fn with_supervisions(&self, supervisions: Vec<SupervisionSegment>) -> Cut {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.clone().with_supervisions(supervisions)),
            Cut::Padding(_) => self.clone(),
            Cut::Mixed(m) => Cut::Mixed(m.with_supervisions(supervisions)),
        }
    }

    pub fn drop_supervisions(&self) -> Cut {
        self.with_supervisions(Vec::new())
    }

    pub fn fill_supervision(&self, add_empty: bool, shrink_ok: bool) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.fill_supervision(add_empty, shrink_ok)?),
            Cut::Padding(_) => self.clone(),
            Cut::Mixed(m) => Cut::Mixed(m.fill_supervision(add_empty, shrink_ok)?),
        })
    }

    // ========================================================================
    // In-memory data
    // ========================================================================

    pub fn move_to_memory(&self, options: MoveToMemory) -> Result<Cut> {
        Ok(match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.move_to_memory(options)?),
            Cut::Padding(_) => self.clone(),
            Cut::Mixed(m) => Cut::Mixed(m.move_to_memory(options)?),
        })
    }

    pub fn drop_in_memory_data(&self) -> Cut {
        match self {
            Cut::Mono(c) | Cut::Multi(c) => self.rewrap(c.drop_in_memory_data()),
            Cut::Padding(_) => self.clone(),
            Cut::Mixed(m) => Cut::Mixed(m.drop_in_memory_data()),
        }
    }

    /// Render padding and mixed cuts into a data cut holding the loaded
    /// audio, features and custom data in memory, with one channel per
    /// channel of the mixed audio
    ///
    /// Data cuts are returned as they are.
    pub fn materialize(&self) -> Result<DataCut> {
        if let Some(cut) = self.as_data() {
            return Ok(cut.clone());
        }
        let id = self.id().to_string();
        let mut out = DataCut::new(id.clone(), 0.0, self.duration(), 0).with_supervisions(self.supervisions().into_owned());

        if self.has_recording() {
            let audio = self.load_audio()?;
            let sampling_rate = self
                .sampling_rate()
                .ok_or_else(|| Error::Load(format!("Cut {} has no sampling rate", id)))?;
            if audio.nrows() > 1 {
                out.channel = Channel::Multiple((0..audio.nrows() as u32).collect());
            }
            out.recording = Some(Arc::new(memory_recording(&id, &audio, sampling_rate)?));
        }
        if self.has_features() {
            let matrix = self.load_features()?;
            let (Some(frame_shift), Some(sampling_rate)) = (self.frame_shift(), self.sampling_rate()) else {
                return Err(Error::Load(format!("Cut {} has no frame shift", id)));
            };
            let feature_type = self.features_type().unwrap_or("padding");
            out.features = Some(Arc::new(Features::from_matrix(
                feature_type,
                &matrix,
                frame_shift,
                sampling_rate,
                Compression::Raw,
            )?));
        }
        if let Some(custom) = self.custom() {
            let mut fields = CustomFields::new();
            for (key, value) in custom.iter() {
                let rendered = match value {
                    CustomValue::Value(v) => CustomValue::Value(v.clone()),
                    data => match (self.load_custom(key)?, data) {
                        (Payload::Audio { samples, sampling_rate }, _) => CustomValue::Recording(Arc::new(
                            memory_recording(&format!("{}_{}", id, key), &samples, sampling_rate)?,
                        )),
                        (Payload::Tensor(t), CustomValue::TemporalArray(original)) => CustomValue::TemporalArray(
                            TemporalArray::from_tensor(&t, original.temporal_dim, original.frame_shift, 0.0, Compression::Raw)?,
                        ),
                        (Payload::Tensor(t), CustomValue::Features(original)) => {
                            CustomValue::TemporalArray(TemporalArray::from_tensor(&t, 0, original.frame_shift, 0.0, Compression::Raw)?)
                        }
                        (Payload::Tensor(t), _) => CustomValue::Array(Array::from_tensor(&t, Compression::Raw)?),
                    },
                };
                fields.insert(key, rendered);
            }
            out.custom = Some(fields);
        }
        Ok(out)
    }
}

/// Recording holding `audio` as an in-memory WAV payload
fn memory_recording(id: &str, audio: &Array2<f32>, sampling_rate: u32) -> Result<Recording> {
    let channels: Vec<u32> = (0..audio.nrows() as u32).collect();
    let bytes = encode_wav(audio, sampling_rate)?;
    Ok(Recording::new(
        id,
        vec![AudioSource::Memory {
            channels,
            source: Arc::from(bytes),
        }],
        sampling_rate,
        audio.ncols() as u64,
    ))
}
