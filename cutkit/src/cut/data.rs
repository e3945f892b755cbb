//! Data cuts
//!
//! `DataCut` is the payload of both `Cut::Mono` and `Cut::Multi`: a window
//! `[start, start + duration]` into a recording and/or a feature matrix,
//! selecting one or more channels, with supervisions and custom fields.
//!
//! Every method takes `&self` and returns a new value. Recording and feature
//! manifests are shared through `Arc`; supervisions and custom fields are
//! copied on write.

use crate::channel::Channel;
use crate::cut::custom::{CustomFields, CustomValue, DataRef, Payload};
use crate::error::{ensure, Error, Result};
use crate::manifest::{Array, Compression, Features, Recording, TemporalArray, Tensor};
use crate::supervision::SupervisionSegment;
use cutkit_common::timing::{
    add_durations, compute_num_frames, compute_num_samples, is_close, Seconds,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Field names that refer to the built-in stores rather than custom fields
pub const RESERVED_FIELDS: &[&str] = &["recording", "features", "supervisions", "video"];

/// Which stores `move_to_memory` copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveToMemory {
    pub audio: bool,
    pub features: bool,
    pub custom: bool,
    /// Encoding of floating point arrays (integer arrays are always raw)
    pub compression: Compression,
}

impl Default for MoveToMemory {
    fn default() -> Self {
        Self {
            audio: true,
            features: true,
            custom: true,
            compression: Compression::Deflate,
        }
    }
}

/// A window into a recording and/or a feature matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCut {
    pub id: String,
    pub start: Seconds,
    pub duration: Seconds,
    pub channel: Channel,
    #[serde(default)]
    pub supervisions: Vec<SupervisionSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Arc<Features>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<Arc<Recording>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomFields>,
}

impl DataCut {
    pub fn new(id: impl Into<String>, start: Seconds, duration: Seconds, channel: impl Into<Channel>) -> Self {
        DataCut {
            id: id.into(),
            start,
            duration,
            channel: channel.into(),
            supervisions: Vec::new(),
            features: None,
            recording: None,
            custom: None,
        }
    }

    /// Cut spanning a whole recording and all of its channels
    pub fn from_recording(recording: Arc<Recording>) -> Self {
        let channel = match recording.channel_ids.as_slice() {
            [single] => Channel::Single(*single),
            many => Channel::Multiple(many.to_vec()),
        };
        DataCut {
            recording: Some(recording.clone()),
            ..DataCut::new(recording.id.clone(), 0.0, recording.duration, channel)
        }
    }

    // ========================================================================
    // Builders
    // ========================================================================

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_recording(mut self, recording: Arc<Recording>) -> Self {
        self.recording = Some(recording);
        self
    }

    pub fn with_features(mut self, features: Arc<Features>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_supervisions(mut self, supervisions: Vec<SupervisionSegment>) -> Self {
        self.supervisions = supervisions;
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: CustomValue) -> Self {
        self.custom.get_or_insert_with(CustomFields::new).insert(key, value);
        self
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn end(&self) -> Seconds {
        self.add(&[self.start, self.duration])
    }

    pub fn has_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn has_features(&self) -> bool {
        self.features.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.recording.as_ref().map(|r| r.has_video()).unwrap_or(false)
    }

    /// True for `recording`, `features`, `video` when present, and for any
    /// custom key
    pub fn has(&self, field: &str) -> bool {
        match field {
            "recording" => self.has_recording(),
            "features" => self.has_features(),
            "video" => self.has_video(),
            key => self.custom.as_ref().map(|c| c.contains_key(key)).unwrap_or(false),
        }
    }

    /// Sampling rate of the features when present, else of the recording
    pub fn sampling_rate(&self) -> Option<u32> {
        self.features
            .as_ref()
            .map(|f| f.sampling_rate)
            .or_else(|| self.recording.as_ref().map(|r| r.sampling_rate))
    }

    pub fn num_samples(&self) -> Option<u64> {
        self.recording
            .as_ref()
            .map(|r| compute_num_samples(self.duration, r.sampling_rate).max(0) as u64)
    }

    pub fn num_frames(&self) -> Option<u64> {
        self.features
            .as_ref()
            .and_then(|f| compute_num_frames(self.duration, f.frame_shift, f.sampling_rate).ok())
            .map(|n| n.max(0) as u64)
    }

    pub fn num_features(&self) -> Option<usize> {
        self.features.as_ref().map(|f| f.num_features)
    }

    pub fn frame_shift(&self) -> Option<Seconds> {
        self.features.as_ref().map(|f| f.frame_shift)
    }

    pub fn features_type(&self) -> Option<&str> {
        self.features.as_ref().map(|f| f.feature_type.as_str())
    }

    pub fn num_channels(&self) -> usize {
        self.channel.len()
    }

    pub fn recording_id(&self) -> Option<&str> {
        self.recording
            .as_ref()
            .map(|r| r.id.as_str())
            .or_else(|| self.features.as_ref().and_then(|f| f.recording_id.as_deref()))
    }

    /// Check the invariants that hold independently of any backing store
    pub fn validate(&self) -> Result<()> {
        ensure!(self.duration > 0.0, "Cut {} has non-positive duration {}", self.id, self.duration);
        ensure!(!self.channel.is_empty(), "Cut {} selects no channels", self.id);
        if let (Some(f), Some(r)) = (&self.features, &self.recording) {
            if f.sampling_rate != r.sampling_rate {
                return Err(Error::Validation(format!(
                    "Cut {}: features are at {} Hz but the recording is at {} Hz",
                    self.id, f.sampling_rate, r.sampling_rate
                )));
            }
        }
        if let Some(f) = &self.features {
            compute_num_frames(self.duration, f.frame_shift, f.sampling_rate)
                .map_err(|e| Error::Validation(format!("Cut {}: {}", self.id, e)))?;
        }
        Ok(())
    }

    /// Every data store referenced by the cut: recording, features, then
    /// custom data fields in order
    pub fn iter_data(&self) -> std::vec::IntoIter<(&str, DataRef<'_>)> {
        let mut items = Vec::new();
        if let Some(r) = &self.recording {
            items.push(("recording", DataRef::Recording(r)));
        }
        if let Some(f) = &self.features {
            items.push(("features", DataRef::Features(f)));
        }
        if let Some(custom) = &self.custom {
            items.extend(custom.iter().filter_map(|(k, v)| v.as_data().map(|d| (k, d))));
        }
        items.into_iter()
    }

    /// At least one referenced store holds its data in memory
    pub fn is_in_memory(&self) -> bool {
        self.iter_data().any(|(_, d)| d.is_in_memory())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Audio of this cut's window and channels, shaped `(channels, samples)`
    pub fn load_audio(&self) -> Result<Array2<f32>> {
        let recording = self
            .recording
            .as_ref()
            .ok_or_else(|| Error::Load(format!("Cut {} has no recording", self.id)))?;
        recording.load_audio(Some(&self.channel.to_vec()), self.start, Some(self.duration))
    }

    /// Feature frames of this cut's window, shaped `(frames, features)`
    pub fn load_features(&self) -> Result<Array2<f32>> {
        let features = self
            .features
            .as_ref()
            .ok_or_else(|| Error::Load(format!("Cut {} has no features", self.id)))?;
        let matrix = features.load(Some(self.start), Some(self.duration))?;
        debug!("Loaded {} feature frames for {}", matrix.nrows(), self.id);
        Ok(matrix)
    }

    pub fn load_video(&self) -> Result<Array2<f32>> {
        if !self.has_video() {
            return Err(Error::Load(format!("Cut {} has no video", self.id)));
        }
        Err(Error::Unsupported("Video decoding is not available".to_string()))
    }

    /// Load the custom data field `key` over this cut's window
    pub fn load_custom(&self, key: &str) -> Result<Payload> {
        self.load_custom_with_channels(key, None)
    }

    /// Load the custom data field `key`, restricting nested recordings to
    /// `channels` (all of their channels when `None`)
    pub fn load_custom_with_channels(&self, key: &str, channels: Option<&[u32]>) -> Result<Payload> {
        let value = self
            .custom
            .as_ref()
            .and_then(|c| c.get(key))
            .ok_or_else(|| Error::Load(format!("Cut {} has no custom field '{}'", self.id, key)))?;
        match value {
            CustomValue::Array(a) => Ok(Payload::Tensor(a.load()?)),
            CustomValue::TemporalArray(t) => Ok(Payload::Tensor(t.load(Some(self.start), Some(self.duration))?)),
            CustomValue::Recording(r) => Ok(Payload::Audio {
                samples: r.load_audio(channels, self.start, Some(self.duration))?,
                sampling_rate: r.sampling_rate,
            }),
            CustomValue::Features(f) => Ok(Payload::Tensor(Tensor::Float(
                f.load(Some(self.start), Some(self.duration))?.into_dyn(),
            ))),
            CustomValue::Value(_) => Err(Error::TypeContract(format!(
                "Custom field '{}' of cut {} holds a plain value, not data",
                key, self.id
            ))),
        }
    }

    // ========================================================================
    // In-memory data
    // ========================================================================

    /// Copy the selected stores into memory, windowed to this cut
    ///
    /// The returned cut starts at 0. Unselected feature matrices and temporal
    /// arrays are re-based so they still cover the same window; an unselected
    /// recording cannot be re-based and is rejected.
    pub fn move_to_memory(&self, options: MoveToMemory) -> Result<DataCut> {
        let mut cut = self.clone();

        if let Some(recording) = &self.recording {
            ensure!(
                options.audio,
                "Cut {}: the recording must be moved along with the other stores",
                self.id
            );
            cut.recording = Some(Arc::new(recording.move_to_memory(
                Some(&self.channel.to_vec()),
                self.start,
                Some(self.duration),
            )?));
        }

        if let Some(features) = &self.features {
            cut.features = Some(Arc::new(if options.features {
                features.move_to_memory(Some(self.start), Some(self.duration), options.compression)?
            } else {
                Features {
                    start: features.start - self.start,
                    ..features.as_ref().clone()
                }
            }));
        }

        if let Some(custom) = &self.custom {
            let mut moved = CustomFields::new();
            for (key, value) in custom.iter() {
                moved.insert(key, self.move_custom(value, &options)?);
            }
            cut.custom = Some(moved);
        }

        cut.start = 0.0;
        Ok(cut)
    }

    fn move_custom(&self, value: &CustomValue, options: &MoveToMemory) -> Result<CustomValue> {
        let window = (Some(self.start), Some(self.duration));
        Ok(match value {
            CustomValue::Array(a) if options.custom => {
                let tensor = a.load()?;
                CustomValue::Array(Array::from_tensor(&tensor, compression_for(&tensor, options.compression))?)
            }
            CustomValue::TemporalArray(t) if options.custom => {
                let tensor = t.load(window.0, window.1)?;
                CustomValue::TemporalArray(TemporalArray::from_tensor(
                    &tensor,
                    t.temporal_dim,
                    t.frame_shift,
                    0.0,
                    compression_for(&tensor, options.compression),
                )?)
            }
            CustomValue::TemporalArray(t) => CustomValue::TemporalArray(TemporalArray {
                start: t.start - self.start,
                ..t.clone()
            }),
            CustomValue::Recording(r) => {
                ensure!(
                    options.custom,
                    "Cut {}: custom recordings must be moved along with the cut",
                    self.id
                );
                CustomValue::Recording(Arc::new(r.move_to_memory(None, self.start, Some(self.duration))?))
            }
            CustomValue::Features(f) if options.custom => {
                CustomValue::Features(Arc::new(f.move_to_memory(window.0, window.1, options.compression)?))
            }
            CustomValue::Features(f) => CustomValue::Features(Arc::new(Features {
                start: f.start - self.start,
                ..f.as_ref().clone()
            })),
            other => other.clone(),
        })
    }

    /// Replace every in-memory store with a placeholder
    ///
    /// Metadata queries keep working; loads of the replaced stores fail.
    pub fn drop_in_memory_data(&self) -> DataCut {
        let mut cut = self.clone();
        if let Some(r) = &self.recording {
            if r.is_in_memory() {
                cut.recording = Some(Arc::new(r.to_placeholder()));
            }
        }
        if let Some(f) = &self.features {
            if f.is_in_memory() {
                cut.features = Some(Arc::new(f.to_placeholder()));
            }
        }
        if let Some(custom) = &self.custom {
            cut.custom = Some(custom.map_values(|_, v| match v {
                CustomValue::Array(a) if a.is_in_memory() => CustomValue::Array(a.to_placeholder()),
                CustomValue::TemporalArray(t) if t.is_in_memory() => CustomValue::TemporalArray(t.to_placeholder()),
                CustomValue::Recording(r) if r.is_in_memory() => CustomValue::Recording(Arc::new(r.to_placeholder())),
                CustomValue::Features(f) if f.is_in_memory() => CustomValue::Features(Arc::new(f.to_placeholder())),
                other => other.clone(),
            }));
        }
        cut
    }

    /// Attach `tensor` under `name` as an in-memory custom array
    ///
    /// With `frame_shift` and `temporal_dim` the array is time-indexed and
    /// starts at this cut's start. Compression applies to float tensors only.
    pub fn attach_tensor(
        &self,
        name: &str,
        tensor: &Tensor,
        frame_shift: Option<Seconds>,
        temporal_dim: Option<usize>,
        compressed: bool,
    ) -> Result<DataCut> {
        ensure!(
            !RESERVED_FIELDS.contains(&name),
            "Cannot attach a tensor under the reserved name '{}'",
            name
        );
        let compression = if compressed && tensor.is_float() {
            Compression::Deflate
        } else {
            Compression::Raw
        };
        let value = match (frame_shift, temporal_dim) {
            (Some(frame_shift), Some(temporal_dim)) => CustomValue::TemporalArray(TemporalArray::from_tensor(
                tensor,
                temporal_dim,
                frame_shift,
                self.start,
                compression,
            )?),
            (None, None) => CustomValue::Array(Array::from_tensor(tensor, compression)?),
            _ => {
                return Err(Error::Precondition(
                    "frame_shift and temporal_dim must be given together".to_string(),
                ))
            }
        };
        Ok(self.clone().with_custom(name, value))
    }

    // ========================================================================
    // Supervisions
    // ========================================================================

    /// Make sure the cut has exactly one supervision covering all of it
    ///
    /// # Arguments
    /// * `add_empty` - Synthesize an empty supervision when there is none
    /// * `shrink_ok` - Allow replacing a supervision that reaches outside the cut
    pub fn fill_supervision(&self, add_empty: bool, shrink_ok: bool) -> Result<DataCut> {
        let supervision = match self.supervisions.as_slice() {
            [] => {
                if !add_empty {
                    return Ok(self.clone());
                }
                SupervisionSegment {
                    channel: Some(self.channel.clone()),
                    ..SupervisionSegment::new(
                        self.id.clone(),
                        self.recording_id().unwrap_or(self.id.as_str()).to_string(),
                        0.0,
                        self.duration,
                    )
                }
            }
            [only] => {
                if is_close(only.start, 0.0) && is_close(only.duration, self.duration) {
                    return Ok(self.clone());
                }
                let reaches_outside =
                    only.start < 0.0 || (only.end() > self.duration && !is_close(only.end(), self.duration));
                if reaches_outside && !shrink_ok {
                    return Err(Error::Validation(format!(
                        "Supervision {} [{}, {}] would shrink to fit cut {} of duration {}",
                        only.id,
                        only.start,
                        only.end(),
                        self.id,
                        self.duration
                    )));
                }
                SupervisionSegment {
                    start: 0.0,
                    duration: self.duration,
                    ..only.clone()
                }
            }
            many => {
                return Err(Error::Precondition(format!(
                    "Cut {} has {} supervisions; fill_supervision needs at most one",
                    self.id,
                    many.len()
                )))
            }
        };
        Ok(self.clone().with_supervisions(vec![supervision]))
    }

    pub fn map_supervisions(&self, f: impl FnMut(&SupervisionSegment) -> SupervisionSegment) -> DataCut {
        DataCut {
            supervisions: self.supervisions.iter().map(f).collect(),
            ..self.clone()
        }
    }

    pub fn filter_supervisions(&self, mut keep: impl FnMut(&SupervisionSegment) -> bool) -> DataCut {
        DataCut {
            supervisions: self.supervisions.iter().filter(|s| keep(*s)).cloned().collect(),
            ..self.clone()
        }
    }

    pub fn drop_supervisions(&self) -> DataCut {
        DataCut {
            supervisions: Vec::new(),
            ..self.clone()
        }
    }

    pub fn drop_alignments(&self) -> DataCut {
        self.map_supervisions(SupervisionSegment::drop_alignment)
    }

    // ========================================================================
    // Store management
    // ========================================================================

    /// Remove the feature manifest; the recording must remain
    pub fn drop_features(&self) -> Result<DataCut> {
        ensure!(self.has_recording(), "Cut {} would have neither recording nor features", self.id);
        Ok(DataCut {
            features: None,
            ..self.clone()
        })
    }

    /// Remove the recording; the features must remain
    pub fn drop_recording(&self) -> Result<DataCut> {
        ensure!(self.has_features(), "Cut {} would have neither recording nor features", self.id);
        Ok(DataCut {
            recording: None,
            ..self.clone()
        })
    }

    pub fn with_recording_path_prefix(&self, prefix: &Path) -> DataCut {
        DataCut {
            recording: self.recording.as_ref().map(|r| Arc::new(r.with_path_prefix(prefix))),
            ..self.clone()
        }
    }

    pub fn with_features_path_prefix(&self, prefix: &Path) -> DataCut {
        DataCut {
            features: self.features.as_ref().map(|f| Arc::new(f.with_path_prefix(prefix))),
            ..self.clone()
        }
    }

    /// Sum durations on the sample grid when the cut has a sampling rate
    pub(crate) fn add(&self, durations: &[Seconds]) -> Seconds {
        match self.sampling_rate() {
            Some(sr) => add_durations(durations, sr),
            None => durations.iter().sum(),
        }
    }
}

/// Float tensors use the requested compression, integer tensors stay raw
fn compression_for(tensor: &Tensor, requested: Compression) -> Compression {
    if tensor.is_float() {
        requested
    } else {
        Compression::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::AudioSource;
    use ndarray::{arr1, Array2};
    use serde_json::json;

    fn recording() -> Arc<Recording> {
        let samples = Array2::from_shape_fn((1, 16000), |(_, i)| i as f32 / 16000.0);
        let bytes = crate::audio::encode_wav(&samples, 16000).unwrap();
        Arc::new(Recording::new(
            "rec",
            vec![AudioSource::Memory {
                channels: vec![0],
                source: Arc::from(bytes),
            }],
            16000,
            16000,
        ))
    }

    fn features() -> Arc<Features> {
        let matrix = Array2::from_shape_fn((100, 3), |(i, _)| i as f32);
        Arc::new(Features::from_matrix("fbank", &matrix, 0.01, 16000, Compression::Raw).unwrap())
    }

    fn cut() -> DataCut {
        DataCut::new("cut", 0.25, 0.5, 0)
            .with_recording(recording())
            .with_features(features())
    }

    #[test]
    fn test_queries() {
        let c = cut();
        assert_eq!(c.end(), 0.75);
        assert_eq!(c.sampling_rate(), Some(16000));
        assert_eq!(c.num_samples(), Some(8000));
        assert_eq!(c.num_frames(), Some(50));
        assert_eq!(c.num_features(), Some(3));
        assert_eq!(c.frame_shift(), Some(0.01));
        assert_eq!(c.features_type(), Some("fbank"));
        assert_eq!(c.recording_id(), Some("rec"));
        assert!(c.has("recording"));
        assert!(c.has("features"));
        assert!(!c.has("video"));
        assert!(!c.has("ali"));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_rates() {
        let mut feats = features().as_ref().clone();
        feats.sampling_rate = 8000;
        let c = cut().with_features(Arc::new(feats));
        assert!(matches!(c.validate(), Err(Error::Validation(_))));
        assert_eq!(c.sampling_rate(), Some(8000));
    }

    #[test]
    fn test_iter_data_order_and_restart() {
        let c = cut()
            .with_custom("note", CustomValue::Value(json!("x")))
            .attach_tensor("ali", &Tensor::Int(arr1(&[1i64, 2]).into_dyn()), None, None, true)
            .unwrap();
        let names: Vec<&str> = c.iter_data().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["recording", "features", "ali"]);
        assert_eq!(c.iter_data().count(), 3);
    }

    #[test]
    fn test_load_window() {
        let c = cut();
        let audio = c.load_audio().unwrap();
        assert_eq!(audio.dim(), (1, 8000));
        assert!((audio[[0, 0]] - 0.25).abs() < 1e-6);
        let feats = c.load_features().unwrap();
        assert_eq!(feats.dim(), (50, 3));
        assert_eq!(feats[[0, 0]], 25.0);
    }

    #[test]
    fn test_load_without_store_fails() {
        let c = DataCut::new("c", 0.0, 1.0, 0);
        assert!(matches!(c.load_audio(), Err(Error::Load(_))));
        assert!(matches!(c.load_features(), Err(Error::Load(_))));
        assert!(matches!(c.load_video(), Err(Error::Load(_))));
        assert!(matches!(c.load_custom("x"), Err(Error::Load(_))));
    }

    #[test]
    fn test_load_custom_value_is_type_error() {
        let c = cut().with_custom("note", CustomValue::Value(json!(1)));
        assert!(matches!(c.load_custom("note"), Err(Error::TypeContract(_))));
    }

    #[test]
    fn test_move_to_memory_and_drop() {
        let c = cut();
        let moved = c.move_to_memory(MoveToMemory::default()).unwrap();
        assert_eq!(moved.start, 0.0);
        assert_eq!(moved.duration, c.duration);
        assert!(moved.is_in_memory());
        assert_eq!(moved.load_audio().unwrap(), c.load_audio().unwrap());
        assert_eq!(moved.load_features().unwrap(), c.load_features().unwrap());

        let dropped = moved.drop_in_memory_data();
        assert!(!dropped.is_in_memory());
        assert_eq!(dropped.duration, c.duration);
        assert_eq!(dropped.num_samples(), c.num_samples());
        assert_eq!(dropped.num_frames(), c.num_frames());
        assert!(dropped.load_audio().is_err());
        assert!(dropped.load_features().is_err());
    }

    #[test]
    fn test_move_to_memory_rebases_unselected_features() {
        let c = cut();
        let moved = c
            .move_to_memory(MoveToMemory {
                features: false,
                ..MoveToMemory::default()
            })
            .unwrap();
        assert!(!moved.features.as_ref().unwrap().is_in_memory());
        assert_eq!(moved.load_features().unwrap(), c.load_features().unwrap());
    }

    #[test]
    fn test_attach_temporal_tensor_starts_at_cut() {
        let tensor = Tensor::Float(Array2::<f32>::zeros((50, 2)).into_dyn());
        let c = cut().attach_tensor("emb", &tensor, Some(0.01), Some(0), true).unwrap();
        match c.custom.as_ref().unwrap().get("emb") {
            Some(CustomValue::TemporalArray(t)) => {
                assert_eq!(t.start, 0.25);
                assert_eq!(t.num_frames(), 50);
            }
            other => panic!("unexpected custom value {:?}", other),
        }
        match c.load_custom("emb").unwrap() {
            Payload::Tensor(t) => assert_eq!(t.shape(), &[50, 2]),
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(cut().attach_tensor("emb", &tensor, Some(0.01), None, true).is_err());
        assert!(cut().attach_tensor("features", &tensor, None, None, true).is_err());
    }

    #[test]
    fn test_fill_supervision_empty() {
        let filled = cut().fill_supervision(true, false).unwrap();
        assert_eq!(filled.supervisions.len(), 1);
        let sup = &filled.supervisions[0];
        assert_eq!(sup.id, "cut");
        assert_eq!(sup.recording_id, "rec");
        assert_eq!(sup.start, 0.0);
        assert_eq!(sup.duration, 0.5);
        assert_eq!(sup.channel, Some(Channel::Single(0)));

        assert!(cut().fill_supervision(false, false).unwrap().supervisions.is_empty());
    }

    #[test]
    fn test_fill_supervision_single() {
        let exact = cut().with_supervisions(vec![SupervisionSegment::new("s", "rec", 0.0, 0.5)]);
        assert_eq!(exact.fill_supervision(true, false).unwrap(), exact);

        let inner = cut().with_supervisions(vec![SupervisionSegment::new("s", "rec", 0.1, 0.2)]);
        let filled = inner.fill_supervision(true, false).unwrap();
        assert_eq!(filled.supervisions[0].start, 0.0);
        assert_eq!(filled.supervisions[0].duration, 0.5);

        let outer = cut().with_supervisions(vec![SupervisionSegment::new("s", "rec", -0.1, 0.8)]);
        assert!(matches!(outer.fill_supervision(true, false), Err(Error::Validation(_))));
        assert_eq!(outer.fill_supervision(true, true).unwrap().supervisions[0].duration, 0.5);
    }

    #[test]
    fn test_fill_supervision_many_fails() {
        let c = cut().with_supervisions(vec![
            SupervisionSegment::new("a", "rec", 0.0, 0.1),
            SupervisionSegment::new("b", "rec", 0.2, 0.1),
        ]);
        assert!(matches!(c.fill_supervision(true, true), Err(Error::Precondition(_))));
    }

    #[test]
    fn test_drop_stores() {
        let c = cut();
        assert!(!c.drop_features().unwrap().has_features());
        assert!(!c.drop_recording().unwrap().has_recording());
        assert!(c.drop_features().unwrap().drop_recording().is_err());
    }

    #[test]
    fn test_supervision_helpers() {
        let c = cut().with_supervisions(vec![
            SupervisionSegment::new("a", "rec", 0.0, 0.1).with_speaker("x"),
            SupervisionSegment::new("b", "rec", 0.2, 0.1).with_speaker("y"),
        ]);
        assert_eq!(c.filter_supervisions(|s| s.speaker.as_deref() == Some("y")).supervisions.len(), 1);
        assert!(c.drop_supervisions().supervisions.is_empty());
        let renamed = c.map_supervisions(|s| s.with_id_affix("_x"));
        assert_eq!(renamed.supervisions[0].id, "a_x");
    }

    #[test]
    fn test_serde_round_trip() {
        let c = cut().with_custom("note", CustomValue::Value(json!({"k": 1})));
        let text = serde_json::to_string(&c).unwrap();
        let back: DataCut = serde_json::from_str(&text).unwrap();
        assert_eq!(back, c);
    }
}
