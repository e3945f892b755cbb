//! Shar writer
//!
//! Writes a stream of cuts into a Shar directory: one archive stream per
//! declared field plus the `cuts` metadata stream. For every cut each stream
//! receives exactly one entry (payload or placeholder), which keeps shard
//! boundaries aligned across fields. All entries of a cut are loaded and
//! encoded before any stream is appended to, so a cut that fails to load
//! leaves no trace in any stream.
//!
//! Lifecycle: `Unopened -> Open -> Closed`. Writing before `open` or after
//! `close` is an invalid-state error. A writer dropped while open is closed
//! on drop, with errors logged.

use crate::cut::{Cut, CustomValue, DataCut, Payload};
use crate::error::{Error, Result};
use crate::manifest::{Array, AudioSource, Features, Recording, TemporalArray, Tensor};
use crate::shar::field_writer::{make_writer, FieldPayload, FieldWriter, ShardEntry, ShardPattern};
use crate::shar::{WriterKind, CUTS_FIELD, JSONL_EXT};
use cutkit_common::config::SharConfig;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Writer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Unopened,
    Open,
    Closed,
}

/// Options of a Shar export
#[derive(Debug, Clone, PartialEq)]
pub struct SharWriterOptions {
    pub output_dir: PathBuf,

    /// Exported fields and their codecs, in processing order
    pub fields: Vec<(String, WriterKind)>,

    /// Entries per shard; `None` writes a single file per field
    pub shard_size: Option<usize>,

    /// Number of the first shard
    pub shard_offset: usize,

    /// File name suffix when sharding is disabled
    pub shard_suffix: Option<String>,

    pub warn_unused_fields: bool,
    pub include_cuts: bool,
}

impl SharWriterOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        SharWriterOptions {
            output_dir: output_dir.into(),
            fields: Vec::new(),
            shard_size: Some(cutkit_common::config::DEFAULT_SHARD_SIZE),
            shard_offset: 0,
            shard_suffix: None,
            warn_unused_fields: true,
            include_cuts: true,
        }
    }

    /// Options from the `[shar]` configuration section
    pub fn from_config(output_dir: impl Into<PathBuf>, config: &SharConfig) -> Result<Self> {
        let fields = config
            .fields
            .iter()
            .map(|f| Ok((f.name.clone(), f.format.parse::<WriterKind>()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(SharWriterOptions {
            output_dir: output_dir.into(),
            fields,
            shard_size: config.shard_size(),
            shard_offset: config.shard_offset,
            shard_suffix: config.shard_suffix.clone(),
            warn_unused_fields: config.warn_unused_fields,
            include_cuts: config.include_cuts,
        })
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: WriterKind) -> Self {
        self.fields.push((name.into(), kind));
        self
    }

    pub fn with_shard_size(mut self, shard_size: Option<usize>) -> Self {
        self.shard_size = shard_size;
        self
    }

    pub fn sharding_enabled(&self) -> bool {
        matches!(self.shard_size, Some(s) if s > 0)
    }

    fn validate(&self) -> Result<()> {
        if self.sharding_enabled() && self.shard_suffix.is_some() {
            return Err(Error::Precondition(format!(
                "shard_suffix must be unset when shard_size is set (got '{}')",
                self.shard_suffix.as_deref().unwrap_or_default()
            )));
        }
        let mut seen = HashSet::new();
        for (name, kind) in &self.fields {
            if name == CUTS_FIELD {
                return Err(Error::Precondition(format!("'{}' is reserved for the metadata stream", CUTS_FIELD)));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::Precondition(format!("Field '{}' is declared twice", name)));
            }
            let fits = match name.as_str() {
                "recording" => kind.is_audio(),
                "features" => kind.is_array(),
                _ => true,
            };
            if !fits {
                return Err(Error::TypeContract(format!("Field '{}' cannot be written with '{}'", name, kind)));
            }
        }
        Ok(())
    }
}

/// Explicit channel selection for custom recordings, keyed by field name
///
/// A selected field is loaded and exported with only those channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSelectors(BTreeMap<String, Vec<u32>>);

impl ChannelSelectors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, channels: Vec<u32>) -> Self {
        self.0.insert(field.into(), channels);
        self
    }

    pub fn get(&self, field: &str) -> Option<&[u32]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

/// Sharded writer of cuts and their data
pub struct SharWriter {
    options: SharWriterOptions,
    state: WriterState,
    writers: Vec<(String, Box<dyn FieldWriter>)>,
    num_cuts: usize,
}

impl SharWriter {
    /// Validate `options`; nothing is created until `open`
    pub fn new(options: SharWriterOptions) -> Result<Self> {
        options.validate()?;
        Ok(SharWriter {
            options,
            state: WriterState::Unopened,
            writers: Vec::new(),
            num_cuts: 0,
        })
    }

    /// Create the output directory and one writer per stream
    pub fn open(&mut self) -> Result<()> {
        if self.state != WriterState::Unopened {
            return Err(Error::InvalidState(format!("Cannot open a writer that is {:?}", self.state)));
        }
        std::fs::create_dir_all(&self.options.output_dir)?;

        let suffix = self.options.shard_suffix.clone().unwrap_or_default();
        let shard_size = self.options.shard_size;
        let offset = self.options.shard_offset;
        let dir = self.options.output_dir.clone();
        let pattern = |field: &str, ext: &'static str| ShardPattern::new(&dir, field, ext).with_fixed_suffix(suffix.clone());

        if self.options.include_cuts {
            self.writers.push((
                CUTS_FIELD.to_string(),
                make_writer(WriterKind::Jsonl, pattern(CUTS_FIELD, JSONL_EXT), shard_size, offset),
            ));
        }
        for (field, kind) in &self.options.fields {
            self.writers.push((
                field.clone(),
                make_writer(*kind, pattern(field, kind.extension()), shard_size, offset),
            ));
        }

        info!(
            "Writing Shar to {} (fields: {}, shard size: {:?})",
            self.options.output_dir.display(),
            self.options.fields.iter().map(|(f, k)| format!("{}={}", f, k)).collect::<Vec<_>>().join(", "),
            shard_size
        );
        self.state = WriterState::Open;
        Ok(())
    }

    /// Open a writer, run `f`, and close the writer on every path
    ///
    /// An error from `f` takes precedence over an error from closing.
    pub fn scoped<T>(options: SharWriterOptions, f: impl FnOnce(&mut SharWriter) -> Result<T>) -> Result<T> {
        let mut writer = SharWriter::new(options)?;
        writer.open()?;
        let result = f(&mut writer);
        let closed = writer.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn options(&self) -> &SharWriterOptions {
        &self.options
    }

    /// Number of cuts written so far
    pub fn num_cuts(&self) -> usize {
        self.num_cuts
    }

    /// Shard paths per stream, in shard order
    pub fn output_paths(&self) -> BTreeMap<String, Vec<PathBuf>> {
        self.writers
            .iter()
            .map(|(field, w)| (field.clone(), w.output_paths().to_vec()))
            .collect()
    }

    /// Write one cut
    pub fn write(&mut self, cut: &Cut) -> Result<()> {
        self.write_with_selectors(cut, &ChannelSelectors::default())
    }

    /// Write one cut, loading custom recordings with the given channels
    ///
    /// Fields are processed as `recording`, `features`, then the remaining
    /// declared fields in declaration order.
    pub fn write_with_selectors(&mut self, cut: &Cut, selectors: &ChannelSelectors) -> Result<()> {
        if self.state != WriterState::Open {
            return Err(Error::InvalidState(format!("Cannot write to a writer that is {:?}", self.state)));
        }
        if cut.as_data().is_none() {
            debug!("Materializing {} before export", cut.id());
        }
        let mut cut = cut.materialize()?;
        cut.validate()?;
        self.check_contracts(&cut)?;

        let mut staged: Vec<(String, ShardEntry)> = Vec::with_capacity(self.writers.len());
        for field in self.export_order() {
            let entry = match field.as_str() {
                "recording" => self.stage_recording(&mut cut)?,
                "features" => self.stage_features(&mut cut)?,
                _ => self.stage_custom(&mut cut, &field, selectors)?,
            };
            staged.push((field, entry));
        }
        if self.options.warn_unused_fields {
            self.warn_unused(&cut);
        }

        cut.start = 0.0;
        let key = cut.id.clone();
        if let Some(writer) = self.writer(CUTS_FIELD) {
            let record = serde_json::to_value(Cut::from(cut))?;
            staged.push((CUTS_FIELD.to_string(), writer.encode(&key, FieldPayload::Record(&record))?));
        }

        for (field, entry) in staged {
            self.field_writer_mut(&field)?.append(entry)?;
        }
        self.num_cuts += 1;
        Ok(())
    }

    /// Finish every stream; the first error is returned after all streams
    /// had a chance to close
    pub fn close(&mut self) -> Result<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }
        let mut first_error = None;
        for (field, writer) in &mut self.writers {
            if let Err(e) = writer.close() {
                error!("Failed to close '{}' stream: {}", field, e);
                first_error.get_or_insert(e);
            }
        }
        self.state = WriterState::Closed;
        info!("Closed Shar writer after {} cuts", self.num_cuts);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Declared fields with `recording` and `features` moved to the front
    fn export_order(&self) -> Vec<String> {
        let rank = |field: &str| match field {
            "recording" => 0,
            "features" => 1,
            _ => 2,
        };
        let mut fields: Vec<String> = self.options.fields.iter().map(|(f, _)| f.clone()).collect();
        fields.sort_by_key(|f| rank(f));
        fields
    }

    fn writer(&self, field: &str) -> Option<&dyn FieldWriter> {
        self.writers.iter().find(|(f, _)| f == field).map(|(_, w)| &**w)
    }

    fn field_writer(&self, field: &str) -> Result<&dyn FieldWriter> {
        self.writer(field)
            .ok_or_else(|| Error::InvalidState(format!("No writer for field '{}'", field)))
    }

    fn field_writer_mut(&mut self, field: &str) -> Result<&mut Box<dyn FieldWriter>> {
        self.writers
            .iter_mut()
            .find(|(f, _)| f == field)
            .map(|(_, w)| w)
            .ok_or_else(|| Error::InvalidState(format!("No writer for field '{}'", field)))
    }

    fn stage_recording(&self, cut: &mut DataCut) -> Result<ShardEntry> {
        let writer = self.field_writer("recording")?;
        let Some(recording) = cut.recording.clone() else {
            return Ok(writer.placeholder(&cut.id));
        };
        let samples = cut.load_audio()?;
        let placeholder = recording_placeholder(&recording, &cut.channel.to_vec(), cut.duration, samples.ncols());
        let manifest = serde_json::to_value(&placeholder)?;
        let entry = writer.encode(
            &cut.id,
            FieldPayload::Audio {
                samples: &samples,
                sampling_rate: recording.sampling_rate,
                manifest: &manifest,
            },
        )?;
        cut.recording = Some(Arc::new(placeholder));
        Ok(entry)
    }

    fn stage_features(&self, cut: &mut DataCut) -> Result<ShardEntry> {
        let writer = self.field_writer("features")?;
        let Some(features) = cut.features.clone() else {
            return Ok(writer.placeholder(&cut.id));
        };
        let matrix = cut.load_features()?;
        let placeholder = features_placeholder(&features, cut.duration, matrix.nrows());
        let manifest = serde_json::to_value(&placeholder)?;
        let tensor = Tensor::Float(matrix.into_dyn());
        let entry = writer.encode(
            &cut.id,
            FieldPayload::Array {
                tensor: &tensor,
                manifest: &manifest,
            },
        )?;
        cut.features = Some(Arc::new(placeholder));
        Ok(entry)
    }

    fn stage_custom(&self, cut: &mut DataCut, field: &str, selectors: &ChannelSelectors) -> Result<ShardEntry> {
        let writer = self.field_writer(field)?;
        let key = cut.id.clone();
        let Some(value) = cut.custom.as_ref().and_then(|c| c.get(field)).cloned() else {
            return Ok(writer.placeholder(&key));
        };

        if let CustomValue::Value(v) = &value {
            let mut record = serde_json::Map::new();
            record.insert("cut_id".to_string(), key.clone().into());
            record.insert(field.to_string(), v.clone());
            return writer.encode(&key, FieldPayload::Record(&serde_json::Value::Object(record)));
        }

        let channels = selectors.get(field);
        let payload = cut.load_custom_with_channels(field, channels)?;
        let stamped = match (&value, &payload) {
            (CustomValue::Recording(r), Payload::Audio { samples, .. }) => {
                let channels = channels.map(<[u32]>::to_vec).unwrap_or_else(|| r.channel_ids.clone());
                CustomValue::Recording(Arc::new(recording_placeholder(r, &channels, cut.duration, samples.ncols())))
            }
            (CustomValue::Features(f), Payload::Tensor(t)) => {
                CustomValue::Features(Arc::new(features_placeholder(f, cut.duration, t.shape().first().copied().unwrap_or(0))))
            }
            (CustomValue::TemporalArray(t), Payload::Tensor(tensor)) => CustomValue::TemporalArray(TemporalArray {
                array: Array {
                    shape: tensor.shape().to_vec(),
                    ..t.array.to_placeholder()
                },
                start: 0.0,
                ..t.clone()
            }),
            (CustomValue::Array(a), _) => CustomValue::Array(a.to_placeholder()),
            _ => {
                return Err(Error::TypeContract(format!(
                    "Field '{}' of cut {} loaded an unexpected payload",
                    field, key
                )))
            }
        };
        let manifest = serde_json::to_value(&stamped)?;
        let entry = match &payload {
            Payload::Audio { samples, sampling_rate } => writer.encode(
                &key,
                FieldPayload::Audio {
                    samples,
                    sampling_rate: *sampling_rate,
                    manifest: &manifest,
                },
            )?,
            Payload::Tensor(tensor) => writer.encode(
                &key,
                FieldPayload::Array {
                    tensor,
                    manifest: &manifest,
                },
            )?,
        };
        if let Some(custom) = cut.custom.as_mut() {
            custom.insert(field, stamped);
        }
        Ok(entry)
    }

    /// Every declared custom field must match its codec: plain values go to
    /// `jsonl`, recordings to `wav`, arrays and features to an array codec
    fn check_contracts(&self, cut: &DataCut) -> Result<()> {
        let Some(custom) = &cut.custom else {
            return Ok(());
        };
        for (field, kind) in &self.options.fields {
            let Some(value) = custom.get(field) else {
                continue;
            };
            let fits = match value {
                CustomValue::Value(_) => *kind == WriterKind::Jsonl,
                CustomValue::Recording(_) => kind.is_audio(),
                _ => kind.is_array(),
            };
            if !fits {
                let held = if value.is_data() { "data" } else { "a plain value" };
                return Err(Error::TypeContract(format!(
                    "Field '{}' of cut {} holds {} and cannot be written with '{}'",
                    field, cut.id, held, kind
                )));
            }
        }
        Ok(())
    }

    fn warn_unused(&self, cut: &DataCut) {
        let declared = |name: &str| self.options.fields.iter().any(|(f, _)| f == name);
        for (name, _) in cut.iter_data() {
            if !declared(name) {
                warn!("Cut {} has '{}' data that is not exported", cut.id, name);
            }
        }
    }
}

impl Drop for SharWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Open {
            if let Err(e) = self.close() {
                error!("Error closing Shar writer on drop: {}", e);
            }
        }
    }
}

/// Recording placeholder describing exactly the exported audio
fn recording_placeholder(recording: &Recording, channels: &[u32], duration: f64, num_samples: usize) -> Recording {
    Recording {
        sources: vec![AudioSource::Shar {
            channels: channels.to_vec(),
        }],
        num_samples: num_samples as u64,
        duration,
        channel_ids: channels.to_vec(),
        transforms: Vec::new(),
        ..recording.clone()
    }
}

/// Feature placeholder describing exactly the exported frames
fn features_placeholder(features: &Features, duration: f64, num_frames: usize) -> Features {
    Features {
        start: 0.0,
        duration,
        num_frames,
        ..features.to_placeholder()
    }
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod tests;
