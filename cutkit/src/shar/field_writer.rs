//! Per-field shard writers
//!
//! Each writer owns one output stream that is split into numbered shards.
//! A shard is opened lazily on the first entry and closed when the stream
//! rolls over after `shard_size` entries, so `N` entries produce
//! `ceil(N / shard_size)` shards.

use crate::audio::encode_wav;
use crate::error::{Error, Result};
use crate::manifest::{Compression, Tensor};
use crate::shar::WriterKind;
use flate2::write::GzEncoder;
use ndarray::Array2;
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Naming of one field's shards: `{output_dir}/{field}{suffix}{extension}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPattern {
    pub output_dir: PathBuf,
    pub field: String,
    pub extension: &'static str,

    /// Suffix used instead of the shard number when sharding is disabled
    pub fixed_suffix: String,
}

impl ShardPattern {
    pub fn new(output_dir: &Path, field: &str, extension: &'static str) -> Self {
        ShardPattern {
            output_dir: output_dir.to_path_buf(),
            field: field.to_string(),
            extension,
            fixed_suffix: String::new(),
        }
    }

    pub fn with_fixed_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.fixed_suffix = suffix.into();
        self
    }

    /// Path of shard `index`, or of the single unsharded file
    pub fn path(&self, index: Option<usize>) -> PathBuf {
        let suffix = match index {
            Some(i) => format!(".{:06}", i),
            None => self.fixed_suffix.clone(),
        };
        self.output_dir
            .join(format!("{}{}{}", self.field, suffix, self.extension))
    }
}

/// Payload handed to a field writer for one cut
#[derive(Debug, Clone, Copy)]
pub enum FieldPayload<'a> {
    /// `(channels, samples)` audio and its placeholder manifest
    Audio {
        samples: &'a Array2<f32>,
        sampling_rate: u32,
        manifest: &'a serde_json::Value,
    },
    /// A tensor and its placeholder manifest
    Array {
        tensor: &'a Tensor,
        manifest: &'a serde_json::Value,
    },
    /// One JSON record
    Record(&'a serde_json::Value),
}

impl FieldPayload<'_> {
    fn describe(&self) -> &'static str {
        match self {
            FieldPayload::Audio { .. } => "audio",
            FieldPayload::Array { .. } => "an array",
            FieldPayload::Record(_) => "a plain value",
        }
    }
}

/// One cut's encoded entry for a field, ready to be appended
#[derive(Debug, Clone, PartialEq)]
pub enum ShardEntry {
    /// Tar members, appended in order
    Files(Vec<(String, Vec<u8>)>),
    /// One JSON line
    Record(serde_json::Value),
}

impl ShardEntry {
    /// Tar members of a cut without data for the field
    fn no_data(key: &str) -> ShardEntry {
        ShardEntry::Files(vec![
            (format!("{}.nodata", key), Vec::new()),
            (format!("{}.nometa", key), Vec::new()),
        ])
    }
}

/// A sharded output stream for one field
///
/// Encoding and appending are separate steps: `encode` and `placeholder`
/// never touch the stream, and every `append` adds exactly one entry.
pub trait FieldWriter {
    fn kind(&self) -> WriterKind;

    /// Encode the payload of cut `key`
    fn encode(&self, key: &str, payload: FieldPayload<'_>) -> Result<ShardEntry>;

    /// Entry recording that cut `key` has no data for this field
    fn placeholder(&self, key: &str) -> ShardEntry;

    /// Append one encoded entry
    fn append(&mut self, entry: ShardEntry) -> Result<()>;

    /// Shards created so far, in order
    fn output_paths(&self) -> &[PathBuf];

    /// Finish the open shard
    fn close(&mut self) -> Result<()>;

    fn write(&mut self, key: &str, payload: FieldPayload<'_>) -> Result<()> {
        let entry = self.encode(key, payload)?;
        self.append(entry)
    }

    fn write_placeholder(&mut self, key: &str) -> Result<()> {
        let entry = self.placeholder(key);
        self.append(entry)
    }
}

// ============================================================================
// Shard rollover
// ============================================================================

/// One open shard file
trait ShardSink: Sized {
    fn create(path: &Path) -> Result<Self>;
    fn finish(self) -> Result<()>;
}

struct TarSink(tar::Builder<BufWriter<File>>);

impl TarSink {
    fn append(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        self.0.append_data(&mut header, name, data)?;
        Ok(())
    }

    fn append_files(&mut self, files: &[(String, Vec<u8>)]) -> Result<()> {
        for (name, data) in files {
            self.append(name, data)?;
        }
        Ok(())
    }
}

impl ShardSink for TarSink {
    fn create(path: &Path) -> Result<Self> {
        Ok(TarSink(tar::Builder::new(BufWriter::new(File::create(path)?))))
    }

    fn finish(self) -> Result<()> {
        let mut inner = self.0.into_inner()?;
        inner.flush()?;
        Ok(())
    }
}

struct GzSink(GzEncoder<BufWriter<File>>);

impl GzSink {
    fn append(&mut self, record: &serde_json::Value) -> Result<()> {
        serde_json::to_writer(&mut self.0, record)?;
        self.0.write_all(b"\n")?;
        Ok(())
    }
}

impl ShardSink for GzSink {
    fn create(path: &Path) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(GzSink(GzEncoder::new(file, flate2::Compression::default())))
    }

    fn finish(self) -> Result<()> {
        let mut inner = self.0.finish()?;
        inner.flush()?;
        Ok(())
    }
}

/// Shard bookkeeping shared by all writers
struct ShardedStream<S> {
    pattern: ShardPattern,
    shard_size: Option<usize>,
    shard_offset: usize,
    num_items: usize,
    current: Option<S>,
    paths: Vec<PathBuf>,
}

impl<S: ShardSink> ShardedStream<S> {
    fn new(pattern: ShardPattern, shard_size: Option<usize>, shard_offset: usize) -> Self {
        ShardedStream {
            pattern,
            shard_size: shard_size.filter(|s| *s > 0),
            shard_offset,
            num_items: 0,
            current: None,
            paths: Vec::new(),
        }
    }

    /// Shard that receives the next entry, rolling over when the current
    /// one is full
    fn next_item(&mut self) -> Result<&mut S> {
        if let Some(size) = self.shard_size {
            if self.num_items > 0 && self.num_items % size == 0 {
                if let Some(full) = self.current.take() {
                    full.finish()?;
                }
            }
        }
        let sink = match self.current.take() {
            Some(sink) => sink,
            None => {
                let index = self.shard_size.map(|_| self.shard_offset + self.paths.len());
                let path = self.pattern.path(index);
                debug!("Opening shard {}", path.display());
                let sink = S::create(&path)?;
                self.paths.push(path);
                sink
            }
        };
        self.num_items += 1;
        Ok(self.current.insert(sink))
    }

    fn close(&mut self) -> Result<()> {
        match self.current.take() {
            Some(sink) => sink.finish(),
            None => Ok(()),
        }
    }
}

fn contract_error(kind: WriterKind, field: &str, payload: &FieldPayload<'_>) -> Error {
    Error::TypeContract(format!(
        "Field '{}' is written with '{}' and cannot take {}",
        field,
        kind,
        payload.describe()
    ))
}

fn entry_error(field: &str, what: &str) -> Error {
    Error::InvalidState(format!("Field '{}' cannot append {}", field, what))
}

fn manifest_bytes(manifest: &serde_json::Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(manifest)?)
}

// ============================================================================
// Writers
// ============================================================================

/// Audio field: `{key}.wav` + `{key}.json` per cut
pub struct AudioTarWriter {
    stream: ShardedStream<TarSink>,
}

impl AudioTarWriter {
    pub fn new(pattern: ShardPattern, shard_size: Option<usize>, shard_offset: usize) -> Self {
        AudioTarWriter {
            stream: ShardedStream::new(pattern, shard_size, shard_offset),
        }
    }
}

impl FieldWriter for AudioTarWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Wav
    }

    fn encode(&self, key: &str, payload: FieldPayload<'_>) -> Result<ShardEntry> {
        let FieldPayload::Audio {
            samples,
            sampling_rate,
            manifest,
        } = payload
        else {
            return Err(contract_error(self.kind(), &self.stream.pattern.field, &payload));
        };
        Ok(ShardEntry::Files(vec![
            (format!("{}.wav", key), encode_wav(samples, sampling_rate)?),
            (format!("{}.json", key), manifest_bytes(manifest)?),
        ]))
    }

    fn placeholder(&self, key: &str) -> ShardEntry {
        ShardEntry::no_data(key)
    }

    fn append(&mut self, entry: ShardEntry) -> Result<()> {
        let ShardEntry::Files(files) = entry else {
            return Err(entry_error(&self.stream.pattern.field, "a JSON record"));
        };
        self.stream.next_item()?.append_files(&files)
    }

    fn output_paths(&self) -> &[PathBuf] {
        &self.stream.paths
    }

    fn close(&mut self) -> Result<()> {
        self.stream.close()
    }
}

/// Array field: `{key}.npy` (or `.npy.zlib`) + `{key}.json` per cut
pub struct ArrayTarWriter {
    stream: ShardedStream<TarSink>,
    compression: Compression,
}

impl ArrayTarWriter {
    pub fn new(pattern: ShardPattern, shard_size: Option<usize>, shard_offset: usize, compression: Compression) -> Self {
        ArrayTarWriter {
            stream: ShardedStream::new(pattern, shard_size, shard_offset),
            compression,
        }
    }
}

impl FieldWriter for ArrayTarWriter {
    fn kind(&self) -> WriterKind {
        match self.compression {
            Compression::Raw => WriterKind::Numpy,
            Compression::Deflate => WriterKind::Deflate,
        }
    }

    fn encode(&self, key: &str, payload: FieldPayload<'_>) -> Result<ShardEntry> {
        let FieldPayload::Array { tensor, manifest } = payload else {
            return Err(contract_error(self.kind(), &self.stream.pattern.field, &payload));
        };
        Ok(ShardEntry::Files(vec![
            (format!("{}.{}", key, self.compression.extension()), self.compression.encode(tensor)?),
            (format!("{}.json", key), manifest_bytes(manifest)?),
        ]))
    }

    fn placeholder(&self, key: &str) -> ShardEntry {
        ShardEntry::no_data(key)
    }

    fn append(&mut self, entry: ShardEntry) -> Result<()> {
        let ShardEntry::Files(files) = entry else {
            return Err(entry_error(&self.stream.pattern.field, "a JSON record"));
        };
        self.stream.next_item()?.append_files(&files)
    }

    fn output_paths(&self) -> &[PathBuf] {
        &self.stream.paths
    }

    fn close(&mut self) -> Result<()> {
        self.stream.close()
    }
}

/// JSON-lines field, gzipped: one record per cut
///
/// Placeholders are written as `{"cut_id": key}`.
pub struct JsonlShardWriter {
    stream: ShardedStream<GzSink>,
}

impl JsonlShardWriter {
    pub fn new(pattern: ShardPattern, shard_size: Option<usize>, shard_offset: usize) -> Self {
        JsonlShardWriter {
            stream: ShardedStream::new(pattern, shard_size, shard_offset),
        }
    }
}

impl FieldWriter for JsonlShardWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Jsonl
    }

    fn encode(&self, _key: &str, payload: FieldPayload<'_>) -> Result<ShardEntry> {
        let FieldPayload::Record(record) = payload else {
            return Err(contract_error(self.kind(), &self.stream.pattern.field, &payload));
        };
        Ok(ShardEntry::Record(record.clone()))
    }

    fn placeholder(&self, key: &str) -> ShardEntry {
        ShardEntry::Record(json!({ "cut_id": key }))
    }

    fn append(&mut self, entry: ShardEntry) -> Result<()> {
        let ShardEntry::Record(record) = entry else {
            return Err(entry_error(&self.stream.pattern.field, "tar members"));
        };
        self.stream.next_item()?.append(&record)
    }

    fn output_paths(&self) -> &[PathBuf] {
        &self.stream.paths
    }

    fn close(&mut self) -> Result<()> {
        self.stream.close()
    }
}

/// Writer for `field` using codec `kind`
pub fn make_writer(
    kind: WriterKind,
    pattern: ShardPattern,
    shard_size: Option<usize>,
    shard_offset: usize,
) -> Box<dyn FieldWriter> {
    match kind {
        WriterKind::Wav => Box::new(AudioTarWriter::new(pattern, shard_size, shard_offset)),
        WriterKind::Numpy => Box::new(ArrayTarWriter::new(pattern, shard_size, shard_offset, Compression::Raw)),
        WriterKind::Deflate => Box::new(ArrayTarWriter::new(
            pattern,
            shard_size,
            shard_offset,
            Compression::Deflate,
        )),
        WriterKind::Jsonl => Box::new(JsonlShardWriter::new(pattern, shard_size, shard_offset)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shar::JSONL_EXT;
    use flate2::read::GzDecoder;
    use ndarray::arr1;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_shard_pattern() {
        let pattern = ShardPattern::new(Path::new("/out"), "recording", ".tar");
        assert_eq!(pattern.path(Some(3)), PathBuf::from("/out/recording.000003.tar"));
        assert_eq!(pattern.path(None), PathBuf::from("/out/recording.tar"));
        let fixed = pattern.with_fixed_suffix("_train");
        assert_eq!(fixed.path(None), PathBuf::from("/out/recording_train.tar"));
    }

    #[test]
    fn test_rollover_and_entries() {
        let dir = TempDir::new().unwrap();
        let mut writer = ArrayTarWriter::new(
            ShardPattern::new(dir.path(), "ali", ".tar"),
            Some(2),
            0,
            Compression::Raw,
        );
        let tensor = Tensor::Int(arr1(&[1i64, 2, 3]).into_dyn());
        let manifest = json!({"shape": [3]});
        for i in 0..4 {
            writer
                .write(&format!("c{}", i), FieldPayload::Array { tensor: &tensor, manifest: &manifest })
                .unwrap();
        }
        writer.write_placeholder("c4").unwrap();
        writer.close().unwrap();

        let paths = writer.output_paths().to_vec();
        assert_eq!(paths.len(), 3);
        assert!(paths[2].ends_with("ali.000002.tar"));
        assert_eq!(entry_names(&paths[0]), vec!["c0.npy", "c0.json", "c1.npy", "c1.json"]);
        assert_eq!(entry_names(&paths[2]), vec!["c4.nodata", "c4.nometa"]);
    }

    #[test]
    fn test_shard_offset_and_unsharded() {
        let dir = TempDir::new().unwrap();
        let mut offset = JsonlShardWriter::new(ShardPattern::new(dir.path(), "spk", JSONL_EXT), Some(10), 5);
        offset.write_placeholder("a").unwrap();
        offset.close().unwrap();
        assert!(offset.output_paths()[0].ends_with("spk.000005.jsonl.gz"));

        let mut single = JsonlShardWriter::new(ShardPattern::new(dir.path(), "lang", JSONL_EXT), None, 0);
        for i in 0..25 {
            single.write_placeholder(&format!("c{}", i)).unwrap();
        }
        single.close().unwrap();
        assert_eq!(single.output_paths().len(), 1);
        assert!(single.output_paths()[0].ends_with("lang.jsonl.gz"));

        let reader = BufReader::new(GzDecoder::new(File::open(&single.output_paths()[0]).unwrap()));
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 25);
        assert_eq!(lines[0], r#"{"cut_id":"c0"}"#);
    }

    #[test]
    fn test_type_contract() {
        let dir = TempDir::new().unwrap();
        let mut audio = AudioTarWriter::new(ShardPattern::new(dir.path(), "recording", ".tar"), Some(2), 0);
        let value = json!({"cut_id": "a", "recording": 1});
        assert!(matches!(
            audio.write("a", FieldPayload::Record(&value)),
            Err(Error::TypeContract(_))
        ));

        let mut jsonl = JsonlShardWriter::new(ShardPattern::new(dir.path(), "speaker", JSONL_EXT), Some(2), 0);
        let tensor = Tensor::Float(arr1(&[0.5f32]).into_dyn());
        assert!(matches!(
            jsonl.write("a", FieldPayload::Array { tensor: &tensor, manifest: &value }),
            Err(Error::TypeContract(_))
        ));
        assert!(jsonl.output_paths().is_empty());
    }

    #[test]
    fn test_encode_leaves_stream_untouched() {
        let dir = TempDir::new().unwrap();
        let mut writer = ArrayTarWriter::new(
            ShardPattern::new(dir.path(), "emb", ".tar"),
            Some(2),
            0,
            Compression::Deflate,
        );
        let tensor = Tensor::Float(arr1(&[0.5f32, 1.5]).into_dyn());
        let manifest = json!({"shape": [2]});
        let entry = writer
            .encode("a", FieldPayload::Array { tensor: &tensor, manifest: &manifest })
            .unwrap();
        assert!(writer.output_paths().is_empty());
        match &entry {
            ShardEntry::Files(files) => {
                let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["a.npy.zlib", "a.json"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            writer.append(ShardEntry::Record(json!({"cut_id": "a"}))),
            Err(Error::InvalidState(_))
        ));
        assert!(writer.output_paths().is_empty());
        writer.append(entry).unwrap();
        writer.close().unwrap();
        assert_eq!(entry_names(&writer.output_paths()[0]), vec!["a.npy.zlib", "a.json"]);
    }

    #[test]
    fn test_make_writer_kind() {
        let dir = TempDir::new().unwrap();
        for kind in [WriterKind::Wav, WriterKind::Numpy, WriterKind::Deflate, WriterKind::Jsonl] {
            let writer = make_writer(kind, ShardPattern::new(dir.path(), "x", kind.extension()), None, 0);
            assert_eq!(writer.kind(), kind);
        }
    }
}
