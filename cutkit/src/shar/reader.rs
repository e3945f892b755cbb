//! Shar reader
//!
//! Reads a Shar directory back shard by shard. For shard `k` the `cuts`
//! stream and shard `k` of every requested field are read together; the
//! entries are matched positionally and checked by cut id. Payloads are
//! attached to the cuts as in-memory manifests, and placeholder entries
//! leave the field absent.

use crate::cut::{Cut, CustomValue, DataCut};
use crate::error::{Error, Result};
use crate::lazy::LazyJsonl;
use crate::manifest::{Array, AudioSource, Compression, Features, Recording, Storage, TemporalArray};
use crate::shar::{CUTS_FIELD, JSONL_EXT, TAR_EXT};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Lockstep reader over the shards of a Shar directory
#[derive(Debug, Clone, PartialEq)]
pub struct SharReader {
    cuts: Vec<PathBuf>,
    fields: Vec<(String, Vec<PathBuf>)>,
}

impl SharReader {
    /// Reader over explicit shard lists, e.g. `SharWriter::output_paths`
    ///
    /// Every field must have as many shards as `cuts`.
    pub fn from_paths(paths: &BTreeMap<String, Vec<PathBuf>>) -> Result<Self> {
        let cuts = paths
            .get(CUTS_FIELD)
            .cloned()
            .ok_or_else(|| Error::Precondition(format!("No '{}' shards given", CUTS_FIELD)))?;
        let fields: Vec<(String, Vec<PathBuf>)> = paths
            .iter()
            .filter(|(field, _)| field.as_str() != CUTS_FIELD)
            .map(|(field, shards)| (field.clone(), shards.clone()))
            .collect();
        for (field, shards) in &fields {
            if shards.len() != cuts.len() {
                return Err(Error::Validation(format!(
                    "Field '{}' has {} shards but '{}' has {}",
                    field,
                    shards.len(),
                    CUTS_FIELD,
                    cuts.len()
                )));
            }
        }
        Ok(SharReader { cuts, fields })
    }

    /// Discover the shards of `fields` (and `cuts`) in `dir`
    ///
    /// Recognizes numbered shards (`{field}.000000{ext}`) and unsharded
    /// files (`{field}{ext}`).
    pub fn open(dir: &Path, fields: &[&str]) -> Result<Self> {
        let names: Vec<String> = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;

        let mut paths = BTreeMap::new();
        for field in std::iter::once(CUTS_FIELD).chain(fields.iter().copied()) {
            let mut shards: Vec<PathBuf> = names
                .iter()
                .filter(|name| is_shard_of(name, field))
                .map(|name| dir.join(name))
                .collect();
            if shards.is_empty() {
                return Err(Error::Load(format!("No shards of '{}' in {}", field, dir.display())));
            }
            shards.sort();
            paths.insert(field.to_string(), shards);
        }
        Self::from_paths(&paths)
    }

    pub fn num_shards(&self) -> usize {
        self.cuts.len()
    }

    /// Names of the attached fields
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(f, _)| f.as_str())
    }

    /// Fresh iterator from the first shard
    pub fn iter(&self) -> SharIter<'_> {
        SharIter {
            reader: self,
            next_shard: 0,
            ready: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// Cuts of shard `index` with every field attached
    pub fn read_shard(&self, index: usize) -> Result<Vec<Cut>> {
        let cuts_path = self
            .cuts
            .get(index)
            .ok_or_else(|| Error::Precondition(format!("Shard {} out of range ({} shards)", index, self.cuts.len())))?;
        debug!("Reading shard {} from {}", index, cuts_path.display());
        let mut cuts: Vec<DataCut> = LazyJsonl::<Cut>::open(cuts_path)
            .iter()
            .map(|cut| match cut? {
                Cut::Mono(c) | Cut::Multi(c) => Ok(c),
                other => Err(Error::Validation(format!(
                    "Shar cut {} is not a data cut",
                    other.id()
                ))),
            })
            .collect::<Result<_>>()?;

        for (field, shards) in &self.fields {
            let path = &shards[index];
            if path.to_string_lossy().ends_with(JSONL_EXT) {
                attach_jsonl(&mut cuts, field, path)?;
            } else {
                attach_tar(&mut cuts, field, path)?;
            }
        }
        Ok(cuts.into_iter().map(Cut::from).collect())
    }
}

impl<'a> IntoIterator for &'a SharReader {
    type Item = Result<Cut>;
    type IntoIter = SharIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over all cuts of a `SharReader`, one shard in memory at a time
pub struct SharIter<'a> {
    reader: &'a SharReader,
    next_shard: usize,
    ready: std::vec::IntoIter<Cut>,
    failed: bool,
}

impl Iterator for SharIter<'_> {
    type Item = Result<Cut>;

    fn next(&mut self) -> Option<Result<Cut>> {
        loop {
            if let Some(cut) = self.ready.next() {
                return Some(Ok(cut));
            }
            if self.failed || self.next_shard >= self.reader.num_shards() {
                return None;
            }
            let shard = self.next_shard;
            self.next_shard += 1;
            match self.reader.read_shard(shard) {
                Ok(cuts) => self.ready = cuts.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn is_shard_of(name: &str, field: &str) -> bool {
    [TAR_EXT, JSONL_EXT].iter().any(|ext| {
        let Some(stem) = name.strip_suffix(ext) else {
            return false;
        };
        if stem == field {
            return true;
        }
        stem.strip_prefix(field)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|num| num.len() == 6 && num.bytes().all(|b| b.is_ascii_digit()))
    })
}

fn check_count(field: &str, path: &Path, found: usize, expected: usize) -> Result<()> {
    if found != expected {
        return Err(Error::Validation(format!(
            "{} holds {} '{}' entries for {} cuts",
            path.display(),
            found,
            field,
            expected
        )));
    }
    Ok(())
}

fn attach_jsonl(cuts: &mut [DataCut], field: &str, path: &Path) -> Result<()> {
    let records: Vec<serde_json::Value> = LazyJsonl::open(path).iter().collect::<Result<_>>()?;
    check_count(field, path, records.len(), cuts.len())?;
    for (cut, mut record) in cuts.iter_mut().zip(records) {
        let cut_id = record.get("cut_id").and_then(serde_json::Value::as_str);
        if cut_id != Some(cut.id.as_str()) {
            return Err(Error::Validation(format!(
                "{}: expected an entry for cut {}, found {:?}",
                path.display(),
                cut.id,
                cut_id
            )));
        }
        if let Some(value) = record.as_object_mut().and_then(|r| r.remove(field)) {
            cut.custom
                .get_or_insert_with(Default::default)
                .insert(field, CustomValue::Value(value));
        }
    }
    Ok(())
}

/// All entries of a tar shard, in archive order
fn read_tar(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(path).map_err(|e| Error::Load(format!("Cannot open {}: {}", path.display(), e)))?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        entries.push((name, data));
    }
    Ok(entries)
}

fn attach_tar(cuts: &mut [DataCut], field: &str, path: &Path) -> Result<()> {
    let entries = read_tar(path)?;
    if entries.len() % 2 != 0 {
        return Err(Error::Validation(format!("{} holds an unpaired entry", path.display())));
    }
    check_count(field, path, entries.len() / 2, cuts.len())?;

    for (cut, pair) in cuts.iter_mut().zip(entries.chunks(2)) {
        let [(data_name, data), (meta_name, meta)] = pair else {
            continue;
        };
        let ext = data_name
            .strip_prefix(cut.id.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "{}: expected an entry for cut {}, found {}",
                    path.display(),
                    cut.id,
                    data_name
                ))
            })?;
        if ext == "nodata" {
            continue;
        }
        if !meta_name.ends_with(".json") {
            return Err(Error::Validation(format!(
                "{}: {} is not followed by its manifest",
                path.display(),
                data_name
            )));
        }
        attach_entry(cut, field, ext, data, meta)?;
    }
    Ok(())
}

fn compression_of(ext: &str) -> Result<Compression> {
    match ext {
        "npy" => Ok(Compression::Raw),
        "npy.zlib" => Ok(Compression::Deflate),
        other => Err(Error::Codec(format!("Unknown array entry type '{}'", other))),
    }
}

fn attach_recording(mut recording: Recording, data: &[u8]) -> Recording {
    recording.sources = vec![AudioSource::Memory {
        channels: recording.channel_ids.clone(),
        source: Arc::from(data),
    }];
    recording
}

fn attach_storage(ext: &str, data: &[u8]) -> Result<Storage> {
    Ok(Storage::Memory {
        data: Arc::from(data),
        compression: compression_of(ext)?,
    })
}

fn attach_entry(cut: &mut DataCut, field: &str, ext: &str, data: &[u8], meta: &[u8]) -> Result<()> {
    match field {
        "recording" => {
            let recording: Recording = serde_json::from_slice(meta)?;
            cut.recording = Some(Arc::new(attach_recording(recording, data)));
        }
        "features" => {
            let features: Features = serde_json::from_slice(meta)?;
            cut.features = Some(Arc::new(Features {
                storage: attach_storage(ext, data)?,
                ..features
            }));
        }
        _ => {
            let value = match serde_json::from_slice::<CustomValue>(meta)? {
                CustomValue::Recording(r) => CustomValue::Recording(Arc::new(attach_recording(r.as_ref().clone(), data))),
                CustomValue::Features(f) => CustomValue::Features(Arc::new(Features {
                    storage: attach_storage(ext, data)?,
                    ..f.as_ref().clone()
                })),
                CustomValue::Array(a) => CustomValue::Array(Array {
                    storage: attach_storage(ext, data)?,
                    ..a
                }),
                CustomValue::TemporalArray(t) => CustomValue::TemporalArray(TemporalArray {
                    array: Array {
                        storage: attach_storage(ext, data)?,
                        ..t.array.clone()
                    },
                    ..t
                }),
                CustomValue::Value(_) => {
                    return Err(Error::Validation(format!(
                        "Tar entry for '{}' of cut {} describes a plain value",
                        field, cut.id
                    )))
                }
            };
            cut.custom.get_or_insert_with(Default::default).insert(field, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_shard_of() {
        assert!(is_shard_of("recording.000003.tar", "recording"));
        assert!(is_shard_of("recording.tar", "recording"));
        assert!(is_shard_of("cuts.000000.jsonl.gz", "cuts"));
        assert!(!is_shard_of("recording_extra.000000.tar", "recording"));
        assert!(!is_shard_of("rec.000000.tar", "recording"));
        assert!(!is_shard_of("recording.12.tar", "recording"));
        assert!(!is_shard_of("recording.000000.json", "recording"));
    }

    #[test]
    fn test_compression_of() {
        assert_eq!(compression_of("npy").unwrap(), Compression::Raw);
        assert_eq!(compression_of("npy.zlib").unwrap(), Compression::Deflate);
        assert!(compression_of("wav").is_err());
    }

    #[test]
    fn test_from_paths_checks_shard_counts() {
        let mut paths = BTreeMap::new();
        paths.insert(CUTS_FIELD.to_string(), vec![PathBuf::from("cuts.000000.jsonl.gz")]);
        paths.insert(
            "recording".to_string(),
            vec![PathBuf::from("recording.000000.tar"), PathBuf::from("recording.000001.tar")],
        );
        assert!(matches!(SharReader::from_paths(&paths), Err(Error::Validation(_))));

        paths.remove(CUTS_FIELD);
        assert!(matches!(SharReader::from_paths(&paths), Err(Error::Precondition(_))));
    }
}
