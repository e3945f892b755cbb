//! Where array payloads live
//!
//! A storage location is either a file on disk, an encoded buffer held in
//! memory, or a placeholder for data that was exported to a Shar archive and
//! has to be attached again before it can be read.

use crate::error::{Error, Result};
use crate::manifest::tensor::Tensor;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Payload encoding of a stored tensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain NPY
    #[default]
    Raw,

    /// zlib-compressed NPY
    Deflate,
}

impl Compression {
    pub fn encode(self, tensor: &Tensor) -> Result<Vec<u8>> {
        let npy = tensor.to_npy()?;
        match self {
            Compression::Raw => Ok(npy),
            Compression::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&npy)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<Tensor> {
        match self {
            Compression::Raw => Tensor::from_npy(bytes),
            Compression::Deflate => {
                let mut npy = Vec::new();
                ZlibDecoder::new(bytes)
                    .read_to_end(&mut npy)
                    .map_err(|e| Error::Codec(format!("Corrupt deflate payload: {}", e)))?;
                Tensor::from_npy(&npy)
            }
        }
    }

    /// File extension of an archived payload
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Raw => "npy",
            Compression::Deflate => "npy.zlib",
        }
    }
}

/// Storage location of a tensor payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storage_type", rename_all = "snake_case")]
pub enum Storage {
    /// `storage_path / storage_key` on disk
    Files {
        storage_path: PathBuf,
        storage_key: String,
        #[serde(default)]
        compression: Compression,
    },

    /// Encoded payload held in memory
    Memory {
        #[serde(with = "crate::manifest::base64_bytes")]
        data: Arc<[u8]>,
        #[serde(default)]
        compression: Compression,
    },

    /// Payload lives in a Shar archive and is not attached
    Shar,
}

impl Storage {
    /// Encode `tensor` into an in-memory storage
    pub fn memory(tensor: &Tensor, compression: Compression) -> Result<Self> {
        Ok(Storage::Memory {
            data: Arc::from(compression.encode(tensor)?),
            compression,
        })
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, Storage::Memory { .. })
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Storage::Shar)
    }

    /// Read and decode the full tensor
    pub fn read_tensor(&self) -> Result<Tensor> {
        match self {
            Storage::Files {
                storage_path,
                storage_key,
                compression,
            } => {
                let path = storage_path.join(storage_key);
                let bytes = std::fs::read(&path)
                    .map_err(|e| Error::Load(format!("Cannot read {}: {}", path.display(), e)))?;
                compression.decode(&bytes)
            }
            Storage::Memory { data, compression } => compression.decode(data),
            Storage::Shar => Err(Error::Load(
                "Data was exported to a Shar archive and is not attached".to_string(),
            )),
        }
    }

    /// Prefix relative file storage paths with `prefix`
    pub fn with_path_prefix(&self, prefix: &Path) -> Self {
        match self {
            Storage::Files {
                storage_path,
                storage_key,
                compression,
            } if storage_path.is_relative() => Storage::Files {
                storage_path: prefix.join(storage_path),
                storage_key: storage_key.clone(),
                compression: *compression,
            },
            other => other.clone(),
        }
    }
}
