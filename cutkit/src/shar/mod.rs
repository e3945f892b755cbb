//! Sharded export of cuts and their data
//!
//! A Shar directory holds one metadata stream (`cuts`) and one archive stream
//! per exported field. Every stream receives exactly one entry per cut, in
//! the same order, and every stream rolls over to a new shard after the same
//! number of entries. Shard `k` of every stream therefore covers the same
//! cuts, and any subset of fields can be read back in lockstep.
//!
//! Layout:
//! ```text
//! out/cuts.000000.jsonl.gz
//! out/recording.000000.tar   {cut_id}.wav + {cut_id}.json
//! out/features.000000.tar    {cut_id}.npy.zlib + {cut_id}.json
//! out/speaker.000000.jsonl.gz
//! ```

pub mod field_writer;
pub mod reader;
pub mod writer;

pub use field_writer::{ArrayTarWriter, AudioTarWriter, FieldPayload, FieldWriter, JsonlShardWriter, ShardEntry, ShardPattern};
pub use reader::SharReader;
pub use writer::{ChannelSelectors, SharWriter, SharWriterOptions, WriterState};

use crate::error::{Error, Result};
use crate::manifest::Compression;
use std::fmt;
use std::str::FromStr;

/// Field name of the metadata stream
pub const CUTS_FIELD: &str = "cuts";

/// Extension of tar shards
pub const TAR_EXT: &str = ".tar";

/// Extension of gzipped JSON-lines shards
pub const JSONL_EXT: &str = ".jsonl.gz";

/// Codec an exported field is written with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    /// Audio as WAV inside a tar
    Wav,
    /// Arrays as plain NPY inside a tar
    Numpy,
    /// Arrays as zlib-compressed NPY inside a tar
    Deflate,
    /// Plain JSON values, one line per cut
    Jsonl,
}

impl WriterKind {
    /// File extension of this writer's shards
    pub fn extension(self) -> &'static str {
        match self {
            WriterKind::Jsonl => JSONL_EXT,
            _ => TAR_EXT,
        }
    }

    pub fn is_audio(self) -> bool {
        self == WriterKind::Wav
    }

    pub fn is_array(self) -> bool {
        matches!(self, WriterKind::Numpy | WriterKind::Deflate)
    }

    /// Array compression for the array writers
    pub fn compression(self) -> Option<Compression> {
        match self {
            WriterKind::Numpy => Some(Compression::Raw),
            WriterKind::Deflate => Some(Compression::Deflate),
            _ => None,
        }
    }
}

impl FromStr for WriterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "wav" => Ok(WriterKind::Wav),
            "numpy" | "npy" => Ok(WriterKind::Numpy),
            "deflate" | "zlib" => Ok(WriterKind::Deflate),
            "jsonl" => Ok(WriterKind::Jsonl),
            other => Err(Error::Precondition(format!(
                "Unknown field writer '{}' (expected wav, numpy, deflate or jsonl)",
                other
            ))),
        }
    }
}

impl fmt::Display for WriterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriterKind::Wav => "wav",
            WriterKind::Numpy => "numpy",
            WriterKind::Deflate => "deflate",
            WriterKind::Jsonl => "jsonl",
        };
        f.write_str(name)
    }
}
