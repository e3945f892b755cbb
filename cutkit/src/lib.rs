//! # cutkit
//!
//! Cut manifests for speech and audio data preparation.
//!
//! **Purpose:** Describe time windows into recordings and feature matrices
//! ("cuts") together with their supervision labels, transform them without
//! touching the data (truncate, pad, extend, resample, perturb), and export
//! them with their payloads as sharded archives (Shar).
//!
//! **Architecture:**
//! - `manifest`: recording, feature and array manifests and their storage
//! - `supervision`: labeled segments
//! - `cut`: the `Cut` variants, transforms, supervision index and merging
//! - `audio`: decoding, encoding and the effects applied at load time
//! - `shar`: lockstep sharded writer and reader
//! - `lazy`: restartable JSON-lines manifests and lazy pipelines over them

pub mod audio;
pub mod channel;
pub mod cut;
pub mod error;
pub mod lazy;
pub mod manifest;
pub mod shar;
pub mod supervision;

pub use channel::Channel;
pub use cut::{Cut, DataCut, MixedCut, PaddingCut};
pub use error::{Error, Result};
pub use supervision::SupervisionSegment;
