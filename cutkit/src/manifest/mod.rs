//! Manifests for the data a cut points into
//!
//! Recordings, feature matrices and custom arrays all follow the same shape: a
//! small serializable description plus a storage location that is resolved
//! only when the data is loaded.

pub mod array;
pub mod features;
pub mod recording;
pub mod storage;
pub mod tensor;

pub use array::{Array, TemporalArray};
pub use features::Features;
pub use recording::{AudioSource, Recording};
pub use storage::{Compression, Storage};
pub use tensor::Tensor;

/// Serde adapter storing shared byte buffers as base64 strings
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S: Serializer>(bytes: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arc<[u8]>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Arc::from)
            .map_err(serde::de::Error::custom)
    }
}
