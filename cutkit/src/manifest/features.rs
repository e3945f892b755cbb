//! Precomputed feature matrices
//!
//! A feature manifest describes a `(num_frames, num_features)` matrix that
//! covers `[start, start + duration]` of a recording. Cuts reference a window
//! inside that range; the window is checked when the matrix is loaded.

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::manifest::storage::{Compression, Storage};
use crate::manifest::tensor::Tensor;
use cutkit_common::timing::{compute_num_frames, Seconds};
use ndarray::{s, Array2, Ix2};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Feature matrix manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    /// Extractor name (e.g. `fbank`)
    #[serde(rename = "type")]
    pub feature_type: String,
    pub num_frames: usize,
    pub num_features: usize,
    pub frame_shift: Seconds,
    pub sampling_rate: u32,
    pub start: Seconds,
    pub duration: Seconds,
    pub storage: Storage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Channel>,
}

impl Features {
    /// In-memory feature manifest for `matrix` starting at time 0
    pub fn from_matrix(
        feature_type: &str,
        matrix: &Array2<f32>,
        frame_shift: Seconds,
        sampling_rate: u32,
        compression: Compression,
    ) -> Result<Self> {
        let (num_frames, num_features) = matrix.dim();
        compute_num_frames(0.0, frame_shift, sampling_rate)?;
        Ok(Features {
            feature_type: feature_type.to_string(),
            num_frames,
            num_features,
            frame_shift,
            sampling_rate,
            start: 0.0,
            duration: num_frames as f64 * frame_shift,
            storage: Storage::memory(&Tensor::Float(matrix.clone().into_dyn()), compression)?,
            recording_id: None,
            channels: None,
        })
    }

    pub fn end(&self) -> Seconds {
        self.start + self.duration
    }

    pub fn is_in_memory(&self) -> bool {
        self.storage.is_in_memory()
    }

    pub fn is_placeholder(&self) -> bool {
        self.storage.is_placeholder()
    }

    /// Load the frames of `[start, start + duration]`
    ///
    /// Defaults to the full matrix. A window reaching outside the manifest's
    /// range by more than half a frame is a load error.
    pub fn load(&self, start: Option<Seconds>, duration: Option<Seconds>) -> Result<Array2<f32>> {
        let start = start.unwrap_or(self.start);
        let duration = duration.unwrap_or(self.end() - start);
        let tolerance = self.frame_shift / 2.0;
        if start < self.start - tolerance || start + duration > self.end() + tolerance {
            return Err(Error::Load(format!(
                "Requested window [{:.4}, {:.4}] lies outside features [{:.4}, {:.4}]",
                start,
                start + duration,
                self.start,
                self.end()
            )));
        }

        let matrix = match self.storage.read_tensor()? {
            Tensor::Float(a) => a
                .into_dimensionality::<Ix2>()
                .map_err(|e| Error::Load(format!("Feature matrix is not 2-D: {}", e)))?,
            Tensor::Int(_) => {
                return Err(Error::Load("Feature matrix must hold floats".to_string()));
            }
        };

        let available = matrix.nrows();
        let offset = compute_num_frames((start - self.start).max(0.0), self.frame_shift, self.sampling_rate)?
            .max(0) as usize;
        let frames = compute_num_frames(duration, self.frame_shift, self.sampling_rate)?.max(0) as usize;
        let first = offset.min(available);
        let last = (first + frames).min(available);
        Ok(matrix.slice(s![first..last, ..]).to_owned())
    }

    /// In-memory copy of a window, starting at time 0
    pub fn move_to_memory(
        &self,
        start: Option<Seconds>,
        duration: Option<Seconds>,
        compression: Compression,
    ) -> Result<Features> {
        let matrix = self.load(start, duration)?;
        let num_frames = matrix.nrows();
        Ok(Features {
            num_frames,
            start: 0.0,
            duration: duration.unwrap_or(num_frames as f64 * self.frame_shift),
            storage: Storage::memory(&Tensor::Float(matrix.into_dyn()), compression)?,
            ..self.clone()
        })
    }

    /// Same metadata, storage replaced by a placeholder
    pub fn to_placeholder(&self) -> Features {
        Features {
            storage: Storage::Shar,
            ..self.clone()
        }
    }

    pub fn with_path_prefix(&self, prefix: &Path) -> Features {
        Features {
            storage: self.storage.with_path_prefix(prefix),
            ..self.clone()
        }
    }
}
