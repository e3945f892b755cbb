//! Custom array manifests
//!
//! `Array` is a tensor loaded as a whole. `TemporalArray` has one axis that
//! runs along time at a fixed frame shift, so it can be windowed by a cut the
//! same way a feature matrix is.

use crate::error::{Error, Result};
use crate::manifest::storage::{Compression, Storage};
use crate::manifest::tensor::Tensor;
use cutkit_common::timing::Seconds;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A stored tensor of known shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    pub storage: Storage,
    pub shape: Vec<usize>,
}

impl Array {
    /// Encode `tensor` into an in-memory array
    pub fn from_tensor(tensor: &Tensor, compression: Compression) -> Result<Self> {
        Ok(Array {
            storage: Storage::memory(tensor, compression)?,
            shape: tensor.shape().to_vec(),
        })
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn is_in_memory(&self) -> bool {
        self.storage.is_in_memory()
    }

    pub fn is_placeholder(&self) -> bool {
        self.storage.is_placeholder()
    }

    /// Load the whole tensor, checking it against the declared shape
    pub fn load(&self) -> Result<Tensor> {
        let tensor = self.storage.read_tensor()?;
        if tensor.shape() != self.shape.as_slice() {
            return Err(Error::Load(format!(
                "Stored array has shape {:?}, manifest declares {:?}",
                tensor.shape(),
                self.shape
            )));
        }
        Ok(tensor)
    }

    pub fn move_to_memory(&self, compression: Compression) -> Result<Array> {
        Array::from_tensor(&self.load()?, compression)
    }

    /// Same metadata, storage replaced by a placeholder
    pub fn to_placeholder(&self) -> Array {
        Array {
            storage: Storage::Shar,
            shape: self.shape.clone(),
        }
    }

    pub fn with_path_prefix(&self, prefix: &Path) -> Array {
        Array {
            storage: self.storage.with_path_prefix(prefix),
            shape: self.shape.clone(),
        }
    }
}

/// A stored tensor with a time axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalArray {
    pub array: Array,

    /// Axis that runs along time
    pub temporal_dim: usize,

    /// Seconds between consecutive frames on the time axis
    pub frame_shift: Seconds,

    /// Time of the first frame, in the same reference as the owning cut's start
    pub start: Seconds,
}

impl TemporalArray {
    /// Wrap `tensor` as an in-memory temporal array starting at `start`
    pub fn from_tensor(
        tensor: &Tensor,
        temporal_dim: usize,
        frame_shift: Seconds,
        start: Seconds,
        compression: Compression,
    ) -> Result<Self> {
        if temporal_dim >= tensor.ndim() {
            return Err(Error::Precondition(format!(
                "temporal_dim {} out of bounds for shape {:?}",
                temporal_dim,
                tensor.shape()
            )));
        }
        if frame_shift.is_nan() || frame_shift <= 0.0 {
            return Err(Error::Precondition(format!(
                "frame_shift must be positive, got {}",
                frame_shift
            )));
        }
        Ok(TemporalArray {
            array: Array::from_tensor(tensor, compression)?,
            temporal_dim,
            frame_shift,
            start,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.array.shape.get(self.temporal_dim).copied().unwrap_or(0)
    }

    pub fn duration(&self) -> Seconds {
        self.num_frames() as f64 * self.frame_shift
    }

    pub fn end(&self) -> Seconds {
        self.start + self.duration()
    }

    pub fn is_in_memory(&self) -> bool {
        self.array.is_in_memory()
    }

    pub fn is_placeholder(&self) -> bool {
        self.array.is_placeholder()
    }

    /// Load the frames covering `[start, start + duration)`
    ///
    /// Both arguments default to the full extent. The window is clamped to the
    /// stored frames.
    pub fn load(&self, start: Option<Seconds>, duration: Option<Seconds>) -> Result<Tensor> {
        let tensor = self.array.load()?;
        let (first, last) = self.frame_range(start, duration);
        tensor.slice_axis(self.temporal_dim, first..last)
    }

    /// In-memory copy of a window, starting at time 0
    pub fn move_to_memory(
        &self,
        start: Option<Seconds>,
        duration: Option<Seconds>,
        compression: Compression,
    ) -> Result<TemporalArray> {
        let tensor = self.load(start, duration)?;
        TemporalArray::from_tensor(&tensor, self.temporal_dim, self.frame_shift, 0.0, compression)
    }

    /// Same metadata, storage replaced by a placeholder
    pub fn to_placeholder(&self) -> TemporalArray {
        TemporalArray {
            array: self.array.to_placeholder(),
            ..self.clone()
        }
    }

    pub fn with_path_prefix(&self, prefix: &Path) -> TemporalArray {
        TemporalArray {
            array: self.array.with_path_prefix(prefix),
            ..self.clone()
        }
    }

    fn frame_range(&self, start: Option<Seconds>, duration: Option<Seconds>) -> (usize, usize) {
        let num_frames = self.num_frames();
        let offset = start.map(|s| s - self.start).unwrap_or(0.0);
        let first = seconds_to_frames(offset, self.frame_shift, num_frames);
        let last = match duration {
            Some(d) => (first + seconds_to_frames(d, self.frame_shift, num_frames)).min(num_frames),
            None => num_frames,
        };
        (first, last)
    }
}

/// Nearest frame index for a time offset, clamped to `[0, max_index]`
fn seconds_to_frames(seconds: Seconds, frame_shift: Seconds, max_index: usize) -> usize {
    let frames = (seconds / frame_shift).round();
    if frames <= 0.0 {
        0
    } else {
        (frames as usize).min(max_index)
    }
}
