//! Dense tensors and their NPY encoding
//!
//! Custom arrays and feature matrices are stored as NPY payloads through
//! `ndarray-npy`. Only `<f4` and `<i8` element types are produced.

use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement, WriteNpyExt};
use std::ops::Range;

/// A dense n-dimensional tensor
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Float(ArrayD<f32>),
    Int(ArrayD<i64>),
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Float(a) => a.shape(),
            Tensor::Int(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Tensor::Float(_))
    }

    /// NPY type descriptor of the element type
    pub fn descr(&self) -> &'static str {
        match self {
            Tensor::Float(_) => "<f4",
            Tensor::Int(_) => "<i8",
        }
    }

    /// Copy of the tensor restricted to `range` along `axis`
    ///
    /// The range is clamped to the axis length.
    pub fn slice_axis(&self, axis: usize, range: Range<usize>) -> Result<Tensor> {
        if axis >= self.ndim() {
            return Err(Error::Precondition(format!(
                "Axis {} out of bounds for a {}-dimensional tensor",
                axis,
                self.ndim()
            )));
        }
        let len = self.shape()[axis];
        let end = range.end.min(len);
        let start = range.start.min(end);
        let slice = Slice::from(start..end);
        Ok(match self {
            Tensor::Float(a) => Tensor::Float(a.slice_axis(Axis(axis), slice).to_owned()),
            Tensor::Int(a) => Tensor::Int(a.slice_axis(Axis(axis), slice).to_owned()),
        })
    }

    /// Copy of the tensor with `before` and `after` entries of `value` added
    /// along `axis` (cast to the element type)
    pub fn pad_axis(&self, axis: usize, before: usize, after: usize, value: f64) -> Result<Tensor> {
        if axis >= self.ndim() {
            return Err(Error::Precondition(format!(
                "Axis {} out of bounds for a {}-dimensional tensor",
                axis,
                self.ndim()
            )));
        }
        fn pad<T: Clone>(a: &ArrayD<T>, axis: usize, before: usize, after: usize, value: T) -> ArrayD<T> {
            let mut shape = a.shape().to_vec();
            shape[axis] += before + after;
            let mut out = ArrayD::from_elem(IxDyn(&shape), value);
            out.slice_axis_mut(Axis(axis), Slice::from(before..before + a.shape()[axis]))
                .assign(a);
            out
        }
        Ok(match self {
            Tensor::Float(a) => Tensor::Float(pad(a, axis, before, after, value as f32)),
            Tensor::Int(a) => Tensor::Int(pad(a, axis, before, after, value as i64)),
        })
    }

    /// Encode as an NPY payload
    pub fn to_npy(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Tensor::Float(a) => a.write_npy(&mut out),
            Tensor::Int(a) => a.write_npy(&mut out),
        }
        .map_err(|e| Error::Codec(format!("NPY encoding failed: {}", e)))?;
        Ok(out)
    }

    /// Decode an NPY payload
    ///
    /// `<f4` and `<i8` map directly; `<f8` and `<i4` are cast.
    pub fn from_npy(bytes: &[u8]) -> Result<Tensor> {
        if let Some(a) = read_typed::<f32>(bytes)? {
            return Ok(Tensor::Float(a));
        }
        if let Some(a) = read_typed::<i64>(bytes)? {
            return Ok(Tensor::Int(a));
        }
        if let Some(a) = read_typed::<f64>(bytes)? {
            return Ok(Tensor::Float(a.mapv(|v| v as f32)));
        }
        if let Some(a) = read_typed::<i32>(bytes)? {
            return Ok(Tensor::Int(a.mapv(i64::from)));
        }
        Err(Error::Codec("Unsupported NPY element type".to_string()))
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(array: ArrayD<f32>) -> Self {
        Tensor::Float(array)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(array: ArrayD<i64>) -> Self {
        Tensor::Int(array)
    }
}

/// Array of element type `T`, or `None` when the payload holds another type
fn read_typed<T: ReadableElement>(bytes: &[u8]) -> Result<Option<ArrayD<T>>> {
    match ArrayD::<T>::read_npy(bytes) {
        Ok(array) => Ok(Some(array)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(Error::Codec(format!("Invalid NPY payload: {}", e))),
    }
}
