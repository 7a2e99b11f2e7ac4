//! tensor.rs
//! Dense row-major values shared behind an `Arc`.

use super::types::Shape;
use crate::compute::ComputationError;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Arc<Vec<f64>>,
}

impl Tensor {
    /// A rank-zero tensor.
    pub fn scalar(value: f64) -> Self {
        Self { shape: SmallVec::new(), data: Arc::new(vec![value]) }
    }

    pub fn vector(values: Vec<f64>) -> Self {
        let mut shape = Shape::new();
        shape.push(values.len());
        Self { shape, data: Arc::new(values) }
    }

    pub fn from_shape_vec(shape: &[usize], data: Vec<f64>) -> Result<Self, ComputationError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ComputationError::ShapeMismatch {
                msg: format!("shape {:?} needs {} elements, got {}", shape, expected, data.len()),
            });
        }
        Ok(Self { shape: SmallVec::from_slice(shape), data: Arc::new(data) })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::filled(shape, 0.0)
    }

    pub fn filled(shape: &[usize], value: f64) -> Self {
        let len = shape.iter().product();
        Self { shape: SmallVec::from_slice(shape), data: Arc::new(vec![value; len]) }
    }

    pub fn shape(&self) -> &[usize] { &self.shape }
    pub fn ndim(&self) -> usize { self.shape.len() }
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
    pub fn data(&self) -> &[f64] { &self.data }

    /// Returns the single element of a one-element tensor.
    pub fn item(&self) -> Option<f64> {
        match self.data.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    /// Same data, new shape. Shares the underlying buffer.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self, ComputationError> {
        let expected: usize = shape.iter().product();
        if expected != self.len() {
            return Err(ComputationError::ShapeMismatch {
                msg: format!("cannot reshape {:?} into {:?}", self.shape(), shape),
            });
        }
        Ok(Self { shape: SmallVec::from_slice(shape), data: Arc::clone(&self.data) })
    }

    pub fn to_vec(&self) -> Vec<f64> { self.data.to_vec() }

    /// Applies `f` element-wise.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self { shape: self.shape.clone(), data: Arc::new(self.data.iter().map(|&v| f(v)).collect()) }
    }
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self { Tensor::scalar(value) }
}
