use crate::compute::ledger::ComputationError;
use crate::store::{Operation, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Executes a single instruction over its operand values.
pub fn execute_instruction(op: &Operation, args: &[&Tensor], invocation: u64) -> Result<Tensor, ComputationError> {
    match op {
        Operation::Add => binary(args[0], args[1], |l, r| l + r),
        Operation::Subtract => binary(args[0], args[1], |l, r| l - r),
        Operation::Multiply => binary(args[0], args[1], |l, r| l * r),
        Operation::Divide => binary(args[0], args[1], |l, r| l / r),
        Operation::Negate => Ok(args[0].map(|v| -v)),
        Operation::Exp => Ok(args[0].map(f64::exp)),
        Operation::Square => Ok(args[0].map(|v| v * v)),
        Operation::Sqrt => Ok(args[0].map(f64::sqrt)),
        Operation::Identity => Ok(args[0].clone()),
        Operation::Sum => Ok(Tensor::scalar(args[0].data().iter().sum())),
        Operation::Mean => {
            let t = args[0];
            let mean = if t.is_empty() { f64::NAN } else { t.data().iter().sum::<f64>() / t.len() as f64 };
            Ok(Tensor::scalar(mean))
        }
        Operation::MatMul => matmul(args[0], args[1]),
        Operation::Slice { start, end } => {
            let t = args[0];
            if start > end || *end > t.len() {
                return Err(ComputationError::ShapeMismatch {
                    msg: format!("slice {}..{} out of range for {} elements", start, end, t.len()),
                });
            }
            Ok(Tensor::vector(t.data()[*start..*end].to_vec()))
        }
        Operation::Reshape { shape } => args[0].reshape(shape),
        Operation::RandomNormal { std, seed } => {
            let template = args[0];
            let mut rng = StdRng::seed_from_u64(stream_seed(*seed, invocation));
            let data = (0..template.len()).map(|_| sample_standard_normal(&mut rng) * std).collect();
            Tensor::from_shape_vec(template.shape(), data)
        }
        Operation::BatchNormalize { axes, epsilon } => batch_normalize(args, axes, *epsilon),
    }
}

/// Mixes the invocation counter into a seed so that successive calls draw
/// fresh samples while every call stays reproducible.
fn stream_seed(seed: u64, invocation: u64) -> u64 {
    seed ^ invocation.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Sample from the standard normal distribution using the Box-Muller transform.
fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    // random() returns [0, 1); keep u1 away from zero so ln(u1) stays finite.
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn binary(lhs: &Tensor, rhs: &Tensor, f: impl Fn(f64, f64) -> f64) -> Result<Tensor, ComputationError> {
    if lhs.shape() == rhs.shape() {
        let data = lhs.data().iter().zip(rhs.data()).map(|(&l, &r)| f(l, r)).collect();
        return Tensor::from_shape_vec(lhs.shape(), data);
    }

    let shape = broadcast_shape(lhs.shape(), rhs.shape())?;
    let lhs_strides = broadcast_strides(lhs.shape(), &shape);
    let rhs_strides = broadcast_strides(rhs.shape(), &shape);
    let total: usize = shape.iter().product();

    let mut index = vec![0usize; shape.len()];
    let mut data = Vec::with_capacity(total);
    for _ in 0..total {
        let l: usize = index.iter().zip(&lhs_strides).map(|(i, s)| i * s).sum();
        let r: usize = index.iter().zip(&rhs_strides).map(|(i, s)| i * s).sum();
        data.push(f(lhs.data()[l], rhs.data()[r]));

        // Row-major increment of the output index.
        for dim in (0..shape.len()).rev() {
            index[dim] += 1;
            if index[dim] < shape[dim] {
                break;
            }
            index[dim] = 0;
        }
    }
    Tensor::from_shape_vec(&shape, data)
}

/// NumPy broadcasting: dimensions are aligned from the right and must be
/// equal or one.
fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Shape, ComputationError> {
    let ndim = a.len().max(b.len());
    let mut shape = Shape::with_capacity(ndim);
    for i in 0..ndim {
        let da = aligned_dim(a, ndim, i);
        let db = aligned_dim(b, ndim, i);
        let dim = if da == db || db == 1 {
            da
        } else if da == 1 {
            db
        } else {
            return Err(ComputationError::ShapeMismatch {
                msg: format!("cannot broadcast {:?} with {:?}", a, b),
            });
        };
        shape.push(dim);
    }
    Ok(shape)
}

fn aligned_dim(shape: &[usize], ndim: usize, i: usize) -> usize {
    let offset = ndim - shape.len();
    if i < offset { 1 } else { shape[i - offset] }
}

/// Row-major strides of `shape` expressed in the broadcast output space;
/// broadcast dimensions get stride zero.
fn broadcast_strides(shape: &[usize], out: &[usize]) -> Vec<usize> {
    let ndim = out.len();
    let mut strides = vec![0; ndim];
    let mut stride = 1;
    for i in (0..ndim).rev() {
        let dim = aligned_dim(shape, ndim, i);
        strides[i] = if dim == 1 { 0 } else { stride };
        stride *= dim;
    }
    strides
}

fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor, ComputationError> {
    let (m, k, n) = match (a.shape(), b.shape()) {
        ([m, k], [k2, n]) if k == k2 => (*m, *k, *n),
        _ => {
            return Err(ComputationError::ShapeMismatch {
                msg: format!("cannot multiply {:?} by {:?}", a.shape(), b.shape()),
            })
        }
    };
    let (lhs, rhs) = (a.data(), b.data());
    let mut data = vec![0.0; m * n];
    for i in 0..m {
        for p in 0..k {
            let l = lhs[i * k + p];
            for j in 0..n {
                data[i * n + j] += l * rhs[p * n + j];
            }
        }
    }
    Tensor::from_shape_vec(&[m, n], data)
}

fn batch_normalize(args: &[&Tensor], axes: &[usize], epsilon: f64) -> Result<Tensor, ComputationError> {
    let x = args[0];
    let shape = x.shape();
    if let Some(&axis) = axes.iter().find(|&&a| a >= shape.len()) {
        return Err(ComputationError::ShapeMismatch {
            msg: format!("axis {} out of range for {:?}", axis, shape),
        });
    }

    // Statistics are kept per position along the non-reduced axes.
    let kept: Vec<usize> = (0..shape.len()).filter(|d| !axes.contains(d)).collect();
    let groups: usize = kept.iter().map(|&d| shape[d]).product();
    for (name, t) in ["gamma", "beta"].iter().zip(&args[1..3]) {
        if t.len() != groups {
            return Err(ComputationError::ShapeMismatch {
                msg: format!("{} has {} elements, expected {}", name, t.len(), groups),
            });
        }
    }

    let mut group_of = Vec::with_capacity(x.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..x.len() {
        group_of.push(kept.iter().fold(0, |acc, &d| acc * shape[d] + index[d]));
        for dim in (0..shape.len()).rev() {
            index[dim] += 1;
            if index[dim] < shape[dim] {
                break;
            }
            index[dim] = 0;
        }
    }

    let (mean, var) = if let [_, _, _, mean, var] = args {
        if mean.len() != groups || var.len() != groups {
            return Err(ComputationError::ShapeMismatch {
                msg: format!("population statistics must have {} elements", groups),
            });
        }
        (mean.to_vec(), var.to_vec())
    } else {
        let mut sum = vec![0.0; groups];
        let mut count = vec![0usize; groups];
        for (&g, &v) in group_of.iter().zip(x.data()) {
            sum[g] += v;
            count[g] += 1;
        }
        let mean: Vec<f64> = sum.iter().zip(&count).map(|(s, &c)| s / c as f64).collect();
        let mut var = vec![0.0; groups];
        for (&g, &v) in group_of.iter().zip(x.data()) {
            var[g] += (v - mean[g]).powi(2);
        }
        for (v, &c) in var.iter_mut().zip(&count) {
            *v /= c as f64;
        }
        (mean, var)
    };

    let (gamma, beta) = (args[1].data(), args[2].data());
    let data = group_of
        .iter()
        .zip(x.data())
        .map(|(&g, &v)| (v - mean[g]) / (var[g] + epsilon).sqrt() * gamma[g] + beta[g])
        .collect();
    Tensor::from_shape_vec(shape, data)
}
