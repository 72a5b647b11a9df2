// Traced operations — the minimal operator set
//
// Every operation here computes its forward result with the element-wise
// kernels on Tensor and hands it to Tensor::from_op together with a backward
// closure. from_op decides whether the result is actually recorded.
//
// All operations are f32 only and require identical shapes (no broadcasting).
//
// Backward closures build their contributions with the same untracked
// kernels, never with traced operations, so replay cannot grow the graph it
// is walking.

use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Size;
use crate::storage::Storage;
use crate::tensor::{BackwardContext, Tensor};

/// Wrap a kernel result as a plain gradient contribution.
fn contribution(storage: Storage, shape: &Size) -> Result<Tensor> {
    Tensor::from_storage(storage, *shape)
}

/// The value of a 0-dimensional gradient.
fn scalar_grad(ctx: &BackwardContext<'_>) -> Result<f32> {
    Ok(ctx.grad().get_flat(0)?.to_f32())
}

impl Tensor {
    // Binary operations

    /// Element-wise addition: self + rhs.
    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        let storage = self.zip_f32(rhs, |a, b| a + b)?;
        Tensor::from_op(
            storage,
            *self.shape(),
            vec![self.clone(), rhs.clone()],
            "add",
            Box::new(|ctx: &BackwardContext<'_>| {
                // d(a + b)/da = 1, d(a + b)/db = 1
                let g = ctx.grad();
                ctx.parent(0)?.accumulate_grad(g)?;
                ctx.parent(1)?.accumulate_grad(g)
            }),
        )
    }

    /// Element-wise subtraction: self - rhs.
    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        let storage = self.zip_f32(rhs, |a, b| a - b)?;
        Tensor::from_op(
            storage,
            *self.shape(),
            vec![self.clone(), rhs.clone()],
            "sub",
            Box::new(|ctx: &BackwardContext<'_>| {
                let g = ctx.grad();
                ctx.parent(0)?.accumulate_grad(g)?;
                let neg_g = contribution(g.map_f32(|v| -v)?, g.shape())?;
                ctx.parent(1)?.accumulate_grad(&neg_g)
            }),
        )
    }

    /// Element-wise multiplication: self * rhs.
    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        let storage = self.zip_f32(rhs, |a, b| a * b)?;
        Tensor::from_op(
            storage,
            *self.shape(),
            vec![self.clone(), rhs.clone()],
            "mul",
            Box::new(|ctx: &BackwardContext<'_>| {
                // d(a * b)/da = b, d(a * b)/db = a
                let g = ctx.grad();
                let (a, b) = (ctx.parent(0)?, ctx.parent(1)?);
                let grad_a = contribution(g.zip_f32(b, |g, b| g * b)?, g.shape())?;
                let grad_b = contribution(g.zip_f32(a, |g, a| g * a)?, g.shape())?;
                a.accumulate_grad(&grad_a)?;
                b.accumulate_grad(&grad_b)
            }),
        )
    }

    // Unary operations

    /// Element-wise negation: -self.
    pub fn neg(&self) -> Result<Tensor> {
        let storage = self.map_f32(|x| -x)?;
        Tensor::from_op(
            storage,
            *self.shape(),
            vec![self.clone()],
            "neg",
            Box::new(|ctx: &BackwardContext<'_>| {
                let g = ctx.grad();
                let neg_g = contribution(g.map_f32(|v| -v)?, g.shape())?;
                ctx.parent(0)?.accumulate_grad(&neg_g)
            }),
        )
    }

    /// Affine transform: self * mul + add.
    pub fn affine(&self, mul: f32, add: f32) -> Result<Tensor> {
        let storage = self.map_f32(|x| x * mul + add)?;
        Tensor::from_op(
            storage,
            *self.shape(),
            vec![self.clone()],
            "affine",
            Box::new(move |ctx: &BackwardContext<'_>| {
                // d(x * mul + add)/dx = mul
                let g = ctx.grad();
                let scaled = contribution(g.map_f32(|v| v * mul)?, g.shape())?;
                ctx.parent(0)?.accumulate_grad(&scaled)
            }),
        )
    }

    /// Element-wise square: self * self.
    pub fn square(&self) -> Result<Tensor> {
        let storage = self.map_f32(|x| x * x)?;
        Tensor::from_op(
            storage,
            *self.shape(),
            vec![self.clone()],
            "square",
            Box::new(|ctx: &BackwardContext<'_>| {
                // d(x^2)/dx = 2x
                let g = ctx.grad();
                let input = ctx.parent(0)?;
                let grad = contribution(g.zip_f32(input, |g, x| 2.0 * x * g)?, g.shape())?;
                input.accumulate_grad(&grad)
            }),
        )
    }

    // Reductions

    /// Sum of all elements, returning a 0-dimensional tensor.
    pub fn sum_all(&self) -> Result<Tensor> {
        let total: f32 = self.map_f32(|x| x)?.as_slice::<f32>()?.iter().sum();
        Tensor::from_op(
            Storage::F32(vec![total]),
            Size::scalar(),
            vec![self.clone()],
            "sum_all",
            Box::new(|ctx: &BackwardContext<'_>| {
                // Every input element contributes with weight 1
                let input = ctx.parent(0)?;
                let grad = Tensor::full(*input.shape(), scalar_grad(ctx)?, DType::F32);
                input.accumulate_grad(&grad)
            }),
        )
    }

    /// Mean of all elements, returning a 0-dimensional tensor.
    pub fn mean_all(&self) -> Result<Tensor> {
        let n = self.numel() as f32;
        let total: f32 = self.map_f32(|x| x)?.as_slice::<f32>()?.iter().sum();
        Tensor::from_op(
            Storage::F32(vec![total / n]),
            Size::scalar(),
            vec![self.clone()],
            "mean_all",
            Box::new(move |ctx: &BackwardContext<'_>| {
                // Fill with grad / N
                let input = ctx.parent(0)?;
                let grad = Tensor::full(*input.shape(), scalar_grad(ctx)? / n, DType::F32);
                input.accumulate_grad(&grad)
            }),
        )
    }
}
