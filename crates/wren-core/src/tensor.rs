use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::dtype::{DType, Element, Scalar};
use crate::error::{Error, Result};
use crate::grad_mode::is_grad_enabled;
use crate::shape::Size;
use crate::storage::Storage;

// Tensor — The graph node
//
// A Tensor pairs a Size with a Storage and, when it takes part in
// differentiation, carries three more things:
//
//   grad      — a same-shaped f32 tensor, present iff requires_grad
//   parents   — the operands this tensor was computed from (graph edges)
//   backward  — a closure that turns this node's grad into contributions
//               on each parent's grad
//
// MEMORY MODEL:
//
//   The node lives behind an Arc, so cloning a Tensor is cheap and the same
//   operand can be a parent of many children. Parents are fixed when a node
//   is created and can only reference nodes that already exist, which is what
//   keeps the graph acyclic (and Arc free of ownership cycles).
//
//   Storage and grad sit behind RwLocks so the engine can rewrite a parent's
//   grad through a shared handle. Storage is never shared between two nodes:
//   detach() and to_dtype() copy.
//
// BACKWARD CLOSURES:
//
//   A closure receives a BackwardContext holding this node's current grad and
//   its parents instead of capturing them. Capturing the node itself would
//   make the node own a closure that owns the node.

/// Unique identifier for a tensor node. Graph traversal keys on this, never
/// on tensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    /// Generate a new unique tensor ID (uses a global atomic counter).
    fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a backward closure sees when the engine replays it.
pub struct BackwardContext<'a> {
    grad: &'a Tensor,
    parents: &'a [Tensor],
}

impl<'a> BackwardContext<'a> {
    pub(crate) fn new(grad: &'a Tensor, parents: &'a [Tensor]) -> Self {
        BackwardContext { grad, parents }
    }

    /// The accumulated gradient of the node being replayed.
    pub fn grad(&self) -> &'a Tensor {
        self.grad
    }

    /// The node's parents, in the order they were recorded.
    pub fn parents(&self) -> &'a [Tensor] {
        self.parents
    }

    /// The `i`-th parent.
    pub fn parent(&self, i: usize) -> Result<&'a Tensor> {
        self.parents.get(i).ok_or(Error::IndexOutOfRange {
            index: i,
            len: self.parents.len(),
        })
    }
}

/// Operation-specific chain-rule step attached to a traced result.
///
/// It must *accumulate* into parents (via [`Tensor::accumulate_grad`]), never
/// overwrite: a parent may receive contributions from several children.
pub type BackwardFn = Box<dyn Fn(&BackwardContext<'_>) -> Result<()> + Send + Sync>;

/// Inner data of a tensor, shared via Arc.
struct TensorInner {
    id: TensorId,
    shape: Size,
    dtype: DType,
    storage: RwLock<Storage>,
    grad: RwLock<Option<Tensor>>,
    parents: Vec<Tensor>,
    backward: Option<BackwardFn>,
    /// Name of the operation that produced this node ("leaf" otherwise).
    op: &'static str,
}

// Unlinks the parent chain with a worklist. The derived drop would recurse
// once per graph level and overflow the stack on long chains.
impl Drop for TensorInner {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.parents);
        while let Some(parent) = pending.pop() {
            if let Some(mut inner) = Arc::into_inner(parent.inner) {
                pending.append(&mut inner.parents);
            }
        }
    }
}

/// An n-dimensional array with optional gradient tracking.
///
/// # Example
/// ```
/// use wren_core::{Size, Tensor};
///
/// let a = Tensor::from_slice(&[2.0f32], Size::scalar())?;
/// a.set_requires_grad(true)?;
/// let b = a.mul(&a)?;
/// b.backward()?;
/// assert_eq!(a.grad().unwrap().to_vec::<f32>()?, vec![4.0]);
/// # Ok::<(), wren_core::Error>(())
/// ```
pub struct Tensor {
    inner: Arc<TensorInner>,
}

// Manual Clone: Arc::clone is cheap (just increment refcount).
impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(id={}, shape={}, dtype={}, requires_grad={}, op={})",
            self.inner.id,
            self.inner.shape,
            self.inner.dtype,
            self.requires_grad(),
            self.inner.op,
        )
    }
}

impl Tensor {
    // Internal constructors

    /// Assemble a node. `storage.len()` must already match `shape`.
    fn from_parts(
        storage: Storage,
        shape: Size,
        requires_grad: bool,
        parents: Vec<Tensor>,
        backward: Option<BackwardFn>,
        op: &'static str,
    ) -> Self {
        let dtype = storage.dtype();
        let grad = if requires_grad {
            Some(Tensor::zeros_untracked(shape))
        } else {
            None
        };
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                shape,
                dtype,
                storage: RwLock::new(storage),
                grad: RwLock::new(grad),
                parents,
                backward,
                op,
            }),
        }
    }

    /// A plain f32 zeros leaf, used for gradient slots.
    fn zeros_untracked(shape: Size) -> Self {
        Self::from_parts(
            Storage::zeros(shape.numel(), DType::F32),
            shape,
            false,
            Vec::new(),
            None,
            "leaf",
        )
    }

    fn check_len(storage: &Storage, shape: &Size) -> Result<()> {
        if storage.len() != shape.numel() {
            return Err(Error::ElementCountMismatch {
                shape: *shape,
                expected: shape.numel(),
                got: storage.len(),
            });
        }
        Ok(())
    }

    // Creation methods

    /// Create a zero-filled tensor, optionally tracking gradients.
    ///
    /// Fails with [`Error::InvalidArgument`] if `requires_grad` is requested
    /// for a non-floating dtype. When tracking, the grad slot is allocated
    /// immediately as a same-shaped f32 zero tensor.
    pub fn new(shape: Size, dtype: DType, requires_grad: bool) -> Result<Self> {
        if requires_grad && !dtype.is_float() {
            return Err(Error::invalid_argument(format!(
                "requires_grad is only supported for floating dtypes, got {dtype}"
            )));
        }
        Ok(Self::from_parts(
            Storage::zeros(shape.numel(), dtype),
            shape,
            requires_grad,
            Vec::new(),
            None,
            "leaf",
        ))
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Size, dtype: DType) -> Self {
        Self::from_parts(
            Storage::zeros(shape.numel(), dtype),
            shape,
            false,
            Vec::new(),
            None,
            "leaf",
        )
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: Size, dtype: DType) -> Self {
        Self::full(shape, 1.0f32, dtype)
    }

    /// Create a tensor filled with a constant value, coerced into `dtype`.
    pub fn full(shape: Size, value: impl Into<Scalar>, dtype: DType) -> Self {
        Self::from_parts(
            Storage::full(shape.numel(), value, dtype),
            shape,
            false,
            Vec::new(),
            None,
            "leaf",
        )
    }

    /// A 0-dimensional f32 tensor.
    pub fn scalar(value: f32) -> Self {
        Self::full(Size::scalar(), value, DType::F32)
    }

    /// Create a tensor from a host buffer; the dtype comes from `T`.
    pub fn from_slice<T: Element>(data: &[T], shape: Size) -> Result<Self> {
        Self::from_storage(Storage::from_vec(data.to_vec()), shape)
    }

    /// Create a tensor from a flat slice of f64 values, coerced into `dtype`.
    pub fn from_f64_slice(data: &[f64], shape: Size, dtype: DType) -> Result<Self> {
        Self::from_storage(Storage::from_f64_slice(data, dtype), shape)
    }

    /// Wrap existing storage as a leaf tensor.
    pub fn from_storage(storage: Storage, shape: Size) -> Result<Self> {
        Self::check_len(&storage, &shape)?;
        Ok(Self::from_parts(
            storage,
            shape,
            false,
            Vec::new(),
            None,
            "leaf",
        ))
    }

    /// Create a tensor of zeros with the same shape and dtype as `other`.
    pub fn zeros_like(other: &Self) -> Self {
        Self::zeros(*other.shape(), other.dtype())
    }

    /// Create a tensor of ones with the same shape and dtype as `other`.
    pub fn ones_like(other: &Self) -> Self {
        Self::ones(*other.shape(), other.dtype())
    }

    /// Build the result of a traced operation.
    ///
    /// This is the hook operator implementations use. The result records
    /// `parents` and `backward` only if grad mode is enabled, the result
    /// dtype is floating, and at least one parent requires gradients.
    /// Otherwise it is returned as a plain leaf with no graph edges.
    pub fn from_op(
        storage: Storage,
        shape: Size,
        parents: Vec<Tensor>,
        op: &'static str,
        backward: BackwardFn,
    ) -> Result<Self> {
        Self::check_len(&storage, &shape)?;
        let track = is_grad_enabled()
            && storage.dtype().is_float()
            && parents.iter().any(|p| p.requires_grad());
        if track {
            Ok(Self::from_parts(
                storage,
                shape,
                true,
                parents,
                Some(backward),
                op,
            ))
        } else {
            Ok(Self::from_parts(storage, shape, false, Vec::new(), None, op))
        }
    }

    // Accessors

    /// Unique tensor ID.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// The shape of this tensor.
    pub fn shape(&self) -> &Size {
        &self.inner.shape
    }

    /// The dimensions as a slice (shortcut for shape().dims()).
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.inner.shape.numel()
    }

    /// Data type of the elements.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Name of the operation that produced this tensor.
    pub fn op_name(&self) -> &'static str {
        self.inner.op
    }

    /// The operands this tensor was computed from.
    pub fn parents(&self) -> &[Tensor] {
        &self.inner.parents
    }

    /// Whether a backward closure is attached.
    pub fn has_backward(&self) -> bool {
        self.inner.backward.is_some()
    }

    pub(crate) fn backward_fn(&self) -> Option<&BackwardFn> {
        self.inner.backward.as_ref()
    }

    /// Whether this tensor tracks gradients (equivalently: has a grad slot).
    pub fn requires_grad(&self) -> bool {
        self.grad_slot().is_some()
    }

    /// The current gradient, if this tensor tracks gradients.
    pub fn grad(&self) -> Option<Tensor> {
        self.grad_slot().clone()
    }

    /// Access the underlying storage (read lock).
    pub fn storage(&self) -> Result<RwLockReadGuard<'_, Storage>> {
        self.read_storage()
    }

    fn read_storage(&self) -> Result<RwLockReadGuard<'_, Storage>> {
        self.inner
            .storage
            .read()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<RwLockWriteGuard<'_, Storage>> {
        self.inner
            .storage
            .write()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    // The slot holds a plain Option, so a poisoned lock still holds a valid value.
    fn grad_slot(&self) -> RwLockReadGuard<'_, Option<Tensor>> {
        self.inner
            .grad
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn grad_slot_mut(&self) -> RwLockWriteGuard<'_, Option<Tensor>> {
        self.inner
            .grad
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Gradient slot management

    /// A copy of `t` safe to store in a grad slot: gradients never carry
    /// their own graph.
    fn as_gradient(t: &Tensor) -> Result<Tensor> {
        if t.requires_grad() || t.has_backward() {
            t.detach()
        } else {
            Ok(t.clone())
        }
    }

    /// Replace the gradient.
    ///
    /// `grad` must have exactly this tensor's shape ([`Error::ShapeMismatch`])
    /// and a floating dtype ([`Error::DTypeMismatch`]). Setting a grad on a
    /// non-floating tensor fails with [`Error::InvalidArgument`]. Afterwards
    /// [`grad`](Self::grad) returns `grad` itself.
    pub fn set_grad(&self, grad: &Tensor) -> Result<()> {
        if !self.dtype().is_float() {
            return Err(Error::invalid_argument(format!(
                "cannot attach a gradient to a {} tensor",
                self.dtype()
            )));
        }
        if grad.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                expected: *self.shape(),
                got: *grad.shape(),
            });
        }
        if !grad.dtype().is_float() {
            return Err(Error::DTypeMismatch {
                expected: DType::F32,
                got: grad.dtype(),
            });
        }
        let grad = Self::as_gradient(grad)?;
        *self.grad_slot_mut() = Some(grad);
        Ok(())
    }

    /// Turn gradient tracking on (allocating a zero grad) or off (dropping it).
    ///
    /// A traced result cannot stop tracking: its backward closure is fixed
    /// at creation. Use [`detach`](Self::detach) for an untracked copy.
    pub fn set_requires_grad(&self, requires_grad: bool) -> Result<()> {
        if requires_grad && !self.dtype().is_float() {
            return Err(Error::invalid_argument(format!(
                "requires_grad is only supported for floating dtypes, got {}",
                self.dtype()
            )));
        }
        if !requires_grad && self.has_backward() {
            return Err(Error::invalid_argument(format!(
                "cannot stop tracking the result of '{}', detach() it instead",
                self.op_name()
            )));
        }
        let mut slot = self.grad_slot_mut();
        match (requires_grad, slot.is_some()) {
            (true, false) => *slot = Some(Tensor::zeros_untracked(*self.shape())),
            (false, true) => *slot = None,
            _ => {}
        }
        Ok(())
    }

    /// Reset the gradient to zeros. No-op when not tracking.
    pub fn zero_grad(&self) {
        let mut slot = self.grad_slot_mut();
        if slot.is_some() {
            *slot = Some(Tensor::zeros_untracked(*self.shape()));
        }
    }

    /// Add `contribution` into the gradient slot.
    ///
    /// This is what backward closures call on their parents. It is a no-op
    /// for tensors that do not require gradients, so closures can push into
    /// every parent without checking.
    pub fn accumulate_grad(&self, contribution: &Tensor) -> Result<()> {
        if contribution.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                expected: *self.shape(),
                got: *contribution.shape(),
            });
        }
        if !contribution.dtype().is_float() {
            return Err(Error::DTypeMismatch {
                expected: DType::F32,
                got: contribution.dtype(),
            });
        }
        let mut slot = self.grad_slot_mut();
        let summed = match slot.as_ref() {
            None => return Ok(()),
            Some(existing) => {
                let storage = existing.zip_f32(contribution, |a, b| a + b)?;
                Tensor::from_storage(storage, *self.shape())?
            }
        };
        *slot = Some(summed);
        Ok(())
    }

    // In-place mutation

    /// Replace the data of this tensor in place (optimizer steps, state
    /// loading). The dtype and element count must match.
    pub fn update_data(&self, storage: Storage) -> Result<()> {
        if storage.dtype() != self.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: storage.dtype(),
            });
        }
        Self::check_len(&storage, self.shape())?;
        *self.write_storage()? = storage;
        Ok(())
    }

    // Element access and export

    /// Read the element at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Result<Scalar> {
        let offset = self.shape().offset(index)?;
        self.read_storage()?.get(offset)
    }

    /// Read the element at a flat row-major offset.
    pub fn get_flat(&self, index: usize) -> Result<Scalar> {
        self.read_storage()?.get(index)
    }

    /// Extract all elements as `T`, applying the coercion table.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        Ok(self.read_storage()?.to_vec())
    }

    /// Extract all elements as a flat Vec<f64>.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        Ok(self.read_storage()?.to_f64_vec())
    }

    /// Extract a scalar value (tensor must have exactly 1 element).
    pub fn to_scalar_f64(&self) -> Result<f64> {
        if self.numel() != 1 {
            return Err(Error::NotAScalar {
                shape: *self.shape(),
            });
        }
        Ok(self.read_storage()?.get(0)?.to_f64())
    }

    /// Convert this tensor to a different dtype.
    ///
    /// Always returns a new leaf with its own storage; the conversion is not
    /// recorded in the graph.
    pub fn to_dtype(&self, dtype: DType) -> Result<Self> {
        let storage = self.read_storage()?.to_dtype(dtype);
        Self::from_storage(storage, *self.shape())
    }

    // Element-wise kernels used by ops and by gradient accumulation.
    // They never record graph edges.

    pub(crate) fn map_f32(&self, f: impl Fn(f32) -> f32) -> Result<Storage> {
        let storage = self.read_storage()?;
        let data = storage.as_slice::<f32>().map_err(|_| Error::DTypeMismatch {
            expected: DType::F32,
            got: storage.dtype(),
        })?;
        Ok(Storage::F32(data.iter().map(|&x| f(x)).collect()))
    }

    pub(crate) fn zip_f32(&self, rhs: &Tensor, f: impl Fn(f32, f32) -> f32) -> Result<Storage> {
        if self.shape() != rhs.shape() {
            return Err(Error::ShapeMismatch {
                expected: *self.shape(),
                got: *rhs.shape(),
            });
        }
        for t in [self, rhs] {
            if t.dtype() != DType::F32 {
                return Err(Error::DTypeMismatch {
                    expected: DType::F32,
                    got: t.dtype(),
                });
            }
        }
        let lhs_storage = self.read_storage()?;
        let lhs = lhs_storage.as_slice::<f32>()?;
        if Arc::ptr_eq(&self.inner, &rhs.inner) {
            return Ok(Storage::F32(lhs.iter().map(|&a| f(a, a)).collect()));
        }
        let rhs_storage = rhs.read_storage()?;
        let rhs = rhs_storage.as_slice::<f32>()?;
        Ok(Storage::F32(
            lhs.iter().zip(rhs.iter()).map(|(&a, &b)| f(a, b)).collect(),
        ))
    }

    // Autograd

    /// Compute gradients via reverse-mode automatic differentiation.
    ///
    /// This tensor must be a scalar; the implicit seed is 1.0. After the call
    /// every reachable tensor that requires gradients holds the sum of all
    /// contributions flowing to it in its grad slot.
    ///
    /// # Example
    /// ```
    /// use wren_core::{Size, Tensor};
    ///
    /// let a = Tensor::from_slice(&[2.0f32], Size::scalar())?;
    /// let b = Tensor::from_slice(&[3.0f32], Size::scalar())?;
    /// a.set_requires_grad(true)?;
    /// b.set_requires_grad(true)?;
    /// let c = a.mul(&b)?;
    /// c.backward()?;
    /// // grad_a = b = 3.0, grad_b = a = 2.0
    /// assert_eq!(a.grad().unwrap().to_scalar_f64()?, 3.0);
    /// assert_eq!(b.grad().unwrap().to_scalar_f64()?, 2.0);
    /// # Ok::<(), wren_core::Error>(())
    /// ```
    pub fn backward(&self) -> Result<()> {
        crate::backprop::backward(self, None)
    }

    /// Like [`backward`](Self::backward) with an explicit seed gradient.
    /// Required for non-scalar tensors; `seed` must have this tensor's shape.
    pub fn backward_with_grad(&self, seed: &Tensor) -> Result<()> {
        crate::backprop::backward(self, Some(seed))
    }

    /// Create a detached copy: same data in a fresh storage, no graph edges,
    /// no gradient tracking, new TensorId.
    pub fn detach(&self) -> Result<Self> {
        let storage = self.read_storage()?.clone();
        Self::from_storage(storage, *self.shape())
    }
}
