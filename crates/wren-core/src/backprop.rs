// Backpropagation — Reverse-mode automatic differentiation
//
// HOW IT WORKS:
//
//   1. Forward pass: traced operations build a DAG where each result tensor
//      lists its operands as parents and carries a backward closure.
//
//   2. backward() topologically sorts the DAG reachable from the root
//      (post-order DFS, ancestors before descendants).
//
//   3. The root's grad is overwritten with the seed (1.0 for scalars).
//
//   4. Walking the order in reverse (root first, leaves last), each node that
//      requires gradients and has a closure is replayed exactly once. The
//      closure reads the node's grad and accumulates into its parents.
//
// ORDERING IS THE SYNCHRONIZATION:
//
//   A node is replayed only after every node that depends on it, so by the
//   time its closure reads its grad, every contribution has been committed.
//   That is why closures must accumulate instead of overwrite: with a
//   diamond  root = f(a, b), a = g(x), b = h(x)  the grad of x is the sum of
//   what a and b push into it.
//
// INTERIOR GRADS:
//
//   Nodes that carry a closure (other than the root) are reset to zero before
//   replay, so repeated backward() calls on the same graph do not feed stale
//   interior gradients into their parents. Leaves keep accumulating across
//   calls until zero_grad().
//
// CYCLES:
//
//   A tensor's parents are fixed when it is created and can only name
//   tensors that already exist, so the public API cannot build a cycle. The
//   traversal relies on that and does no cycle detection.

use std::collections::HashSet;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Size;
use crate::tensor::{BackwardContext, Tensor, TensorId};

/// Build a topological ordering of the graph reachable from `root`.
///
/// Depth-first over `parents` in recorded order, appending a node after all
/// of its parents (post-order). Every node appears exactly once, keyed by
/// identity, and after all of its ancestors; the root is last.
///
/// Uses an explicit stack instead of recursion so long chains cannot
/// overflow the native stack. The order is the same as the recursive form.
pub fn topological_order(root: &Tensor) -> Vec<Tensor> {
    let mut visited: HashSet<TensorId> = HashSet::new();
    let mut order = Vec::new();
    // (node, index of the next parent to visit)
    let mut stack: Vec<(Tensor, usize)> = Vec::new();

    visited.insert(root.id());
    stack.push((root.clone(), 0));

    while let Some(frame) = stack.last_mut() {
        let next = frame.0.parents().get(frame.1).cloned();
        frame.1 += 1;
        match next {
            Some(parent) => {
                if visited.insert(parent.id()) {
                    stack.push((parent, 0));
                }
            }
            None => {
                // All parents done: post-order emit
                if let Some((node, _)) = stack.pop() {
                    order.push(node);
                }
            }
        }
    }

    order
}

/// Validate the seed and turn it into the gradient to install on `root`.
fn resolve_seed(root: &Tensor, seed: Option<&Tensor>) -> Result<Tensor> {
    match seed {
        Some(seed) => {
            if seed.shape() != root.shape() {
                return Err(Error::ShapeMismatch {
                    expected: *root.shape(),
                    got: *seed.shape(),
                });
            }
            if !seed.dtype().is_float() {
                return Err(Error::DTypeMismatch {
                    expected: DType::F32,
                    got: seed.dtype(),
                });
            }
            Ok(seed.clone())
        }
        None => {
            if !root.shape().is_scalar() {
                // Non-scalar roots have no implicit seed
                return Err(Error::ShapeMismatch {
                    expected: *root.shape(),
                    got: Size::scalar(),
                });
            }
            Ok(Tensor::scalar(1.0))
        }
    }
}

/// Compute gradients of `root` with respect to every tensor in its graph.
///
/// This is the entry point behind [`Tensor::backward`] and
/// [`Tensor::backward_with_grad`]. All precondition checks happen before any
/// gradient is touched:
///
/// - `root` must require gradients ([`Error::NoGradient`]).
/// - Without a seed, `root` must be 0-dimensional ([`Error::ShapeMismatch`]).
/// - A seed must have `root`'s shape and a floating dtype.
pub fn backward(root: &Tensor, seed: Option<&Tensor>) -> Result<()> {
    if !root.requires_grad() {
        return Err(Error::NoGradient);
    }
    let seed = resolve_seed(root, seed)?;

    // Step 1: Topological sort (leaves first, root last)
    let topo = topological_order(root);
    log::debug!(
        "backward from {} ({}): {} nodes in graph",
        root.id(),
        root.op_name(),
        topo.len()
    );

    // Step 2: Clear interior gradients left over from a previous pass
    for node in &topo {
        if node.id() != root.id() && node.has_backward() {
            node.zero_grad();
        }
    }

    // Step 3: Seed — overwrite grad(root)
    root.set_grad(&seed)?;

    // Step 4: Replay in reverse topological order (root first, leaves last)
    let mut replayed = 0usize;
    for node in topo.iter().rev() {
        let Some(backward_fn) = node.backward_fn() else {
            continue; // leaf
        };
        let Some(grad) = node.grad() else {
            continue; // tracking was switched off after construction
        };
        log::trace!(
            "replaying {} ({}) with {} parents",
            node.id(),
            node.op_name(),
            node.parents().len()
        );
        backward_fn(&BackwardContext::new(&grad, node.parents()))?;
        replayed += 1;
    }

    log::debug!("backward from {} done: {} closures replayed", root.id(), replayed);
    Ok(())
}
