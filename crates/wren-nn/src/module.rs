// Module trait — Explicit parameter discovery
//
// A module is anything that owns trainable tensors. Instead of inspecting
// fields at runtime, every module answers two questions itself:
//
//   local_parameters()  — my own tensor-valued members, with their names
//   children()          — my child modules, with their names
//
// Everything else (named_parameters, parameters, zero_grad, state_dict,
// load_state_dict) is derived from those two by walking the module tree.
//
// NAMING:
//
//   Names are dotted paths from the root: a member "weight" of a child
//   called "fc1" is reported as "fc1.weight". The walk is pre-order: a
//   module's own members come first, then each child in declaration order.
//
// LAZINESS:
//
//   named_parameters() returns an iterator that asks a module for its members
//   only when the walk reaches it. The tree is finite, so the iterator always
//   ends, and calling named_parameters() again starts a fresh walk.

use wren_core::error::{Error, Result};
use wren_core::tensor::Tensor;

use crate::state_dict::StateDict;

/// The parameter-visitor contract every module implements.
///
/// # Example
/// ```
/// use wren_core::{DType, Size, Tensor};
/// use wren_nn::Module;
///
/// struct Scale {
///     weight: Tensor,
/// }
///
/// impl Module for Scale {
///     fn local_parameters(&self) -> Vec<(String, Tensor)> {
///         vec![("weight".to_string(), self.weight.clone())]
///     }
/// }
///
/// struct Net {
///     first: Scale,
///     second: Scale,
/// }
///
/// impl Module for Net {
///     fn local_parameters(&self) -> Vec<(String, Tensor)> {
///         Vec::new()
///     }
///     fn children(&self) -> Vec<(String, &dyn Module)> {
///         vec![
///             ("first".to_string(), &self.first as &dyn Module),
///             ("second".to_string(), &self.second as &dyn Module),
///         ]
///     }
/// }
///
/// let scale = || Scale { weight: Tensor::new(Size::scalar(), DType::F32, true).unwrap() };
/// let net = Net { first: scale(), second: scale() };
/// let names: Vec<String> = net.named_parameters().map(|(name, _)| name).collect();
/// assert_eq!(names, ["first.weight", "second.weight"]);
/// ```
pub trait Module {
    /// Direct tensor-valued members of this module, in declaration order.
    fn local_parameters(&self) -> Vec<(String, Tensor)>;

    /// Direct child modules, in declaration order. Leaf modules keep the
    /// default empty list.
    fn children(&self) -> Vec<(String, &dyn Module)> {
        Vec::new()
    }

    /// Lazy pre-order walk over every parameter with its dotted name.
    fn named_parameters(&self) -> NamedParameters<'_>
    where
        Self: Sized,
    {
        NamedParameters::new(self)
    }

    /// All parameters in [`named_parameters`](Self::named_parameters) order.
    fn parameters(&self) -> Vec<Tensor>
    where
        Self: Sized,
    {
        self.named_parameters().map(|(_, t)| t).collect()
    }

    /// Total number of scalar parameters in this module.
    fn num_parameters(&self) -> usize
    where
        Self: Sized,
    {
        self.named_parameters().map(|(_, t)| t.numel()).sum()
    }

    /// Reset the gradient of every parameter to zeros.
    fn zero_grad(&self)
    where
        Self: Sized,
    {
        for (_, t) in self.named_parameters() {
            t.zero_grad();
        }
    }

    /// Snapshot every parameter into a [`StateDict`].
    fn state_dict(&self) -> Result<StateDict>
    where
        Self: Sized,
    {
        let mut dict = StateDict::new();
        for (name, tensor) in self.named_parameters() {
            dict.insert_tensor(name, &tensor)?;
        }
        Ok(dict)
    }

    /// Overwrite every parameter's data from `dict`.
    ///
    /// The dict must name exactly this module's parameters, with matching
    /// shapes and dtypes. Everything is validated before the first write, so a
    /// failed load leaves the module untouched.
    fn load_state_dict(&self, dict: &StateDict) -> Result<()>
    where
        Self: Sized,
    {
        let params: Vec<(String, Tensor)> = self.named_parameters().collect();

        for (name, tensor) in &params {
            let entry = dict
                .get(name)
                .ok_or_else(|| Error::msg(format!("missing key in state dict: {name}")))?;
            if entry.shape() != tensor.shape() {
                return Err(Error::ShapeMismatch {
                    expected: *tensor.shape(),
                    got: *entry.shape(),
                });
            }
            if entry.dtype() != tensor.dtype() {
                return Err(Error::DTypeMismatch {
                    expected: tensor.dtype(),
                    got: entry.dtype(),
                });
            }
        }
        if let Some(unknown) = dict
            .names()
            .find(|key| !params.iter().any(|(name, _)| name.as_str() == *key))
        {
            return Err(Error::msg(format!("unexpected key in state dict: {unknown}")));
        }

        for (name, tensor) in &params {
            if let Some(entry) = dict.get(name) {
                tensor.update_data(entry.storage().clone())?;
            }
        }
        log::debug!("loaded {} tensors from state dict", params.len());
        Ok(())
    }
}

/// One module on the walk stack, with what is left of its members.
#[derive(Clone)]
struct Frame<'a> {
    prefix: String,
    params: std::vec::IntoIter<(String, Tensor)>,
    children: std::vec::IntoIter<(String, &'a dyn Module)>,
}

impl<'a> Frame<'a> {
    fn new(prefix: String, module: &'a dyn Module) -> Self {
        Frame {
            prefix,
            params: module.local_parameters().into_iter(),
            children: module.children().into_iter(),
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

/// Iterator over `(dotted.name, tensor)` pairs of a module tree.
///
/// Created by [`Module::named_parameters`], or by [`NamedParameters::new`]
/// for a `&dyn Module`.
#[derive(Clone)]
pub struct NamedParameters<'a> {
    stack: Vec<Frame<'a>>,
}

impl<'a> NamedParameters<'a> {
    /// Start a walk at `root`. Names are relative to `root`.
    pub fn new(root: &'a dyn Module) -> Self {
        NamedParameters {
            stack: vec![Frame::new(String::new(), root)],
        }
    }
}

impl Iterator for NamedParameters<'_> {
    type Item = (String, Tensor);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            if let Some((name, tensor)) = frame.params.next() {
                return Some((frame.qualify(&name), tensor));
            }
            match frame.children.next() {
                Some((name, child)) => {
                    let prefix = frame.qualify(&name);
                    self.stack.push(Frame::new(prefix, child));
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}
