// StateDict — Ordered snapshot of named tensors
//
// A state dict is what a module's parameters look like at rest: for every
// dotted name, the shape and a copy of the storage. It owns its data, so it
// stays valid after the module changes or is dropped, and it is what the
// checkpoint format reads and writes.
//
// Entries keep insertion order (the module's pre-order walk), which makes
// serialized output deterministic.

use wren_core::dtype::DType;
use wren_core::error::{Error, Result};
use wren_core::shape::Size;
use wren_core::storage::Storage;
use wren_core::tensor::Tensor;

/// A single named tensor snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    name: String,
    shape: Size,
    storage: Storage,
}

impl StateEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Size {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Materialize the snapshot as a fresh leaf tensor.
    pub fn to_tensor(&self) -> Result<Tensor> {
        Tensor::from_storage(self.storage.clone(), self.shape)
    }
}

/// Ordered mapping from parameter name to tensor snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    entries: Vec<StateEntry>,
}

impl StateDict {
    pub fn new() -> Self {
        StateDict::default()
    }

    /// Insert or replace the entry for `name`.
    ///
    /// Fails with [`Error::ElementCountMismatch`] if `storage` does not hold
    /// exactly `shape.numel()` elements. Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, shape: Size, storage: Storage) -> Result<()> {
        let name = name.into();
        if storage.len() != shape.numel() {
            return Err(Error::ElementCountMismatch {
                shape,
                expected: shape.numel(),
                got: storage.len(),
            });
        }
        let entry = StateEntry {
            name,
            shape,
            storage,
        };
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    /// Snapshot `tensor`'s current data under `name`.
    pub fn insert_tensor(&mut self, name: impl Into<String>, tensor: &Tensor) -> Result<()> {
        let storage = tensor.storage()?.clone();
        self.insert(name, *tensor.shape(), storage)
    }

    pub fn get(&self, name: &str) -> Option<&StateEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove and return the entry for `name`.
    pub fn remove(&mut self, name: &str) -> Option<StateEntry> {
        let pos = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(pos))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StateEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a StateDict {
    type Item = &'a StateEntry;
    type IntoIter = std::slice::Iter<'a, StateEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_and_replace() {
        let mut dict = StateDict::new();
        dict.insert("b", Size::scalar(), Storage::zeros(1, DType::F32))
            .unwrap();
        dict.insert("a", Size::new([2]).unwrap(), Storage::zeros(2, DType::I32))
            .unwrap();
        dict.insert("b", Size::scalar(), Storage::full(1, 5.0f32, DType::F32))
            .unwrap();

        let names: Vec<&str> = dict.names().collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(dict.get("b").unwrap().storage().to_vec::<f32>(), vec![5.0]);
        assert_eq!(dict.get("a").unwrap().dtype(), DType::I32);
        assert!(dict.get("c").is_none());
    }

    #[test]
    fn test_insert_checks_element_count() {
        let mut dict = StateDict::new();
        let err = dict
            .insert("w", Size::new([2, 2]).unwrap(), Storage::zeros(3, DType::F32))
            .unwrap_err();
        assert!(matches!(err, Error::ElementCountMismatch { .. }));
        assert!(dict.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let t = Tensor::from_slice(&[1.0f32, 2.0], Size::new([2]).unwrap()).unwrap();
        let mut dict = StateDict::new();
        dict.insert_tensor("w", &t).unwrap();
        t.update_data(Storage::from_vec(vec![9.0f32, 9.0])).unwrap();

        let restored = dict.get("w").unwrap().to_tensor().unwrap();
        assert_eq!(restored.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
        assert_ne!(restored.id(), t.id());
    }

    #[test]
    fn test_remove() {
        let mut dict = StateDict::new();
        dict.insert("w", Size::scalar(), Storage::zeros(1, DType::Bool))
            .unwrap();
        assert!(dict.contains("w"));
        assert_eq!(dict.remove("w").unwrap().name(), "w");
        assert!(dict.remove("w").is_none());
        assert_eq!(dict.len(), 0);
    }
}
