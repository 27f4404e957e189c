use crate::FormatError;
use std::collections::BTreeMap;

/// A named collection of opaque binary buffers.
///
/// The set owns its buffers: producing one copies index state out, and the
/// caller is free to keep, ship or drop it independently of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinarySet {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl BinarySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a blob, replacing any previous blob of the same name.
    pub fn append(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.blobs.insert(name.into(), data);
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.blobs.get(name).map(Vec::as_slice)
    }

    /// Like [`BinarySet::get`], but a missing blob is an error.
    pub fn require(&self, name: &str) -> Result<&[u8], FormatError> {
        self.get(name)
            .ok_or_else(|| FormatError::MissingBlob(name.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.blobs.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Sum of all blob sizes in bytes.
    pub fn total_size(&self) -> usize {
        self.blobs.values().map(Vec::len).sum()
    }
}
