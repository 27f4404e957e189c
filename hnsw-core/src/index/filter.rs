//! Caller-supplied sets of ids to keep out of query results.

use std::collections::{BTreeSet, HashSet};

/// Ids that must not appear in query results, e.g. soft-deleted rows.
///
/// Excluded nodes are still traversed during search; they just never take
/// a result slot. Implementations are read-only during a query and may be
/// shared across query threads.
pub trait ExclusionFilter: Sync {
    fn is_excluded(&self, id: usize) -> bool;

    /// Number of excluded ids in `0..count`.
    fn excluded_count(&self, count: usize) -> usize {
        (0..count).filter(|&id| self.is_excluded(id)).count()
    }
}

impl ExclusionFilter for HashSet<usize> {
    fn is_excluded(&self, id: usize) -> bool {
        self.contains(&id)
    }

    fn excluded_count(&self, count: usize) -> usize {
        self.iter().filter(|&&id| id < count).count()
    }
}

impl ExclusionFilter for BTreeSet<usize> {
    fn is_excluded(&self, id: usize) -> bool {
        self.contains(&id)
    }

    fn excluded_count(&self, count: usize) -> usize {
        self.range(..count).count()
    }
}

/// Borrowed list of excluded ids, sorted on construction.
#[derive(Debug, Clone)]
pub struct IdList<'a> {
    ids: std::borrow::Cow<'a, [usize]>,
}

impl<'a> IdList<'a> {
    pub fn new(ids: &'a [usize]) -> Self {
        if ids.windows(2).all(|w| w[0] < w[1]) {
            return Self { ids: ids.into() };
        }
        let mut owned = ids.to_vec();
        owned.sort_unstable();
        owned.dedup();
        Self { ids: owned.into() }
    }
}

impl ExclusionFilter for IdList<'_> {
    fn is_excluded(&self, id: usize) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    fn excluded_count(&self, count: usize) -> usize {
        self.ids.partition_point(|&id| id < count)
    }
}

/// Fixed-size bitmap over ids. Bit `i` set means id `i` is excluded; ids
/// past the end are never excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn from_ids(len: usize, ids: impl IntoIterator<Item = usize>) -> Self {
        let mut bits = Self::new(len);
        for id in ids {
            bits.set(id);
        }
        bits
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sets bit `id`. Ids past the end are ignored.
    pub fn set(&mut self, id: usize) {
        if id < self.len {
            self.words[id / 64] |= 1 << (id % 64);
        }
    }

    pub fn clear(&mut self, id: usize) {
        if id < self.len {
            self.words[id / 64] &= !(1 << (id % 64));
        }
    }

    #[inline]
    pub fn test(&self, id: usize) -> bool {
        id < self.len && self.words[id / 64] & (1 << (id % 64)) != 0
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl ExclusionFilter for Bitset {
    #[inline]
    fn is_excluded(&self, id: usize) -> bool {
        self.test(id)
    }

    fn excluded_count(&self, count: usize) -> usize {
        let count = count.min(self.len);
        let full = count / 64;
        let mut total: usize = self.words[..full]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let rest = count % 64;
        if rest > 0 {
            total += (self.words[full] & ((1u64 << rest) - 1)).count_ones() as usize;
        }
        total
    }
}
