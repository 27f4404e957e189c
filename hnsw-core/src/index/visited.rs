//! Generation-stamped visited lists and a pool to share them between queries.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Visited set over node ids. `clear()` bumps a generation counter instead of
/// zeroing the array; the array is only wiped when the counter wraps.
#[derive(Debug)]
pub struct VisitedList {
    tags: Vec<u32>,
    generation: u32,
}

impl VisitedList {
    pub fn new(capacity: usize) -> Self {
        Self {
            tags: vec![0; capacity],
            generation: 1,
        }
    }

    pub fn clear(&mut self) {
        if self.generation == u32::MAX {
            self.tags.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.tags.len() {
            self.tags.resize(capacity, 0);
        }
    }

    /// Marks `id` visited. Returns `true` if it was not visited before.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.tags[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.tags[id as usize] == self.generation
    }
}

/// Free list of [`VisitedList`]s. Each concurrent query takes one for its
/// whole duration and hands it back on drop.
#[derive(Debug, Default)]
pub struct VisitedPool {
    lists: Mutex<Vec<VisitedList>>,
}

impl VisitedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a cleared list covering at least `capacity` ids.
    pub fn acquire(&self, capacity: usize) -> PooledVisited<'_> {
        let recycled = self
            .lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let mut list = recycled.unwrap_or_else(|| VisitedList::new(capacity));
        list.ensure_capacity(capacity);
        list.clear();
        PooledVisited { pool: self, list }
    }

    pub fn idle(&self) -> usize {
        self.lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct PooledVisited<'a> {
    pool: &'a VisitedPool,
    list: VisitedList,
}

impl Deref for PooledVisited<'_> {
    type Target = VisitedList;

    fn deref(&self) -> &VisitedList {
        &self.list
    }
}

impl DerefMut for PooledVisited<'_> {
    fn deref_mut(&mut self) -> &mut VisitedList {
        &mut self.list
    }
}

impl Drop for PooledVisited<'_> {
    fn drop(&mut self) {
        let list = std::mem::replace(&mut self.list, VisitedList::new(0));
        self.pool
            .lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_clear() {
        let mut vs = VisitedList::new(100);
        assert!(vs.insert(0));
        assert!(!vs.insert(0));
        assert!(vs.insert(50));
        assert!(vs.contains(50));

        vs.clear();
        assert!(!vs.contains(50));
        assert!(vs.insert(0));
    }

    #[test]
    fn test_generation_wrap_wipes_tags() {
        let mut vs = VisitedList::new(10);
        vs.generation = u32::MAX;
        vs.insert(5);

        vs.clear();
        assert_eq!(vs.generation, 1);
        assert!(vs.insert(5));
    }

    #[test]
    fn test_pool_recycles_lists() {
        let pool = VisitedPool::new();
        {
            let mut a = pool.acquire(8);
            let mut b = pool.acquire(8);
            assert!(a.insert(3));
            assert!(b.insert(3));
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 2);

        let mut c = pool.acquire(32);
        assert!(c.insert(31));
        assert!(c.insert(3), "recycled list must come back cleared");
    }
}
