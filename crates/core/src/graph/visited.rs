//! Visited marks keyed by [`ObjectId`].
//!
//! Slot `id` belongs to object `id`; slot 0 is never marked. Clearing bumps a
//! generation stamp, so one set serves every query a thread runs even while
//! the object space keeps growing underneath it.

use crate::graph::ObjectId;

/// Visited marks for one traversal at a time.
///
/// A slot counts as visited when it holds the current generation. The
/// generation is a `u16`, so the backing array is only wiped once every
/// 65 534 clears.
#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: vec![0u16; capacity],
            generation: 1,
        }
    }

    /// Forget every mark.
    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.stamps.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Room for ids `1..objects`. Never shrinks.
    pub fn ensure_capacity(&mut self, objects: usize) {
        if objects > self.stamps.len() {
            self.stamps.resize(objects, 0);
        }
    }

    /// Mark `id`. Returns `true` when it was not yet visited in this generation.
    ///
    /// An id past the prepared range (an object appended after the search
    /// started) grows the set. Id 0 names no object and is never marked.
    #[inline]
    pub fn insert(&mut self, id: ObjectId) -> bool {
        if id == 0 {
            return false;
        }
        let idx = id as usize;
        if idx >= self.stamps.len() {
            self.ensure_capacity(idx + 1);
        }
        let slot = &mut self.stamps[idx];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }

    #[inline]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.stamps
            .get(id as usize)
            .is_some_and(|&stamp| stamp == self.generation)
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_clear() {
        let mut visited = VisitedSet::new(64);
        assert!(visited.insert(1));
        assert!(!visited.insert(1));
        assert!(visited.contains(1));
        assert!(!visited.contains(2));

        visited.clear();
        assert!(!visited.contains(1));
        assert!(visited.insert(1));
    }

    #[test]
    fn test_grow_keeps_marks() {
        let mut visited = VisitedSet::new(4);
        visited.insert(3);
        visited.ensure_capacity(100);
        assert!(visited.contains(3));
        assert!(visited.insert(99));
        assert!(!visited.contains(1_000));
    }

    #[test]
    fn test_insert_past_capacity_grows() {
        let mut visited = VisitedSet::new(0);
        assert!(visited.insert(7));
        assert!(!visited.insert(7));
        assert!(visited.contains(7));
        assert!(!visited.insert(0));
        assert!(!visited.contains(0));
    }

    #[test]
    fn test_generation_wraps_with_full_reset() {
        let mut visited = VisitedSet::new(8);
        for _ in 0..65_534 {
            visited.clear();
        }
        assert_eq!(visited.generation, u16::MAX);
        visited.insert(5);

        visited.clear();
        assert_eq!(visited.generation, 1);
        assert!(visited.insert(5));
    }
}
