//! Channel-id allocation over a fixed integer range.

use std::fmt;

const WORD_BITS: usize = 64;

/// A bitset over `[low, high]` with a rolling cursor.
///
/// `next` scans forward from just after the last id it handed out and wraps
/// once, so freshly released ids are not reused immediately.
pub struct Allocator {
    pool: Vec<u64>,
    low: u16,
    high: u16,
    /// Offset of the next candidate.
    follow: usize,
}

impl Allocator {
    /// Allocator over the inclusive range `[low, high]`.
    ///
    /// A `high` below `low` collapses the range to the single id `low`.
    pub fn new(low: u16, high: u16) -> Self {
        let high = high.max(low);
        let size = usize::from(high - low) + 1;
        Self {
            pool: vec![0; size.div_ceil(WORD_BITS)],
            low,
            high,
            follow: 0,
        }
    }

    fn size(&self) -> usize {
        usize::from(self.high - self.low) + 1
    }

    fn offset(&self, id: u16) -> Option<usize> {
        (self.low..=self.high)
            .contains(&id)
            .then(|| usize::from(id - self.low))
    }

    fn is_set(&self, offset: usize) -> bool {
        self.pool[offset / WORD_BITS] & (1 << (offset % WORD_BITS)) != 0
    }

    fn set(&mut self, offset: usize) {
        self.pool[offset / WORD_BITS] |= 1 << (offset % WORD_BITS);
    }

    fn clear(&mut self, offset: usize) {
        self.pool[offset / WORD_BITS] &= !(1 << (offset % WORD_BITS));
    }

    /// Claim the next free id, or `None` when every id in range is taken.
    pub fn next(&mut self) -> Option<u16> {
        let size = self.size();
        for step in 0..size {
            let offset = (self.follow + step) % size;
            if self.pool[offset / WORD_BITS] == u64::MAX {
                continue;
            }
            if !self.is_set(offset) {
                self.set(offset);
                self.follow = (offset + 1) % size;
                return Some(self.low + offset as u16);
            }
        }
        None
    }

    /// Claim a specific id. Returns false if it is out of range or already taken.
    pub fn reserve(&mut self, id: u16) -> bool {
        match self.offset(id) {
            Some(offset) if !self.is_set(offset) => {
                self.set(offset);
                true
            }
            _ => false,
        }
    }

    pub fn reserved(&self, id: u16) -> bool {
        self.offset(id).is_some_and(|offset| self.is_set(offset))
    }

    /// Return an id to the pool. Releasing a free or out-of-range id does nothing.
    pub fn release(&mut self, id: u16) {
        if let Some(offset) = self.offset(id) {
            self.clear(offset);
        }
    }

    /// Number of ids currently reserved.
    pub fn in_use(&self) -> usize {
        self.pool.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn low(&self) -> u16 {
        self.low
    }

    pub fn high(&self) -> u16 {
        self.high
    }
}

impl fmt::Display for Allocator {
    /// `allocator[1..2047] 1..3 7` lists reserved ids, compressing runs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocator[{}..{}]", self.low, self.high)?;
        let size = self.size();
        let mut offset = 0;
        while offset < size {
            if !self.is_set(offset) {
                offset += 1;
                continue;
            }
            let start = offset;
            while offset + 1 < size && self.is_set(offset + 1) {
                offset += 1;
            }
            let first = usize::from(self.low) + start;
            let last = usize::from(self.low) + offset;
            if first == last {
                write!(f, " {first}")?;
            } else {
                write!(f, " {first}..{last}")?;
            }
            offset += 1;
        }
        Ok(())
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_ids_in_order() {
        let mut pool = Allocator::new(1, 5);
        let ids: Vec<_> = std::iter::from_fn(|| pool.next()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(pool.next(), None);
        assert_eq!(pool.in_use(), 5);
    }

    #[test]
    fn single_id_range_exhausts_until_released() {
        let mut pool = Allocator::new(1, 1);
        assert_eq!(pool.next(), Some(1));
        assert_eq!(pool.next(), None);
        pool.release(1);
        assert!(!pool.reserved(1));
        assert_eq!(pool.next(), Some(1));
    }

    #[test]
    fn cursor_does_not_reuse_released_id_immediately() {
        let mut pool = Allocator::new(1, 10);
        assert_eq!(pool.next(), Some(1));
        assert_eq!(pool.next(), Some(2));
        pool.release(1);
        assert_eq!(pool.next(), Some(3));
    }

    #[test]
    fn wraps_to_released_ids() {
        let mut pool = Allocator::new(1, 3);
        for _ in 0..3 {
            pool.next();
        }
        pool.release(2);
        assert_eq!(pool.next(), Some(2));
        assert_eq!(pool.next(), None);
    }

    #[test]
    fn reserve_and_release() {
        let mut pool = Allocator::new(10, 20);
        assert!(pool.reserve(15));
        assert!(!pool.reserve(15));
        assert!(!pool.reserve(9));
        assert!(!pool.reserve(21));
        assert!(pool.reserved(15));
        pool.release(15);
        pool.release(15);
        pool.release(500);
        assert!(!pool.reserved(15));
    }

    #[test]
    fn full_protocol_range() {
        let mut pool = Allocator::new(1, u16::MAX);
        let mut count = 0;
        while pool.next().is_some() {
            count += 1;
        }
        assert_eq!(count, 65535);
        assert!(pool.reserved(u16::MAX));
        pool.release(40_000);
        assert_eq!(pool.next(), Some(40_000));
    }

    #[test]
    fn ids_are_unique_while_live() {
        let mut pool = Allocator::new(1, 100);
        let mut live = std::collections::HashSet::new();
        for round in 0..1000u32 {
            if round % 3 == 2 {
                let victim = *live.iter().next().unwrap();
                live.remove(&victim);
                pool.release(victim);
            } else if let Some(id) = pool.next() {
                assert!(live.insert(id), "id {id} handed out twice");
            }
        }
        for id in 1..=100 {
            assert_eq!(pool.reserved(id), live.contains(&id));
        }
    }

    #[test]
    fn display_compresses_runs() {
        let mut pool = Allocator::new(1, 2047);
        for id in [1, 2, 3, 7] {
            assert!(pool.reserve(id));
        }
        assert_eq!(pool.to_string(), "allocator[1..2047] 1..3 7");
        assert_eq!(Allocator::new(1, 4).to_string(), "allocator[1..4]");
    }
}
