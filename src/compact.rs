use crate::region::RegionAllocator;

/// Element move produced by compaction: `count` elements from `from` to `to`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RegionMove {
    pub from: u64,
    pub to: u64,
    pub count: u64,
}

impl RegionMove {
    pub fn byte_range(&self, stride: u64) -> (u64, u64, u64) {
        (self.from * stride, self.to * stride, self.count * stride)
    }
}

impl RegionAllocator {
    /// Slides every live region toward offset 0, closing all gaps while keeping
    /// their relative order, and returns the data moves that must be performed.
    ///
    /// Starts are updated in place. Zero-length regions are repositioned but
    /// never produce a move.
    pub fn compact(&mut self) -> Vec<RegionMove> {
        let mut moves = Vec::new();
        let mut next = 0u64;

        for region in self.live_mut().iter() {
            let start = region.start();
            if start != next {
                if region.count() > 0 {
                    moves.push(RegionMove {
                        from: start,
                        to: next,
                        count: region.count(),
                    });
                }
                region.move_to(next);
            }
            next += region.count();
        }

        if !moves.is_empty() {
            log::debug!(
                "compaction: {} moves, {} elements",
                moves.len(),
                moves.iter().map(|m| m.count).sum::<u64>()
            );
        }
        moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_gaps_in_order() {
        let mut alloc = RegionAllocator::new(16);
        let a = alloc.try_allocate(5).unwrap(); // [0, 5)
        let b = alloc.try_allocate(4).unwrap(); // [5, 9)
        let c = alloc.try_allocate(4).unwrap(); // [9, 13)
        alloc.free(&a);
        let a = alloc.try_allocate(3).unwrap(); // [0, 3)
        let _ = b;
        let d = alloc.try_allocate(2).unwrap(); // [3, 5)
        alloc.free(&d);
        // Layout now: {0: 3, 5: 4, 9: 4}
        let moves = alloc.compact();

        assert_eq!(
            moves,
            vec![
                RegionMove { from: 5, to: 3, count: 4 },
                RegionMove { from: 9, to: 7, count: 4 },
            ]
        );
        assert_eq!(a.start(), 0);
        assert_eq!(c.start(), 7);
    }

    #[test]
    fn first_region_is_forced_to_origin() {
        let mut alloc = RegionAllocator::new(8);
        let a = alloc.try_allocate(2).unwrap();
        let b = alloc.try_allocate(3).unwrap();
        alloc.free(&a);

        let moves = alloc.compact();
        assert_eq!(moves, vec![RegionMove { from: 2, to: 0, count: 3 }]);
        assert_eq!(b.start(), 0);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut alloc = RegionAllocator::new(32);
        let held: Vec<_> = (1..=6).map(|n| alloc.try_allocate(n).unwrap()).collect();
        alloc.free(&held[0]);
        alloc.free(&held[3]);

        let first = alloc.compact();
        let layout: Vec<_> = alloc.regions().iter().map(|r| (r.start(), r.count())).collect();
        let second = alloc.compact();
        let again: Vec<_> = alloc.regions().iter().map(|r| (r.start(), r.count())).collect();

        assert!(!first.is_empty());
        assert!(second.is_empty());
        assert_eq!(layout, again);

        let mut expected = 0;
        for (start, count) in layout {
            assert_eq!(start, expected);
            expected += count;
        }
    }

    #[test]
    fn empty_allocator_has_nothing_to_move() {
        let mut alloc = RegionAllocator::new(4);
        assert!(alloc.compact().is_empty());
    }

    #[test]
    fn zero_length_regions_move_without_copies() {
        let mut alloc = RegionAllocator::new(8);
        let a = alloc.try_allocate(4).unwrap();
        let b = alloc.try_allocate(2).unwrap();
        let empty = alloc.try_allocate(0).unwrap();
        alloc.free(&a);

        let moves = alloc.compact();
        assert_eq!(moves, vec![RegionMove { from: 4, to: 0, count: 2 }]);
        assert_eq!(empty.start(), 0);
        assert_eq!(b.start(), 0);
    }
}
