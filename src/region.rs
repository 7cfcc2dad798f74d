use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

/// An occupied `[start, start + count)` element span.
///
/// Shared between the allocator's live list and the handle that owns it; only
/// compaction moves `start`.
#[derive(Debug)]
pub struct Region {
    start: AtomicU64,
    count: u64,
    released: AtomicBool,
}

impl Region {
    fn new(start: u64, count: u64) -> Self {
        Self {
            start: AtomicU64::new(start),
            count,
            released: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.start() + self.count
    }

    /// True once the region was freed or its allocator cleared.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn move_to(&self, start: u64) {
        self.start.store(start, Ordering::Release);
    }
}

/// First-fit placement of element spans inside a linear buffer.
///
/// Live regions are kept sorted by ascending start. Regions never overlap, so a
/// region sorted before another also ends before the other starts; the search
/// relies on this to resume at the next region after skipping a blocker.
#[derive(Debug)]
pub struct RegionAllocator {
    capacity: u64,
    live: Vec<Arc<Region>>,
}

impl RegionAllocator {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            live: Vec::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn regions(&self) -> &[Arc<Region>] {
        &self.live
    }

    /// Lowest start at which `count` elements fit, if any within capacity.
    ///
    /// A zero-length request fits at offset 0.
    pub fn find_free(&self, count: u64) -> Option<u64> {
        let cursor = self.placement(count);
        cursor
            .checked_add(count)
            .is_some_and(|end| end <= self.capacity)
            .then_some(cursor)
    }

    /// Where first-fit would place `count` elements if capacity were unbounded.
    pub fn placement(&self, count: u64) -> u64 {
        let mut cursor = 0u64;
        for region in &self.live {
            let (start, end) = (region.start(), region.end());
            if start >= cursor.saturating_add(count) {
                break;
            }
            // Zero-length regions never block anything.
            if end > cursor && end > start {
                cursor = end;
            }
        }
        cursor
    }

    /// Reserves `count` elements, or returns `None` when the buffer must grow first.
    pub fn try_allocate(&mut self, count: u64) -> Option<Arc<Region>> {
        let start = self.find_free(count)?;
        let region = Arc::new(Region::new(start, count));

        // New regions go before existing ones with an equal start.
        let index = self.live.partition_point(|r| r.start() < start);
        self.live.insert(index, region.clone());

        debug_assert!(self.is_sorted());
        Some(region)
    }

    /// Doubles the capacity. Existing regions keep their placement.
    pub fn grow(&mut self) -> u64 {
        self.capacity = grown_capacity(self.capacity);
        self.capacity
    }

    pub(crate) fn set_capacity(&mut self, capacity: u64) {
        debug_assert!(capacity >= self.capacity, "allocators never shrink");
        self.capacity = capacity;
    }

    /// Releases `region`. Regions already dropped by [`RegionAllocator::clear`] are ignored.
    pub fn free(&mut self, region: &Arc<Region>) {
        if region.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let index = self.live.iter().position(|r| Arc::ptr_eq(r, region));
        debug_assert!(index.is_some(), "freed a region this allocator does not own");
        if let Some(index) = index {
            self.live.remove(index);
        }
    }

    pub fn clear(&mut self) {
        for region in self.live.drain(..) {
            region.released.store(true, Ordering::Release);
        }
    }

    pub(crate) fn live_mut(&mut self) -> &mut [Arc<Region>] {
        &mut self.live
    }

    fn is_sorted(&self) -> bool {
        self.live.windows(2).all(|w| w[0].start() <= w[1].start())
    }
}

pub(crate) fn grown_capacity(capacity: u64) -> u64 {
    capacity.saturating_mul(2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(alloc: &RegionAllocator) -> Vec<(u64, u64)> {
        alloc.regions().iter().map(|r| (r.start(), r.count())).collect()
    }

    fn assert_disjoint(alloc: &RegionAllocator) {
        let regions = alloc.regions();
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                let overlap = a.start() < b.end() && b.start() < a.end();
                assert!(
                    !overlap || a.count() == 0 || b.count() == 0,
                    "{:?} overlaps {:?}",
                    (a.start(), a.count()),
                    (b.start(), b.count())
                );
            }
        }
    }

    #[test]
    fn first_fit_reuses_freed_front() {
        let mut alloc = RegionAllocator::new(8);
        let first = alloc.try_allocate(3).unwrap();
        let second = alloc.try_allocate(4).unwrap();
        assert_eq!(first.start(), 0);
        assert_eq!(second.start(), 3);

        alloc.free(&first);
        let third = alloc.try_allocate(2).unwrap();
        assert_eq!(third.start(), 0);
        assert_eq!(spans(&alloc), vec![(0, 2), (3, 4)]);
    }

    #[test]
    fn oversized_request_never_fits() {
        let mut alloc = RegionAllocator::new(8);
        let _held = alloc.try_allocate(2).unwrap();

        assert_eq!(alloc.find_free(u64::MAX), None);
        assert!(alloc.try_allocate(u64::MAX - 1).is_none());
        assert_eq!(alloc.len(), 1);
        assert_eq!(grown_capacity(u64::MAX), u64::MAX);
    }

    #[test]
    fn exhausted_capacity_requires_growth() {
        let mut alloc = RegionAllocator::new(4);
        assert_eq!(alloc.try_allocate(3).unwrap().start(), 0);
        assert!(alloc.try_allocate(3).is_none());

        assert_eq!(alloc.grow(), 8);
        assert_eq!(alloc.try_allocate(3).unwrap().start(), 3);
    }

    #[test]
    fn adjacent_spans_are_not_blocked() {
        let mut alloc = RegionAllocator::new(6);
        alloc.try_allocate(3).unwrap();
        let b = alloc.try_allocate(3).unwrap();
        assert_eq!(b.start(), 3);
        assert!(alloc.find_free(1).is_none());
    }

    #[test]
    fn skips_past_several_blockers() {
        let mut alloc = RegionAllocator::new(16);
        let a = alloc.try_allocate(2).unwrap();
        let _b = alloc.try_allocate(2).unwrap();
        let c = alloc.try_allocate(2).unwrap();
        let _d = alloc.try_allocate(2).unwrap();
        alloc.free(&a);
        alloc.free(&c);

        // Holes of two at 0 and 4; three elements only fit after the last region.
        assert_eq!(alloc.find_free(3), Some(8));
        assert_eq!(alloc.find_free(2), Some(0));
    }

    #[test]
    fn zero_count_fits_at_origin() {
        let mut alloc = RegionAllocator::new(2);
        alloc.try_allocate(2).unwrap();
        let empty = alloc.try_allocate(0).unwrap();
        assert_eq!(empty.start(), 0);
        assert_eq!(alloc.regions()[0].count(), 0);
        assert_disjoint(&alloc);
    }

    #[test]
    fn growth_keeps_existing_placement() {
        let mut alloc = RegionAllocator::new(2);
        let a = alloc.try_allocate(2).unwrap();
        while alloc.try_allocate(5).is_none() {
            alloc.grow();
        }
        assert_eq!(alloc.capacity(), 8);
        assert_eq!((a.start(), a.count()), (0, 2));
        assert_eq!(spans(&alloc), vec![(0, 2), (2, 5)]);
    }

    #[test]
    fn clear_releases_everything() {
        let mut alloc = RegionAllocator::new(8);
        let a = alloc.try_allocate(4).unwrap();
        alloc.clear();
        assert!(a.is_released());
        assert!(alloc.is_empty());

        // Freeing after clear is harmless.
        alloc.free(&a);
        assert_eq!(alloc.try_allocate(8).unwrap().start(), 0);
    }

    #[test]
    fn interleaved_alloc_free_never_overlaps() {
        let mut alloc = RegionAllocator::new(4);
        let mut held = Vec::new();
        let mut seed = 0x2545_f491_4f6c_dd1du64;

        for step in 0..400 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            if step % 3 == 2 && !held.is_empty() {
                let region: Arc<Region> = held.swap_remove((seed as usize) % held.len());
                alloc.free(&region);
            } else {
                let count = 1 + seed % 9;
                let region = loop {
                    match alloc.try_allocate(count) {
                        Some(region) => break region,
                        None => {
                            alloc.grow();
                        }
                    }
                };
                held.push(region);
            }
            assert_disjoint(&alloc);
            assert!(alloc.regions().iter().all(|r| r.end() <= alloc.capacity()));
        }
    }
}
