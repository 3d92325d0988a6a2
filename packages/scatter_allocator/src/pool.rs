use std::alloc::{Layout, alloc, dealloc};
use std::any::type_name;
use std::collections::VecDeque;
use std::num::NonZero;
use std::ptr::NonNull;

use num_integer::Integer;

use crate::{Error, Result, Span};

/// This is the backing storage of a `ScatterAllocator`: one contiguous heap block with room for
/// `capacity` elements of `T`, none of which are ever initialized by the pool itself.
///
/// Storage is handed out in two ways:
///
/// * From the tail - the part of the block that has never been handed out. The tail only ever
///   shrinks; storage that is returned does not go back to the tail even if it borders on it.
/// * From holes - regions that were handed out and later returned. Holes are kept in the order
///   they were returned and are never merged with each other, even if they touch.
///
/// The pool does not know its own index in the allocator, so callers supply it whenever a
/// [`Span`] needs to be created.
#[derive(Debug)]
pub(crate) struct Pool<T> {
    first_slot_ptr: NonNull<T>,

    capacity: NonZero<usize>,

    /// Offset of the first slot that has never been handed out. Everything in `[0, tail)` is
    /// either allocated or registered as a hole.
    tail: usize,

    /// Returned regions, oldest first. Allocation consumes from the front; deallocation
    /// appends to the back.
    holes: VecDeque<Hole>,

    /// Sum of the lengths of all holes, so the allocator can report free space cheaply.
    hole_len: usize,
}

/// A region of a pool that was allocated and then returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Hole {
    offset: usize,
    len: usize,
}

impl Hole {
    #[cfg(test)]
    #[must_use]
    fn end(&self) -> usize {
        self.offset
            .checked_add(self.len)
            .expect("guarded by hole being inside a pool, which cannot exceed virtual memory")
    }
}

/// A region taken out of a pool, expressed as offsets. The allocator turns it into a [`Span`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Region {
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl<T> Pool<T> {
    /// Allocates the storage for a new pool.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub(crate) fn try_new(capacity: NonZero<usize>) -> Result<Self> {
        assert!(size_of::<T>() > 0, "Pool must have non-zero item size");

        let layout = Self::layout(capacity)?;

        // SAFETY: The layout is valid for the target type (calculated by `Layout::array`) and is
        // not zero-sized (guarded by the capacity type and the assertion above).
        let ptr = NonNull::new(unsafe { alloc(layout) }.cast::<T>())
            .ok_or(Error::OutOfMemory { layout })?;

        Ok(Self {
            first_slot_ptr: ptr,
            capacity,
            tail: 0,
            holes: VecDeque::new(),
            hole_len: 0,
        })
    }

    fn layout(capacity: NonZero<usize>) -> Result<Layout> {
        Layout::array::<T>(capacity.get()).map_err(|_overflow| Error::CapacityOverflow {
            requested: capacity.get(),
            type_name: type_name::<T>(),
        })
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Number of slots that have never been handed out.
    #[must_use]
    pub(crate) fn tail_len(&self) -> usize {
        self.capacity
            .get()
            .checked_sub(self.tail)
            .expect("tail can never move beyond capacity")
    }

    #[must_use]
    pub(crate) fn hole_count(&self) -> usize {
        self.holes.len()
    }

    #[must_use]
    pub(crate) fn hole_len(&self) -> usize {
        self.hole_len
    }

    /// Takes up to `max_len` slots from the oldest hole.
    ///
    /// If the hole is larger than requested, it keeps its place in the registry and shrinks from
    /// the front. Returns `None` if there are no holes.
    pub(crate) fn take_from_oldest_hole(&mut self, max_len: usize) -> Option<Region> {
        let hole = self.holes.front_mut()?;

        let region = if hole.len <= max_len {
            let region = Region {
                offset: hole.offset,
                len: hole.len,
            };

            self.holes.pop_front();
            region
        } else {
            let region = Region {
                offset: hole.offset,
                len: max_len,
            };

            hole.offset = hole
                .offset
                .checked_add(max_len)
                .expect("guarded by hole being larger than max_len");
            hole.len = hole
                .len
                .checked_sub(max_len)
                .expect("guarded by hole being larger than max_len");

            region
        };

        self.hole_len = self
            .hole_len
            .checked_sub(region.len)
            .expect("hole_len is the sum of all hole lengths, so it cannot underflow");

        Some(region)
    }

    /// Takes up to `max_len` slots from the tail. Returns `None` if the tail is exhausted.
    pub(crate) fn take_from_tail(&mut self, max_len: usize) -> Option<Region> {
        let len = self.tail_len().min(max_len);

        if len == 0 {
            return None;
        }

        let region = Region {
            offset: self.tail,
            len,
        };

        self.tail = self
            .tail
            .checked_add(len)
            .expect("guarded by len being limited to the remaining tail");

        Some(region)
    }

    /// Registers a returned region as the newest hole.
    pub(crate) fn push_hole(&mut self, region: Region) {
        debug_assert!(region.len > 0, "empty regions must not become holes");

        self.holes.push_back(Hole {
            offset: region.offset,
            len: region.len,
        });

        self.hole_len = self
            .hole_len
            .checked_add(region.len)
            .expect("holes are inside the pool, so their total length cannot overflow");

        // Only what is cheap to verify. Overlap with older holes is left to `integrity_check()`.
        debug_assert!(
            self.hole_len <= self.tail,
            "holes cover {} slots but only {} were ever handed out in pool of {}",
            self.hole_len,
            self.tail,
            type_name::<T>()
        );
    }

    /// Creates a span over a region previously taken out of this pool.
    #[must_use]
    pub(crate) fn span(&self, region: Region, pool_index: usize) -> Span<T> {
        debug_assert!(
            region
                .offset
                .checked_add(region.len)
                .is_some_and(|end| end <= self.tail),
            "region must be inside the handed-out part of the pool"
        );

        // SAFETY: Regions are only produced from offsets inside the pool's storage, so the
        // resulting pointer stays within (or one past the end of) the same allocation.
        let ptr = unsafe { self.first_slot_ptr.add(region.offset) };

        Span::new(ptr, region.len, pool_index)
    }

    /// Translates a span back into a region of this pool.
    ///
    /// # Panics
    ///
    /// Panics if the span does not lie inside the handed-out part of this pool.
    #[must_use]
    pub(crate) fn region_of(&self, span: &Span<T>) -> Region {
        let byte_offset = span
            .as_ptr()
            .addr()
            .checked_sub(self.first_slot_ptr.as_ptr().addr())
            .unwrap_or_else(|| {
                panic!(
                    "span {span:?} starts before the storage of the pool it claims to belong to in allocator of {}",
                    type_name::<T>()
                )
            });

        let (offset, misalignment) = byte_offset.div_rem(&size_of::<T>());

        assert!(
            misalignment == 0,
            "span {span:?} does not start on an element boundary in allocator of {}",
            type_name::<T>()
        );

        assert!(
            offset
                .checked_add(span.len())
                .is_some_and(|end| end <= self.tail),
            "span {span:?} is not inside the allocated storage of its pool in allocator of {}",
            type_name::<T>()
        );

        Region {
            offset,
            len: span.len(),
        }
    }

    /// Verifies every invariant of the pool, including that no two holes overlap.
    ///
    /// This sorts a copy of the hole registry, so it is too expensive for the hot paths.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        assert!(
            self.tail <= self.capacity.get(),
            "tail {} is beyond capacity {} in pool of {}",
            self.tail,
            self.capacity,
            type_name::<T>()
        );

        let mut observed_hole_len: usize = 0;

        for hole in &self.holes {
            assert!(
                hole.len > 0,
                "empty hole at offset {} in pool of {}",
                hole.offset,
                type_name::<T>()
            );

            assert!(
                hole.end() <= self.tail,
                "hole {hole:?} extends beyond tail {} in pool of {}",
                self.tail,
                type_name::<T>()
            );

            observed_hole_len = observed_hole_len
                .checked_add(hole.len)
                .expect("holes are inside the pool, so their total length cannot overflow");
        }

        assert!(
            self.hole_len == observed_hole_len,
            "self.hole_len {} does not match the observed hole length {} in pool of {}",
            self.hole_len,
            observed_hole_len,
            type_name::<T>()
        );

        let mut sorted: Vec<Hole> = self.holes.iter().copied().collect();
        sorted.sort_unstable_by_key(|hole| hole.offset);

        for pair in sorted.windows(2) {
            let [earlier, later] = pair else {
                unreachable!("windows(2) always yields pairs");
            };

            assert!(
                earlier.end() <= later.offset,
                "hole {earlier:?} overlaps hole {later:?} in pool of {} - was the same storage deallocated twice?",
                type_name::<T>()
            );
        }
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        let layout = Self::layout(self.capacity)
            .expect("the layout was successfully calculated when the pool was created");

        // SAFETY: The layout must match between alloc and dealloc. It does. The pool never
        // constructed any element, so there is nothing to drop in the storage itself.
        unsafe {
            dealloc(self.first_slot_ptr.as_ptr().cast(), layout);
        }
    }
}

// SAFETY: Yes, there are raw pointers involved here but nothing inherently non-thread-mobile
// about it, so as long as T itself can move between threads, the pool can do so, too.
unsafe impl<T: Send> Send for Pool<T> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    fn region(offset: usize, len: usize) -> Region {
        Region { offset, len }
    }

    #[test]
    fn smoke_test() {
        let mut pool = Pool::<u32>::try_new(nz!(16)).unwrap();

        assert_eq!(pool.capacity(), 16);
        assert_eq!(pool.tail_len(), 16);
        assert_eq!(pool.hole_count(), 0);

        assert_eq!(pool.take_from_tail(10), Some(region(0, 10)));
        assert_eq!(pool.tail_len(), 6);

        assert_eq!(pool.take_from_tail(10), Some(region(10, 6)));
        assert_eq!(pool.tail_len(), 0);

        assert_eq!(pool.take_from_tail(1), None);
    }

    #[test]
    fn holes_are_fifo() {
        let mut pool = Pool::<u32>::try_new(nz!(16)).unwrap();
        _ = pool.take_from_tail(16);

        pool.push_hole(region(8, 2));
        pool.push_hole(region(2, 3));

        assert_eq!(pool.hole_count(), 2);
        assert_eq!(pool.hole_len(), 5);

        assert_eq!(pool.take_from_oldest_hole(100), Some(region(8, 2)));
        assert_eq!(pool.take_from_oldest_hole(100), Some(region(2, 3)));
        assert_eq!(pool.take_from_oldest_hole(100), None);
        assert_eq!(pool.hole_len(), 0);
    }

    #[test]
    fn partial_hole_keeps_position() {
        let mut pool = Pool::<u32>::try_new(nz!(16)).unwrap();
        _ = pool.take_from_tail(16);

        pool.push_hole(region(0, 5));
        pool.push_hole(region(10, 2));

        assert_eq!(pool.take_from_oldest_hole(3), Some(region(0, 3)));
        assert_eq!(pool.hole_count(), 2);
        assert_eq!(pool.hole_len(), 4);

        // The remainder of the first hole is still the oldest.
        assert_eq!(pool.take_from_oldest_hole(100), Some(region(3, 2)));
        assert_eq!(pool.take_from_oldest_hole(100), Some(region(10, 2)));
    }

    #[test]
    fn adjacent_holes_are_not_merged() {
        let mut pool = Pool::<u32>::try_new(nz!(16)).unwrap();
        _ = pool.take_from_tail(10);

        pool.push_hole(region(2, 2));
        pool.push_hole(region(4, 2));

        assert_eq!(pool.take_from_oldest_hole(4), Some(region(2, 2)));
        assert_eq!(pool.take_from_oldest_hole(2), Some(region(4, 2)));
    }

    #[test]
    fn returned_storage_does_not_go_back_to_tail() {
        let mut pool = Pool::<u32>::try_new(nz!(8)).unwrap();
        _ = pool.take_from_tail(4);

        pool.push_hole(region(2, 2));

        assert_eq!(pool.tail_len(), 4);
        assert_eq!(pool.take_from_tail(8), Some(region(4, 4)));
        assert_eq!(pool.take_from_oldest_hole(8), Some(region(2, 2)));
    }

    #[test]
    fn span_and_region_round_trip() {
        let mut pool = Pool::<u64>::try_new(nz!(8)).unwrap();
        let taken = pool.take_from_tail(5).unwrap();

        let span = pool.span(taken, 3);
        assert_eq!(span.len(), 5);
        assert_eq!(span.pool_index(), 3);

        assert_eq!(pool.region_of(&span.subspan(1, 2)), region(1, 2));
    }

    #[test]
    #[should_panic]
    fn region_of_span_beyond_tail_panics() {
        let mut pool = Pool::<u64>::try_new(nz!(8)).unwrap();
        let taken = pool.take_from_tail(8).unwrap();
        let span = pool.span(taken, 0);

        let mut other = Pool::<u64>::try_new(nz!(8)).unwrap();
        _ = other.take_from_tail(2);

        // Whichever way the two blocks are placed in memory, this span is not inside the
        // handed-out part of the other pool.
        _ = other.region_of(&span);
    }

    #[test]
    #[should_panic]
    fn overlapping_holes_fail_integrity_check() {
        let mut pool = Pool::<u32>::try_new(nz!(16)).unwrap();
        _ = pool.take_from_tail(10);

        pool.push_hole(region(2, 4));
        pool.push_hole(region(5, 1));

        pool.integrity_check();
    }

    #[test]
    fn many_holes_stay_consistent() {
        let mut pool = Pool::<u32>::try_new(nz!(4096)).unwrap();
        _ = pool.take_from_tail(4096);

        for offset in (0..4096).step_by(2) {
            pool.push_hole(region(offset, 1));
        }

        assert_eq!(pool.hole_count(), 2048);
        assert_eq!(pool.hole_len(), 2048);
        pool.integrity_check();
    }

    #[test]
    fn capacity_overflow_is_error() {
        let result = Pool::<u64>::try_new(NonZero::new(usize::MAX).unwrap());

        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
    }

    #[test]
    #[should_panic]
    fn zst_is_panic() {
        drop(Pool::<()>::try_new(nz!(3)));
    }
}
