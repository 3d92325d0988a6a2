use std::alloc::handle_alloc_error;
use std::any::type_name;
use std::num::NonZero;
use std::{fmt, thread};

use new_zealand::nz;
use tracing::{debug, trace};

use crate::{DropPolicy, Error, Pool, Result, ScatterAllocation, ScatterAllocatorBuilder, Span};

/// A typed allocator of raw storage that fulfills each request with one or more disjoint spans.
///
/// Unlike a general-purpose allocator, a request for `count` elements is not guaranteed to be
/// served by one contiguous block. The allocator assembles the requested amount from whatever
/// free storage it already has and hands it back one contiguous [`Span`] at a time, in this
/// order:
///
/// 1. Regions that were previously deallocated ("holes"), oldest first. Holes of earlier pools
///    come before holes of later pools. A hole larger than the rest of the request is only
///    partially consumed and keeps its place in line.
/// 2. Never-used storage at the end ("tail") of existing pools, in pool creation order.
/// 3. New pools, each sized to the larger of the configured minimum pool size and the rest of
///    the request, so the request always finishes in the first new pool.
///
/// Deallocated regions are never merged with each other or with tail storage, even when they
/// touch. Pools are never released individually - all storage is released when the allocator
/// is dropped.
///
/// # Raw storage only
///
/// The allocator never constructs or destroys elements. Callers initialize the slots of the
/// spans they receive, destroy the elements again when done and then pass the spans back to
/// [`deallocate()`][1]. See [`Span`] for the access methods.
///
/// # Example
///
/// ```rust
/// use new_zealand::nz;
/// use scatter_allocator::ScatterAllocator;
///
/// let mut allocator = ScatterAllocator::<u32>::builder()
///     .min_pool_size(nz!(16))
///     .build();
///
/// let mut first = None;
/// allocator.allocate(10, |span| first = Some(span));
/// let first = first.unwrap();
///
/// // Two touching regions are returned separately and stay separate.
/// allocator.deallocate(first.subspan(2, 2));
/// allocator.deallocate(first.subspan(4, 2));
///
/// let mut sizes = Vec::new();
/// allocator.allocate(20, |span| sizes.push(span.len()));
///
/// // Two holes, the rest of the first pool, then a second pool.
/// assert_eq!(sizes, [2, 2, 6, 10]);
/// ```
///
/// # Thread safety
///
/// The allocator is thread-mobile (`Send` if `T` is) but not thread-safe (not `Sync`). Wrap it
/// in a mutex if it needs to be shared.
///
/// [1]: Self::deallocate
pub struct ScatterAllocator<T> {
    /// The pools that provide the storage of the allocator, in creation order.
    ///
    /// Pools are only ever appended. We cannot remove or resize a pool because callers may hold
    /// spans pointing into any of them.
    pools: Vec<Pool<T>>,

    /// Index of the first pool whose tail is not exhausted. Tails never grow back, so this only
    /// ever moves forward. Equal to `pools.len()` if every tail is exhausted.
    first_pool_with_tail: usize,

    /// Total number of holes across all pools, so allocation can skip the hole scan.
    hole_count: usize,

    /// Number of elements handed out and not yet deallocated.
    live_len: usize,

    min_pool_size: NonZero<usize>,

    drop_policy: DropPolicy,
}

/// Pools are created with room for at least this many elements unless configured otherwise.
#[cfg(not(miri))]
pub(crate) const DEFAULT_MIN_POOL_SIZE: NonZero<usize> = nz!(1024);

// Under Miri, we use a smaller pool size because Miri test runtime scales by memory usage.
#[cfg(miri)]
pub(crate) const DEFAULT_MIN_POOL_SIZE: NonZero<usize> = nz!(32);

impl<T> ScatterAllocator<T> {
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[must_use]
    pub(crate) fn new_inner(min_pool_size: NonZero<usize>, drop_policy: DropPolicy) -> Self {
        assert!(
            size_of::<T>() > 0,
            "ScatterAllocator must have non-zero item size"
        );

        Self {
            pools: Vec::new(),
            first_pool_with_tail: 0,
            hole_count: 0,
            live_len: 0,
            min_pool_size,
            drop_policy,
        }
    }

    /// Creates a new [`ScatterAllocator`] with the default configuration.
    ///
    /// The allocator starts without any pools and creates them as requests arrive.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<i32>::new();
    /// assert_eq!(allocator.pool_count(), 0);
    ///
    /// let mut total = 0;
    /// allocator.allocate(123, |span| total += span.len());
    /// assert_eq!(total, 123);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`ScatterAllocator`].
    ///
    /// Use this when you want to customize the allocator configuration beyond the defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use new_zealand::nz;
    /// use scatter_allocator::{DropPolicy, ScatterAllocator};
    ///
    /// let allocator = ScatterAllocator::<u32>::builder()
    ///     .min_pool_size(nz!(16))
    ///     .drop_policy(DropPolicy::MustNotDropAllocations)
    ///     .build();
    ///
    /// assert_eq!(allocator.min_pool_size().get(), 16);
    /// ```
    pub fn builder() -> ScatterAllocatorBuilder<T> {
        ScatterAllocatorBuilder::new()
    }

    /// Allocates storage for `count` elements, calling `on_span` once for every contiguous
    /// region that makes up the allocation.
    ///
    /// The regions are produced in the order described on [`ScatterAllocator`] and their lengths
    /// add up to exactly `count`. `on_span` is called for each region before the next one is
    /// computed. A `count` of zero does not call `on_span` at all.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<u64>::new();
    ///
    /// let mut spans = Vec::new();
    /// allocator.allocate(100, |span| spans.push(span));
    ///
    /// assert_eq!(spans.iter().map(|s| s.len()).sum::<usize>(), 100);
    /// assert_eq!(allocator.len(), 100);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if a new pool would exceed the maximum size of a single allocation. If the memory
    /// allocator fails to provide storage for a new pool, the global allocation error handler
    /// is invoked. Use [`try_allocate()`][1] to handle these conditions instead.
    ///
    /// [1]: Self::try_allocate
    pub fn allocate(&mut self, count: usize, mut on_span: impl FnMut(Span<T>)) {
        for span in self.allocate_iter(count) {
            on_span(span);
        }
    }

    /// Allocates storage for `count` elements like [`allocate()`][1] does but reports failure to
    /// create a new pool as an error instead of panicking.
    ///
    /// Spans delivered to `on_span` before the failure remain allocated and are the caller's to
    /// deallocate. The allocator remains fully usable after an error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scatter_allocator::{Error, ScatterAllocator};
    ///
    /// let mut allocator = ScatterAllocator::<u64>::new();
    ///
    /// let result = allocator.try_allocate(usize::MAX, |_| {});
    /// assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
    ///
    /// allocator.try_allocate(10, |_| {}).unwrap();
    /// assert_eq!(allocator.len(), 10);
    /// ```
    ///
    /// [1]: Self::allocate
    pub fn try_allocate(&mut self, count: usize, mut on_span: impl FnMut(Span<T>)) -> Result<()> {
        let mut remaining = count;

        while let Some(remaining_nz) = NonZero::new(remaining) {
            let span = self.next_span(remaining_nz)?;

            remaining = remaining
                .checked_sub(span.len())
                .expect("spans are never longer than the remaining request");

            on_span(span);
        }

        Ok(())
    }

    /// Allocates storage for `count` elements, returning an iterator that produces the
    /// contiguous regions of the allocation one by one.
    ///
    /// Each region is only computed (and only taken out of the allocator) when the iterator is
    /// advanced. If the iterator is dropped early, only the regions it has already produced
    /// are allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use new_zealand::nz;
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<u8>::builder()
    ///     .min_pool_size(nz!(8))
    ///     .build();
    ///
    /// let lengths: Vec<usize> = allocator.allocate_iter(20).map(|span| span.len()).collect();
    ///
    /// // The first pool is sized for the whole request.
    /// assert_eq!(lengths, [20]);
    /// ```
    ///
    /// # Panics
    ///
    /// Advancing the iterator panics or invokes the global allocation error handler under the
    /// same conditions as [`allocate()`][1].
    ///
    /// [1]: Self::allocate
    pub fn allocate_iter(&mut self, count: usize) -> ScatterAllocation<'_, T> {
        ScatterAllocation::new(self, count)
    }

    /// Allocates storage for a single element.
    ///
    /// A single element is never scattered, so this always returns a span of length 1.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<String>::new();
    ///
    /// let span = allocator.allocate_one();
    /// assert_eq!(span.len(), 1);
    ///
    /// // SAFETY: The slot was just allocated and nothing else refers to it.
    /// unsafe {
    ///     span.as_ptr().write("hello".to_string());
    ///     assert_eq!(span.as_slice()[0], "hello");
    ///     span.drop_in_place();
    /// }
    ///
    /// allocator.deallocate(span);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics or invokes the global allocation error handler under the same conditions as
    /// [`allocate()`][1].
    ///
    /// [1]: Self::allocate
    #[must_use]
    pub fn allocate_one(&mut self) -> Span<T> {
        let span = self
            .next_span(nz!(1))
            .unwrap_or_else(|error| raise(error));

        debug_assert_eq!(span.len(), 1);

        span
    }

    /// Returns a region of previously allocated storage to the allocator.
    ///
    /// The region becomes the newest hole of the pool it came from and will be reused by later
    /// requests once all older holes are used up. It is not merged with neighboring free storage.
    /// Any span derived from an allocation (e.g. via [`Span::subspan()`]) may be returned, as
    /// long as no part of it has already been returned. Empty spans are ignored.
    ///
    /// The allocator does not destroy the elements in the region - the caller must do that
    /// first if the slots hold initialized values that need dropping.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<u32>::new();
    ///
    /// let span = allocator.allocate_one();
    /// assert_eq!(allocator.len(), 1);
    ///
    /// allocator.deallocate(span);
    /// assert_eq!(allocator.len(), 0);
    /// assert_eq!(allocator.hole_count(), 1);
    ///
    /// // The returned slot is reused before any never-used storage.
    /// assert_eq!(allocator.allocate_one(), span);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the span was not allocated by this allocator, or if more storage is returned than
    /// is currently allocated. Deallocating the same storage twice is otherwise not detected and
    /// leads to the storage being handed out twice.
    pub fn deallocate(&mut self, span: Span<T>) {
        if span.is_empty() {
            return;
        }

        let pool_index = span.pool_index();

        let Some(pool) = self.pools.get_mut(pool_index) else {
            panic!(
                "span {span:?} was not allocated by this allocator of {}",
                type_name::<T>()
            )
        };

        let region = pool.region_of(&span);

        self.live_len = self.live_len.checked_sub(region.len).unwrap_or_else(|| {
            panic!(
                "deallocated more storage than is allocated in allocator of {} - was a span deallocated twice?",
                type_name::<T>()
            )
        });

        pool.push_hole(region);

        self.hole_count = self
            .hole_count
            .checked_add(1)
            .expect("every hole covers at least one slot, so there cannot be more holes than slots");

        trace!(
            pool_index,
            offset = region.offset,
            len = region.len,
            "deallocated span"
        );
    }

    /// The number of elements currently allocated, i.e. handed out and not yet deallocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<u16>::new();
    /// assert_eq!(allocator.len(), 0);
    ///
    /// allocator.allocate(5, |_| {});
    /// assert_eq!(allocator.len(), 5);
    /// ```
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_len
    }

    /// Whether no storage is currently allocated.
    ///
    /// An empty allocator may still be holding pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_len == 0
    }

    /// The total number of element slots across all pools, whether allocated or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pools
            .iter()
            .map(Pool::capacity)
            .fold(0, |total, capacity| {
                total
                    .checked_add(capacity)
                    .expect("pools cannot hold more slots than virtual memory can fit")
            })
    }

    /// The number of element slots that can be allocated without creating a new pool.
    ///
    /// This counts both holes and never-used tail storage. Because holes are not merged, a
    /// request of this size may still be split into many spans.
    ///
    /// # Example
    ///
    /// ```rust
    /// use new_zealand::nz;
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<u32>::builder()
    ///     .min_pool_size(nz!(16))
    ///     .build();
    ///
    /// let span = allocator.allocate_one();
    /// assert_eq!(allocator.free_len(), 15);
    ///
    /// allocator.deallocate(span);
    /// assert_eq!(allocator.free_len(), 16);
    /// ```
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.pools.iter().fold(0, |total, pool| {
            total
                .checked_add(pool.hole_len())
                .and_then(|total| total.checked_add(pool.tail_len()))
                .expect("pools cannot hold more slots than virtual memory can fit")
        })
    }

    /// The number of pools the allocator has created so far.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// The number of deallocated regions waiting to be reused.
    #[must_use]
    pub fn hole_count(&self) -> usize {
        self.hole_count
    }

    /// The minimum number of elements each new pool is created with.
    #[must_use]
    pub fn min_pool_size(&self) -> NonZero<usize> {
        self.min_pool_size
    }

    /// What happens if the allocator is dropped while storage is still allocated.
    #[must_use]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// Takes the next contiguous region of at most `remaining` elements out of the allocator,
    /// creating a new pool if there is no free storage left.
    pub(crate) fn next_span(&mut self, remaining: NonZero<usize>) -> Result<Span<T>> {
        let span = if let Some(span) = self.take_from_holes(remaining.get()) {
            span
        } else if let Some(span) = self.take_from_tails(remaining.get()) {
            span
        } else {
            self.take_from_new_pool(remaining)?
        };

        self.live_len = self
            .live_len
            .checked_add(span.len())
            .expect("allocated storage cannot exceed virtual memory");

        Ok(span)
    }

    fn take_from_holes(&mut self, max_len: usize) -> Option<Span<T>> {
        if self.hole_count == 0 {
            return None;
        }

        for (pool_index, pool) in self.pools.iter_mut().enumerate() {
            let holes_before = pool.hole_count();

            let Some(region) = pool.take_from_oldest_hole(max_len) else {
                continue;
            };

            if pool.hole_count() < holes_before {
                self.hole_count = self
                    .hole_count
                    .checked_sub(1)
                    .expect("a hole was just removed, so the count must be non-zero");
            }

            trace!(
                pool_index,
                offset = region.offset,
                len = region.len,
                "allocated from hole"
            );

            return Some(pool.span(region, pool_index));
        }

        panic!(
            "hole count {} is non-zero but no pool has any holes in allocator of {}",
            self.hole_count,
            type_name::<T>()
        );
    }

    fn take_from_tails(&mut self, max_len: usize) -> Option<Span<T>> {
        while let Some(pool) = self.pools.get_mut(self.first_pool_with_tail) {
            if let Some(region) = pool.take_from_tail(max_len) {
                trace!(
                    pool_index = self.first_pool_with_tail,
                    offset = region.offset,
                    len = region.len,
                    "allocated from tail"
                );

                return Some(pool.span(region, self.first_pool_with_tail));
            }

            self.first_pool_with_tail = self
                .first_pool_with_tail
                .checked_add(1)
                .expect("guarded by the index pointing at an existing pool");
        }

        None
    }

    fn take_from_new_pool(&mut self, remaining: NonZero<usize>) -> Result<Span<T>> {
        debug_assert_eq!(self.first_pool_with_tail, self.pools.len());

        let capacity = remaining.max(self.min_pool_size);
        let pool = Pool::try_new(capacity)?;

        let pool_index = self.pools.len();
        self.pools.push(pool);

        debug!(
            pool_index,
            capacity = capacity.get(),
            item_type = type_name::<T>(),
            "created pool"
        );

        let span = self
            .take_from_tails(remaining.get())
            .expect("a new pool is always at least as large as the remaining request");

        debug_assert_eq!(span.len(), remaining.get());

        Ok(span)
    }

    /// Verifies the bookkeeping of the allocator and of every pool in it.
    ///
    /// This walks every hole of every pool, so it only runs where a test asks for it.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        let mut observed_hole_count: usize = 0;

        for (pool_index, pool) in self.pools.iter().enumerate() {
            pool.integrity_check();

            observed_hole_count = observed_hole_count
                .checked_add(pool.hole_count())
                .expect("cannot have more holes than slots");

            if pool_index < self.first_pool_with_tail {
                assert!(
                    pool.tail_len() == 0,
                    "pool {pool_index} has tail storage left but is before the first pool with tail {} in allocator of {}",
                    self.first_pool_with_tail,
                    type_name::<T>()
                );
            }
        }

        assert!(
            self.hole_count == observed_hole_count,
            "self.hole_count {} does not match the observed hole count {} in allocator of {}",
            self.hole_count,
            observed_hole_count,
            type_name::<T>()
        );

        assert!(
            self.live_len.checked_add(self.free_len()) == Some(self.capacity()),
            "live {} plus free {} does not add up to capacity {} in allocator of {}",
            self.live_len,
            self.free_len(),
            self.capacity(),
            type_name::<T>()
        );
    }
}

/// Turns a growth failure into a panic or the platform out-of-memory path.
#[cfg_attr(test, mutants::skip)] // Diverges either way.
pub(crate) fn raise(error: Error) -> ! {
    match error {
        Error::OutOfMemory { layout } => handle_alloc_error(layout),
        error @ Error::CapacityOverflow { .. } => panic!("{error}"),
    }
}

impl<T> Default for ScatterAllocator<T> {
    /// Creates a new [`ScatterAllocator`] with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ScatterAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScatterAllocator")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("pool_count", &self.pools.len())
            .field("capacity", &self.capacity())
            .field("len", &self.live_len)
            .field("hole_count", &self.hole_count)
            .field("min_pool_size", &self.min_pool_size)
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for ScatterAllocator<T> {
    fn drop(&mut self) {
        let live_len = self.live_len;

        // Release the storage first, so nothing leaks even if we are about to panic.
        self.pools.clear();

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotDropAllocations && !thread::panicking() {
            assert!(
                live_len == 0,
                "dropped an allocator of {} with {live_len} elements still allocated with a policy that says all storage must be deallocated first",
                type_name::<T>()
            );
        }
    }
}
