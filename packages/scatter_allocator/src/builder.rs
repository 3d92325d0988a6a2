use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{DEFAULT_MIN_POOL_SIZE, DropPolicy, ScatterAllocator};

/// Builder for creating an instance of [`ScatterAllocator`].
///
/// You only need to use this builder if you want to customize the allocator configuration.
/// The default configuration used by [`ScatterAllocator::new()`][1] is sufficient for most use
/// cases.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use scatter_allocator::{DropPolicy, ScatterAllocator};
///
/// let allocator = ScatterAllocator::<u32>::builder()
///     .min_pool_size(nz!(256))
///     .drop_policy(DropPolicy::MayDropAllocations)
///     .build();
/// ```
///
/// [1]: ScatterAllocator::new
#[must_use]
pub struct ScatterAllocatorBuilder<T> {
    min_pool_size: NonZero<usize>,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for ScatterAllocatorBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScatterAllocatorBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("min_pool_size", &self.min_pool_size)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T> ScatterAllocatorBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            min_pool_size: DEFAULT_MIN_POOL_SIZE,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the minimum number of elements each new pool is created with.
    ///
    /// This is a floor, not a cap: a request that does not fit into the free storage of existing
    /// pools gets a new pool large enough to hold the entire rest of the request. The default
    /// is 1024 elements.
    ///
    /// # Examples
    ///
    /// ```
    /// use new_zealand::nz;
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<u64>::builder()
    ///     .min_pool_size(nz!(16))
    ///     .build();
    ///
    /// allocator.allocate(4, |_| {});
    /// assert_eq!(allocator.capacity(), 16);
    ///
    /// allocator.allocate(40, |_| {});
    /// assert_eq!(allocator.capacity(), 16 + 28);
    /// ```
    pub fn min_pool_size(mut self, min_pool_size: NonZero<usize>) -> Self {
        self.min_pool_size = min_pool_size;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the allocator. This governs how to treat storage
    /// that is still allocated when the allocator is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use scatter_allocator::{DropPolicy, ScatterAllocator};
    ///
    /// let allocator = ScatterAllocator::<u32>::builder()
    ///     .drop_policy(DropPolicy::MustNotDropAllocations)
    ///     .build();
    /// ```
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the scatter allocator with the specified configuration.
    ///
    /// No storage is allocated until the first request arrives.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    ///
    /// # Examples
    ///
    /// ```
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let allocator = ScatterAllocator::<u32>::builder().build();
    /// assert_eq!(allocator.pool_count(), 0);
    /// ```
    #[must_use]
    pub fn build(self) -> ScatterAllocator<T> {
        ScatterAllocator::new_inner(self.min_pool_size, self.drop_policy)
    }
}
