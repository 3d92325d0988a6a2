use std::any::type_name;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::slice;

/// A non-owning view of a contiguous run of element slots inside one pool of a
/// [`ScatterAllocator`][1].
///
/// A span is what the allocator hands out for every contiguous region it produces. It does not
/// own the memory it points to: the storage belongs to the allocator and remains valid until the
/// region is passed back to [`deallocate()`][2] or the allocator itself is dropped.
///
/// # Storage lifetime versus object lifetime
///
/// The slots behind a span start out uninitialized. The allocator never constructs or destroys
/// elements, so it is up to the caller to initialize the slots (e.g. via [`write_with()`][3]),
/// to destroy the elements again (e.g. via [`drop_in_place()`][4]) and only then to return the
/// storage to the allocator. Every method that dereferences the span is `unsafe` because the
/// compiler cannot track either of these lifetimes.
///
/// # Examples
///
/// ```
/// use scatter_allocator::ScatterAllocator;
///
/// let mut allocator = ScatterAllocator::<u64>::new();
///
/// let span = allocator.allocate_one();
/// assert_eq!(span.len(), 1);
///
/// // SAFETY: The span was just allocated and nothing else refers to its storage.
/// unsafe {
///     span.write_with(|index| index as u64 + 100);
///     assert_eq!(span.as_slice(), &[100]);
///     span.drop_in_place();
/// }
///
/// allocator.deallocate(span);
/// ```
///
/// [1]: crate::ScatterAllocator
/// [2]: crate::ScatterAllocator::deallocate
/// [3]: Self::write_with
/// [4]: Self::drop_in_place
pub struct Span<T> {
    ptr: NonNull<T>,
    len: usize,

    /// Index of the pool that owns the storage. Sub-views inherit it, which is what allows the
    /// allocator to find the owner on deallocation without searching.
    pool_index: usize,
}

impl<T> Span<T> {
    #[must_use]
    pub(crate) fn new(ptr: NonNull<T>, len: usize, pool_index: usize) -> Self {
        Self {
            ptr,
            len,
            pool_index,
        }
    }

    #[must_use]
    pub(crate) fn pool_index(&self) -> usize {
        self.pool_index
    }

    /// The number of element slots in the span.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the span covers no element slots.
    ///
    /// The allocator never produces empty spans but callers can derive them via
    /// [`subspan()`][Self::subspan] or [`split_at()`][Self::split_at].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A pointer to the first element slot of the span.
    #[must_use]
    pub fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// A raw pointer to the first element slot of the span.
    #[must_use]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Creates a view of `len` slots starting `offset` slots into this span.
    ///
    /// # Examples
    ///
    /// ```
    /// use new_zealand::nz;
    /// use scatter_allocator::ScatterAllocator;
    ///
    /// let mut allocator = ScatterAllocator::<u32>::builder()
    ///     .min_pool_size(nz!(16))
    ///     .build();
    ///
    /// let span = allocator.allocate_iter(10).next().unwrap();
    /// let middle = span.subspan(3, 4);
    ///
    /// assert_eq!(middle.len(), 4);
    /// allocator.deallocate(middle);
    /// assert_eq!(allocator.hole_count(), 1);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the requested range does not fit inside this span.
    #[must_use]
    pub fn subspan(&self, offset: usize, len: usize) -> Self {
        let end = offset.checked_add(len);

        assert!(
            end.is_some_and(|end| end <= self.len),
            "subspan({offset}, {len}) is out of bounds of a span of {} {}",
            self.len,
            type_name::<T>()
        );

        // The span may outlive its storage, so this must not assume the allocation is still
        // live. Wrapping arithmetic is valid on any pointer.
        let ptr = NonNull::new(self.ptr.as_ptr().wrapping_add(offset))
            .expect("offset is within the span, so the pointer cannot wrap around to null");

        Self::new(ptr, len, self.pool_index)
    }

    /// Splits the span into two views at `mid`, the first holding `[0, mid)` and the second
    /// holding `[mid, len)`.
    ///
    /// # Panics
    ///
    /// Panics if `mid > len`.
    #[must_use]
    pub fn split_at(&self, mid: usize) -> (Self, Self) {
        let tail_len = self
            .len
            .checked_sub(mid)
            .unwrap_or_else(|| {
                panic!("split_at({mid}) is out of bounds of a span of {}", self.len)
            });

        (self.subspan(0, mid), self.subspan(mid, tail_len))
    }

    /// Views the slots as uninitialized memory.
    ///
    /// # Safety
    ///
    /// The span must still be allocated (not passed to `deallocate()` and the allocator not
    /// dropped) for the whole lifetime `'a`, and no other reference to any of these slots may
    /// exist during that lifetime.
    #[must_use]
    pub unsafe fn as_uninit_slice_mut<'a>(&self) -> &'a mut [MaybeUninit<T>] {
        // SAFETY: Forwarding guarantees from the caller. `MaybeUninit<T>` has the same layout
        // as `T` and imposes no initialization requirements.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<MaybeUninit<T>>(), self.len) }
    }

    /// Views the slots as initialized elements.
    ///
    /// # Safety
    ///
    /// The span must still be allocated for the whole lifetime `'a`, every slot must hold an
    /// initialized `T` and no exclusive reference to any of these slots may exist during that
    /// lifetime.
    #[must_use]
    pub unsafe fn as_slice<'a>(&self) -> &'a [T] {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Views the slots as exclusively borrowed initialized elements.
    ///
    /// # Safety
    ///
    /// The span must still be allocated for the whole lifetime `'a`, every slot must hold an
    /// initialized `T` and no other reference to any of these slots may exist during that
    /// lifetime.
    #[must_use]
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [T] {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Initializes every slot with the value returned by `f` for the slot's index in the span.
    ///
    /// Any previous contents of the slots are overwritten without being dropped.
    ///
    /// # Safety
    ///
    /// The span must still be allocated and no reference to any of its slots may exist while
    /// this method runs. If `f` panics, the slots initialized so far are not dropped.
    pub unsafe fn write_with(&self, mut f: impl FnMut(usize) -> T) {
        // SAFETY: Forwarding guarantees from the caller.
        let slots = unsafe { self.as_uninit_slice_mut() };

        for (index, slot) in slots.iter_mut().enumerate() {
            slot.write(f(index));
        }
    }

    /// Drops every element in the span, leaving the slots uninitialized.
    ///
    /// # Safety
    ///
    /// The span must still be allocated, every slot must hold an initialized `T` and no
    /// reference to any of these slots may exist while this method runs.
    pub unsafe fn drop_in_place(&self) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len));
        }
    }
}

// Derived impls would require `T: Clone`/`T: Copy`, which a view of raw storage does not need.
impl<T> Clone for Span<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Span<T> {}

impl<T> PartialEq for Span<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.len == other.len && self.pool_index == other.pool_index
    }
}

impl<T> Eq for Span<T> {}

impl<T> fmt::Debug for Span<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("pool_index", &self.pool_index)
            .finish()
    }
}
