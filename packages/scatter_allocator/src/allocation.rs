use std::iter::FusedIterator;
use std::num::NonZero;

use crate::{ScatterAllocator, Span, raise};

/// A scattered allocation in progress, producing one [`Span`] per contiguous region.
///
/// Created by [`ScatterAllocator::allocate_iter()`]. Each call to `next()` takes the next region
/// out of the allocator, so the allocator is exclusively borrowed for as long as the iterator
/// exists. The iterator is finite and single-pass; dropping it early leaves the rest of the
/// request unallocated.
#[derive(Debug)]
#[must_use = "storage is only allocated as the iterator is advanced"]
pub struct ScatterAllocation<'a, T> {
    allocator: &'a mut ScatterAllocator<T>,
    remaining: usize,
}

impl<'a, T> ScatterAllocation<'a, T> {
    pub(crate) fn new(allocator: &'a mut ScatterAllocator<T>, count: usize) -> Self {
        Self {
            allocator,
            remaining: count,
        }
    }

    /// The number of elements of the request that have not been produced yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<T> Iterator for ScatterAllocation<'_, T> {
    type Item = Span<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = NonZero::new(self.remaining)?;

        let span = self
            .allocator
            .next_span(remaining)
            .unwrap_or_else(|error| raise(error));

        self.remaining = self
            .remaining
            .checked_sub(span.len())
            .expect("spans are never longer than the remaining request");

        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        // Every region holds at least one element, so there can be no more regions than that.
        (usize::from(self.remaining > 0), Some(self.remaining))
    }
}

impl<T> FusedIterator for ScatterAllocation<'_, T> {}
