use std::alloc::Layout;
use std::result;

use thiserror::Error;

/// Errors that can occur when the fallible allocation API needs to grow the allocator.
///
/// Only [`ScatterAllocator::try_allocate()`][1] reports these. The infallible methods turn the
/// same conditions into a panic or into the platform out-of-memory handler.
///
/// [1]: crate::ScatterAllocator::try_allocate
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A new pool would need more bytes than a single allocation may span.
    #[error("capacity overflow: a pool of {requested} elements of {type_name} cannot be laid out")]
    CapacityOverflow {
        /// The number of elements the new pool would have had to hold.
        requested: usize,

        /// The element type of the allocator.
        type_name: &'static str,
    },

    /// The memory allocator failed to provide storage for a new pool.
    #[error("out of memory: failed to allocate a pool with layout {layout:?}")]
    OutOfMemory {
        /// The layout of the pool storage that could not be allocated.
        layout: Layout,
    },
}

/// A specialized `Result` type for scatter allocator operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn capacity_overflow_message_names_type() {
        let error = Error::CapacityOverflow {
            requested: usize::MAX,
            type_name: "u64",
        };

        let message = error.to_string();
        assert!(message.contains("capacity overflow"));
        assert!(message.contains("u64"));
    }

    #[test]
    fn out_of_memory_message_names_layout() {
        let error = Error::OutOfMemory {
            layout: Layout::new::<u64>(),
        };

        assert!(error.to_string().starts_with("out of memory"));
    }
}
