#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A typed pool allocator that fulfills each request with one or more disjoint spans of raw
//! storage instead of a single contiguous block.
//!
//! This crate provides [`ScatterAllocator`], which owns a growing set of fixed-size pools of
//! uninitialized storage for elements of one type. A request for `count` elements is assembled
//! from whatever free storage exists, delivered one contiguous [`Span`] at a time:
//!
//! 1. previously deallocated regions ("holes"), oldest first, pool by pool;
//! 2. never-used storage at the end of existing pools, pool by pool;
//! 3. new pools, sized to at least the rest of the request.
//!
//! Holes are never merged, not even with directly adjacent holes. The allocator never
//! constructs or destroys elements - it manages raw storage only.
//!
//! # Examples
//!
//! ```rust
//! use new_zealand::nz;
//! use scatter_allocator::ScatterAllocator;
//!
//! let mut allocator = ScatterAllocator::<u32>::builder()
//!     .min_pool_size(nz!(64))
//!     .build();
//!
//! let mut spans = Vec::new();
//! allocator.allocate(10, |span| spans.push(span));
//!
//! for span in &spans {
//!     // The spans were just allocated and nothing else refers to their storage.
//!     unsafe { span.write_with(|index| index as u32) };
//! }
//!
//! // u32 does not need dropping, so we can return the storage right away.
//! for span in spans {
//!     allocator.deallocate(span);
//! }
//!
//! assert!(allocator.is_empty());
//! ```
//!
//! The same request can also be consumed lazily:
//!
//! ```rust
//! use scatter_allocator::ScatterAllocator;
//!
//! let mut allocator = ScatterAllocator::<u64>::new();
//!
//! let total: usize = allocator.allocate_iter(500).map(|span| span.len()).sum();
//! assert_eq!(total, 500);
//! ```

mod allocation;
mod allocator;
mod builder;
mod drop_policy;
mod error;
mod pool;
mod span;

pub use allocation::*;
pub use allocator::ScatterAllocator;
pub(crate) use allocator::{DEFAULT_MIN_POOL_SIZE, raise};
pub use builder::*;
pub use drop_policy::*;
pub use error::{Error, Result};
pub(crate) use pool::*;
pub use span::*;
