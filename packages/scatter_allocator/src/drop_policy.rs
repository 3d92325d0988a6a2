/// Determines what happens when the allocator is dropped while some of the storage it handed
/// out has not been deallocated.
///
/// The allocator never constructs or destroys elements, so in either case no element destructors
/// are executed. The policy only decides whether outstanding allocations at drop time are treated
/// as a bug.
///
/// # Examples
///
/// ```
/// use scatter_allocator::{DropPolicy, ScatterAllocator};
///
/// // The drop policy is set at allocator creation time.
/// let allocator = ScatterAllocator::<u32>::builder()
///     .drop_policy(DropPolicy::MustNotDropAllocations)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The allocator releases all of its storage when dropped, even if some of it is still
    /// handed out to callers. This is the default.
    #[default]
    MayDropAllocations,

    /// The allocator will panic if any allocated storage has not been deallocated by the
    /// time the allocator is dropped.
    ///
    /// This may be valuable if callers keep pointers into the spans from unsafe code and the
    /// storage is expected to be returned before the allocator goes away. The storage itself is
    /// still released before the panic is raised.
    MustNotDropAllocations,
}
