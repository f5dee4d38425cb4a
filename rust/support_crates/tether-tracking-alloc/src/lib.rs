//! An element allocator that knows which of the pointers it is asked to free were
//! never its own.
//!
//! [`TrackingAllocator`] obtains memory from the system allocator, but every
//! deallocation is first offered to the shared [`BorrowRegistry`]. Pointers that
//! are on loan from an external owner are handed back through the owner's release
//! callback and never reach the system allocator.

use std::{
    alloc::Layout,
    fmt,
    marker::PhantomData,
    ptr::NonNull,
    sync::Arc,
};

use tether_borrow_registry::BorrowRegistry;
use tether_common::{Result, error::Error};

/// Allocates arrays of `T` from the system allocator and routes deallocations of
/// borrowed memory to their release callbacks.
///
/// Cloning is cheap: clones share the registry. Two allocators compare equal when
/// they share a registry, regardless of their element types, since each of them
/// can then correctly free memory allocated or borrowed through the other.
pub struct TrackingAllocator<T> {
    registry: Arc<BorrowRegistry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TrackingAllocator<T> {
    /// Creates an allocator backed by the process-wide registry.
    pub fn new() -> TrackingAllocator<T> {
        Self::with_registry(BorrowRegistry::global().clone())
    }

    /// Creates an allocator that records and resolves borrows in `registry`.
    pub fn with_registry(registry: Arc<BorrowRegistry>) -> TrackingAllocator<T> {
        TrackingAllocator {
            registry,
            _marker: PhantomData,
        }
    }

    /// Returns the registry this allocator consults on deallocation.
    #[inline]
    pub fn registry(&self) -> &Arc<BorrowRegistry> {
        &self.registry
    }

    /// Returns an allocator for another element type sharing this allocator's
    /// registry.
    pub fn rebind<U>(&self) -> TrackingAllocator<U> {
        TrackingAllocator::with_registry(self.registry.clone())
    }

    /// Allocates uninitialized storage for `n` elements.
    ///
    /// Zero-sized requests return a dangling, well-aligned pointer without touching
    /// the system allocator. The registry is never consulted: freshly allocated
    /// memory cannot be on loan.
    ///
    /// # Errors
    ///
    /// `CapacityOverflow` if the byte size of `n` elements exceeds `isize::MAX`,
    /// `AllocationFailed` if the system allocator returns null.
    pub fn allocate(&self, n: usize) -> Result<NonNull<T>> {
        let layout = Self::array_layout(n)?;
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        let ptr = unsafe { std::alloc::alloc(layout) } as *mut T;
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::allocation_failed(layout))?;
        log::trace!("alloc: {} bytes at {:p}", layout.size(), ptr);
        Ok(ptr)
    }

    /// Frees storage for `n` elements at `ptr`.
    ///
    /// If `ptr` is registered as borrowed, the borrow's release callback is invoked
    /// with `(ptr, n)` and the memory is left untouched. Otherwise the memory is
    /// returned to the system allocator.
    ///
    /// Zero-byte regions are a no-op and never consult the registry: a dangling
    /// pointer from `allocate(0)` is indistinguishable from an empty borrow at the
    /// same address. End zero-byte borrows with [`release_borrow`](Self::release_borrow).
    ///
    /// # Safety
    ///
    /// `ptr` must either be registered as borrowed in this allocator's registry, or
    /// have been returned by `allocate(n)` on an allocator sharing the same
    /// registry and not freed since. In the borrowed case, no live container may
    /// still be rebased onto `ptr`.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        let size = std::mem::size_of::<T>() * n;
        if size == 0 {
            return;
        }
        if unsafe { self.registry.release(ptr.cast(), n) } {
            log::debug!("dealloc: {ptr:p} was borrowed; routed to its release callback");
            return;
        }

        // `allocate(n)` validated this layout.
        let layout =
            unsafe { Layout::from_size_align_unchecked(size, std::mem::align_of::<T>()) };
        log::trace!("dealloc: {size} bytes at {ptr:p}");
        unsafe { std::alloc::dealloc(ptr.as_ptr() as *mut u8, layout) };
    }

    /// Records that `ptr` (holding `len` elements) is on loan from an external
    /// owner; `release` is invoked once when the loan ends.
    ///
    /// # Errors
    ///
    /// `AlreadyBorrowed` if `ptr` is already registered.
    pub fn register_borrow<F>(&self, ptr: NonNull<T>, len: usize, release: F) -> Result<()>
    where
        F: FnOnce(NonNull<T>, usize) + Send + 'static,
    {
        log::debug!(
            "wrapping: {} bytes at {:p}",
            std::mem::size_of::<T>().saturating_mul(len),
            ptr
        );
        self.registry
            .register(ptr.cast(), len, move |p, n| release(p.cast(), n))
    }

    /// Ends the loan of `ptr` without going through `deallocate`. Returns `false`
    /// if `ptr` was not registered.
    ///
    /// # Safety
    ///
    /// No live container may still be rebased onto `ptr`: the owner may reclaim the
    /// memory as soon as its release callback has run.
    pub unsafe fn release_borrow(&self, ptr: NonNull<T>, len: usize) -> bool {
        unsafe { self.registry.release(ptr.cast(), len) }
    }

    /// Returns `true` if `ptr` is currently on loan in this allocator's registry.
    pub fn is_borrowed(&self, ptr: NonNull<T>) -> bool {
        self.registry.contains(ptr.cast())
    }

    fn array_layout(n: usize) -> Result<Layout> {
        Layout::array::<T>(n).map_err(|_| Error::capacity_overflow(n))
    }
}

impl<T> Clone for TrackingAllocator<T> {
    fn clone(&self) -> Self {
        Self::with_registry(self.registry.clone())
    }
}

impl<T> Default for TrackingAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, U> PartialEq<TrackingAllocator<U>> for TrackingAllocator<T> {
    fn eq(&self, other: &TrackingAllocator<U>) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl<T> Eq for TrackingAllocator<T> {}

impl<T> fmt::Debug for TrackingAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("element", &std::any::type_name::<T>())
            .field("registry", &Arc::as_ptr(&self.registry))
            .finish()
    }
}
