//! Bookkeeping for memory that is on loan from an external owner.
//!
//! A [`BorrowRegistry`] holds one [`BorrowRecord`] for every externally-owned buffer
//! currently aliased by some container. Deallocation paths consult the registry
//! first: if the address is on loan, the owner's release callback is invoked
//! instead of returning the memory to the system allocator.
//!
//! # Concurrency
//!
//! All bookkeeping is serialized by a single mutex around the record list. The
//! release callback is invoked *after* its record has been removed and the lock
//! has been dropped, on the thread that triggered the release. A callback may
//! therefore call back into the registry: a nested `release` of the same address
//! finds nothing and returns `false`, and registering other addresses is allowed.

use std::{
    fmt,
    ptr::NonNull,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use tether_common::{Result, error::Error};

/// Callback invoked exactly once when a borrow ends, with the borrowed address
/// and the element count supplied by the releasing party.
pub type ReleaseCallback = Box<dyn FnOnce(NonNull<u8>, usize) + Send + 'static>;

/// One externally-owned buffer currently aliased by a container.
pub struct BorrowRecord {
    ptr: NonNull<u8>,
    release: ReleaseCallback,
}

// The record never dereferences `ptr`; it is used as a lookup key and handed back
// to the callback, which is itself `Send`.
unsafe impl Send for BorrowRecord {}

impl BorrowRecord {
    /// Address of the borrowed buffer.
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    fn finish(self, len: usize) {
        (self.release)(self.ptr, len);
    }
}

impl fmt::Debug for BorrowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowRecord")
            .field("ptr", &self.ptr)
            .finish_non_exhaustive()
    }
}

/// Table of currently-borrowed addresses and their release obligations.
///
/// The registry is meant to be shared (`Arc<BorrowRegistry>`) by every allocator
/// that may end up freeing a given buffer, so that a buffer wrapped through one
/// allocator instance can be released through any other instance sharing it.
pub struct BorrowRegistry {
    records: Mutex<Vec<BorrowRecord>>,
}

impl BorrowRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> BorrowRegistry {
        BorrowRegistry {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Returns the process-wide registry, creating it on first use.
    ///
    /// Allocators built with `Default` share this instance. Code that wants its
    /// borrows isolated from the rest of the process should create its own
    /// registry with [`BorrowRegistry::new`] and inject it.
    pub fn global() -> &'static Arc<BorrowRegistry> {
        static GLOBAL: OnceLock<Arc<BorrowRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(BorrowRegistry::new()))
    }

    /// Records that `ptr` is on loan and must be released through `release`.
    ///
    /// `len` is the element count of the loan and is used for diagnostics only.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBorrowed` if `ptr` is already registered: the same external
    /// buffer would otherwise have two owners. The callback is dropped without
    /// being invoked in that case.
    pub fn register<F>(&self, ptr: NonNull<u8>, len: usize, release: F) -> Result<()>
    where
        F: FnOnce(NonNull<u8>, usize) + Send + 'static,
    {
        let mut records = self.records();
        if records.iter().any(|r| r.ptr == ptr) {
            return Err(Error::already_borrowed(ptr.as_ptr() as usize));
        }
        records.push(BorrowRecord {
            ptr,
            release: Box::new(release),
        });
        log::debug!("borrow registered: {len} elements at {ptr:p}");
        Ok(())
    }

    /// Ends the borrow of `ptr`, if there is one.
    ///
    /// When `ptr` is registered, its record is removed and the release callback is
    /// invoked with `(ptr, len)`; returns `true`. Otherwise returns `false` and the
    /// caller is responsible for freeing the memory through its normal path.
    ///
    /// # Safety
    ///
    /// No live container may still be rebased onto `ptr`. Once the callback has run
    /// the owner is free to reclaim the memory, so the caller must be the party
    /// that ends the aliasing (or the memory must never be touched again).
    ///
    /// ```compile_fail
    /// # use std::ptr::NonNull;
    /// # use tether_borrow_registry::BorrowRegistry;
    /// let registry = BorrowRegistry::new();
    /// registry.release(NonNull::<u8>::dangling(), 0);
    /// ```
    pub unsafe fn release(&self, ptr: NonNull<u8>, len: usize) -> bool {
        let record = {
            let mut records = self.records();
            match records.iter().position(|r| r.ptr == ptr) {
                Some(pos) => records.swap_remove(pos),
                None => return false,
            }
        };
        log::debug!("borrow released: {len} elements at {ptr:p}");
        record.finish(len);
        true
    }

    /// Returns `true` if `ptr` is currently registered as borrowed.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.records().iter().any(|r| r.ptr == ptr)
    }

    /// Number of live borrows.
    ///
    /// **Note**: diagnostic only; the value may be stale by the time it is
    /// observed when the registry is shared across threads.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> MutexGuard<'_, Vec<BorrowRecord>> {
        // Callbacks run outside the lock, so a poisoned guard still protects a
        // consistent list.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BorrowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BorrowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowRegistry")
            .field("records", &*self.records())
            .finish()
    }
}

impl Drop for BorrowRegistry {
    fn drop(&mut self) {
        let records = self
            .records
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !records.is_empty() {
            log::warn!(
                "borrow registry dropped with {} outstanding borrows; their release callbacks will not run",
                records.len()
            );
        }
    }
}

#[cfg(test)]
mod tests;
