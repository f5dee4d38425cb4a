use std::{
    alloc::Layout,
    fmt,
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
    sync::Arc,
};

use bytemuck::Pod;
use tether_borrow_registry::BorrowRegistry;
use tether_common::{
    Result,
    error::{Error, ErrorKind},
    verify_arg,
};
use tether_tracking_alloc::TrackingAllocator;

use crate::{
    builder::BufferBuilder,
    growth::GrowthPolicy,
    storage::{Ownership, Storage},
};

/// A growable, contiguous sequence of `T` that is either backed by owned storage
/// from a [`TrackingAllocator`], or rebased onto an externally-owned array by
/// [`wrap`](ZeroCopyBuffer::wrap).
///
/// # Ownership states
///
/// - **Owned**: the data pointer was obtained from the allocator and is freed
///   through it when the buffer is dropped or reallocated.
/// - **Borrowed**: the data pointer belongs to an external owner and is registered
///   in the allocator's [`BorrowRegistry`]. Ending the borrow (re-wrap, growth past
///   the borrowed capacity, [`detach`](ZeroCopyBuffer::detach) or drop) invokes the
///   owner's release callback exactly once, and never returns the memory to the
///   system allocator.
///
/// Elements are restricted to [`Pod`] types: foreign memory is adopted as-is, so
/// every bit pattern must be a valid element, and no element destructor ever runs
/// on memory the buffer does not own.
pub struct ZeroCopyBuffer<T: Pod> {
    storage: Storage<T>,
    len: usize,
    alloc: TrackingAllocator<T>,
    growth: GrowthPolicy,
}

unsafe impl<T: Pod + Send> Send for ZeroCopyBuffer<T> {}

unsafe impl<T: Pod + Sync> Sync for ZeroCopyBuffer<T> {}

impl<T: Pod> ZeroCopyBuffer<T> {
    /// Creates an empty buffer backed by the process-wide borrow registry.
    /// Does not allocate.
    pub fn new() -> ZeroCopyBuffer<T> {
        Self::with_allocator(TrackingAllocator::new())
    }

    /// Creates an empty buffer that allocates through `alloc`.
    pub fn with_allocator(alloc: TrackingAllocator<T>) -> ZeroCopyBuffer<T> {
        Self::from_parts(alloc, GrowthPolicy::for_element::<T>())
    }

    /// Creates an empty buffer whose borrows are tracked in `registry`.
    pub fn with_registry(registry: Arc<BorrowRegistry>) -> ZeroCopyBuffer<T> {
        Self::with_allocator(TrackingAllocator::with_registry(registry))
    }

    /// Creates an empty buffer able to hold at least `capacity` elements without
    /// reallocating.
    pub fn with_capacity(capacity: usize) -> ZeroCopyBuffer<T> {
        let mut buf = Self::new();
        buf.reserve_exact(capacity);
        buf
    }

    /// Returns a builder for configuring the allocator, initial capacity and growth
    /// policy of a new buffer.
    pub fn builder() -> BufferBuilder<T> {
        BufferBuilder::new()
    }

    pub(crate) fn from_parts(alloc: TrackingAllocator<T>, growth: GrowthPolicy) -> Self {
        ZeroCopyBuffer {
            storage: Storage::empty(),
            len: 0,
            alloc,
            growth,
        }
    }

    /// Returns the number of elements in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of elements the buffer can hold without reallocating.
    /// For a borrowed buffer this is the length of the external array.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.cap()
    }

    /// Returns who owns the memory currently backing the buffer.
    #[inline]
    pub fn ownership(&self) -> Ownership {
        self.storage.ownership()
    }

    #[inline]
    pub fn is_borrowed(&self) -> bool {
        self.ownership() == Ownership::Borrowed
    }

    #[inline]
    pub fn allocator(&self) -> &TrackingAllocator<T> {
        &self.alloc
    }

    #[inline]
    pub fn growth_policy(&self) -> GrowthPolicy {
        self.growth
    }

    pub fn set_growth_policy(&mut self, growth: GrowthPolicy) {
        self.growth = growth;
    }

    /// Returns a raw pointer to the buffer's data. For a borrowed buffer this is
    /// the external array's address.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.storage.ptr().as_ptr()
    }

    /// Returns a mutable raw pointer to the buffer's data.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.storage.ptr().as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    /// Returns the contents as raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }
}

impl<T: Pod> ZeroCopyBuffer<T> {
    /// Discards the current storage and rebases the buffer onto `len` elements of
    /// externally-owned memory at `ptr`, without copying.
    ///
    /// The current storage is released first: owned storage is freed, and an
    /// existing borrow ends with its release callback. The new borrow is then
    /// registered, and the buffer's length and capacity both become `len`.
    /// `release` is invoked exactly once, with `(ptr, len)`, when the new borrow
    /// ends.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBorrowed` if `ptr` is currently on loan to another buffer in
    /// the same registry. The previous storage has already been released at that
    /// point: the buffer is left empty and owned, and `release` is dropped without
    /// being invoked.
    ///
    /// Returns `InvalidArgument` if `T` is zero-sized; the buffer is left untouched.
    ///
    /// # Safety
    ///
    /// - `ptr` must be valid for reads and writes of `len` elements of `T`,
    ///   properly aligned, and initialized.
    /// - The memory must stay valid until `release` is invoked.
    /// - While the buffer is borrowed, the external owner may still access the
    ///   memory through raw pointers, but not while a reference obtained from the
    ///   buffer is alive.
    pub unsafe fn wrap<F>(&mut self, ptr: NonNull<T>, len: usize, release: F) -> Result<()>
    where
        F: FnOnce(NonNull<T>, usize) + Send + 'static,
    {
        // There is no external memory behind a zero-sized element array.
        verify_arg!(T, std::mem::size_of::<T>() != 0);

        let old = std::mem::replace(&mut self.storage, Storage::empty());
        self.len = 0;
        self.release_storage(old, "re-wrap");

        self.alloc.register_borrow(ptr, len, release)?;
        self.storage = Storage::Borrowed { ptr, cap: len };
        self.len = len;
        Ok(())
    }

    /// Like [`wrap`](ZeroCopyBuffer::wrap), but takes a raw pointer and rejects
    /// null or misaligned pointers with `InvalidArgument`.
    ///
    /// # Safety
    ///
    /// Same as [`wrap`](ZeroCopyBuffer::wrap).
    pub unsafe fn wrap_raw<F>(&mut self, ptr: *mut T, len: usize, release: F) -> Result<()>
    where
        F: FnOnce(NonNull<T>, usize) + Send + 'static,
    {
        verify_arg!(ptr, ptr.is_aligned());
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::invalid_arg("ptr", "null pointer"))?;
        unsafe { self.wrap(ptr, len, release) }
    }

    /// Moves the contents of a borrowed buffer into owned storage of the same
    /// capacity and ends the borrow. Does nothing if the buffer is already owned.
    ///
    /// After this call the buffer and the external array diverge.
    pub fn detach(&mut self) {
        if let Err(e) = self.try_detach() {
            reserve_failed(e);
        }
    }

    pub fn try_detach(&mut self) -> Result<()> {
        if self.is_borrowed() {
            self.reallocate(self.capacity(), "detach")
        } else {
            Ok(())
        }
    }
}

impl<T: Pod> ZeroCopyBuffer<T> {
    /// Appends an element to the back of the buffer.
    ///
    /// A borrowed buffer that is full moves into owned storage first, ending the
    /// borrow.
    #[inline]
    pub fn push(&mut self, value: T) {
        if self.len == self.capacity() {
            self.reserve(1);
        }
        unsafe { self.as_mut_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    /// Appends an element, returning an error instead of panicking when the
    /// required storage cannot be allocated.
    pub fn try_push(&mut self, value: T) -> Result<()> {
        if self.len == self.capacity() {
            self.try_reserve(1)?;
        }
        unsafe { self.as_mut_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    /// Removes the last element and returns it, or `None` if the buffer is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(unsafe { self.as_ptr().add(self.len).read() })
    }

    /// Shortens the buffer to `new_len` elements. Has no effect if `new_len` is
    /// greater than the current length. Capacity, and borrowed state, are kept.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len < self.len {
            self.len = new_len;
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Resizes the buffer to `new_len` elements, filling any new slots with
    /// `value`.
    pub fn resize(&mut self, new_len: usize, value: T) {
        let len = self.len;
        if new_len > len {
            self.reserve(new_len - len);
            let base = self.as_mut_ptr();
            for i in len..new_len {
                unsafe { base.add(i).write(value) };
            }
            self.len = new_len;
        } else {
            self.truncate(new_len);
        }
    }

    /// Appends a copy of every element in `values`.
    pub fn extend_from_slice(&mut self, values: &[T]) {
        self.reserve(values.len());
        unsafe {
            ptr::copy_nonoverlapping(
                values.as_ptr(),
                self.as_mut_ptr().add(self.len),
                values.len(),
            );
        }
        self.len += values.len();
    }

    /// Reserves capacity for at least `additional` more elements, growing
    /// according to the buffer's [`GrowthPolicy`].
    ///
    /// # Panics
    ///
    /// Panics on capacity overflow; aborts through `handle_alloc_error` if the
    /// allocation fails.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(e) = self.try_reserve(additional) {
            reserve_failed(e);
        }
    }

    /// Reserves capacity for exactly `additional` more elements.
    pub fn reserve_exact(&mut self, additional: usize) {
        if let Err(e) = self.try_reserve_exact(additional) {
            reserve_failed(e);
        }
    }

    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let required = self.required_capacity(additional)?;
        if required <= self.capacity() {
            return Ok(());
        }
        let new_cap = self
            .growth
            .next_capacity(self.capacity(), required, Self::max_elements());
        self.reallocate(new_cap, "growth")
    }

    pub fn try_reserve_exact(&mut self, additional: usize) -> Result<()> {
        let required = self.required_capacity(additional)?;
        if required <= self.capacity() {
            return Ok(());
        }
        self.reallocate(required, "growth")
    }

    /// Shrinks owned storage to the current length. Borrowed storage is never
    /// shrunk: its capacity is the external array's length.
    pub fn shrink_to_fit(&mut self) {
        if self.is_borrowed() || self.capacity() == self.len {
            return;
        }
        if let Err(e) = self.reallocate(self.len, "shrink") {
            reserve_failed(e);
        }
    }
}

impl<T: Pod> ZeroCopyBuffer<T> {
    #[inline]
    fn max_elements() -> usize {
        match std::mem::size_of::<T>() {
            0 => usize::MAX,
            size => isize::MAX as usize / size,
        }
    }

    #[inline]
    fn required_capacity(&self, additional: usize) -> Result<usize> {
        self.len
            .checked_add(additional)
            .ok_or_else(|| Error::capacity_overflow(usize::MAX))
    }

    /// Moves the contents into newly allocated owned storage of `new_cap`
    /// elements, then releases the previous storage.
    #[cold]
    fn reallocate(&mut self, new_cap: usize, reason: &'static str) -> Result<()> {
        debug_assert!(new_cap >= self.len);
        let new_ptr = self.alloc.allocate(new_cap)?;
        unsafe {
            ptr::copy_nonoverlapping(self.as_ptr(), new_ptr.as_ptr(), self.len);
        }
        let old = std::mem::replace(
            &mut self.storage,
            Storage::Owned {
                ptr: new_ptr,
                cap: new_cap,
            },
        );
        self.release_storage(old, reason);
        Ok(())
    }

    fn release_storage(&self, storage: Storage<T>, reason: &'static str) {
        match storage {
            Storage::Owned { ptr, cap } => {
                // Zero-byte storage is a dangling pointer that was never allocated.
                if std::mem::size_of::<T>() * cap != 0 {
                    unsafe { self.alloc.deallocate(ptr, cap) };
                }
            }
            Storage::Borrowed { ptr, cap } => {
                log::debug!("dropping wrapping on {ptr:p}: {cap} elements ({reason})");
                // The buffer stops aliasing `ptr` as soon as `storage` is replaced.
                if !unsafe { self.alloc.release_borrow(ptr, cap) } {
                    log::warn!("borrowed storage at {ptr:p} was no longer registered ({reason})");
                }
            }
        }
    }
}

#[cold]
pub(crate) fn reserve_failed(e: Error) -> ! {
    match e.into_kind() {
        ErrorKind::AllocationFailed { size, align } => match Layout::from_size_align(size, align) {
            Ok(layout) => std::alloc::handle_alloc_error(layout),
            Err(_) => panic!("memory allocation of {size} bytes failed"),
        },
        kind => panic!("{kind}"),
    }
}

impl<T: Pod> Drop for ZeroCopyBuffer<T> {
    fn drop(&mut self) {
        let storage = std::mem::replace(&mut self.storage, Storage::empty());
        self.release_storage(storage, "drop");
    }
}

impl<T: Pod> Deref for ZeroCopyBuffer<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T: Pod> DerefMut for ZeroCopyBuffer<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl<T: Pod> Clone for ZeroCopyBuffer<T> {
    /// Clones into owned storage; a clone of a borrowed buffer never aliases the
    /// external array.
    fn clone(&self) -> ZeroCopyBuffer<T> {
        let mut buf = Self::from_parts(self.alloc.clone(), self.growth);
        buf.reserve_exact(self.len);
        buf.extend_from_slice(self.as_slice());
        buf
    }
}

impl<T: Pod + fmt::Debug> fmt::Debug for ZeroCopyBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZeroCopyBuffer")
            .field("values", &self.as_slice())
            .field("len", &self.len())
            .field("cap", &self.capacity())
            .field("ownership", &self.ownership())
            .finish_non_exhaustive()
    }
}

impl<T: Pod> Default for ZeroCopyBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod + PartialEq> PartialEq for ZeroCopyBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Pod + Eq> Eq for ZeroCopyBuffer<T> {}

impl<T: Pod + PartialEq> PartialEq<[T]> for ZeroCopyBuffer<T> {
    fn eq(&self, other: &[T]) -> bool {
        self.as_slice() == other
    }
}

impl<T: Pod + PartialEq, const N: usize> PartialEq<[T; N]> for ZeroCopyBuffer<T> {
    fn eq(&self, other: &[T; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Pod> Extend<T> for ZeroCopyBuffer<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.push(value);
        }
    }
}

impl<'a, T: Pod> Extend<&'a T> for ZeroCopyBuffer<T> {
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.extend(iter.into_iter().copied());
    }
}

impl<T: Pod> FromIterator<T> for ZeroCopyBuffer<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut buf = Self::new();
        buf.extend(iter);
        buf
    }
}

impl<T: Pod> From<&[T]> for ZeroCopyBuffer<T> {
    fn from(values: &[T]) -> Self {
        let mut buf = Self::new();
        buf.reserve_exact(values.len());
        buf.extend_from_slice(values);
        buf
    }
}

impl std::io::Write for ZeroCopyBuffer<u8> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
