use std::{
    ptr::NonNull,
    sync::{Arc, Mutex},
};

use bytemuck::Pod;

/// Records every invocation of the release callbacks it hands out.
#[derive(Clone, Default)]
pub struct ReleaseRecorder(Arc<Mutex<Vec<(usize, usize)>>>);

impl ReleaseRecorder {
    pub fn new() -> ReleaseRecorder {
        ReleaseRecorder::default()
    }

    /// Returns a release callback that records `(address, length)` on each call.
    pub fn callback<T>(&self) -> impl FnOnce(NonNull<T>, usize) + Send + 'static {
        let calls = self.0.clone();
        move |ptr, len| calls.lock().unwrap().push((ptr.as_ptr() as usize, len))
    }

    /// Number of callbacks invoked so far.
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// `(address, length)` of every invocation, in order.
    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.0.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for ReleaseRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReleaseRecorder").field(&self.calls()).finish()
    }
}

/// An array allocated outside of any tracking allocator, standing in for memory
/// handed over by an external subsystem.
///
/// Element access goes through raw pointers, so the array can be read and written
/// while a buffer aliases it. The memory is freed when the `ExternalArray` is
/// dropped, so it must outlive every buffer wrapping it.
pub struct ExternalArray<T: Pod> {
    ptr: NonNull<T>,
    len: usize,
    recorder: ReleaseRecorder,
}

unsafe impl<T: Pod + Send> Send for ExternalArray<T> {}

unsafe impl<T: Pod + Sync> Sync for ExternalArray<T> {}

impl<T: Pod> ExternalArray<T> {
    pub fn new(values: &[T]) -> ExternalArray<T> {
        let raw = Box::into_raw(values.to_vec().into_boxed_slice()) as *mut T;
        ExternalArray {
            ptr: NonNull::new(raw).unwrap_or(NonNull::dangling()),
            len: values.len(),
            recorder: ReleaseRecorder::new(),
        }
    }

    pub fn zeroed(len: usize) -> ExternalArray<T> {
        Self::new(&vec![T::zeroed(); len])
    }

    #[inline]
    pub fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read(&self, index: usize) -> T {
        assert!(index < self.len, "index {index} out of bounds ({})", self.len);
        unsafe { self.ptr.as_ptr().add(index).read() }
    }

    pub fn write(&self, index: usize, value: T) {
        assert!(index < self.len, "index {index} out of bounds ({})", self.len);
        unsafe { self.ptr.as_ptr().add(index).write(value) }
    }

    pub fn to_vec(&self) -> Vec<T> {
        (0..self.len).map(|i| self.read(i)).collect()
    }

    /// Records every callback obtained through [`ExternalArray::release_callback`].
    pub fn recorder(&self) -> &ReleaseRecorder {
        &self.recorder
    }

    /// A release callback for this array; its invocations are recorded.
    pub fn release_callback(&self) -> impl FnOnce(NonNull<T>, usize) + Send + 'static {
        self.recorder.callback()
    }

    /// Number of times a release callback of this array has been invoked.
    pub fn release_count(&self) -> usize {
        self.recorder.count()
    }
}

impl<T: Pod> Drop for ExternalArray<T> {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        drop(unsafe { Box::from_raw(slice) });
    }
}
