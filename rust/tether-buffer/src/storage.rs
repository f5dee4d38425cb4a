use std::ptr::NonNull;

/// Which party is responsible for the memory currently backing a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The memory came from the system allocator and is freed by the buffer.
    Owned,
    /// The memory belongs to an external owner; the buffer only aliases it and
    /// ends the loan through the registered release callback.
    Borrowed,
}

/// Backing storage of a buffer, tagged with its ownership.
pub(crate) enum Storage<T> {
    Owned { ptr: NonNull<T>, cap: usize },
    Borrowed { ptr: NonNull<T>, cap: usize },
}

impl<T> Storage<T> {
    #[inline]
    pub(crate) fn empty() -> Storage<T> {
        Storage::Owned {
            ptr: NonNull::dangling(),
            cap: 0,
        }
    }

    #[inline]
    pub(crate) fn ptr(&self) -> NonNull<T> {
        match *self {
            Storage::Owned { ptr, .. } | Storage::Borrowed { ptr, .. } => ptr,
        }
    }

    #[inline]
    pub(crate) fn cap(&self) -> usize {
        match *self {
            Storage::Owned { cap, .. } | Storage::Borrowed { cap, .. } => cap,
        }
    }

    #[inline]
    pub(crate) fn ownership(&self) -> Ownership {
        match self {
            Storage::Owned { .. } => Ownership::Owned,
            Storage::Borrowed { .. } => Ownership::Borrowed,
        }
    }
}
