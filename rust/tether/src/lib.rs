//! # Tether: growable buffers over memory you do not own
//!
//! Tether lets a growable, contiguous buffer operate directly on memory handed in by
//! an external subsystem (a media framework's mapped frame, a driver's DMA region,
//! a foreign library's output array) without copying it, while keeping normal
//! owned-heap growth once the external capacity is exceeded.
//!
//! ## Ownership model
//!
//! Every live buffer is either *owned* (its storage came from the system allocator)
//! or *borrowed* (its storage belongs to an external owner). Borrowed storage is
//! recorded in a shared [`registry::BorrowRegistry`] together with the owner's
//! release callback, and every path that frees storage consults the registry
//! first, so each borrow ends exactly once, through the callback, and never
//! reaches the system allocator.
//!
//! ## Module Organization
//!
//! * [`buffer`] - [`ZeroCopyBuffer`], the growable buffer with `wrap`
//! * [`alloc`] - [`TrackingAllocator`], the borrow-aware element allocator
//! * [`registry`] - [`BorrowRegistry`], the table of live borrows
//! * [`common`] - error and result types shared by all components
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tether::{BorrowRegistry, ZeroCopyBuffer};
//!
//! let mut external = vec![1u8, 2, 3, 4];
//! let registry = Arc::new(BorrowRegistry::new());
//! let mut buf = ZeroCopyBuffer::<u8>::with_registry(registry.clone());
//!
//! let ptr = std::ptr::NonNull::new(external.as_mut_ptr()).unwrap();
//! unsafe { buf.wrap(ptr, 4, |_, _| {}) }.unwrap();
//! buf[0] = 10;
//! assert!(buf.is_borrowed());
//!
//! // Growing past the external capacity moves into owned storage and ends the borrow.
//! buf.push(5);
//! assert!(!buf.is_borrowed());
//! assert!(registry.is_empty());
//! drop(buf);
//! assert_eq!(external, [10, 2, 3, 4]);
//! ```

pub use tether_borrow_registry as registry;
pub use tether_buffer as buffer;
pub use tether_common as common;
pub use tether_tracking_alloc as alloc;

pub use tether_borrow_registry::BorrowRegistry;
pub use tether_buffer::{BufferBuilder, GrowthPolicy, Ownership, ZeroCopyBuffer};
pub use tether_common::{Result, error::Error};
pub use tether_tracking_alloc::TrackingAllocator;
