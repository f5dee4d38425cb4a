use std::sync::Arc;

use bytemuck::Pod;
use tether_borrow_registry::BorrowRegistry;
use tether_common::Result;
use tether_tracking_alloc::TrackingAllocator;

use crate::{
    buffer::{ZeroCopyBuffer, reserve_failed},
    growth::GrowthPolicy,
};

/// Configures and creates a [`ZeroCopyBuffer`].
///
/// Unset options fall back to the allocator backed by the process-wide registry,
/// zero initial capacity and [`GrowthPolicy::for_element`].
#[derive(Clone)]
pub struct BufferBuilder<T> {
    allocator: Option<TrackingAllocator<T>>,
    capacity: usize,
    growth: Option<GrowthPolicy>,
}

impl<T: Pod> BufferBuilder<T> {
    pub(crate) fn new() -> Self {
        BufferBuilder {
            allocator: None,
            capacity: 0,
            growth: None,
        }
    }

    /// Allocates through `allocator` (and tracks borrows in its registry).
    pub fn allocator(mut self, allocator: TrackingAllocator<T>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Tracks borrows in `registry`. Replaces any previously configured allocator.
    pub fn registry(mut self, registry: Arc<BorrowRegistry>) -> Self {
        self.allocator = Some(TrackingAllocator::with_registry(registry));
        self
    }

    /// Sets the initial owned capacity, in elements.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = Some(growth);
        self
    }

    /// Creates the buffer.
    ///
    /// Returns an error if the initial capacity cannot be allocated.
    pub fn try_build(self) -> Result<ZeroCopyBuffer<T>> {
        let capacity = self.capacity;
        let mut buf = self.into_empty();
        buf.try_reserve_exact(capacity)?;
        Ok(buf)
    }

    /// Creates the buffer, panicking if the initial capacity cannot be allocated.
    pub fn build(self) -> ZeroCopyBuffer<T> {
        self.try_build().unwrap_or_else(|e| reserve_failed(e))
    }

    fn into_empty(self) -> ZeroCopyBuffer<T> {
        ZeroCopyBuffer::from_parts(
            self.allocator.unwrap_or_default(),
            self.growth.unwrap_or(GrowthPolicy::for_element::<T>()),
        )
    }
}
