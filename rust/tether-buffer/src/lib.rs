//! A growable, contiguous buffer that can adopt memory it does not own.
//!
//! [`ZeroCopyBuffer`] behaves like a `Vec<T>` backed by a [`TrackingAllocator`],
//! with one addition: [`ZeroCopyBuffer::wrap`] discards the current storage and
//! rebases the buffer onto an externally-owned array without copying it. Until the
//! buffer needs more room than the external array provides, every read and write
//! goes straight to the external memory. Growing past it moves the contents into
//! freshly allocated owned storage and hands the external array back to its owner
//! through the release callback supplied at wrap time.
//!
//! [`TrackingAllocator`]: tether_tracking_alloc::TrackingAllocator

pub mod buffer;
pub mod builder;
pub mod growth;
mod storage;

pub use buffer::ZeroCopyBuffer;
pub use builder::BufferBuilder;
pub use growth::GrowthPolicy;
pub use storage::Ownership;
