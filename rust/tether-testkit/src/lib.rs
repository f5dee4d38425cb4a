//! Test fixtures for exercising buffers over externally-owned memory.

pub mod external;

pub use external::{ExternalArray, ReleaseRecorder};
