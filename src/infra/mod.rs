//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod memory;
pub mod resize;
pub mod snapshot;
pub mod storage;
pub mod telemetry;
pub mod transcoder;
