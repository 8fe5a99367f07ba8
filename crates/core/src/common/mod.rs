//! Common types shared by every component of the sniffer engine.
//!
//! This module provides the fundamental building blocks used throughout the
//! crate:
//! 1. **Address types:** a guest virtual address tagged with its owning
//!    process (addresses are never mixed across processes by accident).
//! 2. **Error handling:** the small, structured error type described in the
//!    engine's error-handling design, plus its `Result` alias.

/// Guest address type (virtual address tagged with owning process id).
pub mod addr;

/// Structured error type and result alias for the engine's fallible operations.
pub mod error;

pub use addr::GuestAddr;
pub use error::{SniffError, SniffResult};
