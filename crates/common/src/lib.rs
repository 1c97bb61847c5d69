//! Common utilities for the HID device class
//!
//! This crate provides the pieces shared between the class core and the
//! gadget host: the error type, logging setup, and the tracked memory pool
//! every class resource is carved out of.

pub mod error;
pub mod logging;
pub mod memory;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use memory::{Allocation, MemoryPool, PoolEvent, Resource};
