//! Common error types

use crate::memory::Resource;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Allocation of {resource} failed: requested {requested} bytes, {available} available")]
    Allocation {
        resource: Resource,
        requested: usize,
        available: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report queue full ({capacity} slots)")]
    QueueFull { capacity: usize },

    #[error("Report too large: {length} bytes (max: {max})")]
    ReportTooLarge { length: usize, max: usize },

    #[error("Operation not available: {0}")]
    WrongMode(&'static str),

    #[error("Class not configured by the host")]
    NotConfigured,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Thread error: {0}")]
    Thread(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the allocation failures `initialize` surfaces to its caller
    pub fn is_allocation(&self) -> bool {
        matches!(self, Error::Allocation { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Allocation {
            resource: Resource::ThreadStack,
            requested: 4096,
            available: 100,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("thread stack"));
        assert!(msg.contains("4096"));
        assert!(err.is_allocation());

        let err = Error::QueueFull { capacity: 4 };
        assert_eq!(format!("{}", err), "Report queue full (4 slots)");
        assert!(!err.is_allocation());
    }
}
