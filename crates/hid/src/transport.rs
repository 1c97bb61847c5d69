//! Contract with the device stack's transport layer
//!
//! The class never touches endpoints directly: interrupt IN transfers,
//! transport-owned transfer buffers, and (in standalone mode) interrupt OUT
//! polling all go through this trait.

use common::Result;

pub trait Transport: Send + Sync {
    /// Submit one interrupt IN transfer, returning the bytes accepted
    fn send_report(&self, data: &[u8]) -> Result<usize>;

    /// Lend a transfer buffer of at least `len` bytes
    ///
    /// Used when the instance neither owns an endpoint buffer nor runs in
    /// zero-copy mode. Every lent buffer comes back through
    /// [`Transport::return_buffer`].
    fn borrow_buffer(&self, len: usize) -> Result<Vec<u8>> {
        Ok(vec![0u8; len])
    }

    fn return_buffer(&self, _buffer: Vec<u8>) {}

    /// Non-blocking interrupt OUT poll for standalone mode
    ///
    /// Returns the length of a completed OUT transfer written into `buf`.
    fn poll_out(&self, _buf: &mut [u8]) -> Result<Option<usize>> {
        Ok(None)
    }
}
