//! Endpoint transfer buffers
//!
//! Outside zero-copy mode a report is copied out of its slot into a transfer
//! buffer before it is handed to the transport. That buffer is either the
//! instance's own [`EndpointBuffer`] or one lent by the transport for the
//! duration of a single transfer.

use crate::transport::Transport;
use common::{Allocation, Error, MemoryPool, Resource, Result};
use std::sync::{Arc, Mutex, PoisonError};

/// Transfer buffer owned by the class instance
#[derive(Debug)]
pub struct EndpointBuffer {
    bytes: Mutex<Box<[u8]>>,
    _memory: Allocation,
}

impl EndpointBuffer {
    pub fn create(pool: &MemoryPool, length: usize) -> Result<Self> {
        let memory = pool.allocate(Resource::EndpointBuffer, length)?;
        Ok(Self {
            bytes: Mutex::new(vec![0u8; length].into_boxed_slice()),
            _memory: memory,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut bytes)
    }
}

/// Where a copied report is staged before transmission
#[derive(Debug, Clone)]
pub enum Staging {
    /// Straight from the slot buffer (zero-copy)
    Direct,
    /// The instance's own endpoint buffer
    Owned(Arc<EndpointBuffer>),
    /// A buffer borrowed from the transport per transfer
    Borrowed,
}

impl Staging {
    /// Transmit `report` through `transport` using this staging strategy
    pub fn send(&self, transport: &dyn Transport, report: &[u8]) -> Result<usize> {
        match self {
            Staging::Direct => transport.send_report(report),
            Staging::Owned(buffer) => buffer.with_buffer(|bytes| {
                let max = bytes.len();
                let staged = bytes.get_mut(..report.len()).ok_or(Error::ReportTooLarge {
                    length: report.len(),
                    max,
                })?;
                staged.copy_from_slice(report);
                transport.send_report(staged)
            }),
            Staging::Borrowed => {
                let mut lent = transport.borrow_buffer(report.len())?;
                let result = match lent.get_mut(..report.len()) {
                    Some(staged) => {
                        staged.copy_from_slice(report);
                        transport.send_report(staged)
                    }
                    None => Err(Error::Transport(format!(
                        "lent buffer holds {} bytes, report needs {}",
                        lent.len(),
                        report.len()
                    ))),
                };
                transport.return_buffer(lent);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingTransport;

    #[test]
    fn test_owned_staging() {
        let pool = MemoryPool::unbounded();
        let transport = RecordingTransport::new();
        let staging = Staging::Owned(Arc::new(EndpointBuffer::create(&pool, 8).unwrap()));

        assert_eq!(staging.send(&transport, &[1, 2, 3]).unwrap(), 3);
        assert_eq!(transport.sent(), vec![vec![1, 2, 3]]);
        assert_eq!(transport.buffers_borrowed(), 0);
    }

    #[test]
    fn test_borrowed_staging_returns_buffer() {
        let transport = RecordingTransport::new();

        Staging::Borrowed.send(&transport, &[9, 9]).unwrap();
        assert_eq!(transport.buffers_borrowed(), 1);
        assert_eq!(transport.buffers_returned(), 1);
        assert_eq!(transport.sent(), vec![vec![9, 9]]);
    }

    #[test]
    fn test_borrowed_buffer_returned_on_failure() {
        let transport = RecordingTransport::new();
        transport.fail_sends(true);

        assert!(Staging::Borrowed.send(&transport, &[1]).is_err());
        assert_eq!(transport.buffers_returned(), 1);
    }

    #[test]
    fn test_endpoint_buffer_released() {
        let pool = MemoryPool::unbounded();
        let buffer = EndpointBuffer::create(&pool, 32).unwrap();
        assert_eq!(buffer.len(), 32);
        drop(buffer);
        assert_eq!(pool.releases(), vec![Resource::EndpointBuffer]);
    }
}
