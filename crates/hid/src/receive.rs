//! Interrupt OUT receive path
//!
//! The instance keeps the most recent host-to-device report in a
//! [`ReceiveBuffer`] until the application reads it. In threaded mode the
//! buffer sits behind the read mutex because the transport's completion
//! callback and application reads run on different threads; in standalone
//! mode both happen inside the single polling caller and no mutex exists.
//!
//! A [`ReceivePlugin`] may additionally be attached. The instance forwards
//! every completed OUT report to it and, at teardown, hands it back through
//! [`ReceivePlugin::uninitialize`]; whatever the plugin allocated is its own
//! business.

use crate::sync::ReadMutex;
use common::{Error, MemoryPool, Result};
use std::any::Any;

/// Pluggable consumer of interrupt OUT reports
pub trait ReceivePlugin: Any + Send + Sync {
    /// Called for every completed OUT transfer
    fn process_received(&self, data: &[u8]) -> Result<()>;

    /// Release everything the plugin owns
    fn uninitialize(self: Box<Self>);
}

/// Builds a plugin during `initialize`, drawing from the class pool
pub type ReceiverFactory =
    Box<dyn FnOnce(&MemoryPool) -> Result<Box<dyn ReceivePlugin>> + Send>;

/// Latest OUT report not yet taken by the application
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Box<[u8]>,
    /// Polling target; swapped with `data` when a report lands
    scratch: Box<[u8]>,
    pending: Option<usize>,
}

impl ReceiveBuffer {
    pub fn new(length: usize) -> Self {
        Self {
            data: vec![0u8; length].into_boxed_slice(),
            scratch: vec![0u8; length].into_boxed_slice(),
            pending: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Store a completed report
    ///
    /// Returns `true` if an unread report was overwritten.
    pub fn store(&mut self, report: &[u8]) -> Result<bool> {
        let max = self.data.len();
        let slot = self
            .data
            .get_mut(..report.len())
            .ok_or(Error::ReportTooLarge {
                length: report.len(),
                max,
            })?;
        slot.copy_from_slice(report);
        Ok(self.pending.replace(report.len()).is_some())
    }

    /// Poll `source` straight into the buffer
    ///
    /// Returns the stored bytes and whether an unread report was overwritten.
    pub fn fill_from(
        &mut self,
        source: impl FnOnce(&mut [u8]) -> Result<Option<usize>>,
    ) -> Result<Option<(&[u8], bool)>> {
        // An empty poll must leave the pending report intact
        let Some(length) = source(&mut self.scratch)? else {
            return Ok(None);
        };
        let length = length.min(self.scratch.len());
        std::mem::swap(&mut self.data, &mut self.scratch);
        let overrun = self.pending.replace(length).is_some();
        Ok(Some((&self.data[..length], overrun)))
    }

    /// Move the pending report into `out`
    pub fn take(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        let Some(length) = self.pending else {
            return Ok(None);
        };
        let max = out.len();
        let target = out
            .get_mut(..length)
            .ok_or(Error::ReportTooLarge { length, max })?;
        target.copy_from_slice(&self.data[..length]);
        self.pending = None;
        Ok(Some(length))
    }
}

/// How the receive buffer is reached
#[derive(Debug)]
pub enum ReceivePath {
    /// Threaded mode: guarded by the read mutex
    Locked(ReadMutex<ReceiveBuffer>),
    /// Standalone mode: owned by the polling caller
    Polled(ReceiveBuffer),
}

impl ReceivePath {
    pub fn has_mutex(&self) -> bool {
        matches!(self, ReceivePath::Locked(_))
    }
}
