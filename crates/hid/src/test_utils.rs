//! Test utilities for the HID class
//!
//! Provides a recording transport, a tracking receive plugin and a polling
//! helper for tests in this crate and downstream crates.
//!
//! # Example
//!
//! ```
//! use hid_class::test_utils::RecordingTransport;
//! use hid_class::Transport;
//!
//! let transport = RecordingTransport::new();
//! transport.send_report(&[1, 2]).unwrap();
//! assert_eq!(transport.sent(), vec![vec![1, 2]]);
//! ```

use crate::receive::{ReceivePlugin, ReceiverFactory};
use crate::transport::Transport;
use common::{Allocation, Error, MemoryPool, Resource, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport that records every interrupt IN transfer
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    out_reports: Mutex<VecDeque<Vec<u8>>>,
    borrowed: AtomicUsize,
    returned: AtomicUsize,
    fail: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report sent so far, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    pub fn buffers_borrowed(&self) -> usize {
        self.borrowed.load(Ordering::SeqCst)
    }

    pub fn buffers_returned(&self) -> usize {
        self.returned.load(Ordering::SeqCst)
    }

    /// Make every subsequent send fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Slow every send down, to keep the delivery thread busy
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *lock(&self.send_delay) = delay;
    }

    /// Queue an OUT report for the next `poll_out`
    pub fn push_out(&self, report: impl Into<Vec<u8>>) {
        lock(&self.out_reports).push_back(report.into());
    }
}

impl Transport for RecordingTransport {
    fn send_report(&self, data: &[u8]) -> Result<usize> {
        if let Some(delay) = *lock(&self.send_delay) {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("endpoint stalled".to_string()));
        }
        lock(&self.sent).push(data.to_vec());
        Ok(data.len())
    }

    fn borrow_buffer(&self, len: usize) -> Result<Vec<u8>> {
        self.borrowed.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0u8; len])
    }

    fn return_buffer(&self, _buffer: Vec<u8>) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }

    fn poll_out(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let Some(report) = lock(&self.out_reports).pop_front() else {
            return Ok(None);
        };
        let length = report.len().min(buf.len());
        buf[..length].copy_from_slice(&report[..length]);
        Ok(Some(length))
    }
}

/// Counters shared between a [`TrackingPlugin`] and the test observing it
#[derive(Debug, Default)]
pub struct PluginProbe {
    received: Mutex<Vec<Vec<u8>>>,
    uninitialized: AtomicUsize,
}

impl PluginProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        lock(&self.received).clone()
    }

    pub fn uninitialize_calls(&self) -> usize {
        self.uninitialized.load(Ordering::SeqCst)
    }
}

/// Receive plugin that holds one pool allocation and reports what it sees
pub struct TrackingPlugin {
    probe: Arc<PluginProbe>,
    _memory: Allocation,
}

impl TrackingPlugin {
    /// Bytes the plugin takes from the class pool
    pub const MEMORY_SIZE: usize = 64;

    pub fn factory(probe: Arc<PluginProbe>) -> ReceiverFactory {
        Box::new(move |pool: &MemoryPool| {
            let memory = pool.allocate(Resource::ReceiverEvents, Self::MEMORY_SIZE)?;
            Ok(Box::new(TrackingPlugin {
                probe,
                _memory: memory,
            }) as Box<dyn ReceivePlugin>)
        })
    }

    pub fn probe(&self) -> &Arc<PluginProbe> {
        &self.probe
    }
}

impl ReceivePlugin for TrackingPlugin {
    fn process_received(&self, data: &[u8]) -> Result<()> {
        lock(&self.probe.received).push(data.to_vec());
        Ok(())
    }

    fn uninitialize(self: Box<Self>) {
        self.probe.uninitialized.fetch_add(1, Ordering::SeqCst);
    }
}
