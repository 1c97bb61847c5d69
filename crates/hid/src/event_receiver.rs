//! Stock receive plugin: a bounded ring of OUT reports
//!
//! Keeps every completed interrupt OUT report (LED state, feature writes,
//! vendor commands) until the application takes it with
//! [`EventReceiver::next_event`]. When the ring is full, new reports are
//! dropped and counted. An optional callback sees each report as it lands.

use crate::receive::{ReceivePlugin, ReceiverFactory};
use common::{Allocation, Error, MemoryPool, Resource, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

type ReceiveCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

pub struct EventReceiver {
    events: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    event_length: usize,
    overflows: AtomicU64,
    callback: Option<ReceiveCallback>,
    _memory: Allocation,
}

impl EventReceiver {
    /// Ring of `capacity` events of up to `event_length` bytes each
    pub fn create(pool: &MemoryPool, capacity: usize, event_length: usize) -> Result<Self> {
        if capacity == 0 || event_length == 0 {
            return Err(Error::Config(
                "receiver capacity and event length must be non-zero".to_string(),
            ));
        }
        let size = capacity.checked_mul(event_length).ok_or_else(|| {
            Error::Config(format!(
                "receiver ring of {} events of {} bytes does not fit in memory",
                capacity, event_length
            ))
        })?;
        let memory = pool.allocate(Resource::ReceiverEvents, size)?;
        debug!(
            "Event receiver created: {} events of {} bytes",
            capacity, event_length
        );
        Ok(Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
            event_length,
            overflows: AtomicU64::new(0),
            callback: None,
            _memory: memory,
        })
    }

    pub fn with_callback(mut self, callback: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Factory for `initialize`
    pub fn factory(capacity: usize, event_length: usize) -> ReceiverFactory {
        Box::new(move |pool: &MemoryPool| {
            let receiver = EventReceiver::create(pool, capacity, event_length)?;
            Ok(Box::new(receiver) as Box<dyn ReceivePlugin>)
        })
    }

    /// Factory for `initialize` with a per-report callback
    pub fn factory_with_callback(
        capacity: usize,
        event_length: usize,
        callback: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> ReceiverFactory {
        Box::new(move |pool: &MemoryPool| {
            let receiver =
                EventReceiver::create(pool, capacity, event_length)?.with_callback(callback);
            Ok(Box::new(receiver) as Box<dyn ReceivePlugin>)
        })
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the oldest received report
    pub fn next_event(&self) -> Option<Vec<u8>> {
        self.events().pop_front()
    }

    pub fn pending(&self) -> usize {
        self.events().len()
    }

    /// Reports dropped because the ring was full
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl ReceivePlugin for EventReceiver {
    fn process_received(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.event_length {
            return Err(Error::ReportTooLarge {
                length: data.len(),
                max: self.event_length,
            });
        }

        {
            let mut events = self.events();
            if events.len() >= self.capacity {
                let dropped = self.overflows.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Receiver ring full, dropped OUT report (total dropped: {})",
                    dropped
                );
                return Ok(());
            }
            events.push_back(data.to_vec());
        }

        if let Some(callback) = &self.callback {
            callback(data);
        }
        Ok(())
    }

    fn uninitialize(self: Box<Self>) {
        let pending = self.pending();
        if pending > 0 {
            debug!("Event receiver dropping {} unread reports", pending);
        }
        drop(self);
    }
}
