//! Report delivery
//!
//! [`Delivery`] moves reports from the slab to the transport. In threaded
//! mode a [`DeliveryAgent`] owns a dedicated thread that sleeps on the event
//! flags and drains the slab whenever the application publishes a report. In
//! standalone mode there is no thread: the instance's step function calls
//! [`Delivery::transmit_one`] directly.
//!
//! The agent must be stopped (thread joined) before the slab, flags, or
//! endpoint buffer it reads are released. [`DeliveryAgent::stop`] does that;
//! dropping an agent does the same as a fallback.

use crate::endpoint::Staging;
use crate::slab::ReportSlab;
use crate::sync::{EventFlags, FlagsWait, NEW_REPORT, STOP};
use crate::transport::Transport;
use common::{Allocation, Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Name of the delivery thread
pub const DELIVERY_THREAD_NAME: &str = "hid-delivery";

/// Running counters shared by the delivery path and the instance
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    delivered: AtomicU64,
    discarded: AtomicU64,
    transfer_errors: AtomicU64,
    received: AtomicU64,
    receive_overruns: AtomicU64,
}

impl DeliveryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_discarded(&self, count: usize) {
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, overrun: bool) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if overrun {
            self.receive_overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            transfer_errors: self.transfer_errors.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            receive_overruns: self.receive_overruns.load(Ordering::Relaxed),
        }
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Reports accepted by the transport
    pub delivered: u64,
    /// Reports dropped by deactivation or shutdown
    pub discarded: u64,
    /// Reports the transport refused (dropped after logging)
    pub transfer_errors: u64,
    /// Interrupt OUT reports stored in the receive buffer
    pub received: u64,
    /// OUT reports that replaced one the application had not read yet
    pub receive_overruns: u64,
}

/// Everything needed to move one report from slab to transport
#[derive(Clone)]
pub struct Delivery {
    pub(crate) slab: Arc<ReportSlab>,
    pub(crate) staging: Staging,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) counters: Arc<DeliveryCounters>,
}

impl Delivery {
    /// Send the oldest queued report
    ///
    /// Returns `None` when there is nothing to send or the class is not
    /// configured. A failed transfer still consumes the report.
    pub fn transmit_one(&self) -> Option<Result<usize>> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }

        self.slab.pop_with(|report| {
            let result = self.staging.send(self.transport.as_ref(), report);
            match &result {
                Ok(sent) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    trace!("Report delivered ({} bytes)", sent);
                }
                Err(e) => {
                    self.counters.transfer_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Interrupt IN transfer failed, report dropped: {}", e);
                }
            }
            result
        })
    }

    /// Drop whatever is queued and count it as discarded
    pub fn discard_pending(&self) -> usize {
        let dropped = self.slab.discard();
        self.counters.record_discarded(dropped);
        dropped
    }
}

/// Dedicated delivery thread of a threaded instance
pub struct DeliveryAgent {
    handle: Option<JoinHandle<()>>,
    flags: Arc<EventFlags>,
    /// Accounts for the thread's stack; released only after the join
    stack: Option<Allocation>,
}

impl DeliveryAgent {
    /// Start the delivery thread on a stack of `stack.size()` bytes
    ///
    /// On spawn failure the stack allocation is returned to the pool.
    pub fn spawn(
        delivery: Delivery,
        flags: Arc<EventFlags>,
        stack: Allocation,
        poll_interval: Duration,
    ) -> Result<Self> {
        let thread_flags = Arc::clone(&flags);
        let handle = std::thread::Builder::new()
            .name(DELIVERY_THREAD_NAME.to_string())
            .stack_size(stack.size())
            .spawn(move || run(delivery, thread_flags, poll_interval))
            .map_err(|e| Error::Thread(format!("Failed to spawn delivery thread: {}", e)))?;

        Ok(Self {
            handle: Some(handle),
            flags,
            stack: Some(stack),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wake the thread without publishing a report
    pub fn kick(&self) {
        self.flags.set(NEW_REPORT);
    }

    /// Stop the thread, join it, then release its stack
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.flags.set(STOP);
            if let Err(e) = handle.join() {
                error!("Delivery thread panicked: {:?}", e);
            }
            debug!("Delivery thread joined");
        }
        if let Some(stack) = self.stack.take() {
            drop(stack);
            debug!("Delivery thread stack released");
        }
    }
}

impl Drop for DeliveryAgent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Delivery thread body
///
/// Reports still queued when the stop request is observed are discarded.
fn run(delivery: Delivery, flags: Arc<EventFlags>, poll_interval: Duration) {
    info!("HID delivery thread started");

    loop {
        let bits = flags
            .wait(NEW_REPORT | STOP, FlagsWait::AnyClear, Some(poll_interval))
            .unwrap_or(0);

        if bits & STOP != 0 {
            let dropped = delivery.discard_pending();
            if dropped > 0 {
                debug!("Discarded {} queued reports on shutdown", dropped);
            }
            break;
        }

        // A timeout falls through too: drain anything published meanwhile
        while flags.current() & STOP == 0 {
            if delivery.transmit_one().is_none() {
                break;
            }
        }
    }

    info!("HID delivery thread stopped");
}
