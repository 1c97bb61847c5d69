//! HID class instance: construction and teardown of its resources
//!
//! An instance is built from [`HidParameters`]; the feature flags decide
//! which optional resources it gets. Construction can fail at any
//! allocation, in which case the caller receives the partly built instance
//! along with the error so that [`HidInstance::uninitialize`] can reclaim
//! exactly what was allocated.
//!
//! Teardown releases resources in a fixed order:
//!
//! 1. delivery agent (thread joined, then its stack), then the event flags
//! 2. report slab (owned slot buffers first, then slot storage)
//! 3. read mutex, then the receive plugin's own `uninitialize`
//! 4. owned endpoint buffer
//! 5. the instance's own storage
//!
//! Every step checks for its resource rather than inferring it from the
//! feature flags, so a partially constructed instance tears down cleanly.

use crate::agent::{Delivery, DeliveryAgent, DeliveryCounters, DeliveryStats};
use crate::config::HidParameters;
use crate::endpoint::{EndpointBuffer, Staging};
use crate::receive::{ReceiveBuffer, ReceivePath, ReceivePlugin, ReceiverFactory};
use crate::report::HidReport;
use crate::slab::ReportSlab;
use crate::sync::{EventFlags, NEW_REPORT, ReadMutex};
use crate::transport::Transport;
use common::{Allocation, Error, MemoryPool, Resource, Result};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Bytes charged to the pool for the instance's own storage
pub const INSTANCE_SIZE: usize = std::mem::size_of::<HidInstance>();

/// Which resources an instance currently holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceShape {
    pub agent: bool,
    pub event_flags: bool,
    pub slab: bool,
    pub slot_buffers: usize,
    pub read_mutex: bool,
    pub receive_buffer: bool,
    pub receiver: bool,
    pub endpoint_buffer: bool,
}

/// Outcome of one standalone step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Nothing to transmit or receive
    Idle,
    /// A report was transmitted or an OUT report received
    Busy,
}

/// `initialize` failure, carrying whatever had been built so far
pub struct InitFailure {
    /// `None` only when the instance's own storage could not be allocated
    pub partial: Option<HidInstance>,
    pub error: Error,
}

impl fmt::Debug for InitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitFailure")
            .field("partial", &self.partial.as_ref().map(HidInstance::shape))
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Debug for HidInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidInstance")
            .field("shape", &self.shape())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for InitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HID instance initialization failed: {}", self.error)
    }
}

impl std::error::Error for InitFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub struct HidInstance {
    // Field order is drop order: the agent goes before everything it reads,
    // and the instance storage goes last.
    agent: Option<DeliveryAgent>,
    event_flags: Option<Arc<EventFlags>>,
    slab: Option<Arc<ReportSlab>>,
    receive: Option<ReceivePath>,
    receiver: Option<Box<dyn ReceivePlugin>>,
    endpoint_buffer: Option<Arc<EndpointBuffer>>,
    transport: Arc<dyn Transport>,
    active: Arc<AtomicBool>,
    counters: Arc<DeliveryCounters>,
    parameters: HidParameters,
    ready: bool,
    memory: Option<Allocation>,
}

impl HidInstance {
    /// Build an instance and every resource its features call for
    pub fn initialize(
        pool: &MemoryPool,
        transport: Arc<dyn Transport>,
        parameters: HidParameters,
        receiver: Option<ReceiverFactory>,
    ) -> std::result::Result<HidInstance, InitFailure> {
        if let Err(error) = parameters.validate() {
            return Err(InitFailure {
                partial: None,
                error,
            });
        }

        let memory = match pool.allocate(Resource::Instance, parameters.instance_size()) {
            Ok(memory) => memory,
            Err(error) => {
                warn!("HID instance allocation failed: {}", error);
                return Err(InitFailure {
                    partial: None,
                    error,
                });
            }
        };

        let mut instance = HidInstance {
            agent: None,
            event_flags: None,
            slab: None,
            receive: None,
            receiver: None,
            endpoint_buffer: None,
            transport,
            active: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(DeliveryCounters::new()),
            parameters,
            ready: false,
            memory: Some(memory),
        };

        match instance.populate(pool, receiver) {
            Ok(()) => {
                instance.ready = true;
                info!(
                    "HID instance initialized ({:?}, {} slots)",
                    instance.parameters.features, instance.parameters.queue_capacity
                );
                Ok(instance)
            }
            Err(error) => {
                warn!(
                    "HID instance initialization stopped at {:?}: {}",
                    instance.shape(),
                    error
                );
                Err(InitFailure {
                    partial: Some(instance),
                    error,
                })
            }
        }
    }

    /// Allocate the feature-gated resources, recording each as it lands
    fn populate(&mut self, pool: &MemoryPool, receiver: Option<ReceiverFactory>) -> Result<()> {
        let params = self.parameters.clone();
        let features = params.features;

        let mut slab = ReportSlab::create(
            pool,
            params.queue_capacity,
            params.report_length,
            features.zero_copy,
            params.slab_size(),
        )?;
        let attached = if features.zero_copy {
            slab.attach_slot_buffers(pool)
        } else {
            Ok(())
        };
        self.slab = Some(Arc::new(slab));
        attached?;
        debug!("Report slab ready");

        if features.own_endpoint_buffer {
            let buffer = EndpointBuffer::create(pool, params.report_length)?;
            self.endpoint_buffer = Some(Arc::new(buffer));
            debug!("Endpoint buffer ready ({} bytes)", params.report_length);
        }

        if features.interrupt_out {
            let buffer = ReceiveBuffer::new(params.out_report_length);
            self.receive = Some(if features.threaded() {
                ReceivePath::Locked(ReadMutex::create(pool, buffer)?)
            } else {
                ReceivePath::Polled(buffer)
            });
            debug!("Receive buffer ready");
        }

        if features.threaded() {
            let flags = Arc::new(EventFlags::create(pool)?);
            self.event_flags = Some(Arc::clone(&flags));

            let stack = pool.allocate(Resource::ThreadStack, params.thread_stack_size)?;
            let delivery = self.delivery().ok_or(Error::WrongMode("report slab missing"))?;
            self.agent = Some(DeliveryAgent::spawn(
                delivery,
                flags,
                stack,
                params.poll_interval(),
            )?);
            debug!("Delivery agent started");
        }

        if features.interrupt_out {
            if let Some(factory) = receiver {
                self.receiver = Some(factory(pool)?);
                debug!("Receive plugin attached");
            }
        }

        Ok(())
    }

    fn delivery(&self) -> Option<Delivery> {
        let slab = Arc::clone(self.slab.as_ref()?);
        let staging = if slab.is_zero_copy() {
            Staging::Direct
        } else if let Some(buffer) = &self.endpoint_buffer {
            Staging::Owned(Arc::clone(buffer))
        } else {
            Staging::Borrowed
        };

        Some(Delivery {
            slab,
            staging,
            transport: Arc::clone(&self.transport),
            active: Arc::clone(&self.active),
            counters: Arc::clone(&self.counters),
        })
    }

    /// Tear the instance down, whatever state construction reached
    ///
    /// Always returns `Ok`. The transport must have stopped calling
    /// [`HidInstance::out_transfer_complete`] before this runs; taking the
    /// instance by value means no such call can still be borrowing it.
    pub fn uninitialize(mut self) -> Result<()> {
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        if self.memory.is_none() {
            return;
        }
        self.active.store(false, Ordering::Release);

        if let Some(agent) = self.agent.take() {
            agent.stop();
            debug!("Delivery agent stopped");
        }
        if self.event_flags.take().is_some() {
            debug!("Event flags deleted");
        }

        if let Some(slab) = self.slab.take() {
            // The joined agent held the only other reference
            debug_assert_eq!(Arc::strong_count(&slab), 1, "report slab shared at teardown");
            match Arc::try_unwrap(slab) {
                Ok(slab) => {
                    let buffers = slab.release();
                    debug!("Report slab freed ({} slot buffers)", buffers);
                }
                Err(shared) => {
                    error!(
                        "Report slab shared at teardown ({} holders), slot buffers freed out of order",
                        Arc::strong_count(&shared)
                    );
                    drop(shared);
                }
            }
        }

        if let Some(receive) = self.receive.take() {
            if receive.has_mutex() {
                debug!("Read mutex deleted");
            }
            drop(receive);
        }
        if let Some(receiver) = self.receiver.take() {
            receiver.uninitialize();
            debug!("Receive plugin uninitialized");
        }

        if self.endpoint_buffer.take().is_some() {
            debug!("Endpoint buffer freed");
        }

        self.ready = false;
        if self.memory.take().is_some() {
            info!("HID instance uninitialized");
        }
    }

    fn slab(&self) -> Result<&Arc<ReportSlab>> {
        match (&self.slab, self.ready) {
            (Some(slab), true) => Ok(slab),
            _ => Err(Error::WrongMode("instance not fully initialized")),
        }
    }

    /// Queue an input report for delivery
    pub fn write_report(&self, report: &HidReport) -> Result<()> {
        let slab = self.slab()?;
        if !self.is_active() {
            return Err(Error::NotConfigured);
        }

        slab.push(report)?;
        if let Some(flags) = &self.event_flags {
            flags.set(NEW_REPORT);
        }
        Ok(())
    }

    /// The host selected a configuration containing this interface
    pub fn activate(&self) -> Result<()> {
        self.slab()?;
        self.active.store(true, Ordering::Release);
        if let Some(agent) = &self.agent {
            agent.kick();
        }
        info!("HID interface activated");
        Ok(())
    }

    /// The host dropped the configuration; queued reports are discarded
    pub fn deactivate(&self) -> Result<()> {
        self.active.store(false, Ordering::Release);
        if let Some(delivery) = self.delivery() {
            let dropped = delivery.discard_pending();
            if dropped > 0 {
                debug!("Discarded {} queued reports on deactivate", dropped);
            }
        }
        info!("HID interface deactivated");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Standalone step: send at most one report, poll the OUT endpoint once
    pub fn tasks_run(&mut self) -> Result<TaskState> {
        if self.parameters.features.threaded() {
            return Err(Error::WrongMode("tasks_run requires standalone mode"));
        }
        self.slab()?;

        let mut state = TaskState::Idle;
        if let Some(delivery) = self.delivery() {
            if delivery.transmit_one().is_some() {
                state = TaskState::Busy;
            }
        }

        if !self.is_active() {
            return Ok(state);
        }
        if let Some(ReceivePath::Polled(buffer)) = self.receive.as_mut() {
            let transport = Arc::clone(&self.transport);
            if let Some((data, overrun)) = buffer.fill_from(|buf| transport.poll_out(buf))? {
                self.counters.record_received(overrun);
                if let Some(receiver) = &self.receiver {
                    if let Err(e) = receiver.process_received(data) {
                        warn!("Receive plugin rejected OUT report: {}", e);
                    }
                }
                state = TaskState::Busy;
            }
        }

        Ok(state)
    }

    /// Transport completion callback for an interrupt OUT transfer
    pub fn out_transfer_complete(&self, data: &[u8]) -> Result<()> {
        let Some(ReceivePath::Locked(mutex)) = &self.receive else {
            return Err(Error::WrongMode(
                "out_transfer_complete requires threaded mode with interrupt OUT",
            ));
        };

        let overrun = mutex.lock().store(data)?;
        self.counters.record_received(overrun);

        if let Some(receiver) = &self.receiver {
            receiver.process_received(data)?;
        }
        Ok(())
    }

    /// Take the pending OUT report (threaded mode)
    pub fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        match &self.receive {
            Some(ReceivePath::Locked(mutex)) => mutex.lock().take(buf),
            Some(ReceivePath::Polled(_)) => {
                Err(Error::WrongMode("read requires threaded mode; use read_run"))
            }
            None => Err(Error::WrongMode("interrupt OUT not enabled")),
        }
    }

    /// Take the pending OUT report (standalone mode)
    pub fn read_run(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.receive.as_mut() {
            Some(ReceivePath::Polled(buffer)) => buffer.take(buf),
            Some(ReceivePath::Locked(_)) => {
                Err(Error::WrongMode("read_run requires standalone mode; use read"))
            }
            None => Err(Error::WrongMode("interrupt OUT not enabled")),
        }
    }

    pub fn pending_reports(&self) -> usize {
        self.slab.as_ref().map(|slab| slab.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    /// Live counters; they remain readable after the instance is gone
    pub fn counters(&self) -> Arc<DeliveryCounters> {
        Arc::clone(&self.counters)
    }

    pub fn parameters(&self) -> &HidParameters {
        &self.parameters
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// The attached receive plugin, if it is a `T`
    pub fn receiver<T: ReceivePlugin>(&self) -> Option<&T> {
        let plugin: &dyn Any = self.receiver.as_deref()?;
        plugin.downcast_ref::<T>()
    }

    pub fn shape(&self) -> InstanceShape {
        InstanceShape {
            agent: self.agent.is_some(),
            event_flags: self.event_flags.is_some(),
            slab: self.slab.is_some(),
            slot_buffers: self.slab.as_ref().map(|s| s.slot_buffers()).unwrap_or(0),
            read_mutex: self.receive.as_ref().is_some_and(ReceivePath::has_mutex),
            receive_buffer: self.receive.is_some(),
            receiver: self.receiver.is_some(),
            endpoint_buffer: self.endpoint_buffer.is_some(),
        }
    }
}

impl Drop for HidInstance {
    fn drop(&mut self) {
        self.teardown();
    }
}
