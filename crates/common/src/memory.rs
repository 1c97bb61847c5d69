//! Tracked class memory pool
//!
//! Every resource a class instance creates is carved out of a [`MemoryPool`].
//! The pool enforces a byte budget, can be told to refuse allocations after a
//! fixed count (to force partial construction), and keeps a journal of every
//! allocation and release so teardown order can be inspected afterwards.
//!
//! An [`Allocation`] is an RAII token: dropping it returns its bytes to the
//! pool and journals the release.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// What a pool allocation backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// The class instance's own storage
    Instance,
    /// Slot array of the report queue
    ReportSlab,
    /// Per-slot transfer buffer (zero-copy mode)
    SlotBuffer(usize),
    /// Stack of the delivery thread
    ThreadStack,
    /// Event flag group waking the delivery thread
    EventFlags,
    /// Mutex guarding the interrupt OUT receive buffer
    ReadMutex,
    /// Class-owned endpoint transfer buffer
    EndpointBuffer,
    /// Event ring of a receive plugin
    ReceiverEvents,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Instance => write!(f, "instance"),
            Resource::ReportSlab => write!(f, "report slab"),
            Resource::SlotBuffer(index) => write!(f, "slot buffer #{}", index),
            Resource::ThreadStack => write!(f, "thread stack"),
            Resource::EventFlags => write!(f, "event flags"),
            Resource::ReadMutex => write!(f, "read mutex"),
            Resource::EndpointBuffer => write!(f, "endpoint buffer"),
            Resource::ReceiverEvents => write!(f, "receiver events"),
        }
    }
}

/// Journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Allocated { resource: Resource, size: usize },
    Released { resource: Resource, size: usize },
}

impl PoolEvent {
    pub fn resource(&self) -> Resource {
        match self {
            PoolEvent::Allocated { resource, .. } | PoolEvent::Released { resource, .. } => {
                *resource
            }
        }
    }

    pub fn is_release(&self) -> bool {
        matches!(self, PoolEvent::Released { .. })
    }
}

#[derive(Debug)]
struct PoolState {
    in_use: usize,
    peak: usize,
    allocations: u64,
    /// Remaining successful allocations before the pool starts refusing
    allocation_limit: Option<u64>,
    outstanding: HashMap<Resource, usize>,
    journal: Vec<PoolEvent>,
}

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, resource: Resource, size: usize) {
        let mut state = self.state();
        state.in_use -= size;
        if let Some(count) = state.outstanding.get_mut(&resource) {
            *count -= 1;
            if *count == 0 {
                state.outstanding.remove(&resource);
            }
        }
        state.journal.push(PoolEvent::Released { resource, size });
        trace!("Released {} ({} bytes, {} in use)", resource, size, state.in_use);
    }
}

/// Cloneable handle to a class memory pool
#[derive(Debug, Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Create a pool with a byte budget
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                state: Mutex::new(PoolState {
                    in_use: 0,
                    peak: 0,
                    allocations: 0,
                    allocation_limit: None,
                    outstanding: HashMap::new(),
                    journal: Vec::new(),
                }),
            }),
        }
    }

    /// Create a pool that only fails on an explicit allocation limit
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Refuse every allocation after the next `count` succeed
    pub fn limit_allocations(&self, count: u64) {
        self.inner.state().allocation_limit = Some(count);
    }

    /// Lift a limit set by [`MemoryPool::limit_allocations`]
    pub fn clear_allocation_limit(&self) {
        self.inner.state().allocation_limit = None;
    }

    /// Carve `size` bytes out of the pool for `resource`
    pub fn allocate(&self, resource: Resource, size: usize) -> crate::Result<Allocation> {
        let mut state = self.inner.state();
        let available = self.inner.capacity - state.in_use;

        let refused = match state.allocation_limit {
            Some(0) => true,
            _ => size > available,
        };
        if refused {
            trace!("Refused {} ({} bytes, {} available)", resource, size, available);
            return Err(crate::Error::Allocation {
                resource,
                requested: size,
                available,
            });
        }

        if let Some(limit) = state.allocation_limit.as_mut() {
            *limit -= 1;
        }
        state.in_use += size;
        state.peak = state.peak.max(state.in_use);
        state.allocations += 1;
        *state.outstanding.entry(resource).or_insert(0) += 1;
        state.journal.push(PoolEvent::Allocated { resource, size });
        trace!("Allocated {} ({} bytes, {} in use)", resource, size, state.in_use);

        Ok(Allocation {
            pool: Arc::clone(&self.inner),
            resource,
            size,
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Bytes currently handed out
    pub fn in_use(&self) -> usize {
        self.inner.state().in_use
    }

    /// Highest `in_use` value seen
    pub fn peak(&self) -> usize {
        self.inner.state().peak
    }

    /// Number of successful allocations over the pool's lifetime
    pub fn allocation_count(&self) -> u64 {
        self.inner.state().allocations
    }

    /// Live allocations per resource
    pub fn outstanding(&self) -> HashMap<Resource, usize> {
        self.inner.state().outstanding.clone()
    }

    /// Whether any allocation for `resource` is still live
    pub fn is_outstanding(&self, resource: Resource) -> bool {
        self.inner.state().outstanding.contains_key(&resource)
    }

    /// Snapshot of the journal in event order
    pub fn journal(&self) -> Vec<PoolEvent> {
        self.inner.state().journal.clone()
    }

    /// Resources released so far, in release order
    pub fn releases(&self) -> Vec<Resource> {
        self.inner
            .state()
            .journal
            .iter()
            .filter(|event| event.is_release())
            .map(PoolEvent::resource)
            .collect()
    }

    pub fn clear_journal(&self) {
        self.inner.state().journal.clear();
    }
}

/// Bytes held from a [`MemoryPool`], returned on drop
#[derive(Debug)]
pub struct Allocation {
    pool: Arc<PoolInner>,
    resource: Resource,
    size: usize,
}

impl Allocation {
    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.pool.release(self.resource, self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let pool = MemoryPool::new(1024);
        let a = pool.allocate(Resource::ReportSlab, 256).unwrap();
        let b = pool.allocate(Resource::EndpointBuffer, 64).unwrap();
        assert_eq!(pool.in_use(), 320);
        assert!(pool.is_outstanding(Resource::ReportSlab));

        drop(a);
        assert_eq!(pool.in_use(), 64);
        assert!(!pool.is_outstanding(Resource::ReportSlab));

        drop(b);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.peak(), 320);
        assert!(pool.outstanding().is_empty());
        assert_eq!(
            pool.releases(),
            vec![Resource::ReportSlab, Resource::EndpointBuffer]
        );
    }

    #[test]
    fn test_budget_exhausted() {
        let pool = MemoryPool::new(100);
        let _held = pool.allocate(Resource::Instance, 60).unwrap();

        let err = pool.allocate(Resource::ReportSlab, 50).unwrap_err();
        match err {
            crate::Error::Allocation {
                resource,
                requested,
                available,
            } => {
                assert_eq!(resource, Resource::ReportSlab);
                assert_eq!(requested, 50);
                assert_eq!(available, 40);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Refusal leaves no trace in the journal
        assert_eq!(pool.journal().len(), 1);
    }

    #[test]
    fn test_allocation_limit() {
        let pool = MemoryPool::unbounded();
        pool.limit_allocations(2);

        let _a = pool.allocate(Resource::Instance, 1).unwrap();
        let _b = pool.allocate(Resource::ReportSlab, 1).unwrap();
        assert!(pool.allocate(Resource::ThreadStack, 1).is_err());

        pool.clear_allocation_limit();
        assert!(pool.allocate(Resource::ThreadStack, 1).is_ok());
        assert_eq!(pool.allocation_count(), 3);
    }

    #[test]
    fn test_slot_buffers_tracked_individually() {
        let pool = MemoryPool::unbounded();
        let buffers: Vec<_> = (0..3)
            .map(|i| pool.allocate(Resource::SlotBuffer(i), 8).unwrap())
            .collect();
        assert_eq!(pool.outstanding().len(), 3);
        drop(buffers);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.releases().len(), 3);
    }
}
