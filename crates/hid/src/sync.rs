//! Synchronization primitives owned by a threaded instance
//!
//! [`EventFlags`] is a multi-bit wait/notify group: producers set bits,
//! a waiter blocks until its mask is satisfied and may clear the bits it
//! consumed in the same step. [`ReadMutex`] guards the interrupt OUT
//! receive buffer shared by the transport callback and application reads.
//!
//! Neither exists in standalone mode.

use common::{Allocation, MemoryPool, Resource, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

/// A report was published to the slab
pub const NEW_REPORT: u32 = 1 << 0;

/// The delivery agent must exit
pub const STOP: u32 = 1 << 1;

/// Bytes charged to the pool for one flag group
pub const EVENT_FLAGS_SIZE: usize =
    std::mem::size_of::<Mutex<u32>>() + std::mem::size_of::<Condvar>();

/// Bytes charged to the pool for the read mutex itself
pub const READ_MUTEX_SIZE: usize = std::mem::size_of::<Mutex<()>>();

/// How a waiter's mask is matched against the current bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagsWait {
    /// Any bit of the mask
    Any,
    /// Every bit of the mask
    All,
    /// Any bit, then clear the mask bits
    AnyClear,
    /// Every bit, then clear the mask bits
    AllClear,
}

impl FlagsWait {
    fn satisfied(self, bits: u32, mask: u32) -> bool {
        match self {
            FlagsWait::Any | FlagsWait::AnyClear => bits & mask != 0,
            FlagsWait::All | FlagsWait::AllClear => bits & mask == mask,
        }
    }

    fn clears(self) -> bool {
        matches!(self, FlagsWait::AnyClear | FlagsWait::AllClear)
    }
}

#[derive(Debug)]
pub struct EventFlags {
    bits: Mutex<u32>,
    changed: Condvar,
    _memory: Allocation,
}

impl EventFlags {
    pub fn create(pool: &MemoryPool) -> Result<Self> {
        let memory = pool.allocate(Resource::EventFlags, EVENT_FLAGS_SIZE)?;
        Ok(Self {
            bits: Mutex::new(0),
            changed: Condvar::new(),
            _memory: memory,
        })
    }

    fn bits(&self) -> MutexGuard<'_, u32> {
        self.bits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// OR `mask` into the group and wake every waiter
    pub fn set(&self, mask: u32) {
        let mut bits = self.bits();
        *bits |= mask;
        trace!("Event flags set {:#x} -> {:#x}", mask, *bits);
        self.changed.notify_all();
    }

    /// Current bits, without consuming anything
    pub fn current(&self) -> u32 {
        *self.bits()
    }

    /// Block until `mask` is satisfied per `mode`
    ///
    /// Returns the matched bits, or `None` if `timeout` elapsed first.
    /// `None` as timeout waits forever.
    pub fn wait(&self, mask: u32, mode: FlagsWait, timeout: Option<Duration>) -> Option<u32> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut bits = self.bits();

        loop {
            if mode.satisfied(*bits, mask) {
                let matched = *bits & mask;
                if mode.clears() {
                    *bits &= !mask;
                }
                return Some(matched);
            }

            match deadline {
                None => {
                    bits = self
                        .changed
                        .wait(bits)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    bits = self
                        .changed
                        .wait_timeout(bits, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}

/// Mutex around the interrupt OUT receive buffer
#[derive(Debug)]
pub struct ReadMutex<T> {
    inner: Mutex<T>,
    _memory: Allocation,
}

impl<T> ReadMutex<T> {
    pub fn create(pool: &MemoryPool, value: T) -> Result<Self> {
        let memory = pool.allocate(Resource::ReadMutex, READ_MUTEX_SIZE)?;
        Ok(Self {
            inner: Mutex::new(value),
            _memory: memory,
        })
    }

    /// Blocks until the calling thread owns the buffer
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}
