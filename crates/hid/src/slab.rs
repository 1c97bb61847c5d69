//! Fixed-capacity ring of pending input reports
//!
//! One producer role (the application writing reports) and one consumer role
//! (the delivery agent or step function) share the ring. Ownership of a slot
//! is handed over through the `head`/`tail` counters: the producer only ever
//! touches the slot at `head`, the consumer the slot at `tail`, and a slot
//! is published by the release-store that advances the counter past it.
//! Callers within the same role serialize on that role's gate; the two roles
//! never wait on each other.
//!
//! In zero-copy mode each slot owns a separately allocated buffer that the
//! transport transmits from directly. Otherwise report bytes live inline in
//! the slab storage and are staged into an endpoint buffer for transfer.

use crate::report::HidReport;
use common::{Allocation, Error, MemoryPool, Resource, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Transfer buffer owned by one slot (zero-copy mode)
#[derive(Debug)]
struct SlotBuffer {
    bytes: Box<[u8]>,
    _memory: Allocation,
}

#[derive(Debug)]
struct Slot {
    length: usize,
    /// Report bytes in copy mode; empty in zero-copy mode
    inline: Box<[u8]>,
    buffer: Option<SlotBuffer>,
}

impl Slot {
    fn storage(&mut self) -> &mut [u8] {
        match self.buffer.as_mut() {
            Some(buffer) => &mut buffer.bytes,
            None => &mut self.inline,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self.buffer.as_ref() {
            Some(buffer) => &buffer.bytes[..self.length],
            None => &self.inline[..self.length],
        }
    }
}

#[derive(Debug)]
pub struct ReportSlab {
    // Declared before `_storage` so owned slot buffers are released first
    slots: Box<[Mutex<Slot>]>,
    producer: Mutex<()>,
    consumer: Mutex<()>,
    /// Count of reports ever published
    head: AtomicUsize,
    /// Count of reports ever consumed or discarded
    tail: AtomicUsize,
    report_length: usize,
    zero_copy: bool,
    _storage: Allocation,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReportSlab {
    /// Allocate the slot array
    ///
    /// In zero-copy mode the slots start without buffers; see
    /// [`ReportSlab::attach_slot_buffers`].
    pub fn create(
        pool: &MemoryPool,
        capacity: usize,
        report_length: usize,
        zero_copy: bool,
        storage_size: usize,
    ) -> Result<Self> {
        let storage = pool.allocate(Resource::ReportSlab, storage_size)?;
        let inline_length = if zero_copy { 0 } else { report_length };

        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(Slot {
                    length: 0,
                    inline: vec![0u8; inline_length].into_boxed_slice(),
                    buffer: None,
                })
            })
            .collect();

        debug!(
            "Report slab created: {} slots of {} bytes{}",
            capacity,
            report_length,
            if zero_copy { " (zero-copy)" } else { "" }
        );

        Ok(Self {
            slots,
            producer: Mutex::new(()),
            consumer: Mutex::new(()),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            report_length,
            zero_copy,
            _storage: storage,
        })
    }

    /// Give every slot its own transfer buffer
    ///
    /// Stops at the first refused allocation; buffers already attached stay
    /// with their slots and are released with the slab.
    pub fn attach_slot_buffers(&mut self, pool: &MemoryPool) -> Result<()> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let slot = slot.get_mut().unwrap_or_else(PoisonError::into_inner);
            if slot.buffer.is_some() {
                continue;
            }
            let memory = pool.allocate(Resource::SlotBuffer(index), self.report_length)?;
            slot.buffer = Some(SlotBuffer {
                bytes: vec![0u8; self.report_length].into_boxed_slice(),
                _memory: memory,
            });
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn report_length(&self) -> usize {
        self.report_length
    }

    pub fn is_zero_copy(&self) -> bool {
        self.zero_copy
    }

    /// Reports published but not yet consumed
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots currently holding their own buffer
    pub fn slot_buffers(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| lock(slot).buffer.is_some())
            .count()
    }

    /// Copy `report` into the next free slot and publish it
    pub fn push(&self, report: &HidReport) -> Result<()> {
        let length = report.wire_len();
        if length > self.report_length {
            return Err(Error::ReportTooLarge {
                length,
                max: self.report_length,
            });
        }

        let _gate = lock(&self.producer);
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.capacity() {
            return Err(Error::QueueFull {
                capacity: self.capacity(),
            });
        }

        {
            let mut slot = lock(&self.slots[head % self.capacity()]);
            slot.length = report.write_wire(slot.storage());
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        trace!("Report queued in slot {} ({} bytes)", head % self.capacity(), length);

        Ok(())
    }

    /// Hand the oldest report to `consume`, then free its slot
    ///
    /// The slot stays owned by the consumer for the duration of the call, so
    /// zero-copy transmission can read straight from it.
    pub fn pop_with<R>(&self, consume: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let _gate = lock(&self.consumer);
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        let result = {
            let slot = lock(&self.slots[tail % self.capacity()]);
            consume(slot.bytes())
        };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);

        Some(result)
    }

    /// Drop every queued report, returning how many were dropped
    pub fn discard(&self) -> usize {
        let _gate = lock(&self.consumer);
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
        head.wrapping_sub(tail)
    }

    /// Free the slab: owned slot buffers first, then the slot array storage
    ///
    /// Returns the number of slot buffers released.
    pub fn release(self) -> usize {
        let ReportSlab {
            slots, _storage, ..
        } = self;

        let mut freed = 0;
        for slot in slots.into_vec() {
            let slot = slot.into_inner().unwrap_or_else(PoisonError::into_inner);
            if let Some(buffer) = slot.buffer {
                drop(buffer);
                freed += 1;
            }
        }
        drop(_storage);

        freed
    }
}
