//! Class instance parameters
//!
//! [`HidFeatures`] decides which optional resources an instance gets; the
//! rest of [`HidParameters`] sizes them. Both deserialize from the
//! `[hid]` table of the gadget configuration file.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest stack the delivery thread may be given
pub const MIN_THREAD_STACK_SIZE: usize = 16 * 1024;

/// Per-slot bookkeeping charged to the slab allocation (report id + length)
pub const SLOT_HEADER_SIZE: usize = 2 * std::mem::size_of::<usize>();

/// Which optional subsystems an instance carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HidFeatures {
    /// Polling mode: no delivery thread, no event flags, no mutex
    #[serde(default)]
    pub standalone: bool,
    /// Interrupt OUT endpoint (host-to-device reports)
    #[serde(default)]
    pub interrupt_out: bool,
    /// Each report slot owns the buffer it is transmitted from
    #[serde(default)]
    pub zero_copy: bool,
    /// The instance owns its endpoint transfer buffer
    #[serde(default)]
    pub own_endpoint_buffer: bool,
}

impl HidFeatures {
    pub fn threaded(&self) -> bool {
        !self.standalone
    }

    /// Every combination that passes validation
    pub fn all_valid() -> Vec<HidFeatures> {
        let mut shapes = Vec::new();
        for bits in 0u8..16 {
            let features = HidFeatures {
                standalone: bits & 0b0001 != 0,
                interrupt_out: bits & 0b0010 != 0,
                zero_copy: bits & 0b0100 != 0,
                own_endpoint_buffer: bits & 0b1000 != 0,
            };
            if features.validate().is_ok() {
                shapes.push(features);
            }
        }
        shapes
    }

    pub fn validate(&self) -> Result<()> {
        // In zero-copy mode the slot buffers already are the endpoint buffers
        if self.zero_copy && self.own_endpoint_buffer {
            return Err(Error::Config(
                "zero_copy and own_endpoint_buffer are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidParameters {
    #[serde(default)]
    pub features: HidFeatures,
    /// Number of report slots
    #[serde(default = "HidParameters::default_queue_capacity")]
    pub queue_capacity: usize,
    /// Longest input report accepted, report id byte included
    #[serde(default = "HidParameters::default_report_length")]
    pub report_length: usize,
    /// Longest output report the receive buffer holds
    #[serde(default = "HidParameters::default_out_report_length")]
    pub out_report_length: usize,
    /// Stack given to the delivery thread (threaded mode)
    #[serde(default = "HidParameters::default_thread_stack_size")]
    pub thread_stack_size: usize,
    /// Upper bound on one delivery-thread wait
    #[serde(default = "HidParameters::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for HidParameters {
    fn default() -> Self {
        Self {
            features: HidFeatures::default(),
            queue_capacity: Self::default_queue_capacity(),
            report_length: Self::default_report_length(),
            out_report_length: Self::default_out_report_length(),
            thread_stack_size: Self::default_thread_stack_size(),
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

impl HidParameters {
    fn default_queue_capacity() -> usize {
        16
    }

    fn default_report_length() -> usize {
        32
    }

    fn default_out_report_length() -> usize {
        64
    }

    fn default_thread_stack_size() -> usize {
        64 * 1024
    }

    fn default_poll_interval_ms() -> u64 {
        50
    }

    /// Default parameters with the given feature set
    pub fn with_features(features: HidFeatures) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;

        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.report_length == 0 {
            return Err(Error::Config("report_length must be at least 1".to_string()));
        }
        if self.features.interrupt_out && self.out_report_length == 0 {
            return Err(Error::Config(
                "out_report_length must be at least 1 with interrupt OUT".to_string(),
            ));
        }
        if self.features.threaded() {
            if self.thread_stack_size < MIN_THREAD_STACK_SIZE {
                return Err(Error::Config(format!(
                    "thread_stack_size too small: {} (min: {})",
                    self.thread_stack_size, MIN_THREAD_STACK_SIZE
                )));
            }
            if self.poll_interval_ms == 0 {
                return Err(Error::Config("poll_interval_ms must be non-zero".to_string()));
            }
        }
        if self.checked_footprint().is_none() {
            return Err(Error::Config(format!(
                "queue_capacity {} with report_length {} does not fit in memory",
                self.queue_capacity, self.report_length
            )));
        }

        Ok(())
    }

    /// Bytes of slab storage (slot headers, plus inline report bytes unless zero-copy)
    ///
    /// Saturates at `usize::MAX`, which no pool can grant.
    pub fn slab_size(&self) -> usize {
        self.checked_slab_size().unwrap_or(usize::MAX)
    }

    /// Total bytes the class itself takes from the pool once fully initialized
    ///
    /// Receive plugins account for their own resources and are not included.
    /// Saturates at `usize::MAX` like [`HidParameters::slab_size`].
    pub fn memory_footprint(&self) -> usize {
        self.checked_footprint().unwrap_or(usize::MAX)
    }

    /// Bytes of instance storage: the instance itself plus the OUT receive
    /// buffer and its polling scratch copy
    pub fn instance_size(&self) -> usize {
        self.checked_instance_size().unwrap_or(usize::MAX)
    }

    fn checked_slab_size(&self) -> Option<usize> {
        let per_slot = if self.features.zero_copy {
            SLOT_HEADER_SIZE
        } else {
            SLOT_HEADER_SIZE.checked_add(self.report_length)?
        };
        self.queue_capacity.checked_mul(per_slot)
    }

    fn checked_instance_size(&self) -> Option<usize> {
        if self.features.interrupt_out {
            self.out_report_length
                .checked_mul(2)?
                .checked_add(crate::instance::INSTANCE_SIZE)
        } else {
            Some(crate::instance::INSTANCE_SIZE)
        }
    }

    fn checked_footprint(&self) -> Option<usize> {
        let features = &self.features;
        let mut total = self.checked_instance_size()?.checked_add(self.checked_slab_size()?)?;

        if features.zero_copy {
            total = total.checked_add(self.queue_capacity.checked_mul(self.report_length)?)?;
        }
        if features.own_endpoint_buffer {
            total = total.checked_add(self.report_length)?;
        }
        if features.interrupt_out && features.threaded() {
            total = total.checked_add(crate::sync::READ_MUTEX_SIZE)?;
        }
        if features.threaded() {
            total = total
                .checked_add(crate::sync::EVENT_FLAGS_SIZE)?
                .checked_add(self.thread_stack_size)?;
        }

        Some(total)
    }
}
