//! Device-side USB HID class instance
//!
//! This crate holds the lifecycle and concurrency core of a HID class
//! instance: the report slab the application writes into, the delivery
//! agent that drains it to the interrupt IN endpoint, the interrupt OUT
//! receive path with its optional plugin, and the class container the
//! device stack dispatches through.
//!
//! Every resource is drawn from a [`common::MemoryPool`], so the
//! construction and teardown sequences can be observed and failures
//! injected.

pub mod agent;
pub mod class;
pub mod config;
pub mod endpoint;
pub mod event_receiver;
pub mod instance;
pub mod receive;
pub mod report;
pub mod slab;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use agent::{DELIVERY_THREAD_NAME, DeliveryStats};
pub use class::{ClassCommand, HidClass};
pub use config::{HidFeatures, HidParameters};
pub use event_receiver::EventReceiver;
pub use instance::{HidInstance, InitFailure, InstanceShape, TaskState};
pub use receive::{ReceivePlugin, ReceiverFactory};
pub use report::HidReport;
pub use transport::Transport;
