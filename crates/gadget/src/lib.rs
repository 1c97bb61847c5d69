//! Loopback HID keyboard gadget
//!
//! Plays both the class-dispatch layer and the USB host around a HID class
//! instance: a keyboard types text into the interrupt IN endpoint, the
//! loopback host decodes it and answers Caps Lock with an LED output report.

pub mod config;
pub mod keyboard;
pub mod loopback;
pub mod session;

pub use config::GadgetConfig;
pub use loopback::LoopbackTransport;
pub use session::{SessionSummary, build_reports, run_session};
