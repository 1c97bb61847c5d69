//! One gadget session: write keyboard reports through the class until done
//!
//! In standalone mode the session is also the external scheduler: it calls
//! the instance's step function between writes. In threaded mode the
//! delivery agent drains the queue on its own, and the session forwards the
//! host's OUT reports into the instance's completion callback.

use crate::keyboard::{KEY_CAPS_LOCK, KeyboardReport, LedState};
use crate::loopback::LoopbackTransport;
use anyhow::{Context, Result, anyhow};
use common::Error;
use hid_class::{DeliveryStats, EventReceiver, HidClass, HidInstance, TaskState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Reports accepted by the class queue
    pub written: usize,
    pub stats: DeliveryStats,
    /// LED states the application read back from the OUT endpoint
    pub led_updates: Vec<LedState>,
    /// The session ended on a stop request
    pub interrupted: bool,
}

/// Build the report sequence: an optional Caps Lock tap, then `text` repeated
pub fn build_reports(text: &str, count: usize, caps_lock_tap: bool) -> Vec<KeyboardReport> {
    let mut reports = Vec::with_capacity(count);
    if caps_lock_tap && count >= 2 {
        reports.push(KeyboardReport::key(0, KEY_CAPS_LOCK));
        reports.push(KeyboardReport::released());
    }

    let typing = crate::keyboard::typing_sequence(text);
    if typing.is_empty() {
        return reports;
    }
    reports.extend(typing.iter().cycle().take(count.saturating_sub(reports.len())));
    reports
}

/// Drive an initialized, activated class through `reports`
pub fn run_session(
    class: &mut HidClass,
    transport: &LoopbackTransport,
    reports: &[KeyboardReport],
    drain_timeout: Duration,
    stop: &AtomicBool,
) -> Result<SessionSummary> {
    let instance = class
        .instance_mut()
        .ok_or_else(|| anyhow!("HID class has no ready instance"))?;
    let standalone = instance.parameters().features.standalone;
    let mut summary = SessionSummary::default();

    for report in reports {
        let report = report.to_report();
        loop {
            if stop.load(Ordering::Relaxed) {
                summary.interrupted = true;
                break;
            }
            match instance.write_report(&report) {
                Ok(()) => {
                    summary.written += 1;
                    break;
                }
                Err(Error::QueueFull { .. }) => {
                    if !standalone {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                Err(e) => return Err(e).context("Failed to write keyboard report"),
            }
            service(instance, transport, standalone, &mut summary)?;
        }
        if summary.interrupted {
            break;
        }
        service(instance, transport, standalone, &mut summary)?;
    }

    let deadline = Instant::now() + drain_timeout;
    while instance.pending_reports() > 0 && !stop.load(Ordering::Relaxed) {
        if Instant::now() >= deadline {
            warn!(
                "{} reports still queued after {:?}",
                instance.pending_reports(),
                drain_timeout
            );
            break;
        }
        service(instance, transport, standalone, &mut summary)?;
        if !standalone {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    // Pick up OUT reports triggered by the last transfers
    service(instance, transport, standalone, &mut summary)?;
    if !standalone {
        collect_receiver_events(instance, &mut summary);
    }

    summary.stats = instance.stats();
    info!(
        "Session finished: {} written, {} delivered, {} discarded",
        summary.written, summary.stats.delivered, summary.stats.discarded
    );
    Ok(summary)
}

/// One round of transport-side work
fn service(
    instance: &mut HidInstance,
    transport: &LoopbackTransport,
    standalone: bool,
    summary: &mut SessionSummary,
) -> Result<()> {
    let interrupt_out = instance.parameters().features.interrupt_out;

    if standalone {
        while instance.tasks_run().context("Standalone step failed")? == TaskState::Busy {
            if interrupt_out {
                read_leds(instance, standalone, summary)?;
            }
        }
        return Ok(());
    }

    if interrupt_out {
        for out in transport.take_out_reports() {
            instance
                .out_transfer_complete(&out)
                .context("OUT completion rejected")?;
        }
        read_leds(instance, standalone, summary)?;
    }
    Ok(())
}

fn read_leds(
    instance: &mut HidInstance,
    standalone: bool,
    summary: &mut SessionSummary,
) -> Result<()> {
    let mut buf = vec![0u8; instance.parameters().out_report_length];
    let read = if standalone {
        instance.read_run(&mut buf)
    } else {
        instance.read(&mut buf)
    };
    if let Some(length) = read.context("Failed to read OUT report")? {
        if let Some(leds) = LedState::from_report(&buf[..length]) {
            debug!("LED state from host: {:?}", leds);
            summary.led_updates.push(leds);
        }
    }
    Ok(())
}

fn collect_receiver_events(instance: &HidInstance, summary: &mut SessionSummary) {
    if let Some(receiver) = instance.receiver::<EventReceiver>() {
        let mut events = 0;
        while receiver.next_event().is_some() {
            events += 1;
        }
        debug!(
            "Event receiver held {} OUT reports ({} dropped)",
            events,
            receiver.overflows()
        );
    }
}
