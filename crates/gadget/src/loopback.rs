//! Loopback transport: plays the USB host on the other end of the endpoints
//!
//! Interrupt IN reports are decoded as keyboard input and the typed text is
//! collected. Pressing Caps Lock toggles the host's LED state, which comes
//! back as an interrupt OUT report: through [`Transport::poll_out`] in
//! standalone mode, or through [`LoopbackTransport::take_out_reports`] for
//! the gadget to hand to the instance's completion callback in threaded mode.

use crate::keyboard::{KEY_CAPS_LOCK, KeyboardReport, LedState};
use common::{Error, Result};
use hid_class::Transport;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct HostState {
    typed: String,
    leds: LedState,
    last: KeyboardReport,
    out_reports: VecDeque<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct LoopbackTransport {
    host: Mutex<HostState>,
    reports: AtomicU64,
    bytes: AtomicU64,
    buffers_lent: AtomicU64,
    /// Length the host pads its OUT reports to (0: no padding)
    out_report_length: usize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host whose OUT reports fill `length` bytes, LED bits in the first
    pub fn with_out_report_length(length: usize) -> Self {
        Self {
            out_report_length: length,
            ..Self::default()
        }
    }

    fn host(&self) -> MutexGuard<'_, HostState> {
        self.host.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Text the host has seen typed so far
    pub fn typed(&self) -> String {
        self.host().typed.clone()
    }

    pub fn leds(&self) -> LedState {
        self.host().leds
    }

    /// Interrupt IN reports received by the host
    pub fn reports_received(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn buffers_lent(&self) -> u64 {
        self.buffers_lent.load(Ordering::Relaxed)
    }

    /// Drain the OUT reports the host has queued
    pub fn take_out_reports(&self) -> Vec<Vec<u8>> {
        self.host().out_reports.drain(..).collect()
    }
}

impl Transport for LoopbackTransport {
    fn send_report(&self, data: &[u8]) -> Result<usize> {
        let report = KeyboardReport::from_bytes(data).ok_or_else(|| {
            Error::Transport(format!("host expected a keyboard report, got {} bytes", data.len()))
        })?;

        self.reports.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);

        let mut host = self.host();
        // Only key-down transitions count
        if !report.is_released() && host.last.is_released() {
            if report.keycodes[0] == KEY_CAPS_LOCK {
                host.leds.caps_lock = !host.leds.caps_lock;
                let mut out = host.leds.to_report().to_vec();
                out.resize(out.len().max(self.out_report_length), 0);
                host.out_reports.push_back(out);
                debug!("Host toggled Caps Lock LED: {}", host.leds.caps_lock);
            } else if let Some(c) = report.to_char() {
                host.typed.push(c);
            }
        }
        host.last = report;
        trace!("Host received keyboard report {:02x?}", data);

        Ok(data.len())
    }

    fn borrow_buffer(&self, len: usize) -> Result<Vec<u8>> {
        self.buffers_lent.fetch_add(1, Ordering::Relaxed);
        Ok(vec![0u8; len])
    }

    fn poll_out(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let Some(report) = self.host().out_reports.pop_front() else {
            return Ok(None);
        };
        let length = report.len().min(buf.len());
        buf[..length].copy_from_slice(&report[..length]);
        Ok(Some(length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(transport: &LoopbackTransport, report: KeyboardReport) {
        transport.send_report(&report.to_bytes()).unwrap();
    }

    #[test]
    fn test_host_decodes_typing() {
        let transport = LoopbackTransport::new();
        for report in crate::keyboard::typing_sequence("Hi 5") {
            send(&transport, report);
        }
        assert_eq!(transport.typed(), "Hi 5");
        assert_eq!(transport.reports_received(), 8);
    }

    #[test]
    fn test_caps_lock_round_trip() {
        let transport = LoopbackTransport::new();
        send(&transport, KeyboardReport::key(0, KEY_CAPS_LOCK));
        send(&transport, KeyboardReport::released());

        assert!(transport.leds().caps_lock);
        let mut buf = [0u8; 8];
        assert_eq!(transport.poll_out(&mut buf).unwrap(), Some(1));
        assert_eq!(buf[0], 0x02);
        assert_eq!(transport.poll_out(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_rejects_short_report() {
        let transport = LoopbackTransport::new();
        assert!(transport.send_report(&[1, 2]).is_err());
        assert_eq!(transport.reports_received(), 0);
    }

    #[test]
    fn test_out_reports_padded_to_length() {
        let transport = LoopbackTransport::with_out_report_length(16);
        transport
            .send_report(&KeyboardReport::key(0, KEY_CAPS_LOCK).to_bytes())
            .unwrap();

        let out = transport.take_out_reports();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 16);
        assert!(LedState::from_report(&out[0]).unwrap().caps_lock);
    }
}
