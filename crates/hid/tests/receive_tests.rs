//! Interrupt OUT receive path integration tests
//!
//! Tests the host-to-device direction in both modes:
//! - Threaded: transport completion callback and application read under the read mutex
//! - Standalone: OUT polling from the step function and `read_run`
//! - Plugin dispatch, including the stock `EventReceiver`
//!
//! Run with: `cargo test -p hid-class --test receive_tests`

use common::{Error, MemoryPool, Resource};
use hid_class::test_utils::{PluginProbe, RecordingTransport, TrackingPlugin};
use hid_class::{EventReceiver, HidFeatures, HidInstance, HidParameters, TaskState};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Test Utilities
// ============================================================================

fn parameters(standalone: bool) -> HidParameters {
    HidParameters {
        features: HidFeatures {
            standalone,
            interrupt_out: true,
            ..HidFeatures::default()
        },
        queue_capacity: 4,
        report_length: 16,
        out_report_length: 8,
        thread_stack_size: 64 * 1024,
        poll_interval_ms: 10,
    }
}

// ============================================================================
// Threaded receive
// ============================================================================

#[test]
fn test_out_transfer_then_read() {
    let pool = MemoryPool::unbounded();
    let probe = PluginProbe::new();
    let instance = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        parameters(false),
        Some(TrackingPlugin::factory(Arc::clone(&probe))),
    )
    .unwrap();

    instance.out_transfer_complete(&[0x02]).unwrap();
    assert_eq!(probe.received(), vec![vec![0x02]]);

    let mut buf = [0u8; 8];
    assert_eq!(instance.read(&mut buf).unwrap(), Some(1));
    assert_eq!(buf[0], 0x02);
    assert_eq!(instance.read(&mut buf).unwrap(), None);
    assert_eq!(instance.stats().received, 1);
}

#[test]
fn test_unread_report_overwritten() {
    let pool = MemoryPool::unbounded();
    let instance = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        parameters(false),
        None,
    )
    .unwrap();

    instance.out_transfer_complete(&[1]).unwrap();
    instance.out_transfer_complete(&[2, 2]).unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(instance.read(&mut buf).unwrap(), Some(2));
    assert_eq!(&buf[..2], &[2, 2]);
    let stats = instance.stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.receive_overruns, 1);
}

#[test]
fn test_oversized_out_report_rejected() {
    let pool = MemoryPool::unbounded();
    let probe = PluginProbe::new();
    let instance = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        parameters(false),
        Some(TrackingPlugin::factory(Arc::clone(&probe))),
    )
    .unwrap();

    assert!(matches!(
        instance.out_transfer_complete(&[0u8; 9]),
        Err(Error::ReportTooLarge { length: 9, max: 8 })
    ));
    assert!(probe.received().is_empty());
}

#[test]
fn test_concurrent_callback_and_reads() {
    let pool = MemoryPool::unbounded();
    let instance = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        parameters(false),
        None,
    )
    .unwrap();
    let reads = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..500u16 {
                let bytes = i.to_le_bytes();
                instance.out_transfer_complete(&[bytes[0], bytes[1], bytes[0]]).unwrap();
            }
        });
        scope.spawn(|| {
            let mut buf = [0u8; 8];
            for _ in 0..500 {
                if let Some(length) = instance.read(&mut buf).unwrap() {
                    // A read never observes a half-written report
                    assert_eq!(length, 3);
                    assert_eq!(buf[0], buf[2]);
                    reads.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
    });

    let stats = instance.stats();
    assert_eq!(stats.received, 500);
    assert!(reads.load(Ordering::SeqCst) as u64 <= stats.received);
}

#[test]
fn test_mode_specific_entry_points() {
    let pool = MemoryPool::unbounded();
    let mut threaded = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        parameters(false),
        None,
    )
    .unwrap();
    let mut standalone = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        parameters(true),
        None,
    )
    .unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(threaded.read_run(&mut buf), Err(Error::WrongMode(_))));
    assert!(matches!(standalone.read(&mut buf), Err(Error::WrongMode(_))));
    assert!(matches!(
        standalone.out_transfer_complete(&[1]),
        Err(Error::WrongMode(_))
    ));
    assert!(matches!(threaded.tasks_run(), Err(Error::WrongMode(_))));

    threaded.uninitialize().unwrap();
    standalone.uninitialize().unwrap();
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_read_without_interrupt_out() {
    let pool = MemoryPool::unbounded();
    let instance = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        HidParameters::default(),
        None,
    )
    .unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(instance.read(&mut buf), Err(Error::WrongMode(_))));
    assert!(!instance.shape().read_mutex);
}

// ============================================================================
// Standalone receive
// ============================================================================

#[test]
fn test_standalone_polls_out_endpoint() {
    let pool = MemoryPool::unbounded();
    let transport = Arc::new(RecordingTransport::new());
    let probe = PluginProbe::new();
    let mut instance = HidInstance::initialize(
        &pool,
        transport.clone(),
        parameters(true),
        Some(TrackingPlugin::factory(Arc::clone(&probe))),
    )
    .unwrap();
    assert!(!instance.shape().read_mutex);
    instance.activate().unwrap();

    transport.push_out([0x01, 0x04]);
    assert_eq!(instance.tasks_run().unwrap(), TaskState::Busy);
    assert_eq!(instance.tasks_run().unwrap(), TaskState::Idle);
    assert_eq!(probe.received(), vec![vec![0x01, 0x04]]);

    let mut buf = [0u8; 8];
    assert_eq!(instance.read_run(&mut buf).unwrap(), Some(2));
    assert_eq!(&buf[..2], &[0x01, 0x04]);
    assert_eq!(instance.read_run(&mut buf).unwrap(), None);

    pool.clear_journal();
    instance.uninitialize().unwrap();
    assert_eq!(
        pool.releases(),
        vec![Resource::ReportSlab, Resource::ReceiverEvents, Resource::Instance]
    );
    assert_eq!(probe.uninitialize_calls(), 1);
}

#[test]
fn test_standalone_ignores_out_while_inactive() {
    let pool = MemoryPool::unbounded();
    let transport = Arc::new(RecordingTransport::new());
    let mut instance = HidInstance::initialize(
        &pool,
        transport.clone(),
        parameters(true),
        None,
    )
    .unwrap();

    transport.push_out([9]);
    assert_eq!(instance.tasks_run().unwrap(), TaskState::Idle);

    instance.activate().unwrap();
    assert_eq!(instance.tasks_run().unwrap(), TaskState::Busy);
    let mut buf = [0u8; 8];
    assert_eq!(instance.read_run(&mut buf).unwrap(), Some(1));
}

// ============================================================================
// Event receiver
// ============================================================================

#[test]
fn test_event_receiver_collects_out_reports() {
    let pool = MemoryPool::unbounded();
    let instance = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        parameters(false),
        Some(EventReceiver::factory(2, 8)),
    )
    .unwrap();
    assert!(pool.is_outstanding(Resource::ReceiverEvents));

    for led_state in [0x01u8, 0x02, 0x03] {
        instance.out_transfer_complete(&[led_state]).unwrap();
    }

    let receiver = instance.receiver::<EventReceiver>().unwrap();
    assert_eq!(receiver.overflows(), 1);
    assert_eq!(receiver.next_event(), Some(vec![0x01]));
    assert_eq!(receiver.next_event(), Some(vec![0x02]));
    assert_eq!(receiver.next_event(), None);
    assert!(instance.receiver::<TrackingPlugin>().is_none());

    instance.uninitialize().unwrap();
    assert!(!pool.is_outstanding(Resource::ReceiverEvents));
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_event_receiver_callback() {
    let pool = MemoryPool::unbounded();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let instance = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        parameters(false),
        Some(EventReceiver::factory_with_callback(4, 8, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    )
    .unwrap();

    instance.out_transfer_complete(&[1]).unwrap();
    instance.out_transfer_complete(&[2]).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_receiver_ignored_without_interrupt_out() {
    let pool = MemoryPool::unbounded();
    let instance = HidInstance::initialize(
        &pool,
        Arc::new(RecordingTransport::new()),
        HidParameters::default(),
        Some(EventReceiver::factory(2, 8)),
    )
    .unwrap();

    assert!(!instance.shape().receiver);
    assert!(!pool.is_outstanding(Resource::ReceiverEvents));
}
