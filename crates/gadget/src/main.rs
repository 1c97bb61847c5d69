//! hid-gadget
//!
//! Brings a HID class instance up against a loopback host, types a
//! configurable amount of keyboard input through it, and tears it down,
//! verifying that the class memory pool is empty afterwards.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::{MemoryPool, setup_logging};
use hid_class::{ClassCommand, EventReceiver, HidClass};
use hid_gadget::{GadgetConfig, LoopbackTransport, SessionSummary, build_reports, run_session};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hid-gadget")]
#[command(author, version, about = "Loopback HID keyboard gadget")]
#[command(long_about = "
Runs a USB HID class instance through its whole lifecycle against a loopback
host: initialize, activate, type keyboard reports, deactivate, uninitialize.

EXAMPLES:
    # Run with default config
    hid-gadget

    # Run with custom config
    hid-gadget --config /path/to/gadget.toml

    # Send 1000 reports with debug logging
    hid-gadget --reports 1000 --log-level debug

CONFIGURATION:
    The gadget looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/hid-gadget/gadget.toml
    3. /etc/hid-gadget/gadget.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Number of keyboard reports to send (overrides config)
    #[arg(short, long, value_name = "COUNT")]
    reports: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = GadgetConfig::default();
        let path = GadgetConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        GadgetConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        GadgetConfig::load_or_default()
    };
    if let Some(reports) = args.reports {
        config.gadget.reports = reports;
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.gadget.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("hid-gadget v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);
    config.validate()?;

    let pool = match config.gadget.pool_capacity {
        Some(capacity) => MemoryPool::new(capacity),
        None => MemoryPool::unbounded(),
    };
    let transport = Arc::new(LoopbackTransport::with_out_report_length(
        config.hid.out_report_length,
    ));
    let mut class = HidClass::new(pool.clone(), transport.clone());

    let features = config.hid.features;
    let receiver = features.interrupt_out.then(|| {
        EventReceiver::factory(config.gadget.receiver_events, config.hid.out_report_length)
    });
    info!(
        "Initializing HID class ({:?}, {} bytes budgeted)",
        features,
        config.hid.memory_footprint()
    );
    if let Err(e) = class.entry(ClassCommand::Initialize {
        parameters: config.hid.clone(),
        receiver,
    }) {
        // Reclaim whatever was allocated before the failure
        class.entry(ClassCommand::Uninitialize)?;
        return Err(e).context("Failed to initialize HID class");
    }
    class
        .entry(ClassCommand::Activate)
        .context("Failed to activate HID class")?;

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    let signal_task = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping session...");
                signal_stop.store(true, Ordering::Relaxed);
            }
            Err(e) => error!("Error waiting for Ctrl+C: {}", e),
        }
    });

    let reports = build_reports(
        &config.gadget.text,
        config.gadget.reports,
        features.interrupt_out,
    );
    let drain_timeout = Duration::from_millis(config.gadget.drain_timeout_ms);
    let session_transport = Arc::clone(&transport);
    let (mut class, session) = tokio::task::spawn_blocking(move || {
        let session = run_session(
            &mut class,
            &session_transport,
            &reports,
            drain_timeout,
            &stop,
        );
        (class, session)
    })
    .await
    .context("Session task failed")?;
    signal_task.abort();

    class.entry(ClassCommand::Deactivate)?;
    class.entry(ClassCommand::Uninitialize)?;

    let summary = session?;
    report(&summary, &transport);

    if pool.in_use() != 0 {
        bail!(
            "{} bytes still allocated after uninitialize: {:?}",
            pool.in_use(),
            pool.outstanding()
        );
    }
    info!("Class memory pool empty (peak {} bytes)", pool.peak());
    Ok(())
}

fn report(summary: &SessionSummary, transport: &LoopbackTransport) {
    if summary.interrupted {
        warn!("Session interrupted");
    }
    info!(
        "Reports: {} written, {} delivered, {} discarded, {} failed",
        summary.written,
        summary.stats.delivered,
        summary.stats.discarded,
        summary.stats.transfer_errors
    );
    info!(
        "Host received {} reports ({} bytes), typed {:?}",
        transport.reports_received(),
        transport.bytes_received(),
        transport.typed()
    );
    if let Some(leds) = summary.led_updates.last() {
        info!("Last LED state read back: {:?}", leds);
    }
}
