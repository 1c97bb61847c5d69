//! Integration tests for gadget configuration
//!
//! Tests configuration file handling, including:
//! - Minimal and full TOML files
//! - Save/load round trips through the filesystem
//! - Invalid configuration handling

use hid_gadget::GadgetConfig;
use std::fs;
use tempfile::TempDir;

const MINIMAL_CONFIG: &str = r#"
[gadget]
"#;

const FULL_CONFIG: &str = r#"
[gadget]
log_level = "debug"
reports = 200
text = "Caps test "
pool_capacity = 1048576
receiver_events = 4
drain_timeout_ms = 500

[hid]
queue_capacity = 8
report_length = 8
out_report_length = 1
thread_stack_size = 32768
poll_interval_ms = 20

[hid.features]
standalone = false
interrupt_out = true
zero_copy = true
own_endpoint_buffer = false
"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("gadget.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_minimal_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, MINIMAL_CONFIG);

    let config = GadgetConfig::load(Some(path)).unwrap();
    assert_eq!(config.gadget.log_level, "info");
    assert_eq!(config.gadget.reports, 64);
    assert!(config.hid.features.threaded());
    assert_eq!(config.hid.queue_capacity, 16);
}

#[test]
fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    let config = GadgetConfig::load(Some(path)).unwrap();
    assert_eq!(config.gadget.log_level, "debug");
    assert_eq!(config.gadget.reports, 200);
    assert_eq!(config.gadget.pool_capacity, Some(1048576));
    assert_eq!(config.gadget.receiver_events, 4);
    assert_eq!(config.hid.queue_capacity, 8);
    assert_eq!(config.hid.thread_stack_size, 32768);
    assert!(config.hid.features.interrupt_out);
    assert!(config.hid.features.zero_copy);
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("gadget.toml");

    let mut config = GadgetConfig::default();
    config.gadget.reports = 7;
    config.hid.features.standalone = true;
    config.save(&path).unwrap();

    let loaded = GadgetConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.gadget.reports, 7);
    assert_eq!(loaded.hid, config.hid);
}

#[test]
fn test_invalid_configs_rejected() {
    let dir = TempDir::new().unwrap();

    let path = write_config(&dir, "[gadget]\nlog_level = \"loud\"\n");
    assert!(GadgetConfig::load(Some(path)).is_err());

    let path = write_config(
        &dir,
        "[gadget]\n[hid.features]\nzero_copy = true\nown_endpoint_buffer = true\n",
    );
    assert!(GadgetConfig::load(Some(path)).is_err());

    let path = write_config(&dir, "[gadget]\n[hid]\nthread_stack_size = 1024\n");
    assert!(GadgetConfig::load(Some(path)).is_err());
}

#[test]
fn test_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    assert!(GadgetConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_default_path_location() {
    let path = GadgetConfig::default_path();
    assert!(path.ends_with("hid-gadget/gadget.toml"));
}
