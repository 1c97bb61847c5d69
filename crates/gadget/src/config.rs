//! Gadget configuration management

use anyhow::{Context, Result, anyhow};
use hid_class::HidParameters;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GadgetConfig {
    pub gadget: GadgetSettings,
    /// Class instance parameters
    #[serde(default)]
    pub hid: HidParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GadgetSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "GadgetSettings::default_log_level")]
    pub log_level: String,
    /// Number of keyboard reports to send before shutting down
    #[serde(default = "GadgetSettings::default_reports")]
    pub reports: usize,
    /// Text typed by the keyboard, repeated until `reports` is reached
    #[serde(default = "GadgetSettings::default_text")]
    pub text: String,
    /// Byte budget of the class memory pool (unbounded when absent)
    #[serde(default)]
    pub pool_capacity: Option<usize>,
    /// Slots in the event receiver ring (interrupt OUT only)
    #[serde(default = "GadgetSettings::default_receiver_events")]
    pub receiver_events: usize,
    /// How long to wait for queued reports to drain at the end
    #[serde(default = "GadgetSettings::default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for GadgetSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            reports: Self::default_reports(),
            text: Self::default_text(),
            pool_capacity: None,
            receiver_events: Self::default_receiver_events(),
            drain_timeout_ms: Self::default_drain_timeout_ms(),
        }
    }
}

impl GadgetSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_reports() -> usize {
        64
    }

    fn default_text() -> String {
        "Hello from the HID gadget ".to_string()
    }

    fn default_receiver_events() -> usize {
        8
    }

    fn default_drain_timeout_ms() -> u64 {
        2000
    }
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            gadget: GadgetSettings::default(),
            hid: HidParameters::default(),
        }
    }
}

impl GadgetConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()),
            None => {
                let candidates = vec![
                    Self::default_path(),
                    PathBuf::from("/etc/hid-gadget/gadget.toml"),
                ];

                candidates
                    .into_iter()
                    .find(|p| p.exists())
                    .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: GadgetConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("hid-gadget").join("gadget.toml")
        } else {
            PathBuf::from(".config/hid-gadget/gadget.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.gadget.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.gadget.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.gadget.reports > 0 && self.gadget.text.is_empty() {
            return Err(anyhow!("text must not be empty when reports are requested"));
        }

        if self.hid.features.interrupt_out && self.gadget.receiver_events == 0 {
            return Err(anyhow!("receiver_events must be at least 1 with interrupt OUT"));
        }

        if self.hid.report_length < crate::keyboard::KEYBOARD_REPORT_SIZE {
            return Err(anyhow!(
                "report_length {} cannot hold a {}-byte keyboard report",
                self.hid.report_length,
                crate::keyboard::KEYBOARD_REPORT_SIZE
            ));
        }

        self.hid
            .validate()
            .context("Invalid [hid] parameters")?;

        Ok(())
    }
}
