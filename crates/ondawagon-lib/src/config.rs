//! Configuration — TOML-based, platform-aware path.
//!
//! Every field has a default, so a missing or partial file is fine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{
    AT_IN_ENDPOINT, AT_OUT_ENDPOINT, AT_RESPONSE_BUFFER, DEFAULT_TIMEOUT_MS, HANDSHAKE_STEPS,
};

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str =
    "# ondawagon configuration — changes made outside the tool may be overwritten.\n\n";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub rediscover: Rediscover,
    #[serde(default)]
    pub handshake: Handshake,
}

/// Transfer timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_timeout_ms")]
    pub control_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub bulk_write_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub bulk_read_ms: u64,
    /// Bound on each handshake response read.
    #[serde(default = "default_timeout_ms")]
    pub handshake_read_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            control_ms: DEFAULT_TIMEOUT_MS,
            bulk_write_ms: DEFAULT_TIMEOUT_MS,
            bulk_read_ms: DEFAULT_TIMEOUT_MS,
            handshake_read_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Timeouts {
    pub fn control(&self) -> Duration {
        Duration::from_millis(self.control_ms)
    }

    pub fn bulk_write(&self) -> Duration {
        Duration::from_millis(self.bulk_write_ms)
    }

    pub fn bulk_read(&self) -> Duration {
        Duration::from_millis(self.bulk_read_ms)
    }

    pub fn handshake_read(&self) -> Duration {
        Duration::from_millis(self.handshake_read_ms)
    }
}

/// AT command port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_at_out")]
    pub at_out: u8,
    #[serde(default = "default_at_in")]
    pub at_in: u8,
    /// Size of the buffer a single response is read into.
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,
}

fn default_at_out() -> u8 {
    AT_OUT_ENDPOINT
}
fn default_at_in() -> u8 {
    AT_IN_ENDPOINT
}
fn default_response_buffer() -> usize {
    AT_RESPONSE_BUFFER
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            at_out: AT_OUT_ENDPOINT,
            at_in: AT_IN_ENDPOINT,
            response_buffer: AT_RESPONSE_BUFFER,
        }
    }
}

/// Polling schedule while waiting for a dongle to come back after a mode switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rediscover {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_attempts() -> u32 {
    10
}
fn default_initial_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    4000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for Rediscover {
    fn default() -> Self {
        Rediscover {
            attempts: default_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Init handshake failure policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    /// 0-based steps whose failure aborts bring-up. All other steps are advisory.
    #[serde(default)]
    pub fatal_steps: Vec<usize>,
}

impl Handshake {
    pub fn is_fatal(&self, step: usize) -> bool {
        self.fatal_steps.contains(&step)
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A timeout field is zero (`field` names it).
    ZeroTimeout(&'static str),
    ZeroResponseBuffer,
    /// An endpoint address has the wrong direction bit.
    EndpointDirection { field: &'static str, address: u8 },
    /// A `fatal_steps` entry doesn't name a handshake step.
    HandshakeStepOutOfRange(usize),
    /// Backoff multiplier below 1.0 would shrink the delay.
    InvalidMultiplier(f64),
    ZeroAttempts,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroTimeout(field) => write!(f, "{field} must be greater than 0"),
            ValidationError::ZeroResponseBuffer => {
                write!(f, "endpoints.response_buffer must be greater than 0")
            }
            ValidationError::EndpointDirection { field, address } => {
                write!(f, "{field}: endpoint 0x{address:02x} has the wrong direction")
            }
            ValidationError::HandshakeStepOutOfRange(step) => write!(
                f,
                "handshake.fatal_steps: step {step} is out of range (sequence has {HANDSHAKE_STEPS} steps)"
            ),
            ValidationError::InvalidMultiplier(m) => {
                write!(f, "rediscover.multiplier must be at least 1.0, got {m}")
            }
            ValidationError::ZeroAttempts => {
                write!(f, "rediscover.attempts must be greater than 0")
            }
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ondawagon"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename can fail across filesystems; fall back to direct write + cleanup
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let t = &self.timeouts;
        for (field, value) in [
            ("timeouts.control_ms", t.control_ms),
            ("timeouts.bulk_write_ms", t.bulk_write_ms),
            ("timeouts.bulk_read_ms", t.bulk_read_ms),
            ("timeouts.handshake_read_ms", t.handshake_read_ms),
        ] {
            // libusb treats 0 as "wait forever"
            if value == 0 {
                errors.push(ValidationError::ZeroTimeout(field));
            }
        }

        if self.endpoints.response_buffer == 0 {
            errors.push(ValidationError::ZeroResponseBuffer);
        }
        if self.endpoints.at_out & 0x80 != 0 {
            errors.push(ValidationError::EndpointDirection {
                field: "endpoints.at_out",
                address: self.endpoints.at_out,
            });
        }
        if self.endpoints.at_in & 0x80 == 0 {
            errors.push(ValidationError::EndpointDirection {
                field: "endpoints.at_in",
                address: self.endpoints.at_in,
            });
        }

        for &step in &self.handshake.fatal_steps {
            if step >= HANDSHAKE_STEPS {
                errors.push(ValidationError::HandshakeStepOutOfRange(step));
            }
        }

        if self.rediscover.attempts == 0 {
            errors.push(ValidationError::ZeroAttempts);
        }
        let m = self.rediscover.multiplier;
        if m.is_nan() || m < 1.0 {
            errors.push(ValidationError::InvalidMultiplier(self.rediscover.multiplier));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
