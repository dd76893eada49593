//! CLI subcommands — listing, bring-up, AT exchange, configuration.

mod at;
mod config_cmd;
mod devices;
mod ready;

use std::path::Path;

use clap::Subcommand;
use serde::Serialize;

pub(super) use ondawagon_lib::config::Config;
pub(super) use ondawagon_lib::context::Context;
pub(super) use ondawagon_lib::dongle::{self, DongleInfo};
pub(super) use ondawagon_lib::error::{OndawagonError, Result};
pub(super) use ondawagon_lib::handshake::HandshakeReport;
pub(super) use ondawagon_lib::transport::LibusbBus;

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{key:<width$}{value}", width = w);
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

/// Print `value` as pretty JSON on stdout.
pub(super) fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| OndawagonError::Io(std::io::Error::other(e)))?;
    println!("{text}");
    Ok(())
}

/// Load configuration from `custom_path`, or the default location.
pub fn load_config(custom_path: Option<&Path>) -> Config {
    match custom_path {
        Some(path) => {
            let (config, warnings) = Config::load_from(path);
            for w in &warnings {
                log::warn!("{w}");
            }
            config
        }
        None => Config::load(),
    }
}

/// Refuse to touch hardware with an invalid configuration.
pub(super) fn require_valid(ctx: &Context) -> Result<()> {
    ctx.config().validate()?;
    Ok(())
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct DevicesOutput {
    pub count: usize,
    pub dongles: Vec<DongleInfo>,
    pub errors: Vec<DeviceErrorJson>,
}

#[derive(Serialize)]
pub(super) struct DeviceErrorJson {
    pub device: String,
    pub error: String,
}

#[derive(Serialize)]
pub(super) struct CatalogHitJson {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub flags: u8,
}

#[derive(Serialize)]
pub(super) struct ReadyOutput {
    pub dongle: DongleInfo,
    pub handshake: HandshakeJson,
}

#[derive(Serialize)]
pub(super) struct HandshakeJson {
    pub completed: usize,
    pub succeeded: bool,
    /// Step the sequence stopped at, when it did not finish.
    pub stopped_at: Option<usize>,
}

impl From<&HandshakeReport> for HandshakeJson {
    fn from(report: &HandshakeReport) -> Self {
        HandshakeJson {
            completed: report.completed,
            succeeded: report.succeeded(),
            stopped_at: report.failure.as_ref().map(|f| f.step),
        }
    }
}

#[derive(Serialize)]
pub(super) struct AtOutput {
    pub serial: String,
    pub command: String,
    pub response: String,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub problems: Vec<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// List supported dongles and their state
    Devices {
        /// Show raw catalog matches (bus, address, IDs, flags) without opening anything
        #[arg(long)]
        raw: bool,
    },

    /// Bring a dongle up: mode switch if needed, claim interfaces, run the init handshake
    Ready {
        /// Serial number of the dongle (empty string: first one found)
        serial: String,
    },

    /// Bring a dongle up and send it one AT command
    At {
        /// Serial number of the dongle (empty string: first one found)
        serial: String,
        /// Command text, e.g. "ATI"
        command: String,
        /// Send the command exactly as given (no line terminator added)
        #[arg(long)]
        raw: bool,
    },

    /// Show current configuration and file path
    Config {
        /// Write the effective settings (defaults filled in) to the config file
        #[arg(long)]
        write: bool,
    },
}

pub fn run(ctx: &Context, cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Devices { raw } => devices::cmd_devices(ctx, raw, json),
        Command::Ready { serial } => ready::cmd_ready(ctx, &serial, json),
        Command::At {
            serial,
            command,
            raw,
        } => at::cmd_at(ctx, &serial, &command, raw, json),
        Command::Config { write } => config_cmd::cmd_config(ctx, json, write, config_path),
    }
}


#[cfg(test)]
mod json_struct_tests {
    use super::*;
    use ondawagon_lib::dongle::DongleState;

    fn info() -> DongleInfo {
        DongleInfo {
            bus: 1,
            address: 3,
            vendor_id: 0x19d2,
            product_id: 0x1008,
            state: DongleState::Live,
            serial: "P671".into(),
            manufacturer: "ZTE,Incorporated".into(),
            product: "ZTE CDMA Technologies MSM".into(),
        }
    }

    #[test]
    fn ready_output_shape() {
        let out = ReadyOutput {
            dongle: info(),
            handshake: HandshakeJson {
                completed: 8,
                succeeded: true,
                stopped_at: None,
            },
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["dongle"]["state"], "live");
        assert_eq!(json["dongle"]["serial"], "P671");
        assert_eq!(json["handshake"]["completed"], 8);
        assert!(json["handshake"]["stopped_at"].is_null());
    }

    #[test]
    fn devices_output_has_expected_fields() {
        let out = DevicesOutput {
            count: 1,
            dongles: vec![info()],
            errors: vec![],
        };
        let json = serde_json::to_value(&out).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(json["dongles"][0]["product_id"], 0x1008);
    }

    #[test]
    fn handshake_json_from_report() {
        let report = HandshakeReport {
            completed: 8,
            failure: None,
        };
        let json = HandshakeJson::from(&report);
        assert!(json.succeeded);
        assert_eq!(json.stopped_at, None);
    }
}
