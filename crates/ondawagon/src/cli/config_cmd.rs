//! `config` subcommand — show current configuration and file path.

use std::path::Path;

use super::{
    Config, ConfigOutput, Context, OndawagonError, Result, kv, kv_indent, kv_width, print_json,
};

pub(super) fn cmd_config(
    ctx: &Context,
    json: bool,
    write: bool,
    custom_path: Option<&Path>,
) -> Result<()> {
    let config = ctx.config();
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);

    if write {
        super::require_valid(ctx)?;
        let Some(path) = &config_path else {
            return Err(OndawagonError::Config("no config directory".into()));
        };
        config.save_to(path)?;
        log::info!("wrote {}", path.display());
    }

    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let problems: Vec<String> = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    };

    if json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config.clone(),
            problems,
        });
    }

    // Human-readable output
    let w = kv_width(
        &["Config file:"],
        &[
            "control_ms:",
            "bulk_write_ms:",
            "bulk_read_ms:",
            "handshake_read_ms:",
            "at_out:",
            "at_in:",
            "response_buffer:",
            "attempts:",
            "initial_delay_ms:",
            "max_delay_ms:",
            "multiplier:",
            "fatal_steps:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    let t = &config.timeouts;
    println!("Timeouts:");
    kv_indent("control_ms:", t.control_ms, w);
    kv_indent("bulk_write_ms:", t.bulk_write_ms, w);
    kv_indent("bulk_read_ms:", t.bulk_read_ms, w);
    kv_indent("handshake_read_ms:", t.handshake_read_ms, w);
    println!();

    let e = &config.endpoints;
    println!("Endpoints:");
    kv_indent("at_out:", format_args!("0x{:02x}", e.at_out), w);
    kv_indent("at_in:", format_args!("0x{:02x}", e.at_in), w);
    kv_indent("response_buffer:", e.response_buffer, w);
    println!();

    let r = &config.rediscover;
    println!("Rediscover:");
    kv_indent("attempts:", r.attempts, w);
    kv_indent("initial_delay_ms:", r.initial_delay_ms, w);
    kv_indent("max_delay_ms:", r.max_delay_ms, w);
    kv_indent("multiplier:", r.multiplier, w);
    println!();

    println!("Handshake:");
    let fatal = if config.handshake.fatal_steps.is_empty() {
        "(none, all steps advisory)".to_string()
    } else {
        format!("{:?}", config.handshake.fatal_steps)
    };
    kv_indent("fatal_steps:", fatal, w);

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(())
}
