//! Ondawagon CLI — switch USB 3G dongles into modem mode and talk AT to them.

use std::path::PathBuf;

use clap::Parser;
use ondawagon_lib::context::Context;

mod cli;

#[derive(Parser)]
#[command(
    name = "ondawagon",
    version,
    about = "Bring USB 3G modem dongles out of ZeroCD mode and talk AT to them"
)]
struct Args {
    /// Output as JSON (for devices, ready, at, config)
    #[arg(long, global = true)]
    json: bool,

    /// Log transfers and state changes (-v: info, -vv: debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: cli::Command,
}

/// Name this binary was invoked as, for error prefixes.
fn program_name() -> String {
    std::env::args_os()
        .next()
        .as_deref()
        .map(std::path::Path::new)
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ondawagon".to_string())
}

fn main() {
    let args = Args::parse();

    let default_filter = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let config = cli::load_config(args.config.as_deref());
    let ctx = Context::new(program_name(), args.verbose, config);

    if let Err(e) = cli::run(&ctx, args.command, args.json, args.config.as_deref()) {
        eprintln!("{}", ctx.describe(&e));
        std::process::exit(1);
    }
}
