//! `ready` subcommand — take one dongle all the way to live.

use super::{Context, HandshakeJson, LibusbBus, ReadyOutput, Result, dongle, print_json};

pub(super) fn cmd_ready(ctx: &Context, serial: &str, json: bool) -> Result<()> {
    super::require_valid(ctx)?;
    let bus = LibusbBus::new()?;
    let (handle, report) = dongle::bring_up(ctx, &bus, serial)?;

    if json {
        let output = ReadyOutput {
            dongle: handle.info(),
            handshake: HandshakeJson::from(&report),
        };
        handle.close();
        return print_json(&output);
    }

    println!("{}", handle.status_line());
    if let Some(f) = &report.failure {
        println!(
            "Init handshake stopped at step {} ({}): {}",
            f.step, f.name, f.error
        );
    }
    handle.close();
    Ok(())
}
