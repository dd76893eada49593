//! AT command channel over the modem's bulk endpoint pair.
//!
//! One command, one write, one read. Responses arriving in several USB
//! packets are truncated to the first read; callers wanting the rest issue
//! another read themselves.

use crate::config::Config;
use crate::context::Context;
use crate::dongle::{DongleError, DongleHandle, Result};
use crate::transport::UsbTransport;

/// Send `command` to a live dongle and return the first response chunk.
///
/// The command is sent verbatim; terminating it (`\r` or `\n`) is the
/// caller's job. Fails without touching the device when the dongle is not
/// live.
pub fn send_command<T: UsbTransport>(
    handle: &DongleHandle<T>,
    ctx: &Context,
    command: &str,
) -> Result<String> {
    if !handle.is_live() {
        return Err(DongleError::NotLive(handle.state()));
    }
    let response = exchange(handle.transport(), ctx.config(), command)?;
    if ctx.is_verbose() {
        log::info!("{}: {command:?} -> {response:?}", handle.serial());
    }
    Ok(response)
}

/// Raw write-then-read on the configured AT endpoints.
pub fn exchange(transport: &impl UsbTransport, config: &Config, command: &str) -> Result<String> {
    if command.is_empty() {
        return Err(DongleError::EmptyCommand);
    }
    let endpoints = &config.endpoints;
    let timeouts = &config.timeouts;

    let data = command.as_bytes();
    let written = transport.write_bulk(endpoints.at_out, data, timeouts.bulk_write())?;
    if written != data.len() {
        return Err(DongleError::ShortTransfer {
            op: "AT command write",
            expected: data.len(),
            actual: written,
        });
    }

    let mut buf = vec![0u8; endpoints.response_buffer];
    let read = transport.read_bulk(endpoints.at_in, &mut buf, timeouts.bulk_read())?;
    if read == 0 {
        return Err(DongleError::EmptyResponse("AT response"));
    }
    Ok(String::from_utf8_lossy(&buf[..read]).into_owned())
}
