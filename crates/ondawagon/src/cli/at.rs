//! `at` subcommand — bring a dongle up and exchange one AT command.

use super::{AtOutput, Context, LibusbBus, Result, dongle, print_json};

/// Append `\n` unless the command already ends with a line terminator.
pub(super) fn terminated(command: &str) -> String {
    if command.ends_with('\r') || command.ends_with('\n') {
        command.to_string()
    } else {
        format!("{command}\n")
    }
}

pub(super) fn cmd_at(ctx: &Context, serial: &str, command: &str, raw: bool, json: bool) -> Result<()> {
    super::require_valid(ctx)?;
    let bus = LibusbBus::new()?;
    let (handle, _) = dongle::bring_up(ctx, &bus, serial)?;

    let wire = if raw {
        command.to_string()
    } else {
        terminated(command)
    };
    let result = handle.send_command(ctx, &wire);
    let serial = handle.serial().to_string();
    handle.close();
    let response = result?;

    if json {
        return print_json(&AtOutput {
            serial,
            command: wire,
            response,
        });
    }
    print!("{response}");
    if !response.ends_with('\n') {
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_command_gets_newline() {
        assert_eq!(terminated("ATI"), "ATI\n");
    }

    #[test]
    fn terminated_command_is_unchanged() {
        assert_eq!(terminated("AT\r"), "AT\r");
        assert_eq!(terminated("AT\r\n"), "AT\r\n");
        assert_eq!(terminated("AT\n"), "AT\n");
    }

    #[test]
    fn empty_command_becomes_bare_newline() {
        assert_eq!(terminated(""), "\n");
    }
}
