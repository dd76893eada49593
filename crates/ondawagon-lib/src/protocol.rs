//! Protocol constants for ZTE-based 3G modem dongles (ONDA MT-series and friends).
//!
//! ## Opaque data
//!
//! The mode-switch command block and the init handshake messages are opaque
//! device data, sent byte for byte. Nothing in this crate interprets them
//! beyond their length; response lengths are used only to detect short reads.

use std::time::Duration;

use crate::transport::ControlSetup;

// ── USB standard values ──

/// `bInterfaceClass` / `bInterfaceSubClass` / `bInterfaceProtocol` for vendor-specific functions.
pub const USB_CLASS_VENDOR_SPEC: u8 = 0xFF;

/// Descriptor type tag of a string descriptor.
pub const USB_DT_STRING: u8 = 0x03;

/// Standard `GET_DESCRIPTOR` request code.
pub const USB_REQ_GET_DESCRIPTOR: u8 = 0x06;

/// `bmRequestType` for a standard, device-recipient IN request.
pub const USB_REQ_TYPE_STANDARD_IN: u8 = 0x80;

/// Language ID used for all string descriptor reads (US English).
pub const LANGID_EN_US: u16 = 0x0409;

/// Maximum size of a string descriptor (bLength is a single byte).
pub const STRING_DESCRIPTOR_MAX: usize = 256;

// ── Mode switch (ZeroCD → modem) ──

/// Configuration value exposing the modem functions.
pub const MODEM_CONFIGURATION: u8 = 1;

/// Interface number of the emulated mass-storage (CD-ROM) function.
pub const STORAGE_INTERFACE: u8 = 0;

/// Bulk OUT endpoint of the mass-storage interface.
pub const STORAGE_OUT_ENDPOINT: u8 = 0x01;

/// Timeout for the mode-switch write. Not configurable: a late write is a failed switch.
pub const MODESWITCH_TIMEOUT: Duration = Duration::from_millis(1000);

/// Length of a mass-storage Command Block Wrapper.
pub const MODESWITCH_COMMAND_LEN: usize = 31;

/// Command Block Wrapper carrying SCSI `START STOP UNIT` with LoEj set (eject).
///
/// Layout: `"USBC"`, tag, transfer length 0, flags 0, LUN 0, CB length 6,
/// then the 16-byte command block `1b 00 00 00 02 00 ..`.
pub const MODESWITCH_COMMAND: [u8; MODESWITCH_COMMAND_LEN] = [
    0x55, 0x53, 0x42, 0x43, // dCBWSignature "USBC"
    0x12, 0x34, 0x56, 0x79, // dCBWTag
    0x00, 0x00, 0x00, 0x00, // dCBWDataTransferLength
    0x00, // bmCBWFlags
    0x00, // bCBWLUN
    0x06, // bCBWCBLength
    0x1b, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

// ── Modem personality ──

/// Bulk OUT endpoint of the vendor control channel used by the init handshake.
pub const HANDSHAKE_OUT_ENDPOINT: u8 = 0x03;

/// Bulk IN endpoint paired with [`HANDSHAKE_OUT_ENDPOINT`].
pub const HANDSHAKE_IN_ENDPOINT: u8 = 0x83;

/// Default bulk OUT endpoint of the AT command port.
pub const AT_OUT_ENDPOINT: u8 = 0x01;

/// Default bulk IN endpoint of the AT command port.
pub const AT_IN_ENDPOINT: u8 = 0x81;

/// Default size of the buffer one AT response is read into.
pub const AT_RESPONSE_BUFFER: usize = 512;

/// Buffer size for handshake bulk replies; larger than any expected reply.
pub const HANDSHAKE_READ_BUFFER: usize = 64;

/// Default timeout for control transfers and bulk transfers, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

// ── Init handshake ──

/// Outbound half of a handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    /// Vendor/class control OUT request with an optional data stage.
    Control {
        setup: ControlSetup,
        data: &'static [u8],
    },
    /// Bulk write to an OUT endpoint.
    Bulk {
        endpoint: u8,
        data: &'static [u8],
    },
}

/// Expected reply to a handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Write-only step.
    None,
    /// Control IN request expected to return exactly `len` bytes.
    Control { setup: ControlSetup, len: usize },
    /// Bulk read from an IN endpoint expected to return at least `len` bytes.
    Bulk { endpoint: u8, len: usize },
}

/// One step of the vendor init sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeStep {
    /// Label used in logs and errors.
    pub name: &'static str,
    pub send: Outbound,
    pub reply: Reply,
}

const fn vendor_out(request: u8, value: u16, index: u16) -> ControlSetup {
    ControlSetup {
        request_type: 0x40,
        request,
        value,
        index,
    }
}

const fn vendor_in(request: u8, value: u16, index: u16) -> ControlSetup {
    ControlSetup {
        request_type: 0xC0,
        request,
        value,
        index,
    }
}

const fn class_out(request: u8, value: u16, index: u16) -> ControlSetup {
    ControlSetup {
        request_type: 0x21,
        request,
        value,
        index,
    }
}

/// The captured init sequence, in wire order.
pub const HANDSHAKE: [HandshakeStep; 8] = [
    HandshakeStep {
        name: "enable",
        send: Outbound::Control {
            setup: vendor_out(0x01, 0x0001, 0x0000),
            data: &[],
        },
        reply: Reply::Control {
            setup: vendor_in(0x02, 0x0000, 0x0000),
            len: 2,
        },
    },
    HandshakeStep {
        name: "line-state",
        send: Outbound::Control {
            setup: class_out(0x22, 0x0003, 0x0002),
            data: &[],
        },
        reply: Reply::None,
    },
    HandshakeStep {
        name: "line-coding",
        send: Outbound::Control {
            setup: class_out(0x20, 0x0000, 0x0002),
            data: &[0x00, 0xC2, 0x01, 0x00, 0x00, 0x00, 0x08],
        },
        reply: Reply::None,
    },
    HandshakeStep {
        name: "hello",
        send: Outbound::Bulk {
            endpoint: HANDSHAKE_OUT_ENDPOINT,
            data: &[0x7E, 0x00, 0x78, 0xF0, 0x7E],
        },
        reply: Reply::Bulk {
            endpoint: HANDSHAKE_IN_ENDPOINT,
            len: 5,
        },
    },
    HandshakeStep {
        name: "version",
        send: Outbound::Bulk {
            endpoint: HANDSHAKE_OUT_ENDPOINT,
            data: &[0x00, 0x78, 0xF0, 0x7E],
        },
        reply: Reply::Bulk {
            endpoint: HANDSHAKE_IN_ENDPOINT,
            len: 4,
        },
    },
    HandshakeStep {
        name: "radio-on",
        send: Outbound::Bulk {
            endpoint: HANDSHAKE_OUT_ENDPOINT,
            data: &[0x29, 0x01, 0x00, 0x31, 0x40, 0x7E],
        },
        reply: Reply::Bulk {
            endpoint: HANDSHAKE_IN_ENDPOINT,
            len: 6,
        },
    },
    HandshakeStep {
        name: "status",
        send: Outbound::Control {
            setup: vendor_out(0x03, 0x0000, 0x0000),
            data: &[0x01],
        },
        reply: Reply::Control {
            setup: vendor_in(0x04, 0x0000, 0x0000),
            len: 4,
        },
    },
    HandshakeStep {
        name: "commit",
        send: Outbound::Control {
            setup: vendor_out(0x01, 0x0002, 0x0000),
            data: &[],
        },
        reply: Reply::None,
    },
];

/// Number of steps in [`HANDSHAKE`].
pub const HANDSHAKE_STEPS: usize = HANDSHAKE.len();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modeswitch_command_is_a_cbw() {
        assert_eq!(MODESWITCH_COMMAND.len(), 31);
        assert_eq!(&MODESWITCH_COMMAND[..4], b"USBC");
        assert_eq!(MODESWITCH_COMMAND[14], 6, "CB length");
        assert_eq!(MODESWITCH_COMMAND[15], 0x1b, "START STOP UNIT opcode");
        assert_eq!(MODESWITCH_COMMAND[19], 0x02, "LoEj bit");
    }

    #[test]
    fn handshake_has_eight_steps() {
        assert_eq!(HANDSHAKE_STEPS, 8);
    }

    #[test]
    fn handshake_step_names_are_unique() {
        let mut names: Vec<&str> = HANDSHAKE.iter().map(|s| s.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), HANDSHAKE_STEPS);
    }

    #[test]
    fn handshake_endpoints_have_correct_direction() {
        for step in &HANDSHAKE {
            if let Outbound::Bulk { endpoint, .. } = step.send {
                assert_eq!(endpoint & 0x80, 0, "{}: OUT endpoint", step.name);
            }
            if let Reply::Bulk { endpoint, .. } = step.reply {
                assert_eq!(endpoint & 0x80, 0x80, "{}: IN endpoint", step.name);
            }
        }
    }

    #[test]
    fn control_setup_directions() {
        for step in &HANDSHAKE {
            if let Outbound::Control { setup, .. } = step.send {
                assert_eq!(setup.request_type & 0x80, 0, "{}: OUT request", step.name);
            }
            if let Reply::Control { setup, .. } = step.reply {
                assert_eq!(setup.request_type & 0x80, 0x80, "{}: IN request", step.name);
            }
        }
    }

    #[test]
    fn default_at_endpoints_are_paired() {
        assert_eq!(AT_OUT_ENDPOINT & 0x80, 0);
        assert_eq!(AT_IN_ENDPOINT & 0x80, 0x80);
        assert_eq!(AT_OUT_ENDPOINT & 0x0F, AT_IN_ENDPOINT & 0x0F);
    }
}
