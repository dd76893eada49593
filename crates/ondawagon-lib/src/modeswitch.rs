//! ZeroCD → modem mode switch.
//!
//! The dongle first enumerates as a virtual CD-ROM. Sending it a mass-storage
//! "eject" command block makes it drop off the bus and come back with the
//! modem personality (a different product ID). The handle used for the switch
//! is dead afterwards; the device must be rediscovered.

use crate::dongle::{DongleError, Result};
use crate::negotiate::{ClaimGuard, detach_if_bound, ensure_configuration, is_vendor_specific};
use crate::protocol::{
    MODEM_CONFIGURATION, MODESWITCH_COMMAND, MODESWITCH_COMMAND_LEN, MODESWITCH_TIMEOUT,
    STORAGE_INTERFACE, STORAGE_OUT_ENDPOINT,
};
use crate::transport::{TransportErrorKind, UsbTransport};

/// Eject the virtual CD-ROM and reset the device.
///
/// A reset that fails because the device already left the bus counts as
/// success: the eject did its job.
pub fn mode_switch(transport: &mut impl UsbTransport) -> Result<()> {
    for iface in transport.interfaces()? {
        if !is_vendor_specific(&iface) {
            detach_if_bound(transport, iface.number);
        }
    }
    ensure_configuration(transport, MODEM_CONFIGURATION)?;

    {
        let mut guard = ClaimGuard::new(transport);
        guard.claim(STORAGE_INTERFACE)?;
        let written =
            guard
                .transport()
                .write_bulk(STORAGE_OUT_ENDPOINT, &MODESWITCH_COMMAND, MODESWITCH_TIMEOUT)?;
        if written != MODESWITCH_COMMAND_LEN {
            return Err(DongleError::ShortTransfer {
                op: "mode switch",
                expected: MODESWITCH_COMMAND_LEN,
                actual: written,
            });
        }
    }

    match transport.reset() {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.kind, TransportErrorKind::NoDevice | TransportErrorKind::NotFound) => {
            log::debug!("reset: device already re-enumerating ({e})");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
