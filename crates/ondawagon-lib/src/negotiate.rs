//! Interface negotiation: take interfaces away from the OS and claim them.
//!
//! Claiming is all-or-nothing. A [`ClaimGuard`] releases everything it claimed,
//! in reverse order, unless it is committed.

use crate::dongle::Result;
use crate::protocol::USB_CLASS_VENDOR_SPEC;
use crate::transport::{InterfaceClass, TransportErrorKind, UsbTransport};

/// Interface whose class, subclass and protocol are all vendor-specific.
pub fn is_vendor_specific(iface: &InterfaceClass) -> bool {
    iface.class == USB_CLASS_VENDOR_SPEC
        && iface.sub_class == USB_CLASS_VENDOR_SPEC
        && iface.protocol == USB_CLASS_VENDOR_SPEC
}

/// Detach the kernel driver from `iface` if one is bound.
///
/// Returns whether a driver was detached. A failed detach is logged and not
/// propagated: the claim that follows reports the real problem.
pub fn detach_if_bound(transport: &mut impl UsbTransport, iface: u8) -> bool {
    match transport.detach_kernel_driver(iface) {
        Ok(()) => {
            log::debug!("interface {iface}: detached kernel driver");
            true
        }
        Err(e) if matches!(e.kind, TransportErrorKind::NotFound | TransportErrorKind::NotSupported) => {
            false
        }
        Err(e) => {
            log::warn!("interface {iface}: {e}");
            false
        }
    }
}

/// Switch to `configuration` unless it is already active.
pub fn ensure_configuration(transport: &mut impl UsbTransport, configuration: u8) -> Result<()> {
    let active = transport.active_configuration()?;
    if active != configuration {
        log::debug!("configuration {active} -> {configuration}");
        transport.set_active_configuration(configuration)?;
    }
    Ok(())
}

/// Interfaces claimed so far; released in reverse order on drop.
pub struct ClaimGuard<'a, T: UsbTransport> {
    transport: &'a mut T,
    claimed: Vec<u8>,
}

impl<'a, T: UsbTransport> ClaimGuard<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        ClaimGuard {
            transport,
            claimed: Vec::new(),
        }
    }

    pub fn claim(&mut self, iface: u8) -> Result<()> {
        self.transport.claim_interface(iface)?;
        self.claimed.push(iface);
        Ok(())
    }

    pub fn transport(&mut self) -> &mut T {
        &mut *self.transport
    }

    /// Keep the claims; the caller now owns their release.
    pub fn commit(mut self) -> Vec<u8> {
        std::mem::take(&mut self.claimed)
    }
}

impl<T: UsbTransport> Drop for ClaimGuard<'_, T> {
    fn drop(&mut self) {
        for &iface in self.claimed.iter().rev() {
            if let Err(e) = self.transport.release_interface(iface) {
                log::debug!("interface {iface}: {e}");
            }
        }
    }
}

/// Detach and claim every interface `selector` accepts under `configuration`.
///
/// A configuration change is refused while any interface has a driver bound,
/// so every interface is detached first when the active configuration
/// differs. Interfaces are selected from the descriptor read after the switch.
///
/// On failure every interface claimed by this call has been released again.
/// Returns the claimed interface numbers in claim order.
pub fn detach_and_claim<T, F>(transport: &mut T, configuration: u8, selector: F) -> Result<Vec<u8>>
where
    T: UsbTransport,
    F: Fn(&InterfaceClass) -> bool,
{
    if transport.active_configuration()? != configuration {
        for iface in transport.interfaces()? {
            detach_if_bound(transport, iface.number);
        }
        ensure_configuration(transport, configuration)?;
    }

    let selected: Vec<u8> = transport
        .interfaces()?
        .iter()
        .filter(|iface| selector(*iface))
        .map(|iface| iface.number)
        .collect();

    for &iface in &selected {
        detach_if_bound(transport, iface);
    }

    let mut guard = ClaimGuard::new(transport);
    for &iface in &selected {
        guard.claim(iface)?;
    }
    Ok(guard.commit())
}
