//! Dongle handles, enumeration and the bring-up state machine.
//!
//! A handle moves through three states:
//!
//! ```text
//! ZeroCd ──mode_switch──▶ (handle consumed; rediscover) ──▶ Ready ──negotiate + initialise──▶ Live
//! ```
//!
//! Only a live handle carries AT commands. Every handle owns its transport;
//! dropping the handle closes the device, and [`DongleHandle::close`] also
//! releases claimed interfaces first.

use std::fmt;

use serde::Serialize;

use crate::catalog::{self, CatalogEntry};
use crate::config::Timeouts;
use crate::context::Context;
use crate::descriptor;
use crate::handshake::{self, HandshakeReport};
use crate::negotiate;
use crate::protocol::MODEM_CONFIGURATION;
use crate::transport::{DeviceSummary, TransportError, UsbBus, UsbTransport};

// ── Error type ──

/// Errors from dongle discovery and bring-up.
#[derive(Debug)]
pub enum DongleError {
    Transport(TransportError),
    /// A transfer moved fewer bytes than required.
    ShortTransfer {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A read returned zero bytes.
    EmptyResponse(&'static str),
    /// A required string descriptor was missing or malformed.
    BadDescriptor(String),
    /// AT command on a dongle that has not completed bring-up.
    NotLive(DongleState),
    EmptyCommand,
    /// Operation not valid in the handle's current state.
    WrongState {
        op: &'static str,
        expected: DongleState,
        actual: DongleState,
    },
    /// No vendor-specific interface to claim.
    NoInterface,
    /// No dongle with this serial number.
    NotFound(String),
    /// The dongle did not come back in modem mode after a mode switch.
    Rediscovery { serial: String, attempts: u32 },
    /// A handshake step the policy marks fatal failed.
    Handshake {
        step: usize,
        name: &'static str,
        source: Box<DongleError>,
    },
}

impl fmt::Display for DongleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DongleError::Transport(e) => write!(f, "{e}"),
            DongleError::ShortTransfer {
                op,
                expected,
                actual,
            } => write!(f, "{op}: short transfer ({actual} of {expected} bytes)"),
            DongleError::EmptyResponse(op) => write!(f, "{op}: device returned no data"),
            DongleError::BadDescriptor(what) => write!(f, "unreadable {what} string descriptor"),
            DongleError::NotLive(state) => write!(f, "dongle is not live (state {state})"),
            DongleError::EmptyCommand => write!(f, "empty AT command"),
            DongleError::WrongState {
                op,
                expected,
                actual,
            } => write!(f, "{op}: dongle is {actual}, expected {expected}"),
            DongleError::NoInterface => write!(f, "no vendor-specific interface to claim"),
            DongleError::NotFound(serial) => write!(f, "dongle {serial}: not found"),
            DongleError::Rediscovery { serial, attempts } => write!(
                f,
                "dongle {serial}: did not come back in modem mode after {attempts} attempts"
            ),
            DongleError::Handshake { step, name, source } => {
                write!(f, "init handshake step {step} ({name}): {source}")
            }
        }
    }
}

impl std::error::Error for DongleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DongleError::Transport(e) => Some(e),
            DongleError::Handshake { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<TransportError> for DongleError {
    fn from(e: TransportError) -> Self {
        DongleError::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, DongleError>;

// ── State ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DongleState {
    /// Enumerated as a virtual CD-ROM; needs a mode switch.
    ZeroCd,
    /// Modem personality, not yet initialised.
    Ready,
    /// Interfaces claimed and init handshake done.
    Live,
}

impl fmt::Display for DongleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DongleState::ZeroCd => "ZEROCD",
            DongleState::Ready => "READY",
            DongleState::Live => "LIVE",
        })
    }
}

/// Serializable snapshot of a handle, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct DongleInfo {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub state: DongleState,
    pub serial: String,
    pub manufacturer: String,
    pub product: String,
}

// ── Handle ──

/// One opened dongle.
pub struct DongleHandle<T: UsbTransport> {
    transport: T,
    summary: DeviceSummary,
    entry: CatalogEntry,
    state: DongleState,
    serial: String,
    manufacturer: String,
    product: String,
    claimed: Vec<u8>,
}

impl<T: UsbTransport> fmt::Debug for DongleHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DongleHandle")
            .field("summary", &self.summary)
            .field("state", &self.state)
            .field("serial", &self.serial)
            .field("claimed", &self.claimed)
            .finish_non_exhaustive()
    }
}

impl<T: UsbTransport> DongleHandle<T> {
    /// Read the identity strings of an opened catalog device.
    ///
    /// Serial number and product label are required. A missing manufacturer
    /// string reads as empty.
    pub fn open(
        transport: T,
        summary: DeviceSummary,
        entry: CatalogEntry,
        timeouts: &Timeouts,
    ) -> Result<Self> {
        let timeout = timeouts.control();
        let serial = descriptor::read_string(&transport, entry.serial_index, timeout)
            .ok_or_else(|| DongleError::BadDescriptor("serial number".into()))?;
        let product = descriptor::read_string(&transport, entry.label_index, timeout)
            .ok_or_else(|| DongleError::BadDescriptor("product".into()))?;
        let manufacturer = descriptor::read_string(&transport, summary.manufacturer_index, timeout)
            .unwrap_or_default();
        let state = if entry.is_zero_cd() {
            DongleState::ZeroCd
        } else {
            DongleState::Ready
        };
        log::debug!("{summary}: {serial} ({state})");
        Ok(DongleHandle {
            transport,
            summary,
            entry,
            state,
            serial,
            manufacturer,
            product,
            claimed: Vec::new(),
        })
    }

    pub fn state(&self) -> DongleState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == DongleState::Live
    }

    pub fn needs_mode_switch(&self) -> bool {
        self.state == DongleState::ZeroCd
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn summary(&self) -> &DeviceSummary {
        &self.summary
    }

    pub fn entry(&self) -> &CatalogEntry {
        &self.entry
    }

    pub fn claimed_interfaces(&self) -> &[u8] {
        &self.claimed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn require(&self, op: &'static str, expected: DongleState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DongleError::WrongState {
                op,
                expected,
                actual: self.state,
            })
        }
    }

    /// Switch a ZeroCD dongle to modem mode. The handle is closed afterwards;
    /// find the dongle again with [`crate::rediscover::wait_for_modem`].
    pub fn mode_switch(mut self) -> Result<()> {
        self.require("mode switch", DongleState::ZeroCd)?;
        log::info!("{}: switching to modem mode", self.serial);
        crate::modeswitch::mode_switch(&mut self.transport)
    }

    /// Detach kernel drivers from the vendor-specific interfaces and claim them.
    ///
    /// All or nothing: on failure no interface stays claimed.
    pub fn negotiate(&mut self) -> Result<()> {
        self.require("negotiate", DongleState::Ready)?;
        if !self.claimed.is_empty() {
            return Ok(());
        }
        let claimed = negotiate::detach_and_claim(
            &mut self.transport,
            MODEM_CONFIGURATION,
            negotiate::is_vendor_specific,
        )?;
        if claimed.is_empty() {
            return Err(DongleError::NoInterface);
        }
        log::debug!("{}: claimed interfaces {claimed:?}", self.serial);
        self.claimed = claimed;
        Ok(())
    }

    /// Run the init handshake on a negotiated dongle and mark it live.
    ///
    /// Fails only when a step the policy marks fatal fails; the handle then
    /// stays `Ready` with its interfaces claimed. An advisory failure ends the
    /// handshake early but the dongle still goes live; it is in the returned
    /// report.
    pub fn initialise(&mut self, ctx: &Context) -> Result<HandshakeReport> {
        self.require("init handshake", DongleState::Ready)?;
        if self.claimed.is_empty() {
            return Err(DongleError::NoInterface);
        }
        let report = handshake::run_handshake(&self.transport, ctx).into_result()?;
        self.state = DongleState::Live;
        match &report.failure {
            None => log::info!("{}: live", self.serial),
            Some(f) => log::info!(
                "{}: live (handshake stopped at step {} of {})",
                self.serial,
                f.step,
                crate::protocol::HANDSHAKE_STEPS
            ),
        }
        Ok(report)
    }

    /// [`negotiate`](Self::negotiate) then [`initialise`](Self::initialise).
    pub fn make_live(&mut self, ctx: &Context) -> Result<HandshakeReport> {
        self.negotiate()?;
        self.initialise(ctx)
    }

    /// Send one AT command. See [`crate::at::send_command`].
    pub fn send_command(&self, ctx: &Context, command: &str) -> Result<String> {
        crate::at::send_command(self, ctx, command)
    }

    /// `"<serial>: <STATE>: <manufacturer> / <product>"`
    pub fn status_line(&self) -> String {
        format!(
            "{}: {}: {} / {}",
            self.serial, self.state, self.manufacturer, self.product
        )
    }

    pub fn info(&self) -> DongleInfo {
        DongleInfo {
            bus: self.summary.bus,
            address: self.summary.address,
            vendor_id: self.summary.vendor_id,
            product_id: self.summary.product_id,
            state: self.state,
            serial: self.serial.clone(),
            manufacturer: self.manufacturer.clone(),
            product: self.product.clone(),
        }
    }

    /// Release claimed interfaces (reverse order) and close the device.
    pub fn close(mut self) {
        for iface in self.claimed.drain(..).rev() {
            if let Err(e) = self.transport.release_interface(iface) {
                log::debug!("{}: interface {iface}: {e}", self.serial);
            }
        }
    }
}

// ── Collection ──

/// Dongles opened by one enumeration pass, in bus order.
pub struct DongleList<T: UsbTransport> {
    dongles: Vec<DongleHandle<T>>,
}

impl<T: UsbTransport> Default for DongleList<T> {
    fn default() -> Self {
        DongleList {
            dongles: Vec::new(),
        }
    }
}

impl<T: UsbTransport> DongleList<T> {
    pub fn push(&mut self, handle: DongleHandle<T>) {
        self.dongles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.dongles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dongles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DongleHandle<T>> {
        self.dongles.iter()
    }

    pub fn serials(&self) -> Vec<&str> {
        self.dongles.iter().map(|d| d.serial()).collect()
    }

    /// Remove the dongle with this serial (ASCII case-insensitive).
    pub fn take(&mut self, serial: &str) -> Option<DongleHandle<T>> {
        let pos = self
            .dongles
            .iter()
            .position(|d| d.serial.eq_ignore_ascii_case(serial))?;
        Some(self.dongles.remove(pos))
    }

    pub fn take_first(&mut self) -> Option<DongleHandle<T>> {
        if self.dongles.is_empty() {
            None
        } else {
            Some(self.dongles.remove(0))
        }
    }

    pub fn close_all(self) {
        for handle in self.dongles {
            handle.close();
        }
    }
}

impl<T: UsbTransport> IntoIterator for DongleList<T> {
    type Item = DongleHandle<T>;
    type IntoIter = std::vec::IntoIter<DongleHandle<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.dongles.into_iter()
    }
}

// ── Enumeration ──

/// Catalog devices on the bus, in enumeration order. Opens nothing.
pub fn scan<B: UsbBus>(bus: &B) -> Result<Vec<(DeviceSummary, &'static CatalogEntry)>> {
    Ok(bus
        .devices()?
        .into_iter()
        .filter_map(|dev| catalog::lookup(dev.vendor_id, dev.product_id).map(|e| (dev, e)))
        .collect())
}

/// Result of [`list_all`]: opened dongles plus the catalog devices that
/// could not be opened.
pub struct Listing<T: UsbTransport> {
    pub dongles: DongleList<T>,
    pub failures: Vec<(DeviceSummary, DongleError)>,
}

/// Open a single catalog device.
pub fn open_device<B: UsbBus>(
    ctx: &Context,
    bus: &B,
    summary: &DeviceSummary,
    entry: &CatalogEntry,
) -> Result<DongleHandle<B::Transport>> {
    let transport = bus.open(summary)?;
    DongleHandle::open(transport, *summary, *entry, &ctx.config().timeouts)
}

/// Open every catalog device on the bus.
///
/// A device that fails to open is logged, recorded in
/// [`Listing::failures`] and skipped; it never aborts the listing.
pub fn list_all<B: UsbBus>(ctx: &Context, bus: &B) -> Result<Listing<B::Transport>> {
    let mut listing = Listing {
        dongles: DongleList::default(),
        failures: Vec::new(),
    };
    for (summary, entry) in scan(bus)? {
        match open_device(ctx, bus, &summary, entry) {
            Ok(handle) => listing.dongles.push(handle),
            Err(e) => {
                log::warn!("{}", ctx.describe(&format!("{summary}: {e}")));
                listing.failures.push((summary, e));
            }
        }
    }
    Ok(listing)
}

/// Open the dongle with this serial number, closing every other one.
///
/// An empty serial selects the first dongle found.
pub fn open_by_serial<B: UsbBus>(
    ctx: &Context,
    bus: &B,
    serial: &str,
) -> Result<DongleHandle<B::Transport>> {
    let serial = serial.trim();
    let mut listing = list_all(ctx, bus)?;
    let found = if serial.is_empty() {
        listing.dongles.take_first()
    } else {
        listing.dongles.take(serial)
    };
    match found {
        Some(handle) => {
            listing.dongles.close_all();
            Ok(handle)
        }
        None => {
            if !listing.dongles.is_empty() {
                log::info!("available: {}", listing.dongles.serials().join(", "));
            }
            Err(DongleError::NotFound(serial.to_string()))
        }
    }
}

/// Bring the dongle with this serial all the way to `Live`, mode switching
/// and rediscovering it first if it is still in ZeroCD mode.
///
/// Returns the live handle with the report of its init handshake.
pub fn bring_up<B: UsbBus>(
    ctx: &Context,
    bus: &B,
    serial: &str,
) -> Result<(DongleHandle<B::Transport>, HandshakeReport)> {
    let handle = open_by_serial(ctx, bus, serial)?;
    let mut handle = if handle.needs_mode_switch() {
        let serial = handle.serial().to_string();
        log::info!("{serial}: switching to modem mode");
        handle.mode_switch()?;
        crate::rediscover::wait_for_modem(ctx, bus, &serial)?
    } else {
        handle
    };
    let report = handle.make_live(ctx)?;
    Ok((handle, report))
}
