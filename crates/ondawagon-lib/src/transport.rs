//! USB transport — the capability traits the bring-up logic is written against,
//! the libusb backend, and an in-memory mock.
//!
//! Nothing above this module talks to libusb directly. [`UsbBus`] enumerates and
//! opens devices; [`UsbTransport`] is one opened device handle.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

// ── Error type ──

/// What went wrong in a transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    /// Device is gone (unplugged, or re-enumerating after a reset).
    NoDevice,
    /// Entity not found (e.g. no kernel driver bound to the interface).
    NotFound,
    Busy,
    Access,
    /// Endpoint stalled.
    Pipe,
    NotSupported,
    Other(String),
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "operation timed out"),
            TransportErrorKind::NoDevice => write!(f, "no such device (it may have been disconnected)"),
            TransportErrorKind::NotFound => write!(f, "entity not found"),
            TransportErrorKind::Busy => write!(f, "resource busy"),
            TransportErrorKind::Access => write!(f, "access denied (insufficient permissions)"),
            TransportErrorKind::Pipe => write!(f, "pipe error (endpoint stalled)"),
            TransportErrorKind::NotSupported => write!(f, "operation not supported on this platform"),
            TransportErrorKind::Other(e) => write!(f, "{e}"),
        }
    }
}

/// A failed transport call, tagged with the name of the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub op: &'static str,
    pub kind: TransportErrorKind,
}

impl TransportError {
    pub fn new(op: &'static str, kind: TransportErrorKind) -> Self {
        TransportError { op, kind }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.op, self.kind)
    }
}

impl std::error::Error for TransportError {}

impl From<rusb::Error> for TransportErrorKind {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Timeout => TransportErrorKind::Timeout,
            rusb::Error::NoDevice => TransportErrorKind::NoDevice,
            rusb::Error::NotFound => TransportErrorKind::NotFound,
            rusb::Error::Busy => TransportErrorKind::Busy,
            rusb::Error::Access => TransportErrorKind::Access,
            rusb::Error::Pipe => TransportErrorKind::Pipe,
            rusb::Error::NotSupported => TransportErrorKind::NotSupported,
            other => TransportErrorKind::Other(other.to_string()),
        }
    }
}

/// Adapter for `map_err`: tags a libusb error with the operation name.
fn usb(op: &'static str) -> impl FnOnce(rusb::Error) -> TransportError {
    move |e| TransportError::new(op, e.into())
}

pub type Result<T> = std::result::Result<T, TransportError>;

// ── Descriptor summaries ──

/// Identity of an enumerated (not yet opened) device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// `iManufacturer` from the device descriptor (0 = none).
    pub manufacturer_index: u8,
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03}.{:03} = {:04x}:{:04x}",
            self.bus, self.address, self.vendor_id, self.product_id
        )
    }
}

/// Class triple of one interface in the active configuration (first alt setting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceClass {
    pub number: u8,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
}

/// Setup packet fields of a control transfer (`wLength` comes from the buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

// ── Traits ──

/// One opened USB device. Every call blocks for at most its timeout
/// (`reset` has no bound of its own).
pub trait UsbTransport {
    fn active_configuration(&self) -> Result<u8>;
    fn set_active_configuration(&mut self, config: u8) -> Result<()>;
    /// Interfaces of the active configuration descriptor.
    fn interfaces(&self) -> Result<Vec<InterfaceClass>>;
    /// Detach the kernel driver bound to `iface`. Fails with `NotFound` if none is bound.
    fn detach_kernel_driver(&mut self, iface: u8) -> Result<()>;
    fn claim_interface(&mut self, iface: u8) -> Result<()>;
    fn release_interface(&mut self, iface: u8) -> Result<()>;
    fn read_control(&self, setup: ControlSetup, buf: &mut [u8], timeout: Duration)
    -> Result<usize>;
    fn write_control(&self, setup: ControlSetup, data: &[u8], timeout: Duration) -> Result<usize>;
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize>;
    fn reset(&mut self) -> Result<()>;
}

/// Device enumeration and opening.
pub trait UsbBus {
    type Transport: UsbTransport;
    /// One enumeration pass over the connected devices.
    fn devices(&self) -> Result<Vec<DeviceSummary>>;
    fn open(&self, device: &DeviceSummary) -> Result<Self::Transport>;
}

// ── libusb backend ──

/// The host's USB bus through libusb.
pub struct LibusbBus {
    context: rusb::Context,
}

impl LibusbBus {
    pub fn new() -> Result<Self> {
        let context = rusb::Context::new().map_err(usb("libusb init"))?;
        Ok(LibusbBus { context })
    }
}

impl UsbBus for LibusbBus {
    type Transport = LibusbTransport;

    fn devices(&self) -> Result<Vec<DeviceSummary>> {
        use rusb::UsbContext;

        let list = self.context.devices().map_err(usb("get device list"))?;
        Ok(list
            .iter()
            .filter_map(|dev| {
                let desc = dev.device_descriptor().ok()?;
                Some(DeviceSummary {
                    bus: dev.bus_number(),
                    address: dev.address(),
                    vendor_id: desc.vendor_id(),
                    product_id: desc.product_id(),
                    manufacturer_index: desc.manufacturer_string_index().unwrap_or(0),
                })
            })
            .collect())
    }

    fn open(&self, device: &DeviceSummary) -> Result<LibusbTransport> {
        use rusb::UsbContext;

        let list = self.context.devices().map_err(usb("get device list"))?;
        let dev = list
            .iter()
            .find(|d| d.bus_number() == device.bus && d.address() == device.address)
            .ok_or_else(|| TransportError::new("open", TransportErrorKind::NoDevice))?;
        let handle = dev.open().map_err(usb("open"))?;
        Ok(LibusbTransport { handle })
    }
}

/// An opened libusb device handle. Closed on drop.
pub struct LibusbTransport {
    handle: rusb::DeviceHandle<rusb::Context>,
}

impl UsbTransport for LibusbTransport {
    fn active_configuration(&self) -> Result<u8> {
        self.handle
            .active_configuration()
            .map_err(usb("get configuration"))
    }

    fn set_active_configuration(&mut self, config: u8) -> Result<()> {
        self.handle
            .set_active_configuration(config)
            .map_err(usb("set configuration"))
    }

    fn interfaces(&self) -> Result<Vec<InterfaceClass>> {
        let config = self
            .handle
            .device()
            .active_config_descriptor()
            .map_err(usb("get config descriptor"))?;
        Ok(config
            .interfaces()
            .filter_map(|iface| iface.descriptors().next())
            .map(|alt| InterfaceClass {
                number: alt.interface_number(),
                class: alt.class_code(),
                sub_class: alt.sub_class_code(),
                protocol: alt.protocol_code(),
            })
            .collect())
    }

    fn detach_kernel_driver(&mut self, iface: u8) -> Result<()> {
        self.handle
            .detach_kernel_driver(iface)
            .map_err(usb("detach kernel driver"))
    }

    fn claim_interface(&mut self, iface: u8) -> Result<()> {
        self.handle
            .claim_interface(iface)
            .map_err(usb("claim interface"))
    }

    fn release_interface(&mut self, iface: u8) -> Result<()> {
        self.handle
            .release_interface(iface)
            .map_err(usb("release interface"))
    }

    fn read_control(
        &self,
        setup: ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        self.handle
            .read_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                buf,
                timeout,
            )
            .map_err(usb("control in"))
    }

    fn write_control(&self, setup: ControlSetup, data: &[u8], timeout: Duration) -> Result<usize> {
        self.handle
            .write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            )
            .map_err(usb("control out"))
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(usb("bulk in"))
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(usb("bulk out"))
    }

    fn reset(&mut self) -> Result<()> {
        self.handle.reset().map_err(usb("reset"))
    }
}

// ── Mock bus for testing ──

/// In-memory bus and devices for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
    use std::rc::Rc;

    /// A transport call as observed by the mock.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockCall {
        Open { vendor_id: u16, product_id: u16 },
        SetConfiguration(u8),
        DetachKernelDriver(u8),
        Claim(u8),
        Release(u8),
        ControlIn(ControlSetup, usize),
        ControlOut(ControlSetup, Vec<u8>),
        BulkIn(u8),
        BulkOut(u8, Vec<u8>),
        Reset,
    }

    /// Recorded calls shared between a bus and every transport it opened.
    pub type CallLog = Rc<RefCell<Vec<MockCall>>>;

    /// Scripted behaviour of one simulated device.
    #[derive(Debug, Clone)]
    pub struct MockDevice {
        pub summary: DeviceSummary,
        pub active_configuration: u8,
        pub interfaces: Vec<InterfaceClass>,
        /// Raw string descriptors (header included), keyed by index.
        pub strings: HashMap<u8, Vec<u8>>,
        /// Interfaces with a kernel driver bound.
        pub kernel_drivers: HashSet<u8>,
        /// Interfaces whose claim fails with `Busy`.
        pub fail_claim: HashSet<u8>,
        /// Configuration changes stall even with every driver detached.
        pub fail_set_configuration: bool,
        /// Queued bulk IN payloads per endpoint; an empty queue times out.
        pub bulk_in: HashMap<u8, VecDeque<Vec<u8>>>,
        /// Endpoints whose bulk writes time out.
        pub fail_bulk_out: HashSet<u8>,
        /// Caps the byte count a bulk write reports.
        pub short_write: Option<usize>,
        /// Control IN requests (by `bRequest`) that stall.
        pub fail_control_in: HashSet<u8>,
        /// Caps the byte count a control IN returns.
        pub short_control_in: Option<usize>,
        pub fail_reset: Option<TransportErrorKind>,
        pub fail_open: bool,
    }

    /// Encode `s` as a string descriptor (UTF-16LE with header).
    pub fn string_descriptor(s: &str) -> Vec<u8> {
        let mut out = vec![0u8, crate::protocol::USB_DT_STRING];
        for unit in s.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out[0] = out.len() as u8;
        out
    }

    fn vendor_interface(number: u8) -> InterfaceClass {
        InterfaceClass {
            number,
            class: 0xFF,
            sub_class: 0xFF,
            protocol: 0xFF,
        }
    }

    impl MockDevice {
        /// A device with no interfaces and no strings.
        pub fn new(vendor_id: u16, product_id: u16) -> Self {
            MockDevice {
                summary: DeviceSummary {
                    bus: 1,
                    address: 2,
                    vendor_id,
                    product_id,
                    manufacturer_index: 1,
                },
                active_configuration: 1,
                interfaces: Vec::new(),
                strings: HashMap::new(),
                kernel_drivers: HashSet::new(),
                fail_claim: HashSet::new(),
                fail_set_configuration: false,
                bulk_in: HashMap::new(),
                fail_bulk_out: HashSet::new(),
                short_write: None,
                fail_control_in: HashSet::new(),
                short_control_in: None,
                fail_reset: None,
                fail_open: false,
            }
        }

        /// ZTE dongle in ZeroCD mode: one mass-storage interface bound to usb-storage.
        pub fn zero_cd(serial: &str) -> Self {
            let mut dev = MockDevice::new(0x19d2, 0x1007)
                .with_identity(serial, "ZTE,Incorporated", "ZTE CDMA Technologies MSM");
            dev.interfaces = vec![InterfaceClass {
                number: 0,
                class: 0x08,
                sub_class: 0x06,
                protocol: 0x50,
            }];
            dev.kernel_drivers.insert(0);
            dev
        }

        /// ZTE dongle in modem mode: three vendor-specific interfaces plus storage.
        pub fn modem(serial: &str) -> Self {
            let mut dev = MockDevice::new(0x19d2, 0x1008)
                .with_identity(serial, "ZTE,Incorporated", "ZTE CDMA Technologies MSM");
            dev.summary.address = 3;
            dev.interfaces = vec![
                vendor_interface(0),
                vendor_interface(1),
                vendor_interface(2),
                InterfaceClass {
                    number: 3,
                    class: 0x08,
                    sub_class: 0x06,
                    protocol: 0x50,
                },
            ];
            dev.kernel_drivers.extend([0, 1, 2, 3]);
            dev
        }

        /// Set manufacturer (index 1), product (index 2) and serial (index 3) strings.
        pub fn with_identity(mut self, serial: &str, manufacturer: &str, product: &str) -> Self {
            self.strings.insert(1, string_descriptor(manufacturer));
            self.strings.insert(2, string_descriptor(product));
            self.strings.insert(3, string_descriptor(serial));
            self
        }

        /// Queue a bulk IN payload on `endpoint`.
        pub fn queue_bulk_in(&mut self, endpoint: u8, data: &[u8]) {
            self.bulk_in
                .entry(endpoint)
                .or_default()
                .push_back(data.to_vec());
        }

        /// Queue a full-length reply for every bulk-read step of the init handshake.
        pub fn with_handshake_replies(mut self) -> Self {
            for step in &crate::protocol::HANDSHAKE {
                if let crate::protocol::Reply::Bulk { endpoint, len } = step.reply {
                    self.queue_bulk_in(endpoint, &vec![0u8; len]);
                }
            }
            self
        }
    }

    /// In-memory transport. Behaviour comes from a [`MockDevice`] snapshot.
    pub struct MockTransport {
        device: MockDevice,
        bulk_in: RefCell<HashMap<u8, VecDeque<Vec<u8>>>>,
        kernel_drivers: HashSet<u8>,
        /// Currently claimed interfaces.
        pub claimed: BTreeSet<u8>,
        control_timeouts: RefCell<Vec<Duration>>,
        log: CallLog,
    }

    impl MockTransport {
        pub fn new(device: MockDevice) -> Self {
            Self::with_log(device, CallLog::default())
        }

        pub fn with_log(device: MockDevice, log: CallLog) -> Self {
            MockTransport {
                bulk_in: RefCell::new(device.bulk_in.clone()),
                kernel_drivers: device.kernel_drivers.clone(),
                claimed: BTreeSet::new(),
                control_timeouts: RefCell::new(Vec::new()),
                device,
                log,
            }
        }

        pub fn calls(&self) -> Vec<MockCall> {
            self.log.borrow().clone()
        }

        /// Timeouts passed to control IN transfers, in call order.
        pub fn control_timeouts(&self) -> Vec<Duration> {
            self.control_timeouts.borrow().clone()
        }

        pub fn summary(&self) -> &DeviceSummary {
            &self.device.summary
        }

        fn record(&self, call: MockCall) {
            self.log.borrow_mut().push(call);
        }
    }

    impl UsbTransport for MockTransport {
        fn active_configuration(&self) -> Result<u8> {
            Ok(self.device.active_configuration)
        }

        fn set_active_configuration(&mut self, config: u8) -> Result<()> {
            self.record(MockCall::SetConfiguration(config));
            // Changing configuration under a bound kernel driver is refused.
            if config != self.device.active_configuration && !self.kernel_drivers.is_empty() {
                return Err(TransportError::new(
                    "set configuration",
                    TransportErrorKind::Busy,
                ));
            }
            if self.device.fail_set_configuration {
                return Err(TransportError::new("set configuration", TransportErrorKind::Pipe));
            }
            self.device.active_configuration = config;
            Ok(())
        }

        fn interfaces(&self) -> Result<Vec<InterfaceClass>> {
            Ok(self.device.interfaces.clone())
        }

        fn detach_kernel_driver(&mut self, iface: u8) -> Result<()> {
            self.record(MockCall::DetachKernelDriver(iface));
            if self.kernel_drivers.remove(&iface) {
                Ok(())
            } else {
                Err(TransportError::new(
                    "detach kernel driver",
                    TransportErrorKind::NotFound,
                ))
            }
        }

        fn claim_interface(&mut self, iface: u8) -> Result<()> {
            self.record(MockCall::Claim(iface));
            if self.device.fail_claim.contains(&iface) || self.kernel_drivers.contains(&iface) {
                return Err(TransportError::new(
                    "claim interface",
                    TransportErrorKind::Busy,
                ));
            }
            self.claimed.insert(iface);
            Ok(())
        }

        fn release_interface(&mut self, iface: u8) -> Result<()> {
            self.record(MockCall::Release(iface));
            if self.claimed.remove(&iface) {
                Ok(())
            } else {
                Err(TransportError::new(
                    "release interface",
                    TransportErrorKind::NotFound,
                ))
            }
        }

        fn read_control(
            &self,
            setup: ControlSetup,
            buf: &mut [u8],
            timeout: Duration,
        ) -> Result<usize> {
            self.record(MockCall::ControlIn(setup, buf.len()));
            self.control_timeouts.borrow_mut().push(timeout);
            if self.device.fail_control_in.contains(&setup.request) {
                return Err(TransportError::new("control in", TransportErrorKind::Pipe));
            }
            // GET_DESCRIPTOR(STRING) is served from the string table.
            if setup.request == crate::protocol::USB_REQ_GET_DESCRIPTOR
                && (setup.value >> 8) as u8 == crate::protocol::USB_DT_STRING
            {
                let index = (setup.value & 0xFF) as u8;
                let Some(raw) = self.device.strings.get(&index) else {
                    return Err(TransportError::new("control in", TransportErrorKind::Pipe));
                };
                let n = raw.len().min(buf.len());
                buf[..n].copy_from_slice(&raw[..n]);
                return Ok(n);
            }
            let n = self
                .device
                .short_control_in
                .map_or(buf.len(), |max| max.min(buf.len()));
            buf[..n].fill(0);
            Ok(n)
        }

        fn write_control(
            &self,
            setup: ControlSetup,
            data: &[u8],
            _timeout: Duration,
        ) -> Result<usize> {
            self.record(MockCall::ControlOut(setup, data.to_vec()));
            Ok(data.len())
        }

        fn read_bulk(&self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            self.record(MockCall::BulkIn(endpoint));
            let mut queues = self.bulk_in.borrow_mut();
            match queues.get_mut(&endpoint).and_then(|q| q.pop_front()) {
                Some(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                None => Err(TransportError::new("bulk in", TransportErrorKind::Timeout)),
            }
        }

        fn write_bulk(&self, endpoint: u8, data: &[u8], _timeout: Duration) -> Result<usize> {
            self.record(MockCall::BulkOut(endpoint, data.to_vec()));
            if self.device.fail_bulk_out.contains(&endpoint) {
                return Err(TransportError::new("bulk out", TransportErrorKind::Timeout));
            }
            Ok(self
                .device
                .short_write
                .map_or(data.len(), |max| max.min(data.len())))
        }

        fn reset(&mut self) -> Result<()> {
            self.record(MockCall::Reset);
            match &self.device.fail_reset {
                Some(kind) => Err(TransportError::new("reset", kind.clone())),
                None => Ok(()),
            }
        }
    }

    /// In-memory bus. Each enumeration pass shows the next scripted device set;
    /// the last set stays in place once the script runs out.
    pub struct MockBus {
        passes: RefCell<VecDeque<Vec<MockDevice>>>,
        current: RefCell<Vec<MockDevice>>,
        log: CallLog,
    }

    impl MockBus {
        /// A bus that always shows `devices`.
        pub fn new(devices: Vec<MockDevice>) -> Self {
            Self::with_passes(vec![devices])
        }

        /// A bus whose successive enumeration passes show each set in turn.
        pub fn with_passes(passes: Vec<Vec<MockDevice>>) -> Self {
            MockBus {
                passes: RefCell::new(passes.into()),
                current: RefCell::new(Vec::new()),
                log: CallLog::default(),
            }
        }

        pub fn calls(&self) -> Vec<MockCall> {
            self.log.borrow().clone()
        }

        pub fn log(&self) -> CallLog {
            Rc::clone(&self.log)
        }
    }

    impl UsbBus for MockBus {
        type Transport = MockTransport;

        fn devices(&self) -> Result<Vec<DeviceSummary>> {
            if let Some(next) = self.passes.borrow_mut().pop_front() {
                *self.current.borrow_mut() = next;
            }
            Ok(self.current.borrow().iter().map(|d| d.summary).collect())
        }

        fn open(&self, device: &DeviceSummary) -> Result<MockTransport> {
            let dev = self
                .current
                .borrow()
                .iter()
                .find(|d| d.summary == *device)
                .cloned()
                .ok_or_else(|| TransportError::new("open", TransportErrorKind::NoDevice))?;
            self.log.borrow_mut().push(MockCall::Open {
                vendor_id: device.vendor_id,
                product_id: device.product_id,
            });
            if dev.fail_open {
                return Err(TransportError::new("open", TransportErrorKind::Access));
            }
            Ok(MockTransport::with_log(dev, Rc::clone(&self.log)))
        }
    }
}
