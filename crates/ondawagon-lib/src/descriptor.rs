//! String descriptor reading and lossy ASCII decoding.

use std::time::Duration;

use crate::protocol::{
    LANGID_EN_US, STRING_DESCRIPTOR_MAX, USB_DT_STRING, USB_REQ_GET_DESCRIPTOR,
    USB_REQ_TYPE_STANDARD_IN,
};
use crate::transport::{ControlSetup, UsbTransport};

/// Transliterate UTF-16LE code units to ASCII.
///
/// A unit with a zero high byte and a printable ASCII low byte is kept; every
/// other unit becomes `?`. A trailing odd byte is ignored.
pub fn decode_units(units: &[u8]) -> String {
    units
        .chunks_exact(2)
        .map(|unit| match unit {
            [lo, 0] if lo.is_ascii_graphic() || *lo == b' ' => *lo as char,
            _ => '?',
        })
        .collect()
}

/// Decode a raw string descriptor as returned by the device (header included).
///
/// Returns `None` when the descriptor is empty, when `bLength` disagrees with
/// the number of bytes actually returned, or when `bDescriptorType` is not
/// `STRING`.
pub fn decode(raw: &[u8]) -> Option<String> {
    if raw.len() <= 2 {
        return None;
    }
    if raw[0] as usize != raw.len() || raw[1] != USB_DT_STRING {
        return None;
    }
    Some(decode_units(&raw[2..]))
}

/// Read string descriptor `index` (US English) and decode it.
///
/// Index 0 is the language table, not a string, and yields `None`.
pub fn read_string(transport: &impl UsbTransport, index: u8, timeout: Duration) -> Option<String> {
    if index == 0 {
        return None;
    }
    let setup = ControlSetup {
        request_type: USB_REQ_TYPE_STANDARD_IN,
        request: USB_REQ_GET_DESCRIPTOR,
        value: ((USB_DT_STRING as u16) << 8) | index as u16,
        index: LANGID_EN_US,
    };
    let mut buf = [0u8; STRING_DESCRIPTOR_MAX];
    match transport.read_control(setup, &mut buf, timeout) {
        Ok(n) => {
            let decoded = decode(&buf[..n]);
            if decoded.is_none() {
                log::debug!("string descriptor {index}: malformed ({n} bytes)");
            }
            decoded
        }
        Err(e) => {
            log::debug!("string descriptor {index}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockDevice, MockTransport, string_descriptor};

    const TIMEOUT: Duration = Duration::from_millis(1000);

    fn utf16_descriptor(units: &[u16]) -> Vec<u8> {
        let mut raw = vec![(2 + units.len() * 2) as u8, USB_DT_STRING];
        for u in units {
            raw.extend_from_slice(&u.to_le_bytes());
        }
        raw
    }

    #[test]
    fn decodes_ascii() {
        let raw = utf16_descriptor(&"ABC123".encode_utf16().collect::<Vec<_>>());
        assert_eq!(raw[0], 14);
        assert_eq!(raw[1], 0x03);
        assert_eq!(decode(&raw).as_deref(), Some("ABC123"));
    }

    #[test]
    fn non_ascii_unit_becomes_question_mark() {
        let raw = utf16_descriptor(&[b'A' as u16, 0x4E2D, b'B' as u16]);
        assert_eq!(decode(&raw).as_deref(), Some("A?B"));
    }

    #[test]
    fn non_printable_low_byte_becomes_question_mark() {
        let raw = utf16_descriptor(&[b'A' as u16, 0x0007, 0x007F, b'Z' as u16]);
        assert_eq!(decode(&raw).as_deref(), Some("A??Z"));
    }

    #[test]
    fn space_is_kept() {
        let raw = utf16_descriptor(&"ZTE MSM".encode_utf16().collect::<Vec<_>>());
        assert_eq!(decode(&raw).as_deref(), Some("ZTE MSM"));
    }

    #[test]
    fn latin1_high_byte_zero_but_not_ascii() {
        // U+00E9 has a zero high byte but is not ASCII.
        let raw = utf16_descriptor(&[0x00E9]);
        assert_eq!(decode(&raw).as_deref(), Some("?"));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut raw = utf16_descriptor(&[b'A' as u16, b'B' as u16]);
        raw[0] = 10; // claims more than returned
        assert_eq!(decode(&raw), None);

        let mut raw = utf16_descriptor(&[b'A' as u16, b'B' as u16]);
        raw.push(0); // returned more than claimed
        assert_eq!(decode(&raw), None);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut raw = utf16_descriptor(&[b'A' as u16]);
        raw[1] = 0x02; // CONFIGURATION
        assert_eq!(decode(&raw), None);
    }

    #[test]
    fn empty_and_header_only_are_rejected() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[2]), None);
        assert_eq!(decode(&[2, USB_DT_STRING]), None);
    }

    #[test]
    fn decode_units_ignores_trailing_odd_byte() {
        assert_eq!(decode_units(&[b'O', 0, b'K', 0, b'!']), "OK");
    }

    #[test]
    fn read_string_from_device() {
        let mut dev = MockDevice::new(0x19d2, 0x1008);
        dev.strings.insert(3, string_descriptor("P671A2TEL00000"));
        let t = MockTransport::new(dev);
        assert_eq!(read_string(&t, 3, TIMEOUT).as_deref(), Some("P671A2TEL00000"));
    }

    #[test]
    fn read_string_missing_index_is_none() {
        let t = MockTransport::new(MockDevice::new(0x19d2, 0x1008));
        assert_eq!(read_string(&t, 5, TIMEOUT), None);
    }

    #[test]
    fn read_string_index_zero_is_none() {
        let mut dev = MockDevice::new(0x19d2, 0x1008);
        dev.strings.insert(0, vec![4, USB_DT_STRING, 0x09, 0x04]);
        let t = MockTransport::new(dev);
        assert_eq!(read_string(&t, 0, TIMEOUT), None);
        assert!(t.calls().is_empty(), "index 0 must not hit the wire");
    }

    #[test]
    fn read_string_malformed_is_none() {
        let mut dev = MockDevice::new(0x19d2, 0x1008);
        dev.strings.insert(4, vec![40, USB_DT_STRING, b'X', 0]);
        let t = MockTransport::new(dev);
        assert_eq!(read_string(&t, 4, TIMEOUT), None);
    }

    #[test]
    fn read_string_sends_get_descriptor() {
        let mut dev = MockDevice::new(0x19d2, 0x1008);
        dev.strings.insert(2, string_descriptor("MSM"));
        let t = MockTransport::new(dev);
        read_string(&t, 2, TIMEOUT);
        let calls = t.calls();
        let crate::transport::mock::MockCall::ControlIn(setup, len) = calls[0] else {
            panic!("expected control in, got {calls:?}");
        };
        assert_eq!(setup.request_type, 0x80);
        assert_eq!(setup.request, 0x06);
        assert_eq!(setup.value, 0x0302);
        assert_eq!(setup.index, 0x0409);
        assert_eq!(len, 256);
    }

    #[test]
    fn read_string_uses_given_timeout() {
        let mut dev = MockDevice::new(0x19d2, 0x1008);
        dev.strings.insert(3, string_descriptor("P671"));
        let t = MockTransport::new(dev);
        read_string(&t, 3, Duration::from_millis(2500));
        assert_eq!(t.control_timeouts(), vec![Duration::from_millis(2500)]);
    }
}
