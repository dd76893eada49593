//! Supported-device catalog.
//!
//! A static table keyed by `(vendor_id, product_id)`. Devices missing from the
//! table are not ours and are skipped during enumeration; that is never an error.
//!
//! The table must stay sorted ascending by [`CatalogEntry::key`] with no
//! duplicates: [`lookup`] is a binary search and silently misses entries in an
//! unsorted table. The tests below enforce this.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

/// Per-entry flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CatalogFlags(u8);

impl CatalogFlags {
    pub const NONE: CatalogFlags = CatalogFlags(0);
    /// Device enumerates in ZeroCD (virtual CD-ROM) mode and needs a mode switch.
    pub const ZERO_CD: CatalogFlags = CatalogFlags(1 << 0);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: CatalogFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::LowerHex for CatalogFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// One supported device personality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub flags: CatalogFlags,
    /// String descriptor index holding the serial number.
    pub serial_index: u8,
    /// String descriptor index holding the product label.
    pub label_index: u8,
}

impl CatalogEntry {
    /// Packed search key: `(vendor_id << 16) | product_id`.
    pub const fn key(&self) -> u32 {
        pack(self.vendor_id, self.product_id)
    }

    pub const fn is_zero_cd(&self) -> bool {
        self.flags.contains(CatalogFlags::ZERO_CD)
    }
}

const fn pack(vendor_id: u16, product_id: u16) -> u32 {
    ((vendor_id as u32) << 16) | product_id as u32
}

const fn entry(vendor_id: u16, product_id: u16, flags: CatalogFlags) -> CatalogEntry {
    CatalogEntry {
        vendor_id,
        product_id,
        flags,
        serial_index: 3,
        label_index: 2,
    }
}

// ── ZTE (ONDA-branded) ──

/// Known devices, ordered by vendor then product.
pub static CATALOG: [CatalogEntry; 2] = [
    entry(0x19d2, 0x1007, CatalogFlags::ZERO_CD), // MSM modem, ZeroCD personality
    entry(0x19d2, 0x1008, CatalogFlags::NONE),    // MSM modem, composite modem personality
];

/// Look up a device in the built-in catalog.
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static CatalogEntry> {
    lookup_in(&CATALOG, vendor_id, product_id)
}

/// Binary search `table` (sorted ascending by key) for a device.
pub fn lookup_in(table: &[CatalogEntry], vendor_id: u16, product_id: u16) -> Option<&CatalogEntry> {
    let needle = pack(vendor_id, product_id);
    let mut lo = 0usize;
    let mut hi = table.len();

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match table[mid].key().cmp(&needle) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Some(&table[mid]),
        }
    }
    None
}

/// Whether `table` satisfies the ordering invariant [`lookup_in`] relies on.
pub fn is_strictly_sorted(table: &[CatalogEntry]) -> bool {
    table.windows(2).all(|w| w[0].key() < w[1].key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Tables of distinct keys over a narrow vendor range, so entries share
    /// vendors and differ by product.
    fn table_strategy() -> impl Strategy<Value = Vec<CatalogEntry>> {
        prop::collection::hash_set((0x1900u16..0x1908, any::<u16>()), 0..200).prop_map(|keys| {
            keys.into_iter()
                .map(|(v, p)| {
                    let flags = if p % 2 == 0 {
                        CatalogFlags::ZERO_CD
                    } else {
                        CatalogFlags::NONE
                    };
                    entry(v, p, flags)
                })
                .collect()
        })
    }

    fn linear_scan(table: &[CatalogEntry], vendor_id: u16, product_id: u16) -> Option<&CatalogEntry> {
        table
            .iter()
            .find(|e| e.vendor_id == vendor_id && e.product_id == product_id)
    }

    #[test]
    fn builtin_catalog_is_sorted() {
        assert!(is_strictly_sorted(&CATALOG));
    }

    #[test]
    fn builtin_entries_are_found() {
        for e in &CATALOG {
            assert_eq!(lookup(e.vendor_id, e.product_id), Some(e));
        }
    }

    #[test]
    fn zte_zero_cd_personality() {
        let e = lookup(0x19d2, 0x1007).unwrap();
        assert!(e.is_zero_cd());
        let e = lookup(0x19d2, 0x1008).unwrap();
        assert!(!e.is_zero_cd());
    }

    #[test]
    fn unknown_device_is_absent() {
        assert!(lookup(0x19d2, 0x0001).is_none());
        assert!(lookup(0x1235, 0x1007).is_none());
        assert!(lookup(0, 0).is_none());
        assert!(lookup(0xFFFF, 0xFFFF).is_none());
    }

    #[test]
    fn empty_table_finds_nothing() {
        assert!(lookup_in(&[], 0x19d2, 0x1007).is_none());
    }

    #[test]
    fn single_entry_table() {
        let table = [entry(0x19d2, 0x1008, CatalogFlags::NONE)];
        assert!(lookup_in(&table, 0x19d2, 0x1008).is_some());
        assert!(lookup_in(&table, 0x19d2, 0x1007).is_none());
        assert!(lookup_in(&table, 0x19d2, 0x1009).is_none());
    }

    #[test]
    fn key_orders_vendor_before_product() {
        // Vendor dominates: a low product under a higher vendor sorts later.
        let a = entry(0x19d2, 0xFFFF, CatalogFlags::NONE);
        let b = entry(0x19d3, 0x0000, CatalogFlags::NONE);
        assert!(a.key() < b.key());
    }

    proptest! {
        #[test]
        fn every_position_in_sorted_table_is_reachable(table in table_strategy()) {
            // A comparator with the wrong sign only ever finds the middle element.
            let mut table = table;
            table.sort_by_key(|e| e.key());
            prop_assert!(is_strictly_sorted(&table));
            for e in &table {
                prop_assert_eq!(lookup_in(&table, e.vendor_id, e.product_id), Some(e));
            }
        }

        #[test]
        fn sorted_lookup_matches_linear_scan_over_unsorted_set(
            unsorted in table_strategy(),
            misses in prop::collection::vec((0x1900u16..0x1909, any::<u16>()), 0..64),
        ) {
            let mut sorted = unsorted.clone();
            sorted.sort_by_key(|e| e.key());

            let needles = unsorted
                .iter()
                .map(|e| (e.vendor_id, e.product_id))
                .chain(misses);
            for (v, p) in needles {
                prop_assert_eq!(lookup_in(&sorted, v, p), linear_scan(&unsorted, v, p));
            }
        }
    }

    #[test]
    fn unsorted_table_is_detected() {
        let table = [
            entry(0x19d2, 0x1008, CatalogFlags::NONE),
            entry(0x19d2, 0x1007, CatalogFlags::ZERO_CD),
        ];
        assert!(!is_strictly_sorted(&table));
    }

    #[test]
    fn duplicate_keys_are_not_strictly_sorted() {
        let table = [
            entry(0x19d2, 0x1007, CatalogFlags::ZERO_CD),
            entry(0x19d2, 0x1007, CatalogFlags::NONE),
        ];
        assert!(!is_strictly_sorted(&table));
    }

    #[test]
    fn flags_hex_format() {
        assert_eq!(format!("{:x}", CatalogFlags::ZERO_CD), "1");
        assert_eq!(format!("{:x}", CatalogFlags::NONE), "0");
    }
}
