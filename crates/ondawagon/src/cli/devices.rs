//! `devices` subcommand — list supported dongles on the bus.

use ondawagon_lib::catalog::CatalogEntry;
use ondawagon_lib::transport::DeviceSummary;

use super::{
    CatalogHitJson, Context, DeviceErrorJson, DevicesOutput, LibusbBus, Result, dongle, print_json,
};

/// `bbb.aaa = vvvv:pppp (flags 0x..)` for one raw catalog hit.
pub(super) fn raw_line(dev: &DeviceSummary, entry: &CatalogEntry) -> String {
    format!("{dev} (flags 0x{:x})", entry.flags)
}

pub(super) fn cmd_devices(ctx: &Context, raw: bool, json: bool) -> Result<()> {
    let bus = LibusbBus::new()?;

    if raw {
        let hits = dongle::scan(&bus)?;
        if json {
            let out: Vec<CatalogHitJson> = hits
                .iter()
                .map(|(dev, entry)| CatalogHitJson {
                    bus: dev.bus,
                    address: dev.address,
                    vendor_id: dev.vendor_id,
                    product_id: dev.product_id,
                    flags: entry.flags.bits(),
                })
                .collect();
            return print_json(&out);
        }
        for (dev, entry) in &hits {
            println!("{}", raw_line(dev, entry));
        }
        return Ok(());
    }

    let listing = dongle::list_all(ctx, &bus)?;

    if json {
        let output = DevicesOutput {
            count: listing.dongles.len(),
            dongles: listing.dongles.iter().map(|d| d.info()).collect(),
            errors: listing
                .failures
                .iter()
                .map(|(dev, e)| DeviceErrorJson {
                    device: dev.to_string(),
                    error: e.to_string(),
                })
                .collect(),
        };
        listing.dongles.close_all();
        return print_json(&output);
    }

    if listing.dongles.is_empty() && listing.failures.is_empty() {
        println!("No supported dongles found.");
        return Ok(());
    }

    for handle in listing.dongles.iter() {
        println!("{}", handle.status_line());
    }
    if !listing.failures.is_empty() {
        println!();
        println!(
            "{} device{} could not be opened (run with -v for details).",
            listing.failures.len(),
            if listing.failures.len() == 1 { "" } else { "s" }
        );
    }
    listing.dongles.close_all();
    Ok(())
}
