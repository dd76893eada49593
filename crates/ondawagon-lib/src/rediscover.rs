//! Finding a dongle again after its mode switch.
//!
//! After the eject and reset the dongle drops off the bus and re-enumerates
//! with its modem product ID, usually at a new address. There is no event to
//! wait for, so the bus is polled with exponential backoff until a non-ZeroCD
//! catalog device with the same serial number shows up.

use std::time::Duration;

use crate::config::Rediscover;
use crate::context::Context;
use crate::dongle::{self, DongleError, DongleHandle, Result};
use crate::transport::UsbBus;

/// Poll schedule state.
#[derive(Debug)]
pub struct Backoff {
    config: Rediscover,
    current_delay: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: &Rediscover) -> Self {
        Backoff {
            current_delay: Duration::from_millis(config.initial_delay_ms),
            config: config.clone(),
            attempts: 0,
        }
    }

    /// Record a poll that did not find the dongle and advance the delay.
    pub fn record_failure(&mut self) {
        self.attempts += 1;
        let next = (self.current_delay.as_millis() as f64 * self.config.multiplier) as u64;
        self.current_delay = Duration::from_millis(next.min(self.config.max_delay_ms));
    }

    /// Polls made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next poll.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.config.attempts
    }
}

/// One poll: the dongle with `serial`, if it is back in modem mode.
fn poll<B: UsbBus>(ctx: &Context, bus: &B, serial: &str) -> Result<Option<DongleHandle<B::Transport>>> {
    let mut listing = dongle::list_all(ctx, bus)?;
    let found = listing
        .dongles
        .take(serial)
        .filter(|handle| !handle.needs_mode_switch());
    listing.dongles.close_all();
    Ok(found)
}

/// Wait for the dongle with `serial` to re-enumerate in modem mode and open it.
///
/// Sleeps before every poll, so the first look happens after the initial
/// delay. Bus errors while the device is mid-reset count as "not yet".
pub fn wait_for_modem<B: UsbBus>(
    ctx: &Context,
    bus: &B,
    serial: &str,
) -> Result<DongleHandle<B::Transport>> {
    let mut backoff = Backoff::new(&ctx.config().rediscover);
    loop {
        std::thread::sleep(backoff.current_delay());
        match poll(ctx, bus, serial) {
            Ok(Some(handle)) => {
                log::info!(
                    "{serial}: back as {} after {} attempt(s)",
                    handle.summary(),
                    backoff.attempts() + 1
                );
                return Ok(handle);
            }
            Ok(None) => {}
            Err(e) => log::debug!("{serial}: enumeration failed: {e}"),
        }
        backoff.record_failure();
        if backoff.exhausted() {
            return Err(DongleError::Rediscovery {
                serial: serial.to_string(),
                attempts: backoff.attempts(),
            });
        }
        log::warn!(
            "{serial}: not back yet (attempt {}, retry in {:.1}s)",
            backoff.attempts(),
            backoff.current_delay().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dongle::DongleState;
    use crate::transport::mock::{MockBus, MockDevice};

    fn schedule(attempts: u32, initial: u64, max: u64, multiplier: f64) -> Rediscover {
        Rediscover {
            attempts,
            initial_delay_ms: initial,
            max_delay_ms: max,
            multiplier,
        }
    }

    fn instant_ctx(attempts: u32) -> Context {
        let mut config = Config::default();
        config.rediscover = schedule(attempts, 0, 0, 2.0);
        Context::new("test", 0, config)
    }

    #[test]
    fn backoff_progresses_on_failure() {
        let mut b = Backoff::new(&schedule(10, 100, 10_000, 2.0));
        assert_eq!(b.current_delay(), Duration::from_millis(100));

        b.record_failure();
        assert_eq!(b.attempts(), 1);
        assert_eq!(b.current_delay(), Duration::from_millis(200));

        b.record_failure();
        assert_eq!(b.current_delay(), Duration::from_millis(400));

        b.record_failure();
        assert_eq!(b.attempts(), 3);
        assert_eq!(b.current_delay(), Duration::from_millis(800));
    }

    #[test]
    fn backoff_capped_at_max() {
        let mut b = Backoff::new(&schedule(10, 1000, 4000, 2.0));
        b.record_failure(); // 1s → 2s
        assert_eq!(b.current_delay(), Duration::from_secs(2));
        b.record_failure(); // 2s → 4s (= max)
        assert_eq!(b.current_delay(), Duration::from_secs(4));
        b.record_failure(); // capped
        assert_eq!(b.current_delay(), Duration::from_secs(4));
    }

    #[test]
    fn custom_multiplier() {
        let mut b = Backoff::new(&schedule(10, 100, 10_000, 3.0));
        b.record_failure();
        assert_eq!(b.current_delay(), Duration::from_millis(300));
    }

    #[test]
    fn exhausted_after_configured_attempts() {
        let mut b = Backoff::new(&schedule(2, 0, 0, 2.0));
        assert!(!b.exhausted());
        b.record_failure();
        assert!(!b.exhausted());
        b.record_failure();
        assert!(b.exhausted());
    }

    #[test]
    fn default_schedule() {
        let b = Backoff::new(&Rediscover::default());
        assert_eq!(b.current_delay(), Duration::from_millis(250));
        assert_eq!(b.attempts(), 0);
    }

    #[test]
    fn finds_dongle_on_a_later_pass() {
        let bus = MockBus::with_passes(vec![
            vec![],
            vec![MockDevice::zero_cd("P671")],
            vec![MockDevice::modem("P671")],
        ]);
        let h = wait_for_modem(&instant_ctx(5), &bus, "P671").unwrap();
        assert_eq!(h.state(), DongleState::Ready);
        assert_eq!(h.summary().product_id, 0x1008);
    }

    #[test]
    fn other_serials_are_ignored() {
        let bus = MockBus::new(vec![MockDevice::modem("OTHER")]);
        let err = wait_for_modem(&instant_ctx(3), &bus, "P671").unwrap_err();
        assert!(matches!(
            err,
            DongleError::Rediscovery { attempts: 3, .. }
        ));
    }

    #[test]
    fn still_zero_cd_is_not_back() {
        let bus = MockBus::new(vec![MockDevice::zero_cd("P671")]);
        assert!(wait_for_modem(&instant_ctx(2), &bus, "P671").is_err());
    }

    #[test]
    fn rediscovery_error_display() {
        let e = DongleError::Rediscovery {
            serial: "P671".into(),
            attempts: 10,
        };
        assert_eq!(
            e.to_string(),
            "dongle P671: did not come back in modem mode after 10 attempts"
        );
    }
}
