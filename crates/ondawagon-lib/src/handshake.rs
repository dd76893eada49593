//! Vendor init handshake.
//!
//! Runs the fixed message sequence from [`crate::protocol::HANDSHAKE`] over a
//! negotiated modem. Each step is one outbound message and at most one reply.
//! Replies are not interpreted; a reply shorter than expected fails the step.
//!
//! The first failed step ends the sequence. Whether that failure also aborts
//! bring-up is decided per step by [`crate::config::Handshake`]; an advisory
//! failure is logged and the dongle goes live anyway.

use crate::config::Timeouts;
use crate::context::Context;
use crate::dongle::{DongleError, Result};
use crate::protocol::{HANDSHAKE, HANDSHAKE_READ_BUFFER, HandshakeStep, Outbound, Reply};
use crate::transport::UsbTransport;

/// A step that did not complete.
#[derive(Debug)]
pub struct StepFailure {
    pub step: usize,
    pub name: &'static str,
    pub error: DongleError,
    pub fatal: bool,
}

/// Outcome of one run of the sequence.
#[derive(Debug, Default)]
pub struct HandshakeReport {
    /// Steps that completed before the sequence ended.
    pub completed: usize,
    /// The step that ended the sequence early, if any.
    pub failure: Option<StepFailure>,
}

impl HandshakeReport {
    /// Every step completed.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Turn a fatal failure into an error, keeping the report otherwise.
    pub fn into_result(self) -> Result<Self> {
        match self.failure {
            Some(f) if f.fatal => Err(DongleError::Handshake {
                step: f.step,
                name: f.name,
                source: Box::new(f.error),
            }),
            failure => Ok(HandshakeReport {
                completed: self.completed,
                failure,
            }),
        }
    }
}

/// Run the built-in init sequence.
pub fn run_handshake(transport: &impl UsbTransport, ctx: &Context) -> HandshakeReport {
    run_steps(transport, ctx, &HANDSHAKE)
}

/// Run `steps` in order, stopping at the first failure.
pub fn run_steps(
    transport: &impl UsbTransport,
    ctx: &Context,
    steps: &[HandshakeStep],
) -> HandshakeReport {
    let policy = &ctx.config().handshake;
    let timeouts = &ctx.config().timeouts;
    let mut report = HandshakeReport::default();

    for (i, step) in steps.iter().enumerate() {
        if let Err(error) = run_step(transport, step, timeouts) {
            let fatal = policy.is_fatal(i);
            if !fatal {
                log::warn!(
                    "handshake step {i} ({}): {error}, skipping the remaining {} step(s)",
                    step.name,
                    steps.len() - i - 1
                );
            }
            report.failure = Some(StepFailure {
                step: i,
                name: step.name,
                error,
                fatal,
            });
            break;
        }
        log::debug!("handshake step {i} ({}): ok", step.name);
        report.completed += 1;
    }
    report
}

/// Send one step's message and read its reply.
pub fn run_step(transport: &impl UsbTransport, step: &HandshakeStep, timeouts: &Timeouts) -> Result<()> {
    let (written, expected) = match step.send {
        Outbound::Control { setup, data } => {
            (transport.write_control(setup, data, timeouts.control())?, data.len())
        }
        Outbound::Bulk { endpoint, data } => {
            (transport.write_bulk(endpoint, data, timeouts.bulk_write())?, data.len())
        }
    };
    if written != expected {
        return Err(DongleError::ShortTransfer {
            op: "handshake write",
            expected,
            actual: written,
        });
    }

    let (read, expected) = match step.reply {
        Reply::None => return Ok(()),
        Reply::Control { setup, len } => {
            let mut buf = vec![0u8; len];
            (transport.read_control(setup, &mut buf, timeouts.handshake_read())?, len)
        }
        Reply::Bulk { endpoint, len } => {
            let mut buf = vec![0u8; len.max(HANDSHAKE_READ_BUFFER)];
            (transport.read_bulk(endpoint, &mut buf, timeouts.handshake_read())?, len)
        }
    };
    if read < expected {
        return Err(DongleError::ShortTransfer {
            op: "handshake read",
            expected,
            actual: read,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::{HANDSHAKE_IN_ENDPOINT, HANDSHAKE_STEPS};
    use crate::transport::mock::{MockCall, MockDevice, MockTransport};

    fn ctx_with_fatal(steps: &[usize]) -> Context {
        let mut config = Config::default();
        config.handshake.fatal_steps = steps.to_vec();
        Context::new("test", 0, config)
    }

    /// Index of the first step that reads a bulk reply.
    fn first_bulk_reply_step() -> usize {
        HANDSHAKE
            .iter()
            .position(|s| matches!(s.reply, Reply::Bulk { .. }))
            .unwrap()
    }

    #[test]
    fn full_sequence_completes() {
        let t = MockTransport::new(MockDevice::modem("P671").with_handshake_replies());
        let report = run_handshake(&t, &Context::default());
        assert!(report.succeeded());
        assert_eq!(report.completed, HANDSHAKE_STEPS);
    }

    #[test]
    fn messages_go_out_in_order() {
        let t = MockTransport::new(MockDevice::modem("P671").with_handshake_replies());
        run_handshake(&t, &Context::default());
        let sent: Vec<Vec<u8>> = t
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::ControlOut(_, data) | MockCall::BulkOut(_, data) => Some(data),
                _ => None,
            })
            .collect();
        let expected: Vec<Vec<u8>> = HANDSHAKE
            .iter()
            .map(|s| match s.send {
                Outbound::Control { data, .. } | Outbound::Bulk { data, .. } => data.to_vec(),
            })
            .collect();
        assert_eq!(sent, expected);
    }

    #[test]
    fn first_failure_ends_the_sequence() {
        // No bulk replies queued: the first bulk read times out.
        let first_bulk = first_bulk_reply_step();
        let t = MockTransport::new(MockDevice::modem("P671"));
        let report = run_handshake(&t, &Context::default());
        assert_eq!(report.completed, first_bulk);
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.step, first_bulk);
        assert!(!failure.fatal);

        let writes = t
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::ControlOut(..) | MockCall::BulkOut(..)))
            .count();
        assert_eq!(writes, first_bulk + 1, "nothing sent after the failed step");
    }

    #[test]
    fn advisory_failure_is_not_an_error() {
        let t = MockTransport::new(MockDevice::modem("P671"));
        let report = run_handshake(&t, &Context::default()).into_result().unwrap();
        assert!(!report.succeeded());
    }

    #[test]
    fn fatal_failure_is_an_error() {
        let first_bulk = first_bulk_reply_step();
        let t = MockTransport::new(MockDevice::modem("P671"));
        let report = run_handshake(&t, &ctx_with_fatal(&[first_bulk]));
        assert!(report.failure.as_ref().unwrap().fatal);

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, DongleError::Handshake { step, .. } if step == first_bulk));
    }

    #[test]
    fn fatal_policy_on_a_passing_step_changes_nothing() {
        let t = MockTransport::new(MockDevice::modem("P671").with_handshake_replies());
        let report = run_handshake(&t, &ctx_with_fatal(&[0, 1, 2]));
        assert!(report.into_result().unwrap().succeeded());
    }

    #[test]
    fn short_bulk_reply_fails_the_step() {
        let mut dev = MockDevice::modem("P671");
        let step = first_bulk_reply_step();
        let Reply::Bulk { len, .. } = HANDSHAKE[step].reply else {
            unreachable!()
        };
        dev.queue_bulk_in(HANDSHAKE_IN_ENDPOINT, &vec![0u8; len - 1]);
        let t = MockTransport::new(dev);
        let report = run_steps(&t, &Context::default(), &HANDSHAKE[step..=step]);
        assert_eq!(report.completed, 0);
        assert!(matches!(
            report.failure.map(|f| f.error),
            Some(DongleError::ShortTransfer { op: "handshake read", .. })
        ));
    }

    #[test]
    fn short_control_reply_fails_the_step() {
        let mut dev = MockDevice::modem("P671").with_handshake_replies();
        dev.short_control_in = Some(1);
        let t = MockTransport::new(dev);
        let report = run_handshake(&t, &Context::default());
        // Step 0 reads a control reply.
        assert_eq!(report.completed, 0);
        assert_eq!(report.failure.map(|f| f.step), Some(0));
    }

    #[test]
    fn short_write_fails_the_step() {
        let mut dev = MockDevice::modem("P671").with_handshake_replies();
        dev.short_write = Some(1);
        let t = MockTransport::new(dev);
        let first_bulk = first_bulk_reply_step();
        let report = run_handshake(&t, &ctx_with_fatal(&[first_bulk]));
        let failure = report.failure.unwrap();
        assert!(failure.fatal);
        assert!(matches!(
            failure.error,
            DongleError::ShortTransfer { op: "handshake write", .. }
        ));
    }

    #[test]
    fn empty_sequence_succeeds() {
        let t = MockTransport::new(MockDevice::modem("P671"));
        let report = run_steps(&t, &Context::default(), &[]);
        assert!(report.succeeded());
        assert_eq!(report.completed, 0);
        assert!(t.calls().is_empty());
    }
}
