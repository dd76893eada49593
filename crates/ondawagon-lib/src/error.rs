//! Unified error type for the ondawagon-lib crate.
//!
//! [`OndawagonError`] wraps [`DongleError`] (which in turn wraps transport
//! failures) plus I/O and configuration errors, so `?` works across module
//! boundaries.

use std::fmt;

use crate::config::ValidationError;
use crate::dongle::DongleError;
use crate::transport::TransportError;

#[derive(Debug)]
pub enum OndawagonError {
    /// Discovery, bring-up or AT exchange failed.
    Dongle(DongleError),
    /// Standard I/O error (config persistence).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
}

impl fmt::Display for OndawagonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OndawagonError::Dongle(e) => write!(f, "{e}"),
            OndawagonError::Io(e) => write!(f, "I/O error: {e}"),
            OndawagonError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for OndawagonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OndawagonError::Dongle(e) => Some(e),
            OndawagonError::Io(e) => Some(e),
            OndawagonError::Config(_) => None,
        }
    }
}

impl From<DongleError> for OndawagonError {
    fn from(e: DongleError) -> Self {
        OndawagonError::Dongle(e)
    }
}

impl From<TransportError> for OndawagonError {
    fn from(e: TransportError) -> Self {
        OndawagonError::Dongle(e.into())
    }
}

impl From<std::io::Error> for OndawagonError {
    fn from(e: std::io::Error) -> Self {
        OndawagonError::Io(e)
    }
}

impl From<Vec<ValidationError>> for OndawagonError {
    fn from(errors: Vec<ValidationError>) -> Self {
        let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        OndawagonError::Config(joined.join("; "))
    }
}

/// Crate-level Result alias using [`OndawagonError`].
pub type Result<T> = std::result::Result<T, OndawagonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportErrorKind;

    #[test]
    fn from_dongle_error() {
        let e: OndawagonError = DongleError::NotFound("X".into()).into();
        assert!(matches!(e, OndawagonError::Dongle(DongleError::NotFound(_))));
    }

    #[test]
    fn from_transport_error_goes_through_dongle() {
        let e: OndawagonError = TransportError::new("bulk in", TransportErrorKind::Timeout).into();
        assert!(matches!(
            e,
            OndawagonError::Dongle(DongleError::Transport(_))
        ));
        assert_eq!(e.to_string(), "bulk in: operation timed out");
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: OndawagonError = io_err.into();
        assert!(matches!(e, OndawagonError::Io(_)));
    }

    #[test]
    fn from_validation_errors_joins() {
        let e: OndawagonError = vec![
            ValidationError::ZeroAttempts,
            ValidationError::ZeroResponseBuffer,
        ]
        .into();
        assert_eq!(
            e.to_string(),
            "Config error: rediscover.attempts must be greater than 0; \
             endpoints.response_buffer must be greater than 0"
        );
    }

    #[test]
    fn display_dongle_error() {
        let e = OndawagonError::Dongle(DongleError::NotFound("P671".into()));
        assert_eq!(e.to_string(), "dongle P671: not found");
    }

    #[test]
    fn source_chains_dongle_error() {
        let e = OndawagonError::Dongle(DongleError::EmptyResponse("AT response"));
        let source = std::error::Error::source(&e).unwrap();
        assert!(source.to_string().contains("no data"));
    }

    #[test]
    fn source_none_for_config() {
        let e = OndawagonError::Config("bad".into());
        assert!(std::error::Error::source(&e).is_none());
    }

    #[test]
    fn question_mark_propagation_dongle_to_ondawagon() {
        fn inner() -> crate::dongle::Result<()> {
            Err(DongleError::EmptyCommand)
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        assert!(matches!(
            outer().unwrap_err(),
            OndawagonError::Dongle(DongleError::EmptyCommand)
        ));
    }
}
