//! Ondawagon — bring-up and AT command access for ZTE-based USB 3G modem dongles.

pub mod at;
pub mod catalog;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod dongle;
pub mod error;
pub mod handshake;
pub mod modeswitch;
pub mod negotiate;
pub mod protocol;
pub mod rediscover;
pub mod transport;

pub use error::OndawagonError;
