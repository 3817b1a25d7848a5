//! Common error types for Seesaw Rust components.

use std::fmt;
use std::net::IpAddr;

/// A specialized Result type for Seesaw operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Seesaw operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink error: {0}")]
    Netlink(String),

    /// No local interface has a subnet containing the address.
    #[error("no device on the same subnet as {0}, VIP cannot be assigned")]
    NoMatchingDevice(IpAddr),

    /// More than one interface has a subnet containing the address.
    #[error("multiple devices ({first}, {second}) on the same subnet as {addr}, VIP cannot be assigned")]
    AmbiguousDevice {
        addr: IpAddr,
        first: String,
        second: String,
    },

    #[error("cannot pause an already paused client")]
    AlreadyPaused,

    #[error("cannot resume an already active client")]
    AlreadyActive,

    #[error("client is deregistering")]
    NotRunning,

    #[error("Control session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a new control session error.
    pub fn session(msg: impl fmt::Display) -> Self {
        Error::Session(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// Whether the error is a local command misuse that never reached the coordinator.
    pub fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            Error::AlreadyPaused | Error::AlreadyActive | Error::NotRunning
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_device_message() {
        let err = Error::AmbiguousDevice {
            addr: "10.0.0.5".parse().unwrap(),
            first: "eth0".into(),
            second: "eth1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("eth0"));
        assert!(msg.contains("eth1"));
        assert!(msg.contains("10.0.0.5"));
    }

    #[test]
    fn test_local_rejection() {
        assert!(Error::AlreadyPaused.is_local_rejection());
        assert!(Error::AlreadyActive.is_local_rejection());
        assert!(Error::NotRunning.is_local_rejection());
        assert!(!Error::session("closed").is_local_rejection());
    }
}
