//! Boundaries to the operating system.
//!
//! The client core only talks to the network stack through these traits. Linux
//! implementations live in [`crate::netlink`] and [`crate::socket`].

use async_trait::async_trait;
use common::Result;
use ipnet::IpNet;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

/// An address configured on a local interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// Interface name (e.g., "eth0")
    pub interface: String,
    /// Configured address together with its prefix
    pub network: IpNet,
}

impl InterfaceAddress {
    pub fn new(interface: impl Into<String>, network: IpNet) -> Self {
        Self {
            interface: interface.into(),
            network,
        }
    }
}

/// Interface and address configuration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkConfig: Send + Sync {
    /// Every address configured on every interface
    async fn interface_addresses(&self) -> Result<Vec<InterfaceAddress>>;

    /// MTU of the named interface
    async fn mtu(&self, interface: &str) -> Result<u32>;

    /// Add an address; an address that is already present is not an error
    async fn add_address(&self, interface: &str, address: IpNet) -> Result<()>;

    /// Remove an address
    async fn remove_address(&self, interface: &str, address: IpNet) -> Result<()>;
}

/// Opens capture handles on an interface
pub trait PacketCapture: Send + Sync {
    fn open(&self, interface: &str) -> io::Result<Arc<dyn CaptureHandle>>;
}

/// An open capture handle.
///
/// `read_frame` blocks for at most the implementation's poll interval. A read
/// that returns `WouldBlock` or `TimedOut` means no frame arrived; any other
/// error is a capture failure. After `close`, reads fail.
pub trait CaptureHandle: Send + Sync {
    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&self);
}

/// Opens raw transmit paths
pub trait RawTransmit: Send + Sync {
    fn open(&self, destination: IpAddr) -> io::Result<Box<dyn RawSender>>;
}

/// A raw transmit path owned by one relay worker
pub trait RawSender: Send {
    fn send(&mut self, frame: &[u8]) -> io::Result<usize>;
}

/// Whether a capture read error only means "nothing arrived yet".
pub fn is_idle_read(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// The set of OS collaborators a client runs against
#[derive(Clone)]
pub struct Platform {
    pub network: Arc<dyn NetworkConfig>,
    pub capture: Arc<dyn PacketCapture>,
    pub transmit: Arc<dyn RawTransmit>,
}

impl Platform {
    pub fn new(
        network: Arc<dyn NetworkConfig>,
        capture: Arc<dyn PacketCapture>,
        transmit: Arc<dyn RawTransmit>,
    ) -> Self {
        Self {
            network,
            capture,
            transmit,
        }
    }
}
