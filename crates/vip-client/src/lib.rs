//! Seesaw VIP client
//!
//! Failover client for a backend node behind the Seesaw load balancer. The
//! node owns a virtual service address (VIP) while it is healthy, relays raw
//! traffic arriving on its data interface to that VIP, and keeps a line
//! protocol session with the coordinator for health reports and lifecycle
//! commands.
//!
//! # Components
//!
//! - **Device resolver**: finds the single interface owning the data address
//! - **VIP manager**: attaches/detaches the VIP on loopback
//! - **Relay pipeline**: capture thread, bounded queue and relay workers
//!   sharing a [`BufferPool`]
//! - **Control session**: directive reader and heartbeat loops
//! - **Lifecycle**: Active/Paused/Deregistering state gating every loop
//!
//! OS access goes through the traits in [`platform`]; [`netlink`] and
//! [`socket`] provide the Linux implementations.

pub mod client;
pub mod config;
pub mod device;
pub mod http_server;
pub mod lifecycle;
pub mod metrics;
pub mod netlink;
pub mod platform;
pub mod pool;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod socket;
pub mod types;
pub mod vip;

pub use client::{Client, ClientHandle};
pub use config::{Config, ConfigError};
pub use http_server::MetricsServer;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use metrics::MetricsRegistry;
pub use platform::Platform;
pub use pool::{BufferPool, PacketBuffer};
pub use types::{ClientConfig, CleanupStep, DeviceInfo, ShutdownReport, StopReason};
