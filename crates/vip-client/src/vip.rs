//! VIP attachment on the loopback interface.

use crate::platform::NetworkConfig;
use common::{Error, Result};
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Interface the VIP is attached to
pub const LOOPBACK_INTERFACE: &str = "lo";

/// Attaches and detaches the VIP as a host-scoped address on loopback
pub struct VipManager {
    network: Arc<dyn NetworkConfig>,
    vip: IpAddr,
}

impl VipManager {
    pub fn new(network: Arc<dyn NetworkConfig>, vip: IpAddr) -> Self {
        Self { network, vip }
    }

    pub fn vip(&self) -> IpAddr {
        self.vip
    }

    /// The VIP as a /32 (IPv4) or /128 (IPv6) network
    pub fn host_network(&self) -> Result<IpNet> {
        let prefix = match self.vip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        IpNet::new(self.vip, prefix).map_err(Error::other)
    }

    /// Add the VIP to loopback. An already attached VIP is not an error.
    pub async fn attach(&self) -> Result<()> {
        let network = self.host_network()?;
        self.network
            .add_address(LOOPBACK_INTERFACE, network)
            .await?;
        info!(vip = %network, interface = LOOPBACK_INTERFACE, "Attached VIP");
        Ok(())
    }

    /// Remove the VIP from loopback.
    ///
    /// Failures are returned so the shutdown report can carry them.
    pub async fn detach(&self) -> Result<()> {
        let network = self.host_network()?;
        match self
            .network
            .remove_address(LOOPBACK_INTERFACE, network)
            .await
        {
            Ok(()) => {
                info!(vip = %network, interface = LOOPBACK_INTERFACE, "Detached VIP");
                Ok(())
            }
            Err(e) => {
                warn!(vip = %network, error = %e, "Failed to detach VIP");
                Err(e)
            }
        }
    }
}
