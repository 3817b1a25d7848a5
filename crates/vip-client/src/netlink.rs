//! rtnetlink implementation of [`NetworkConfig`].

use crate::platform::{InterfaceAddress, NetworkConfig};
use async_trait::async_trait;
use common::{Error, Result};
use futures::TryStreamExt;
use ipnet::IpNet;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::Handle;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, trace};

/// Route netlink handle
pub struct NetlinkConfig {
    handle: Handle,
}

impl NetlinkConfig {
    /// Open a route netlink connection.
    ///
    /// Must be called inside a tokio runtime; the connection task is spawned on it.
    pub fn new() -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|e| Error::netlink(format!("Failed to open route netlink socket: {}", e)))?;

        tokio::spawn(connection);
        debug!("Route netlink connection established");

        Ok(Self { handle })
    }

    async fn link_by_name(&self, name: &str) -> Result<LinkMessage> {
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();

        links
            .try_next()
            .await
            .map_err(|e| Error::netlink(format!("Failed to look up link {}: {}", name, e)))?
            .ok_or_else(|| Error::netlink(format!("Link {} not found", name)))
    }

    async fn link_index(&self, name: &str) -> Result<u32> {
        Ok(self.link_by_name(name).await?.header.index)
    }

    /// Map of link index to interface name
    async fn link_names(&self) -> Result<HashMap<u32, String>> {
        let mut links = self.handle.link().get().execute();
        let mut names = HashMap::new();

        while let Some(link) = links
            .try_next()
            .await
            .map_err(|e| Error::netlink(format!("Failed to dump links: {}", e)))?
        {
            if let Some(name) = link_name(&link) {
                names.insert(link.header.index, name);
            }
        }

        Ok(names)
    }
}

fn link_name(link: &LinkMessage) -> Option<String> {
    link.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}

fn link_mtu(link: &LinkMessage) -> Option<u32> {
    link.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::Mtu(mtu) => Some(*mtu),
        _ => None,
    })
}

/// Configured address of an address message.
///
/// IFA_LOCAL is the local address on point-to-point links where IFA_ADDRESS
/// holds the peer, so it wins when present.
fn message_address(message: &AddressMessage) -> Option<IpAddr> {
    let mut address = None;
    for attr in &message.attributes {
        match attr {
            AddressAttribute::Local(ip) => return Some(*ip),
            AddressAttribute::Address(ip) => address = Some(*ip),
            _ => {}
        }
    }
    address
}

fn is_errno(err: &rtnetlink::Error, errno: i32) -> bool {
    matches!(err, rtnetlink::Error::NetlinkError(msg) if msg.raw_code() == -errno)
}

#[async_trait]
impl NetworkConfig for NetlinkConfig {
    async fn interface_addresses(&self) -> Result<Vec<InterfaceAddress>> {
        let names = self.link_names().await?;
        let mut messages = self.handle.address().get().execute();
        let mut addresses = Vec::new();

        while let Some(message) = messages
            .try_next()
            .await
            .map_err(|e| Error::netlink(format!("Failed to dump addresses: {}", e)))?
        {
            let Some(name) = names.get(&message.header.index) else {
                continue;
            };
            let Some(ip) = message_address(&message) else {
                continue;
            };
            match IpNet::new(ip, message.header.prefix_len) {
                Ok(network) => {
                    trace!(interface = %name, network = %network, "Found interface address");
                    addresses.push(InterfaceAddress::new(name.clone(), network));
                }
                Err(e) => debug!(interface = %name, error = %e, "Skipping malformed address"),
            }
        }

        Ok(addresses)
    }

    async fn mtu(&self, interface: &str) -> Result<u32> {
        let link = self.link_by_name(interface).await?;
        link_mtu(&link).ok_or_else(|| Error::netlink(format!("Link {} reports no MTU", interface)))
    }

    async fn add_address(&self, interface: &str, address: IpNet) -> Result<()> {
        let index = self.link_index(interface).await?;

        match self
            .handle
            .address()
            .add(index, address.addr(), address.prefix_len())
            .execute()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_errno(&e, libc::EEXIST) => {
                debug!(interface, address = %address, "Address already present");
                Ok(())
            }
            Err(e) => Err(Error::netlink(format!(
                "Failed to add {} to {}: {}",
                address, interface, e
            ))),
        }
    }

    async fn remove_address(&self, interface: &str, address: IpNet) -> Result<()> {
        let index = self.link_index(interface).await?;

        let mut messages = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .set_address_filter(address.addr())
            .set_prefix_length_filter(address.prefix_len())
            .execute();

        let mut removed = false;
        while let Some(message) = messages
            .try_next()
            .await
            .map_err(|e| Error::netlink(format!("Failed to look up {}: {}", address, e)))?
        {
            self.handle
                .address()
                .del(message)
                .execute()
                .await
                .map_err(|e| {
                    Error::netlink(format!(
                        "Failed to remove {} from {}: {}",
                        address, interface, e
                    ))
                })?;
            removed = true;
        }

        if removed {
            Ok(())
        } else {
            Err(Error::netlink(format!(
                "Address {} not present on {}",
                address, interface
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_attributes() {
        let mut link = LinkMessage::default();
        link.header.index = 2;
        link.attributes.push(LinkAttribute::IfName("eth0".into()));
        link.attributes.push(LinkAttribute::Mtu(1500));

        assert_eq!(link_name(&link).as_deref(), Some("eth0"));
        assert_eq!(link_mtu(&link), Some(1500));
        assert_eq!(link_mtu(&LinkMessage::default()), None);
    }

    #[test]
    fn test_message_address_prefers_local() {
        let mut message = AddressMessage::default();
        message
            .attributes
            .push(AddressAttribute::Address("10.0.0.2".parse().unwrap()));
        assert_eq!(message_address(&message), Some("10.0.0.2".parse().unwrap()));

        message
            .attributes
            .push(AddressAttribute::Local("10.0.0.1".parse().unwrap()));
        assert_eq!(message_address(&message), Some("10.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_loopback_lookup() {
        // Needs a real netlink socket; skipped unless explicitly enabled
        if std::env::var("NETLINK_TEST_ENABLED").is_err() {
            eprintln!("Skipping test_loopback_lookup (requires NETLINK_TEST_ENABLED=1)");
            return;
        }

        let netlink = NetlinkConfig::new().unwrap();
        assert!(netlink.mtu("lo").await.unwrap() > 0);

        let addresses = netlink.interface_addresses().await.unwrap();
        assert!(addresses.iter().any(|a| a.interface == "lo"));
    }
}
