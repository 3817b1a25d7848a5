//! Data interface resolution.

use crate::platform::{InterfaceAddress, NetworkConfig};
use crate::types::DeviceInfo;
use common::{Error, Result};
use std::net::IpAddr;
use tracing::{debug, info};

/// Find the single interface whose subnet contains `target`.
///
/// Several addresses on the same interface may match; matches on two different
/// interfaces make the VIP unassignable.
pub fn resolve_owning_interface(addresses: &[InterfaceAddress], target: IpAddr) -> Result<String> {
    let mut found: Option<&str> = None;

    for address in addresses {
        if !address.network.contains(&target) {
            continue;
        }

        debug!(interface = %address.interface, network = %address.network, "Subnet contains data address");

        match found {
            None => found = Some(address.interface.as_str()),
            Some(name) if name == address.interface => {}
            Some(name) => {
                return Err(Error::AmbiguousDevice {
                    addr: target,
                    first: name.to_string(),
                    second: address.interface.clone(),
                });
            }
        }
    }

    found
        .map(str::to_string)
        .ok_or(Error::NoMatchingDevice(target))
}

/// Resolve the data interface and its MTU through the network configuration.
pub async fn resolve_device(network: &dyn NetworkConfig, target: IpAddr) -> Result<DeviceInfo> {
    let addresses = network.interface_addresses().await?;
    let name = resolve_owning_interface(&addresses, target)?;
    let mtu = network.mtu(&name).await?;

    info!(device = %name, mtu, data_ip = %target, "Resolved data interface");

    Ok(DeviceInfo { name, mtu })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockNetworkConfig;

    fn addr(interface: &str, network: &str) -> InterfaceAddress {
        InterfaceAddress::new(interface, network.parse().unwrap())
    }

    #[test]
    fn test_single_match() {
        let addresses = vec![
            addr("lo", "127.0.0.1/8"),
            addr("eth0", "192.168.1.10/24"),
            addr("eth1", "10.1.0.5/16"),
        ];

        let name = resolve_owning_interface(&addresses, "192.168.1.77".parse().unwrap()).unwrap();
        assert_eq!(name, "eth0");
    }

    #[test]
    fn test_no_match() {
        let addresses = vec![addr("lo", "127.0.0.1/8"), addr("eth0", "192.168.1.10/24")];

        let target: IpAddr = "172.16.0.1".parse().unwrap();
        let err = resolve_owning_interface(&addresses, target).unwrap_err();
        assert!(matches!(err, Error::NoMatchingDevice(a) if a == target));
    }

    #[test]
    fn test_empty_interface_set() {
        let err = resolve_owning_interface(&[], "192.168.1.1".parse().unwrap()).unwrap_err();
        assert!(matches!(err, Error::NoMatchingDevice(_)));
    }

    #[test]
    fn test_ambiguous_match() {
        let addresses = vec![addr("eth0", "192.168.1.10/24"), addr("eth1", "192.168.0.0/16")];

        let err = resolve_owning_interface(&addresses, "192.168.1.77".parse().unwrap()).unwrap_err();
        match err {
            Error::AmbiguousDevice { first, second, .. } => {
                assert_eq!(first, "eth0");
                assert_eq!(second, "eth1");
            }
            other => panic!("Expected AmbiguousDevice, got {:?}", other),
        }
    }

    #[test]
    fn test_same_interface_matched_twice() {
        let addresses = vec![
            addr("eth0", "192.168.1.10/24"),
            addr("eth0", "192.168.0.0/16"),
            addr("eth1", "10.0.0.1/8"),
        ];

        let name = resolve_owning_interface(&addresses, "192.168.1.77".parse().unwrap()).unwrap();
        assert_eq!(name, "eth0");
    }

    #[test]
    fn test_ipv6_match() {
        let addresses = vec![addr("eth0", "192.168.1.10/24"), addr("eth1", "2001:db8::1/64")];

        let name = resolve_owning_interface(&addresses, "2001:db8::42".parse().unwrap()).unwrap();
        assert_eq!(name, "eth1");
    }

    #[tokio::test]
    async fn test_resolve_device_reports_mtu() {
        let mut network = MockNetworkConfig::new();
        network
            .expect_interface_addresses()
            .returning(|| Ok(vec![addr("eth0", "192.168.1.10/24")]));
        network
            .expect_mtu()
            .withf(|name: &str| name == "eth0")
            .times(1)
            .returning(|_| Ok(9000));

        let device = resolve_device(&network, "192.168.1.20".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(
            device,
            DeviceInfo {
                name: "eth0".into(),
                mtu: 9000
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_device_skips_mtu_on_failure() {
        let mut network = MockNetworkConfig::new();
        network
            .expect_interface_addresses()
            .returning(|| Ok(vec![addr("eth0", "192.168.1.10/24")]));
        network.expect_mtu().never();

        let err = resolve_device(&network, "10.9.9.9".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMatchingDevice(_)));
    }
}
