// SPDX-License-Identifier: GPL-2.0-or-later

use tracing::debug;

use crate::error::Result;
use crate::network::{ip_command, NetworkInfo, NetworkManager};

/// Creates the tap device itself and plumbs it into the host: the device is
/// brought up and, when a bridge is named, enslaved to it. Teardown deletes
/// the device again.
#[derive(Debug)]
pub struct DynamicNetwork {
    info: NetworkInfo,
    bridge: Option<String>,
    created: bool,
}

impl DynamicNetwork {
    pub fn new(mut info: NetworkInfo, bridge: Option<String>) -> Self {
        if !info.tap_dev.is_empty() && info.mac.is_empty() {
            info.mac = derive_mac(&info.tap_dev);
        }

        DynamicNetwork {
            info,
            bridge,
            created: false,
        }
    }
}

impl NetworkManager for DynamicNetwork {
    fn setup(&mut self) -> Result<()> {
        if self.info.tap_dev.is_empty() {
            // no NIC requested
            return Ok(());
        }

        let tap = self.info.tap_dev.as_str();
        debug!("creating tap device {tap}");

        ip_command(["tuntap", "add", "dev", tap, "mode", "tap"])?;
        self.created = true;

        if let Some(bridge) = &self.bridge {
            ip_command(["link", "set", "dev", tap, "master", bridge.as_str()])?;
        }
        ip_command(["link", "set", "dev", tap, "up"])?;

        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        if !self.created {
            return Ok(());
        }

        ip_command(["link", "del", "dev", self.info.tap_dev.as_str()])?;
        self.created = false;
        Ok(())
    }

    fn info(&self) -> &NetworkInfo {
        &self.info
    }
}

/// Locally administered unicast MAC, derived from the tap name so that
/// sibling helper processes agree on it without coordination.
fn derive_mac(tap_dev: &str) -> String {
    let mut bytes = [0u8; 5];
    for (i, b) in tap_dev.bytes().enumerate() {
        bytes[i % 5] = bytes[i % 5].wrapping_add(b);
    }

    format!(
        "02:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_mac_is_deterministic_and_local() {
        let first = derive_mac("tap0");
        let second = derive_mac("tap0");

        assert_eq!(first, second);
        assert!(first.starts_with("02:"));
        assert_eq!(first.len(), 17);
    }

    #[test]
    fn distinct_taps_get_distinct_macs() {
        assert_ne!(derive_mac("tap0"), derive_mac("tap1"));
    }

    #[test]
    fn missing_mac_is_filled_in() {
        let manager = DynamicNetwork::new(
            NetworkInfo {
                tap_dev: "tap0".to_string(),
                mac: String::new(),
            },
            None,
        );

        assert!(!manager.info().mac.is_empty());
    }

    #[test]
    fn supplied_mac_is_kept() {
        let manager = DynamicNetwork::new(
            NetworkInfo {
                tap_dev: "tap0".to_string(),
                mac: "02:11:22:33:44:55".to_string(),
            },
            None,
        );

        assert_eq!(manager.info().mac, "02:11:22:33:44:55");
    }

    #[test]
    fn teardown_before_setup_is_a_no_op() {
        let mut manager = DynamicNetwork::new(
            NetworkInfo {
                tap_dev: "tap0".to_string(),
                mac: String::new(),
            },
            None,
        );

        assert!(manager.teardown().is_ok());
    }
}
