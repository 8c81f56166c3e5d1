// SPDX-License-Identifier: GPL-2.0-or-later

use std::path::Path;

use crate::error::{Error, Result};
use crate::network::{NetworkInfo, NetworkManager};

/// Consumes a tap device somebody else created, typically the CNI plugin
/// that prepared the sandbox. Setup only validates that the device exists;
/// teardown leaves it alone for its owner to reclaim.
#[derive(Debug)]
pub struct StaticNetwork {
    info: NetworkInfo,
}

impl StaticNetwork {
    pub fn new(info: NetworkInfo) -> Self {
        StaticNetwork { info }
    }
}

impl NetworkManager for StaticNetwork {
    fn setup(&mut self) -> Result<()> {
        if self.info.tap_dev.is_empty() {
            // no NIC requested
            return Ok(());
        }

        let sysfs = Path::new("/sys/class/net").join(&self.info.tap_dev);
        if !sysfs.exists() {
            return Err(Error::Network(format!(
                "tap device \"{}\" does not exist",
                self.info.tap_dev
            )));
        }

        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> &NetworkInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tap_means_no_nic() {
        let mut manager = StaticNetwork::new(NetworkInfo::default());
        assert!(manager.setup().is_ok());
    }

    #[test]
    fn missing_tap_is_an_error() {
        let mut manager = StaticNetwork::new(NetworkInfo {
            tap_dev: "urunc-test-no-such-tap".to_string(),
            mac: "02:00:00:00:00:01".to_string(),
        });

        assert!(manager.setup().is_err());
    }

    #[test]
    fn loopback_passes_validation() {
        let mut manager = StaticNetwork::new(NetworkInfo {
            tap_dev: "lo".to_string(),
            mac: String::new(),
        });

        assert!(manager.setup().is_ok());
    }

    #[test]
    fn teardown_is_a_no_op() {
        let mut manager = StaticNetwork::new(NetworkInfo {
            tap_dev: "urunc-test-no-such-tap".to_string(),
            mac: String::new(),
        });

        assert!(manager.teardown().is_ok());
        assert!(manager.teardown().is_ok());
    }
}
