// SPDX-License-Identifier: GPL-2.0-or-later

//! Per-unikernel overrides for monitor arguments. A profile is a plain value:
//! the launcher fills it from annotations and from the rootfs selection, and
//! the drivers consult it when assembling argv. A profile method returning a
//! non-empty string is spliced into argv verbatim after one whitespace split;
//! profile authors own the risk of embedded whitespace.

use std::collections::HashMap;

use crate::annotations::{
    self, ANNOT_EXTRA_INITRD, ANNOT_MONITOR_ARGS, ANNOT_MONITOR_BLOCK_CLI, ANNOT_MONITOR_NET_CLI,
};

/// One block device to hand to the monitor: either a fully formed argument
/// fragment in `exact_args`, or a `(path, id)` pair the driver formats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockCliArgs {
    pub exact_args: String,
    pub path: String,
    pub id: String,
}

/// Free-form additions: an extra initramfs and trailing monitor flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorCliArgs {
    pub extra_initrd: String,
    pub other_args: String,
}

#[derive(Debug, Clone, Default)]
pub struct UnikernelProfile {
    net_cli: String,
    block_cli: Vec<BlockCliArgs>,
    extra_initrd: String,
    other_args: String,
}

impl UnikernelProfile {
    pub fn from_annotations(annot: &HashMap<String, String>) -> Self {
        let mut profile = UnikernelProfile {
            net_cli: annotations::get(annot, ANNOT_MONITOR_NET_CLI).trim().to_string(),
            block_cli: Vec::new(),
            extra_initrd: annotations::get(annot, ANNOT_EXTRA_INITRD).trim().to_string(),
            other_args: annotations::get(annot, ANNOT_MONITOR_ARGS).trim().to_string(),
        };

        let exact_block = annotations::get(annot, ANNOT_MONITOR_BLOCK_CLI).trim();
        if !exact_block.is_empty() {
            profile.block_cli.push(BlockCliArgs {
                exact_args: exact_block.to_string(),
                ..Default::default()
            });
        }

        profile
    }

    /// Register a block artifact chosen by the rootfs selector; the driver
    /// formats it unless an exact override is already present.
    pub fn push_block_device(&mut self, path: &str, id: &str) {
        self.block_cli.push(BlockCliArgs {
            exact_args: String::new(),
            path: path.to_string(),
            id: id.to_string(),
        });
    }

    /// Network override. `{tap}` and `{mac}` placeholders in the annotation
    /// value are substituted; empty means "use the driver's default form".
    pub fn monitor_net_cli(&self, tap: &str, mac: &str) -> String {
        if self.net_cli.is_empty() {
            return String::new();
        }
        self.net_cli.replace("{tap}", tap).replace("{mac}", mac)
    }

    pub fn monitor_block_cli(&self) -> &[BlockCliArgs] {
        &self.block_cli
    }

    pub fn monitor_cli(&self) -> MonitorCliArgs {
        MonitorCliArgs {
            extra_initrd: self.extra_initrd.clone(),
            other_args: self.other_args.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annot_of(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_profile_returns_empty_overrides() {
        let profile = UnikernelProfile::from_annotations(&HashMap::new());

        assert_eq!(profile.monitor_net_cli("tap0", "aa:bb"), "");
        assert!(profile.monitor_block_cli().is_empty());
        assert_eq!(profile.monitor_cli(), MonitorCliArgs::default());
    }

    #[test]
    fn net_cli_substitutes_placeholders() {
        let profile = UnikernelProfile::from_annotations(&annot_of(&[(
            ANNOT_MONITOR_NET_CLI,
            "--net tap={tap},mac={mac},mq=on",
        )]));

        assert_eq!(
            profile.monitor_net_cli("tap3", "02:aa:bb:cc:dd:ee"),
            "--net tap=tap3,mac=02:aa:bb:cc:dd:ee,mq=on"
        );
    }

    #[test]
    fn exact_block_override_is_carried_verbatim() {
        let profile = UnikernelProfile::from_annotations(&annot_of(&[(
            ANNOT_MONITOR_BLOCK_CLI,
            " --disk path=/dev/vdb,readonly=on ",
        )]));

        let blocks = profile.monitor_block_cli();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].exact_args, "--disk path=/dev/vdb,readonly=on");
    }

    #[test]
    fn pushed_block_devices_follow_overrides() {
        let mut profile = UnikernelProfile::from_annotations(&HashMap::new());
        profile.push_block_device("/containers/x/rootfs.img", "rootfs");

        let blocks = profile.monitor_block_cli();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].path, "/containers/x/rootfs.img");
        assert_eq!(blocks[0].id, "rootfs");
        assert!(blocks[0].exact_args.is_empty());
    }

    #[test]
    fn monitor_cli_is_trimmed() {
        let profile = UnikernelProfile::from_annotations(&annot_of(&[
            (ANNOT_EXTRA_INITRD, " /boot/extra.cpio "),
            (ANNOT_MONITOR_ARGS, " --balloon size=64M "),
        ]));

        let cli = profile.monitor_cli();
        assert_eq!(cli.extra_initrd, "/boot/extra.cpio");
        assert_eq!(cli.other_args, "--balloon size=64M");
    }
}
