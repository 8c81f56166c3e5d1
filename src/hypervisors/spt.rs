// SPDX-License-Identifier: GPL-2.0-or-later

use tracing::debug;

use crate::error::Result;
use crate::hypervisors::{bytes_to_mb, split_cli, ExecArgs, Vmm};
use crate::unikernel::UnikernelProfile;

pub const SPT_BINARY: &str = "solo5-spt";

/// The solo5 seccomp tender: the guest runs as a host process under a strict
/// seccomp filter, no hardware virtualization involved.
#[derive(Debug)]
pub struct Spt {
    binary_path: String,
}

impl Spt {
    pub fn new(binary_path: String) -> Self {
        Spt { binary_path }
    }
}

impl Vmm for Spt {
    fn path(&self) -> &str {
        &self.binary_path
    }

    fn ok(&self) -> Result<()> {
        Ok(())
    }

    fn uses_kvm(&self) -> bool {
        false
    }

    fn supports_sharedfs(&self, _fs_type: &str) -> bool {
        false
    }

    fn pre_exec(&self, _args: &ExecArgs) -> Result<()> {
        Ok(())
    }

    fn build_exec_cmd(&self, args: &ExecArgs, unikernel: &UnikernelProfile) -> Result<Vec<String>> {
        let cmd = solo5_exec_cmd(&self.binary_path, args, unikernel);

        debug!(?cmd, "ready to execve solo5-spt");

        Ok(cmd)
    }
}

/// Shared argv shape for the solo5 tenders: device flags first, then the
/// unikernel image, then the guest command line as the trailing word.
pub(crate) fn solo5_exec_cmd(
    binary_path: &str,
    args: &ExecArgs,
    unikernel: &UnikernelProfile,
) -> Vec<String> {
    let mem = bytes_to_mb(args.mem_size_b);

    let mut cmd: Vec<String> = vec![binary_path.to_string()];

    cmd.push(format!("--mem={mem}"));

    if !args.net.tap_dev.is_empty() {
        let net_cli = unikernel.monitor_net_cli(&args.net.tap_dev, &args.net.mac);
        if net_cli.is_empty() {
            cmd.push(format!("--net:tap={}", args.net.tap_dev));
            if !args.net.mac.is_empty() {
                cmd.push(format!("--net-mac:tap={}", args.net.mac));
            }
        } else {
            cmd.extend(split_cli(&net_cli));
        }
    }

    for block in unikernel.monitor_block_cli() {
        if !block.exact_args.is_empty() {
            cmd.extend(split_cli(&block.exact_args));
        } else if !block.path.is_empty() {
            let id = if block.id.is_empty() {
                "rootfs"
            } else {
                block.id.as_str()
            };
            cmd.push(format!("--block:{id}={}", block.path));
        }
    }

    let extra = unikernel.monitor_cli();
    if !extra.other_args.is_empty() {
        cmd.extend(split_cli(&extra.other_args));
    }

    cmd.push(args.unikernel_path.clone());
    cmd.push(args.command.clone());

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::network::NetworkInfo;

    fn minimal_args() -> ExecArgs {
        ExecArgs {
            unikernel_path: "/k".to_string(),
            mem_size_b: 64 * 1024 * 1024,
            command: "hello".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn tender_terminates_with_unikernel_and_command() {
        let spt = Spt::new("/usr/bin/solo5-spt".to_string());

        let argv = spt
            .build_exec_cmd(&minimal_args(), &UnikernelProfile::default())
            .unwrap();

        assert_eq!(argv, ["/usr/bin/solo5-spt", "--mem=64", "/k", "hello"]);
    }

    #[test]
    fn tap_device_adds_solo5_net_flags() {
        let spt = Spt::new("/usr/bin/solo5-spt".to_string());
        let mut args = minimal_args();
        args.net = NetworkInfo {
            tap_dev: "tap0".to_string(),
            mac: "02:ab:cd:ef:00:01".to_string(),
        };

        let argv = spt
            .build_exec_cmd(&args, &UnikernelProfile::default())
            .unwrap();

        assert!(argv.contains(&"--net:tap=tap0".to_string()));
        assert!(argv.contains(&"--net-mac:tap=02:ab:cd:ef:00:01".to_string()));
    }

    #[test]
    fn block_device_uses_named_solo5_device() {
        let spt = Spt::new("/usr/bin/solo5-spt".to_string());
        let mut profile = UnikernelProfile::default();
        profile.push_block_device("/containers/x/rootfs.img", "");

        let argv = spt.build_exec_cmd(&minimal_args(), &profile).unwrap();

        assert!(argv.contains(&"--block:rootfs=/containers/x/rootfs.img".to_string()));
    }

    #[test]
    fn spt_does_not_use_kvm() {
        let spt = Spt::new("/usr/bin/solo5-spt".to_string());
        assert!(!spt.uses_kvm());
        assert!(!spt.supports_sharedfs("virtio"));
    }
}
