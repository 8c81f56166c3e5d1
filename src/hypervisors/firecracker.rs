// SPDX-License-Identifier: GPL-2.0-or-later

use tracing::debug;

use crate::error::Result;
use crate::hypervisors::{bytes_to_mb, split_cli, ExecArgs, VaccelType, Vmm};
use crate::unikernel::UnikernelProfile;

pub const FIRECRACKER_BINARY: &str = "firecracker";

#[derive(Debug)]
pub struct Firecracker {
    binary_path: String,
}

impl Firecracker {
    pub fn new(binary_path: String) -> Self {
        Firecracker { binary_path }
    }
}

impl Vmm for Firecracker {
    fn path(&self) -> &str {
        &self.binary_path
    }

    fn ok(&self) -> Result<()> {
        Ok(())
    }

    fn uses_kvm(&self) -> bool {
        true
    }

    fn supports_sharedfs(&self, _fs_type: &str) -> bool {
        false
    }

    fn pre_exec(&self, _args: &ExecArgs) -> Result<()> {
        Ok(())
    }

    fn build_exec_cmd(&self, args: &ExecArgs, unikernel: &UnikernelProfile) -> Result<Vec<String>> {
        let mem = bytes_to_mb(args.mem_size_b);

        let mut cmd: Vec<String> = vec![self.binary_path.clone()];

        if !args.container_id.is_empty() {
            cmd.push("--id".into());
            cmd.push(args.container_id.clone());
        }

        cmd.push("--kernel-image-path".into());
        cmd.push(args.unikernel_path.clone());

        cmd.push("--mem-size-mib".into());
        cmd.push(mem.to_string());

        if args.vcpus > 0 {
            cmd.push("--vcpu-count".into());
            cmd.push(args.vcpus.to_string());
        }

        if !args.seccomp {
            cmd.push("--no-seccomp".into());
        }

        if !args.net.tap_dev.is_empty() {
            let net_cli = unikernel.monitor_net_cli(&args.net.tap_dev, &args.net.mac);
            if net_cli.is_empty() {
                cmd.push("--net".into());
                cmd.push(format!("tap={},mac={}", args.net.tap_dev, args.net.mac));
            } else {
                cmd.extend(split_cli(&net_cli));
            }
        }

        for block in unikernel.monitor_block_cli() {
            if !block.exact_args.is_empty() {
                cmd.extend(split_cli(&block.exact_args));
            } else if !block.path.is_empty() {
                cmd.push("--block-device-path".into());
                cmd.push(block.path.clone());
            }
        }

        if !args.initrd_path.is_empty() {
            cmd.push("--initrd-path".into());
            cmd.push(args.initrd_path.clone());
        }

        let extra = unikernel.monitor_cli();
        if !extra.extra_initrd.is_empty() {
            cmd.push("--initrd-path".into());
            cmd.push(extra.extra_initrd.clone());
        }

        if args.vaccel_type == VaccelType::Vsock {
            // the validator already extracted the socket directory from the
            // unix:// RPC address
            cmd.push("--vsock".into());
            cmd.push(format!(
                "guest-cid={},uds-path={}/vaccel.sock",
                args.vsock_dev_id, args.vsock_dev_path
            ));
        }

        if !extra.other_args.is_empty() {
            cmd.extend(split_cli(&extra.other_args));
        }

        cmd.push("--cmdline".into());
        cmd.push(args.command.clone());

        debug!(?cmd, "ready to execve firecracker");

        Ok(cmd)
    }
}
