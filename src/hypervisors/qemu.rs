// SPDX-License-Identifier: GPL-2.0-or-later

use tracing::debug;

use crate::error::Result;
use crate::hypervisors::{
    bytes_to_mb, split_cli, ExecArgs, SharedFsType, VaccelType, Vmm, VIRTIOFS_SOCKET,
};
use crate::unikernel::UnikernelProfile;

/// The host architecture is appended at lookup time, e.g.
/// `qemu-system-x86_64`.
pub const QEMU_BINARY_PREFIX: &str = "qemu-system-";

#[derive(Debug)]
pub struct Qemu {
    binary_path: String,
    /// Offload the guest NIC data path to the kernel's vhost-net.
    vhost: bool,
}

impl Qemu {
    pub fn new(binary_path: String, vhost: bool) -> Self {
        Qemu { binary_path, vhost }
    }
}

impl Vmm for Qemu {
    fn path(&self) -> &str {
        &self.binary_path
    }

    fn ok(&self) -> Result<()> {
        Ok(())
    }

    fn uses_kvm(&self) -> bool {
        true
    }

    fn supports_sharedfs(&self, fs_type: &str) -> bool {
        fs_type == "virtio"
    }

    fn pre_exec(&self, _args: &ExecArgs) -> Result<()> {
        Ok(())
    }

    fn build_exec_cmd(&self, args: &ExecArgs, unikernel: &UnikernelProfile) -> Result<Vec<String>> {
        let mem = bytes_to_mb(args.mem_size_b);

        let mut cmd: Vec<String> = vec![self.binary_path.clone()];

        cmd.push("-m".into());
        cmd.push(format!("{mem}M"));

        if args.vcpus > 0 {
            cmd.push("-smp".into());
            cmd.push(args.vcpus.to_string());
        }

        cmd.push("-cpu".into());
        cmd.push("host".into());
        cmd.push("-enable-kvm".into());

        // no graphical output, guest console on the serial line
        cmd.push("-nographic".into());
        cmd.push("-vga".into());
        cmd.push("none".into());

        let sandbox = if args.seccomp { "on" } else { "off" };
        cmd.push("-sandbox".into());
        cmd.push(sandbox.into());

        if !args.net.tap_dev.is_empty() {
            let net_cli = unikernel.monitor_net_cli(&args.net.tap_dev, &args.net.mac);
            if net_cli.is_empty() {
                let vhost = if self.vhost { ",vhost=on" } else { "" };
                cmd.push("-netdev".into());
                cmd.push(format!(
                    "tap,id=urunc0,ifname={},script=no,downscript=no{vhost}",
                    args.net.tap_dev
                ));
                cmd.push("-device".into());
                cmd.push(format!("virtio-net-pci,netdev=urunc0,mac={}", args.net.mac));
            } else {
                cmd.extend(split_cli(&net_cli));
            }
        }

        for block in unikernel.monitor_block_cli() {
            if !block.exact_args.is_empty() {
                cmd.extend(split_cli(&block.exact_args));
            } else if !block.path.is_empty() {
                let mut drive = format!("file={},format=raw,if=virtio", block.path);
                if !block.id.is_empty() {
                    drive.push_str(&format!(",id={}", block.id));
                }
                cmd.push("-drive".into());
                cmd.push(drive);
            }
        }

        cmd.push("-kernel".into());
        cmd.push(args.unikernel_path.clone());

        if !args.initrd_path.is_empty() {
            cmd.push("-initrd".into());
            cmd.push(args.initrd_path.clone());
        }

        let extra = unikernel.monitor_cli();
        if !extra.extra_initrd.is_empty() {
            cmd.push("-initrd".into());
            cmd.push(extra.extra_initrd.clone());
        }

        if args.sharedfs.typ == SharedFsType::Virtiofs {
            // vhost-user-fs needs a shareable memory backend
            cmd.push("-chardev".into());
            cmd.push(format!("socket,id=char0,path={VIRTIOFS_SOCKET}"));
            cmd.push("-device".into());
            cmd.push("vhost-user-fs-pci,queue-size=1024,chardev=char0,tag=fs0".into());
            cmd.push("-object".into());
            cmd.push(format!(
                "memory-backend-file,id=mem,size={mem}M,mem-path=/dev/shm,share=on"
            ));
            cmd.push("-numa".into());
            cmd.push("node,memdev=mem".into());
        }

        if args.vaccel_type == VaccelType::Vsock {
            cmd.push("-device".into());
            cmd.push(format!("vhost-vsock-pci,guest-cid={}", args.vsock_dev_id));
        }

        if !extra.other_args.is_empty() {
            cmd.extend(split_cli(&extra.other_args));
        }

        cmd.push("--cmdline".into());
        cmd.push(args.command.clone());

        debug!(?cmd, "ready to execve qemu");

        Ok(cmd)
    }
}
