// SPDX-License-Identifier: GPL-2.0-or-later

use tracing::debug;

use crate::error::Result;
use crate::hypervisors::{
    bytes_to_mb, split_cli, ExecArgs, SharedFsType, VaccelType, Vmm, VIRTIOFS_SOCKET,
};
use crate::unikernel::UnikernelProfile;

pub const CLOUD_HYPERVISOR_BINARY: &str = "cloud-hypervisor";

#[derive(Debug)]
pub struct CloudHypervisor {
    binary_path: String,
}

impl CloudHypervisor {
    pub fn new(binary_path: String) -> Self {
        CloudHypervisor { binary_path }
    }
}

impl Vmm for CloudHypervisor {
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

        // memory; a virtiofs-backed rootfs needs the shareable backend
        cmd.push("--memory".into());
        if args.sharedfs.typ == SharedFsType::Virtiofs {
            cmd.push(format!("size={mem}M,shared=on"));
        } else {
            cmd.push(format!("size={mem}M"));
        }

        if args.vcpus > 0 {
            cmd.push("--cpus".into());
            cmd.push(format!("boot={}", args.vcpus));
        }

        cmd.push("--kernel".into());
        cmd.push(args.unikernel_path.clone());

        // no graphical output, guest console on the serial line
        cmd.push("--console".into());
        cmd.push("off".into());
        cmd.push("--serial".into());
        cmd.push("tty".into());

        let seccomp = if args.seccomp { "true" } else { "false" };
        cmd.push("--seccomp".into());
        cmd.push(seccomp.into());

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
                let mut disk = format!("path={}", block.path);
                if !block.id.is_empty() {
                    disk.push_str(&format!(",id={}", block.id));
                }
                cmd.push("--disk".into());
                cmd.push(disk);
            }
        }

        if !args.initrd_path.is_empty() {
            cmd.push("--initramfs".into());
            cmd.push(args.initrd_path.clone());
        }

        let extra = unikernel.monitor_cli();
        if !extra.extra_initrd.is_empty() {
            cmd.push("--initramfs".into());
            cmd.push(extra.extra_initrd.clone());
        }

        if args.sharedfs.typ == SharedFsType::Virtiofs {
            cmd.push("--fs".into());
            cmd.push(format!("tag=fs0,socket={VIRTIOFS_SOCKET}"));
        }

        if args.vaccel_type == VaccelType::Vsock {
            cmd.push("--vsock".into());
            cmd.push(format!(
                "cid={},socket={}/vaccel.sock",
                args.vsock_dev_id, args.vsock_dev_path
            ));
        }

        if !extra.other_args.is_empty() {
            cmd.extend(split_cli(&extra.other_args));
        }

        cmd.push("--cmdline".into());
        cmd.push(args.command.clone());

        debug!(?cmd, "ready to execve cloud-hypervisor");

        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use crate::annotations::{ANNOT_MONITOR_ARGS, ANNOT_MONITOR_NET_CLI};
    use crate::hypervisors::SharedFs;
    use crate::network::NetworkInfo;

    fn minimal_args() -> ExecArgs {
        ExecArgs {
            unikernel_path: "/k".to_string(),
            mem_size_b: 256 * 1024 * 1024,
            vcpus: 1,
            command: "console=ttyS0".to_string(),
            ..Default::default()
        }
    }

    fn driver() -> CloudHypervisor {
        CloudHypervisor::new("/usr/bin/cloud-hypervisor".to_string())
    }

    #[test]
    fn minimal_launch_argv() {
        let argv = driver()
            .build_exec_cmd(&minimal_args(), &UnikernelProfile::default())
            .unwrap();

        assert_eq!(
            argv,
            [
                "/usr/bin/cloud-hypervisor",
                "--memory",
                "size=256M",
                "--cpus",
                "boot=1",
                "--kernel",
                "/k",
                "--console",
                "off",
                "--serial",
                "tty",
                "--seccomp",
                "false",
                "--cmdline",
                "console=ttyS0",
            ]
        );
    }

    #[test]
    fn virtiofs_turns_on_shared_memory_and_fs_flag() {
        let mut args = minimal_args();
        args.sharedfs = SharedFs {
            typ: SharedFsType::Virtiofs,
        };

        let argv = driver()
            .build_exec_cmd(&args, &UnikernelProfile::default())
            .unwrap();

        assert!(argv.contains(&"size=256M,shared=on".to_string()));

        let fs = argv.iter().position(|a| a == "--fs").unwrap();
        assert_eq!(argv[fs + 1], "tag=fs0,socket=/tmp/vhostqemu");
        let cmdline = argv.iter().position(|a| a == "--cmdline").unwrap();
        assert!(fs < cmdline);
    }

    #[test]
    fn tap_device_adds_default_net_flags() {
        let mut args = minimal_args();
        args.net = NetworkInfo {
            tap_dev: "tap0".to_string(),
            mac: "02:ab:cd:ef:00:01".to_string(),
        };

        let argv = driver()
            .build_exec_cmd(&args, &UnikernelProfile::default())
            .unwrap();

        let net = argv.iter().position(|a| a == "--net").unwrap();
        assert_eq!(argv[net + 1], "tap=tap0,mac=02:ab:cd:ef:00:01");
    }

    #[test]
    fn net_cli_override_replaces_default_net_flags() {
        let annot = HashMap::from([(
            ANNOT_MONITOR_NET_CLI.to_string(),
            "--net tap={tap},mac={mac},num_queues=4".to_string(),
        )]);
        let profile = UnikernelProfile::from_annotations(&annot);

        let mut args = minimal_args();
        args.net = NetworkInfo {
            tap_dev: "tap0".to_string(),
            mac: "02:ab:cd:ef:00:01".to_string(),
        };

        let argv = driver().build_exec_cmd(&args, &profile).unwrap();

        assert!(argv.contains(&"tap=tap0,mac=02:ab:cd:ef:00:01,num_queues=4".to_string()));
    }

    #[test]
    fn no_tap_no_net_flags() {
        let argv = driver()
            .build_exec_cmd(&minimal_args(), &UnikernelProfile::default())
            .unwrap();

        assert!(!argv.iter().any(|a| a == "--net"));
    }

    #[test]
    fn zero_vcpus_omits_cpu_flag() {
        let mut args = minimal_args();
        args.vcpus = 0;

        let argv = driver()
            .build_exec_cmd(&args, &UnikernelProfile::default())
            .unwrap();

        assert!(!argv.iter().any(|a| a == "--cpus"));
    }

    #[test]
    fn seccomp_flag_reflects_request() {
        let mut args = minimal_args();
        args.seccomp = true;

        let argv = driver()
            .build_exec_cmd(&args, &UnikernelProfile::default())
            .unwrap();

        let seccomp = argv.iter().position(|a| a == "--seccomp").unwrap();
        assert_eq!(argv[seccomp + 1], "true");
    }

    #[test]
    fn block_devices_come_from_the_profile() {
        let mut profile = UnikernelProfile::default();
        profile.push_block_device("/containers/x/rootfs.img", "rootfs");

        let argv = driver()
            .build_exec_cmd(&minimal_args(), &profile)
            .unwrap();

        let disk = argv.iter().position(|a| a == "--disk").unwrap();
        assert_eq!(argv[disk + 1], "path=/containers/x/rootfs.img,id=rootfs");
    }

    #[test]
    fn initrd_and_extra_initrd_are_both_emitted() {
        let annot = HashMap::from([(
            crate::annotations::ANNOT_EXTRA_INITRD.to_string(),
            "/boot/extra.cpio".to_string(),
        )]);
        let profile = UnikernelProfile::from_annotations(&annot);

        let mut args = minimal_args();
        args.initrd_path = "/boot/initrd.img".to_string();

        let argv = driver().build_exec_cmd(&args, &profile).unwrap();

        let initramfs: Vec<&String> = argv
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "--initramfs")
            .map(|(i, _)| &argv[i + 1])
            .collect();
        assert_eq!(initramfs, ["/boot/initrd.img", "/boot/extra.cpio"]);
    }

    #[test]
    fn vsock_device_flags() {
        let mut args = minimal_args();
        args.vaccel_type = VaccelType::Vsock;
        args.vsock_dev_id = 49;
        args.vsock_dev_path = "/run/urunc/ctr".to_string();

        let argv = driver()
            .build_exec_cmd(&args, &UnikernelProfile::default())
            .unwrap();

        let vsock = argv.iter().position(|a| a == "--vsock").unwrap();
        assert_eq!(argv[vsock + 1], "cid=49,socket=/run/urunc/ctr/vaccel.sock");
    }

    #[test]
    fn cmdline_is_always_last() {
        let annot = HashMap::from([(
            ANNOT_MONITOR_ARGS.to_string(),
            "--balloon size=64M".to_string(),
        )]);
        let profile = UnikernelProfile::from_annotations(&annot);

        let argv = driver().build_exec_cmd(&minimal_args(), &profile).unwrap();

        assert!(argv.contains(&"--balloon".to_string()));
        let n = argv.len();
        assert_eq!(&argv[n - 2..], ["--cmdline", "console=ttyS0"]);
        assert_eq!(argv[0], "/usr/bin/cloud-hypervisor");
    }
}
