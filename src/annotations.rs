// SPDX-License-Identifier: GPL-2.0-or-later

//! Annotation keys consumed from the OCI spec of a container. The
//! orchestrator (containerd, nerdctl, crictl) attaches these to describe the
//! unikernel to boot; everything else in the bundle is a plain OCI container.

use std::collections::HashMap;

pub const ANNOT_TYPE: &str = "com.urunc.unikernel.type";
pub const ANNOT_HYPERVISOR: &str = "com.urunc.unikernel.hypervisor";
pub const ANNOT_BINARY: &str = "com.urunc.unikernel.binary";
pub const ANNOT_CMDLINE: &str = "com.urunc.unikernel.cmdline";
pub const ANNOT_INITRD: &str = "com.urunc.unikernel.initrd";
pub const ANNOT_BLOCK: &str = "com.urunc.unikernel.block";
pub const ANNOT_SHAREDFS: &str = "com.urunc.unikernel.sharedfs";
pub const ANNOT_MOUNT_ROOTFS: &str = "com.urunc.unikernel.mountRootfs";
pub const ANNOT_SECCOMP: &str = "com.urunc.unikernel.seccomp";
pub const ANNOT_VACCEL_ADDRESS: &str = "com.urunc.unikernel.vaccelAddress";

// Unikernel-profile escape hatches, opaque to the launcher itself.
pub const ANNOT_MONITOR_NET_CLI: &str = "com.urunc.unikernel.monitorNetCli";
pub const ANNOT_MONITOR_BLOCK_CLI: &str = "com.urunc.unikernel.monitorBlockCli";
pub const ANNOT_EXTRA_INITRD: &str = "com.urunc.unikernel.extraInitrd";
pub const ANNOT_MONITOR_ARGS: &str = "com.urunc.unikernel.monitorArgs";

/// Look up an annotation, treating a missing key as the empty string.
pub fn get<'a>(annotations: &'a HashMap<String, String>, key: &str) -> &'a str {
    annotations.get(key).map(String::as_str).unwrap_or("")
}
