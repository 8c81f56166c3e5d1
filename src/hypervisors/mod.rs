// SPDX-License-Identifier: GPL-2.0-or-later

mod cloud_hypervisor;
mod firecracker;
mod hedge;
mod hvt;
mod qemu;
mod spt;

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::error;

pub use cloud_hypervisor::{CloudHypervisor, CLOUD_HYPERVISOR_BINARY};
pub use firecracker::{Firecracker, FIRECRACKER_BINARY};
pub use hedge::{Hedge, HEDGE_CONTROL};
pub use hvt::{Hvt, HVT_BINARY};
pub use qemu::{Qemu, QEMU_BINARY_PREFIX};
pub use spt::{Spt, SPT_BINARY};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::network::NetworkInfo;
use crate::unikernel::UnikernelProfile;

/// Fallback guest memory when no monitor config is present: 256 MB.
pub const DEFAULT_MEMORY_MB: u64 = 256;

/// Host-side control socket for the virtiofsd instance backing a shared
/// rootfs. A process-wide convention shared by the drivers and the
/// virtiofsd spawn.
pub const VIRTIOFS_SOCKET: &str = "/tmp/vhostqemu";

/// Grace period between SIGTERM and SIGKILL when stopping a monitor.
const STOP_GRACE: Duration = Duration::from_secs(3);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SharedFsType {
    #[default]
    None,
    Virtiofs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedFs {
    pub typ: SharedFsType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VaccelType {
    #[default]
    None,
    Vsock,
}

/// Fully resolved launch request, the input to every driver. Everything the
/// monitor needs must be in here or in already-open file descriptors: after
/// `exec` the launcher's memory is gone.
#[derive(Debug, Clone, Default)]
pub struct ExecArgs {
    pub container_id: String,
    pub unikernel_path: String,
    pub initrd_path: String,
    pub mem_size_b: u64,
    pub vcpus: u32,
    pub net: NetworkInfo,
    pub sharedfs: SharedFs,
    pub seccomp: bool,
    /// Guest kernel command line.
    pub command: String,
    pub vaccel_type: VaccelType,
    /// Guest CID for the vsock device.
    pub vsock_dev_id: u32,
    /// Host directory holding the per-container vaccel unix socket.
    pub vsock_dev_path: String,
}

/// The closed set of supported backends. `Hedge` is not a VMM: it is an
/// in-kernel monitor with no binary lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmmType {
    Spt,
    Hvt,
    Qemu,
    Firecracker,
    CloudHypervisor,
    Hedge,
}

impl VmmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmmType::Spt => "spt",
            VmmType::Hvt => "hvt",
            VmmType::Qemu => "qemu",
            VmmType::Firecracker => "firecracker",
            VmmType::CloudHypervisor => "cloud-hypervisor",
            VmmType::Hedge => "hedge",
        }
    }
}

impl fmt::Display for VmmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VmmType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spt" => Ok(VmmType::Spt),
            "hvt" => Ok(VmmType::Hvt),
            "qemu" => Ok(VmmType::Qemu),
            "firecracker" => Ok(VmmType::Firecracker),
            "cloud-hypervisor" => Ok(VmmType::CloudHypervisor),
            "hedge" => Ok(VmmType::Hedge),
            other => Err(Error::UnsupportedVmm(other.to_string())),
        }
    }
}

/// One driver per backend. `build_exec_cmd` is a pure function from the
/// launch request to an ordered argv; everything with side effects lives in
/// `pre_exec`, which must be fully reversible when it fails.
pub trait Vmm: fmt::Debug {
    /// Absolute path to the monitor binary.
    fn path(&self) -> &str;

    /// Readiness probe for this host.
    fn ok(&self) -> Result<()>;

    fn uses_kvm(&self) -> bool;

    /// True iff the backend can expose `fs_type` to the guest.
    fn supports_sharedfs(&self, fs_type: &str) -> bool;

    /// Idempotent termination: SIGTERM, bounded grace, then SIGKILL.
    fn stop(&self, pid: i32) -> Result<()> {
        kill_process(pid)
    }

    /// Launcher-process side effects that must precede the handover.
    fn pre_exec(&self, args: &ExecArgs) -> Result<()>;

    /// Assemble the monitor argv, starting with the absolute binary path.
    /// Flag ordering is observable and stable.
    fn build_exec_cmd(&self, args: &ExecArgs, unikernel: &UnikernelProfile) -> Result<Vec<String>>;
}

struct VmmFactory {
    binary: &'static str,
    create: fn(binary_path: String, vhost: bool) -> Box<dyn Vmm>,
}

fn vmm_factory(vmm_type: VmmType) -> Option<VmmFactory> {
    match vmm_type {
        VmmType::Spt => Some(VmmFactory {
            binary: SPT_BINARY,
            create: |path, _| Box::new(Spt::new(path)),
        }),
        VmmType::Hvt => Some(VmmFactory {
            binary: HVT_BINARY,
            create: |path, _| Box::new(Hvt::new(path)),
        }),
        VmmType::Qemu => Some(VmmFactory {
            binary: QEMU_BINARY_PREFIX,
            create: |path, vhost| Box::new(Qemu::new(path, vhost)),
        }),
        VmmType::Firecracker => Some(VmmFactory {
            binary: FIRECRACKER_BINARY,
            create: |path, _| Box::new(Firecracker::new(path)),
        }),
        VmmType::CloudHypervisor => Some(VmmFactory {
            binary: CLOUD_HYPERVISOR_BINARY,
            create: |path, _| Box::new(CloudHypervisor::new(path)),
        }),
        VmmType::Hedge => None,
    }
}

/// Construct the driver for `vmm_type`, resolving the monitor binary from the
/// per-backend config or the environment PATH.
pub fn new_vmm(
    vmm_type: VmmType,
    monitors: &HashMap<String, MonitorConfig>,
) -> Result<Box<dyn Vmm>> {
    new_vmm_inner(vmm_type, monitors).map_err(|e| {
        error!("{e}");
        e
    })
}

fn new_vmm_inner(
    vmm_type: VmmType,
    monitors: &HashMap<String, MonitorConfig>,
) -> Result<Box<dyn Vmm>> {
    // hedge has no binary to look up; its readiness probe decides
    if vmm_type == VmmType::Hedge {
        let hedge = Hedge::default();
        if hedge.ok().is_err() {
            return Err(Error::VmmNotInstalled);
        }
        return Ok(Box::new(hedge));
    }

    let Some(factory) = vmm_factory(vmm_type) else {
        return Err(Error::UnsupportedVmm(vmm_type.to_string()));
    };

    let path = vmm_path(vmm_type, factory.binary, monitors)?;
    let vhost = monitors
        .get(vmm_type.as_str())
        .map(|m| m.vhost)
        .unwrap_or(false);

    Ok((factory.create)(path, vhost))
}

fn vmm_path(
    vmm_type: VmmType,
    binary: &str,
    monitors: &HashMap<String, MonitorConfig>,
) -> Result<String> {
    if let Some(monitor) = monitors.get(vmm_type.as_str()) {
        if !monitor.binary_path.is_empty() {
            return Ok(monitor.binary_path.clone());
        }
    }

    let lookup = if vmm_type == VmmType::Qemu {
        format!("{binary}{}", env::consts::ARCH)
    } else {
        binary.to_string()
    };

    lookup_path(&lookup).ok_or(Error::VmmNotInstalled)
}

fn lookup_path(binary: &str) -> Option<String> {
    let path = env::var_os("PATH")?;

    for dir in env::split_paths(&path) {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }

    None
}

/// Bytes to whole megabytes. Every driver converts exactly once, here.
pub(crate) fn bytes_to_mb(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

/// Split a profile-supplied flag string for splicing into argv. One split,
/// no shell parsing.
pub(crate) fn split_cli(raw: &str) -> Vec<String> {
    raw.trim().split(' ').map(str::to_string).collect()
}

/// SIGTERM, bounded grace, SIGKILL. A process that is already gone counts as
/// stopped, which makes the operation idempotent.
pub(crate) fn kill_process(pid: i32) -> Result<()> {
    let pid = Pid::from_raw(pid);

    match kill(pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(Error::Io(io::Error::from(e))),
    }

    let mut waited = Duration::ZERO;
    while waited < STOP_GRACE {
        thread::sleep(STOP_POLL_INTERVAL);
        waited += STOP_POLL_INTERVAL;

        if kill(pid, None) == Err(Errno::ESRCH) {
            return Ok(());
        }
    }

    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Io(io::Error::from(e))),
    }
}
