// SPDX-License-Identifier: GPL-2.0-or-later

//! The launch pipeline: resolve configuration and annotations into an
//! [`ExecArgs`], shape storage and networking, run the chosen driver's
//! pre-exec side effects, and hand the process over to the monitor.
//!
//! Side effects are tracked in a LIFO of compensating actions. A failure
//! anywhere before the handover unwinds them in reverse order; destructors
//! cannot be relied on because a successful `exec` replaces the process
//! image and never runs them.

use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use nix::sys::signal::{kill, Signal};
use nix::unistd::{execv, Pid};
use tracing::{debug, info, warn};

use crate::annotations::{
    self, ANNOT_BINARY, ANNOT_CMDLINE, ANNOT_HYPERVISOR, ANNOT_SECCOMP, ANNOT_VACCEL_ADDRESS,
};
use crate::config::{default_extra_binaries, ExtraBinConfig, UruncConfig};
use crate::error::{Error, Result};
use crate::hypervisors::{
    new_vmm, split_cli, ExecArgs, SharedFs, SharedFsType, VaccelType, Vmm, VmmType,
    DEFAULT_MEMORY_MB, VIRTIOFS_SOCKET,
};
use crate::network::{new_network_manager, NetworkInfo};
use crate::rootfs::{unmount_rootfs, RootfsParams, RootfsSelector, RootfsType};
use crate::timestamps::Timestamper;
use crate::unikernel::UnikernelProfile;
use crate::vaccel::{id_to_guest_cid, validate_vsock_address};

/// Compensating actions for side effects performed before the handover,
/// unwound in reverse order when a later step fails.
#[derive(Default)]
pub struct RollbackStack {
    actions: Vec<(String, Box<dyn FnOnce()>)>,
}

impl fmt::Debug for RollbackStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackStack")
            .field("actions", &self.actions.iter().map(|(label, _)| label).collect::<Vec<_>>())
            .finish()
    }
}

impl RollbackStack {
    pub fn new() -> Self {
        RollbackStack::default()
    }

    pub fn push(&mut self, label: impl Into<String>, action: impl FnOnce() + 'static) {
        self.actions.push((label.into(), Box::new(action)));
    }

    pub fn unwind(&mut self) {
        while let Some((label, action)) = self.actions.pop() {
            warn!("rolling back: {label}");
            action();
        }
    }

    /// Forget the recorded actions; used once the side effects are owned by
    /// the running guest.
    pub fn defuse(&mut self) {
        self.actions.clear();
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Everything the OCI façade hands over for one container launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub container_id: String,
    pub annotations: HashMap<String, String>,
    /// The rootfs directory the engine prepared from the image.
    pub container_rootfs: PathBuf,
    /// Directory the monitor is scoped to.
    pub mon_rootfs: PathBuf,
    /// `"static"` consumes a pre-created tap, `"dynamic"` creates one.
    pub network_kind: String,
    pub network: NetworkInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchState {
    Created,
    Prepared,
    Ready,
}

/// One container launch, driven CREATED → PREPARED → READY → exec. After a
/// successful exec the launcher *is* the monitor and this value no longer
/// exists by construction.
#[derive(Debug)]
pub struct MonitorLaunch {
    request: LaunchRequest,
    config: UruncConfig,
    vmm_type: VmmType,
    vmm: Box<dyn Vmm>,
    timestamper: Timestamper,
    state: LaunchState,
    rollback: RollbackStack,
    rootfs: Option<RootfsParams>,
    unikernel: Option<UnikernelProfile>,
    args: Option<ExecArgs>,
}

impl MonitorLaunch {
    pub fn new(request: LaunchRequest, config: UruncConfig) -> Result<Self> {
        let hypervisor = annotations::get(&request.annotations, ANNOT_HYPERVISOR);
        let vmm_type: VmmType = hypervisor.parse()?;

        let vmm = new_vmm(vmm_type, &config.monitors)?;
        vmm.ok()?;

        let timestamper = Timestamper::new(&config.timestamps);
        if let Err(e) = timestamper.capture(&request.container_id, "create") {
            warn!("failed to record create timestamp: {e}");
        }

        Ok(MonitorLaunch {
            request,
            config,
            vmm_type,
            vmm,
            timestamper,
            state: LaunchState::Created,
            rollback: RollbackStack::new(),
            rootfs: None,
            unikernel: None,
            args: None,
        })
    }

    pub fn vmm(&self) -> &dyn Vmm {
        self.vmm.as_ref()
    }

    pub fn vmm_type(&self) -> VmmType {
        self.vmm_type
    }

    /// The resolved launch request; available once `prepare` has run.
    pub fn args(&self) -> Option<&ExecArgs> {
        self.args.as_ref()
    }

    /// CREATED → PREPARED: shape storage (C2), attach the network (C3) and
    /// resolve the full [`ExecArgs`] (C1). Ordering is strict: the network
    /// must be up before the drivers reference the tap.
    pub fn prepare(&mut self) -> Result<()> {
        self.expect_state(LaunchState::Created)?;

        match self.prepare_inner() {
            Ok(()) => {
                self.state = LaunchState::Prepared;
                Ok(())
            }
            Err(e) => {
                self.rollback.unwind();
                Err(e)
            }
        }
    }

    fn prepare_inner(&mut self) -> Result<()> {
        let selector = RootfsSelector::new(
            &self.request.annotations,
            &self.request.container_rootfs,
            &self.request.mon_rootfs,
        );
        let rootfs = selector.select()?;

        if !rootfs.mounted_path.is_empty() {
            let mounted = rootfs.mounted_path.clone();
            self.rollback.push("unmount rootfs", move || {
                if let Err(e) = unmount_rootfs(&mounted) {
                    warn!("failed to unmount {mounted}: {e}");
                }
            });
        }

        let mut unikernel = UnikernelProfile::from_annotations(&self.request.annotations);
        if rootfs.typ == RootfsType::Block {
            unikernel.push_block_device(&rootfs.path, "rootfs");
        }

        let mut manager =
            new_network_manager(&self.request.network_kind, self.request.network.clone())?;
        manager.setup()?;
        let net = manager.info().clone();
        self.rollback.push("tear down network", move || {
            if let Err(e) = manager.teardown() {
                warn!("network teardown failed: {e}");
            }
        });

        let args = resolve_exec_args(
            &self.config,
            &self.request.annotations,
            &self.request.container_id,
            self.vmm_type,
            &self.request.container_rootfs,
            &rootfs,
            net,
        )?;

        debug!(?args, "resolved launch request");

        self.rootfs = Some(rootfs);
        self.unikernel = Some(unikernel);
        self.args = Some(args);
        Ok(())
    }

    /// PREPARED → READY: launcher-process side effects, each with its undo
    /// pushed before the next step runs.
    pub fn pre_exec(&mut self) -> Result<()> {
        self.expect_state(LaunchState::Prepared)?;

        match self.pre_exec_inner() {
            Ok(()) => {
                self.state = LaunchState::Ready;
                if let Err(e) = self
                    .timestamper
                    .capture(&self.request.container_id, "pre-exec")
                {
                    warn!("failed to record pre-exec timestamp: {e}");
                }
                Ok(())
            }
            Err(e) => {
                self.rollback.unwind();
                Err(Error::PreExec(e.to_string()))
            }
        }
    }

    fn pre_exec_inner(&mut self) -> Result<()> {
        let args = self.args.as_ref().expect("prepared");

        if args.sharedfs.typ == SharedFsType::Virtiofs {
            if !self.vmm.supports_sharedfs("virtio") {
                return Err(Error::PreExec(format!(
                    "monitor \"{}\" does not support virtiofs",
                    self.vmm_type
                )));
            }

            let rootfs = self.rootfs.as_ref().expect("prepared");
            let child = spawn_virtiofsd(&self.config.extra_binaries, &rootfs.mounted_path)?;
            let pid = child.id() as i32;
            self.rollback.push("kill virtiofsd", move || {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            });
        }

        self.vmm.pre_exec(args)
    }

    /// The argv the handover will use. Pure; exposed so callers can log or
    /// inspect it without committing to the exec.
    pub fn build_command(&self) -> Result<Vec<String>> {
        let args = self
            .args
            .as_ref()
            .ok_or_else(|| Error::PreExec("launch has not been prepared".to_string()))?;
        let unikernel = self.unikernel.as_ref().expect("prepared");

        self.vmm.build_exec_cmd(args, unikernel)
    }

    /// READY → monitor. On success this never returns: the launcher becomes
    /// the monitor process and the recorded side effects now belong to the
    /// running guest. Only the hedge backend returns, after writing its
    /// spawn directive.
    pub fn exec(mut self) -> Result<()> {
        self.expect_state(LaunchState::Ready)?;

        let argv = match self.build_command() {
            Ok(argv) => argv,
            Err(e) => {
                self.rollback.unwind();
                return Err(e);
            }
        };

        if let Err(e) = self.timestamper.capture(&self.request.container_id, "exec") {
            warn!("failed to record exec timestamp: {e}");
        }

        if self.vmm_type == VmmType::Hedge {
            info!("spawning guest through {}", argv[0]);
            let directive = argv[1..].join(" ");
            if let Err(e) = fs::write(&argv[0], directive) {
                self.rollback.unwind();
                return Err(Error::Io(e));
            }
            self.rollback.defuse();
            return Ok(());
        }

        info!("handing over to {}", argv[0]);

        let program = match CString::new(argv[0].clone()) {
            Ok(p) => p,
            Err(_) => {
                self.rollback.unwind();
                return Err(Error::PreExec("argv contains a NUL byte".to_string()));
            }
        };
        let c_args = match argv
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(a) => a,
            Err(_) => {
                self.rollback.unwind();
                return Err(Error::PreExec("argv contains a NUL byte".to_string()));
            }
        };

        // only returns on failure
        let errno = execv(&program, &c_args).unwrap_err();
        self.rollback.unwind();
        Err(Error::Io(io::Error::from(errno)))
    }

    /// Terminate a running monitor. Idempotent, usable at any point after
    /// the handover.
    pub fn stop(&self, pid: i32) -> Result<()> {
        self.vmm.stop(pid)
    }

    fn expect_state(&self, expected: LaunchState) -> Result<()> {
        if self.state != expected {
            return Err(Error::PreExec(format!(
                "launch is in state {:?}, expected {:?}",
                self.state, expected
            )));
        }
        Ok(())
    }
}

/// Merge the persisted configuration and the per-container annotations into
/// the fully resolved launch request handed to the drivers.
#[allow(clippy::too_many_arguments)]
pub fn resolve_exec_args(
    config: &UruncConfig,
    annot: &HashMap<String, String>,
    container_id: &str,
    vmm_type: VmmType,
    container_rootfs: &Path,
    rootfs: &RootfsParams,
    net: NetworkInfo,
) -> Result<ExecArgs> {
    let monitor = config.monitors.get(vmm_type.as_str());

    let memory_mb = match monitor {
        Some(m) if m.default_memory_mb > 0 => u64::from(m.default_memory_mb),
        _ => DEFAULT_MEMORY_MB,
    };
    let vcpus = match monitor {
        Some(m) => m.default_vcpus,
        None => 1,
    };

    let binary = annotations::get(annot, ANNOT_BINARY);
    if binary.is_empty() {
        return Err(Error::InvalidAnnotation(format!(
            "{ANNOT_BINARY} is required"
        )));
    }
    let unikernel_path = container_rootfs
        .join(binary.trim_start_matches('/'))
        .to_string_lossy()
        .into_owned();

    let initrd_path = if rootfs.typ == RootfsType::Initrd {
        rootfs.path.clone()
    } else {
        String::new()
    };

    let sharedfs = SharedFs {
        typ: if rootfs.typ == RootfsType::Shared {
            SharedFsType::Virtiofs
        } else {
            SharedFsType::None
        },
    };

    // enabled unless explicitly switched off
    let seccomp = !matches!(annotations::get(annot, ANNOT_SECCOMP), "false" | "0");

    let mut args = ExecArgs {
        container_id: container_id.to_string(),
        unikernel_path,
        initrd_path,
        mem_size_b: memory_mb * 1024 * 1024,
        vcpus,
        net,
        sharedfs,
        seccomp,
        command: annotations::get(annot, ANNOT_CMDLINE).to_string(),
        vaccel_type: VaccelType::None,
        vsock_dev_id: 0,
        vsock_dev_path: String::new(),
    };

    let vaccel_address = annotations::get(annot, ANNOT_VACCEL_ADDRESS);
    if !vaccel_address.is_empty() {
        let endpoint = validate_vsock_address(vaccel_address, vmm_type.as_str())?;

        args.vaccel_type = VaccelType::Vsock;
        args.vsock_dev_id = id_to_guest_cid(container_id);
        args.vsock_dev_path = if !endpoint.socket_dir.is_empty() {
            endpoint.socket_dir
        } else {
            match monitor {
                Some(m) if !m.data_path.is_empty() => m.data_path.clone(),
                _ => format!("/run/urunc/{container_id}"),
            }
        };
    }

    Ok(args)
}

fn spawn_virtiofsd(
    extra_binaries: &HashMap<String, ExtraBinConfig>,
    shared_dir: &str,
) -> Result<Child> {
    let virtiofsd = extra_binaries
        .get("virtiofsd")
        .cloned()
        .or_else(|| default_extra_binaries().remove("virtiofsd"))
        .expect("virtiofsd is part of the default extra binaries");

    let mut command = Command::new(&virtiofsd.path);
    if !virtiofsd.options.trim().is_empty() {
        command.args(split_cli(&virtiofsd.options));
    }
    command
        .arg("--socket-path")
        .arg(VIRTIOFS_SOCKET)
        .arg("--shared-dir")
        .arg(shared_dir);

    debug!(?command, "starting virtiofsd");

    command
        .spawn()
        .map_err(|e| Error::PreExec(format!("failed to start virtiofsd: {e}")))
}
