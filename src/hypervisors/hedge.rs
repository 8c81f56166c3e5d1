// SPDX-License-Identifier: GPL-2.0-or-later

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::hypervisors::{bytes_to_mb, ExecArgs, Vmm};
use crate::unikernel::UnikernelProfile;

/// Control file of the in-kernel monitor. Present only when the hedge module
/// is loaded, which is what `ok` probes.
pub const HEDGE_CONTROL: &str = "/dev/hedge";

/// Not a VMM: guests are spawned by the kernel itself through a control
/// file, so there is no binary lookup and no process-image replacement. The
/// launcher writes the directive produced by `build_exec_cmd` into the
/// control file instead of calling exec.
#[derive(Debug, Default)]
pub struct Hedge;

impl Vmm for Hedge {
    fn path(&self) -> &str {
        HEDGE_CONTROL
    }

    fn ok(&self) -> Result<()> {
        if Path::new(HEDGE_CONTROL).exists() {
            Ok(())
        } else {
            Err(Error::VmmNotInstalled)
        }
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

    fn build_exec_cmd(&self, args: &ExecArgs, _unikernel: &UnikernelProfile) -> Result<Vec<String>> {
        let mem = bytes_to_mb(args.mem_size_b);

        let mut cmd: Vec<String> = vec![HEDGE_CONTROL.to_string(), "start".to_string()];

        cmd.push(format!("mem={mem}"));
        if args.vcpus > 0 {
            cmd.push(format!("cpus={}", args.vcpus));
        }
        if !args.net.tap_dev.is_empty() {
            cmd.push(format!("net={}", args.net.tap_dev));
        }
        if !args.initrd_path.is_empty() {
            cmd.push(format!("initrd={}", args.initrd_path));
        }
        cmd.push(format!("kernel={}", args.unikernel_path));
        cmd.push(format!("cmdline={}", args.command));

        debug!(?cmd, "ready to spawn hedge guest");

        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_names_the_control_file_first() {
        let argv = Hedge
            .build_exec_cmd(
                &ExecArgs {
                    unikernel_path: "/k".to_string(),
                    mem_size_b: 256 * 1024 * 1024,
                    vcpus: 1,
                    command: "console=ttyS0".to_string(),
                    ..Default::default()
                },
                &UnikernelProfile::default(),
            )
            .unwrap();

        assert_eq!(argv[0], HEDGE_CONTROL);
        assert_eq!(argv[1], "start");
        assert!(argv.contains(&"mem=256".to_string()));
        assert!(argv.contains(&"kernel=/k".to_string()));
        assert_eq!(argv.last().unwrap(), "cmdline=console=ttyS0");
    }

    #[test]
    fn readiness_requires_the_control_file() {
        // the hedge module is not loaded on build machines
        if !Path::new(HEDGE_CONTROL).exists() {
            assert!(Hedge.ok().is_err());
        }
    }
}
