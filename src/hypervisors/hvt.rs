// SPDX-License-Identifier: GPL-2.0-or-later

use tracing::debug;

use crate::error::Result;
use crate::hypervisors::spt::solo5_exec_cmd;
use crate::hypervisors::{ExecArgs, Vmm};
use crate::unikernel::UnikernelProfile;

pub const HVT_BINARY: &str = "solo5-hvt";

/// The solo5 hardware-virtualized tender. Shares the seccomp tender's
/// command-line shape; only the execution substrate differs.
#[derive(Debug)]
pub struct Hvt {
    binary_path: String,
}

impl Hvt {
    pub fn new(binary_path: String) -> Self {
        Hvt { binary_path }
    }
}

impl Vmm for Hvt {
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

        debug!(?cmd, "ready to execve solo5-hvt");

        Ok(cmd)
    }
}
