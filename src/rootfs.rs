// SPDX-License-Identifier: GPL-2.0-or-later

//! Guest-visible storage selection. Given the OCI annotations and the
//! container rootfs prepared by the engine, decide how the guest sees its
//! filesystem: an initrd handed to the monitor, a block artifact, a shared
//! directory served over virtiofs, or nothing but the kernel image.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use nix::mount::{mount, umount, MsFlags};
use tracing::debug;

use crate::annotations::{self, ANNOT_BLOCK, ANNOT_INITRD, ANNOT_MOUNT_ROOTFS, ANNOT_SHAREDFS};
use crate::error::{Error, Result};

pub const SHAREDFS_VIRTIOFS: &str = "virtiofs";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RootfsType {
    Initrd,
    Block,
    Shared,
    #[default]
    None,
}

impl fmt::Display for RootfsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RootfsType::Initrd => "initrd",
            RootfsType::Block => "block",
            RootfsType::Shared => "shared",
            RootfsType::None => "none",
        };
        f.write_str(s)
    }
}

/// The storage view handed to the VMM drivers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootfsParams {
    pub typ: RootfsType,
    /// Host-visible artifact (initrd file, block image, shared directory).
    pub path: String,
    /// Where the host mounted it, when a mount was performed.
    pub mounted_path: String,
    /// Directory the monitor is scoped to.
    pub mon_rootfs: String,
}

fn new_rootfs_result(
    typ: RootfsType,
    path: &str,
    mounted_path: &str,
    mon_rootfs: &str,
) -> RootfsParams {
    RootfsParams {
        typ,
        path: path.to_string(),
        mounted_path: mounted_path.to_string(),
        mon_rootfs: mon_rootfs.to_string(),
    }
}

pub struct RootfsSelector<'a> {
    annot: &'a HashMap<String, String>,
    cntr_rootfs: &'a Path,
    mon_rootfs: &'a Path,
}

impl<'a> RootfsSelector<'a> {
    pub fn new(
        annot: &'a HashMap<String, String>,
        cntr_rootfs: &'a Path,
        mon_rootfs: &'a Path,
    ) -> Self {
        RootfsSelector {
            annot,
            cntr_rootfs,
            mon_rootfs,
        }
    }

    /// Apply the selection rules in strict priority order; the first rule
    /// that matches wins. Only the shared-fs and mount-rootfs rules touch the
    /// filesystem, and a failed mount leaves nothing behind.
    pub fn select(&self) -> Result<RootfsParams> {
        if let Some(params) = self.try_initrd() {
            return Ok(params);
        }
        if let Some(params) = self.try_block() {
            return Ok(params);
        }
        if let Some(params) = self.try_sharedfs()? {
            return Ok(params);
        }
        if self.should_mount_container_rootfs() {
            return self.mount_container_rootfs();
        }

        // guest boots from the kernel image alone
        Ok(new_rootfs_result(
            RootfsType::None,
            "",
            "",
            &self.mon_rootfs.to_string_lossy(),
        ))
    }

    fn try_initrd(&self) -> Option<RootfsParams> {
        let initrd = annotations::get(self.annot, ANNOT_INITRD);
        if initrd.is_empty() {
            return None;
        }

        Some(new_rootfs_result(
            RootfsType::Initrd,
            initrd,
            "",
            &self.mon_rootfs.to_string_lossy(),
        ))
    }

    fn try_block(&self) -> Option<RootfsParams> {
        let block = annotations::get(self.annot, ANNOT_BLOCK);
        if block.is_empty() {
            return None;
        }

        Some(new_rootfs_result(
            RootfsType::Block,
            block,
            "",
            &self.mon_rootfs.to_string_lossy(),
        ))
    }

    fn try_sharedfs(&self) -> Result<Option<RootfsParams>> {
        match annotations::get(self.annot, ANNOT_SHAREDFS) {
            "" => Ok(None),
            SHAREDFS_VIRTIOFS => {
                self.bind_mount_rootfs()?;
                Ok(Some(new_rootfs_result(
                    RootfsType::Shared,
                    &self.cntr_rootfs.to_string_lossy(),
                    &self.mon_rootfs.to_string_lossy(),
                    &self.mon_rootfs.to_string_lossy(),
                )))
            }
            other => Err(Error::InvalidAnnotation(format!(
                "unknown shared filesystem type \"{other}\""
            ))),
        }
    }

    /// Only the exact strings "true" and "1" enable the mount; every other
    /// value, including "True" and "TRUE", is false.
    fn should_mount_container_rootfs(&self) -> bool {
        matches!(
            annotations::get(self.annot, ANNOT_MOUNT_ROOTFS),
            "true" | "1"
        )
    }

    fn mount_container_rootfs(&self) -> Result<RootfsParams> {
        self.bind_mount_rootfs()?;
        Ok(new_rootfs_result(
            RootfsType::None,
            &self.cntr_rootfs.to_string_lossy(),
            &self.mon_rootfs.to_string_lossy(),
            &self.mon_rootfs.to_string_lossy(),
        ))
    }

    fn bind_mount_rootfs(&self) -> Result<()> {
        fs::create_dir_all(self.mon_rootfs)?;

        debug!(
            "bind mounting {} onto {}",
            self.cntr_rootfs.display(),
            self.mon_rootfs.display()
        );

        mount(
            Some(self.cntr_rootfs),
            self.mon_rootfs,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| Error::Io(e.into()))
    }
}

/// Undo a bind mount performed by the selector.
pub fn unmount_rootfs(mounted_path: impl AsRef<Path>) -> Result<()> {
    umount(mounted_path.as_ref()).map_err(|e| Error::Io(e.into()))
}
