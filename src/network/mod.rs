// SPDX-License-Identifier: GPL-2.0-or-later

mod dynamic_network;
mod static_network;

use std::fmt;
use std::process::Command;

pub use dynamic_network::DynamicNetwork;
pub use static_network::StaticNetwork;

use crate::error::{Error, Result};

/// The guest NIC attachment. An empty `tap_dev` means the guest boots without
/// a network interface and the drivers emit no network flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub tap_dev: String,
    pub mac: String,
}

pub trait NetworkManager: fmt::Debug {
    /// Make the tap device usable; for the dynamic manager this creates and
    /// plumbs it.
    fn setup(&mut self) -> Result<()>;

    /// Release whatever `setup` created. No-op for pre-created devices.
    fn teardown(&mut self) -> Result<()>;

    fn info(&self) -> &NetworkInfo;
}

/// `kind` selects how the tap device comes to exist: `"static"` consumes a
/// device the caller (e.g. a CNI plugin) already created, `"dynamic"` creates
/// and plumbs one.
pub fn new_network_manager(kind: &str, info: NetworkInfo) -> Result<Box<dyn NetworkManager>> {
    match kind {
        "static" => Ok(Box::new(StaticNetwork::new(info))),
        "dynamic" => Ok(Box::new(DynamicNetwork::new(info, None))),
        other => Err(Error::Network(format!(
            "unknown network manager type \"{other}\""
        ))),
    }
}

/// Run `ip(8)`, inheriting the caller's standard streams.
pub(crate) fn ip_command<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let status = Command::new("ip")
        .args(args)
        .spawn()
        .map_err(Error::Io)?
        .wait()
        .map_err(Error::Io)?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Network("ip command failed".to_string()))
    }
}
