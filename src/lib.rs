// SPDX-License-Identifier: GPL-2.0-or-later

pub mod annotations;
pub mod config;
pub mod error;
pub mod hypervisors;
pub mod launch;
pub mod logging;
pub mod network;
pub mod rootfs;
pub mod timestamps;
pub mod unikernel;
pub mod vaccel;

pub use error::{Error, Result};
