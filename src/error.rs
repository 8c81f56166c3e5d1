// SPDX-License-Identifier: GPL-2.0-or-later

use std::io;

use thiserror::Error;

/// Failures surfaced to the OCI caller. Message prefixes are stable so that
/// engine-side tooling can scan runtime logs for them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("vmm \"{0}\" is not supported")]
    UnsupportedVmm(String),

    #[error("vmm not found")]
    VmmNotInstalled,

    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("invalid annotation: {0}")]
    InvalidAnnotation(String),

    #[error("pre-exec setup failed: {0}")]
    PreExec(String),

    #[error("network setup failed: {0}")]
    Network(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
