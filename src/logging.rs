// SPDX-License-Identifier: GPL-2.0-or-later

use std::io;

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Environment override for the configured log level, e.g.
/// `URUNC_LOG=urunc=trace`.
pub const LOG_ENV_VAR: &str = "URUNC_LOG";

/// Install the process-wide subscriber from the `[log]` section. Called with
/// the narrow config loader's output before the full configuration is parsed,
/// so early failures are reported at the configured level too. Safe to call
/// more than once; only the first call installs a subscriber.
pub fn init(config: &LogConfig) {
    let default_level = match config.level.as_str() {
        "" => "info",
        level => level,
    };

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout/stderr are inherited by the monitor after exec; keep logs on
    // stderr so the guest console owns stdout
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
