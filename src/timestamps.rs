// SPDX-License-Identifier: GPL-2.0-or-later

//! Boot-time measurement records. When enabled, each lifecycle checkpoint of
//! a container launch appends one line to the destination file:
//! `<unix-nanos> <container-id> <event>`. The records let operators measure
//! time-to-guest without attaching a tracer to the launcher.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::TimestampsConfig;

#[derive(Debug, Clone)]
pub struct Timestamper {
    destination: Option<PathBuf>,
}

impl Timestamper {
    pub fn new(config: &TimestampsConfig) -> Self {
        let destination = if config.enabled {
            Some(PathBuf::from(&config.destination))
        } else {
            None
        };
        Timestamper { destination }
    }

    /// A disabled timestamper that never touches the filesystem.
    pub fn disabled() -> Self {
        Timestamper { destination: None }
    }

    pub fn capture(&self, container_id: &str, event: &str) -> io::Result<()> {
        let Some(destination) = &self.destination else {
            return Ok(());
        };

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(io::Error::other)?
            .as_nanos();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)?;
        writeln!(file, "{nanos} {container_id} {event}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    #[test]
    fn capture_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("timestamps.log");

        let timestamper = Timestamper::new(&TimestampsConfig {
            enabled: true,
            destination: destination.to_str().unwrap().to_string(),
        });

        timestamper.capture("ctr-1", "create").unwrap();
        timestamper.capture("ctr-1", "exec").unwrap();

        let contents = fs::read_to_string(&destination).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" ctr-1 create"));
        assert!(lines[1].ends_with(" ctr-1 exec"));
    }

    #[test]
    fn disabled_timestamper_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("timestamps.log");

        let timestamper = Timestamper::new(&TimestampsConfig {
            enabled: false,
            destination: destination.to_str().unwrap().to_string(),
        });

        timestamper.capture("ctr-1", "create").unwrap();
        assert!(!destination.exists());
    }
}
