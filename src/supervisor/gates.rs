//! # Operational Gates
//!
//! File-based kill switches checked once per supervisor beat, independent of
//! the signal path. The enabled-queue allow-list names which queues may run
//! at all; maintenance marker files pause everything while operators work on
//! the backing systems.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SupervisorConfig;

/// Allow-list and maintenance-flag checks for the supervisor loop
#[derive(Debug, Clone)]
pub struct OperationalGates {
    enabled_queues_path: PathBuf,
    maintenance_rw_path: PathBuf,
    maintenance_ro_path: PathBuf,
}

impl OperationalGates {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            enabled_queues_path: config.enabled_queues_path.clone(),
            maintenance_rw_path: config.maintenance_rw_path.clone(),
            maintenance_ro_path: config.maintenance_ro_path.clone(),
        }
    }

    pub fn new(
        enabled_queues_path: impl Into<PathBuf>,
        maintenance_rw_path: impl Into<PathBuf>,
        maintenance_ro_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            enabled_queues_path: enabled_queues_path.into(),
            maintenance_rw_path: maintenance_rw_path.into(),
            maintenance_ro_path: maintenance_ro_path.into(),
        }
    }

    /// Whether the given queue alias appears in the allow-list
    ///
    /// The file holds a comma-separated list of queue aliases. A missing or
    /// unreadable file means an empty allow-list: nothing runs.
    pub fn queue_enabled(&self, queue_alias: &str) -> bool {
        read_allow_list(&self.enabled_queues_path)
            .iter()
            .any(|entry| entry == queue_alias)
    }

    /// Whether either maintenance marker file is present
    pub fn maintenance_active(&self) -> bool {
        self.maintenance_rw_path.exists() || self.maintenance_ro_path.exists()
    }
}

fn read_allow_list(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn gates_in(dir: &Path) -> OperationalGates {
        OperationalGates::new(
            dir.join("enabled_queues"),
            dir.join("maintenance"),
            dir.join("maintenance_readonly"),
        )
    }

    #[test]
    fn missing_allow_list_disables_everything() {
        let dir = tempfile::tempdir().unwrap();
        let gates = gates_in(dir.path());
        assert!(!gates.queue_enabled("orders"));
    }

    #[test]
    fn allow_list_is_comma_separated_and_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("enabled_queues")).unwrap();
        write!(file, "orders, events ,  billing\n").unwrap();

        let gates = gates_in(dir.path());
        assert!(gates.queue_enabled("orders"));
        assert!(gates.queue_enabled("events"));
        assert!(gates.queue_enabled("billing"));
        assert!(!gates.queue_enabled("shipping"));
    }

    #[test]
    fn maintenance_marker_files_gate_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let gates = gates_in(dir.path());
        assert!(!gates.maintenance_active());

        fs::File::create(dir.path().join("maintenance")).unwrap();
        assert!(gates.maintenance_active());

        fs::remove_file(dir.path().join("maintenance")).unwrap();
        fs::File::create(dir.path().join("maintenance_readonly")).unwrap();
        assert!(gates.maintenance_active());
    }
}
