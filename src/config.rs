//! Process and per-target configuration, loaded from a single TOML file:
//! every target this crate monitors, plus the handful of process-wide
//! knobs the surrounding application reads but this crate does not act on
//! itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::checksum::ChecksumAlgorithm;
use crate::error::FixityError;
use crate::types::{LargeChangeThresholds, TargetKind, TargetTuning};

#[derive(Debug, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub process: ProcessConfigToml,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfigToml>,
}

/// Process-wide settings. `max_concurrent_scans` and `listen_addr` are
/// carried through for the surrounding application (which owns the excluded
/// HTTP surface and its own worker-count policy); this crate reads only
/// `database_path`.
#[derive(Debug, Deserialize)]
pub struct ProcessConfigToml {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub max_concurrent_scans: Option<usize>,
    #[serde(default)]
    pub listen_addr: Option<String>,
    #[serde(default = "default_shutdown_deadline_secs")]
    pub shutdown_deadline_secs: u64,
}

impl Default for ProcessConfigToml {
    fn default() -> Self {
        ProcessConfigToml {
            database_path: default_database_path(),
            max_concurrent_scans: None,
            listen_addr: None,
            shutdown_deadline_secs: default_shutdown_deadline_secs(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("fixity.sqlite3")
}

fn default_shutdown_deadline_secs() -> u64 {
    30
}

/// Resolved process configuration. `shutdown_deadline` is a `Duration` (spec
/// open question, resolved this way): graceful shutdown waits up to this
/// long for running scans to reach a checkpoint before the process gives up
/// on a clean stop.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub database_path: PathBuf,
    pub max_concurrent_scans: Option<usize>,
    pub listen_addr: Option<String>,
    pub shutdown_deadline: Duration,
}

impl From<ProcessConfigToml> for ProcessConfig {
    fn from(toml: ProcessConfigToml) -> Self {
        ProcessConfig {
            database_path: toml.database_path,
            max_concurrent_scans: toml.max_concurrent_scans,
            listen_addr: toml.listen_addr,
            shutdown_deadline: Duration::from_secs(toml.shutdown_deadline_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetConfigToml {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub root_path: PathBuf,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub share: Option<String>,
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule_cron: Option<String>,
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    #[serde(default = "default_sample_percent")]
    pub random_sample_percent: u8,
    #[serde(default = "default_checksum_algorithm")]
    pub checksum_algorithm: String,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub large_change_count: Option<i64>,
    #[serde(default)]
    pub large_change_percent: Option<f64>,
    #[serde(default)]
    pub large_change_bytes: Option<i64>,
}

fn default_kind() -> String {
    "local".to_string()
}
fn default_true() -> bool {
    true
}
fn default_parallel_workers() -> usize {
    TargetTuning::default().parallel_workers
}
fn default_sample_percent() -> u8 {
    TargetTuning::default().random_sample_percent
}
fn default_checksum_algorithm() -> String {
    "blake3".to_string()
}
fn default_checkpoint_interval() -> usize {
    TargetTuning::default().checkpoint_interval
}
fn default_batch_size() -> usize {
    TargetTuning::default().batch_size
}

/// One `[[target]]` table, resolved against the typed model this crate
/// actually operates on.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub name: String,
    pub kind: TargetKind,
    pub root_path: PathBuf,
    pub server: Option<String>,
    pub share: Option<String>,
    pub credential_ref: Option<String>,
    pub enabled: bool,
    pub schedule_cron: Option<String>,
    pub tuning: TargetTuning,
}

impl TargetConfigToml {
    pub fn resolve(self) -> Result<TargetConfig, FixityError> {
        let kind = TargetKind::parse(&self.kind)
            .ok_or_else(|| FixityError::BadConfig(format!("unknown target kind {:?}", self.kind)))?;
        let checksum_algorithm = ChecksumAlgorithm::parse(&self.checksum_algorithm)?;
        if self.random_sample_percent > 100 {
            return Err(FixityError::BadConfig(format!(
                "random_sample_percent must be <= 100, got {}",
                self.random_sample_percent
            )));
        }
        if self.parallel_workers == 0 {
            return Err(FixityError::BadConfig("parallel_workers must be at least 1".to_string()));
        }
        Ok(TargetConfig {
            name: self.name,
            kind,
            root_path: self.root_path,
            server: self.server,
            share: self.share,
            credential_ref: self.credential_ref,
            enabled: self.enabled,
            schedule_cron: self.schedule_cron,
            tuning: TargetTuning {
                parallel_workers: self.parallel_workers,
                random_sample_percent: self.random_sample_percent,
                checksum_algorithm,
                checkpoint_interval: self.checkpoint_interval,
                batch_size: self.batch_size,
                large_change: LargeChangeThresholds {
                    count: self.large_change_count,
                    percent: self.large_change_percent,
                    bytes: self.large_change_bytes,
                },
            },
        })
    }
}

pub struct LoadedConfig {
    pub process: ProcessConfig,
    pub targets: Vec<TargetConfig>,
}

/// Loads and validates the process configuration file. A missing or
/// malformed file is always an error here — there is no fallback to fall
/// back to.
pub fn load(path: &Path) -> Result<LoadedConfig, FixityError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| FixityError::BadConfig(format!("{}: {e}", path.display())))?;
    let file: FileConfig =
        toml::from_str(&raw).map_err(|e| FixityError::BadConfig(format!("{}: {e}", path.display())))?;
    let targets = file
        .targets
        .into_iter()
        .map(TargetConfigToml::resolve)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LoadedConfig {
        process: file.process.into(),
        targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_target_table_resolves_with_defaults() {
        let toml = r#"
            [[target]]
            name = "archive"
            root_path = "/srv/archive"
        "#;
        let file: FileConfig = toml::from_str(toml).unwrap();
        let target = file.targets.into_iter().next().unwrap().resolve().unwrap();
        assert_eq!(target.kind, TargetKind::Local);
        assert_eq!(target.tuning.checksum_algorithm, ChecksumAlgorithm::Blake3);
        assert!(target.enabled);
    }

    #[test]
    fn sample_percent_over_100_is_rejected() {
        let toml = r#"
            [[target]]
            name = "archive"
            root_path = "/srv/archive"
            random_sample_percent = 150
        "#;
        let file: FileConfig = toml::from_str(toml).unwrap();
        let err = file.targets.into_iter().next().unwrap().resolve().unwrap_err();
        assert!(matches!(err, FixityError::BadConfig(_)));
    }

    #[test]
    fn unknown_checksum_algorithm_is_rejected() {
        let toml = r#"
            [[target]]
            name = "archive"
            root_path = "/srv/archive"
            checksum_algorithm = "crc32"
        "#;
        let file: FileConfig = toml::from_str(toml).unwrap();
        let err = file.targets.into_iter().next().unwrap().resolve().unwrap_err();
        assert!(matches!(err, FixityError::BadConfig(_)));
    }

    #[test]
    fn process_section_defaults_when_absent() {
        let file: FileConfig = toml::from_str("").unwrap();
        let process: ProcessConfig = file.process.into();
        assert_eq!(process.shutdown_deadline, Duration::from_secs(30));
    }
}
