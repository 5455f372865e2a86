use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which files a backup cycle picks up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Every file matching the extension set or the explicit file list
    #[default]
    Extensions,
    /// Like `Extensions`, restricted to files modified after the last backup
    ModifiedSince,
}

/// Backup settings of one instance, as stored under `maps.<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceBackupConfig {
    /// Filled from the map key after parsing
    #[serde(skip)]
    pub name: String,
    /// Directory receiving the archives
    pub zip_dir: PathBuf,
    /// Directory the saved files are read from
    pub extract_dir: PathBuf,
    /// Extensions to include, with or without the leading dot
    #[serde(default)]
    pub file_extensions: BTreeSet<String>,
    /// Paths relative to `extract_dir` that are always included when present
    #[serde(default)]
    pub specific_files: BTreeSet<String>,
    #[serde(default)]
    pub selection: SelectionPolicy,
    pub interval_minutes: u64,
    pub retention_days: u64,
}

impl InstanceBackupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    /// Whether `path`'s extension is in the configured set.
    pub fn matches_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.file_extensions
            .iter()
            .any(|wanted| wanted.trim_start_matches('.') == ext)
    }

    pub fn has_filters(&self) -> bool {
        !self.file_extensions.is_empty() || !self.specific_files.is_empty()
    }
}

/// On-disk layout of `backup_config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupConfigFile {
    #[serde(default)]
    pub maps: HashMap<String, InstanceBackupConfig>,
}

/// Outcome of one completed backup cycle.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub archive: PathBuf,
    /// Cycle timestamp persisted as the last-backup marker
    pub timestamp: String,
    pub files: usize,
    /// Archives removed by the retention sweep
    pub pruned: usize,
}

/// One archive in an instance's target directory.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    pub file_name: String,
    pub size: u64,
    pub modified: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extensions: &[&str]) -> InstanceBackupConfig {
        InstanceBackupConfig {
            name: "island".into(),
            zip_dir: PathBuf::from("/backups"),
            extract_dir: PathBuf::from("/saves"),
            file_extensions: extensions.iter().map(|e| e.to_string()).collect(),
            specific_files: BTreeSet::new(),
            selection: SelectionPolicy::default(),
            interval_minutes: 15,
            retention_days: 7,
        }
    }

    #[test]
    fn extension_match_ignores_leading_dot() {
        let cfg = config(&[".ark", "arkprofile"]);
        assert!(cfg.matches_extension(Path::new("SavedArks/TheIsland.ark")));
        assert!(cfg.matches_extension(Path::new("123.arkprofile")));
        assert!(!cfg.matches_extension(Path::new("TheIsland.ark.bak")));
        assert!(!cfg.matches_extension(Path::new("README")));
    }

    #[test]
    fn durations_follow_units() {
        let cfg = config(&[]);
        assert_eq!(cfg.interval(), Duration::from_secs(900));
        assert_eq!(cfg.retention(), Duration::from_secs(7 * 86_400));
        assert!(!cfg.has_filters());
    }

    #[test]
    fn parses_maps_with_default_selection() {
        let file: BackupConfigFile = serde_json::from_str(
            r#"{"maps": {"island": {
                "zip_dir": "/b", "extract_dir": "/s",
                "file_extensions": [".ark"], "specific_files": ["Game.ini"],
                "interval_minutes": 30, "retention_days": 3
            }}}"#,
        )
        .unwrap();

        let island = &file.maps["island"];
        assert_eq!(island.selection, SelectionPolicy::Extensions);
        assert!(island.specific_files.contains("Game.ini"));
    }
}
