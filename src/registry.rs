use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::ConfigError;
use crate::models::{BackupConfigFile, InstanceBackupConfig, InstanceProcessConfig, RconEndpoint};

pub const PROCESS_CONFIG_FILE: &str = "process_config.json";
pub const BACKUP_CONFIG_FILE: &str = "backup_config.json";
pub const RCON_CONFIG_FILE: &str = "rcon_config.json";

/// Static per-instance configuration, loaded once and never mutated.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    processes: HashMap<String, InstanceProcessConfig>,
    backups: HashMap<String, InstanceBackupConfig>,
    consoles: HashMap<String, RconEndpoint>,
}

impl InstanceRegistry {
    /// Load and validate all three config files from `dir`.
    ///
    /// Any missing file, parse failure or invalid record fails the whole
    /// load; the supervisor never starts from a partial registry.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let processes: Vec<InstanceProcessConfig> = read_json(&dir.join(PROCESS_CONFIG_FILE))?;
        let backups: BackupConfigFile = read_json(&dir.join(BACKUP_CONFIG_FILE))?;
        let consoles: Vec<RconEndpoint> = read_json(&dir.join(RCON_CONFIG_FILE))?;

        Self::from_parts(processes, backups.maps.into_iter().collect(), consoles)
    }

    pub fn from_parts(
        processes: Vec<InstanceProcessConfig>,
        backups: Vec<(String, InstanceBackupConfig)>,
        consoles: Vec<RconEndpoint>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::default();

        for process in processes {
            validate_process(&process)?;
            if registry.processes.contains_key(&process.name) {
                return Err(ConfigError::Duplicate(process.name));
            }
            registry.processes.insert(process.name.clone(), process);
        }

        for (name, mut backup) in backups {
            backup.name = name.clone();
            validate_backup(&backup)?;
            registry.backups.insert(name, backup);
        }

        for console in consoles {
            if registry.consoles.contains_key(&console.map) {
                return Err(ConfigError::Duplicate(console.map));
            }
            if !registry.contains(&console.map) {
                return Err(ConfigError::Invalid {
                    name: console.map,
                    reason: "rcon endpoint names an unknown map".to_string(),
                });
            }
            registry.consoles.insert(console.map.clone(), console);
        }

        Ok(registry)
    }

    pub fn process(&self, name: &str) -> Option<&InstanceProcessConfig> {
        self.processes.get(name)
    }

    pub fn backup(&self, name: &str) -> Option<&InstanceBackupConfig> {
        self.backups.get(name)
    }

    pub fn console(&self, name: &str) -> Option<&RconEndpoint> {
        self.consoles.get(name)
    }

    /// Process-side instance names, sorted.
    pub fn process_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.processes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Backup-side instance names, sorted.
    pub fn backup_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.backups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name) || self.backups.contains_key(name)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_process(process: &InstanceProcessConfig) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: process.name.clone(),
        reason: reason.to_string(),
    };

    if process.name.trim().is_empty() {
        return Err(invalid("map name is empty"));
    }
    if process.executable.as_os_str().is_empty() {
        return Err(invalid("executable is empty"));
    }
    if process.restart_interval == 0 {
        return Err(invalid("restart_interval must be at least one second"));
    }
    Ok(())
}

fn validate_backup(backup: &InstanceBackupConfig) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: backup.name.clone(),
        reason: reason.to_string(),
    };

    if backup.name.trim().is_empty() {
        return Err(invalid("map name is empty"));
    }
    if backup.interval_minutes == 0 {
        return Err(invalid("interval_minutes must be at least one"));
    }
    if backup.zip_dir.as_os_str().is_empty() || backup.extract_dir.as_os_str().is_empty() {
        return Err(invalid("zip_dir and extract_dir are required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_configs(dir: &Path, processes: &str, backups: &str, consoles: &str) {
        fs::write(dir.join(PROCESS_CONFIG_FILE), processes).unwrap();
        fs::write(dir.join(BACKUP_CONFIG_FILE), backups).unwrap();
        fs::write(dir.join(RCON_CONFIG_FILE), consoles).unwrap();
    }

    #[test]
    fn loads_all_three_files() {
        let dir = TempDir::new().unwrap();
        write_configs(
            dir.path(),
            r#"[{"map": "island", "executable": "/srv/island/server", "args": ["-log"], "restart_interval": 10},
                {"map": "center", "executable": "/srv/center/server", "restart_interval": 10}]"#,
            r#"{"maps": {"island": {"zip_dir": "/b", "extract_dir": "/s", "file_extensions": [".ark"],
                "interval_minutes": 15, "retention_days": 7}}}"#,
            r#"[{"map": "island", "ip": "127.0.0.1", "port": "27020", "pass": "secret"}]"#,
        );

        let registry = InstanceRegistry::load(dir.path()).unwrap();

        assert_eq!(registry.process_names(), vec!["center", "island"]);
        assert_eq!(registry.backup_names(), vec!["island"]);
        assert_eq!(registry.backup("island").unwrap().name, "island");
        assert_eq!(registry.console("island").unwrap().address(), "127.0.0.1:27020");
        assert!(registry.console("center").is_none());
        assert!(registry.contains("center"));
        assert!(!registry.contains("ragnarok"));
    }

    #[test]
    fn dangling_console_is_fatal() {
        let console = RconEndpoint {
            map: "ragnarok".into(),
            ip: "127.0.0.1".into(),
            port: "27020".into(),
            pass: "secret".into(),
        };
        let err = InstanceRegistry::from_parts(Vec::new(), Vec::new(), vec![console]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name, .. } if name == "ragnarok"));
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROCESS_CONFIG_FILE), "[]").unwrap();

        let err = InstanceRegistry::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn unparseable_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_configs(dir.path(), "[{", r#"{"maps": {}}"#, "[]");

        let err = InstanceRegistry::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn rejects_duplicates_and_zero_intervals() {
        let dir = TempDir::new().unwrap();
        write_configs(
            dir.path(),
            r#"[{"map": "island", "executable": "a", "restart_interval": 1},
                {"map": "island", "executable": "b", "restart_interval": 1}]"#,
            r#"{"maps": {}}"#,
            "[]",
        );
        assert!(matches!(
            InstanceRegistry::load(dir.path()).unwrap_err(),
            ConfigError::Duplicate(name) if name == "island"
        ));

        write_configs(
            dir.path(),
            r#"[{"map": "island", "executable": "a", "restart_interval": 0}]"#,
            r#"{"maps": {}}"#,
            "[]",
        );
        assert!(matches!(
            InstanceRegistry::load(dir.path()).unwrap_err(),
            ConfigError::Invalid { .. }
        ));

        write_configs(
            dir.path(),
            "[]",
            r#"{"maps": {"island": {"zip_dir": "/b", "extract_dir": "/s",
                "interval_minutes": 0, "retention_days": 7}}}"#,
            "[]",
        );
        assert!(matches!(
            InstanceRegistry::load(dir.path()).unwrap_err(),
            ConfigError::Invalid { .. }
        ));
    }
}
