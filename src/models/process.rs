use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Static launch configuration of one instance ("map").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceProcessConfig {
    /// Instance name (unique identifier)
    #[serde(rename = "map")]
    pub name: String,
    /// Path of the server executable
    pub executable: PathBuf,
    /// Command line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; defaults to the executable's directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Seconds to wait before restarting after an exit or a failed spawn
    pub restart_interval: u64,
}

impl InstanceProcessConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_interval)
    }

    pub fn working_dir(&self) -> Option<&Path> {
        match &self.dir {
            Some(dir) => Some(dir.as_path()),
            None => self
                .executable
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty()),
        }
    }
}

/// A process the supervisor believes to be alive.
#[derive(Debug, Clone, Serialize)]
pub struct RunningProcessEntry {
    /// Instance name
    pub name: String,
    /// OS process id
    pub pid: u32,
    /// When the process was spawned or adopted
    pub started_at: DateTime<Local>,
    /// Adopted from a previous supervisor run rather than spawned by this one
    pub adopted: bool,
}

/// Point-in-time view of one instance for listings.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub name: String,
    /// Durable enablement flag
    pub enabled: bool,
    /// A monitor loop is currently recorded for the instance
    pub monitored: bool,
    pub pid: Option<u32>,
    pub adopted: bool,
    pub started_at: Option<DateTime<Local>>,
    /// Processes spawned by this supervisor run
    pub launches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_dir_defaults_to_executable_parent() {
        let config: InstanceProcessConfig = serde_json::from_str(
            r#"{"map": "island", "executable": "/srv/ark/ShooterGameServer", "restart_interval": 30}"#,
        )
        .unwrap();

        assert_eq!(config.name, "island");
        assert!(config.args.is_empty());
        assert_eq!(config.working_dir(), Some(Path::new("/srv/ark")));
        assert_eq!(config.restart_delay(), Duration::from_secs(30));
    }

    #[test]
    fn explicit_dir_wins_and_bare_names_have_none() {
        let mut config: InstanceProcessConfig = serde_json::from_str(
            r#"{"map": "center", "executable": "server", "args": ["-log"], "restart_interval": 5}"#,
        )
        .unwrap();
        assert_eq!(config.working_dir(), None);

        config.dir = Some(PathBuf::from("/tmp/center"));
        assert_eq!(config.working_dir(), Some(Path::new("/tmp/center")));
    }
}
