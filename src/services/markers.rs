//! Durable per-instance markers.
//!
//! Every marker is a tiny plain-text file under the data directory:
//!
//! | file                 | content                  |
//! |----------------------|--------------------------|
//! | `<name>.pid`         | decimal PID              |
//! | `<name>.enabled`     | `true` / `false`         |
//! | `<name>.save`        | `true` / `false`         |
//! | `<name>_saved.txt`   | RFC 3339 timestamp       |
//!
//! Writes go through a temp file and a rename, serialized per marker file.

use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::error::StateError;
use crate::services::lock as acquire;
use crate::services::process_checker::is_pid_running;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Pid,
    Enabled,
    Schedule,
    LastBackup,
}

impl MarkerKind {
    fn file_name(self, name: &str) -> String {
        match self {
            MarkerKind::Pid => format!("{name}.pid"),
            MarkerKind::Enabled => format!("{name}.enabled"),
            MarkerKind::Schedule => format!("{name}.save"),
            MarkerKind::LastBackup => format!("{name}_saved.txt"),
        }
    }
}

pub struct StateStore {
    dir: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl StateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pid_path(&self, name: &str) -> PathBuf {
        self.path(MarkerKind::Pid, name)
    }

    // --- PID marker ---

    pub fn write_pid(&self, name: &str, pid: u32) -> Result<(), StateError> {
        self.write(MarkerKind::Pid, name, &pid.to_string())?;
        log::debug!("PID {} saved for '{}'", pid, name);
        Ok(())
    }

    pub fn read_pid(&self, name: &str) -> Result<Option<u32>, StateError> {
        let path = self.path(MarkerKind::Pid, name);
        let Some(raw) = self.read(MarkerKind::Pid, name)? else {
            return Ok(None);
        };
        raw.parse::<u32>()
            .map(Some)
            .map_err(|_| StateError::Corrupt { path, value: raw })
    }

    pub fn remove_pid(&self, name: &str) -> Result<(), StateError> {
        self.remove(MarkerKind::Pid, name)
    }

    /// Removes the PID marker only while it still names `pid`.
    pub fn remove_pid_if(&self, name: &str, pid: u32) -> Result<bool, StateError> {
        let path = self.pid_path(name);
        let lock = self.lock_for(&path);
        let _guard = acquire(&lock);

        match read_trimmed(&path)? {
            Some(raw) if raw.parse::<u32>().ok() == Some(pid) => {
                remove_file(&path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// The PID from the marker if that process is still the one recorded.
    ///
    /// A corrupt marker reads as "not running".
    pub fn live_pid(&self, name: &str) -> Result<Option<u32>, StateError> {
        let pid = match self.read_pid(name) {
            Ok(Some(pid)) => pid,
            Ok(None) => return Ok(None),
            Err(StateError::Corrupt { path, value }) => {
                log::warn!("ignoring corrupt PID marker {} ('{}')", path.display(), value);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(is_pid_running(pid, self.pid_marked_at(name)).then_some(pid))
    }

    /// When the PID marker was last written.
    pub fn pid_marked_at(&self, name: &str) -> Option<SystemTime> {
        fs::metadata(self.pid_path(name))
            .and_then(|m| m.modified())
            .ok()
    }

    // --- enablement flags ---

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), StateError> {
        self.write(MarkerKind::Enabled, name, bool_text(enabled))
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool, StateError> {
        self.read_flag(MarkerKind::Enabled, name)
    }

    pub fn set_scheduled(&self, name: &str, scheduled: bool) -> Result<(), StateError> {
        self.write(MarkerKind::Schedule, name, bool_text(scheduled))
    }

    pub fn is_scheduled(&self, name: &str) -> Result<bool, StateError> {
        self.read_flag(MarkerKind::Schedule, name)
    }

    // --- last backup ---

    pub fn write_last_backup(&self, name: &str, at: &DateTime<FixedOffset>) -> Result<(), StateError> {
        self.write(MarkerKind::LastBackup, name, &at.to_rfc3339())
    }

    pub fn last_backup(&self, name: &str) -> Result<Option<DateTime<FixedOffset>>, StateError> {
        let path = self.path(MarkerKind::LastBackup, name);
        let Some(raw) = self.read(MarkerKind::LastBackup, name)? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(Some)
            .map_err(|_| StateError::Corrupt { path, value: raw })
    }

    // --- plumbing ---

    fn path(&self, kind: MarkerKind, name: &str) -> PathBuf {
        self.dir.join(kind.file_name(name))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = acquire(&self.locks);
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    fn write(&self, kind: MarkerKind, name: &str, value: &str) -> Result<(), StateError> {
        let path = self.path(kind, name);
        let lock = self.lock_for(&path);
        let _guard = acquire(&lock);

        let tmp = self.dir.join(format!("{}.tmp", kind.file_name(name)));
        let io_err = |source| StateError::Io {
            path: path.clone(),
            source,
        };
        fs::write(&tmp, value).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)
    }

    fn read(&self, kind: MarkerKind, name: &str) -> Result<Option<String>, StateError> {
        let path = self.path(kind, name);
        let lock = self.lock_for(&path);
        let _guard = acquire(&lock);
        read_trimmed(&path)
    }

    fn remove(&self, kind: MarkerKind, name: &str) -> Result<(), StateError> {
        let path = self.path(kind, name);
        let lock = self.lock_for(&path);
        let _guard = acquire(&lock);
        remove_file(&path)
    }

    fn read_flag(&self, kind: MarkerKind, name: &str) -> Result<bool, StateError> {
        let path = self.path(kind, name);
        match self.read(kind, name)?.as_deref() {
            None | Some("false") => Ok(false),
            Some("true") => Ok(true),
            Some(other) => Err(StateError::Corrupt {
                path,
                value: other.to_string(),
            }),
        }
    }
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn read_trimmed(path: &Path) -> Result<Option<String>, StateError> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(Some(data.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StateError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn remove_file(path: &Path) -> Result<(), StateError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StateError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
