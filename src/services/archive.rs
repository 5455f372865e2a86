//! One backup cycle: select, archive, stamp, prune.
//!
//! Everything here is blocking file I/O; callers run it on the blocking pool.

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::BackupError;
use crate::models::{ArchiveInfo, BackupReport, InstanceBackupConfig, SelectionPolicy};
use crate::services::markers::StateStore;

const ARCHIVE_STAMP: &str = "%Y%m%d_%H%M%S";
const PARTIAL_SUFFIX: &str = ".partial";

/// `<name>_<YYYYmmdd_HHMMSS>_<millis>.zip`, with `-<serial>` before the
/// extension when an archive of the same millisecond already exists.
pub fn archive_name(name: &str, at: DateTime<Local>, serial: u32) -> String {
    let stamp = at.format(ARCHIVE_STAMP);
    let millis = at.timestamp_subsec_millis().min(999);
    match serial {
        0 => format!("{name}_{stamp}_{millis:03}.zip"),
        serial => format!("{name}_{stamp}_{millis:03}-{serial}.zip"),
    }
}

/// Creation order key of `file_name` if it is an archive written for `name`.
fn archive_key(name: &str, file_name: &str) -> Option<(NaiveDateTime, u32)> {
    let stamp = file_name
        .strip_prefix(name)?
        .strip_prefix('_')?
        .strip_suffix(".zip")?;
    let (stamp, serial) = match stamp.split_once('-') {
        Some((stamp, serial)) => (stamp, serial.parse().ok()?),
        None => (stamp, 0),
    };

    // Second-precision names predate the millisecond part.
    if let Ok(at) = NaiveDateTime::parse_from_str(stamp, ARCHIVE_STAMP) {
        return Some((at, serial));
    }
    let (seconds, millis) = stamp.rsplit_once('_')?;
    if millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let at = NaiveDateTime::parse_from_str(seconds, ARCHIVE_STAMP).ok()?;
    Some((at + TimeDelta::milliseconds(millis.parse().ok()?), serial))
}

fn is_archive_of(name: &str, file_name: &str) -> bool {
    archive_key(name, file_name).is_some()
}

/// First archive path of this cycle that does not exist yet.
fn unused_archive_path(config: &InstanceBackupConfig, now: DateTime<Local>) -> PathBuf {
    let mut serial = 0;
    loop {
        let candidate = config.zip_dir.join(archive_name(&config.name, now, serial));
        if !candidate.exists() {
            return candidate;
        }
        serial += 1;
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn zip_error(path: &Path) -> impl FnOnce(zip::result::ZipError) -> BackupError + '_ {
    move |source| BackupError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

/// Runs a full cycle for `config` stamped with `now`.
///
/// Any selection or archive failure aborts the cycle before the last-backup
/// marker moves, so the next cycle picks the same files up again. Retention
/// runs last and never fails the cycle.
pub fn run_cycle(
    config: &InstanceBackupConfig,
    store: &StateStore,
    now: DateTime<Local>,
) -> Result<BackupReport, BackupError> {
    let since = match config.selection {
        SelectionPolicy::Extensions => None,
        SelectionPolicy::ModifiedSince => store.last_backup(&config.name)?.map(SystemTime::from),
    };

    let files = select_files(config, since)?;

    fs::create_dir_all(&config.zip_dir).map_err(io_error(&config.zip_dir))?;
    let archive = unused_archive_path(config, now);
    write_archive(&config.extract_dir, &files, &archive)?;

    let stamp = now.fixed_offset();
    store.write_last_backup(&config.name, &stamp)?;

    let pruned = sweep_expired(config, SystemTime::from(now));

    log::info!(
        "Backup of '{}' written to {} ({} files, {} expired archives removed)",
        config.name,
        archive.display(),
        files.len(),
        pruned
    );

    Ok(BackupReport {
        archive,
        timestamp: stamp.to_rfc3339(),
        files: files.len(),
        pruned,
    })
}

/// Paths, relative to the source root, that this cycle archives.
pub fn select_files(
    config: &InstanceBackupConfig,
    modified_after: Option<SystemTime>,
) -> Result<BTreeSet<PathBuf>, BackupError> {
    let root = &config.extract_dir;
    let take_everything = config.selection == SelectionPolicy::ModifiedSince && !config.has_filters();
    let mut selected = BTreeSet::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        // Archives may live inside the source tree.
        .filter_entry(|entry| entry.path() != config.zip_dir);

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            BackupError::Io {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        let wanted = take_everything
            || config.matches_extension(relative)
            || config.specific_files.contains(&entry_name(relative));
        if wanted {
            selected.insert(relative.to_path_buf());
        }
    }

    for specific in &config.specific_files {
        let relative = PathBuf::from(specific);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            log::warn!("Skipping '{}' for '{}': not a plain relative path", specific, config.name);
            continue;
        }
        if root.join(&relative).is_file() {
            selected.insert(relative);
        }
    }

    let Some(threshold) = modified_after else {
        return Ok(selected);
    };

    let mut changed = BTreeSet::new();
    for relative in selected {
        let path = root.join(&relative);
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(io_error(&path))?;
        if modified > threshold {
            changed.insert(relative);
        }
    }
    Ok(changed)
}

/// Archive entry name for a relative path, always `/` separated.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Writes `files` into a new zip at `dest`, atomically.
pub fn write_archive(root: &Path, files: &BTreeSet<PathBuf>, dest: &Path) -> Result<(), BackupError> {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let result = write_zip(root, files, &partial).and_then(|()| {
        if dest.exists() {
            return Err(io_error(dest)(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "archive already exists",
            )));
        }
        fs::rename(&partial, dest).map_err(io_error(dest))
    });
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_zip(root: &Path, files: &BTreeSet<PathBuf>, dest: &Path) -> Result<(), BackupError> {
    let out = File::create(dest).map_err(io_error(dest))?;
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for relative in files {
        let path = root.join(relative);
        let mut input = File::open(&path).map_err(io_error(&path))?;
        let size = input.metadata().map_err(io_error(&path))?.len();

        zip.start_file(entry_name(relative), options.large_file(size >= u32::MAX as u64))
            .map_err(zip_error(dest))?;
        io::copy(&mut input, &mut zip).map_err(io_error(&path))?;
    }

    zip.finish().map_err(zip_error(dest))?;
    Ok(())
}

/// Deletes this instance's archives older than the retention window.
///
/// An archive exactly at the boundary is kept. Returns the number removed;
/// failures are logged and skipped.
pub fn sweep_expired(config: &InstanceBackupConfig, now: SystemTime) -> usize {
    let retention = config.retention();
    let entries = match fs::read_dir(&config.zip_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot list {} for retention: {}", config.zip_dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !is_archive_of(&config.name, file_name) {
            continue;
        }

        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                log::warn!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age <= retention {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed old backup file: {}", path.display());
                removed += 1;
            }
            Err(e) => log::warn!("Failed to remove old backup {}: {}", path.display(), e),
        }
    }
    removed
}

/// Archives of this instance, newest first.
pub fn list_archives(config: &InstanceBackupConfig) -> Result<Vec<ArchiveInfo>, BackupError> {
    let entries = match fs::read_dir(&config.zip_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(&config.zip_dir)(e)),
    };

    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_error(&config.zip_dir))?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(key) = archive_key(&config.name, &file_name) else {
            continue;
        };
        let metadata = entry.metadata().map_err(io_error(&entry.path()))?;
        let info = ArchiveInfo {
            file_name,
            size: metadata.len(),
            modified: metadata
                .modified()
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| Local::now()),
        };
        archives.push((key, info));
    }

    archives.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(archives.into_iter().map(|(_, info)| info).collect())
}

/// Extracts `entry` of `archive` back into the instance's source directory.
pub fn restore_entry(
    config: &InstanceBackupConfig,
    archive: &str,
    entry: &str,
) -> Result<PathBuf, BackupError> {
    if !is_archive_of(&config.name, archive) {
        return Err(BackupError::UnsafeEntry(archive.to_string()));
    }
    let archive_path = config.zip_dir.join(archive);
    let file = File::open(&archive_path).map_err(io_error(&archive_path))?;
    let mut zip = ZipArchive::new(file).map_err(zip_error(&archive_path))?;
    let mut member = zip.by_name(entry).map_err(zip_error(&archive_path))?;

    let relative = member
        .enclosed_name()
        .ok_or_else(|| BackupError::UnsafeEntry(entry.to_string()))?;
    let target = config.extract_dir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let mut staged = target.as_os_str().to_owned();
    staged.push(PARTIAL_SUFFIX);
    let staged = PathBuf::from(staged);
    let copied = File::create(&staged)
        .and_then(|mut out| io::copy(&mut member, &mut out))
        .map_err(io_error(&staged));
    if let Err(e) = copied {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }
    fs::rename(&staged, &target).map_err(io_error(&target))?;

    log::info!("Restored {} from {} into {}", entry, archive, target.display());
    Ok(target)
}
