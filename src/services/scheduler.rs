//! Periodic backup loops, one per scheduled instance.

use chrono::{DateTime, FixedOffset, Local};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::BackupError;
use crate::models::{ArchiveInfo, BackupReport, InstanceBackupConfig};
use crate::registry::InstanceRegistry;
use crate::services::archive;
use crate::services::lock;
use crate::services::markers::StateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Started,
    AlreadyScheduled,
}

struct Inner {
    registry: Arc<InstanceRegistry>,
    store: Arc<StateStore>,
    schedules: Mutex<HashMap<String, CancellationToken>>,
    /// Serializes cycles and restores of one instance.
    cycle_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

#[derive(Clone)]
pub struct BackupScheduler {
    inner: Arc<Inner>,
}

impl BackupScheduler {
    pub fn new(registry: Arc<InstanceRegistry>, store: Arc<StateStore>) -> Self {
        let cycle_locks = registry
            .backup_names()
            .into_iter()
            .map(|name| (name, Arc::default()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                schedules: Mutex::new(HashMap::new()),
                cycle_locks,
            }),
        }
    }

    /// Persists the schedule flag and starts the backup loop of `name`.
    ///
    /// The loop runs one cycle right away and then one per interval. Must be
    /// called from within a tokio runtime.
    pub fn start_schedule(&self, name: &str) -> Result<ScheduleOutcome, BackupError> {
        let config = self.config(name)?;

        let mut schedules = lock(&self.inner.schedules);
        self.inner.store.set_scheduled(name, true)?;
        if schedules.contains_key(name) {
            log::info!("Backup schedule for '{}' already running", name);
            return Ok(ScheduleOutcome::AlreadyScheduled);
        }

        let token = CancellationToken::new();
        schedules.insert(name.to_string(), token.clone());
        drop(schedules);

        tokio::spawn(self.clone().run_schedule(config.clone(), token));
        log::info!(
            "Backup schedule started for '{}' every {} minutes",
            name,
            config.interval_minutes
        );
        Ok(ScheduleOutcome::Started)
    }

    /// Cancels the backup loop of `name` and clears its schedule flag.
    ///
    /// A cycle already in progress is allowed to finish. If the flag cannot
    /// be persisted the loop keeps running, so memory and disk agree.
    pub fn stop_schedule(&self, name: &str) -> Result<(), BackupError> {
        let mut schedules = lock(&self.inner.schedules);
        if !schedules.contains_key(name) {
            return Err(BackupError::NotScheduled(name.to_string()));
        }
        self.inner.store.set_scheduled(name, false)?;
        if let Some(token) = schedules.remove(name) {
            token.cancel();
        }
        log::info!("Backup schedule stopped for '{}'", name);
        Ok(())
    }

    /// Starts a loop for every instance whose schedule flag is set.
    ///
    /// Returns the names that are scheduled afterwards.
    pub fn start_or_resume_backups(&self) -> Result<Vec<String>, BackupError> {
        let mut resumed = Vec::new();
        for name in self.inner.registry.backup_names() {
            if !self.inner.store.is_scheduled(&name)? {
                continue;
            }
            log::info!("Resuming backup schedule for '{}'", name);
            self.start_schedule(&name)?;
            resumed.push(name);
        }
        Ok(resumed)
    }

    /// Runs one cycle outside the schedule.
    pub async fn backup_now(&self, name: &str) -> Result<BackupReport, BackupError> {
        let config = self.config(name)?.clone();
        let store = self.inner.store.clone();
        self.with_cycle_lock(name, move || archive::run_cycle(&config, &store, Local::now()))
            .await
    }

    pub async fn list_archives(&self, name: &str) -> Result<Vec<ArchiveInfo>, BackupError> {
        let config = self.config(name)?.clone();
        tokio::task::spawn_blocking(move || archive::list_archives(&config))
            .await
            .map_err(|e| BackupError::Task(e.to_string()))?
    }

    /// Puts `entry` of archive `file_name` back into the source directory of `name`.
    pub async fn restore(&self, name: &str, file_name: &str, entry: &str) -> Result<PathBuf, BackupError> {
        let config = self.config(name)?.clone();
        let (file_name, entry) = (file_name.to_string(), entry.to_string());
        self.with_cycle_lock(name, move || archive::restore_entry(&config, &file_name, &entry))
            .await
    }

    pub fn last_backup(&self, name: &str) -> Result<Option<DateTime<FixedOffset>>, BackupError> {
        self.config(name)?;
        Ok(self.inner.store.last_backup(name)?)
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        lock(&self.inner.schedules).contains_key(name)
    }

    pub fn scheduled_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.inner.schedules).keys().cloned().collect();
        names.sort();
        names
    }

    fn config(&self, name: &str) -> Result<&InstanceBackupConfig, BackupError> {
        self.inner
            .registry
            .backup(name)
            .ok_or_else(|| BackupError::NotConfigured(name.to_string()))
    }

    async fn with_cycle_lock<T, F>(&self, name: &str, work: F) -> Result<T, BackupError>
    where
        F: FnOnce() -> Result<T, BackupError> + Send + 'static,
        T: Send + 'static,
    {
        let cycle_lock = self
            .inner
            .cycle_locks
            .get(name)
            .cloned()
            .ok_or_else(|| BackupError::NotConfigured(name.to_string()))?;
        let _guard = cycle_lock.lock().await;

        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| BackupError::Task(e.to_string()))?
    }

    async fn run_schedule(self, config: InstanceBackupConfig, token: CancellationToken) {
        let name = config.name.clone();
        let period = config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !token.is_cancelled() {
            self.scheduled_cycle(&name).await;
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.scheduled_cycle(&name).await,
            }
        }

        log::info!("Backup loop for '{}' stopped", name);
    }

    async fn scheduled_cycle(&self, name: &str) {
        if let Err(e) = self.backup_now(name).await {
            log::error!("Backup of '{}' failed: {}", name, e);
        }
    }
}
