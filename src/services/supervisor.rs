//! Process supervision: one monitor loop per enabled instance.
//!
//! A monitor loop moves through Idle -> Starting -> Running -> Exited and
//! back to Starting for as long as its instance stays enabled. Loops are
//! recorded in a lock-guarded map; an entry is only inserted when absent, so
//! an instance never has two loops. Each loop holds the receiving end of a
//! `watch` channel that `disable` flips, which wakes restart sleeps right
//! away. A running child is never killed on disable; the loop waits for it
//! to leave after the console shutdown.

use chrono::Local;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::SupervisorError;
use crate::models::{InstanceProcessConfig, InstanceStatus, RunningProcessEntry};
use crate::registry::InstanceRegistry;
use crate::services::lock;
use crate::services::markers::StateStore;
use crate::services::process_checker::is_pid_running;
use crate::services::process_log::LogDirectory;
use crate::services::rcon::ShutdownSignal;

const DEFAULT_ADOPT_POLL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Started,
    AlreadyRunning,
    NotFound,
}

struct Inner {
    registry: Arc<InstanceRegistry>,
    store: Arc<StateStore>,
    logs: LogDirectory,
    shutdown: Arc<dyn ShutdownSignal>,
    adopt_poll: Duration,
    /// Enablement signal of every live monitor loop.
    monitors: Mutex<HashMap<String, watch::Sender<bool>>>,
    processes: Mutex<HashMap<String, RunningProcessEntry>>,
    launches: Mutex<HashMap<String, u64>>,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        store: Arc<StateStore>,
        logs: LogDirectory,
        shutdown: Arc<dyn ShutdownSignal>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                logs,
                shutdown,
                adopt_poll: DEFAULT_ADOPT_POLL,
                monitors: Mutex::new(HashMap::new()),
                processes: Mutex::new(HashMap::new()),
                launches: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// How often an adopted process is checked for liveness.
    ///
    /// Must be called before the supervisor is shared.
    pub fn with_adopt_poll(mut self, interval: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.adopt_poll = interval;
        }
        self
    }

    /// Marks `name` enabled and makes sure exactly one monitor loop runs it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enable(&self, name: &str) -> Result<EnableOutcome, SupervisorError> {
        let Some(config) = self.inner.registry.process(name) else {
            return Ok(EnableOutcome::NotFound);
        };

        let mut monitors = lock(&self.inner.monitors);
        self.inner.store.set_enabled(name, true)?;

        if let Some(signal) = monitors.get(name) {
            if *signal.borrow() {
                log::info!("Map '{}' already running", name);
                return Ok(EnableOutcome::AlreadyRunning);
            }
            // The loop is still winding down after a disable; keep it.
            signal.send_replace(true);
            log::info!("Re-enabled monitor of map '{}'", name);
            return Ok(EnableOutcome::Started);
        }

        let (signal, enabled) = watch::channel(true);
        monitors.insert(name.to_string(), signal);
        drop(monitors);

        tokio::spawn(self.clone().monitor(config.clone(), enabled));
        log::info!("Started monitor of map '{}'", name);
        Ok(EnableOutcome::Started)
    }

    /// Marks `name` disabled and asks its process to shut down.
    ///
    /// Local state is only reclaimed once the console acknowledged the
    /// request; on failure everything is left as is and the call can be
    /// repeated.
    pub async fn disable(&self, name: &str) -> Result<(), SupervisorError> {
        if self.inner.registry.process(name).is_none() {
            return Err(SupervisorError::NotFound(name.to_string()));
        }

        {
            let monitors = lock(&self.inner.monitors);
            self.inner.store.set_enabled(name, false)?;
            if let Some(signal) = monitors.get(name) {
                signal.send_replace(false);
            }
        }

        let tracked = lock(&self.inner.processes).get(name).map(|entry| entry.pid);
        let pid = match tracked {
            Some(pid) => pid,
            None => match self.inner.store.live_pid(name)? {
                Some(pid) => pid,
                None => {
                    log::info!("Map '{}' disabled; no process was running", name);
                    return Ok(());
                }
            },
        };

        match self.inner.shutdown.send_shutdown(name).await {
            Ok(reply) => {
                log::info!("Map '{}' (PID {}) acknowledged shutdown: {}", name, pid, reply.trim());
                self.inner.store.remove_pid_if(name, pid)?;
                self.forget_process(name, pid);
                Ok(())
            }
            Err(source) => {
                log::error!("Shutting down map '{}' failed: {}", name, source);
                Err(SupervisorError::Shutdown {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Reattaches to processes that outlived a previous supervisor run.
    ///
    /// Instances whose marker names a live process are re-enabled and
    /// adopted; every other instance is left disabled and its stale marker
    /// dropped. Returns the resumed instance names.
    pub fn resume(&self) -> Result<Vec<String>, SupervisorError> {
        let mut resumed = Vec::new();

        for name in self.inner.registry.process_names() {
            match self.inner.store.live_pid(&name)? {
                Some(pid) => {
                    log::info!("Resuming monitoring of existing process '{}' with PID {}", name, pid);
                    self.enable(&name)?;
                    resumed.push(name);
                }
                None => {
                    if self.inner.store.read_pid(&name).ok().flatten().is_some() {
                        log::info!("PID file for '{}' is stale, removing it", name);
                    }
                    self.inner.store.remove_pid(&name)?;
                    self.inner.store.set_enabled(&name, false)?;
                }
            }
        }

        Ok(resumed)
    }

    pub fn retrieve_logs(&self, name: &str) -> Result<String, SupervisorError> {
        if self.inner.registry.process(name).is_none() {
            return Err(SupervisorError::NotFound(name.to_string()));
        }
        Ok(self.inner.logs.retrieve(name)?)
    }

    pub fn running(&self, name: &str) -> Option<RunningProcessEntry> {
        lock(&self.inner.processes).get(name).cloned()
    }

    pub fn is_monitored(&self, name: &str) -> bool {
        lock(&self.inner.monitors).contains_key(name)
    }

    pub fn monitor_count(&self) -> usize {
        lock(&self.inner.monitors).len()
    }

    pub fn launches(&self, name: &str) -> u64 {
        lock(&self.inner.launches).get(name).copied().unwrap_or(0)
    }

    pub fn status(&self) -> Vec<InstanceStatus> {
        self.inner
            .registry
            .process_names()
            .into_iter()
            .map(|name| {
                let entry = self.running(&name);
                InstanceStatus {
                    enabled: self.inner.store.is_enabled(&name).unwrap_or(false),
                    monitored: self.is_monitored(&name),
                    pid: entry.as_ref().map(|e| e.pid),
                    adopted: entry.as_ref().is_some_and(|e| e.adopted),
                    started_at: entry.as_ref().map(|e| e.started_at),
                    launches: self.launches(&name),
                    name,
                }
            })
            .collect()
    }

    async fn monitor(self, config: InstanceProcessConfig, mut enabled: watch::Receiver<bool>) {
        let name = config.name.clone();

        loop {
            if *enabled.borrow_and_update() {
                match self.inner.store.live_pid(&name) {
                    Ok(Some(pid)) => self.watch_adopted(&name, pid).await,
                    Ok(None) => match self.run_once(&config, &enabled).await {
                        Ok(status) => log::info!("Process '{}' exited: {}", name, status),
                        Err(e) => log::error!("Failed to run process '{}': {}", name, e),
                    },
                    Err(e) => log::error!("Cannot check PID of '{}': {}", name, e),
                }

                if *enabled.borrow() {
                    wait_restart(config.restart_delay(), &mut enabled).await;
                }
            }

            if self.finish_if_disabled(&name, &enabled) {
                break;
            }
        }

        log::info!("Process '{}' is not enabled, monitor stopped", name);
    }

    /// Drops the loop's registration unless the instance was re-enabled.
    fn finish_if_disabled(&self, name: &str, enabled: &watch::Receiver<bool>) -> bool {
        let mut monitors = lock(&self.inner.monitors);
        if *enabled.borrow() {
            return false;
        }
        monitors.remove(name);
        true
    }

    /// One pass through Starting -> Running -> Exited.
    ///
    /// The launch log is only created once the spawn succeeded, so a binary
    /// that never starts does not leave a log file per attempt.
    async fn run_once(
        &self,
        config: &InstanceProcessConfig,
        enabled: &watch::Receiver<bool>,
    ) -> Result<ExitStatus, SupervisorError> {
        let name = config.name.as_str();

        let mut command = Command::new(&config.executable);
        command
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = config.working_dir() {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            name: name.to_string(),
            source,
        })?;
        *lock(&self.inner.launches).entry(name.to_string()).or_insert(0) += 1;

        let launch_log = match self.inner.logs.open_launch(name).await {
            Ok(launch_log) => launch_log,
            Err(e) => {
                log::error!("Failed to open launch log for '{}', killing it: {}", name, e);
                if let Err(kill_err) = child.kill().await {
                    log::warn!("Failed to kill unlogged process '{}': {}", name, kill_err);
                }
                return Err(e.into());
            }
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(launch_log.capture(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(launch_log.capture(stderr));
        }

        let Some(pid) = child.id() else {
            // Already reaped; nothing left to track.
            let status = child.wait().await?;
            launch_log.close().await;
            return Ok(status);
        };

        if let Err(e) = self.inner.store.write_pid(name, pid) {
            log::error!("Failed to save PID for process '{}', killing it: {}", name, e);
            if let Err(kill_err) = child.kill().await {
                log::warn!("Failed to kill untracked process '{}' ({}): {}", name, pid, kill_err);
            }
            launch_log.close().await;
            return Err(e.into());
        }

        // `disable` flips the signal before it looks for a process, so either
        // it sees this entry or this check sees the flipped signal.
        let disabled_while_starting = {
            let mut processes = lock(&self.inner.processes);
            processes.insert(
                name.to_string(),
                RunningProcessEntry {
                    name: name.to_string(),
                    pid,
                    started_at: Local::now(),
                    adopted: false,
                },
            );
            !*enabled.borrow()
        };
        log::info!(
            "Process '{}' started successfully with PID {}, logging to {}",
            name,
            pid,
            launch_log.path().display()
        );
        if disabled_while_starting {
            self.shutdown_late_start(name, pid).await;
        }

        let waited = child.wait().await;

        if let Err(e) = self.inner.store.remove_pid_if(name, pid) {
            log::warn!("Failed to remove PID file for process '{}': {}", name, e);
        }
        self.forget_process(name, pid);

        for reader in readers {
            let _ = reader.await;
        }
        launch_log.close().await;

        Ok(waited?)
    }

    /// Asks a process that came up after its instance was disabled to leave.
    ///
    /// On failure the process stays tracked, so a repeated `disable` finds it.
    async fn shutdown_late_start(&self, name: &str, pid: u32) {
        log::info!("Map '{}' was disabled while PID {} was starting, requesting shutdown", name, pid);
        match self.inner.shutdown.send_shutdown(name).await {
            Ok(reply) => log::info!("Map '{}' (PID {}) acknowledged shutdown: {}", name, pid, reply.trim()),
            Err(e) => log::warn!("Shutdown of late-started map '{}' (PID {}) failed: {}", name, pid, e),
        }
    }

    /// Watches a process started by an earlier supervisor until it exits.
    async fn watch_adopted(&self, name: &str, pid: u32) {
        let marked_at = self.inner.store.pid_marked_at(name);
        lock(&self.inner.processes).insert(
            name.to_string(),
            RunningProcessEntry {
                name: name.to_string(),
                pid,
                started_at: Local::now(),
                adopted: true,
            },
        );
        log::info!("Adopted process '{}' with PID {}", name, pid);

        while is_pid_running(pid, marked_at) {
            tokio::time::sleep(self.inner.adopt_poll).await;
        }

        log::info!("Adopted process '{}' (PID {}) exited", name, pid);
        if let Err(e) = self.inner.store.remove_pid_if(name, pid) {
            log::warn!("Failed to remove PID file for process '{}': {}", name, e);
        }
        self.forget_process(name, pid);
    }

    fn forget_process(&self, name: &str, pid: u32) {
        let mut processes = lock(&self.inner.processes);
        if processes.get(name).is_some_and(|entry| entry.pid == pid) {
            processes.remove(name);
        }
    }
}

/// Sleeps for `delay`, returning early once the instance is disabled.
async fn wait_restart(delay: Duration, enabled: &mut watch::Receiver<bool>) {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return,
            changed = enabled.changed() => {
                if changed.is_err() || !*enabled.borrow() {
                    return;
                }
            }
        }
    }
}
