use crate::registry::InstanceRegistry;
use crate::services::{BackupScheduler, LogDirectory, ProcessSupervisor, RconClient, StateStore};
use std::sync::Arc;
use std::time::Duration;

pub struct AppStateInner {
    pub supervisor: ProcessSupervisor,
    pub backups: BackupScheduler,
    pub rcon: Arc<RconClient>,
}

/// The services synchronize internally, so the shared state needs no outer lock.
pub type AppState = Arc<AppStateInner>;

pub fn new_state(
    registry: Arc<InstanceRegistry>,
    store: Arc<StateStore>,
    logs: LogDirectory,
    adopt_poll: Duration,
    rcon_timeout: Duration,
) -> AppState {
    let rcon = Arc::new(RconClient::new(registry.clone()).with_timeout(rcon_timeout));
    let supervisor = ProcessSupervisor::new(registry.clone(), store.clone(), logs, rcon.clone())
        .with_adopt_poll(adopt_poll);
    let backups = BackupScheduler::new(registry, store);

    Arc::new(AppStateInner {
        supervisor,
        backups,
        rcon,
    })
}
