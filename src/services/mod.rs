pub mod archive;
pub mod markers;
pub mod process_checker;
pub mod process_log;
pub mod rcon;
pub mod scheduler;
pub mod supervisor;

use std::sync::{Mutex, MutexGuard};

pub use markers::StateStore;
pub use process_log::LogDirectory;
pub use rcon::RconClient;
pub use scheduler::{BackupScheduler, ScheduleOutcome};
pub use supervisor::{EnableOutcome, ProcessSupervisor};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
