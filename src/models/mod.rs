pub mod backup;
pub mod process;
pub mod rcon;

pub use backup::{ArchiveInfo, BackupConfigFile, BackupReport, InstanceBackupConfig, SelectionPolicy};
pub use process::{InstanceProcessConfig, InstanceStatus, RunningProcessEntry};
pub use rcon::RconEndpoint;
