use clap::Parser;
use std::path::PathBuf;

/// Server Manager - supervises game server instances and their backups
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Listen address
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// Directory holding process_config.json, backup_config.json and rcon_config.json
    #[arg(short = 'c', long, env = "CONFIG_DIR", default_value = "./config")]
    pub config_dir: PathBuf,

    /// Directory for PID, enablement and backup markers
    #[arg(short = 'd', long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Directory for per-launch process logs
    #[arg(short = 'l', long, env = "LOGS_DIR", default_value = "./logs")]
    pub logs_dir: PathBuf,

    /// Seconds between liveness checks of adopted processes
    #[arg(long, default_value_t = 5)]
    pub adopt_poll_secs: u64,

    /// I/O timeout for remote console requests, in seconds
    #[arg(long, default_value_t = 10)]
    pub rcon_timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_defaults_to_five_seconds() {
        let args = CommandArgs::parse_from(["server-manager"]);
        assert_eq!(args.config_dir, PathBuf::from("./config"));
        assert_eq!(args.adopt_poll_secs, 5);
        assert_eq!(args.rcon_timeout_secs, 10);
    }

    #[test]
    fn flags_override_defaults() {
        let args = CommandArgs::parse_from([
            "server-manager",
            "--port",
            "9000",
            "--data-dir",
            "/var/lib/servers",
            "--adopt-poll-secs",
            "2",
        ]);
        assert_eq!(args.port, 9000);
        assert_eq!(args.data_dir, PathBuf::from("/var/lib/servers"));
        assert_eq!(args.adopt_poll_secs, 2);
    }
}
