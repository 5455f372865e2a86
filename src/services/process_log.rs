//! Per-launch log records for supervised processes.

use chrono::{DateTime, Local, NaiveDateTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const NO_LOGS: &str = "No logs found for the specified process.";
pub const EMPTY_LOG: &str = "Log file is empty.";

const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone)]
pub struct LogDirectory {
    dir: PathBuf,
}

impl LogDirectory {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn launch_path(&self, name: &str, at: DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("{}_{}.log", name, at.format(STAMP_FORMAT)))
    }

    /// Opens the log record for a new launch of `name`.
    pub async fn open_launch(&self, name: &str) -> io::Result<LaunchLog> {
        let path = self.launch_path(name, Local::now());
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            let mut file = file;
            while let Some(line) = rx.recv().await {
                let write = async {
                    file.write_all(line.as_bytes()).await?;
                    file.write_all(b"\n").await?;
                    file.flush().await
                };
                if let Err(e) = write.await {
                    log::warn!("failed to write to {}: {}", writer_path.display(), e);
                }
            }
        });

        Ok(LaunchLog { path, tx, writer })
    }

    /// Contents of the most recent log record of `name`.
    pub fn retrieve(&self, name: &str) -> io::Result<String> {
        let Some(path) = self.latest(name)? else {
            return Ok(NO_LOGS.to_string());
        };
        let data = fs::read(&path)?;
        if data.is_empty() {
            return Ok(EMPTY_LOG.to_string());
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    fn latest(&self, name: &str) -> io::Result<Option<PathBuf>> {
        let prefix = format!("{name}_");
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut newest: Option<(NaiveDateTime, PathBuf)> = None;
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(stamp) = file_name
                .to_str()
                .and_then(|f| f.strip_prefix(&prefix))
                .and_then(|f| f.strip_suffix(".log"))
            else {
                continue;
            };
            // "island_two_..." must not match "island".
            let Ok(at) = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT) else {
                continue;
            };
            if newest.as_ref().map_or(true, |(best, _)| at > *best) {
                newest = Some((at, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}

/// Append-only line sink for one launch; lines land in arrival order.
pub struct LaunchLog {
    path: PathBuf,
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
}

impl LaunchLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains `stream` line by line into this log on its own task.
    pub fn capture<R>(&self, stream: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("output stream closed: {}", e);
                        break;
                    }
                }
            }
        })
    }

    pub fn write_line(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into());
    }

    /// Waits for every queued line to reach the file.
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.writer.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn launch_path_names_instance_and_time() {
        let dir = TempDir::new().unwrap();
        let logs = LogDirectory::open(dir.path()).unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 17, 5, 1).unwrap();

        let path = logs.launch_path("island", at);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "island_2024-03-09_17-05-01.log"
        );
    }

    #[test]
    fn retrieve_picks_the_newest_record_of_the_instance() {
        let dir = TempDir::new().unwrap();
        let logs = LogDirectory::open(dir.path()).unwrap();

        assert_eq!(logs.retrieve("island").unwrap(), NO_LOGS);

        fs::write(dir.path().join("island_2024-03-09_10-00-00.log"), "old\n").unwrap();
        fs::write(dir.path().join("island_2024-03-10_09-00-00.log"), "new\n").unwrap();
        fs::write(dir.path().join("island_two_2025-01-01_00-00-00.log"), "other\n").unwrap();
        fs::write(dir.path().join("center_2024-03-11_00-00-00.log"), "").unwrap();

        assert_eq!(logs.retrieve("island").unwrap(), "new\n");
        assert_eq!(logs.retrieve("center").unwrap(), EMPTY_LOG);
    }

    #[tokio::test]
    async fn captured_lines_are_appended() {
        let dir = TempDir::new().unwrap();
        let logs = LogDirectory::open(dir.path()).unwrap();

        let launch = logs.open_launch("island").await.unwrap();
        let reader = launch.capture(&b"first\nsecond\n"[..]);
        reader.await.unwrap();
        launch.write_line("third");
        let path = launch.path().to_path_buf();
        launch.close().await;

        let contents = fs::read_to_string(path).unwrap();
        assert_eq!(contents, "first\nsecond\nthird\n");
    }
}
