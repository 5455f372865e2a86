use std::time::{SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Start times are reported with one-second granularity and may drift from
/// the file clock by a tick, so a marker is allowed this much lag.
const START_TIME_SLACK_SECS: u64 = 2;

/// A PID counts as running only when a live, non-zombie process holds it
/// and, when `marked_at` is known, that process started no later than the
/// moment the marker was written. A PID recycled by the OS after the marker
/// was written therefore reads as not running.
pub fn is_pid_running(pid: u32, marked_at: Option<SystemTime>) -> bool {
    let mut sys = System::new();
    let target = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

    let Some(process) = sys.process(target) else {
        return false;
    };

    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        log::debug!("PID {} is a zombie", pid);
        return false;
    }

    match marked_at {
        Some(marked_at) => {
            let started = process.start_time();
            let marked = unix_secs(marked_at);
            if started > marked + START_TIME_SLACK_SECS {
                log::debug!(
                    "PID {} started at {} after its marker ({}); treating as recycled",
                    pid,
                    started,
                    marked
                );
                return false;
            }
            true
        }
        None => true,
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;
    use std::time::Duration;

    #[test]
    fn current_process_is_running() {
        assert!(is_pid_running(process::id(), None));
        assert!(is_pid_running(process::id(), Some(SystemTime::now())));
    }

    #[test]
    fn marker_older_than_process_means_recycled() {
        let long_ago = SystemTime::now() - Duration::from_secs(365 * 24 * 3600 * 40);
        assert!(!is_pid_running(process::id(), Some(long_ago)));
    }

    #[test]
    fn unused_pid_is_not_running() {
        // Above the Linux pid_max ceiling of 2^22.
        assert!(!is_pid_running(4_194_305 + 17, None));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_not_running() {
        let mut child = process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert!(!is_pid_running(pid, Some(SystemTime::now())));
    }
}
