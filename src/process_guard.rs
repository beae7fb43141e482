//! Process lifecycle management for child processes and schroot sessions
//!
//! `apt-get` runs inside a schroot session can take an hour. If the user
//! interrupts the scanner, neither the child process tree nor the session
//! may outlive us: a leaked session keeps its overlay mounted until somebody
//! runs `schroot -e` by hand.
//!
//! - Children are spawned in their own process group with a parent-death
//!   signal (`CommandProcessGroup`)
//! - Running child PIDs and open session ids live in a global registry
//! - On SIGINT/SIGTERM/SIGHUP all process groups get SIGTERM, then SIGKILL
//!   after a grace period, and every open session is ended

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeSet, HashSet};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry tracking spawned child processes and open schroot sessions
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    sessions: BTreeSet<String>,
    /// Set once cleanup ran, so the signal thread and callers don't race
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered child process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered child process PID {}", pid);
    }

    /// Remember an open schroot session so it can be ended on a signal
    pub fn register_session(&mut self, session: &str) {
        self.sessions.insert(session.to_string());
        tracing::debug!("Registered schroot session {}", session);
    }

    pub fn unregister_session(&mut self, session: &str) {
        self.sessions.remove(session);
        tracing::debug!("Unregistered schroot session {}", session);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Terminate all tracked child process groups and end open sessions.
    ///
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL.
    /// Sessions are ended afterwards because `schroot -e` refuses to unmount
    /// while processes still run inside the chroot.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        if !pids.is_empty() {
            tracing::info!("Terminating {} child process(es)...", pids.len());
            for &pid in &pids {
                if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                    tracing::warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
                    if let Err(e2) = send_signal(pid, Signal::SIGTERM) {
                        tracing::warn!("Failed to send SIGTERM to PID {}: {}", pid, e2);
                    }
                }
            }

            let start = Instant::now();
            while start.elapsed() < grace_period
                && pids.iter().any(|&pid| is_process_alive(pid))
            {
                std::thread::sleep(Duration::from_millis(100));
            }

            for &pid in &pids {
                if is_process_alive(pid) {
                    tracing::warn!("Process group {} did not terminate, sending SIGKILL", pid);
                    if send_signal_to_group(pid, Signal::SIGKILL).is_err() {
                        let _ = send_signal(pid, Signal::SIGKILL);
                    }
                }
            }
            self.pids.clear();
        }

        for session in std::mem::take(&mut self.sessions) {
            tracing::info!("Ending schroot session {}", session);
            let ended = Command::new("schroot")
                .args(["-c", &session, "-e"])
                .stdin(Stdio::null())
                .status();
            match ended {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    tracing::error!("Ending schroot session {} failed: {}", session, status)
                }
                Err(e) => tracing::error!("Failed to run schroot -e for {}: {}", session, e),
            }
        }
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Send a signal to an entire process group.
///
/// The negative PID reaches every process in the group, so `apt-get`,
/// `dpkg` and maintainer scripts started below `schroot` get it too.
pub(crate) fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Check if a process is still alive (not dead or zombie)
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/pid/stat is the state; zombies count as dead
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// Initialize global signal handlers for graceful shutdown.
///
/// Handles SIGINT (Ctrl+C), SIGTERM and SIGHUP. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            tracing::info!("Received {} signal, cleaning up...", signal_name);

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to set up process groups
pub trait CommandProcessGroup {
    /// Run the command in its own process group and let it die with us
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls (setpgid, prctl) run between
        // fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);

        registry.unregister(5678);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_registry_tracks_sessions() {
        let mut registry = ChildRegistry::default();

        registry.register_session("noble-locale-1f2e");
        registry.register_session("noble-locale-1f2e");
        assert_eq!(registry.session_count(), 1);

        registry.unregister_session("noble-locale-1f2e");
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_terminate_all_kills_process_group() {
        let child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        registry.terminate_all(Duration::from_millis(500));

        let mut child = child;
        let status = child.wait().expect("wait for child");
        assert!(!status.success());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_cleanup_initiated_flag_prevents_double_cleanup() {
        let mut registry = ChildRegistry::default();
        registry.register(999_999);

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);

        registry.register(999_998);
        registry.terminate_all(Duration::from_millis(10));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999_999));
    }
}
