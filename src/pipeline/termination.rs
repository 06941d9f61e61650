//! Termination escalation for worker processes.
//!
//! ```text
//! Running ──SIGTERM──▶ GracePeriod ──grace elapsed──▶ Killed
//!    │                      │                           │
//!  exited                 exited                 SIGKILL, reap
//! ```
//!
//! Signals go to the worker's whole process group, so a conversion tool the
//! worker spawned goes down with it. The group is only ever signalled while
//! its leader is unreaped: an exited leader is observed with `WNOWAIT`, its
//! group swept, and only then reaped, so the group id cannot have been
//! handed to another process. The final state in the report is the
//! one the child was in when it was observed to exit (or `Killed` if it
//! could not even be reaped).

use std::io;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tracing::{debug, error, warn};

/// How often an exiting leader is polled for.
const EXIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    /// Exited without being signalled.
    Running,
    /// Exited after the graceful request.
    GracePeriod,
    /// Forcibly killed.
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationReport {
    pub state: TerminationState,
    /// `None` if the child could not be reaped within the kill wait.
    pub exit_status: Option<ExitStatus>,
    pub elapsed: Duration,
}

impl TerminationReport {
    pub fn reaped(&self) -> bool {
        self.exit_status.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Escalation {
    pub grace_period: Duration,
    pub kill_wait: Duration,
}

impl Escalation {
    pub fn new(grace_period: Duration, kill_wait: Duration) -> Self {
        Self {
            grace_period,
            kill_wait,
        }
    }

    /// Reap a child that is expected to exit on its own, escalating if it
    /// is still around after the grace period.
    ///
    /// `pgid` is the child's pid, which is also its process group id.
    pub async fn reap(&self, child: &mut Child, pgid: Option<u32>) -> TerminationReport {
        let started = Instant::now();
        match wait_exit(child, pgid, self.grace_period).await {
            Some(status) => TerminationReport {
                state: TerminationState::Running,
                exit_status: Some(status),
                elapsed: started.elapsed(),
            },
            None => {
                warn!(
                    "Worker still running {:?} after it answered; terminating",
                    self.grace_period
                );
                self.terminate(child, pgid).await
            }
        }
    }

    /// Stop a child now: graceful request, grace period, then kill.
    pub async fn terminate(&self, child: &mut Child, pgid: Option<u32>) -> TerminationReport {
        let started = Instant::now();
        let report = |state, exit_status| TerminationReport {
            state,
            exit_status,
            elapsed: started.elapsed(),
        };

        if let Some(status) = wait_exit(child, pgid, Duration::ZERO).await {
            return report(TerminationState::Running, Some(status));
        }

        if request_shutdown(pgid) {
            debug!("Sent SIGTERM to worker group {:?}", pgid);
            if let Some(status) = wait_exit(child, pgid, self.grace_period).await {
                return report(TerminationState::GracePeriod, Some(status));
            }
            warn!(
                "Worker did not exit within {:?} of SIGTERM; killing",
                self.grace_period
            );
        }

        force_kill(pgid);
        if let Err(e) = child.start_kill() {
            // Already exited between the checks.
            debug!("start_kill: {}", e);
        }
        match tokio::time::timeout(self.kill_wait, child.wait()).await {
            Ok(Ok(status)) => report(TerminationState::Killed, Some(status)),
            Ok(Err(e)) => {
                error!("Failed to reap killed worker: {}", e);
                report(TerminationState::Killed, None)
            }
            Err(_) => {
                error!("Killed worker not reaped within {:?}", self.kill_wait);
                report(TerminationState::Killed, None)
            }
        }
    }
}

/// Wait up to `limit` for the group leader to exit, sweep its group while it
/// is still a zombie, then reap it. `None` if it is still running.
async fn wait_exit(child: &mut Child, pgid: Option<u32>, limit: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + limit;
    loop {
        match leader_exited(pgid) {
            Ok(true) => {
                sweep_group(pgid);
                return match child.wait().await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!("Waiting for worker failed: {}", e);
                        None
                    }
                };
            }
            Ok(false) => {}
            Err(e) => {
                debug!("Cannot observe worker exit without reaping ({}); not sweeping", e);
                let remaining = deadline.saturating_duration_since(Instant::now());
                return tokio::time::timeout(remaining, child.wait())
                    .await
                    .ok()
                    .and_then(Result::ok);
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        tokio::time::sleep(remaining.min(EXIT_POLL)).await;
    }
}

/// Whether the leader has exited, leaving it waitable.
#[cfg(unix)]
fn leader_exited(pgid: Option<u32>) -> io::Result<bool> {
    let pid = pgid
        .and_then(|p| libc::id_t::try_from(p).ok())
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
    // SAFETY: an all-zero siginfo_t is a valid value and waitid(2) only
    // writes through the pointer. WNOWAIT leaves the child unreaped.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            pid,
            &mut info,
            libc::WEXITED | libc::WNOWAIT | libc::WNOHANG,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(info.si_signo == libc::SIGCHLD)
}

#[cfg(not(unix))]
fn leader_exited(_pgid: Option<u32>) -> io::Result<bool> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(unix)]
fn signal_group(pgid: Option<u32>, signal: libc::c_int) -> bool {
    let Some(pgid) = pgid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group.
    unsafe { libc::kill(-pgid, signal) == 0 }
}

#[cfg(unix)]
fn request_shutdown(pgid: Option<u32>) -> bool {
    signal_group(pgid, libc::SIGTERM)
}

#[cfg(unix)]
fn force_kill(pgid: Option<u32>) {
    signal_group(pgid, libc::SIGKILL);
}

/// Kill whatever the worker left behind in its group. Only called while
/// the leader is unreaped.
#[cfg(unix)]
fn sweep_group(pgid: Option<u32>) {
    signal_group(pgid, libc::SIGKILL);
}

#[cfg(not(unix))]
fn request_shutdown(_pgid: Option<u32>) -> bool {
    false
}

#[cfg(not(unix))]
fn force_kill(_pgid: Option<u32>) {}

#[cfg(not(unix))]
fn sweep_group(_pgid: Option<u32>) {}
