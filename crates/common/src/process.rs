// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// Launching and signalling the external SSH process

use std::ffi::OsStr;
use std::io;
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use sysinfo::{
    Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind,
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How a foreground process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Result of probing a tracked PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Exited,
    /// No PID recorded, or the platform cannot tell
    Unknown,
}

/// A process we launched, as remembered by the tracker
///
/// PIDs get reused, so the PID alone does not identify the process. The
/// launch command and start time do.
#[derive(Debug, Clone, Copy)]
pub struct TrackedProcess<'a> {
    pub pid: u32,
    /// Argument list it was started with, empty if never recorded
    pub command: &'a [String],
    pub started_at: DateTime<Utc>,
}

/// OS operations the connection launcher needs
///
/// `command[0]` is the program, the rest are its arguments.
pub trait ProcessRunner {
    /// Run attached to the caller's terminal and wait for it
    fn run_foreground(&self, command: &[String]) -> Result<ProcessExit>;

    /// Start detached and return its PID when available
    fn spawn_detached(&self, command: &[String]) -> Result<Option<u32>>;

    /// Ask the tracked process to stop
    ///
    /// `Ok(false)` if it is gone, or its PID now belongs to something else.
    /// No signal is sent in either case.
    fn terminate(&self, process: &TrackedProcess<'_>) -> Result<bool>;

    /// `Running` only while the PID still belongs to the tracked process
    fn liveness(&self, process: &TrackedProcess<'_>) -> Liveness;
}

/// Allowed gap between the OS start time and the recorded `started_at`
const START_TIME_SLACK_SECS: i64 = 5;

/// `ProcessRunner` backed by `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(command: &[String]) -> Result<Command> {
        let (program, args) = command.split_first().ok_or_else(|| Error::Launch {
            program: String::new(),
            reason: "empty command".to_string(),
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd)
    }

    fn launch_error(command: &[String], err: io::Error) -> Error {
        let program = command.first().cloned().unwrap_or_default();
        let reason = match err.kind() {
            io::ErrorKind::NotFound => "executable not found".to_string(),
            io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            _ => err.to_string(),
        };
        Error::Launch { program, reason }
    }
}

impl ProcessRunner for SystemRunner {
    fn run_foreground(&self, command: &[String]) -> Result<ProcessExit> {
        debug!("Running in foreground: {:?}", command);
        let status = Self::command(command)?
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| Self::launch_error(command, e))?;

        Ok(ProcessExit {
            code: status.code(),
        })
    }

    fn spawn_detached(&self, command: &[String]) -> Result<Option<u32>> {
        let mut cmd = Self::command(command)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group so terminal signals to the caller don't reach it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| Self::launch_error(command, e))?;
        let pid = child.id();
        info!("Started background process {}: {:?}", pid, command);

        // Dropping the handle leaves the child running
        drop(child);
        Ok(Some(pid))
    }

    fn terminate(&self, process: &TrackedProcess<'_>) -> Result<bool> {
        match Self::identify(process) {
            Liveness::Running => Self::send_terminate(process.pid),
            Liveness::Exited => {
                debug!("Process {} is gone or was replaced, not signalling", process.pid);
                Ok(false)
            }
            Liveness::Unknown => {
                warn!(
                    "Cannot confirm process {} is ours on this platform, not signalling",
                    process.pid
                );
                Ok(false)
            }
        }
    }

    fn liveness(&self, process: &TrackedProcess<'_>) -> Liveness {
        Self::identify(process)
    }
}

impl SystemRunner {
    /// Look the PID up and check it is still the process we launched
    fn identify(tracked: &TrackedProcess<'_>) -> Liveness {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Liveness::Unknown;
        }

        let pid = Pid::from_u32(tracked.pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_cmd(UpdateKind::Always),
        );

        let Some(found) = system.process(pid) else {
            return Liveness::Exited;
        };
        if found.status() == ProcessStatus::Zombie {
            return Liveness::Exited;
        }
        if !is_same_process(found, tracked) {
            debug!(
                "PID {} now belongs to {:?}, not the tracked process",
                tracked.pid,
                found.name()
            );
            return Liveness::Exited;
        }
        Liveness::Running
    }

    #[cfg(unix)]
    fn send_terminate(pid: u32) -> Result<bool> {
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            warn!("PID {} out of range, nothing to terminate", pid);
            return Ok(false);
        };

        let result = unsafe { libc::kill(raw, libc::SIGTERM) };
        if result == 0 {
            info!("Sent SIGTERM to process {}", pid);
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => {
                debug!("Process {} already exited", pid);
                Ok(false)
            }
            _ => Err(Error::Launch {
                program: format!("PID {}", pid),
                reason: format!("failed to terminate: {}", err),
            }),
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(pid: u32) -> Result<bool> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        match system.process(pid) {
            Some(process) => Ok(process.kill()),
            None => Ok(false),
        }
    }
}

// Start time within a few seconds of the launch, and the same argument list
// when both sides know it
fn is_same_process(found: &Process, tracked: &TrackedProcess<'_>) -> bool {
    let started = i64::try_from(found.start_time()).unwrap_or(i64::MAX);
    let drift = (started - tracked.started_at.timestamp()).abs();
    if started != 0 && drift > START_TIME_SLACK_SECS {
        return false;
    }

    let cmd = found.cmd();
    if cmd.is_empty() || tracked.command.is_empty() {
        return true;
    }
    cmd.len() == tracked.command.len()
        && cmd
            .iter()
            .zip(tracked.command)
            .all(|(actual, expected)| OsStr::new(actual) == OsStr::new(expected.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_executable_is_launch_error() {
        let runner = SystemRunner;
        let command = cmd(&["portmanager-definitely-not-installed-ssh", "user@host"]);

        match runner.run_foreground(&command) {
            Err(Error::Launch { program, reason }) => {
                assert_eq!(program, "portmanager-definitely-not-installed-ssh");
                assert_eq!(reason, "executable not found");
            }
            other => panic!("expected Launch error, got {:?}", other),
        }

        assert!(matches!(
            runner.spawn_detached(&command),
            Err(Error::Launch { .. })
        ));
    }

    #[test]
    fn test_empty_command_is_launch_error() {
        assert!(matches!(
            SystemRunner.run_foreground(&[]),
            Err(Error::Launch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_foreground_exit_codes() {
        let runner = SystemRunner;
        let ok = runner.run_foreground(&cmd(&["true"])).unwrap();
        assert!(ok.success());

        let failed = runner.run_foreground(&cmd(&["false"])).unwrap();
        assert!(!failed.success());
        assert_eq!(failed.code, Some(1));
    }

    fn tracked(pid: u32, command: &[String], started_at: DateTime<Utc>) -> TrackedProcess<'_> {
        TrackedProcess {
            pid,
            command,
            started_at,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_detached_process() {
        let runner = SystemRunner;
        let command = cmd(&["sleep", "30"]);
        let pid = runner
            .spawn_detached(&command)
            .unwrap()
            .expect("spawned process has a PID");
        let process = tracked(pid, &command, Utc::now());

        assert_eq!(runner.liveness(&process), Liveness::Running);
        assert!(runner.terminate(&process).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_reused_pid_is_not_signalled() {
        let runner = SystemRunner;
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        // Same PID, but recorded for an ssh launched long ago
        let ssh = cmd(&["ssh", "-N", "admin@db.example.com"]);
        let stale = tracked(pid, &ssh, Utc::now() - chrono::Duration::days(30));
        assert_eq!(runner.liveness(&stale), Liveness::Exited);
        assert!(!runner.terminate(&stale).unwrap());

        // Right start time, wrong command
        let wrong_command = tracked(pid, &ssh, Utc::now());
        assert_eq!(runner.liveness(&wrong_command), Liveness::Exited);
        assert!(!runner.terminate(&wrong_command).unwrap());

        assert!(child.try_wait().unwrap().is_none());
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_unrecorded_command_falls_back_to_start_time() {
        let runner = SystemRunner;
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        let process = tracked(child.id(), &[], Utc::now());
        assert_eq!(runner.liveness(&process), Liveness::Running);

        child.kill().unwrap();
        child.wait().unwrap();
        assert_eq!(runner.liveness(&process), Liveness::Exited);
    }
}
