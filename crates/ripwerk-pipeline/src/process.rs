// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subprocess orchestrator.
//
// Every pipeline stage runs behind the same spawn/wait contract, whether
// it is an external command or an in-process transform.  External stages
// are real child processes connected by OS pipes; in-process stages are
// threads holding pipe ends, which keeps the planner and driver logic
// independent of which variant a stage uses.  All tracked stages can be
// killed as a group during abnormal teardown.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use ripwerk_core::error::{Result, RipwerkError};
use ripwerk_core::types::StageStatus;

/// Grace period between the polite and the forced kill.
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Handle of one tracked stage.
pub type StageId = u32;

/// What a stage executes.
pub enum StageAction {
    /// A shell command line, run through `/bin/sh -c`.
    External(String),
    /// An in-process transform acting as if it were a subprocess: it
    /// reads its stdin end, writes its stdout end, and returns an exit
    /// code.
    InProcess(Box<dyn FnOnce(Option<File>, Option<File>) -> i32 + Send + 'static>),
}

/// Where a stage's stdin comes from.
pub enum StageInput {
    /// Inherit the parent's stdin (external stages only; in-process
    /// stages receive nothing).
    Inherit,
    Null,
    /// Create a fresh pipe; the write end is returned to the caller.
    Pipe,
    /// Attach an existing pipe end, e.g. another stage's output.
    Fd(OwnedFd),
}

/// Where a stage's stdout goes. Mirror image of [`StageInput`].
pub enum StageOutput {
    Inherit,
    Null,
    Pipe,
    Fd(OwnedFd),
}

/// Result of a spawn: the stage id plus the parent-side pipe ends that
/// were created on request.
pub struct SpawnedStage {
    pub id: StageId,
    /// Write end feeding the stage's stdin, when `StageInput::Pipe`.
    pub input: Option<OwnedFd>,
    /// Read end of the stage's stdout, when `StageOutput::Pipe`.
    pub output: Option<OwnedFd>,
}

enum StageRunner {
    Child(Child),
    Task(JoinHandle<i32>),
}

struct TrackedStage {
    name: String,
    runner: StageRunner,
    own_group: bool,
}

/// Tracks every live pipeline stage of the current job.
///
/// Mutated only by the orchestrating process; children inherit nothing
/// but pipe file descriptors.
#[derive(Default)]
pub struct Orchestrator {
    stages: HashMap<StageId, TrackedStage>,
    next_id: StageId,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stages not yet waited for.
    pub fn live_count(&self) -> usize {
        self.stages.len()
    }

    /// Pid of an external stage, if it is still tracked.
    pub fn pid(&self, id: StageId) -> Option<u32> {
        match &self.stages.get(&id)?.runner {
            StageRunner::Child(child) => Some(child.id()),
            StageRunner::Task(_) => None,
        }
    }

    /// Launch a stage and start tracking it.
    pub fn spawn(
        &mut self,
        name: &str,
        action: StageAction,
        stdin: StageInput,
        stdout: StageOutput,
        own_process_group: bool,
    ) -> Result<SpawnedStage> {
        let id = self.next_id;
        self.next_id += 1;

        let (runner, input, output) = match action {
            StageAction::External(command_line) => {
                self.spawn_external(name, &command_line, stdin, stdout, own_process_group)?
            }
            StageAction::InProcess(transform) => self.spawn_task(name, transform, stdin, stdout)?,
        };

        self.stages.insert(
            id,
            TrackedStage {
                name: name.to_string(),
                runner,
                own_group: own_process_group,
            },
        );
        Ok(SpawnedStage { id, input, output })
    }

    fn spawn_external(
        &self,
        name: &str,
        command_line: &str,
        stdin: StageInput,
        stdout: StageOutput,
        own_process_group: bool,
    ) -> Result<(StageRunner, Option<OwnedFd>, Option<OwnedFd>)> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(command_line);
        command.stdin(match stdin {
            StageInput::Inherit => Stdio::inherit(),
            StageInput::Null => Stdio::null(),
            StageInput::Pipe => Stdio::piped(),
            StageInput::Fd(fd) => Stdio::from(fd),
        });
        command.stdout(match stdout {
            StageOutput::Inherit => Stdio::inherit(),
            StageOutput::Null => Stdio::null(),
            StageOutput::Pipe => Stdio::piped(),
            StageOutput::Fd(fd) => Stdio::from(fd),
        });
        // Stderr stays on the parent's log stream, never in job output.
        if own_process_group {
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| RipwerkError::Spawn {
            stage: name.to_string(),
            source,
        })?;
        info!(stage = name, pid = child.id(), command = command_line, "stage spawned");

        let input = child.stdin.take().map(OwnedFd::from);
        let output = child.stdout.take().map(OwnedFd::from);
        Ok((StageRunner::Child(child), input, output))
    }

    fn spawn_task(
        &self,
        name: &str,
        transform: Box<dyn FnOnce(Option<File>, Option<File>) -> i32 + Send + 'static>,
        stdin: StageInput,
        stdout: StageOutput,
    ) -> Result<(StageRunner, Option<OwnedFd>, Option<OwnedFd>)> {
        let (task_stdin, input) = match stdin {
            StageInput::Pipe => {
                let (reader, writer) = io::pipe()?;
                (Some(File::from(OwnedFd::from(reader))), Some(OwnedFd::from(writer)))
            }
            StageInput::Fd(fd) => (Some(File::from(fd)), None),
            StageInput::Inherit | StageInput::Null => (None, None),
        };
        let (task_stdout, output) = match stdout {
            StageOutput::Pipe => {
                let (reader, writer) = io::pipe()?;
                (Some(File::from(OwnedFd::from(writer))), Some(OwnedFd::from(reader)))
            }
            StageOutput::Fd(fd) => (Some(File::from(fd)), None),
            StageOutput::Inherit | StageOutput::Null => (None, None),
        };

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || transform(task_stdin, task_stdout))
            .map_err(|source| RipwerkError::Spawn {
                stage: name.to_string(),
                source,
            })?;
        info!(stage = name, "in-process stage started");
        Ok((StageRunner::Task(handle), input, output))
    }

    /// Stop tracking a stage, block until it finishes, and classify the
    /// result.
    pub fn wait(&mut self, id: StageId) -> Result<StageStatus> {
        let tracked = self
            .stages
            .remove(&id)
            .ok_or_else(|| RipwerkError::Internal(format!("unknown stage id {id}")))?;

        let status = match tracked.runner {
            StageRunner::Child(mut child) => {
                let exit = child.wait()?;
                match exit.signal() {
                    Some(signal) => StageStatus::Signaled(signal),
                    None => StageStatus::Exited(exit.code().unwrap_or(-1)),
                }
            }
            StageRunner::Task(handle) => match handle.join() {
                Ok(code) => StageStatus::Exited(code),
                Err(_) => {
                    warn!(stage = %tracked.name, "in-process stage panicked");
                    StageStatus::Exited(-1)
                }
            },
        };

        if status.success() {
            debug!(stage = %tracked.name, "stage finished");
        } else {
            warn!(stage = %tracked.name, %status, "stage failed");
        }
        Ok(status)
    }

    /// Kill every still-tracked stage: a polite termination signal first
    /// (to the whole group where a stage owns one), a short grace period,
    /// then a forced kill.  Only used during abnormal teardown; on the
    /// success path every stage is waited for explicitly.
    pub fn kill_all(&mut self) {
        if self.stages.is_empty() {
            return;
        }
        warn!(live = self.stages.len(), "tearing down pipeline");

        self.signal_children(libc::SIGTERM);
        std::thread::sleep(KILL_GRACE);
        self.signal_children(libc::SIGKILL);

        for (_, tracked) in self.stages.drain() {
            match tracked.runner {
                StageRunner::Child(mut child) => {
                    // Reap so the kill doesn't leave a zombie behind.
                    let _ = child.wait();
                }
                StageRunner::Task(handle) => {
                    // Threads cannot be signaled; killing their pipe peers
                    // gives them EOF/EPIPE and they exit on their own.
                    drop(handle);
                }
            }
        }
    }

    fn signal_children(&self, signal: i32) {
        for tracked in self.stages.values() {
            if let StageRunner::Child(child) = &tracked.runner {
                let pid = child.id() as i32;
                let target = if tracked.own_group { -pid } else { pid };
                let rc = unsafe { libc::kill(target, signal) };
                if rc == 0 {
                    info!(stage = %tracked.name, pid, signal, "stage signaled");
                } else {
                    debug!(stage = %tracked.name, pid, signal, "stage already gone");
                }
            }
        }
    }
}
