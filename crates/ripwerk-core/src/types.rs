// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Ripwerk print filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The print job as handed over by the spooler.
///
/// Read-only to the rendering core; only the spooler glue writes `title`
/// and `printer` after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub user: String,
    pub host: String,
    pub copies: u32,
    /// Name of the target printer queue.
    pub printer: String,
    /// Path of the PPD file the option catalog was loaded from.
    pub ppd_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(title: impl Into<String>, user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            title: title.into(),
            user: user.into(),
            host: host.into(),
            copies: 1,
            printer: String::new(),
            ppd_path: None,
            created_at: Utc::now(),
        }
    }
}

/// Inclusive page range `first..=last`, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// Normalized result of waiting for a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Stage exited on its own with this code.
    Exited(i32),
    /// Stage was killed by this signal.
    Signaled(i32),
}

impl StageStatus {
    pub fn success(&self) -> bool {
        matches!(self, StageStatus::Exited(0))
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Exited(code) => write!(f, "exit status {code}"),
            StageStatus::Signaled(sig) => write!(f, "killed by signal {sig}"),
        }
    }
}

/// Job exit codes reported back to the spooler. Stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Job printed successfully.
    Printed,
    /// Printer error, spooler may retry.
    PrinterError,
    /// Printer error, do not retry.
    PrinterErrorNoRetry,
    /// The job itself is defective.
    DefectiveJob,
    /// Job terminated after a termination signal.
    TerminatedBySignal,
    /// Printer is busy with another job.
    PrinterEngaged,
    /// Access to the printer was denied.
    AccessDenied,
    /// Printer is not responding.
    NotResponding,
    /// Bad option settings or broken printer description, do not retry.
    BadSettings,
    /// Address lookup failed, possibly transient.
    AddressLookupTransient,
    /// Address lookup failed, permanent.
    AddressLookupPermanent,
    /// Printer is incapable of printing this job.
    PrinterIncapable,
}

impl ExitCode {
    /// The numeric code handed to the spooler.
    pub fn code(self) -> i32 {
        match self {
            Self::Printed => 0,
            Self::PrinterError => 1,
            Self::PrinterErrorNoRetry => 2,
            Self::DefectiveJob => 3,
            Self::TerminatedBySignal => 4,
            Self::PrinterEngaged => 5,
            Self::AccessDenied => 7,
            Self::NotResponding => 8,
            Self::BadSettings => 9,
            Self::AddressLookupTransient => 10,
            Self::AddressLookupPermanent => 11,
            Self::PrinterIncapable => 50,
        }
    }
}

/// Renderer exit statuses that do not indicate failure.
pub const RENDERER_EXIT_WHITELIST: &[i32] = &[0];

/// Map a renderer's stage status onto the spooler exit-code contract.
///
/// Exit 1 and the wrapped-around codes 255/243 are what common raster
/// interpreters return for defective input; 139 is a segfaulted renderer
/// (128 + SIGSEGV), still classified as a defective job. Signal mappings
/// follow the convention that a renderer forwards printer conditions by
/// raising SIGUSR1/SIGUSR2/SIGTTIN against itself.
pub fn classify_renderer_status(status: StageStatus) -> ExitCode {
    // Signal numbers per POSIX; stable on every platform the filter targets.
    const SIGSEGV: i32 = 11;
    const SIGUSR1: i32 = 10;
    const SIGUSR2: i32 = 12;
    const SIGTTIN: i32 = 21;

    match status {
        StageStatus::Exited(0) => ExitCode::Printed,
        StageStatus::Exited(1) | StageStatus::Exited(255) | StageStatus::Exited(243) => {
            ExitCode::DefectiveJob
        }
        StageStatus::Exited(139) => {
            tracing::warn!("renderer exited with status 139, possible core dump");
            ExitCode::DefectiveJob
        }
        StageStatus::Exited(_) => ExitCode::PrinterError,
        StageStatus::Signaled(SIGUSR1) => ExitCode::PrinterError,
        StageStatus::Signaled(SIGUSR2) => ExitCode::PrinterErrorNoRetry,
        StageStatus::Signaled(SIGTTIN) => ExitCode::PrinterEngaged,
        StageStatus::Signaled(SIGSEGV) => {
            tracing::warn!("renderer killed by SIGSEGV, possible core dump");
            ExitCode::DefectiveJob
        }
        StageStatus::Signaled(_) => ExitCode::PrinterError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spooler_contract() {
        assert_eq!(ExitCode::Printed.code(), 0);
        assert_eq!(ExitCode::DefectiveJob.code(), 3);
        assert_eq!(ExitCode::TerminatedBySignal.code(), 4);
        assert_eq!(ExitCode::BadSettings.code(), 9);
        assert_eq!(ExitCode::PrinterIncapable.code(), 50);
    }

    #[test]
    fn renderer_failure_codes_are_defective_job() {
        for code in [1, 255, 243, 139] {
            assert_eq!(
                classify_renderer_status(StageStatus::Exited(code)),
                ExitCode::DefectiveJob
            );
        }
    }

    #[test]
    fn renderer_signals_map_to_printer_conditions() {
        assert_eq!(
            classify_renderer_status(StageStatus::Signaled(10)),
            ExitCode::PrinterError
        );
        assert_eq!(
            classify_renderer_status(StageStatus::Signaled(12)),
            ExitCode::PrinterErrorNoRetry
        );
        assert_eq!(
            classify_renderer_status(StageStatus::Signaled(21)),
            ExitCode::PrinterEngaged
        );
    }

    #[test]
    fn unknown_nonzero_exit_is_printer_error() {
        assert_eq!(
            classify_renderer_status(StageStatus::Exited(7)),
            ExitCode::PrinterError
        );
    }
}
