// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Ripwerk.

use thiserror::Error;

use crate::types::StageStatus;

/// Top-level error type for all Ripwerk operations.
#[derive(Debug, Error)]
pub enum RipwerkError {
    // -- Catalog / option errors --
    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("invalid value {value:?} for option {option}: {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },

    /// A fallback setting required in `force` mode is missing. This means
    /// the printer description is broken, not that the job is bad.
    #[error("broken printer description: {0}")]
    CatalogDefinition(String),

    // -- Document errors --
    #[error("cannot determine page count: {0}")]
    PageCount(String),

    #[error("page range {first}-{last} outside document ({pages} pages)")]
    RangeOutOfBounds { first: u32, last: u32, pages: u32 },

    // -- Pipeline errors --
    #[error("failed to spawn {stage}: {source}")]
    Spawn {
        stage: String,
        source: std::io::Error,
    },

    #[error("stage {stage} failed: {status}")]
    StageFailed { stage: String, status: StageStatus },

    #[error("job canceled by termination signal")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),

    // -- Resource / configuration --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RipwerkError>;
