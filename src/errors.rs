// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Orchestrator Error Types
 * Production-ready error handling with thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::path::PathBuf;
use thiserror::Error;

/// Main orchestrator error type
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Target URL could not be parsed into an http(s) URL
    #[error("Invalid target URL: {url}")]
    InvalidTarget { url: String },

    /// Every port in the configured range is currently assigned to a
    /// live scanner subprocess
    #[error("No free scanner port in {min}..={max}")]
    PortsExhausted { min: u16, max: u16 },

    /// An external tool binary could not be started
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The scan artifact disappeared or became unreadable mid-poll
    #[error("Artifact I/O failure for {path}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scanner subprocess produced stderr output or exited abnormally
    #[error("Scanner crashed: {stderr}")]
    ScannerCrashed { stderr: String },

    /// The injection tool subprocess produced stderr output or exited abnormally
    #[error("Injection tool crashed: {stderr}")]
    InjectionCrashed { stderr: String },

    /// General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Whether this error terminates an already-running scan session.
    ///
    /// Fatal errors go through the single-terminal-transition teardown; the
    /// remaining variants surface before any subprocess is live.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ScannerCrashed { .. }
                | OrchestratorError::InjectionCrashed { .. }
                | OrchestratorError::ArtifactIo { .. }
        )
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
