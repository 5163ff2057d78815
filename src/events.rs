// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Session Lifecycle Events
 * Event types and per-session event sink for the orchestration engine
 *
 * Features:
 * - Named lifecycle events with optional string payloads
 * - Per-session ordered delivery over an unbounded channel
 * - Cooperative cancellation flag observed at poll tick boundaries
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle event emitted by a scan session.
///
/// Progress events may be skipped entirely when the subprocess never reaches
/// the corresponding phase; terminal events are mutually exclusive and each
/// session emits exactly one of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanEvent {
    /// Scanner subprocess spawned
    Started,
    /// Scanner entered its spidering phase
    Spidering,
    /// Scanner entered its active scanning phase
    ActiveScan,
    /// Scanner reported the attack phase complete
    AttackComplete,
    /// Artifact file first observed on disk
    Writing,
    /// Artifact size stable; scan succeeded (terminal)
    WriteVerified,
    /// Subprocess crashed or the artifact became unreadable (terminal)
    Crashed,
    /// Session cancelled by the caller (terminal)
    Cancelled,
    /// Waiting for the proxy to observe a matching captured request
    ProxyWaiting,
    /// A captured request matched the filler token and was exported
    CaptureMatched,
    /// Injection tool produced its first output
    InjectionStarted,
    /// Injection tool warning known to be harmless
    InjectionWarningSafe,
    /// Injection tool warning indicating a real problem
    InjectionWarningReal,
    /// Injection tool critical message known to be harmless
    InjectionCriticalSafe,
    /// Injection tool critical message indicating a real problem
    InjectionCriticalReal,
    /// Injection tool exited cleanly (terminal)
    InjectionComplete,
}

impl ScanEvent {
    /// Terminal events end the session; no further events follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::WriteVerified
                | ScanEvent::Crashed
                | ScanEvent::Cancelled
                | ScanEvent::InjectionComplete
        )
    }
}

/// One delivered event, tagged with its owning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub scan_id: String,
    pub event: ScanEvent,
    pub detail: Option<String>,
    pub timestamp: u64,
}

/// Per-session event sink.
///
/// Cheap to clone; every concurrent task of a session writes into the same
/// unbounded channel, so the delivered sequence is totally ordered.
#[derive(Clone)]
pub struct EventSink {
    scan_id: String,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Create a sink and the receiving half the caller consumes events from.
    pub fn new(scan_id: String) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { scan_id, tx }, rx)
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Emit an event with no payload.
    pub fn emit(&self, event: ScanEvent) {
        self.emit_with(event, None);
    }

    /// Emit an event with an optional string payload.
    pub fn emit_with(&self, event: ScanEvent, detail: Option<String>) {
        let update = SessionEvent {
            scan_id: self.scan_id.clone(),
            event,
            detail,
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
        };
        // A dropped receiver means the caller went away; nothing to do.
        let _ = self.tx.send(update);
    }
}

/// Cooperative cancellation flag.
///
/// Set once, observed by polling loops at their next tick boundary; never a
/// forced interrupt mid-read.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
