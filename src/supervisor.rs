// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scanner Process Supervisor
 * Spawns and supervises external scanner subprocesses
 *
 * Features:
 * - Piped stdout classified into lifecycle events line by line
 * - Any stderr output treated as a fatal crash
 * - Artifact completion polling racing the stream readers
 * - Single-terminal-transition guarantee: port released once, subprocess
 *   signaled once, exactly one terminal event per scan
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::MarkerTable;
use crate::config::ScannerToolConfig;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::events::{EventSink, ScanEvent};
use crate::poller::CompletionPoller;
use crate::ports::PortAllocator;

/// Shared guard for the terminal-transition race.
///
/// The stdout-completion, stderr-crash and external-cancel paths all funnel
/// through `claim`; only the first caller proceeds with teardown. `shut`
/// signals the subprocess exactly once and stops every recurring task.
pub(crate) struct TerminalGate {
    finished: AtomicBool,
    kill: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl TerminalGate {
    pub(crate) fn new(kill: oneshot::Sender<()>) -> Self {
        Self {
            finished: AtomicBool::new(false),
            kill: parking_lot::Mutex::new(Some(kill)),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register_tasks(&self, handles: Vec<JoinHandle<()>>) {
        self.tasks.lock().extend(handles);
    }

    /// Atomically claim the single terminal transition. Returns false if a
    /// racing path already won.
    pub(crate) fn claim(&self) -> bool {
        !self.finished.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Signal the subprocess and abort the reader/poller tasks. Must only be
    /// called by the claim winner.
    pub(crate) fn shut(&self) {
        if let Some(kill) = self.kill.lock().take() {
            let _ = kill.send(());
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

struct ScanShared {
    gate: TerminalGate,
    port: u16,
    ports: Arc<PortAllocator>,
    events: EventSink,
    /// Orders progress emission against the terminal transition. Task abort
    /// only lands at the next await, so a reader sitting between its read
    /// and its emit could otherwise enqueue an event after the terminal one.
    emit_order: parking_lot::Mutex<()>,
}

impl ScanShared {
    /// Emit a progress event, unless the terminal transition already ran.
    fn progress(&self, event: ScanEvent) {
        let _order = self.emit_order.lock();
        if self.gate.is_finished() {
            return;
        }
        self.events.emit(event);
    }

    /// Run the terminal transition: release the port, signal the subprocess,
    /// emit the terminal event. A losing racer is a no-op.
    fn finish(&self, event: ScanEvent, detail: Option<String>) -> bool {
        {
            let _order = self.emit_order.lock();
            if !self.gate.claim() {
                return false;
            }
            self.ports.release(self.port);
            self.events.emit_with(event, detail);
        }
        self.gate.shut();
        true
    }
}

/// Cancellable handle to one supervised scanner subprocess.
///
/// At most one of these exists per scan session; dropping it does not tear
/// the scan down, `cancel` does.
pub struct ScanHandle {
    port: u16,
    artifact_path: PathBuf,
    shared: Arc<ScanShared>,
}

impl ScanHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn is_finished(&self) -> bool {
        self.shared.gate.is_finished()
    }

    /// Cancel the scan. Idempotent: after the first terminal transition this
    /// is a no-op, and a cancel racing a natural completion or crash never
    /// double-releases the port.
    pub fn cancel(&self) {
        if self.shared.finish(ScanEvent::Cancelled, None) {
            info!(port = self.port, "Scan cancelled");
        }
    }
}

/// Spawns scanner subprocesses and wires up their supervision tasks.
pub struct ProcessSupervisor {
    tool: ScannerToolConfig,
    markers: MarkerTable,
    poller: CompletionPoller,
    ports: Arc<PortAllocator>,
}

impl ProcessSupervisor {
    pub fn new(
        tool: ScannerToolConfig,
        markers: MarkerTable,
        poller: CompletionPoller,
        ports: Arc<PortAllocator>,
    ) -> Self {
        Self {
            tool,
            markers,
            poller,
            ports,
        }
    }

    /// Spawn the scanner bound to an already-allocated port and start the
    /// three supervision tasks racing toward the terminal transition.
    ///
    /// The caller owns the port until this returns: on a spawn error the
    /// port has not been touched and the caller must release it.
    pub fn start(
        &self,
        target: &str,
        port: u16,
        artifact: &Path,
        events: EventSink,
    ) -> OrchestratorResult<ScanHandle> {
        let (program, args) = self.tool.command_line(port, target, artifact);
        debug!(%program, ?args, "Spawning scanner subprocess");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| OrchestratorError::Spawn {
                tool: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| OrchestratorError::Spawn {
            tool: program.clone(),
            source: std::io::Error::other("stdout pipe missing"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| OrchestratorError::Spawn {
            tool: program.clone(),
            source: std::io::Error::other("stderr pipe missing"),
        })?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let shared = Arc::new(ScanShared {
            gate: TerminalGate::new(kill_tx),
            port,
            ports: Arc::clone(&self.ports),
            events: events.clone(),
            emit_order: parking_lot::Mutex::new(()),
        });

        info!(port, target, "Scanner subprocess spawned");
        events.emit(ScanEvent::Started);

        let stdout_task = tokio::spawn(classify_stdout(
            Arc::clone(&shared),
            stdout,
            self.markers.clone(),
        ));
        let stderr_task = tokio::spawn(watch_stderr(Arc::clone(&shared), stderr));
        let poller_task = tokio::spawn(poll_artifact(
            Arc::clone(&shared),
            self.poller.clone(),
            artifact.to_path_buf(),
        ));
        shared
            .gate
            .register_tasks(vec![stdout_task, stderr_task, poller_task]);

        // The waiter owns the child: it reaps a natural exit and performs
        // the one kill signal when the gate fires. Not registered with the
        // gate so the kill is never aborted mid-flight.
        tokio::spawn(wait_or_kill(child, kill_rx, Arc::clone(&shared)));

        Ok(ScanHandle {
            port,
            artifact_path: artifact.to_path_buf(),
            shared,
        })
    }
}

/// Feed every stdout line through the marker table.
async fn classify_stdout(shared: Arc<ScanShared>, stdout: ChildStdout, markers: MarkerTable) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match markers.classify(&line) {
                Some(event) => shared.progress(event),
                None => debug!(line = %line, "Unclassified scanner output"),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Scanner stdout read failed");
                break;
            }
        }
    }
}

/// Any stderr data is fatal: the scanner tool is silent on stderr in normal
/// operation.
async fn watch_stderr(shared: Arc<ScanShared>, mut stderr: ChildStderr) {
    let mut buf = [0u8; 4096];
    match stderr.read(&mut buf).await {
        Ok(0) | Err(_) => {}
        Ok(n) => {
            let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            warn!(stderr = %text, "Scanner produced stderr output");
            shared.finish(ScanEvent::Crashed, Some(text));
        }
    }
}

/// Watch the artifact: existence first, then size stability.
async fn poll_artifact(shared: Arc<ScanShared>, poller: CompletionPoller, artifact: PathBuf) {
    poller.wait_for_existence(&artifact).await;
    shared.progress(ScanEvent::Writing);

    match poller.wait_for_stable(&artifact).await {
        Ok(()) => {
            if shared.finish(
                ScanEvent::WriteVerified,
                Some(artifact.display().to_string()),
            ) {
                info!(artifact = %artifact.display(), "Scan artifact verified");
            }
        }
        Err(e) => {
            shared.finish(
                ScanEvent::Crashed,
                Some(format!(
                    "artifact read failed for {}: {}",
                    artifact.display(),
                    e
                )),
            );
        }
    }
}

/// Reap the child on natural exit, or kill it once the gate fires.
async fn wait_or_kill(mut child: Child, kill_rx: oneshot::Receiver<()>, shared: Arc<ScanShared>) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => {
                // Clean exit carries no verdict; the artifact poller decides.
                debug!("Scanner exited cleanly");
            }
            Ok(status) => {
                shared.finish(
                    ScanEvent::Crashed,
                    Some(format!("scanner exited abnormally: {}", status)),
                );
            }
            Err(e) => {
                shared.finish(
                    ScanEvent::Crashed,
                    Some(format!("failed to await scanner exit: {}", e)),
                );
            }
        },
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Scanner already gone at kill time");
            }
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_after_terminal_is_dropped() {
        let (events, mut rx) = EventSink::new("scan-1".to_string());
        let (kill_tx, _kill_rx) = oneshot::channel();
        let ports = Arc::new(PortAllocator::new(7000, 7000));
        let port = ports.allocate().expect("free port");
        let shared = ScanShared {
            gate: TerminalGate::new(kill_tx),
            port,
            ports: Arc::clone(&ports),
            events,
            emit_order: parking_lot::Mutex::new(()),
        };

        shared.progress(ScanEvent::Spidering);
        assert!(shared.finish(ScanEvent::Cancelled, None));

        // A reader that lost the race must not get its event through, and a
        // losing terminal path is a no-op.
        shared.progress(ScanEvent::ActiveScan);
        assert!(!shared.finish(ScanEvent::Crashed, Some("late".to_string())));

        assert_eq!(rx.recv().await.map(|e| e.event), Some(ScanEvent::Spidering));
        assert_eq!(rx.recv().await.map(|e| e.event), Some(ScanEvent::Cancelled));
        assert!(rx.try_recv().is_err());
        assert_eq!(ports.in_use_count(), 0);
    }
}
