// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Injection Tool Runner
 * Supervises the injection testing subprocess replaying a captured request
 *
 * Features:
 * - Data-driven command assembly from the tool configuration
 * - WARNING/CRITICAL console lines classified into severity events
 * - Any stderr output treated as a fatal crash
 * - Same single-terminal-transition discipline as the scanner supervisor
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::classifier::InjectionClassifier;
use crate::config::InjectionToolConfig;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::events::{EventSink, ScanEvent};
use crate::supervisor::TerminalGate;

/// Caller-selected knobs forwarded to the injection tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionOptions {
    pub dbms: Option<String>,
    pub level: Option<u32>,
    pub risk: Option<u32>,
}

struct InjectionShared {
    gate: TerminalGate,
    events: EventSink,
    /// Orders progress emission against the terminal transition; see the
    /// scanner supervisor for the abort race this closes.
    emit_order: parking_lot::Mutex<()>,
}

impl InjectionShared {
    fn progress(&self, event: ScanEvent, detail: Option<String>) {
        let _order = self.emit_order.lock();
        if self.gate.is_finished() {
            return;
        }
        self.events.emit_with(event, detail);
    }

    fn finish(&self, event: ScanEvent, detail: Option<String>) -> bool {
        {
            let _order = self.emit_order.lock();
            if !self.gate.claim() {
                return false;
            }
            self.events.emit_with(event, detail);
        }
        self.gate.shut();
        true
    }
}

/// Cancellable handle to one running injection test.
pub struct InjectionHandle {
    shared: Arc<InjectionShared>,
}

impl InjectionHandle {
    pub fn is_finished(&self) -> bool {
        self.shared.gate.is_finished()
    }

    /// Cancel the injection test. Idempotent.
    pub fn cancel(&self) {
        if self.shared.finish(ScanEvent::Cancelled, None) {
            info!("Injection test cancelled");
        }
    }
}

/// Spawns the injection tool against an exported captured-request file.
pub struct InjectionRunner {
    tool: InjectionToolConfig,
    classifier: InjectionClassifier,
}

impl InjectionRunner {
    pub fn new(tool: InjectionToolConfig, classifier: InjectionClassifier) -> Self {
        Self { tool, classifier }
    }

    /// Spawn the tool and start its supervision tasks. Unlike the scanner,
    /// a clean process exit is the success terminal here: the tool runs to
    /// completion and writes its findings to its own console.
    pub fn start(
        &self,
        request_file: &Path,
        options: &InjectionOptions,
        events: EventSink,
    ) -> OrchestratorResult<InjectionHandle> {
        let (program, args) = self.tool.command_line(request_file, options);
        debug!(%program, ?args, "Spawning injection subprocess");

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
        let shared = Arc::new(InjectionShared {
            gate: TerminalGate::new(kill_tx),
            events,
            emit_order: parking_lot::Mutex::new(()),
        });

        info!(request = %request_file.display(), "Injection subprocess spawned");

        let stdout_task = tokio::spawn(classify_stdout(
            Arc::clone(&shared),
            stdout,
            self.classifier.clone(),
        ));
        let stderr_task = tokio::spawn(watch_stderr(Arc::clone(&shared), stderr));
        shared.gate.register_tasks(vec![stdout_task, stderr_task]);

        tokio::spawn(wait_or_kill(child, kill_rx, Arc::clone(&shared)));

        Ok(InjectionHandle { shared })
    }
}

/// Classify console output; the first line of output marks tool startup.
async fn classify_stdout(
    shared: Arc<InjectionShared>,
    stdout: ChildStdout,
    classifier: InjectionClassifier,
) {
    let mut started = false;
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !started {
                    started = true;
                    shared.progress(ScanEvent::InjectionStarted, None);
                }
                match classifier.classify(&line) {
                    Some((event, message)) => shared.progress(event, Some(message)),
                    None => debug!(line = %line, "Unclassified injection tool output"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Injection stdout read failed");
                break;
            }
        }
    }
}

async fn watch_stderr(shared: Arc<InjectionShared>, mut stderr: ChildStderr) {
    let mut buf = [0u8; 4096];
    match stderr.read(&mut buf).await {
        Ok(0) | Err(_) => {}
        Ok(n) => {
            let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            warn!(stderr = %text, "Injection tool produced stderr output");
            shared.finish(ScanEvent::Crashed, Some(text));
        }
    }
}

async fn wait_or_kill(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    shared: Arc<InjectionShared>,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => {
                shared.finish(ScanEvent::InjectionComplete, None);
            }
            Ok(status) => {
                shared.finish(
                    ScanEvent::Crashed,
                    Some(format!("injection tool exited abnormally: {}", status)),
                );
            }
            Err(e) => {
                shared.finish(
                    ScanEvent::Crashed,
                    Some(format!("failed to await injection tool exit: {}", e)),
                );
            }
        },
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Injection tool already gone at kill time");
            }
            let _ = child.wait().await;
        }
    }
}
