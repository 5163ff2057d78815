// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Intercepting Proxy Supervisor
 * Keeps the long-lived capture proxy subprocess alive and feeds its output
 * into the capture store
 *
 * Features:
 * - Stdout lines driven through the capture recorder state machine
 * - Stderr output kills and restarts the proxy
 * - Manager task respawning a dead proxy at a fixed interval
 * - Retention sweep task bounding the capture store
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureMarkers, CaptureRecorder, CaptureStore};
use crate::config::ProxyToolConfig;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::events::CancelFlag;

/// Interval at which a running proxy checks the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Supervises the single shared proxy subprocess.
///
/// The proxy runs independently of any scan session: it classifies all
/// observed traffic continuously, and sessions only consult the store.
pub struct ProxySupervisor {
    tool: ProxyToolConfig,
    markers: CaptureMarkers,
    store: Arc<CaptureStore>,
    sweep_interval: Duration,
    respawn_interval: Duration,
    alive: AtomicBool,
    shutdown: CancelFlag,
}

impl ProxySupervisor {
    pub fn new(
        tool: ProxyToolConfig,
        markers: CaptureMarkers,
        store: Arc<CaptureStore>,
        sweep_interval: Duration,
        respawn_interval: Duration,
    ) -> Self {
        Self {
            tool,
            markers,
            store,
            sweep_interval,
            respawn_interval,
            alive: AtomicBool::new(false),
            shutdown: CancelFlag::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Start the respawn manager and the retention sweep. Both are
    /// recurring tasks that observe the shutdown flag at their next tick.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(manager.respawn_interval);
            loop {
                ticker.tick().await;
                if manager.shutdown.is_set() {
                    break;
                }
                if !manager.is_alive() {
                    manager.alive.store(true, Ordering::SeqCst);
                    let runner = Arc::clone(&manager);
                    tokio::spawn(async move {
                        if let Err(e) = runner.run_proxy_once().await {
                            error!(error = %e, "Proxy subprocess failed");
                        }
                        runner.alive.store(false, Ordering::SeqCst);
                    });
                }
            }
            debug!("Proxy respawn manager stopped");
        });

        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(sweeper.sweep_interval);
            loop {
                ticker.tick().await;
                if sweeper.shutdown.is_set() {
                    break;
                }
                sweeper.store.sweep();
            }
            debug!("Capture retention sweep stopped");
        });
    }

    /// Stop the manager and sweep tasks and terminate a live proxy. The
    /// recurring tasks exit at their next tick.
    pub fn shutdown(&self) {
        self.shutdown.set();
    }

    /// Run one proxy subprocess to completion, feeding its stdout through
    /// the recorder into the store.
    pub async fn run_proxy_once(&self) -> OrchestratorResult<()> {
        let (program, args) = self.tool.command_line();
        debug!(%program, ?args, "Spawning proxy subprocess");

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
        let mut stderr = child.stderr.take().ok_or_else(|| OrchestratorError::Spawn {
            tool: program.clone(),
            source: std::io::Error::other("stderr pipe missing"),
        })?;

        info!(port = self.tool.port, "Proxy subprocess spawned");

        let mut recorder = CaptureRecorder::new(self.markers.clone());
        let mut lines = BufReader::new(stdout).lines();
        let mut errbuf = [0u8; 4096];
        let mut stderr_open = true;
        let mut shutdown_tick = interval(SHUTDOWN_POLL);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(capture) = recorder.feed_line(&line) {
                            let host = capture.host.clone();
                            if self.store.ingest(capture) {
                                info!(host = %host, "Stored captured request");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("Proxy stdout closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Proxy stdout read failed");
                        break;
                    }
                },
                read = stderr.read(&mut errbuf), if stderr_open => match read {
                    Ok(0) | Err(_) => stderr_open = false,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&errbuf[..n]).trim().to_string();
                        error!(stderr = %text, "Proxy crashed");
                        if let Err(e) = child.start_kill() {
                            debug!(error = %e, "Proxy already gone at kill time");
                        }
                        break;
                    }
                },
                _ = shutdown_tick.tick() => {
                    if self.shutdown.is_set() {
                        if let Err(e) = child.start_kill() {
                            debug!(error = %e, "Proxy already gone at kill time");
                        }
                        break;
                    }
                }
            }
        }

        let _ = child.wait().await;
        info!("Proxy subprocess exited");
        Ok(())
    }
}
