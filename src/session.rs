// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Session
 * Per-client aggregate composing the allocator, supervisor, poller and
 * capture store into the two scanning modalities
 *
 * Features:
 * - Full scan: allocate port, spawn scanner, stream lifecycle events
 * - Injection test: await a proxy capture by filler token, replay it
 *   through the injection tool
 * - Idempotent cancel tearing down whichever subprocess is active
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::capture::CaptureStore;
use crate::classifier::{InjectionClassifier, MarkerTable};
use crate::config::AppConfig;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::events::{CancelFlag, EventSink, ScanEvent, SessionEvent};
use crate::injection::{InjectionHandle, InjectionOptions, InjectionRunner};
use crate::poller::CompletionPoller;
use crate::ports::PortAllocator;
use crate::supervisor::{ProcessSupervisor, ScanHandle};

/// Ensure the target parses as an http(s) URL, defaulting the scheme to
/// `http://` when the caller omitted it.
pub fn normalize_target(raw: &str) -> OrchestratorResult<Url> {
    if let Ok(url) = Url::parse(raw) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(url);
        }
        // A parsed host means a real (non-http) scheme was given, not a
        // bare domain that happened to parse; don't try to prefix those.
        if url.host_str().is_some() {
            return Err(OrchestratorError::InvalidTarget {
                url: raw.to_string(),
            });
        }
    }
    if let Ok(url) = Url::parse(&format!("http://{}", raw)) {
        if url.host_str().is_some() {
            return Ok(url);
        }
    }
    Err(OrchestratorError::InvalidTarget {
        url: raw.to_string(),
    })
}

/// One client's scanning session.
///
/// Owns at most one scanner handle or one injection handle at a time; every
/// event it produces flows into the sink created alongside it, ending with
/// exactly one terminal event per started modality.
pub struct ScanSession {
    scan_id: String,
    config: Arc<AppConfig>,
    ports: Arc<PortAllocator>,
    store: Arc<CaptureStore>,
    supervisor: ProcessSupervisor,
    runner: InjectionRunner,
    events: EventSink,
    cancel: CancelFlag,
    scan_handle: Mutex<Option<ScanHandle>>,
    injection_handle: Mutex<Option<InjectionHandle>>,
}

impl ScanSession {
    pub fn new(
        scan_id: String,
        config: Arc<AppConfig>,
        ports: Arc<PortAllocator>,
        store: Arc<CaptureStore>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = EventSink::new(scan_id.clone());

        let poller = CompletionPoller::from_config(&config.orchestrator);
        let supervisor = ProcessSupervisor::new(
            config.scanner_tool.clone(),
            MarkerTable::scanner_default(),
            poller,
            Arc::clone(&ports),
        );
        let runner = InjectionRunner::new(
            config.injection_tool.clone(),
            InjectionClassifier::default(),
        );

        let session = Self {
            scan_id,
            config,
            ports,
            store,
            supervisor,
            runner,
            events,
            cancel: CancelFlag::new(),
            scan_handle: Mutex::new(None),
            injection_handle: Mutex::new(None),
        };
        (session, rx)
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Start a full scan of the target.
    ///
    /// Returns the artifact path the scanner will write; progress and the
    /// terminal event arrive through the session's event receiver. The
    /// artifact is only valid once `write-verified` has been observed.
    pub async fn start_scan(&self, target: &str) -> OrchestratorResult<PathBuf> {
        let url = normalize_target(target)?;

        let port = self
            .ports
            .allocate()
            .ok_or(OrchestratorError::PortsExhausted {
                min: self.ports.port_min(),
                max: self.ports.port_max(),
            })?;

        let reports_dir = &self.config.paths.reports_dir;
        if let Err(e) = tokio::fs::create_dir_all(reports_dir).await {
            // Same rule as the spawn-failure branch below: no gate exists
            // yet, so the port must go back to the pool here.
            self.ports.release(port);
            return Err(e.into());
        }
        let artifact = reports_dir.join(format!("{}.xml", Uuid::new_v4()));

        info!(
            scan_id = %self.scan_id,
            target = %url,
            port,
            "Starting full scan"
        );

        let handle = match self
            .supervisor
            .start(url.as_str(), port, &artifact, self.events.clone())
        {
            Ok(handle) => handle,
            Err(e) => {
                // No gate exists yet, so the port is still ours to return.
                self.ports.release(port);
                return Err(e);
            }
        };

        *self.scan_handle.lock() = Some(handle);
        self.cancel_if_requested();

        Ok(artifact)
    }

    /// Run an injection test: wait for the proxy to capture a request whose
    /// body carries the filler token, then replay the exported request file
    /// through the injection tool.
    ///
    /// The capture wait is unbounded by design; callers bound it by calling
    /// `cancel`, which this observes at the next poll tick.
    pub async fn start_injection(
        &self,
        host: &str,
        filler: &str,
        options: InjectionOptions,
    ) -> OrchestratorResult<()> {
        self.store.register_host(host);
        self.events.emit(ScanEvent::ProxyWaiting);

        let matched = self
            .store
            .await_match(
                host,
                filler,
                self.config.orchestrator.poll_interval(),
                &self.config.paths.requests_dir,
                &self.cancel,
            )
            .await?;

        let matched = match matched {
            Some(matched) => matched,
            None => {
                // Cancelled while no subprocess handle existed; the terminal
                // event is ours to emit.
                self.events.emit(ScanEvent::Cancelled);
                return Ok(());
            }
        };

        self.events.emit_with(
            ScanEvent::CaptureMatched,
            Some(matched.file.display().to_string()),
        );

        let handle = self
            .runner
            .start(&matched.file, &options, self.events.clone())?;
        *self.injection_handle.lock() = Some(handle);
        self.cancel_if_requested();

        Ok(())
    }

    /// Cancel the session. Idempotent: the terminal gate inside each handle
    /// guarantees a second cancel, or a cancel racing a natural terminal
    /// event, produces no further side effects.
    pub fn cancel(&self) {
        self.cancel.set();
        if let Some(handle) = self.scan_handle.lock().take() {
            handle.cancel();
        }
        if let Some(handle) = self.injection_handle.lock().take() {
            handle.cancel();
        }
        warn!(scan_id = %self.scan_id, "Session cancel requested");
    }

    /// Close the window between a handle being stored and a concurrent
    /// cancel that ran before it existed.
    fn cancel_if_requested(&self) {
        if self.cancel.is_set() {
            if let Some(handle) = self.scan_handle.lock().take() {
                handle.cancel();
            }
            if let Some(handle) = self.injection_handle.lock().take() {
                handle.cancel();
            }
        }
    }
}
