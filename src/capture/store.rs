// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Captured Request Store
 * Per-host storage, retention sweeping and filler-token matching for
 * proxy-captured requests
 *
 * Features:
 * - Append-only record lists keyed by destination host
 * - Watch-list filtering: captures for unregistered hosts are discarded
 * - Periodic retention sweep bounding memory under unfiltered traffic
 * - Poll-based filler-token lookup with request-file export
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};
use uuid::Uuid;

use crate::capture::recorder::CompletedCapture;
use crate::errors::OrchestratorResult;
use crate::events::CancelFlag;

/// Redaction placeholder substituted for the filler token on match
const FILLER_REDACTION: &str = "*";

/// One captured request filed under its destination host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub host: String,
    /// Raw request text as reassembled from the capture stream
    pub original: String,
    pub command: String,
    pub headers: String,
    pub body: String,
    pub birth: DateTime<Utc>,
}

/// A record whose body matched the filler token, exported for replay
#[derive(Debug, Clone)]
pub struct MatchedRequest {
    pub record: CapturedRequest,
    /// File the reconstructed request text was written to
    pub file: PathBuf,
}

/// Process-wide store shared between the proxy's stream writer and the scan
/// sessions looking requests up.
pub struct CaptureStore {
    watched_hosts: RwLock<HashSet<String>>,
    records: RwLock<HashMap<String, Vec<CapturedRequest>>>,
    retention: chrono::Duration,
}

impl CaptureStore {
    pub fn new(retention_secs: u64) -> Self {
        Self {
            watched_hosts: RwLock::new(HashSet::new()),
            records: RwLock::new(HashMap::new()),
            retention: chrono::Duration::seconds(retention_secs as i64),
        }
    }

    /// Add a host to the watch list. Captures for unregistered hosts are
    /// discarded silently; the proxy observes all traffic but only
    /// registered hosts are of interest.
    pub fn register_host(&self, host: &str) {
        if self.watched_hosts.write().insert(host.to_string()) {
            info!(host, "Host registered for capture");
        }
    }

    pub fn unregister_host(&self, host: &str) {
        self.watched_hosts.write().remove(host);
    }

    pub fn is_watched(&self, host: &str) -> bool {
        self.watched_hosts.read().contains(host)
    }

    /// File a completed capture under its host key. Returns whether the
    /// capture was stored.
    pub fn ingest(&self, capture: CompletedCapture) -> bool {
        if !self.is_watched(&capture.host) {
            debug!(host = %capture.host, "Discarding capture for unregistered host");
            return false;
        }

        let record = CapturedRequest {
            host: capture.host.clone(),
            original: capture.raw,
            command: capture.command,
            headers: capture.headers,
            body: capture.body,
            birth: Utc::now(),
        };

        self.records
            .write()
            .entry(capture.host)
            .or_default()
            .push(record);
        true
    }

    /// Number of records currently held for a host.
    pub fn record_count(&self, host: &str) -> usize {
        self.records.read().get(host).map_or(0, |r| r.len())
    }

    /// Hosts that currently hold at least one record.
    pub fn hosts_with_records(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    /// Drop records older than the retention window; hosts left with no
    /// records are removed entirely.
    pub fn sweep(&self) {
        let now = Utc::now();
        let mut map = self.records.write();
        map.retain(|host, records| {
            let before = records.len();
            records.retain(|r| now.signed_duration_since(r.birth) <= self.retention);
            if records.len() != before {
                debug!(
                    host = %host,
                    expired = before - records.len(),
                    "Swept expired captures"
                );
            }
            !records.is_empty()
        });
    }

    fn find_match(&self, host: &str, token: &str) -> Option<CapturedRequest> {
        let records = self.records.read();
        records
            .get(host)?
            .iter()
            .find(|r| r.body.contains(token))
            .cloned()
    }

    /// Poll the host's record list until one record's body contains the
    /// filler token, then redact the token, rebuild the raw request text
    /// from the parsed sections and export it for the injection tool.
    ///
    /// The poll itself is unbounded; callers impose their own timeout by
    /// setting the cancel flag, which is observed at every tick and yields
    /// `Ok(None)`.
    pub async fn await_match(
        &self,
        host: &str,
        token: &str,
        poll_interval: Duration,
        requests_dir: &Path,
        cancel: &CancelFlag,
    ) -> OrchestratorResult<Option<MatchedRequest>> {
        let mut ticker = interval(poll_interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if cancel.is_set() {
                return Ok(None);
            }

            if let Some(mut record) = self.find_match(host, token) {
                record.body = record.body.replace(token, FILLER_REDACTION);
                record.original =
                    format!("{}{}{}", record.command, record.headers, record.body);

                tokio::fs::create_dir_all(requests_dir).await?;
                let file = requests_dir.join(format!("{}.txt", Uuid::new_v4()));
                tokio::fs::write(&file, record.original.as_bytes()).await?;
                info!(host, file = %file.display(), "Captured request matched and exported");

                return Ok(Some(MatchedRequest { record, file }));
            }
        }
    }
}
