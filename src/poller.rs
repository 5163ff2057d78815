// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Artifact Completion Poller
 * Declares a scanner artifact complete once its size stops changing
 *
 * The external scanner writes its artifact incrementally and gives no
 * filesystem signal when it is done, so size-stability over consecutive
 * samples is used as a completion proxy.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::path::Path;
use std::time::Duration;
use tokio::time::interval;
use tracing::debug;

use crate::config::OrchestratorConfig;

/// Polls a target file's size at a fixed interval.
#[derive(Debug, Clone)]
pub struct CompletionPoller {
    poll_interval: Duration,
    stable_samples: u32,
}

impl CompletionPoller {
    pub fn new(poll_interval: Duration, stable_samples: u32) -> Self {
        Self {
            poll_interval,
            stable_samples,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.poll_interval(), config.stable_samples)
    }

    /// Wait until the file first appears on disk.
    ///
    /// The scanner creates the artifact only once it starts writing results,
    /// so stability sampling must not begin before this point. Runs until
    /// the file exists; the owning supervisor aborts the surrounding task on
    /// session teardown.
    pub async fn wait_for_existence(&self, path: &Path) {
        let mut ticker = interval(self.poll_interval);
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tokio::fs::metadata(path).await.is_ok() {
                debug!(path = %path.display(), "Artifact file appeared");
                return;
            }
        }
    }

    /// Wait until the file size is unchanged across the configured number of
    /// consecutive samples.
    ///
    /// The size observed on entry is the baseline; every tick that reads the
    /// same size advances the stability counter, any change resets it. A
    /// read failure (file deleted mid-poll) is fatal and propagates to the
    /// caller.
    pub async fn wait_for_stable(&self, path: &Path) -> std::io::Result<()> {
        let mut baseline = tokio::fs::metadata(path).await?.len();
        let mut streak = 0u32;

        let mut ticker = interval(self.poll_interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let size = tokio::fs::metadata(path).await?.len();
            if size == baseline {
                streak += 1;
                if streak >= self.stable_samples {
                    debug!(
                        path = %path.display(),
                        size,
                        samples = streak,
                        "Artifact size stable"
                    );
                    return Ok(());
                }
            } else {
                baseline = size;
                streak = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_signals_after_stable_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        tokio::fs::write(&path, vec![0u8; 10]).await.unwrap();

        let poller = CompletionPoller::new(Duration::from_millis(30), 4);
        let started = Instant::now();
        poller.wait_for_stable(&path).await.unwrap();

        // Four consecutive equal samples after the baseline read.
        assert!(started.elapsed() >= Duration::from_millis(4 * 30));
    }

    #[tokio::test]
    async fn test_size_change_resets_the_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        tokio::fs::write(&path, vec![0u8; 10]).await.unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            // Grow the file mid-poll; stability must restart from the new
            // size, not complete on the stale baseline.
            tokio::time::sleep(Duration::from_millis(100)).await;
            tokio::fs::write(&writer_path, vec![0u8; 20]).await.unwrap();
        });

        let poller = CompletionPoller::new(Duration::from_millis(50), 4);
        let started = Instant::now();
        poller.wait_for_stable(&path).await.unwrap();
        writer.await.unwrap();

        // The write landed around 100ms in, so completion needs the reset
        // plus four fresh samples on the 20-byte size.
        assert!(started.elapsed() >= Duration::from_millis(100 + 4 * 50));
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_deleted_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");
        tokio::fs::write(&path, b"partial").await.unwrap();

        let victim = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            tokio::fs::remove_file(&victim).await.unwrap();
        });

        let poller = CompletionPoller::new(Duration::from_millis(25), 10);
        let result = poller.wait_for_stable(&path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_existence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xml");

        let creator_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            tokio::fs::write(&creator_path, b"x").await.unwrap();
        });

        let poller = CompletionPoller::new(Duration::from_millis(20), 4);
        let started = Instant::now();
        poller.wait_for_existence(&path).await;
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
