// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Integration tests for the subprocess orchestration engine
 *
 * The scanner and injection binaries are replaced with `sh -c` scripts so
 * the supervisor, the terminal-transition race and the session glue run
 * against real child processes. The shell receives the orchestrator's
 * appended tool flags as positional parameters, so "$5" inside a script is
 * the artifact path passed after the output flag.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use luotain::capture::{CaptureStore, CompletedCapture};
use luotain::config::{create_default_config, AppConfig, ScannerToolConfig};
use luotain::events::{ScanEvent, SessionEvent};
use luotain::injection::InjectionOptions;
use luotain::ports::PortAllocator;
use luotain::session::ScanSession;

fn sh_scanner(script: &str) -> ScannerToolConfig {
    ScannerToolConfig {
        binary: "sh".to_string(),
        base_args: vec!["-c".to_string(), script.to_string()],
        port_flag: "-port".to_string(),
        url_flag: "-quickurl".to_string(),
        output_flag: "-quickout".to_string(),
    }
}

fn test_config(dir: &Path, scanner_script: &str) -> AppConfig {
    let mut config = create_default_config();
    config.orchestrator.poll_interval_ms = 30;
    config.orchestrator.stable_samples = 3;
    config.scanner_tool = sh_scanner(scanner_script);
    config.paths.reports_dir = dir.join("reports");
    config.paths.requests_dir = dir.join("requests");
    config
}

fn make_session(
    config: AppConfig,
) -> (
    ScanSession,
    UnboundedReceiver<SessionEvent>,
    Arc<PortAllocator>,
    Arc<CaptureStore>,
) {
    let config = Arc::new(config);
    let ports = Arc::new(PortAllocator::new(
        config.orchestrator.port_min,
        config.orchestrator.port_max,
    ));
    let store = Arc::new(CaptureStore::new(config.orchestrator.retention_secs));
    let (session, rx) = ScanSession::new(
        "test-session".to_string(),
        config,
        Arc::clone(&ports),
        Arc::clone(&store),
    );
    (session, rx, ports, store)
}

async fn collect_until_terminal(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for a terminal event")
            .expect("event channel closed before a terminal event");
        let terminal = event.event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// After the terminal event the channel must stay silent; even progress
/// events from a reader losing the teardown race may not slip through.
async fn assert_silent_after_terminal(rx: &mut UnboundedReceiver<SessionEvent>) {
    tokio::time::sleep(Duration::from_millis(300)).await;
    if let Ok(event) = rx.try_recv() {
        panic!("event delivered after the terminal one: {:?}", event.event);
    }
}

fn position(events: &[SessionEvent], wanted: &ScanEvent) -> Option<usize> {
    events.iter().position(|e| &e.event == wanted)
}

#[tokio::test]
async fn test_full_scan_reaches_write_verified() {
    let dir = tempfile::tempdir().unwrap();
    // Echo the scanner's phase markers, write the artifact in one shot,
    // then linger so the supervisor has to kill us.
    let script = "echo 'Spidering target'; \
                  echo 'Active scanning target'; \
                  echo 'Attack complete'; \
                  echo '<report/>' > \"$5\"; \
                  sleep 5";
    let (session, mut rx, ports, _) = make_session(test_config(dir.path(), script));

    let artifact = session.start_scan("http://example.com").await.unwrap();
    let events = collect_until_terminal(&mut rx).await;

    let terminal = events.last().unwrap();
    assert_eq!(terminal.event, ScanEvent::WriteVerified);
    assert_eq!(
        terminal.detail.as_deref(),
        Some(artifact.display().to_string().as_str())
    );

    // Phase events preserve their stream order.
    let spider = position(&events, &ScanEvent::Spidering).expect("spidering event");
    let active = position(&events, &ScanEvent::ActiveScan).expect("active-scan event");
    let attack = position(&events, &ScanEvent::AttackComplete).expect("attack-complete event");
    assert!(spider < active && active < attack);
    assert!(position(&events, &ScanEvent::Started).unwrap() < spider);
    assert!(position(&events, &ScanEvent::Writing).is_some());

    assert_eq!(ports.in_use_count(), 0, "port not released");
    assert_silent_after_terminal(&mut rx).await;
}

#[tokio::test]
async fn test_stderr_wins_the_terminal_race() {
    let dir = tempfile::tempdir().unwrap();
    // The artifact is written immediately, but stderr fires before the
    // poller can accumulate its stability samples: exactly one terminal
    // path may execute.
    let script = "echo '<report/>' > \"$5\"; echo 'java.io.IOException: boom' >&2; sleep 5";
    let (session, mut rx, ports, _) = make_session(test_config(dir.path(), script));

    session.start_scan("http://example.com").await.unwrap();
    let events = collect_until_terminal(&mut rx).await;

    let terminal = events.last().unwrap();
    assert_eq!(terminal.event, ScanEvent::Crashed);
    assert!(terminal.detail.as_deref().unwrap().contains("boom"));

    assert_eq!(ports.in_use_count(), 0, "port not released exactly once");
    assert_silent_after_terminal(&mut rx).await;
}

#[tokio::test]
async fn test_abnormal_exit_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let script = "exit 3";
    let (session, mut rx, ports, _) = make_session(test_config(dir.path(), script));

    session.start_scan("http://example.com").await.unwrap();
    let events = collect_until_terminal(&mut rx).await;

    assert_eq!(events.last().unwrap().event, ScanEvent::Crashed);
    assert_eq!(ports.in_use_count(), 0);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (session, mut rx, ports, _) = make_session(test_config(dir.path(), "sleep 5"));

    session.start_scan("http://example.com").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.cancel();
    session.cancel();

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(events.last().unwrap().event, ScanEvent::Cancelled);
    assert_eq!(ports.in_use_count(), 0, "double cancel released the port twice");
    assert_silent_after_terminal(&mut rx).await;
}

#[tokio::test]
async fn test_port_range_exhaustion_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), "sleep 5");
    config.orchestrator.port_min = 7450;
    config.orchestrator.port_max = 7450;

    let config = Arc::new(config);
    let ports = Arc::new(PortAllocator::new(7450, 7450));
    let store = Arc::new(CaptureStore::new(30));

    let (first, mut first_rx) = ScanSession::new(
        "first".to_string(),
        Arc::clone(&config),
        Arc::clone(&ports),
        Arc::clone(&store),
    );
    let (second, _second_rx) = ScanSession::new(
        "second".to_string(),
        Arc::clone(&config),
        Arc::clone(&ports),
        Arc::clone(&store),
    );

    first.start_scan("http://example.com").await.unwrap();
    let err = second.start_scan("http://example.com").await.unwrap_err();
    assert!(err.to_string().contains("No free scanner port"));

    first.cancel();
    let events = collect_until_terminal(&mut first_rx).await;
    assert_eq!(events.last().unwrap().event, ScanEvent::Cancelled);
    assert_eq!(ports.in_use_count(), 0);
}

#[tokio::test]
async fn test_spawn_failure_returns_the_port() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), "unused");
    config.scanner_tool.binary = "/nonexistent/scanner-binary".to_string();

    let (session, _rx, ports, _) = make_session(config);
    let err = session.start_scan("http://example.com").await.unwrap_err();
    assert!(err.to_string().contains("Failed to spawn"));
    assert_eq!(ports.in_use_count(), 0);
}

#[tokio::test]
async fn test_unwritable_reports_dir_returns_the_port() {
    let dir = tempfile::tempdir().unwrap();
    // Parent the reports dir under a regular file so create_dir_all fails.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();

    let mut config = test_config(dir.path(), "sleep 5");
    config.paths.reports_dir = blocker.join("reports");

    let (session, _rx, ports, _) = make_session(config);
    assert!(session.start_scan("http://example.com").await.is_err());
    assert_eq!(ports.in_use_count(), 0, "port leaked on the reports-dir error path");
}

#[tokio::test]
async fn test_invalid_target_is_rejected_before_any_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _rx, ports, _) = make_session(test_config(dir.path(), "sleep 5"));

    let err = session.start_scan("http://").await.unwrap_err();
    assert!(err.to_string().contains("Invalid target URL"));
    assert_eq!(ports.in_use_count(), 0);
}

#[tokio::test]
async fn test_injection_flow_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), "sleep 5");
    // Injection tool stand-in: one safe warning, one safe critical, clean
    // exit after a pause so stdout is fully consumed first.
    config.injection_tool.binary = "sh".to_string();
    config.injection_tool.base_args = vec![
        "-c".to_string(),
        "echo '[WARNING] parameter does not seem to be injectable'; \
         echo '[CRITICAL] all tested parameters appear to be not injectable'; \
         sleep 1"
            .to_string(),
    ];

    let (session, mut rx, _, store) = make_session(config);

    // The proxy would normally feed the store; inject the capture directly.
    let writer = Arc::clone(&store);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        writer.ingest(CompletedCapture {
            host: "target.test".to_string(),
            command: "POST /search HTTP/1.1\n".to_string(),
            headers: "Host: target.test\n".to_string(),
            body: "q=hello&probe=FILLER42\n".to_string(),
            raw: "POST /search HTTP/1.1\nHost: target.test\nq=hello&probe=FILLER42\n".to_string(),
        });
    });

    session
        .start_injection("target.test", "FILLER42", InjectionOptions::default())
        .await
        .unwrap();

    let events = collect_until_terminal(&mut rx).await;
    let terminal = events.last().unwrap();
    assert_eq!(terminal.event, ScanEvent::InjectionComplete);

    let waiting = position(&events, &ScanEvent::ProxyWaiting).expect("proxy-waiting event");
    let matched = position(&events, &ScanEvent::CaptureMatched).expect("capture-matched event");
    let started = position(&events, &ScanEvent::InjectionStarted).expect("injection-started");
    assert!(waiting < matched && matched < started);

    assert!(position(&events, &ScanEvent::InjectionWarningSafe).is_some());
    assert!(position(&events, &ScanEvent::InjectionCriticalSafe).is_some());

    // The exported request file carries the redacted body.
    let matched_event = &events[matched];
    let exported = std::fs::read_to_string(matched_event.detail.as_deref().unwrap()).unwrap();
    assert!(exported.contains("probe=*"));
    assert!(!exported.contains("FILLER42"));

    assert_silent_after_terminal(&mut rx).await;
}

#[tokio::test]
async fn test_injection_cancel_while_waiting_for_capture() {
    let dir = tempfile::tempdir().unwrap();
    let (session, mut rx, _, _) = make_session(test_config(dir.path(), "sleep 5"));
    let session = Arc::new(session);

    let canceller = Arc::clone(&session);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    // No capture ever arrives; the cancel flag must end the wait.
    session
        .start_injection("silent.test", "NEVER", InjectionOptions::default())
        .await
        .unwrap();

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(events.last().unwrap().event, ScanEvent::Cancelled);
    assert_silent_after_terminal(&mut rx).await;
}
