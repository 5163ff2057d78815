// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use luotain::capture::{CaptureMarkers, CaptureStore};
use luotain::config::AppConfig;
use luotain::events::ScanEvent;
use luotain::injection::InjectionOptions;
use luotain::ports::PortAllocator;
use luotain::proxy::ProxySupervisor;
use luotain::session::ScanSession;

#[derive(Parser, Debug)]
#[command(name = "luotain", about = "Bountyy Oy - scan orchestration engine")]
struct Cli {
    /// Target URL to run a full scan against
    #[arg(long)]
    target: Option<String>,

    /// Host to wait for a proxy capture from (injection test mode)
    #[arg(long)]
    injection_host: Option<String>,

    /// Filler token expected inside the captured request body
    #[arg(long)]
    filler: Option<String>,

    /// Database backend hint passed to the injection tool
    #[arg(long)]
    dbms: Option<String>,

    /// Injection tool test level
    #[arg(long)]
    level: Option<u32>,

    /// Injection tool risk level
    #[arg(long)]
    risk: Option<u32>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("luotain-worker")
        .enable_all()
        .build()?;

    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    info!("Luotain orchestration engine v1.0.0 - Starting");

    let config = Arc::new(config);
    let ports = Arc::new(PortAllocator::new(
        config.orchestrator.port_min,
        config.orchestrator.port_max,
    ));
    let store = Arc::new(CaptureStore::new(config.orchestrator.retention_secs));

    let (session, mut events) = ScanSession::new(
        Uuid::new_v4().to_string(),
        Arc::clone(&config),
        Arc::clone(&ports),
        Arc::clone(&store),
    );

    let proxy = match (&cli.injection_host, &cli.filler) {
        (Some(host), Some(filler)) => {
            // Injection mode needs the shared proxy up before any capture
            // can arrive.
            let proxy = Arc::new(ProxySupervisor::new(
                config.proxy_tool.clone(),
                CaptureMarkers::default(),
                Arc::clone(&store),
                config.orchestrator.sweep_interval(),
                config.orchestrator.respawn_interval(),
            ));
            proxy.start();

            let options = InjectionOptions {
                dbms: cli.dbms.clone(),
                level: cli.level,
                risk: cli.risk,
            };
            session.start_injection(host, filler, options).await?;
            Some(proxy)
        }
        _ => {
            let target = cli.target.as_deref().ok_or_else(|| {
                anyhow::anyhow!("either --target or --injection-host with --filler is required")
            })?;
            let artifact = session.start_scan(target).await?;
            info!(artifact = %artifact.display(), "Scan started");
            None
        }
    };

    while let Some(event) = events.recv().await {
        // Machine-readable event stream on stdout; diagnostics stay on the
        // tracing subscriber.
        println!("{}", serde_json::to_string(&event)?);
        info!(event = ?event.event, detail = ?event.detail, "Session event");
        if event.event.is_terminal() {
            match event.event {
                ScanEvent::Crashed => error!("Session ended in a crash"),
                _ => info!("Session complete"),
            }
            break;
        }
    }

    if let Some(proxy) = proxy {
        proxy.shutdown();
    }

    Ok(())
}
