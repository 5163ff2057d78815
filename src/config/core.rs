// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Orchestrator Configuration
 * Core configuration structures for the subprocess orchestration engine
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::injection::InjectionOptions;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub scanner_tool: ScannerToolConfig,
    pub proxy_tool: ProxyToolConfig,
    pub injection_tool: InjectionToolConfig,
    pub paths: PathsConfig,
}

/// Timing and resource knobs for the orchestration core.
///
/// The poll interval and stability sample count are tunable heuristics, not
/// protocol facts; the scanner writes its artifact incrementally with no
/// explicit completion signal on the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Lowest port handed to scanner subprocesses
    pub port_min: u16,
    /// Highest port handed to scanner subprocesses
    pub port_max: u16,
    /// Artifact size sampling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Consecutive equal-size samples required to declare the artifact done
    pub stable_samples: u32,
    /// Seconds a captured request survives before the retention sweep drops it
    pub retention_secs: u64,
    /// Interval between retention sweeps, in seconds
    pub sweep_interval_secs: u64,
    /// Interval at which a dead proxy subprocess is respawned, in seconds
    pub respawn_interval_secs: u64,
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn respawn_interval(&self) -> Duration {
        Duration::from_secs(self.respawn_interval_secs)
    }
}

/// Command-line shape of the external scanner tool.
///
/// Flag names are configuration data so a tool upgrade that renames its
/// flags never touches the spawn path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerToolConfig {
    pub binary: String,
    pub base_args: Vec<String>,
    pub port_flag: String,
    pub url_flag: String,
    pub output_flag: String,
}

impl ScannerToolConfig {
    /// Assemble the full scanner invocation for one scan.
    pub fn command_line(&self, port: u16, url: &str, artifact: &Path) -> (String, Vec<String>) {
        let mut args = self.base_args.clone();
        args.push(self.port_flag.clone());
        args.push(port.to_string());
        args.push(self.url_flag.clone());
        args.push(url.to_string());
        args.push(self.output_flag.clone());
        args.push(artifact.display().to_string());
        (self.binary.clone(), args)
    }
}

/// Command-line shape of the intercepting proxy tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyToolConfig {
    pub binary: String,
    pub script_flag: String,
    pub script: PathBuf,
    pub port_flag: String,
    pub port: u16,
}

impl ProxyToolConfig {
    pub fn command_line(&self) -> (String, Vec<String>) {
        let args = vec![
            self.script_flag.clone(),
            self.script.display().to_string(),
            self.port_flag.clone(),
            self.port.to_string(),
        ];
        (self.binary.clone(), args)
    }
}

/// Command-line shape of the injection testing tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionToolConfig {
    pub binary: String,
    pub base_args: Vec<String>,
    pub request_flag: String,
    pub dbms_flag: String,
    pub level_flag: String,
    pub risk_flag: String,
    pub batch_flag: String,
}

impl InjectionToolConfig {
    /// Assemble the injection tool invocation for one captured request file.
    pub fn command_line(
        &self,
        request_file: &Path,
        options: &InjectionOptions,
    ) -> (String, Vec<String>) {
        let mut args = self.base_args.clone();
        args.push(self.request_flag.clone());
        args.push(request_file.display().to_string());
        if let Some(dbms) = &options.dbms {
            args.push(format!("{}={}", self.dbms_flag, dbms));
        }
        if let Some(level) = options.level {
            args.push(format!("{}={}", self.level_flag, level));
        }
        if let Some(risk) = options.risk {
            args.push(format!("{}={}", self.risk_flag, risk));
        }
        args.push(self.batch_flag.clone());
        (self.binary.clone(), args)
    }
}

/// Output directories for scan artifacts and exported requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub reports_dir: PathBuf,
    pub requests_dir: PathBuf,
}

pub fn create_default_config() -> AppConfig {
    AppConfig {
        orchestrator: OrchestratorConfig {
            port_min: 7000,
            port_max: 7998,
            poll_interval_ms: 1000,
            stable_samples: 4,
            retention_secs: 30,
            sweep_interval_secs: 10,
            respawn_interval_secs: 3,
        },
        scanner_tool: ScannerToolConfig {
            binary: "zap.sh".to_string(),
            base_args: vec!["-cmd".to_string(), "-quickprogress".to_string()],
            port_flag: "-port".to_string(),
            url_flag: "-quickurl".to_string(),
            output_flag: "-quickout".to_string(),
        },
        proxy_tool: ProxyToolConfig {
            binary: "mitmdump".to_string(),
            script_flag: "-s".to_string(),
            script: PathBuf::from("scripts/capture_proxy.py"),
            port_flag: "-p".to_string(),
            port: 7999,
        },
        injection_tool: InjectionToolConfig {
            binary: "sqlmap".to_string(),
            base_args: Vec::new(),
            request_flag: "-r".to_string(),
            dbms_flag: "--dbms".to_string(),
            level_flag: "--level".to_string(),
            risk_flag: "--risk".to_string(),
            batch_flag: "--batch".to_string(),
        },
        paths: PathsConfig {
            reports_dir: PathBuf::from("user_data/reports"),
            requests_dir: PathBuf::from("user_data/requests"),
        },
    }
}

impl AppConfig {
    /// Load configuration from environment variables with sensible defaults
    ///
    /// Supports the following environment variables:
    /// - SCANNER_BIN: scanner tool binary path
    /// - PROXY_BIN: proxy tool binary path
    /// - INJECTION_BIN: injection tool binary path
    /// - PORT_MIN / PORT_MAX: scanner port range bounds
    /// - PROXY_PORT: fixed proxy listen port
    /// - POLL_INTERVAL_MS: artifact size sampling interval
    /// - STABLE_SAMPLES: stability sample count
    /// - RETENTION_SECS: captured request retention window
    /// - SWEEP_INTERVAL_SECS: retention sweep interval
    /// - REPORTS_DIR / REQUESTS_DIR: output directories
    pub fn from_env() -> Result<Self> {
        let mut config = create_default_config();

        if let Ok(bin) = std::env::var("SCANNER_BIN") {
            config.scanner_tool.binary = bin;
        }

        if let Ok(bin) = std::env::var("PROXY_BIN") {
            config.proxy_tool.binary = bin;
        }

        if let Ok(bin) = std::env::var("INJECTION_BIN") {
            config.injection_tool.binary = bin;
        }

        if let Ok(min) = std::env::var("PORT_MIN") {
            config.orchestrator.port_min = min
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid PORT_MIN value"))?;
        }

        if let Ok(max) = std::env::var("PORT_MAX") {
            config.orchestrator.port_max = max
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid PORT_MAX value"))?;
        }

        if let Ok(port) = std::env::var("PROXY_PORT") {
            config.proxy_tool.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid PROXY_PORT value"))?;
        }

        if let Ok(interval) = std::env::var("POLL_INTERVAL_MS") {
            config.orchestrator.poll_interval_ms = interval
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid POLL_INTERVAL_MS value"))?;
        }

        if let Ok(samples) = std::env::var("STABLE_SAMPLES") {
            config.orchestrator.stable_samples = samples
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid STABLE_SAMPLES value"))?;
        }

        if let Ok(retention) = std::env::var("RETENTION_SECS") {
            config.orchestrator.retention_secs = retention
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RETENTION_SECS value"))?;
        }

        if let Ok(sweep) = std::env::var("SWEEP_INTERVAL_SECS") {
            config.orchestrator.sweep_interval_secs = sweep
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid SWEEP_INTERVAL_SECS value"))?;
        }

        if let Ok(dir) = std::env::var("REPORTS_DIR") {
            config.paths.reports_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("REQUESTS_DIR") {
            config.paths.requests_dir = PathBuf::from(dir);
        }

        if config.orchestrator.port_min > config.orchestrator.port_max {
            anyhow::bail!("PORT_MIN must not exceed PORT_MAX");
        }

        Ok(config)
    }
}
