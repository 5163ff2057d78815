// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

pub mod core;

pub use core::{
    create_default_config, AppConfig, InjectionToolConfig, OrchestratorConfig, PathsConfig,
    ProxyToolConfig, ScannerToolConfig,
};
