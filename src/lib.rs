// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Luotain Orchestration Engine
 * Subprocess orchestration and stream state-machine core for driving
 * external security scanning tools
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod capture;
pub mod classifier;
pub mod config;
pub mod events;
pub mod injection;
pub mod poller;
pub mod ports;
pub mod proxy;
pub mod session;
pub mod supervisor;

// Production error handling
pub mod errors;
