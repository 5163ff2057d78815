// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scanner Port Allocator
 * Hands out unique ports from a bounded range for scanner subprocesses
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;

struct PoolState {
    cursor: u16,
    in_use: HashSet<u16>,
}

/// Process-wide pool of scanner ports.
///
/// Allocation advances a rotating cursor over `[port_min, port_max]`,
/// wrapping at the top of the range and skipping ports still held by live
/// subprocesses. Callers are expected to bound concurrent scans below the
/// range size; `allocate` reports exhaustion instead of blocking.
pub struct PortAllocator {
    port_min: u16,
    port_max: u16,
    state: Mutex<PoolState>,
}

impl PortAllocator {
    pub fn new(port_min: u16, port_max: u16) -> Self {
        assert!(port_min <= port_max, "port range must be non-empty");
        Self {
            port_min,
            port_max,
            state: Mutex::new(PoolState {
                cursor: port_min,
                in_use: HashSet::new(),
            }),
        }
    }

    pub fn port_min(&self) -> u16 {
        self.port_min
    }

    pub fn port_max(&self) -> u16 {
        self.port_max
    }

    /// Take the next free port after the cursor, or `None` when every port
    /// in the range is held.
    pub fn allocate(&self) -> Option<u16> {
        let mut state = self.state.lock();
        let span = (self.port_max - self.port_min) as u32 + 1;

        for _ in 0..span {
            let candidate = state.cursor;
            state.cursor = if candidate >= self.port_max {
                self.port_min
            } else {
                candidate + 1
            };
            if state.in_use.insert(candidate) {
                debug!(port = candidate, "Allocated scanner port");
                return Some(candidate);
            }
        }

        None
    }

    /// Return a port to the pool, making it eligible for reuse on a future
    /// wrap. Releasing a port that is not held is a no-op.
    pub fn release(&self, port: u16) {
        let mut state = self.state.lock();
        if state.in_use.remove(&port) {
            debug!(port, "Released scanner port");
        }
    }

    /// Number of ports currently assigned to live subprocesses.
    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }
}
