// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Quiescence detection for the feedback loop.
//!
//! The monitor records the instant of every record traversing the feedback
//! edge (server -> worker). The watchdog cancels the job token once that
//! edge has been idle for the configured wait — the only normal termination
//! path of a job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct IterationMonitor {
    last_activity: Mutex<Instant>,
}

impl IterationMonitor {
    /// Job start counts as activity, so a job gets one full wait interval
    /// before it can be declared idle.
    pub fn new() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Note a record traversing the feedback edge.
    pub fn record(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

impl Default for IterationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel `token` once `monitor` has been idle for `wait`.
///
/// Polls at a quarter of the wait interval, so termination lags the deadline
/// by at most ~25%.
pub(crate) async fn watchdog(monitor: Arc<IterationMonitor>, wait: Duration, token: CancellationToken) {
    let tick = (wait / 4).max(Duration::from_millis(1));
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(tick) => {}
        }
        let idle = monitor.idle_for();
        if idle >= wait {
            tracing::info!(idle_ms = idle.as_millis() as u64, "iteration idle, terminating job");
            token.cancel();
            return;
        }
    }
}
