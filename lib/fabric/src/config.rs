// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Job configuration.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::FabricError;

/// Sizing and termination parameters for one training job.
///
/// `iteration_wait_ms` bounds how long the feedback loop may stay idle before
/// the job terminates normally. Zero disables idle termination: the job runs
/// until [`crate::job::JobHandle::shutdown`] is called.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(private, name = "build_inner", error = "JobConfigBuilderError"))]
pub struct JobConfig {
    /// Number of worker partitions (`W`). Must be at least 1.
    pub worker_parallelism: u32,

    /// Number of server partitions (`S`). Must be at least 1.
    pub server_parallelism: u32,

    /// Idle interval on the feedback edge after which the job terminates,
    /// in milliseconds. Zero means never.
    #[builder(default = "JobConfig::DEFAULT_ITERATION_WAIT_MS")]
    pub iteration_wait_ms: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobConfigBuilderError {
    #[error("uninitialized field: {0}")]
    UninitializedField(&'static str),
    #[error("{0}")]
    Invalid(String),
}

impl From<derive_builder::UninitializedFieldError> for JobConfigBuilderError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        Self::UninitializedField(e.field_name())
    }
}

impl JobConfig {
    pub const DEFAULT_ITERATION_WAIT_MS: u64 = 10_000;

    pub fn new(worker_parallelism: u32, server_parallelism: u32, iteration_wait_ms: u64) -> Self {
        Self {
            worker_parallelism,
            server_parallelism,
            iteration_wait_ms,
        }
    }

    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder::default()
    }

    /// The idle interval as a [`Duration`], or `None` when idle termination
    /// is disabled.
    pub fn iteration_wait(&self) -> Option<Duration> {
        (self.iteration_wait_ms > 0).then(|| Duration::from_millis(self.iteration_wait_ms))
    }

    pub fn validate(&self) -> Result<(), FabricError> {
        if self.worker_parallelism == 0 {
            return Err(FabricError::config("worker parallelism must be at least 1"));
        }
        if self.server_parallelism == 0 {
            return Err(FabricError::config("server parallelism must be at least 1"));
        }
        Ok(())
    }
}

impl JobConfigBuilder {
    pub fn build(&self) -> Result<JobConfig, JobConfigBuilderError> {
        let config = self.build_inner()?;
        config
            .validate()
            .map_err(|e| JobConfigBuilderError::Invalid(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_the_default_wait() {
        let config = JobConfig::builder()
            .worker_parallelism(4)
            .server_parallelism(2)
            .build()
            .unwrap();
        assert_eq!(config.iteration_wait_ms, JobConfig::DEFAULT_ITERATION_WAIT_MS);
    }

    #[test]
    fn builder_rejects_zero_parallelism() {
        let err = JobConfig::builder()
            .worker_parallelism(0)
            .server_parallelism(2)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("worker parallelism"));
    }

    #[test]
    fn builder_reports_missing_fields() {
        let err = JobConfig::builder().worker_parallelism(1).build().unwrap_err();
        assert!(matches!(err, JobConfigBuilderError::UninitializedField("server_parallelism")));
    }

    #[test]
    fn zero_wait_disables_idle_termination() {
        let config = JobConfig::new(1, 1, 0);
        assert!(config.validate().is_ok());
        assert_eq!(config.iteration_wait(), None);
    }

    #[test]
    fn nonzero_wait_is_a_duration() {
        let config = JobConfig::new(2, 2, 250);
        assert_eq!(config.iteration_wait(), Some(Duration::from_millis(250)));
    }
}
