// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fabric error taxonomy.
//!
//! Every failure a job can surface falls into one of a fixed set of
//! categories. Configuration errors fail the job at setup; the rest abort a
//! running job by cancelling its token and propagating out of
//! [`crate::job::JobHandle::join`]. The fabric performs no retries.

use crate::protocols::PartitionIdx;

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Rejected at job setup, before any task is spawned.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A routing invariant was broken; indicates a defective codec or
    /// partitioner. Non-recoverable.
    #[error("{0}")]
    Routing(String),

    /// A model-load contract violation.
    #[error("{0}")]
    Bootstrap(String),

    /// A message reached a place the protocol says it never can.
    #[error("{0}")]
    Protocol(String),

    /// A peer partition went away while the job was still running.
    #[error("{side} partition {partition} disconnected")]
    Disconnected {
        side: &'static str,
        partition: PartitionIdx,
    },
}

impl FabricError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn routing(msg: impl Into<String>) -> Self {
        Self::Routing(msg.into())
    }

    pub fn bootstrap(msg: impl Into<String>) -> Self {
        Self::Bootstrap(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time assertion that FabricError stays Send + Sync + 'static so
    // it can cross task boundaries inside JoinHandle results.
    const _: () = {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        fn assert_all() {
            assert_send_sync::<FabricError>();
        }
    };

    #[test]
    fn display_carries_the_message_verbatim() {
        let err = FabricError::routing("Pull answer key should be the partition ID itself");
        assert_eq!(
            err.to_string(),
            "Pull answer key should be the partition ID itself"
        );
    }

    #[test]
    fn config_errors_are_prefixed() {
        let err = FabricError::config("worker parallelism must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid configuration: worker parallelism must be at least 1"
        );
    }

    #[test]
    fn disconnected_names_the_side_and_partition() {
        let err = FabricError::Disconnected {
            side: "server",
            partition: 3,
        };
        assert_eq!(err.to_string(), "server partition 3 disconnected");
    }
}
