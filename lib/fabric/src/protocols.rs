// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire types exchanged between worker and server partitions.
//!
//! One enum per direction. `U` is the push payload a worker sends up,
//! `V` the pull payload a server sends back; the symmetric mode is simply
//! `U == V`. All types are serde-serializable so an alternative transport
//! can frame them, but in-process delivery moves them by value.

use serde::{Deserialize, Serialize};

/// Opaque key of a logical parameter. Its home server partition is
/// `|id| mod S` and never changes within a job.
pub type ParamId = i32;

/// Index of a parallel partition: `[0, W)` for workers, `[0, S)` for servers.
pub type PartitionIdx = u32;

/// Operation carried by a worker-to-server message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerOp<U> {
    /// Read the parameter; the answer comes back to the issuing partition.
    Pull(ParamId),
    /// Fold a delta into the parameter.
    Push(ParamId, U),
    /// Bootstrap barrier marker: this worker partition has forwarded its
    /// entire share of the initial model.
    EndOfModel,
}

/// A message travelling from a worker partition to a server partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerToServer<U> {
    /// The issuing worker partition; pull answers are addressed back to it.
    pub worker_partition: PartitionIdx,
    pub op: WorkerOp<U>,
}

/// Reply carried by a server-to-worker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerReply<V> {
    PullAnswer(ParamId, V),
    /// Synthetic keepalive emitted while a server is still inside the
    /// bootstrap window; semantically ignored by workers.
    EndOfModelAck,
}

/// A message travelling from a server partition back to a worker partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerToWorker<V> {
    /// The target worker partition. The feedback partitioner must treat this
    /// tag as the routing key itself.
    pub worker_partition: PartitionIdx,
    pub reply: ServerReply<V>,
}

/// A record on the job output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutput<W, S> {
    Worker(W),
    Server(S),
}

impl<W, S> JobOutput<W, S> {
    pub fn worker(self) -> Option<W> {
        match self {
            JobOutput::Worker(w) => Some(w),
            JobOutput::Server(_) => None,
        }
    }

    pub fn server(self) -> Option<S> {
        match self {
            JobOutput::Worker(_) => None,
            JobOutput::Server(s) => Some(s),
        }
    }
}

/// One record of the initial-model stream.
///
/// `ServerCopy` values are forwarded to the owning server partition as
/// ordinary pushes; `WorkerCopy` values (double-sided load only) are applied
/// to the local worker replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelRecord<SP, WP> {
    ServerCopy(ParamId, SP),
    WorkerCopy(ParamId, WP),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_message_roundtrips_through_serde() {
        let msg = WorkerToServer {
            worker_partition: 1,
            op: WorkerOp::Push(7, 0.5f64),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WorkerToServer<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn server_message_roundtrips_through_serde() {
        let msg = ServerToWorker {
            worker_partition: 0,
            reply: ServerReply::PullAnswer(4, vec![1.0f32, 2.0]),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerToWorker<Vec<f32>> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn output_projections() {
        let out: JobOutput<i32, (ParamId, i32)> = JobOutput::Server((3, 9));
        assert_eq!(out.clone().worker(), None);
        assert_eq!(out.server(), Some((3, 9)));
    }
}
