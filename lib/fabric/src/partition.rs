// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Partitioning of messages onto the parallel partition spaces.

use crate::error::FabricError;
use crate::protocols::{ParamId, PartitionIdx, ServerToWorker, WorkerOp, WorkerToServer};

/// The home server partition of a parameter: `|id| mod S`.
///
/// Deterministic by construction — placement of numeric ids is part of the
/// observable contract, not an implementation detail.
pub fn home_partition(id: ParamId, servers: u32) -> PartitionIdx {
    ((id as i64).unsigned_abs() % u64::from(servers)) as PartitionIdx
}

/// Maps each worker-to-server message to a server partition in `[0, S)`.
pub trait WorkerToServerPartitioner<U>: Send + 'static {
    fn partition(&self, msg: &WorkerToServer<U>, servers: u32) -> PartitionIdx;
}

/// Default routing: pulls and pushes go to the parameter's home partition.
///
/// `EndOfModel` markers never pass through a partitioner — the fabric fans
/// them out to every server partition explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPartitioner;

impl<U> WorkerToServerPartitioner<U> for HashPartitioner
where
    U: Send + 'static,
{
    fn partition(&self, msg: &WorkerToServer<U>, servers: u32) -> PartitionIdx {
        match msg.op {
            WorkerOp::Pull(id) | WorkerOp::Push(id, _) => home_partition(id, servers),
            WorkerOp::EndOfModel => 0,
        }
    }
}

/// Maps each server-to-worker message to a worker partition in `[0, W)`.
pub trait ServerToWorkerPartitioner<V>: Send + 'static {
    fn partition(&self, msg: &ServerToWorker<V>, workers: u32)
        -> Result<PartitionIdx, FabricError>;
}

/// Default feedback routing: the embedded `worker_partition` tag *is* the
/// target. An out-of-range tag means a broken sender codec and is fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedPartitioner;

impl<V> ServerToWorkerPartitioner<V> for TaggedPartitioner
where
    V: Send + 'static,
{
    fn partition(
        &self,
        msg: &ServerToWorker<V>,
        workers: u32,
    ) -> Result<PartitionIdx, FabricError> {
        if msg.worker_partition >= workers {
            return Err(FabricError::routing(
                "Pull answer key should be the partition ID itself",
            ));
        }
        Ok(msg.worker_partition)
    }
}
