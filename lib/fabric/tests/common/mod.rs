// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared worker and server logics for the end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ps_fabric::prelude::*;

/// Pushes `1` to the parameter named by each training record.
pub struct IncrementLogic;

impl WorkerLogic for IncrementLogic {
    type Record = ParamId;
    type Pull = i64;
    type Push = i64;
    type Output = ();

    fn on_recv(
        &mut self,
        record: ParamId,
        client: &mut dyn ParameterServerClient<i64, ()>,
    ) -> Result<()> {
        client.push(record, 1)
    }

    fn on_pull_recv(
        &mut self,
        _id: ParamId,
        _value: i64,
        _client: &mut dyn ParameterServerClient<i64, ()>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Pulls the parameter named by each training record and emits the answer.
pub struct PullEchoLogic;

impl WorkerLogic for PullEchoLogic {
    type Record = ParamId;
    type Pull = i64;
    type Push = i64;
    type Output = (ParamId, i64);

    fn on_recv(
        &mut self,
        record: ParamId,
        client: &mut dyn ParameterServerClient<i64, (ParamId, i64)>,
    ) -> Result<()> {
        client.pull(record)
    }

    fn on_pull_recv(
        &mut self,
        id: ParamId,
        value: i64,
        client: &mut dyn ParameterServerClient<i64, (ParamId, i64)>,
    ) -> Result<()> {
        client.output((id, value))
    }
}

/// Pulls on each record, then pushes `1` back after observing the answer.
pub struct PullThenPushLogic;

impl WorkerLogic for PullThenPushLogic {
    type Record = ParamId;
    type Pull = i64;
    type Push = i64;
    type Output = (ParamId, i64);

    fn on_recv(
        &mut self,
        record: ParamId,
        client: &mut dyn ParameterServerClient<i64, (ParamId, i64)>,
    ) -> Result<()> {
        client.pull(record)
    }

    fn on_pull_recv(
        &mut self,
        id: ParamId,
        value: i64,
        client: &mut dyn ParameterServerClient<i64, (ParamId, i64)>,
    ) -> Result<()> {
        client.output((id, value))?;
        client.push(id, 1)
    }
}

/// Tags every pull answer with the partition that observed it.
#[derive(Default)]
pub struct PartitionTagLogic {
    partition: PartitionIdx,
}

impl WorkerLogic for PartitionTagLogic {
    type Record = ParamId;
    type Pull = i64;
    type Push = i64;
    type Output = (PartitionIdx, ParamId, i64);

    fn open(&mut self, ctx: &PartitionContext) -> Result<()> {
        self.partition = ctx.partition;
        Ok(())
    }

    fn on_recv(
        &mut self,
        record: ParamId,
        client: &mut dyn ParameterServerClient<i64, (PartitionIdx, ParamId, i64)>,
    ) -> Result<()> {
        client.pull(record)
    }

    fn on_pull_recv(
        &mut self,
        id: ParamId,
        value: i64,
        client: &mut dyn ParameterServerClient<i64, (PartitionIdx, ParamId, i64)>,
    ) -> Result<()> {
        client.output((self.partition, id, value))
    }
}

/// Counts `close` invocations across all worker partitions.
pub struct CloseCountingLogic {
    pub closes: Arc<AtomicUsize>,
}

impl WorkerLogic for CloseCountingLogic {
    type Record = ParamId;
    type Pull = i64;
    type Push = i64;
    type Output = ();

    fn on_recv(
        &mut self,
        record: ParamId,
        client: &mut dyn ParameterServerClient<i64, ()>,
    ) -> Result<()> {
        client.push(record, 1)
    }

    fn on_pull_recv(
        &mut self,
        _id: ParamId,
        _value: i64,
        _client: &mut dyn ParameterServerClient<i64, ()>,
    ) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Server logic that counts `close` invocations.
pub struct CloseCountingPs {
    pub closes: Arc<AtomicUsize>,
}

impl ParameterServerLogic for CloseCountingPs {
    type Pull = i64;
    type Push = i64;
    type Output = ();

    fn on_pull_recv(
        &mut self,
        id: ParamId,
        worker_partition: PartitionIdx,
        ps: &mut dyn ParameterServer<i64, ()>,
    ) -> Result<()> {
        ps.answer_pull(id, 0, worker_partition)
    }

    fn on_push_recv(
        &mut self,
        _id: ParamId,
        _delta: i64,
        _ps: &mut dyn ParameterServer<i64, ()>,
    ) -> Result<()> {
        Ok(())
    }

    fn close(&mut self, _ps: &mut dyn ParameterServer<i64, ()>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Server logic that reports which partition stored which parameter ids.
#[derive(Default)]
pub struct TrackingPs {
    partition: PartitionIdx,
    seen: Vec<ParamId>,
}

impl ParameterServerLogic for TrackingPs {
    type Pull = i64;
    type Push = i64;
    type Output = (PartitionIdx, ParamId);

    fn open(&mut self, ctx: &PartitionContext) -> Result<()> {
        self.partition = ctx.partition;
        Ok(())
    }

    fn on_pull_recv(
        &mut self,
        id: ParamId,
        worker_partition: PartitionIdx,
        ps: &mut dyn ParameterServer<i64, (PartitionIdx, ParamId)>,
    ) -> Result<()> {
        ps.answer_pull(id, 0, worker_partition)
    }

    fn on_push_recv(
        &mut self,
        id: ParamId,
        _delta: i64,
        _ps: &mut dyn ParameterServer<i64, (PartitionIdx, ParamId)>,
    ) -> Result<()> {
        if !self.seen.contains(&id) {
            self.seen.push(id);
        }
        Ok(())
    }

    fn close(&mut self, ps: &mut dyn ParameterServer<i64, (PartitionIdx, ParamId)>) -> Result<()> {
        for id in self.seen.drain(..) {
            ps.output((self.partition, id))?;
        }
        Ok(())
    }
}

/// Worker logic with a local model replica, for double-sided load tests.
/// Emits `(record, replica_size)` per processed training record.
#[derive(Default)]
pub struct ReplicaLogic {
    replica: HashMap<ParamId, i64>,
}

impl WorkerLogic for ReplicaLogic {
    type Record = ParamId;
    type Pull = i64;
    type Push = i64;
    type Output = (ParamId, usize);

    fn on_recv(
        &mut self,
        record: ParamId,
        client: &mut dyn ParameterServerClient<i64, (ParamId, usize)>,
    ) -> Result<()> {
        client.output((record, self.replica.len()))
    }

    fn on_pull_recv(
        &mut self,
        _id: ParamId,
        _value: i64,
        _client: &mut dyn ParameterServerClient<i64, (ParamId, usize)>,
    ) -> Result<()> {
        Ok(())
    }
}

impl ModelReplicaWorkerLogic for ReplicaLogic {
    fn update_model(&mut self, id: ParamId, value: i64) -> Result<()> {
        self.replica.insert(id, value);
        Ok(())
    }
}
