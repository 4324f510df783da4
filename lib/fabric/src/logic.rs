// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! User-supplied logic traits and the narrow facades they program against.
//!
//! Handlers are invoked sequentially within one partition; there is no
//! concurrency inside a partition instance. The facade handles passed to
//! handlers are valid only for the duration of the call — the borrow makes
//! retaining one impossible.
//!
//! The source system shipped separate symmetric and "loose" (asymmetric)
//! trait families; here both are instantiations of one trait, with the
//! symmetric mode being `Pull == Push`.

use crate::protocols::{ParamId, PartitionIdx};
use crate::Result;

/// Per-partition facts handed to `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionContext {
    /// Index of this partition within its own tier.
    pub partition: PartitionIdx,
    /// Worker parallelism `W` of the job.
    pub workers: u32,
    /// Server parallelism `S` of the job.
    pub servers: u32,
}

/// What worker logic may do during a handler invocation.
pub trait ParameterServerClient<U, WOut> {
    /// Request the current value of a parameter. The answer arrives later
    /// through [`WorkerLogic::on_pull_recv`].
    fn pull(&mut self, id: ParamId) -> Result<()>;

    /// Send an update delta for a parameter.
    fn push(&mut self, id: ParamId, delta: U) -> Result<()>;

    /// Emit a worker output record.
    fn output(&mut self, out: WOut) -> Result<()>;
}

/// Training logic hosted on each worker partition.
pub trait WorkerLogic: Send + 'static {
    /// One training record.
    type Record: Send + 'static;
    /// Parameter value received on pull answers.
    type Pull: Send + 'static;
    /// Update delta sent on pushes. Equal to [`Self::Pull`] in symmetric mode.
    type Push: Send + 'static;
    /// Worker output record.
    type Output: Send + 'static;

    fn open(&mut self, _ctx: &PartitionContext) -> Result<()> {
        Ok(())
    }

    /// Called once per training record. May issue any number of pulls,
    /// pushes, and outputs.
    fn on_recv(
        &mut self,
        record: Self::Record,
        client: &mut dyn ParameterServerClient<Self::Push, Self::Output>,
    ) -> Result<()>;

    /// Called when a pull answer arrives.
    fn on_pull_recv(
        &mut self,
        id: ParamId,
        value: Self::Pull,
        client: &mut dyn ParameterServerClient<Self::Push, Self::Output>,
    ) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Worker logic that additionally carries a local read-mostly replica,
/// preloaded through the double-sided model load.
pub trait ModelReplicaWorkerLogic: WorkerLogic {
    /// Apply one worker-side model record to the local replica.
    fn update_model(&mut self, id: ParamId, value: Self::Pull) -> Result<()>;
}

/// What parameter-server logic may do during a handler invocation.
pub trait ParameterServer<V, SOut> {
    /// Answer a pull, addressed to the issuing worker partition.
    fn answer_pull(&mut self, id: ParamId, value: V, worker_partition: PartitionIdx) -> Result<()>;

    /// Emit a server output record.
    fn output(&mut self, out: SOut) -> Result<()>;
}

/// Parameter storage logic hosted on each server partition.
pub trait ParameterServerLogic: Send + 'static {
    /// Parameter value sent back on pulls.
    type Pull: Send + 'static;
    /// Update delta received on pushes.
    type Push: Send + 'static;
    /// Server output record.
    type Output: Send + 'static;

    fn open(&mut self, _ctx: &PartitionContext) -> Result<()> {
        Ok(())
    }

    /// Serve a pull; typically ends with
    /// [`ParameterServer::answer_pull`] for `worker_partition`.
    fn on_pull_recv(
        &mut self,
        id: ParamId,
        worker_partition: PartitionIdx,
        ps: &mut dyn ParameterServer<Self::Pull, Self::Output>,
    ) -> Result<()>;

    /// Fold a delta into stored state.
    fn on_push_recv(
        &mut self,
        id: ParamId,
        delta: Self::Push,
        ps: &mut dyn ParameterServer<Self::Pull, Self::Output>,
    ) -> Result<()>;

    /// Drain. The only point at which the default store emits its snapshot.
    fn close(&mut self, _ps: &mut dyn ParameterServer<Self::Pull, Self::Output>) -> Result<()> {
        Ok(())
    }
}
