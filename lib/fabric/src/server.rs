// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Server partition task.
//!
//! One task per server partition, draining the fan-in channel from all
//! workers and driving the user [`ParameterServerLogic`] sequentially.
//!
//! In a model-load job the task starts with an end-of-model countdown equal
//! to the worker parallelism. Until it reaches zero, pushes apply normally
//! but every pull is deferred; the deferred pulls replay in arrival order
//! once the last worker has reported end of model. The task exits when all
//! workers have dropped their senders, closing the logic exactly once —
//! the point where the default store emits its snapshot.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::codec::{PsReceiver, PsSender};
use crate::error::FabricError;
use crate::logic::{ParameterServer, ParameterServerLogic, PartitionContext};
use crate::monitor::IterationMonitor;
use crate::partition::ServerToWorkerPartitioner;
use crate::protocols::{
    JobOutput, ParamId, PartitionIdx, ServerReply, ServerToWorker, WorkerOp, WorkerToServer,
};
use crate::Result;

/// Per-invocation facade handed to parameter-server-logic handlers.
pub(crate) struct ServerHandle<'a, V, SOut, WOut, PS, RT> {
    pub(crate) sender: &'a mut PS,
    pub(crate) router: &'a RT,
    pub(crate) worker_txs: &'a [mpsc::UnboundedSender<ServerToWorker<V>>],
    pub(crate) out_tx: &'a mpsc::UnboundedSender<JobOutput<WOut, SOut>>,
    pub(crate) monitor: &'a IterationMonitor,
    pub(crate) workers: u32,
}

impl<V, SOut, WOut, PS, RT> ParameterServer<V, SOut> for ServerHandle<'_, V, SOut, WOut, PS, RT>
where
    V: Send + 'static,
    SOut: Send + 'static,
    WOut: Send + 'static,
    PS: PsSender<V>,
    RT: ServerToWorkerPartitioner<V>,
{
    fn answer_pull(&mut self, id: ParamId, value: V, worker_partition: PartitionIdx) -> Result<()> {
        let mut result = Ok(());
        let router = self.router;
        let worker_txs = self.worker_txs;
        let monitor = self.monitor;
        let workers = self.workers;
        self.sender.on_pull_answer(id, value, worker_partition, &mut |msg| {
            if result.is_err() {
                return;
            }
            match router.partition(&msg, workers) {
                Ok(target) if (target as usize) < worker_txs.len() => {
                    // A send to a worker that already shut down goes nowhere;
                    // late answers are lost by design of the teardown order.
                    let _ = worker_txs[target as usize].send(msg);
                    monitor.record();
                }
                Ok(target) => {
                    result = Err(FabricError::routing(format!(
                        "server-to-worker partitioner returned {target} outside [0, {workers})"
                    ))
                    .into());
                }
                Err(e) => result = Err(e.into()),
            }
        });
        result
    }

    fn output(&mut self, out: SOut) -> Result<()> {
        let _ = self.out_tx.send(JobOutput::Server(out));
        Ok(())
    }
}

pub(crate) struct ServerTask<PL, PR, PS, RT, WOut>
where
    PL: ParameterServerLogic,
{
    pub(crate) partition: PartitionIdx,
    pub(crate) workers: u32,
    pub(crate) servers: u32,
    pub(crate) logic: PL,
    pub(crate) receiver: PR,
    pub(crate) sender: PS,
    pub(crate) router: RT,
    pub(crate) rx: mpsc::UnboundedReceiver<WorkerToServer<PL::Push>>,
    pub(crate) worker_txs: Vec<mpsc::UnboundedSender<ServerToWorker<PL::Pull>>>,
    pub(crate) out_tx: mpsc::UnboundedSender<JobOutput<WOut, PL::Output>>,
    pub(crate) monitor: Arc<IterationMonitor>,
    /// `Some(W)` at open in model-load jobs; `None` once the barrier lifted.
    pub(crate) eom_remaining: Option<u32>,
    /// Emit a synthetic keepalive answer per push while loading
    /// (double-sided model load only).
    pub(crate) keepalive: bool,
}

impl<PL, PR, PS, RT, WOut> ServerTask<PL, PR, PS, RT, WOut>
where
    PL: ParameterServerLogic,
    PR: PsReceiver<PL::Push>,
    PS: PsSender<PL::Pull>,
    RT: ServerToWorkerPartitioner<PL::Pull>,
    WOut: Send + 'static,
{
    pub(crate) async fn run(mut self) -> Result<()> {
        let ctx = PartitionContext {
            partition: self.partition,
            workers: self.workers,
            servers: self.servers,
        };
        self.logic.open(&ctx)?;
        debug!(partition = self.partition, "server partition open");

        let mut pending_pulls: Vec<(ParamId, PartitionIdx)> = Vec::new();

        while let Some(msg) = self.rx.recv().await {
            if matches!(msg.op, WorkerOp::EndOfModel) {
                self.note_end_of_model(&mut pending_pulls)?;
                continue;
            }

            let mut pulls: Vec<(ParamId, PartitionIdx)> = Vec::new();
            let mut pushes: Vec<(ParamId, PL::Push)> = Vec::new();
            self.receiver.on_worker_msg(
                msg,
                &mut |id, worker_partition| {
                    pulls.push((id, worker_partition));
                    Ok(())
                },
                &mut |id, delta| {
                    pushes.push((id, delta));
                    Ok(())
                },
            )?;

            let loading = self.eom_remaining.is_some();
            for (id, delta) in pushes {
                self.dispatch_push(id, delta)?;
                if loading && self.keepalive {
                    self.send_keepalive(id);
                }
            }
            for (id, worker_partition) in pulls {
                if loading {
                    trace!(
                        partition = self.partition,
                        id,
                        from = worker_partition,
                        "deferring pull until end of model"
                    );
                    pending_pulls.push((id, worker_partition));
                } else {
                    self.dispatch_pull(id, worker_partition)?;
                }
            }
        }

        // All workers dropped their senders: the job is tearing down.
        self.close_logic()?;
        debug!(partition = self.partition, "server partition closed");
        Ok(())
    }

    fn note_end_of_model(&mut self, pending: &mut Vec<(ParamId, PartitionIdx)>) -> Result<()> {
        let Some(remaining) = self.eom_remaining.as_mut() else {
            return Err(FabricError::protocol(
                "unexpected end-of-model marker outside a model-load job",
            )
            .into());
        };
        *remaining -= 1;
        trace!(
            partition = self.partition,
            remaining = *remaining,
            "end-of-model marker received"
        );
        if self.eom_remaining == Some(0) {
            self.eom_remaining = None;
            debug!(
                partition = self.partition,
                deferred = pending.len(),
                "all workers finished loading; replaying deferred pulls"
            );
            for (id, worker_partition) in pending.drain(..) {
                self.dispatch_pull(id, worker_partition)?;
            }
        }
        Ok(())
    }

    fn dispatch_pull(&mut self, id: ParamId, worker_partition: PartitionIdx) -> Result<()> {
        let mut ps = ServerHandle {
            sender: &mut self.sender,
            router: &self.router,
            worker_txs: self.worker_txs.as_slice(),
            out_tx: &self.out_tx,
            monitor: self.monitor.as_ref(),
            workers: self.workers,
        };
        self.logic.on_pull_recv(id, worker_partition, &mut ps)
    }

    fn dispatch_push(&mut self, id: ParamId, delta: PL::Push) -> Result<()> {
        let mut ps = ServerHandle {
            sender: &mut self.sender,
            router: &self.router,
            worker_txs: self.worker_txs.as_slice(),
            out_tx: &self.out_tx,
            monitor: self.monitor.as_ref(),
            workers: self.workers,
        };
        self.logic.on_push_recv(id, delta, &mut ps)
    }

    /// Synthetic answer that keeps the feedback edge live during a bulk
    /// load. Target choice is deterministic so the load path stays
    /// reproducible.
    fn send_keepalive(&self, id: ParamId) {
        let target = id.rem_euclid(self.workers as i32) as PartitionIdx;
        let _ = self.worker_txs[target as usize].send(ServerToWorker {
            worker_partition: target,
            reply: ServerReply::EndOfModelAck,
        });
        self.monitor.record();
    }

    fn close_logic(&mut self) -> Result<()> {
        let mut ps = ServerHandle {
            sender: &mut self.sender,
            router: &self.router,
            worker_txs: self.worker_txs.as_slice(),
            out_tx: &self.out_tx,
            monitor: self.monitor.as_ref(),
            workers: self.workers,
        };
        self.logic.close(&mut ps)
    }
}
