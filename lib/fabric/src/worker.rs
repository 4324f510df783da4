// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker partition task.
//!
//! One task per worker partition. It multiplexes three inputs — the training
//! share, the optional model share, and the feedback edge — and drives the
//! user [`WorkerLogic`] sequentially; there is no concurrency inside one
//! partition.
//!
//! In a model-load job the task opens in loading mode: training records are
//! buffered, server-copy model records are forwarded as pushes, and
//! worker-copy records update the local replica. When the model share is
//! exhausted the task emits one `EndOfModel` marker to every server
//! partition, then replays the buffer and behaves like a plain worker.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{WorkerReceiver, WorkerSender};
use crate::error::FabricError;
use crate::logic::{ParameterServerClient, PartitionContext, WorkerLogic};
use crate::partition::WorkerToServerPartitioner;
use crate::protocols::{
    JobOutput, ModelRecord, ParamId, PartitionIdx, ServerReply, ServerToWorker, WorkerOp,
    WorkerToServer,
};
use crate::Result;

/// How a worker-copy model record is applied to the local logic. Jobs
/// without a double-sided load install a rejecting stub here.
pub(crate) type ApplyWorkerCopy<L> =
    fn(&mut L, ParamId, <L as WorkerLogic>::Pull) -> Result<()>;

/// Per-invocation facade handed to worker-logic handlers.
pub(crate) struct ClientHandle<'a, U, WOut, SOut, WS, RT> {
    pub(crate) sender: &'a mut WS,
    pub(crate) router: &'a RT,
    pub(crate) server_txs: &'a [mpsc::UnboundedSender<WorkerToServer<U>>],
    pub(crate) out_tx: &'a mpsc::UnboundedSender<JobOutput<WOut, SOut>>,
    pub(crate) partition: PartitionIdx,
    pub(crate) servers: u32,
}

fn route_to_server<U, RT>(
    router: &RT,
    server_txs: &[mpsc::UnboundedSender<WorkerToServer<U>>],
    servers: u32,
    msg: WorkerToServer<U>,
) -> Result<()>
where
    U: Send + 'static,
    RT: WorkerToServerPartitioner<U>,
{
    let target = router.partition(&msg, servers);
    if target >= servers {
        return Err(FabricError::routing(format!(
            "worker-to-server partitioner returned {target} outside [0, {servers})"
        ))
        .into());
    }
    server_txs[target as usize].send(msg).map_err(|_| {
        FabricError::Disconnected {
            side: "server",
            partition: target,
        }
        .into()
    })
}

impl<U, WOut, SOut, WS, RT> ParameterServerClient<U, WOut>
    for ClientHandle<'_, U, WOut, SOut, WS, RT>
where
    U: Send + 'static,
    WOut: Send + 'static,
    SOut: Send + 'static,
    WS: WorkerSender<U>,
    RT: WorkerToServerPartitioner<U>,
{
    fn pull(&mut self, id: ParamId) -> Result<()> {
        let mut result = Ok(());
        let router = self.router;
        let server_txs = self.server_txs;
        let servers = self.servers;
        self.sender.on_pull(
            id,
            &mut |msg| {
                if result.is_ok() {
                    result = route_to_server(router, server_txs, servers, msg);
                }
            },
            self.partition,
        );
        result
    }

    fn push(&mut self, id: ParamId, delta: U) -> Result<()> {
        let mut result = Ok(());
        let router = self.router;
        let server_txs = self.server_txs;
        let servers = self.servers;
        self.sender.on_push(
            id,
            delta,
            &mut |msg| {
                if result.is_ok() {
                    result = route_to_server(router, server_txs, servers, msg);
                }
            },
            self.partition,
        );
        result
    }

    fn output(&mut self, out: WOut) -> Result<()> {
        // A dropped output receiver means the caller chose to discard them.
        let _ = self.out_tx.send(JobOutput::Worker(out));
        Ok(())
    }
}

pub(crate) struct WorkerTask<L, WS, WR, RT, SOut>
where
    L: WorkerLogic,
{
    pub(crate) partition: PartitionIdx,
    pub(crate) workers: u32,
    pub(crate) servers: u32,
    pub(crate) logic: L,
    pub(crate) sender: WS,
    pub(crate) receiver: WR,
    pub(crate) router: RT,
    pub(crate) training_rx: mpsc::UnboundedReceiver<L::Record>,
    pub(crate) model_rx: Option<mpsc::UnboundedReceiver<ModelRecord<L::Push, L::Pull>>>,
    pub(crate) feedback_rx: mpsc::UnboundedReceiver<ServerToWorker<L::Pull>>,
    pub(crate) server_txs: Vec<mpsc::UnboundedSender<WorkerToServer<L::Push>>>,
    pub(crate) out_tx: mpsc::UnboundedSender<JobOutput<L::Output, SOut>>,
    pub(crate) apply_worker_copy: ApplyWorkerCopy<L>,
    pub(crate) token: CancellationToken,
}

impl<L, WS, WR, RT, SOut> WorkerTask<L, WS, WR, RT, SOut>
where
    L: WorkerLogic,
    WS: WorkerSender<L::Push>,
    WR: WorkerReceiver<L::Pull>,
    RT: WorkerToServerPartitioner<L::Push>,
    SOut: Send + 'static,
{
    pub(crate) async fn run(mut self) -> Result<()> {
        let ctx = PartitionContext {
            partition: self.partition,
            workers: self.workers,
            servers: self.servers,
        };
        self.logic.open(&ctx)?;
        debug!(partition = self.partition, "worker partition open");

        let is_load_job = self.model_rx.is_some();
        let mut model_rx = self.model_rx.take();
        let mut loading = is_load_job;
        let mut model_open = is_load_job;
        let mut training_open = true;
        let mut model_records = 0usize;
        let mut buffered: VecDeque<L::Record> = VecDeque::new();

        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => break,

                rec = async { model_rx.as_mut().expect("model branch enabled without a model share").recv().await }, if model_open => {
                    match rec {
                        Some(ModelRecord::ServerCopy(id, value)) => {
                            model_records += 1;
                            self.forward_model_push(id, value)?;
                        }
                        Some(ModelRecord::WorkerCopy(id, value)) => {
                            model_records += 1;
                            (self.apply_worker_copy)(&mut self.logic, id, value)?;
                        }
                        None => {
                            model_open = false;
                            if model_records == 0 {
                                return Err(FabricError::bootstrap(
                                    "must be a parameter per model partition when loading model",
                                )
                                .into());
                            }
                            self.broadcast_end_of_model()?;
                            loading = false;
                            debug!(
                                partition = self.partition,
                                records = model_records,
                                buffered = buffered.len(),
                                "model share loaded; replaying buffered training records"
                            );
                            while let Some(rec) = buffered.pop_front() {
                                self.handle_record(rec)?;
                            }
                        }
                    }
                }

                msg = self.feedback_rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_answer(msg, is_load_job)?,
                        // Servers only go away on job teardown.
                        None => break,
                    }
                }

                rec = self.training_rx.recv(), if training_open => {
                    match rec {
                        Some(rec) if loading => buffered.push_back(rec),
                        Some(rec) => self.handle_record(rec)?,
                        None => training_open = false,
                    }
                }
            }
        }

        if loading {
            if !buffered.is_empty() {
                warn!(
                    partition = self.partition,
                    dropped = buffered.len(),
                    "terminated during model load; buffered training records were never released"
                );
            }
        } else {
            // Records already handed to this partition are still processed;
            // answers to any pulls they issue may no longer arrive.
            while let Ok(rec) = self.training_rx.try_recv() {
                self.handle_record(rec)?;
            }
        }

        self.logic.close()?;
        debug!(partition = self.partition, "worker partition closed");
        Ok(())
    }

    fn handle_record(&mut self, record: L::Record) -> Result<()> {
        let mut client = ClientHandle {
            sender: &mut self.sender,
            router: &self.router,
            server_txs: self.server_txs.as_slice(),
            out_tx: &self.out_tx,
            partition: self.partition,
            servers: self.servers,
        };
        self.logic.on_recv(record, &mut client)
    }

    fn handle_answer(&mut self, msg: ServerToWorker<L::Pull>, is_load_job: bool) -> Result<()> {
        if is_load_job && matches!(msg.reply, ServerReply::EndOfModelAck) {
            trace!(partition = self.partition, "bootstrap keepalive ignored");
            return Ok(());
        }
        let partition = self.partition;
        let servers = self.servers;
        let logic = &mut self.logic;
        let sender = &mut self.sender;
        let router = &self.router;
        let server_txs = self.server_txs.as_slice();
        let out_tx = &self.out_tx;
        self.receiver.on_answer_msg(msg, &mut |id, value| {
            let mut client = ClientHandle {
                sender: &mut *sender,
                router,
                server_txs,
                out_tx,
                partition,
                servers,
            };
            logic.on_pull_recv(id, value, &mut client)
        })
    }

    fn forward_model_push(&mut self, id: ParamId, value: L::Push) -> Result<()> {
        let mut client = ClientHandle {
            sender: &mut self.sender,
            router: &self.router,
            server_txs: self.server_txs.as_slice(),
            out_tx: &self.out_tx,
            partition: self.partition,
            servers: self.servers,
        };
        client.push(id, value)
    }

    fn broadcast_end_of_model(&mut self) -> Result<()> {
        for (target, tx) in self.server_txs.iter().enumerate() {
            tx.send(WorkerToServer {
                worker_partition: self.partition,
                op: WorkerOp::EndOfModel,
            })
            .map_err(|_| FabricError::Disconnected {
                side: "server",
                partition: target as PartitionIdx,
            })?;
        }
        Ok(())
    }
}
