// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Job composition: the `transform` family.
//!
//! Each function wires the cyclic topology — training source, worker tier,
//! server tier, feedback edge — and returns a [`JobHandle`]. All logic,
//! codec, and partitioner parameters are per-partition factories; the fabric
//! calls each factory once per parallel partition, the way the source
//! system deployed one logic instance per parallel subtask.
//!
//! Must be called from within a tokio runtime.

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec::{
    PsReceiver, PsSender, SimplePsReceiver, SimplePsSender, SimpleWorkerReceiver,
    SimpleWorkerSender, WorkerReceiver, WorkerSender,
};
use crate::config::JobConfig;
use crate::error::FabricError;
use crate::logic::{ModelReplicaWorkerLogic, ParameterServerLogic, WorkerLogic};
use crate::monitor::{watchdog, IterationMonitor};
use crate::partition::{
    HashPartitioner, ServerToWorkerPartitioner, TaggedPartitioner, WorkerToServerPartitioner,
};
use crate::protocols::{JobOutput, ModelRecord, ParamId, PartitionIdx, ServerToWorker, WorkerToServer};
use crate::server::ServerTask;
use crate::store::{AsymmetricParamStore, ParamStore};
use crate::worker::{ApplyWorkerCopy, WorkerTask};
use crate::Result;

/// A running training job.
///
/// Dropping the handle does not stop the job; call [`JobHandle::shutdown`]
/// or let the idle watchdog terminate it, then [`JobHandle::join`].
pub struct JobHandle<WOut, SOut> {
    id: Uuid,
    outputs: Option<mpsc::UnboundedReceiver<JobOutput<WOut, SOut>>>,
    token: CancellationToken,
    server_handles: Vec<JoinHandle<Result<()>>>,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    aux_handles: Vec<JoinHandle<Result<()>>>,
}

impl<WOut, SOut> JobHandle<WOut, SOut> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request termination. Idempotent; `join` still must be awaited.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Detach the live output stream. After this, [`JobHandle::join`]
    /// returns an empty output vector.
    pub fn take_outputs(&mut self) -> Option<mpsc::UnboundedReceiver<JobOutput<WOut, SOut>>> {
        self.outputs.take()
    }

    /// Wait for the job to finish and collect its outputs.
    ///
    /// Surfaces the first task error; server-side errors take precedence so
    /// a routing fault is reported over its knock-on worker failures.
    pub async fn join(mut self) -> Result<Vec<JobOutput<WOut, SOut>>> {
        let worker_err = settle(self.worker_handles).await;
        let server_err = settle(self.server_handles).await;
        let aux_err = settle(self.aux_handles).await;

        if let Some(err) = server_err.or(worker_err).or(aux_err) {
            self.token.cancel();
            return Err(err);
        }

        let mut outputs = Vec::new();
        if let Some(mut rx) = self.outputs.take() {
            while let Some(out) = rx.recv().await {
                outputs.push(out);
            }
        }
        debug!(job_id = %self.id, outputs = outputs.len(), "job joined");
        Ok(outputs)
    }
}

async fn settle(handles: Vec<JoinHandle<Result<()>>>) -> Option<crate::Error> {
    let mut first = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first.is_none() {
                    first = Some(err);
                }
            }
            Err(join_err) => {
                if first.is_none() {
                    first = Some(crate::Error::new(join_err).context("fabric task panicked"));
                }
            }
        }
    }
    first
}

/// Spawn a task whose failure tears the whole job down.
fn spawn_guarded(
    token: CancellationToken,
    fut: impl Future<Output = Result<()>> + Send + 'static,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let result = fut.await;
        if result.is_err() {
            token.cancel();
        }
        result
    })
}

/// Round-robin a finite or infinite stream over per-partition channels,
/// then drop the senders so downstream sees end-of-input.
fn spawn_rebalance<T: Send + 'static>(
    stream: impl Stream<Item = T> + Send + 'static,
    txs: Vec<mpsc::UnboundedSender<T>>,
    token: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        tokio::pin!(stream);
        let mut next = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = stream.next() => {
                    match item {
                        Some(item) => {
                            // The receiving partition only goes away on teardown.
                            let _ = txs[next].send(item);
                            next = (next + 1) % txs.len();
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    })
}

fn reject_worker_copy<L: WorkerLogic>(_logic: &mut L, id: ParamId, _value: L::Pull) -> Result<()> {
    Err(FabricError::protocol(format!(
        "worker-side model record for parameter {id} outside a double-sided load"
    ))
    .into())
}

fn apply_to_replica<L: ModelReplicaWorkerLogic>(
    logic: &mut L,
    id: ParamId,
    value: L::Pull,
) -> Result<()> {
    logic.update_model(id, value)
}

#[allow(clippy::too_many_arguments)]
fn launch<L, PL, WR, WS, PR, SS, RW, RS, ST, SM>(
    config: JobConfig,
    training: ST,
    model: Option<SM>,
    keepalive: bool,
    apply_worker_copy: ApplyWorkerCopy<L>,
    worker_logic: impl Fn(PartitionIdx) -> L,
    ps_logic: impl Fn(PartitionIdx) -> PL,
    worker_receiver: impl Fn(PartitionIdx) -> WR,
    worker_sender: impl Fn(PartitionIdx) -> WS,
    ps_receiver: impl Fn(PartitionIdx) -> PR,
    ps_sender: impl Fn(PartitionIdx) -> SS,
    w2s_partitioner: impl Fn(PartitionIdx) -> RW,
    s2w_partitioner: impl Fn(PartitionIdx) -> RS,
) -> Result<JobHandle<L::Output, PL::Output>>
where
    L: WorkerLogic,
    PL: ParameterServerLogic<Pull = L::Pull, Push = L::Push>,
    WR: WorkerReceiver<L::Pull>,
    WS: WorkerSender<L::Push>,
    PR: PsReceiver<L::Push>,
    SS: PsSender<L::Pull>,
    RW: WorkerToServerPartitioner<L::Push>,
    RS: ServerToWorkerPartitioner<L::Pull>,
    ST: Stream<Item = L::Record> + Send + 'static,
    SM: Stream<Item = ModelRecord<L::Push, L::Pull>> + Send + 'static,
{
    config.validate()?;
    let workers = config.worker_parallelism;
    let servers = config.server_parallelism;
    let has_model = model.is_some();

    let job_id = Uuid::new_v4();
    info!(
        job_id = %job_id,
        workers,
        servers,
        iteration_wait_ms = config.iteration_wait_ms,
        model_load = has_model,
        "launching parameter-server job"
    );

    let token = CancellationToken::new();
    let monitor = Arc::new(IterationMonitor::new());
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let (w2s_txs, w2s_rxs): (Vec<_>, Vec<_>) = (0..servers)
        .map(|_| mpsc::unbounded_channel::<WorkerToServer<L::Push>>())
        .unzip();
    let (s2w_txs, s2w_rxs): (Vec<_>, Vec<_>) = (0..workers)
        .map(|_| mpsc::unbounded_channel::<ServerToWorker<L::Pull>>())
        .unzip();
    let (training_txs, training_rxs): (Vec<_>, Vec<_>) = (0..workers)
        .map(|_| mpsc::unbounded_channel::<L::Record>())
        .unzip();
    #[allow(clippy::type_complexity)]
    let (model_txs, model_rxs): (
        Vec<mpsc::UnboundedSender<ModelRecord<L::Push, L::Pull>>>,
        Vec<mpsc::UnboundedReceiver<ModelRecord<L::Push, L::Pull>>>,
    ) = if has_model {
        (0..workers).map(|_| mpsc::unbounded_channel()).unzip()
    } else {
        (Vec::new(), Vec::new())
    };

    let mut server_handles = Vec::with_capacity(servers as usize);
    for (partition, rx) in w2s_rxs.into_iter().enumerate() {
        let partition = partition as PartitionIdx;
        let task = ServerTask {
            partition,
            workers,
            servers,
            logic: ps_logic(partition),
            receiver: ps_receiver(partition),
            sender: ps_sender(partition),
            router: s2w_partitioner(partition),
            rx,
            worker_txs: s2w_txs.clone(),
            out_tx: out_tx.clone(),
            monitor: monitor.clone(),
            eom_remaining: has_model.then_some(workers),
            keepalive,
        };
        server_handles.push(spawn_guarded(token.clone(), task.run()));
    }

    let mut worker_handles = Vec::with_capacity(workers as usize);
    let mut model_rx_iter = model_rxs.into_iter();
    for (partition, (training_rx, feedback_rx)) in
        training_rxs.into_iter().zip(s2w_rxs).enumerate()
    {
        let partition = partition as PartitionIdx;
        let task = WorkerTask {
            partition,
            workers,
            servers,
            logic: worker_logic(partition),
            sender: worker_sender(partition),
            receiver: worker_receiver(partition),
            router: w2s_partitioner(partition),
            training_rx,
            model_rx: model_rx_iter.next(),
            feedback_rx,
            server_txs: w2s_txs.clone(),
            out_tx: out_tx.clone(),
            apply_worker_copy,
            token: token.clone(),
        };
        worker_handles.push(spawn_guarded(token.clone(), task.run()));
    }

    // Only the tasks may keep senders alive, or channel closure never
    // propagates through the teardown cascade.
    drop(w2s_txs);
    drop(s2w_txs);
    drop(out_tx);

    let mut aux_handles = Vec::new();
    aux_handles.push(spawn_rebalance(training, training_txs, token.clone()));
    if let Some(model_stream) = model {
        aux_handles.push(spawn_rebalance(model_stream, model_txs, token.clone()));
    }
    if let Some(wait) = config.iteration_wait() {
        let monitor = monitor.clone();
        let watchdog_token = token.clone();
        aux_handles.push(tokio::spawn(async move {
            watchdog(monitor, wait, watchdog_token).await;
            Ok(())
        }));
    }

    Ok(JobHandle {
        id: job_id,
        outputs: Some(out_rx),
        token,
        server_handles,
        worker_handles,
        aux_handles,
    })
}

/// Symmetric training loop over the default map-backed store.
///
/// `init` seeds a parameter on first pull; `update` folds each push delta
/// into the stored value. Server outputs are the final `(id, value)`
/// snapshot emitted on close.
pub fn transform<T, P, WOut, L, ST, I, U>(
    training: ST,
    worker_logic: impl Fn(PartitionIdx) -> L,
    init: I,
    update: U,
    config: JobConfig,
) -> Result<JobHandle<WOut, (ParamId, P)>>
where
    T: Send + 'static,
    P: Clone + Send + 'static,
    WOut: Send + 'static,
    L: WorkerLogic<Record = T, Pull = P, Push = P, Output = WOut>,
    ST: Stream<Item = T> + Send + 'static,
    I: Fn(ParamId) -> P + Clone + Send + 'static,
    U: Fn(&P, &P) -> P + Clone + Send + 'static,
{
    transform_with_ps(
        training,
        worker_logic,
        move |_| ParamStore::new(init.clone(), update.clone()),
        config,
    )
}

/// Asymmetric counterpart of [`transform`]: pulls return `V`, pushes carry
/// `U`. The asymmetric store forbids push-before-pull.
pub fn transform_asymmetric<V, U, L, ST, I, F>(
    training: ST,
    worker_logic: impl Fn(PartitionIdx) -> L,
    init: I,
    update: F,
    config: JobConfig,
) -> Result<JobHandle<L::Output, (ParamId, V)>>
where
    V: Clone + Send + 'static,
    U: Send + 'static,
    L: WorkerLogic<Pull = V, Push = U>,
    ST: Stream<Item = L::Record> + Send + 'static,
    I: Fn(ParamId) -> V + Clone + Send + 'static,
    F: Fn(&V, &U) -> V + Clone + Send + 'static,
{
    transform_with_ps(
        training,
        worker_logic,
        move |_| AsymmetricParamStore::new(init.clone(), update.clone()),
        config,
    )
}

/// Training loop with user-supplied parameter-server logic and default
/// framing/routing. Symmetric or asymmetric by the logic's associated types.
pub fn transform_with_ps<L, PL, ST>(
    training: ST,
    worker_logic: impl Fn(PartitionIdx) -> L,
    ps_logic: impl Fn(PartitionIdx) -> PL,
    config: JobConfig,
) -> Result<JobHandle<L::Output, PL::Output>>
where
    L: WorkerLogic,
    PL: ParameterServerLogic<Pull = L::Pull, Push = L::Push>,
    ST: Stream<Item = L::Record> + Send + 'static,
{
    transform_with_custom_routing(
        training,
        worker_logic,
        ps_logic,
        |_| HashPartitioner,
        |_| TaggedPartitioner,
        |_| SimpleWorkerReceiver,
        |_| SimpleWorkerSender,
        |_| SimplePsReceiver,
        |_| SimplePsSender,
        config,
    )
}

/// Fully customizable training loop: every codec and partitioner is caller
/// supplied, for alternative transports such as batched or compressed
/// framing.
#[allow(clippy::too_many_arguments)]
pub fn transform_with_custom_routing<L, PL, ST, RW, RS, WR, WS, PR, SS>(
    training: ST,
    worker_logic: impl Fn(PartitionIdx) -> L,
    ps_logic: impl Fn(PartitionIdx) -> PL,
    w2s_partitioner: impl Fn(PartitionIdx) -> RW,
    s2w_partitioner: impl Fn(PartitionIdx) -> RS,
    worker_receiver: impl Fn(PartitionIdx) -> WR,
    worker_sender: impl Fn(PartitionIdx) -> WS,
    ps_receiver: impl Fn(PartitionIdx) -> PR,
    ps_sender: impl Fn(PartitionIdx) -> SS,
    config: JobConfig,
) -> Result<JobHandle<L::Output, PL::Output>>
where
    L: WorkerLogic,
    PL: ParameterServerLogic<Pull = L::Pull, Push = L::Push>,
    ST: Stream<Item = L::Record> + Send + 'static,
    RW: WorkerToServerPartitioner<L::Push>,
    RS: ServerToWorkerPartitioner<L::Pull>,
    WR: WorkerReceiver<L::Pull>,
    WS: WorkerSender<L::Push>,
    PR: PsReceiver<L::Push>,
    SS: PsSender<L::Pull>,
{
    launch(
        config,
        training,
        None::<futures::stream::Empty<ModelRecord<L::Push, L::Pull>>>,
        false,
        reject_worker_copy::<L>,
        worker_logic,
        ps_logic,
        worker_receiver,
        worker_sender,
        ps_receiver,
        ps_sender,
        w2s_partitioner,
        s2w_partitioner,
    )
}

/// Training loop preceded by a server-side model preload.
///
/// Model records are `(id, value)` pairs, rebalanced over the worker
/// partitions and forwarded as pushes. Workers buffer training records
/// until their model share is exhausted; servers answer no pull until every
/// worker has reported end of model.
pub fn transform_with_model_load<L, PL, SM, ST>(
    model: SM,
    training: ST,
    worker_logic: impl Fn(PartitionIdx) -> L,
    ps_logic: impl Fn(PartitionIdx) -> PL,
    config: JobConfig,
) -> Result<JobHandle<L::Output, PL::Output>>
where
    L: WorkerLogic,
    PL: ParameterServerLogic<Pull = L::Pull, Push = L::Push>,
    SM: Stream<Item = (ParamId, L::Push)> + Send + 'static,
    ST: Stream<Item = L::Record> + Send + 'static,
{
    let model = model.map(|(id, value)| ModelRecord::ServerCopy(id, value));
    launch(
        config,
        training,
        Some(model),
        false,
        reject_worker_copy::<L>,
        worker_logic,
        ps_logic,
        |_| SimpleWorkerReceiver,
        |_| SimpleWorkerSender,
        |_| SimplePsReceiver,
        |_| SimplePsSender,
        |_| HashPartitioner,
        |_| TaggedPartitioner,
    )
}

/// Training loop preceded by a two-sided model preload.
///
/// `ServerCopy` records are forwarded as pushes, `WorkerCopy` records are
/// applied to the local replica through
/// [`ModelReplicaWorkerLogic::update_model`]. While servers are inside the
/// load window, every applied push emits a synthetic keepalive answer so a
/// bulk load cannot trip the idle watchdog.
pub fn transform_with_double_model_load<L, PL, SM, ST>(
    model: SM,
    training: ST,
    worker_logic: impl Fn(PartitionIdx) -> L,
    ps_logic: impl Fn(PartitionIdx) -> PL,
    config: JobConfig,
) -> Result<JobHandle<L::Output, PL::Output>>
where
    L: ModelReplicaWorkerLogic,
    PL: ParameterServerLogic<Pull = L::Pull, Push = L::Push>,
    SM: Stream<Item = ModelRecord<L::Push, L::Pull>> + Send + 'static,
    ST: Stream<Item = L::Record> + Send + 'static,
{
    launch(
        config,
        training,
        Some(model),
        true,
        apply_to_replica::<L>,
        worker_logic,
        ps_logic,
        |_| SimpleWorkerReceiver,
        |_| SimpleWorkerSender,
        |_| SimplePsReceiver,
        |_| SimplePsSender,
        |_| HashPartitioner,
        |_| TaggedPartitioner,
    )
}
