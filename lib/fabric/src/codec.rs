// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Framing codecs between logical operations and wire messages.
//!
//! Four seams, one duty each: wrap a pull/push into a worker-to-server
//! message, unwrap it at the server, wrap a pull answer, unwrap it at the
//! worker. Alternative transports (batched, compressed) implement the same
//! traits and are slotted in through
//! [`crate::job::transform_with_custom_routing`].
//!
//! Dispatch callbacks return `Result` so user-logic errors propagate through
//! a codec unchanged.

use crate::error::FabricError;
use crate::protocols::{ParamId, PartitionIdx, ServerReply, ServerToWorker, WorkerOp, WorkerToServer};
use crate::Result;

/// Worker-side encoder: logical pull/push -> wire message.
pub trait WorkerSender<U>: Send + 'static {
    /// Emit exactly one message carrying `Pull(id)`, tagged with the issuing
    /// worker partition.
    fn on_pull(
        &mut self,
        id: ParamId,
        emit: &mut dyn FnMut(WorkerToServer<U>),
        worker_partition: PartitionIdx,
    );

    /// Emit exactly one message carrying `Push(id, delta)`.
    fn on_push(
        &mut self,
        id: ParamId,
        delta: U,
        emit: &mut dyn FnMut(WorkerToServer<U>),
        worker_partition: PartitionIdx,
    );
}

/// Server-side decoder: wire message -> pull/push dispatch, exactly once.
pub trait PsReceiver<U>: Send + 'static {
    fn on_worker_msg(
        &mut self,
        msg: WorkerToServer<U>,
        on_pull: &mut dyn FnMut(ParamId, PartitionIdx) -> Result<()>,
        on_push: &mut dyn FnMut(ParamId, U) -> Result<()>,
    ) -> Result<()>;
}

/// Server-side encoder: pull answer -> wire message.
pub trait PsSender<V>: Send + 'static {
    /// Emit exactly one message addressed to `worker_partition`.
    fn on_pull_answer(
        &mut self,
        id: ParamId,
        value: V,
        worker_partition: PartitionIdx,
        emit: &mut dyn FnMut(ServerToWorker<V>),
    );
}

/// Worker-side decoder: wire message -> pull-answer dispatch.
pub trait WorkerReceiver<V>: Send + 'static {
    fn on_answer_msg(
        &mut self,
        msg: ServerToWorker<V>,
        on_answer: &mut dyn FnMut(ParamId, V) -> Result<()>,
    ) -> Result<()>;
}

/// Identity framing, worker side.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleWorkerSender;

impl<U: Send + 'static> WorkerSender<U> for SimpleWorkerSender {
    fn on_pull(
        &mut self,
        id: ParamId,
        emit: &mut dyn FnMut(WorkerToServer<U>),
        worker_partition: PartitionIdx,
    ) {
        emit(WorkerToServer {
            worker_partition,
            op: WorkerOp::Pull(id),
        });
    }

    fn on_push(
        &mut self,
        id: ParamId,
        delta: U,
        emit: &mut dyn FnMut(WorkerToServer<U>),
        worker_partition: PartitionIdx,
    ) {
        emit(WorkerToServer {
            worker_partition,
            op: WorkerOp::Push(id, delta),
        });
    }
}

/// Identity framing, server-inbound side.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePsReceiver;

impl<U: Send + 'static> PsReceiver<U> for SimplePsReceiver {
    fn on_worker_msg(
        &mut self,
        msg: WorkerToServer<U>,
        on_pull: &mut dyn FnMut(ParamId, PartitionIdx) -> Result<()>,
        on_push: &mut dyn FnMut(ParamId, U) -> Result<()>,
    ) -> Result<()> {
        match msg.op {
            WorkerOp::Pull(id) => on_pull(id, msg.worker_partition),
            WorkerOp::Push(id, delta) => on_push(id, delta),
            // The fabric consumes barrier markers before the codec; one
            // arriving here means a non-load job received load traffic.
            WorkerOp::EndOfModel => Err(FabricError::protocol(
                "unexpected end-of-model marker outside a model-load job",
            )
            .into()),
        }
    }
}

/// Identity framing, server-outbound side.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePsSender;

impl<V: Send + 'static> PsSender<V> for SimplePsSender {
    fn on_pull_answer(
        &mut self,
        id: ParamId,
        value: V,
        worker_partition: PartitionIdx,
        emit: &mut dyn FnMut(ServerToWorker<V>),
    ) {
        emit(ServerToWorker {
            worker_partition,
            reply: ServerReply::PullAnswer(id, value),
        });
    }
}

/// Identity framing, worker-inbound side.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleWorkerReceiver;

impl<V: Send + 'static> WorkerReceiver<V> for SimpleWorkerReceiver {
    fn on_answer_msg(
        &mut self,
        msg: ServerToWorker<V>,
        on_answer: &mut dyn FnMut(ParamId, V) -> Result<()>,
    ) -> Result<()> {
        match msg.reply {
            ServerReply::PullAnswer(id, value) => on_answer(id, value),
            // Keepalives are swallowed by the fabric in model-load jobs; in
            // any other job they are protocol confusion.
            ServerReply::EndOfModelAck => Err(FabricError::protocol(
                "end-of-model pull answer arrived outside a model-load job",
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_wraps_into_exactly_one_message() {
        let mut sender = SimpleWorkerSender;
        let mut emitted = Vec::new();
        WorkerSender::<i32>::on_pull(&mut sender, 9, &mut |m| emitted.push(m), 2);
        assert_eq!(
            emitted,
            vec![WorkerToServer {
                worker_partition: 2,
                op: WorkerOp::Pull(9)
            }]
        );
    }

    #[test]
    fn push_carries_the_delta() {
        let mut sender = SimpleWorkerSender;
        let mut emitted = Vec::new();
        sender.on_push(3, 1.5f64, &mut |m| emitted.push(m), 0);
        assert_eq!(
            emitted,
            vec![WorkerToServer {
                worker_partition: 0,
                op: WorkerOp::Push(3, 1.5)
            }]
        );
    }

    #[test]
    fn receiver_dispatches_once_per_message() {
        let mut receiver = SimplePsReceiver;
        let mut pulls = Vec::new();
        let mut pushes = Vec::new();

        receiver
            .on_worker_msg(
                WorkerToServer {
                    worker_partition: 1,
                    op: WorkerOp::Pull::<i32>(5),
                },
                &mut |id, wp| {
                    pulls.push((id, wp));
                    Ok(())
                },
                &mut |id, delta| {
                    pushes.push((id, delta));
                    Ok(())
                },
            )
            .unwrap();

        receiver
            .on_worker_msg(
                WorkerToServer {
                    worker_partition: 1,
                    op: WorkerOp::Push(6, 2),
                },
                &mut |id, wp| {
                    pulls.push((id, wp));
                    Ok(())
                },
                &mut |id, delta| {
                    pushes.push((id, delta));
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(pulls, vec![(5, 1)]);
        assert_eq!(pushes, vec![(6, 2)]);
    }

    #[test]
    fn answer_roundtrip_keeps_the_target_partition() {
        let mut sender = SimplePsSender;
        let mut wire = Vec::new();
        sender.on_pull_answer(4, 40i32, 1, &mut |m| wire.push(m));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].worker_partition, 1);

        let mut receiver = SimpleWorkerReceiver;
        let mut answers = Vec::new();
        receiver
            .on_answer_msg(wire.pop().unwrap(), &mut |id, v| {
                answers.push((id, v));
                Ok(())
            })
            .unwrap();
        assert_eq!(answers, vec![(4, 40)]);
    }

    #[test]
    fn stray_keepalive_is_protocol_confusion() {
        let mut receiver = SimpleWorkerReceiver;
        let err = receiver
            .on_answer_msg(
                ServerToWorker::<i32> {
                    worker_partition: 0,
                    reply: ServerReply::EndOfModelAck,
                },
                &mut |_, _| Ok(()),
            )
            .unwrap_err();
        assert!(err.to_string().contains("end-of-model pull answer"));
    }
}
