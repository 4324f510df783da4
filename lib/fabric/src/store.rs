// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Default map-backed parameter stores.

use std::collections::HashMap;

use crate::error::FabricError;
use crate::logic::{ParameterServer, ParameterServerLogic};
use crate::protocols::{ParamId, PartitionIdx};
use crate::Result;

/// Symmetric default store: `ParamId -> P` with lazy initialization.
///
/// First pull for an id runs `init(id)`, stores and answers the result. A
/// push folds `update(&stored, &delta)`; a push for an id with no entry
/// stores the delta itself as the initial value. On close, every `(id,
/// value)` pair is emitted as a server output record.
pub struct ParamStore<P, I, U> {
    entries: HashMap<ParamId, P>,
    init: I,
    update: U,
}

impl<P, I, U> ParamStore<P, I, U>
where
    I: Fn(ParamId) -> P,
    U: Fn(&P, &P) -> P,
{
    pub fn new(init: I, update: U) -> Self {
        Self {
            entries: HashMap::new(),
            init,
            update,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P, I, U> ParameterServerLogic for ParamStore<P, I, U>
where
    P: Clone + Send + 'static,
    I: Fn(ParamId) -> P + Send + 'static,
    U: Fn(&P, &P) -> P + Send + 'static,
{
    type Pull = P;
    type Push = P;
    type Output = (ParamId, P);

    fn on_pull_recv(
        &mut self,
        id: ParamId,
        worker_partition: PartitionIdx,
        ps: &mut dyn ParameterServer<P, (ParamId, P)>,
    ) -> Result<()> {
        let value = self
            .entries
            .entry(id)
            .or_insert_with(|| (self.init)(id))
            .clone();
        ps.answer_pull(id, value, worker_partition)
    }

    fn on_push_recv(
        &mut self,
        id: ParamId,
        delta: P,
        _ps: &mut dyn ParameterServer<P, (ParamId, P)>,
    ) -> Result<()> {
        match self.entries.get_mut(&id) {
            Some(stored) => *stored = (self.update)(stored, &delta),
            None => {
                self.entries.insert(id, delta);
            }
        }
        Ok(())
    }

    fn close(&mut self, ps: &mut dyn ParameterServer<P, (ParamId, P)>) -> Result<()> {
        for (id, value) in self.entries.drain() {
            ps.output((id, value))?;
        }
        Ok(())
    }
}

/// Asymmetric ("loose") default store: pulls return `V`, pushes carry `U`.
///
/// A push for an id that was never pulled has no value to seed the entry
/// with — the delta type does not inhabit the value type — so the store
/// rejects it as a protocol error. Callers that need push-before-pull must
/// bring their own [`ParameterServerLogic`].
pub struct AsymmetricParamStore<V, U, I, F> {
    entries: HashMap<ParamId, V>,
    init: I,
    update: F,
    _marker: std::marker::PhantomData<fn(U)>,
}

impl<V, U, I, F> AsymmetricParamStore<V, U, I, F>
where
    I: Fn(ParamId) -> V,
    F: Fn(&V, &U) -> V,
{
    pub fn new(init: I, update: F) -> Self {
        Self {
            entries: HashMap::new(),
            init,
            update,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<V, U, I, F> ParameterServerLogic for AsymmetricParamStore<V, U, I, F>
where
    V: Clone + Send + 'static,
    U: Send + 'static,
    I: Fn(ParamId) -> V + Send + 'static,
    F: Fn(&V, &U) -> V + Send + 'static,
{
    type Pull = V;
    type Push = U;
    type Output = (ParamId, V);

    fn on_pull_recv(
        &mut self,
        id: ParamId,
        worker_partition: PartitionIdx,
        ps: &mut dyn ParameterServer<V, (ParamId, V)>,
    ) -> Result<()> {
        let value = self
            .entries
            .entry(id)
            .or_insert_with(|| (self.init)(id))
            .clone();
        ps.answer_pull(id, value, worker_partition)
    }

    fn on_push_recv(
        &mut self,
        id: ParamId,
        delta: U,
        _ps: &mut dyn ParameterServer<V, (ParamId, V)>,
    ) -> Result<()> {
        match self.entries.get_mut(&id) {
            Some(stored) => {
                *stored = (self.update)(stored, &delta);
                Ok(())
            }
            None => Err(FabricError::protocol(format!(
                "push for uninitialized parameter {id}: push-before-pull is forbidden for the asymmetric store"
            ))
            .into()),
        }
    }

    fn close(&mut self, ps: &mut dyn ParameterServer<V, (ParamId, V)>) -> Result<()> {
        for (id, value) in self.entries.drain() {
            ps.output((id, value))?;
        }
        Ok(())
    }
}
