// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Partitioned parameter-server coordination fabric.
//!
//! A cohort of *worker* partitions trains against shared parameters hosted on
//! a cohort of *server* partitions. Workers issue pulls and pushes addressed
//! by parameter id; servers answer pulls back to the issuing worker partition,
//! closing a cyclic message loop. Every partition is a single tokio task, all
//! edges are channels, and the loop terminates when the feedback edge has been
//! idle for a configured interval.
//!
//! Entry points are the [`transform`] family in [`job`]; user code plugs in
//! [`logic::WorkerLogic`] and (optionally) [`logic::ParameterServerLogic`],
//! with [`store::ParamStore`] as the default server behavior.

pub use anyhow::{anyhow as error, bail as raise, Context as ErrorContext, Error, Result};

pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod logic;
pub mod monitor;
pub mod partition;
pub mod protocols;
pub mod store;

mod server;
mod worker;

pub use config::{JobConfig, JobConfigBuilder};
pub use error::FabricError;
pub use job::{
    transform, transform_asymmetric, transform_with_custom_routing, transform_with_double_model_load,
    transform_with_model_load, transform_with_ps, JobHandle,
};
pub use logic::{
    ModelReplicaWorkerLogic, ParameterServer, ParameterServerClient, ParameterServerLogic,
    PartitionContext, WorkerLogic,
};
pub use protocols::{JobOutput, ModelRecord, ParamId, PartitionIdx};
pub use store::{AsymmetricParamStore, ParamStore};

pub mod prelude {
    pub use crate::config::JobConfig;
    pub use crate::job::{transform, transform_with_ps, JobHandle};
    pub use crate::logic::{
        ModelReplicaWorkerLogic, ParameterServer, ParameterServerClient, ParameterServerLogic,
        PartitionContext, WorkerLogic,
    };
    pub use crate::protocols::{JobOutput, ModelRecord, ParamId, PartitionIdx};
    pub use crate::Result;
}
