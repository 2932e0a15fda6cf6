//! Batch sizing for a tensor-, pipeline- and data-parallel layout.
//!
//! The model is split across `tensor_parallel_degree * pipeline_parallel_degree`
//! devices; every remaining factor of the device count becomes a data-parallel
//! replica. The global batch is divided evenly across replicas and each
//! replica's share is cut into microbatches for the pipeline schedule.
//! Nothing is ever rounded: a layout that does not divide exactly is an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterShape {
    /// Accelerator cores (worker processes) per node.
    pub processes_per_node: usize,
    /// Number of nodes.
    pub world_size: usize,
    pub tensor_parallel_degree: usize,
    pub pipeline_parallel_degree: usize,
}

impl ClusterShape {
    pub fn total_devices(&self) -> Option<usize> {
        self.processes_per_node.checked_mul(self.world_size)
    }

    pub fn model_parallel_degree(&self) -> Option<usize> {
        self.tensor_parallel_degree
            .checked_mul(self.pipeline_parallel_degree)
    }
}

/// How a replica's batch is cut into microbatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MicrobatchPolicy {
    /// Every microbatch holds exactly one sample.
    #[default]
    OneSamplePerMicrobatch,
    /// Fixed number of samples per microbatch.
    MicroBatchSize(usize),
}

impl MicrobatchPolicy {
    pub fn from_micro_batch_size(size: Option<usize>) -> Self {
        match size {
            Some(size) => Self::MicroBatchSize(size),
            None => Self::OneSamplePerMicrobatch,
        }
    }

    fn micro_batch_size(self) -> usize {
        match self {
            Self::OneSamplePerMicrobatch => 1,
            Self::MicroBatchSize(size) => size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub total_devices: usize,
    pub tensor_parallel_degree: usize,
    pub pipeline_parallel_degree: usize,
    pub data_parallel_degree: usize,
    pub global_batch_size: usize,
    pub per_replica_batch_size: usize,
    pub micro_batch_size: usize,
    pub num_microbatches: usize,
}

impl BatchPlan {
    /// Tokens consumed by one optimizer step at sequence length `seq_len`.
    pub fn tokens_per_step(&self, seq_len: usize) -> usize {
        self.global_batch_size.saturating_mul(seq_len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("{field} must be greater than 0")]
    InvalidInput { field: &'static str },

    #[error("{field} overflows")]
    Overflow { field: &'static str },

    #[error(
        "tensor_parallel_degree ({tensor}) x pipeline_parallel_degree ({pipeline}) does not divide {total_devices} devices"
    )]
    Topology {
        tensor: usize,
        pipeline: usize,
        total_devices: usize,
    },

    #[error("{what} {batch_size} is not divisible by {divisor_name} {divisor}")]
    BatchSize {
        what: &'static str,
        batch_size: usize,
        divisor_name: &'static str,
        divisor: usize,
    },
}

/// Derives the batch plan for `shape` at `global_batch_size`.
pub fn plan(
    shape: &ClusterShape,
    global_batch_size: usize,
    policy: MicrobatchPolicy,
) -> Result<BatchPlan, PlanError> {
    for (field, value) in [
        ("processes_per_node", shape.processes_per_node),
        ("world_size", shape.world_size),
        ("tensor_parallel_degree", shape.tensor_parallel_degree),
        ("pipeline_parallel_degree", shape.pipeline_parallel_degree),
        ("global_batch_size", global_batch_size),
        ("micro_batch_size", policy.micro_batch_size()),
    ] {
        if value == 0 {
            return Err(PlanError::InvalidInput { field });
        }
    }

    let total_devices = shape.total_devices().ok_or(PlanError::Overflow {
        field: "processes_per_node * world_size",
    })?;
    let model_parallel = shape.model_parallel_degree().ok_or(PlanError::Overflow {
        field: "tensor_parallel_degree * pipeline_parallel_degree",
    })?;

    if total_devices % model_parallel != 0 {
        return Err(PlanError::Topology {
            tensor: shape.tensor_parallel_degree,
            pipeline: shape.pipeline_parallel_degree,
            total_devices,
        });
    }
    let data_parallel_degree = total_devices / model_parallel;

    if global_batch_size % data_parallel_degree != 0 {
        return Err(PlanError::BatchSize {
            what: "global batch size",
            batch_size: global_batch_size,
            divisor_name: "data parallel degree",
            divisor: data_parallel_degree,
        });
    }
    let per_replica_batch_size = global_batch_size / data_parallel_degree;

    let micro_batch_size = policy.micro_batch_size();
    if per_replica_batch_size % micro_batch_size != 0 {
        return Err(PlanError::BatchSize {
            what: "per-replica batch size",
            batch_size: per_replica_batch_size,
            divisor_name: "micro batch size",
            divisor: micro_batch_size,
        });
    }

    let plan = BatchPlan {
        total_devices,
        tensor_parallel_degree: shape.tensor_parallel_degree,
        pipeline_parallel_degree: shape.pipeline_parallel_degree,
        data_parallel_degree,
        global_batch_size,
        per_replica_batch_size,
        micro_batch_size,
        num_microbatches: per_replica_batch_size / micro_batch_size,
    };
    log::debug!("batch plan: {plan:?}");
    Ok(plan)
}
