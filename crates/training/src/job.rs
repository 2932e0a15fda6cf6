//! Training job request and the submission seam.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LaunchConfig;
use crate::planner::BatchPlan;

/// Everything the job service needs to start the run, as flat key/value data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_name: String,
    pub image: String,
    pub instance_type: String,
    pub instance_count: usize,
    pub dataset_location: String,
    pub checkpoint_location: String,
    pub hyperparameters: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    pub max_run_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_seconds: Option<u64>,
}

impl JobRequest {
    pub fn build(
        config: &LaunchConfig,
        plan: &BatchPlan,
        dataset_location: impl Into<String>,
    ) -> Self {
        let hp = &config.hyperparameters;
        let mut hyperparameters = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            hyperparameters.insert(key.to_string(), value);
        };

        set("processes_per_node", config.cluster.processes_per_node.to_string());
        set("world_size", config.cluster.world_size.to_string());
        set("tensor_parallel_degree", plan.tensor_parallel_degree.to_string());
        set("pipeline_parallel_degree", plan.pipeline_parallel_degree.to_string());
        set("data_parallel_degree", plan.data_parallel_degree.to_string());
        set("global_batch_size", plan.global_batch_size.to_string());
        set("per_replica_batch_size", plan.per_replica_batch_size.to_string());
        set("micro_batch_size", plan.micro_batch_size.to_string());
        set("num_microbatches", plan.num_microbatches.to_string());
        set("seq_length", config.seq_length().to_string());
        set("learning_rate", hp.learning_rate.to_string());
        set("min_learning_rate", hp.min_learning_rate.to_string());
        set("warmup_steps", hp.warmup_steps.to_string());
        set("constant_steps", hp.constant_steps.to_string());
        set("max_steps", hp.max_steps.to_string());
        set("weight_decay", hp.weight_decay.to_string());
        set("seed", hp.seed.to_string());
        set("precision", hp.precision.as_str().to_string());

        Self {
            job_name: config.job.name.clone(),
            image: config.job.image.clone(),
            instance_type: config.job.instance_type.clone(),
            instance_count: config.instance_count(),
            dataset_location: dataset_location.into(),
            checkpoint_location: config.job.checkpoint_location.clone(),
            hyperparameters,
            environment: config.environment.to_env_map(),
            max_run_seconds: config.job.max_run_seconds,
            keep_alive_seconds: config.job.keep_alive_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_name: String,
    /// Backend-specific reference to the accepted job.
    pub reference: String,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode job request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("a job named '{0}' was already submitted")]
    Duplicate(String),

    #[error("invalid job name '{0}'")]
    InvalidName(String),
}

pub trait JobSubmitter: Send + Sync {
    fn submit(&self, request: &JobRequest) -> Result<JobHandle, SubmitError>;

    fn backend_type(&self) -> &'static str;
}

/// Drops each request as `<job_name>.json` into a spool directory that a
/// separate dispatcher picks up. Job names are unique per spool.
#[derive(Debug, Clone)]
pub struct SpoolSubmitter {
    dir: PathBuf,
}

impl SpoolSubmitter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl JobSubmitter for SpoolSubmitter {
    fn submit(&self, request: &JobRequest) -> Result<JobHandle, SubmitError> {
        let name = &request.job_name;
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(SubmitError::InvalidName(name.clone()));
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{name}.json"));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SubmitError::Duplicate(name.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        let body = serde_json::to_vec_pretty(request)?;
        file.write_all(&body)?;
        file.sync_all()?;

        log::info!("spooled job {} to {}", name, path.display());
        Ok(JobHandle {
            job_name: name.clone(),
            reference: path.display().to_string(),
        })
    }

    fn backend_type(&self) -> &'static str {
        "spool"
    }
}
