pub mod config;
pub mod environment;
pub mod job;
pub mod launch;
pub mod planner;

pub use config::{
    ClusterConfig, DataConfig, Hyperparameters, JobConfig, LaunchConfig, Precision,
    StorageConfig, TokenizerConfig, TrainingError,
};
pub use environment::RuntimeEnvironment;
pub use job::{JobHandle, JobRequest, JobSubmitter, SpoolSubmitter, SubmitError};
pub use launch::{dry_run, launch, prepare, LaunchReport};
pub use planner::{plan, BatchPlan, ClusterShape, MicrobatchPolicy, PlanError};
