//! End-to-end launch: plan, prepare the dataset, upload it, submit the job.

use pretraining_data::storage::dataset_location;
use pretraining_data::{effective_block_size, DataError, DatasetManifest, DatasetStore};
use tokenizer::{TextTokenizer, TokenEncoder};

use crate::config::{LaunchConfig, TrainingError};
use crate::job::{JobHandle, JobRequest, JobSubmitter};
use crate::planner::BatchPlan;

#[derive(Debug)]
pub struct LaunchReport {
    pub plan: BatchPlan,
    pub manifest: DatasetManifest,
    pub request: JobRequest,
    pub handle: JobHandle,
}

/// Tokenizes and chunks the configured corpus into `data.output_dir`.
pub fn prepare(config: &LaunchConfig) -> Result<DatasetManifest, TrainingError> {
    let encoder = load_tokenizer(config)?;
    prepare_with(config, &encoder)
}

fn load_tokenizer(config: &LaunchConfig) -> Result<TextTokenizer, TrainingError> {
    let encoder = tokenizer::load(&config.tokenizer.to_tokenizer_config())?;
    log::info!(
        "tokenizer loaded: vocab={} max_length={:?}",
        encoder.vocab_size(),
        encoder.max_length()
    );
    Ok(encoder)
}

fn prepare_with(
    config: &LaunchConfig,
    encoder: &TextTokenizer,
) -> Result<DatasetManifest, TrainingError> {
    let corpus = config.data.corpus_files()?;
    let manifest = pretraining_data::prepare_dataset(
        &corpus,
        encoder,
        &config.data.chunker_config(),
        config.data.layout(),
    )?;
    log::info!(
        "prepared {} blocks of {} tokens from {} records into {}",
        manifest.blocks,
        manifest.block_size,
        manifest.records,
        config.data.output_dir.display()
    );
    Ok(manifest)
}

/// Job request `launch` would submit, built without touching the corpus,
/// the store or the submitter.
pub fn dry_run(config: &LaunchConfig) -> Result<JobRequest, TrainingError> {
    let plan = config.plan()?;
    let location = dataset_location(&config.job.dataset_destination)?;
    Ok(JobRequest::build(config, &plan, location))
}

/// Runs the whole launch. The batch plan is checked first so a bad layout
/// fails before any corpus work, upload or submission happens.
pub fn launch(
    config: &LaunchConfig,
    store: &dyn DatasetStore,
    submitter: &dyn JobSubmitter,
) -> Result<LaunchReport, TrainingError> {
    let plan = config.plan()?;
    log::info!(
        "plan: devices={} dp={} tp={} pp={} per_replica={} microbatches={}",
        plan.total_devices,
        plan.data_parallel_degree,
        plan.tensor_parallel_degree,
        plan.pipeline_parallel_degree,
        plan.per_replica_batch_size,
        plan.num_microbatches
    );

    // A clamped block size would train on blocks shorter than seq_length.
    let encoder = load_tokenizer(config)?;
    let (block_size, _) = effective_block_size(config.data.block_size, encoder.max_length());
    if block_size != config.seq_length() {
        return Err(TrainingError::validation(vec![format!(
            "dataset block size {} (requested {}, tokenizer max length {:?}) does not match training seq_length {}",
            block_size,
            config.data.block_size,
            encoder.max_length(),
            config.seq_length()
        )]));
    }

    let manifest = prepare_with(config, &encoder)?;
    if manifest.blocks == 0 {
        return Err(DataError::Dataset(format!(
            "corpus produced no blocks of {} tokens",
            manifest.block_size
        ))
        .into());
    }

    let location = store.upload(&config.data.output_dir, &config.job.dataset_destination)?;
    log::info!("dataset available at {} ({})", location, store.backend_type());

    let request = JobRequest::build(config, &plan, location);
    let handle = submitter.submit(&request)?;
    log::info!(
        "submitted job {} via {} ({})",
        handle.job_name,
        submitter.backend_type(),
        handle.reference
    );

    Ok(LaunchReport {
        plan,
        manifest,
        request,
        handle,
    })
}
