use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use env_logger::Env;
use pretraining_data::LocalStore;
use training::{launch, prepare, LaunchConfig, SpoolSubmitter};

#[derive(Debug, Parser)]
#[command(
    name = "orchestrate",
    about = "Prepare a pretraining corpus and launch a parallel training job"
)]
struct Args {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the batch plan derived from the cluster layout.
    Plan(ConfigArgs),
    /// Tokenize and chunk the corpus into the dataset directory.
    Prepare(ConfigArgs),
    /// Prepare, upload and submit the training job.
    Launch {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(
            long,
            help = "Print the job request that would be submitted without preparing or uploading data"
        )]
        dry_run: bool,
    },
}

#[derive(Debug, ClapArgs)]
struct ConfigArgs {
    #[arg(long, help = "Launch configuration (.toml or .json)")]
    config: PathBuf,

    #[arg(long, help = "Override cluster.global_batch_size")]
    global_batch_size: Option<usize>,

    #[arg(long, help = "Override cluster.micro_batch_size")]
    micro_batch_size: Option<usize>,
}

impl ConfigArgs {
    fn load(&self) -> Result<LaunchConfig> {
        let mut config = LaunchConfig::from_path(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        if let Some(batch) = self.global_batch_size {
            config.cluster.global_batch_size = batch;
        }
        if let Some(micro) = self.micro_batch_size {
            config.cluster.micro_batch_size = Some(micro);
        }
        if self.global_batch_size.is_some() || self.micro_batch_size.is_some() {
            config.validate()?;
        }
        Ok(config)
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("orchestrate failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    match args.command {
        Command::Plan(config_args) => {
            let config = config_args.load()?;
            let plan = config.plan()?;
            println!("Batch plan");
            println!("  Total devices:          {}", plan.total_devices);
            println!("  Tensor parallel:        {}", plan.tensor_parallel_degree);
            println!("  Pipeline parallel:      {}", plan.pipeline_parallel_degree);
            println!("  Data parallel:          {}", plan.data_parallel_degree);
            println!("  Global batch size:      {}", plan.global_batch_size);
            println!("  Per-replica batch size: {}", plan.per_replica_batch_size);
            println!("  Micro batch size:       {}", plan.micro_batch_size);
            println!("  Microbatches:           {}", plan.num_microbatches);
            println!(
                "  Tokens per step:        {}",
                plan.tokens_per_step(config.seq_length())
            );
        }
        Command::Prepare(config_args) => {
            let config = config_args.load()?;
            let manifest = prepare(&config)?;
            println!("Dataset written to {}", config.data.output_dir.display());
            println!("  Records:          {}", manifest.records);
            println!("  Block size:       {}", manifest.block_size);
            println!("  Blocks:           {}", manifest.blocks);
            println!("  Tokens:           {}", manifest.tokens);
            println!("  Discarded tokens: {}", manifest.discarded_tokens);
            println!("  Shards:           {}", manifest.shards.len());
        }
        Command::Launch {
            config: config_args,
            dry_run,
        } => {
            let config = config_args.load()?;
            if dry_run {
                let request = training::dry_run(&config)?;
                println!("{}", serde_json::to_string_pretty(&request)?);
                return Ok(());
            }

            let store = LocalStore::new(&config.storage.root);
            let submitter = SpoolSubmitter::new(&config.storage.spool_dir);
            let report = launch(&config, &store, &submitter)?;
            println!(
                "Submitted {} ({} blocks at {})",
                report.handle.job_name, report.manifest.blocks, report.request.dataset_location
            );
            println!("  Request: {}", report.handle.reference);
        }
    }

    Ok(())
}
