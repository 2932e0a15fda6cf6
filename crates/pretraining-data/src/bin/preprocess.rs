use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use pretraining_data::chunker::DEFAULT_BATCH_SIZE;
use pretraining_data::dataset::DEFAULT_BLOCKS_PER_SHARD;
use pretraining_data::{
    prepare_dataset, ChunkerConfig, CorpusFiles, DatasetLayout, DatasetStore, LocalStore,
};
use tokenizer::TokenEncoder;

#[derive(Debug, Parser)]
#[command(
    name = "preprocess",
    about = "Tokenize a text corpus into fixed-length pretraining blocks"
)]
struct Args {
    #[arg(long = "input", required = true, help = "Corpus file (.jsonl or .txt); repeatable")]
    inputs: Vec<PathBuf>,

    #[arg(long, help = "Directory holding tokenizer.json (and tokenizer_config.json)")]
    tokenizer_dir: PathBuf,

    #[arg(long, default_value = "text", help = "Record field to tokenize")]
    text_field: String,

    #[arg(long, default_value_t = 4_096, help = "Tokens per block")]
    block_size: usize,

    #[arg(long, help = "Override the tokenizer's maximum sequence length")]
    max_length: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, help = "Records per tokenization batch")]
    batch_size: usize,

    #[arg(long, help = "Output dataset directory")]
    output: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BLOCKS_PER_SHARD, help = "Blocks per output shard")]
    blocks_per_shard: usize,

    #[arg(long, help = "Also write the attention mask for each block")]
    attention_mask: bool,

    #[arg(long, help = "Local store root to upload the dataset into")]
    upload_root: Option<PathBuf>,

    #[arg(
        long,
        requires = "upload_root",
        help = "Destination location, e.g. s3://bucket/datasets/corpus"
    )]
    destination: Option<String>,

    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let mut tokenizer_cfg = tokenizer::Config::from_dir(&args.tokenizer_dir);
    tokenizer_cfg.max_length = args.max_length;
    let encoder = tokenizer::load(&tokenizer_cfg)
        .with_context(|| format!("loading tokenizer from {}", args.tokenizer_dir.display()))?;
    log::info!(
        "tokenizer loaded: vocab={} max_length={:?}",
        encoder.vocab_size(),
        encoder.max_length()
    );

    let corpus = CorpusFiles::new(args.inputs.clone(), args.text_field.clone())?;
    let chunker = ChunkerConfig {
        text_field: args.text_field.clone(),
        block_size: args.block_size,
        batch_size: args.batch_size,
    };
    let layout = DatasetLayout {
        dir: args.output.clone(),
        prefix: "train".into(),
        blocks_per_shard: args.blocks_per_shard,
        include_attention_mask: args.attention_mask,
    };

    let manifest = prepare_dataset(&corpus, &encoder, &chunker, layout)
        .context("preparing dataset")?;

    println!("Dataset written to {}", args.output.display());
    println!("  Records:          {}", manifest.records);
    println!("  Block size:       {}", manifest.block_size);
    println!("  Blocks:           {}", manifest.blocks);
    println!("  Tokens:           {}", manifest.tokens);
    println!("  Discarded tokens: {}", manifest.discarded_tokens);
    println!("  Shards:           {}", manifest.shards.len());

    if let (Some(root), Some(destination)) = (args.upload_root.as_ref(), args.destination.as_ref())
    {
        let store = LocalStore::new(root);
        let location = store
            .upload(&args.output, destination)
            .with_context(|| format!("uploading dataset to {destination}"))?;
        println!("Uploaded via {} store to {}", store.backend_type(), location);
    }

    Ok(())
}
