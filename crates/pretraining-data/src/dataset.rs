use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::chunker::{Block, ChunkStats};
use crate::errors::{DataError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Describes a dataset directory written by [`DatasetWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub format: String,
    pub fields: Vec<String>,
    pub block_size: usize,
    pub records: usize,
    pub blocks: usize,
    pub tokens: usize,
    pub discarded_tokens: usize,
    pub shards: Vec<ShardEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub file: String,
    pub blocks: usize,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct DatasetLayout {
    pub dir: PathBuf,
    pub prefix: String,
    pub blocks_per_shard: usize,
    pub include_attention_mask: bool,
}

impl DatasetLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: "train".into(),
            blocks_per_shard: DEFAULT_BLOCKS_PER_SHARD,
            include_attention_mask: false,
        }
    }
}

pub const DEFAULT_BLOCKS_PER_SHARD: usize = 10_000;

#[derive(Serialize)]
struct BlockRow<'a> {
    input_ids: &'a [u32],
    #[serde(skip_serializing_if = "Option::is_none")]
    attention_mask: Option<&'a [u32]>,
    labels: &'a [u32],
}

#[derive(Deserialize)]
struct StoredBlock {
    input_ids: Vec<u32>,
    #[serde(default)]
    attention_mask: Option<Vec<u32>>,
    labels: Vec<u32>,
}

struct OpenShard {
    writer: BufWriter<File>,
    file: String,
    blocks: usize,
    hasher: Sha256,
}

/// Writes blocks as JSON Lines shards of at most `blocks_per_shard` rows.
pub struct DatasetWriter {
    layout: DatasetLayout,
    shards: Vec<ShardEntry>,
    current: Option<OpenShard>,
    block_size: Option<usize>,
}

impl DatasetWriter {
    pub fn create(layout: DatasetLayout) -> Result<Self> {
        if layout.blocks_per_shard == 0 {
            return Err(DataError::InvalidConfig(
                "blocks_per_shard must be greater than zero".into(),
            ));
        }

        fs::create_dir_all(&layout.dir)?;
        remove_stale_outputs(&layout)?;
        Ok(Self {
            layout,
            shards: Vec::new(),
            current: None,
            block_size: None,
        })
    }

    pub fn write(&mut self, block: &Block) -> Result<()> {
        match self.block_size {
            None => self.block_size = Some(block.len()),
            Some(size) if size != block.len() => {
                return Err(DataError::Dataset(format!(
                    "block of {} tokens does not match dataset block size {size}",
                    block.len()
                )));
            }
            Some(_) => {}
        }

        let full = self
            .current
            .as_ref()
            .map_or(true, |shard| shard.blocks >= self.layout.blocks_per_shard);
        if full {
            self.rotate()?;
        }

        let row = BlockRow {
            input_ids: &block.input_ids,
            attention_mask: self
                .layout
                .include_attention_mask
                .then_some(block.attention_mask.as_slice()),
            labels: &block.labels,
        };
        let mut line = serde_json::to_vec(&row)?;
        line.push(b'\n');

        if let Some(shard) = self.current.as_mut() {
            shard.writer.write_all(&line)?;
            shard.hasher.update(&line);
            shard.blocks += 1;
        }
        Ok(())
    }

    /// Closes the last shard and writes `manifest.json`. An empty dataset
    /// still gets one empty shard.
    pub fn finish(mut self, stats: &ChunkStats) -> Result<DatasetManifest> {
        if self.current.is_none() && self.shards.is_empty() {
            self.rotate()?;
        }
        self.close_current()?;

        let mut fields = vec!["input_ids".to_owned()];
        if self.layout.include_attention_mask {
            fields.push("attention_mask".to_owned());
        }
        fields.push("labels".to_owned());

        let manifest = DatasetManifest {
            format: "jsonl".into(),
            fields,
            block_size: stats.block_size,
            records: stats.records,
            blocks: self.shards.iter().map(|shard| shard.blocks).sum(),
            tokens: stats.tokens,
            discarded_tokens: stats.discarded_tokens,
            shards: self.shards,
        };

        let path = self.layout.dir.join(MANIFEST_FILE);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &manifest)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        log::info!(
            "wrote {} block(s) in {} shard(s) to {}",
            manifest.blocks,
            manifest.shards.len(),
            self.layout.dir.display()
        );
        Ok(manifest)
    }

    fn rotate(&mut self) -> Result<()> {
        self.close_current()?;
        let file = format!("{}-{:05}.jsonl", self.layout.prefix, self.shards.len());
        let path = self.layout.dir.join(&file);
        log::debug!("opening shard {}", path.display());
        self.current = Some(OpenShard {
            writer: BufWriter::new(File::create(&path)?),
            file,
            blocks: 0,
            hasher: Sha256::new(),
        });
        Ok(())
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(mut shard) = self.current.take() {
            shard.writer.flush()?;
            self.shards.push(ShardEntry {
                file: shard.file,
                blocks: shard.blocks,
                sha256: hex::encode(shard.hasher.finalize()),
            });
        }
        Ok(())
    }
}

/// Deletes shards and the manifest left by an earlier run into the same
/// directory. Other files are left alone.
fn remove_stale_outputs(layout: &DatasetLayout) -> Result<()> {
    let shard_prefix = format!("{}-", layout.prefix);
    for entry in WalkDir::new(&layout.dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let stale = name == MANIFEST_FILE
            || (name.starts_with(&shard_prefix) && name.ends_with(".jsonl"));
        if stale {
            log::debug!("removing stale {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

pub fn read_manifest(dir: &Path) -> Result<DatasetManifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(DataError::Dataset(format!(
            "manifest not found at {}",
            path.display()
        )));
    }
    let reader = BufReader::new(File::open(&path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Loads every block of a dataset directory in shard order.
pub fn read_blocks(dir: &Path) -> Result<Vec<Block>> {
    let manifest = read_manifest(dir)?;
    let mut blocks = Vec::with_capacity(manifest.blocks);

    for shard in &manifest.shards {
        let path = dir.join(&shard.file);
        let reader = BufReader::new(File::open(&path)?);
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let stored: StoredBlock =
                serde_json::from_str(&line).map_err(|source| DataError::Record {
                    path: path.clone(),
                    line: idx + 1,
                    source,
                })?;
            let attention_mask = stored
                .attention_mask
                .unwrap_or_else(|| vec![1; stored.input_ids.len()]);
            blocks.push(Block {
                input_ids: stored.input_ids,
                attention_mask,
                labels: stored.labels,
            });
        }
    }

    if blocks.len() != manifest.blocks {
        return Err(DataError::Dataset(format!(
            "manifest lists {} block(s) but shards hold {}",
            manifest.blocks,
            blocks.len()
        )));
    }

    Ok(blocks)
}
