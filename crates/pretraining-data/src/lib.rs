//! Corpus preparation for language-model pretraining.
//!
//! Raw records are read from JSON Lines or plain text files, tokenized, and
//! grouped into fixed-length blocks that are written as a sharded dataset
//! directory. The directory can then be handed to a [`storage::DatasetStore`].

pub mod chunker;
pub mod dataset;
pub mod errors;
pub mod records;
pub mod storage;

pub use chunker::{
    effective_block_size, group_into_blocks, tokenize, Block, BlockPacker, ChunkOutput,
    ChunkStats, ChunkerConfig, CorpusChunker, TokenSequence,
};
pub use dataset::{read_blocks, read_manifest, DatasetLayout, DatasetManifest, DatasetWriter};
pub use errors::{DataError, Result, StorageError, TokenizationError};
pub use records::{CorpusFiles, CorpusFormat, RawRecord};
pub use storage::{DatasetStore, LocalStore};

use tokenizer::TokenEncoder;

/// Chunks `corpus` with `encoder` straight into a dataset directory.
pub fn prepare_dataset<E>(
    corpus: &CorpusFiles,
    encoder: &E,
    chunker: &ChunkerConfig,
    layout: DatasetLayout,
) -> Result<DatasetManifest>
where
    E: TokenEncoder + ?Sized,
{
    let chunker = CorpusChunker::new(encoder, chunker)?;
    let mut writer = DatasetWriter::create(layout)?;
    let stats = chunker.chunk_with(corpus.stream(), |block| writer.write(&block))?;
    writer.finish(&stats)
}
