//! Tokenization and fixed-length block grouping.
//!
//! Documents are tokenized, their token ids concatenated in record order and
//! the resulting stream is cut into non-overlapping blocks of exactly
//! `block_size` tokens. Each block carries `labels`, an independent copy of
//! its `input_ids`, for the next-token objective.
//!
//! [`BlockPacker`] keeps the sub-block remainder of one batch and prepends it
//! to the next, so the emitted blocks do not depend on how the corpus was
//! partitioned into batches. Only the tail of the whole stream, shorter than
//! one block, is discarded.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokenizer::TokenEncoder;

use crate::errors::{DataError, Result, TokenizationError};
use crate::records::RawRecord;

/// Token ids of one record, with the attention mask kept aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSequence {
    input_ids: Vec<u32>,
    attention_mask: Vec<u32>,
}

impl TokenSequence {
    /// Unpadded sequence: every position is attended.
    pub fn from_ids(input_ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        Self {
            input_ids,
            attention_mask,
        }
    }

    pub fn input_ids(&self) -> &[u32] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[u32] {
        &self.attention_mask
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// One training example of exactly `block_size` tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels: Vec<u32>,
}

impl Block {
    fn new(input_ids: Vec<u32>, attention_mask: Vec<u32>) -> Self {
        let labels = input_ids.clone();
        Self {
            input_ids,
            attention_mask,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Tokenizes the `text_field` of `record`. `index` is the record's position in
/// the corpus and only feeds error messages.
pub fn tokenize<E>(
    record: &RawRecord,
    index: usize,
    text_field: &str,
    encoder: &E,
) -> std::result::Result<TokenSequence, TokenizationError>
where
    E: TokenEncoder + ?Sized,
{
    let text = match record.get(text_field) {
        Some(Value::String(text)) => text,
        Some(_) => {
            return Err(TokenizationError::NotText {
                index,
                field: text_field.to_owned(),
            })
        }
        None => {
            return Err(TokenizationError::MissingField {
                index,
                field: text_field.to_owned(),
            })
        }
    };

    let encoded = encoder
        .encode(text)
        .map_err(|source| TokenizationError::Encoder { index, source })?;

    if encoded.input_ids.len() != encoded.attention_mask.len() {
        return Err(TokenizationError::Misaligned {
            index,
            ids: encoded.input_ids.len(),
            mask: encoded.attention_mask.len(),
        });
    }

    Ok(TokenSequence {
        input_ids: encoded.input_ids,
        attention_mask: encoded.attention_mask,
    })
}

/// Concatenates `sequences` and slices the result into blocks, discarding the
/// trailing remainder. Fewer tokens than `block_size` yield no blocks.
pub fn group_into_blocks(sequences: &[TokenSequence], block_size: usize) -> Result<Vec<Block>> {
    let mut packer = BlockPacker::new(block_size)?;
    let blocks = packer.push(sequences);
    packer.finish();
    Ok(blocks)
}

/// Returns the block size actually used and whether it had to be clamped to
/// the tokenizer's maximum length.
pub fn effective_block_size(requested: usize, max_length: Option<usize>) -> (usize, bool) {
    match max_length {
        Some(limit) if requested > limit => (limit, true),
        _ => (requested, false),
    }
}

/// Streaming block grouping with a carry-over buffer between batches.
#[derive(Debug)]
pub struct BlockPacker {
    block_size: usize,
    input_ids: Vec<u32>,
    attention_mask: Vec<u32>,
    tokens_seen: usize,
    blocks_emitted: usize,
}

impl BlockPacker {
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(DataError::InvalidConfig(
                "block_size must be greater than zero".into(),
            ));
        }

        Ok(Self {
            block_size,
            input_ids: Vec::with_capacity(block_size),
            attention_mask: Vec::with_capacity(block_size),
            tokens_seen: 0,
            blocks_emitted: 0,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Tokens waiting for enough company to form a block.
    pub fn pending(&self) -> usize {
        self.input_ids.len()
    }

    pub fn tokens_seen(&self) -> usize {
        self.tokens_seen
    }

    pub fn blocks_emitted(&self) -> usize {
        self.blocks_emitted
    }

    /// Appends one batch of sequences and returns every block that is now
    /// complete, in stream order.
    pub fn push<'a, I>(&mut self, sequences: I) -> Vec<Block>
    where
        I: IntoIterator<Item = &'a TokenSequence>,
    {
        for sequence in sequences {
            self.input_ids.extend_from_slice(&sequence.input_ids);
            self.attention_mask.extend_from_slice(&sequence.attention_mask);
            self.tokens_seen += sequence.len();
        }

        let usable = (self.input_ids.len() / self.block_size) * self.block_size;
        if usable == 0 {
            return Vec::new();
        }

        let blocks: Vec<Block> = self.input_ids[..usable]
            .chunks_exact(self.block_size)
            .zip(self.attention_mask[..usable].chunks_exact(self.block_size))
            .map(|(ids, mask)| Block::new(ids.to_vec(), mask.to_vec()))
            .collect();

        self.input_ids.drain(..usable);
        self.attention_mask.drain(..usable);
        self.blocks_emitted += blocks.len();
        blocks
    }

    /// Ends the stream and returns the number of discarded tokens, always
    /// less than `block_size`.
    pub fn finish(self) -> usize {
        self.input_ids.len()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub text_field: String,
    pub block_size: usize,
    /// Records tokenized together before their tokens enter the packer.
    pub batch_size: usize,
}

impl ChunkerConfig {
    pub fn new(text_field: impl Into<String>, block_size: usize) -> Self {
        Self {
            text_field: text_field.into(),
            block_size,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Records per tokenization batch when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub records: usize,
    pub batches: usize,
    pub tokens: usize,
    pub blocks: usize,
    pub discarded_tokens: usize,
    pub requested_block_size: usize,
    pub block_size: usize,
    pub clamped: bool,
}

#[derive(Debug)]
pub struct ChunkOutput {
    pub blocks: Vec<Block>,
    pub stats: ChunkStats,
}

/// Drives records through tokenization and block grouping.
pub struct CorpusChunker<'a, E: TokenEncoder + ?Sized> {
    encoder: &'a E,
    text_field: String,
    requested_block_size: usize,
    block_size: usize,
    clamped: bool,
    batch_size: usize,
}

impl<'a, E: TokenEncoder + ?Sized> CorpusChunker<'a, E> {
    pub fn new(encoder: &'a E, config: &ChunkerConfig) -> Result<Self> {
        if config.block_size == 0 {
            return Err(DataError::InvalidConfig(
                "block_size must be greater than zero".into(),
            ));
        }
        if config.batch_size == 0 {
            return Err(DataError::InvalidConfig(
                "batch_size must be greater than zero".into(),
            ));
        }
        if config.text_field.is_empty() {
            return Err(DataError::InvalidConfig(
                "text field name must not be empty".into(),
            ));
        }

        let (block_size, clamped) = effective_block_size(config.block_size, encoder.max_length());
        if clamped {
            log::warn!(
                "requested block size {} exceeds the tokenizer maximum length; using {}",
                config.block_size,
                block_size
            );
        }

        Ok(Self {
            encoder,
            text_field: config.text_field.clone(),
            requested_block_size: config.block_size,
            block_size,
            clamped,
            batch_size: config.batch_size,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn was_clamped(&self) -> bool {
        self.clamped
    }

    /// Tokenizes one batch in parallel. Output order matches `batch`; the
    /// first failing record aborts the whole batch.
    pub fn tokenize_batch(
        &self,
        batch: &[RawRecord],
        first_index: usize,
    ) -> std::result::Result<Vec<TokenSequence>, TokenizationError> {
        batch
            .par_iter()
            .enumerate()
            .map(|(offset, record)| {
                tokenize(record, first_index + offset, &self.text_field, self.encoder)
            })
            .collect()
    }

    /// Chunks `records` and collects every block in memory.
    pub fn chunk<I>(&self, records: I) -> Result<ChunkOutput>
    where
        I: IntoIterator<Item = Result<RawRecord>>,
    {
        let mut blocks = Vec::new();
        let stats = self.chunk_with(records, |block| {
            blocks.push(block);
            Ok(())
        })?;
        Ok(ChunkOutput { blocks, stats })
    }

    /// Chunks `records`, handing each block to `sink` as soon as it is
    /// complete.
    pub fn chunk_with<I, F>(&self, records: I, mut sink: F) -> Result<ChunkStats>
    where
        I: IntoIterator<Item = Result<RawRecord>>,
        F: FnMut(Block) -> Result<()>,
    {
        let mut packer = BlockPacker::new(self.block_size)?;
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut stats = ChunkStats {
            requested_block_size: self.requested_block_size,
            block_size: self.block_size,
            clamped: self.clamped,
            ..ChunkStats::default()
        };

        let mut flush = |batch: &mut Vec<RawRecord>, stats: &mut ChunkStats| -> Result<()> {
            let sequences = self.tokenize_batch(batch, stats.records)?;
            stats.records += batch.len();
            stats.batches += 1;
            batch.clear();

            let blocks = packer.push(&sequences);
            log::debug!(
                "batch {}: {} block(s), {} token(s) carried over",
                stats.batches,
                blocks.len(),
                packer.pending()
            );
            for block in blocks {
                sink(block)?;
            }
            Ok(())
        };

        for record in records {
            batch.push(record?);
            if batch.len() >= self.batch_size {
                flush(&mut batch, &mut stats)?;
            }
        }
        if !batch.is_empty() {
            flush(&mut batch, &mut stats)?;
        }
        drop(flush);

        stats.tokens = packer.tokens_seen();
        stats.blocks = packer.blocks_emitted();
        stats.discarded_tokens = packer.finish();

        log::info!(
            "chunked {} record(s) into {} block(s) of {} tokens; {} trailing token(s) discarded",
            stats.records,
            stats.blocks,
            stats.block_size,
            stats.discarded_tokens
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenizer::Encoded;

    /// Whitespace tokenizer over a fixed id scheme: a word's id is its length.
    struct LengthEncoder {
        max_length: Option<usize>,
    }

    impl TokenEncoder for LengthEncoder {
        fn encode(&self, text: &str) -> tokenizer::Result<Encoded> {
            if text.contains('\u{fffd}') {
                return Err(tokenizer::Error::Encoding("replacement character".into()));
            }
            Ok(Encoded::from_ids(
                text.split_whitespace().map(|w| w.len() as u32).collect(),
            ))
        }

        fn max_length(&self) -> Option<usize> {
            self.max_length
        }
    }

    fn seq(ids: &[u32]) -> TokenSequence {
        TokenSequence::from_ids(ids.to_vec())
    }

    fn records(texts: &[&str]) -> Vec<Result<RawRecord>> {
        texts
            .iter()
            .map(|text| Ok(RawRecord::from_text("text", *text)))
            .collect()
    }

    #[test]
    fn groups_concatenated_stream_and_drops_remainder() {
        let blocks = group_into_blocks(&[seq(&[1, 2, 3]), seq(&[4, 5]), seq(&[6, 7, 8])], 3).unwrap();
        let ids: Vec<_> = blocks.iter().map(|b| b.input_ids.clone()).collect();
        assert_eq!(ids, vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert!(blocks.iter().all(|b| b.labels == b.input_ids));
    }

    #[test]
    fn undersized_batch_yields_no_blocks() {
        let blocks = group_into_blocks(&[seq(&[1, 2]), seq(&[3])], 4).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn zero_block_size_is_rejected() {
        assert!(matches!(
            group_into_blocks(&[seq(&[1])], 0),
            Err(DataError::InvalidConfig(_))
        ));
    }

    #[test]
    fn labels_are_independent_copies() {
        let mut blocks = group_into_blocks(&[seq(&[1, 2, 3, 4])], 2).unwrap();
        blocks[0].input_ids[0] = 99;
        assert_eq!(blocks[0].labels, vec![1, 2]);
        blocks[1].labels[1] = 77;
        assert_eq!(blocks[1].input_ids, vec![3, 4]);
    }

    #[test]
    fn packer_carries_remainder_across_batches() {
        let mut packer = BlockPacker::new(4).unwrap();
        assert!(packer.push(&[seq(&[1, 2, 3])]).is_empty());
        assert_eq!(packer.pending(), 3);

        let blocks = packer.push(&[seq(&[4, 5]), seq(&[6, 7, 8, 9])]);
        let ids: Vec<_> = blocks.iter().map(|b| b.input_ids.clone()).collect();
        assert_eq!(ids, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(packer.tokens_seen(), 9);
        assert_eq!(packer.finish(), 1);
    }

    #[test]
    fn block_size_is_clamped_to_tokenizer_limit() {
        assert_eq!(effective_block_size(4096, Some(2048)), (2048, true));
        assert_eq!(effective_block_size(1024, Some(2048)), (1024, false));
        assert_eq!(effective_block_size(4096, None), (4096, false));
    }

    #[test]
    fn chunker_reports_clamping_in_stats() {
        let encoder = LengthEncoder { max_length: Some(2) };
        let chunker = CorpusChunker::new(&encoder, &ChunkerConfig::new("text", 8)).unwrap();
        assert!(chunker.was_clamped());

        let output = chunker.chunk(records(&["a bb ccc", "dddd"])).unwrap();
        assert_eq!(output.stats.block_size, 2);
        assert_eq!(output.stats.requested_block_size, 8);
        assert!(output.stats.clamped);
        assert_eq!(output.stats.blocks, 2);
        assert_eq!(output.blocks[0].input_ids, vec![1, 2]);
        assert_eq!(output.blocks[1].input_ids, vec![3, 4]);
    }

    #[test]
    fn missing_text_field_aborts() {
        let encoder = LengthEncoder { max_length: None };
        let chunker = CorpusChunker::new(&encoder, &ChunkerConfig::new("text", 2)).unwrap();

        let mut other = RawRecord::new();
        other.insert("body", Value::String("a b".into()));
        let err = chunker
            .chunk(vec![Ok(RawRecord::from_text("text", "a b")), Ok(other)])
            .unwrap_err();

        match err {
            DataError::Tokenization(TokenizationError::MissingField { index, field }) => {
                assert_eq!(index, 1);
                assert_eq!(field, "text");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_text_field_aborts() {
        let encoder = LengthEncoder { max_length: None };
        let mut record = RawRecord::new();
        record.insert("text", Value::from(42));
        let err = tokenize(&record, 7, "text", &encoder).unwrap_err();
        assert!(matches!(err, TokenizationError::NotText { index: 7, .. }));
    }

    #[test]
    fn encoder_failure_aborts_batch() {
        let encoder = LengthEncoder { max_length: None };
        let chunker = CorpusChunker::new(&encoder, &ChunkerConfig::new("text", 1)).unwrap();
        let err = chunker
            .chunk(records(&["fine words", "broken \u{fffd}"]))
            .unwrap_err();
        assert!(matches!(
            err,
            DataError::Tokenization(TokenizationError::Encoder { index: 1, .. })
        ));
    }

    #[test]
    fn output_does_not_depend_on_batch_size() {
        let encoder = LengthEncoder { max_length: None };
        let texts = ["a bb", "ccc", "dddd eeeee f", "gg hhh", "i", "jjjj kk lll"];

        let mut baseline = None;
        for batch_size in [1, 2, 3, 4, 100] {
            let mut config = ChunkerConfig::new("text", 3);
            config.batch_size = batch_size;
            let chunker = CorpusChunker::new(&encoder, &config).unwrap();
            let output = chunker.chunk(records(&texts)).unwrap();
            match &baseline {
                None => baseline = Some(output.blocks),
                Some(expected) => assert_eq!(&output.blocks, expected, "batch_size {batch_size}"),
            }
        }
    }

    #[test]
    fn sink_errors_stop_chunking() {
        let encoder = LengthEncoder { max_length: None };
        let chunker = CorpusChunker::new(&encoder, &ChunkerConfig::new("text", 1)).unwrap();
        let mut seen = 0;
        let err = chunker
            .chunk_with(records(&["a b c"]), |_| {
                seen += 1;
                Err(DataError::Dataset("disk full".into()))
            })
            .unwrap_err();
        assert_eq!(seen, 1);
        assert!(matches!(err, DataError::Dataset(_)));
    }
}
