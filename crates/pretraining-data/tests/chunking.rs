use pretraining_data::{
    group_into_blocks, BlockPacker, ChunkerConfig, CorpusChunker, RawRecord, TokenSequence,
};
use proptest::prelude::*;
use tokenizer::{Encoded, TokenEncoder};

/// Maps every byte of the text to its value; deterministic and total.
struct ByteEncoder;

impl TokenEncoder for ByteEncoder {
    fn encode(&self, text: &str) -> tokenizer::Result<Encoded> {
        Ok(Encoded::from_ids(text.bytes().map(u32::from).collect()))
    }

    fn max_length(&self) -> Option<usize> {
        None
    }
}

fn sequences_strategy() -> impl Strategy<Value = Vec<Vec<u32>>> {
    prop::collection::vec(prop::collection::vec(0u32..50_000, 0..40), 0..30)
}

fn to_sequences(raw: &[Vec<u32>]) -> Vec<TokenSequence> {
    raw.iter().cloned().map(TokenSequence::from_ids).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn every_block_has_exact_length(raw in sequences_strategy(), block_size in 1usize..64) {
        let blocks = group_into_blocks(&to_sequences(&raw), block_size).unwrap();
        for block in &blocks {
            prop_assert_eq!(block.input_ids.len(), block_size);
            prop_assert_eq!(block.labels.len(), block_size);
            prop_assert_eq!(block.attention_mask.len(), block_size);
        }
    }

    #[test]
    fn labels_equal_input_ids(raw in sequences_strategy(), block_size in 1usize..64) {
        let blocks = group_into_blocks(&to_sequences(&raw), block_size).unwrap();
        for block in &blocks {
            prop_assert_eq!(&block.labels, &block.input_ids);
        }
    }

    #[test]
    fn blocks_are_a_prefix_of_the_stream(raw in sequences_strategy(), block_size in 1usize..64) {
        let stream: Vec<u32> = raw.iter().flatten().copied().collect();
        let blocks = group_into_blocks(&to_sequences(&raw), block_size).unwrap();

        let emitted: Vec<u32> = blocks.iter().flat_map(|b| b.input_ids.iter().copied()).collect();
        let usable = (stream.len() / block_size) * block_size;
        prop_assert_eq!(emitted.len(), usable);
        prop_assert_eq!(&emitted[..], &stream[..usable]);
        prop_assert!(stream.len() - usable < block_size);
    }

    #[test]
    fn packer_is_invariant_to_batch_boundaries(
        raw in sequences_strategy(),
        block_size in 1usize..64,
        split in 1usize..8,
    ) {
        let sequences = to_sequences(&raw);
        let whole = group_into_blocks(&sequences, block_size).unwrap();

        let mut packer = BlockPacker::new(block_size).unwrap();
        let mut batched = Vec::new();
        for batch in sequences.chunks(split) {
            batched.extend(packer.push(batch));
        }
        let total: usize = raw.iter().map(Vec::len).sum();
        prop_assert_eq!(packer.finish(), total % block_size);
        prop_assert_eq!(batched, whole);
    }

    #[test]
    fn chunker_is_invariant_to_batch_size(
        texts in prop::collection::vec("[a-z ]{0,30}", 0..25),
        block_size in 1usize..32,
        batch_size in 1usize..10,
    ) {
        let records = || texts.iter().map(|t| Ok(RawRecord::from_text("text", t.as_str())));

        let reference = CorpusChunker::new(&ByteEncoder, &ChunkerConfig::new("text", block_size))
            .unwrap()
            .chunk(records())
            .unwrap();

        let mut config = ChunkerConfig::new("text", block_size);
        config.batch_size = batch_size;
        let batched = CorpusChunker::new(&ByteEncoder, &config)
            .unwrap()
            .chunk(records())
            .unwrap();

        prop_assert_eq!(batched.blocks, reference.blocks);
        prop_assert_eq!(batched.stats.discarded_tokens, reference.stats.discarded_tokens);
        prop_assert_eq!(batched.stats.tokens, reference.stats.tokens);
    }
}

#[test]
fn fewer_tokens_than_a_block_yield_nothing() {
    let sequences = to_sequences(&[vec![1, 2], vec![3], vec![]]);
    let blocks = group_into_blocks(&sequences, 4).unwrap();
    assert!(blocks.is_empty());
}

#[test]
fn chunking_twice_is_byte_identical() {
    let texts = ["The quick brown fox", "jumps over", "the lazy dog."];
    let run = || {
        let chunker = CorpusChunker::new(&ByteEncoder, &ChunkerConfig::new("text", 5)).unwrap();
        let output = chunker
            .chunk(texts.iter().map(|t| Ok(RawRecord::from_text("text", *t))))
            .unwrap();
        serde_json::to_vec(&output.blocks).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn stats_account_for_every_token() {
    let texts = ["abcdefg", "hij", "klmnopqrs"];
    let chunker = CorpusChunker::new(&ByteEncoder, &ChunkerConfig::new("text", 4)).unwrap();
    let output = chunker
        .chunk(texts.iter().map(|t| Ok(RawRecord::from_text("text", *t))))
        .unwrap();

    assert_eq!(output.stats.records, 3);
    assert_eq!(output.stats.tokens, 19);
    assert_eq!(output.stats.blocks, 4);
    assert_eq!(output.stats.discarded_tokens, 3);
    assert_eq!(output.blocks.len(), 4);
}
