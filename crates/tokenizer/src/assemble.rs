use crate::artifacts::{
    load_bpe_from_vocab_merges, load_tokenizer_from_json, read_model_max_length, resolve_paths,
    ArtifactPaths,
};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::pretokenizer::{build_byte_level, build_byte_level_decoder};
use tokenizers::Tokenizer;

/// Loads the tokenizer and resolves its maximum sequence length.
pub fn build_from_artifacts(cfg: &Config) -> Result<(Tokenizer, Option<usize>)> {
    let ArtifactPaths {
        json,
        vocab,
        merges,
        tokenizer_config,
    } = resolve_paths(&cfg.artifacts)?;

    let mut tokenizer = if let Some(json_path) = json {
        log::debug!("loading tokenizer from {}", json_path.display());
        load_tokenizer_from_json(&json_path)?
    } else {
        let vocab_path = vocab.ok_or_else(|| {
            Error::Artifact("vocab_json path is required when tokenizer_json is absent".into())
        })?;
        let merges_path = merges.ok_or_else(|| {
            Error::Artifact("merges_txt path is required when tokenizer_json is absent".into())
        })?;

        log::debug!(
            "assembling byte-level BPE from {} and {}",
            vocab_path.display(),
            merges_path.display()
        );
        let bpe = load_bpe_from_vocab_merges(&vocab_path, &merges_path)?;
        let mut tokenizer = Tokenizer::new(bpe);
        tokenizer.with_pre_tokenizer(Some(build_byte_level(&cfg.pretokenizer)));
        tokenizer.with_decoder(Some(build_byte_level_decoder()));
        tokenizer
    };

    // Documents are concatenated and sliced downstream; every token counts.
    tokenizer.with_truncation(None).map_err(Error::from)?;
    tokenizer.with_padding(None);

    let max_length = match cfg.max_length {
        Some(length) => Some(length),
        None => match tokenizer_config {
            Some(path) => read_model_max_length(&path)?,
            None => None,
        },
    };

    ensure_send_sync(&tokenizer);

    Ok((tokenizer, max_length))
}

fn ensure_send_sync<T: Send + Sync>(_: &T) {}
