//! Tokenizer loading for corpus preparation.
//!
//! This crate exposes a small surface for loading a pretrained tokenizer
//! described by [`Config`] and using it to turn text into token ids. The
//! artifacts can come from a bundled `tokenizer.json` or from split
//! `vocab.json` + `merges.txt` pairs, in which case a byte-level
//! pre-tokenizer and decoder are attached.
//!
//! # Maximum length
//!
//! Every loaded tokenizer reports the longest sequence the model it belongs
//! to accepts. The value is taken, in order, from the explicit
//! `max_length` override in [`Config`], from `model_max_length` in a
//! Hugging Face style `tokenizer_config.json`, and is otherwise unknown.
//! Callers that slice token streams into fixed windows use it to clamp the
//! window size.
//!
//! # Encoding
//!
//! Loaded tokenizers have truncation and padding disabled so that encoding a
//! document yields every token it contains. The [`TokenEncoder`] trait is the
//! seam consumers depend on; [`TextTokenizer`] is the implementation backed
//! by the `tokenizers` crate.
//!
//! # Thread Safety
//!
//! [`TokenEncoder`] requires `Send + Sync`, so a single tokenizer can be
//! shared across a parallel encoding pass without extra synchronization.

pub mod config;
pub mod errors;

mod artifacts;
mod assemble;
mod encoder;
mod pretokenizer;
mod validate;

pub use artifacts::read_model_max_length;
pub use config::{ArtifactsCfg, ByteLevelCfg, Config};
pub use encoder::{Encoded, TextTokenizer, TokenEncoder};
pub use errors::{Error, Result};

/// Validates `cfg`, loads the tokenizer artifacts it points at and resolves
/// the maximum sequence length.
pub fn load(cfg: &Config) -> Result<TextTokenizer> {
    validate::validate_config(cfg)?;
    let (tokenizer, max_length) = assemble::build_from_artifacts(cfg)?;
    validate::validate_tokenizer(&tokenizer)?;
    Ok(TextTokenizer::new(tokenizer, max_length).with_special_tokens(cfg.add_special_tokens))
}
