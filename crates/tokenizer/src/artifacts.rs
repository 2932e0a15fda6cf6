use crate::config::ArtifactsCfg;
use crate::errors::{Error, Result};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tokenizers::models::bpe::BPE;
use tokenizers::Tokenizer;

const TOKENIZER_JSON_ERR: &str = "tokenizer json not found at";
const VOCAB_JSON_ERR: &str = "vocab json not found at";
const MERGES_TXT_ERR: &str = "merges txt not found at";
const TOKENIZER_CONFIG_ERR: &str = "tokenizer config not found at";

const DEFAULT_TOKENIZER_CONFIG: &str = "tokenizer_config.json";

/// `transformers` writes `int(1e30)` as `model_max_length` for tokenizers
/// without a real limit; anything at or above this is treated as unbounded.
const UNBOUNDED_MAX_LENGTH: f64 = 1e18;

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub json: Option<PathBuf>,
    pub vocab: Option<PathBuf>,
    pub merges: Option<PathBuf>,
    pub tokenizer_config: Option<PathBuf>,
}

pub fn load_tokenizer_from_json(path: &Path) -> Result<Tokenizer> {
    ensure_file(path, TOKENIZER_JSON_ERR)?;
    Tokenizer::from_file(path).map_err(Error::from)
}

pub fn load_bpe_from_vocab_merges(vocab: &Path, merges: &Path) -> Result<BPE> {
    ensure_file(vocab, VOCAB_JSON_ERR)?;
    ensure_file(merges, MERGES_TXT_ERR)?;

    let vocab_str = path_to_string(vocab)?;
    let merges_str = path_to_string(merges)?;

    BPE::from_file(&vocab_str, &merges_str)
        .build()
        .map_err(Error::from)
}

/// Reads `model_max_length` from a Hugging Face `tokenizer_config.json`.
///
/// Returns `Ok(None)` when the key is missing, null, or holds the
/// "no limit" sentinel.
pub fn read_model_max_length(path: &Path) -> Result<Option<usize>> {
    ensure_file(path, TOKENIZER_CONFIG_ERR)?;
    let file = File::open(path)?;
    let value: Value = serde_json::from_reader(BufReader::new(file))?;

    let Some(raw) = value.get("model_max_length") else {
        return Ok(None);
    };

    if let Some(length) = raw.as_u64() {
        return usize::try_from(length)
            .map(Some)
            .map_err(|_| Error::Artifact(format!("model_max_length {length} overflows usize")));
    }

    match raw.as_f64() {
        Some(length) if length >= UNBOUNDED_MAX_LENGTH => Ok(None),
        Some(length) if length >= 1.0 && length.fract() == 0.0 => Ok(Some(length as usize)),
        Some(length) => Err(Error::Artifact(format!(
            "model_max_length must be a positive integer (got {length}) in {}",
            path.display()
        ))),
        None if raw.is_null() => Ok(None),
        None => Err(Error::Artifact(format!(
            "model_max_length must be numeric in {}",
            path.display()
        ))),
    }
}

pub fn resolve_paths(cfg: &ArtifactsCfg) -> Result<ArtifactPaths> {
    let dir = cfg.dir.as_path();
    if !dir.is_dir() {
        return Err(Error::Artifact(format!(
            "artifact directory not found at {}",
            dir.display()
        )));
    }

    let resolve = |value: &Option<PathBuf>| -> Option<PathBuf> {
        value.as_ref().map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                dir.join(path)
            }
        })
    };

    let tokenizer_json = resolve(&cfg.tokenizer_json);
    let vocab_json = resolve(&cfg.vocab_json);
    let merges_txt = resolve(&cfg.merges_txt);

    // An explicit tokenizer config must exist; the implicit one is optional.
    let tokenizer_config = match resolve(&cfg.tokenizer_config_json) {
        Some(path) => {
            ensure_file(&path, TOKENIZER_CONFIG_ERR)?;
            Some(path)
        }
        None => Some(dir.join(DEFAULT_TOKENIZER_CONFIG)).filter(|path| path.is_file()),
    };

    if let Some(ref path) = tokenizer_json {
        ensure_file(path, TOKENIZER_JSON_ERR)?;
    }

    if let Some(ref path) = vocab_json {
        ensure_file(path, VOCAB_JSON_ERR)?;
    }

    if let Some(ref path) = merges_txt {
        ensure_file(path, MERGES_TXT_ERR)?;
    }

    if tokenizer_json.is_none() {
        match (&vocab_json, &merges_txt) {
            (Some(_), Some(_)) => {}
            (None, Some(path)) => {
                return Err(Error::Artifact(format!(
                    "vocab json path is required when merges txt is set (missing for {})",
                    path.display()
                )));
            }
            (Some(path), None) => {
                return Err(Error::Artifact(format!(
                    "merges txt path is required when vocab json is set (missing for {})",
                    path.display()
                )));
            }
            (None, None) => {
                return Err(Error::Artifact(
                    "artifacts must specify either tokenizer_json or both vocab_json and merges_txt"
                        .into(),
                ));
            }
        }
    }

    Ok(ArtifactPaths {
        json: tokenizer_json,
        vocab: vocab_json,
        merges: merges_txt,
        tokenizer_config,
    })
}

fn ensure_file(path: &Path, context: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::Artifact(format!("{context} {}", path.display())))
    }
}

fn path_to_string(path: &Path) -> Result<String> {
    path.to_str()
        .map(|s| s.to_owned())
        .ok_or_else(|| Error::Artifact(format!("path is not valid UTF-8: {}", path.display())))
}
