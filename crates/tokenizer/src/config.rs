use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub artifacts: ArtifactsCfg,
    #[serde(default)]
    pub pretokenizer: ByteLevelCfg,
    /// Overrides the maximum sequence length read from the artifacts.
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Whether the tokenizer's post-processor (BOS/EOS templates) runs on
    /// every encoded document.
    #[serde(default = "default_add_special_tokens")]
    pub add_special_tokens: bool,
}

/// Byte-level pre-tokenizer settings, only used for split
/// `vocab.json` + `merges.txt` artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByteLevelCfg {
    pub add_prefix_space: bool,
    pub trim_offsets: bool,
    pub use_regex: bool,
}

impl Default for ByteLevelCfg {
    fn default() -> Self {
        Self {
            add_prefix_space: false,
            trim_offsets: true,
            use_regex: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsCfg {
    pub dir: PathBuf,
    #[serde(default)]
    pub tokenizer_json: Option<PathBuf>,
    #[serde(default)]
    pub vocab_json: Option<PathBuf>,
    #[serde(default)]
    pub merges_txt: Option<PathBuf>,
    /// Hugging Face `tokenizer_config.json`; looked up in `dir` when unset.
    #[serde(default)]
    pub tokenizer_config_json: Option<PathBuf>,
}

impl Config {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts: ArtifactsCfg {
                dir: dir.into(),
                tokenizer_json: Some(PathBuf::from("tokenizer.json")),
                vocab_json: None,
                merges_txt: None,
                tokenizer_config_json: None,
            },
            pretokenizer: ByteLevelCfg::default(),
            max_length: None,
            add_special_tokens: default_add_special_tokens(),
        }
    }

    pub fn expects_single_file(&self) -> bool {
        self.artifacts.tokenizer_json.is_some()
    }

    pub fn expects_split_files(&self) -> bool {
        self.artifacts.vocab_json.is_some() && self.artifacts.merges_txt.is_some()
    }
}

fn default_add_special_tokens() -> bool {
    true
}
