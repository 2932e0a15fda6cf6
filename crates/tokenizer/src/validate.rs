use crate::config::Config;
use crate::errors::{Error, Result};
use tokenizers::Tokenizer;

pub fn validate_config(cfg: &Config) -> Result<()> {
    if !cfg.expects_single_file() {
        match (&cfg.artifacts.vocab_json, &cfg.artifacts.merges_txt) {
            (Some(_), Some(_)) => {}
            (Some(_), None) => {
                return Err(Error::Validation(
                    "artifacts.vocab_json requires artifacts.merges_txt".into(),
                ));
            }
            (None, Some(_)) => {
                return Err(Error::Validation(
                    "artifacts.merges_txt requires artifacts.vocab_json".into(),
                ));
            }
            (None, None) => {
                return Err(Error::Validation(
                    "artifacts must name tokenizer_json or both vocab_json and merges_txt".into(),
                ));
            }
        }
    }

    if let Some(0) = cfg.max_length {
        return Err(Error::Validation(
            "max_length must be greater than zero when set".into(),
        ));
    }

    if cfg.artifacts.dir.exists() && !cfg.artifacts.dir.is_dir() {
        return Err(Error::Validation(format!(
            "artifact directory path '{}' exists but is not a directory",
            cfg.artifacts.dir.display()
        )));
    }

    Ok(())
}

pub fn validate_tokenizer(tok: &Tokenizer) -> Result<()> {
    if tok.get_vocab_size(true) == 0 {
        return Err(Error::Validation("tokenizer vocabulary is empty".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rejects_half_split_artifacts() {
        let mut cfg = Config::from_dir("artifacts");
        cfg.artifacts.tokenizer_json = None;
        cfg.artifacts.vocab_json = Some(PathBuf::from("vocab.json"));
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("merges_txt"));
    }

    #[test]
    fn rejects_zero_max_length() {
        let mut cfg = Config::from_dir("artifacts");
        cfg.max_length = Some(0);
        assert!(matches!(validate_config(&cfg), Err(Error::Validation(_))));
    }

    #[test]
    fn accepts_single_file_config() {
        let cfg = Config::from_dir("artifacts");
        assert!(validate_config(&cfg).is_ok());
    }
}
