use crate::config::ByteLevelCfg;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;

pub fn build_byte_level(cfg: &ByteLevelCfg) -> ByteLevel {
    ByteLevel::new(cfg.add_prefix_space, cfg.trim_offsets, cfg.use_regex)
}

/// Byte-level decoding mirrors the pre-tokenizer; offsets are irrelevant here.
pub fn build_byte_level_decoder() -> ByteLevel {
    ByteLevel::default()
}
