use crate::errors::{Error, Result};
use tokenizers::Tokenizer;

/// Token ids for one document together with their attention mask.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Encoded {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl Encoded {
    /// Builds an unpadded encoding: every position is attended.
    pub fn from_ids(input_ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        Self {
            input_ids,
            attention_mask,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

pub trait TokenEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Encoded>;

    /// Longest sequence the associated model accepts, if known.
    fn max_length(&self) -> Option<usize>;
}

/// [`TokenEncoder`] backed by a `tokenizers` pipeline.
#[derive(Clone)]
pub struct TextTokenizer {
    inner: Tokenizer,
    max_length: Option<usize>,
    add_special_tokens: bool,
}

impl TextTokenizer {
    pub fn new(inner: Tokenizer, max_length: Option<usize>) -> Self {
        Self {
            inner,
            max_length,
            add_special_tokens: true,
        }
    }

    pub fn with_special_tokens(mut self, enabled: bool) -> Self {
        self.add_special_tokens = enabled;
        self
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    pub fn inner(&self) -> &Tokenizer {
        &self.inner
    }
}

impl std::fmt::Debug for TextTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextTokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("max_length", &self.max_length)
            .field("add_special_tokens", &self.add_special_tokens)
            .finish()
    }
}

impl TokenEncoder for TextTokenizer {
    fn encode(&self, text: &str) -> Result<Encoded> {
        let encoding = self
            .inner
            .encode(text, self.add_special_tokens)
            .map_err(|err| Error::Encoding(err.to_string()))?;

        Ok(Encoded {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
        })
    }

    fn max_length(&self) -> Option<usize> {
        self.max_length
    }
}
