use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Sub-word tokenizer used to build window inputs.
///
/// `encode` never adds special tokens; callers place `[CLS]`/`[SEP]` themselves.
pub trait SubwordTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, ids: &[u32]) -> Result<String>;
    fn sep_token_id(&self) -> u32;
    fn cls_token_id(&self) -> u32;

    /// Identifies the vocabulary; part of the result-cache key.
    fn fingerprint(&self) -> String;
}

/// `tokenizers` backed implementation loaded from a `tokenizer.json`.
pub struct HfTokenizer {
    tokenizer: tokenizers::Tokenizer,
    sep_token_id: u32,
    cls_token_id: u32,
    fingerprint: String,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .context(format!("Failed to read tokenizer: {:?}", path))?;
        let tokenizer = tokenizers::Tokenizer::from_bytes(&bytes).map_err(|e| {
            anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e)
        })?;

        let sep_token_id = Self::special_id(&tokenizer, &["[SEP]", "</s>"])
            .context("Tokenizer has no separator token")?;
        let cls_token_id = Self::special_id(&tokenizer, &["[CLS]", "<s>"])
            .context("Tokenizer has no classifier token")?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let fingerprint = hex::encode(&hasher.finalize()[..16]);

        tracing::info!(
            path = %path.display(),
            vocab_size = tokenizer.get_vocab_size(true),
            sep_token_id,
            cls_token_id,
            "Loaded tokenizer"
        );

        Ok(Self {
            tokenizer,
            sep_token_id,
            cls_token_id,
            fingerprint,
        })
    }

    fn special_id(tokenizer: &tokenizers::Tokenizer, candidates: &[&str]) -> Option<u32> {
        candidates.iter().find_map(|t| tokenizer.token_to_id(t))
    }
}

impl SubwordTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("encode failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, false)
            .map_err(|e| anyhow::anyhow!("decode failed: {}", e))
    }

    fn sep_token_id(&self) -> u32 {
        self.sep_token_id
    }

    fn cls_token_id(&self) -> u32 {
        self.cls_token_id
    }

    fn fingerprint(&self) -> String {
        self.fingerprint.clone()
    }
}
