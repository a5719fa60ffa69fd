//! Token estimates for packed context, cached by content hash.

use anyhow::{Context, Result, anyhow};
use moka::sync::Cache;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base};
use xxhash_rust::xxh64::xxh64;

pub struct TokenCounter {
    bpe: CoreBPE,
    /// xxh64(text) → token count
    cache: Cache<u64, usize>,
}

impl TokenCounter {
    /// Model name (e.g. "gpt-4o") or encoding name ("o200k_base",
    /// "cl100k_base"), case-insensitive.
    pub fn new(model_or_encoding: &str) -> Result<Self> {
        let lower = model_or_encoding.to_ascii_lowercase();

        let bpe = match get_bpe_from_model(&lower) {
            Ok(b) => b,
            Err(_) => match lower.as_str() {
                "o200k_base" => o200k_base().context("load o200k_base")?,
                "cl100k_base" => cl100k_base().context("load cl100k_base")?,
                _ => return Err(anyhow!("Unsupported model/encoding: {model_or_encoding}")),
            },
        };

        Ok(Self {
            bpe,
            cache: Cache::new(10_000),
        })
    }

    pub fn count(&self, s: &str) -> usize {
        let key = xxh64(s.as_bytes(), 0);
        if let Some(t) = self.cache.get(&key) {
            return t;
        }

        let t = self.bpe.encode_ordinary(s).len();
        self.cache.insert(key, t);
        t
    }
}
