use anyhow::Result;
use std::path::Path;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

/// WordPiece/BPE токенизатор из `tokenizer.json` с усечением до max_length
pub struct SentenceTokenizer {
    inner: Tokenizer,
    max_length: usize,
}

/// Tokenization result with all necessary data
#[derive(Debug, Clone)]
pub struct TokenizedInput {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
    pub length: usize,
}

impl SentenceTokenizer {
    pub fn new(tokenizer_path: impl AsRef<Path>, max_length: usize) -> Result<Self> {
        let tokenizer_path = tokenizer_path.as_ref();
        if !tokenizer_path.exists() {
            return Err(anyhow::anyhow!(
                "Tokenizer file not found: {}",
                tokenizer_path.display()
            ));
        }

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        // Padding не нужен: кодируем по одному тексту
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to set truncation: {}", e))?;

        info!("✅ Tokenizer loaded from {}", tokenizer_path.display());
        info!("   Vocab size: {}", tokenizer.get_vocab_size(true));
        info!("   Max length: {}", max_length);

        Ok(Self {
            inner: tokenizer,
            max_length,
        })
    }

    pub fn encode(&self, text: &str) -> Result<TokenizedInput> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&mask| mask as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding
            .get_type_ids()
            .iter()
            .map(|&t| t as i64)
            .collect();
        let length = input_ids.len();

        debug!("Tokenized {} chars to {} tokens", text.len(), length);

        Ok(TokenizedInput {
            input_ids,
            attention_mask,
            token_type_ids,
            length,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}
