use crate::embeddings::Embedder;
use crate::AiError;
use sha2::{Digest, Sha256};

/// Детерминированный embedder без модели: feature hashing токенов.
///
/// Каждый токен (lowercase, разбиение по не-буквенно-цифровым символам)
/// хешируется SHA-256 в одну из `dimension` корзин со знаком ±1,
/// результат L2-нормализуется. Тексты с общими словами получают
/// положительное косинусное сходство, что достаточно для offline
/// режима и тестов.
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("hashing-{dimension}"),
        }
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        if self.dimension == 0 {
            return Err(AiError::ValidationError("dimension must be > 0".into()));
        }

        let mut v = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}
