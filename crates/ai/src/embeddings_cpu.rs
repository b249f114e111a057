use crate::embeddings::Embedder;
use crate::tokenization::SentenceTokenizer;
use crate::AiError;
use anyhow::Result as AnyhowResult;
use ort::{inputs, session::Session, value::Tensor};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

/// Sentence-transformer (BERT-подобная модель) на CPU через ONNX Runtime.
///
/// Эмбеддинг = mean pooling скрытых состояний по attention mask + L2 нормализация,
/// как у sentence-transformers.
pub struct OnnxSentenceEmbedder {
    session: Mutex<Session>,
    tokenizer: SentenceTokenizer,
    model_id: String,
    dimension: usize,
}

impl OnnxSentenceEmbedder {
    /// Загрузить модель из каталога с `model.onnx` и `tokenizer.json`.
    ///
    /// Блокирующая операция, вызывать из `spawn_blocking`.
    pub fn load(
        model_dir: &Path,
        model_id: &str,
        dimension: usize,
        max_length: usize,
        intra_threads: usize,
    ) -> Result<Self, AiError> {
        Self::load_inner(model_dir, model_id, dimension, max_length, intra_threads)
            .map_err(|e| AiError::ModelLoadError(format!("{}: {}", model_dir.display(), e)))
    }

    fn load_inner(
        model_dir: &Path,
        model_id: &str,
        dimension: usize,
        max_length: usize,
        intra_threads: usize,
    ) -> AnyhowResult<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !model_path.exists() {
            return Err(anyhow::anyhow!("model.onnx not found"));
        }

        crate::ort_setup::configure_ort_env();
        ort::init().with_name("oracle_embeddings").commit()?;

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(&model_path)?;

        info!("✅ ONNX session created");
        info!("   Model: {}", model_path.display());
        info!("   Inputs: {}", session.inputs.len());

        let tokenizer = SentenceTokenizer::new(tokenizer_path, max_length)?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: model_id.to_string(),
            dimension,
        })
    }

    fn run_single(&self, text: &str) -> AnyhowResult<Vec<f32>> {
        let tokenized = self.tokenizer.encode(text)?;
        let seq_len = tokenized.length;
        if seq_len == 0 {
            return Err(anyhow::anyhow!("Tokenizer produced no tokens"));
        }

        let input_ids_tensor = Tensor::from_array(([1, seq_len], tokenized.input_ids))?;
        let attention_mask_tensor =
            Tensor::from_array(([1, seq_len], tokenized.attention_mask.clone()))?;
        let token_type_ids_tensor = Tensor::from_array(([1, seq_len], tokenized.token_type_ids))?;

        let mut session = self.session.lock();

        // Некоторые экспорты MiniLM не имеют входа token_type_ids
        let outputs = if session.inputs.len() == 2 {
            session.run(inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])?
        } else {
            session.run(inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor
            ])?
        };

        for (_name, output) in outputs.iter() {
            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                let shape_vec: Vec<i64> = (0..shape.len()).map(|i| shape[i]).collect();

                // last_hidden_state [1, seq_len, hidden]
                if shape_vec.len() == 3 && shape_vec[0] == 1 && shape_vec[1] == seq_len as i64 {
                    let hidden_size = shape_vec[2] as usize;
                    let pooled =
                        mean_pooling(data, &tokenized.attention_mask, seq_len, hidden_size);
                    debug!("Extracted embedding: {} dims", pooled.len());
                    return Ok(l2_normalize(pooled));
                }

                // sentence_embedding [1, hidden]
                if shape_vec.len() == 2 && shape_vec[0] == 1 {
                    return Ok(l2_normalize(data.to_vec()));
                }
            }
        }

        Err(anyhow::anyhow!("Could not extract embeddings from model outputs"))
    }
}

impl Embedder for OnnxSentenceEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        self.run_single(text)
            .map_err(|e| AiError::InferenceError(e.to_string()))
    }
}

/// Среднее скрытых состояний по токенам с mask = 1
pub(crate) fn mean_pooling(
    hidden: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;

    for token in 0..seq_len {
        if attention_mask.get(token).copied().unwrap_or(0) == 0 {
            continue;
        }
        let row = &hidden[token * hidden_size..(token + 1) * hidden_size];
        for (acc, value) in pooled.iter_mut().zip(row) {
            *acc += value;
        }
        count += 1.0;
    }

    if count > 0.0 {
        for value in pooled.iter_mut() {
            *value /= count;
        }
    }
    pooled
}

pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}
