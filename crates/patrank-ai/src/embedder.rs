//! Local sentence-transformers embeddings through ONNX Runtime.
//!
//! The model directory must contain `model.onnx` and `tokenizer.json`
//! (e.g. all-MiniLM-L6-v2, 384 dimensions). Vectors are mean-pooled over the
//! attention mask and L2-normalized.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{EmbeddingError, EmbeddingProvider};

/// Inputs per inference run.
const SUB_BATCH: usize = 256;
const MAX_TOKENS: usize = 256;

struct OnnxModel {
    session: Session,
    tokenizer: Tokenizer,
    dim: usize,
}

/// [`EmbeddingProvider`] backed by a local ONNX model.
///
/// Inference is CPU-bound and runs on the blocking pool; concurrent callers
/// are serialized on the model.
#[derive(Clone)]
pub struct OnnxEmbedder {
    model: Arc<Mutex<OnnxModel>>,
    dim: usize,
}

impl OnnxEmbedder {
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let dim = output_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams::default()));

        info!(dim, model = %model_path.display(), "loaded onnx embedding model");
        Ok(Self {
            model: Arc::new(Mutex::new(OnnxModel {
                session,
                tokenizer,
                dim,
            })),
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Model("model lock poisoned".into()))?;
            let mut out = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(SUB_BATCH) {
                debug!(inputs = chunk.len(), "running onnx inference");
                out.extend(
                    model
                        .run(chunk)
                        .map_err(|e| EmbeddingError::Model(format!("{e:#}")))?,
                );
            }
            Ok(out)
        })
        .await
        .map_err(|e| EmbeddingError::Model(format!("inference task failed: {e}")))?
    }
}

impl OnnxModel {
    fn run(&mut self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let batch = texts.len();
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

        let mut ids = vec![0i64; batch * seq_len];
        let mut mask = vec![0i64; batch * seq_len];
        let mut type_ids = vec![0i64; batch * seq_len];
        for (row, enc) in encodings.iter().enumerate() {
            let base = row * seq_len;
            let fields = enc.get_ids().iter().zip(enc.get_attention_mask()).zip(enc.get_type_ids());
            for (col, ((&id, &m), &t)) in fields.enumerate() {
                ids[base + col] = i64::from(id);
                mask[base + col] = i64::from(m);
                type_ids[base + col] = i64::from(t);
            }
        }

        let shape = [batch as i64, seq_len as i64];
        let ids = Tensor::from_array((shape, ids.into_boxed_slice()))?;
        let mask_tensor = Tensor::from_array((shape, mask.clone().into_boxed_slice()))?;
        let type_ids = Tensor::from_array((shape, type_ids.into_boxed_slice()))?;
        let outputs = self.session.run(ort::inputs![
            "input_ids" => ids,
            "attention_mask" => mask_tensor,
            "token_type_ids" => type_ids,
        ])?;

        let (out_shape, hidden) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = out_shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] as usize == batch && dims[2] as usize == self.dim,
            "unexpected output shape {dims:?}, expected [{batch}, _, {}]",
            self.dim
        );
        let out_seq = dims[1] as usize;

        Ok((0..batch)
            .map(|row| {
                let row_mask = &mask[row * seq_len..row * seq_len + out_seq.min(seq_len)];
                let row_hidden = &hidden[row * out_seq * self.dim..(row + 1) * out_seq * self.dim];
                let mut pooled = mean_pool(row_hidden, row_mask, self.dim);
                l2_normalize(&mut pooled);
                pooled
            })
            .collect())
    }
}

/// Average token vectors where `mask` is set. `hidden` is `[tokens, dim]` row-major.
fn mean_pool(hidden: &[f32], mask: &[i64], dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dim];
    let mut tokens = 0.0f32;
    for (token, &m) in hidden.chunks(dim).zip(mask) {
        if m > 0 {
            for (p, h) in pooled.iter_mut().zip(token) {
                *p += h;
            }
            tokens += 1.0;
        }
    }
    if tokens > 0.0 {
        pooled.iter_mut().for_each(|p| *p /= tokens);
    }
    pooled
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Last dimension of the first output, when the model declares it.
fn output_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => {
            shape.last().and_then(|&d| usize::try_from(d).ok()).filter(|d| *d > 0)
        }
        _ => None,
    }
}
