//! Local embedding via tract-onnx.
//!
//! Pure-Rust inference path: the transformer is loaded with tract-onnx and
//! driven with fixed-length `[1, L]` input tensors produced by the
//! WordPiece tokenizer. The model session and vocabulary are loaded once,
//! lazily, and shared by every caller; inference runs on the blocking
//! thread pool with a mutex serializing `run`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tract_onnx::prelude::*;

use crate::embedding::wordpiece::Vocabulary;
use crate::embedding::{normalize_l2, Embedder};

/// Embedding dimension of the default model (all-MiniLM-L6-v2).
pub const DEFAULT_DIMS: usize = 384;
/// Fixed input sequence length for the default model.
pub const DEFAULT_SEQ_LEN: usize = 256;

const MODEL_FILE_NAME: &str = "model.onnx";
const VOCAB_FILE_NAME: &str = "vocab.txt";
const MODELS_DIR: &str = "Models";

type OnnxPlan = TypedRunnableModel<TypedModel>;

/// On-device embedder over a transformer ONNX model.
pub struct LocalEmbedder {
    model_path: PathBuf,
    dims: usize,
    seq_len: usize,
    state: tokio::sync::OnceCell<Arc<ModelState>>,
}

struct ModelState {
    plan: OnnxPlan,
    run_lock: Mutex<()>,
    vocab: Vocabulary,
}

impl LocalEmbedder {
    /// Create an embedder for the default model dimensions. The model file
    /// is resolved eagerly (so a missing model fails at startup) but loaded
    /// lazily on first use.
    pub fn new(configured_path: Option<&Path>) -> Result<Self> {
        let model_path = resolve_model_path(configured_path)?;
        Ok(Self {
            model_path,
            dims: DEFAULT_DIMS,
            seq_len: DEFAULT_SEQ_LEN,
            state: tokio::sync::OnceCell::new(),
        })
    }

    async fn state(&self) -> Result<Arc<ModelState>> {
        let state = self
            .state
            .get_or_try_init(|| async {
                let model_path = self.model_path.clone();
                let loaded = tokio::task::spawn_blocking(move || ModelState::load(&model_path))
                    .await
                    .context("embedder load task panicked")??;
                Ok::<_, anyhow::Error>(Arc::new(loaded))
            })
            .await?;
        Ok(state.clone())
    }
}

impl ModelState {
    fn load(model_path: &Path) -> Result<Self> {
        let vocab_path = model_path
            .parent()
            .map(|dir| dir.join(VOCAB_FILE_NAME))
            .ok_or_else(|| anyhow!("model path has no parent directory"))?;
        let vocab = Vocabulary::load(&vocab_path)?;

        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model: {}", model_path.display()))?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX plan")?;

        Ok(Self {
            plan,
            run_lock: Mutex::new(()),
            vocab,
        })
    }

    /// Run one text through tokenize → infer → mean-pool → normalize.
    fn embed_one(&self, text: &str, seq_len: usize, dims: usize) -> Result<Vec<f32>> {
        let encoding = self.vocab.encode(text, seq_len);
        let mask = encoding.attention_mask.clone();

        let input_ids =
            tract_onnx::prelude::tract_ndarray::Array2::from_shape_vec((1, seq_len), encoding.input_ids)?;
        let attention_mask =
            tract_onnx::prelude::tract_ndarray::Array2::from_shape_vec((1, seq_len), encoding.attention_mask)?;
        let token_type_ids =
            tract_onnx::prelude::tract_ndarray::Array2::from_shape_vec((1, seq_len), encoding.token_type_ids)?;

        let input_ids: Tensor = input_ids.into();
        let attention_mask: Tensor = attention_mask.into();
        let token_type_ids: Tensor = token_type_ids.into();

        let outputs = {
            let _guard = self
                .run_lock
                .lock()
                .map_err(|_| anyhow!("embedder session lock poisoned"))?;
            self.plan.run(tvec!(
                input_ids.into(),
                attention_mask.into(),
                token_type_ids.into()
            ))?
        };

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("model produced no output tensor"))?;
        let view = output.to_array_view::<f32>()?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 {
            bail!("unexpected model output shape: {:?}", shape);
        }
        let token_axis = shape[1].min(seq_len);

        // Mean-pool hidden states over attended positions.
        let mut pooled = vec![0f32; dims];
        let mut count = 0f32;
        for (j, &m) in mask.iter().take(token_axis).enumerate() {
            if m == 0 {
                continue;
            }
            for (k, value) in view.slice(tract_onnx::prelude::tract_ndarray::s![0, j, ..]).iter().enumerate() {
                if k < dims {
                    pooled[k] += value;
                }
            }
            count += 1.0;
        }
        if count > 0.0 {
            for x in &mut pooled {
                *x /= count;
            }
        }

        Ok(normalize_l2(pooled))
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state().await?;
        let texts = texts.to_vec();
        let seq_len = self.seq_len;
        let dims = self.dims;

        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| state.embed_one(text, seq_len, dims))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .context("embedding task panicked")?
    }
}

/// Resolve the model file: explicit configured path (file, or directory
/// containing `model.onnx`), then `Models/` next to the executable, then
/// `Models/` under the working directory.
fn resolve_model_path(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        let candidate = if path.is_dir() {
            path.join(MODEL_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        if candidate.is_file() {
            return Ok(candidate);
        }
        bail!("model not found at configured path: {}", candidate.display());
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(MODELS_DIR).join(MODEL_FILE_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    let candidate = Path::new(MODELS_DIR).join(MODEL_FILE_NAME);
    if candidate.is_file() {
        return Ok(candidate);
    }

    bail!(
        "model not found: set model_path or place {} in a {}/ directory next to the binary or the working directory",
        MODEL_FILE_NAME,
        MODELS_DIR
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_configured_file_path_resolves() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("custom.onnx");
        std::fs::write(&model, b"stub").unwrap();

        let resolved = resolve_model_path(Some(&model)).unwrap();
        assert_eq!(resolved, model);
    }

    #[test]
    fn test_configured_directory_resolves_model_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MODEL_FILE_NAME), b"stub").unwrap();

        let resolved = resolve_model_path(Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path().join(MODEL_FILE_NAME));
    }

    #[test]
    fn test_missing_model_is_a_clear_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.onnx");
        let err = resolve_model_path(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn test_default_dimensions() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join(MODEL_FILE_NAME);
        std::fs::write(&model, b"stub").unwrap();

        let embedder = LocalEmbedder::new(Some(&model)).unwrap();
        assert_eq!(embedder.dims(), DEFAULT_DIMS);
        assert_eq!(embedder.model_name(), "all-MiniLM-L6-v2");
    }
}
