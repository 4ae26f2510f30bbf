//! Embedding generation behind a narrow capability trait
//!
//! [`Embedder`] is the seam to the model backend. [`FastEmbedder`] runs
//! ONNX models locally through fastembed (downloaded once into the
//! HuggingFace cache); [`HashEmbedder`] is a deterministic feature-hashing
//! fallback. The engine only talks to an [`EmbedderGateway`], which adds the
//! "no model configured" check, output validation and the call timeout.

use crate::config::EmbeddingModel;
use crate::error::{IfsError, Result};
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A text embedding backend
///
/// Implementations must be pure from the caller's perspective: the same
/// text always maps to the same vector of length [`Embedder::dimension`].
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors
    fn model_id(&self) -> &str;

    /// Embedding vector dimension
    fn dimension(&self) -> usize;

    /// Embed several texts, one vector per text, in order
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| IfsError::EmbeddingFailed {
                model_id: self.model_id().to_string(),
                message: "No embedding returned".to_string(),
            })
    }
}

/// Local embedder using fastembed with ONNX runtime
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
    model_id: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Load the given model
    ///
    /// On first use, downloads the model from HuggingFace.
    /// Subsequent uses load from cache.
    pub fn new(model_config: EmbeddingModel) -> Result<Self> {
        info!("Loading embedding model: {:?}", model_config);

        let fastembed_model = match model_config {
            EmbeddingModel::AllMiniLmL6V2 => FastEmbedModel::AllMiniLML6V2,
            EmbeddingModel::BgeSmallEnV15 => FastEmbedModel::BGESmallENV15,
            EmbeddingModel::NomicEmbedTextV15 => FastEmbedModel::NomicEmbedTextV15,
            EmbeddingModel::MultilingualE5Small => FastEmbedModel::MultilingualE5Small,
            EmbeddingModel::Hash => {
                return Err(IfsError::Config(
                    "the hash model is not an ONNX model".to_string(),
                ))
            }
        };

        let model_id = model_config.model_name().to_string();
        let model = TextEmbedding::try_new(
            InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| IfsError::EmbeddingFailed {
            model_id: model_id.clone(),
            message: e.to_string(),
        })?;

        let dimension = model_config.dimension();

        info!("Model loaded successfully (dimension: {})", dimension);

        Ok(Self {
            model: Arc::new(model),
            model_id,
            dimension,
        })
    }
}

impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| IfsError::EmbeddingFailed {
                model_id: self.model_id.clone(),
                message: e.to_string(),
            })
    }
}

/// Deterministic embedder hashing word and word-pair features
///
/// Similarity reflects shared vocabulary, not meaning. Needs no model files.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model_id: String,
    dimension: usize,
}

impl HashEmbedder {
    /// Create a hashing embedder with the given dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: EmbeddingModel::Hash.model_name().to_string(),
            dimension: dimension.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            accumulate_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            accumulate_feature(&mut vector, &format!("{}_{}", pair[0], pair[1]), 0.5);
        }

        normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EmbeddingModel::Hash.dimension())
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn accumulate_feature(vector: &mut [f32], feature: &str, weight: f32) {
    let digest = Sha256::digest(feature.as_bytes());
    let mut bucket = [0u8; 8];
    bucket.copy_from_slice(&digest[..8]);
    let index = (u64::from_le_bytes(bucket) % vector.len() as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    vector[index] += sign * weight;
}

/// Build the embedder for a configured model
pub fn from_model(model: EmbeddingModel) -> Result<Arc<dyn Embedder>> {
    match model {
        EmbeddingModel::Hash => Ok(Arc::new(HashEmbedder::new(model.dimension()))),
        other => Ok(Arc::new(FastEmbedder::new(other)?)),
    }
}

/// Selectable models, label to model id
pub fn available_models() -> BTreeMap<String, String> {
    EmbeddingModel::ALL
        .iter()
        .map(|m| (m.label().to_string(), m.model_name().to_string()))
        .collect()
}

/// The engine's access point to an optional embedder
///
/// Every call is bounded by the configured timeout. The backend runs on a
/// helper thread; if it does not answer in time the call is abandoned and
/// [`IfsError::EmbeddingTimeout`] is returned.
#[derive(Clone)]
pub struct EmbedderGateway {
    embedder: Option<Arc<dyn Embedder>>,
    timeout: Duration,
}

impl EmbedderGateway {
    /// Wrap an embedder (or none) with a call timeout
    pub fn new(embedder: Option<Arc<dyn Embedder>>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    /// Gateway without a model; every call fails with `EmbeddingUnavailable`
    pub fn unavailable() -> Self {
        Self::new(None, Duration::from_secs(0))
    }

    fn backend(&self) -> Result<&Arc<dyn Embedder>> {
        self.embedder.as_ref().ok_or(IfsError::EmbeddingUnavailable)
    }

    /// Configured model id, if any
    pub fn model_id(&self) -> Option<&str> {
        self.embedder.as_ref().map(|e| e.model_id())
    }

    /// Configured dimension, if any
    pub fn dimension(&self) -> Option<usize> {
        self.embedder.as_ref().map(|e| e.dimension())
    }

    /// Embed a single text
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(vec![text.to_string()])?;
        Ok(vectors.remove(0))
    }

    /// Embed texts in one backend call
    pub fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let backend = Arc::clone(self.backend()?);
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model_id = backend.model_id().to_string();
        let dimension = backend.dimension();
        let expected = texts.len();
        debug!("Embedding {} texts with {}", expected, model_id);

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let _ = tx.send(backend.embed_batch(&refs));
        });

        let vectors = match rx.recv_timeout(self.timeout) {
            Ok(result) => result?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(IfsError::EmbeddingTimeout {
                    model_id,
                    timeout: self.timeout,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(IfsError::EmbeddingFailed {
                    model_id,
                    message: "embedding worker stopped without a result".to_string(),
                })
            }
        };

        if vectors.len() != expected {
            return Err(IfsError::EmbeddingFailed {
                model_id,
                message: format!("expected {} vectors, got {}", expected, vectors.len()),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IfsError::EmbeddingFailed {
                model_id,
                message: format!("expected dimension {}, got {}", dimension, bad.len()),
            });
        }

        Ok(vectors)
    }
}

/// Normalize embedding vector to unit length
pub fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in embedding.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity in [-1, 1]; 0.0 for zero or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
