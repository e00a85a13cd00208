//! Local ONNX embeddings through fastembed.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;

use super::{Embedder, EmbeddingError, EmbeddingResult, check_batch};

/// fastembed-backed embedder.
///
/// The model is wrapped in a Mutex because inference needs exclusive access.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    dimension: usize,
    name: String,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedder {
    /// Load a model by name (e.g. "AllMiniLML6V2"), downloading it on first use.
    pub fn from_settings(model_name: &str, show_progress: bool) -> EmbeddingResult<Self> {
        let model = parse_model(model_name)?;

        #[allow(unused_mut)]
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model).with_show_download_progress(show_progress),
        )
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        // Get dimensions by generating a probe embedding
        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
        let dimension = probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| EmbeddingError::ModelInit("model returned no embedding".into()))?;

        tracing::info!(target: "embedding", "loaded fastembed model {model_name} (dim={dimension})");

        Ok(Self {
            model: Mutex::new(text_model),
            dimension,
            name: model_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .model
            .lock()
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

        check_batch(&embeddings, texts.len(), self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn parse_model(name: &str) -> EmbeddingResult<EmbeddingModel> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => Err(EmbeddingError::ModelInit(format!(
            "unsupported fastembed model: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model() {
        assert!(parse_model("AllMiniLML6V2").is_ok());
        assert!(parse_model("gpt-embeddings").is_err());
    }

    // Downloads model weights
    #[test]
    #[ignore]
    fn test_fastembed_round_trip() {
        let embedder = FastEmbedder::from_settings("AllMiniLML6V2", false).unwrap();
        let vectors = embedder.embed(&["goal progress", "weekly review"]).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), embedder.dimension());
    }
}
