//! Deterministic embedder and generator doubles shared by the integration tests.

#![allow(dead_code)]

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use plantdoc_rag::{
    Document, EmbeddingProvider, GenerationParams, Generator, ProviderError, ProviderErrorKind,
    ProviderResult,
};

pub const DIM: usize = 64;

/// Bag-of-words embedding: each lowercase word is hashed into one of `DIM` buckets.
pub fn keyword_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 2) {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        vector[(hasher.finish() % dim as u64) as usize] += 1.0;
    }
    vector
}

pub struct KeywordEmbedder {
    model: String,
    dim: usize,
    declared: usize,
    pub query_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::with_model("keyword-hash-v1", DIM)
    }

    pub fn with_model(model: &str, dim: usize) -> Self {
        Self {
            model: model.to_string(),
            dim,
            declared: dim,
            query_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    /// Report `declared` from `dimensions()` while still producing `dim`-length vectors.
    pub fn declaring(mut self, declared: usize) -> Self {
        self.declared = declared;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_vector(text, self.dim))
    }

    async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| keyword_vector(text, self.dim)).collect())
    }

    fn dimensions(&self) -> usize {
        self.declared
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Never answers within any reasonable deadline.
pub struct SlowEmbedder;

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![1.0; DIM])
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn model_id(&self) -> &str {
        "keyword-hash-v1"
    }
}

/// Fails every call with `kind`.
pub struct FailingEmbedder(pub ProviderErrorKind);

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
        Err(ProviderError::new("test", self.0, "embedding service down"))
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn model_id(&self) -> &str {
        "keyword-hash-v1"
    }
}

/// Plays back scripted outcomes, then answers "ok"; records every prompt.
pub struct RecordingGenerator {
    outcomes: Mutex<Vec<ProviderResult<String>>>,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(mut outcomes: Vec<ProviderResult<String>>) -> Self {
        outcomes.reverse();
        Self {
            outcomes: Mutex::new(outcomes),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn hanging() -> Self {
        Self { delay: Some(Duration::from_secs(3600)), ..Self::new() }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcomes.lock().unwrap().pop().unwrap_or_else(|| Ok("ok".to_string()))
    }

    fn model_id(&self) -> &str {
        "recording"
    }
}

fn record(id: &str, crop: &str, disease: &str, description: &str) -> Document {
    Document::new(id, format!("Crop: {crop}, Disease: {disease}. Description: {description}"))
        .with_metadata("crop", crop)
        .with_metadata("disease", disease)
}

/// A small plant-disease knowledge base.
pub fn corpus() -> Vec<Document> {
    vec![
        record(
            "tomato-bacterial-spot",
            "Tomato",
            "Bacterial Spot",
            "Bacterial spot of tomato is caused by Xanthomonas bacteria. Small dark water-soaked \
             lesions appear on tomato leaves and fruit, spreading in warm wet weather.",
        ),
        record(
            "potato-late-blight",
            "Potato",
            "Late Blight",
            "Late blight is caused by Phytophthora infestans. Brown lesions with pale green \
             margins appear on potato foliage and tubers rot in storage.",
        ),
        record(
            "wheat-stem-rust",
            "Wheat",
            "Stem Rust",
            "Stem rust produces reddish brown pustules on wheat stems and leaves, weakening \
             stalks and shrivelling grain.",
        ),
        record(
            "grape-powdery-mildew",
            "Grape",
            "Powdery Mildew",
            "Powdery mildew forms white powdery growth on grape leaves, shoots and berries, \
             favoured by shade and humidity.",
        ),
        record(
            "apple-scab",
            "Apple",
            "Apple Scab",
            "Apple scab causes olive green velvety spots on apple leaves and corky scabs on \
             the fruit surface.",
        ),
    ]
}
