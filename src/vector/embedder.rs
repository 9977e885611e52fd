use std::sync::OnceLock;

use serde::Deserialize;

use super::config::{EmbedderConfig, EmbedderSource};
use super::VectorError;

pub const DEFAULT_HASH_DIMENSIONS: usize = 256;
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

// ── HashEmbedder ──

/// Feature-hashing embedder over character unigrams and bigrams.
///
/// Needs no model download and no network, and two texts sharing characters
/// land close together, which is enough for tests and small offline corpora.
/// Output vectors are L2-normalised; a text with no non-whitespace
/// characters maps to the first basis vector so cosine distance stays
/// defined.
#[derive(Debug)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();

        let mut buf = [0u8; 8];
        for c in &chars {
            self.accumulate(&mut v, c.encode_utf8(&mut buf).as_bytes(), 1.0);
        }
        for pair in chars.windows(2) {
            let mut bytes = Vec::with_capacity(8);
            bytes.extend_from_slice(pair[0].encode_utf8(&mut buf).as_bytes());
            bytes.push(0x1f);
            bytes.extend_from_slice(pair[1].encode_utf8(&mut buf).as_bytes());
            self.accumulate(&mut v, &bytes, 1.5);
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            v[0] = 1.0;
        }
        v
    }

    fn accumulate(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dimensions as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }

    pub async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        Ok(self.embed(text))
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn source(&self) -> EmbedderSource {
        EmbedderSource::Hash
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

// ── OpenAiEmbedder ──

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Embedder for any OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Debug)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    configured_dimensions: Option<usize>,
    detected_dimensions: OnceLock<usize>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbedderConfig) -> Result<Self, VectorError> {
        config.validate()?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| VectorError::EmbeddingError("openAi embedder requires apiKey".into()))?;
        let base_url = config
            .url
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_URL)
            .trim_end_matches('/')
            .to_owned();
        let client = reqwest::Client::builder().build().map_err(|e| {
            VectorError::EmbeddingError(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
            base_url,
            configured_dimensions: config.dimensions,
            detected_dimensions: OnceLock::new(),
        })
    }

    pub async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = serde_json::json!({
            "input": texts,
            "model": self.model,
            "encoding_format": "float"
        });
        if let Some(dims) = self.configured_dimensions {
            body["dimensions"] = serde_json::json!(dims);
        }

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::EmbeddingError(format!("embedding request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let msg = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(VectorError::EmbeddingError(format!(
                "embedding API error ({status}): {msg}"
            )));
        }

        let parsed: EmbeddingsResponse = resp.json().await.map_err(|e| {
            VectorError::EmbeddingError(format!("failed to parse embedding response: {e}"))
        })?;
        if parsed.data.len() != texts.len() {
            return Err(VectorError::EmbeddingError(format!(
                "embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        let mut items: Vec<(usize, Vec<f32>)> = parsed
            .data
            .into_iter()
            .enumerate()
            .map(|(pos, item)| (item.index.unwrap_or(pos), item.embedding))
            .collect();
        items.sort_by_key(|(i, _)| *i);

        let dims = self.dimensions_or_detect(items[0].1.len());
        for (_, v) in &items {
            if v.len() != dims {
                return Err(VectorError::DimensionMismatch {
                    expected: dims,
                    got: v.len(),
                });
            }
        }
        Ok(items.into_iter().map(|(_, v)| v).collect())
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.embed_documents(&[text])
            .await?
            .pop()
            .ok_or_else(|| VectorError::EmbeddingError("empty embedding response".into()))
    }

    fn dimensions_or_detect(&self, seen: usize) -> usize {
        match self.configured_dimensions {
            Some(d) => d,
            None => *self.detected_dimensions.get_or_init(|| seen),
        }
    }

    /// Configured dimensions, else those seen in the first response, else 0.
    pub fn dimensions(&self) -> usize {
        self.configured_dimensions
            .or_else(|| self.detected_dimensions.get().copied())
            .unwrap_or(0)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn source(&self) -> EmbedderSource {
        EmbedderSource::OpenAi
    }
}

// ── FastEmbedEmbedder ──

#[cfg(feature = "local-embedding")]
pub const DEFAULT_FASTEMBED_MODEL: &str = "bge-small-zh-v1.5";

#[cfg(feature = "local-embedding")]
fn parse_embedding_model(model: &str) -> Result<fastembed::EmbeddingModel, VectorError> {
    match model.to_lowercase().as_str() {
        "bge-small-zh-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallZHV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "paraphrase-multilingual-minilm-l12-v2" => {
            Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        unknown => Err(VectorError::EmbeddingError(format!(
            "unknown fastembed model: \"{unknown}\". Supported models: \
             bge-small-zh-v1.5, multilingual-e5-small, multilingual-e5-base, \
             paraphrase-multilingual-MiniLM-L12-v2"
        ))),
    }
}

/// Local ONNX embedder. `TextEmbedding::embed` takes `&mut self`, so the
/// model sits behind a mutex and inference runs on the blocking pool.
#[cfg(feature = "local-embedding")]
pub struct FastEmbedEmbedder {
    model: std::sync::Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
    model_name: String,
    dimensions: usize,
}

#[cfg(feature = "local-embedding")]
impl std::fmt::Debug for FastEmbedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedEmbedder")
            .field("model", &self.model_name)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

#[cfg(feature = "local-embedding")]
impl FastEmbedEmbedder {
    pub fn new(config: &EmbedderConfig) -> Result<Self, VectorError> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_FASTEMBED_MODEL.into());
        let model_enum = parse_embedding_model(&model_name)?;

        let dim = fastembed::TextEmbedding::get_model_info(&model_enum)
            .map_err(|e| VectorError::EmbeddingError(format!("failed to get model info: {e}")))?
            .dim;
        if let Some(configured) = config.dimensions {
            if configured != dim {
                return Err(VectorError::DimensionMismatch {
                    expected: dim,
                    got: configured,
                });
            }
        }

        let mut options =
            fastembed::TextInitOptions::new(model_enum).with_show_download_progress(true);
        if let Ok(cache_dir) = std::env::var("FASTEMBED_CACHE_DIR") {
            options = options.with_cache_dir(std::path::PathBuf::from(cache_dir));
        }
        let text_embedding = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            VectorError::EmbeddingError(format!("failed to initialize fastembed model: {e}"))
        })?;

        Ok(Self {
            model: std::sync::Arc::new(std::sync::Mutex::new(text_embedding)),
            model_name,
            dimensions: dim,
        })
    }

    pub async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.clone();
        let owned: Vec<String> = texts.iter().map(|s| s.to_string()).collect();

        tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().map_err(|e| {
                VectorError::EmbeddingError(format!("fastembed mutex poisoned: {e}"))
            })?;
            guard.embed(owned, None).map_err(|e| {
                VectorError::EmbeddingError(format!("fastembed embedding failed: {e}"))
            })
        })
        .await
        .map_err(|e| VectorError::EmbeddingError(format!("fastembed task panicked: {e}")))?
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.embed_documents(&[text])
            .await?
            .pop()
            .ok_or_else(|| VectorError::EmbeddingError("empty response from fastembed".into()))
    }

    pub fn model(&self) -> &str {
        &self.model_name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn source(&self) -> EmbedderSource {
        EmbedderSource::FastEmbed
    }
}

// ── Embedder Enum ──

/// Enum dispatch over the embedding backends; async fns in traits are not
/// object safe, so no `dyn Embedder`.
#[derive(Debug)]
pub enum Embedder {
    Hash(HashEmbedder),
    OpenAi(Box<OpenAiEmbedder>),
    #[cfg(feature = "local-embedding")]
    FastEmbed(Box<FastEmbedEmbedder>),
}

impl Embedder {
    pub async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        match self {
            Embedder::Hash(e) => e.embed_documents(texts).await,
            Embedder::OpenAi(e) => e.embed_documents(texts).await,
            #[cfg(feature = "local-embedding")]
            Embedder::FastEmbed(e) => e.embed_documents(texts).await,
        }
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        match self {
            Embedder::Hash(e) => e.embed_query(text).await,
            Embedder::OpenAi(e) => e.embed_query(text).await,
            #[cfg(feature = "local-embedding")]
            Embedder::FastEmbed(e) => e.embed_query(text).await,
        }
    }

    /// Output width, or 0 when it is only known after the first call.
    pub fn dimensions(&self) -> usize {
        match self {
            Embedder::Hash(e) => e.dimensions(),
            Embedder::OpenAi(e) => e.dimensions(),
            #[cfg(feature = "local-embedding")]
            Embedder::FastEmbed(e) => e.dimensions(),
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Embedder::Hash(_) => None,
            Embedder::OpenAi(e) => Some(e.model()),
            #[cfg(feature = "local-embedding")]
            Embedder::FastEmbed(e) => Some(e.model()),
        }
    }

    pub fn source(&self) -> EmbedderSource {
        match self {
            Embedder::Hash(e) => e.source(),
            Embedder::OpenAi(e) => e.source(),
            #[cfg(feature = "local-embedding")]
            Embedder::FastEmbed(e) => e.source(),
        }
    }
}

/// Build an embedder from a validated config.
pub fn create_embedder(config: &EmbedderConfig) -> Result<Embedder, VectorError> {
    config.validate()?;
    match config.source {
        EmbedderSource::Hash => Ok(Embedder::Hash(HashEmbedder::new(
            config.dimensions.unwrap_or(DEFAULT_HASH_DIMENSIONS),
        ))),
        EmbedderSource::OpenAi => Ok(Embedder::OpenAi(Box::new(OpenAiEmbedder::new(config)?))),
        #[cfg(feature = "local-embedding")]
        EmbedderSource::FastEmbed => Ok(Embedder::FastEmbed(Box::new(FastEmbedEmbedder::new(
            config,
        )?))),
        #[cfg(not(feature = "local-embedding"))]
        EmbedderSource::FastEmbed => Err(VectorError::EmbeddingError(
            "fastEmbed embedder requires the `local-embedding` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hash_is_deterministic_and_normalised() {
        let e = HashEmbedder::new(64);
        let a = e.embed("床前明月光");
        let b = e.embed("床前明月光");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_empty_text_is_unit_vector() {
        let e = HashEmbedder::new(8);
        let v = e.embed("  \n");
        assert_eq!(v[0], 1.0);
        assert!(v[1..].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_hash_ignores_whitespace() {
        let e = HashEmbedder::new(128);
        assert_eq!(e.embed("明月 光"), e.embed("明月光"));
    }

    #[test]
    fn test_hash_shared_characters_rank_closer() {
        let e = HashEmbedder::new(DEFAULT_HASH_DIMENSIONS);
        let q = e.embed("明月光");
        let near = e.embed("床前明月光");
        let far = e.embed("疑是地上霜");
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[test]
    fn test_hash_zero_dimensions_clamped() {
        assert_eq!(HashEmbedder::new(0).dimensions(), 1);
    }

    #[test]
    fn test_factory_defaults_to_hash() {
        let embedder = create_embedder(&EmbedderConfig::default()).unwrap();
        assert_eq!(embedder.source(), EmbedderSource::Hash);
        assert_eq!(embedder.dimensions(), DEFAULT_HASH_DIMENSIONS);
        assert_eq!(embedder.model(), None);
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let config = EmbedderConfig {
            source: EmbedderSource::OpenAi,
            ..Default::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(VectorError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_enum_dispatch_embeds_batch_in_order() {
        let embedder = create_embedder(&EmbedderConfig {
            dimensions: Some(32),
            ..Default::default()
        })
        .unwrap();
        let out = embedder
            .embed_documents(&["床前明月光", "疑是地上霜"])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], embedder.embed_query("疑是地上霜").await.unwrap());
    }

    mod openai_tests {
        use super::*;
        use wiremock::matchers::{body_partial_json, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn openai_response(embeddings: Vec<Vec<f64>>) -> serde_json::Value {
            let data: Vec<serde_json::Value> = embeddings
                .into_iter()
                .enumerate()
                .map(|(i, emb)| serde_json::json!({"object": "embedding", "embedding": emb, "index": i}))
                .collect();
            serde_json::json!({"object": "list", "data": data, "model": DEFAULT_OPENAI_MODEL})
        }

        fn config_for(server: &MockServer) -> EmbedderConfig {
            EmbedderConfig {
                source: EmbedderSource::OpenAi,
                api_key: Some("sk-test".into()),
                url: Some(server.uri()),
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_openai_sends_model_and_bearer() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/embeddings"))
                .and(header("Authorization", "Bearer sk-test"))
                .and(body_partial_json(serde_json::json!({
                    "input": ["床前明月光"],
                    "model": DEFAULT_OPENAI_MODEL
                })))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(openai_response(vec![vec![0.1, 0.2]])),
                )
                .expect(1)
                .mount(&server)
                .await;

            let e = OpenAiEmbedder::new(&config_for(&server)).unwrap();
            let v = e.embed_query("床前明月光").await.unwrap();
            assert_eq!(v.len(), 2);
        }

        #[tokio::test]
        async fn test_openai_reorders_by_index() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "data": [
                        {"embedding": [0.0, 1.0], "index": 1},
                        {"embedding": [1.0, 0.0], "index": 0}
                    ]
                })))
                .mount(&server)
                .await;

            let e = OpenAiEmbedder::new(&config_for(&server)).unwrap();
            let out = e.embed_documents(&["a", "b"]).await.unwrap();
            assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        }

        #[tokio::test]
        async fn test_openai_detects_dimensions() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(openai_response(vec![vec![0.1, 0.2, 0.3]])),
                )
                .mount(&server)
                .await;

            let e = OpenAiEmbedder::new(&config_for(&server)).unwrap();
            assert_eq!(e.dimensions(), 0);
            e.embed_query("x").await.unwrap();
            assert_eq!(e.dimensions(), 3);
        }

        #[tokio::test]
        async fn test_openai_error_message_surfaces() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                    "error": {"message": "Rate limit reached", "type": "rate_limit"}
                })))
                .mount(&server)
                .await;

            let e = OpenAiEmbedder::new(&config_for(&server)).unwrap();
            let err = e.embed_query("x").await.unwrap_err();
            match err {
                VectorError::EmbeddingError(msg) => {
                    assert!(msg.contains("429"), "got: {msg}");
                    assert!(msg.contains("Rate limit reached"), "got: {msg}");
                }
                other => panic!("expected EmbeddingError, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_openai_count_mismatch_is_error() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(openai_response(vec![vec![0.1]])),
                )
                .mount(&server)
                .await;

            let e = OpenAiEmbedder::new(&config_for(&server)).unwrap();
            assert!(e.embed_documents(&["a", "b"]).await.is_err());
        }

        #[tokio::test]
        async fn test_openai_configured_dimensions_sent() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(body_partial_json(serde_json::json!({"dimensions": 2})))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(openai_response(vec![vec![0.5, 0.5]])),
                )
                .expect(1)
                .mount(&server)
                .await;

            let config = EmbedderConfig {
                dimensions: Some(2),
                ..config_for(&server)
            };
            let e = OpenAiEmbedder::new(&config).unwrap();
            assert_eq!(e.dimensions(), 2);
            e.embed_query("x").await.unwrap();
        }

        #[tokio::test]
        async fn test_openai_network_error() {
            let config = EmbedderConfig {
                source: EmbedderSource::OpenAi,
                api_key: Some("sk-test".into()),
                url: Some("http://127.0.0.1:1".into()),
                ..Default::default()
            };
            let e = OpenAiEmbedder::new(&config).unwrap();
            assert!(matches!(
                e.embed_query("x").await,
                Err(VectorError::EmbeddingError(_))
            ));
        }

        #[test]
        fn test_openai_trailing_slash_trimmed_and_model_default() {
            let config = EmbedderConfig {
                source: EmbedderSource::OpenAi,
                api_key: Some("sk-test".into()),
                url: Some("http://localhost:9999/".into()),
                ..Default::default()
            };
            let e = OpenAiEmbedder::new(&config).unwrap();
            assert_eq!(e.base_url, "http://localhost:9999");
            assert_eq!(e.model(), DEFAULT_OPENAI_MODEL);
        }
    }
}
