use std::path::Path;

use serde::{Deserialize, Serialize};

use super::VectorError;

pub const FINGERPRINT_FILE: &str = "fingerprint.json";

/// Which embedding backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmbedderSource {
    /// Deterministic character n-gram hashing; no model, no network.
    #[default]
    Hash,
    OpenAi,
    FastEmbed,
}

impl EmbedderSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedderSource::Hash => "hash",
            EmbedderSource::OpenAi => "openAi",
            EmbedderSource::FastEmbed => "fastEmbed",
        }
    }
}

impl std::fmt::Display for EmbedderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Embedder settings, usually read from the JSON file named by
/// `IMG2POE_EMBEDDER_CONFIG`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EmbedderConfig {
    pub source: EmbedderSource,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub dimensions: Option<usize>,
    pub url: Option<String>,
}

impl EmbedderConfig {
    /// Read and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, VectorError> {
        let data = std::fs::read_to_string(path)?;
        let config: EmbedderConfig = serde_json::from_str(&data)
            .map_err(|e| VectorError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that required fields are present for the given source type.
    pub fn validate(&self) -> Result<(), VectorError> {
        if self.dimensions == Some(0) {
            return Err(VectorError::InvalidConfig(
                "`dimensions` must be greater than zero".into(),
            ));
        }
        match self.source {
            EmbedderSource::OpenAi => {
                if self.api_key.as_deref().map_or(true, str::is_empty) {
                    return Err(VectorError::InvalidConfig(
                        "openAi embedder requires `apiKey`".into(),
                    ));
                }
            }
            EmbedderSource::Hash => {
                if self.model.is_some() {
                    return Err(VectorError::InvalidConfig(
                        "hash embedder does not take a `model`".into(),
                    ));
                }
            }
            EmbedderSource::FastEmbed => {
                if !cfg!(feature = "local-embedding") {
                    return Err(VectorError::InvalidConfig(
                        "fastEmbed embedder requires the `local-embedding` feature".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Identity of the embedder a store was built with, persisted as
/// `fingerprint.json` next to the index. Vectors from different models are
/// not comparable, so a store refuses to open under a different one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderFingerprint {
    pub version: u32,
    pub source: EmbedderSource,
    pub model: Option<String>,
    pub dimensions: usize,
}

impl EmbedderFingerprint {
    pub fn new(source: EmbedderSource, model: Option<String>, dimensions: usize) -> Self {
        Self {
            version: 1,
            source,
            model,
            dimensions,
        }
    }

    /// Human-readable description of the first differing field, if any.
    pub fn mismatch(&self, other: &EmbedderFingerprint) -> Option<String> {
        if self.source != other.source {
            return Some(format!("source {} != {}", self.source, other.source));
        }
        if self.model != other.model {
            return Some(format!(
                "model {} != {}",
                self.model.as_deref().unwrap_or("<none>"),
                other.model.as_deref().unwrap_or("<none>")
            ));
        }
        if self.dimensions != other.dimensions {
            return Some(format!(
                "dimensions {} != {}",
                self.dimensions, other.dimensions
            ));
        }
        None
    }

    pub fn save(&self, dir: &Path) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        super::write_atomic(&dir.join(FINGERPRINT_FILE), json)
    }

    pub fn load(dir: &Path) -> Result<Self, std::io::Error> {
        let data = std::fs::read_to_string(dir.join(FINGERPRINT_FILE))?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_source_is_hash() {
        let config: EmbedderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.source, EmbedderSource::Hash);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_openai_config_requires_api_key() {
        let config = EmbedderConfig {
            source: EmbedderSource::OpenAi,
            model: Some("text-embedding-3-small".into()),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("apiKey"));

        let config = EmbedderConfig {
            api_key: Some("sk-test".into()),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let config = EmbedderConfig {
            dimensions: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hash_rejects_model() {
        let config = EmbedderConfig {
            model: Some("bge-small-zh-v1.5".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[cfg(not(feature = "local-embedding"))]
    #[test]
    fn test_fastembed_needs_feature() {
        let config = EmbedderConfig {
            source: EmbedderSource::FastEmbed,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("local-embedding"));
    }

    #[test]
    fn test_config_camel_case_fields() {
        let json = r#"{
            "source": "openAi",
            "model": "text-embedding-3-small",
            "apiKey": "sk-abc",
            "dimensions": 512,
            "url": "http://localhost:9999"
        }"#;
        let config: EmbedderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.source, EmbedderSource::OpenAi);
        assert_eq!(config.api_key.as_deref(), Some("sk-abc"));
        assert_eq!(config.dimensions, Some(512));
        assert_eq!(config.url.as_deref(), Some("http://localhost:9999"));
    }

    #[test]
    fn test_from_file_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("embedder.json");
        std::fs::write(&path, r#"{"source": "openAi"}"#).unwrap();
        assert!(matches!(
            EmbedderConfig::from_file(&path),
            Err(VectorError::InvalidConfig(_))
        ));

        std::fs::write(&path, r#"{"source": "word2vec"}"#).unwrap();
        assert!(matches!(
            EmbedderConfig::from_file(&path),
            Err(VectorError::InvalidConfig(_))
        ));

        std::fs::write(&path, r#"{"source": "hash", "dimensions": 64}"#).unwrap();
        let config = EmbedderConfig::from_file(&path).unwrap();
        assert_eq!(config.dimensions, Some(64));
    }

    #[test]
    fn test_fingerprint_mismatch_fields() {
        let a = EmbedderFingerprint::new(EmbedderSource::Hash, None, 256);
        assert_eq!(a.mismatch(&a.clone()), None);

        let b = EmbedderFingerprint::new(EmbedderSource::Hash, None, 128);
        assert!(a.mismatch(&b).unwrap().contains("dimensions"));

        let c = EmbedderFingerprint::new(EmbedderSource::OpenAi, None, 256);
        assert!(a.mismatch(&c).unwrap().contains("source"));

        let d = EmbedderFingerprint::new(EmbedderSource::Hash, Some("x".into()), 256);
        assert!(a.mismatch(&d).unwrap().contains("model"));
    }

    #[test]
    fn test_fingerprint_save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let fp = EmbedderFingerprint::new(
            EmbedderSource::OpenAi,
            Some("text-embedding-3-small".into()),
            1536,
        );
        fp.save(dir.path()).unwrap();
        assert!(dir.path().join(FINGERPRINT_FILE).exists());
        assert_eq!(EmbedderFingerprint::load(dir.path()).unwrap(), fp);
    }

    #[test]
    fn test_fingerprint_load_garbage_is_invalid_data() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(FINGERPRINT_FILE), "not json").unwrap();
        let err = EmbedderFingerprint::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
