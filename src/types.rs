use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_AUTHOR: &str = "未知作者";
pub const DEFAULT_TITLE: &str = "无标题";
pub const DEFAULT_ID: &str = "未知ID";

/// One poem as it appears in a corpus file.
///
/// Every field is optional on disk. `id`, `author` and `title` also accept
/// numbers, which are kept as their decimal text.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PoemRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default)]
    pub paragraphs: Option<Vec<String>>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(
        Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
            Scalar::Text(t) => t,
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
        }),
    )
}

impl PoemRecord {
    /// Flatten into one entry per paragraph, in order, with defaults filled
    /// in. A poem without paragraphs yields nothing.
    pub fn into_paragraphs(self) -> Vec<IndexedParagraph> {
        let paragraphs = self.paragraphs.unwrap_or_default();
        if paragraphs.is_empty() {
            return Vec::new();
        }
        let encoded = encode_paragraphs(&paragraphs);
        let author = self.author.unwrap_or_else(|| DEFAULT_AUTHOR.to_owned());
        let title = self.title.unwrap_or_else(|| DEFAULT_TITLE.to_owned());
        let id = self.id.unwrap_or_else(|| DEFAULT_ID.to_owned());

        paragraphs
            .into_iter()
            .enumerate()
            .map(|(index, text)| IndexedParagraph {
                text,
                metadata: ParagraphMetadata {
                    author: author.clone(),
                    title: title.clone(),
                    id: id.clone(),
                    paragraphs: encoded.clone(),
                    index,
                },
            })
            .collect()
    }
}

fn encode_paragraphs(paragraphs: &[String]) -> String {
    // Serializing a slice of strings cannot fail.
    serde_json::to_string(paragraphs).unwrap_or_else(|_| "[]".to_owned())
}

/// Flat metadata stored next to every paragraph vector. The whole poem
/// travels with each paragraph as a JSON-encoded string array so a single
/// hit can be expanded back into its poem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphMetadata {
    pub author: String,
    pub title: String,
    pub id: String,
    pub paragraphs: String,
    pub index: usize,
}

impl ParagraphMetadata {
    pub fn decode_paragraphs(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.paragraphs)
    }

    /// Checks that `text` is the paragraph this metadata points at.
    pub fn describes(&self, text: &str) -> bool {
        self.decode_paragraphs()
            .map(|all| all.get(self.index).map(String::as_str) == Some(text))
            .unwrap_or(false)
    }

    /// Content-derived upsert key: lowercase hex SHA-256 over every field
    /// plus the paragraph text.
    pub fn paragraph_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.id.as_str(),
            self.author.as_str(),
            self.title.as_str(),
            self.paragraphs.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update(self.index.to_le_bytes());
        hasher.update([0x1f]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A paragraph ready for the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedParagraph {
    pub text: String,
    pub metadata: ParagraphMetadata,
}

impl IndexedParagraph {
    pub fn key(&self) -> String {
        self.metadata.paragraph_key(&self.text)
    }
}

/// One query result, shaped for API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResultView {
    /// Position of the matched paragraph within its poem.
    pub paragraph_index: usize,
    /// The matched paragraph.
    pub content: String,
    pub author: String,
    pub title: String,
    pub doc_id: String,
    /// Every paragraph of the poem, in order.
    pub all_paragraphs: Vec<String>,
}
