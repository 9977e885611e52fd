use std::sync::Arc;

use crate::error::{Img2PoeError, Result};
use crate::store::{SearchHit, StoreHandle};
use crate::types::ResultView;

pub const DEFAULT_TOP_K: usize = 5;

/// Turns free text into ranked paragraphs with their whole poem attached.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<StoreHandle>,
    default_k: usize,
}

impl QueryService {
    pub fn new(store: Arc<StoreHandle>) -> Self {
        Self::with_default_k(store, DEFAULT_TOP_K)
    }

    pub fn with_default_k(store: Arc<StoreHandle>, default_k: usize) -> Self {
        Self { store, default_k }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn store(&self) -> &Arc<StoreHandle> {
        &self.store
    }

    /// Up to `k` results in similarity order. Blank text is rejected before
    /// the embedder or index is touched.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ResultView>> {
        if text.trim().is_empty() {
            return Err(Img2PoeError::InvalidQuery("No query provided".into()));
        }
        let hits = self.store.similarity_search(text, k).await?;
        tracing::debug!("query {:?}: {} hits", text, hits.len());
        hits.into_iter().map(to_view).collect()
    }

    pub async fn query_default(&self, text: &str) -> Result<Vec<ResultView>> {
        self.query(text, self.default_k).await
    }
}

fn to_view(hit: SearchHit) -> Result<ResultView> {
    let all_paragraphs = hit.metadata.decode_paragraphs().map_err(|e| {
        Img2PoeError::Vector(format!(
            "stored paragraphs for {:?} are not a JSON string array: {}",
            hit.metadata.id, e
        ))
    })?;
    Ok(ResultView {
        paragraph_index: hit.metadata.index,
        content: hit.content,
        author: hit.metadata.author,
        title: hit.metadata.title,
        doc_id: hit.metadata.id,
        all_paragraphs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParagraphMetadata, PoemRecord};
    use crate::vector::embedder::{Embedder, HashEmbedder};
    use tempfile::TempDir;

    async fn service(dir: &TempDir, poems: &[(&str, &[&str])]) -> QueryService {
        let store = StoreHandle::open(dir.path().join("s"), Embedder::Hash(HashEmbedder::new(128)))
            .await
            .unwrap();
        for (title, lines) in poems {
            let (texts, metas): (Vec<_>, Vec<_>) = PoemRecord {
                title: Some(title.to_string()),
                paragraphs: Some(lines.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
            .into_paragraphs()
            .into_iter()
            .map(|p| (p.text, p.metadata))
            .unzip();
            store.add_texts(texts, metas).await.unwrap();
        }
        QueryService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, &[]).await;
        for q in ["", "   ", "\t\n"] {
            assert!(matches!(
                svc.query_default(q).await,
                Err(Img2PoeError::InvalidQuery(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_results_carry_whole_poem() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, &[("静夜思", &["床前明月光", "疑是地上霜"])]).await;
        let out = svc.query_default("疑是地上霜").await.unwrap();
        assert_eq!(out.len(), 2);
        let top = &out[0];
        assert_eq!(top.content, "疑是地上霜");
        assert_eq!(top.paragraph_index, 1);
        assert_eq!(top.title, "静夜思");
        assert_eq!(top.all_paragraphs, vec!["床前明月光", "疑是地上霜"]);
        for r in &out {
            assert_eq!(r.all_paragraphs[r.paragraph_index], r.content);
        }
    }

    #[tokio::test]
    async fn test_fewer_than_k_stored() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, &[("三句", &["一", "二", "三"])]).await;
        assert_eq!(svc.default_k(), DEFAULT_TOP_K);
        assert_eq!(svc.query("一", 5).await.unwrap().len(), 3);
        assert_eq!(svc.query("一", 2).await.unwrap().len(), 2);
    }

    #[test]
    fn test_undecodable_metadata_is_internal_error() {
        let hit = SearchHit {
            content: "x".into(),
            metadata: ParagraphMetadata {
                author: "a".into(),
                title: "t".into(),
                id: "1".into(),
                paragraphs: "{broken".into(),
                index: 0,
            },
            distance: 0.0,
        };
        let err = to_view(hit).unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
