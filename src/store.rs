//! Persistent paragraph store: embedder + HNSW index + paragraph payloads.
//!
//! On disk a store is a directory holding
//!
//! - `index.usearch`: the HNSW graph
//! - `id_map.json`: paragraph key ↔ graph label
//! - `documents.json`: paragraph text and metadata by key
//! - `fingerprint.json`: the embedder the vectors came from
//! - `INCOMPLETE`: only while the last ingestion into it has not finished
//!
//! The directory's existence is what distinguishes "reopen" from "start
//! fresh". Nothing is written until [`StoreHandle::persist`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{Img2PoeError, Result};
use crate::types::ParagraphMetadata;
use crate::vector::config::{EmbedderFingerprint, EmbedderSource};
use crate::vector::embedder::Embedder;
use crate::vector::index::VectorIndex;
use crate::vector::{write_atomic, MetricKind};

pub const DOCUMENTS_FILE: &str = "documents.json";
/// Present while a store holds only part of an ingestion run.
pub const INCOMPLETE_FILE: &str = "INCOMPLETE";

const PROBE_TEXT: &str = "床前明月光";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredParagraph {
    text: String,
    metadata: ParagraphMetadata,
}

struct StoreState {
    index: VectorIndex,
    documents: BTreeMap<String, StoredParagraph>,
    dirty: bool,
}

/// Result of one [`StoreHandle::add_texts`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: usize,
    /// Already stored, or repeated earlier in the same batch.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub content: String,
    pub metadata: ParagraphMetadata,
    /// Cosine distance; smaller is closer.
    pub distance: f32,
}

pub struct StoreHandle {
    path: PathBuf,
    embedder: Embedder,
    fingerprint: EmbedderFingerprint,
    state: RwLock<StoreState>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("path", &self.path)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl StoreHandle {
    /// Reopen the store at `path`, or start an empty one in memory if the
    /// directory does not exist. An existing store that is damaged or was
    /// built by a different embedder is an error, never reset.
    pub async fn open(path: impl Into<PathBuf>, embedder: Embedder) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            Self::reopen(path, embedder)
        } else {
            Self::create(path, embedder).await
        }
    }

    async fn create(path: PathBuf, embedder: Embedder) -> Result<Self> {
        let mut dimensions = embedder.dimensions();
        if dimensions == 0 {
            dimensions = embedder.embed_query(PROBE_TEXT).await?.len();
            tracing::info!("detected embedding dimensions: {}", dimensions);
        }
        let index = VectorIndex::new(dimensions, MetricKind::Cos)?;
        let fingerprint = EmbedderFingerprint::new(
            embedder.source(),
            embedder.model().map(str::to_owned),
            dimensions,
        );
        tracing::info!(
            "new store at {} ({} embedder, {} dims)",
            path.display(),
            fingerprint.source,
            dimensions
        );
        Ok(Self {
            path,
            embedder,
            fingerprint,
            state: RwLock::new(StoreState {
                index,
                documents: BTreeMap::new(),
                dirty: true,
            }),
        })
    }

    fn reopen(path: PathBuf, embedder: Embedder) -> Result<Self> {
        let corrupt = |reason: String| Img2PoeError::CorruptStore {
            path: path.display().to_string(),
            reason,
        };
        if !path.is_dir() {
            return Err(corrupt("not a directory".into()));
        }

        let stored = EmbedderFingerprint::load(&path)
            .map_err(|e| corrupt(format!("fingerprint: {e}")))?;
        let dimensions = match embedder.dimensions() {
            0 => stored.dimensions,
            d => d,
        };
        let current = EmbedderFingerprint::new(
            embedder.source(),
            embedder.model().map(str::to_owned),
            dimensions,
        );
        if let Some(diff) = stored.mismatch(&current) {
            return Err(Img2PoeError::EmbedderMismatch(diff));
        }

        let index = VectorIndex::load(&path, MetricKind::Cos)
            .map_err(|e| corrupt(format!("index: {e}")))?;
        if index.dimensions() != stored.dimensions {
            return Err(corrupt(format!(
                "index has {} dimensions, fingerprint says {}",
                index.dimensions(),
                stored.dimensions
            )));
        }

        let raw = std::fs::read_to_string(path.join(DOCUMENTS_FILE))
            .map_err(|e| corrupt(format!("{DOCUMENTS_FILE}: {e}")))?;
        let documents: BTreeMap<String, StoredParagraph> = serde_json::from_str(&raw)
            .map_err(|e| corrupt(format!("{DOCUMENTS_FILE}: {e}")))?;
        if documents.len() != index.len() || index.keys().any(|k| !documents.contains_key(k)) {
            return Err(corrupt(format!(
                "{} paragraphs in {} but {} vectors in the index",
                documents.len(),
                DOCUMENTS_FILE,
                index.len()
            )));
        }

        tracing::info!(
            "reopened store at {} ({} paragraphs)",
            path.display(),
            index.len()
        );
        Ok(Self {
            path,
            embedder,
            fingerprint: stored,
            state: RwLock::new(StoreState {
                index,
                documents,
                dirty: false,
            }),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| Img2PoeError::Vector("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| Img2PoeError::Vector("store lock poisoned".into()))
    }

    /// Embed and store paragraphs. `texts[i]` is described by
    /// `metadatas[i]`; paragraphs whose key is already stored are skipped
    /// without being embedded.
    pub async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Vec<ParagraphMetadata>,
    ) -> Result<AddOutcome> {
        if texts.len() != metadatas.len() {
            return Err(Img2PoeError::InvalidInput(format!(
                "{} texts but {} metadatas",
                texts.len(),
                metadatas.len()
            )));
        }
        if let Some(pos) = texts
            .iter()
            .zip(&metadatas)
            .position(|(t, m)| !m.describes(t))
        {
            return Err(Img2PoeError::InvalidInput(format!(
                "metadata {pos} does not point at its paragraph (index {})",
                metadatas[pos].index
            )));
        }

        let total = texts.len();
        let pending: Vec<(String, StoredParagraph)> = {
            let state = self.read()?;
            let mut seen = HashSet::new();
            texts
                .into_iter()
                .zip(metadatas)
                .filter_map(|(text, metadata)| {
                    let key = metadata.paragraph_key(&text);
                    if state.index.contains(&key) || !seen.insert(key.clone()) {
                        return None;
                    }
                    Some((key, StoredParagraph { text, metadata }))
                })
                .collect()
        };
        if pending.is_empty() {
            return Ok(AddOutcome {
                added: 0,
                skipped: total,
            });
        }

        let inputs: Vec<&str> = pending.iter().map(|(_, p)| p.text.as_str()).collect();
        let vectors = self.embedder.embed_documents(&inputs).await?;
        if vectors.len() != pending.len() {
            return Err(Img2PoeError::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                pending.len()
            )));
        }

        let entries: Vec<(String, Vec<f32>)> = pending
            .iter()
            .map(|(key, _)| key.clone())
            .zip(vectors)
            .collect();

        let mut state = self.write()?;
        let inserted = state.index.insert_batch(&entries);
        record_inserted(&mut state, pending);
        let added = inserted?;
        Ok(AddOutcome {
            added,
            skipped: total - added,
        })
    }

    /// The `k` stored paragraphs closest to `query_text`, nearest first.
    pub async fn similarity_search(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed_query(query_text).await?;

        let state = self.read()?;
        let neighbors = state.index.search(&query, k)?;
        neighbors
            .into_iter()
            .map(|n| {
                let doc = state
                    .documents
                    .get(&n.key)
                    .ok_or_else(|| Img2PoeError::CorruptStore {
                        path: self.path.display().to_string(),
                        reason: format!("no paragraph for key {}", n.key),
                    })?;
                Ok(SearchHit {
                    content: doc.text.clone(),
                    metadata: doc.metadata.clone(),
                    distance: n.distance,
                })
            })
            .collect()
    }

    /// Write everything to the store directory. No-op when nothing changed
    /// since the last call.
    pub fn persist(&self) -> Result<()> {
        let mut state = self.write()?;
        if !state.dirty {
            return Ok(());
        }
        std::fs::create_dir_all(&self.path)?;
        state.index.save(&self.path)?;
        let json = serde_json::to_string(&state.documents)?;
        write_atomic(&self.path.join(DOCUMENTS_FILE), json)?;
        self.fingerprint.save(&self.path)?;
        state.dirty = false;
        tracing::info!(
            "persisted {} paragraphs to {}",
            state.index.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().map(|s| s.index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.fingerprint.dimensions
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn embedder_source(&self) -> EmbedderSource {
        self.fingerprint.source
    }

    /// Flag the on-disk store as holding a partial ingestion.
    pub fn mark_incomplete(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        write_atomic(&self.path.join(INCOMPLETE_FILE), "")?;
        Ok(())
    }

    pub fn clear_incomplete(&self) -> Result<()> {
        match std::fs::remove_file(self.path.join(INCOMPLETE_FILE)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Whether the last ingestion into this store stopped before the end.
    pub fn is_incomplete(&self) -> bool {
        self.path.join(INCOMPLETE_FILE).exists()
    }
}

/// Attach payloads for the pending keys the index actually took. Runs even
/// when the insert failed partway so documents and vectors stay in step.
fn record_inserted(state: &mut StoreState, pending: Vec<(String, StoredParagraph)>) -> usize {
    let mut recorded = 0;
    for (key, paragraph) in pending {
        if state.index.contains(&key) && !state.documents.contains_key(&key) {
            state.documents.insert(key, paragraph);
            recorded += 1;
        }
    }
    if recorded > 0 {
        state.dirty = true;
    }
    recorded
}
