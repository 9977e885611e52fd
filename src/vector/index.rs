use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use usearch::ffi::{IndexOptions, MetricKind, ScalarKind};
use usearch::Index;

use super::{write_atomic, Neighbor, VectorError};

pub const INDEX_FILE: &str = "index.usearch";
pub const ID_MAP_FILE: &str = "id_map.json";

/// Paragraph key ↔ usearch u64 label. Keys are only ever added.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct KeyMap {
    to_label: HashMap<String, u64>,
    to_key: HashMap<u64, String>,
    next_label: u64,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a label for `key`. Returns `None` if the key is already mapped.
    pub fn assign(&mut self, key: &str) -> Option<u64> {
        if self.to_label.contains_key(key) {
            return None;
        }
        let label = self.next_label;
        self.next_label += 1;
        self.to_label.insert(key.to_owned(), label);
        self.to_key.insert(label, key.to_owned());
        Some(label)
    }

    pub fn label(&self, key: &str) -> Option<u64> {
        self.to_label.get(key).copied()
    }

    pub fn key(&self, label: u64) -> Option<&str> {
        self.to_key.get(&label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.to_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_label.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.to_label.keys().map(String::as_str)
    }

    fn is_consistent(&self) -> bool {
        self.to_label.len() == self.to_key.len()
            && self
                .to_label
                .iter()
                .all(|(k, l)| *l < self.next_label && self.to_key.get(l) == Some(k))
    }
}

fn hnsw<E: std::fmt::Display>(e: E) -> VectorError {
    VectorError::HnswError(e.to_string())
}

fn options(dimensions: usize, metric: MetricKind) -> IndexOptions {
    IndexOptions {
        dimensions,
        metric,
        quantization: ScalarKind::F32,
        connectivity: 0,
        expansion_add: 0,
        expansion_search: 0,
        multi: false,
    }
}

fn path_str(path: &Path) -> Result<&str, VectorError> {
    path.to_str()
        .ok_or_else(|| VectorError::InvalidPath(path.display().to_string()))
}

/// HNSW index over paragraph vectors, addressed by paragraph key.
pub struct VectorIndex {
    inner: Index,
    keys: KeyMap,
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(dimensions: usize, metric: MetricKind) -> Result<Self, VectorError> {
        if dimensions == 0 {
            return Err(VectorError::DimensionMismatch {
                expected: 1,
                got: 0,
            });
        }
        let inner = Index::new(&options(dimensions, metric)).map_err(hnsw)?;
        Ok(Self {
            inner,
            keys: KeyMap::new(),
            dimensions,
        })
    }

    /// Add a batch of `(key, vector)` pairs. Every vector is checked before
    /// anything is inserted; keys already present are skipped. Returns the
    /// number inserted.
    pub fn insert_batch(&mut self, entries: &[(String, Vec<f32>)]) -> Result<usize, VectorError> {
        if let Some((_, bad)) = entries.iter().find(|(_, v)| v.len() != self.dimensions) {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: bad.len(),
            });
        }

        self.inner
            .reserve(self.keys.len() + entries.len())
            .map_err(hnsw)?;
        self.insert_with(entries, |index, label, vector| {
            index.add(label, vector).map_err(hnsw)
        })
    }

    /// Keys are mapped only once their vector is in the graph, so a failure
    /// partway leaves every earlier entry of the batch fully inserted and
    /// the failing one absent.
    fn insert_with<F>(&mut self, entries: &[(String, Vec<f32>)], mut add: F) -> Result<usize, VectorError>
    where
        F: FnMut(&Index, u64, &[f32]) -> Result<(), VectorError>,
    {
        let mut inserted = 0;
        for (key, vector) in entries {
            if self.keys.label(key).is_some() {
                continue;
            }
            let label = self.keys.next_label;
            add(&self.inner, label, vector.as_slice())?;
            self.keys.assign(key);
            inserted += 1;
        }
        Ok(inserted)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.label(key).is_some()
    }

    /// Up to `k` nearest keys, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorError> {
        if query.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if k == 0 || self.keys.is_empty() {
            return Ok(Vec::new());
        }
        let matches = self
            .inner
            .search(query, k.min(self.keys.len()))
            .map_err(hnsw)?;
        let mut out: Vec<Neighbor> = matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(label, distance)| {
                self.keys.key(*label).map(|key| Neighbor {
                    key: key.to_owned(),
                    distance: *distance,
                })
            })
            .collect();
        out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys()
    }

    pub fn save(&self, dir: &Path) -> Result<(), VectorError> {
        std::fs::create_dir_all(dir)?;
        if !self.keys.is_empty() {
            let tmp_path = dir.join(format!("{INDEX_FILE}.tmp"));
            self.inner.save(path_str(&tmp_path)?).map_err(hnsw)?;
            std::fs::rename(&tmp_path, dir.join(INDEX_FILE))?;
        }

        let meta = SavedMeta {
            id_map: &self.keys,
            dimensions: self.dimensions,
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| VectorError::SerializationError(e.to_string()))?;
        write_atomic(&dir.join(ID_MAP_FILE), json)?;
        Ok(())
    }

    /// Reopen a saved index. Fails if the id map is unreadable or disagrees
    /// with the graph it was saved alongside.
    pub fn load(dir: &Path, metric: MetricKind) -> Result<Self, VectorError> {
        let json = std::fs::read_to_string(dir.join(ID_MAP_FILE))?;
        let meta: LoadedMeta = serde_json::from_str(&json)
            .map_err(|e| VectorError::SerializationError(e.to_string()))?;
        if !meta.id_map.is_consistent() {
            return Err(VectorError::SerializationError(
                "id map is not a bijection".into(),
            ));
        }

        let inner = Index::new(&options(meta.dimensions, metric)).map_err(hnsw)?;
        let index_path = dir.join(INDEX_FILE);
        if !meta.id_map.is_empty() {
            if !index_path.exists() {
                return Err(VectorError::SerializationError(format!(
                    "{} missing for {} mapped keys",
                    INDEX_FILE,
                    meta.id_map.len()
                )));
            }
            inner.load(path_str(&index_path)?).map_err(hnsw)?;
            if inner.size() != meta.id_map.len() {
                return Err(VectorError::SerializationError(format!(
                    "{} holds {} vectors but {} maps {}",
                    INDEX_FILE,
                    inner.size(),
                    ID_MAP_FILE,
                    meta.id_map.len()
                )));
            }
        }
        inner.reserve(meta.id_map.len()).map_err(hnsw)?;

        Ok(Self {
            inner,
            keys: meta.id_map,
            dimensions: meta.dimensions,
        })
    }
}

#[derive(Serialize)]
struct SavedMeta<'a> {
    id_map: &'a KeyMap,
    dimensions: usize,
}

#[derive(Deserialize)]
struct LoadedMeta {
    id_map: KeyMap,
    dimensions: usize,
}
