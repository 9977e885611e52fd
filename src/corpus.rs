//! Lazily flatten a folder of corpus files into paragraphs.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;
use crate::normalize::json_files;
use crate::types::{IndexedParagraph, PoemRecord};

#[derive(Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    Many(Vec<PoemRecord>),
    One(PoemRecord),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CorpusStats {
    pub files_read: usize,
    pub files_skipped: usize,
    pub paragraphs: usize,
}

/// Iterator over every paragraph of every poem in a corpus folder.
///
/// Files are opened one at a time as iteration reaches them, in file name
/// order. Unreadable or malformed files are logged and skipped.
#[derive(Debug)]
pub struct CorpusIter {
    files: std::vec::IntoIter<PathBuf>,
    current: std::vec::IntoIter<IndexedParagraph>,
    stats: CorpusStats,
}

/// Open a corpus folder. Fails only if the folder itself cannot be listed.
pub fn load(folder: &Path) -> Result<CorpusIter> {
    let files = json_files(folder)?;
    tracing::info!("corpus {}: {} files", folder.display(), files.len());
    Ok(CorpusIter {
        files: files.into_iter(),
        current: Vec::new().into_iter(),
        stats: CorpusStats::default(),
    })
}

impl CorpusIter {
    pub fn stats(&self) -> CorpusStats {
        self.stats
    }

    fn read_file(path: &Path) -> Result<Vec<IndexedParagraph>> {
        let raw = std::fs::read_to_string(path)?;
        let records = match serde_json::from_str::<CorpusFile>(&raw)? {
            CorpusFile::Many(records) => records,
            CorpusFile::One(record) => vec![record],
        };
        Ok(records
            .into_iter()
            .flat_map(PoemRecord::into_paragraphs)
            .collect())
    }
}

impl Iterator for CorpusIter {
    type Item = IndexedParagraph;

    fn next(&mut self) -> Option<IndexedParagraph> {
        loop {
            if let Some(p) = self.current.next() {
                self.stats.paragraphs += 1;
                return Some(p);
            }
            let path = self.files.next()?;
            match Self::read_file(&path) {
                Ok(paragraphs) => {
                    tracing::debug!("{}: {} paragraphs", path.display(), paragraphs.len());
                    self.stats.files_read += 1;
                    self.current = paragraphs.into_iter();
                }
                Err(e) => {
                    tracing::warn!("skipping corpus file {}: {}", path.display(), e);
                    self.stats.files_skipped += 1;
                }
            }
        }
    }
}
