//! Batched upserts from a paragraph stream into a [`StoreHandle`].

use std::num::NonZeroUsize;

use serde::Serialize;

use crate::error::Result;
use crate::store::StoreHandle;
use crate::types::{IndexedParagraph, ParagraphMetadata};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Paragraphs handed to the upserter.
    pub paragraphs: usize,
    /// Successful `add_texts` calls.
    pub flushes: usize,
    pub added: usize,
    pub skipped: usize,
}

/// Buffers paragraphs and writes them to the store `batch_size` at a time.
///
/// A batch whose write fails is dropped, not retried.
pub struct BatchUpserter<'a> {
    store: &'a StoreHandle,
    batch_size: NonZeroUsize,
    texts: Vec<String>,
    metadatas: Vec<ParagraphMetadata>,
    report: IngestReport,
}

impl<'a> BatchUpserter<'a> {
    pub fn new(store: &'a StoreHandle, batch_size: NonZeroUsize) -> Self {
        Self {
            store,
            batch_size,
            texts: Vec::with_capacity(batch_size.get()),
            metadatas: Vec::with_capacity(batch_size.get()),
            report: IngestReport::default(),
        }
    }

    pub async fn push(&mut self, item: IndexedParagraph) -> Result<()> {
        self.report.paragraphs += 1;
        self.texts.push(item.text);
        self.metadatas.push(item.metadata);
        if self.texts.len() >= self.batch_size.get() {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write whatever is buffered. The buffer is empty afterwards whether or
    /// not the write succeeded.
    pub async fn flush(&mut self) -> Result<()> {
        if self.texts.is_empty() {
            return Ok(());
        }
        let texts = std::mem::take(&mut self.texts);
        let metadatas = std::mem::take(&mut self.metadatas);
        let n = texts.len();

        let outcome = self.store.add_texts(texts, metadatas).await?;
        self.report.flushes += 1;
        self.report.added += outcome.added;
        self.report.skipped += outcome.skipped;
        tracing::debug!(
            "flush #{}: {} paragraphs ({} new, {} already stored)",
            self.report.flushes,
            n,
            outcome.added,
            outcome.skipped
        );
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.texts.len()
    }

    pub fn report(&self) -> IngestReport {
        self.report
    }

    /// Flush the tail and persist the store once.
    pub async fn finish(mut self) -> Result<IngestReport> {
        self.flush().await?;
        self.store.persist()?;
        Ok(self.report)
    }
}

/// Upsert every item into `store` in batches of `batch_size`, then persist.
///
/// On a failed batch the error is returned after persisting what earlier
/// batches wrote and marking the store incomplete, so a re-run only has to
/// embed what is missing. A run that reaches the end clears the mark.
pub async fn ingest<I>(
    store: &StoreHandle,
    items: I,
    batch_size: NonZeroUsize,
) -> Result<IngestReport>
where
    I: IntoIterator<Item = IndexedParagraph>,
{
    let mut upserter = BatchUpserter::new(store, batch_size);
    let outcome = drain(&mut upserter, items).await;

    let report = upserter.report();
    match outcome {
        Ok(()) => {
            store.persist()?;
            store.clear_incomplete()?;
            tracing::info!(
                "ingested {} paragraphs in {} batches: {} new, {} already stored",
                report.paragraphs,
                report.flushes,
                report.added,
                report.skipped
            );
            Ok(report)
        }
        Err(e) => {
            tracing::warn!(
                "ingestion aborted after {} batches: {}",
                report.flushes,
                e
            );
            match store.persist().and_then(|()| store.mark_incomplete()) {
                Ok(()) => tracing::info!(
                    "checkpointed {} paragraphs; store marked incomplete",
                    store.len()
                ),
                Err(pe) => tracing::warn!("checkpoint persist failed: {}", pe),
            }
            Err(e)
        }
    }
}

async fn drain<I>(upserter: &mut BatchUpserter<'_>, items: I) -> Result<()>
where
    I: IntoIterator<Item = IndexedParagraph>,
{
    for item in items {
        upserter.push(item).await?;
    }
    upserter.flush().await
}
