//! Paragraph-level semantic search over a poetry corpus.
//!
//! The crate covers the offline half (traditional→simplified conversion,
//! corpus loading, batched upserts into a persistent vector store) and the
//! query half (similarity search plus reconstruction of the full poem).
//! The HTTP surface lives in `img2poe-http`.

pub mod corpus;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod query;
pub mod store;
pub mod types;
pub mod vector;

pub use corpus::{load as load_corpus, CorpusIter, CorpusStats};
pub use error::{Img2PoeError, Result};
pub use ingest::{ingest, BatchUpserter, IngestReport, DEFAULT_BATCH_SIZE};
pub use normalize::{convert_folder, simplify_text, to_simplified, ConvertReport};
pub use query::{QueryService, DEFAULT_TOP_K};
pub use store::{AddOutcome, SearchHit, StoreHandle};
pub use types::{IndexedParagraph, ParagraphMetadata, PoemRecord, ResultView};
