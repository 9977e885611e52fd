#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use img2poe::vector::config::EmbedderConfig;
use img2poe::vector::embedder::create_embedder;
use img2poe::{Img2PoeError, QueryService, StoreHandle};
use img2poe_http::server::DEFAULT_BIND_ADDR;
use img2poe_http::{init_tracing, serve, ServerConfig};

#[derive(Parser)]
#[command(name = "img2poe", version, about = "Semantic search over a poetry corpus")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory holding the persisted vector store
    #[arg(long, env = "IMG2POE_STORE_DIR", default_value = "poem_index", global = true)]
    store_dir: PathBuf,

    /// Folder of corpus JSON files, read when the store does not exist yet
    #[arg(long, env = "IMG2POE_CORPUS_DIR", default_value = "corpus", global = true)]
    corpus_dir: PathBuf,

    #[arg(long, env = "IMG2POE_BIND_ADDR", default_value = DEFAULT_BIND_ADDR, global = true)]
    bind_addr: String,

    /// Paragraphs per add_texts call during ingestion
    #[arg(long, env = "IMG2POE_BATCH_SIZE", default_value = "100", global = true)]
    batch_size: NonZeroUsize,

    /// Results returned per query
    #[arg(long, env = "IMG2POE_TOP_K", default_value_t = img2poe::DEFAULT_TOP_K, global = true)]
    top_k: usize,

    /// JSON file with embedder settings; the hash embedder is used without one
    #[arg(long, env = "IMG2POE_EMBEDDER_CONFIG", global = true)]
    embedder_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default). Builds the store first if it is missing.
    Serve,
    /// Add a corpus folder to a new or existing store
    Ingest {
        /// Corpus folder; defaults to --corpus-dir
        corpus_dir: Option<PathBuf>,
    },
    /// Convert every .json file in a folder from traditional to simplified Chinese
    Convert {
        input: PathBuf,
        /// Write converted files here instead of overwriting the input
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run one query against an existing store and print the results as JSON
    Query {
        text: String,
        #[arg(long)]
        k: Option<usize>,
    },
}

fn embedder_config(path: Option<&Path>) -> Result<EmbedderConfig, Box<dyn std::error::Error>> {
    match path {
        Some(p) => Ok(EmbedderConfig::from_file(p).map_err(Img2PoeError::from)?),
        None => Ok(EmbedderConfig::default()),
    }
}

async fn run_ingest(cli: &Cli, corpus_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let embedder = create_embedder(&embedder_config(cli.embedder_config.as_deref())?)
        .map_err(Img2PoeError::from)?;
    let store = StoreHandle::open(&cli.store_dir, embedder).await?;
    let mut corpus = img2poe::load_corpus(corpus_dir)?;
    let report = img2poe::ingest(&store, corpus.by_ref(), cli.batch_size).await?;
    let stats = corpus.stats();
    tracing::info!(
        files_read = stats.files_read,
        files_skipped = stats.files_skipped,
        "ingestion finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_convert(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let report = img2poe::convert_folder(input, output)?;
    println!(
        "converted {} files, {} failed",
        report.converted, report.failed
    );
    Ok(())
}

async fn run_query(cli: &Cli, text: &str, k: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.store_dir.exists() {
        return Err(format!(
            "no store at {}; run `img2poe ingest` first",
            cli.store_dir.display()
        )
        .into());
    }
    let embedder = create_embedder(&embedder_config(cli.embedder_config.as_deref())?)
        .map_err(Img2PoeError::from)?;
    let store = StoreHandle::open(&cli.store_dir, embedder).await?;
    let service = QueryService::with_default_k(Arc::new(store), cli.top_k);
    let results = service.query(text, k.unwrap_or(cli.top_k)).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        Some(Command::Ingest { corpus_dir }) => {
            let dir = corpus_dir.as_deref().unwrap_or(&cli.corpus_dir);
            run_ingest(&cli, dir).await
        }
        Some(Command::Convert { input, output }) => run_convert(input, output.as_deref()),
        Some(Command::Query { text, k }) => run_query(&cli, text, *k).await,
        Some(Command::Serve) | None => {
            serve(ServerConfig {
                store_dir: cli.store_dir.clone(),
                corpus_dir: cli.corpus_dir.clone(),
                bind_addr: cli.bind_addr.clone(),
                batch_size: cli.batch_size,
                top_k: cli.top_k,
                embedder: embedder_config(cli.embedder_config.as_deref())?,
            })
            .await
        }
    }
}
