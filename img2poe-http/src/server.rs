use axum::{routing::get, Router};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{health, img2poe, missing_query, AppState};
use crate::openapi::ApiDoc;
use img2poe::vector::config::EmbedderConfig;
use img2poe::vector::embedder::create_embedder;
use img2poe::{Img2PoeError, QueryService, StoreHandle};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8001";

/// Everything `serve` needs, already resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub store_dir: PathBuf,
    pub corpus_dir: PathBuf,
    pub bind_addr: String,
    pub batch_size: NonZeroUsize,
    pub top_k: usize,
    pub embedder: EmbedderConfig,
}

/// Install the global fmt subscriber on stderr, filtered by `RUST_LOG`
/// (default `info`). Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let swagger = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi());

    Router::new()
        .route("/health", get(health))
        .route("/img2poe", get(missing_query))
        .route("/img2poe/", get(missing_query))
        .route("/img2poe/:query_text", get(img2poe))
        .with_state(state)
        .merge(swagger)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive().max_age(std::time::Duration::from_secs(86400)))
}

/// Open the store, ingesting the corpus first when the store directory is
/// missing or the previous build stopped partway.
pub async fn prepare_store(config: &ServerConfig) -> Result<StoreHandle, Box<dyn std::error::Error>> {
    let embedder = create_embedder(&config.embedder).map_err(Img2PoeError::from)?;
    let fresh = !config.store_dir.exists();
    let store = StoreHandle::open(&config.store_dir, embedder).await?;

    if fresh || store.is_incomplete() {
        if fresh {
            tracing::info!(
                "no store at {}, building it from {}",
                config.store_dir.display(),
                config.corpus_dir.display()
            );
        } else {
            tracing::warn!(
                "store at {} is incomplete ({} paragraphs), resuming from {}",
                config.store_dir.display(),
                store.len(),
                config.corpus_dir.display()
            );
        }
        let mut corpus = img2poe::load_corpus(&config.corpus_dir)?;
        let report = img2poe::ingest(&store, corpus.by_ref(), config.batch_size).await?;
        let stats = corpus.stats();
        tracing::info!(
            files_read = stats.files_read,
            files_skipped = stats.files_skipped,
            paragraphs = report.paragraphs,
            "store initialised"
        );
    } else {
        tracing::info!("store already exists, skipping ingestion");
    }
    Ok(store)
}

/// Prepare the store, then serve until the process is stopped.
pub async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let startup_start = std::time::Instant::now();
    let store = prepare_store(&config).await?;

    let store = Arc::new(store);
    let paragraphs = store.len();
    let state = Arc::new(AppState::new(QueryService::with_default_k(
        store,
        config.top_k,
    )));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    print_startup_banner(
        &config.bind_addr,
        paragraphs,
        startup_start.elapsed().as_millis(),
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn print_startup_banner(bind_addr: &str, paragraphs: usize, startup_ms: u128) {
    use colored::Colorize;

    let url = format!("http://{}", bind_addr);
    let version = format!("v{}", env!("CARGO_PKG_VERSION"));
    let timing = format!("ready in {}ms", startup_ms);

    println!();
    println!(
        "  {} {}  {}",
        "img2poe".bold().bright_green(),
        version.as_str().dimmed(),
        timing.as_str().dimmed(),
    );
    println!();
    println!("  {}  Local:      {}", "➜".green(), url.as_str().cyan());
    let example = format!("{}/img2poe/明月", url);
    println!("  {}  Query:      {}", "➜".green(), example.as_str().cyan());
    let docs = format!("{}/swagger-ui", url);
    println!("  {}  API Docs:   {}", "➜".green(), docs.as_str().cyan());
    println!("  {}  Indexed:    {} paragraphs", "➜".green(), paragraphs);
    println!();
}
