use axum::{
    extract::{Path, State},
    Json,
};
use img2poe::{Img2PoeError, ResultView};
use std::sync::Arc;

use super::AppState;

/// Find the poem paragraphs closest to a piece of text
#[utoipa::path(
    get,
    path = "/img2poe/{query_text}",
    tag = "search",
    params(
        ("query_text" = String, Path, description = "Free text to match, URL-encoded")
    ),
    responses(
        (status = 200, description = "Matching paragraphs, nearest first", body = [ResultView]),
        (status = 400, description = "Blank query", body = img2poe::error::ErrorResponse),
        (status = 500, description = "Embedding or index failure", body = img2poe::error::ErrorResponse)
    )
)]
pub async fn img2poe(
    State(state): State<Arc<AppState>>,
    Path(query_text): Path<String>,
) -> Result<Json<Vec<ResultView>>, Img2PoeError> {
    let results = state.query.query_default(&query_text).await?;
    tracing::info!(query = %query_text, results = results.len(), "img2poe");
    Ok(Json(results))
}

/// `/img2poe` and `/img2poe/` carry no query text at all.
pub async fn missing_query() -> Img2PoeError {
    Img2PoeError::InvalidQuery("No query provided".into())
}
