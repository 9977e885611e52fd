use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "img2poe",
        description = "Paragraph-level semantic search over classical Chinese poetry"
    ),
    paths(crate::handlers::poems::img2poe, crate::handlers::health::health),
    components(schemas(img2poe::ResultView, img2poe::error::ErrorResponse)),
    tags(
        (name = "search", description = "Similarity search"),
        (name = "health", description = "Liveness and store statistics")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_both_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/img2poe/{query_text}"));
        assert!(paths.iter().any(|p| p.as_str() == "/health"));
    }
}
