#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use img2poe::vector::embedder::{Embedder, HashEmbedder};
use img2poe::{QueryService, StoreHandle};
use tokio::net::TcpListener;

pub const JING_YE_SI: &str = r#"[
    {"id": "libai-1", "author": "李白", "title": "静夜思", "paragraphs": ["床前明月光", "疑是地上霜"]}
]"#;

pub const DENG_GUAN_QUE_LOU: &str = r#"[
    {"author": "王之涣", "title": "登鹳雀楼", "paragraphs": ["白日依山尽", "黄河入海流", "欲穷千里目", "更上一层楼"]},
    {"title": "残篇"}
]"#;

pub fn write_file(dir: &Path, name: &str, body: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), body).unwrap();
}

pub fn hash_embedder() -> Embedder {
    Embedder::Hash(HashEmbedder::new(128))
}

pub async fn hash_store(path: &Path) -> StoreHandle {
    StoreHandle::open(path, hash_embedder()).await.unwrap()
}

/// Serve `store` on an ephemeral port and wait until /health answers.

pub async fn spawn_server(store: StoreHandle) -> String {
    let state = Arc::new(img2poe_http::handlers::AppState::new(QueryService::new(
        Arc::new(store),
    )));
    let app = img2poe_http::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    for _ in 0..100 {
        if client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .is_ok()
        {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
    }

    addr
}
