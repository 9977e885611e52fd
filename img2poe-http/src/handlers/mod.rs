use img2poe::{QueryService, StoreHandle};
use std::sync::Arc;

pub mod health;
pub mod poems;

pub struct AppState {
    pub query: QueryService,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(query: QueryService) -> Self {
        Self {
            query,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn store(&self) -> &Arc<StoreHandle> {
        self.query.store()
    }
}

pub use health::health;
pub use poems::{img2poe, missing_query};
