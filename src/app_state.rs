use std::sync::Arc;

use crate::{auth::SharedSecret, config::AppConfig, store::TreeStore};

/// Estado compartido, construido una vez en `main` y clonado en cada handler.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn TreeStore>,
    pub secret: SharedSecret,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn TreeStore>) -> Self {
        let secret = SharedSecret::new(config.admin_pass.clone());
        Self { config, store, secret }
    }
}
