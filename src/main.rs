// Módulos de la aplicación
mod api;
mod app_state;
mod auth;
mod capture;
mod chat;
mod config;
mod delivery;
mod error;
mod models;
mod navigation;
mod neo4j_store;
mod store;
mod telegram;

use crate::{
    app_state::AppState,
    capture::CaptureAdapter,
    chat::{ChatDispatcher, ChatService},
    config::StoreBackend,
    delivery::ContentDelivery,
    navigation::Navigator,
    neo4j_store::Neo4jTreeStore,
    store::{MemoryTreeStore, TreeStore},
    telegram::TelegramClient,
};
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Preparar el store del catálogo
    let store: Arc<dyn TreeStore> = match cfg.store_backend {
        StoreBackend::Neo4j => {
            let graph = neo4j_store::connect_from_config(&cfg)
                .await
                .expect("Error conectando a Neo4j");
            neo4j_store::ensure_schema(&graph)
                .await
                .expect("Error asegurando el esquema de Neo4j");
            Arc::new(Neo4jTreeStore::new(Arc::new(graph)))
        }
        StoreBackend::Memory => {
            warn!("Usando el store en memoria: el catálogo se pierde al reiniciar.");
            Arc::new(MemoryTreeStore::new())
        }
    };

    // Canal para la señal de apagado (servidor y bot).
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState::new(cfg.clone(), store.clone());

    // 5. Arrancar el bot si hay token
    let bot_handle = match &cfg.telegram_token {
        Some(token) => {
            let client = Arc::new(
                TelegramClient::new(&cfg.telegram_api_url, token)
                    .expect("Error creando el cliente de Telegram"),
            );
            let service = ChatService::new(
                Navigator::new(store.clone()),
                ContentDelivery::new(store.clone(), client.clone()),
                CaptureAdapter::new(cfg.admin_id.clone()),
            );
            let dispatcher = ChatDispatcher::new(Arc::new(service), client.clone());
            Some(tokio::spawn(telegram::run_bot(client, dispatcher, shutdown_rx.clone())))
        }
        None => {
            warn!("TELEGRAM_TOKEN no configurado: sólo se sirve el panel de administración.");
            None
        }
    };

    // 6. Configurar el router de la API y el panel estático
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .nest_service("/admin", ServeDir::new(&app_state.config.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Ctrl-C dispara el apagado ordenado.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Señal de apagado recibida, iniciando cierre del servidor.");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("No se pudo escuchar Ctrl-C ({e}); el servidor seguirá activo.");
                // Mantener vivo el emisor: soltarlo cerraría el servidor.
                std::future::pending::<()>().await;
            }
        }
    });

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .expect("Error sirviendo la API");

    if let Some(handle) = bot_handle {
        let _ = handle.await;
    }

    info!("✅ Servidor cerrado correctamente.");
}
