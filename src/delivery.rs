//! Adaptador de entrega de contenido.
//!
//! Resuelve un nodo fichero a su referencia opaca y se la pasa a la
//! capacidad externa de entrega. La entrega es "dispara y olvida": basta con
//! que la capacidad acepte la petición.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    error::{TreeError, TreeResult},
    models::{FileRef, NodeId},
    store::TreeStore,
};

/// Destino opaco de una entrega (en Telegram, el `chat_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination(pub i64);

/// Capacidad externa que transmite el contenido referenciado.
#[async_trait]
pub trait DeliveryCapability: Send + Sync + 'static {
    async fn deliver(&self, file_ref: &FileRef, destination: &Destination, caption: &str)
        -> TreeResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// El nodo ya no existe (o no es un fichero); se muestra al usuario.
    Unavailable,
}

#[derive(Clone)]
pub struct ContentDelivery {
    store: Arc<dyn TreeStore>,
    capability: Arc<dyn DeliveryCapability>,
}

impl ContentDelivery {
    pub fn new(store: Arc<dyn TreeStore>, capability: Arc<dyn DeliveryCapability>) -> Self {
        Self { store, capability }
    }

    pub async fn deliver(&self, node_id: NodeId, destination: &Destination) -> TreeResult<DeliveryOutcome> {
        let node = match self.store.get(node_id).await {
            Ok(node) => node,
            Err(TreeError::NotFound(_)) => {
                info!("Fichero {node_id} pedido pero ya no existe.");
                return Ok(DeliveryOutcome::Unavailable);
            }
            Err(e) => return Err(e),
        };

        let Some(file_ref) = node.file_ref.as_ref() else {
            warn!("Se pidió entregar {node_id}, que es una carpeta.");
            return Ok(DeliveryOutcome::Unavailable);
        };

        let caption = format!("📄 {}", node.name);
        self.capability.deliver(file_ref, destination, &caption).await?;
        info!("Fichero '{}' entregado a {:?}.", node.name, destination);
        Ok(DeliveryOutcome::Delivered)
    }
}
