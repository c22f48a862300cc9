//! Superficie de interacción por chat, independiente del transporte.
//!
//! Flujo:
//!   1. El transporte convierte cada actualización en un `ChatEvent`.
//!   2. `ChatDispatcher` lo encola en la cola de su conversación: chats
//!      distintos se atienden en paralelo, los eventos de un mismo chat en
//!      orden de llegada.
//!   3. `ChatService` lo resuelve contra la navegación, la entrega o la
//!      captura y devuelve las respuestas.
//!   4. El `ChatSink` del transporte envía esas respuestas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::{
    capture::{Attachment, CaptureAdapter},
    delivery::{ContentDelivery, DeliveryOutcome, Destination},
    error::TreeResult,
    navigation::{Action, Menu, Navigator, Outcome, UNAVAILABLE_NOTICE},
};

pub type ChatId = i64;

pub const UNKNOWN_ACTION_TEXT: &str = "🤔 No reconozco esa opción. Escribe /start para volver al inicio.";
pub const SERVICE_DOWN_TEXT: &str = "⚠️ El catálogo no está disponible ahora mismo. Inténtalo más tarde.";

/// Tiempo sin eventos tras el cual el worker de un chat termina.
const WORKER_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Comando `/start`: menú raíz en un mensaje nuevo.
    Start { chat_id: ChatId },
    /// Pulsación de un botón del menú.
    Callback {
        chat_id: ChatId,
        message_id: i64,
        callback_id: String,
        data: String,
    },
    Attachment {
        chat_id: ChatId,
        sender_id: String,
        attachment: Attachment,
    },
}

impl ChatEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Start { chat_id } | Self::Callback { chat_id, .. } | Self::Attachment { chat_id, .. } => {
                *chat_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    SendMenu { chat_id: ChatId, menu: Menu },
    /// Reemplaza en el sitio el menú del mensaje pulsado.
    EditMenu { chat_id: ChatId, message_id: i64, menu: Menu },
    Text { chat_id: ChatId, text: String },
    AnswerCallback { callback_id: String },
}

/// Salida de respuestas del transporte.
#[async_trait]
pub trait ChatSink: Send + Sync + 'static {
    async fn send(&self, reply: ChatReply) -> TreeResult<()>;
}

pub struct ChatService {
    navigator: Navigator,
    delivery: ContentDelivery,
    capture: CaptureAdapter,
}

impl ChatService {
    pub fn new(navigator: Navigator, delivery: ContentDelivery, capture: CaptureAdapter) -> Self {
        Self { navigator, delivery, capture }
    }

    pub async fn handle(&self, event: ChatEvent) -> TreeResult<Vec<ChatReply>> {
        match event {
            ChatEvent::Start { chat_id } => {
                let menu = self.navigator.render(None).await?;
                Ok(vec![ChatReply::SendMenu { chat_id, menu }])
            }
            ChatEvent::Callback { chat_id, message_id, callback_id, data } => {
                let mut replies = vec![ChatReply::AnswerCallback { callback_id }];
                let action = match Action::parse(&data) {
                    Ok(action) => action,
                    Err(e) => {
                        debug!("Callback descartado en el chat {chat_id}: {e}");
                        replies.push(ChatReply::Text { chat_id, text: UNKNOWN_ACTION_TEXT.to_string() });
                        return Ok(replies);
                    }
                };

                match self.navigator.resolve(action).await? {
                    Outcome::Menu(menu) => replies.push(ChatReply::EditMenu { chat_id, message_id, menu }),
                    Outcome::Deliver(node) => {
                        let outcome = self.delivery.deliver(node.id, &Destination(chat_id)).await?;
                        if outcome == DeliveryOutcome::Unavailable {
                            replies.push(ChatReply::Text { chat_id, text: UNAVAILABLE_NOTICE.to_string() });
                        }
                    }
                }
                Ok(replies)
            }
            ChatEvent::Attachment { chat_id, sender_id, attachment } => Ok(self
                .capture
                .capture(&sender_id, &attachment)
                .map(|text| vec![ChatReply::Text { chat_id, text }])
                .unwrap_or_default()),
        }
    }
}

type WorkerMap = Arc<Mutex<HashMap<ChatId, mpsc::UnboundedSender<ChatEvent>>>>;

/// Reparte eventos a un worker por conversación.
#[derive(Clone)]
pub struct ChatDispatcher {
    service: Arc<ChatService>,
    sink: Arc<dyn ChatSink>,
    workers: WorkerMap,
}

impl ChatDispatcher {
    pub fn new(service: Arc<ChatService>, sink: Arc<dyn ChatSink>) -> Self {
        Self {
            service,
            sink,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dispatch(&self, event: ChatEvent) {
        let chat_id = event.chat_id();
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);

        let event = match workers.get(&chat_id) {
            Some(sender) => match sender.send(event) {
                Ok(()) => return,
                // El worker murió (p. ej. panic); se reemplaza.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // El receptor sigue vivo: este envío no puede fallar.
        let _ = sender.send(event);
        workers.insert(chat_id, sender);
        tokio::spawn(run_worker(
            chat_id,
            receiver,
            self.service.clone(),
            self.sink.clone(),
            self.workers.clone(),
        ));
    }

    #[cfg(test)]
    fn active_chats(&self) -> usize {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

async fn run_worker(
    chat_id: ChatId,
    mut receiver: mpsc::UnboundedReceiver<ChatEvent>,
    service: Arc<ChatService>,
    sink: Arc<dyn ChatSink>,
    workers: WorkerMap,
) {
    debug!("Worker del chat {chat_id} iniciado.");
    loop {
        let event = match timeout(WORKER_IDLE, receiver.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                // Se decide bajo el mismo lock que usa `dispatch`, así ningún
                // evento queda encolado en un worker que ya se fue.
                let mut map = workers.lock().unwrap_or_else(PoisonError::into_inner);
                match receiver.try_recv() {
                    Ok(event) => event,
                    Err(_) => {
                        map.remove(&chat_id);
                        break;
                    }
                }
            }
        };
        process(chat_id, event, &service, sink.as_ref()).await;
    }
    debug!("Worker del chat {chat_id} terminado por inactividad.");
}

async fn process(chat_id: ChatId, event: ChatEvent, service: &ChatService, sink: &dyn ChatSink) {
    // Toda pulsación se contesta, también si falla su resolución.
    let callback_id = match &event {
        ChatEvent::Callback { callback_id, .. } => Some(callback_id.clone()),
        _ => None,
    };
    let replies = match service.handle(event).await {
        Ok(replies) => replies,
        Err(e) => {
            error!("Error atendiendo el chat {chat_id}: {e}");
            callback_id
                .map(|callback_id| ChatReply::AnswerCallback { callback_id })
                .into_iter()
                .chain([ChatReply::Text { chat_id, text: SERVICE_DOWN_TEXT.to_string() }])
                .collect()
        }
    };
    for reply in replies {
        if let Err(e) = sink.send(reply).await {
            warn!("No se pudo responder al chat {chat_id}: {e}");
        }
    }
}
