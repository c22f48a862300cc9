//! Transporte sobre la Bot API de Telegram.
//!
//! API pública:
//!   - `TelegramClient`: llamadas HTTP a la Bot API. Implementa `ChatSink`
//!     (respuestas) y `DeliveryCapability` (`sendDocument`).
//!   - `event_from_update`: traduce una actualización a `ChatEvent`.
//!   - `run_bot`: bucle de long polling hasta la señal de apagado.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    capture::{Attachment, AttachmentKind},
    chat::{ChatDispatcher, ChatEvent, ChatId, ChatReply, ChatSink},
    delivery::{DeliveryCapability, Destination},
    error::{TreeError, TreeResult},
    models::FileRef,
    navigation::{Menu, BACK_LABEL},
};

/// Segundos que Telegram mantiene abierta cada petición `getUpdates`.
const POLL_TIMEOUT_SECS: u64 = 30;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_PAUSE: Duration = Duration::from_secs(5);

// --- Tipos de la Bot API (sólo los campos que usamos) ---

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub document: Option<FileObject>,
    pub video: Option<FileObject>,
    pub photo: Option<Vec<FileObject>>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

/// Documento, vídeo o tamaño de foto: todos traen `file_id`.
#[derive(Debug, Deserialize)]
pub struct FileObject {
    pub file_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub message: Option<Message>,
    pub data: Option<String>,
}

pub fn event_from_update(update: Update) -> Option<ChatEvent> {
    if let Some(callback) = update.callback_query {
        let message = callback.message?;
        return Some(ChatEvent::Callback {
            chat_id: message.chat.id,
            message_id: message.message_id,
            callback_id: callback.id,
            data: callback.data.unwrap_or_default(),
        });
    }

    let message = update.message?;
    let chat_id = message.chat.id;

    if let Some(text) = &message.text {
        let command = text.split_whitespace().next().unwrap_or_default();
        // `/start@NombreDelBot` en grupos.
        if command == "/start" || command.starts_with("/start@") {
            return Some(ChatEvent::Start { chat_id });
        }
        return None;
    }

    let (kind, file) = if let Some(document) = message.document {
        (AttachmentKind::Document, document)
    } else if let Some(video) = message.video {
        (AttachmentKind::Video, video)
    } else {
        // Telegram ordena las fotos de menor a mayor tamaño.
        (AttachmentKind::Photo, message.photo?.pop()?)
    };

    Some(ChatEvent::Attachment {
        chat_id,
        sender_id: message.from?.id.to_string(),
        attachment: Attachment {
            kind,
            file_ref: FileRef::new(file.file_id),
            file_name: file.file_name,
        },
    })
}

/// Teclado en línea: una fila por entrada y "atrás" al final.
pub fn inline_keyboard(menu: &Menu) -> Value {
    let mut rows: Vec<Value> = menu
        .entries
        .iter()
        .map(|entry| json!([{ "text": entry.label, "callback_data": entry.action.encode() }]))
        .collect();
    if let Some(back) = &menu.back {
        rows.push(json!([{ "text": BACK_LABEL, "callback_data": back.encode() }]));
    }
    json!({ "inline_keyboard": rows })
}

pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> TreeResult<T> {
        let response: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TreeError::Unavailable(format!(
                "Telegram rechazó {method}: {}",
                response.description.unwrap_or_else(|| "sin descripción".to_string())
            ))),
        }
    }

    pub async fn get_updates(&self, offset: i64) -> TreeResult<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    async fn send_menu(&self, chat_id: ChatId, menu: &Menu) -> TreeResult<()> {
        self.call::<Value>(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": menu.text(),
                "parse_mode": "Markdown",
                "reply_markup": inline_keyboard(menu),
            }),
        )
        .await
        .map(drop)
    }

    async fn edit_menu(&self, chat_id: ChatId, message_id: i64, menu: &Menu) -> TreeResult<()> {
        let result = self
            .call::<Value>(
                "editMessageText",
                json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": menu.text(),
                    "parse_mode": "Markdown",
                    "reply_markup": inline_keyboard(menu),
                }),
            )
            .await;

        match result {
            // "Atrás" en la raíz vuelve a pintar exactamente lo mismo.
            Err(TreeError::Unavailable(msg)) if msg.contains("message is not modified") => Ok(()),
            other => other.map(drop),
        }
    }
}

#[async_trait]
impl ChatSink for TelegramClient {
    async fn send(&self, reply: ChatReply) -> TreeResult<()> {
        match reply {
            ChatReply::SendMenu { chat_id, menu } => self.send_menu(chat_id, &menu).await,
            ChatReply::EditMenu { chat_id, message_id, menu } => {
                self.edit_menu(chat_id, message_id, &menu).await
            }
            ChatReply::Text { chat_id, text } => self
                .call::<Value>(
                    "sendMessage",
                    json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" }),
                )
                .await
                .map(drop),
            ChatReply::AnswerCallback { callback_id } => self
                .call::<Value>("answerCallbackQuery", json!({ "callback_query_id": callback_id }))
                .await
                .map(drop),
        }
    }
}

#[async_trait]
impl DeliveryCapability for TelegramClient {
    async fn deliver(&self, file_ref: &FileRef, destination: &Destination, caption: &str) -> TreeResult<()> {
        self.call::<Value>(
            "sendDocument",
            json!({
                "chat_id": destination.0,
                "document": file_ref.as_str(),
                "caption": caption,
            }),
        )
        .await
        .map(drop)
    }
}

/// Long polling hasta que `shutdown` cambie.
pub async fn run_bot(
    client: std::sync::Arc<TelegramClient>,
    dispatcher: ChatDispatcher,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("🤖 Bot de Telegram escuchando actualizaciones...");
    let mut offset = 0i64;

    loop {
        let polled = tokio::select! {
            _ = shutdown.changed() => break,
            polled = client.get_updates(offset) => polled,
        };

        match polled {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if let Some(event) = event_from_update(update) {
                        dispatcher.dispatch(event);
                    }
                }
            }
            Err(e) => {
                warn!("Error consultando actualizaciones de Telegram: {e}");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(RETRY_PAUSE) => {}
                }
            }
        }
    }

    info!("Bot de Telegram detenido.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeId;
    use crate::navigation::{Action, MenuEntry};

    fn update(raw: Value) -> Update {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn start_command_becomes_start_event() {
        let event = event_from_update(update(json!({
            "update_id": 1,
            "message": { "message_id": 3, "chat": { "id": 77 }, "text": "/start" }
        })));
        assert_eq!(event, Some(ChatEvent::Start { chat_id: 77 }));

        let in_group = event_from_update(update(json!({
            "update_id": 2,
            "message": { "message_id": 4, "chat": { "id": -5 }, "text": "/start@StudyBot" }
        })));
        assert_eq!(in_group, Some(ChatEvent::Start { chat_id: -5 }));
    }

    #[test]
    fn other_text_is_ignored() {
        let event = event_from_update(update(json!({
            "update_id": 1,
            "message": { "message_id": 3, "chat": { "id": 77 }, "text": "hola" }
        })));
        assert_eq!(event, None);
    }

    #[test]
    fn callback_carries_message_and_data() {
        let event = event_from_update(update(json!({
            "update_id": 9,
            "callback_query": {
                "id": "abc",
                "from": { "id": 12 },
                "data": "open:root",
                "message": { "message_id": 40, "chat": { "id": 12 } }
            }
        })));
        assert_eq!(
            event,
            Some(ChatEvent::Callback {
                chat_id: 12,
                message_id: 40,
                callback_id: "abc".into(),
                data: "open:root".into(),
            })
        );
    }

    #[test]
    fn largest_photo_is_captured() {
        let event = event_from_update(update(json!({
            "update_id": 5,
            "message": {
                "message_id": 8,
                "chat": { "id": 1001 },
                "from": { "id": 1001 },
                "photo": [
                    { "file_id": "small", "width": 90, "height": 90 },
                    { "file_id": "large", "width": 1280, "height": 1280 }
                ]
            }
        })));
        let Some(ChatEvent::Attachment { sender_id, attachment, .. }) = event else {
            panic!("se esperaba un adjunto");
        };
        assert_eq!(sender_id, "1001");
        assert_eq!(attachment.kind, AttachmentKind::Photo);
        assert_eq!(attachment.file_ref, FileRef::new("large"));
        assert_eq!(attachment.file_name, None);
    }

    #[test]
    fn document_keeps_its_filename() {
        let event = event_from_update(update(json!({
            "update_id": 6,
            "message": {
                "message_id": 8,
                "chat": { "id": 1001 },
                "from": { "id": 1001 },
                "document": { "file_id": "DOC", "file_name": "tema2.pdf", "file_size": 1024 }
            }
        })));
        let Some(ChatEvent::Attachment { attachment, .. }) = event else {
            panic!("se esperaba un adjunto");
        };
        assert_eq!(attachment.kind, AttachmentKind::Document);
        assert_eq!(attachment.file_name.as_deref(), Some("tema2.pdf"));
    }

    #[test]
    fn keyboard_has_one_row_per_entry_plus_back() {
        let folder = NodeId::new();
        let file = NodeId::new();
        let menu = Menu {
            title: "t".into(),
            entries: vec![
                MenuEntry { label: "📁 A".into(), action: Action::Open(Some(folder)) },
                MenuEntry { label: "📄 b.pdf".into(), action: Action::OpenFile(file) },
            ],
            back: Some(Action::Back(Some(folder))),
            notice: None,
        };
        let keyboard = inline_keyboard(&menu);
        let rows = keyboard["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0]["callback_data"], format!("file:{file}"));
        assert_eq!(rows[2][0]["text"], BACK_LABEL);
        assert_eq!(rows[2][0]["callback_data"], format!("back:{folder}"));
    }
}
