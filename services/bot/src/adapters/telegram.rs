//! services/bot/src/adapters/telegram.rs
//!
//! A thin client for the Telegram Bot API, implementing the `MessagingService`
//! port plus the few intake calls (`getUpdates`, `setWebhook`, `getMe`) the
//! service binary needs.
//!
//! Calls are retried a bounded number of times: network failures and 5xx
//! answers back off exponentially, 429 answers wait for the `retry_after` the
//! API asks for. Other API errors are returned immediately. Document uploads
//! are not idempotent and get a single attempt; their caller owns the retry.

use async_trait::async_trait;
use prezentor_core::domain::{
    ChatId, InlineAction, Keyboard, MessageId, PhotoSource, UserId,
};
use prezentor_core::ports::{MessagingService, PortError, PortResult};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bot::protocol::Update;

const API_BASE: &str = "https://api.telegram.org";
const MAX_ATTEMPTS: u32 = 3;
/// A repeated `sendDocument` may deliver the file twice.
const UPLOAD_ATTEMPTS: u32 = 1;
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);
/// Long-poll window; the HTTP timeout must exceed it.
pub const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("Telegram network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelegramError {
    fn is_not_modified(&self) -> bool {
        matches!(self, TelegramError::Api { description, .. } if description.contains("message is not modified"))
    }
}

impl From<TelegramError> for PortError {
    fn from(e: TelegramError) -> Self {
        match &e {
            TelegramError::Api { description, .. } if description.contains("not found") => {
                PortError::NotFound(description.clone())
            }
            TelegramError::Api { code: 400 | 403, description } => PortError::InvalidInput(description.clone()),
            _ => PortError::Unexpected(e.to_string()),
        }
    }
}

//=========================================================================================
// Wire types
//=========================================================================================

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Deserialize)]
struct ChatMember {
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}

/// What one attempt produced.
enum Attempt<T> {
    Done(T),
    Retry(Duration, TelegramError),
    Failed(TelegramError),
}

//=========================================================================================
// The Client
//=========================================================================================

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, reqwest::Error> {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(api_base: &str, token: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 30))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TelegramError> {
        self.with_retry(method, MAX_ATTEMPTS, || {
            self.http.post(format!("{}/{}", self.base_url, method)).json(body)
        })
        .await
    }

    async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &str,
        attempts: u32,
        form: impl Fn() -> Form,
    ) -> Result<T, TelegramError> {
        self.with_retry(method, attempts, || {
            self.http
                .post(format!("{}/{}", self.base_url, method))
                .multipart(form())
        })
        .await
    }

    async fn with_retry<T: DeserializeOwned>(
        &self,
        method: &str,
        attempts: u32,
        request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, TelegramError> {
        let mut attempt = 1;
        loop {
            let outcome = match request().send().await {
                Ok(response) => Self::interpret(response).await,
                // The request URL carries the token, so it is stripped from errors.
                Err(e) => Attempt::Retry(BASE_BACKOFF * 2u32.pow(attempt - 1), e.without_url().into()),
            };
            match outcome {
                Attempt::Done(value) => return Ok(value),
                Attempt::Failed(e) => return Err(e),
                Attempt::Retry(wait, cause) if attempt < attempts => {
                    warn!(method, attempt, "Telegram call failed, retrying in {:?}: {}", wait, cause);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Attempt::Retry(_, cause) => return Err(cause),
            }
        }
    }

    async fn interpret<T: DeserializeOwned>(response: reqwest::Response) -> Attempt<T> {
        let status = response.status();
        let body = match response.json::<ApiResponse<T>>().await {
            Ok(body) => body,
            Err(e) if status.is_server_error() => {
                debug!("Unreadable {} body: {}", status, e);
                return Attempt::Retry(BASE_BACKOFF, e.without_url().into());
            }
            Err(e) => return Attempt::Failed(e.without_url().into()),
        };
        if body.ok {
            if let Some(result) = body.result {
                return Attempt::Done(result);
            }
        }
        let code = body.error_code.unwrap_or(i64::from(status.as_u16()));
        let error = TelegramError::Api {
            code,
            description: body.description.unwrap_or_else(|| "no description".to_string()),
        };
        if code == 429 {
            let wait = body
                .parameters
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(1))
                .min(MAX_RETRY_AFTER);
            return Attempt::Retry(wait, error);
        }
        if code >= 500 {
            return Attempt::Retry(BASE_BACKOFF, error);
        }
        Attempt::Failed(error)
    }

    //-------------------------------------------------------------------------------------
    // Intake
    //-------------------------------------------------------------------------------------

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn get_me(&self) -> Result<BotIdentity, TelegramError> {
        self.call("getMe", &json!({})).await
    }

    pub async fn set_webhook(&self, url: &str, secret: &str) -> Result<bool, TelegramError> {
        self.call(
            "setWebhook",
            &json!({
                "url": url,
                "secret_token": secret,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn delete_webhook(&self) -> Result<bool, TelegramError> {
        self.call("deleteWebhook", &json!({ "drop_pending_updates": false })).await
    }
}

/// Renders a keyboard as a `reply_markup` object, or `None` for no markup.
pub fn reply_markup(keyboard: &Keyboard) -> Option<Value> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::Remove => Some(json!({ "remove_keyboard": true })),
        Keyboard::Reply { rows, one_time } => Some(json!({
            "keyboard": rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| json!({ "text": b.text, "request_contact": b.request_contact }))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>(),
            "resize_keyboard": true,
            "one_time_keyboard": one_time,
        })),
        Keyboard::Inline(rows) => Some(json!({
            "inline_keyboard": rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| match &b.action {
                            InlineAction::Callback(data) => json!({ "text": b.text, "callback_data": data }),
                            InlineAction::Url(url) => json!({ "text": b.text, "url": url }),
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>(),
        })),
    }
}

fn with_markup(mut body: Value, keyboard: &Keyboard) -> Value {
    if let (Some(markup), Some(map)) = (reply_markup(keyboard), body.as_object_mut()) {
        map.insert("reply_markup".to_string(), markup);
    }
    body
}

fn form_with_markup(form: Form, keyboard: &Keyboard) -> Form {
    match reply_markup(keyboard) {
        Some(markup) => form.text("reply_markup", markup.to_string()),
        None => form,
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, TelegramError> {
    Ok(tokio::fs::read(path).await?)
}

fn file_part(bytes: &[u8], file_name: &str) -> Part {
    Part::bytes(bytes.to_vec()).file_name(file_name.to_string())
}

fn local_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string())
}

//=========================================================================================
// `MessagingService` Trait Implementation
//=========================================================================================

#[async_trait]
impl MessagingService for TelegramClient {
    async fn send_text(&self, chat: &ChatId, text: &str, keyboard: Keyboard) -> PortResult<MessageId> {
        let body = with_markup(json!({ "chat_id": chat.0, "text": text }), &keyboard);
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(MessageId(sent.message_id))
    }

    async fn edit_text(&self, chat: &ChatId, message: MessageId, text: &str) -> PortResult<()> {
        let body = json!({ "chat_id": chat.0, "message_id": message.0, "text": text });
        match self.call::<Value>("editMessageText", &body).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_modified() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_message(&self, chat: &ChatId, message: MessageId) -> PortResult<()> {
        self.call::<bool>("deleteMessage", &json!({ "chat_id": chat.0, "message_id": message.0 }))
            .await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat: &ChatId,
        path: &Path,
        file_name: &str,
        caption: Option<&str>,
    ) -> PortResult<MessageId> {
        let bytes = read_file(path).await?;
        let sent: SentMessage = self
            .call_multipart("sendDocument", UPLOAD_ATTEMPTS, || {
                let form = Form::new()
                    .text("chat_id", chat.0.clone())
                    .part("document", file_part(&bytes, file_name));
                match caption {
                    Some(caption) => form.text("caption", caption.to_string()),
                    None => form,
                }
            })
            .await?;
        Ok(MessageId(sent.message_id))
    }

    async fn send_photo(
        &self,
        chat: &ChatId,
        photo: &PhotoSource,
        caption: &str,
        keyboard: Keyboard,
    ) -> PortResult<MessageId> {
        let sent: SentMessage = match photo {
            PhotoSource::Remote(file_id) => {
                let body = with_markup(
                    json!({ "chat_id": chat.0, "photo": file_id, "caption": caption }),
                    &keyboard,
                );
                self.call("sendPhoto", &body).await?
            }
            PhotoSource::File(path) => {
                let bytes = read_file(path).await?;
                let name = local_name(path);
                self.call_multipart("sendPhoto", MAX_ATTEMPTS, || {
                    let form = Form::new()
                        .text("chat_id", chat.0.clone())
                        .text("caption", caption.to_string())
                        .part("photo", file_part(&bytes, &name));
                    form_with_markup(form, &keyboard)
                })
                .await?
            }
        };
        Ok(MessageId(sent.message_id))
    }

    async fn edit_photo(
        &self,
        chat: &ChatId,
        message: MessageId,
        photo: &PhotoSource,
        caption: &str,
        keyboard: Keyboard,
    ) -> PortResult<()> {
        let result = match photo {
            PhotoSource::Remote(file_id) => {
                let body = with_markup(
                    json!({
                        "chat_id": chat.0,
                        "message_id": message.0,
                        "media": { "type": "photo", "media": file_id, "caption": caption },
                    }),
                    &keyboard,
                );
                self.call::<Value>("editMessageMedia", &body).await
            }
            PhotoSource::File(path) => {
                let bytes = read_file(path).await?;
                let name = local_name(path);
                let media = json!({ "type": "photo", "media": "attach://photo", "caption": caption }).to_string();
                self.call_multipart::<Value>("editMessageMedia", MAX_ATTEMPTS, || {
                    let form = Form::new()
                        .text("chat_id", chat.0.clone())
                        .text("message_id", message.0.to_string())
                        .text("media", media.clone())
                        .part("photo", file_part(&bytes, &name));
                    form_with_markup(form, &keyboard)
                })
                .await
            }
        };
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_modified() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_member(&self, channel: &str, user: &UserId) -> PortResult<bool> {
        let user_id: i64 = user
            .as_str()
            .parse()
            .map_err(|_| PortError::InvalidInput(format!("'{}' is not a Telegram user id", user)))?;
        let member: ChatMember = self
            .call("getChatMember", &json!({ "chat_id": channel, "user_id": user_id }))
            .await?;
        Ok(!matches!(member.status.as_str(), "left" | "kicked"))
    }

    async fn acknowledge(&self, callback_id: &str) -> PortResult<()> {
        self.call::<bool>("answerCallbackQuery", &json!({ "callback_query_id": callback_id }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use prezentor_core::domain::{InlineButton, ReplyButton};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// A local Bot API that answers every call with a 502 and counts hits.
    async fn flaky_api() -> (String, Arc<AtomicU32>, Arc<AtomicU32>) {
        let uploads = Arc::new(AtomicU32::new(0));
        let messages = Arc::new(AtomicU32::new(0));
        let bad_gateway = || {
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "ok": false, "error_code": 502, "description": "Bad Gateway" })),
            )
        };
        let app = Router::new()
            .route(
                "/botT/sendDocument",
                post({
                    let uploads = uploads.clone();
                    move || async move {
                        uploads.fetch_add(1, Ordering::SeqCst);
                        bad_gateway()
                    }
                }),
            )
            .route(
                "/botT/sendMessage",
                post({
                    let messages = messages.clone();
                    move || async move {
                        messages.fetch_add(1, Ordering::SeqCst);
                        bad_gateway()
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), uploads, messages)
    }

    #[tokio::test]
    async fn document_uploads_are_sent_once() {
        let (base, uploads, _) = flaky_api().await;
        let client = TelegramClient::with_base_url(&base, "T").unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"pptx").unwrap();

        let result = client
            .send_document(&ChatId("1".into()), file.path(), "deck.pptx", None)
            .await;

        assert!(matches!(result, Err(PortError::Unexpected(_))));
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_on_plain_calls_are_retried() {
        let (base, _, messages) = flaky_api().await;
        let client = TelegramClient::with_base_url(&base, "T").unwrap();

        let result = client.send_text(&ChatId("1".into()), "salom", Keyboard::None).await;

        assert!(result.is_err());
        assert_eq!(messages.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[test]
    fn reply_keyboard_carries_contact_requests() {
        let keyboard = Keyboard::Reply {
            rows: vec![vec![ReplyButton::contact("📱 Raqamni yuborish")]],
            one_time: true,
        };
        let markup = reply_markup(&keyboard).unwrap();
        assert_eq!(markup["keyboard"][0][0]["request_contact"], json!(true));
        assert_eq!(markup["one_time_keyboard"], json!(true));
    }

    #[test]
    fn inline_keyboard_mixes_callbacks_and_links() {
        let keyboard = Keyboard::Inline(vec![vec![
            InlineButton::callback("✅ Ha", "cf:yes"),
            InlineButton::url("Kanal", "https://t.me/prezentor_news"),
        ]]);
        let markup = reply_markup(&keyboard).unwrap();
        assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], json!("cf:yes"));
        assert_eq!(markup["inline_keyboard"][0][1]["url"], json!("https://t.me/prezentor_news"));
    }

    #[test]
    fn no_keyboard_adds_no_markup() {
        let body = with_markup(json!({ "chat_id": "1" }), &Keyboard::None);
        assert!(body.get("reply_markup").is_none());
    }

    #[test]
    fn api_errors_map_onto_port_errors() {
        let not_modified = TelegramError::Api {
            code: 400,
            description: "Bad Request: message is not modified".into(),
        };
        assert!(not_modified.is_not_modified());

        let missing: PortError = TelegramError::Api {
            code: 400,
            description: "Bad Request: chat not found".into(),
        }
        .into();
        assert!(matches!(missing, PortError::NotFound(_)));

        let blocked: PortError = TelegramError::Api {
            code: 403,
            description: "Forbidden: bot was blocked by the user".into(),
        }
        .into();
        assert!(matches!(blocked, PortError::InvalidInput(_)));
    }
}
