#![allow(dead_code)] // Each test binary uses a different subset of the harness.

//! Shared fixtures for the conversation tests: a recording messaging fake, a
//! scripted text provider, a renderer that writes a placeholder file, and an
//! `AppState` wired over the in-memory store.

use async_trait::async_trait;
use prezentor_bot::bot::controller;
use prezentor_bot::bot::protocol::{CallbackAction, EventKind, InboundEvent, Intent};
use prezentor_bot::bot::state::Stage;
use prezentor_bot::bot::AppState;
use prezentor_bot::config::Config;
use prezentor_core::catalog;
use prezentor_core::domain::{ChatId, Keyboard, MessageId, NewUser, PhotoSource, SlideDeck, UserId};
use prezentor_core::memory::InMemoryStore;
use prezentor_core::ports::{
    DocumentRenderer, LedgerService, MessagingService, PortError, PortResult, ProviderError,
    TextGenerationService, UserRepository,
};
use prezentor_core::{ContentGenerator, DocumentAssembler, RetryPolicy};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ADMIN: i64 = 1;
pub const CHANNEL: &str = "@kanal";
pub const ARCHIVE: &str = "@arxiv";

//=========================================================================================
// Messaging
//=========================================================================================

/// One outbound call, as the fake saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text { chat: String, text: String, keyboard: Keyboard },
    Edit { chat: String, message: i64, text: String },
    Delete { chat: String, message: i64 },
    /// `existed` records whether the file was on disk when it was sent.
    Document { chat: String, file_name: String, caption: Option<String>, existed: bool },
    Photo { chat: String, caption: String, keyboard: Keyboard },
    EditPhoto { chat: String, message: i64, caption: String },
    Ack(String),
}

#[derive(Default)]
pub struct FakeMessaging {
    log: Mutex<Vec<Outbound>>,
    not_members: Mutex<HashSet<String>>,
    failing_documents: AtomicU32,
    fail_photo_edits: AtomicBool,
    panic_once_on: Mutex<Option<String>>,
}

impl FakeMessaging {
    pub fn outbound(&self) -> Vec<Outbound> {
        self.log.lock().unwrap().clone()
    }

    /// Texts sent to one chat, in order.
    pub fn texts_to(&self, chat: i64) -> Vec<String> {
        let chat = chat.to_string();
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Text { chat: c, text, .. } if c == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_text_to(&self, chat: i64) -> String {
        self.texts_to(chat).pop().unwrap_or_default()
    }

    pub fn documents_to(&self, chat: &str) -> Vec<Outbound> {
        self.outbound()
            .into_iter()
            .filter(|o| matches!(o, Outbound::Document { chat: c, .. } if c == chat))
            .collect()
    }

    pub fn photos_to(&self, chat: i64) -> Vec<Outbound> {
        let chat = chat.to_string();
        self.outbound()
            .into_iter()
            .filter(|o| match o {
                Outbound::Photo { chat: c, .. } | Outbound::EditPhoto { chat: c, .. } => *c == chat,
                _ => false,
            })
            .collect()
    }

    pub fn set_member(&self, user: i64, member: bool) {
        let mut not_members = self.not_members.lock().unwrap();
        if member {
            not_members.remove(&user.to_string());
        } else {
            not_members.insert(user.to_string());
        }
    }

    /// The next `count` document uploads fail.
    pub fn fail_documents(&self, count: u32) {
        self.failing_documents.store(count, Ordering::SeqCst);
    }

    pub fn fail_photo_edits(&self) {
        self.fail_photo_edits.store(true, Ordering::SeqCst);
    }

    /// The next attempt to send exactly this text panics instead.
    pub fn panic_once_on(&self, text: &str) {
        *self.panic_once_on.lock().unwrap() = Some(text.to_string());
    }

    /// Message ids are positions in the log, starting at 1.
    fn record(&self, entry: Outbound) -> MessageId {
        let mut log = self.log.lock().unwrap();
        log.push(entry);
        MessageId(log.len() as i64)
    }
}

#[async_trait]
impl MessagingService for FakeMessaging {
    async fn send_text(&self, chat: &ChatId, text: &str, keyboard: Keyboard) -> PortResult<MessageId> {
        let armed = {
            let mut trigger = self.panic_once_on.lock().unwrap();
            if trigger.as_deref() == Some(text) {
                trigger.take().is_some()
            } else {
                false
            }
        };
        if armed {
            panic!("messaging exploded on {:?}", text);
        }
        Ok(self.record(Outbound::Text {
            chat: chat.0.clone(),
            text: text.to_string(),
            keyboard,
        }))
    }

    async fn edit_text(&self, chat: &ChatId, message: MessageId, text: &str) -> PortResult<()> {
        self.record(Outbound::Edit {
            chat: chat.0.clone(),
            message: message.0,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat: &ChatId, message: MessageId) -> PortResult<()> {
        self.record(Outbound::Delete {
            chat: chat.0.clone(),
            message: message.0,
        });
        Ok(())
    }

    async fn send_document(
        &self,
        chat: &ChatId,
        path: &Path,
        file_name: &str,
        caption: Option<&str>,
    ) -> PortResult<MessageId> {
        let failing = self
            .failing_documents
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PortError::Unexpected("upload rejected".to_string()));
        }
        Ok(self.record(Outbound::Document {
            chat: chat.0.clone(),
            file_name: file_name.to_string(),
            caption: caption.map(str::to_string),
            existed: path.exists(),
        }))
    }

    async fn send_photo(
        &self,
        chat: &ChatId,
        _photo: &PhotoSource,
        caption: &str,
        keyboard: Keyboard,
    ) -> PortResult<MessageId> {
        Ok(self.record(Outbound::Photo {
            chat: chat.0.clone(),
            caption: caption.to_string(),
            keyboard,
        }))
    }

    async fn edit_photo(
        &self,
        chat: &ChatId,
        message: MessageId,
        _photo: &PhotoSource,
        caption: &str,
        _keyboard: Keyboard,
    ) -> PortResult<()> {
        if self.fail_photo_edits.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("message to edit not found".to_string()));
        }
        self.record(Outbound::EditPhoto {
            chat: chat.0.clone(),
            message: message.0,
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn is_member(&self, _channel: &str, user: &UserId) -> PortResult<bool> {
        Ok(!self.not_members.lock().unwrap().contains(user.as_str()))
    }

    async fn acknowledge(&self, callback_id: &str) -> PortResult<()> {
        self.record(Outbound::Ack(callback_id.to_string()));
        Ok(())
    }
}

//=========================================================================================
// Text Provider and Renderer
//=========================================================================================

/// Answers each prompt in the shape it asks for.
#[derive(Default)]
pub struct ScriptedProvider {
    pub calls: AtomicU32,
    terminal: AtomicBool,
}

impl ScriptedProvider {
    /// Every later call fails the way a revoked API key does.
    pub fn fail_terminally(&self) {
        self.terminal.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextGenerationService for ScriptedProvider {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.terminal.load(Ordering::SeqCst) {
            Err(ProviderError::Terminal("API key not valid".to_string()))
        } else if prompt.contains("10 ta reja") {
            Ok((1..=10).map(|i| format!("{}. Bo'lim {}", i, i)).collect::<Vec<_>>().join("$"))
        } else if prompt.contains("3 ta ALOHIDA") {
            Ok("Birinchi blok matni.$Ikkinchi blok matni.$Uchinchi blok matni.".to_string())
        } else {
            Ok("Bu bo'lim uchun yetarlicha uzun va mazmunli sinov matni.".to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Ok,
    Fail,
    Panic,
}

pub struct FakeRenderer {
    mode: RenderMode,
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, _deck: &SlideDeck, destination: &Path) -> PortResult<()> {
        match self.mode {
            RenderMode::Ok => tokio::fs::write(destination, b"pptx")
                .await
                .map_err(|e| PortError::Unexpected(e.to_string())),
            RenderMode::Fail => Err(PortError::Unexpected("disk full".to_string())),
            RenderMode::Panic => panic!("renderer exploded"),
        }
    }

    fn extension(&self) -> &'static str {
        "pptx"
    }
}

//=========================================================================================
// Harness
//=========================================================================================

#[derive(Default)]
pub struct Options {
    pub render: RenderMode,
    /// Extra or overriding configuration values.
    pub vars: Vec<(&'static str, String)>,
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub messaging: Arc<FakeMessaging>,
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub assets: tempfile::TempDir,
    pub output: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Options::default())
    }

    pub fn with(options: Options) -> Self {
        let assets = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        for variant in catalog::catalog() {
            for path in variant.backgrounds(assets.path()) {
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, b"png").unwrap();
            }
        }

        let mut vars: HashMap<&str, String> = HashMap::from([
            ("BOT_TOKEN", "test-token".to_string()),
            ("DATABASE_URL", "postgres://unused".to_string()),
            ("ADMIN_ID", ADMIN.to_string()),
            ("CHANNELS", CHANNEL.to_string()),
            ("ARCHIVE_CHANNELS", ARCHIVE.to_string()),
            ("GEMINI_API_KEY", "test-key".to_string()),
            ("RETRY_DELAY_MS", "0".to_string()),
            ("GUIDE_URL", "https://example.org/guide".to_string()),
            ("ASSETS_DIR", assets.path().display().to_string()),
            ("OUTPUT_DIR", output.path().display().to_string()),
        ]);
        vars.extend(options.vars);
        let config = Arc::new(Config::from_lookup(|key| vars.get(key).cloned()).unwrap());

        let store = Arc::new(InMemoryStore::new());
        let messaging = Arc::new(FakeMessaging::default());
        let provider = Arc::new(ScriptedProvider::default());
        let generator = Arc::new(ContentGenerator::new(
            provider.clone(),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::ZERO,
            },
        ));
        let assembler = Arc::new(DocumentAssembler::new(
            Arc::new(FakeRenderer { mode: options.render }),
            config.assets_dir.clone(),
            config.output_dir.clone(),
            config.outline_attempts,
        ));
        let state = Arc::new(AppState::new(
            store.clone(),
            store.clone(),
            messaging.clone(),
            generator,
            assembler,
            config,
            "prezentor_bot".to_string(),
        ));

        Self {
            state,
            messaging,
            store,
            provider,
            assets,
            output,
        }
    }

    pub async fn send(&self, user: i64, kind: EventKind) {
        controller::handle(&self.state, InboundEvent::new(UserId::from(user), kind)).await;
    }

    /// Sends what a user would type or what a menu button would produce.
    pub async fn type_text(&self, user: i64, text: &str) {
        self.send(user, EventKind::Text(Intent::resolve(text))).await;
    }

    pub async fn press(&self, user: i64, action: CallbackAction) {
        self.send(
            user,
            EventKind::Callback {
                id: format!("cb-{}", user),
                action,
                message: None,
            },
        )
        .await;
    }

    pub async fn share_own_contact(&self, user: i64) {
        self.send(
            user,
            EventKind::Contact {
                phone: format!("+99890{:07}", user),
                owner: Some(UserId::from(user)),
            },
        )
        .await;
    }

    /// Creates a registered user directly in the store.
    pub async fn seed_user(&self, user: i64, balance: i64) {
        self.store
            .register_user(
                NewUser {
                    id: UserId::from(user),
                    first_name: "Ali".to_string(),
                    last_name: "Valiyev".to_string(),
                    phone: "+998901234567".to_string(),
                    referred_by: None,
                },
                balance,
            )
            .await
            .unwrap();
    }

    pub async fn stage(&self, user: i64) -> Stage {
        self.state.sessions.stage(&UserId::from(user)).await
    }

    pub async fn set_stage(&self, user: i64, stage: Stage) {
        self.state.sessions.get(&UserId::from(user)).await.lock().await.stage = stage;
    }

    pub async fn balance(&self, user: i64) -> i64 {
        self.store.get_balance(&UserId::from(user)).await.unwrap()
    }

    /// Fills in author, institution and topic, leaving the user at the template picker.
    pub async fn draft(&self, user: i64) {
        self.type_text(user, prezentor_bot::bot::texts::labels::PRESENTATION).await;
        self.type_text(user, "Ali Valiyev").await;
        self.type_text(user, "TATU").await;
        self.type_text(user, "Sun'iy intellekt").await;
    }

    /// Waits for every background job to finish.
    pub async fn settle(&self) {
        self.state.tracker.close();
        self.state.tracker.wait().await;
    }

    /// Deletes one slide background of a template from the asset tree.
    pub fn remove_background(&self, template: u8, slide: usize) {
        let variant = catalog::find(prezentor_core::domain::TemplateId(template)).unwrap();
        std::fs::remove_file(&variant.backgrounds(self.assets.path())[slide - 1]).unwrap();
    }

    pub fn output_is_empty(&self) -> bool {
        std::fs::read_dir(self.output.path()).map(|mut d| d.next().is_none()).unwrap_or(true)
    }
}
