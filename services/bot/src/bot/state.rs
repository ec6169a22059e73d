//! services/bot/src/bot/state.rs
//!
//! Defines the application's shared state and the per-user session state.

use moka::future::Cache;
use prezentor_core::domain::{MessageId, TemplateId, UserId};
use prezentor_core::ports::{LedgerService, MessagingService, UserRepository};
use prezentor_core::{ContentGenerator, DocumentAssembler, PresentationData};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

use crate::config::Config;

/// How long a user must wait between two generic error notices.
const ERROR_NOTICE_WINDOW: Duration = Duration::from_secs(60);
const MAX_SESSIONS: u64 = 100_000;

//=========================================================================================
// AppState (Shared Across All Users)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub ledger: Arc<dyn LedgerService>,
    pub messaging: Arc<dyn MessagingService>,
    pub generator: Arc<ContentGenerator>,
    pub assembler: Arc<DocumentAssembler>,
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub throttle: ErrorThrottle,
    /// Tracks mailbox workers and generation jobs so shutdown can wait for them.
    pub tracker: TaskTracker,
    pub bot_username: String,
}

impl AppState {
    pub fn new(
        users: Arc<dyn UserRepository>,
        ledger: Arc<dyn LedgerService>,
        messaging: Arc<dyn MessagingService>,
        generator: Arc<ContentGenerator>,
        assembler: Arc<DocumentAssembler>,
        config: Arc<Config>,
        bot_username: String,
    ) -> Self {
        Self {
            sessions: SessionStore::new(config.session_ttl),
            throttle: ErrorThrottle::new(ERROR_NOTICE_WINDOW),
            tracker: TaskTracker::new(),
            users,
            ledger,
            messaging,
            generator,
            assembler,
            config,
            bot_username,
        }
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        user.as_str() == self.config.admin_id.to_string()
    }
}

//=========================================================================================
// Session Stages
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registering {
    FirstName { referrer: Option<String> },
    LastName { referrer: Option<String>, first_name: String },
    Phone { referrer: Option<String>, first_name: String, last_name: String },
    /// The durable record exists; only the student flag is missing.
    Student,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drafting {
    Author,
    Institution { author_name: String },
    Topic { author_name: String, institution: String },
}

/// The preview photo currently shown while a template is being chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preview {
    pub index: usize,
    pub message: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminStep {
    TopUpTarget,
    TopUpAmount { target: UserId },
    HistoryTarget,
    BroadcastText,
    DirectTarget,
    DirectText { target: UserId },
}

/// Where a user is in the conversation. Each variant carries exactly the data
/// collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Idle,
    Registering(Registering),
    Drafting(Drafting),
    SelectingTemplate { draft: PresentationData, preview: Option<Preview> },
    Confirming { draft: PresentationData, template: TemplateId },
    /// A paid job is running. Input is answered with a "please wait" notice.
    Generating { template: TemplateId },
    AwaitingPaymentProof,
    Admin(AdminStep),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Registering(_) => "registering",
            Stage::Drafting(_) => "drafting",
            Stage::SelectingTemplate { .. } => "selecting_template",
            Stage::Confirming { .. } => "confirming",
            Stage::Generating { .. } => "generating",
            Stage::AwaitingPaymentProof => "awaiting_payment_proof",
            Stage::Admin(_) => "admin",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub stage: Stage,
    /// One-time skip of the subscription check, granted when registration completes.
    pub gate_exempt: bool,
}

//=========================================================================================
// Session Store
//=========================================================================================

/// In-memory sessions that expire after a period without interaction.
#[derive(Clone)]
pub struct SessionStore {
    cache: Cache<UserId, Arc<Mutex<Session>>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().max_capacity(MAX_SESSIONS).time_to_idle(ttl).build(),
        }
    }

    /// Returns the user's session, creating an idle one if there is none.
    pub async fn get(&self, user: &UserId) -> Arc<Mutex<Session>> {
        self.cache
            .get_with(user.clone(), async { Arc::new(Mutex::new(Session::default())) })
            .await
    }

    /// The current stage without creating a session.
    pub async fn stage(&self, user: &UserId) -> Stage {
        match self.cache.get(user).await {
            Some(session) => session.lock().await.stage.clone(),
            None => Stage::Idle,
        }
    }

    /// Puts a user back to `Idle` if, and only if, they are still generating.
    pub async fn finish_generation(&self, user: &UserId) {
        if let Some(session) = self.cache.get(user).await {
            let mut session = session.lock().await;
            if matches!(session.stage, Stage::Generating { .. }) {
                session.stage = Stage::Idle;
            }
        }
    }
}

/// Remembers who was recently sent a generic error notice.
#[derive(Clone)]
pub struct ErrorThrottle {
    recent: Cache<UserId, ()>,
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            recent: Cache::builder().max_capacity(MAX_SESSIONS).time_to_live(window).build(),
        }
    }

    /// True at most once per window for the same user.
    pub async fn should_notify(&self, user: &UserId) -> bool {
        self.recent.entry(user.clone()).or_insert(()).await.is_fresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_created_idle_and_shared() {
        let store = SessionStore::new(Duration::from_secs(60));
        let user = UserId::new("1");
        assert_eq!(store.stage(&user).await, Stage::Idle);

        store.get(&user).await.lock().await.stage = Stage::Generating { template: TemplateId(2) };
        assert_eq!(store.stage(&user).await, Stage::Generating { template: TemplateId(2) });

        store.finish_generation(&user).await;
        assert_eq!(store.stage(&user).await, Stage::Idle);
    }

    #[tokio::test]
    async fn finishing_does_not_clobber_a_newer_stage() {
        let store = SessionStore::new(Duration::from_secs(60));
        let user = UserId::new("1");
        store.get(&user).await.lock().await.stage = Stage::AwaitingPaymentProof;
        store.finish_generation(&user).await;
        assert_eq!(store.stage(&user).await, Stage::AwaitingPaymentProof);
    }

    #[tokio::test]
    async fn throttle_allows_one_notice_per_window() {
        let throttle = ErrorThrottle::new(Duration::from_secs(60));
        let user = UserId::new("7");
        assert!(throttle.should_notify(&user).await);
        assert!(!throttle.should_notify(&user).await);
        assert!(throttle.should_notify(&UserId::new("8")).await);
    }
}
