//! services/bot/src/bot/generation.rs
//!
//! The paid part of the conversation: debit, a supervised background job that
//! assembles the presentation, delivery, and the refund when anything after the
//! debit fails.

use async_trait::async_trait;
use chrono::Utc;
use prezentor_core::catalog::TemplateVariant;
use prezentor_core::domain::{
    Artifact, ChatId, DebitOutcome, EntryKind, Keyboard, MessageId, PresentationRecord, UserId,
};
use prezentor_core::ports::{MessagingService, PortResult};
use prezentor_core::{PresentationData, ProgressSink};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bot::ledger::credit_durably;
use crate::bot::state::{AppState, Session, Stage};
use crate::bot::texts;
use crate::error::BotError;

const DELIVERY_ATTEMPTS: u32 = 3;

/// Everything the background job needs once the debit went through.
#[derive(Debug, Clone)]
struct Job {
    user: UserId,
    draft: PresentationData,
    variant: &'static TemplateVariant,
}

/// Debits the price and, on success, starts the generation job.
/// The session is `Generating` afterwards, or back to `Idle` on insufficient funds.
pub async fn begin(
    state: &Arc<AppState>,
    session: &mut Session,
    user: &UserId,
    draft: PresentationData,
    variant: &'static TemplateVariant,
) -> Result<(), BotError> {
    let chat = ChatId::from(user);
    match state.ledger.try_debit(user, variant.price, EntryKind::Purchase).await? {
        DebitOutcome::InsufficientFunds { balance } => {
            info!(%user, template = %variant.id, balance, price = variant.price, "Insufficient funds");
            session.stage = Stage::Idle;
            state
                .messaging
                .send_text(&chat, &texts::insufficient_funds(balance, variant.price), texts::balance_menu())
                .await?;
        }
        DebitOutcome::Debited { balance } => {
            info!(%user, template = %variant.id, balance, "Debited, starting generation");
            session.stage = Stage::Generating { template: variant.id };
            spawn_supervised(
                state.clone(),
                Job {
                    user: user.clone(),
                    draft,
                    variant,
                },
            );
        }
    }
    Ok(())
}

/// Runs the job on the tracker with a watcher that refunds and resets the
/// session if the job dies before it was settled.
fn spawn_supervised(state: Arc<AppState>, job: Job) {
    let settled = Arc::new(AtomicBool::new(false));
    let handle = state.tracker.spawn(run(state.clone(), job.clone(), settled.clone()));

    let tracker = state.tracker.clone();
    tracker.spawn(async move {
        let Err(e) = handle.await else {
            return;
        };
        error!(user = %job.user, template = %job.variant.id, "Generation job aborted: {}", e);
        if !settled.swap(true, Ordering::SeqCst) {
            refund(&state, &job).await;
            notify_failure(state.messaging.as_ref(), &job.user).await;
        }
        state.sessions.finish_generation(&job.user).await;
    });
}

/// `settled` is set once the job was either delivered or refunded, so the
/// watcher never pays back a second time.
async fn run(state: Arc<AppState>, job: Job, settled: Arc<AtomicBool>) {
    let chat = ChatId::from(&job.user);
    let progress_message = match state
        .messaging
        .send_text(&chat, &texts::progress(texts::GENERATION_STARTING, 0), Keyboard::Remove)
        .await
    {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(user = %job.user, "Could not send the progress message: {}", e);
            None
        }
    };
    let sink = ChatProgress {
        messaging: state.messaging.clone(),
        chat: chat.clone(),
        message: progress_message,
    };

    let outcome = state
        .assembler
        .assemble(job.variant, &job.draft, &state.generator, &sink, &job.user)
        .await;
    sink.clear().await;

    match outcome {
        Ok(artifact) => {
            let _guard = ArtifactGuard::new(artifact.path.clone());
            match deliver(&state, &chat, &artifact).await {
                Ok(()) => {
                    settled.store(true, Ordering::SeqCst);
                    info!(user = %job.user, file = %artifact.file_name, "Presentation delivered");
                    send_best_effort(state.messaging.as_ref(), &chat, texts::PRESENTATION_READY, texts::back_only()).await;
                    record(&state, &job, &artifact).await;
                    archive(&state, &job, &artifact).await;
                }
                Err(e) => {
                    error!(user = %job.user, "Delivery failed after {} attempts: {}", DELIVERY_ATTEMPTS, e);
                    settle_with_refund(&state, &job, &settled).await;
                }
            }
        }
        Err(e) => {
            error!(user = %job.user, template = %job.variant.id, "Assembly failed: {}", e);
            settle_with_refund(&state, &job, &settled).await;
        }
    }

    state.sessions.finish_generation(&job.user).await;
}

async fn deliver(state: &AppState, chat: &ChatId, artifact: &Artifact) -> PortResult<()> {
    let mut attempt = 1;
    loop {
        match state
            .messaging
            .send_document(chat, &artifact.path, &artifact.file_name, None)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if attempt >= DELIVERY_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(%chat, attempt, "Sending the document failed, retrying: {}", e);
                attempt += 1;
                if !state.config.retry_delay.is_zero() {
                    tokio::time::sleep(state.config.retry_delay).await;
                }
            }
        }
    }
}

async fn settle_with_refund(state: &AppState, job: &Job, settled: &AtomicBool) {
    if settled.swap(true, Ordering::SeqCst) {
        return;
    }
    refund(state, job).await;
    notify_failure(state.messaging.as_ref(), &job.user).await;
}

async fn refund(state: &AppState, job: &Job) {
    match credit_durably(state.ledger.as_ref(), &job.user, job.variant.price, EntryKind::Refund, false).await {
        Ok(balance) => info!(user = %job.user, amount = job.variant.price, balance, "Refunded"),
        Err(e) => error!(user = %job.user, amount = job.variant.price, "Refund failed: {}", e),
    }
}

async fn record(state: &AppState, job: &Job, artifact: &Artifact) {
    let record = PresentationRecord {
        author_name: job.draft.author_name.clone(),
        topic: job.draft.topic.clone(),
        file_name: artifact.file_name.clone(),
        template_id: job.variant.id,
        created_at: Utc::now(),
    };
    if let Err(e) = state.users.append_presentation(&job.user, record).await {
        error!(user = %job.user, "Could not record the presentation: {}", e);
    }
}

/// Copies the file to every archive channel. Failures are only logged.
async fn archive(state: &AppState, job: &Job, artifact: &Artifact) {
    let caption = texts::archive_caption(job.user.as_str(), &job.draft, job.variant);
    for channel in &state.config.archive_channels {
        let target = ChatId(channel.clone());
        if let Err(e) = state
            .messaging
            .send_document(&target, &artifact.path, &artifact.file_name, Some(&caption))
            .await
        {
            warn!(%channel, "Archive copy failed: {}", e);
        }
    }
}

async fn notify_failure(messaging: &dyn MessagingService, user: &UserId) {
    send_best_effort(messaging, &ChatId::from(user), texts::GENERATION_FAILED, texts::back_only()).await;
}

async fn send_best_effort(messaging: &dyn MessagingService, chat: &ChatId, text: &str, keyboard: Keyboard) {
    if let Err(e) = messaging.send_text(chat, text, keyboard).await {
        warn!(%chat, "Could not send message: {}", e);
    }
}

//=========================================================================================
// Progress Reporting
//=========================================================================================

/// Edits one progress message in place.
struct ChatProgress {
    messaging: Arc<dyn MessagingService>,
    chat: ChatId,
    message: Option<MessageId>,
}

impl ChatProgress {
    /// Removes the progress message.
    async fn clear(&self) {
        if let Some(message) = self.message {
            if let Err(e) = self.messaging.delete_message(&self.chat, message).await {
                warn!(chat = %self.chat, "Could not delete the progress message: {}", e);
            }
        }
    }
}

#[async_trait]
impl ProgressSink for ChatProgress {
    async fn report(&self, stage: &str, percent: u8) -> PortResult<()> {
        match self.message {
            Some(message) => {
                self.messaging
                    .edit_text(&self.chat, message, &texts::progress(stage, percent))
                    .await
            }
            None => Ok(()),
        }
    }

    async fn retrying(&self, step: &str, attempt: u32, max_attempts: u32, percent: u8) -> PortResult<()> {
        match self.message {
            Some(message) => {
                self.messaging
                    .edit_text(&self.chat, message, &texts::retrying(step, attempt, max_attempts, percent))
                    .await
            }
            None => Ok(()),
        }
    }
}

//=========================================================================================
// Artifact Cleanup
//=========================================================================================

/// Deletes the rendered file when dropped, whatever happened to it.
struct ArtifactGuard {
    path: PathBuf,
}

impl ArtifactGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Artifact removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Could not remove artifact: {}", e),
        }
    }
}
