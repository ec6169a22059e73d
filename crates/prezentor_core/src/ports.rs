//! crates/prezentor_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the database, the text provider, the messaging transport
//! and the document format.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::{
    BalanceEntry, ChatId, DebitOutcome, EntryKind, Keyboard, MessageId, NewUser, PhotoSource,
    PresentationRecord, SlideDeck, User, UserId, UserStats,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Failure of a single call to the generative-text provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network trouble, timeouts, rate limits: worth another attempt.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Bad credentials, exhausted quota: retrying cannot help.
    #[error("terminal provider failure: {0}")]
    Terminal(String),
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user(&self, id: &UserId) -> PortResult<Option<User>>;

    /// Creates the user and credits the signup bonus in one transaction.
    /// Fails with `Conflict` if the id is already registered.
    async fn register_user(&self, new_user: NewUser, signup_bonus: i64) -> PortResult<User>;

    async fn set_student(&self, id: &UserId, is_student: bool) -> PortResult<()>;

    async fn append_presentation(&self, id: &UserId, record: PresentationRecord)
        -> PortResult<()>;

    async fn presentations(&self, id: &UserId) -> PortResult<Vec<PresentationRecord>>;

    async fn list_users(&self) -> PortResult<Vec<User>>;

    async fn stats(&self) -> PortResult<UserStats>;
}

/// Balance and audit trail. Every mutation appends exactly one history entry.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn get_balance(&self, id: &UserId) -> PortResult<i64>;

    /// Atomically checks `balance >= amount` and decrements. Safe under
    /// concurrent calls for the same user.
    async fn try_debit(&self, id: &UserId, amount: i64, kind: EntryKind)
        -> PortResult<DebitOutcome>;

    /// Returns the balance after the credit.
    async fn credit(&self, id: &UserId, amount: i64, kind: EntryKind, is_bonus: bool)
        -> PortResult<i64>;

    async fn history(&self, id: &UserId) -> PortResult<Vec<BalanceEntry>>;
}

#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Sends one instruction to the provider and returns its raw text.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Writes the deck to `destination`.
    async fn render(&self, deck: &SlideDeck, destination: &Path) -> PortResult<()>;

    /// File extension of the produced documents, without the dot.
    fn extension(&self) -> &'static str;
}

/// The outbound half of the messaging transport.
#[async_trait]
pub trait MessagingService: Send + Sync {
    async fn send_text(&self, chat: &ChatId, text: &str, keyboard: Keyboard)
        -> PortResult<MessageId>;

    async fn edit_text(&self, chat: &ChatId, message: MessageId, text: &str) -> PortResult<()>;

    async fn delete_message(&self, chat: &ChatId, message: MessageId) -> PortResult<()>;

    async fn send_document(
        &self,
        chat: &ChatId,
        path: &Path,
        file_name: &str,
        caption: Option<&str>,
    ) -> PortResult<MessageId>;

    async fn send_photo(
        &self,
        chat: &ChatId,
        photo: &PhotoSource,
        caption: &str,
        keyboard: Keyboard,
    ) -> PortResult<MessageId>;

    async fn edit_photo(
        &self,
        chat: &ChatId,
        message: MessageId,
        photo: &PhotoSource,
        caption: &str,
        keyboard: Keyboard,
    ) -> PortResult<()>;

    /// Whether `user` is currently a member of `channel`.
    async fn is_member(&self, channel: &str, user: &UserId) -> PortResult<bool>;

    async fn acknowledge(&self, callback_id: &str) -> PortResult<()>;
}
