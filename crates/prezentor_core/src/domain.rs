//! crates/prezentor_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database, transport or file format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

//=========================================================================================
// Identity
//=========================================================================================

/// Opaque, stable identifier of a user (the transport's user id in decimal form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for UserId {
    fn from(raw: i64) -> Self {
        Self(raw.to_string())
    }
}

/// Identifier of an entry in the template catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub u8);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//=========================================================================================
// Users and their ledger
//=========================================================================================

/// A registered user, as stored durably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub is_student: bool,
    pub balance: i64,
    pub referred_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// The profile collected during registration, before the record exists.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub referred_by: Option<UserId>,
}

/// Why a balance entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    SignupBonus,
    ReferralBonus,
    AdminTopUp,
    Purchase,
    Refund,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::SignupBonus => "signup_bonus",
            EntryKind::ReferralBonus => "referral_bonus",
            EntryKind::AdminTopUp => "admin_top_up",
            EntryKind::Purchase => "purchase",
            EntryKind::Refund => "refund",
        }
    }

    /// Whether entries of this kind add to the balance.
    pub fn is_credit(&self) -> bool {
        !matches!(self, EntryKind::Purchase)
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup_bonus" => Ok(EntryKind::SignupBonus),
            "referral_bonus" => Ok(EntryKind::ReferralBonus),
            "admin_top_up" => Ok(EntryKind::AdminTopUp),
            "purchase" => Ok(EntryKind::Purchase),
            "refund" => Ok(EntryKind::Refund),
            other => Err(format!("unknown balance entry kind '{}'", other)),
        }
    }
}

/// One append-only line of a user's balance history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEntry {
    /// Positive for credits, negative for debits.
    pub amount: i64,
    pub kind: EntryKind,
    pub is_bonus: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of an atomic check-and-decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { balance: i64 },
    InsufficientFunds { balance: i64 },
}

/// Audit record of a delivered presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationRecord {
    pub author_name: String,
    pub topic: String,
    pub file_name: String,
    pub template_id: TemplateId,
    pub created_at: DateTime<Utc>,
}

/// Aggregates shown to the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total_users: i64,
    pub total_balance: i64,
    pub students: i64,
    pub presentations: i64,
}

//=========================================================================================
// Messaging
//=========================================================================================

/// Destination of an outbound message: a user's private chat or a channel (`@name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatId(pub String);

impl From<&UserId> for ChatId {
    fn from(user: &UserId) -> Self {
        ChatId(user.as_str().to_string())
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyButton {
    pub text: String,
    pub request_contact: bool,
}

impl ReplyButton {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_contact: false,
        }
    }

    pub fn contact(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_contact: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineAction {
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub action: InlineAction,
}

impl InlineButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: InlineAction::Callback(data.into()),
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: InlineAction::Url(url.into()),
        }
    }
}

/// Keyboard attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Keyboard {
    #[default]
    None,
    Reply {
        rows: Vec<Vec<ReplyButton>>,
        one_time: bool,
    },
    Inline(Vec<Vec<InlineButton>>),
    Remove,
}

/// Where a photo comes from: a local file or a file already held by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoSource {
    File(PathBuf),
    Remote(String),
}

//=========================================================================================
// Document model
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
    Justify,
}

/// A positioned run of text on a slide. Geometry is in inches.
#[derive(Debug, Clone, PartialEq)]
pub struct TextElement {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub font_size: u16,
    pub font_face: String,
    /// Hex RGB without the leading `#`.
    pub color: String,
    pub bold: bool,
    pub align: Align,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slide {
    pub background: PathBuf,
    pub elements: Vec<TextElement>,
}

/// A fully resolved document, ready to be handed to a renderer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlideDeck {
    pub slides: Vec<Slide>,
}

/// A rendered document on disk plus the name shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
}
