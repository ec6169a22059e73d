//! services/bot/src/bot/protocol.rs
//!
//! Defines the inbound half of the Telegram protocol: the `Update` JSON the
//! Bot API delivers (long polling and webhook share the same shape), and the
//! transport-independent `InboundEvent` the controller consumes.
//!
//! Menu labels and callback tokens are resolved here, once. The controller
//! never looks at display strings.

use prezentor_core::domain::{MessageId, TemplateId, UserId};
use serde::Deserialize;

use crate::bot::texts::labels;

//=========================================================================================
// Raw Bot API Types
//=========================================================================================
// Only the fields the bot reads are declared; serde skips the rest.
//=========================================================================================

#[derive(Deserialize, Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<TgUser>,
    pub chat: Chat,
    pub text: Option<String>,
    pub contact: Option<Contact>,
    pub photo: Option<Vec<PhotoSize>>,
    pub caption: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Contact {
    pub phone_number: String,
    pub user_id: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TgUser,
    pub message: Option<Message>,
    pub data: Option<String>,
}

//=========================================================================================
// Resolved Events
//=========================================================================================

/// What a text message means, resolved from the reply-keyboard labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    StartCreating,
    Presentation,
    IndependentWork,
    Essay,
    Guide,
    Templates,
    Balance,
    Referral,
    TopUp,
    SendReceipt,
    Back,
    AdminPanel,
    AdminUsers,
    AdminTopUp,
    AdminHistory,
    AdminStats,
    AdminBroadcast,
    AdminDirect,
    /// Anything that is not a menu label: names, topics, amounts.
    Free(String),
}

impl Intent {
    pub fn resolve(text: &str) -> Intent {
        match text.trim() {
            labels::START_CREATING => Intent::StartCreating,
            labels::PRESENTATION => Intent::Presentation,
            labels::INDEPENDENT_WORK => Intent::IndependentWork,
            labels::ESSAY => Intent::Essay,
            labels::GUIDE => Intent::Guide,
            labels::TEMPLATES => Intent::Templates,
            labels::BALANCE => Intent::Balance,
            labels::REFERRAL => Intent::Referral,
            labels::TOP_UP => Intent::TopUp,
            labels::SEND_RECEIPT => Intent::SendReceipt,
            labels::BACK => Intent::Back,
            labels::ADMIN_PANEL => Intent::AdminPanel,
            labels::ADMIN_USERS => Intent::AdminUsers,
            labels::ADMIN_TOP_UP => Intent::AdminTopUp,
            labels::ADMIN_HISTORY => Intent::AdminHistory,
            labels::ADMIN_STATS => Intent::AdminStats,
            labels::ADMIN_BROADCAST => Intent::AdminBroadcast,
            labels::ADMIN_DIRECT => Intent::AdminDirect,
            _ => Intent::Free(text.to_string()),
        }
    }

    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Intent::AdminPanel
                | Intent::AdminUsers
                | Intent::AdminTopUp
                | Intent::AdminHistory
                | Intent::AdminStats
                | Intent::AdminBroadcast
                | Intent::AdminDirect
        )
    }

    /// The raw text for stages that collect free input.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Intent::Free(text) => Some(text),
            _ => None,
        }
    }
}

/// Decoded `callback_data` of an inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Template(TemplateId),
    Preview(usize),
    Confirm(bool),
    Student(bool),
    Unknown(String),
}

impl CallbackAction {
    pub fn parse(data: &str) -> CallbackAction {
        let unknown = || CallbackAction::Unknown(data.to_string());
        let Some((prefix, value)) = data.split_once(':') else {
            return unknown();
        };
        match (prefix, value) {
            ("tpl", id) => id.parse::<u8>().map(|id| CallbackAction::Template(TemplateId(id))).unwrap_or_else(|_| unknown()),
            ("pv", index) => index.parse::<usize>().map(CallbackAction::Preview).unwrap_or_else(|_| unknown()),
            ("cf", "yes") => CallbackAction::Confirm(true),
            ("cf", "no") => CallbackAction::Confirm(false),
            ("st", "yes") => CallbackAction::Student(true),
            ("st", "no") => CallbackAction::Student(false),
            _ => unknown(),
        }
    }

    /// The token placed in `callback_data`.
    pub fn token(&self) -> String {
        match self {
            CallbackAction::Template(id) => format!("tpl:{}", id.0),
            CallbackAction::Preview(index) => format!("pv:{}", index),
            CallbackAction::Confirm(yes) => format!("cf:{}", if *yes { "yes" } else { "no" }),
            CallbackAction::Student(yes) => format!("st:{}", if *yes { "yes" } else { "no" }),
            CallbackAction::Unknown(raw) => raw.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Start { payload: Option<String> },
    Text(Intent),
    Contact { phone: String, owner: Option<UserId> },
    Photo { file_id: String, caption: Option<String> },
    Callback { id: String, action: CallbackAction, message: Option<MessageId> },
}

/// One inbound event from one user, ready for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user: UserId,
    pub username: Option<String>,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(user: UserId, kind: EventKind) -> Self {
        Self { user, username: None, kind }
    }
}

/// Converts a raw update into an event, or `None` for updates the bot ignores
/// (group chats, other bots, stickers and the like).
pub fn inbound_event(update: Update) -> Option<InboundEvent> {
    if let Some(query) = update.callback_query {
        if query.from.is_bot {
            return None;
        }
        let action = CallbackAction::parse(query.data.as_deref().unwrap_or_default());
        return Some(InboundEvent {
            user: UserId::from(query.from.id),
            username: query.from.username,
            kind: EventKind::Callback {
                id: query.id,
                action,
                message: query.message.map(|m| MessageId(m.message_id)),
            },
        });
    }

    let message = update.message?;
    let from = message.from?;
    if from.is_bot || message.chat.kind != "private" {
        return None;
    }

    let kind = if let Some(text) = message.text {
        match parse_start(&text) {
            Some(payload) => EventKind::Start { payload },
            None => EventKind::Text(Intent::resolve(&text)),
        }
    } else if let Some(contact) = message.contact {
        EventKind::Contact {
            phone: contact.phone_number,
            owner: contact.user_id.map(UserId::from),
        }
    } else if let Some(photo) = message.photo {
        // Sizes arrive smallest first.
        let largest = photo.into_iter().max_by_key(|p| p.width * p.height)?;
        EventKind::Photo {
            file_id: largest.file_id,
            caption: message.caption,
        }
    } else {
        return None;
    };

    Some(InboundEvent {
        user: UserId::from(from.id),
        username: from.username,
        kind,
    })
}

/// `/start`, `/start payload` and `/start@BotName payload`.
fn parse_start(text: &str) -> Option<Option<String>> {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let command = parts.next()?;
    let command = command.split('@').next().unwrap_or(command);
    if command != "/start" {
        return None;
    }
    let payload = parts.next().map(str::trim).filter(|p| !p.is_empty()).map(str::to_string);
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(value: serde_json::Value) -> Update {
        serde_json::from_value(value).expect("valid update")
    }

    fn private_message(extra: serde_json::Value) -> serde_json::Value {
        let mut message = json!({
            "message_id": 10,
            "from": { "id": 42, "is_bot": false, "first_name": "Ali", "username": "ali" },
            "chat": { "id": 42, "type": "private" },
            "date": 1700000000
        });
        if let (Some(target), Some(source)) = (message.as_object_mut(), extra.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
        json!({ "update_id": 1, "message": message })
    }

    #[test]
    fn start_with_referral_payload() {
        let event = inbound_event(update(private_message(json!({ "text": "/start 777" })))).expect("event");
        assert_eq!(event.user, UserId::new("42"));
        assert_eq!(event.kind, EventKind::Start { payload: Some("777".into()) });

        let bare = inbound_event(update(private_message(json!({ "text": "/start" })))).expect("event");
        assert_eq!(bare.kind, EventKind::Start { payload: None });
    }

    #[test]
    fn menu_labels_resolve_to_intents() {
        assert_eq!(Intent::resolve(labels::BALANCE), Intent::Balance);
        assert_eq!(Intent::resolve(labels::BACK), Intent::Back);
        assert_eq!(Intent::resolve("Sun'iy intellekt"), Intent::Free("Sun'iy intellekt".into()));
        assert!(Intent::resolve(labels::ADMIN_STATS).is_admin_only());
    }

    #[test]
    fn contact_and_largest_photo() {
        let contact = inbound_event(update(private_message(json!({
            "contact": { "phone_number": "+998901234567", "first_name": "Ali", "user_id": 42 }
        }))))
        .expect("event");
        assert_eq!(
            contact.kind,
            EventKind::Contact { phone: "+998901234567".into(), owner: Some(UserId::new("42")) }
        );

        let photo = inbound_event(update(private_message(json!({
            "photo": [
                { "file_id": "small", "file_unique_id": "a", "width": 90, "height": 90 },
                { "file_id": "large", "file_unique_id": "b", "width": 1280, "height": 960 }
            ],
            "caption": "chek"
        }))))
        .expect("event");
        assert_eq!(photo.kind, EventKind::Photo { file_id: "large".into(), caption: Some("chek".into()) });
    }

    #[test]
    fn callback_tokens_round_trip() {
        for action in [
            CallbackAction::Template(TemplateId(3)),
            CallbackAction::Preview(7),
            CallbackAction::Confirm(false),
            CallbackAction::Student(true),
        ] {
            assert_eq!(CallbackAction::parse(&action.token()), action);
        }
        assert_eq!(CallbackAction::parse("tpl:x"), CallbackAction::Unknown("tpl:x".into()));
    }

    #[test]
    fn group_chats_and_stickers_are_ignored() {
        let mut group = private_message(json!({ "text": "salom" }));
        group["message"]["chat"]["type"] = json!("group");
        assert!(inbound_event(update(group)).is_none());

        let sticker = private_message(json!({ "sticker": { "file_id": "s" } }));
        assert!(inbound_event(update(sticker)).is_none());
    }
}
