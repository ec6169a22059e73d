//! services/bot/src/bot/admin.rs
//!
//! The operator's sub-flows: user list, balance top-up, history lookup,
//! statistics, broadcast and direct messages. Callers have already checked
//! that the sender is the operator.

use prezentor_core::domain::{ChatId, EntryKind, Keyboard, UserId};
use tracing::{info, warn};

use crate::bot::protocol::Intent;
use crate::bot::state::{AdminStep, AppState, Session, Stage};
use crate::bot::texts;
use crate::error::BotError;

/// Handles one of the admin menu labels.
pub async fn handle_intent(
    state: &AppState,
    session: &mut Session,
    admin: &UserId,
    intent: &Intent,
) -> Result<(), BotError> {
    let chat = ChatId::from(admin);
    let messaging = &state.messaging;
    session.stage = Stage::Idle;

    match intent {
        Intent::AdminUsers => {
            let users = state.users.list_users().await?;
            if users.is_empty() {
                messaging.send_text(&chat, texts::NO_USERS, Keyboard::None).await?;
            } else {
                send_long(state, &chat, &texts::user_list(&users)).await?;
            }
        }
        Intent::AdminTopUp => {
            session.stage = Stage::Admin(AdminStep::TopUpTarget);
            messaging.send_text(&chat, texts::ASK_USER_ID, texts::back_only()).await?;
        }
        Intent::AdminHistory => {
            session.stage = Stage::Admin(AdminStep::HistoryTarget);
            messaging.send_text(&chat, texts::ASK_USER_ID, texts::back_only()).await?;
        }
        Intent::AdminStats => {
            let stats = state.users.stats().await?;
            messaging.send_text(&chat, &texts::stats(&stats), Keyboard::None).await?;
        }
        Intent::AdminBroadcast => {
            session.stage = Stage::Admin(AdminStep::BroadcastText);
            messaging.send_text(&chat, texts::ASK_BROADCAST, texts::back_only()).await?;
        }
        Intent::AdminDirect => {
            session.stage = Stage::Admin(AdminStep::DirectTarget);
            messaging.send_text(&chat, texts::ASK_USER_ID, texts::back_only()).await?;
        }
        _ => {
            messaging.send_text(&chat, texts::ADMIN_MENU, texts::admin_menu()).await?;
        }
    }
    Ok(())
}

/// Handles free text while the operator is inside a sub-flow.
pub async fn handle_input(
    state: &AppState,
    session: &mut Session,
    admin: &UserId,
    step: AdminStep,
    text: &str,
) -> Result<(), BotError> {
    let chat = ChatId::from(admin);
    let messaging = &state.messaging;
    let text = text.trim();

    match step {
        AdminStep::TopUpTarget => {
            let Some(target) = existing_user(state, text).await? else {
                messaging.send_text(&chat, texts::USER_NOT_FOUND, Keyboard::None).await?;
                return Ok(());
            };
            session.stage = Stage::Admin(AdminStep::TopUpAmount { target });
            messaging.send_text(&chat, texts::ASK_AMOUNT, Keyboard::None).await?;
        }
        AdminStep::TopUpAmount { target } => {
            let amount = match text.parse::<i64>() {
                Ok(amount) if amount > 0 => amount,
                _ => {
                    messaging.send_text(&chat, texts::INVALID_AMOUNT, Keyboard::None).await?;
                    return Ok(());
                }
            };
            let balance = state.ledger.credit(&target, amount, EntryKind::AdminTopUp, false).await?;
            session.stage = Stage::Idle;
            info!(%target, amount, balance, "Operator top-up");

            let notice = texts::top_up_notice(amount, balance);
            let report = match messaging.send_text(&ChatId::from(&target), &notice, Keyboard::None).await {
                Ok(_) => texts::top_up_done(target.as_str(), amount),
                Err(e) => {
                    warn!(%target, "Could not notify about the top-up: {}", e);
                    texts::top_up_undelivered(target.as_str(), amount)
                }
            };
            messaging.send_text(&chat, &report, texts::admin_menu()).await?;
        }
        AdminStep::HistoryTarget => {
            let Some(target) = existing_user(state, text).await? else {
                messaging.send_text(&chat, texts::USER_NOT_FOUND, Keyboard::None).await?;
                return Ok(());
            };
            session.stage = Stage::Idle;
            let entries = state.ledger.history(&target).await?;
            if entries.is_empty() {
                messaging.send_text(&chat, texts::NO_HISTORY, texts::admin_menu()).await?;
            } else {
                send_long(state, &chat, &texts::history(target.as_str(), &entries)).await?;
            }
        }
        AdminStep::BroadcastText => {
            if text.is_empty() {
                messaging.send_text(&chat, texts::EMPTY_MESSAGE, Keyboard::None).await?;
                return Ok(());
            }
            session.stage = Stage::Idle;
            let users = state.users.list_users().await?;
            let (mut sent, mut failed) = (0, 0);
            for user in users.iter().filter(|u| &u.id != admin) {
                match messaging.send_text(&ChatId::from(&user.id), text, Keyboard::None).await {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        warn!(user = %user.id, "Broadcast message not delivered: {}", e);
                        failed += 1;
                    }
                }
            }
            info!(sent, failed, "Broadcast finished");
            messaging.send_text(&chat, &texts::broadcast_report(sent, failed), texts::admin_menu()).await?;
        }
        AdminStep::DirectTarget => {
            let Some(target) = existing_user(state, text).await? else {
                messaging.send_text(&chat, texts::USER_NOT_FOUND, Keyboard::None).await?;
                return Ok(());
            };
            session.stage = Stage::Admin(AdminStep::DirectText { target });
            messaging.send_text(&chat, texts::ASK_DIRECT, Keyboard::None).await?;
        }
        AdminStep::DirectText { target } => {
            if text.is_empty() {
                messaging.send_text(&chat, texts::EMPTY_MESSAGE, Keyboard::None).await?;
                return Ok(());
            }
            session.stage = Stage::Idle;
            let delivered = match messaging.send_text(&ChatId::from(&target), text, Keyboard::None).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(%target, "Direct message not delivered: {}", e);
                    false
                }
            };
            messaging
                .send_text(&chat, &texts::direct_report(target.as_str(), delivered), texts::admin_menu())
                .await?;
        }
    }
    Ok(())
}

async fn existing_user(state: &AppState, raw: &str) -> Result<Option<UserId>, BotError> {
    let id = UserId::new(raw);
    Ok(state.users.find_user(&id).await?.map(|user| user.id))
}

async fn send_long(state: &AppState, chat: &ChatId, text: &str) -> Result<(), BotError> {
    for part in texts::split_long(text, texts::MAX_MESSAGE_CHARS) {
        state.messaging.send_text(chat, &part, Keyboard::None).await?;
    }
    Ok(())
}
