//! services/bot/src/bot/referral.rs
//!
//! Rewards the inviting user when a newcomer registers through their link.
//! The credit is committed first and retried; the notification afterwards is
//! best-effort and never undoes the credit.

use prezentor_core::domain::{ChatId, EntryKind, Keyboard, UserId};
use tracing::{error, info, warn};

use crate::bot::ledger::credit_durably;
use crate::bot::state::AppState;
use crate::bot::texts;
use crate::error::BotError;

/// Turns a `/start` payload into a referrer, if it names an existing user
/// other than the newcomer.
pub async fn resolve_referrer(
    state: &AppState,
    payload: Option<&str>,
    newcomer: &UserId,
) -> Result<Option<UserId>, BotError> {
    let Some(raw) = payload.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    if raw.parse::<i64>().is_err() || raw == newcomer.as_str() {
        info!(%newcomer, payload = raw, "Ignoring referral payload");
        return Ok(None);
    }
    let referrer = UserId::new(raw);
    match state.users.find_user(&referrer).await? {
        Some(_) => Ok(Some(referrer)),
        None => {
            warn!(%newcomer, %referrer, "Referrer not found");
            Ok(None)
        }
    }
}

pub async fn reward_referrer(state: &AppState, referrer: &UserId, newcomer: &UserId) {
    let bonus = state.config.referral_bonus;
    match credit_durably(state.ledger.as_ref(), referrer, bonus, EntryKind::ReferralBonus, true).await {
        Ok(balance) => {
            info!(%referrer, %newcomer, bonus, balance, "Referral bonus credited");
        }
        Err(e) => {
            error!(%referrer, %newcomer, "Failed to credit the referral bonus: {}", e);
            return;
        }
    }

    let notice = texts::referral_reward(bonus);
    if let Err(e) = state.messaging.send_text(&ChatId::from(referrer), &notice, Keyboard::None).await {
        warn!(%referrer, "Could not notify the referrer: {}", e);
    }
}
