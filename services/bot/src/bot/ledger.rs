//! services/bot/src/bot/ledger.rs
//!
//! Credits that must not be lost: referral bonuses and refunds.

use prezentor_core::domain::{EntryKind, UserId};
use prezentor_core::ports::{LedgerService, PortError, PortResult};
use std::time::Duration;
use tracing::warn;

const CREDIT_ATTEMPTS: u32 = 3;
const CREDIT_DELAY: Duration = Duration::from_millis(500);

/// Applies a credit, retrying failures that might be transient.
/// `NotFound` and `InvalidInput` are returned at once.
pub async fn credit_durably(
    ledger: &dyn LedgerService,
    user: &UserId,
    amount: i64,
    kind: EntryKind,
    is_bonus: bool,
) -> PortResult<i64> {
    let mut attempt = 1;
    loop {
        match ledger.credit(user, amount, kind, is_bonus).await {
            Ok(balance) => return Ok(balance),
            Err(e @ (PortError::NotFound(_) | PortError::InvalidInput(_))) => return Err(e),
            Err(e) if attempt >= CREDIT_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(%user, amount, kind = kind.as_str(), attempt, "Credit failed, retrying: {}", e);
                attempt += 1;
                tokio::time::sleep(CREDIT_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prezentor_core::domain::{BalanceEntry, DebitOutcome};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` credits with an unexpected error.
    struct FlakyLedger {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LedgerService for FlakyLedger {
        async fn get_balance(&self, _id: &UserId) -> PortResult<i64> {
            Ok(0)
        }
        async fn try_debit(&self, _id: &UserId, _amount: i64, _kind: EntryKind) -> PortResult<DebitOutcome> {
            Ok(DebitOutcome::InsufficientFunds { balance: 0 })
        }
        async fn credit(&self, _id: &UserId, amount: i64, _kind: EntryKind, _is_bonus: bool) -> PortResult<i64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PortError::Unexpected("connection reset".into()))
            } else {
                Ok(amount)
            }
        }
        async fn history(&self, _id: &UserId) -> PortResult<Vec<BalanceEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let ledger = FlakyLedger { failures: 2, calls: AtomicU32::new(0) };
        let balance = credit_durably(&ledger, &UserId::new("1"), 1000, EntryKind::Refund, false).await;
        assert_eq!(balance.ok(), Some(1000));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let ledger = FlakyLedger { failures: 10, calls: AtomicU32::new(0) };
        let result = credit_durably(&ledger, &UserId::new("1"), 1000, EntryKind::Refund, false).await;
        assert!(result.is_err());
        assert_eq!(ledger.calls.load(Ordering::SeqCst), CREDIT_ATTEMPTS);
    }
}
