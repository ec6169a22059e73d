//! crates/prezentor_core/src/memory.rs
//!
//! An in-process implementation of the storage ports. Every operation runs
//! inside one mutex-guarded critical section, which gives the same atomicity
//! the Postgres adapter gets from its transactions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::{
    BalanceEntry, DebitOutcome, EntryKind, NewUser, PresentationRecord, User, UserId, UserStats,
};
use crate::ports::{LedgerService, PortError, PortResult, UserRepository};

struct Account {
    user: User,
    history: Vec<BalanceEntry>,
    presentations: Vec<PresentationRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    accounts: Mutex<HashMap<UserId, Account>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, HashMap<UserId, Account>>> {
        self.accounts
            .lock()
            .map_err(|_| PortError::Unexpected("in-memory store lock poisoned".to_string()))
    }
}

fn not_found(id: &UserId) -> PortError {
    PortError::NotFound(format!("user {}", id))
}

fn check_amount(amount: i64) -> PortResult<()> {
    if amount <= 0 {
        return Err(PortError::InvalidInput(format!("amount must be positive, got {}", amount)));
    }
    Ok(())
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_user(&self, id: &UserId) -> PortResult<Option<User>> {
        Ok(self.lock()?.get(id).map(|account| account.user.clone()))
    }

    async fn register_user(&self, new_user: NewUser, signup_bonus: i64) -> PortResult<User> {
        check_amount(signup_bonus)?;
        let mut accounts = self.lock()?;
        if accounts.contains_key(&new_user.id) {
            return Err(PortError::Conflict(format!("user {} already registered", new_user.id)));
        }
        let now = Utc::now();
        let user = User {
            id: new_user.id.clone(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            phone: new_user.phone,
            is_student: false,
            balance: signup_bonus,
            referred_by: new_user.referred_by,
            created_at: now,
        };
        accounts.insert(
            new_user.id,
            Account {
                user: user.clone(),
                history: vec![BalanceEntry {
                    amount: signup_bonus,
                    kind: EntryKind::SignupBonus,
                    is_bonus: true,
                    created_at: now,
                }],
                presentations: Vec::new(),
            },
        );
        Ok(user)
    }

    async fn set_student(&self, id: &UserId, is_student: bool) -> PortResult<()> {
        let mut accounts = self.lock()?;
        let account = accounts.get_mut(id).ok_or_else(|| not_found(id))?;
        account.user.is_student = is_student;
        Ok(())
    }

    async fn append_presentation(&self, id: &UserId, record: PresentationRecord) -> PortResult<()> {
        let mut accounts = self.lock()?;
        let account = accounts.get_mut(id).ok_or_else(|| not_found(id))?;
        account.presentations.push(record);
        Ok(())
    }

    async fn presentations(&self, id: &UserId) -> PortResult<Vec<PresentationRecord>> {
        let accounts = self.lock()?;
        let account = accounts.get(id).ok_or_else(|| not_found(id))?;
        Ok(account.presentations.clone())
    }

    async fn list_users(&self) -> PortResult<Vec<User>> {
        let mut users: Vec<User> = self.lock()?.values().map(|a| a.user.clone()).collect();
        users.sort_by_key(|user| user.created_at);
        Ok(users)
    }

    async fn stats(&self) -> PortResult<UserStats> {
        let accounts = self.lock()?;
        Ok(accounts.values().fold(UserStats::default(), |mut stats, account| {
            stats.total_users += 1;
            stats.total_balance += account.user.balance;
            stats.students += i64::from(account.user.is_student);
            stats.presentations += account.presentations.len() as i64;
            stats
        }))
    }
}

#[async_trait]
impl LedgerService for InMemoryStore {
    async fn get_balance(&self, id: &UserId) -> PortResult<i64> {
        let accounts = self.lock()?;
        accounts.get(id).map(|a| a.user.balance).ok_or_else(|| not_found(id))
    }

    async fn try_debit(&self, id: &UserId, amount: i64, kind: EntryKind) -> PortResult<DebitOutcome> {
        check_amount(amount)?;
        let mut accounts = self.lock()?;
        let account = accounts.get_mut(id).ok_or_else(|| not_found(id))?;
        if account.user.balance < amount {
            return Ok(DebitOutcome::InsufficientFunds {
                balance: account.user.balance,
            });
        }
        account.user.balance -= amount;
        account.history.push(BalanceEntry {
            amount: -amount,
            kind,
            is_bonus: false,
            created_at: Utc::now(),
        });
        Ok(DebitOutcome::Debited {
            balance: account.user.balance,
        })
    }

    async fn credit(&self, id: &UserId, amount: i64, kind: EntryKind, is_bonus: bool) -> PortResult<i64> {
        check_amount(amount)?;
        let mut accounts = self.lock()?;
        let account = accounts.get_mut(id).ok_or_else(|| not_found(id))?;
        account.user.balance += amount;
        account.history.push(BalanceEntry {
            amount,
            kind,
            is_bonus,
            created_at: Utc::now(),
        });
        Ok(account.user.balance)
    }

    async fn history(&self, id: &UserId) -> PortResult<Vec<BalanceEntry>> {
        let accounts = self.lock()?;
        let account = accounts.get(id).ok_or_else(|| not_found(id))?;
        Ok(account.history.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_user(id: &str) -> NewUser {
        NewUser {
            id: UserId::new(id),
            first_name: "Ali".into(),
            last_name: "Valiyev".into(),
            phone: "+998901234567".into(),
            referred_by: None,
        }
    }

    async fn reconciled(store: &InMemoryStore, id: &UserId) -> bool {
        let balance = store.get_balance(id).await.unwrap();
        let history = store.history(id).await.unwrap();
        balance == history.iter().map(|e| e.amount).sum::<i64>()
    }

    #[tokio::test]
    async fn registration_credits_the_signup_bonus_once() {
        let store = InMemoryStore::new();
        let user = store.register_user(new_user("1"), 10_000).await.unwrap();

        assert_eq!(user.balance, 10_000);
        let history = store.history(&user.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, EntryKind::SignupBonus);
        assert!(history[0].is_bonus);

        let again = store.register_user(new_user("1"), 10_000).await;
        assert!(matches!(again, Err(PortError::Conflict(_))));
        assert_eq!(store.history(&user.id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_overdraw() {
        let store = Arc::new(InMemoryStore::new());
        let id = UserId::new("9");
        store.register_user(new_user("9"), 10_000).await.unwrap();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.try_debit(&id, 3_000, EntryKind::Purchase).await.unwrap() })
            })
            .collect();
        let outcomes = futures::future::join_all(tasks).await;

        let debited = outcomes
            .into_iter()
            .filter(|o| matches!(o.as_ref().unwrap(), DebitOutcome::Debited { .. }))
            .count();
        assert_eq!(debited, 3);
        assert_eq!(store.get_balance(&id).await.unwrap(), 1_000);
        assert!(reconciled(&store, &id).await);
    }

    #[tokio::test]
    async fn insufficient_funds_has_no_side_effect() {
        let store = InMemoryStore::new();
        let id = UserId::new("3");
        store.register_user(new_user("3"), 3_000).await.unwrap();

        let outcome = store.try_debit(&id, 6_000, EntryKind::Purchase).await.unwrap();

        assert_eq!(outcome, DebitOutcome::InsufficientFunds { balance: 3_000 });
        assert_eq!(store.history(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let store = InMemoryStore::new();
        let id = UserId::new("4");
        store.register_user(new_user("4"), 10_000).await.unwrap();

        assert!(matches!(store.credit(&id, 0, EntryKind::AdminTopUp, false).await, Err(PortError::InvalidInput(_))));
        assert!(matches!(store.try_debit(&id, -5, EntryKind::Purchase).await, Err(PortError::InvalidInput(_))));
        assert!(reconciled(&store, &id).await);
    }

    #[tokio::test]
    async fn mixed_mutations_keep_the_history_reconciled() {
        let store = InMemoryStore::new();
        let id = UserId::new("5");
        store.register_user(new_user("5"), 10_000).await.unwrap();

        store.try_debit(&id, 8_000, EntryKind::Purchase).await.unwrap();
        store.credit(&id, 8_000, EntryKind::Refund, false).await.unwrap();
        store.credit(&id, 1_000, EntryKind::ReferralBonus, true).await.unwrap();
        let refused = store.try_debit(&id, 12_000, EntryKind::Purchase).await.unwrap();

        assert_eq!(refused, DebitOutcome::InsufficientFunds { balance: 11_000 });
        assert_eq!(store.get_balance(&id).await.unwrap(), 11_000);
        assert_eq!(store.history(&id).await.unwrap().len(), 4);
        assert!(reconciled(&store, &id).await);
    }

    #[tokio::test]
    async fn stats_aggregate_every_account() {
        let store = InMemoryStore::new();
        store.register_user(new_user("1"), 10_000).await.unwrap();
        store.register_user(new_user("2"), 10_000).await.unwrap();
        store.set_student(&UserId::new("2"), true).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_balance, 20_000);
        assert_eq!(stats.students, 1);
        assert_eq!(stats.presentations, 0);
    }
}
