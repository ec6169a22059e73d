//! services/bot/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! `UserRepository` and `LedgerService` ports from the `core` crate. It handles
//! all interactions with the PostgreSQL database using `sqlx`.
//!
//! Every balance mutation runs in one transaction together with its history row,
//! and the debit is a single conditional `UPDATE`, so concurrent purchases and
//! operator top-ups for the same user cannot lose updates or overdraw.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prezentor_core::domain::{
    BalanceEntry, DebitOutcome, EntryKind, NewUser, PresentationRecord, TemplateId, User, UserId,
    UserStats,
};
use prezentor_core::ports::{LedgerService, PortError, PortResult, UserRepository};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct PgAdapter {
    pool: PgPool,
}

impl PgAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the embedded migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn check_amount(amount: i64) -> PortResult<()> {
    if amount <= 0 {
        return Err(PortError::InvalidInput(format!("amount must be positive, got {}", amount)));
    }
    Ok(())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: String,
    first_name: String,
    last_name: String,
    phone: String,
    is_student: bool,
    balance: i64,
    referred_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: UserId::new(self.id),
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            is_student: self.is_student,
            balance: self.balance,
            referred_by: self.referred_by.map(UserId::new),
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct BalanceEntryRecord {
    amount: i64,
    kind: String,
    is_bonus: bool,
    created_at: DateTime<Utc>,
}

impl BalanceEntryRecord {
    fn to_domain(self) -> PortResult<BalanceEntry> {
        Ok(BalanceEntry {
            amount: self.amount,
            kind: self.kind.parse().map_err(PortError::Unexpected)?,
            is_bonus: self.is_bonus,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct PresentationRecordRow {
    author_name: String,
    topic: String,
    file_name: String,
    template_id: i16,
    created_at: DateTime<Utc>,
}

impl PresentationRecordRow {
    fn to_domain(self) -> PresentationRecord {
        PresentationRecord {
            author_name: self.author_name,
            topic: self.topic,
            file_name: self.file_name,
            template_id: TemplateId(self.template_id as u8),
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct StatsRecord {
    total_users: i64,
    total_balance: i64,
    students: i64,
    presentations: i64,
}

const USER_COLUMNS: &str =
    "id, first_name, last_name, phone, is_student, balance, referred_by, created_at";

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    id: &UserId,
    amount: i64,
    kind: EntryKind,
    is_bonus: bool,
) -> PortResult<()> {
    sqlx::query("INSERT INTO balance_history (user_id, amount, kind, is_bonus) VALUES ($1, $2, $3, $4)")
        .bind(id.as_str())
        .bind(amount)
        .bind(kind.as_str())
        .bind(is_bonus)
        .execute(&mut **tx)
        .await
        .map_err(unexpected)?;
    Ok(())
}

//=========================================================================================
// `UserRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl UserRepository for PgAdapter {
    async fn find_user(&self, id: &UserId) -> PortResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.map(UserRecord::to_domain))
    }

    async fn register_user(&self, new_user: NewUser, signup_bonus: i64) -> PortResult<User> {
        check_amount(signup_bonus)?;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users (id, first_name, last_name, phone, balance, referred_by) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING RETURNING {}",
            USER_COLUMNS
        ))
        .bind(new_user.id.as_str())
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.phone)
        .bind(signup_bonus)
        .bind(new_user.referred_by.as_ref().map(UserId::as_str))
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::Conflict(format!("user {} already registered", new_user.id)))?;

        insert_history(&mut tx, &new_user.id, signup_bonus, EntryKind::SignupBonus, true).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn set_student(&self, id: &UserId, is_student: bool) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET is_student = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(is_student)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    async fn append_presentation(&self, id: &UserId, record: PresentationRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO presentations (user_id, author_name, topic, file_name, template_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id.as_str())
        .bind(&record.author_name)
        .bind(&record.topic)
        .bind(&record.file_name)
        .bind(i16::from(record.template_id.0))
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn presentations(&self, id: &UserId) -> PortResult<Vec<PresentationRecord>> {
        let rows = sqlx::query_as::<_, PresentationRecordRow>(
            "SELECT author_name, topic, file_name, template_id, created_at \
             FROM presentations WHERE user_id = $1 ORDER BY id",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(rows.into_iter().map(PresentationRecordRow::to_domain).collect())
    }

    async fn list_users(&self) -> PortResult<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users ORDER BY created_at",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(UserRecord::to_domain).collect())
    }

    async fn stats(&self) -> PortResult<UserStats> {
        let record = sqlx::query_as::<_, StatsRecord>(
            "SELECT \
               (SELECT COUNT(*) FROM users) AS total_users, \
               (SELECT COALESCE(SUM(balance), 0)::BIGINT FROM users) AS total_balance, \
               (SELECT COUNT(*) FROM users WHERE is_student) AS students, \
               (SELECT COUNT(*) FROM presentations) AS presentations",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(UserStats {
            total_users: record.total_users,
            total_balance: record.total_balance,
            students: record.students,
            presentations: record.presentations,
        })
    }
}

//=========================================================================================
// `LedgerService` Trait Implementation
//=========================================================================================

#[async_trait]
impl LedgerService for PgAdapter {
    async fn get_balance(&self, id: &UserId) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT balance FROM users WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("user {}", id)))
    }

    async fn try_debit(&self, id: &UserId, amount: i64, kind: EntryKind) -> PortResult<DebitOutcome> {
        check_amount(amount)?;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let debited = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET balance = balance - $2 WHERE id = $1 AND balance >= $2 RETURNING balance",
        )
        .bind(id.as_str())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        match debited {
            Some(balance) => {
                insert_history(&mut tx, id, -amount, kind, false).await?;
                tx.commit().await.map_err(unexpected)?;
                Ok(DebitOutcome::Debited { balance })
            }
            None => {
                // The transaction is rolled back on drop; nothing was written.
                let balance = sqlx::query_scalar::<_, i64>("SELECT balance FROM users WHERE id = $1")
                    .bind(id.as_str())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(unexpected)?
                    .ok_or_else(|| PortError::NotFound(format!("user {}", id)))?;
                Ok(DebitOutcome::InsufficientFunds { balance })
            }
        }
    }

    async fn credit(&self, id: &UserId, amount: i64, kind: EntryKind, is_bonus: bool) -> PortResult<i64> {
        check_amount(amount)?;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let balance = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET balance = balance + $2 WHERE id = $1 RETURNING balance",
        )
        .bind(id.as_str())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("user {}", id)))?;

        insert_history(&mut tx, id, amount, kind, is_bonus).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(balance)
    }

    async fn history(&self, id: &UserId) -> PortResult<Vec<BalanceEntry>> {
        let rows = sqlx::query_as::<_, BalanceEntryRecord>(
            "SELECT amount, kind, is_bonus, created_at FROM balance_history WHERE user_id = $1 ORDER BY id",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        rows.into_iter().map(BalanceEntryRecord::to_domain).collect()
    }
}
