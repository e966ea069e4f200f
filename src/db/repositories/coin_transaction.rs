//! Coin ledger repository
//!
//! Every entry carries the balance before and after it was applied, so the
//! student's balance is the `balance_after` of the latest entry.

use super::{decode_json_opt, encode_json_opt};
use crate::db::{Backend, DynDatabasePool};
use crate::models::{CoinFilter, CoinTransaction, NewCoinTransaction, TransactionType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Coin ledger repository trait
#[async_trait]
pub trait CoinTransactionRepository: Send + Sync {
    /// Append an entry, computing balances atomically
    async fn record(&self, entry: &NewCoinTransaction) -> Result<CoinTransaction>;

    /// Debit `entry.amount` only if the current balance covers it.
    ///
    /// The balance is read and the entry written under one write lock, so
    /// concurrent debits can never take a balance below zero.
    async fn spend(&self, entry: &NewCoinTransaction) -> Result<Spend>;

    /// Current balance of a student, zero without entries
    async fn balance(&self, student_id: i64) -> Result<i64>;

    /// Entries matching `filter`, newest first
    async fn list(&self, filter: &CoinFilter) -> Result<Vec<CoinTransaction>>;

    /// Sum of amounts of one transaction type for a student
    async fn sum_by_type(&self, student_id: i64, transaction_type: TransactionType) -> Result<i64>;
}

/// Outcome of a guarded debit
#[derive(Debug, Clone, PartialEq)]
pub enum Spend {
    Charged(CoinTransaction),
    Insufficient { balance: i64 },
}

/// What a ledger write did
enum LedgerWrite {
    Applied { id: i64, balance_before: i64 },
    Short { balance: i64 },
}

/// SQLx-based coin ledger implementation
pub struct SqlxCoinTransactionRepository {
    pool: DynDatabasePool,
}

impl SqlxCoinTransactionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CoinTransactionRepository> {
        Arc::new(Self::new(pool))
    }

    /// Append an entry; with `required` set, refuse when the balance is lower
    async fn write(&self, entry: &NewCoinTransaction, required: Option<i64>) -> Result<Spend> {
        let metadata = encode_json_opt(entry.metadata.as_ref())?;
        let now = Utc::now();

        let written = match self.pool.backend() {
            Backend::Sqlite(p) => write_sqlite(p, entry, metadata.as_deref(), now, required).await?,
            Backend::Mysql(p) => write_mysql(p, entry, metadata.as_deref(), now, required).await?,
        };

        let (id, balance_before) = match written {
            LedgerWrite::Applied { id, balance_before } => (id, balance_before),
            LedgerWrite::Short { balance } => return Ok(Spend::Insufficient { balance }),
        };

        Ok(Spend::Charged(CoinTransaction {
            id,
            student_id: entry.student_id,
            transaction_type: entry.transaction_type,
            amount: entry.amount,
            session_id: entry.session_id,
            node_id: entry.node_id.clone(),
            description: entry.description.clone(),
            metadata: entry.metadata.clone(),
            balance_before,
            balance_after: balance_before + entry.delta(),
            created_at: now,
        }))
    }
}

const COIN_COLUMNS: &str = "id, student_id, transaction_type, amount, session_id, node_id, \
     description, metadata, balance_before, balance_after, created_at";

const LATEST_BALANCE: &str =
    "SELECT balance_after FROM coin_transactions WHERE student_id = ? ORDER BY id DESC LIMIT 1";

const INSERT_COIN: &str = r#"
    INSERT INTO coin_transactions (student_id, transaction_type, amount, session_id, node_id,
                                   description, metadata, balance_before, balance_after, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const COIN_FILTER: &str = r#"
    WHERE (? IS NULL OR student_id = ?)
      AND (? IS NULL OR session_id = ?)
      AND (? IS NULL OR transaction_type = ?)
"#;

const DEFAULT_COIN_LIMIT: i64 = 100;

#[async_trait]
impl CoinTransactionRepository for SqlxCoinTransactionRepository {
    async fn record(&self, entry: &NewCoinTransaction) -> Result<CoinTransaction> {
        match self.write(entry, None).await? {
            Spend::Charged(tx) => Ok(tx),
            Spend::Insufficient { balance } => {
                anyhow::bail!("Unguarded ledger write refused at balance {}", balance)
            }
        }
    }

    async fn spend(&self, entry: &NewCoinTransaction) -> Result<Spend> {
        self.write(entry, Some(entry.amount)).await
    }

    async fn balance(&self, student_id: i64) -> Result<i64> {
        let balance: Option<(i64,)> = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as(LATEST_BALANCE).bind(student_id).fetch_optional(p).await,
            Backend::Mysql(p) => sqlx::query_as(LATEST_BALANCE).bind(student_id).fetch_optional(p).await,
        }
        .context("Failed to read coin balance")?;
        Ok(balance.map(|(b,)| b).unwrap_or(0))
    }

    async fn list(&self, filter: &CoinFilter) -> Result<Vec<CoinTransaction>> {
        let sql = format!(
            "SELECT {} FROM coin_transactions {} ORDER BY id DESC LIMIT ?",
            COIN_COLUMNS, COIN_FILTER
        );
        let transaction_type = filter.transaction_type.map(|t| t.as_str());
        let limit = if filter.limit > 0 {
            filter.limit
        } else {
            DEFAULT_COIN_LIMIT
        };

        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(filter.student_id)
                .bind(filter.student_id)
                .bind(filter.session_id)
                .bind(filter.session_id)
                .bind(transaction_type)
                .bind(transaction_type)
                .bind(limit)
                .fetch_all(p)
                .await
                .context("Failed to list coin transactions")?
                .iter()
                .map(row_to_coin_sqlite)
                .collect(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(filter.student_id)
                .bind(filter.student_id)
                .bind(filter.session_id)
                .bind(filter.session_id)
                .bind(transaction_type)
                .bind(transaction_type)
                .bind(limit)
                .fetch_all(p)
                .await
                .context("Failed to list coin transactions")?
                .iter()
                .map(row_to_coin_mysql)
                .collect(),
        }
    }

    async fn sum_by_type(&self, student_id: i64, transaction_type: TransactionType) -> Result<i64> {
        let sql = "SELECT CAST(COALESCE(SUM(amount), 0) AS SIGNED) FROM coin_transactions \
                   WHERE student_id = ? AND transaction_type = ?";
        let (sum,): (i64,) = match self.pool.backend() {
            Backend::Sqlite(p) => {
                sqlx::query_as(sql)
                    .bind(student_id)
                    .bind(transaction_type.as_str())
                    .fetch_one(p)
                    .await
            }
            Backend::Mysql(p) => {
                sqlx::query_as(sql)
                    .bind(student_id)
                    .bind(transaction_type.as_str())
                    .fetch_one(p)
                    .await
            }
        }
        .context("Failed to sum coin transactions")?;
        Ok(sum)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn write_sqlite(
    pool: &SqlitePool,
    entry: &NewCoinTransaction,
    metadata: Option<&str>,
    now: chrono::DateTime<Utc>,
    required: Option<i64>,
) -> Result<LedgerWrite> {
    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;

    // IMMEDIATE takes the write lock before the balance is read
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .context("Failed to begin coin transaction")?;

    let written = append_sqlite(&mut conn, entry, metadata, now, required).await;
    let finish = match written {
        Ok(LedgerWrite::Applied { .. }) => "COMMIT",
        _ => "ROLLBACK",
    };
    sqlx::query(finish)
        .execute(&mut *conn)
        .await
        .context("Failed to finish coin transaction")?;
    written
}

async fn append_sqlite(
    conn: &mut SqliteConnection,
    entry: &NewCoinTransaction,
    metadata: Option<&str>,
    now: chrono::DateTime<Utc>,
    required: Option<i64>,
) -> Result<LedgerWrite> {
    let latest: Option<(i64,)> = sqlx::query_as(LATEST_BALANCE)
        .bind(entry.student_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read coin balance")?;
    let before = latest.map(|(b,)| b).unwrap_or(0);
    if required.is_some_and(|r| before < r) {
        return Ok(LedgerWrite::Short { balance: before });
    }

    let id = sqlx::query(INSERT_COIN)
        .bind(entry.student_id)
        .bind(entry.transaction_type.as_str())
        .bind(entry.amount)
        .bind(entry.session_id)
        .bind(&entry.node_id)
        .bind(&entry.description)
        .bind(metadata)
        .bind(before)
        .bind(before + entry.delta())
        .bind(now)
        .execute(&mut *conn)
        .await
        .context("Failed to record coin transaction")?
        .last_insert_rowid();

    Ok(LedgerWrite::Applied {
        id,
        balance_before: before,
    })
}

fn row_to_coin_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<CoinTransaction> {
    let transaction_type: String = row.get("transaction_type");

    Ok(CoinTransaction {
        id: row.get("id"),
        student_id: row.get("student_id"),
        transaction_type: TransactionType::from_str(&transaction_type)?,
        amount: row.get("amount"),
        session_id: row.get("session_id"),
        node_id: row.get("node_id"),
        description: row.get("description"),
        metadata: decode_json_opt(row.get("metadata"), "metadata")?,
        balance_before: row.get("balance_before"),
        balance_after: row.get("balance_after"),
        created_at: row.get("created_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn write_mysql(
    pool: &MySqlPool,
    entry: &NewCoinTransaction,
    metadata: Option<&str>,
    now: chrono::DateTime<Utc>,
    required: Option<i64>,
) -> Result<LedgerWrite> {
    let mut tx = pool.begin().await.context("Failed to begin coin transaction")?;

    let latest: Option<(i64,)> = sqlx::query_as(&format!("{} FOR UPDATE", LATEST_BALANCE))
        .bind(entry.student_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read coin balance")?;
    let before = latest.map(|(b,)| b).unwrap_or(0);
    if required.is_some_and(|r| before < r) {
        tx.rollback().await.context("Failed to roll back coin transaction")?;
        return Ok(LedgerWrite::Short { balance: before });
    }

    let id = sqlx::query(INSERT_COIN)
        .bind(entry.student_id)
        .bind(entry.transaction_type.as_str())
        .bind(entry.amount)
        .bind(entry.session_id)
        .bind(&entry.node_id)
        .bind(&entry.description)
        .bind(metadata)
        .bind(before)
        .bind(before + entry.delta())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to record coin transaction")?
        .last_insert_id() as i64;

    tx.commit().await.context("Failed to commit coin transaction")?;
    Ok(LedgerWrite::Applied {
        id,
        balance_before: before,
    })
}

fn row_to_coin_mysql(row: &sqlx::mysql::MySqlRow) -> Result<CoinTransaction> {
    let transaction_type: String = row.get("transaction_type");

    Ok(CoinTransaction {
        id: row.get("id"),
        student_id: row.get("student_id"),
        transaction_type: TransactionType::from_str(&transaction_type)?,
        amount: row.get("amount"),
        session_id: row.get("session_id"),
        node_id: row.get("node_id"),
        description: row.get("description"),
        metadata: decode_json_opt(row.get("metadata"), "metadata")?,
        balance_before: row.get("balance_before"),
        balance_after: row.get("balance_after"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_user, setup_pool};
    use crate::models::UserRole;

    fn entry(student_id: i64, transaction_type: TransactionType, amount: i64) -> NewCoinTransaction {
        NewCoinTransaction {
            student_id,
            transaction_type,
            amount,
            session_id: None,
            node_id: None,
            description: format!("{} {}", transaction_type, amount),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_balances_chain() {
        let pool = setup_pool().await;
        let student = seed_user(&pool, "student", UserRole::Student).await;
        let repo = SqlxCoinTransactionRepository::new(pool);

        assert_eq!(repo.balance(student.id).await.unwrap(), 0);

        let first = repo.record(&entry(student.id, TransactionType::Earned, 10)).await.unwrap();
        assert_eq!((first.balance_before, first.balance_after), (0, 10));

        let second = repo.record(&entry(student.id, TransactionType::Spent, 4)).await.unwrap();
        assert_eq!((second.balance_before, second.balance_after), (10, 6));

        repo.record(&entry(student.id, TransactionType::Bonus, 5)).await.unwrap();
        assert_eq!(repo.balance(student.id).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_spend_refuses_short_balance() {
        let pool = setup_pool().await;
        let student = seed_user(&pool, "student", UserRole::Student).await;
        let repo = SqlxCoinTransactionRepository::new(pool);

        let refused = repo.spend(&entry(student.id, TransactionType::Spent, 5)).await.unwrap();
        assert_eq!(refused, Spend::Insufficient { balance: 0 });

        repo.record(&entry(student.id, TransactionType::Earned, 8)).await.unwrap();
        match repo.spend(&entry(student.id, TransactionType::Spent, 5)).await.unwrap() {
            Spend::Charged(tx) => assert_eq!((tx.balance_before, tx.balance_after), (8, 3)),
            other => panic!("expected a charge, got {:?}", other),
        }
        assert_eq!(
            repo.spend(&entry(student.id, TransactionType::Spent, 5)).await.unwrap(),
            Spend::Insufficient { balance: 3 }
        );
        assert_eq!(repo.balance(student.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_spends_never_overdraw() {
        let pool = setup_pool().await;
        let student = seed_user(&pool, "student", UserRole::Student).await;
        let repo = SqlxCoinTransactionRepository::new(pool);
        repo.record(&entry(student.id, TransactionType::Earned, 5)).await.unwrap();

        let debit = entry(student.id, TransactionType::Spent, 5);
        let (a, b) = tokio::join!(repo.spend(&debit), repo.spend(&debit));
        let charged = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|s| matches!(s, Spend::Charged(_)))
            .count();

        assert_eq!(charged, 1);
        assert_eq!(repo.balance(student.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_and_sum() {
        let pool = setup_pool().await;
        let student = seed_user(&pool, "student", UserRole::Student).await;
        let other = seed_user(&pool, "other", UserRole::Student).await;
        let repo = SqlxCoinTransactionRepository::new(pool);

        repo.record(&entry(student.id, TransactionType::Earned, 10)).await.unwrap();
        repo.record(&entry(student.id, TransactionType::Earned, 15)).await.unwrap();
        repo.record(&entry(student.id, TransactionType::Spent, 5)).await.unwrap();
        repo.record(&entry(other.id, TransactionType::Earned, 99)).await.unwrap();

        assert_eq!(repo.sum_by_type(student.id, TransactionType::Earned).await.unwrap(), 25);
        assert_eq!(repo.sum_by_type(student.id, TransactionType::Bonus).await.unwrap(), 0);

        let listed = repo
            .list(&CoinFilter {
                student_id: Some(student.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].transaction_type, TransactionType::Spent);

        let spent = repo
            .list(&CoinFilter {
                transaction_type: Some(TransactionType::Spent),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(spent.len(), 1);
    }
}
