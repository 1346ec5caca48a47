//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `StoreError` |
//! |---|---|---|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | any | `Backend` |
//! | Row decode failure | n/a | `Serialization` |
//! | Other (pool closed, io, ...) | n/a | `Backend` |
//!
//! A stale account version is detected by `UPDATE ... WHERE version = $n`
//! touching zero rows and is reported as `Concurrency`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use ledgerbank_accounts::{
    AccountLedgerLink, AccountRecord, AccountType, BankAccount, CashTransaction,
    CashTransactionRecord, Channel, Iban, MovementType, PaymentCategory, TransactionStatus,
};
use ledgerbank_core::{AccountId, BranchId, Currency, LedgerEntryId, Money};

use crate::outbox::{NewOutboxMessage, OutboxMessage, OutboxStore};

use super::{
    AccountStore, ChangeSet, CommitOutcome, PreparedCommit, StoreError, TransactionCoordinator,
    UnitOfWork, completed_entries,
};

const SELECT_ACCOUNT: &str = r#"
    SELECT id, account_number, iban, account_type, branch_id, currency, holder_name,
           balance, allowed_balance_to_use, minimum_allowed_balance, debt,
           is_active, created_at, version
    FROM accounts
"#;

const SELECT_ENTRY: &str = r#"
    SELECT ct.id, ct.reference_number, ct.movement_type, ct.channel, ct.from_iban, ct.to_iban,
           ct.amount, ct.fee, ct.currency, ct.description,
           ct.sender_available_balance, ct.recipient_available_balance,
           ct.payment_category, ct.transaction_date, ct.status,
           ct.sender_name, ct.recipient_name
    FROM cash_transactions ct
"#;

/// Ledger store over a `PgPool`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(iban = %iban), err)]
    async fn get_by_iban(&self, iban: &Iban) -> Result<Option<BankAccount>, StoreError> {
        let sql = format!("{SELECT_ACCOUNT} WHERE iban = $1");
        let row = sqlx::query(&sql)
            .bind(iban.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_iban", e))?;
        row.map(|r| account_from_row(&r).map(BankAccount::restore))
            .transpose()
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn get_by_id(&self, id: AccountId) -> Result<Option<BankAccount>, StoreError> {
        let sql = format!("{SELECT_ACCOUNT} WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_id", e))?;
        row.map(|r| account_from_row(&r).map(BankAccount::restore))
            .transpose()
    }

    async fn exists_by_iban(&self, iban: &Iban) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM accounts WHERE iban = $1)")
            .bind(iban.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists_by_iban", e))
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn ledger_entries_for(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<CashTransaction>, StoreError> {
        let sql = format!(
            "{SELECT_ENTRY}
             JOIN account_transactions at ON at.ledger_entry_id = ct.id
             WHERE at.account_id = $1
             ORDER BY ct.transaction_date ASC, ct.id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ledger_entries_for", e))?;
        rows.iter()
            .map(|r| entry_from_row(r).map(CashTransaction::restore))
            .collect()
    }

    async fn get_ledger_entry(
        &self,
        id: LedgerEntryId,
    ) -> Result<Option<CashTransaction>, StoreError> {
        let sql = format!("{SELECT_ENTRY} WHERE ct.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_ledger_entry", e))?;
        row.map(|r| entry_from_row(&r).map(CashTransaction::restore))
            .transpose()
    }
}

#[async_trait]
impl TransactionCoordinator for PostgresLedgerStore {
    type Unit = PostgresUnit;

    async fn begin_atomic(&self) -> Result<Self::Unit, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresUnit {
            tx,
            changes: ChangeSet::default(),
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresLedgerStore {
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, event_id, aggregate_id, aggregate_type, event_type,
                   event_version, occurred_at, payload, published_at
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY sequence ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_unpublished", e))?;
        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self, event_ids), fields(count = event_ids.len()), err)]
    async fn mark_published(&self, event_ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE outbox SET published_at = $2 WHERE event_id = ANY($1) AND published_at IS NULL",
        )
        .bind(event_ids)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_published", e))?;
        Ok(result.rows_affected())
    }
}

/// Unit of work holding an open Postgres transaction.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
    changes: ChangeSet,
}

impl std::fmt::Debug for PostgresUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresUnit")
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnit {
    async fn load_account(&mut self, iban: &Iban) -> Result<Option<BankAccount>, StoreError> {
        let sql = format!("{SELECT_ACCOUNT} WHERE iban = $1");
        let row = sqlx::query(&sql)
            .bind(iban.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_account", e))?;
        row.map(|r| account_from_row(&r).map(BankAccount::restore))
            .transpose()
    }

    async fn account_exists(&mut self, iban: &Iban) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM accounts WHERE iban = $1)")
            .bind(iban.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("account_exists", e))
    }

    fn changes(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    #[instrument(skip(self), err)]
    async fn commit(self) -> Result<CommitOutcome, StoreError> {
        let PostgresUnit { mut tx, changes } = self;
        let prepared = changes.prepare()?;
        if prepared.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(CommitOutcome::default());
        }

        let written = write_prepared(&mut tx, &prepared).await;
        let (rows_affected, messages) = match written {
            Ok(done) => done,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback after failed commit also failed");
                }
                return Err(e);
            }
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!(rows = rows_affected, "postgres unit committed");

        let PreparedCommit {
            inserts,
            updates,
            entries,
            ..
        } = prepared;
        let accounts = inserts
            .into_iter()
            .chain(updates.into_iter().map(|mut r| {
                r.version += 1;
                r
            }))
            .collect();

        Ok(CommitOutcome {
            rows_affected,
            accounts,
            entries: completed_entries(entries),
            messages,
        })
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Every statement of a commit, in order. Entries are flipped to
/// `completed` last.
async fn write_prepared(
    tx: &mut Transaction<'static, Postgres>,
    prepared: &PreparedCommit,
) -> Result<(u64, Vec<OutboxMessage>), StoreError> {
    let mut rows = 0u64;

    for record in &prepared.inserts {
        rows += insert_account(tx, record).await?;
    }
    for record in &prepared.updates {
        let touched = update_account(tx, record).await?;
        if touched == 0 {
            return Err(StoreError::Concurrency(format!(
                "account {} changed since version {}",
                record.iban, record.version
            )));
        }
        rows += touched;
    }
    for record in &prepared.entries {
        rows += insert_entry(tx, record).await?;
    }
    for link in &prepared.links {
        rows += insert_link(tx, link).await?;
    }

    let mut messages = Vec::with_capacity(prepared.messages.len());
    for message in &prepared.messages {
        messages.push(insert_outbox(tx, message).await?);
        rows += 1;
    }

    if !prepared.entries.is_empty() {
        let ids: Vec<Uuid> = prepared.entries.iter().map(|e| *e.id.as_uuid()).collect();
        let result = sqlx::query("UPDATE cash_transactions SET status = $2 WHERE id = ANY($1)")
            .bind(&ids)
            .bind(TransactionStatus::Completed.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("complete_entries", e))?;
        rows += result.rows_affected();
    }

    Ok((rows, messages))
}

async fn insert_account(
    tx: &mut Transaction<'static, Postgres>,
    record: &AccountRecord,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (
            id, account_number, iban, account_type, branch_id, currency, holder_name,
            balance, allowed_balance_to_use, minimum_allowed_balance, debt,
            is_active, created_at, version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(&record.account_number)
    .bind(record.iban.as_str())
    .bind(record.account_type.as_str())
    .bind(record.branch_id.as_uuid())
    .bind(record.currency.as_str())
    .bind(&record.holder_name)
    .bind(record.balance.amount())
    .bind(record.allowed_balance_to_use.amount())
    .bind(record.minimum_allowed_balance.amount())
    .bind(record.debt.amount())
    .bind(record.is_active)
    .bind(record.created_at)
    .bind(record.version as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_account", e))?;
    Ok(result.rows_affected())
}

async fn update_account(
    tx: &mut Transaction<'static, Postgres>,
    record: &AccountRecord,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET balance = $3,
            allowed_balance_to_use = $4,
            debt = $5,
            is_active = $6,
            version = version + 1
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.version as i64)
    .bind(record.balance.amount())
    .bind(record.allowed_balance_to_use.amount())
    .bind(record.debt.amount())
    .bind(record.is_active)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_account", e))?;
    Ok(result.rows_affected())
}

async fn insert_entry(
    tx: &mut Transaction<'static, Postgres>,
    record: &CashTransactionRecord,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO cash_transactions (
            id, reference_number, movement_type, channel, from_iban, to_iban,
            amount, fee, currency, description,
            sender_available_balance, recipient_available_balance,
            payment_category, transaction_date, status, sender_name, recipient_name
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(&record.reference_number)
    .bind(record.movement_type.as_str())
    .bind(record.channel.as_str())
    .bind(record.from.as_ref().map(Iban::as_str))
    .bind(record.to.as_ref().map(Iban::as_str))
    .bind(record.amount.amount())
    .bind(record.fee.amount())
    .bind(record.amount.currency().as_str())
    .bind(&record.description)
    .bind(record.sender_available_balance.map(|m| m.amount()))
    .bind(record.recipient_available_balance.map(|m| m.amount()))
    .bind(record.payment_category.as_str())
    .bind(record.transaction_date)
    .bind(record.status.as_str())
    .bind(record.sender_name.as_deref())
    .bind(record.recipient_name.as_deref())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_entry", e))?;
    Ok(result.rows_affected())
}

async fn insert_link(
    tx: &mut Transaction<'static, Postgres>,
    link: &AccountLedgerLink,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO account_transactions (account_id, ledger_entry_id, role) VALUES ($1, $2, $3)",
    )
    .bind(link.account_id.as_uuid())
    .bind(link.ledger_entry_id.as_uuid())
    .bind(link.role.as_str())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_link", e))?;
    Ok(result.rows_affected())
}

async fn insert_outbox(
    tx: &mut Transaction<'static, Postgres>,
    message: &NewOutboxMessage,
) -> Result<OutboxMessage, StoreError> {
    let sequence: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO outbox (
            event_id, aggregate_id, aggregate_type, event_type, event_version, occurred_at, payload
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING sequence
        "#,
    )
    .bind(message.event_id)
    .bind(message.aggregate_id)
    .bind(&message.aggregate_type)
    .bind(&message.event_type)
    .bind(message.event_version as i32)
    .bind(message.occurred_at)
    .bind(&message.payload)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_outbox", e))?;
    Ok(message.clone().into_stored(sequence as u64))
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Serialization(format!("column {name}: {e}")))
}

fn text_enum<T>(row: &PgRow, name: &str, parse: fn(&str) -> Option<T>) -> Result<T, StoreError> {
    let raw: String = col(row, name)?;
    parse(&raw).ok_or_else(|| StoreError::Serialization(format!("column {name}: unknown value '{raw}'")))
}

fn iban_col(row: &PgRow, name: &str) -> Result<Option<Iban>, StoreError> {
    col::<Option<String>>(row, name)?
        .map(|raw| Iban::parse(&raw).map_err(|e| StoreError::Serialization(format!("column {name}: {e}"))))
        .transpose()
}

fn account_from_row(row: &PgRow) -> Result<AccountRecord, StoreError> {
    let currency: Currency = col::<String>(row, "currency")?
        .parse()
        .map_err(|e| StoreError::Serialization(format!("column currency: {e}")))?;
    let money = |name: &str| col::<Decimal>(row, name).map(|amount| Money::new(amount, currency));

    Ok(AccountRecord {
        id: AccountId::from_uuid(col(row, "id")?),
        account_number: col(row, "account_number")?,
        iban: iban_col(row, "iban")?
            .ok_or_else(|| StoreError::Serialization("column iban: null".to_string()))?,
        account_type: text_enum(row, "account_type", AccountType::parse)?,
        branch_id: BranchId::from_uuid(col(row, "branch_id")?),
        currency,
        holder_name: col(row, "holder_name")?,
        balance: money("balance")?,
        allowed_balance_to_use: money("allowed_balance_to_use")?,
        minimum_allowed_balance: money("minimum_allowed_balance")?,
        debt: money("debt")?,
        is_active: col(row, "is_active")?,
        created_at: col(row, "created_at")?,
        version: col::<i64>(row, "version")? as u64,
    })
}

fn entry_from_row(row: &PgRow) -> Result<CashTransactionRecord, StoreError> {
    let currency: Currency = col::<String>(row, "currency")?
        .parse()
        .map_err(|e| StoreError::Serialization(format!("column currency: {e}")))?;
    let snapshot = |name: &str| {
        col::<Option<Decimal>>(row, name).map(|v| v.map(|amount| Money::new(amount, currency)))
    };

    Ok(CashTransactionRecord {
        id: LedgerEntryId::from_uuid(col(row, "id")?),
        reference_number: col(row, "reference_number")?,
        movement_type: text_enum(row, "movement_type", MovementType::parse)?,
        channel: text_enum(row, "channel", Channel::parse)?,
        from: iban_col(row, "from_iban")?,
        to: iban_col(row, "to_iban")?,
        amount: Money::new(col(row, "amount")?, currency),
        fee: Money::new(col(row, "fee")?, currency),
        description: col(row, "description")?,
        sender_available_balance: snapshot("sender_available_balance")?,
        recipient_available_balance: snapshot("recipient_available_balance")?,
        payment_category: text_enum(row, "payment_category", PaymentCategory::parse)?,
        transaction_date: col(row, "transaction_date")?,
        status: text_enum(row, "status", TransactionStatus::parse)?,
        sender_name: col(row, "sender_name")?,
        recipient_name: col(row, "recipient_name")?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxMessage, StoreError> {
    Ok(OutboxMessage {
        event_id: col(row, "event_id")?,
        sequence: col::<i64>(row, "sequence")? as u64,
        aggregate_id: col(row, "aggregate_id")?,
        aggregate_type: col(row, "aggregate_type")?,
        event_type: col(row, "event_type")?,
        event_version: col::<i32>(row, "event_version")? as u32,
        occurred_at: col(row, "occurred_at")?,
        payload: col(row, "payload")?,
        published_at: col(row, "published_at")?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
