use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    Cents, CustodyReason, CustodyTransfer, Holder, Loan, LoanEvent, LoanEventKind, LoanId, Party,
    PartyId,
};

use super::MIGRATION_001_INITIAL;

/// Counters for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub party_count: i64,
    pub loan_count: i64,
    pub transfer_count: i64,
    pub event_count: i64,
    /// Loans whose flags violate the state machine (repaid or discharged
    /// without being funded, or a lender recorded on an unfunded loan).
    pub flag_violations: i64,
    /// Custody rows or loan amounts that are not strictly positive.
    pub invalid_amounts: i64,
}

/// Repository for persisting and querying parties, loans, custody transfers
/// and events.
///
/// The pool is capped at a single connection: every loan transition is a
/// read-modify-write inside one transaction, and the single connection is the
/// serialization point that keeps two operations on the same loan from
/// interleaving.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Begin a transaction covering one lifecycle operation.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }

    // ========================
    // Party operations
    // ========================

    pub async fn save_party(&self, party: &Party) -> Result<()> {
        sqlx::query("INSERT INTO parties (id, name, created_at) VALUES (?, ?, ?)")
            .bind(party.id.to_string())
            .bind(&party.name)
            .bind(party.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save party")?;
        Ok(())
    }

    pub async fn get_party(&self, id: PartyId) -> Result<Option<Party>> {
        let row = sqlx::query("SELECT id, name, created_at FROM parties WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch party")?;

        row.as_ref().map(Self::row_to_party).transpose()
    }

    pub async fn get_party_by_name(&self, name: &str) -> Result<Option<Party>> {
        let row = sqlx::query("SELECT id, name, created_at FROM parties WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch party by name")?;

        row.as_ref().map(Self::row_to_party).transpose()
    }

    pub async fn list_parties(&self) -> Result<Vec<Party>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM parties ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list parties")?;

        rows.iter().map(Self::row_to_party).collect()
    }

    fn row_to_party(row: &sqlx::sqlite::SqliteRow) -> Result<Party> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");

        Ok(Party {
            id: Uuid::parse_str(&id_str).context("Invalid party ID")?,
            name: row.get("name"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    // ========================
    // Loan operations
    // ========================

    /// Insert a freshly requested loan inside a lifecycle transaction.
    pub async fn insert_loan(&self, tx: &mut Transaction<'static, Sqlite>, loan: &Loan) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (id, borrower_id, lender_id, collateral_cents, principal_cents,
                               duration_secs, due_at, is_funded, is_repaid, is_discharged, requested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(loan.id as i64)
        .bind(loan.borrower.to_string())
        .bind(loan.lender.map(|id| id.to_string()))
        .bind(loan.collateral_cents)
        .bind(loan.principal_cents)
        .bind(loan.duration_secs)
        .bind(loan.due_at.map(|dt| dt.to_rfc3339()))
        .bind(loan.is_funded)
        .bind(loan.is_repaid)
        .bind(loan.is_discharged)
        .bind(loan.requested_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .context("Failed to insert loan")?;
        Ok(())
    }

    /// Write back a mutated loan inside a lifecycle transaction.
    pub async fn update_loan(&self, tx: &mut Transaction<'static, Sqlite>, loan: &Loan) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE loans
            SET lender_id = ?, due_at = ?, is_funded = ?, is_repaid = ?, is_discharged = ?
            WHERE id = ?
            "#,
        )
        .bind(loan.lender.map(|id| id.to_string()))
        .bind(loan.due_at.map(|dt| dt.to_rfc3339()))
        .bind(loan.is_funded)
        .bind(loan.is_repaid)
        .bind(loan.is_discharged)
        .bind(loan.id as i64)
        .execute(&mut **tx)
        .await
        .context("Failed to update loan")?;
        Ok(())
    }

    /// Fetch a loan inside a lifecycle transaction, for read-modify-write.
    pub async fn get_loan_in_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        id: LoanId,
    ) -> Result<Option<Loan>> {
        let row = sqlx::query(LOAN_SELECT)
            .bind(id as i64)
            .fetch_optional(&mut **tx)
            .await
            .context("Failed to fetch loan")?;

        row.as_ref().map(Self::row_to_loan).transpose()
    }

    /// Fetch a loan snapshot outside any transaction.
    pub async fn get_loan(&self, id: LoanId) -> Result<Option<Loan>> {
        let row = sqlx::query(LOAN_SELECT)
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch loan")?;

        row.as_ref().map(Self::row_to_loan).transpose()
    }

    pub async fn list_loans(&self) -> Result<Vec<Loan>> {
        let rows = sqlx::query(
            r#"
            SELECT id, borrower_id, lender_id, collateral_cents, principal_cents,
                   duration_secs, due_at, is_funded, is_repaid, is_discharged, requested_at
            FROM loans
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list loans")?;

        rows.iter().map(Self::row_to_loan).collect()
    }

    fn row_to_loan(row: &sqlx::sqlite::SqliteRow) -> Result<Loan> {
        let borrower_str: String = row.get("borrower_id");
        let lender_str: Option<String> = row.get("lender_id");
        let due_at_str: Option<String> = row.get("due_at");
        let requested_at_str: String = row.get("requested_at");

        Ok(Loan {
            id: row.get::<i64, _>("id") as LoanId,
            borrower: Uuid::parse_str(&borrower_str).context("Invalid borrower ID")?,
            lender: lender_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid lender ID")?,
            collateral_cents: row.get("collateral_cents"),
            principal_cents: row.get("principal_cents"),
            duration_secs: row.get("duration_secs"),
            due_at: due_at_str.map(|s| parse_timestamp(&s)).transpose()?,
            is_funded: row.get::<i32, _>("is_funded") != 0,
            is_repaid: row.get::<i32, _>("is_repaid") != 0,
            is_discharged: row.get::<i32, _>("is_discharged") != 0,
            requested_at: parse_timestamp(&requested_at_str)?,
        })
    }

    // ========================
    // Custody operations
    // ========================

    /// Append a custody move inside a lifecycle transaction, so the debit and
    /// credit commit together with the loan state that caused them.
    pub async fn insert_custody_transfer(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        transfer: &CustodyTransfer,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO custody_transfers (id, loan_id, from_holder, to_holder, amount_cents, reason, at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transfer.id.to_string())
        .bind(transfer.loan_id as i64)
        .bind(transfer.from.as_db_str())
        .bind(transfer.to.as_db_str())
        .bind(transfer.amount_cents)
        .bind(transfer.reason.as_str())
        .bind(transfer.at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .context("Failed to insert custody transfer")?;
        Ok(())
    }

    pub async fn list_custody_transfers(&self) -> Result<Vec<CustodyTransfer>> {
        let rows = sqlx::query(
            "SELECT id, loan_id, from_holder, to_holder, amount_cents, reason, at
             FROM custody_transfers ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list custody transfers")?;

        rows.iter().map(Self::row_to_transfer).collect()
    }

    pub async fn list_custody_transfers_for_loan(&self, id: LoanId) -> Result<Vec<CustodyTransfer>> {
        let rows = sqlx::query(
            "SELECT id, loan_id, from_holder, to_holder, amount_cents, reason, at
             FROM custody_transfers WHERE loan_id = ? ORDER BY rowid",
        )
        .bind(id as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list custody transfers for loan")?;

        rows.iter().map(Self::row_to_transfer).collect()
    }

    fn row_to_transfer(row: &sqlx::sqlite::SqliteRow) -> Result<CustodyTransfer> {
        let id_str: String = row.get("id");
        let from_str: String = row.get("from_holder");
        let to_str: String = row.get("to_holder");
        let reason_str: String = row.get("reason");
        let at_str: String = row.get("at");

        Ok(CustodyTransfer {
            id: Uuid::parse_str(&id_str).context("Invalid transfer ID")?,
            loan_id: row.get::<i64, _>("loan_id") as LoanId,
            from: Holder::from_db_str(&from_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid holder: {}", from_str))?,
            to: Holder::from_db_str(&to_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid holder: {}", to_str))?,
            amount_cents: row.get("amount_cents"),
            reason: CustodyReason::from_str(&reason_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid custody reason: {}", reason_str))?,
            at: parse_timestamp(&at_str)?,
        })
    }

    // ========================
    // Event operations
    // ========================

    /// Append an event inside a lifecycle transaction. The event commits
    /// with the mutation it records, never before.
    pub async fn insert_loan_event(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        event: &LoanEvent,
    ) -> Result<()> {
        sqlx::query("INSERT INTO loan_events (id, loan_id, kind, at) VALUES (?, ?, ?, ?)")
            .bind(event.id.to_string())
            .bind(event.loan_id as i64)
            .bind(event.kind.as_str())
            .bind(event.at.to_rfc3339())
            .execute(&mut **tx)
            .await
            .context("Failed to insert loan event")?;
        Ok(())
    }

    pub async fn list_events_for_loan(&self, id: LoanId) -> Result<Vec<LoanEvent>> {
        // rowid preserves insertion order; timestamps can collide within a
        // transaction.
        let rows = sqlx::query("SELECT id, loan_id, kind, at FROM loan_events WHERE loan_id = ? ORDER BY rowid")
            .bind(id as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list loan events")?;

        rows.iter().map(Self::row_to_event).collect()
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<LoanEvent> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let at_str: String = row.get("at");

        Ok(LoanEvent {
            id: Uuid::parse_str(&id_str).context("Invalid event ID")?,
            loan_id: row.get::<i64, _>("loan_id") as LoanId,
            kind: LoanEventKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid event kind: {}", kind_str))?,
            at: parse_timestamp(&at_str)?,
        })
    }

    // ========================
    // Integrity
    // ========================

    /// Gather counters for the integrity report.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let party_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM parties")
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let loan_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM loans")
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let transfer_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM custody_transfers")
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let event_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM loan_events")
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let flag_violations: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM loans
            WHERE (is_repaid = 1 AND is_funded = 0)
               OR (is_discharged = 1 AND is_funded = 0)
               OR (is_repaid = 1 AND is_discharged = 0)
               OR ((lender_id IS NOT NULL) != (is_funded = 1))
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("n");

        let invalid_amounts: i64 = sqlx::query(
            r#"
            SELECT (SELECT COUNT(*) FROM loans WHERE collateral_cents <= 0 OR principal_cents <= 0)
                 + (SELECT COUNT(*) FROM custody_transfers WHERE amount_cents <= 0) AS n
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("n");

        Ok(IntegrityStats {
            party_count,
            loan_count,
            transfer_count,
            event_count,
            flag_violations,
            invalid_amounts,
        })
    }

    /// Balance of one holder, derived in SQL: total credited minus total
    /// debited.
    pub async fn compute_holder_balance(&self, holder: &Holder) -> Result<Cents> {
        let key = holder.as_db_str();
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(CASE WHEN to_holder = ? THEN amount_cents ELSE 0 END), 0)
                 - COALESCE(SUM(CASE WHEN from_holder = ? THEN amount_cents ELSE 0 END), 0) AS balance
            FROM custody_transfers
            "#,
        )
        .bind(&key)
        .bind(&key)
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute balance")?;

        Ok(row.get("balance"))
    }
}

const LOAN_SELECT: &str = r#"
    SELECT id, borrower_id, lender_id, collateral_cents, principal_cents,
           duration_secs, due_at, is_funded, is_repaid, is_discharged, requested_at
    FROM loans
    WHERE id = ?
"#;

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}
