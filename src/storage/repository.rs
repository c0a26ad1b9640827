use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    CustomerAccount, Funds, LedgerEntry, LedgerEntryKind, Shipment, ShipmentDetails,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_AWB_COUNTERS};

const CUSTOMER_COLUMNS: &str =
    "account_code, name, left_over_balance, credit_limit, version, created_at";

const SHIPMENT_COLUMNS: &str = "awb_no, customer_code, total_amt, is_hold, hold_reason, consignee, origin, destination, sector, service, pieces, weight_kg, created_at, updated_at";

const LEDGER_COLUMNS: &str = "id, customer_code, awb_no, kind, amount, balance_after, credit_after, recorded_at, destination, sector, pieces, weight_kg";

/// Returns true when a storage error was caused by another writer holding the
/// database, which makes the whole unit of work safe to retry.
pub fn is_contention(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<sqlx::Error>() {
        // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
        Some(sqlx::Error::Database(db_err)) => matches!(
            db_err.code().as_deref(),
            Some("5" | "6" | "261" | "262" | "517")
        ),
        _ => false,
    })
}

/// Returns true when an insert failed on a primary key or unique constraint.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    })
}

/// Repository for persisting and querying customers, shipments and ledger rows.
///
/// Reads that stand on their own go through the pool. Anything that moves
/// money takes a `&mut SqliteConnection` so the caller can run it inside the
/// transaction returned by [`Repository::begin`].
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
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

        sqlx::query(MIGRATION_002_AWB_COUNTERS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start a transaction. Dropping it without commit rolls everything back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }

    // ========================
    // Customer operations
    // ========================

    /// Save a new customer account.
    pub async fn save_customer(&self, customer: &CustomerAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (account_code, name, left_over_balance, credit_limit, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&customer.account_code)
        .bind(&customer.name)
        .bind(customer.left_over_balance)
        .bind(customer.credit_limit)
        .bind(customer.version)
        .bind(customer.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save customer")?;
        Ok(())
    }

    /// Get a customer by account code.
    pub async fn get_customer(&self, account_code: &str) -> Result<Option<CustomerAccount>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::fetch_customer(&mut conn, account_code).await
    }

    /// List all customers ordered by account code.
    pub async fn list_customers(&self) -> Result<Vec<CustomerAccount>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM customers ORDER BY account_code",
            CUSTOMER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list customers")?;

        rows.iter().map(Self::row_to_customer).collect()
    }

    /// Read a customer on the given connection.
    pub async fn fetch_customer(
        conn: &mut SqliteConnection,
        account_code: &str,
    ) -> Result<Option<CustomerAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM customers WHERE account_code = ?",
            CUSTOMER_COLUMNS
        ))
        .bind(account_code)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch customer")?;

        row.as_ref().map(Self::row_to_customer).transpose()
    }

    /// Write new money fields for a customer, but only if nobody else has
    /// written since `expected_version` was read. Returns false on a stale
    /// version; the caller must re-read and start over.
    pub async fn update_customer_funds(
        conn: &mut SqliteConnection,
        account_code: &str,
        funds: Funds,
        expected_version: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE customers
            SET left_over_balance = ?, credit_limit = ?, version = version + 1
            WHERE account_code = ? AND version = ?
            "#,
        )
        .bind(funds.balance)
        .bind(funds.credit)
        .bind(account_code)
        .bind(expected_version)
        .execute(&mut *conn)
        .await
        .context("Failed to update customer funds")?;

        Ok(result.rows_affected() == 1)
    }

    fn row_to_customer(row: &sqlx::sqlite::SqliteRow) -> Result<CustomerAccount> {
        let created_at_str: String = row.get("created_at");

        Ok(CustomerAccount {
            account_code: row.get("account_code"),
            name: row.get("name"),
            left_over_balance: row.get("left_over_balance"),
            credit_limit: row.get("credit_limit"),
            version: row.get("version"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
        })
    }

    // ========================
    // Shipment operations
    // ========================

    /// Get a shipment by AWB number.
    pub async fn get_shipment(&self, awb_no: &str) -> Result<Option<Shipment>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::fetch_shipment(&mut conn, awb_no).await
    }

    /// Read a shipment on the given connection.
    pub async fn fetch_shipment(
        conn: &mut SqliteConnection,
        awb_no: &str,
    ) -> Result<Option<Shipment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM shipments WHERE awb_no = ?",
            SHIPMENT_COLUMNS
        ))
        .bind(awb_no)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch shipment")?;

        row.as_ref().map(Self::row_to_shipment).transpose()
    }

    /// Check whether an AWB number is already taken.
    pub async fn awb_exists(conn: &mut SqliteConnection, awb_no: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM shipments WHERE awb_no = ?")
            .bind(awb_no)
            .fetch_one(&mut *conn)
            .await
            .context("Failed to check AWB number")?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    /// Insert a new shipment.
    pub async fn insert_shipment(conn: &mut SqliteConnection, shipment: &Shipment) -> Result<()> {
        let details = &shipment.details;
        sqlx::query(
            r#"
            INSERT INTO shipments (awb_no, customer_code, total_amt, is_hold, hold_reason, consignee, origin, destination, sector, service, pieces, weight_kg, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&shipment.awb_no)
        .bind(&shipment.customer_code)
        .bind(shipment.total_amt)
        .bind(shipment.is_hold)
        .bind(&shipment.hold_reason)
        .bind(&details.consignee)
        .bind(&details.origin)
        .bind(&details.destination)
        .bind(&details.sector)
        .bind(&details.service)
        .bind(details.pieces)
        .bind(details.weight_kg)
        .bind(shipment.created_at.to_rfc3339())
        .bind(shipment.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save shipment")?;
        Ok(())
    }

    /// Overwrite the mutable fields of an existing shipment.
    pub async fn update_shipment(conn: &mut SqliteConnection, shipment: &Shipment) -> Result<()> {
        let details = &shipment.details;
        sqlx::query(
            r#"
            UPDATE shipments
            SET total_amt = ?, is_hold = ?, hold_reason = ?, consignee = ?, origin = ?,
                destination = ?, sector = ?, service = ?, pieces = ?, weight_kg = ?, updated_at = ?
            WHERE awb_no = ?
            "#,
        )
        .bind(shipment.total_amt)
        .bind(shipment.is_hold)
        .bind(&shipment.hold_reason)
        .bind(&details.consignee)
        .bind(&details.origin)
        .bind(&details.destination)
        .bind(&details.sector)
        .bind(&details.service)
        .bind(details.pieces)
        .bind(details.weight_kg)
        .bind(shipment.updated_at.to_rfc3339())
        .bind(&shipment.awb_no)
        .execute(&mut *conn)
        .await
        .context("Failed to update shipment")?;
        Ok(())
    }

    /// Delete a shipment. Returns false if it was already gone.
    pub async fn delete_shipment(conn: &mut SqliteConnection, awb_no: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM shipments WHERE awb_no = ?")
            .bind(awb_no)
            .execute(&mut *conn)
            .await
            .context("Failed to delete shipment")?;
        Ok(result.rows_affected() == 1)
    }

    /// List shipments, newest first, with optional filters.
    pub async fn list_shipments(
        &self,
        customer_code: Option<&str>,
        on_hold_only: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Shipment>> {
        let mut query = format!("SELECT {} FROM shipments WHERE 1=1", SHIPMENT_COLUMNS);

        if customer_code.is_some() {
            query.push_str(" AND customer_code = ?");
        }
        if on_hold_only {
            query.push_str(" AND is_hold = 1");
        }

        query.push_str(" ORDER BY created_at DESC, awb_no DESC");

        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);
        if let Some(code) = customer_code {
            sql_query = sql_query.bind(code);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list shipments")?;

        rows.iter().map(Self::row_to_shipment).collect()
    }

    /// Take the next AWB sequence value for a prefix.
    pub async fn next_awb_number(conn: &mut SqliteConnection, prefix: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO awb_counters (prefix, value) VALUES (?, 1)
            ON CONFLICT(prefix) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .bind(prefix)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to get next AWB number")?;

        Ok(row.get("value"))
    }

    /// Move the counter for a prefix past a number that was issued manually.
    pub async fn advance_awb_counter(
        conn: &mut SqliteConnection,
        prefix: &str,
        number: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO awb_counters (prefix, value) VALUES (?, ?)
            ON CONFLICT(prefix) DO UPDATE SET value = MAX(value, excluded.value)
            "#,
        )
        .bind(prefix)
        .bind(number)
        .execute(&mut *conn)
        .await
        .context("Failed to advance AWB counter")?;
        Ok(())
    }

    fn row_to_shipment(row: &sqlx::sqlite::SqliteRow) -> Result<Shipment> {
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(Shipment {
            awb_no: row.get("awb_no"),
            customer_code: row.get("customer_code"),
            total_amt: row.get("total_amt"),
            is_hold: row.get::<i32, _>("is_hold") != 0,
            hold_reason: row.get("hold_reason"),
            details: ShipmentDetails {
                consignee: row.get("consignee"),
                origin: row.get("origin"),
                destination: row.get("destination"),
                sector: row.get("sector"),
                service: row.get("service"),
                pieces: row.get("pieces"),
                weight_kg: row.get("weight_kg"),
            },
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
            updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
        })
    }

    // ========================
    // Ledger operations
    // ========================

    /// Append a ledger row.
    pub async fn insert_ledger_entry(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, customer_code, awb_no, kind, amount, balance_after, credit_after, recorded_at, destination, sector, pieces, weight_kg)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.customer_code)
        .bind(&entry.awb_no)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.credit_after)
        .bind(entry.recorded_at.to_rfc3339())
        .bind(&entry.destination)
        .bind(&entry.sector)
        .bind(entry.pieces)
        .bind(entry.weight_kg)
        .execute(&mut *conn)
        .await
        .context("Failed to save ledger entry")?;
        Ok(())
    }

    /// Replace the ledger row of a shipment, inserting it if missing.
    /// The existing row keeps its id.
    pub async fn upsert_shipment_entry(
        conn: &mut SqliteConnection,
        entry: &LedgerEntry,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET amount = ?, balance_after = ?, credit_after = ?, recorded_at = ?,
                destination = ?, sector = ?, pieces = ?, weight_kg = ?
            WHERE awb_no = ? AND kind = 'shipment'
            "#,
        )
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.credit_after)
        .bind(entry.recorded_at.to_rfc3339())
        .bind(&entry.destination)
        .bind(&entry.sector)
        .bind(entry.pieces)
        .bind(entry.weight_kg)
        .bind(&entry.awb_no)
        .execute(&mut *conn)
        .await
        .context("Failed to update ledger entry")?;

        if result.rows_affected() == 0 {
            Self::insert_ledger_entry(conn, entry).await?;
        }
        Ok(())
    }

    /// Remove the ledger row of a cancelled shipment.
    pub async fn delete_shipment_entry(conn: &mut SqliteConnection, awb_no: &str) -> Result<()> {
        sqlx::query("DELETE FROM ledger_entries WHERE awb_no = ? AND kind = 'shipment'")
            .bind(awb_no)
            .execute(&mut *conn)
            .await
            .context("Failed to delete ledger entry")?;
        Ok(())
    }

    /// List ledger rows in recording order, optionally for one customer.
    pub async fn list_ledger_entries(&self, customer_code: Option<&str>) -> Result<Vec<LedgerEntry>> {
        let rows = match customer_code {
            Some(code) => {
                sqlx::query(&format!(
                    "SELECT {} FROM ledger_entries WHERE customer_code = ? ORDER BY recorded_at, rowid",
                    LEDGER_COLUMNS
                ))
                .bind(code)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM ledger_entries ORDER BY recorded_at, rowid",
                    LEDGER_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list ledger entries")?;

        rows.iter().map(Self::row_to_ledger_entry).collect()
    }

    fn row_to_ledger_entry(row: &sqlx::sqlite::SqliteRow) -> Result<LedgerEntry> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let recorded_at_str: String = row.get("recorded_at");

        Ok(LedgerEntry {
            id: Uuid::parse_str(&id_str).context("Invalid ledger entry ID")?,
            customer_code: row.get("customer_code"),
            awb_no: row.get("awb_no"),
            kind: LedgerEntryKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid ledger entry kind: {}", kind_str))?,
            amount: row.get("amount"),
            balance_after: row.get("balance_after"),
            credit_after: row.get("credit_after"),
            recorded_at: parse_timestamp(&recorded_at_str).context("Invalid recorded_at")?,
            destination: row.get("destination"),
            sector: row.get("sector"),
            pieces: row.get("pieces"),
            weight_kg: row.get("weight_kg"),
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
