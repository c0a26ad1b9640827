use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::domain::{
    apply_delta, build_integrity_report, format_awb, format_cents, parse_awb_number,
    reverse_charge, settle_charge, Cents, MAX_AMOUNT, CustomerAccount, Funds, IntegrityReport, LedgerEntry,
    Shipment, ShipmentDetails,
};
use crate::storage::{is_unique_violation, Repository};

use super::{AppError, CustomerStatement, ServiceConfig};

/// Application service for customer accounts and shipment bookings.
/// This is the primary interface for any client (CLI, API, etc.).
///
/// Every use case that moves money reads the customer inside a transaction,
/// computes the new wallet/credit position with the pure functions in
/// `domain::credit`, and writes customer, shipment and ledger row before a
/// single commit. A customer row only accepts the write if its version is
/// unchanged since the read; losing that race re-runs the whole use case.
pub struct BookingService {
    repo: Repository,
    config: ServiceConfig,
}

/// Input for booking a shipment.
#[derive(Debug, Clone)]
pub struct NewShipment {
    pub customer_code: String,
    pub total_amt: Cents,
    /// Caller-supplied AWB number; generated when absent
    pub awb_no: Option<String>,
    pub details: ShipmentDetails,
}

impl NewShipment {
    pub fn new(customer_code: impl Into<String>, total_amt: Cents) -> Self {
        Self {
            customer_code: customer_code.into(),
            total_amt,
            awb_no: None,
            details: ShipmentDetails::default(),
        }
    }

    pub fn with_awb(mut self, awb_no: impl Into<String>) -> Self {
        self.awb_no = Some(awb_no.into());
        self
    }

    pub fn with_details(mut self, details: ShipmentDetails) -> Self {
        self.details = details;
        self
    }
}

/// Changes to an existing shipment. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct ShipmentUpdate {
    pub total_amt: Option<Cents>,
    pub consignee: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub sector: Option<String>,
    pub service: Option<String>,
    pub pieces: Option<i64>,
    pub weight_kg: Option<f64>,
}

impl ShipmentUpdate {
    pub fn amount(total_amt: Cents) -> Self {
        Self {
            total_amt: Some(total_amt),
            ..Self::default()
        }
    }

    fn apply_details(&self, details: &mut ShipmentDetails) {
        if let Some(consignee) = &self.consignee {
            details.consignee = Some(consignee.clone());
        }
        if let Some(origin) = &self.origin {
            details.origin = Some(origin.clone());
        }
        if let Some(destination) = &self.destination {
            details.destination = Some(destination.clone());
        }
        if let Some(sector) = &self.sector {
            details.sector = Some(sector.clone());
        }
        if let Some(service) = &self.service {
            details.service = Some(service.clone());
        }
        if let Some(pieces) = self.pieces {
            details.pieces = pieces;
        }
        if let Some(weight_kg) = self.weight_kg {
            details.weight_kg = weight_kg;
        }
    }
}

/// Shipment together with the customer account as it stands after the operation.
#[derive(Debug, Clone)]
pub struct ShipmentResult {
    pub shipment: Shipment,
    pub customer: CustomerAccount,
}

/// Filter for querying shipments
#[derive(Debug, Clone, Default)]
pub struct ShipmentFilter {
    pub customer: Option<String>,
    pub on_hold_only: bool,
    pub limit: Option<usize>,
}

impl BookingService {
    /// Create a new booking service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            config: ServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Customer operations
    // ========================

    /// Open a customer account.
    pub async fn create_customer(
        &self,
        account_code: String,
        name: String,
        credit_limit: Cents,
        opening_balance: Cents,
    ) -> Result<CustomerAccount, AppError> {
        let account_code = account_code.trim().to_string();
        if account_code.is_empty() {
            return Err(AppError::InvalidInput(
                "Account code cannot be empty".to_string(),
            ));
        }
        if credit_limit < 0 {
            return Err(AppError::NegativeCreditLimit(credit_limit));
        }
        check_amount(credit_limit, "Credit limit")?;
        check_amount(opening_balance.saturating_abs(), "Opening balance")?;

        if self.repo.get_customer(&account_code).await?.is_some() {
            return Err(AppError::CustomerAlreadyExists(account_code));
        }

        let customer = CustomerAccount::new(account_code, name)
            .with_credit_limit(credit_limit)
            .with_balance(opening_balance);
        // Another writer may have opened the same code since the lookup
        if let Err(err) = self.repo.save_customer(&customer).await {
            if is_unique_violation(&err) {
                return Err(AppError::CustomerAlreadyExists(customer.account_code));
            }
            return Err(err.into());
        }

        info!(
            customer = %customer.account_code,
            credit_limit = customer.credit_limit,
            balance = customer.left_over_balance,
            "customer account opened"
        );
        Ok(customer)
    }

    /// Get a customer by account code.
    pub async fn get_customer(&self, account_code: &str) -> Result<CustomerAccount, AppError> {
        self.repo
            .get_customer(account_code)
            .await?
            .ok_or_else(|| AppError::CustomerNotFound(account_code.to_string()))
    }

    /// List all customers.
    pub async fn list_customers(&self) -> Result<Vec<CustomerAccount>, AppError> {
        Ok(self.repo.list_customers().await?)
    }

    /// Add prepaid funds to a customer's wallet.
    pub async fn recharge_wallet(
        &self,
        account_code: &str,
        amount: Cents,
    ) -> Result<CustomerAccount, AppError> {
        if amount <= 0 {
            return Err(AppError::InvalidAmount(
                "Recharge amount must be positive".to_string(),
            ));
        }
        check_amount(amount, "Recharge amount")?;

        let customer = self
            .with_retry("recharge_wallet", account_code, || {
                self.try_recharge_wallet(account_code, amount)
            })
            .await?;

        info!(
            customer = %account_code,
            amount,
            balance = customer.left_over_balance,
            "wallet recharged"
        );
        Ok(customer)
    }

    async fn try_recharge_wallet(
        &self,
        account_code: &str,
        amount: Cents,
    ) -> Result<CustomerAccount, AppError> {
        let mut tx = self.repo.begin().await?;
        let customer = Self::load_customer(&mut tx, account_code).await?;

        let funds = Funds::new(customer.left_over_balance - amount, customer.credit_limit);
        let customer = Self::store_funds(&mut tx, &customer, funds).await?;

        let entry = LedgerEntry::for_recharge(account_code, amount, funds);
        Repository::insert_ledger_entry(&mut tx, &entry).await?;

        tx.commit().await.context("Failed to commit recharge")?;
        Ok(customer)
    }

    /// Replace a customer's remaining line of credit.
    pub async fn set_credit_limit(
        &self,
        account_code: &str,
        credit_limit: Cents,
    ) -> Result<CustomerAccount, AppError> {
        if credit_limit < 0 {
            return Err(AppError::NegativeCreditLimit(credit_limit));
        }
        check_amount(credit_limit, "Credit limit")?;

        let customer = self
            .with_retry("set_credit_limit", account_code, || {
                self.try_set_credit_limit(account_code, credit_limit)
            })
            .await?;

        info!(customer = %account_code, credit_limit, "credit limit changed");
        Ok(customer)
    }

    async fn try_set_credit_limit(
        &self,
        account_code: &str,
        credit_limit: Cents,
    ) -> Result<CustomerAccount, AppError> {
        let mut tx = self.repo.begin().await?;
        let customer = Self::load_customer(&mut tx, account_code).await?;

        let funds = Funds::new(customer.left_over_balance, credit_limit);
        let customer = Self::store_funds(&mut tx, &customer, funds).await?;

        tx.commit().await.context("Failed to commit credit limit")?;
        Ok(customer)
    }

    // ========================
    // Shipment operations
    // ========================

    /// Book a shipment and charge it to the customer's account.
    ///
    /// A charge that the wallet and credit line cannot cover is still booked:
    /// the shipment goes on credit hold and the full amount is added to the
    /// customer's balance.
    pub async fn create_shipment(&self, new: NewShipment) -> Result<ShipmentResult, AppError> {
        if new.total_amt < 0 {
            return Err(AppError::InvalidAmount(
                "Shipment amount cannot be negative".to_string(),
            ));
        }
        check_amount(new.total_amt, "Shipment amount")?;
        let new = NewShipment {
            awb_no: new
                .awb_no
                .map(|awb| awb.trim().to_string())
                .filter(|awb| !awb.is_empty()),
            ..new
        };

        let result = self
            .with_retry("create_shipment", &new.customer_code, || {
                self.try_create_shipment(&new)
            })
            .await?;

        let shipment = &result.shipment;
        if shipment.is_hold {
            warn!(
                awb = %shipment.awb_no,
                customer = %shipment.customer_code,
                amount = shipment.total_amt,
                balance = result.customer.left_over_balance,
                credit = result.customer.credit_limit,
                "shipment booked on hold: credit limit exceeded"
            );
        } else {
            info!(
                awb = %shipment.awb_no,
                customer = %shipment.customer_code,
                amount = shipment.total_amt,
                balance = result.customer.left_over_balance,
                credit = result.customer.credit_limit,
                "shipment booked"
            );
        }
        Ok(result)
    }

    async fn try_create_shipment(&self, new: &NewShipment) -> Result<ShipmentResult, AppError> {
        let mut tx = self.repo.begin().await?;
        let customer = Self::load_customer(&mut tx, &new.customer_code).await?;

        let awb_no = match &new.awb_no {
            Some(awb_no) => {
                if Repository::awb_exists(&mut tx, awb_no).await? {
                    return Err(AppError::AwbAlreadyExists(awb_no.clone()));
                }
                // Keep generated numbers clear of manually issued ones
                if let Some(number) = parse_awb_number(&self.config.awb_prefix, awb_no) {
                    Repository::advance_awb_counter(&mut tx, &self.config.awb_prefix, number)
                        .await?;
                }
                awb_no.clone()
            }
            None => self.generate_awb(&mut tx).await?,
        };

        let settlement = settle_charge(customer.funds(), new.total_amt);

        let mut shipment = Shipment::new(awb_no, customer.account_code.clone(), new.total_amt)
            .with_details(new.details.clone());
        if settlement.hold {
            shipment.place_credit_hold();
        }

        Repository::insert_shipment(&mut tx, &shipment).await?;
        let customer = Self::store_funds(&mut tx, &customer, settlement.funds).await?;
        Repository::insert_ledger_entry(
            &mut tx,
            &LedgerEntry::for_shipment(&shipment, settlement.funds),
        )
        .await?;

        tx.commit().await.context("Failed to commit shipment")?;
        Ok(ShipmentResult { shipment, customer })
    }

    /// Change a booked shipment, re-charging the difference if its amount moved.
    pub async fn update_shipment(
        &self,
        awb_no: &str,
        update: ShipmentUpdate,
    ) -> Result<ShipmentResult, AppError> {
        if let Some(total_amt) = update.total_amt {
            if total_amt < 0 {
                return Err(AppError::InvalidAmount(
                    "Shipment amount cannot be negative".to_string(),
                ));
            }
            check_amount(total_amt, "Shipment amount")?;
        }

        let (result, old_amt) = self
            .with_retry("update_shipment", awb_no, || {
                self.try_update_shipment(awb_no, &update)
            })
            .await?;

        let shipment = &result.shipment;
        info!(
            awb = %shipment.awb_no,
            customer = %shipment.customer_code,
            old_amount = old_amt,
            new_amount = shipment.total_amt,
            on_hold = shipment.is_hold,
            balance = result.customer.left_over_balance,
            credit = result.customer.credit_limit,
            "shipment updated"
        );
        Ok(result)
    }

    async fn try_update_shipment(
        &self,
        awb_no: &str,
        update: &ShipmentUpdate,
    ) -> Result<(ShipmentResult, Cents), AppError> {
        let mut tx = self.repo.begin().await?;
        let mut shipment = Self::load_shipment(&mut tx, awb_no).await?;
        let customer = Self::load_customer(&mut tx, &shipment.customer_code).await?;

        let old_amt = shipment.total_amt;
        let new_amt = update.total_amt.unwrap_or(old_amt);

        let delta = apply_delta(customer.funds(), shipment.is_credit_hold(), old_amt, new_amt);
        if delta.hold {
            shipment.place_credit_hold();
            warn!(
                awb = %shipment.awb_no,
                customer = %shipment.customer_code,
                increase = new_amt - old_amt,
                "shipment moved to hold: credit limit exceeded"
            );
        }

        shipment.total_amt = new_amt;
        update.apply_details(&mut shipment.details);
        shipment.updated_at = Utc::now();

        Repository::update_shipment(&mut tx, &shipment).await?;
        let customer = Self::store_funds(&mut tx, &customer, delta.funds).await?;
        Repository::upsert_shipment_entry(&mut tx, &LedgerEntry::for_shipment(&shipment, delta.funds))
            .await?;

        tx.commit().await.context("Failed to commit shipment update")?;
        Ok((ShipmentResult { shipment, customer }, old_amt))
    }

    /// Cancel a shipment and reverse its charge.
    ///
    /// The shipment row is the proof that the charge is still on the account,
    /// so a second cancellation of the same AWB fails instead of refunding twice.
    pub async fn delete_shipment(&self, awb_no: &str) -> Result<ShipmentResult, AppError> {
        let result = self
            .with_retry("delete_shipment", awb_no, || self.try_delete_shipment(awb_no))
            .await?;

        info!(
            awb = %result.shipment.awb_no,
            customer = %result.shipment.customer_code,
            amount = result.shipment.total_amt,
            balance = result.customer.left_over_balance,
            credit = result.customer.credit_limit,
            "shipment cancelled"
        );
        Ok(result)
    }

    async fn try_delete_shipment(&self, awb_no: &str) -> Result<ShipmentResult, AppError> {
        let mut tx = self.repo.begin().await?;
        let shipment = Self::load_shipment(&mut tx, awb_no).await?;
        let customer = Self::load_customer(&mut tx, &shipment.customer_code).await?;

        let funds = reverse_charge(customer.funds(), shipment.total_amt);

        if !Repository::delete_shipment(&mut tx, awb_no).await? {
            return Err(AppError::ShipmentNotFound(awb_no.to_string()));
        }
        Repository::delete_shipment_entry(&mut tx, awb_no).await?;
        let customer = Self::store_funds(&mut tx, &customer, funds).await?;

        tx.commit().await.context("Failed to commit shipment cancellation")?;
        Ok(ShipmentResult { shipment, customer })
    }

    /// Get a shipment by AWB number.
    pub async fn get_shipment(&self, awb_no: &str) -> Result<Shipment, AppError> {
        self.repo
            .get_shipment(awb_no)
            .await?
            .ok_or_else(|| AppError::ShipmentNotFound(awb_no.to_string()))
    }

    /// List shipments with filters.
    pub async fn list_shipments(&self, filter: ShipmentFilter) -> Result<Vec<Shipment>, AppError> {
        if let Some(code) = &filter.customer {
            self.get_customer(code).await?;
        }

        Ok(self
            .repo
            .list_shipments(filter.customer.as_deref(), filter.on_hold_only, filter.limit)
            .await?)
    }

    // ========================
    // Ledger and reporting
    // ========================

    /// List ledger rows, optionally for one customer.
    pub async fn list_ledger_entries(
        &self,
        account_code: Option<&str>,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        if let Some(code) = account_code {
            self.get_customer(code).await?;
        }
        Ok(self.repo.list_ledger_entries(account_code).await?)
    }

    /// Account position, history and held shipments of a customer.
    pub async fn statement(&self, account_code: &str) -> Result<CustomerStatement, AppError> {
        let customer = self.get_customer(account_code).await?;
        let entries = self.repo.list_ledger_entries(Some(account_code)).await?;
        let held_shipments = self
            .repo
            .list_shipments(Some(account_code), true, None)
            .await?;

        Ok(CustomerStatement::new(customer, entries, held_shipments))
    }

    /// Reconcile accounts, shipments and ledger rows.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let customers = self.repo.list_customers().await?;
        let shipments = self.repo.list_shipments(None, false, None).await?;
        let entries = self.repo.list_ledger_entries(None).await?;

        let report = build_integrity_report(&customers, &shipments, &entries);
        if !report.is_ok() {
            warn!(issues = report.issues.len(), "integrity check found issues");
        }
        Ok(report)
    }

    // ========================
    // Helpers
    // ========================

    /// Run a unit of work, re-running it from scratch when it lost a race.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        key: &str,
        mut unit_of_work: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match unit_of_work().await {
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(operation, key, attempt, error = %err, "retrying after conflicting write");
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) if err.is_retryable() => {
                    warn!(operation, key, attempts = attempt + 1, error = %err, "giving up after repeated conflicts");
                    return Err(match err {
                        AppError::ConcurrentModification(code) => {
                            AppError::ConcurrentModification(code)
                        }
                        _ => AppError::ConcurrentModification(key.to_string()),
                    });
                }
                result => return result,
            }
        }
    }

    /// Issue the next free AWB number for the configured prefix.
    async fn generate_awb(&self, conn: &mut SqliteConnection) -> Result<String, AppError> {
        loop {
            let number = Repository::next_awb_number(conn, &self.config.awb_prefix).await?;
            let awb_no = format_awb(&self.config.awb_prefix, number, self.config.awb_width);
            if !Repository::awb_exists(conn, &awb_no).await? {
                return Ok(awb_no);
            }
            debug!(awb = %awb_no, "skipping AWB number already in use");
        }
    }

    async fn load_customer(
        conn: &mut SqliteConnection,
        account_code: &str,
    ) -> Result<CustomerAccount, AppError> {
        Repository::fetch_customer(conn, account_code)
            .await?
            .ok_or_else(|| AppError::CustomerNotFound(account_code.to_string()))
    }

    async fn load_shipment(
        conn: &mut SqliteConnection,
        awb_no: &str,
    ) -> Result<Shipment, AppError> {
        Repository::fetch_shipment(conn, awb_no)
            .await?
            .ok_or_else(|| AppError::ShipmentNotFound(awb_no.to_string()))
    }

    /// Persist new money fields against the version that was read.
    async fn store_funds(
        conn: &mut SqliteConnection,
        customer: &CustomerAccount,
        funds: Funds,
    ) -> Result<CustomerAccount, AppError> {
        let stored =
            Repository::update_customer_funds(conn, &customer.account_code, funds, customer.version)
                .await?;
        if !stored {
            debug!(
                customer = %customer.account_code,
                version = customer.version,
                "stale customer version"
            );
            return Err(AppError::ConcurrentModification(
                customer.account_code.clone(),
            ));
        }

        let mut updated = customer.with_funds(funds);
        updated.version += 1;
        debug!(
            customer = %updated.account_code,
            balance = %format_cents(funds.balance),
            credit = %format_cents(funds.credit),
            "customer funds stored"
        );
        Ok(updated)
    }
}

/// Reject amounts above the per-operation ceiling.
fn check_amount(amount: Cents, what: &str) -> Result<(), AppError> {
    if amount > MAX_AMOUNT {
        return Err(AppError::InvalidAmount(format!(
            "{} cannot exceed {}",
            what,
            format_cents(MAX_AMOUNT)
        )));
    }
    Ok(())
}
