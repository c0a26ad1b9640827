// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use tempfile::TempDir;
use waybill::application::{BookingService, NewShipment, ShipmentResult};
use waybill::domain::{Cents, CustomerAccount};

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(BookingService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = BookingService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Path of the database file inside a test directory
pub fn db_path(temp_dir: &TempDir) -> String {
    temp_dir.path().join("test.db").to_str().unwrap().to_string()
}

/// Open a customer account with the given balance and credit limit
pub async fn customer(
    service: &BookingService,
    code: &str,
    balance: Cents,
    credit_limit: Cents,
) -> Result<CustomerAccount> {
    Ok(service
        .create_customer(code.into(), format!("{} Logistics", code), credit_limit, balance)
        .await?)
}

/// Book a shipment with a generated AWB number
pub async fn book(service: &BookingService, code: &str, amount: Cents) -> Result<ShipmentResult> {
    Ok(service.create_shipment(NewShipment::new(code, amount)).await?)
}

/// Assert the stored money fields of a customer
pub async fn assert_funds(service: &BookingService, code: &str, balance: Cents, credit: Cents) {
    let customer = service.get_customer(code).await.unwrap();
    assert_eq!(
        (customer.left_over_balance, customer.credit_limit),
        (balance, credit),
        "balance/credit of {}",
        code
    );
}
