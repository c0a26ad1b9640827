use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::{BookingService, ShipmentFilter};
use crate::domain::{CustomerAccount, LedgerEntry, Shipment};

/// Database snapshot for full export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub customers: Vec<CustomerAccount>,
    pub shipments: Vec<Shipment>,
    pub ledger: Vec<LedgerEntry>,
}

/// Exporter for writing accounts, bookings and ledger rows out
pub struct Exporter<'a> {
    service: &'a BookingService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a BookingService) -> Self {
        Self { service }
    }

    /// Export customer balances to CSV format
    pub async fn export_customers_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let customers = self.service.list_customers().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "account_code",
            "name",
            "left_over_balance",
            "credit_limit",
            "created_at",
        ])?;

        for customer in &customers {
            csv_writer.write_record([
                customer.account_code.clone(),
                customer.name.clone(),
                customer.left_over_balance.to_string(),
                customer.credit_limit.to_string(),
                customer.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(customers.len())
    }

    /// Export shipments to CSV format
    pub async fn export_shipments_csv<W: Write>(
        &self,
        writer: W,
        customer: Option<&str>,
    ) -> Result<usize> {
        let shipments = self
            .service
            .list_shipments(ShipmentFilter {
                customer: customer.map(str::to_string),
                ..ShipmentFilter::default()
            })
            .await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "awb_no",
            "customer_code",
            "total_amt",
            "is_hold",
            "hold_reason",
            "consignee",
            "origin",
            "destination",
            "sector",
            "service",
            "pieces",
            "weight_kg",
            "created_at",
        ])?;

        for shipment in &shipments {
            let details = &shipment.details;
            csv_writer.write_record([
                shipment.awb_no.clone(),
                shipment.customer_code.clone(),
                shipment.total_amt.to_string(),
                shipment.is_hold.to_string(),
                shipment.hold_reason.clone().unwrap_or_default(),
                details.consignee.clone().unwrap_or_default(),
                details.origin.clone().unwrap_or_default(),
                details.destination.clone().unwrap_or_default(),
                details.sector.clone().unwrap_or_default(),
                details.service.clone().unwrap_or_default(),
                details.pieces.to_string(),
                details.weight_kg.to_string(),
                shipment.created_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(shipments.len())
    }

    /// Export the account ledger to CSV format
    pub async fn export_ledger_csv<W: Write>(
        &self,
        writer: W,
        customer: Option<&str>,
    ) -> Result<usize> {
        let entries = self.service.list_ledger_entries(customer).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "recorded_at",
            "customer_code",
            "kind",
            "awb_no",
            "amount",
            "balance_after",
            "credit_after",
            "destination",
            "sector",
            "pieces",
            "weight_kg",
        ])?;

        for entry in &entries {
            csv_writer.write_record([
                entry.id.to_string(),
                entry.recorded_at.to_rfc3339(),
                entry.customer_code.clone(),
                entry.kind.as_str().to_string(),
                entry.awb_no.clone().unwrap_or_default(),
                entry.amount.to_string(),
                entry.balance_after.to_string(),
                entry.credit_after.to_string(),
                entry.destination.clone().unwrap_or_default(),
                entry.sector.clone().unwrap_or_default(),
                entry.pieces.to_string(),
                entry.weight_kg.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(entries.len())
    }

    /// Export full database as JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<Snapshot> {
        let customers = self.service.list_customers().await?;
        let shipments = self
            .service
            .list_shipments(ShipmentFilter::default())
            .await?;
        let ledger = self.service.list_ledger_entries(None).await?;

        let snapshot = Snapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            customers,
            shipments,
            ledger,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
