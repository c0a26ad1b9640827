use anyhow::Result;
use serde::Deserialize;
use std::io::Read;

use crate::application::{AppError, BookingService, NewShipment};
use crate::domain::{parse_cents, ShipmentDetails};

/// Result of an import operation
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub imported: usize,
    /// Bookings accepted but placed on credit hold
    pub held: usize,
    pub skipped: usize,
    pub errors: Vec<ImportError>,
}

/// Error that occurred during import
#[derive(Debug, Clone)]
pub struct ImportError {
    pub line: usize,
    pub field: Option<String>,
    pub error: String,
}

/// Options for import operations
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Validate every row without booking anything
    pub dry_run: bool,
    /// Skip rows whose AWB number is already booked instead of reporting them
    pub skip_duplicates: bool,
}

/// One row of a bulk booking file.
#[derive(Debug, Deserialize)]
struct ShipmentRow {
    customer_code: String,
    amount: String,
    #[serde(default)]
    awb_no: Option<String>,
    #[serde(default)]
    consignee: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    sector: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    pieces: Option<i64>,
    #[serde(default)]
    weight_kg: Option<f64>,
}

/// Importer for booking shipments in bulk
pub struct Importer<'a> {
    service: &'a BookingService,
}

impl<'a> Importer<'a> {
    pub fn new(service: &'a BookingService) -> Self {
        Self { service }
    }

    /// Book shipments from a CSV file with a header row.
    /// Each row is booked on its own; a failing row does not stop the rest.
    pub async fn import_shipments_csv<R: Read>(
        &self,
        reader: R,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut result = ImportResult::default();

        for (line_num, record) in csv_reader.deserialize::<ShipmentRow>().enumerate() {
            let line = line_num + 2; // +2 for header and 0-indexing

            let row = match record {
                Ok(row) => row,
                Err(e) => {
                    result.errors.push(ImportError {
                        line,
                        field: None,
                        error: format!("CSV parse error: {}", e),
                    });
                    continue;
                }
            };

            let total_amt = match parse_cents(&row.amount) {
                Ok(amount) if amount >= 0 => amount,
                Ok(_) => {
                    result.errors.push(ImportError {
                        line,
                        field: Some("amount".to_string()),
                        error: "Amount cannot be negative".to_string(),
                    });
                    continue;
                }
                Err(e) => {
                    result.errors.push(ImportError {
                        line,
                        field: Some("amount".to_string()),
                        error: format!("Invalid amount: {}", e),
                    });
                    continue;
                }
            };

            let awb_no = non_empty(row.awb_no);
            let mut new = NewShipment::new(row.customer_code.trim(), total_amt).with_details(
                ShipmentDetails {
                    consignee: non_empty(row.consignee),
                    origin: non_empty(row.origin),
                    destination: non_empty(row.destination),
                    sector: non_empty(row.sector),
                    service: non_empty(row.service),
                    pieces: row.pieces.unwrap_or(0),
                    weight_kg: row.weight_kg.unwrap_or(0.0),
                },
            );
            if let Some(awb) = &awb_no {
                new = new.with_awb(awb.clone());
            }

            if options.dry_run {
                if let Err(e) = self.service.get_customer(&new.customer_code).await {
                    result.errors.push(ImportError {
                        line,
                        field: Some("customer_code".to_string()),
                        error: e.to_string(),
                    });
                    continue;
                }
                if let Some(awb) = &awb_no {
                    match self.service.get_shipment(awb).await {
                        Err(AppError::ShipmentNotFound(_)) => {}
                        Ok(_) if options.skip_duplicates => {
                            result.skipped += 1;
                            continue;
                        }
                        Ok(_) => {
                            result.errors.push(ImportError {
                                line,
                                field: Some("awb_no".to_string()),
                                error: AppError::AwbAlreadyExists(awb.clone()).to_string(),
                            });
                            continue;
                        }
                        Err(e) => {
                            result.errors.push(ImportError {
                                line,
                                field: Some("awb_no".to_string()),
                                error: e.to_string(),
                            });
                            continue;
                        }
                    }
                }
                result.imported += 1;
                continue;
            }

            match self.service.create_shipment(new).await {
                Ok(booked) => {
                    result.imported += 1;
                    if booked.shipment.is_hold {
                        result.held += 1;
                    }
                }
                Err(AppError::AwbAlreadyExists(_)) if options.skip_duplicates => {
                    result.skipped += 1;
                }
                Err(e) => {
                    let field = match &e {
                        AppError::CustomerNotFound(_) => Some("customer_code".to_string()),
                        AppError::AwbAlreadyExists(_) => Some("awb_no".to_string()),
                        _ => None,
                    };
                    result.errors.push(ImportError {
                        line,
                        field,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(result)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
