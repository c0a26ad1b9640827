use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, CREDIT_LIMIT_EXCEEDED};

/// Booking details carried on a shipment and echoed into its ledger row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentDetails {
    pub consignee: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub sector: Option<String>,
    pub service: Option<String>,
    pub pieces: i64,
    pub weight_kg: f64,
}

/// A booked shipment, identified by its air waybill number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub awb_no: String,
    pub customer_code: String,
    /// Charge applied to the customer's account for this shipment
    pub total_amt: Cents,
    pub is_hold: bool,
    pub hold_reason: Option<String>,
    pub details: ShipmentDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    pub fn new(awb_no: String, customer_code: String, total_amt: Cents) -> Self {
        let now = Utc::now();
        Self {
            awb_no,
            customer_code,
            total_amt,
            is_hold: false,
            hold_reason: None,
            details: ShipmentDetails::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_details(mut self, details: ShipmentDetails) -> Self {
        self.details = details;
        self
    }

    /// Put the shipment on hold because its charge could not be funded.
    pub fn place_credit_hold(&mut self) {
        self.is_hold = true;
        self.hold_reason = Some(CREDIT_LIMIT_EXCEEDED.to_string());
    }

    /// True when the shipment is held for an unfunded charge.
    pub fn is_credit_hold(&self) -> bool {
        self.is_hold && self.hold_reason.as_deref() == Some(CREDIT_LIMIT_EXCEEDED)
    }
}

/// Build an AWB number from a prefix and a sequence value, zero-padded to `width` digits.
/// Example: ("WB", 42, 8) -> "WB00000042"
pub fn format_awb(prefix: &str, number: i64, width: usize) -> String {
    format!("{}{:0width$}", prefix, number, width = width)
}

/// Extract the sequence value from an AWB number carrying `prefix`.
/// Returns None for numbers issued under another prefix or supplied free-form.
pub fn parse_awb_number(prefix: &str, awb_no: &str) -> Option<i64> {
    let digits = awb_no.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
