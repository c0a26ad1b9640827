use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, CustomerAccount, Funds, Shipment};

pub type LedgerEntryId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    /// Charge for a booked shipment, one live row per AWB
    Shipment,
    /// Wallet top-up paid in by the customer
    Recharge,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryKind::Shipment => "shipment",
            LedgerEntryKind::Recharge => "recharge",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "shipment" => Some(LedgerEntryKind::Shipment),
            "recharge" => Some(LedgerEntryKind::Recharge),
            _ => None,
        }
    }
}

impl std::fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit row recording a financial event on a customer account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub customer_code: String,
    pub awb_no: Option<String>,
    pub kind: LedgerEntryKind,
    pub amount: Cents,
    /// Account balance right after the event
    pub balance_after: Cents,
    /// Credit limit right after the event
    pub credit_after: Cents,
    pub recorded_at: DateTime<Utc>,
    pub destination: Option<String>,
    pub sector: Option<String>,
    pub pieces: i64,
    pub weight_kg: f64,
}

impl LedgerEntry {
    /// Ledger row for a shipment charge, echoing the booking details.
    pub fn for_shipment(shipment: &Shipment, funds: Funds) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_code: shipment.customer_code.clone(),
            awb_no: Some(shipment.awb_no.clone()),
            kind: LedgerEntryKind::Shipment,
            amount: shipment.total_amt,
            balance_after: funds.balance,
            credit_after: funds.credit,
            recorded_at: Utc::now(),
            destination: shipment.details.destination.clone(),
            sector: shipment.details.sector.clone(),
            pieces: shipment.details.pieces,
            weight_kg: shipment.details.weight_kg,
        }
    }

    /// Ledger row for a wallet top-up.
    pub fn for_recharge(customer_code: &str, amount: Cents, funds: Funds) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_code: customer_code.to_string(),
            awb_no: None,
            kind: LedgerEntryKind::Recharge,
            amount,
            balance_after: funds.balance,
            credit_after: funds.credit,
            recorded_at: Utc::now(),
            destination: None,
            sector: None,
            pieces: 0,
            weight_kg: 0.0,
        }
    }
}

/// Result of reconciling accounts, shipments and ledger rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub customer_count: usize,
    pub shipment_count: usize,
    pub entry_count: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    NegativeCreditLimit {
        customer_code: String,
        credit_limit: Cents,
    },
    UnknownCustomer {
        awb_no: String,
        customer_code: String,
    },
    MissingLedgerEntry {
        awb_no: String,
    },
    OrphanLedgerEntry {
        entry_id: LedgerEntryId,
        awb_no: String,
    },
    AmountMismatch {
        awb_no: String,
        shipment_amount: Cents,
        ledger_amount: Cents,
    },
    HoldWithoutReason {
        awb_no: String,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::NegativeCreditLimit {
                customer_code,
                credit_limit,
            } => write!(
                f,
                "customer {} has negative credit limit ({} cents)",
                customer_code, credit_limit
            ),
            IntegrityIssue::UnknownCustomer {
                awb_no,
                customer_code,
            } => write!(
                f,
                "shipment {} references unknown customer {}",
                awb_no, customer_code
            ),
            IntegrityIssue::MissingLedgerEntry { awb_no } => {
                write!(f, "shipment {} has no ledger entry", awb_no)
            }
            IntegrityIssue::OrphanLedgerEntry { entry_id, awb_no } => write!(
                f,
                "ledger entry {} references missing shipment {}",
                entry_id, awb_no
            ),
            IntegrityIssue::AmountMismatch {
                awb_no,
                shipment_amount,
                ledger_amount,
            } => write!(
                f,
                "shipment {} charges {} cents but its ledger entry records {}",
                awb_no, shipment_amount, ledger_amount
            ),
            IntegrityIssue::HoldWithoutReason { awb_no } => {
                write!(f, "shipment {} is on hold without a reason", awb_no)
            }
        }
    }
}

/// Cross-check customers, shipments and ledger rows.
pub fn build_integrity_report(
    customers: &[CustomerAccount],
    shipments: &[Shipment],
    entries: &[LedgerEntry],
) -> IntegrityReport {
    use std::collections::{HashMap, HashSet};

    let mut issues = Vec::new();

    for customer in customers {
        if customer.credit_limit < 0 {
            issues.push(IntegrityIssue::NegativeCreditLimit {
                customer_code: customer.account_code.clone(),
                credit_limit: customer.credit_limit,
            });
        }
    }

    let known_customers: HashSet<&str> =
        customers.iter().map(|c| c.account_code.as_str()).collect();

    let shipment_entries: HashMap<&str, &LedgerEntry> = entries
        .iter()
        .filter(|e| e.kind == LedgerEntryKind::Shipment)
        .filter_map(|e| e.awb_no.as_deref().map(|awb| (awb, e)))
        .collect();

    for shipment in shipments {
        if !known_customers.contains(shipment.customer_code.as_str()) {
            issues.push(IntegrityIssue::UnknownCustomer {
                awb_no: shipment.awb_no.clone(),
                customer_code: shipment.customer_code.clone(),
            });
        }

        match shipment_entries.get(shipment.awb_no.as_str()) {
            None => issues.push(IntegrityIssue::MissingLedgerEntry {
                awb_no: shipment.awb_no.clone(),
            }),
            Some(entry) if entry.amount != shipment.total_amt => {
                issues.push(IntegrityIssue::AmountMismatch {
                    awb_no: shipment.awb_no.clone(),
                    shipment_amount: shipment.total_amt,
                    ledger_amount: entry.amount,
                })
            }
            Some(_) => {}
        }

        if shipment.is_hold && shipment.hold_reason.is_none() {
            issues.push(IntegrityIssue::HoldWithoutReason {
                awb_no: shipment.awb_no.clone(),
            });
        }
    }

    let live_awbs: HashSet<&str> = shipments.iter().map(|s| s.awb_no.as_str()).collect();
    for (awb, entry) in &shipment_entries {
        if !live_awbs.contains(awb) {
            issues.push(IntegrityIssue::OrphanLedgerEntry {
                entry_id: entry.id,
                awb_no: awb.to_string(),
            });
        }
    }

    IntegrityReport {
        customer_count: customers.len(),
        shipment_count: shipments.len(),
        entry_count: entries.len(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(code: &str) -> CustomerAccount {
        CustomerAccount::new(code, code).with_credit_limit(100000)
    }

    #[test]
    fn test_entry_kind_roundtrip() {
        for kind in [LedgerEntryKind::Shipment, LedgerEntryKind::Recharge] {
            assert_eq!(LedgerEntryKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(LedgerEntryKind::from_str("refund"), None);
    }

    #[test]
    fn test_shipment_entry_echoes_details() {
        let mut shipment = Shipment::new("WB00000001".into(), "ACME".into(), 50000);
        shipment.details.destination = Some("DXB".into());
        shipment.details.pieces = 3;

        let entry = LedgerEntry::for_shipment(&shipment, Funds::new(50000, 50000));
        assert_eq!(entry.awb_no.as_deref(), Some("WB00000001"));
        assert_eq!(entry.kind, LedgerEntryKind::Shipment);
        assert_eq!(entry.amount, 50000);
        assert_eq!(entry.balance_after, 50000);
        assert_eq!(entry.destination.as_deref(), Some("DXB"));
        assert_eq!(entry.pieces, 3);
    }

    #[test]
    fn test_consistent_data_has_no_issues() {
        let shipment = Shipment::new("WB00000001".into(), "ACME".into(), 50000);
        let entry = LedgerEntry::for_shipment(&shipment, Funds::new(50000, 50000));
        let recharge = LedgerEntry::for_recharge("ACME", 10000, Funds::new(40000, 50000));

        let report = build_integrity_report(&[customer("ACME")], &[shipment], &[entry, recharge]);
        assert!(report.is_ok(), "unexpected issues: {:?}", report.issues);
        assert_eq!(report.entry_count, 2);
    }

    #[test]
    fn test_detects_mismatches_and_orphans() {
        let mut held = Shipment::new("WB00000001".into(), "ACME".into(), 50000);
        held.is_hold = true;
        let stale_entry = LedgerEntry::for_shipment(&held, Funds::default());
        held.total_amt = 70000;

        let missing = Shipment::new("WB00000002".into(), "GHOST".into(), 1000);
        let deleted = Shipment::new("WB00000003".into(), "ACME".into(), 1000);
        let orphan = LedgerEntry::for_shipment(&deleted, Funds::default());

        let mut broke = customer("ACME");
        broke.credit_limit = -1;

        let report =
            build_integrity_report(&[broke], &[held, missing], &[stale_entry, orphan.clone()]);

        assert!(report.issues.contains(&IntegrityIssue::NegativeCreditLimit {
            customer_code: "ACME".into(),
            credit_limit: -1,
        }));
        assert!(report.issues.contains(&IntegrityIssue::AmountMismatch {
            awb_no: "WB00000001".into(),
            shipment_amount: 70000,
            ledger_amount: 50000,
        }));
        assert!(report.issues.contains(&IntegrityIssue::HoldWithoutReason {
            awb_no: "WB00000001".into(),
        }));
        assert!(report.issues.contains(&IntegrityIssue::UnknownCustomer {
            awb_no: "WB00000002".into(),
            customer_code: "GHOST".into(),
        }));
        assert!(report.issues.contains(&IntegrityIssue::MissingLedgerEntry {
            awb_no: "WB00000002".into(),
        }));
        assert!(report.issues.contains(&IntegrityIssue::OrphanLedgerEntry {
            entry_id: orphan.id,
            awb_no: "WB00000003".into(),
        }));
        assert_eq!(report.issues.len(), 6);
    }
}
