use serde::{Deserialize, Serialize};

use crate::domain::{Cents, CustomerAccount, LedgerEntry, Shipment};

/// Account position and history for one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerStatement {
    pub customer: CustomerAccount,
    /// Prepaid funds still available
    pub wallet: Cents,
    /// Amount owed against the credit line
    pub owed: Cents,
    /// Credit line still available
    pub available_credit: Cents,
    /// Total of all outstanding charges on held shipments
    pub held_amount: Cents,
    pub entries: Vec<LedgerEntry>,
    pub held_shipments: Vec<Shipment>,
}

impl CustomerStatement {
    pub fn new(
        customer: CustomerAccount,
        entries: Vec<LedgerEntry>,
        held_shipments: Vec<Shipment>,
    ) -> Self {
        let funds = customer.funds();
        let held_amount = held_shipments.iter().map(|s| s.total_amt).sum();

        Self {
            wallet: funds.wallet(),
            owed: funds.owed(),
            available_credit: funds.credit,
            held_amount,
            customer,
            entries,
            held_shipments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_splits_balance() {
        let customer = CustomerAccount::new("ACME", "Acme").with_balance(-2500).with_credit_limit(10000);
        let mut held = Shipment::new("WB00000001".into(), "ACME".into(), 4000);
        held.place_credit_hold();

        let statement = CustomerStatement::new(customer, Vec::new(), vec![held]);
        assert_eq!(statement.wallet, 2500);
        assert_eq!(statement.owed, 0);
        assert_eq!(statement.available_credit, 10000);
        assert_eq!(statement.held_amount, 4000);
    }
}
