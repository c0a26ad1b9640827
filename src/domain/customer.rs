use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, Funds};

/// A customer account billed for shipments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerAccount {
    /// Unique account code used by bookings
    pub account_code: String,
    pub name: String,
    /// Negative = unspent wallet funds, zero or positive = amount owed
    pub left_over_balance: Cents,
    /// Remaining line of credit once the wallet is exhausted
    pub credit_limit: Cents,
    /// Incremented on every persisted change to the money fields
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl CustomerAccount {
    pub fn new(account_code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            account_code: account_code.into(),
            name: name.into(),
            left_over_balance: 0,
            credit_limit: 0,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_credit_limit(mut self, credit_limit: Cents) -> Self {
        self.credit_limit = credit_limit;
        self
    }

    pub fn with_balance(mut self, balance: Cents) -> Self {
        self.left_over_balance = balance;
        self
    }

    pub fn funds(&self) -> Funds {
        Funds::new(self.left_over_balance, self.credit_limit)
    }

    /// Returns a copy carrying new money fields. The version is bumped by the
    /// repository when the change is persisted.
    pub fn with_funds(&self, funds: Funds) -> Self {
        Self {
            left_over_balance: funds.balance,
            credit_limit: funds.credit,
            ..self.clone()
        }
    }
}
