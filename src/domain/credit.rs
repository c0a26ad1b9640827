//! Wallet and credit-line arithmetic for customer accounts.
//!
//! A customer's `balance` is negative while they hold prepaid wallet funds and
//! zero or positive once they owe money against their credit line. Charges are
//! funded from the wallet first and from the credit line for the remainder.
//! Nothing here fails: a charge that cannot be funded is reported as data and
//! the caller decides what to do with it (shipments are put on hold).

use super::Cents;

/// Hold reason recorded on shipments whose charge could not be funded.
pub const CREDIT_LIMIT_EXCEEDED: &str = "Credit Limit Exceeded";

/// Snapshot of the two money fields of a customer account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Funds {
    /// Negative = wallet funds available, positive = amount owed.
    pub balance: Cents,
    /// Remaining line of credit. Never negative.
    pub credit: Cents,
}

impl Funds {
    pub fn new(balance: Cents, credit: Cents) -> Self {
        Self { balance, credit }
    }

    /// Prepaid funds available, zero when the customer owes money.
    pub fn wallet(&self) -> Cents {
        if self.balance < 0 { -self.balance } else { 0 }
    }

    /// Amount currently owed against the credit line.
    pub fn owed(&self) -> Cents {
        self.balance.max(0)
    }

    /// Total amount that a new charge could draw on.
    pub fn spendable(&self) -> Cents {
        self.wallet() + self.credit
    }
}

/// Result of trying to fund a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    Funded(Funds),
    Insufficient,
}

impl Charge {
    pub fn is_insufficient(&self) -> bool {
        matches!(self, Charge::Insufficient)
    }
}

/// Outcome of booking a charge under the hold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub funds: Funds,
    /// The charge was recorded as outstanding without being funded.
    pub hold: bool,
}

/// Outcome of re-pricing a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delta {
    pub funds: Funds,
    /// The shipment must now be placed on credit hold.
    pub hold: bool,
}

/// Try to fund `amount` from the wallet and then the credit line.
///
/// Returns `Charge::Insufficient` without touching anything when the credit
/// line cannot cover what the wallet does not.
pub fn apply_charge(funds: Funds, amount: Cents) -> Charge {
    if funds.balance < 0 {
        let wallet = -funds.balance;
        if wallet >= amount {
            return Charge::Funded(Funds::new(funds.balance + amount, funds.credit));
        }

        let credit_needed = amount - wallet;
        if funds.credit < credit_needed {
            return Charge::Insufficient;
        }
        Charge::Funded(Funds::new(0, funds.credit - credit_needed))
    } else {
        if funds.credit < amount {
            return Charge::Insufficient;
        }
        Charge::Funded(Funds::new(
            funds.balance + amount,
            funds.credit - amount,
        ))
    }
}

/// Book a charge, accepting it as outstanding when it cannot be funded.
///
/// An unfunded charge still increases the balance by the full amount so the
/// ledger stays additive; the caller places the shipment on hold.
pub fn settle_charge(funds: Funds, amount: Cents) -> Settlement {
    match apply_charge(funds, amount) {
        Charge::Funded(funds) => Settlement { funds, hold: false },
        Charge::Insufficient => Settlement {
            funds: Funds::new(funds.balance + amount, funds.credit),
            hold: true,
        },
    }
}

/// Undo a shipment charge of `amount` on cancellation.
///
/// The balance is always rolled back in full. Credit is restored only for the
/// part of the balance that is still owed afterwards, so a charge that was
/// partly wallet-funded never over-credits the account.
pub fn reverse_charge(funds: Funds, amount: Cents) -> Funds {
    let mut balance = funds.balance - amount;
    let mut credit = funds.credit;

    if balance > 0 {
        let restore = amount.min(balance);
        credit += restore;
        balance -= restore;
    }

    Funds::new(balance, credit)
}

/// Re-price a shipment from `old_amt` to `new_amt`.
///
/// Refunds restore credit unless the shipment sits on credit hold. Increases
/// on a held shipment accumulate without a credit check; otherwise they are
/// funded like a new charge and flip the shipment to hold when they cannot be.
pub fn apply_delta(funds: Funds, on_credit_hold: bool, old_amt: Cents, new_amt: Cents) -> Delta {
    let diff = new_amt - old_amt;

    if diff == 0 {
        return Delta { funds, hold: false };
    }

    if diff < 0 {
        let refund = -diff;
        let credit = if on_credit_hold {
            funds.credit
        } else {
            funds.credit + refund
        };
        return Delta {
            funds: Funds::new(funds.balance - refund, credit),
            hold: false,
        };
    }

    if on_credit_hold {
        return Delta {
            funds: Funds::new(funds.balance + diff, funds.credit),
            hold: false,
        };
    }

    let settlement = settle_charge(funds, diff);
    Delta {
        funds: settlement.funds,
        hold: settlement.hold,
    }
}
