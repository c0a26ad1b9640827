mod credit;
mod customer;
mod ledger;
mod money;
mod shipment;

pub use credit::*;
pub use customer::*;
pub use ledger::*;
pub use money::*;
pub use shipment::*;
