mod repository;

pub use repository::*;

/// SQL migration for customers, shipments and the account ledger
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for AWB sequence counters
pub const MIGRATION_002_AWB_COUNTERS: &str = include_str!("migrations/002_awb_counters.sql");
