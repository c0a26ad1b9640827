use thiserror::Error;

use crate::domain::Cents;
use crate::storage::is_contention;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Customer already exists: {0}")]
    CustomerAlreadyExists(String),

    #[error("Shipment not found: {0}")]
    ShipmentNotFound(String),

    #[error("AWB number already in use: {0}")]
    AwbAlreadyExists(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Credit limit cannot be negative: {0}")]
    NegativeCreditLimit(Cents),

    #[error("Concurrent modification of {0}, please retry")]
    ConcurrentModification(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    /// Returns true if the whole unit of work can be run again from a fresh read.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::ConcurrentModification(_) => true,
            AppError::Database(err) => is_contention(err),
            _ => false,
        }
    }
}
