// Application layer - use cases and orchestration over the repository.
// Every money-moving use case runs as one database transaction.

pub mod config;
pub mod error;
pub mod reporting;
pub mod service;

pub use config::*;
pub use error::*;
pub use reporting::*;
pub use service::*;
