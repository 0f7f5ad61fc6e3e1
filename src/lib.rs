pub mod aggregator;
pub mod config;
pub mod export;
pub mod generator;
pub mod models;
pub mod oracle;
pub mod pricing;
pub mod replay;
pub mod traversal;
pub mod utils;

// Re-export commonly used types
pub use aggregator::ResultAggregator;
pub use config::AppConfig;
pub use export::ExportBundle;
pub use oracle::{Oracle, OracleError, OracleState};
pub use traversal::{TraversalController, TraversalEnd, TraversalOptions, TraversalOutcome};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
