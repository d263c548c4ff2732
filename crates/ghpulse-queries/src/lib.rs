//!
//! Stored SQL queries, their webhook subscribers, and the runner which periodically executes
//! every query and delivers the rows to each subscriber
//!
pub mod engine;
pub mod error;
pub mod notify;
pub mod queries;
pub mod runner;
pub mod subscriptions;
pub mod table;

pub use error::{QueryError, QueryResult};
