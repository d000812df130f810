//! Outbound delivery of messages to their routed endpoints, and manual retries of
//! recorded attempts.

pub mod config;
pub mod dispatch;
pub mod payload;
pub mod retry;
pub mod status;

pub use config::DispatchConfig;
pub use dispatch::{DispatchError, DispatchSummary, Dispatcher, HttpDispatcher};
pub use retry::{RetryCoordinator, RetryError, RetryOutcome};
