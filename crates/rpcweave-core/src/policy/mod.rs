//! Policy engine — reliability wrappers around transport calls.
//!
//! The policy stack (applied in order):
//! ```text
//! Request → [Dedupe] → [RetryPolicy] → [Batch] → [Fallback] → [Transport]
//! ```

pub mod retry;

pub use retry::{default_should_retry, RetryConfig, RetryDelay, RetryPolicy};
