//! Bar data validation
//!
//! Validates incoming OHLCV bars for consistency before storage or
//! distribution. The backfill and real-time paths both go through
//! [`validate_bar`], so they obey the same invariants.

mod validator;

#[cfg(test)]
mod tests;

pub use validator::{validate_bar, ValidationError, ValidationResult};
