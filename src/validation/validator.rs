//! OHLCV consistency checks
//!
//! A pure function over a single bar: no side effects, no I/O. A bar that
//! fails validation must never reach the store.

use thiserror::Error;

use crate::schema::Bar;

/// Validation errors for bar data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A price field is NaN or infinite
    #[error("{field} is not a finite number: {value}")]
    NonFinite { field: &'static str, value: f64 },

    /// High is below the open or close
    #[error("high {high} is below max(open, close) = {limit}")]
    HighBelowRange { high: f64, limit: f64 },

    /// Low is above the open or close
    #[error("low {low} is above min(open, close) = {limit}")]
    LowAboveRange { low: f64, limit: f64 },

    /// Volume is negative
    #[error("volume must be non-negative, got {volume}")]
    NegativeVolume { volume: i64 },
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate the OHLCV consistency of a single bar.
///
/// Enforced invariants:
/// - all four price fields are finite
/// - `high >= max(open, close)`
/// - `low <= min(open, close)`
/// - `volume >= 0`
pub fn validate_bar(bar: &Bar) -> ValidationResult<()> {
    for (field, value) in [
        ("open", bar.open),
        ("high", bar.high),
        ("low", bar.low),
        ("close", bar.close),
    ] {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { field, value });
        }
    }

    let upper = bar.open.max(bar.close);
    if bar.high < upper {
        return Err(ValidationError::HighBelowRange {
            high: bar.high,
            limit: upper,
        });
    }

    let lower = bar.open.min(bar.close);
    if bar.low > lower {
        return Err(ValidationError::LowAboveRange {
            low: bar.low,
            limit: lower,
        });
    }

    if bar.volume < 0 {
        return Err(ValidationError::NegativeVolume { volume: bar.volume });
    }

    Ok(())
}
