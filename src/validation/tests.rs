//! Tests for bar data validation

use super::*;
use crate::schema::Bar;
use chrono::Utc;

/// Helper to create a valid test bar
fn create_valid_bar() -> Bar {
    Bar::new("AAPL", Utc::now(), 10.0, 10.5, 9.8, 10.2, 1500)
}

#[test]
fn valid_bar_passes_validation() {
    let bar = create_valid_bar();
    assert!(validate_bar(&bar).is_ok(), "valid bar should pass");
}

#[test]
fn high_below_open_fails() {
    // {o: 10, h: 9, l: 8, c: 9.5, v: 100} -> high < open
    let bar = Bar::new("XYZ", Utc::now(), 10.0, 9.0, 8.0, 9.5, 100);
    assert!(matches!(
        validate_bar(&bar),
        Err(ValidationError::HighBelowRange { .. })
    ));
}

#[test]
fn high_below_close_fails() {
    let bar = Bar::new("XYZ", Utc::now(), 9.0, 9.4, 8.0, 9.5, 100);
    assert!(matches!(
        validate_bar(&bar),
        Err(ValidationError::HighBelowRange { .. })
    ));
}

#[test]
fn low_above_open_fails() {
    let bar = Bar::new("XYZ", Utc::now(), 9.0, 10.0, 9.5, 9.8, 100);
    assert!(matches!(
        validate_bar(&bar),
        Err(ValidationError::LowAboveRange { .. })
    ));
}

#[test]
fn low_above_close_fails() {
    let bar = Bar::new("XYZ", Utc::now(), 10.0, 10.0, 9.7, 9.5, 100);
    assert!(matches!(
        validate_bar(&bar),
        Err(ValidationError::LowAboveRange { .. })
    ));
}

#[test]
fn negative_volume_fails() {
    let mut bar = create_valid_bar();
    bar.volume = -1;
    assert!(matches!(
        validate_bar(&bar),
        Err(ValidationError::NegativeVolume { volume: -1 })
    ));
}

#[test]
fn zero_volume_passes() {
    let mut bar = create_valid_bar();
    bar.volume = 0;
    assert!(validate_bar(&bar).is_ok());
}

#[test]
fn nan_price_fails() {
    let mut bar = create_valid_bar();
    bar.close = f64::NAN;
    assert!(matches!(
        validate_bar(&bar),
        Err(ValidationError::NonFinite { field: "close", .. })
    ));
}

#[test]
fn infinite_price_fails() {
    let mut bar = create_valid_bar();
    bar.high = f64::INFINITY;
    assert!(matches!(
        validate_bar(&bar),
        Err(ValidationError::NonFinite { field: "high", .. })
    ));
}

#[test]
fn flat_bar_passes() {
    // open == high == low == close is consistent
    let bar = Bar::new("FLAT", Utc::now(), 10.0, 10.0, 10.0, 10.0, 0);
    assert!(validate_bar(&bar).is_ok());
}

#[test]
fn validation_has_no_side_effects() {
    let bar = create_valid_bar();
    let before = bar.clone();
    let _ = validate_bar(&bar);
    assert_eq!(bar, before);
}
