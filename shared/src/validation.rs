//! Validation utilities for the Lab Consumables Management Platform
//!
//! Quantity rounding and tolerance rules live here because every
//! component that touches a quantity must apply the same ones, or ledger
//! sums stop reconciling with balances.

use rust_decimal::Decimal;

/// Tolerance for quantity equality after rounding (1e-8)
pub fn quantity_epsilon() -> Decimal {
    Decimal::new(1, 8)
}

/// Tolerance for container whole-quantity moves (1e-4)
pub fn container_move_tolerance() -> Decimal {
    Decimal::new(1, 4)
}

/// Round a quantity to the 2 decimal places used everywhere in the system
pub fn round_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp(2)
}

/// Epsilon-tolerant equality between two quantities
pub fn quantities_equal(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    let diff = if a >= b { a - b } else { b - a };
    diff <= tolerance
}

/// Validate a quantity is strictly positive
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate a signed adjustment delta is non-zero
pub fn validate_nonzero_delta(delta: Decimal) -> Result<(), &'static str> {
    if delta == Decimal::ZERO {
        return Err("Adjustment delta cannot be zero");
    }
    Ok(())
}

/// Validate unit code format (1-16 lowercase alphanumeric, may contain '_')
pub fn validate_unit_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() {
        return Err("Unit code cannot be empty");
    }
    if code.len() > 16 {
        return Err("Unit code must be at most 16 characters");
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err("Unit code must be lowercase alphanumeric");
    }
    Ok(())
}

/// Validate a batch number is present and printable
pub fn validate_batch_number(batch: &str) -> Result<(), &'static str> {
    let trimmed = batch.trim();
    if trimmed.is_empty() {
        return Err("Batch number cannot be empty");
    }
    if trimmed.len() > 64 {
        return Err("Batch number must be at most 64 characters");
    }
    Ok(())
}

/// Validate container sub-quantities sum to the received total
pub fn validate_container_split(total: Decimal, parts: &[Decimal]) -> Result<(), &'static str> {
    if parts.iter().any(|p| *p <= Decimal::ZERO) {
        return Err("Container quantities must be positive");
    }
    let sum: Decimal = parts.iter().sum();
    if !quantities_equal(sum, total, container_move_tolerance()) {
        return Err("Container quantities must sum to the received total");
    }
    Ok(())
}
