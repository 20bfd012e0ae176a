//! Unit conversion and quantity rounding tests
//!
//! Exercises the rules every quantity in the system passes through:
//! entered quantities convert into the item's base unit via the shared
//! factor table, then round to 2 decimal places.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use shared::{quantities_equal, quantity_epsilon, round_quantity, UnitDefinition, UnitGroup};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn unit(code: &str, group: UnitGroup, to_base: &str) -> UnitDefinition {
    UnitDefinition {
        id: uuid::Uuid::new_v4(),
        code: code.to_string(),
        group,
        to_base: dec(to_base),
        aliases: vec![],
    }
}

/// Mirror of the engine's conversion rule: quantity * from.to_base / to.to_base
fn convert(quantity: Decimal, from: &UnitDefinition, to: &UnitDefinition) -> Option<Decimal> {
    if from.group != to.group {
        return None;
    }
    Some(quantity * from.to_base / to.to_base)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_mass_conversions() {
        let g = unit("g", UnitGroup::Mass, "1");
        let kg = unit("kg", UnitGroup::Mass, "1000");
        let mg = unit("mg", UnitGroup::Mass, "0.001");

        assert_eq!(convert(dec("2.5"), &kg, &g).unwrap(), dec("2500"));
        assert_eq!(convert(dec("500"), &mg, &g).unwrap(), dec("0.5"));
        assert_eq!(convert(dec("1"), &kg, &mg).unwrap(), dec("1000000"));
    }

    #[test]
    fn test_count_packaging_units() {
        let pc = unit("pc", UnitGroup::Count, "1");
        let box12 = unit("box12", UnitGroup::Count, "12");

        assert_eq!(convert(dec("3"), &box12, &pc).unwrap(), dec("36"));
        assert_eq!(convert(dec("6"), &pc, &box12).unwrap(), dec("0.5"));
    }

    #[test]
    fn test_cross_group_conversion_rejected() {
        let g = unit("g", UnitGroup::Mass, "1");
        let ml = unit("ml", UnitGroup::Volume, "1");
        assert!(convert(dec("10"), &g, &ml).is_none());
    }

    #[test]
    fn test_rounding_to_two_places() {
        assert_eq!(round_quantity(dec("0.005")), dec("0.00"));
        assert_eq!(round_quantity(dec("0.015")), dec("0.02"));
        assert_eq!(round_quantity(dec("123.456")), dec("123.46"));
    }

    #[test]
    fn test_epsilon_comparison_absorbs_rounding_residue() {
        // 1/3 of 100ml dispensed three times should reconcile with 100
        let third = round_quantity(dec("100") / dec("3"));
        let total = third * dec("3");
        assert!(quantities_equal(
            total,
            dec("99.99"),
            quantity_epsilon()
        ));
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Converting to base units and back recovers the entered quantity
    #[test]
    fn prop_round_trip_conversion(raw in 1i64..100_000_000i64) {
        let g = unit("g", UnitGroup::Mass, "1");
        let kg = unit("kg", UnitGroup::Mass, "1000");
        let q = Decimal::new(raw, 4);

        let in_base = convert(q, &kg, &g).unwrap();
        let back = convert(in_base, &g, &kg).unwrap();
        prop_assert_eq!(back, q);
    }

    /// Conversion is linear: convert(a + b) == convert(a) + convert(b)
    #[test]
    fn prop_conversion_additive(a in 1i64..10_000_000i64, b in 1i64..10_000_000i64) {
        let g = unit("g", UnitGroup::Mass, "1");
        let kg = unit("kg", UnitGroup::Mass, "1000");
        let qa = Decimal::new(a, 3);
        let qb = Decimal::new(b, 3);

        let separate = convert(qa, &kg, &g).unwrap() + convert(qb, &kg, &g).unwrap();
        let combined = convert(qa + qb, &kg, &g).unwrap();
        prop_assert_eq!(separate, combined);
    }

    /// Rounding is idempotent and never moves a value by more than 0.005
    #[test]
    fn prop_rounding_stable(raw in -1_000_000_000i64..1_000_000_000i64) {
        let q = Decimal::new(raw, 6);
        let rounded = round_quantity(q);

        prop_assert_eq!(round_quantity(rounded), rounded);
        let drift = (rounded - q).abs();
        prop_assert!(drift <= dec("0.005"));
    }
}
