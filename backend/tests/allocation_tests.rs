//! FEFO allocation property tests
//!
//! Pure simulation of the lot-selection policy: soonest expiry first,
//! undated lots last, all-or-nothing when stock is short.

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use shared::Allocation;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[derive(Debug, Clone)]
struct LotRow {
    lot_id: Uuid,
    expiry: Option<NaiveDate>,
    on_hand: Decimal,
}

/// Mirror of the engine's FEFO selection
fn fefo(mut rows: Vec<LotRow>, required: Decimal) -> Option<Vec<Allocation>> {
    rows.retain(|r| r.on_hand > Decimal::ZERO);
    rows.sort_by_key(|r| r.expiry.unwrap_or(NaiveDate::MAX));

    let total: Decimal = rows.iter().map(|r| r.on_hand).sum();
    if total < required {
        return None;
    }

    let mut out = Vec::new();
    let mut remaining = required;
    for row in rows {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(row.on_hand);
        out.push(Allocation {
            lot_id: Some(row.lot_id),
            quantity_base: take,
        });
        remaining -= take;
    }
    Some(out)
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_soonest_expiry_drained_first() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            LotRow { lot_id: a, expiry: Some(day(2026, 12, 1)), on_hand: dec("10") },
            LotRow { lot_id: b, expiry: Some(day(2026, 1, 15)), on_hand: dec("10") },
            LotRow { lot_id: c, expiry: Some(day(2026, 6, 1)), on_hand: dec("10") },
        ];

        let allocs = fefo(rows, dec("15")).unwrap();
        assert_eq!(allocs[0].lot_id, Some(b));
        assert_eq!(allocs[0].quantity_base, dec("10"));
        assert_eq!(allocs[1].lot_id, Some(c));
        assert_eq!(allocs[1].quantity_base, dec("5"));
    }

    #[test]
    fn test_undated_lots_used_last() {
        let (dated, undated) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            LotRow { lot_id: undated, expiry: None, on_hand: dec("100") },
            LotRow { lot_id: dated, expiry: Some(day(2099, 1, 1)), on_hand: dec("5") },
        ];

        let allocs = fefo(rows, dec("10")).unwrap();
        assert_eq!(allocs[0].lot_id, Some(dated));
        assert_eq!(allocs[1].lot_id, Some(undated));
        assert_eq!(allocs[1].quantity_base, dec("5"));
    }

    #[test]
    fn test_shortfall_allocates_nothing() {
        let rows = vec![
            LotRow { lot_id: Uuid::new_v4(), expiry: Some(day(2026, 1, 1)), on_hand: dec("4") },
            LotRow { lot_id: Uuid::new_v4(), expiry: Some(day(2026, 2, 1)), on_hand: dec("4") },
        ];
        assert!(fefo(rows, dec("10")).is_none());
    }

    #[test]
    fn test_empty_rows_skipped() {
        let live = Uuid::new_v4();
        let rows = vec![
            LotRow { lot_id: Uuid::new_v4(), expiry: Some(day(2025, 1, 1)), on_hand: Decimal::ZERO },
            LotRow { lot_id: live, expiry: Some(day(2026, 1, 1)), on_hand: dec("8") },
        ];
        let allocs = fefo(rows, dec("3")).unwrap();
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].lot_id, Some(live));
    }
}

// ============================================================================
// Property Tests
// ============================================================================

fn lot_rows_strategy() -> impl Strategy<Value = Vec<LotRow>> {
    prop::collection::vec(
        (1i64..100_000i64, prop::option::of(0i64..3650i64)),
        1..12,
    )
    .prop_map(|rows| {
        let base = day(2026, 1, 1);
        rows.into_iter()
            .map(|(cents, offset)| LotRow {
                lot_id: Uuid::new_v4(),
                expiry: offset.map(|d| base + chrono::Duration::days(d)),
                on_hand: Decimal::new(cents, 2),
            })
            .collect()
    })
}

proptest! {
    /// A successful allocation always sums exactly to the requirement
    #[test]
    fn prop_allocation_sums_to_requirement(
        rows in lot_rows_strategy(),
        required_cents in 1i64..200_000i64,
    ) {
        let required = Decimal::new(required_cents, 2);
        if let Some(allocs) = fefo(rows, required) {
            let total: Decimal = allocs.iter().map(|a| a.quantity_base).sum();
            prop_assert_eq!(total, required);
        }
    }

    /// Allocation never takes more from a lot than it holds
    #[test]
    fn prop_allocation_bounded_by_availability(
        rows in lot_rows_strategy(),
        required_cents in 1i64..200_000i64,
    ) {
        let required = Decimal::new(required_cents, 2);
        if let Some(allocs) = fefo(rows.clone(), required) {
            for alloc in &allocs {
                let row = rows.iter().find(|r| Some(r.lot_id) == alloc.lot_id).unwrap();
                prop_assert!(alloc.quantity_base <= row.on_hand);
                prop_assert!(alloc.quantity_base > Decimal::ZERO);
            }
        }
    }

    /// Every lot touched expires no later than any lot left untouched
    #[test]
    fn prop_fefo_never_skips_an_earlier_lot(
        rows in lot_rows_strategy(),
        required_cents in 1i64..200_000i64,
    ) {
        let required = Decimal::new(required_cents, 2);
        if let Some(allocs) = fefo(rows.clone(), required) {
            let picked: Vec<Uuid> = allocs.iter().filter_map(|a| a.lot_id).collect();
            let latest_picked = rows
                .iter()
                .filter(|r| picked.contains(&r.lot_id))
                .map(|r| r.expiry.unwrap_or(NaiveDate::MAX))
                .max()
                .unwrap();
            // Any unpicked lot with stock must expire at or after the
            // last picked one
            for row in rows.iter().filter(|r| r.on_hand > Decimal::ZERO) {
                if !picked.contains(&row.lot_id) {
                    prop_assert!(row.expiry.unwrap_or(NaiveDate::MAX) >= latest_picked);
                }
            }
        }
    }

    /// Allocation succeeds if and only if total availability covers the
    /// requirement
    #[test]
    fn prop_all_or_nothing(
        rows in lot_rows_strategy(),
        required_cents in 1i64..200_000i64,
    ) {
        let required = Decimal::new(required_cents, 2);
        let total: Decimal = rows
            .iter()
            .filter(|r| r.on_hand > Decimal::ZERO)
            .map(|r| r.on_hand)
            .sum();
        let result = fefo(rows, required);
        prop_assert_eq!(result.is_some(), total >= required);
    }
}
