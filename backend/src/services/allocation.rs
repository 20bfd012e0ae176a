//! FEFO (first-expiry-first-out) allocation policy
//!
//! Pure selection logic: given availability rows for one (holder, item)
//! pair, pick lots in ascending expiry order until the requirement is
//! met. Nothing here touches the database; the facade fetches the rows
//! and applies the resulting allocations inside its own transaction.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::Allocation;

use crate::error::{AppError, AppResult};

/// On-hand quantity for one lot at one holder
#[derive(Debug, Clone)]
pub struct LotAvailability {
    pub lot_id: Option<Uuid>,
    pub expiry_date: Option<NaiveDate>,
    pub on_hand_base: Decimal,
}

/// Select lots to satisfy `required_base`, soonest expiry first
///
/// Lots without an expiry date sort last; ties keep their input order.
/// If the total available is short the whole allocation fails — no
/// partial allocation is ever returned.
pub fn pick_lots(
    available: Vec<LotAvailability>,
    required_base: Decimal,
) -> AppResult<Vec<Allocation>> {
    if required_base <= Decimal::ZERO {
        return Err(AppError::QuantityNotPositive);
    }

    let mut rows: Vec<LotAvailability> = available
        .into_iter()
        .filter(|row| row.on_hand_base > Decimal::ZERO)
        .collect();

    // Stable sort: no-expiry lots are treated as expiring at +infinity
    rows.sort_by_key(|row| row.expiry_date.unwrap_or(NaiveDate::MAX));

    let total: Decimal = rows.iter().map(|row| row.on_hand_base).sum();
    if total < required_base {
        return Err(AppError::InsufficientStock(format!(
            "required {} but only {} on hand",
            required_base, total
        )));
    }

    let mut allocations = Vec::new();
    let mut remaining = required_base;
    for row in rows {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(row.on_hand_base);
        allocations.push(Allocation {
            lot_id: row.lot_id,
            quantity_base: take,
        });
        remaining -= take;
    }

    Ok(allocations)
}

/// The single synthetic allocation used for items without lot tracking
pub fn lot_free_allocation(quantity_base: Decimal) -> Vec<Allocation> {
    vec![Allocation {
        lot_id: None,
        quantity_base,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn avail(lot: Uuid, expiry: Option<&str>, on_hand: &str) -> LotAvailability {
        LotAvailability {
            lot_id: Some(lot),
            expiry_date: expiry.map(day),
            on_hand_base: dec(on_hand),
        }
    }

    #[test]
    fn test_fefo_ordering() {
        let (l1, l2, l3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        // Deliberately shuffled input
        let rows = vec![
            avail(l3, Some("2026-12-01"), "10"),
            avail(l1, Some("2026-01-15"), "10"),
            avail(l2, Some("2026-06-01"), "10"),
        ];

        let picked = pick_lots(rows, dec("15")).unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].lot_id, Some(l1));
        assert_eq!(picked[0].quantity_base, dec("10"));
        assert_eq!(picked[1].lot_id, Some(l2));
        assert_eq!(picked[1].quantity_base, dec("5"));
        // l3 untouched
        assert!(picked.iter().all(|a| a.lot_id != Some(l3)));
    }

    #[test]
    fn test_no_expiry_sorts_last() {
        let (l1, l2) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            avail(l1, None, "10"),
            avail(l2, Some("2030-01-01"), "10"),
        ];

        let picked = pick_lots(rows, dec("12")).unwrap();
        assert_eq!(picked[0].lot_id, Some(l2));
        assert_eq!(picked[1].lot_id, Some(l1));
        assert_eq!(picked[1].quantity_base, dec("2"));
    }

    #[test]
    fn test_ties_keep_input_order() {
        let (l1, l2) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            avail(l1, Some("2026-03-01"), "5"),
            avail(l2, Some("2026-03-01"), "5"),
        ];

        let picked = pick_lots(rows, dec("7")).unwrap();
        assert_eq!(picked[0].lot_id, Some(l1));
        assert_eq!(picked[1].lot_id, Some(l2));
    }

    #[test]
    fn test_exact_match_consumes_everything() {
        let l1 = Uuid::new_v4();
        let picked = pick_lots(vec![avail(l1, Some("2026-01-01"), "25")], dec("25")).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].quantity_base, dec("25"));
    }

    #[test]
    fn test_insufficient_fails_whole_allocation() {
        let rows = vec![
            avail(Uuid::new_v4(), Some("2026-01-01"), "10"),
            avail(Uuid::new_v4(), Some("2026-02-01"), "10"),
        ];
        let result = pick_lots(rows, dec("30"));
        assert!(matches!(result, Err(AppError::InsufficientStock(_))));
    }

    #[test]
    fn test_zero_and_negative_rows_ignored() {
        let l1 = Uuid::new_v4();
        let rows = vec![
            LotAvailability {
                lot_id: Some(Uuid::new_v4()),
                expiry_date: Some(day("2025-01-01")),
                on_hand_base: Decimal::ZERO,
            },
            avail(l1, Some("2026-01-01"), "10"),
        ];
        let picked = pick_lots(rows, dec("5")).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].lot_id, Some(l1));
    }

    #[test]
    fn test_nonpositive_requirement_rejected() {
        assert!(matches!(
            pick_lots(vec![], Decimal::ZERO),
            Err(AppError::QuantityNotPositive)
        ));
        assert!(matches!(
            pick_lots(vec![], dec("-1")),
            Err(AppError::QuantityNotPositive)
        ));
    }

    #[test]
    fn test_allocations_sum_to_requirement() {
        let rows = vec![
            avail(Uuid::new_v4(), Some("2026-01-01"), "3.33"),
            avail(Uuid::new_v4(), Some("2026-02-01"), "3.33"),
            avail(Uuid::new_v4(), Some("2026-03-01"), "3.34"),
        ];
        let picked = pick_lots(rows, dec("10")).unwrap();
        let total: Decimal = picked.iter().map(|a| a.quantity_base).sum();
        assert_eq!(total, dec("10"));
    }

    #[test]
    fn test_lot_free_allocation() {
        let allocs = lot_free_allocation(dec("7.5"));
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].lot_id, None);
        assert_eq!(allocs[0].quantity_base, dec("7.5"));
    }
}
