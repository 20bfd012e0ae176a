//! Ledger and balance reconciliation tests
//!
//! Simulates the write path over an in-memory balance map: every
//! operation appends signed ledger legs and mutates balances in the same
//! step, exactly like the engine's transaction does. The properties
//! check that balances always equal the signed sum of the ledger and
//! that movements conserve system-wide stock.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

use shared::{quantities_equal, quantity_epsilon, round_quantity, HolderRef, HolderType};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

type BalanceKey = (HolderRef, Uuid, Option<Uuid>);

/// One signed ledger leg: positive credits the holder, negative debits it
#[derive(Debug, Clone)]
struct Leg {
    holder: HolderRef,
    item: Uuid,
    lot: Option<Uuid>,
    delta: Decimal,
}

#[derive(Debug, Default)]
struct Engine {
    balances: HashMap<BalanceKey, Decimal>,
    /// Per-lot total on hand across holders, mirroring the running
    /// availability the write path keeps on each lot row
    lot_available: HashMap<Uuid, Decimal>,
    ledger: Vec<Leg>,
    seen_batches: HashSet<String>,
}

impl Engine {
    fn apply(&mut self, leg: Leg, allow_negative: bool) -> Result<(), String> {
        let key = (leg.holder, leg.item, leg.lot);
        let current = self.balances.get(&key).copied().unwrap_or(Decimal::ZERO);
        let new = round_quantity(current + leg.delta);
        if new < -quantity_epsilon() && !allow_negative {
            return Err(format!("overdraw: {} + {}", current, leg.delta));
        }
        self.balances.insert(key, new);
        if let Some(lot) = leg.lot {
            *self.lot_available.entry(lot).or_default() += leg.delta;
        }
        self.ledger.push(leg);
        Ok(())
    }

    fn receive(&mut self, store: HolderRef, item: Uuid, lot: Option<Uuid>, qty: Decimal) {
        self.apply(Leg { holder: store, item, lot, delta: qty }, false)
            .unwrap();
    }

    fn transfer(
        &mut self,
        from: HolderRef,
        to: HolderRef,
        item: Uuid,
        lot: Option<Uuid>,
        qty: Decimal,
        allow_negative: bool,
    ) -> Result<(), String> {
        self.apply(Leg { holder: from, item, lot, delta: -qty }, allow_negative)?;
        self.apply(Leg { holder: to, item, lot, delta: qty }, false)
    }

    fn consume(
        &mut self,
        holder: HolderRef,
        item: Uuid,
        lot: Option<Uuid>,
        qty: Decimal,
        allow_negative: bool,
    ) -> Result<(), String> {
        self.apply(Leg { holder, item, lot, delta: -qty }, allow_negative)
    }

    fn opening_batch(
        &mut self,
        key: Option<&str>,
        entries: &[(HolderRef, Uuid, Decimal)],
    ) -> bool {
        if let Some(k) = key {
            if !self.seen_batches.insert(k.to_string()) {
                // replayed batch: no effect
                return false;
            }
        }
        for (holder, item, qty) in entries {
            self.apply(
                Leg { holder: *holder, item: *item, lot: None, delta: *qty },
                false,
            )
            .unwrap();
        }
        true
    }

    /// Recompute a balance from the ledger alone
    fn derived_balance(&self, key: &BalanceKey) -> Decimal {
        round_quantity(
            self.ledger
                .iter()
                .filter(|l| (l.holder, l.item, l.lot) == *key)
                .map(|l| l.delta)
                .sum(),
        )
    }

    fn system_total(&self, item: Uuid) -> Decimal {
        self.balances
            .iter()
            .filter(|((_, i, _), _)| *i == item)
            .map(|(_, q)| *q)
            .sum()
    }

    /// Sum of one lot's balances across every holder
    fn lot_balance_total(&self, lot: Uuid) -> Decimal {
        self.balances
            .iter()
            .filter(|((_, _, l), _)| *l == Some(lot))
            .map(|(_, q)| *q)
            .sum()
    }
}

fn store() -> HolderRef {
    HolderRef::central_store(Uuid::new_v4())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_receive_then_consume_reconciles() {
        let mut engine = Engine::default();
        let central = store();
        let item = Uuid::new_v4();
        let lot = Some(Uuid::new_v4());

        engine.receive(central, item, lot, dec("100"));
        engine.consume(central, item, lot, dec("30"), false).unwrap();

        let key = (central, item, lot);
        assert_eq!(engine.balances[&key], dec("70"));
        assert_eq!(engine.derived_balance(&key), dec("70"));
    }

    #[test]
    fn test_transfer_conserves_system_total() {
        let mut engine = Engine::default();
        let central = store();
        let office = HolderRef::office(Uuid::new_v4());
        let item = Uuid::new_v4();
        let lot = Some(Uuid::new_v4());

        engine.receive(central, item, lot, dec("100"));
        let before = engine.system_total(item);
        engine
            .transfer(central, office, item, lot, dec("40"), false)
            .unwrap();
        assert_eq!(engine.system_total(item), before);
        assert_eq!(engine.balances[&(office, item, lot)], dec("40"));
    }

    #[test]
    fn test_overdraw_rejected_without_override() {
        let mut engine = Engine::default();
        let central = store();
        let item = Uuid::new_v4();

        engine.receive(central, item, None, dec("10"));
        assert!(engine.consume(central, item, None, dec("15"), false).is_err());
        // the rejected movement left no trace
        assert_eq!(engine.balances[&(central, item, None)], dec("10"));
        assert_eq!(engine.ledger.len(), 1);
    }

    #[test]
    fn test_override_allows_negative_and_still_reconciles() {
        let mut engine = Engine::default();
        let central = store();
        let item = Uuid::new_v4();

        engine.receive(central, item, None, dec("10"));
        engine.consume(central, item, None, dec("15"), true).unwrap();

        let key = (central, item, None);
        assert_eq!(engine.balances[&key], dec("-5"));
        assert_eq!(engine.derived_balance(&key), dec("-5"));
    }

    /// Without an idempotency key the same entry posted twice counts
    /// twice: one ledger leg each time, balance doubled
    #[test]
    fn test_opening_balance_batches_are_additive() {
        let mut engine = Engine::default();
        let office = HolderRef::office(Uuid::new_v4());
        let item = Uuid::new_v4();
        let entries = [(office, item, dec("20"))];

        engine.opening_batch(None, &entries);
        engine.opening_batch(None, &entries);
        assert_eq!(engine.balances[&(office, item, None)], dec("40"));
        assert_eq!(engine.ledger.len(), 2);
    }

    #[test]
    fn test_opening_balance_replay_is_ignored() {
        let mut engine = Engine::default();
        let office = HolderRef::office(Uuid::new_v4());
        let item = Uuid::new_v4();
        let entries = [(office, item, dec("20"))];

        assert!(engine.opening_batch(Some("seed-1"), &entries));
        assert!(!engine.opening_batch(Some("seed-1"), &entries));
        assert_eq!(engine.balances[&(office, item, None)], dec("20"));
        assert_eq!(engine.ledger.len(), 1);
    }

    /// Full lifecycle: receive at the store, issue to an office, consume
    /// there, then hit the wall when the office asks for more than it has
    #[test]
    fn test_receive_transfer_consume_then_insufficient() {
        let mut engine = Engine::default();
        let central = store();
        let office = HolderRef::office(Uuid::new_v4());
        let item = Uuid::new_v4();
        let lot = Some(Uuid::new_v4());

        engine.receive(central, item, lot, dec("100"));
        engine
            .transfer(central, office, item, lot, dec("40"), false)
            .unwrap();
        engine.consume(office, item, lot, dec("15"), false).unwrap();

        assert_eq!(engine.balances[&(office, item, lot)], dec("25"));
        assert_eq!(engine.balances[&(central, item, lot)], dec("60"));

        // 30 > 25 remaining at the office
        assert!(engine.consume(office, item, lot, dec("30"), false).is_err());
        assert_eq!(engine.balances[&(office, item, lot)], dec("25"));
        assert_eq!(engine.system_total(item), dec("85"));

        // every balance still reconciles against the ledger
        for (key, balance) in &engine.balances {
            assert_eq!(*balance, engine.derived_balance(key));
        }
    }

    /// The per-lot availability figure stays equal to the sum of the
    /// lot's balances: transfers between holders leave it unchanged,
    /// consumption draws it down
    #[test]
    fn test_lot_availability_tracks_lot_balances() {
        let mut engine = Engine::default();
        let central = store();
        let office = HolderRef::office(Uuid::new_v4());
        let item = Uuid::new_v4();
        let lot_id = Uuid::new_v4();
        let lot = Some(lot_id);

        engine.receive(central, item, lot, dec("100"));
        assert_eq!(engine.lot_available[&lot_id], dec("100"));

        engine
            .transfer(central, office, item, lot, dec("40"), false)
            .unwrap();
        assert_eq!(engine.lot_available[&lot_id], dec("100"));

        engine.consume(office, item, lot, dec("15"), false).unwrap();
        assert_eq!(engine.lot_available[&lot_id], dec("85"));
        assert_eq!(engine.lot_available[&lot_id], engine.lot_balance_total(lot_id));
    }

    #[test]
    fn test_employee_holder_participates_like_any_other() {
        let mut engine = Engine::default();
        let central = store();
        let employee = HolderRef::employee(Uuid::new_v4());
        let item = Uuid::new_v4();

        engine.receive(central, item, None, dec("50"));
        engine
            .transfer(central, employee, item, None, dec("12"), false)
            .unwrap();
        engine.consume(employee, item, None, dec("2"), false).unwrap();

        assert_eq!(engine.balances[&(employee, item, None)], dec("10"));
        assert_eq!(engine.system_total(item), dec("48"));
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Receive(Decimal),
    Transfer(usize, usize, Decimal),
    Consume(usize, Decimal),
    Adjust(usize, Decimal),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..10_000i64).prop_map(|c| Op::Receive(Decimal::new(c, 2))),
        (0usize..4, 0usize..4, 1i64..5_000i64)
            .prop_map(|(f, t, c)| Op::Transfer(f, t, Decimal::new(c, 2))),
        (0usize..4, 1i64..5_000i64).prop_map(|(h, c)| Op::Consume(h, Decimal::new(c, 2))),
        (0usize..4, -3_000i64..3_000i64)
            .prop_filter("nonzero", |(_, c)| *c != 0)
            .prop_map(|(h, c)| Op::Adjust(h, Decimal::new(c, 2))),
    ]
}

proptest! {
    /// After any sequence of operations, every balance equals the signed
    /// sum of its ledger legs
    #[test]
    fn prop_ledger_balance_reconciliation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut engine = Engine::default();
        let holders = [
            store(),
            HolderRef::office(Uuid::new_v4()),
            HolderRef::new(HolderType::SubLocation, Uuid::new_v4()),
            HolderRef::employee(Uuid::new_v4()),
        ];
        let item = Uuid::new_v4();

        for op in ops {
            match op {
                Op::Receive(q) => engine.receive(holders[0], item, None, q),
                Op::Transfer(f, t, q) => {
                    let _ = engine.transfer(holders[f], holders[t], item, None, q, false);
                }
                Op::Consume(h, q) => {
                    let _ = engine.consume(holders[h], item, None, q, false);
                }
                Op::Adjust(h, d) => {
                    let _ = engine.apply(
                        Leg { holder: holders[h], item, lot: None, delta: d },
                        false,
                    );
                }
            }
        }

        for (key, balance) in &engine.balances {
            prop_assert!(quantities_equal(
                *balance,
                engine.derived_balance(key),
                quantity_epsilon()
            ));
            // rejected movements never drive a balance negative
            prop_assert!(*balance >= -quantity_epsilon());
        }
    }

    /// The running per-lot availability equals the signed sum of the
    /// lot's balances after any sequence of operations
    #[test]
    fn prop_lot_availability_matches_balances(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut engine = Engine::default();
        let holders = [
            store(),
            HolderRef::office(Uuid::new_v4()),
            HolderRef::new(HolderType::SubLocation, Uuid::new_v4()),
            HolderRef::employee(Uuid::new_v4()),
        ];
        let item = Uuid::new_v4();
        let lot_id = Uuid::new_v4();
        let lot = Some(lot_id);

        for op in ops {
            match op {
                Op::Receive(q) => engine.receive(holders[0], item, lot, q),
                Op::Transfer(f, t, q) => {
                    let _ = engine.transfer(holders[f], holders[t], item, lot, q, false);
                }
                Op::Consume(h, q) => {
                    let _ = engine.consume(holders[h], item, lot, q, false);
                }
                Op::Adjust(h, d) => {
                    let _ = engine.apply(
                        Leg { holder: holders[h], item, lot, delta: d },
                        false,
                    );
                }
            }
        }

        let available = engine.lot_available.get(&lot_id).copied().unwrap_or(Decimal::ZERO);
        prop_assert!(quantities_equal(available, engine.lot_balance_total(lot_id), quantity_epsilon()));
    }

    /// Transfers move stock but never create or destroy it
    #[test]
    fn prop_transfers_conserve_stock(
        receipts in prop::collection::vec(1i64..10_000i64, 1..5),
        moves in prop::collection::vec((0usize..3, 0usize..3, 1i64..5_000i64), 0..40),
    ) {
        let mut engine = Engine::default();
        let holders = [
            store(),
            HolderRef::office(Uuid::new_v4()),
            HolderRef::employee(Uuid::new_v4()),
        ];
        let item = Uuid::new_v4();

        for cents in receipts {
            engine.receive(holders[0], item, None, Decimal::new(cents, 2));
        }
        let total = engine.system_total(item);

        for (f, t, cents) in moves {
            let _ = engine.transfer(
                holders[f],
                holders[t],
                item,
                None,
                Decimal::new(cents, 2),
                false,
            );
        }

        prop_assert!(quantities_equal(engine.system_total(item), total, quantity_epsilon()));
    }

    /// Opening a batch twice under the same key equals opening it once
    #[test]
    fn prop_opening_replay_idempotent(
        quantities in prop::collection::vec(1i64..10_000i64, 1..6),
        replays in 1usize..4,
    ) {
        let mut engine = Engine::default();
        let office = HolderRef::office(Uuid::new_v4());
        let item = Uuid::new_v4();
        let entries: Vec<_> = quantities
            .iter()
            .map(|c| (office, item, Decimal::new(*c, 2)))
            .collect();

        engine.opening_batch(Some("batch"), &entries);
        let after_first = engine.system_total(item);

        for _ in 0..replays {
            engine.opening_batch(Some("batch"), &entries);
        }
        prop_assert_eq!(engine.system_total(item), after_first);
    }
}
