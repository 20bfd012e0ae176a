//! Inventory operations facade
//!
//! The six write operations plus opening-balance seeding. Every public
//! method is one atomic unit of work: validate, resolve references,
//! convert the entered quantity, authorize, allocate, mutate balances,
//! append ledger entries, commit, then emit an audit event. A failure at
//! any step rolls the whole call back; the audit write is the only
//! best-effort step and runs after commit.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use shared::{
    quantity_epsilon, round_quantity, Allocation, Caller, ConsumableItem, Container,
    ContainerStatus, HolderContext, HolderRef, HolderType, InventoryCapabilities, LedgerEntry,
    LedgerEntryType, ReasonCategory,
};

use crate::error::{AppError, AppResult};
use crate::services::allocation::{lot_free_allocation, pick_lots, LotAvailability};
use crate::services::audit::{AuditEvent, AuditService};
use crate::services::catalog::CatalogService;
use crate::services::holder::HolderService;
use crate::services::lot::{
    ensure_whole_container_move, parse_expiry, ContainerSplitInput, LotService,
};
use crate::services::units::{UnitService, UnitTable};

/// Facade over unit conversion, holder resolution, lot registry,
/// allocation, balances and the ledger
#[derive(Clone)]
pub struct InventoryService {
    db: PgPool,
    units: UnitService,
    holders: HolderService,
    catalog: CatalogService,
    lots: LotService,
    audit: AuditService,
}

// ============================================================================
// Inputs
// ============================================================================

/// Input for receiving stock into the central store
#[derive(Debug, Deserialize)]
pub struct ReceiveInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit: String,
    /// Reuse an existing lot instead of creating one
    pub lot_id: Option<Uuid>,
    pub batch_number: Option<String>,
    /// ISO date, required when a new lot is created
    pub expiry_date: Option<String>,
    /// Optional split of the receipt into tracked containers
    pub containers: Option<Vec<ContainerSplitInput>>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Input for transferring stock between holders
#[derive(Debug, Deserialize)]
pub struct TransferInput {
    pub item_id: Uuid,
    pub from: HolderRef,
    pub to: HolderRef,
    pub quantity: Decimal,
    pub unit: String,
    pub lot_id: Option<Uuid>,
    pub container_id: Option<Uuid>,
    #[serde(default)]
    pub allow_negative: bool,
    pub override_note: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Input for consuming stock at a holder
#[derive(Debug, Deserialize)]
pub struct ConsumeInput {
    pub item_id: Uuid,
    pub holder: HolderRef,
    pub quantity: Decimal,
    pub unit: String,
    pub lot_id: Option<Uuid>,
    pub container_id: Option<Uuid>,
    #[serde(default)]
    pub allow_negative: bool,
    pub override_note: Option<String>,
    pub notes: Option<String>,
}

/// Input for a signed stock adjustment
#[derive(Debug, Deserialize)]
pub struct AdjustInput {
    pub item_id: Uuid,
    pub holder: HolderRef,
    /// Signed delta in the entered unit; negative decreases stock
    pub delta: Decimal,
    pub unit: String,
    pub lot_id: Option<Uuid>,
    pub container_id: Option<Uuid>,
    pub reason_code_id: Uuid,
    #[serde(default)]
    pub allow_negative: bool,
    pub override_note: Option<String>,
    pub notes: Option<String>,
}

/// Input for disposing stock
#[derive(Debug, Deserialize)]
pub struct DisposeInput {
    pub item_id: Uuid,
    pub holder: HolderRef,
    pub quantity: Decimal,
    pub unit: String,
    pub lot_id: Option<Uuid>,
    pub container_id: Option<Uuid>,
    pub reason_code_id: Uuid,
    #[serde(default)]
    pub allow_negative: bool,
    pub override_note: Option<String>,
    pub notes: Option<String>,
}

/// Input for returning stock from an office to the central store
#[derive(Debug, Deserialize)]
pub struct ReturnInput {
    pub item_id: Uuid,
    pub from: HolderRef,
    /// Optional explicit destination; must be the central store
    pub to: Option<HolderRef>,
    pub quantity: Decimal,
    pub unit: String,
    pub lot_id: Option<Uuid>,
    pub container_id: Option<Uuid>,
    #[serde(default)]
    pub allow_negative: bool,
    pub override_note: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// One entry in an opening-balance batch
#[derive(Debug, Deserialize)]
pub struct OpeningBalanceEntry {
    pub holder: HolderRef,
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit: String,
    pub lot_id: Option<Uuid>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<String>,
    pub notes: Option<String>,
}

/// Input for seeding opening balances
#[derive(Debug, Deserialize)]
pub struct OpeningBalanceInput {
    /// Replays with the same key return the original entries instead of
    /// double-counting the batch
    pub idempotency_key: Option<String>,
    pub entries: Vec<OpeningBalanceEntry>,
}

// ============================================================================
// Pure authorization helpers
// ============================================================================

/// Validate the negative-balance override: a note is mandatory and the
/// caller needs the override capability. Returns the note to persist.
pub fn ensure_override(
    capabilities: &InventoryCapabilities,
    allow_negative: bool,
    override_note: Option<&str>,
) -> AppResult<Option<String>> {
    if !allow_negative {
        return Ok(None);
    }
    let note = override_note
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(AppError::OverrideNoteRequired)?;
    if !capabilities.override_negative {
        return Err(AppError::OverrideDenied);
    }
    Ok(Some(note.to_string()))
}

fn require(flag: bool, capability: &str) -> AppResult<()> {
    if flag {
        Ok(())
    } else {
        Err(AppError::CapabilityDenied(format!(
            "missing inventory:{} capability",
            capability
        )))
    }
}

/// Transfers out of the central store and out of lab holders are
/// distinct permissions.
fn require_transfer_capability(
    capabilities: &InventoryCapabilities,
    source: HolderType,
) -> AppResult<()> {
    match source {
        HolderType::CentralStore => require(capabilities.transfer_central, "transfer_central"),
        _ => require(capabilities.transfer_lab, "transfer_lab"),
    }
}

/// Self-service callers may only consume from their own employee holder;
/// consuming elsewhere needs lab-level stock authority.
fn require_consume_access(caller: &Caller, holder: &HolderContext) -> AppResult<()> {
    require(caller.capabilities.consume, "consume")?;
    let own_holder = holder.holder_type == HolderType::Employee
        && caller.employee_holder_id == Some(holder.holder_id);
    if own_holder || caller.capabilities.transfer_lab {
        Ok(())
    } else {
        Err(AppError::CapabilityDenied(
            "consuming from another holder requires lab stock authority".to_string(),
        ))
    }
}

impl InventoryService {
    pub fn new(
        db: PgPool,
        units: UnitService,
        holders: HolderService,
        catalog: CatalogService,
        lots: LotService,
        audit: AuditService,
    ) -> Self {
        Self {
            db,
            units,
            holders,
            catalog,
            lots,
            audit,
        }
    }

    // ========================================================================
    // Write operations
    // ========================================================================

    /// Receive stock into the central store
    pub async fn receive(&self, caller: &Caller, input: ReceiveInput) -> AppResult<LedgerEntry> {
        require(caller.capabilities.receive, "receive")?;
        shared::validate_positive_quantity(input.quantity)
            .map_err(|_| AppError::QuantityNotPositive)?;

        let units = self.units.snapshot().await?;
        let item = self.catalog.get_item(input.item_id).await?;
        let store = self.holders.central_store().await?;
        let entered_unit = units.normalize(&input.unit)?.code.clone();
        let quantity_base =
            round_quantity(units.convert_to_base(input.quantity, &input.unit, &item.base_unit)?);

        let mut tx = self.db.begin().await?;

        // Resolve or create the lot
        let lot_id = if let Some(lot_id) = input.lot_id {
            let lot = self.lots.get_lot(&mut tx, lot_id).await?;
            self.lots.ensure_lot_belongs_to_item(&lot, item.id)?;
            Some(lot.id)
        } else if item.requires_lot_tracking {
            let batch = input.batch_number.as_deref().ok_or(AppError::LotRequired)?;
            let expiry_raw = input.expiry_date.as_deref().ok_or(AppError::LotRequired)?;
            let expiry = parse_expiry(expiry_raw)?;
            let lot = self
                .lots
                .create_lot(&mut tx, item.id, &store, batch, expiry, quantity_base)
                .await?;
            Some(lot.id)
        } else {
            None
        };

        // Optional container split
        let mut container_ids = Vec::new();
        if let Some(splits) = input.containers.as_deref().filter(|s| !s.is_empty()) {
            let lot_id = lot_id.ok_or(AppError::LotRequired)?;
            let lot = self.lots.get_lot(&mut tx, lot_id).await?;
            let containers = self
                .lots
                .create_containers(&mut tx, &lot, &store, quantity_base, splits)
                .await?;
            container_ids = containers.into_iter().map(|c| c.id).collect();
        }

        apply_balance_delta(
            &mut tx,
            store.holder_type,
            store.holder_id,
            item.id,
            lot_id,
            quantity_base,
            false,
        )
        .await?;

        let entry = append_entry(
            &mut tx,
            NewEntry {
                entry_type: LedgerEntryType::Receipt,
                actor_id: caller.actor_id,
                from_holder: None,
                to_holder: Some(HolderRef::new(store.holder_type, store.holder_id)),
                consumable_item_id: item.id,
                lot_id,
                container_id: container_ids.first().copied(),
                quantity_base,
                entered_quantity: input.quantity,
                entered_unit,
                reason_code_id: None,
                reference: input.reference,
                notes: input.notes,
                metadata: json!({ "container_ids": container_ids }),
            },
        )
        .await?;

        tx.commit().await?;

        self.audit.emit(AuditEvent {
            actor_id: caller.actor_id,
            activity_type: "inventory.receive".to_string(),
            description: format!(
                "Received {} {} of {} into {}",
                quantity_base, item.base_unit, item.name, store.display_name
            ),
            metadata: json!({ "ledger_entry_id": entry.id }),
        });

        Ok(entry)
    }

    /// Transfer stock between holders
    pub async fn transfer(
        &self,
        caller: &Caller,
        input: TransferInput,
    ) -> AppResult<Vec<LedgerEntry>> {
        require_transfer_capability(&caller.capabilities, input.from.kind)?;
        shared::validate_positive_quantity(input.quantity)
            .map_err(|_| AppError::QuantityNotPositive)?;
        let override_note = ensure_override(
            &caller.capabilities,
            input.allow_negative,
            input.override_note.as_deref(),
        )?;

        let units = self.units.snapshot().await?;
        let item = self.catalog.get_item(input.item_id).await?;
        let source = self.holders.resolve(input.from).await?;
        let destination = self.holders.resolve(input.to).await?;
        self.holders.ensure_chemical_capable(&item, &source)?;
        self.holders.ensure_chemical_capable(&item, &destination)?;

        let entered_unit = units.normalize(&input.unit)?.code.clone();
        let quantity_base =
            round_quantity(units.convert_to_base(input.quantity, &input.unit, &item.base_unit)?);

        let mut tx = self.db.begin().await?;

        let entries = self
            .move_stock(
                &mut tx,
                MoveStock {
                    entry_type: LedgerEntryType::Transfer,
                    caller,
                    item: &item,
                    source: &source,
                    destination: &destination,
                    quantity_base,
                    entered_quantity: input.quantity,
                    entered_unit,
                    lot_id: input.lot_id,
                    container_id: input.container_id,
                    allow_negative: input.allow_negative,
                    override_note: override_note.clone(),
                    reference: input.reference,
                    notes: input.notes,
                },
            )
            .await?;

        tx.commit().await?;

        self.audit.emit(AuditEvent {
            actor_id: caller.actor_id,
            activity_type: "inventory.transfer".to_string(),
            description: format!(
                "Transferred {} {} of {} from {} to {}",
                quantity_base, item.base_unit, item.name, source.display_name,
                destination.display_name
            ),
            metadata: json!({ "ledger_entry_ids": entries.iter().map(|e| e.id).collect::<Vec<_>>() }),
        });

        Ok(entries)
    }

    /// Consume stock at a holder
    pub async fn consume(
        &self,
        caller: &Caller,
        input: ConsumeInput,
    ) -> AppResult<Vec<LedgerEntry>> {
        shared::validate_positive_quantity(input.quantity)
            .map_err(|_| AppError::QuantityNotPositive)?;
        let override_note = ensure_override(
            &caller.capabilities,
            input.allow_negative,
            input.override_note.as_deref(),
        )?;

        let units = self.units.snapshot().await?;
        let item = self.catalog.get_item(input.item_id).await?;
        let holder = self.holders.resolve(input.holder).await?;
        require_consume_access(caller, &holder)?;

        if item.needs_container_tracking() && input.container_id.is_none() {
            return Err(AppError::ContainerRequired);
        }

        let entered_unit = units.normalize(&input.unit)?.code.clone();
        let quantity_base =
            round_quantity(units.convert_to_base(input.quantity, &input.unit, &item.base_unit)?);

        let mut tx = self.db.begin().await?;

        let entries = self
            .draw_down(
                &mut tx,
                DrawDown {
                    entry_type: LedgerEntryType::Consume,
                    caller,
                    item: &item,
                    holder: &holder,
                    quantity_base,
                    entered_quantity: input.quantity,
                    entered_unit,
                    lot_id: input.lot_id,
                    container_id: input.container_id,
                    container_at_zero: ContainerStatus::Empty,
                    allow_negative: input.allow_negative,
                    override_note: override_note.clone(),
                    reason_code_id: None,
                    notes: input.notes,
                },
            )
            .await?;

        tx.commit().await?;

        self.audit.emit(AuditEvent {
            actor_id: caller.actor_id,
            activity_type: "inventory.consume".to_string(),
            description: format!(
                "Consumed {} {} of {} at {}",
                quantity_base, item.base_unit, item.name, holder.display_name
            ),
            metadata: json!({ "ledger_entry_ids": entries.iter().map(|e| e.id).collect::<Vec<_>>() }),
        });

        Ok(entries)
    }

    /// Apply a signed adjustment at one holder/lot/container
    pub async fn adjust(&self, caller: &Caller, input: AdjustInput) -> AppResult<LedgerEntry> {
        require(caller.capabilities.adjust, "adjust")?;
        shared::validate_nonzero_delta(input.delta).map_err(|msg| AppError::Validation {
            field: "delta".to_string(),
            message: msg.to_string(),
        })?;
        let override_note = ensure_override(
            &caller.capabilities,
            input.allow_negative,
            input.override_note.as_deref(),
        )?;

        let units = self.units.snapshot().await?;
        let item = self.catalog.get_item(input.item_id).await?;
        let holder = self.holders.resolve(input.holder).await?;
        let reason = self
            .catalog
            .get_reason_code(input.reason_code_id, ReasonCategory::Adjust)
            .await?;

        let entered_unit = units.normalize(&input.unit)?.code.clone();
        let delta_base =
            round_quantity(units.convert_to_base(input.delta, &input.unit, &item.base_unit)?);

        // Adjustments target one balance row; lot-tracked items must say
        // which lot is being corrected
        if item.requires_lot_tracking && input.lot_id.is_none() && input.container_id.is_none() {
            return Err(AppError::LotRequired);
        }

        let mut tx = self.db.begin().await?;

        let lot_id = self
            .resolve_explicit_lot(&mut tx, &item, input.lot_id, input.container_id)
            .await?;

        if let Some(container_id) = input.container_id {
            let (container, container_item_id) = self.lots.get_container(&mut tx, container_id).await?;
            self.lots
                .ensure_container_belongs_to_item(container_item_id, item.id)?;
            ensure_container_at(&container, &holder)?;
            if delta_base < Decimal::ZERO {
                self.lots
                    .drain_container(&mut tx, &container, -delta_base, ContainerStatus::Empty)
                    .await?;
            } else {
                refill_container(&mut tx, &container, delta_base).await?;
            }
        }

        apply_balance_delta(
            &mut tx,
            holder.holder_type,
            holder.holder_id,
            item.id,
            lot_id,
            delta_base,
            input.allow_negative,
        )
        .await?;

        let entry = append_entry(
            &mut tx,
            NewEntry {
                entry_type: LedgerEntryType::Adjust,
                actor_id: caller.actor_id,
                from_holder: Some(HolderRef::new(holder.holder_type, holder.holder_id)),
                to_holder: None,
                consumable_item_id: item.id,
                lot_id,
                container_id: input.container_id,
                quantity_base: delta_base,
                entered_quantity: input.delta,
                entered_unit,
                reason_code_id: Some(reason.id),
                reference: None,
                notes: input.notes,
                metadata: override_metadata(override_note.as_deref()),
            },
        )
        .await?;

        tx.commit().await?;

        self.audit.emit(AuditEvent {
            actor_id: caller.actor_id,
            activity_type: "inventory.adjust".to_string(),
            description: format!(
                "Adjusted {} by {} {} at {} ({})",
                item.name, delta_base, item.base_unit, holder.display_name, reason.code
            ),
            metadata: json!({ "ledger_entry_id": entry.id }),
        });

        Ok(entry)
    }

    /// Dispose stock at a holder
    pub async fn dispose(&self, caller: &Caller, input: DisposeInput) -> AppResult<Vec<LedgerEntry>> {
        require(caller.capabilities.dispose, "dispose")?;
        shared::validate_positive_quantity(input.quantity)
            .map_err(|_| AppError::QuantityNotPositive)?;
        let override_note = ensure_override(
            &caller.capabilities,
            input.allow_negative,
            input.override_note.as_deref(),
        )?;

        let units = self.units.snapshot().await?;
        let item = self.catalog.get_item(input.item_id).await?;
        let holder = self.holders.resolve(input.holder).await?;
        let reason = self
            .catalog
            .get_reason_code(input.reason_code_id, ReasonCategory::Dispose)
            .await?;

        if item.needs_container_tracking() && input.container_id.is_none() {
            return Err(AppError::ContainerRequired);
        }

        let entered_unit = units.normalize(&input.unit)?.code.clone();
        let quantity_base =
            round_quantity(units.convert_to_base(input.quantity, &input.unit, &item.base_unit)?);

        let mut tx = self.db.begin().await?;

        let entries = self
            .draw_down(
                &mut tx,
                DrawDown {
                    entry_type: LedgerEntryType::Dispose,
                    caller,
                    item: &item,
                    holder: &holder,
                    quantity_base,
                    entered_quantity: input.quantity,
                    entered_unit,
                    lot_id: input.lot_id,
                    container_id: input.container_id,
                    container_at_zero: ContainerStatus::Disposed,
                    allow_negative: input.allow_negative,
                    override_note: override_note.clone(),
                    reason_code_id: Some(reason.id),
                    notes: input.notes,
                },
            )
            .await?;

        tx.commit().await?;

        self.audit.emit(AuditEvent {
            actor_id: caller.actor_id,
            activity_type: "inventory.dispose".to_string(),
            description: format!(
                "Disposed {} {} of {} at {} ({})",
                quantity_base, item.base_unit, item.name, holder.display_name, reason.code
            ),
            metadata: json!({ "ledger_entry_ids": entries.iter().map(|e| e.id).collect::<Vec<_>>() }),
        });

        Ok(entries)
    }

    /// Return stock from an office holder to the central store
    pub async fn return_stock(
        &self,
        caller: &Caller,
        input: ReturnInput,
    ) -> AppResult<Vec<LedgerEntry>> {
        require(caller.capabilities.return_stock, "return")?;
        shared::validate_positive_quantity(input.quantity)
            .map_err(|_| AppError::QuantityNotPositive)?;
        let override_note = ensure_override(
            &caller.capabilities,
            input.allow_negative,
            input.override_note.as_deref(),
        )?;

        if input.from.kind != HolderType::Office {
            return Err(AppError::Validation {
                field: "from".to_string(),
                message: "Returns must originate from an office holder".to_string(),
            });
        }

        let units = self.units.snapshot().await?;
        let item = self.catalog.get_item(input.item_id).await?;
        let source = self.holders.resolve(input.from).await?;
        let store = self.holders.central_store().await?;

        // An explicit destination must resolve to the central store
        if let Some(to) = input.to {
            if to.kind != HolderType::CentralStore || to.id != store.holder_id {
                return Err(AppError::InvalidReturnDestination);
            }
        }

        let entered_unit = units.normalize(&input.unit)?.code.clone();
        let quantity_base =
            round_quantity(units.convert_to_base(input.quantity, &input.unit, &item.base_unit)?);

        let mut tx = self.db.begin().await?;

        let entries = self
            .move_stock(
                &mut tx,
                MoveStock {
                    entry_type: LedgerEntryType::Return,
                    caller,
                    item: &item,
                    source: &source,
                    destination: &store,
                    quantity_base,
                    entered_quantity: input.quantity,
                    entered_unit,
                    lot_id: input.lot_id,
                    container_id: input.container_id,
                    allow_negative: input.allow_negative,
                    override_note: override_note.clone(),
                    reference: input.reference,
                    notes: input.notes,
                },
            )
            .await?;

        tx.commit().await?;

        self.audit.emit(AuditEvent {
            actor_id: caller.actor_id,
            activity_type: "inventory.return".to_string(),
            description: format!(
                "Returned {} {} of {} from {} to {}",
                quantity_base, item.base_unit, item.name, source.display_name, store.display_name
            ),
            metadata: json!({ "ledger_entry_ids": entries.iter().map(|e| e.id).collect::<Vec<_>>() }),
        });

        Ok(entries)
    }

    /// Seed balances from an opening-balance batch
    ///
    /// Entries are additive, not an upsert: replaying a batch doubles the
    /// balance unless an idempotency key is supplied.
    pub async fn opening_balance(
        &self,
        caller: &Caller,
        input: OpeningBalanceInput,
    ) -> AppResult<Vec<LedgerEntry>> {
        require(caller.capabilities.opening_balance, "opening_balance")?;
        if input.entries.is_empty() {
            return Err(AppError::Validation {
                field: "entries".to_string(),
                message: "Opening balance batch cannot be empty".to_string(),
            });
        }

        let units = self.units.snapshot().await?;

        let mut tx = self.db.begin().await?;

        if let Some(key) = input.idempotency_key.as_deref() {
            let inserted = sqlx::query_scalar::<_, bool>(
                r#"
                INSERT INTO opening_balance_batches (idempotency_key)
                VALUES ($1)
                ON CONFLICT (idempotency_key) DO NOTHING
                RETURNING true
                "#,
            )
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?
            .unwrap_or(false);

            if !inserted {
                // Replay: hand back the original entries untouched
                tx.rollback().await?;
                return self.entries_for_batch(key).await;
            }
        }

        let mut entries = Vec::with_capacity(input.entries.len());
        for entry_input in &input.entries {
            let entry = self
                .post_opening_entry(&mut tx, caller, &units, entry_input, input.idempotency_key.as_deref())
                .await?;
            entries.push(entry);
        }

        tx.commit().await?;

        self.audit.emit(AuditEvent {
            actor_id: caller.actor_id,
            activity_type: "inventory.opening_balance".to_string(),
            description: format!("Seeded {} opening balance entries", entries.len()),
            metadata: json!({ "ledger_entry_ids": entries.iter().map(|e| e.id).collect::<Vec<_>>() }),
        });

        Ok(entries)
    }

    async fn post_opening_entry(
        &self,
        tx: &mut PgConnection,
        caller: &Caller,
        units: &UnitTable,
        input: &OpeningBalanceEntry,
        idempotency_key: Option<&str>,
    ) -> AppResult<LedgerEntry> {
        shared::validate_positive_quantity(input.quantity)
            .map_err(|_| AppError::QuantityNotPositive)?;

        let item = self.catalog.get_item(input.item_id).await?;
        let holder = self.holders.resolve(input.holder).await?;
        self.holders.ensure_chemical_capable(&item, &holder)?;

        let entered_unit = units.normalize(&input.unit)?.code.clone();
        let quantity_base =
            round_quantity(units.convert_to_base(input.quantity, &input.unit, &item.base_unit)?);

        let lot_id = if let Some(lot_id) = input.lot_id {
            let lot = self.lots.get_lot(tx, lot_id).await?;
            self.lots.ensure_lot_belongs_to_item(&lot, item.id)?;
            Some(lot.id)
        } else if item.requires_lot_tracking {
            let batch = input.batch_number.as_deref().ok_or(AppError::LotRequired)?;
            let expiry_raw = input.expiry_date.as_deref().ok_or(AppError::LotRequired)?;
            let expiry = parse_expiry(expiry_raw)?;
            let lot = self
                .lots
                .create_lot(tx, item.id, &holder, batch, expiry, quantity_base)
                .await?;
            Some(lot.id)
        } else {
            None
        };

        apply_balance_delta(
            tx,
            holder.holder_type,
            holder.holder_id,
            item.id,
            lot_id,
            quantity_base,
            false,
        )
        .await?;

        append_entry(
            tx,
            NewEntry {
                entry_type: LedgerEntryType::OpeningBalance,
                actor_id: caller.actor_id,
                from_holder: None,
                to_holder: Some(HolderRef::new(holder.holder_type, holder.holder_id)),
                consumable_item_id: item.id,
                lot_id,
                container_id: None,
                quantity_base,
                entered_quantity: input.quantity,
                entered_unit,
                reason_code_id: None,
                reference: None,
                notes: input.notes.clone(),
                metadata: match idempotency_key {
                    Some(key) => json!({ "idempotency_key": key }),
                    None => json!({}),
                },
            },
        )
        .await
    }

    async fn entries_for_batch(&self, idempotency_key: &str) -> AppResult<Vec<LedgerEntry>> {
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, entry_type, timestamp, actor_id, from_holder_type, from_holder_id,
                   to_holder_type, to_holder_id, consumable_item_id, lot_id, container_id,
                   quantity_base, entered_quantity, entered_unit, reason_code_id,
                   reference, notes, metadata
            FROM ledger_entries
            WHERE entry_type = 'opening_balance'
              AND metadata->>'idempotency_key' = $1
            ORDER BY timestamp
            "#,
        )
        .bind(idempotency_key)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(ledger_entry_from_row).collect()
    }

    // ========================================================================
    // Shared movement plumbing
    // ========================================================================

    /// Resolve the effective lot for an explicit lot/container reference
    async fn resolve_explicit_lot(
        &self,
        tx: &mut PgConnection,
        item: &ConsumableItem,
        lot_id: Option<Uuid>,
        container_id: Option<Uuid>,
    ) -> AppResult<Option<Uuid>> {
        if let Some(container_id) = container_id {
            let (container, container_item_id) = self.lots.get_container(tx, container_id).await?;
            self.lots
                .ensure_container_belongs_to_item(container_item_id, item.id)?;
            if let Some(lot_id) = lot_id {
                if lot_id != container.lot_id {
                    return Err(AppError::MismatchedLot);
                }
            }
            return Ok(Some(container.lot_id));
        }
        if let Some(lot_id) = lot_id {
            let lot = self.lots.get_lot(tx, lot_id).await?;
            self.lots.ensure_lot_belongs_to_item(&lot, item.id)?;
            return Ok(Some(lot.id));
        }
        Ok(None)
    }

    /// Build the allocation list for a decreasing operation
    ///
    /// Explicit lot/container references become a single leg; otherwise
    /// lot-tracked items go through FEFO and lot-free items get the
    /// synthetic null-lot allocation.
    async fn allocate(
        &self,
        tx: &mut PgConnection,
        item: &ConsumableItem,
        holder: &HolderContext,
        quantity_base: Decimal,
        lot_id: Option<Uuid>,
        container_id: Option<Uuid>,
        allow_negative: bool,
    ) -> AppResult<Vec<Allocation>> {
        if container_id.is_some() || lot_id.is_some() {
            let effective_lot = self
                .resolve_explicit_lot(tx, item, lot_id, container_id)
                .await?;
            return Ok(vec![Allocation {
                lot_id: effective_lot,
                quantity_base,
            }]);
        }

        if !item.requires_lot_tracking {
            return Ok(lot_free_allocation(quantity_base));
        }

        let available = fetch_availability(tx, holder, item.id).await?;
        match pick_lots(available, quantity_base) {
            Err(AppError::InsufficientStock(msg)) if allow_negative => {
                // Going negative on a lot-tracked item needs an explicit
                // lot to pin the shortfall to
                Err(AppError::InsufficientStock(format!(
                    "{}; specify a lot to allow a negative balance",
                    msg
                )))
            }
            other => other,
        }
    }

    async fn draw_down(
        &self,
        tx: &mut PgConnection,
        op: DrawDown<'_>,
    ) -> AppResult<Vec<LedgerEntry>> {
        // Container decrement happens once, before the per-lot legs
        if let Some(container_id) = op.container_id {
            let (container, container_item_id) =
                self.lots.get_container(tx, container_id).await?;
            self.lots
                .ensure_container_belongs_to_item(container_item_id, op.item.id)?;
            ensure_container_at(&container, op.holder)?;
            self.lots
                .drain_container(tx, &container, op.quantity_base, op.container_at_zero)
                .await?;
        }

        let allocations = self
            .allocate(
                tx,
                op.item,
                op.holder,
                op.quantity_base,
                op.lot_id,
                op.container_id,
                op.allow_negative,
            )
            .await?;

        let mut entries = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            apply_balance_delta(
                tx,
                op.holder.holder_type,
                op.holder.holder_id,
                op.item.id,
                allocation.lot_id,
                -allocation.quantity_base,
                op.allow_negative,
            )
            .await?;

            let entered = if allocations.len() == 1 {
                op.entered_quantity
            } else {
                allocation.quantity_base
            };
            let entry = append_entry(
                tx,
                NewEntry {
                    entry_type: op.entry_type,
                    actor_id: op.caller.actor_id,
                    from_holder: Some(HolderRef::new(
                        op.holder.holder_type,
                        op.holder.holder_id,
                    )),
                    to_holder: None,
                    consumable_item_id: op.item.id,
                    lot_id: allocation.lot_id,
                    container_id: op.container_id,
                    quantity_base: allocation.quantity_base,
                    entered_quantity: entered,
                    entered_unit: op.entered_unit.clone(),
                    reason_code_id: op.reason_code_id,
                    reference: None,
                    notes: op.notes.clone(),
                    metadata: override_metadata(op.override_note.as_deref()),
                },
            )
            .await?;
            entries.push(entry);
        }

        Ok(entries)
    }

    async fn move_stock(
        &self,
        tx: &mut PgConnection,
        op: MoveStock<'_>,
    ) -> AppResult<Vec<LedgerEntry>> {
        // Container path: whole-quantity move, relocate the container
        if let Some(container_id) = op.container_id {
            let (container, container_item_id) =
                self.lots.get_container(tx, container_id).await?;
            self.lots
                .ensure_container_belongs_to_item(container_item_id, op.item.id)?;
            ensure_container_at(&container, op.source)?;
            ensure_whole_container_move(container.current_quantity_base, op.quantity_base)?;
            self.lots.move_container(tx, container.id, op.destination).await?;

            let moved = container.current_quantity_base;
            apply_balance_delta(
                tx,
                op.source.holder_type,
                op.source.holder_id,
                op.item.id,
                Some(container.lot_id),
                -moved,
                op.allow_negative,
            )
            .await?;
            apply_balance_delta(
                tx,
                op.destination.holder_type,
                op.destination.holder_id,
                op.item.id,
                Some(container.lot_id),
                moved,
                false,
            )
            .await?;

            let entry = append_entry(
                tx,
                NewEntry {
                    entry_type: op.entry_type,
                    actor_id: op.caller.actor_id,
                    from_holder: Some(HolderRef::new(op.source.holder_type, op.source.holder_id)),
                    to_holder: Some(HolderRef::new(
                        op.destination.holder_type,
                        op.destination.holder_id,
                    )),
                    consumable_item_id: op.item.id,
                    lot_id: Some(container.lot_id),
                    container_id: Some(container.id),
                    quantity_base: moved,
                    entered_quantity: op.entered_quantity,
                    entered_unit: op.entered_unit,
                    reason_code_id: None,
                    reference: op.reference,
                    notes: op.notes,
                    metadata: override_metadata(op.override_note.as_deref()),
                },
            )
            .await?;
            return Ok(vec![entry]);
        }

        let allocations = self
            .allocate(
                tx,
                op.item,
                op.source,
                op.quantity_base,
                op.lot_id,
                None,
                op.allow_negative,
            )
            .await?;

        let mut entries = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            apply_balance_delta(
                tx,
                op.source.holder_type,
                op.source.holder_id,
                op.item.id,
                allocation.lot_id,
                -allocation.quantity_base,
                op.allow_negative,
            )
            .await?;
            apply_balance_delta(
                tx,
                op.destination.holder_type,
                op.destination.holder_id,
                op.item.id,
                allocation.lot_id,
                allocation.quantity_base,
                false,
            )
            .await?;

            let entered = if allocations.len() == 1 {
                op.entered_quantity
            } else {
                allocation.quantity_base
            };
            let entry = append_entry(
                tx,
                NewEntry {
                    entry_type: op.entry_type,
                    actor_id: op.caller.actor_id,
                    from_holder: Some(HolderRef::new(op.source.holder_type, op.source.holder_id)),
                    to_holder: Some(HolderRef::new(
                        op.destination.holder_type,
                        op.destination.holder_id,
                    )),
                    consumable_item_id: op.item.id,
                    lot_id: allocation.lot_id,
                    container_id: None,
                    quantity_base: allocation.quantity_base,
                    entered_quantity: entered,
                    entered_unit: op.entered_unit.clone(),
                    reason_code_id: None,
                    reference: op.reference.clone(),
                    notes: op.notes.clone(),
                    metadata: override_metadata(op.override_note.as_deref()),
                },
            )
            .await?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

/// Parameters for a decreasing operation at one holder
struct DrawDown<'a> {
    entry_type: LedgerEntryType,
    caller: &'a Caller,
    item: &'a ConsumableItem,
    holder: &'a HolderContext,
    quantity_base: Decimal,
    entered_quantity: Decimal,
    entered_unit: String,
    lot_id: Option<Uuid>,
    container_id: Option<Uuid>,
    container_at_zero: ContainerStatus,
    allow_negative: bool,
    override_note: Option<String>,
    reason_code_id: Option<Uuid>,
    notes: Option<String>,
}

/// Parameters for a two-sided movement between holders
struct MoveStock<'a> {
    entry_type: LedgerEntryType,
    caller: &'a Caller,
    item: &'a ConsumableItem,
    source: &'a HolderContext,
    destination: &'a HolderContext,
    quantity_base: Decimal,
    entered_quantity: Decimal,
    entered_unit: String,
    lot_id: Option<Uuid>,
    container_id: Option<Uuid>,
    allow_negative: bool,
    override_note: Option<String>,
    reference: Option<String>,
    notes: Option<String>,
}

fn ensure_container_at(container: &Container, holder: &HolderContext) -> AppResult<()> {
    if container.status != ContainerStatus::InStock {
        return Err(AppError::ContainerNotAtSource);
    }
    if container.current_holder_type != holder.holder_type
        || container.current_holder_id != holder.holder_id
    {
        return Err(AppError::ContainerNotAtSource);
    }
    Ok(())
}

fn override_metadata(override_note: Option<&str>) -> serde_json::Value {
    match override_note {
        Some(note) => json!({ "override_note": note }),
        None => json!({}),
    }
}

async fn refill_container(
    conn: &mut PgConnection,
    container: &Container,
    quantity_base: Decimal,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE containers
        SET current_quantity_base = current_quantity_base + $1,
            status = 'in_stock'
        WHERE id = $2
        "#,
    )
    .bind(round_quantity(quantity_base))
    .bind(container.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Fetch positive availability rows for FEFO, locking them for the
/// duration of the transaction
async fn fetch_availability(
    conn: &mut PgConnection,
    holder: &HolderContext,
    item_id: Uuid,
) -> AppResult<Vec<LotAvailability>> {
    let rows = sqlx::query_as::<_, (Option<Uuid>, Option<chrono::NaiveDate>, Decimal)>(
        r#"
        SELECT b.lot_id, l.expiry_date, b.quantity_on_hand_base
        FROM balances b
        LEFT JOIN lots l ON l.id = b.lot_id
        WHERE b.holder_type = $1
          AND b.holder_id = $2
          AND b.consumable_item_id = $3
          AND b.quantity_on_hand_base > 0
        ORDER BY l.received_at
        FOR UPDATE OF b
        "#,
    )
    .bind(holder.holder_type.as_str())
    .bind(holder.holder_id)
    .bind(item_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(lot_id, expiry_date, on_hand_base)| LotAvailability {
            lot_id,
            expiry_date,
            on_hand_base,
        })
        .collect())
}

/// Apply a signed delta to one materialized balance row
///
/// The row is locked, so a concurrent decrement that would overdraw
/// serializes behind this one and fails its own check instead of
/// clamping to zero. Lot-keyed deltas also roll into the lot's
/// `quantity_available_base`, which tracks the lot's total on hand
/// across all holders; the two legs of a transfer cancel out there.
async fn apply_balance_delta(
    conn: &mut PgConnection,
    holder_type: HolderType,
    holder_id: Uuid,
    item_id: Uuid,
    lot_id: Option<Uuid>,
    delta: Decimal,
    allow_negative: bool,
) -> AppResult<Decimal> {
    let current = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT quantity_on_hand_base
        FROM balances
        WHERE holder_type = $1
          AND holder_id = $2
          AND consumable_item_id = $3
          AND lot_id IS NOT DISTINCT FROM $4
        FOR UPDATE
        "#,
    )
    .bind(holder_type.as_str())
    .bind(holder_id)
    .bind(item_id)
    .bind(lot_id)
    .fetch_optional(&mut *conn)
    .await?;

    let new_quantity = round_quantity(current.unwrap_or(Decimal::ZERO) + delta);
    if new_quantity < -quantity_epsilon() && !allow_negative {
        return Err(AppError::InsufficientStock(format!(
            "movement of {} would overdraw on-hand quantity {}",
            delta,
            current.unwrap_or(Decimal::ZERO)
        )));
    }

    match current {
        Some(_) => {
            sqlx::query(
                r#"
                UPDATE balances
                SET quantity_on_hand_base = $5
                WHERE holder_type = $1
                  AND holder_id = $2
                  AND consumable_item_id = $3
                  AND lot_id IS NOT DISTINCT FROM $4
                "#,
            )
            .bind(holder_type.as_str())
            .bind(holder_id)
            .bind(item_id)
            .bind(lot_id)
            .bind(new_quantity)
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO balances (holder_type, holder_id, consumable_item_id, lot_id,
                                      quantity_on_hand_base, quantity_reserved_base)
                VALUES ($1, $2, $3, $4, $5, 0)
                "#,
            )
            .bind(holder_type.as_str())
            .bind(holder_id)
            .bind(item_id)
            .bind(lot_id)
            .bind(new_quantity)
            .execute(&mut *conn)
            .await?;
        }
    }

    if let Some(lot_id) = lot_id {
        sqlx::query(
            r#"
            UPDATE lots
            SET quantity_available_base = quantity_available_base + $1
            WHERE id = $2
            "#,
        )
        .bind(delta)
        .bind(lot_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(new_quantity)
}

// ============================================================================
// Ledger persistence
// ============================================================================

struct NewEntry {
    entry_type: LedgerEntryType,
    actor_id: Uuid,
    from_holder: Option<HolderRef>,
    to_holder: Option<HolderRef>,
    consumable_item_id: Uuid,
    lot_id: Option<Uuid>,
    container_id: Option<Uuid>,
    quantity_base: Decimal,
    entered_quantity: Decimal,
    entered_unit: String,
    reason_code_id: Option<Uuid>,
    reference: Option<String>,
    notes: Option<String>,
    metadata: serde_json::Value,
}

/// Row shape shared with the read side
#[derive(sqlx::FromRow)]
pub(crate) struct LedgerRow {
    pub id: Uuid,
    pub entry_type: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub actor_id: Uuid,
    pub from_holder_type: Option<String>,
    pub from_holder_id: Option<Uuid>,
    pub to_holder_type: Option<String>,
    pub to_holder_id: Option<Uuid>,
    pub consumable_item_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub container_id: Option<Uuid>,
    pub quantity_base: Decimal,
    pub entered_quantity: Decimal,
    pub entered_unit: String,
    pub reason_code_id: Option<Uuid>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
}

pub(crate) fn ledger_entry_from_row(row: LedgerRow) -> AppResult<LedgerEntry> {
    let entry_type = LedgerEntryType::from_str(&row.entry_type)
        .ok_or_else(|| AppError::Internal(format!("Unknown ledger entry type: {}", row.entry_type)))?;
    let from_holder = holder_ref_from_parts(row.from_holder_type.as_deref(), row.from_holder_id)?;
    let to_holder = holder_ref_from_parts(row.to_holder_type.as_deref(), row.to_holder_id)?;

    Ok(LedgerEntry {
        id: row.id,
        entry_type,
        timestamp: row.timestamp,
        actor_id: row.actor_id,
        from_holder,
        to_holder,
        consumable_item_id: row.consumable_item_id,
        lot_id: row.lot_id,
        container_id: row.container_id,
        quantity_base: row.quantity_base,
        entered_quantity: row.entered_quantity,
        entered_unit: row.entered_unit,
        reason_code_id: row.reason_code_id,
        reference: row.reference,
        notes: row.notes,
        metadata: row.metadata,
    })
}

fn holder_ref_from_parts(
    holder_type: Option<&str>,
    holder_id: Option<Uuid>,
) -> AppResult<Option<HolderRef>> {
    match (holder_type, holder_id) {
        (Some(t), Some(id)) => {
            let kind = HolderType::from_str(t)
                .ok_or_else(|| AppError::Internal(format!("Unknown holder type: {}", t)))?;
            Ok(Some(HolderRef::new(kind, id)))
        }
        _ => Ok(None),
    }
}

async fn append_entry(conn: &mut PgConnection, entry: NewEntry) -> AppResult<LedgerEntry> {
    let row = sqlx::query_as::<_, (Uuid, chrono::DateTime<chrono::Utc>)>(
        r#"
        INSERT INTO ledger_entries (entry_type, actor_id, from_holder_type, from_holder_id,
                                    to_holder_type, to_holder_id, consumable_item_id, lot_id,
                                    container_id, quantity_base, entered_quantity, entered_unit,
                                    reason_code_id, reference, notes, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING id, timestamp
        "#,
    )
    .bind(entry.entry_type.as_str())
    .bind(entry.actor_id)
    .bind(entry.from_holder.map(|h| h.kind.as_str()))
    .bind(entry.from_holder.map(|h| h.id))
    .bind(entry.to_holder.map(|h| h.kind.as_str()))
    .bind(entry.to_holder.map(|h| h.id))
    .bind(entry.consumable_item_id)
    .bind(entry.lot_id)
    .bind(entry.container_id)
    .bind(entry.quantity_base)
    .bind(entry.entered_quantity)
    .bind(&entry.entered_unit)
    .bind(entry.reason_code_id)
    .bind(&entry.reference)
    .bind(&entry.notes)
    .bind(&entry.metadata)
    .fetch_one(&mut *conn)
    .await?;

    Ok(LedgerEntry {
        id: row.0,
        entry_type: entry.entry_type,
        timestamp: row.1,
        actor_id: entry.actor_id,
        from_holder: entry.from_holder,
        to_holder: entry.to_holder,
        consumable_item_id: entry.consumable_item_id,
        lot_id: entry.lot_id,
        container_id: entry.container_id,
        quantity_base: entry.quantity_base,
        entered_quantity: entry.entered_quantity,
        entered_unit: entry.entered_unit,
        reason_code_id: entry.reason_code_id,
        reference: entry.reference,
        notes: entry.notes,
        metadata: entry.metadata,
    })
}
