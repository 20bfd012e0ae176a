//! Unit conversion table and registry
//!
//! The registry is administrator-managed and cached with a short TTL.
//! Operations never read the cache directly mid-flight: they take one
//! immutable [`UnitTable`] snapshot up front and pass it through the call
//! chain, so a concurrent unit edit can never apply two different
//! conversion factors to the same logical quantity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared::{validate_unit_code, UnitDefinition, UnitGroup};

use crate::error::{AppError, AppResult};

/// Immutable snapshot of the unit registry
///
/// All lookups are case-insensitive over codes and aliases.
#[derive(Debug, Clone)]
pub struct UnitTable {
    units: Vec<UnitDefinition>,
}

impl UnitTable {
    pub fn new(units: Vec<UnitDefinition>) -> Self {
        Self { units }
    }

    pub fn units(&self) -> &[UnitDefinition] {
        &self.units
    }

    /// Resolve user input to a registered unit
    pub fn normalize(&self, input: &str) -> AppResult<&UnitDefinition> {
        self.units
            .iter()
            .find(|u| u.matches(input))
            .ok_or_else(|| AppError::UnsupportedUnit(input.trim().to_string()))
    }

    /// Convert a quantity between two units of the same dimensional group
    ///
    /// `quantity * to_base(from) / to_base(to)`; conversion across groups
    /// is always an error.
    pub fn convert(&self, quantity: Decimal, from: &str, to: &str) -> AppResult<Decimal> {
        let from_unit = self.normalize(from)?;
        let to_unit = self.normalize(to)?;
        if from_unit.group != to_unit.group {
            return Err(AppError::IncompatibleUnits {
                from: from_unit.code.clone(),
                to: to_unit.code.clone(),
            });
        }
        Ok(quantity * from_unit.to_base / to_unit.to_base)
    }

    /// Convert an entered quantity into the item's base unit
    pub fn convert_to_base(&self, quantity: Decimal, from: &str, base: &str) -> AppResult<Decimal> {
        self.convert(quantity, from, base)
    }
}

struct CachedTable {
    table: Arc<UnitTable>,
    loaded_at: Instant,
}

/// Unit registry service with a TTL cache
///
/// The cache is owned here and injected where needed; unit writes
/// invalidate it synchronously before returning.
#[derive(Clone)]
pub struct UnitService {
    db: PgPool,
    cache: Arc<RwLock<Option<CachedTable>>>,
    ttl: Duration,
}

/// Input for registering a unit
#[derive(Debug, Deserialize)]
pub struct CreateUnitInput {
    pub code: String,
    pub group: UnitGroup,
    pub to_base: Decimal,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Input for updating a unit
#[derive(Debug, Deserialize)]
pub struct UpdateUnitInput {
    pub to_base: Option<Decimal>,
    pub aliases: Option<Vec<String>>,
}

impl UnitService {
    pub fn new(db: PgPool, cache_ttl: Duration) -> Self {
        Self {
            db,
            cache: Arc::new(RwLock::new(None)),
            ttl: cache_ttl,
        }
    }

    /// Take one consistent snapshot of the unit table
    pub async fn snapshot(&self) -> AppResult<Arc<UnitTable>> {
        {
            let cached = self.cache.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(entry.table.clone());
                }
            }
        }

        let table = Arc::new(self.load_table().await?);
        let mut cached = self.cache.write().await;
        *cached = Some(CachedTable {
            table: table.clone(),
            loaded_at: Instant::now(),
        });
        Ok(table)
    }

    /// Drop the cached table; the next snapshot reloads from the database
    pub async fn invalidate(&self) {
        let mut cached = self.cache.write().await;
        *cached = None;
    }

    async fn load_table(&self) -> AppResult<UnitTable> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, Decimal, Vec<String>)>(
            r#"
            SELECT id, code, unit_group, to_base, aliases
            FROM units
            ORDER BY code
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let units = rows
            .into_iter()
            .map(|(id, code, group, to_base, aliases)| {
                let group = UnitGroup::from_str(&group)
                    .ok_or_else(|| AppError::Internal(format!("Unknown unit group: {}", group)))?;
                Ok(UnitDefinition {
                    id,
                    code,
                    group,
                    to_base,
                    aliases,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(UnitTable::new(units))
    }

    /// List all registered units
    pub async fn list_units(&self) -> AppResult<Vec<UnitDefinition>> {
        Ok(self.load_table().await?.units.clone())
    }

    /// Register a new unit
    pub async fn create_unit(&self, input: CreateUnitInput) -> AppResult<UnitDefinition> {
        let code = input.code.trim().to_lowercase();
        validate_unit_code(&code).map_err(|msg| AppError::Validation {
            field: "code".to_string(),
            message: msg.to_string(),
        })?;
        if input.to_base <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "to_base".to_string(),
                message: "Conversion factor must be positive".to_string(),
            });
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM units WHERE lower(code) = $1)",
        )
        .bind(&code)
        .fetch_one(&self.db)
        .await?;
        if exists {
            return Err(AppError::DuplicateEntry(format!("unit {}", code)));
        }

        let aliases: Vec<String> = input
            .aliases
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();

        let row = sqlx::query_as::<_, (Uuid, String, String, Decimal, Vec<String>)>(
            r#"
            INSERT INTO units (code, unit_group, to_base, aliases)
            VALUES ($1, $2, $3, $4)
            RETURNING id, code, unit_group, to_base, aliases
            "#,
        )
        .bind(&code)
        .bind(input.group.as_str())
        .bind(input.to_base)
        .bind(&aliases)
        .fetch_one(&self.db)
        .await?;

        self.invalidate().await;

        Ok(UnitDefinition {
            id: row.0,
            code: row.1,
            group: input.group,
            to_base: row.3,
            aliases: row.4,
        })
    }

    /// Update an existing unit's conversion factor or aliases
    pub async fn update_unit(&self, unit_id: Uuid, input: UpdateUnitInput) -> AppResult<UnitDefinition> {
        let existing = sqlx::query_as::<_, (Decimal, Vec<String>)>(
            "SELECT to_base, aliases FROM units WHERE id = $1",
        )
        .bind(unit_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Unit".to_string()))?;

        let to_base = input.to_base.unwrap_or(existing.0);
        if to_base <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "to_base".to_string(),
                message: "Conversion factor must be positive".to_string(),
            });
        }
        let aliases = input
            .aliases
            .map(|a| {
                a.iter()
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or(existing.1);

        let row = sqlx::query_as::<_, (Uuid, String, String, Decimal, Vec<String>)>(
            r#"
            UPDATE units
            SET to_base = $1, aliases = $2
            WHERE id = $3
            RETURNING id, code, unit_group, to_base, aliases
            "#,
        )
        .bind(to_base)
        .bind(&aliases)
        .bind(unit_id)
        .fetch_one(&self.db)
        .await?;

        self.invalidate().await;

        let group = UnitGroup::from_str(&row.2)
            .ok_or_else(|| AppError::Internal(format!("Unknown unit group: {}", row.2)))?;
        Ok(UnitDefinition {
            id: row.0,
            code: row.1,
            group,
            to_base: row.3,
            aliases: row.4,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn unit(code: &str, group: UnitGroup, to_base: &str, aliases: &[&str]) -> UnitDefinition {
        UnitDefinition {
            id: Uuid::new_v4(),
            code: code.to_string(),
            group,
            to_base: dec(to_base),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn table() -> UnitTable {
        UnitTable::new(vec![
            unit("g", UnitGroup::Mass, "1", &["gram", "grams"]),
            unit("kg", UnitGroup::Mass, "1000", &["kilogram"]),
            unit("mg", UnitGroup::Mass, "0.001", &[]),
            unit("ml", UnitGroup::Volume, "1", &["milliliter", "cc"]),
            unit("l", UnitGroup::Volume, "1000", &["liter", "litre"]),
            unit("pc", UnitGroup::Count, "1", &["piece", "each", "ea"]),
            unit("box12", UnitGroup::Count, "12", &[]),
        ])
    }

    #[test]
    fn test_normalize_by_code() {
        let t = table();
        assert_eq!(t.normalize("kg").unwrap().code, "kg");
    }

    #[test]
    fn test_normalize_case_insensitive() {
        let t = table();
        assert_eq!(t.normalize("KG").unwrap().code, "kg");
        assert_eq!(t.normalize(" Kg ").unwrap().code, "kg");
    }

    #[test]
    fn test_normalize_by_alias() {
        let t = table();
        assert_eq!(t.normalize("Kilogram").unwrap().code, "kg");
        assert_eq!(t.normalize("cc").unwrap().code, "ml");
        assert_eq!(t.normalize("EA").unwrap().code, "pc");
    }

    #[test]
    fn test_normalize_unsupported() {
        let t = table();
        assert!(matches!(
            t.normalize("furlong"),
            Err(AppError::UnsupportedUnit(_))
        ));
    }

    #[test]
    fn test_convert_to_base() {
        let t = table();
        assert_eq!(t.convert(dec("2.5"), "kg", "g").unwrap(), dec("2500"));
        assert_eq!(t.convert(dec("500"), "mg", "g").unwrap(), dec("0.5"));
        assert_eq!(t.convert(dec("3"), "box12", "pc").unwrap(), dec("36"));
    }

    #[test]
    fn test_convert_cross_group_fails() {
        let t = table();
        assert!(matches!(
            t.convert(dec("10"), "g", "ml"),
            Err(AppError::IncompatibleUnits { .. })
        ));
        assert!(matches!(
            t.convert(dec("10"), "pc", "kg"),
            Err(AppError::IncompatibleUnits { .. })
        ));
    }

    #[test]
    fn test_convert_identity() {
        let t = table();
        assert_eq!(t.convert(dec("42.42"), "g", "g").unwrap(), dec("42.42"));
    }

    proptest! {
        /// Converting to base and back recovers the quantity within 1e-6
        #[test]
        fn prop_conversion_round_trip(
            raw in 1i64..10_000_000i64,
            unit_idx in 0usize..3,
        ) {
            let t = table();
            let codes = ["g", "kg", "mg"];
            let from = codes[unit_idx];
            let q = Decimal::new(raw, 3); // 0.001 .. 10000.000

            let in_base = t.convert(q, from, "g").unwrap();
            let back = t.convert(in_base, "g", from).unwrap();

            let diff = (back - q).abs();
            prop_assert!(diff <= Decimal::new(1, 6), "diff {} too large", diff);
        }

        /// Conversion scales linearly with the quantity
        #[test]
        fn prop_conversion_linear(raw in 1i64..1_000_000i64) {
            let t = table();
            let q = Decimal::new(raw, 2);
            let single = t.convert(q, "kg", "g").unwrap();
            let double = t.convert(q * Decimal::from(2), "kg", "g").unwrap();
            prop_assert_eq!(double, single * Decimal::from(2));
        }
    }
}
