//! Fire-and-forget audit sink
//!
//! Audit writes happen after the inventory transaction has committed and
//! never affect its outcome; a failed write is logged and dropped.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuditService {
    db: PgPool,
}

/// One audit event describing a committed operation
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor_id: Uuid,
    pub activity_type: String,
    pub description: String,
    pub metadata: Value,
}

impl AuditService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Emit an audit event out-of-band
    pub fn emit(&self, event: AuditEvent) {
        let db = self.db.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_log (actor_id, activity_type, description, metadata)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(event.actor_id)
            .bind(&event.activity_type)
            .bind(&event.description)
            .bind(&event.metadata)
            .execute(&db)
            .await;

            if let Err(e) = result {
                tracing::warn!(
                    activity_type = %event.activity_type,
                    error = %e,
                    "Failed to write audit entry"
                );
            }
        });
    }
}
