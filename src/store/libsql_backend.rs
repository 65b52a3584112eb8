//! libSQL backend: async `IntakeStore` implementation.
//!
//! Each entity is stored as a JSON payload plus a few indexed columns. The
//! columns are authoritative for phase, rounds and timestamps; the payload
//! carries everything else. Create-if-absent uses
//! `INSERT ... ON CONFLICT DO NOTHING` and reads back the winner.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{
    ClarificationPhase, ClarificationRequest, ConversationId, ShipmentRecord,
};
use crate::store::migrations;
use crate::store::traits::IntakeStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(store.conn()).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(ndt.and_utc());
    }
    Err(DatabaseError::Serialization(format!("unreadable timestamp '{s}'")))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn parse_phase(s: &str) -> Result<ClarificationPhase, DatabaseError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| DatabaseError::Serialization(format!("unknown phase '{s}': {e}")))
}

const CLARIFICATION_COLUMNS: &str = "payload, phase, rounds, sent_at, updated_at";

/// Map a row to a ClarificationRequest.
///
/// Column order matches CLARIFICATION_COLUMNS.
fn row_to_clarification(row: &libsql::Row) -> Result<ClarificationRequest, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));
    let payload: String = row.get(0).map_err(read)?;
    let phase: String = row.get(1).map_err(read)?;
    let rounds: i64 = row.get(2).map_err(read)?;
    let sent_at: String = row.get(3).map_err(read)?;
    let updated_at: String = row.get(4).map_err(read)?;

    let mut request: ClarificationRequest = serde_json::from_str(&payload)
        .map_err(|e| DatabaseError::Serialization(format!("clarification payload: {e}")))?;
    request.phase = parse_phase(&phase)?;
    request.rounds = u32::try_from(rounds)
        .map_err(|_| DatabaseError::Serialization(format!("rounds out of range: {rounds}")))?;
    request.sent_at = parse_datetime(&sent_at)?;
    request.updated_at = parse_datetime(&updated_at)?;
    Ok(request)
}

fn row_to_record(row: &libsql::Row) -> Result<ShipmentRecord, DatabaseError> {
    let payload: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
    serde_json::from_str(&payload)
        .map_err(|e| DatabaseError::Serialization(format!("record payload: {e}")))
}

#[async_trait]
impl IntakeStore for LibSqlStore {
    // ── Clarification requests ──────────────────────────────────────

    async fn create_clarification_if_absent(
        &self,
        request: ClarificationRequest,
    ) -> Result<(ClarificationRequest, bool), DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO clarifications
                    (conversation_id, sender, freight_type, phase, rounds, payload, sent_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(conversation_id) DO NOTHING",
                params![
                    request.conversation_id.as_str(),
                    request.sender.as_str(),
                    request.freight_type.as_str(),
                    request.phase.to_string(),
                    i64::from(request.rounds),
                    to_json(&request)?,
                    request.sent_at.to_rfc3339(),
                    request.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_clarification_if_absent: {e}")))?;

        if inserted > 0 {
            debug!(conversation_id = %request.conversation_id, "Clarification inserted into DB");
            return Ok((request, true));
        }

        let existing = self
            .get_clarification(&request.conversation_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "clarification".into(),
                id: request.conversation_id.to_string(),
            })?;
        Ok((existing, false))
    }

    async fn get_clarification(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ClarificationRequest>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CLARIFICATION_COLUMNS} FROM clarifications WHERE conversation_id = ?1"
                ),
                params![conversation_id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_clarification: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_clarification(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_clarification: {e}"))),
        }
    }

    async fn update_clarification(
        &self,
        request: &ClarificationRequest,
    ) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE clarifications
                 SET freight_type = ?2, phase = ?3, rounds = ?4, payload = ?5, sent_at = ?6, updated_at = ?7
                 WHERE conversation_id = ?1",
                params![
                    request.conversation_id.as_str(),
                    request.freight_type.as_str(),
                    request.phase.to_string(),
                    i64::from(request.rounds),
                    to_json(request)?,
                    request.sent_at.to_rfc3339(),
                    request.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_clarification: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "clarification".into(),
                id: request.conversation_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_pending_clarifications(
        &self,
    ) -> Result<Vec<ClarificationRequest>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CLARIFICATION_COLUMNS} FROM clarifications WHERE phase = ?1 ORDER BY sent_at ASC"
                ),
                params![ClarificationPhase::ClarificationSent.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_clarifications: {e}")))?;

        let mut pending = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_clarifications: {e}")))?
        {
            pending.push(row_to_clarification(&row)?);
        }
        Ok(pending)
    }

    // ── Shipment records ────────────────────────────────────────────

    async fn create_record_if_absent(
        &self,
        record: ShipmentRecord,
    ) -> Result<(ShipmentRecord, bool), DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO shipment_records (id, conversation_id, sender, freight_type, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(conversation_id) DO NOTHING",
                params![
                    record.id.to_string(),
                    record.conversation_id.as_str(),
                    record.sender.as_str(),
                    record.freight_type.as_str(),
                    to_json(&record)?,
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_record_if_absent: {e}")))?;

        if inserted > 0 {
            debug!(
                conversation_id = %record.conversation_id,
                record_id = %record.id,
                "Shipment record inserted into DB"
            );
            return Ok((record, true));
        }

        let existing = self
            .get_record(&record.conversation_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "shipment_record".into(),
                id: record.conversation_id.to_string(),
            })?;
        Ok((existing, false))
    }

    async fn get_record(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ShipmentRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT payload FROM shipment_records WHERE conversation_id = ?1",
                params![conversation_id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_record: {e}"))),
        }
    }
}
