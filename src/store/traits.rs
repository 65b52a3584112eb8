//! `IntakeStore` trait: the keyed repository behind the pipeline.
//!
//! Both entity kinds are keyed by conversation id and support an atomic
//! "create if absent, else return existing" insert. Concurrent messages in
//! the same conversation rely on that to avoid double clarifications and
//! duplicate records.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::pipeline::types::{ClarificationRequest, ConversationId, ShipmentRecord};

#[async_trait]
pub trait IntakeStore: Send + Sync {
    // ── Clarification requests ──────────────────────────────────────

    /// Insert `request` unless one already exists for its conversation.
    ///
    /// Returns the stored request and `true` if this call created it.
    async fn create_clarification_if_absent(
        &self,
        request: ClarificationRequest,
    ) -> Result<(ClarificationRequest, bool), DatabaseError>;

    async fn get_clarification(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ClarificationRequest>, DatabaseError>;

    /// Replace an existing request. Errors with `NotFound` if absent.
    async fn update_clarification(&self, request: &ClarificationRequest)
    -> Result<(), DatabaseError>;

    /// Requests still waiting on the sender (phase `clarification_sent`).
    async fn list_pending_clarifications(&self)
    -> Result<Vec<ClarificationRequest>, DatabaseError>;

    // ── Shipment records ────────────────────────────────────────────

    /// Insert `record` unless one already exists for its conversation.
    ///
    /// Returns the stored record and `true` if this call created it.
    async fn create_record_if_absent(
        &self,
        record: ShipmentRecord,
    ) -> Result<(ShipmentRecord, bool), DatabaseError>;

    async fn get_record(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ShipmentRecord>, DatabaseError>;
}
