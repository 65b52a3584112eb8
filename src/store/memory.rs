//! In-memory `IntakeStore` for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::pipeline::types::{
    ClarificationPhase, ClarificationRequest, ConversationId, ShipmentRecord,
};
use crate::store::traits::IntakeStore;

#[derive(Default)]
pub struct InMemoryStore {
    clarifications: RwLock<HashMap<ConversationId, ClarificationRequest>>,
    records: RwLock<HashMap<ConversationId, ShipmentRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of shipment records held.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl IntakeStore for InMemoryStore {
    async fn create_clarification_if_absent(
        &self,
        request: ClarificationRequest,
    ) -> Result<(ClarificationRequest, bool), DatabaseError> {
        let mut map = self.clarifications.write().await;
        if let Some(existing) = map.get(&request.conversation_id) {
            return Ok((existing.clone(), false));
        }
        map.insert(request.conversation_id.clone(), request.clone());
        Ok((request, true))
    }

    async fn get_clarification(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ClarificationRequest>, DatabaseError> {
        Ok(self.clarifications.read().await.get(conversation_id).cloned())
    }

    async fn update_clarification(
        &self,
        request: &ClarificationRequest,
    ) -> Result<(), DatabaseError> {
        let mut map = self.clarifications.write().await;
        match map.get_mut(&request.conversation_id) {
            Some(slot) => {
                *slot = request.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound {
                entity: "clarification".into(),
                id: request.conversation_id.to_string(),
            }),
        }
    }

    async fn list_pending_clarifications(
        &self,
    ) -> Result<Vec<ClarificationRequest>, DatabaseError> {
        let map = self.clarifications.read().await;
        let mut pending: Vec<_> = map
            .values()
            .filter(|r| r.phase == ClarificationPhase::ClarificationSent)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.sent_at);
        Ok(pending)
    }

    async fn create_record_if_absent(
        &self,
        record: ShipmentRecord,
    ) -> Result<(ShipmentRecord, bool), DatabaseError> {
        let mut map = self.records.write().await;
        if let Some(existing) = map.get(&record.conversation_id) {
            return Ok((existing.clone(), false));
        }
        map.insert(record.conversation_id.clone(), record.clone());
        Ok((record, true))
    }

    async fn get_record(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ShipmentRecord>, DatabaseError> {
        Ok(self.records.read().await.get(conversation_id).cloned())
    }
}
