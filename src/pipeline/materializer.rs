//! Turns a validated shipment into its one `ShipmentRecord`.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::types::{ConversationId, ExtractedShipment, ShipmentRecord, ValidationReport};
use crate::store::IntakeStore;

pub struct Materializer {
    store: Arc<dyn IntakeStore>,
}

impl Materializer {
    pub fn new(store: Arc<dyn IntakeStore>) -> Self {
        Self { store }
    }

    /// Create the record for `conversation_id`, or return the existing one.
    ///
    /// Refuses a report with blocking issues. The boolean is `true` only
    /// for the call that actually created the record.
    pub async fn materialize(
        &self,
        conversation_id: &ConversationId,
        sender: &str,
        shipment: &ExtractedShipment,
        report: &ValidationReport,
    ) -> Result<(ShipmentRecord, bool), PipelineError> {
        if !report.is_valid() {
            return Err(PipelineError::NotValid {
                conversation_id: conversation_id.to_string(),
                blocking: report.blocking_issues().len(),
            });
        }

        let record = ShipmentRecord {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.clone(),
            sender: sender.to_string(),
            freight_type: report.freight_type,
            shipment: shipment.clone(),
            warnings: report.warnings(),
            created_at: Utc::now(),
        };

        let (record, created) = self.store.create_record_if_absent(record).await?;
        if created {
            info!(
                conversation_id = %conversation_id,
                record_id = %record.id,
                freight_type = %record.freight_type,
                warnings = record.warnings.len(),
                "Shipment record materialized"
            );
        } else {
            info!(
                conversation_id = %conversation_id,
                record_id = %record.id,
                "Shipment record already exists, returning it"
            );
        }
        Ok((record, created))
    }
}
