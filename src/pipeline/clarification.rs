//! Clarification manager: the per-conversation intake state machine.
//!
//! On an invalid first pass the manager persists a `ClarificationRequest`
//! and composes the outbound question. When a correlated reply arrives it
//! extracts from the reply alone, merges into the stored snapshot, and
//! re-runs resolution and validation on the merged data.
//!
//! Merge rule: a reply value replaces the snapshot value only when the
//! snapshot field was absent or carried an issue in the prior report.
//! Fields that were already clean are never overwritten.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::ClarificationConfig;
use crate::error::PipelineError;
use crate::pipeline::correlation::tagged_subject;
use crate::pipeline::extractor::Extractor;
use crate::pipeline::freight_type;
use crate::pipeline::types::{
    ClarificationPhase, ClarificationRequest, ConversationId, ExtractedShipment, FreightType,
    HazmatInfo, InboundMessage, IssueKind, OutboundMessage, ShipmentField, ShipmentRecord,
    ValidationReport,
};
use crate::pipeline::validator::Validator;
use crate::store::IntakeStore;

/// Result of applying one reply to a pending request.
#[derive(Debug)]
pub enum ReplyOutcome {
    /// Merged data is valid; the request sits in `ReplyMergedValid` and
    /// the caller should materialize `request.snapshot`.
    Resolved(ClarificationRequest),
    /// Still invalid; another clarification goes out.
    FollowUp {
        request: ClarificationRequest,
        outbound: OutboundMessage,
    },
    /// Still invalid and the round bound is spent; the request is abandoned.
    Exhausted(ClarificationRequest),
}

pub struct ClarificationManager {
    store: Arc<dyn IntakeStore>,
    extractor: Arc<Extractor>,
    validator: Validator,
    config: ClarificationConfig,
}

impl ClarificationManager {
    pub fn new(
        store: Arc<dyn IntakeStore>,
        extractor: Arc<Extractor>,
        validator: Validator,
        config: ClarificationConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            validator,
            config,
        }
    }

    pub fn config(&self) -> &ClarificationConfig {
        &self.config
    }

    /// Open a clarification for an invalid first pass.
    ///
    /// Returns the stored request and the outbound message. The message is
    /// `None` when a request already existed for the conversation, so a
    /// racing duplicate never sends a second question.
    pub async fn begin(
        &self,
        conversation_id: ConversationId,
        message: &InboundMessage,
        shipment: ExtractedShipment,
        report: ValidationReport,
    ) -> Result<(ClarificationRequest, Option<OutboundMessage>), PipelineError> {
        let now = Utc::now();
        let mut request = ClarificationRequest {
            conversation_id,
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            freight_type: report.freight_type,
            outstanding: report.blocking_issues(),
            snapshot: shipment,
            report,
            phase: ClarificationPhase::ClassifiedInvalid,
            rounds: 1,
            sent_at: now,
            response_received: false,
            resulted_in_record: false,
            processed_message_ids: vec![message.id.clone()],
            updated_at: now,
        };
        request.transition(ClarificationPhase::ClarificationSent)?;

        let (stored, created) = self.store.create_clarification_if_absent(request).await?;
        if !created {
            warn!(
                conversation_id = %stored.conversation_id,
                phase = %stored.phase,
                "Clarification already exists, not sending another"
            );
            return Ok((stored, None));
        }

        let outbound = compose_clarification(&stored);
        info!(
            conversation_id = %stored.conversation_id,
            freight_type = %stored.freight_type,
            outstanding = stored.outstanding.len(),
            "Clarification sent"
        );
        Ok((stored, Some(outbound)))
    }

    /// Apply a correlated reply to a request in `ClarificationSent`.
    ///
    /// Extraction faults propagate before anything is persisted, so a
    /// redelivered reply is processed from scratch.
    pub async fn handle_reply(
        &self,
        mut request: ClarificationRequest,
        message: &InboundMessage,
    ) -> Result<ReplyOutcome, PipelineError> {
        let reply = self
            .extractor
            .extract_reply(&message.body, &request.outstanding)
            .await?;

        let merged = merge(&request.snapshot, &request.report, &reply.shipment);
        let freight_type = freight_type::resolve(&merged, self.validator.policy());
        let report = self.validator.validate(&merged, freight_type);

        request.response_received = true;
        request.processed_message_ids.push(message.id.clone());
        request.freight_type = freight_type;
        request.snapshot = merged;
        request.outstanding = report.blocking_issues();
        let valid = report.is_valid();
        request.report = report;

        if valid {
            request.transition(ClarificationPhase::ReplyMergedValid)?;
            self.store.update_clarification(&request).await?;
            info!(
                conversation_id = %request.conversation_id,
                freight_type = %freight_type,
                rounds = request.rounds,
                "Reply completed the shipment"
            );
            return Ok(ReplyOutcome::Resolved(request));
        }

        request.transition(ClarificationPhase::ReplyMergedInvalid)?;

        if request.rounds >= self.config.max_rounds {
            request.transition(ClarificationPhase::Abandoned)?;
            self.store.update_clarification(&request).await?;
            warn!(
                conversation_id = %request.conversation_id,
                rounds = request.rounds,
                outstanding = request.outstanding.len(),
                "Clarification rounds exhausted, abandoning"
            );
            return Ok(ReplyOutcome::Exhausted(request));
        }

        request.transition(ClarificationPhase::ClarificationSent)?;
        request.rounds += 1;
        request.sent_at = Utc::now();
        self.store.update_clarification(&request).await?;

        let outbound = compose_clarification(&request);
        info!(
            conversation_id = %request.conversation_id,
            round = request.rounds,
            outstanding = request.outstanding.len(),
            "Follow-up clarification sent"
        );
        Ok(ReplyOutcome::FollowUp { request, outbound })
    }

    /// Close a resolved request once its record exists.
    pub async fn mark_materialized(
        &self,
        mut request: ClarificationRequest,
        record: &ShipmentRecord,
    ) -> Result<ClarificationRequest, PipelineError> {
        request.transition(ClarificationPhase::Materialized)?;
        request.resulted_in_record = true;
        self.store.update_clarification(&request).await?;
        info!(
            conversation_id = %request.conversation_id,
            record_id = %record.id,
            "Clarification closed with a shipment record"
        );
        Ok(request)
    }

    /// Whether a pending request has waited longer than the reply timeout.
    pub fn is_overdue(&self, request: &ClarificationRequest, now: DateTime<Utc>) -> bool {
        if request.phase != ClarificationPhase::ClarificationSent {
            return false;
        }
        let waited = now.signed_duration_since(request.sent_at);
        waited.to_std().is_ok_and(|w| w >= self.config.reply_timeout)
    }

    /// Abandon a request whose reply never came.
    pub async fn expire(
        &self,
        mut request: ClarificationRequest,
    ) -> Result<ClarificationRequest, PipelineError> {
        request.transition(ClarificationPhase::NoReplyTimeout)?;
        request.transition(ClarificationPhase::Abandoned)?;
        self.store.update_clarification(&request).await?;
        warn!(
            conversation_id = %request.conversation_id,
            rounds = request.rounds,
            "No reply before timeout, clarification abandoned"
        );
        Ok(request)
    }
}

// ── Merge ───────────────────────────────────────────────────────────

/// Merge a reply extraction into the prior snapshot.
///
/// For each field, `reply` wins only if `prior` lacks the field or the
/// prior report flagged it. Hazmat subfields merge independently.
pub fn merge(
    prior: &ExtractedShipment,
    prior_report: &ValidationReport,
    reply: &ExtractedShipment,
) -> ExtractedShipment {
    let flagged = prior_report.flagged_fields();
    let open = |field: ShipmentField| !prior.has(field) || flagged.contains(&field);

    fn pick<T: Clone>(open: bool, prior: &Option<T>, reply: &Option<T>) -> Option<T> {
        match reply {
            Some(value) if open => Some(value.clone()),
            _ => prior.clone(),
        }
    }

    ExtractedShipment {
        pickup_location: pick(
            open(ShipmentField::PickupLocation),
            &prior.pickup_location,
            &reply.pickup_location,
        ),
        delivery_location: pick(
            open(ShipmentField::DeliveryLocation),
            &prior.delivery_location,
            &reply.delivery_location,
        ),
        weight_lb: pick(open(ShipmentField::Weight), &prior.weight_lb, &reply.weight_lb),
        commodity: pick(open(ShipmentField::Commodity), &prior.commodity, &reply.commodity),
        pickup_timing: pick(
            open(ShipmentField::PickupTiming),
            &prior.pickup_timing,
            &reply.pickup_timing,
        ),
        equipment_type: pick(
            open(ShipmentField::EquipmentType),
            &prior.equipment_type,
            &reply.equipment_type,
        ),
        piece_count: pick(open(ShipmentField::PieceCount), &prior.piece_count, &reply.piece_count),
        freight_class: pick(
            open(ShipmentField::FreightClass),
            &prior.freight_class,
            &reply.freight_class,
        ),
        dimensions: pick(open(ShipmentField::Dimensions), &prior.dimensions, &reply.dimensions),
        temperature: pick(
            open(ShipmentField::Temperature),
            &prior.temperature,
            &reply.temperature,
        ),
        hazmat: merge_hazmat(prior.hazmat.as_ref(), reply.hazmat.as_ref(), &open),
    }
}

fn merge_hazmat(
    prior: Option<&HazmatInfo>,
    reply: Option<&HazmatInfo>,
    open: &dyn Fn(ShipmentField) -> bool,
) -> Option<HazmatInfo> {
    let (prior, reply) = match (prior, reply) {
        (p, None) => return p.cloned(),
        (None, Some(r)) => (HazmatInfo::default(), r),
        (Some(p), Some(r)) => (p.clone(), r),
    };

    let take = |field: ShipmentField, p: &Option<String>, r: &Option<String>| match r {
        Some(v) if open(field) => Some(v.clone()),
        _ => p.clone(),
    };

    Some(HazmatInfo {
        class: take(ShipmentField::HazmatClass, &prior.class, &reply.class),
        un_number: take(ShipmentField::UnNumber, &prior.un_number, &reply.un_number),
        proper_shipping_name: take(
            ShipmentField::ProperShippingName,
            &prior.proper_shipping_name,
            &reply.proper_shipping_name,
        ),
        packing_group: take(
            ShipmentField::PackingGroup,
            &prior.packing_group,
            &reply.packing_group,
        ),
        emergency_contact: take(
            ShipmentField::EmergencyContact,
            &prior.emergency_contact,
            &reply.emergency_contact,
        ),
        placard_required: prior.placard_required.or(reply.placard_required),
        declared: prior.declared || reply.declared,
    })
}

// ── Outbound text ───────────────────────────────────────────────────

/// Compose the clarification for a request's outstanding issues.
///
/// Lists exactly the outstanding issues, one line each, and tags the
/// subject so the reply correlates back to this conversation.
pub fn compose_clarification(request: &ClarificationRequest) -> OutboundMessage {
    let mut body = String::with_capacity(512);
    body.push_str("Hello,\n\nThanks for your shipment request");
    if request.freight_type != FreightType::Unknown {
        body.push_str(&format!(" ({})", freight_label(request.freight_type)));
    }
    body.push_str(". Before we can quote it we need a few more details:\n\n");

    for issue in &request.outstanding {
        body.push_str(&format!("- {}\n", question_for(issue.field, issue.kind, &issue.message)));
    }

    body.push_str("\nPlease reply to this email with the details above.\n");

    OutboundMessage {
        conversation_id: request.conversation_id.clone(),
        to: request.sender.clone(),
        subject: tagged_subject(&request.subject, &request.conversation_id),
        body,
    }
}

fn question_for(field: ShipmentField, kind: IssueKind, message: &str) -> String {
    let label = capitalize(field.label());
    match kind {
        IssueKind::Missing => match field {
            ShipmentField::PickupLocation | ShipmentField::DeliveryLocation => {
                format!("{label}: full street address with city, state and ZIP")
            }
            ShipmentField::Temperature => {
                format!("{label}: required temperature or range (e.g. -10°F or 34-38°F)")
            }
            ShipmentField::PickupTiming => format!("{label}: calendar date and time window"),
            _ => format!("{label}: please provide"),
        },
        IssueKind::Insufficient | IssueKind::Invalid => {
            format!("{label}: {message}; please confirm the exact value")
        }
    }
}

fn freight_label(freight_type: FreightType) -> &'static str {
    match freight_type {
        FreightType::DryVan => "dry van",
        FreightType::Reefer => "refrigerated",
        FreightType::Flatbed => "flatbed",
        FreightType::Hazmat => "hazmat",
        FreightType::Ltl => "LTL",
        FreightType::Partial => "partial truckload",
        FreightType::Unknown => "unknown",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
