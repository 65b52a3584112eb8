//! End-to-end intake tests.
//!
//! Each test wires the full pipeline over an in-memory store and a stub
//! text service that answers by matching phrases in the prompt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use freight_intake::config::{ClarificationConfig, ClassifierConfig, FreightPolicy};
use freight_intake::error::LlmError;
use freight_intake::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, RetryPolicy,
};
use freight_intake::pipeline::types::{
    ClarificationPhase, ConversationId, FreightType, InboundMessage, IssueKind, OutboundMessage,
    ShipmentField, ShipmentRecord,
};
use freight_intake::pipeline::{
    ClarificationManager, Classifier, Extractor, IntakeOutcome, IntakeProcessor, RulesEngine,
    Validator,
};
use freight_intake::review::{ReviewQueue, ReviewReason};
use freight_intake::store::{InMemoryStore, IntakeStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const REQUEST: &str = r#"{"is_request": true, "confidence": 0.95, "category": "new_shipment_request", "rationale": "new load"}"#;

/// Stub text service. Classification prompts get `REQUEST`; extraction
/// prompts get the answer of the first phrase found in the user prompt,
/// or an empty object.
struct StubLlm {
    extractions: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = &request.messages[0].content;
        let user = &request.messages[request.messages.len() - 1].content;
        let content = if system.contains("screen inbound email") {
            REQUEST
        } else {
            self.extractions
                .iter()
                .find(|(needle, _)| user.contains(needle))
                .map(|(_, answer)| *answer)
                .unwrap_or("{}")
        };
        Ok(CompletionResponse {
            content: content.to_string(),
            finish_reason: FinishReason::Stop,
        })
    }
}

struct Harness {
    processor: Arc<IntakeProcessor>,
    store: Arc<InMemoryStore>,
    review: Arc<ReviewQueue>,
}

fn harness(extractions: Vec<(&'static str, &'static str)>, max_rounds: u32) -> Harness {
    let llm = Arc::new(StubLlm { extractions });
    let store = Arc::new(InMemoryStore::new());
    let review = ReviewQueue::new();
    let policy = FreightPolicy::default();
    let extractor = Arc::new(Extractor::new(llm.clone(), RetryPolicy::immediate(1)));
    let clarifications = ClarificationManager::new(
        store.clone(),
        Arc::clone(&extractor),
        Validator::new(policy.clone()),
        ClarificationConfig {
            max_rounds,
            reply_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        },
    );
    let processor = IntakeProcessor::new(
        Classifier::new(llm, RulesEngine::default_rules(), RetryPolicy::immediate(1)),
        extractor,
        clarifications,
        store.clone(),
        Arc::clone(&review),
        policy,
        &ClassifierConfig::default(),
    );
    Harness {
        processor: Arc::new(processor),
        store,
        review,
    }
}

impl Harness {
    async fn process(&self, message: InboundMessage) -> IntakeOutcome {
        timeout(TEST_TIMEOUT, self.processor.process(message))
            .await
            .expect("processing hung")
            .expect("processing failed")
    }
}

fn expect_record(outcome: IntakeOutcome) -> ShipmentRecord {
    match outcome {
        IntakeOutcome::Materialized { record, .. } => record,
        other => panic!("expected a record, got {other:?}"),
    }
}

fn expect_clarification(outcome: IntakeOutcome) -> (ConversationId, u32, OutboundMessage) {
    match outcome {
        IntakeOutcome::ClarificationSent {
            conversation_id,
            round,
            outbound,
        } => (conversation_id, round, outbound),
        other => panic!("expected a clarification, got {other:?}"),
    }
}

const DRY_VAN_BODY: &str =
    "Need to ship 42,000 lbs general merchandise, Chicago IL 60601 to Dallas TX 75201, dry van, pickup tomorrow 8am";
const DRY_VAN_JSON: &str = r#"{"pickup_location": "Chicago IL 60601", "delivery_location": "Dallas TX 75201", "weight": "42,000 lbs", "commodity": "general merchandise", "pickup_timing": "tomorrow 8am", "equipment_type": "dry van"}"#;

const REEFER_BODY: &str =
    "Frozen pizzas, 38,000 lbs, reefer, Chicago IL 60601 to Dallas TX 75201, pickup tomorrow 8am";
const REEFER_JSON: &str = r#"{"pickup_location": "Chicago IL 60601", "delivery_location": "Dallas TX 75201", "weight": "38,000 lbs", "commodity": "frozen pizzas", "pickup_timing": "tomorrow 8am", "equipment_type": "reefer"}"#;
const REEFER_REPLY_JSON: &str = r#"{"temperature": "-10°F"}"#;

#[tokio::test]
async fn complete_dry_van_request_materializes_once() {
    let h = harness(vec![("general merchandise", DRY_VAN_JSON)], 3);
    let msg = InboundMessage::new("m-1", "shipper@acme.com", "Load Chicago to Dallas", DRY_VAN_BODY);

    let record = expect_record(h.process(msg).await);
    assert_eq!(record.freight_type, FreightType::DryVan);
    assert_eq!(record.shipment.weight_lb, Some(42_000.0));
    assert_eq!(record.sender, "shipper@acme.com");
    assert_eq!(h.store.record_count().await, 1);

    // No clarification is kept for a request that was valid on arrival.
    assert!(
        h.store
            .get_clarification(&record.conversation_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn reefer_clarification_round_trip_via_subject_tag() {
    let h = harness(
        vec![("-10°F", REEFER_REPLY_JSON), ("Frozen pizzas", REEFER_JSON)],
        3,
    );
    let msg = InboundMessage::new("m-1", "shipper@acme.com", "Frozen load", REEFER_BODY);

    let (conversation_id, round, outbound) = expect_clarification(h.process(msg).await);
    assert_eq!(round, 1);
    assert_eq!(outbound.to, "shipper@acme.com");
    assert!(outbound.subject.contains(&format!("[Ref: {conversation_id}]")));

    let pending = h.store.get_clarification(&conversation_id).await.unwrap().unwrap();
    assert_eq!(pending.phase, ClarificationPhase::ClarificationSent);
    assert_eq!(pending.freight_type, FreightType::Reefer);
    let fields: Vec<_> = pending.outstanding.iter().map(|i| i.field).collect();
    assert_eq!(fields, vec![ShipmentField::Temperature]);

    let reply = InboundMessage::new(
        "m-2",
        "shipper@acme.com",
        outbound.subject.clone(),
        "-10°F\n\n> What temperature should the load be kept at?",
    );
    let record = expect_record(h.process(reply).await);
    assert_eq!(record.conversation_id, conversation_id);
    assert_eq!(record.freight_type, FreightType::Reefer);
    let temperature = record.shipment.temperature.expect("temperature merged");
    assert_eq!(temperature.min, Some(-10.0));
    assert_eq!(record.shipment.commodity.as_deref(), Some("frozen pizzas"));
    assert_eq!(h.store.record_count().await, 1);

    let done = h.store.get_clarification(&conversation_id).await.unwrap().unwrap();
    assert_eq!(done.phase, ClarificationPhase::Materialized);
    assert!(done.resulted_in_record);
}

#[tokio::test]
async fn redelivered_message_is_a_duplicate() {
    let h = harness(vec![("general merchandise", DRY_VAN_JSON)], 3);
    let msg = InboundMessage::new("m-1", "shipper@acme.com", "Load Chicago to Dallas", DRY_VAN_BODY)
        .with_correlation_token("<root-1@acme.com>");

    let first = expect_record(h.process(msg.clone()).await);
    let second = h.process(msg).await;
    match second {
        IntakeOutcome::Duplicate {
            conversation_id, ..
        } => assert_eq!(conversation_id, first.conversation_id),
        other => panic!("expected a duplicate, got {other:?}"),
    }
    assert_eq!(h.store.record_count().await, 1);
}

#[tokio::test]
async fn redelivered_message_without_threading_is_a_duplicate() {
    let h = harness(vec![("general merchandise", DRY_VAN_JSON)], 3);
    let msg = InboundMessage::new("m-1", "shipper@acme.com", "Load Chicago to Dallas", DRY_VAN_BODY);

    let first = expect_record(h.process(msg.clone()).await);
    assert_eq!(first.conversation_id, ConversationId::from_message_id("m-1"));
    match h.process(msg).await {
        IntakeOutcome::Duplicate {
            conversation_id, ..
        } => assert_eq!(conversation_id, first.conversation_id),
        other => panic!("expected a duplicate, got {other:?}"),
    }
    assert_eq!(h.store.record_count().await, 1);
}

#[tokio::test]
async fn reply_after_timeout_goes_to_review_before_any_sweep() {
    let h = harness(
        vec![("-10°F", REEFER_REPLY_JSON), ("Frozen pizzas", REEFER_JSON)],
        3,
    );
    let msg = InboundMessage::new("m-1", "shipper@acme.com", "Frozen load", REEFER_BODY);
    let (conversation_id, _, outbound) = expect_clarification(h.process(msg).await);

    // The harness reply timeout is one hour; no sweep has run.
    let mut request = h.store.get_clarification(&conversation_id).await.unwrap().unwrap();
    request.sent_at = chrono::Utc::now() - chrono::Duration::hours(5);
    h.store.update_clarification(&request).await.unwrap();

    let reply = InboundMessage::new("m-2", "shipper@acme.com", outbound.subject.clone(), "-10°F");
    match h.process(reply.clone()).await {
        IntakeOutcome::NeedsReview { reason, .. } => assert_eq!(reason, ReviewReason::LateReply),
        other => panic!("expected review, got {other:?}"),
    }
    let request = h.store.get_clarification(&conversation_id).await.unwrap().unwrap();
    assert_eq!(request.phase, ClarificationPhase::Abandoned);
    assert_eq!(h.store.record_count().await, 0);

    // Redelivery of the late reply is not queued twice.
    match h.process(reply).await {
        IntakeOutcome::Duplicate { .. } => {}
        other => panic!("expected a duplicate, got {other:?}"),
    }
    assert_eq!(h.review.for_conversation(&conversation_id).await.len(), 1);
}

#[tokio::test]
async fn concurrent_replies_produce_one_record() {
    let h = harness(
        vec![("-10°F", REEFER_REPLY_JSON), ("Frozen pizzas", REEFER_JSON)],
        3,
    );
    let msg = InboundMessage::new("m-1", "shipper@acme.com", "Frozen load", REEFER_BODY);
    let (conversation_id, _, outbound) = expect_clarification(h.process(msg).await);

    let replies: Vec<InboundMessage> = (0..4)
        .map(|n| {
            InboundMessage::new(
                format!("reply-{n}"),
                "shipper@acme.com",
                outbound.subject.clone(),
                "Keep it at -10°F",
            )
        })
        .collect();

    let results = timeout(TEST_TIMEOUT, h.processor.process_batch(replies))
        .await
        .expect("batch hung");

    let mut materialized = 0;
    for result in results {
        match result.expect("reply failed") {
            IntakeOutcome::Materialized { .. } => materialized += 1,
            IntakeOutcome::Duplicate { .. } => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(materialized, 1);
    assert_eq!(h.store.record_count().await, 1);
    assert!(h.store.get_record(&conversation_id).await.unwrap().is_some());
}

#[tokio::test]
async fn unanswered_questions_abandon_then_late_reply_goes_to_review() {
    let h = harness(vec![("Frozen pizzas", REEFER_JSON)], 2);
    let msg = InboundMessage::new("m-1", "shipper@acme.com", "Frozen load", REEFER_BODY);
    let (conversation_id, _, outbound) = expect_clarification(h.process(msg).await);

    // First unhelpful reply: another round.
    let reply = InboundMessage::new("m-2", "shipper@acme.com", outbound.subject.clone(), "cold please");
    let (_, round, _) = expect_clarification(h.process(reply).await);
    assert_eq!(round, 2);

    // Second unhelpful reply: rounds exhausted.
    let reply = InboundMessage::new("m-3", "shipper@acme.com", outbound.subject.clone(), "just cold");
    match h.process(reply).await {
        IntakeOutcome::NeedsReview { reason, .. } => assert_eq!(
            reason,
            ReviewReason::Abandoned {
                rounds: 2,
                timed_out: false
            }
        ),
        other => panic!("expected review, got {other:?}"),
    }
    let request = h.store.get_clarification(&conversation_id).await.unwrap().unwrap();
    assert_eq!(request.phase, ClarificationPhase::Abandoned);

    let late = InboundMessage::new("m-4", "shipper@acme.com", outbound.subject.clone(), "-10°F");
    match h.process(late).await {
        IntakeOutcome::NeedsReview { reason, .. } => assert_eq!(reason, ReviewReason::LateReply),
        other => panic!("expected review, got {other:?}"),
    }

    let items = h.review.for_conversation(&conversation_id).await;
    assert_eq!(items.len(), 2);
    assert_eq!(h.store.record_count().await, 0);
}

#[tokio::test]
async fn unknown_reference_tag_is_flagged_and_processed_as_new() {
    let h = harness(vec![("general merchandise", DRY_VAN_JSON)], 3);
    let stray = ConversationId::fresh();
    let msg = InboundMessage::new(
        "m-1",
        "shipper@acme.com",
        format!("Re: Load [Ref: {stray}]"),
        DRY_VAN_BODY,
    );

    let record = expect_record(h.process(msg).await);
    assert_eq!(record.freight_type, FreightType::DryVan);

    let items = h.review.for_conversation(&stray).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].reason, ReviewReason::CorrelationFailure);
}

#[tokio::test]
async fn landmark_pickup_asks_for_an_address() {
    let h = harness(
        vec![(
            "O'Hare",
            r#"{"pickup_location": "near O'Hare Airport", "delivery_location": "Dallas TX 75201", "weight": "40,000 lbs", "commodity": "paper rolls", "pickup_timing": "tomorrow 8am", "equipment_type": "dry van"}"#,
        )],
        3,
    );
    let msg = InboundMessage::new(
        "m-1",
        "shipper@acme.com",
        "Load",
        "40,000 lbs paper rolls, dry van, pickup near O'Hare Airport tomorrow 8am to Dallas TX 75201",
    );

    let (conversation_id, _, _) = expect_clarification(h.process(msg).await);
    let request = h.store.get_clarification(&conversation_id).await.unwrap().unwrap();
    let issue = request
        .outstanding
        .iter()
        .find(|i| i.field == ShipmentField::PickupLocation)
        .expect("pickup issue");
    assert_eq!(issue.kind, IssueKind::Insufficient);
    // The vague value is kept, not dropped.
    assert_eq!(
        request.snapshot.pickup_location.as_ref().map(|l| l.text.as_str()),
        Some("near O'Hare Airport")
    );
}

#[tokio::test]
async fn hazmat_class_alone_asks_for_every_identifier() {
    let h = harness(
        vec![(
            "hazmat",
            r#"{"pickup_location": "Houston TX 77002", "delivery_location": "Dallas TX 75201", "weight": "30,000 lbs", "commodity": "paint", "pickup_timing": "tomorrow 8am", "hazmat": {"class": "3"}}"#,
        )],
        3,
    );
    let msg = InboundMessage::new(
        "m-1",
        "shipper@acme.com",
        "Hazmat load",
        "30,000 lbs paint, hazmat class 3, Houston TX 77002 to Dallas TX 75201, pickup tomorrow 8am",
    );

    let (conversation_id, _, _) = expect_clarification(h.process(msg).await);
    let request = h.store.get_clarification(&conversation_id).await.unwrap().unwrap();
    assert_eq!(request.freight_type, FreightType::Hazmat);

    let mut missing: Vec<_> = request
        .outstanding
        .iter()
        .filter(|i| i.kind == IssueKind::Missing)
        .map(|i| i.field)
        .collect();
    missing.sort_by_key(|f| f.as_str());
    let mut expected = vec![
        ShipmentField::UnNumber,
        ShipmentField::ProperShippingName,
        ShipmentField::PackingGroup,
        ShipmentField::EmergencyContact,
    ];
    expected.sort_by_key(|f| f.as_str());
    assert_eq!(missing, expected);
}

#[tokio::test]
async fn tons_are_recorded_in_pounds() {
    let h = harness(
        vec![(
            "20 tons",
            r#"{"pickup_location": "Chicago IL 60601", "delivery_location": "Dallas TX 75201", "weight": "20 tons", "commodity": "paper rolls", "pickup_timing": "tomorrow 8am", "equipment_type": "dry van"}"#,
        )],
        3,
    );
    let msg = InboundMessage::new(
        "m-1",
        "shipper@acme.com",
        "Load",
        "20 tons of paper rolls, dry van, Chicago IL 60601 to Dallas TX 75201, pickup tomorrow 8am",
    );

    let record = expect_record(h.process(msg).await);
    assert_eq!(record.shipment.weight_lb, Some(40_000.0));
}

#[tokio::test]
async fn named_dry_van_wins_over_frozen_commodity() {
    let h = harness(
        vec![(
            "frozen pizzas",
            r#"{"pickup_location": "Chicago IL 60601", "delivery_location": "Dallas TX 75201", "weight": "40,000 lbs", "commodity": "frozen pizzas", "pickup_timing": "tomorrow 8am", "equipment_type": "dry van", "temperature": "frozen"}"#,
        )],
        3,
    );
    let msg = InboundMessage::new(
        "m-1",
        "shipper@acme.com",
        "Load",
        "40,000 lbs frozen pizzas in a dry van, Chicago IL 60601 to Dallas TX 75201, pickup tomorrow 8am",
    );

    let record = expect_record(h.process(msg).await);
    assert_eq!(record.freight_type, FreightType::DryVan);
    assert!(record.shipment.temperature.is_none());
}
