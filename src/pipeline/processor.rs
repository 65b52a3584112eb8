//! Runs inbound messages through the pipeline.
//!
//! Flow per message:
//! 1. Correlate to a conversation and take its lock (replies in receipt order)
//! 2. Existing record or already-seen message id → duplicate
//! 3. Pending clarification → clarification manager handles the reply
//! 4. Otherwise classify → extract → resolve → validate
//! 5. Valid → materialize; invalid → open a clarification
//!
//! Nothing but clarification text ever goes back to the sender. Faults and
//! dead ends surface through the review queue and the returned error.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ClassifierConfig, FreightPolicy, IntakeConfig};
use crate::error::{ConfigError, PipelineError};
use crate::llm::LlmProvider;
use crate::pipeline::clarification::{ClarificationManager, ReplyOutcome};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::correlation::{CorrelationSource, conversation_for};
use crate::pipeline::extractor::Extractor;
use crate::pipeline::freight_type;
use crate::pipeline::materializer::Materializer;
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::{
    ClarificationPhase, ClarificationRequest, ConversationId, InboundMessage, MessageCategory,
    OutboundMessage, ShipmentRecord,
};
use crate::pipeline::validator::Validator;
use crate::review::{ReviewItem, ReviewQueue, ReviewReason};
use crate::store::IntakeStore;

/// What happened to one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntakeOutcome {
    /// A shipment record exists for the conversation.
    Materialized {
        conversation_id: ConversationId,
        record: ShipmentRecord,
    },
    /// A clarification should be delivered to the sender.
    ClarificationSent {
        conversation_id: ConversationId,
        round: u32,
        outbound: OutboundMessage,
    },
    /// Not a new shipment request.
    Rejected {
        category: MessageCategory,
        rationale: String,
    },
    /// Handed to a human; nothing goes back to the sender.
    NeedsReview {
        conversation_id: ConversationId,
        reason: ReviewReason,
    },
    /// Already handled; no further action.
    Duplicate {
        conversation_id: ConversationId,
        message_id: String,
    },
}

impl IntakeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Materialized { .. } => "materialized",
            Self::ClarificationSent { .. } => "clarification_sent",
            Self::Rejected { .. } => "rejected",
            Self::NeedsReview { .. } => "needs_review",
            Self::Duplicate { .. } => "duplicate",
        }
    }
}

/// Everything the processor needs, assembled by the caller.
pub struct IntakeProcessor {
    classifier: Classifier,
    extractor: Arc<Extractor>,
    validator: Validator,
    clarifications: ClarificationManager,
    materializer: Materializer,
    store: Arc<dyn IntakeStore>,
    review: Arc<ReviewQueue>,
    min_confidence: f32,
    /// Per-conversation locks. tokio's Mutex is fair, so waiters run FIFO.
    locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl IntakeProcessor {
    pub fn new(
        classifier: Classifier,
        extractor: Arc<Extractor>,
        clarifications: ClarificationManager,
        store: Arc<dyn IntakeStore>,
        review: Arc<ReviewQueue>,
        policy: FreightPolicy,
        classifier_config: &ClassifierConfig,
    ) -> Self {
        Self {
            classifier,
            extractor,
            validator: Validator::new(policy),
            clarifications,
            materializer: Materializer::new(Arc::clone(&store)),
            store,
            review,
            min_confidence: classifier_config.min_confidence,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire up the full pipeline from configuration.
    pub fn from_config(
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn IntakeStore>,
        review: Arc<ReviewQueue>,
        config: &IntakeConfig,
    ) -> Result<Self, ConfigError> {
        let mut rules = RulesEngine::default_rules();
        for pattern in &config.classifier.always_classify {
            rules
                .add_always_classify(pattern)
                .map_err(|e| ConfigError::InvalidValue {
                    key: "INTAKE_ALWAYS_CLASSIFY".into(),
                    message: format!("'{pattern}': {e}"),
                })?;
        }

        let extractor = Arc::new(Extractor::new(Arc::clone(&llm), config.retry.clone()));
        let clarifications = ClarificationManager::new(
            Arc::clone(&store),
            Arc::clone(&extractor),
            Validator::new(config.freight.clone()),
            config.clarification.clone(),
        );
        Ok(Self::new(
            Classifier::new(llm, rules, config.retry.clone()),
            extractor,
            clarifications,
            store,
            review,
            config.freight.clone(),
            &config.classifier,
        ))
    }

    pub fn review_queue(&self) -> &Arc<ReviewQueue> {
        &self.review
    }

    /// Process one inbound message.
    ///
    /// Errors are internal faults (text service, store). Retryable ones
    /// (`PipelineError::is_retryable`) should be redelivered by the caller.
    pub async fn process(&self, message: InboundMessage) -> Result<IntakeOutcome, PipelineError> {
        let (conversation_id, source) = conversation_for(&message);
        info!(
            id = %message.id,
            sender = %message.sender,
            conversation_id = %conversation_id,
            correlation = ?source,
            "Processing inbound message"
        );

        let lock = self.conversation_lock(&conversation_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.process_locked(&message, conversation_id.clone(), source)
                .await
        };
        drop(lock);
        self.release_lock(&conversation_id).await;

        match &result {
            Ok(outcome) => info!(
                id = %message.id,
                conversation_id = %conversation_id,
                outcome = outcome.label(),
                "Message processed"
            ),
            Err(e) => error!(
                id = %message.id,
                conversation_id = %conversation_id,
                error = %e,
                retryable = e.is_retryable(),
                "Message processing failed"
            ),
        }
        result
    }

    /// Process messages concurrently. Messages in the same conversation
    /// still run one at a time, in the order given.
    pub async fn process_batch(
        &self,
        messages: Vec<InboundMessage>,
    ) -> Vec<Result<IntakeOutcome, PipelineError>> {
        let mut groups: Vec<(ConversationId, Vec<(usize, InboundMessage)>)> = Vec::new();
        for (index, message) in messages.into_iter().enumerate() {
            let (id, _) = conversation_for(&message);
            match groups.iter_mut().find(|(g, _)| *g == id) {
                Some((_, group)) => group.push((index, message)),
                None => groups.push((id, vec![(index, message)])),
            }
        }

        // Each conversation is drained sequentially; conversations run in parallel.
        let sequential = groups.into_iter().map(|(_, group)| async move {
            let mut out = Vec::with_capacity(group.len());
            for (index, message) in group {
                out.push((index, self.process(message).await));
            }
            out
        });

        let mut results: Vec<_> = join_all(sequential).await.into_iter().flatten().collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Abandon clarifications whose reply timeout has passed.
    ///
    /// Returns how many were abandoned.
    pub async fn sweep_expired(&self) -> Result<usize, PipelineError> {
        let now = Utc::now();
        let pending = self.store.list_pending_clarifications().await?;
        let mut abandoned = 0;

        for candidate in pending {
            if !self.clarifications.is_overdue(&candidate, now) {
                continue;
            }
            let id = candidate.conversation_id.clone();
            let lock = self.conversation_lock(&id).await;
            let result = {
                let _guard = lock.lock().await;
                self.expire_locked(&id, now).await
            };
            drop(lock);
            self.release_lock(&id).await;

            match result {
                Ok(true) => abandoned += 1,
                Ok(false) => {}
                Err(e) => warn!(conversation_id = %id, error = %e, "Failed to expire clarification"),
            }
        }

        if abandoned > 0 {
            info!(count = abandoned, "Abandoned clarifications with no reply");
        }
        Ok(abandoned)
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn process_locked(
        &self,
        message: &InboundMessage,
        conversation_id: ConversationId,
        source: CorrelationSource,
    ) -> Result<IntakeOutcome, PipelineError> {
        // Message-keyed conversations land here too, so redelivery is caught.
        if let Some(record) = self.store.get_record(&conversation_id).await? {
            debug!(
                conversation_id = %conversation_id,
                record_id = %record.id,
                "Conversation already materialized"
            );
            return Ok(duplicate(conversation_id, message));
        }

        if let Some(request) = self.store.get_clarification(&conversation_id).await? {
            return self.continue_conversation(request, message).await;
        }

        let claims_reply = source == CorrelationSource::SubjectTag
            || (source == CorrelationSource::Token && message.looks_like_reply());
        if claims_reply {
            self.report_correlation_failure(&conversation_id, message).await;
        }

        self.intake_new(message, conversation_id).await
    }

    /// A message for a conversation that already has a clarification.
    async fn continue_conversation(
        &self,
        request: ClarificationRequest,
        message: &InboundMessage,
    ) -> Result<IntakeOutcome, PipelineError> {
        let conversation_id = request.conversation_id.clone();
        if request.has_processed(&message.id) {
            debug!(
                id = %message.id,
                conversation_id = %conversation_id,
                "Duplicate delivery ignored"
            );
            return Ok(duplicate(conversation_id, message));
        }

        match request.phase {
            // Past its time bound but not yet swept: expire now, then treat as late.
            ClarificationPhase::ClarificationSent
                if self.clarifications.is_overdue(&request, message.received_at) =>
            {
                let mut request = request;
                request.processed_message_ids.push(message.id.clone());
                let request = self.clarifications.expire(request).await?;
                self.late_reply(request, message, "reply after the reply timeout")
                    .await
            }
            ClarificationPhase::ClarificationSent => {
                match self.clarifications.handle_reply(request, message).await? {
                    ReplyOutcome::Resolved(request) => self.finish(request).await,
                    ReplyOutcome::FollowUp { request, outbound } => {
                        Ok(IntakeOutcome::ClarificationSent {
                            conversation_id,
                            round: request.rounds,
                            outbound,
                        })
                    }
                    ReplyOutcome::Exhausted(request) => {
                        let reason = ReviewReason::Abandoned {
                            rounds: request.rounds,
                            timed_out: false,
                        };
                        let exhausted = PipelineError::ValidationExhausted {
                            conversation_id: conversation_id.to_string(),
                            rounds: request.rounds,
                        };
                        self.review
                            .push(
                                ReviewItem::new(
                                    Some(conversation_id.clone()),
                                    &request.sender,
                                    reason.clone(),
                                    format!("{exhausted}; outstanding: {}", outstanding_summary(&request)),
                                )
                                .with_message_id(&message.id),
                            )
                            .await;
                        Ok(IntakeOutcome::NeedsReview {
                            conversation_id,
                            reason,
                        })
                    }
                }
            }
            // Resolved but not yet recorded (interrupted run): finish it.
            ClarificationPhase::ReplyMergedValid => self.finish(request).await,
            ClarificationPhase::Abandoned | ClarificationPhase::NoReplyTimeout => {
                self.late_reply(request, message, "reply after abandonment")
                    .await
            }
            ClarificationPhase::Materialized => Ok(duplicate(conversation_id, message)),
            phase => Err(PipelineError::InvalidTransition {
                conversation_id: conversation_id.to_string(),
                from: phase.to_string(),
                to: ClarificationPhase::ReplyMergedValid.to_string(),
            }),
        }
    }

    /// Hand a reply to a closed conversation to a human; nothing is merged.
    async fn late_reply(
        &self,
        request: ClarificationRequest,
        message: &InboundMessage,
        context: &str,
    ) -> Result<IntakeOutcome, PipelineError> {
        let reason = ReviewReason::LateReply;
        self.review
            .push(
                ReviewItem::new(
                    Some(request.conversation_id.clone()),
                    &message.sender,
                    reason.clone(),
                    format!("{context}; outstanding: {}", outstanding_summary(&request)),
                )
                .with_message_id(&message.id),
            )
            .await;
        Ok(IntakeOutcome::NeedsReview {
            conversation_id: request.conversation_id,
            reason,
        })
    }

    /// Materialize a resolved clarification and close it.
    async fn finish(&self, request: ClarificationRequest) -> Result<IntakeOutcome, PipelineError> {
        let (record, _) = self
            .materializer
            .materialize(
                &request.conversation_id,
                &request.sender,
                &request.snapshot,
                &request.report,
            )
            .await?;
        let request = self.clarifications.mark_materialized(request, &record).await?;
        Ok(IntakeOutcome::Materialized {
            conversation_id: request.conversation_id,
            record,
        })
    }

    /// First pass over a message that starts (or restarts) a conversation.
    async fn intake_new(
        &self,
        message: &InboundMessage,
        conversation_id: ConversationId,
    ) -> Result<IntakeOutcome, PipelineError> {
        let decision = self.classifier.classify(message).await?;
        if !decision.is_request {
            info!(
                id = %message.id,
                category = decision.category.label(),
                rationale = %decision.rationale,
                "Not a shipment request"
            );
            return Ok(IntakeOutcome::Rejected {
                category: decision.category,
                rationale: decision.rationale,
            });
        }

        if decision.confidence < self.min_confidence {
            let reason = ReviewReason::LowConfidence {
                confidence: decision.confidence,
            };
            self.review
                .push(
                    ReviewItem::new(
                        Some(conversation_id.clone()),
                        &message.sender,
                        reason.clone(),
                        decision.rationale,
                    )
                    .with_message_id(&message.id),
                )
                .await;
            return Ok(IntakeOutcome::NeedsReview {
                conversation_id,
                reason,
            });
        }

        let extraction = self.extractor.extract(message).await?;
        let shipment = extraction.shipment;
        let freight_type = freight_type::resolve(&shipment, self.validator.policy());
        let report = self.validator.validate(&shipment, freight_type);
        info!(
            conversation_id = %conversation_id,
            freight_type = %freight_type,
            issues = report.issues.len(),
            valid = report.is_valid(),
            "Shipment validated"
        );

        if report.is_valid() {
            let (record, _) = self
                .materializer
                .materialize(&conversation_id, &message.sender, &shipment, &report)
                .await?;
            return Ok(IntakeOutcome::Materialized {
                conversation_id,
                record,
            });
        }

        let (request, outbound) = self
            .clarifications
            .begin(conversation_id.clone(), message, shipment, report)
            .await?;
        match outbound {
            Some(outbound) => Ok(IntakeOutcome::ClarificationSent {
                conversation_id,
                round: request.rounds,
                outbound,
            }),
            None => Ok(duplicate(conversation_id, message)),
        }
    }

    async fn report_correlation_failure(
        &self,
        conversation_id: &ConversationId,
        message: &InboundMessage,
    ) {
        let failure = PipelineError::CorrelationFailure {
            conversation_id: conversation_id.to_string(),
        };
        warn!(
            id = %message.id,
            error = %failure,
            "Reply matched no pending clarification, treating as a new message"
        );
        self.review
            .push(
                ReviewItem::new(
                    Some(conversation_id.clone()),
                    &message.sender,
                    ReviewReason::CorrelationFailure,
                    failure.to_string(),
                )
                .with_message_id(&message.id),
            )
            .await;
    }

    async fn expire_locked(
        &self,
        conversation_id: &ConversationId,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        // Re-read under the lock; a reply may have landed since the listing.
        let Some(request) = self.store.get_clarification(conversation_id).await? else {
            return Ok(false);
        };
        if !self.clarifications.is_overdue(&request, now) {
            return Ok(false);
        }

        let request = self.clarifications.expire(request).await?;
        self.review
            .push(ReviewItem::new(
                Some(request.conversation_id.clone()),
                &request.sender,
                ReviewReason::Abandoned {
                    rounds: request.rounds,
                    timed_out: true,
                },
                format!("no reply; outstanding: {}", outstanding_summary(&request)),
            ))
            .await;
        Ok(true)
    }

    async fn conversation_lock(&self, id: &ConversationId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Drop the lock entry once nobody else holds or waits on it.
    async fn release_lock(&self, id: &ConversationId) {
        let mut locks = self.locks.lock().await;
        if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(id);
        }
    }
}

fn duplicate(conversation_id: ConversationId, message: &InboundMessage) -> IntakeOutcome {
    IntakeOutcome::Duplicate {
        conversation_id,
        message_id: message.id.clone(),
    }
}

fn outstanding_summary(request: &ClarificationRequest) -> String {
    if request.outstanding.is_empty() {
        return "none".into();
    }
    request
        .outstanding
        .iter()
        .map(|i| format!("{} ({})", i.field, i.kind))
        .collect::<Vec<_>>()
        .join(", ")
}
