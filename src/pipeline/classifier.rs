//! Request classification.
//!
//! Decides whether an inbound message is a *new* shipment request.
//!
//! Flow:
//! 1. Rules engine (fast, no text service) → may short-circuit a rejection
//! 2. Text service → structured JSON decision
//!
//! Completeness is not the classifier's concern: a message with a concrete
//! lane and near-term intent is a request even when fields are missing.
//! When the text service is unavailable the classifier fails closed with a
//! retryable `ClassificationFault`; it never guesses.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, RetryPolicy, complete_with_retry,
    extract_json_object,
};
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::{ClassificationDecision, InboundMessage, MessageCategory};

/// Max tokens for the classification call (runs on every message).
const CLASSIFY_MAX_TOKENS: u32 = 256;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Body characters sent for classification.
const MAX_BODY_CHARS: usize = 2000;

pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    rules: RulesEngine,
    retry: RetryPolicy,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>, rules: RulesEngine, retry: RetryPolicy) -> Self {
        Self { llm, rules, retry }
    }

    /// Classify a message.
    pub async fn classify(
        &self,
        message: &InboundMessage,
    ) -> Result<ClassificationDecision, PipelineError> {
        if let Some(decision) = self.rules.evaluate(message) {
            debug!(
                id = %message.id,
                category = decision.category.label(),
                "Rules engine matched, skipping text service"
            );
            return Ok(decision);
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classification_system_prompt()),
            ChatMessage::user(build_classification_user_prompt(message)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let decision = complete_with_retry(
            self.llm.as_ref(),
            &request,
            &self.retry,
            parse_classification_response,
        )
        .await
        .map_err(|e| {
            warn!(id = %message.id, error = %e, "Classification failed, failing closed");
            PipelineError::ClassificationFault {
                reason: e.to_string(),
            }
        })?;

        info!(
            id = %message.id,
            is_request = decision.is_request,
            confidence = decision.confidence,
            category = decision.category.label(),
            "Message classified"
        );
        Ok(decision)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_classification_system_prompt() -> String {
    "You screen inbound email for a freight brokerage. Decide whether the message is a NEW \
     request to move a specific shipment.\n\n\
     Categories:\n\
     - \"new_shipment_request\": concrete origin/destination and near-term intent to ship. \
       Missing details (weight, date, commodity) do NOT disqualify it\n\
     - \"status_update\": tracking or status on an existing shipment\n\
     - \"billing\": invoices, payments, disputes\n\
     - \"rate_negotiation\": renegotiating an existing quote\n\
     - \"capacity_offer\": a carrier offering trucks or capacity\n\
     - \"contract_planning\": RFPs, annual bids, future planning without a specific load\n\
     - \"clarification_response\": answering questions we asked about an earlier request\n\
     - \"other\": anything else\n\n\
     Respond with ONLY a JSON object:\n\
     {\"is_request\": true, \"confidence\": 0.0, \"category\": \"...\", \"rationale\": \"...\"}\n\n\
     Rules:\n\
     - is_request is true only for new_shipment_request\n\
     - rationale: one short sentence\n\
     - confidence between 0.0 and 1.0"
        .to_string()
}

fn build_classification_user_prompt(message: &InboundMessage) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(&format!("From: {}\n", message.sender));
    if !message.subject.is_empty() {
        prompt.push_str(&format!("Subject: {}\n", message.subject));
    }
    let body: String = message.body.chars().take(MAX_BODY_CHARS).collect();
    prompt.push_str(&format!("\nMessage:\n{}", body));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ClassificationResponse {
    is_request: bool,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    rationale: String,
}

fn parse_category(raw: &str) -> Option<MessageCategory> {
    let category = match raw.trim().to_ascii_lowercase().as_str() {
        "new_shipment_request" => MessageCategory::NewShipmentRequest,
        "status_update" => MessageCategory::StatusUpdate,
        "billing" => MessageCategory::Billing,
        "rate_negotiation" => MessageCategory::RateNegotiation,
        "capacity_offer" => MessageCategory::CapacityOffer,
        "contract_planning" => MessageCategory::ContractPlanning,
        "clarification_response" => MessageCategory::ClarificationResponse,
        "other" => MessageCategory::Other,
        _ => return None,
    };
    Some(category)
}

/// Parse the classifier's JSON reply.
fn parse_classification_response(raw: &str) -> Result<ClassificationDecision, String> {
    let json_str = extract_json_object(raw);
    let response: ClassificationResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let category = match response.category.as_deref() {
        Some(c) => parse_category(c).ok_or_else(|| format!("unknown category: '{c}'"))?,
        None if response.is_request => MessageCategory::NewShipmentRequest,
        None => MessageCategory::Other,
    };

    // A request must be a new shipment; anything else is a rejection.
    let is_request = response.is_request && category == MessageCategory::NewShipmentRequest;

    Ok(ClassificationDecision {
        is_request,
        confidence: response.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        rationale: if response.rationale.is_empty() {
            "no rationale given".into()
        } else {
            response.rationale
        },
        category,
    })
}
