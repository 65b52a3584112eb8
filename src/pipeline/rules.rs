//! Pre-classification rules engine for fast pattern matching.
//!
//! Runs before the text-service classifier to short-circuit obvious
//! non-requests:
//! - noreply/mailer-daemon senders → automated, rejected
//! - tracking and delivery updates → status update, rejected
//! - invoices and payment disputes → billing, rejected
//! - carrier postings ("empty truck", "looking for loads") → capacity
//!   offer, rejected. Shippers asking whether a truck is available are
//!   left to the classifier.
//! - RFPs and contract bids → contract planning, rejected
//!
//! If the rules engine returns a decision, the text-service call is skipped
//! entirely. Rules only ever reject; acceptance needs the classifier.

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::{ClassificationDecision, InboundMessage, MessageCategory};

/// Which field a rule matches against.
#[derive(Debug, Clone, Copy)]
pub enum RuleField {
    Sender,
    Subject,
    Body,
}

/// A single reject rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct RejectRule {
    /// Human-readable pattern description.
    pub pattern: String,
    /// Compiled regex for matching.
    pub regex: Regex,
    /// Which message field to match.
    pub field: RuleField,
    /// Category assigned on a hit.
    pub category: MessageCategory,
    /// Why this rule triggers.
    pub reason: String,
}

/// Pre-classification rules engine.
pub struct RulesEngine {
    reject_rules: Vec<RejectRule>,
    /// Senders that always go to the classifier (bypass reject rules).
    always_classify_patterns: Vec<Regex>,
}

impl RulesEngine {
    /// Create a rules engine with the default freight-desk patterns.
    pub fn default_rules() -> Self {
        let rule = |pattern: &str, regex: &str, field, category, reason: &str| RejectRule {
            pattern: pattern.into(),
            regex: Regex::new(regex).unwrap(),
            field,
            category,
            reason: reason.into(),
        };

        let reject_rules = vec![
            rule(
                "noreply@*",
                r"(?i)^no[\-_.]?reply@",
                RuleField::Sender,
                MessageCategory::Other,
                "noreply sender",
            ),
            rule(
                "mailer-daemon",
                r"(?i)^(mailer[\-_]?daemon|postmaster)@",
                RuleField::Sender,
                MessageCategory::Other,
                "automated mail system",
            ),
            rule(
                "tracking update",
                r"(?i)\b(tracking (number|update)|proof of delivery|\bPOD\b|has (been )?(delivered|picked up)|out for delivery|in transit|eta update|check[- ]?call)",
                RuleField::Subject,
                MessageCategory::StatusUpdate,
                "status/tracking update on an existing shipment",
            ),
            rule(
                "invoice",
                r"(?i)\b(invoice\s*#?\s*\d*|remittance|payment (dispute|overdue|reminder|received)|past due|short[- ]?paid|billing (question|dispute))\b",
                RuleField::Subject,
                MessageCategory::Billing,
                "invoice or payment matter",
            ),
            rule(
                "capacity offer",
                r"(?i)\b(?:we|i) (?:have|got) (?:an? |\d+ )?empty (?:trucks?|trailers?|vans?)\b|\blooking for (?:loads?|freight)\b|\bavailable (?:for|to haul) (?:loads?|freight)\b",
                RuleField::Body,
                MessageCategory::CapacityOffer,
                "carrier capacity offer",
            ),
            rule(
                "rfp",
                r"(?i)\b(rfp|request for proposal|annual (bid|contract)|contract (rates?|lanes?|bid)|lane bid|bid (package|event))\b",
                RuleField::Subject,
                MessageCategory::ContractPlanning,
                "RFP or contract planning",
            ),
        ];

        Self {
            reject_rules,
            always_classify_patterns: Vec::new(),
        }
    }

    /// Create an empty rules engine (for testing).
    pub fn empty() -> Self {
        Self {
            reject_rules: Vec::new(),
            always_classify_patterns: Vec::new(),
        }
    }

    /// Add a sender pattern that always reaches the classifier.
    pub fn add_always_classify(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.always_classify_patterns.push(Regex::new(pattern)?);
        Ok(())
    }

    /// Add a custom reject rule.
    pub fn add_reject_rule(
        &mut self,
        pattern: &str,
        field: RuleField,
        category: MessageCategory,
        reason: &str,
    ) -> Result<(), regex::Error> {
        self.reject_rules.push(RejectRule {
            pattern: pattern.into(),
            regex: Regex::new(pattern)?,
            field,
            category,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Evaluate a message against all rules.
    ///
    /// Returns `Some(decision)` if a rule matches (skips the classifier).
    /// Returns `None` if no rule matches.
    pub fn evaluate(&self, message: &InboundMessage) -> Option<ClassificationDecision> {
        if self
            .always_classify_patterns
            .iter()
            .any(|r| r.is_match(&message.sender))
        {
            debug!(
                sender = %message.sender,
                "Sender matches always-classify pattern, bypassing rules"
            );
            return None;
        }

        for rule in &self.reject_rules {
            let field_value = match rule.field {
                RuleField::Sender => &message.sender,
                RuleField::Subject => &message.subject,
                RuleField::Body => &message.body,
            };

            if rule.regex.is_match(field_value) {
                debug!(
                    sender = %message.sender,
                    rule = %rule.pattern,
                    reason = %rule.reason,
                    "Message matched reject rule"
                );
                return Some(ClassificationDecision::reject(
                    rule.category,
                    format!("rule: {}", rule.reason),
                ));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(sender: &str, subject: &str, body: &str) -> InboundMessage {
        InboundMessage::new("test-1", sender, subject, body)
    }

    fn category(engine: &RulesEngine, msg: &InboundMessage) -> Option<MessageCategory> {
        engine.evaluate(msg).map(|d| {
            assert!(!d.is_request);
            assert!((d.confidence - 1.0).abs() < f32::EPSILON);
            d.category
        })
    }

    #[test]
    fn rejects_noreply() {
        let engine = RulesEngine::default_rules();
        let msg = make_message("noreply@tms.example.com", "Load tender", "Auto-generated");
        assert_eq!(category(&engine, &msg), Some(MessageCategory::Other));
    }

    #[test]
    fn rejects_mailer_daemon() {
        let engine = RulesEngine::default_rules();
        let msg = make_message("MAILER-DAEMON@mx.example.com", "Undeliverable", "bounce");
        assert_eq!(category(&engine, &msg), Some(MessageCategory::Other));
    }

    #[test]
    fn rejects_tracking_update() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "dispatch@carrier.com",
            "Load 88213 has been delivered",
            "POD attached.",
        );
        assert_eq!(category(&engine, &msg), Some(MessageCategory::StatusUpdate));
    }

    #[test]
    fn rejects_invoice() {
        let engine = RulesEngine::default_rules();
        let msg = make_message("ap@shipper.com", "Invoice #44120 short paid", "See attached");
        assert_eq!(category(&engine, &msg), Some(MessageCategory::Billing));
    }

    #[test]
    fn rejects_capacity_offer() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "dispatch@smalltrucking.com",
            "Available tomorrow",
            "We have an empty truck in Memphis, looking for loads going west.",
        );
        assert_eq!(category(&engine, &msg), Some(MessageCategory::CapacityOffer));
    }

    #[test]
    fn shipper_asking_for_a_truck_is_not_a_capacity_offer() {
        let engine = RulesEngine::default_rules();
        for body in [
            "Do you have a truck available Friday? Need to ship 42,000 lbs general merchandise, Chicago IL 60601 to Dallas TX 75201, dry van",
            "Any capacity open next week for a reefer out of Fresno CA 93721?",
            "Please drop an empty trailer at our dock Monday.",
        ] {
            let msg = make_message("logistics@acme.com", "Load Chicago to Dallas", body);
            assert!(engine.evaluate(&msg).is_none(), "{body}");
        }
    }

    #[test]
    fn rejects_carrier_availability_posting() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "dispatch@smalltrucking.com",
            "Capacity",
            "2 flatbeds available for loads out of Houston this week.",
        );
        assert_eq!(category(&engine, &msg), Some(MessageCategory::CapacityOffer));
    }

    #[test]
    fn rejects_rfp() {
        let engine = RulesEngine::default_rules();
        let msg = make_message("procurement@bigco.com", "2027 Annual Bid - Midwest lanes", "...");
        assert_eq!(category(&engine, &msg), Some(MessageCategory::ContractPlanning));
    }

    #[test]
    fn passes_through_shipment_request() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "logistics@acme.com",
            "Load Chicago to Dallas",
            "Need to ship 42,000 lbs general merchandise, Chicago IL 60601 to Dallas TX 75201, dry van, pickup tomorrow 8am",
        );
        assert!(engine.evaluate(&msg).is_none());
    }

    #[test]
    fn always_classify_bypasses_rules() {
        let mut engine = RulesEngine::default_rules();
        engine.add_always_classify(r"(?i)^noreply@acme\.com$").unwrap();
        let msg = make_message("noreply@acme.com", "Shipment", "Need a truck Monday");
        assert!(engine.evaluate(&msg).is_none());
    }

    #[test]
    fn custom_rule() {
        let mut engine = RulesEngine::empty();
        engine
            .add_reject_rule(
                r"(?i)\bquote revision\b",
                RuleField::Subject,
                MessageCategory::RateNegotiation,
                "rate renegotiation",
            )
            .unwrap();
        let msg = make_message("buyer@acme.com", "Quote revision for load 12", "Can you do $1,800?");
        assert_eq!(category(&engine, &msg), Some(MessageCategory::RateNegotiation));
    }

    #[test]
    fn invalid_custom_pattern_errors() {
        let mut engine = RulesEngine::empty();
        assert!(
            engine
                .add_reject_rule("(unclosed", RuleField::Body, MessageCategory::Other, "x")
                .is_err()
        );
    }
}
