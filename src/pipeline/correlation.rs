//! Conversation correlation.
//!
//! Outbound clarifications carry a `[Ref: <conversation id>]` tag in the
//! subject. An inbound message resolves to a conversation by:
//! 1. the reference tag in its subject, if present and well-formed
//! 2. a UUIDv5 of the transport correlation token (thread root Message-ID)
//! 3. a UUIDv5 of the message id when neither exists, so redelivery of
//!    the same message lands in the same conversation

use std::sync::LazyLock;

use regex::Regex;

use crate::pipeline::types::{ConversationId, InboundMessage};

static REF_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[ref:\s*([0-9a-f-]{36})\s*\]").unwrap());

/// How an inbound message was tied to its conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationSource {
    /// `[Ref: ...]` tag in the subject.
    SubjectTag,
    /// Derived from the transport's reply-chain token.
    Token,
    /// No correlation data; the message starts its own conversation.
    MessageId,
}

/// Resolve the conversation a message belongs to.
pub fn conversation_for(message: &InboundMessage) -> (ConversationId, CorrelationSource) {
    if let Some(id) = tag_in_subject(&message.subject) {
        return (id, CorrelationSource::SubjectTag);
    }
    if let Some(token) = message
        .correlation_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    {
        return (ConversationId::from_token(token), CorrelationSource::Token);
    }
    (
        ConversationId::from_message_id(&message.id),
        CorrelationSource::MessageId,
    )
}

/// The conversation id carried in a subject's reference tag.
pub fn tag_in_subject(subject: &str) -> Option<ConversationId> {
    REF_TAG
        .captures(subject)
        .and_then(|c| ConversationId::parse(&c[1]))
}

/// Subject for an outbound clarification: "Re: <original> [Ref: <id>]".
pub fn tagged_subject(original: &str, id: &ConversationId) -> String {
    let base = REF_TAG.replace_all(original, "");
    let base = base.trim();
    let base = if base.to_ascii_lowercase().starts_with("re:") {
        base.to_string()
    } else if base.is_empty() {
        "Re: Shipment request".to_string()
    } else {
        format!("Re: {base}")
    };
    format!("{base} [Ref: {id}]")
}

/// Strip quoted text from a reply body.
///
/// Removes lines starting with `>` and everything after an
/// "On ... wrote:" attribution or an "Original Message" separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        // "On Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:"
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if (trimmed.starts_with("---") || trimmed.starts_with("___"))
            && trimmed.to_ascii_lowercase().contains("original message")
        {
            break;
        }

        // Outlook-style header block of the quoted message
        if trimmed.starts_with("From:") && !result.is_empty() {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_tag_wins_over_token() {
        let id = ConversationId::fresh();
        let msg = InboundMessage::new(
            "m-2",
            "shipper@acme.com",
            format!("RE: Re: Load to Dallas [Ref: {id}]"),
            "-10F",
        )
        .with_correlation_token("<root@acme.com>");
        let (resolved, source) = conversation_for(&msg);
        assert_eq!(resolved, id);
        assert_eq!(source, CorrelationSource::SubjectTag);
    }

    #[test]
    fn token_derivation_is_stable() {
        let a = InboundMessage::new("m-1", "s@x.com", "Load", "body")
            .with_correlation_token("<root@acme.com>");
        let b = InboundMessage::new("m-2", "s@x.com", "Re: Load", "reply")
            .with_correlation_token("root@acme.com");
        let (id_a, source) = conversation_for(&a);
        let (id_b, _) = conversation_for(&b);
        assert_eq!(source, CorrelationSource::Token);
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn no_correlation_data_keys_on_message_id() {
        let a = InboundMessage::new("m-1", "s@x.com", "Load", "body");
        let (id_a, source) = conversation_for(&a);
        let (id_again, _) = conversation_for(&a.clone());
        assert_eq!(source, CorrelationSource::MessageId);
        assert_eq!(id_a, id_again);

        let b = InboundMessage::new("m-2", "s@x.com", "Load", "body");
        assert_ne!(conversation_for(&b).0, id_a);
    }

    #[test]
    fn malformed_tag_is_ignored() {
        assert!(tag_in_subject("Re: Load [Ref: 1234]").is_none());
        assert!(tag_in_subject("Re: Load").is_none());
    }

    #[test]
    fn tagged_subject_round_trips_and_does_not_stack() {
        let id = ConversationId::fresh();
        let subject = tagged_subject("Load to Dallas", &id);
        assert_eq!(subject, format!("Re: Load to Dallas [Ref: {id}]"));
        assert_eq!(tag_in_subject(&subject), Some(id.clone()));

        let again = tagged_subject(&subject, &id);
        assert_eq!(again.matches("[Ref:").count(), 1);
        assert!(!again.starts_with("Re: Re:"));
    }

    #[test]
    fn strips_quoted_lines_and_attribution() {
        let body = "-10F please\n\nOn Tue, Mar 3, 2026 at 9:00 AM Intake <intake@broker.com> wrote:\n> What temperature?\n> Thanks";
        assert_eq!(strip_quoted_text(body), "-10F please");
    }

    #[test]
    fn strips_original_message_block() {
        let body = "Pickup is 1200 W Lake St, Chicago IL 60607\n-----Original Message-----\nFrom: intake\nWe need the pickup address";
        assert_eq!(
            strip_quoted_text(body),
            "Pickup is 1200 W Lake St, Chicago IL 60607"
        );
    }

    #[test]
    fn plain_body_is_untouched() {
        assert_eq!(strip_quoted_text("line one\nline two"), "line one\nline two");
    }
}
