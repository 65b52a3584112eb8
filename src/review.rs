//! Review queue: in-memory queue of conversations needing a human, with
//! broadcast to any listening operator surface.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pipeline::types::ConversationId;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Resolved items kept for history before pruning.
const RESOLVED_HISTORY: usize = 200;

/// Why a conversation was handed to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewReason {
    /// Rounds or reply timeout exhausted without a valid shipment.
    Abandoned { rounds: u32, timed_out: bool },
    /// A reply-shaped message matched no pending clarification.
    CorrelationFailure,
    /// A reply arrived after its conversation was abandoned.
    LateReply,
    /// The classifier said "request" without enough confidence.
    LowConfidence { confidence: f32 },
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abandoned {
                timed_out: true, ..
            } => write!(f, "abandoned (no reply)"),
            Self::Abandoned { rounds, .. } => write!(f, "abandoned after {rounds} round(s)"),
            Self::CorrelationFailure => write!(f, "correlation failure"),
            Self::LateReply => write!(f, "late reply"),
            Self::LowConfidence { confidence } => write!(f, "low confidence ({confidence:.2})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: Uuid,
    pub conversation_id: Option<ConversationId>,
    /// Transport id of the message that triggered the review, if any.
    pub message_id: Option<String>,
    pub sender: String,
    pub reason: ReviewReason,
    /// Operator-facing detail (outstanding issues, classifier rationale).
    pub detail: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewItem {
    pub fn new(
        conversation_id: Option<ConversationId>,
        sender: impl Into<String>,
        reason: ReviewReason,
        detail: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            message_id: None,
            sender: sender.into(),
            reason,
            detail: detail.into(),
            status: ReviewStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Events fanned out to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewEvent {
    NewItem { item: ReviewItem },
    Resolved { id: Uuid },
}

pub struct ReviewQueue {
    items: RwLock<VecDeque<ReviewItem>>,
    tx: broadcast::Sender<ReviewEvent>,
}

impl ReviewQueue {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            items: RwLock::new(VecDeque::new()),
            tx,
        })
    }

    /// Subscribe to review events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReviewEvent> {
        self.tx.subscribe()
    }

    /// Queue an item and broadcast it.
    pub async fn push(&self, item: ReviewItem) {
        warn!(
            review_id = %item.id,
            conversation_id = ?item.conversation_id.as_ref().map(|c| c.as_str()),
            sender = %item.sender,
            reason = %item.reason,
            "Conversation sent to human review"
        );

        let event = ReviewEvent::NewItem { item: item.clone() };
        {
            let mut items = self.items.write().await;
            items.push_back(item);
            prune_resolved(&mut items);
        }

        // Ok if nobody is listening
        let _ = self.tx.send(event);
    }

    /// Mark an item resolved. Returns `false` if unknown or already resolved.
    pub async fn resolve(&self, id: Uuid) -> bool {
        let mut items = self.items.write().await;
        let Some(item) = items.iter_mut().find(|i| i.id == id) else {
            return false;
        };
        if item.status != ReviewStatus::Open {
            debug!(review_id = %id, "Review item already resolved");
            return false;
        }
        item.status = ReviewStatus::Resolved;
        item.updated_at = Utc::now();
        info!(review_id = %id, "Review item resolved");

        let _ = self.tx.send(ReviewEvent::Resolved { id });
        true
    }

    /// Open items, oldest first.
    pub async fn open_items(&self) -> Vec<ReviewItem> {
        self.items
            .read()
            .await
            .iter()
            .filter(|i| i.status == ReviewStatus::Open)
            .cloned()
            .collect()
    }

    /// Open items for one conversation.
    pub async fn for_conversation(&self, conversation_id: &ConversationId) -> Vec<ReviewItem> {
        self.items
            .read()
            .await
            .iter()
            .filter(|i| i.conversation_id.as_ref() == Some(conversation_id))
            .cloned()
            .collect()
    }

    /// Write every open item as one `{"review": {...}}` JSON line.
    ///
    /// The queue is in memory only, so a process about to exit hands its
    /// open items to the operator this way. Returns how many were written.
    pub async fn write_open_items<W>(&self, out: &mut W) -> std::io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        #[derive(Serialize)]
        struct Line<'a> {
            review: &'a ReviewItem,
        }

        let open = self.open_items().await;
        for item in &open {
            let mut json = serde_json::to_string(&Line { review: item })
                .map_err(std::io::Error::other)?;
            json.push('\n');
            out.write_all(json.as_bytes()).await?;
        }
        out.flush().await?;
        Ok(open.len())
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

/// Drop the oldest resolved items beyond the history limit.
fn prune_resolved(items: &mut VecDeque<ReviewItem>) {
    let resolved = items
        .iter()
        .filter(|i| i.status == ReviewStatus::Resolved)
        .count();
    let mut to_remove = resolved.saturating_sub(RESOLVED_HISTORY);
    if to_remove == 0 {
        return;
    }
    items.retain(|i| {
        if i.status == ReviewStatus::Resolved && to_remove > 0 {
            to_remove -= 1;
            false
        } else {
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(reason: ReviewReason) -> ReviewItem {
        ReviewItem::new(
            Some(ConversationId::fresh()),
            "shipper@acme.com",
            reason,
            "pickup location is a landmark",
        )
    }

    #[tokio::test]
    async fn push_and_list_open() {
        let queue = ReviewQueue::new();
        assert!(queue.is_empty().await);

        queue.push(item(ReviewReason::LateReply)).await;
        queue
            .push(item(ReviewReason::Abandoned {
                rounds: 3,
                timed_out: false,
            }))
            .await;
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.open_items().await.len(), 2);
    }

    #[tokio::test]
    async fn resolve_once() {
        let queue = ReviewQueue::new();
        let it = item(ReviewReason::CorrelationFailure);
        let id = it.id;
        queue.push(it).await;

        assert!(queue.resolve(id).await);
        assert!(!queue.resolve(id).await);
        assert!(!queue.resolve(Uuid::new_v4()).await);
        assert!(queue.open_items().await.is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let queue = ReviewQueue::new();
        let mut rx = queue.subscribe();
        let it = item(ReviewReason::LowConfidence { confidence: 0.4 });
        let id = it.id;
        queue.push(it).await;
        queue.resolve(id).await;

        match rx.recv().await.unwrap() {
            ReviewEvent::NewItem { item } => assert_eq!(item.id, id),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ReviewEvent::Resolved { id: resolved } => assert_eq!(resolved, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn filters_by_conversation() {
        let queue = ReviewQueue::new();
        let it = item(ReviewReason::LateReply);
        let conversation = it.conversation_id.clone().unwrap();
        queue.push(it).await;
        queue.push(item(ReviewReason::LateReply)).await;
        assert_eq!(queue.for_conversation(&conversation).await.len(), 1);
    }

    #[tokio::test]
    async fn open_items_are_written_as_json_lines() {
        let queue = ReviewQueue::new();
        queue.push(item(ReviewReason::CorrelationFailure)).await;
        let done = item(ReviewReason::LateReply);
        let done_id = done.id;
        queue.push(done).await;
        queue
            .push(item(ReviewReason::Abandoned {
                rounds: 2,
                timed_out: true,
            }))
            .await;
        queue.resolve(done_id).await;

        let mut out: Vec<u8> = Vec::new();
        let written = queue.write_open_items(&mut out).await.unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["review"]["reason"]["kind"], "correlation_failure");
        assert_eq!(lines[1]["review"]["reason"]["kind"], "abandoned");
        assert_eq!(lines[1]["review"]["reason"]["timed_out"], true);
        assert_eq!(lines[1]["review"]["status"], "open");
    }

    #[test]
    fn reason_display() {
        assert_eq!(
            ReviewReason::Abandoned {
                rounds: 3,
                timed_out: false
            }
            .to_string(),
            "abandoned after 3 round(s)"
        );
        assert_eq!(
            ReviewReason::Abandoned {
                rounds: 1,
                timed_out: true
            }
            .to_string(),
            "abandoned (no reply)"
        );
        assert_eq!(
            ReviewReason::LowConfidence { confidence: 0.42 }.to_string(),
            "low confidence (0.42)"
        );
    }

    #[test]
    fn prune_keeps_open_items() {
        let mut items: VecDeque<ReviewItem> = (0..RESOLVED_HISTORY + 5)
            .map(|_| {
                let mut it = item(ReviewReason::LateReply);
                it.status = ReviewStatus::Resolved;
                it
            })
            .collect();
        items.push_front(item(ReviewReason::CorrelationFailure));
        prune_resolved(&mut items);
        assert_eq!(items.len(), RESOLVED_HISTORY + 1);
        assert_eq!(items[0].status, ReviewStatus::Open);
    }
}
