//! Background clarification sweeper. Abandons clarifications whose reply
//! never arrived and hands them to human review.
//!
//! Timer-based loop:
//! 1. `list_pending_clarifications()` from the store
//! 2. Requests older than the reply timeout → NO_REPLY_TIMEOUT → ABANDONED
//! 3. Each abandonment is pushed to the review queue

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::pipeline::processor::IntakeProcessor;

/// Spawn the sweeper.
///
/// Returns a `JoinHandle` and a shutdown sender. The first sweep runs
/// immediately. Sending `true` (or dropping the sender) stops the loop
/// between sweeps; a sweep in progress always completes, so awaiting the
/// handle after shutdown never loses an abandonment.
pub fn spawn_clarification_sweeper(
    processor: Arc<IntakeProcessor>,
    interval: Duration,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Clarification sweeper started");

        let mut tick = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => {}
            }

            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                info!("Clarification sweeper shutting down");
                return;
            }

            match processor.sweep_expired().await {
                Ok(0) => debug!("Sweep found nothing overdue"),
                Ok(count) => debug!(count, "Sweep abandoned overdue clarifications"),
                // Store errors are transient here; the next tick retries.
                Err(e) => error!(error = %e, "Clarification sweep failed"),
            }
        }
    });

    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::config::{ClarificationConfig, ClassifierConfig, FreightPolicy};
    use crate::error::LlmError;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider, RetryPolicy,
    };
    use crate::pipeline::clarification::ClarificationManager;
    use crate::pipeline::classifier::Classifier;
    use crate::pipeline::extractor::Extractor;
    use crate::pipeline::processor::IntakeOutcome;
    use crate::pipeline::rules::RulesEngine;
    use crate::pipeline::types::{ClarificationPhase, InboundMessage};
    use crate::pipeline::validator::Validator;
    use crate::review::{ReviewQueue, ReviewReason};
    use crate::store::{InMemoryStore, IntakeStore};

    struct RoutedLlm;

    #[async_trait]
    impl LlmProvider for RoutedLlm {
        fn model_name(&self) -> &str {
            "routed"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let content = if request.messages[0].content.contains("screen inbound email") {
                r#"{"is_request": true, "confidence": 0.9, "category": "new_shipment_request"}"#
            } else {
                r#"{"pickup_location": "near O'Hare Airport", "delivery_location": "Dallas TX 75201"}"#
            };
            Ok(CompletionResponse {
                content: content.into(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn sweeper_abandons_overdue_clarifications() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(RoutedLlm);
        let policy = FreightPolicy::default();
        let extractor = Arc::new(Extractor::new(llm.clone(), RetryPolicy::immediate(1)));
        let review = ReviewQueue::new();
        let clarifications = ClarificationManager::new(
            store.clone(),
            Arc::clone(&extractor),
            Validator::new(policy.clone()),
            ClarificationConfig {
                max_rounds: 3,
                reply_timeout: Duration::ZERO,
                sweep_interval: Duration::from_millis(10),
            },
        );
        let processor = Arc::new(IntakeProcessor::new(
            Classifier::new(llm, RulesEngine::empty(), RetryPolicy::immediate(1)),
            extractor,
            clarifications,
            store.clone(),
            Arc::clone(&review),
            policy,
            &ClassifierConfig::default(),
        ));

        let msg = InboundMessage::new(
            "m-1",
            "shipper@acme.com",
            "Load",
            "Pickup near O'Hare Airport going to Dallas TX 75201",
        );
        let IntakeOutcome::ClarificationSent {
            conversation_id, ..
        } = processor.process(msg).await.unwrap()
        else {
            panic!("expected a clarification");
        };

        let (handle, shutdown) =
            spawn_clarification_sweeper(Arc::clone(&processor), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.send(true).unwrap();
        handle.await.unwrap();

        let request = store.get_clarification(&conversation_id).await.unwrap().unwrap();
        assert_eq!(request.phase, ClarificationPhase::Abandoned);

        let items = review.for_conversation(&conversation_id).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0].reason,
            ReviewReason::Abandoned {
                timed_out: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn shutdown_stops_a_waiting_sweeper_promptly() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(RoutedLlm);
        let policy = FreightPolicy::default();
        let extractor = Arc::new(Extractor::new(llm.clone(), RetryPolicy::immediate(1)));
        let clarifications = ClarificationManager::new(
            store.clone(),
            Arc::clone(&extractor),
            Validator::new(policy.clone()),
            ClarificationConfig::default(),
        );
        let processor = Arc::new(IntakeProcessor::new(
            Classifier::new(llm, RulesEngine::empty(), RetryPolicy::immediate(1)),
            extractor,
            clarifications,
            store,
            ReviewQueue::new(),
            policy,
            &ClassifierConfig::default(),
        ));

        // An hour between sweeps: only the shutdown signal can end the wait.
        let (handle, shutdown) =
            spawn_clarification_sweeper(processor, Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
