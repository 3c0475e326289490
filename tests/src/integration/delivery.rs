//! # Delivery Failure Paths
//!
//! What happens between the physical queue and the handlers when things go
//! wrong: foreign records, orphaned topics, failing handlers, rejected
//! submits and transactional staging.

#[cfg(test)]
mod tests {
    use super::super::support::{eventually, fast_queue, settle, Inbox};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use topic_router::{
        decode, EnqueueOptions, HandlerError, InMemoryQueue, InMemoryTransaction,
        MemoryQueueConfig, QueueError, RouterConfig, RouterError, StorageKey, TopicKey,
        TopicRouter,
    };

    // =============================================================================
    // FOREIGN AND ORPHANED RECORDS
    // =============================================================================

    /// A record written without the envelope format never reaches a handler.
    #[tokio::test]
    async fn test_foreign_record_is_rejected() {
        let queue = fast_queue(0);
        let router = TopicRouter::new(Arc::clone(&queue));
        let inbox = Inbox::new();
        router.listen_queue("a", inbox.handler()).await.expect("listen");

        queue
            .inject_raw(json!({"key": "a", "value": "sneaky"}))
            .await
            .expect("inject");
        queue
            .inject_raw(json!({"key": "a", "value": "v2", "format": 2}))
            .await
            .expect("inject");

        eventually(|| queue.failed_count() == 2).await;
        settle().await;
        assert_eq!(inbox.len(), 0);
        assert_eq!(queue.delivered_count(), 0);
    }

    /// A well-formed envelope for a topic nobody listens to on the consuming
    /// side fails with `NoListener` until the queue parks it.
    #[tokio::test]
    async fn test_orphaned_topic_is_parked() {
        let queue = fast_queue(1);
        let producer =
            TopicRouter::with_config(Arc::clone(&queue), RouterConfig::producer_only());
        let consumer = TopicRouter::new(Arc::clone(&queue));
        let known = Inbox::new();

        producer.listen_queue("known", Inbox::new().handler()).await.expect("p known");
        producer.listen_queue("ghost", Inbox::new().handler()).await.expect("p ghost");
        consumer.listen_queue("known", known.handler()).await.expect("c known");

        let parked_at = StorageKey::new(["undelivered", "ghost"]);
        producer
            .enqueue(
                "ghost",
                &json!({"boo": true}),
                EnqueueOptions::new().with_keys_if_undelivered(vec![parked_at.clone()]),
            )
            .await
            .expect("enqueue ghost");
        producer
            .enqueue("known", &json!("hi"), EnqueueOptions::default())
            .await
            .expect("enqueue known");

        eventually(|| !queue.undelivered(&parked_at).is_empty()).await;
        eventually(|| known.len() == 1).await;

        let parked = queue.undelivered(&parked_at);
        let envelope = decode(parked[0].clone()).expect("parked envelope");
        assert_eq!(envelope.topic, TopicKey::from("ghost").identifier());
        assert_eq!(envelope.payload, json!({"boo": true}));
        assert_eq!(queue.failed_count(), 2);
        assert_eq!(queue.subscribe_calls(), 1);
    }

    // =============================================================================
    // HANDLER FAILURES
    // =============================================================================

    /// A failing handler's error reaches the queue, which redelivers.
    #[tokio::test]
    async fn test_failing_handler_is_redelivered() {
        let queue = fast_queue(3);
        let router = TopicRouter::new(Arc::clone(&queue));
        let attempts = Arc::new(AtomicUsize::new(0));

        {
            let attempts = Arc::clone(&attempts);
            router
                .listen_queue("flaky", move |_payload: Value| {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            return Err::<(), HandlerError>(format!("attempt {n} failed").into());
                        }
                        Ok(())
                    }
                })
                .await
                .expect("listen");
        }

        router
            .enqueue("flaky", &json!(1), EnqueueOptions::default())
            .await
            .expect("enqueue");

        eventually(|| queue.delivered_count() == 1).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(queue.failed_count(), 2);
    }

    /// Deliveries are awaited one at a time.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handlers_are_awaited_sequentially() {
        let queue = fast_queue(0);
        let router = TopicRouter::new(Arc::clone(&queue));
        let in_flight = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        {
            let (in_flight, overlaps, done) =
                (Arc::clone(&in_flight), Arc::clone(&overlaps), Arc::clone(&done));
            router
                .listen_queue("slow", move |_payload: Value| {
                    let (in_flight, overlaps, done) =
                        (Arc::clone(&in_flight), Arc::clone(&overlaps), Arc::clone(&done));
                    async move {
                        if in_flight.swap(true, Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.store(false, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), HandlerError>(())
                    }
                })
                .await
                .expect("listen");
        }

        for n in 0..5 {
            router
                .enqueue("slow", &n, EnqueueOptions::default())
                .await
                .expect("enqueue");
        }

        eventually(|| done.load(Ordering::SeqCst) == 5).await;
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    // =============================================================================
    // SUBMIT FAILURES
    // =============================================================================

    /// A rejecting queue surfaces as `EnqueueFailed` naming the topic.
    #[tokio::test]
    async fn test_rejected_submit() {
        let queue = fast_queue(0);
        let router = TopicRouter::new(Arc::clone(&queue));
        router
            .listen_queue("jobs", Inbox::new().handler())
            .await
            .expect("listen");
        queue.set_reject_submits(true);

        let err = router
            .enqueue("jobs", &json!(1), EnqueueOptions::default())
            .await
            .unwrap_err();

        match err {
            RouterError::EnqueueFailed { topic, source } => {
                assert_eq!(topic, TopicKey::from("jobs").identifier());
                assert!(matches!(source, QueueError::Rejected(_)));
            }
            other => panic!("expected EnqueueFailed, got {other}"),
        }

        queue.set_reject_submits(false);
        router
            .enqueue("jobs", &json!(2), EnqueueOptions::default())
            .await
            .expect("enqueue after recovery");
    }

    // =============================================================================
    // HANDLER FAN-OUT
    // =============================================================================

    /// Router pair over one queue: `producer` is used from inside handlers,
    /// `consumer` owns the subscription.
    async fn fan_out_pair(
        capacity: usize,
    ) -> (
        Arc<InMemoryQueue>,
        Arc<TopicRouter<InMemoryQueue>>,
        TopicRouter<InMemoryQueue>,
    ) {
        let queue = Arc::new(InMemoryQueue::with_config(MemoryQueueConfig {
            capacity,
            default_backoff: Vec::new(),
            ..MemoryQueueConfig::default()
        }));
        let producer = Arc::new(TopicRouter::with_config(
            Arc::clone(&queue),
            RouterConfig::producer_only(),
        ));
        producer
            .listen_queue("sink", Inbox::new().handler())
            .await
            .expect("producer sink");
        let consumer = TopicRouter::new(Arc::clone(&queue));
        (queue, producer, consumer)
    }

    /// A handler that enqueues several follow-ups sees all of them delivered.
    #[tokio::test]
    async fn test_handler_fan_out_is_delivered() {
        let (_queue, producer, consumer) = fan_out_pair(16).await;
        let sink = Inbox::new();
        consumer.listen_queue("sink", sink.handler()).await.expect("sink");
        consumer
            .listen_queue("fanout", move |_payload: Value| {
                let producer = Arc::clone(&producer);
                async move {
                    for i in 0..3 {
                        producer.enqueue("sink", &i, EnqueueOptions::default()).await?;
                    }
                    Ok::<(), HandlerError>(())
                }
            })
            .await
            .expect("fanout");

        consumer
            .enqueue("fanout", &json!(null), EnqueueOptions::default())
            .await
            .expect("enqueue");

        eventually(|| sink.len() == 3).await;
        assert_eq!(sink.payloads(), vec![json!(0), json!(1), json!(2)]);
    }

    /// Fanning out past the queue's capacity fails the extra enqueues at once
    /// and delivery keeps flowing for every topic.
    #[tokio::test]
    async fn test_fan_out_past_capacity_does_not_stall_delivery() {
        let (queue, producer, consumer) = fan_out_pair(1).await;
        let sink = Inbox::new();
        let rejected = Arc::new(AtomicUsize::new(0));
        consumer.listen_queue("sink", sink.handler()).await.expect("sink");

        let counter = Arc::clone(&rejected);
        consumer
            .listen_queue("fanout", move |_payload: Value| {
                let producer = Arc::clone(&producer);
                let counter = Arc::clone(&counter);
                async move {
                    for i in 0..3 {
                        if let Err(RouterError::EnqueueFailed { source, .. }) =
                            producer.enqueue("sink", &i, EnqueueOptions::default()).await
                        {
                            assert!(matches!(source, QueueError::Rejected(_)));
                            counter.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    Ok::<(), HandlerError>(())
                }
            })
            .await
            .expect("fanout");

        consumer
            .enqueue("fanout", &json!(null), EnqueueOptions::default())
            .await
            .expect("enqueue");
        eventually(|| sink.len() == 1).await;
        assert_eq!(rejected.load(Ordering::SeqCst), 2);

        consumer
            .enqueue("sink", &json!("later"), EnqueueOptions::default())
            .await
            .expect("enqueue after fan-out");
        eventually(|| sink.len() == 2).await;
        assert_eq!(sink.payloads(), vec![json!(0), json!("later")]);
        assert_eq!(queue.pending(), 0);
    }

    // =============================================================================
    // TRANSACTIONS
    // =============================================================================

    /// Staged messages are delivered only once the transaction commits.
    #[tokio::test]
    async fn test_transaction_commit_delivers() {
        let queue = fast_queue(0);
        let router = TopicRouter::new(Arc::clone(&queue));
        let inbox = Inbox::new();
        router.listen_queue("ledger", inbox.handler()).await.expect("listen");

        let mut tx = InMemoryTransaction::new();
        router
            .enqueue_atomic(&mut tx, "ledger", &json!({"debit": 10}), EnqueueOptions::default())
            .expect("stage");
        router
            .enqueue_atomic(&mut tx, "ledger", &json!({"credit": 10}), EnqueueOptions::default())
            .expect("stage");

        settle().await;
        assert!(queue.submissions().is_empty());
        assert_eq!(inbox.len(), 0);

        let staged = decode(tx.staged()[0].record.clone()).expect("staged envelope");
        assert_eq!(staged.payload, json!({"debit": 10}));

        assert_eq!(queue.commit(tx).await.expect("commit"), 2);
        eventually(|| inbox.len() == 2).await;
        assert_eq!(inbox.payloads(), vec![json!({"debit": 10}), json!({"credit": 10})]);
    }

    /// Dropping an uncommitted transaction sends nothing.
    #[tokio::test]
    async fn test_transaction_rollback_discards() {
        let queue = fast_queue(0);
        let router = TopicRouter::new(Arc::clone(&queue));
        let inbox = Inbox::new();
        router.listen_queue("ledger", inbox.handler()).await.expect("listen");

        {
            let mut tx = InMemoryTransaction::new();
            router
                .enqueue_atomic(&mut tx, "ledger", &json!(1), EnqueueOptions::default())
                .expect("stage");
        }

        settle().await;
        assert_eq!(inbox.len(), 0);
        assert_eq!(queue.delivered_count(), 0);
    }

    /// Staging still enforces registration-before-use.
    #[tokio::test]
    async fn test_transaction_requires_registration() {
        let queue = fast_queue(0);
        let router = TopicRouter::new(Arc::clone(&queue));

        let mut tx = InMemoryTransaction::new();
        let err = router
            .enqueue_atomic(&mut tx, "nobody", &json!(1), EnqueueOptions::default())
            .unwrap_err();

        assert!(matches!(err, RouterError::NoListener { .. }));
        assert!(tx.is_empty());
    }
}
