//! Dispatch manager admission against the in-memory broker and mock spawner
//!
//! Covers the process bound and the backpressure path.

use std::sync::Arc;
use std::time::Duration;

use courier_core::application::{DispatchConfig, DispatchLimits, DispatchManager, DispatchOutcome};
use courier_core::domain::QueueName;
use courier_core::port::broker::mocks::{BrokerEvent, InMemoryBroker};
use courier_core::port::error_reporter::mocks::RecordingReporter;
use courier_core::port::process::mocks::MockSpawner;
use courier_core::port::{Broker, Claim, ConsumeOptions, Consumer};
use tokio::time::Instant;

const PENDING: &str = "Shopify.PendingTasks";

fn pending() -> QueueName {
    QueueName::new(PENDING).unwrap()
}

fn notice(target: &str) -> String {
    format!(r#"{{"target":"{}","task":"Reprice"}}"#, target)
}

struct Fixture {
    broker: InMemoryBroker,
    spawner: Arc<MockSpawner>,
    manager: DispatchManager,
    consumer: Box<dyn Consumer>,
}

async fn fixture(global: usize) -> Fixture {
    let broker = InMemoryBroker::new();
    let spawner = Arc::new(MockSpawner::new());
    let session = broker.session();

    session.declare(&pending()).await.unwrap();
    let Claim::Granted(consumer) = session
        .consume(&pending(), ConsumeOptions::shared(1))
        .await
        .unwrap()
    else {
        panic!("pending queue claim denied");
    };

    let manager = DispatchManager::new(
        Arc::new(session),
        spawner.clone(),
        Arc::new(RecordingReporter::new()),
        DispatchConfig::new(pending()).with_limits(DispatchLimits {
            global_process_limit: global,
            consumer_per_queue: 1,
        }),
    );

    Fixture {
        broker,
        spawner,
        manager,
        consumer,
    }
}

impl Fixture {
    async fn next_outcome(&mut self) -> Option<DispatchOutcome> {
        let delivery = tokio::time::timeout(Duration::from_millis(100), self.consumer.next())
            .await
            .ok()??
            .unwrap();
        Some(self.manager.on_pending_task(delivery.as_ref()).await)
    }
}

/// Live workers never exceed the global limit, whatever the notice order
#[tokio::test(start_paused = true)]
async fn test_live_workers_never_exceed_global_limit() {
    let limit = 3;
    let mut f = fixture(limit).await;

    // Deterministic interleaving of 8 tenants, with repeats
    let targets: Vec<String> = (0..40u32)
        .map(|i| format!("Shopify.{}.shop", (i * 7 + i / 3) % 8))
        .collect();
    for target in &targets {
        f.broker.seed(PENDING, notice(target));
    }

    let mut steps = 0;
    while let Some(outcome) = f.next_outcome().await {
        steps += 1;
        assert!(
            f.spawner.running_count() <= limit,
            "step {}: {} running after {:?}",
            steps,
            f.spawner.running_count(),
            outcome
        );
        assert!(f.manager.live_workers() <= limit);

        // Workers drain and exit over time
        if steps % 3 == 0 {
            if let Some(worker) = f.spawner.handles().into_iter().find(|h| h.is_running()) {
                worker.exit(0);
            }
        }
        if steps > 400 {
            break;
        }
    }

    assert!(f.spawner.spawn_count() > limit, "workers were recycled");
    println!("✅ {} dispatch decisions, never above {} live workers", steps, limit);
}

/// GLOBAL_PROCESS_LIMIT=2 with two live workers: a third queue is requeued, not spawned
#[tokio::test(start_paused = true)]
async fn test_third_queue_is_requeued_at_capacity() {
    let mut f = fixture(2).await;
    f.broker.seed(PENDING, notice("Shopify.1.alpha"));
    f.broker.seed(PENDING, notice("Shopify.2.beta"));

    assert!(matches!(f.next_outcome().await, Some(DispatchOutcome::Spawned { .. })));
    assert!(matches!(f.next_outcome().await, Some(DispatchOutcome::Spawned { .. })));

    f.broker.seed(PENDING, notice("Shopify.3.gamma"));
    let started = Instant::now();
    let outcome = f.next_outcome().await;

    assert_eq!(outcome, Some(DispatchOutcome::Backpressure));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(f.spawner.spawn_count(), 2);
    assert!(f.spawner.handles_for("Shopify.3.gamma").is_empty());

    let events = f.broker.events();
    assert!(events.iter().any(|e| matches!(
        e,
        BrokerEvent::Rejected { queue, requeue: true, .. } if queue == PENDING
    )));
    // Never acknowledged on the backpressure path
    let acks = events
        .iter()
        .filter(|e| matches!(e, BrokerEvent::Acked { queue, .. } if queue == PENDING))
        .count();
    assert_eq!(acks, 2);

    // Capacity frees up: the requeued notice now spawns
    f.spawner.handles_for("Shopify.1.alpha")[0].exit(0);
    let outcome = f.next_outcome().await;
    assert!(matches!(
        outcome,
        Some(DispatchOutcome::Spawned { ref target, .. }) if target.as_str() == "Shopify.3.gamma"
    ));

    println!("✅ Backpressure requeues without spawning");
}

/// A notice for a queue that already has its worker spawns nothing
#[tokio::test(start_paused = true)]
async fn test_one_worker_per_queue() {
    let mut f = fixture(4).await;
    for _ in 0..5 {
        f.broker.seed(PENDING, notice("Shopify.9.acme"));
    }

    let mut outcomes = Vec::new();
    while let Some(outcome) = f.next_outcome().await {
        outcomes.push(outcome);
    }

    assert_eq!(outcomes.len(), 5);
    assert_eq!(f.spawner.spawn_count(), 1);
    assert_eq!(f.manager.workers_for(&QueueName::new("Shopify.9.acme").unwrap()), 1);
    assert_eq!(f.broker.ready_count(PENDING), 0);
    assert_eq!(f.broker.unacked_count(PENDING), 0);
}
