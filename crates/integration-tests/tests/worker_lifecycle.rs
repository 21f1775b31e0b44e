//! Worker runtime lifecycle: exclusive claim, idle shutdown, graceful stop

use std::sync::Arc;
use std::time::Duration;

use courier_core::application::{
    shutdown_channel, HandlerRegistry, ShutdownToken, WorkerExit, WorkerRuntime,
};
use courier_core::domain::{QueueName, TaskType};
use courier_core::port::broker::mocks::{BrokerEvent, InMemoryBroker};
use courier_core::port::error_reporter::mocks::RecordingReporter;
use courier_core::port::task_handler::mocks::{MockBehavior, MockTaskHandler};
use courier_core::port::{Broker, ConsumeOptions};
use tokio::time::Instant;

const QUEUE: &str = "Shopify.77.northwind";

fn runtime(
    broker: &InMemoryBroker,
    handler: &MockTaskHandler,
    reporter: &RecordingReporter,
) -> WorkerRuntime {
    let handlers = HandlerRegistry::builder()
        .register(TaskType::new("Fulfill"), Arc::new(handler.clone()))
        .build();
    WorkerRuntime::new(
        QueueName::new(QUEUE).unwrap(),
        Arc::new(broker.session()),
        Arc::new(handlers),
        Arc::new(reporter.clone()),
    )
}

fn never() -> ShutdownToken {
    let (_tx, token) = shutdown_channel();
    token
}

/// Two workers race for one queue: one claims it, the other leaves untouched
#[tokio::test(start_paused = true)]
async fn test_single_exclusive_claim_per_queue() {
    let broker = InMemoryBroker::new();
    let handler = MockTaskHandler::new(MockBehavior::Delay(Duration::from_millis(500)));
    let reporter = RecordingReporter::new();
    for order in 0..6 {
        broker.seed(QUEUE, format!(r#"{{"task":"Fulfill","order_id":{}}}"#, order));
    }

    let first = runtime(&broker, &handler, &reporter);
    let second = runtime(&broker, &handler, &reporter);
    let a = tokio::spawn(async move { first.run(never()).await });
    let b = tokio::spawn(async move { second.run(never()).await });

    let mut exits = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    exits.sort_by_key(|e| *e == WorkerExit::Idle);

    assert_eq!(exits, vec![WorkerExit::ClaimDenied, WorkerExit::Idle]);
    assert_eq!(handler.call_count(), 6);
    assert_eq!(broker.ready_count(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);

    let claims = broker
        .events()
        .iter()
        .filter(|e| matches!(e, BrokerEvent::ConsumeStarted { exclusive: true, .. }))
        .count();
    assert_eq!(claims, 1);

    println!("✅ One claim, all six orders processed once");
}

/// The denied worker never acknowledges or rejects anything
#[tokio::test(start_paused = true)]
async fn test_denied_worker_touches_no_message() {
    let broker = InMemoryBroker::new();
    let handler = MockTaskHandler::new_success();
    let reporter = RecordingReporter::new();
    broker.seed(QUEUE, r#"{"task":"Fulfill"}"#);

    // Holder that never consumes from its stream
    let holder = broker.session();
    let queue = QueueName::new(QUEUE).unwrap();
    holder.declare(&queue).await.unwrap();
    let _claim = holder
        .consume(&queue, ConsumeOptions::exclusive())
        .await
        .unwrap();

    let worker = runtime(&broker, &handler, &reporter);
    let before = broker.events().len();
    let exit = worker.run(never()).await.unwrap();

    assert_eq!(exit, WorkerExit::ClaimDenied);
    assert_eq!(handler.call_count(), 0);
    let touched = broker.events()[before..]
        .iter()
        .any(|e| matches!(e, BrokerEvent::Acked { .. } | BrokerEvent::Rejected { .. }));
    assert!(!touched);
}

/// Empty queue: stop once the startup timeout passes
#[tokio::test(start_paused = true)]
async fn test_empty_queue_startup_timeout() {
    let broker = InMemoryBroker::new();
    let handler = MockTaskHandler::new_success();
    let reporter = RecordingReporter::new();

    let started = Instant::now();
    let exit = runtime(&broker, &handler, &reporter).run(never()).await.unwrap();

    assert_eq!(exit, WorkerExit::Idle);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(60), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(62), "{:?}", elapsed);
}

/// Last completion at T: stop at about T + idle timeout
#[tokio::test(start_paused = true)]
async fn test_idle_timeout_after_last_completion() {
    let broker = InMemoryBroker::new();
    let handler = MockTaskHandler::new_delay(Duration::from_secs(4));
    let reporter = RecordingReporter::new();
    broker.seed(QUEUE, r#"{"task":"Fulfill","order_id":1}"#);
    broker.seed(QUEUE, r#"{"task":"Fulfill","order_id":2}"#);

    let started = Instant::now();
    let exit = runtime(&broker, &handler, &reporter).run(never()).await.unwrap();

    // Both run concurrently and complete at t=4
    assert_eq!(exit, WorkerExit::Idle);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(14), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(16), "{:?}", elapsed);
    assert_eq!(handler.call_count(), 2);
}

/// Shutdown mid-handler: the channel closes only after the ack
#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_after_in_flight_completes() {
    let broker = InMemoryBroker::new();
    let handler = MockTaskHandler::new_delay(Duration::from_secs(20));
    let reporter = RecordingReporter::new();
    broker.seed(QUEUE, r#"{"task":"Fulfill"}"#);

    let worker = runtime(&broker, &handler, &reporter);
    let (tx, token) = shutdown_channel();
    let started = Instant::now();
    let run = tokio::spawn(async move { worker.run(token).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    tx.shutdown();
    let exit = run.await.unwrap().unwrap();

    assert_eq!(exit, WorkerExit::Signalled);
    assert!(started.elapsed() >= Duration::from_secs(20));

    let events = broker.events();
    let acked = events
        .iter()
        .position(|e| matches!(e, BrokerEvent::Acked { .. }))
        .expect("message acknowledged");
    let channel_closed = events
        .iter()
        .position(|e| matches!(e, BrokerEvent::ChannelClosed { .. }))
        .expect("channel closed");
    let connection_closed = events
        .iter()
        .position(|e| matches!(e, BrokerEvent::ConnectionClosed { .. }))
        .expect("connection closed");
    assert!(acked < channel_closed);
    assert!(channel_closed < connection_closed);
}

/// Handler failure is reported and the message goes back on channel close
#[tokio::test(start_paused = true)]
async fn test_failed_message_returns_to_queue() {
    let broker = InMemoryBroker::new();
    let handler = MockTaskHandler::new_fail("upstream 422");
    let reporter = RecordingReporter::new();
    broker.seed(QUEUE, r#"{"task":"Fulfill","order_id":5}"#);

    let exit = runtime(&broker, &handler, &reporter).run(never()).await.unwrap();

    assert_eq!(exit, WorkerExit::Idle);
    assert_eq!(handler.call_count(), 1);
    assert_eq!(reporter.count(), 1);
    assert_eq!(broker.ready_count(QUEUE), 1);
}
