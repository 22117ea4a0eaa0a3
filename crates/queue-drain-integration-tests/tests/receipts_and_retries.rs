//! Receipt lifetime and retry behaviour against the storage queue emulator.

mod common;

use common::{StorageQueueEmulator, DEV_KEY};
use queue_drain_runtime::{
    drain_queue, DrainError, DrainOptions, MessageEncoding, QueueClient, QueueClientFactory,
    QueueError, QueueName,
};
use std::time::Duration;

fn orders() -> QueueName {
    QueueName::new("orders".to_string()).unwrap()
}

// ============================================================================
// Receipts
// ============================================================================

#[tokio::test]
async fn test_stale_receipt_rejected_after_redelivery() {
    let (server, emulator) = StorageQueueEmulator::start().await;
    emulator.create_queue("orders");
    emulator.put("orders", "order-123");
    let client = common::client(&server).await;

    let first = client
        .receive_batch(&orders(), 1, Some(chrono::Duration::seconds(1)))
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].dequeue_count, 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let second = client
        .receive_batch(&orders(), 1, Some(chrono::Duration::seconds(30)))
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, first[0].message_id);
    assert_eq!(second[0].dequeue_count, 2);

    let stale = client
        .delete_message(&orders(), &first[0].receipt_handle)
        .await;
    assert!(matches!(stale, Err(QueueError::MessageNotFound { .. })));
    assert_eq!(emulator.message_count("orders"), 1);

    client
        .delete_message(&orders(), &second[0].receipt_handle)
        .await
        .unwrap();
    assert_eq!(emulator.message_count("orders"), 0);
}

#[tokio::test]
async fn test_received_message_hidden_until_visibility_expires() {
    let (server, emulator) = StorageQueueEmulator::start().await;
    emulator.create_queue("orders");
    emulator.put("orders", "order-123");
    let client = common::client(&server).await;

    let first = client.receive_batch(&orders(), 32, None).await.unwrap();
    assert_eq!(first.len(), 1);

    let again = client.receive_batch(&orders(), 32, None).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_deleting_twice_reports_message_not_found() {
    let (server, emulator) = StorageQueueEmulator::start().await;
    emulator.create_queue("orders");
    emulator.put("orders", "order-123");
    let client = common::client(&server).await;

    let batch = client.receive_batch(&orders(), 1, None).await.unwrap();
    let handle = &batch[0].receipt_handle;

    client.delete_message(&orders(), handle).await.unwrap();
    let result = client.delete_message(&orders(), handle).await;

    assert!(matches!(result, Err(QueueError::MessageNotFound { .. })));
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_server_busy_is_retried_then_drain_succeeds() {
    let (server, emulator) = StorageQueueEmulator::start().await;
    emulator.create_queue("orders");
    emulator.put("orders", "order-123");
    emulator.fail_next(503, "ServerBusy");
    emulator.fail_next(503, "ServerBusy");

    let client = common::client(&server).await;
    let mut out = Vec::new();
    let report = drain_queue(client.as_ref(), &orders(), &DrainOptions::default(), &mut out)
        .await
        .unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(emulator.request_count("GET"), 3);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Reading messages from the Queue...\nMessage content: order-123\n"
    );
}

#[tokio::test]
async fn test_retries_exhausted_surface_transient_error() {
    let (server, emulator) = StorageQueueEmulator::start().await;
    emulator.create_queue("orders");
    for _ in 0..4 {
        emulator.fail_next(500, "InternalError");
    }

    let client = common::client(&server).await;
    let mut out = Vec::new();
    let result = drain_queue(client.as_ref(), &orders(), &DrainOptions::default(), &mut out).await;

    match result {
        Err(DrainError::Queue(e)) => assert!(e.is_transient()),
        other => panic!("Expected transient queue error, got {:?}", other),
    }
    assert!(out.is_empty());
    assert_eq!(emulator.request_count("GET"), 4);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let (server, emulator) = StorageQueueEmulator::start().await;
    let client = QueueClientFactory::create_client(common::queue_config(
        &server,
        DEV_KEY,
        MessageEncoding::Text,
    ))
    .await
    .unwrap();

    let result = client.receive_batch(&orders(), 32, None).await;

    assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    assert_eq!(emulator.request_count("GET"), 1);
}
