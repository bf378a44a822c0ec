//! End-to-end fan-out through sessions, broadcaster and ingest.

use bytes::{Bytes, BytesMut};
use murmur_core::{
    Broadcaster, Ingest, IngestConfig, IngestError, MemoryStore, SessionConfig, Store,
    StreamingSession, SubscriberRegistry,
};
use murmur_protocol::{codec, NotificationPayload, SendMessageRequest, SseFrame, TIMESTAMP_FORMAT};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn decode(frame: Bytes) -> NotificationPayload {
    let mut buf = BytesMut::from(&frame[..]);
    match codec::decode_from(&mut buf).unwrap() {
        Some(SseFrame::Data(json)) => serde_json::from_slice(&json).unwrap(),
        other => panic!("Expected data frame, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_all_receive_one_copy() {
    let registry = Arc::new(SubscriberRegistry::new());
    let broadcaster = Broadcaster::new(Arc::clone(&registry));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.register() })
        })
        .collect();

    let mut subscriptions = Vec::with_capacity(100);
    for handle in handles {
        subscriptions.push(handle.await.unwrap());
    }
    assert_eq!(registry.len(), 100);

    let report = broadcaster.publish(Bytes::from_static(b"payload"));
    assert_eq!(report.delivered, 100);

    for sub in &mut subscriptions {
        assert_eq!(sub.try_recv(), Some(Bytes::from_static(b"payload")));
        assert_eq!(sub.try_recv(), None);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_receive_broadcast() {
    let registry = Arc::new(SubscriberRegistry::new());
    let broadcaster = Broadcaster::new(Arc::clone(&registry));
    let shutdown = CancellationToken::new();

    let sessions: Vec<StreamingSession> = (0..100)
        .map(|_| {
            StreamingSession::open(
                Arc::clone(&registry),
                &SessionConfig::default(),
                shutdown.clone(),
            )
        })
        .collect();

    let readers: Vec<_> = sessions
        .into_iter()
        .map(|mut session| tokio::spawn(async move { session.next_frame().await }))
        .collect();

    broadcaster.publish_payload(&NotificationPayload::new("User1", "hi", "2024-05-01 12:00:00"));

    for reader in readers {
        let frame = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader timed out")
            .unwrap()
            .unwrap();
        assert_eq!(decode(frame).content, "hi");
    }

    // Every session was dropped when its reader task finished.
    assert!(registry.is_empty());
}

#[tokio::test]
async fn ingest_reaches_streaming_session_exactly_once() {
    let registry = Arc::new(SubscriberRegistry::new());
    let store = Arc::new(MemoryStore::with_users(["User1", "User2"]));
    let ingest = Ingest::new(
        store.clone(),
        Broadcaster::new(Arc::clone(&registry)),
        IngestConfig::default(),
    );

    let mut session = StreamingSession::open(
        Arc::clone(&registry),
        &SessionConfig::default(),
        CancellationToken::new(),
    );

    ingest.send(SendMessageRequest::new(1, "hi")).await.unwrap();

    let stored = store.messages().await.unwrap().pop().unwrap();
    let payload = decode(session.next_frame().await.unwrap());
    assert_eq!(
        payload,
        NotificationPayload::new(
            "User1",
            "hi",
            stored.timestamp.format(TIMESTAMP_FORMAT).to_string()
        )
    );

    let next = tokio::time::timeout(Duration::from_millis(50), session.next_frame()).await;
    assert!(next.is_err(), "payload delivered more than once");
}

#[tokio::test]
async fn rejected_ingest_broadcasts_nothing() {
    let registry = Arc::new(SubscriberRegistry::new());
    let store = Arc::new(MemoryStore::with_users(["User1"]));
    let ingest = Ingest::new(
        store,
        Broadcaster::new(Arc::clone(&registry)),
        IngestConfig::default(),
    );
    let mut a = registry.register();
    let mut b = registry.register();

    let request: SendMessageRequest = serde_json::from_str(r#"{"user_id": 1}"#).unwrap();
    assert!(matches!(
        ingest.send(request).await,
        Err(IngestError::Validation(_))
    ));

    assert!(a.try_recv().is_none());
    assert!(b.try_recv().is_none());
}

#[tokio::test]
async fn fifo_across_ingests() {
    let registry = Arc::new(SubscriberRegistry::new());
    let ingest = Ingest::new(
        Arc::new(MemoryStore::with_users(["User1"])),
        Broadcaster::new(Arc::clone(&registry)),
        IngestConfig::default(),
    );
    let mut session = StreamingSession::open(
        Arc::clone(&registry),
        &SessionConfig::default(),
        CancellationToken::new(),
    );

    for text in ["A", "B", "C"] {
        ingest.send(SendMessageRequest::new(1, text)).await.unwrap();
    }

    for expected in ["A", "B", "C"] {
        assert_eq!(decode(session.next_frame().await.unwrap()).content, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_ingests_arrive_in_commit_order() {
    let registry = Arc::new(SubscriberRegistry::new());
    let store = Arc::new(MemoryStore::with_users(["User1", "User2"]));
    let ingest = Ingest::new(
        store.clone(),
        Broadcaster::new(Arc::clone(&registry)),
        IngestConfig::default(),
    );
    let mut sub = registry.register();

    let senders: Vec<_> = (0..500)
        .map(|i| {
            let ingest = ingest.clone();
            tokio::spawn(async move {
                ingest
                    .send(SendMessageRequest::new(i % 2 + 1, i.to_string()))
                    .await
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap().unwrap();
    }

    let committed: Vec<String> = store
        .messages()
        .await
        .unwrap()
        .into_iter()
        .map(|message| message.content)
        .collect();

    let mut delivered = Vec::with_capacity(committed.len());
    while let Some(json) = sub.try_recv() {
        let payload: NotificationPayload = serde_json::from_slice(&json).unwrap();
        delivered.push(payload.content);
    }

    assert_eq!(committed.len(), 500);
    assert_eq!(delivered, committed);
}
