//! Integration tests: two TransportNode instances on localhost.

use std::time::Duration;

use lumen_transport::{ConnectionId, TransportConfig, TransportError, TransportEvent, TransportNode};

async fn bind(config: TransportConfig) -> TransportNode {
    TransportNode::bind("127.0.0.1:0".parse().unwrap(), config)
        .await
        .unwrap()
}

async fn next_event(node: &mut TransportNode) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(10), node.recv())
        .await
        .expect("recv timed out")
        .expect("event channel closed")
}

/// Wait until `node` reports a handshake, returning the connection id.
async fn wait_handshake(node: &mut TransportNode) -> ConnectionId {
    loop {
        if let TransportEvent::HandshakeComplete { id } = next_event(node).await {
            return id;
        }
    }
}

async fn next_frame(node: &mut TransportNode) -> (ConnectionId, Vec<u8>) {
    loop {
        if let TransportEvent::Frame { id, data } = next_event(node).await {
            return (id, data);
        }
    }
}

#[tokio::test]
async fn two_nodes_exchange_frames_in_order() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let mut a = bind(TransportConfig::new()).await;
    let mut b = bind(TransportConfig::new()).await;

    let to_b = a.connect(b.local_addr()).await.unwrap();
    assert!(matches!(next_event(&mut a).await, TransportEvent::Opened { id, .. } if id == to_b));
    assert_eq!(wait_handshake(&mut a).await, to_b);
    let from_a = wait_handshake(&mut b).await;

    for i in 0..20u8 {
        a.send(to_b, vec![i; 16].into()).await.unwrap();
    }
    for i in 0..20u8 {
        let (id, data) = next_frame(&mut b).await;
        assert_eq!(id, from_a);
        assert_eq!(data, vec![i; 16]);
    }

    // And back the other way
    b.send(from_a, b"pong".to_vec().into()).await.unwrap();
    let (id, data) = next_frame(&mut a).await;
    assert_eq!(id, to_b);
    assert_eq!(data, b"pong");

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn reject_oversized_send() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let a = bind(TransportConfig::new().max_frame_size(64)).await;
    let b = bind(TransportConfig::new()).await;
    let id = a.connect(b.local_addr()).await.unwrap();

    match a.send(id, vec![0u8; 128].into()).await {
        Err(TransportError::FrameTooLarge { size, max }) => {
            assert_eq!(size, 128);
            assert_eq!(max, 64);
        }
        other => panic!("expected FrameTooLarge, got {other:?}"),
    }

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_inbound_frame_is_a_fault_not_a_close() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let mut a = bind(TransportConfig::new()).await;
    let mut b = bind(TransportConfig::new().max_frame_size(32)).await;

    let to_b = a.connect(b.local_addr()).await.unwrap();
    wait_handshake(&mut a).await;
    let from_a = wait_handshake(&mut b).await;

    a.send(to_b, vec![1u8; 100].into()).await.unwrap();
    a.send(to_b, b"small".to_vec().into()).await.unwrap();

    match next_event(&mut b).await {
        TransportEvent::Fault { id, .. } => assert_eq!(id, from_a),
        other => panic!("expected Fault, got {other:?}"),
    }
    let (id, data) = next_frame(&mut b).await;
    assert_eq!(id, from_a);
    assert_eq!(data, b"small");

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn close_is_reported_to_both_sides() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let mut a = bind(TransportConfig::new()).await;
    let mut b = bind(TransportConfig::new()).await;

    let to_b = a.connect(b.local_addr()).await.unwrap();
    wait_handshake(&mut a).await;
    let from_a = wait_handshake(&mut b).await;

    a.send(to_b, b"last words".to_vec().into()).await.unwrap();
    assert!(a.close(to_b).await);
    assert!(!a.close(to_b).await);

    // Queued frame is flushed before the stream ends
    let (_, data) = next_frame(&mut b).await;
    assert_eq!(data, b"last words");

    loop {
        if let TransportEvent::Closed { id, .. } = next_event(&mut b).await {
            assert_eq!(id, from_a);
            break;
        }
    }
    loop {
        if let TransportEvent::Closed { id, reason } = next_event(&mut a).await {
            assert_eq!(id, to_b);
            assert_eq!(reason, "closed locally");
            break;
        }
    }

    assert!(matches!(
        a.send(to_b, b"too late".to_vec().into()).await,
        Err(TransportError::UnknownConnection(_))
    ));

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn alpn_mismatch_closes_without_handshake() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let mut a = bind(TransportConfig::new().alpn(b"lumen/other/9")).await;
    let b = bind(TransportConfig::new()).await;

    let id = a.connect(b.local_addr()).await.unwrap();
    loop {
        match next_event(&mut a).await {
            TransportEvent::HandshakeComplete { .. } => panic!("handshake must not complete"),
            TransportEvent::Closed { id: closed, reason } => {
                assert_eq!(closed, id);
                assert!(reason.contains("handshake"), "unexpected reason: {reason}");
                break;
            }
            _ => {}
        }
    }

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}
