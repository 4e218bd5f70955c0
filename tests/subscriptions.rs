//! Subscription dispatch over the shared `graphql-transport-ws` connection

mod common;

use std::time::Duration;

use common::MockSocketServer;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use gql_operation_client::{ClientBuilder, Dispatch, ErrorKind, Operation, OperationClient};

const NOTIFICATIONS: &str = "subscription { notifications(chainId: \"e476187f\") }";

fn client_for(server: &MockSocketServer) -> OperationClient {
    ClientBuilder::new()
        .http_url("http://127.0.0.1:1/chains/e476187f/applications/9a2c0e11")
        .ws_url(server.url.clone())
        .ack_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

fn notifications() -> Operation {
    Operation::new(NOTIFICATIONS).unwrap()
}

async fn next_event<S>(stream: &mut S) -> Option<S::Item>
where
    S: futures::Stream + Unpin,
{
    timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no event within 5s")
}

#[tokio::test]
async fn test_subscription_yields_values_in_order_then_ends() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let mut stream = match client.dispatch(notifications()).await {
        Dispatch::Stream(stream) => stream,
        Dispatch::Response(_) => panic!("subscription was sent as a request"),
    };

    let subscribe = server.next_message().await;
    assert_eq!(subscribe["type"], "subscribe");
    assert_eq!(subscribe["id"], stream.id());
    assert_eq!(subscribe["payload"]["query"], NOTIFICATIONS);

    let id = stream.id().to_string();
    for value in 1..=3 {
        server.next(&id, json!({"notifications": value}));
    }
    server.complete(&id);

    for value in 1..=3 {
        let item = assert_ok!(next_event(&mut stream).await.unwrap());
        assert_eq!(item, json!({"notifications": value}));
    }
    assert!(next_event(&mut stream).await.is_none());
    assert!(stream.is_finished());

    // Completed by the server: dropping it sends nothing
    drop(stream);
    server.expect_silence(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_cancel_completes_only_that_subscription() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let first = client.subscribe(&notifications()).await.unwrap();
    let first_id = server.next_message().await["id"].clone();
    let mut second = client.subscribe(&notifications()).await.unwrap();
    let second_id = server.next_message().await["id"].clone();

    assert_ne!(first_id, second_id);
    assert_eq!(first_id, first.id());

    first.cancel();
    assert_eq!(
        server.next_message().await,
        json!({"type": "complete", "id": first_id})
    );

    server.next(second.id(), json!({"notifications": 7}));
    let item = assert_ok!(next_event(&mut second).await.unwrap());
    assert_eq!(item, json!({"notifications": 7}));

    server.expect_silence(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_dropping_subscription_cancels_it() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let stream = client.subscribe(&notifications()).await.unwrap();
    let id = server.next_message().await["id"].clone();

    drop(stream);

    assert_eq!(server.next_message().await, json!({"type": "complete", "id": id}));
}

#[tokio::test]
async fn test_subscriptions_share_one_connection() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(client.subscribe(&notifications()).await.unwrap());
        server.next_message().await;
    }

    assert_eq!(server.connection_count(), 1);
    assert!(client.is_streaming_connected().await);

    // Frames are routed by id
    server.next(streams[2].id(), json!({"notifications": "third"}));
    server.next(streams[0].id(), json!({"notifications": "first"}));

    let third = assert_ok!(next_event(&mut streams[2]).await.unwrap());
    let first = assert_ok!(next_event(&mut streams[0]).await.unwrap());
    assert_eq!(third["notifications"], "third");
    assert_eq!(first["notifications"], "first");
}

#[tokio::test]
async fn test_error_frame_ends_subscription() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let mut stream = client.subscribe(&notifications()).await.unwrap();
    let id = server.next_message().await["id"].clone();

    server.send(json!({"type": "error", "id": id, "payload": [{"message": "unknown chain"}]}));

    let err = assert_err!(next_event(&mut stream).await.unwrap());
    assert_eq!(err.kind(), ErrorKind::GraphQL);
    assert_eq!(err.graphql_errors()[0].message, "unknown chain");
    assert!(next_event(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_next_with_errors_keeps_stream_open() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let mut stream = client.subscribe(&notifications()).await.unwrap();
    let id = server.next_message().await["id"].as_str().unwrap().to_string();

    server.send(json!({
        "type": "next",
        "id": id,
        "payload": {"errors": [{"message": "resolver failed"}]}
    }));
    server.next(&id, json!({"notifications": 2}));

    let err = assert_err!(next_event(&mut stream).await.unwrap());
    assert_eq!(err.kind(), ErrorKind::GraphQL);
    let item = assert_ok!(next_event(&mut stream).await.unwrap());
    assert_eq!(item, json!({"notifications": 2}));
}

#[tokio::test]
async fn test_connection_loss_fails_active_subscriptions() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let mut first = client.subscribe(&notifications()).await.unwrap();
    server.next_message().await;
    let mut second = client.subscribe(&notifications()).await.unwrap();
    server.next_message().await;

    server.drop_connection();

    for stream in [&mut first, &mut second] {
        let err = assert_err!(next_event(&mut *stream).await.unwrap());
        assert_eq!(err.kind(), ErrorKind::TransportClosed);
        assert!(next_event(&mut *stream).await.is_none());
    }

    // No silent reconnect; the next subscription dials again
    assert_eq!(server.connection_count(), 1);
    let _third = client.subscribe(&notifications()).await.unwrap();
    assert_eq!(server.next_message().await["type"], "subscribe");
    assert_eq!(server.connection_count(), 2);
}

#[tokio::test]
async fn test_close_ends_subscriptions() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let mut stream = client.subscribe(&notifications()).await.unwrap();
    server.next_message().await;

    client.close().await;
    assert!(!client.is_streaming_connected().await);

    let err = assert_err!(next_event(&mut stream).await.unwrap());
    assert_eq!(err.kind(), ErrorKind::TransportClosed);
    assert!(next_event(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let _stream = client.subscribe(&notifications()).await.unwrap();
    server.next_message().await;

    server.send(json!({"type": "ping"}));
    assert_eq!(server.next_message().await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_handshake_ping_is_answered_before_ack() {
    let mut server = MockSocketServer::start_with_handshake_ping().await;
    let client = client_for(&server);

    let mut stream = client.subscribe(&notifications()).await.unwrap();

    assert_eq!(server.next_message().await, json!({"type": "pong"}));
    assert_eq!(server.next_message().await["type"], "subscribe");

    server.next(stream.id(), json!({"notifications": 1}));
    let item = assert_ok!(next_event(&mut stream).await.unwrap());
    assert_eq!(item, json!({"notifications": 1}));
}

#[tokio::test]
async fn test_unrecognized_frames_are_skipped() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let mut stream = client.subscribe(&notifications()).await.unwrap();
    let id = server.next_message().await["id"].as_str().unwrap().to_string();

    server.send(json!({"type": "ka"}));
    server.send(json!({"payload": {"data": {"notifications": 0}}}));
    server.next(&id, json!({"notifications": 1}));

    let item = assert_ok!(next_event(&mut stream).await.unwrap());
    assert_eq!(item, json!({"notifications": 1}));
    assert!(client.is_streaming_connected().await);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_malformed_next_payload_keeps_stream_open() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let mut stream = client.subscribe(&notifications()).await.unwrap();
    let id = server.next_message().await["id"].as_str().unwrap().to_string();

    server.send(json!({"type": "next", "id": id, "payload": 42}));
    server.next(&id, json!({"notifications": 1}));

    let err = assert_err!(next_event(&mut stream).await.unwrap());
    assert_eq!(err.kind(), ErrorKind::Protocol);
    let item = assert_ok!(next_event(&mut stream).await.unwrap());
    assert_eq!(item, json!({"notifications": 1}));
}

#[tokio::test]
async fn test_subscribe_after_close_dials_again() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);

    let first = client.subscribe(&notifications()).await.unwrap();
    server.next_message().await;
    client.close().await;
    drop(first);

    let mut second = client.subscribe(&notifications()).await.unwrap();
    let id = server.next_message().await["id"].as_str().unwrap().to_string();
    assert_eq!(id, second.id());
    assert_eq!(server.connection_count(), 2);
    assert!(client.is_streaming_connected().await);

    server.next(&id, json!({"notifications": 5}));
    let item = assert_ok!(next_event(&mut second).await.unwrap());
    assert_eq!(item, json!({"notifications": 5}));
}

#[tokio::test]
async fn test_concurrent_first_subscribers_share_one_connection() {
    let mut server = MockSocketServer::start().await;
    let client = client_for(&server);
    let op = notifications();

    let (first, second) = tokio::join!(client.subscribe(&op), client.subscribe(&op));
    let (first, second) = (first.unwrap(), second.unwrap());

    server.next_message().await;
    server.next_message().await;
    assert_ne!(first.id(), second.id());
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_keep_alive_sends_pings() {
    let mut server = MockSocketServer::start().await;
    let client = ClientBuilder::new()
        .http_url("http://127.0.0.1:1")
        .ws_url(server.url.clone())
        .keep_alive(Duration::from_millis(100))
        .build()
        .unwrap();

    let _stream = client.subscribe(&notifications()).await.unwrap();
    assert_eq!(server.next_message().await["type"], "subscribe");
    assert_eq!(server.next_message().await, json!({"type": "ping"}));
}

#[tokio::test]
async fn test_missing_ack_is_timeout() {
    let server = MockSocketServer::start_without_ack().await;
    let client = ClientBuilder::new()
        .http_url("http://127.0.0.1:1")
        .ws_url(server.url.clone())
        .ack_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = client.subscribe(&notifications()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_unreachable_socket_is_network_error() {
    let client = ClientBuilder::new()
        .http_url("http://127.0.0.1:1")
        .ws_url("ws://127.0.0.1:1/ws")
        .build()
        .unwrap();

    let mut stream = client.dispatch(notifications()).await.into_stream().unwrap();
    let err = assert_err!(next_event(&mut stream).await.unwrap());
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(next_event(&mut stream).await.is_none());
}

#[tokio::test]
async fn test_queries_are_not_streamed() {
    let server = MockSocketServer::start().await;
    let client = client_for(&server);

    let err = client
        .subscribe(&Operation::new("query { value }").unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedOperation);
    assert_eq!(server.connection_count(), 0);
}
