//! End-to-end tests: a real server and client talking over a Unix socket.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use common::{wait_until, TestServer, ENGINE_HANDLE};
use playerwire::protocol::{ErrorCode, EventType, PlayerState, Value};
use playerwire::PlayerWireError;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_then_prepare_async_fires_once() {
    let server = TestServer::start().await;
    let client = server.connect().await;

    assert_eq!(client.create().await.unwrap(), ENGINE_HANDLE);
    assert_eq!(client.handle(), Some(ENGINE_HANDLE));

    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let counter = Arc::clone(&fired);
    client
        .prepare_async(move |event| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(event.kind());
        })
        .await
        .unwrap();

    let kind = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kind, EventType::Prepare);
    assert_eq!(client.get_state().await.unwrap(), PlayerState::Ready);

    // The slot was one-shot: a second Prepare from the engine goes nowhere.
    server
        .probe
        .emit(playerwire::server::EngineMessage::notify(EventType::Prepare));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    client.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_state_machine_and_attributes() {
    let server = TestServer::start().await;
    let client = server.connect().await;

    assert_eq!(client.get_state().await.unwrap(), PlayerState::None);
    client.create().await.unwrap();
    assert_eq!(client.get_state().await.unwrap(), PlayerState::Idle);

    match client.start().await {
        Err(PlayerWireError::Remote(code)) => assert_eq!(code, ErrorCode::InvalidState),
        other => panic!("expected InvalidState, got {:?}", other),
    }

    client.prepare().await.unwrap();
    client.start().await.unwrap();
    client.pause().await.unwrap();
    assert_eq!(client.get_state().await.unwrap(), PlayerState::Paused);

    client.set_attribute("volume", 80).await.unwrap();
    assert_eq!(client.get_attribute("volume").await.unwrap(), Value::Int(80));
    assert!(matches!(
        client.get_attribute("brightness").await,
        Err(PlayerWireError::Remote(ErrorCode::InvalidParameter))
    ));

    client.stop().await.unwrap();
    client.unprepare().await.unwrap();
    client.destroy().await.unwrap();
    assert!(!client.is_connected());

    assert_eq!(
        server.probe.log(),
        vec!["create", "prepare", "start", "pause", "stop", "unprepare", "destroy"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_create_hits_resource_limit() {
    let server = TestServer::start_with(|config| config.max_modules(1)).await;
    let first = server.connect().await;
    let second = server.connect().await;

    first.create().await.unwrap();
    assert_eq!(server.stats.active_modules(), 1);

    match second.create().await {
        Err(PlayerWireError::Remote(code)) => assert_eq!(code, ErrorCode::ResourceLimit),
        other => panic!("expected ResourceLimit, got {:?}", other),
    }
    // The rejected connection stays usable.
    assert_eq!(second.get_state().await.unwrap(), PlayerState::None);

    first.destroy().await.unwrap();
    let stats = server.stats.clone();
    assert!(wait_until(|| stats.active_modules() == 0).await);
    assert_eq!(second.create().await.unwrap(), ENGINE_HANDLE);
    second.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_tears_down_playing_engine() {
    let server = TestServer::start().await;
    let client = server.connect().await;

    client.create().await.unwrap();
    client.prepare().await.unwrap();
    client.start().await.unwrap();
    client.close();

    let probe = server.probe.clone();
    assert!(wait_until(|| probe.log().last().map(String::as_str) == Some("destroy")).await);
    assert_eq!(
        server.probe.log(),
        vec!["create", "prepare", "start", "stop", "unprepare", "destroy"]
    );
    let stats = server.stats.clone();
    assert!(wait_until(|| stats.active_modules() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_calls_after_close_fail_fast() {
    let server = TestServer::start().await;
    let client = server.connect().await;
    client.create().await.unwrap();
    client.close();

    assert!(matches!(
        client.get_state().await,
        Err(PlayerWireError::ConnectionLost)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_event_callback_is_ignored_until_set() {
    let server = TestServer::start().await;
    let client = server.connect().await;
    client.create().await.unwrap();

    let (tx, rx) = mpsc::channel();
    // Not forwarded yet: the server drops it.
    server
        .probe
        .emit(playerwire::server::EngineMessage::notify(EventType::Buffering));

    client
        .set_callback(EventType::Buffering, move |event| {
            let _ = tx.send(event.kind());
        })
        .await
        .unwrap();
    // Orders the emit after the server has processed SET_CALLBACK.
    client.get_state().await.unwrap();
    server
        .probe
        .emit(playerwire::server::EngineMessage::notify(EventType::Buffering));

    let got = tokio::task::spawn_blocking(move || {
        let first = rx.recv_timeout(Duration::from_secs(2)).ok();
        let extra = rx.recv_timeout(Duration::from_millis(100)).ok();
        (first, extra)
    })
    .await
    .unwrap();
    assert_eq!(got, (Some(EventType::Buffering), None));

    client.destroy().await.unwrap();
}
