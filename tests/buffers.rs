//! Shared-memory lifetimes of engine-produced buffers.
//!
//! Kept to a single test: it observes the process-wide buffer manager,
//! which parallel tests in the same binary would disturb.

mod common;

use std::sync::{mpsc, Arc};
use std::time::Duration;

use bytes::Bytes;
use common::{wait_until, TestServer};
use parking_lot::Mutex;
use playerwire::buffer::BufferManager;
use playerwire::client::DecodedFrame;
use playerwire::codec::media::{PlaneInfo, VideoFrameInfo};
use playerwire::protocol::EventType;
use playerwire::server::EngineMessage;

fn video_frame() -> EngineMessage {
    let plane = |stride| PlaneInfo {
        stride,
        ..Default::default()
    };
    EngineMessage::VideoFrame {
        info: VideoFrameInfo {
            width: 4,
            height: 2,
            mimetype: 0,
            planes: vec![plane(4), plane(4)],
        },
        planes: vec![
            Bytes::from_static(b"YYYYYYYY"),
            Bytes::from_static(b"UVUV"),
        ],
    }
}

async fn recv<T: Send + 'static>(rx: mpsc::Receiver<T>) -> T {
    tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(2)))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_buffers_are_always_returned() {
    let server = TestServer::start().await;
    let client = server.connect().await;
    client.create().await.unwrap();
    client.prepare().await.unwrap();
    let manager = BufferManager::acquire();

    // Video frame: planes stay exported until the frame is dropped.
    let (tx, rx) = mpsc::channel();
    client
        .set_callback(EventType::MediaPacketVideoFrame, move |event| {
            let frame = event.frame().unwrap();
            let planes: Vec<Vec<u8>> = (0..frame.planes().len())
                .map(|i| frame.plane(i).unwrap().to_vec())
                .collect();
            let _ = tx.send((frame.width(), frame.height(), planes));
        })
        .await
        .unwrap();
    client.get_state().await.unwrap();

    server.probe.emit(video_frame());
    let (width, height, planes) = recv(rx).await;
    assert_eq!((width, height), (4, 2));
    assert_eq!(planes, vec![b"YYYYYYYY".to_vec(), b"UVUV".to_vec()]);
    assert!(wait_until(|| manager.is_empty()).await);

    // Audio: copied out and handed back immediately.
    let (tx, rx) = mpsc::channel();
    client
        .set_callback(EventType::AudioFrame, move |event| {
            let _ = tx.send(event.data().cloned());
        })
        .await
        .unwrap();
    client.get_state().await.unwrap();

    server
        .probe
        .emit(EngineMessage::AudioFrame(Bytes::from_static(b"pcm-samples")));
    assert_eq!(recv(rx).await, Some(Bytes::from_static(b"pcm-samples")));
    assert!(wait_until(|| manager.is_empty()).await);

    // Capture: one-shot, returned the same way.
    let (tx, rx) = mpsc::channel();
    client
        .capture_video(move |event| {
            let _ = tx.send(event.data().map(|d| d.len()));
        })
        .await
        .unwrap();
    assert_eq!(recv(rx).await, Some(32));
    assert!(wait_until(|| manager.is_empty()).await);

    // A frame the application holds on to is freed when the connection goes.
    let held: Arc<Mutex<Option<DecodedFrame>>> = Arc::default();
    let slot = Arc::clone(&held);
    let (tx, rx) = mpsc::channel();
    client
        .set_callback(EventType::MediaPacketVideoFrame, move |mut event| {
            *slot.lock() = event.take_frame();
            let _ = tx.send(());
        })
        .await
        .unwrap();
    client.get_state().await.unwrap();

    server.probe.emit(video_frame());
    recv(rx).await;
    assert_eq!(manager.len(), 2);

    client.close();
    assert!(wait_until(|| manager.is_empty()).await);
    drop(held.lock().take());
}
