use base64::Engine;
use futures::StreamExt;
use splatstream_broadcaster::{BroadcasterConfig, BroadcasterError, FrameBroadcaster};
use splatstream_frame::{EncodedFrame, FrameSource, ImageFormat, SequencedFrame};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{client_async, connect_async, MaybeTlsStream, WebSocketStream};

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame slot the tests drive by hand
#[derive(Default)]
struct FakeSource {
    slot: Mutex<Option<Arc<SequencedFrame>>>,
}

impl FakeSource {
    fn set(&self, seq: u64, bytes: &[u8]) {
        let entry = SequencedFrame {
            seq,
            frame: EncodedFrame::Compressed {
                format: ImageFormat::Jpeg,
                width: 2,
                height: 2,
                bytes: bytes.to_vec(),
            },
        };
        *self.slot.lock().unwrap() = Some(Arc::new(entry));
    }
}

impl FrameSource for FakeSource {
    fn latest(&self) -> Option<Arc<SequencedFrame>> {
        self.slot.lock().unwrap().clone()
    }
}

fn test_config() -> BroadcasterConfig {
    BroadcasterConfig {
        addr: "127.0.0.1:0".to_string(),
        frame_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

async fn start(source: Arc<FakeSource>) -> (FrameBroadcaster, SocketAddr) {
    let broadcaster = FrameBroadcaster::new(test_config(), source);
    let addr = broadcaster.start().await.unwrap();
    (broadcaster, addr)
}

async fn connect(addr: SocketAddr) -> Viewer {
    let (ws, _response) = connect_async(format!("ws://{}", addr)).await.unwrap();
    ws
}

/// Subscriber on a plain TCP stream the test can tear down itself
async fn connect_raw(addr: SocketAddr) -> WebSocketStream<TcpStream> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (ws, _response) = client_async(format!("ws://{}", addr), stream).await.unwrap();
    ws
}

/// Next JSON event, or `None` if nothing arrives within `wait`
async fn next_event(ws: &mut Viewer, wait: Duration) -> Option<serde_json::Value> {
    match tokio::time::timeout(wait, ws.next()).await {
        Ok(Some(Ok(message))) => {
            let text = message.into_text().unwrap();
            Some(serde_json::from_str(&text).unwrap())
        }
        _ => None,
    }
}

/// Skip the hello event and any frames older than `seq`
async fn wait_for_frame(ws: &mut Viewer, seq: u64) -> serde_json::Value {
    frame_within(ws, seq, Duration::from_secs(2))
        .await
        .unwrap_or_else(|| panic!("frame {} never arrived", seq))
}

/// Frame `seq` (or newer), or `None` if it takes longer than `wait` in total
async fn frame_within(ws: &mut Viewer, seq: u64, wait: Duration) -> Option<serde_json::Value> {
    tokio::time::timeout(wait, async {
        while let Some(Ok(message)) = ws.next().await {
            let event: serde_json::Value = serde_json::from_str(&message.into_text().unwrap()).unwrap();
            if event["type"] == "new_frame" && event["seq"].as_u64().unwrap() >= seq {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

async fn wait_for_subscribers(broadcaster: &FrameBroadcaster, count: usize) {
    for _ in 0..200 {
        if broadcaster.subscriber_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} subscribers, have {}",
        count,
        broadcaster.subscriber_count().await
    );
}

#[tokio::test]
async fn test_broadcaster_lifecycle() {
    let broadcaster = FrameBroadcaster::new(test_config(), Arc::new(FakeSource::default()));

    assert!(matches!(
        broadcaster.stop().await,
        Err(BroadcasterError::NotStarted)
    ));

    broadcaster.start().await.unwrap();
    assert!(matches!(
        broadcaster.start().await,
        Err(BroadcasterError::AlreadyRunning)
    ));

    broadcaster.stop().await.unwrap();
    assert!(matches!(
        broadcaster.stop().await,
        Err(BroadcasterError::NotStarted)
    ));
}

#[tokio::test]
async fn test_hello_on_connect() {
    let source = Arc::new(FakeSource::default());
    source.set(5, b"frame");
    let (broadcaster, addr) = start(source).await;

    let mut ws = connect(addr).await;
    let hello = next_event(&mut ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["interval_ms"], 10);
    assert_eq!(hello["latest_seq"], 5);

    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn test_frame_delivered_as_base64() {
    let source = Arc::new(FakeSource::default());
    let (broadcaster, addr) = start(Arc::clone(&source)).await;

    let mut ws = connect(addr).await;
    wait_for_subscribers(&broadcaster, 1).await;
    source.set(1, b"\xff\xd8jpeg-bytes");

    let event = wait_for_frame(&mut ws, 1).await;
    assert_eq!(event["seq"], 1);
    assert_eq!(event["format"], "jpeg");
    assert_eq!(event["width"], 2);
    let image = base64::engine::general_purpose::STANDARD
        .decode(event["image"].as_str().unwrap())
        .unwrap();
    assert_eq!(image, b"\xff\xd8jpeg-bytes");

    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn test_frame_not_pushed_twice() {
    let source = Arc::new(FakeSource::default());
    source.set(1, b"first");
    let (broadcaster, addr) = start(Arc::clone(&source)).await;

    let mut ws = connect(addr).await;
    wait_for_frame(&mut ws, 1).await;

    // Several ticks pass with no new frame
    assert!(next_event(&mut ws, Duration::from_millis(150)).await.is_none());

    source.set(2, b"second");
    let event = wait_for_frame(&mut ws, 2).await;
    assert_eq!(event["seq"], 2);

    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_subscribers_steady_state() {
    let source = Arc::new(FakeSource::default());
    source.set(1, b"frame");
    let (broadcaster, _addr) = start(source).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broadcaster.subscriber_count().await, 0);
    assert_eq!(broadcaster.tick().await.unwrap(), 0);

    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn test_fan_out_survives_dead_and_stuck_subscribers() {
    let source = Arc::new(FakeSource::default());
    let (broadcaster, addr) = start(Arc::clone(&source)).await;

    let mut first = connect(addr).await;
    let mut third = connect(addr).await;
    let doomed = connect_raw(addr).await;
    // Never reads a single message
    let _stuck = connect(addr).await;
    wait_for_subscribers(&broadcaster, 4).await;

    source.set(1, b"one");
    for ws in [&mut first, &mut third] {
        assert_eq!(wait_for_frame(ws, 1).await["seq"], 1);
    }

    // Drop the socket under the subscriber without a close frame
    drop(doomed);

    // The survivors keep the frame cadence (10 ms ticks)
    for seq in 2..=4u64 {
        source.set(seq, b"next");
        for ws in [&mut first, &mut third] {
            let event = frame_within(ws, seq, Duration::from_millis(200))
                .await
                .unwrap_or_else(|| panic!("frame {} was held up", seq));
            assert_eq!(event["seq"], seq);
        }
    }

    // The dropped subscriber is gone, the stuck one is only skipped
    wait_for_subscribers(&broadcaster, 3).await;

    broadcaster.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_during_handshake_does_not_register() {
    let source = Arc::new(FakeSource::default());
    let (broadcaster, addr) = start(source).await;

    // Accepted at the TCP level, upgrade not sent yet
    let stream = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    broadcaster.stop().await.unwrap();

    let upgrade = client_async(format!("ws://{}", addr), stream).await;
    if let Ok((mut ws, _)) = upgrade {
        // The server drops the socket instead of serving it
        let ended = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        })
        .await;
        assert!(ended.is_ok());
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broadcaster.subscriber_count().await, 0);
}

#[tokio::test]
async fn test_stop_disconnects_subscribers() {
    let source = Arc::new(FakeSource::default());
    let (broadcaster, addr) = start(source).await;

    let mut ws = connect(addr).await;
    wait_for_subscribers(&broadcaster, 1).await;
    broadcaster.stop().await.unwrap();

    // Drain until the server closes the socket
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
