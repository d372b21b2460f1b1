use anyhow::Result;
use base64::Engine;
use futures::StreamExt;
use serde_json::json;
use splatstream_broadcaster::{BroadcasterConfig, FrameBroadcaster};
use splatstream_daemon::config::{DaemonConfig, PoseMode};
use splatstream_daemon::pose::{HttpPoseSource, PoseParams, PoseSource, StaticPose};
use splatstream_daemon::render_loop::{RenderLoop, StopReason};
use splatstream_frame::{FrameEncoder, FrameSource, ImageFormat};
use splatstream_gateway::{Gateway, Session, SessionConfig, ViewRequest};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TRAILER: &str = "verify";

/// Replays a fixed list of replies, then ends the stream
struct ScriptedPoses {
    replies: VecDeque<Result<PoseParams>>,
}

impl ScriptedPoses {
    fn new(replies: Vec<Result<PoseParams>>) -> Self {
        Self {
            replies: replies.into(),
        }
    }
}

impl PoseSource for ScriptedPoses {
    fn next_pose(&mut self, _frame_idx: u64) -> Result<Option<PoseParams>> {
        match self.replies.pop_front() {
            Some(reply) => reply.map(Some),
            None => Ok(None),
        }
    }
}

fn pose_at(x: f64) -> PoseParams {
    PoseParams {
        transl: vec![x, 0.0, 5.0],
        ..PoseParams::default()
    }
}

fn broadcast_only_loop(poses: Box<dyn PoseSource>) -> RenderLoop {
    let gateway = Gateway::new(None, FrameEncoder::new(ImageFormat::Jpeg));
    let camera = ViewRequest {
        width: 64,
        height: 48,
        ..ViewRequest::default()
    }
    .camera();
    RenderLoop::new(gateway, poses, camera, TRAILER, Duration::ZERO)
}

/// Run a blocking pose source against `base_url` off the async runtime
async fn poll_poses(base_url: String, mode: PoseMode, frames: u64) -> Vec<Option<PoseParams>> {
    tokio::task::spawn_blocking(move || {
        let mut source = HttpPoseSource::new(&base_url, mode, Duration::from_secs(5)).unwrap();
        (0..frames).map(|idx| source.next_pose(idx).unwrap()).collect()
    })
    .await
    .unwrap()
}

fn read_prefixed(stream: &mut TcpStream) -> Vec<u8> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).unwrap();
    let mut body = vec![0u8; u32::from_le_bytes(prefix) as usize];
    stream.read_exact(&mut body).unwrap();
    body
}

fn send_prefixed(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
    stream.write_all(payload).unwrap();
}

#[test]
fn test_render_loop_stops_when_pose_stream_ends() {
    let poses = ScriptedPoses::new(vec![Ok(pose_at(0.0)), Ok(pose_at(0.5)), Ok(pose_at(1.0))]);
    let render_loop = broadcast_only_loop(Box::new(poses));
    let frames = render_loop.frames();

    let summary = render_loop.run(&AtomicBool::new(false));

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.stop_reason, StopReason::PoseStreamEnded);
    assert_eq!(summary.stats.published, 3);
    assert_eq!(summary.stats.frames_sent, 0);

    let latest = frames.latest().unwrap();
    assert_eq!(latest.seq, 3);
    assert_eq!(latest.frame.dimensions(), (64, 48));
    assert_eq!(latest.frame.format(), Some(ImageFormat::Jpeg));
}

#[test]
fn test_render_loop_frame_limit() {
    let render_loop = broadcast_only_loop(Box::new(StaticPose::default())).with_max_frames(5);
    let summary = render_loop.run(&AtomicBool::new(false));

    assert_eq!(summary.frames, 5);
    assert_eq!(summary.stop_reason, StopReason::FrameLimit);
}

#[test]
fn test_render_loop_honours_shutdown_flag() {
    let render_loop = broadcast_only_loop(Box::new(StaticPose::default()));
    let summary = render_loop.run(&AtomicBool::new(true));

    assert_eq!(summary.frames, 0);
    assert_eq!(summary.stop_reason, StopReason::Shutdown);
}

#[test]
fn test_render_loop_survives_pose_errors() {
    let poses = ScriptedPoses::new(vec![
        Ok(pose_at(0.0)),
        Err(anyhow::anyhow!("pose server unreachable")),
        Ok(pose_at(1.0)),
    ]);
    let render_loop = broadcast_only_loop(Box::new(poses));
    let summary = render_loop.run(&AtomicBool::new(false));

    // The failed fetch still renders a frame with the previous pose
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.pose_errors, 1);
    assert_eq!(summary.stats.published, 3);
}

#[tokio::test]
async fn test_http_pose_source_indexed_replay() {
    let server = MockServer::start().await;
    for idx in 0..2 {
        Mock::given(method("GET"))
            .and(path(format!("/pose/{}", idx)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "betas": [[0.1, 0.2]],
                "poses": [vec![0.0; 72]],
                "trans": [[idx as f64, 0.15, 5.0]],
            })))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/pose/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"end": true})))
        .mount(&server)
        .await;

    let poses = poll_poses(server.uri(), PoseMode::Indexed, 3).await;

    let first = poses[0].as_ref().unwrap();
    assert_eq!(first.transl, vec![0.0, 0.15, 5.0]);
    assert_eq!(first.body_pose.len(), 69);
    assert_eq!(poses[1].as_ref().unwrap().transl, vec![1.0, 0.15, 5.0]);
    assert_eq!(poses[2], None);
}

#[tokio::test]
async fn test_http_pose_source_latest_holds_pose_without_person() {
    let server = MockServer::start().await;

    // Equal priority mocks answer in mount order until used up
    let replies = [
        json!({"end": true, "message": "No person detected yet"}),
        json!({"global_orient": [[0.0, 1.0, 0.0]], "body_pose": [[0.0]], "transl": [[0.2, 0.0, 4.0]]}),
    ];
    for reply in replies {
        Mock::given(method("GET"))
            .and(path("/pose/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/pose/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"end": true})))
        .mount(&server)
        .await;

    let poses = poll_poses(server.uri(), PoseMode::Latest, 3).await;

    // Nobody yet: rest pose
    assert_eq!(poses[0], Some(PoseParams::default()));

    let tracked = poses[1].clone().unwrap();
    assert_eq!(tracked.transl, vec![0.2, 0.0, 4.0]);

    // Tracking lost: previous pose is held, the stream never ends
    assert_eq!(poses[2], Some(tracked));
}

#[tokio::test]
async fn test_http_pose_source_server_error_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pose/latest"))
        .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
        .mount(&server)
        .await;

    let base_url = server.uri();
    let result = tokio::task::spawn_blocking(move || {
        let mut source = HttpPoseSource::new(&base_url, PoseMode::Latest, Duration::from_secs(5)).unwrap();
        source.next_pose(0)
    })
    .await
    .unwrap();

    assert!(result.is_err());
}

#[test]
fn test_render_loop_saves_numbered_frames() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("frames");

    let render_loop = broadcast_only_loop(Box::new(StaticPose::default()))
        .with_max_frames(3)
        .with_output_dir(&output);
    let summary = render_loop.run(&AtomicBool::new(false));

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.frames_saved, 3);
    for idx in 0..3 {
        let saved = image::open(output.join(format!("{:04}.jpg", idx))).unwrap();
        assert_eq!((saved.width(), saved.height()), (64, 48));
    }
    assert!(!output.join("0003.jpg").exists());
}

#[test]
fn test_render_loop_keeps_running_when_saving_fails() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the directory should be
    let blocked = dir.path().join("frames");
    std::fs::write(&blocked, b"not a directory").unwrap();

    let render_loop = broadcast_only_loop(Box::new(StaticPose::default()))
        .with_max_frames(2)
        .with_output_dir(&blocked);
    let frames = render_loop.frames();
    let summary = render_loop.run(&AtomicBool::new(false));

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.frames_saved, 0);
    assert_eq!(summary.stop_reason, StopReason::FrameLimit);
    assert_eq!(frames.latest().unwrap().seq, 2);
}

#[test]
fn test_http_pose_source_unreachable_is_error() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let mut source =
        HttpPoseSource::new(&format!("http://{}", addr), PoseMode::Latest, Duration::from_secs(2)).unwrap();

    assert!(source.next_pose(0).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_primary_and_broadcast() {
    let mut config = DaemonConfig::default();
    config.render.width = 32;
    config.render.height = 24;
    config.broadcast.frame_interval_ms = 10;

    // Primary channel and gateway
    let session = Session::bind(
        "127.0.0.1:0",
        SessionConfig {
            io_timeout: Some(Duration::from_secs(5)),
            ..config.session_config()
        },
    )
    .unwrap();
    let primary_addr = session.local_addr().unwrap();
    let gateway = Gateway::new(Some(session), config.encoder());

    // Broadcast channel
    let broadcaster = FrameBroadcaster::new(
        BroadcasterConfig {
            addr: "127.0.0.1:0".to_string(),
            ..config.broadcaster_config()
        },
        Arc::new(gateway.frames()),
    );
    let broadcast_addr = broadcaster.start().await.unwrap();

    // Render loop
    let shutdown = Arc::new(AtomicBool::new(false));
    let render_loop = RenderLoop::new(
        gateway,
        Box::new(StaticPose::default()),
        config.default_view().camera(),
        TRAILER,
        config.frame_interval(),
    );
    let loop_shutdown = Arc::clone(&shutdown);
    let render_thread = thread::spawn(move || render_loop.run(&loop_shutdown));

    // Browser subscriber sees broadcast frames at the default camera size
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", broadcast_addr))
        .await
        .unwrap();
    let frame_event = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(message)) = ws.next().await {
            let event: serde_json::Value = serde_json::from_str(&message.into_text().unwrap()).unwrap();
            if event["type"] == "new_frame" {
                return event;
            }
        }
        panic!("subscriber closed before a frame arrived");
    })
    .await
    .unwrap();
    assert_eq!(frame_event["format"], "jpeg");
    assert_eq!(frame_event["width"], 32);
    let jpeg = base64::engine::general_purpose::STANDARD
        .decode(frame_event["image"].as_str().unwrap())
        .unwrap();
    assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

    // Primary viewer negotiates its own size
    let viewer = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(primary_addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let greeting: serde_json::Value = serde_json::from_slice(&read_prefixed(&mut stream)).unwrap();
        assert_eq!(greeting["resolution_x"], 1080);

        let request = serde_json::to_vec(&ViewRequest {
            width: 16,
            height: 8,
            ..ViewRequest::default()
        })
        .unwrap();
        send_prefixed(&mut stream, &request);

        let frame = read_prefixed(&mut stream);
        let trailer = read_prefixed(&mut stream);
        (frame, trailer)
    });
    let (frame, trailer) = viewer.await.unwrap();
    assert_eq!(frame.len(), 16 * 8 * 3);
    assert_eq!(trailer, TRAILER.as_bytes());

    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    let summary = tokio::task::spawn_blocking(move || render_thread.join().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.stop_reason, StopReason::Shutdown);
    assert!(summary.stats.frames_sent >= 1);

    broadcaster.stop().await.unwrap();
}
