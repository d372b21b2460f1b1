use serde::{Deserialize, Serialize};
use splatstream_frame::SequencedFrame;
use tokio_tungstenite::tungstenite::Message;

/// Event types pushed to browser subscribers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    /// Sent once when a subscriber connects
    #[serde(rename = "hello")]
    Hello {
        interval_ms: u64,
        latest_seq: u64,
        timestamp: f64,
    },

    /// Latest rendered frame, compressed and base64-encoded
    #[serde(rename = "new_frame")]
    NewFrame {
        seq: u64,
        format: String,
        width: u32,
        height: u32,
        image: String,
        timestamp: f64,
    },
}

impl BroadcastEvent {
    /// Build a `new_frame` event from a stored frame
    pub fn new_frame(entry: &SequencedFrame) -> Self {
        let (width, height) = entry.frame.dimensions();
        BroadcastEvent::NewFrame {
            seq: entry.seq,
            format: entry
                .frame
                .format()
                .map(|f| f.as_str())
                .unwrap_or("rgb")
                .to_string(),
            width,
            height,
            image: entry.frame.to_base64(),
            timestamp: current_timestamp(),
        }
    }

    pub fn hello(interval_ms: u64, latest_seq: u64) -> Self {
        BroadcastEvent::Hello {
            interval_ms,
            latest_seq,
            timestamp: current_timestamp(),
        }
    }

    /// Serialize into a WebSocket text message
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Message::text(json))
    }
}

/// Seconds since the Unix epoch
fn current_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
