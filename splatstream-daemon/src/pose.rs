//! Body pose input for the render loop
//!
//! Poses come from an HTTP pose server in one of two shapes. Replay servers
//! answer `GET /pose/{idx}` with `betas`, `poses` (72 axis-angle values, the
//! first three being the global orientation) and `trans`. Live trackers answer
//! `GET /pose/latest` with `betas`, `global_orient`, `body_pose` and `transl`.
//! Both wrap values in nested lists; everything is flattened here.

use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;

use crate::config::{PoseConfig, PoseMode};

/// Root translation used when the tracker has none
pub const DEFAULT_TRANSL: [f64; 3] = [0.0, 0.15, 5.0];

/// Axis-angle values belonging to the global orientation
const GLOBAL_ORIENT_LEN: usize = 3;

/// Body model parameters for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct PoseParams {
    pub betas: Vec<f64>,
    pub global_orient: Vec<f64>,
    pub body_pose: Vec<f64>,
    pub transl: Vec<f64>,
}

impl Default for PoseParams {
    /// Rest pose in front of the default camera
    fn default() -> Self {
        Self {
            betas: Vec::new(),
            global_orient: vec![0.0; GLOBAL_ORIENT_LEN],
            body_pose: Vec::new(),
            transl: DEFAULT_TRANSL.to_vec(),
        }
    }
}

/// One pose server response
#[derive(Debug, Clone, PartialEq)]
pub enum PoseReply {
    Pose(PoseParams),
    /// `{"end": true}`
    End,
}

/// Parse a pose server response body
pub fn parse_pose(value: &Value) -> Result<PoseReply> {
    if value.get("end").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(PoseReply::End);
    }

    let object = value
        .as_object()
        .context("pose response is not a JSON object")?;

    let betas = object.get("betas").map(flatten).unwrap_or_default();

    let (global_orient, body_pose) = if let Some(poses) = object.get("poses") {
        let mut thetas = flatten(poses);
        if thetas.len() < GLOBAL_ORIENT_LEN {
            anyhow::bail!("poses has {} values, need at least {}", thetas.len(), GLOBAL_ORIENT_LEN);
        }
        let body = thetas.split_off(GLOBAL_ORIENT_LEN);
        (thetas, body)
    } else {
        let orient = object
            .get("global_orient")
            .map(flatten)
            .context("pose response has neither poses nor global_orient")?;
        let body = object.get("body_pose").map(flatten).unwrap_or_default();
        (orient, body)
    };

    let transl = object
        .get("trans")
        .or_else(|| object.get("transl"))
        .filter(|v| !v.is_null())
        .map(flatten)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TRANSL.to_vec());

    Ok(PoseReply::Pose(PoseParams {
        betas,
        global_orient,
        body_pose,
        transl,
    }))
}

/// Collect every number in a (possibly nested) JSON array, depth first
fn flatten(value: &Value) -> Vec<f64> {
    let mut out = Vec::new();
    collect(value, &mut out);
    out
}

fn collect(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                out.push(f);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, out);
            }
        }
        _ => {}
    }
}

/// Supplies the pose for each rendered frame
pub trait PoseSource: Send {
    /// Pose for frame `frame_idx`; `Ok(None)` ends the stream
    fn next_pose(&mut self, frame_idx: u64) -> Result<Option<PoseParams>>;
}

/// Always the same pose, used when no pose server is configured
#[derive(Debug, Clone, Default)]
pub struct StaticPose {
    pose: PoseParams,
}

impl StaticPose {
    pub fn new(pose: PoseParams) -> Self {
        Self { pose }
    }
}

impl PoseSource for StaticPose {
    fn next_pose(&mut self, _frame_idx: u64) -> Result<Option<PoseParams>> {
        Ok(Some(self.pose.clone()))
    }
}

/// Polls a pose server over HTTP
///
/// Uses the blocking client, so it must live on the render thread rather than
/// inside the async runtime.
pub struct HttpPoseSource {
    client: reqwest::blocking::Client,
    base_url: String,
    mode: PoseMode,
    last: Option<PoseParams>,
}

impl HttpPoseSource {
    pub fn new(base_url: &str, mode: PoseMode, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build pose HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
            last: None,
        })
    }

    pub fn from_config(config: &PoseConfig, base_url: &str) -> Result<Self> {
        Self::new(
            base_url,
            config.pose_mode,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// URL polled for `frame_idx`
    pub fn url(&self, frame_idx: u64) -> String {
        match self.mode {
            PoseMode::Indexed => format!("{}/pose/{}", self.base_url, frame_idx),
            PoseMode::Latest => format!("{}/pose/latest", self.base_url),
        }
    }

    fn fetch(&self, frame_idx: u64) -> Result<PoseReply> {
        let url = self.url(frame_idx);
        let value: Value = self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("GET {} failed", url))?
            .json()
            .with_context(|| format!("GET {} returned invalid JSON", url))?;

        parse_pose(&value)
    }
}

impl PoseSource for HttpPoseSource {
    fn next_pose(&mut self, frame_idx: u64) -> Result<Option<PoseParams>> {
        match (self.fetch(frame_idx)?, self.mode) {
            (PoseReply::Pose(pose), _) => {
                self.last = Some(pose.clone());
                Ok(Some(pose))
            }
            (PoseReply::End, PoseMode::Indexed) => Ok(None),
            // Nobody tracked yet (or lost): hold the previous pose
            (PoseReply::End, PoseMode::Latest) => {
                Ok(Some(self.last.clone().unwrap_or_default()))
            }
        }
    }
}
