//! Single-viewer primary channel session
//!
//! ```text
//! Empty ──accept──> Connected ──view ok──> Active ──send ok──> Active ...
//!   ^                   │                    │
//!   └───────────── any IO / parse failure ───┘
//! ```
//!
//! The listener is non-blocking so an absent viewer costs one failed `accept`
//! per frame. Once a viewer is attached its socket is blocking with read/write
//! timeouts, which bounds how long a silent or stalled viewer can hold the
//! render loop. A second viewer waits in the listener backlog until the
//! current one goes away.

use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result, SessionError};
use crate::protocol::{
    parse_view_request, read_message, write_message, ViewRequest, DEFAULT_MAX_MESSAGE_BYTES,
    DEFAULT_MAX_PIXELS,
};

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Read/write timeout on an attached viewer socket (`None` = block forever)
    pub io_timeout: Option<Duration>,

    /// Largest view request accepted
    pub max_message_bytes: usize,

    /// Largest viewport (width * height) a viewer may request
    pub max_pixels: u64,

    /// Greeting sent to every newly accepted viewer
    pub handshake: ViewRequest,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            io_timeout: Some(Duration::from_secs(5)),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_pixels: DEFAULT_MAX_PIXELS,
            handshake: ViewRequest::default(),
        }
    }
}

/// Result of asking the viewer for the next view
#[derive(Debug)]
pub enum ViewOutcome {
    /// Nobody is connected
    NoViewer,

    /// Viewer connected but asked for a zero-sized viewport
    Inactive,

    /// Viewer wants a frame for this view
    Active(ViewRequest),

    /// The exchange failed and the connection has been dropped
    Failed(SessionError),
}

/// Owns the listener and at most one viewer connection
pub struct Session {
    listener: TcpListener,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    last_error: Option<String>,
    config: SessionConfig,
}

impl Session {
    /// Bind the primary listener (fatal on failure)
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug, config: SessionConfig) -> Result<Self> {
        let listener = TcpListener::bind(&addr).map_err(|source| GatewayError::Bind {
            addr: format!("{:?}", addr),
            source,
        })?;
        Self::from_listener(listener, config)
    }

    /// Wrap an already-bound listener
    pub fn from_listener(listener: TcpListener, config: SessionConfig) -> Result<Self> {
        listener.set_nonblocking(true)?;
        info!("Primary channel listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            stream: None,
            peer: None,
            last_error: None,
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Description of the failure that last emptied the session
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Accept one pending viewer if none is attached; never waits
    ///
    /// Returns whether a viewer is attached after the call.
    pub fn accept_if_absent(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }

        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
            Err(e) => {
                warn!("Failed to accept viewer: {}", e);
                return false;
            }
        };

        info!("Viewer connected from {}", peer);

        if let Err(e) = self.attach(stream, peer) {
            self.fail(&e);
            return false;
        }

        true
    }

    fn attach(&mut self, mut stream: TcpStream, peer: SocketAddr) -> std::result::Result<(), SessionError> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.config.io_timeout)?;
        stream.set_write_timeout(self.config.io_timeout)?;

        let greeting = serde_json::to_vec(&self.config.handshake)?;
        write_message(&mut stream, &greeting)?;
        stream.flush()?;
        debug!("Sent {} byte handshake to {}", greeting.len(), peer);

        self.stream = Some(stream);
        self.peer = Some(peer);
        self.last_error = None;
        Ok(())
    }

    /// Read and parse the viewer's next view request
    pub fn request_view(&mut self) -> ViewOutcome {
        let limit = self.config.max_message_bytes;
        let max_pixels = self.config.max_pixels;
        let Some(stream) = self.stream.as_mut() else {
            return ViewOutcome::NoViewer;
        };

        let parsed = read_message(stream, limit).and_then(|payload| parse_view_request(&payload, max_pixels));

        match parsed {
            Ok(Some(view)) => {
                debug!("View request {}x{}", view.width, view.height);
                ViewOutcome::Active(view)
            }
            Ok(None) => ViewOutcome::Inactive,
            Err(e) => {
                self.fail(&e);
                ViewOutcome::Failed(e)
            }
        }
    }

    /// Send `len + frame` (skipped when `frame` is empty) then `len + trailer`
    pub fn send_frame(&mut self, frame: &[u8], trailer: &str) -> std::result::Result<(), SessionError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        let sent = Self::write_frame(stream, frame, trailer);
        if let Err(e) = &sent {
            self.fail(e);
        }
        sent
    }

    fn write_frame(stream: &mut TcpStream, frame: &[u8], trailer: &str) -> std::result::Result<(), SessionError> {
        if !frame.is_empty() {
            write_message(stream, frame)?;
        }
        write_message(stream, trailer.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    /// Drop the current viewer, if any
    pub fn disconnect(&mut self) {
        if let Some(peer) = self.peer.take() {
            info!("Viewer {} disconnected", peer);
        }
        self.stream = None;
    }

    fn fail(&mut self, error: &SessionError) {
        match self.peer {
            Some(peer) => warn!("Dropping viewer {}: {}", peer, error),
            None => warn!("Dropping viewer: {}", error),
        }
        self.last_error = Some(error.to_string());
        self.stream = None;
        self.peer = None;
    }
}
