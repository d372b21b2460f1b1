use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;

use splatstream_frame::FrameSource;

use crate::client::{spawn_connection, Subscriber, SubscriberRegistry};
use crate::error::{BroadcasterError, Result};
use crate::events::BroadcastEvent;

/// Default WebSocket listen address
pub const DEFAULT_BROADCAST_ADDR: &str = "0.0.0.0:8765";

/// Default push cadence
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(30);

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Address the WebSocket listener binds to
    pub addr: String,
    /// Tick period of the push loop
    pub frame_interval: Duration,
    /// Frames a subscriber may have in flight before it counts as busy
    pub queue_capacity: usize,
    /// Consecutive busy ticks tolerated before a subscriber is dropped
    pub max_stalled_ticks: u32,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_BROADCAST_ADDR.to_string(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            queue_capacity: 4,
            max_stalled_ticks: 300,
        }
    }
}

/// State shared by the tick task and the public API
struct Publisher {
    source: Arc<dyn FrameSource>,
    registry: SubscriberRegistry,
    /// Serialized `new_frame` message for the most recent sequence
    cache: Mutex<Option<(u64, Message)>>,
    max_stalled_ticks: u32,
}

impl Publisher {
    async fn tick(&self) -> Result<usize> {
        let Some(entry) = self.source.latest() else {
            return Ok(0);
        };

        if self.registry.count().await == 0 {
            return Ok(0);
        }

        let message = {
            let mut cache = self.cache.lock().await;
            match cache.as_ref() {
                Some((seq, message)) if *seq == entry.seq => message.clone(),
                _ => {
                    let message = BroadcastEvent::new_frame(&entry).to_message()?;
                    *cache = Some((entry.seq, message.clone()));
                    message
                }
            }
        };

        let sent = self
            .registry
            .broadcast(entry.seq, &message, self.max_stalled_ticks)
            .await;
        if sent > 0 {
            tracing::debug!("Pushed frame {} to {} subscribers", entry.seq, sent);
        }
        Ok(sent)
    }
}

/// Pushes the latest rendered frame to WebSocket subscribers on a fixed cadence
pub struct FrameBroadcaster {
    config: BroadcasterConfig,
    publisher: Arc<Publisher>,
    next_id: Arc<AtomicU64>,
    local_addr: Arc<RwLock<Option<SocketAddr>>>,
    accept_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    running: Arc<RwLock<bool>>,
}

impl FrameBroadcaster {
    /// Create new broadcaster reading frames from `source`
    pub fn new(config: BroadcasterConfig, source: Arc<dyn FrameSource>) -> Self {
        let publisher = Publisher {
            source,
            registry: SubscriberRegistry::new(),
            cache: Mutex::new(None),
            max_stalled_ticks: config.max_stalled_ticks,
        };

        Self {
            config,
            publisher: Arc::new(publisher),
            next_id: Arc::new(AtomicU64::new(1)),
            local_addr: Arc::new(RwLock::new(None)),
            accept_task: Arc::new(Mutex::new(None)),
            tick_task: Arc::new(Mutex::new(None)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the broadcaster (listen for subscribers and begin ticking)
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the configured port is 0.
    pub async fn start(&self) -> Result<SocketAddr> {
        let is_running = *self.running.read().await;
        if is_running {
            return Err(BroadcasterError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.addr)
            .await
            .map_err(|source| BroadcasterError::Bind {
                addr: self.config.addr.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;
        *self.local_addr.write().await = Some(addr);

        tracing::info!("📡 Frame broadcaster listening on ws://{}", addr);

        // Mark as running
        *self.running.write().await = true;

        let interval = self.config.frame_interval.max(Duration::from_millis(1));

        // Spawn subscriber acceptance task
        let publisher = Arc::clone(&self.publisher);
        let next_id = Arc::clone(&self.next_id);
        let running = Arc::clone(&self.running);
        let queue_capacity = self.config.queue_capacity.max(1);
        let interval_ms = interval.as_millis() as u64;

        let accept = tokio::spawn(async move {
            loop {
                if !*running.read().await {
                    break;
                }

                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        let publisher = Arc::clone(&publisher);
                        let running = Arc::clone(&running);

                        // Handshake off the accept loop so a slow client cannot hold it up
                        tokio::spawn(async move {
                            let ws = match tokio_tungstenite::accept_async(stream).await {
                                Ok(ws) => ws,
                                Err(e) => {
                                    tracing::warn!("WebSocket handshake with {} failed: {}", peer, e);
                                    return;
                                }
                            };

                            let (tx, rx) = mpsc::channel(queue_capacity + 1);
                            let latest_seq = publisher.source.latest().map(|f| f.seq).unwrap_or(0);
                            match BroadcastEvent::hello(interval_ms, latest_seq).to_message() {
                                Ok(hello) => {
                                    // Fresh queue with spare capacity
                                    let _ = tx.try_send(hello);
                                }
                                Err(e) => {
                                    tracing::warn!("Failed to serialize hello: {}", e);
                                }
                            }

                            // Held across add so stop() cannot clear the registry in between
                            let running = running.read().await;
                            if !*running {
                                tracing::debug!("Broadcaster stopped during handshake with {}", peer);
                                return;
                            }

                            spawn_connection(id, ws, rx);
                            publisher.registry.add(Subscriber::new(id, peer, tx)).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept subscriber: {}", e);
                    }
                }
            }
            tracing::info!("Subscriber acceptance task stopped");
        });

        // Spawn push task
        let publisher = Arc::clone(&self.publisher);
        let running = Arc::clone(&self.running);

        let ticker = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticks.tick().await;
                if !*running.read().await {
                    break;
                }
                if let Err(e) = publisher.tick().await {
                    tracing::error!("Failed to push frame: {}", e);
                }
            }
            tracing::info!("Frame push task stopped");
        });

        *self.accept_task.lock().await = Some(accept);
        *self.tick_task.lock().await = Some(ticker);

        Ok(addr)
    }

    /// Stop the broadcaster and disconnect every subscriber
    pub async fn stop(&self) -> Result<()> {
        let is_running = *self.running.read().await;
        if !is_running {
            return Err(BroadcasterError::NotStarted);
        }

        // Mark as not running
        *self.running.write().await = false;

        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.tick_task.lock().await.take() {
            task.abort();
        }

        // Dropping the senders ends each writer task, which closes its socket
        self.publisher.registry.clear().await;
        *self.publisher.cache.lock().await = None;
        *self.local_addr.write().await = None;

        tracing::info!("Frame broadcaster stopped");
        Ok(())
    }

    /// Run one push cycle immediately, returning how many subscribers got a frame
    pub async fn tick(&self) -> Result<usize> {
        self.publisher.tick().await
    }

    /// Get current subscriber count
    pub async fn subscriber_count(&self) -> usize {
        self.publisher.registry.count().await
    }

    /// Bound listen address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
