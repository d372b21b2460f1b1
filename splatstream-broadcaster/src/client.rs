use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Result of offering a frame to one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the writer task
    Sent,
    /// Subscriber already has this sequence or a newer one
    UpToDate,
    /// Queue full, frame skipped for this subscriber
    Busy,
    /// Writer task is gone
    Closed,
}

/// A connected broadcast subscriber
///
/// Holds only the sending half of the subscriber's bounded queue; the socket
/// itself is owned by the connection task spawned in [`spawn_connection`].
pub struct Subscriber {
    id: u64,
    peer: SocketAddr,
    tx: mpsc::Sender<Message>,
    last_seq: u64,
    stalled: u32,
}

impl Subscriber {
    pub fn new(id: u64, peer: SocketAddr, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            peer,
            tx,
            last_seq: 0,
            stalled: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence number of the last frame queued for this subscriber
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Consecutive ticks on which the queue was full
    pub fn stalled(&self) -> u32 {
        self.stalled
    }

    /// Queue a frame without waiting
    pub fn offer(&mut self, seq: u64, message: &Message) -> Delivery {
        if seq <= self.last_seq {
            return Delivery::UpToDate;
        }

        match self.tx.try_send(message.clone()) {
            Ok(()) => {
                self.last_seq = seq;
                self.stalled = 0;
                Delivery::Sent
            }
            Err(TrySendError::Full(_)) => {
                self.stalled += 1;
                Delivery::Busy
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Thread-safe subscriber list
pub struct SubscriberRegistry {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a subscriber
    pub async fn add(&self, subscriber: Subscriber) {
        let mut subscribers = self.subscribers.lock().await;
        tracing::info!(
            "Subscriber {} ({}) registered. Total subscribers: {}",
            subscriber.id,
            subscriber.peer,
            subscribers.len() + 1
        );
        subscribers.push(subscriber);
    }

    /// Offer a frame to every subscriber, removing closed ones
    ///
    /// A subscriber whose queue stayed full for more than `max_stalled`
    /// consecutive ticks is dropped as well; dropping its sender ends its
    /// writer task.
    pub async fn broadcast(&self, seq: u64, message: &Message, max_stalled: u32) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let mut dead_indices = Vec::new();
        let mut sent = 0;

        for (idx, subscriber) in subscribers.iter_mut().enumerate() {
            match subscriber.offer(seq, message) {
                Delivery::Sent => sent += 1,
                Delivery::UpToDate => {}
                Delivery::Busy => {
                    tracing::debug!(
                        "Subscriber {} busy, skipping frame {}",
                        subscriber.id,
                        seq
                    );
                    if subscriber.stalled > max_stalled {
                        tracing::warn!(
                            "Subscriber {} stalled for {} ticks, dropping",
                            subscriber.id,
                            subscriber.stalled
                        );
                        dead_indices.push(idx);
                    }
                }
                Delivery::Closed => dead_indices.push(idx),
            }
        }

        // Remove dead subscribers in reverse order
        for idx in dead_indices.iter().rev() {
            let removed = subscribers.remove(*idx);
            tracing::info!(
                "Removed subscriber {} ({}). Remaining: {}",
                removed.id,
                removed.peer,
                subscribers.len()
            );
        }

        sent
    }

    /// Current subscriber count
    pub async fn count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Drop every subscriber, closing their writer tasks
    pub async fn clear(&self) {
        self.subscribers.lock().await.clear();
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one subscriber socket until either side closes
///
/// The writer half drains `rx`; the reader half only watches for a close
/// frame or a transport error. Whichever finishes first ends the connection.
pub fn spawn_connection(
    id: u64,
    ws: WebSocketStream<TcpStream>,
    mut rx: mpsc::Receiver<Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (mut sink, mut stream) = ws.split();

        let writer = async {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::debug!("Subscriber {} write failed: {}", id, e);
                    break;
                }
            }
            let _ = sink.close().await;
        };

        let reader = async {
            while let Some(incoming) = stream.next().await {
                match incoming {
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("Subscriber {} read failed: {}", id, e);
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = writer => {}
            _ = reader => {}
        }

        tracing::info!("Subscriber {} disconnected", id);
    })
}
