//! Latest-frame slot shared between the gateway and the broadcaster
//!
//! One writer stores each newly encoded broadcast frame under the next
//! sequence number; any number of readers take a cheap `Arc` snapshot of
//! whatever is current. Writers swap an immutable handle, so a reader can never
//! observe a partially written frame, and a reader only holds the lock for the
//! duration of an `Arc` clone.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::codec::EncodedFrame;

/// An encoded frame tagged with its publish sequence number (first frame = 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedFrame {
    pub seq: u64,
    pub frame: EncodedFrame,
}

/// Read side of the frame slot
pub trait FrameSource: Send + Sync {
    /// Latest stored frame, `None` until the first store
    fn latest(&self) -> Option<Arc<SequencedFrame>>;
}

type Slot = RwLock<Option<Arc<SequencedFrame>>>;

/// Create a connected writer/reader pair
pub fn frame_buffer() -> (FrameWriter, FrameReader) {
    let slot = Arc::new(RwLock::new(None));
    (
        FrameWriter {
            slot: Arc::clone(&slot),
            seq: 0,
        },
        FrameReader { slot },
    )
}

/// Exclusive write side of the frame slot (not `Clone`)
pub struct FrameWriter {
    slot: Arc<Slot>,
    seq: u64,
}

impl FrameWriter {
    /// Store a frame, returning its sequence number
    pub fn store(&mut self, frame: EncodedFrame) -> u64 {
        self.seq += 1;
        let entry = Arc::new(SequencedFrame {
            seq: self.seq,
            frame,
        });
        *self.slot.write() = Some(entry);
        self.seq
    }

    /// Sequence number of the last stored frame (0 = none yet)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Another reader on the same slot
    pub fn reader(&self) -> FrameReader {
        FrameReader {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Shared read side of the frame slot
#[derive(Clone)]
pub struct FrameReader {
    slot: Arc<Slot>,
}

impl FrameSource for FrameReader {
    fn latest(&self) -> Option<Arc<SequencedFrame>> {
        self.slot.read().clone()
    }
}
