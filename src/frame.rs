//! Shared frame state.
//!
//! - `Frame`: an encoded JPEG plus arrival metadata.
//! - `LatestFrameStore`: single-slot, overwrite-on-write store. The ingestion
//!   loop is the only writer; every stream client reads an independent snapshot.
//! - `DetectionState`: the last reported presence boolean.
//!
//! Both stores are handed around as `Arc`s by the daemon. Nothing here is a
//! process global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// An encoded JPEG frame. Cloning shares the payload.
#[derive(Clone, Debug)]
pub struct Frame {
    jpeg: Arc<[u8]>,
    /// Arrival order, starting at 1 for the first stored frame.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>, sequence: u64) -> Self {
        Self {
            jpeg: jpeg.into(),
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

/// Most recent frame, shared between one writer and many readers.
///
/// The lock only guards an `Option<Frame>` whose payload is an `Arc`, so a
/// write is a pointer swap and a read is a refcount bump. Readers see either
/// the old frame or the new one, never a mix.
#[derive(Debug, Default)]
pub struct LatestFrameStore {
    slot: RwLock<Option<Frame>>,
}

impl LatestFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame unconditionally.
    pub fn write(&self, frame: Frame) {
        // A poisoned slot still holds a whole frame; keep serving it.
        let mut slot = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(frame);
    }

    /// Current frame, or `None` if nothing has been written yet.
    pub fn read(&self) -> Option<Frame> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Last known "subject present" flag. `false` until the first detection.
#[derive(Debug, Default)]
pub struct DetectionState {
    detected: AtomicBool,
}

impl DetectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }

    /// Record an analysis result. Returns `true` only when the value changed.
    ///
    /// Single writer: the ingestion loop.
    pub fn record(&self, detected: bool) -> bool {
        self.detected.swap(detected, Ordering::SeqCst) != detected
    }
}
