//! Bounded FIFO of finished audio segments.
//!
//! Capacity is expressed in *seconds of audio* rather than item count,
//! because the consumer cares about how much audio is buffered, not how many
//! segments. The seconds value is converted to an item capacity exactly once
//! at construction: floored, with a minimum of one segment.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;

use crate::segment::{AudioSegment, SegmentError};

/// Errors raised by [`SegmentQueue`] construction and access.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("segment queue is full ({capacity} segments)")]
    Full { capacity: usize },

    #[error("segment queue is empty")]
    Empty,

    #[error("segment queue is disconnected")]
    Disconnected,

    #[error("buffer capacity {capacity_seconds} s is smaller than the segment duration {segment_seconds} s")]
    CapacityTooSmall {
        capacity_seconds: f64,
        segment_seconds: f64,
    },

    #[error("segment duration must be positive and finite, got {0} s")]
    InvalidSegmentDuration(f64),

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

/// Capacity-limited FIFO buffer between the capture loop and the drain loop.
///
/// Composed over a crossbeam channel so inserts and removals stay atomic with
/// respect to the capacity bound. `push` never blocks the producer: a full
/// queue reports [`QueueError::Full`] and the segment is discarded by the
/// caller (drop-newest policy).
pub struct SegmentQueue {
    tx: Sender<AudioSegment>,
    rx: Receiver<AudioSegment>,
    capacity: Option<usize>,
}

impl SegmentQueue {
    /// Build a queue holding up to `capacity_seconds` of audio split into
    /// segments of `segment_seconds`. A capacity of `0.0` means unbounded.
    pub fn new(capacity_seconds: f64, segment_seconds: f64) -> Result<Self, QueueError> {
        if !segment_seconds.is_finite() || segment_seconds <= 0.0 {
            return Err(QueueError::InvalidSegmentDuration(segment_seconds));
        }
        if capacity_seconds == 0.0 {
            let (tx, rx) = unbounded();
            return Ok(Self {
                tx,
                rx,
                capacity: None,
            });
        }
        if capacity_seconds < segment_seconds {
            return Err(QueueError::CapacityTooSmall {
                capacity_seconds,
                segment_seconds,
            });
        }
        let capacity = ((capacity_seconds / segment_seconds).floor() as usize).max(1);
        let (tx, rx) = bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity: Some(capacity),
        })
    }

    /// Item capacity derived at construction; `None` for an unbounded queue.
    pub fn capacity_in_segments(&self) -> Option<usize> {
        self.capacity
    }

    /// Append a segment to the tail without blocking.
    ///
    /// A full queue consumes and discards the segment, reporting
    /// [`QueueError::Full`] so the caller can emit its warning and move on.
    /// Retrying is a contract violation: by the time the caller could retry,
    /// the live audio the segment displaced is already gone.
    pub fn push(&self, segment: AudioSegment) -> Result<(), QueueError> {
        match self.tx.try_send(segment) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(QueueError::Full {
                capacity: self.capacity.unwrap_or(0),
            }),
            // Both ends live in this struct, so disconnection is unreachable.
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Disconnected),
        }
    }

    /// Take the oldest segment without blocking.
    pub fn pop(&self) -> Result<AudioSegment, QueueError> {
        match self.rx.try_recv() {
            Ok(segment) => Ok(segment),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Err(QueueError::Empty),
        }
    }

    /// True iff at least one segment is queued. Never blocks.
    pub fn has_items(&self) -> bool {
        !self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Diagnostic helper: remove every queued segment in FIFO order and
    /// concatenate them into one segment for playback or inspection.
    ///
    /// Fails with [`QueueError::Empty`] when nothing is queued, and with a
    /// [`SegmentError::SampleRateMismatch`] when the queued segments disagree
    /// on sample rate. Segments are consumed either way: on the mismatch
    /// error the queue has already been emptied.
    pub fn drain_all_concatenated(&self) -> Result<AudioSegment, QueueError> {
        let drained: Vec<AudioSegment> = self.rx.try_iter().collect();
        let mut segments = drained.into_iter();
        let mut joined = segments.next().ok_or(QueueError::Empty)?;
        for segment in segments {
            joined = joined.concat(&segment)?;
        }
        Ok(joined)
    }
}
