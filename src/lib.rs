//! Segmented audio capture with a bounded, seconds-sized buffer.
//!
//! The pipeline reads mono audio from the default input device in
//! fixed-duration segments, buffers finished segments in a bounded FIFO, and
//! hands them to an external drain loop that persists each one as a WAV
//! file. A watcher thread evaluates the configured stop condition (wall
//! clock timeout or operator command) concurrently with capture. Batch
//! feature extraction over recorded files lives in [`features`].

pub mod capture;
pub mod features;
pub mod segment;
pub mod wav;

pub use capture::{
    AudioReceiver, CaptureError, CaptureOptions, CaptureStats, SegmentQueue, StopCondition,
    StopConditionKind,
};
pub use segment::{AudioSegment, SegmentError};
