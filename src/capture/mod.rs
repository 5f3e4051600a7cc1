//! Segmented audio capture pipeline.
//!
//! Audio flows from the input device callback into the capture loop, which
//! assembles exactly one segment's worth of samples at a time and pushes the
//! finished [`crate::segment::AudioSegment`] into a bounded, seconds-sized
//! [`SegmentQueue`]. A watcher thread evaluates the configured
//! [`StopCondition`] concurrently; when it fires, the loop drains out and the
//! coordinator returns to idle. An external drain loop polls
//! [`AudioReceiver::buffer_has_samples`] and persists segments one at a time.

mod dispatch;
mod queue;
mod receiver;
mod stop;
#[cfg(test)]
mod tests;

pub(crate) use dispatch::downmix_into;
pub use queue::{QueueError, SegmentQueue};
pub use receiver::{AudioReceiver, CaptureError, CaptureOptions, CaptureStats};
pub use stop::{StopCondition, StopConditionKind, StopConfigError, DEFAULT_TIMEOUT};
