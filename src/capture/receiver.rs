//! Capture coordinator: owns the input device, the segment queue, and the
//! per-session capture and watcher threads.
//!
//! A session moves `Idle -> Capturing -> Idle`; there is no paused state.
//! The capture loop assembles exactly one segment's worth of samples at a
//! time from the device callback and pushes finished segments into the
//! queue; a full queue drops the newest segment with a warning rather than
//! ever blocking capture.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::dispatch::ChunkForwarder;
use super::queue::{QueueError, SegmentQueue};
use super::stop::{StopCondition, StopConfigError};
use crate::segment::{AudioSegment, SegmentError};

/// Chunks buffered between the device callback and the capture loop. Sized
/// for several seconds of typical callback buffers so a briefly stalled loop
/// loses nothing.
const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// How long the capture loop waits for a chunk before re-checking the stop
/// flag. Keeps shutdown latency well under one segment.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Errors raised by [`AudioReceiver`] configuration and capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("a capture session is already running")]
    AlreadyCapturing,

    #[error("no capture session has been started")]
    NotStarted,

    #[error("segment duration must be positive and finite, got {0} s")]
    InvalidSegmentDuration(f64),

    #[error("no input device available")]
    NoDevice,

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("capture session thread panicked")]
    SessionPanicked,

    #[error(transparent)]
    StopConfig(#[from] StopConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error("failed to query device config: {0}")]
    DeviceConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Everything a session needs, validated before any thread is spawned.
#[derive(Debug)]
pub struct CaptureOptions {
    pub stop_condition: StopCondition,
    pub segment_duration: Duration,
    /// Buffered audio capacity in seconds; `0.0` means unbounded.
    pub buffer_capacity_seconds: f64,
}

/// Counters collected over one capture session, reported by
/// [`AudioReceiver::wait`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStats {
    pub sample_rate: u32,
    /// Segments assembled from device audio, including dropped ones.
    pub segments_captured: usize,
    /// Segments discarded because the queue was full.
    pub segments_dropped: usize,
    /// Callback chunks discarded because the loop fell behind.
    pub callback_chunks_dropped: usize,
    /// Total audio assembled into segments, in seconds.
    pub captured_seconds: f64,
}

/// Coordinates one capture session at a time over the default input device.
pub struct AudioReceiver {
    device: cpal::Device,
    sample_rate: u32,
    capturing: Arc<AtomicBool>,
    queue: Option<Arc<SegmentQueue>>,
    session: Option<thread::JoinHandle<Result<CaptureStats, CaptureError>>>,
}

impl AudioReceiver {
    /// Bind to the default input device at its native sample rate.
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
        let sample_rate = device.default_input_config()?.sample_rate().0;
        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            "input device ready"
        );
        Ok(Self {
            device,
            sample_rate,
            capturing: Arc::new(AtomicBool::new(false)),
            queue: None,
            session: None,
        })
    }

    /// Native sample rate reported by the device.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// True while a session's capture loop is running.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Relaxed)
    }

    /// True iff the session queue currently holds at least one segment.
    pub fn buffer_has_samples(&self) -> bool {
        self.queue.as_ref().is_some_and(|queue| queue.has_items())
    }

    /// Non-blocking take of the oldest buffered segment.
    ///
    /// Callers follow the drain protocol: check [`Self::buffer_has_samples`]
    /// first and pop exactly once per observed `true`. Popping an empty
    /// buffer fails with [`QueueError::Empty`] and affects that call only.
    pub fn get_sample_from_buffer(&self) -> Result<AudioSegment, CaptureError> {
        let queue = self.queue.as_ref().ok_or(CaptureError::NotStarted)?;
        Ok(queue.pop()?)
    }

    /// Start a capture session on a background thread.
    ///
    /// All configuration is validated here, before the device stream is
    /// opened or any thread is spawned; a failure never leaves a
    /// half-initialized session. Starting while a session is active fails
    /// with [`CaptureError::AlreadyCapturing`].
    pub fn start_capture(&mut self, options: CaptureOptions) -> Result<(), CaptureError> {
        if self.is_capturing() {
            return Err(CaptureError::AlreadyCapturing);
        }
        if let Some(finished) = self.session.take() {
            // Previous session ended but was never waited on.
            match finished.join() {
                Ok(Ok(stats)) => debug!(?stats, "discarding unclaimed stats of previous session"),
                Ok(Err(err)) => warn!(%err, "previous capture session had failed"),
                Err(_) => warn!("previous capture session thread panicked"),
            }
        }

        let segment_seconds = options.segment_duration.as_secs_f64();
        if !segment_seconds.is_finite() || segment_seconds <= 0.0 {
            return Err(CaptureError::InvalidSegmentDuration(segment_seconds));
        }
        options.stop_condition.validate(options.segment_duration)?;
        let queue = Arc::new(SegmentQueue::new(
            options.buffer_capacity_seconds,
            segment_seconds,
        )?);
        self.queue = Some(Arc::clone(&queue));

        let device = self.device.clone();
        let capturing = Arc::clone(&self.capturing);
        let CaptureOptions {
            stop_condition,
            segment_duration,
            ..
        } = options;

        // Raised before the thread runs so the drain loop's very first
        // `is_capturing()` poll already sees the session.
        capturing.store(true, Ordering::Relaxed);
        let handle = thread::spawn(move || {
            let result = run_session(&device, segment_duration, stop_condition, &queue);
            capturing.store(false, Ordering::Relaxed);
            if let Err(ref err) = result {
                warn!(%err, "capture session ended with an error");
            }
            result
        });
        self.session = Some(handle);
        Ok(())
    }

    /// Join the session thread and return its stats.
    ///
    /// Blocks until the stop condition has fired and the loop has exited.
    pub fn wait(&mut self) -> Result<CaptureStats, CaptureError> {
        let handle = self.session.take().ok_or(CaptureError::NotStarted)?;
        handle.join().map_err(|_| CaptureError::SessionPanicked)?
    }
}

/// Body of the session thread: open the stream, run the watcher and the
/// capture loop, then tear everything down in order.
fn run_session(
    device: &cpal::Device,
    segment_duration: Duration,
    stop_condition: StopCondition,
    queue: &SegmentQueue,
) -> Result<CaptureStats, CaptureError> {
    let default_config = device.default_input_config()?;
    let format = default_config.sample_format();
    let device_config: StreamConfig = default_config.into();
    let sample_rate = device_config.sample_rate.0;
    let channels = usize::from(device_config.channels.max(1));

    let (chunk_tx, chunk_rx) = bounded::<Vec<f32>>(CHUNK_CHANNEL_CAPACITY);
    let callback_dropped = Arc::new(AtomicUsize::new(0));
    let forwarder = ChunkForwarder::new(chunk_tx, Arc::clone(&callback_dropped));

    // Device-level status flags are recoverable: log and keep capturing.
    let err_fn = |err| warn!(%err, "input stream reported an error");
    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &device_config,
            move |data: &[f32], _| forwarder.forward(data, channels, |sample| sample),
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &device_config,
            move |data: &[i16], _| {
                forwarder.forward(data, channels, |sample| f32::from(sample) / 32_768.0)
            },
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &device_config,
            move |data: &[u16], _| {
                forwarder.forward(data, channels, |sample| {
                    (f32::from(sample) - 32_768.0) / 32_768.0
                })
            },
            err_fn,
            None,
        )?,
        other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
    };
    stream.play()?;
    info!(
        sample_rate,
        channels,
        segment_seconds = segment_duration.as_secs_f64(),
        stop_condition = stop_condition.kind().as_str(),
        "capture session started"
    );

    let stop_flag = Arc::new(AtomicBool::new(false));
    let watcher = stop_condition.spawn_watcher(Arc::clone(&stop_flag));
    let result = run_capture_loop(&chunk_rx, queue, &stop_flag, sample_rate, segment_duration);

    // Unblock the watcher if the loop exited on its own (stream failure).
    stop_flag.store(true, Ordering::Relaxed);
    if let Err(err) = stream.pause() {
        warn!(%err, "failed to pause input stream");
    }
    drop(stream);
    let _ = watcher.join();

    let mut stats = result?;
    stats.callback_chunks_dropped = callback_dropped.load(Ordering::Relaxed);
    info!(
        segments = stats.segments_captured,
        dropped = stats.segments_dropped,
        seconds = stats.captured_seconds,
        "capture session finished"
    );
    Ok(stats)
}

/// Assemble device chunks into fixed-size segments until the stop flag is
/// set or the chunk channel disconnects.
///
/// Partial audio pending when the stop fires is discarded; sessions only
/// ever emit full segments.
pub(super) fn run_capture_loop(
    chunks: &Receiver<Vec<f32>>,
    queue: &SegmentQueue,
    stop_flag: &AtomicBool,
    sample_rate: u32,
    segment_duration: Duration,
) -> Result<CaptureStats, CaptureError> {
    let segment_samples =
        ((segment_duration.as_secs_f64() * f64::from(sample_rate)).round() as usize).max(1);
    let mut pending: Vec<f32> = Vec::with_capacity(segment_samples);
    let mut stats = CaptureStats {
        sample_rate,
        ..CaptureStats::default()
    };

    while !stop_flag.load(Ordering::Relaxed) {
        let chunk = match chunks.recv_timeout(STOP_POLL) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        pending.extend_from_slice(&chunk);

        while pending.len() >= segment_samples {
            let rest = pending.split_off(segment_samples);
            let samples = std::mem::replace(&mut pending, rest);
            let segment = AudioSegment::new(samples, sample_rate)?;
            stats.segments_captured += 1;
            match queue.push(segment) {
                Ok(()) => {}
                Err(QueueError::Full { capacity }) => {
                    stats.segments_dropped += 1;
                    warn!(capacity, "segment buffer full; dropping newest segment");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    stats.captured_seconds = stats.segments_captured as f64 * segment_duration.as_secs_f64();
    Ok(stats)
}
