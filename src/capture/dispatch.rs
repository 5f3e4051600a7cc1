//! Device-callback plumbing.
//!
//! The cpal callback runs on an audio thread and must never block, so it
//! downmixes each buffer to mono f32 and ships it to the capture loop over a
//! bounded channel. When the loop stalls, the chunk is discarded and counted
//! instead of stalling the callback.

use crossbeam_channel::{Sender, TrySendError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Average interleaved frames down to one channel, converting each raw
/// sample to f32 on the way. A trailing partial frame is averaged over the
/// samples it actually has.
pub(crate) fn downmix_into<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }
    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().copied().map(&mut convert).sum();
        buf.push(sum / frame.len() as f32);
    }
}

/// Forwards downmixed chunks from the audio callback to the capture loop.
pub(crate) struct ChunkForwarder {
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl ChunkForwarder {
    pub(crate) fn new(sender: Sender<Vec<f32>>, dropped: Arc<AtomicUsize>) -> Self {
        Self { sender, dropped }
    }

    /// Downmix one callback buffer and ship it without blocking.
    pub(crate) fn forward<T, F>(&self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        let channels = channels.max(1);
        let mut chunk = Vec::with_capacity(data.len() / channels + 1);
        downmix_into(&mut chunk, data, channels, convert);
        if chunk.is_empty() {
            return;
        }
        match self.sender.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Loop already exited; nothing left to deliver to.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
