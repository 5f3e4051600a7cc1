//! Immutable mono audio segments.
//!
//! One [`AudioSegment`] holds a fixed-duration slice of captured audio:
//! a single channel of f32 samples plus the sample rate they were captured
//! at. Duration is always derived from those two, never stored.

use thiserror::Error;

/// Errors raised when building or combining segments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("audio segment requires at least one sample")]
    EmptySignal,

    #[error("sample rate must be positive")]
    InvalidSampleRate,

    #[error("sample rate mismatch: {left} Hz vs {right} Hz")]
    SampleRateMismatch { left: u32, right: u32 },
}

/// A single fixed-duration slice of captured mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSegment {
    /// Wrap a mono sample buffer captured at `sample_rate` Hz.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, SegmentError> {
        if samples.is_empty() {
            return Err(SegmentError::EmptySignal);
        }
        if sample_rate == 0 {
            return Err(SegmentError::InvalidSampleRate);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples in the segment. Never zero.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Duration in seconds, derived from sample count and rate.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Produce a new segment holding `self`'s samples followed by `other`'s.
    ///
    /// Both operands are left untouched. Fails when the sample rates differ,
    /// since gluing audio captured at different rates would change its pitch
    /// and timing.
    pub fn concat(&self, other: &AudioSegment) -> Result<AudioSegment, SegmentError> {
        if self.sample_rate != other.sample_rate {
            return Err(SegmentError::SampleRateMismatch {
                left: self.sample_rate,
                right: other.sample_rate,
            });
        }
        let mut samples = Vec::with_capacity(self.samples.len() + other.samples.len());
        samples.extend_from_slice(&self.samples);
        samples.extend_from_slice(&other.samples);
        Ok(AudioSegment {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}
