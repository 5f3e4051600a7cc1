//! WAV persistence for audio segments, built on `hound`.
//!
//! Segments are written as 32-bit float mono WAV at the segment's own sample
//! rate. Reads accept float and integer PCM at any bit depth and downmix
//! multi-channel files to mono. Only `.wav`-suffixed paths are accepted.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::capture::downmix_into;
use crate::segment::{AudioSegment, SegmentError};

#[derive(Debug, Error)]
pub enum WavError {
    #[error("'{0}' is not a .wav path")]
    UnsupportedExtension(PathBuf),

    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Codec(#[from] hound::Error),

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

fn ensure_wav_extension(path: &Path) -> Result<(), WavError> {
    let is_wav = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    if is_wav {
        Ok(())
    } else {
        Err(WavError::UnsupportedExtension(path.to_path_buf()))
    }
}

/// Persist a segment as `<dir>/<file_name>`, creating `dir` when missing.
pub fn write_segment(
    dir: &Path,
    file_name: &str,
    segment: &AudioSegment,
) -> Result<PathBuf, WavError> {
    let path = dir.join(file_name);
    ensure_wav_extension(&path)?;
    fs::create_dir_all(dir).map_err(|source| WavError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let spec = WavSpec {
        channels: 1,
        sample_rate: segment.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&path, spec)?;
    for &sample in segment.samples() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    debug!(path = %path.display(), samples = segment.len(), "wrote segment");
    Ok(path)
}

/// Reconstruct a segment from a `.wav` file, downmixing to mono if needed.
pub fn read_segment(path: &Path) -> Result<AudioSegment, WavError> {
    ensure_wav_extension(path)?;
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mut samples = Vec::with_capacity(interleaved.len() / channels + 1);
    downmix_into(&mut samples, &interleaved, channels, |sample| sample);
    Ok(AudioSegment::new(samples, spec.sample_rate)?)
}
