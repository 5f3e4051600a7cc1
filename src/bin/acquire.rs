//! Record audio in fixed-duration segments and persist them to a session
//! directory.
//!
//! Runs the drain protocol against the capture coordinator: while the
//! session is live or segments remain buffered, pop one segment per
//! observed `buffer_has_samples()` and write it as `<n>.wav` with a counter
//! starting at 1. A JSON report summarizing the session is written next to
//! the recordings afterwards.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use segcap::capture::{
    AudioReceiver, CaptureOptions, CaptureStats, StopCondition, StopConditionKind, DEFAULT_TIMEOUT,
};
use segcap::wav;

/// Parent of every session directory.
const ACQUISITION_ROOT: &str = "data.acquisition";

/// How long the drain loop sleeps when the buffer is empty.
const DRAIN_IDLE: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
#[command(about = "Record audio in fixed-duration segments", version)]
struct Args {
    /// Session directory name under data.acquisition/ (a single path segment)
    #[arg(long)]
    dir: String,

    /// Duration of each recorded segment, in seconds
    #[arg(long)]
    time: f64,

    /// Policy deciding when the session ends: 'timeout' or 'by_command'
    #[arg(long = "stop-condition", value_parser = StopConditionKind::from_str)]
    stop_condition: StopConditionKind,

    /// JSON object of stop-condition parameters, e.g. '{"timeout_duration": 15}'
    #[arg(long = "stop-parameters", default_value = "{}")]
    stop_parameters: String,

    /// Buffered audio capacity in seconds (0 = unbounded)
    #[arg(long = "buffer-size", default_value_t = 0)]
    buffer_size: u64,
}

impl Args {
    fn parse_args() -> Result<Self> {
        let args = Self::parse();
        args.validate()?;
        Ok(args)
    }

    fn validate(&self) -> Result<()> {
        if self.dir.is_empty()
            || self.dir == "."
            || self.dir == ".."
            || self.dir.contains(['/', '\\'])
        {
            bail!("--dir must be a single path segment, got '{}'", self.dir);
        }
        if !self.time.is_finite() || self.time <= 0.0 {
            bail!(
                "--time must be a positive number of seconds, got {}",
                self.time
            );
        }
        if Duration::try_from_secs_f64(self.time).is_err() {
            bail!(
                "--time of {} s is too large to represent as a duration",
                self.time
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SessionReport<'a> {
    stop_condition: &'a str,
    segment_duration_seconds: f64,
    buffer_size_seconds: u64,
    segments_persisted: usize,
    #[serde(flatten)]
    stats: &'a CaptureStats,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse_args()?;

    // Everything below is validated before any device is opened.
    let commands = matches!(args.stop_condition, StopConditionKind::ByCommand)
        .then(spawn_stdin_commands);
    let stop_condition =
        build_stop_condition(args.stop_condition, &args.stop_parameters, commands)?;
    let segment_duration = Duration::from_secs_f64(args.time);
    stop_condition
        .validate(segment_duration)
        .context("invalid stop-condition configuration")?;
    let dir = prepare_session_dir(&args.dir)?;

    let mut receiver = AudioReceiver::new().context("failed to open the input device")?;
    receiver.start_capture(CaptureOptions {
        stop_condition,
        segment_duration,
        buffer_capacity_seconds: args.buffer_size as f64,
    })?;

    let persisted = drain_to_dir(&receiver, &dir)?;
    let stats = receiver.wait()?;
    write_report(&dir, &args, &stats, persisted)?;
    info!(
        persisted,
        captured = stats.segments_captured,
        dropped = stats.segments_dropped,
        "session complete"
    );
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Turn the CLI key plus the `--stop-parameters` JSON into a parameterized
/// stop condition. A missing `timeout_duration` falls back to the
/// documented default with a warning; unknown parameters are rejected.
fn build_stop_condition(
    kind: StopConditionKind,
    parameters: &str,
    commands: Option<Receiver<String>>,
) -> Result<StopCondition> {
    let parameters: serde_json::Map<String, Value> =
        serde_json::from_str(parameters).context("--stop-parameters must be a JSON object")?;

    match kind {
        StopConditionKind::Timeout => {
            for key in parameters.keys() {
                if key != "timeout_duration" {
                    bail!("unknown stop parameter '{key}' for the timeout condition");
                }
            }
            let duration = match parameters.get("timeout_duration") {
                Some(value) => {
                    let seconds = value
                        .as_f64()
                        .with_context(|| format!("timeout_duration must be a number, got {value}"))?;
                    if !seconds.is_finite() || seconds <= 0.0 {
                        bail!("timeout_duration must be positive, got {seconds}");
                    }
                    match Duration::try_from_secs_f64(seconds) {
                        Ok(duration) => duration,
                        Err(_) => bail!(
                            "timeout_duration of {seconds} s is too large to represent as a duration"
                        ),
                    }
                }
                None => {
                    warn!(
                        default_seconds = DEFAULT_TIMEOUT.as_secs_f64(),
                        "no timeout_duration given; using the default"
                    );
                    DEFAULT_TIMEOUT
                }
            };
            Ok(StopCondition::Timeout { duration })
        }
        StopConditionKind::ByCommand => {
            if !parameters.is_empty() {
                bail!("the by_command condition takes no stop parameters");
            }
            let commands =
                commands.context("operator command channel required for by_command")?;
            Ok(StopCondition::ByCommand { commands })
        }
    }
}

/// Forward stdin lines to the operator command channel.
fn spawn_stdin_commands() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

/// Create `data.acquisition/<name>`, moving any leftover files from an
/// earlier session into a timestamped child folder first.
fn prepare_session_dir(name: &str) -> Result<PathBuf> {
    let dir = Path::new(ACQUISITION_ROOT).join(name);
    if !dir.is_dir() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session directory {}", dir.display()))?;
        return Ok(dir);
    }

    let previous: Vec<PathBuf> = fs::read_dir(&dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    if previous.is_empty() {
        return Ok(dir);
    }

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let backup = dir.join(format!("previous_{stamp}"));
    fs::create_dir_all(&backup)
        .with_context(|| format!("failed to create {}", backup.display()))?;
    warn!(
        dir = %dir.display(),
        moved_to = %backup.display(),
        files = previous.len(),
        "session directory already holds files; moving them aside"
    );
    for path in previous {
        let Some(file_name) = path.file_name() else {
            continue;
        };
        fs::rename(&path, backup.join(file_name))
            .with_context(|| format!("failed to move {}", path.display()))?;
    }
    Ok(dir)
}

/// The drain protocol: pop exactly one segment per observed
/// `buffer_has_samples()`, persisting with a counter that starts at 1.
fn drain_to_dir(receiver: &AudioReceiver, dir: &Path) -> Result<usize> {
    let mut persisted = 0_usize;
    while receiver.is_capturing() || receiver.buffer_has_samples() {
        if receiver.buffer_has_samples() {
            let segment = receiver.get_sample_from_buffer()?;
            persisted += 1;
            wav::write_segment(dir, &format!("{persisted}.wav"), &segment)?;
        } else {
            thread::sleep(DRAIN_IDLE);
        }
    }
    Ok(persisted)
}

fn write_report(dir: &Path, args: &Args, stats: &CaptureStats, persisted: usize) -> Result<()> {
    let report = SessionReport {
        stop_condition: args.stop_condition.as_str(),
        segment_duration_seconds: args.time,
        buffer_size_seconds: args.buffer_size,
        segments_persisted: persisted,
        stats,
    };
    let path = dir.join("report.json");
    fs::write(&path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "session report written");
    Ok(())
}
