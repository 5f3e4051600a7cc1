//! Stop-condition strategies and the watcher thread that evaluates them.
//!
//! A capture session ends when its watcher sets the shared stop flag. Two
//! strategies exist: a wall-clock timeout and an operator command read from
//! an external channel. Each carries its own validated parameters; selection
//! happens through [`StopConditionKind`] rather than string comparison at
//! evaluation time.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Timeout applied when the operator selects `timeout` without a duration.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// The operator line that terminates a `by_command` session.
pub const STOP_COMMAND: &str = "stop";

/// How long the watcher sleeps between checks of the flag or the deadline.
const WATCHER_POLL: Duration = Duration::from_millis(20);

/// Invalid stop-condition configuration, detected before a session starts.
#[derive(Debug, Error, PartialEq)]
pub enum StopConfigError {
    #[error("unknown stop condition '{value}'; allowed values are 'timeout' and 'by_command'")]
    UnknownKind { value: String },

    #[error("timeout of {timeout_seconds} s must be at least twice the segment duration ({segment_seconds} s)")]
    TimeoutTooShort {
        timeout_seconds: f64,
        segment_seconds: f64,
    },
}

/// Configuration key selecting a stop-condition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopConditionKind {
    Timeout,
    ByCommand,
}

impl StopConditionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StopConditionKind::Timeout => "timeout",
            StopConditionKind::ByCommand => "by_command",
        }
    }
}

impl FromStr for StopConditionKind {
    type Err = StopConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "timeout" => Ok(StopConditionKind::Timeout),
            "by_command" => Ok(StopConditionKind::ByCommand),
            other => Err(StopConfigError::UnknownKind {
                value: other.to_string(),
            }),
        }
    }
}

/// A fully parameterized stop condition, ready to hand to a session.
#[derive(Debug)]
pub enum StopCondition {
    /// Stop once `duration` of wall-clock time has elapsed.
    Timeout { duration: Duration },
    /// Stop when the literal line `stop` arrives on the operator channel.
    ByCommand { commands: Receiver<String> },
}

impl StopCondition {
    pub fn kind(&self) -> StopConditionKind {
        match self {
            StopCondition::Timeout { .. } => StopConditionKind::Timeout,
            StopCondition::ByCommand { .. } => StopConditionKind::ByCommand,
        }
    }

    /// Check configuration-time invariants against the session's segment
    /// duration. The timeout must cover at least two segments so a session
    /// is guaranteed to produce one full segment before the earliest stop.
    pub fn validate(&self, segment_duration: Duration) -> Result<(), StopConfigError> {
        if let StopCondition::Timeout { duration } = self {
            let timeout_seconds = duration.as_secs_f64();
            let segment_seconds = segment_duration.as_secs_f64();
            if timeout_seconds < 2.0 * segment_seconds {
                return Err(StopConfigError::TimeoutTooShort {
                    timeout_seconds,
                    segment_seconds,
                });
            }
        }
        Ok(())
    }

    /// Spawn the watcher thread for this condition.
    ///
    /// The watcher sets `stop_flag` when the condition fires, and also exits
    /// early if someone else (a failing capture loop) set the flag first.
    pub(crate) fn spawn_watcher(self, stop_flag: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            match self {
                StopCondition::Timeout { duration } => watch_timeout(duration, &stop_flag),
                StopCondition::ByCommand { commands } => watch_commands(&commands, &stop_flag),
            }
            stop_flag.store(true, Ordering::Relaxed);
        })
    }
}

fn watch_timeout(duration: Duration, stop_flag: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        // Bounded sleep instead of a busy spin.
        thread::sleep(remaining.min(WATCHER_POLL));
    }
    info!(timeout_seconds = duration.as_secs_f64(), "timeout stop condition fired");
}

fn watch_commands(commands: &Receiver<String>, stop_flag: &AtomicBool) {
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            return;
        }
        match commands.recv_timeout(WATCHER_POLL) {
            Ok(line) if line.trim() == STOP_COMMAND => {
                info!("operator stop command received");
                return;
            }
            Ok(other) => {
                debug!(input = %other.trim(), "ignoring operator input");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("operator channel closed; stopping capture");
                return;
            }
        }
    }
}
