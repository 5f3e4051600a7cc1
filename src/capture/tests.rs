use super::queue::{QueueError, SegmentQueue};
use super::receiver::run_capture_loop;
use super::stop::{StopCondition, StopConditionKind, StopConfigError};
use crate::segment::{AudioSegment, SegmentError};
use crossbeam_channel::{bounded, unbounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const RATE: u32 = 8_000;

fn segment(len: usize, rate: u32) -> AudioSegment {
    AudioSegment::new(vec![0.25; len], rate).unwrap()
}

// --- SegmentQueue ------------------------------------------------------

#[test]
fn unbounded_queue_never_rejects() {
    let queue = SegmentQueue::new(0.0, 2.0).unwrap();
    assert_eq!(queue.capacity_in_segments(), None);
    for _ in 0..100 {
        queue.push(segment(16, RATE)).unwrap();
    }
    assert_eq!(queue.len(), 100);
}

#[test]
fn bounded_queue_rejects_exactly_at_capacity() {
    // 10 s of buffer at 2 s per segment holds exactly 5 segments.
    let queue = SegmentQueue::new(10.0, 2.0).unwrap();
    assert_eq!(queue.capacity_in_segments(), Some(5));
    for _ in 0..5 {
        queue.push(segment(16, RATE)).unwrap();
    }
    assert!(matches!(
        queue.push(segment(16, RATE)),
        Err(QueueError::Full { capacity: 5 })
    ));
    // Removing one segment frees exactly one slot.
    queue.pop().unwrap();
    queue.push(segment(16, RATE)).unwrap();
    assert!(matches!(
        queue.push(segment(16, RATE)),
        Err(QueueError::Full { .. })
    ));
}

#[test]
fn capacity_floors_with_a_minimum_of_one_segment() {
    assert_eq!(
        SegmentQueue::new(5.0, 2.0).unwrap().capacity_in_segments(),
        Some(2)
    );
    assert_eq!(
        SegmentQueue::new(3.9, 2.0).unwrap().capacity_in_segments(),
        Some(1)
    );
    assert_eq!(
        SegmentQueue::new(2.0, 2.0).unwrap().capacity_in_segments(),
        Some(1)
    );
}

#[test]
fn capacity_below_segment_duration_is_rejected() {
    assert!(matches!(
        SegmentQueue::new(1.0, 2.0),
        Err(QueueError::CapacityTooSmall { .. })
    ));
}

#[test]
fn non_positive_segment_duration_is_rejected() {
    assert!(matches!(
        SegmentQueue::new(4.0, 0.0),
        Err(QueueError::InvalidSegmentDuration(_))
    ));
    assert!(matches!(
        SegmentQueue::new(4.0, -1.0),
        Err(QueueError::InvalidSegmentDuration(_))
    ));
}

#[test]
fn queue_preserves_fifo_order() {
    let queue = SegmentQueue::new(0.0, 1.0).unwrap();
    for value in [1.0f32, 2.0, 3.0] {
        queue.push(AudioSegment::new(vec![value], RATE).unwrap()).unwrap();
    }
    for expected in [1.0f32, 2.0, 3.0] {
        assert_eq!(queue.pop().unwrap().samples()[0], expected);
    }
}

#[test]
fn drain_protocol_never_misses() {
    // Popping exactly once per observed `has_items() == true` never fails;
    // popping blind on an empty queue always fails.
    let queue = SegmentQueue::new(0.0, 1.0).unwrap();
    queue.push(segment(8, RATE)).unwrap();
    queue.push(segment(8, RATE)).unwrap();
    while queue.has_items() {
        queue.pop().expect("observed true must guarantee one pop");
    }
    assert!(matches!(queue.pop(), Err(QueueError::Empty)));
}

#[test]
fn drain_all_concatenated_sums_sample_counts() {
    let queue = SegmentQueue::new(0.0, 1.0).unwrap();
    for len in [100, 200, 300] {
        queue.push(segment(len, RATE)).unwrap();
    }
    let joined = queue.drain_all_concatenated().unwrap();
    assert_eq!(joined.len(), 600);
    assert_eq!(joined.sample_rate(), RATE);
    assert!(queue.is_empty());
}

#[test]
fn drain_all_concatenated_fails_on_empty_queue() {
    let queue = SegmentQueue::new(0.0, 1.0).unwrap();
    assert!(matches!(
        queue.drain_all_concatenated(),
        Err(QueueError::Empty)
    ));
}

#[test]
fn drain_all_concatenated_rejects_mixed_rates() {
    let queue = SegmentQueue::new(0.0, 1.0).unwrap();
    queue.push(segment(10, 8_000)).unwrap();
    queue.push(segment(10, 16_000)).unwrap();
    assert!(matches!(
        queue.drain_all_concatenated(),
        Err(QueueError::Segment(SegmentError::SampleRateMismatch { .. }))
    ));
    // The drain consumes the segments even on the mismatch error.
    assert!(queue.is_empty());
}

#[test]
fn queue_errors_name_their_condition() {
    assert!(QueueError::Full { capacity: 3 }.to_string().contains("full"));
    assert!(QueueError::Empty.to_string().contains("empty"));
    assert!(QueueError::Disconnected.to_string().contains("disconnected"));
}

// --- Stop conditions ---------------------------------------------------

#[test]
fn stop_condition_kind_parses_known_keys() {
    assert_eq!("timeout".parse(), Ok(StopConditionKind::Timeout));
    assert_eq!("by_command".parse(), Ok(StopConditionKind::ByCommand));
}

#[test]
fn unknown_stop_condition_names_value_and_allowed_set() {
    let err = "whenever".parse::<StopConditionKind>().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("whenever"));
    assert!(message.contains("timeout"));
    assert!(message.contains("by_command"));
}

#[test]
fn timeout_shorter_than_two_segments_is_rejected() {
    let stop = StopCondition::Timeout {
        duration: Duration::from_secs_f64(3.9),
    };
    assert!(matches!(
        stop.validate(Duration::from_secs(2)),
        Err(StopConfigError::TimeoutTooShort { .. })
    ));
}

#[test]
fn timeout_of_exactly_two_segments_is_accepted() {
    let stop = StopCondition::Timeout {
        duration: Duration::from_secs(4),
    };
    assert!(stop.validate(Duration::from_secs(2)).is_ok());
}

#[test]
fn by_command_needs_no_duration_margin() {
    let (_tx, rx) = unbounded::<String>();
    let stop = StopCondition::ByCommand { commands: rx };
    assert!(stop.validate(Duration::from_secs(60)).is_ok());
}

#[test]
fn timeout_watcher_sets_flag_after_deadline() {
    let flag = Arc::new(AtomicBool::new(false));
    let started = Instant::now();
    let stop = StopCondition::Timeout {
        duration: Duration::from_millis(60),
    };
    stop.spawn_watcher(Arc::clone(&flag)).join().unwrap();
    assert!(flag.load(Ordering::Relaxed));
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[test]
fn timeout_watcher_exits_early_when_flag_already_set() {
    let flag = Arc::new(AtomicBool::new(true));
    let started = Instant::now();
    let stop = StopCondition::Timeout {
        duration: Duration::from_secs(30),
    };
    stop.spawn_watcher(Arc::clone(&flag)).join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn command_watcher_ignores_everything_but_stop() {
    let (tx, rx) = unbounded::<String>();
    let flag = Arc::new(AtomicBool::new(false));
    let watcher = StopCondition::ByCommand { commands: rx }.spawn_watcher(Arc::clone(&flag));

    tx.send("pause".to_string()).unwrap();
    tx.send("STOP".to_string()).unwrap();
    thread::sleep(Duration::from_millis(80));
    assert!(!flag.load(Ordering::Relaxed), "non-stop input must be ignored");

    tx.send("  stop  ".to_string()).unwrap();
    watcher.join().unwrap();
    assert!(flag.load(Ordering::Relaxed));
}

#[test]
fn command_watcher_stops_when_channel_closes() {
    let (tx, rx) = unbounded::<String>();
    let flag = Arc::new(AtomicBool::new(false));
    let watcher = StopCondition::ByCommand { commands: rx }.spawn_watcher(Arc::clone(&flag));
    drop(tx);
    watcher.join().unwrap();
    assert!(flag.load(Ordering::Relaxed));
}

// --- Capture loop ------------------------------------------------------

/// Segment assembly is exact: chunk boundaries never leak into segment
/// boundaries, and a trailing partial segment is discarded.
#[test]
fn capture_loop_assembles_exact_segments() {
    let segment_duration = Duration::from_millis(50);
    let segment_samples = 400; // 50 ms at 8 kHz
    let queue = SegmentQueue::new(0.0, segment_duration.as_secs_f64()).unwrap();
    let stop_flag = AtomicBool::new(false);
    let (tx, rx) = bounded::<Vec<f32>>(16);

    // 4 * 450 = 1800 samples: four full segments plus a 200-sample tail.
    for _ in 0..4 {
        tx.send(vec![0.5; 450]).unwrap();
    }
    drop(tx);

    let stats = run_capture_loop(&rx, &queue, &stop_flag, RATE, segment_duration).unwrap();
    assert_eq!(stats.segments_captured, 4);
    assert_eq!(stats.segments_dropped, 0);
    assert!((stats.captured_seconds - 0.2).abs() < 1e-9);
    assert_eq!(queue.len(), 4);
    while queue.has_items() {
        assert_eq!(queue.pop().unwrap().len(), segment_samples);
    }
}

/// Scenario: 50 ms segments, 200 ms timeout, room for 5 segments. The
/// session ends with roughly timeout/segment_duration segments and no drops.
#[test]
fn timeout_session_produces_expected_segment_count() {
    let segment_duration = Duration::from_millis(50);
    let queue = SegmentQueue::new(0.25, segment_duration.as_secs_f64()).unwrap();
    assert_eq!(queue.capacity_in_segments(), Some(5));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded::<Vec<f32>>(64);

    let producer = spawn_paced_producer(tx, Arc::clone(&stop_flag), 400, Duration::from_millis(50));
    let stop = StopCondition::Timeout {
        duration: Duration::from_millis(200),
    };
    stop.validate(segment_duration).unwrap();
    let watcher = stop.spawn_watcher(Arc::clone(&stop_flag));

    let stats = run_capture_loop(&rx, &queue, &stop_flag, RATE, segment_duration).unwrap();
    watcher.join().unwrap();
    producer.join().unwrap();

    assert!(
        (3..=5).contains(&stats.segments_captured),
        "expected ~4 segments, got {}",
        stats.segments_captured
    );
    assert_eq!(stats.segments_dropped, 0);
    assert_eq!(queue.len(), stats.segments_captured);
}

/// Scenario: capacity of one segment and no consumer draining. The newest
/// segments are dropped and fewer segments remain than were captured.
#[test]
fn slow_consumer_on_bounded_queue_observes_drops() {
    let segment_duration = Duration::from_millis(50);
    let queue = SegmentQueue::new(0.05, segment_duration.as_secs_f64()).unwrap();
    assert_eq!(queue.capacity_in_segments(), Some(1));
    let stop_flag = AtomicBool::new(false);
    let (tx, rx) = bounded::<Vec<f32>>(16);

    for _ in 0..5 {
        tx.send(vec![0.5; 400]).unwrap();
    }
    drop(tx);

    let stats = run_capture_loop(&rx, &queue, &stop_flag, RATE, segment_duration).unwrap();
    assert_eq!(stats.segments_captured, 5);
    assert!(stats.segments_dropped >= 1);
    assert!(queue.len() < stats.segments_captured);
    // Drop-newest: the surviving segment is the first one captured.
    assert_eq!(queue.len(), 1);
}

/// Scenario: a `by_command` session keeps capturing through unrelated input
/// and ends only on the literal `stop` line.
#[test]
fn by_command_session_runs_until_stop_line() {
    let segment_duration = Duration::from_millis(50);
    let queue = Arc::new(SegmentQueue::new(0.0, segment_duration.as_secs_f64()).unwrap());
    let stop_flag = Arc::new(AtomicBool::new(false));
    let (chunk_tx, chunk_rx) = bounded::<Vec<f32>>(64);
    let (command_tx, command_rx) = unbounded::<String>();

    let producer = spawn_paced_producer(
        chunk_tx,
        Arc::clone(&stop_flag),
        400,
        Duration::from_millis(10),
    );
    let watcher = StopCondition::ByCommand {
        commands: command_rx,
    }
    .spawn_watcher(Arc::clone(&stop_flag));

    let loop_queue = Arc::clone(&queue);
    let loop_flag = Arc::clone(&stop_flag);
    let capture = thread::spawn(move || {
        run_capture_loop(&chunk_rx, &loop_queue, &loop_flag, RATE, segment_duration)
    });

    command_tx.send("status".to_string()).unwrap();
    thread::sleep(Duration::from_millis(120));
    assert!(!stop_flag.load(Ordering::Relaxed));

    command_tx.send("stop".to_string()).unwrap();
    watcher.join().unwrap();
    let stats = capture.join().unwrap().unwrap();
    producer.join().unwrap();

    assert!(stats.segments_captured >= 1);
    assert_eq!(queue.len(), stats.segments_captured);
}

fn spawn_paced_producer(
    tx: Sender<Vec<f32>>,
    stop_flag: Arc<AtomicBool>,
    chunk_len: usize,
    pace: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop_flag.load(Ordering::Relaxed) {
            thread::sleep(pace);
            if tx.send(vec![0.5; chunk_len]).is_err() {
                break;
            }
        }
    })
}
