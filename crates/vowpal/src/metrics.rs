use std::time::{Duration, Instant};

/// Coarse per-call metrics, populated when passed to
/// `predict_with_metrics`.
///
/// `total_time` is only filled in once the prediction sequence has run to
/// its end; an abandoned sequence leaves it at zero.
#[derive(Debug, Clone, Default)]
pub struct PredictMetrics {
    /// Time spent resolving leftovers of previous calls.
    pub cleanup_time: Duration,
    /// Lines pending in buffers before the cleanup phase.
    pub before_cleanup_pending_lines: usize,
    /// Lines still pending after the cleanup phase.
    pub after_cleanup_pending_lines: usize,
    /// Time from call start to the start of the prediction loop, including
    /// the common-features formatting.
    pub prepare_time: Duration,
    /// Total time spent in the call.
    pub total_time: Duration,
    /// Count of predictions produced.
    pub num_lines: usize,
}

/// Timestamped sample series for profiling a single call; collecting these
/// costs time on the hot path, so they are opt-in and separate from
/// [`PredictMetrics`].
#[derive(Debug, Clone, Default)]
pub struct DetailedMetrics {
    /// Bytes handed to the OS pipe buffer per write attempt.
    pub sending_bytes: Vec<(Instant, usize)>,
    /// Bytes received from the OS pipe buffer per read attempt.
    pub receiving_bytes: Vec<(Instant, usize)>,
    /// Pending-line count sampled once per scheduler turn.
    pub pending_lines: Vec<(Instant, usize)>,
    /// Time spent generating the line batch, per turn.
    pub generating_lines_time: Vec<(Instant, Duration)>,
    /// Time spent on the write attempt, per turn.
    pub sending_lines_time: Vec<(Instant, Duration)>,
    /// Time spent on the read attempt, per turn.
    pub receiving_lines_time: Vec<(Instant, Duration)>,
}
