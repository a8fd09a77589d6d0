use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    args,
    metrics::{DetailedMetrics, PredictMetrics},
    pending::PendingLines,
    pipe, process,
    reader::ScoreReader,
    writer::LineWriter,
    VowpalError, VowpalFormatter,
};

const DEFAULT_BATCH_SIZE: usize = 20;
const DEFAULT_MAX_PENDING_LINES: usize = 20;
const DEFAULT_WRITE_SAFETY_MARGIN: Duration = Duration::from_millis(1);
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(120);

fn before(deadline: Option<Instant>) -> bool {
    deadline.map_or(true, |deadline| Instant::now() < deadline)
}

/// The pipe pair plus the buffer and ledger state that keeps its two
/// streams paired.
#[derive(Debug)]
struct Pipeline<W, R> {
    sink: Option<W>,
    source: Option<R>,
    writer: LineWriter,
    reader: ScoreReader,
    pending: PendingLines,
    /// Results parsed off the pipe but not yet handed to the caller.
    ready: VecDeque<f64>,
}

impl<W: Write, R: Read> Pipeline<W, R> {
    fn new(sink: W, source: R) -> Self {
        Self {
            sink: Some(sink),
            source: Some(source),
            writer: LineWriter::default(),
            reader: ScoreReader::default(),
            pending: PendingLines::default(),
            ready: VecDeque::new(),
        }
    }

    /// One write attempt for `batch` plus whatever remainder is queued.
    fn flush(&mut self, batch: &[String]) -> Result<usize, VowpalError> {
        let sink = self.sink.as_mut().ok_or(VowpalError::StdinUnavailable)?;
        self.writer.send(sink, batch, &mut self.pending)
    }

    /// One read attempt; completed results land in `ready`.
    fn poll_scores(&mut self) -> Result<usize, VowpalError> {
        let source = self.source.as_mut().ok_or(VowpalError::StdoutUnavailable)?;
        self.reader.drain(source, &mut self.pending, &mut self.ready)
    }

    /// Flushes and drains leftovers of previous calls until the pipeline is
    /// idle or the deadline passes. Drained results have no consumer
    /// anymore and are discarded.
    fn cleanup_until(&mut self, deadline: Option<Instant>) -> Result<(), VowpalError> {
        self.ready.clear();
        while !self.pending.is_idle() && before(deadline) {
            self.flush(&[])?;
            if before(deadline) {
                self.poll_scores()?;
                self.ready.clear();
            }
        }
        Ok(())
    }
}

/// Builder for [`NonBlockingVowpalClient`].
#[derive(Debug, Clone)]
pub struct NonBlockingVowpalClientBuilder<F> {
    formatter: F,
    vw_args: Vec<String>,
    binary: Option<PathBuf>,
    batch_size: usize,
    max_pending_lines: usize,
    write_safety_margin: Duration,
    pipe_buffer_size: Option<usize>,
    audit_mode: bool,
    close_timeout: Duration,
}

impl<F: VowpalFormatter> NonBlockingVowpalClientBuilder<F> {
    pub fn new(formatter: F) -> Self {
        Self {
            formatter,
            vw_args: Vec::new(),
            binary: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_pending_lines: DEFAULT_MAX_PENDING_LINES,
            write_safety_margin: DEFAULT_WRITE_SAFETY_MARGIN,
            pipe_buffer_size: None,
            audit_mode: false,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Pass-through arguments for the `vw` command, e.g. `["-q", "::"]`.
    /// `-p` and `-a` are managed by the client and rejected here.
    pub fn vw_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.vw_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Maximum lines handed to the engine in one write attempt. Bigger
    /// batches mean fewer syscalls, smaller ones leave less mess for the
    /// next call to clean up after a timeout.
    pub fn batch_size(mut self, lines: usize) -> Self {
        self.batch_size = lines;
        self
    }

    /// Cap on lines waiting in the pipeline. Usually the same value as
    /// `batch_size`, but it may be higher.
    pub fn max_pending_lines(mut self, lines: usize) -> Self {
        self.max_pending_lines = lines;
        self
    }

    /// How long before the call deadline to stop feeding new lines, so the
    /// in-flight ones can still be drained in time.
    pub fn write_safety_margin(mut self, margin: Duration) -> Self {
        self.write_safety_margin = margin;
        self
    }

    /// Overrides the kernel buffer size of the engine's stdin pipe
    /// (`F_SETPIPE_SZ`, Linux only).
    pub fn pipe_buffer_size(mut self, bytes: usize) -> Self {
        self.pipe_buffer_size = Some(bytes);
        self
    }

    /// Launches the engine in audit mode. An audit client keeps its pipes
    /// blocking and only serves [`NonBlockingVowpalClient::explain_line`].
    pub fn audit_mode(mut self, enabled: bool) -> Self {
        self.audit_mode = enabled;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<NonBlockingVowpalClient<F>, VowpalError> {
        if self.batch_size == 0 || self.max_pending_lines == 0 {
            return Err(VowpalError::InvalidConfig(
                "batch_size and max_pending_lines must be at least 1".to_string(),
            ));
        }
        let argv = args::build_argv(&self.vw_args, self.audit_mode, false)?;
        let binary = process::resolve_binary(self.binary.as_deref());
        info!(
            binary = %binary.display(),
            ?argv,
            batch_size = self.batch_size,
            audit_mode = self.audit_mode,
            "spawning vw engine"
        );
        let mut child = process::spawn_engine(&binary, &argv, true)?;
        let stdin = child.stdin.take().ok_or(VowpalError::StdinUnavailable)?;
        let stdout = child.stdout.take().ok_or(VowpalError::StdoutUnavailable)?;
        if !self.audit_mode {
            if let Some(bytes) = self.pipe_buffer_size {
                pipe::set_pipe_buffer_size(&stdin, bytes)?;
            }
            pipe::set_nonblocking(&stdin, "stdin")?;
            pipe::set_nonblocking(&stdout, "stdout")?;
        }
        Ok(NonBlockingVowpalClient {
            formatter: self.formatter,
            child,
            pipeline: Pipeline::new(stdin, stdout),
            batch_size: self.batch_size,
            max_pending_lines: self.max_pending_lines,
            write_safety_margin: self.write_safety_margin,
            audit_mode: self.audit_mode,
            close_timeout: self.close_timeout,
            closed: false,
        })
    }
}

/// Client for the `vw` engine over non-blocking anonymous pipes.
///
/// All I/O is polled; no call ever parks the thread, and a caller-supplied
/// timeout bounds how long a predict call may run. The instance owns one
/// unshared pipe pair and is not meant for concurrent use.
pub struct NonBlockingVowpalClient<F: VowpalFormatter> {
    formatter: F,
    child: Child,
    pipeline: Pipeline<ChildStdin, ChildStdout>,
    batch_size: usize,
    max_pending_lines: usize,
    write_safety_margin: Duration,
    audit_mode: bool,
    close_timeout: Duration,
    closed: bool,
}

impl<F: VowpalFormatter> NonBlockingVowpalClient<F> {
    pub fn builder(formatter: F) -> NonBlockingVowpalClientBuilder<F> {
        NonBlockingVowpalClientBuilder::new(formatter)
    }

    /// Lines submitted to the engine whose results have not been consumed
    /// yet.
    pub fn pending_lines(&self) -> usize {
        self.pipeline.pending.get()
    }

    /// Resolves leftovers of previous calls, bounded by `timeout`. Predict
    /// runs this itself; calling it between requests moves the cost off the
    /// latency-sensitive path.
    pub fn cleanup(&mut self, timeout: Option<Duration>) -> Result<(), VowpalError> {
        if self.audit_mode {
            return Err(VowpalError::AuditOnly);
        }
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        self.pipeline.cleanup_until(deadline)
    }

    /// Turns an iterable of item features into a lazy sequence of
    /// predictions, in item order.
    ///
    /// With a `timeout` the sequence may end before every item is resolved;
    /// a short sequence means "some items unresolved", not failure. The
    /// caller may also just stop consuming: whatever is still in flight is
    /// cleaned up by the next call.
    pub fn predict<'c, I>(
        &'c mut self,
        common: &'c F::Common,
        items: I,
        timeout: Option<Duration>,
    ) -> Result<Predictions<'c, F, I::IntoIter>, VowpalError>
    where
        I: IntoIterator<Item = F::Item>,
    {
        self.predict_inner(common, items, timeout, None, None)
    }

    /// Like [`predict`](Self::predict), additionally populating `metrics`
    /// and, when given, the more expensive `detailed` sample series.
    pub fn predict_with_metrics<'c, I>(
        &'c mut self,
        common: &'c F::Common,
        items: I,
        timeout: Option<Duration>,
        metrics: &'c mut PredictMetrics,
        detailed: Option<&'c mut DetailedMetrics>,
    ) -> Result<Predictions<'c, F, I::IntoIter>, VowpalError>
    where
        I: IntoIterator<Item = F::Item>,
    {
        self.predict_inner(common, items, timeout, Some(metrics), detailed)
    }

    fn predict_inner<'c, I>(
        &'c mut self,
        common: &'c F::Common,
        items: I,
        timeout: Option<Duration>,
        mut metrics: Option<&'c mut PredictMetrics>,
        detailed: Option<&'c mut DetailedMetrics>,
    ) -> Result<Predictions<'c, F, I::IntoIter>, VowpalError>
    where
        I: IntoIterator<Item = F::Item>,
    {
        if self.audit_mode {
            return Err(VowpalError::AuditOnly);
        }
        let started = Instant::now();
        let deadline = timeout.map(|timeout| started + timeout);
        let write_deadline =
            deadline.map(|d| d.checked_sub(self.write_safety_margin).unwrap_or(started));

        if let Some(m) = metrics.as_deref_mut() {
            *m = PredictMetrics::default();
            m.before_cleanup_pending_lines = self.pipeline.pending.get();
        }
        let cleanup_started = Instant::now();
        self.pipeline.cleanup_until(deadline)?;
        if let Some(m) = metrics.as_deref_mut() {
            m.cleanup_time = cleanup_started.elapsed();
            m.after_cleanup_pending_lines = self.pipeline.pending.get();
        }

        let common_part = self.formatter.format_common_features(common);
        if let Some(m) = metrics.as_deref_mut() {
            m.prepare_time = started.elapsed();
        }

        Ok(Predictions {
            pipeline: &mut self.pipeline,
            formatter: &self.formatter,
            batch_size: self.batch_size,
            max_pending_lines: self.max_pending_lines,
            common,
            common_part,
            items: items.into_iter(),
            batch: Vec::new(),
            exhausted: false,
            deadline,
            write_deadline,
            started,
            metrics,
            detailed,
            done: false,
        })
    }

    /// Training needs the lock-step acknowledgement handling of the
    /// blocking client; this client only predicts.
    pub fn train<I, L, Wt>(
        &mut self,
        _common: &F::Common,
        _items: I,
        _labels: L,
        _weights: Wt,
    ) -> Result<(), VowpalError>
    where
        I: IntoIterator<Item = F::Item>,
        L: IntoIterator<Item = f64>,
        Wt: IntoIterator<Item = Option<f64>>,
    {
        Err(VowpalError::TrainUnsupported)
    }

    /// Synchronously scores one already-formatted line and returns the raw
    /// score together with vw's explanation of it. Audit mode only.
    pub fn explain_line(
        &mut self,
        line: &str,
        link_function: bool,
    ) -> Result<(f64, String), VowpalError> {
        if !self.audit_mode {
            return Err(VowpalError::NotInAuditMode);
        }
        let sanitized = line.replace('\n', "");
        let sanitized = sanitized.trim();
        let sink = self.pipeline.sink.as_mut().ok_or(VowpalError::StdinUnavailable)?;
        sink.write_all(sanitized.as_bytes()).map_err(VowpalError::PipeWrite)?;
        sink.write_all(b"\n").map_err(VowpalError::PipeWrite)?;
        sink.flush().map_err(VowpalError::PipeWrite)?;

        let source = self.pipeline.source.as_mut().ok_or(VowpalError::StdoutUnavailable)?;
        let prediction = process::read_line_raw(source)?;
        let explanation = process::read_line_raw(source)?;
        if link_function {
            // With a link function vw returns the linked score as a third
            // line; the raw score above is the one callers explain.
            let _ = process::read_line_raw(source)?;
        }
        let score = prediction.trim().parse::<f64>().map_err(|_| VowpalError::Protocol {
            line: prediction.clone(),
        })?;
        Ok((score, explanation.trim().to_string()))
    }

    /// Gracefully stops the engine: closes its stdin, drains its stdout to
    /// end-of-file so the child cannot deadlock on a full pipe, then waits
    /// for it to exit. A non-zero exit status is fatal.
    pub fn close(mut self) -> Result<(), VowpalError> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<(), VowpalError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        drop(self.pipeline.sink.take());
        if let Some(mut source) = self.pipeline.source.take() {
            let residue = process::drain_to_eof(&mut source, self.close_timeout)?;
            if !residue.is_empty() {
                debug!(bytes = residue.len(), "discarding unread engine output at close");
            }
        }
        process::wait_for_exit(&mut self.child, self.close_timeout)
    }
}

impl<F: VowpalFormatter> Drop for NonBlockingVowpalClient<F> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close_inner() {
                warn!(%err, "failed to close vw engine on drop");
            }
        }
    }
}

/// Lazy, single-pass stream of predictions for one call.
///
/// Each value is produced as pipe data becomes available; the yield points
/// are the scheduler's only suspension points, no thread runs in the
/// background. An elapsed timeout ends the sequence early without error,
/// and dropping the iterator abandons the remaining items for the next
/// call's cleanup phase to drain.
pub struct Predictions<'c, F, I, W = ChildStdin, R = ChildStdout>
where
    F: VowpalFormatter,
{
    pipeline: &'c mut Pipeline<W, R>,
    formatter: &'c F,
    batch_size: usize,
    max_pending_lines: usize,
    common: &'c F::Common,
    common_part: String,
    items: I,
    batch: Vec<String>,
    exhausted: bool,
    deadline: Option<Instant>,
    write_deadline: Option<Instant>,
    started: Instant,
    metrics: Option<&'c mut PredictMetrics>,
    detailed: Option<&'c mut DetailedMetrics>,
    done: bool,
}

impl<'c, F, I, W, R> Iterator for Predictions<'c, F, I, W, R>
where
    F: VowpalFormatter,
    I: Iterator<Item = F::Item>,
    W: Write,
    R: Read,
{
    type Item = Result<f64, VowpalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(score) = self.pipeline.ready.pop_front() {
            self.note_yield();
            return Some(Ok(score));
        }
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(score)) => Some(Ok(score)),
            Ok(None) => None,
            Err(err) => {
                self.done = true;
                // Scores parsed before the failure can no longer be trusted
                // to pair with the right items; the error fuses the stream.
                self.pipeline.ready.clear();
                self.finish();
                Some(Err(err))
            }
        }
    }
}

impl<'c, F, I, W, R> Predictions<'c, F, I, W, R>
where
    F: VowpalFormatter,
    I: Iterator<Item = F::Item>,
    W: Write,
    R: Read,
{
    /// One scheduler turn per loop iteration: top up the batch, make one
    /// write attempt, make one read attempt, then decide whether any more
    /// work can ever appear.
    fn advance(&mut self) -> Result<Option<f64>, VowpalError> {
        while before(self.deadline) {
            // Generate up to a batch of lines, unless the time left is
            // reserved for draining what is already in flight.
            let generate_started = Instant::now();
            if before(self.write_deadline) && !self.exhausted {
                let budget = self
                    .batch_size
                    .min(self.max_pending_lines.saturating_sub(self.pipeline.pending.get()));
                while self.batch.len() < budget {
                    let Some(item) = self.items.next() else {
                        self.exhausted = true;
                        break;
                    };
                    let item_part = self.formatter.format_item_features(self.common, &item);
                    self.batch.push(self.formatter.compose_line(
                        &self.common_part,
                        &item_part,
                        None,
                        None,
                    ));
                    if self.write_deadline.is_some() && !before(self.write_deadline) {
                        break;
                    }
                }
            }
            if let Some(d) = self.detailed.as_deref_mut() {
                d.generating_lines_time
                    .push((Instant::now(), generate_started.elapsed()));
            }

            // One write attempt, also when the batch is empty but a stale
            // remainder still needs flushing.
            let send_started = Instant::now();
            if before(self.deadline) && (!self.batch.is_empty() || self.pipeline.writer.has_remainder())
            {
                let written = self.pipeline.flush(&self.batch)?;
                self.batch.clear();
                if let Some(d) = self.detailed.as_deref_mut() {
                    d.sending_bytes.push((Instant::now(), written));
                }
            }
            if let Some(d) = self.detailed.as_deref_mut() {
                d.sending_lines_time
                    .push((Instant::now(), send_started.elapsed()));
            }

            // One read attempt; whatever completed becomes ready to yield.
            let receive_started = Instant::now();
            if before(self.deadline) && self.pipeline.pending.get() > 0 {
                let read = self.pipeline.poll_scores()?;
                if let Some(d) = self.detailed.as_deref_mut() {
                    d.receiving_bytes.push((Instant::now(), read));
                }
            }
            if let Some(d) = self.detailed.as_deref_mut() {
                d.receiving_lines_time
                    .push((Instant::now(), receive_started.elapsed()));
                d.pending_lines.push((Instant::now(), self.pipeline.pending.get()));
            }
            if let Some(score) = self.pipeline.ready.pop_front() {
                self.note_yield();
                return Ok(Some(score));
            }

            // No more work will ever appear once nothing is pending and
            // nothing new will be written.
            if self.pipeline.pending.is_idle() {
                if self.exhausted {
                    break;
                }
                if self.write_deadline.is_some() && !before(self.write_deadline) {
                    break;
                }
            }
        }
        self.done = true;
        self.finish();
        Ok(None)
    }

    fn note_yield(&mut self) {
        if let Some(m) = self.metrics.as_deref_mut() {
            m.num_lines += 1;
        }
    }

    fn finish(&mut self) {
        if let Some(m) = self.metrics.as_deref_mut() {
            m.total_time = self.started.elapsed();
        }
    }
}
