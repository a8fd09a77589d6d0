use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{args, metrics::PredictMetrics, process, VowpalError, VowpalFormatter};

const DEFAULT_BATCH_SIZE: usize = 20;
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Builder for [`VowpalClient`].
#[derive(Debug, Clone)]
pub struct VowpalClientBuilder<F> {
    formatter: F,
    vw_args: Vec<String>,
    binary: Option<PathBuf>,
    batch_size: usize,
    write_only: bool,
    audit_mode: bool,
    close_timeout: Duration,
}

impl<F: VowpalFormatter> VowpalClientBuilder<F> {
    pub fn new(formatter: F) -> Self {
        Self {
            formatter,
            vw_args: Vec::new(),
            binary: None,
            batch_size: DEFAULT_BATCH_SIZE,
            write_only: false,
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

    /// Lines handed to the engine per write. Smaller batches shave a little
    /// latency, bigger ones help throughput.
    pub fn batch_size(mut self, lines: usize) -> Self {
        self.batch_size = lines;
        self
    }

    /// Routes predictions to `/dev/null` and skips reading them. This
    /// speeds training up considerably but disables predicting.
    pub fn write_only(mut self, enabled: bool) -> Self {
        self.write_only = enabled;
        self
    }

    /// Launches the engine in audit mode; only
    /// [`VowpalClient::explain_line`] is available then.
    pub fn audit_mode(mut self, enabled: bool) -> Self {
        self.audit_mode = enabled;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<VowpalClient<F>, VowpalError> {
        if self.audit_mode && self.write_only {
            return Err(VowpalError::InvalidConfig(
                "audit mode needs the prediction stream, write_only discards it".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(VowpalError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let argv = args::build_argv(&self.vw_args, self.audit_mode, self.write_only)?;
        let binary = process::resolve_binary(self.binary.as_deref());
        info!(
            binary = %binary.display(),
            ?argv,
            batch_size = self.batch_size,
            write_only = self.write_only,
            audit_mode = self.audit_mode,
            "spawning vw engine"
        );
        let mut child = process::spawn_engine(&binary, &argv, !self.write_only)?;
        let stdin = child.stdin.take().ok_or(VowpalError::StdinUnavailable)?;
        let stdout = if self.write_only {
            None
        } else {
            Some(BufReader::new(
                child.stdout.take().ok_or(VowpalError::StdoutUnavailable)?,
            ))
        };
        Ok(VowpalClient {
            formatter: self.formatter,
            child,
            stdin: Some(stdin),
            stdout,
            batch_size: self.batch_size,
            write_only: self.write_only,
            audit_mode: self.audit_mode,
            close_timeout: self.close_timeout,
            in_flight: VecDeque::new(),
            closed: false,
        })
    }
}

/// Client for the `vw` engine over ordinary blocking pipes.
///
/// The simpler counterpart of
/// [`NonBlockingVowpalClient`](crate::NonBlockingVowpalClient) for
/// environments without non-blocking pipe support: fixed batch sizes, and
/// writes and reads that park the thread until complete. Predict keeps one
/// batch in flight, sending the current batch while the previous one's
/// results are read. Unlike the non-blocking client it also supports
/// training.
pub struct VowpalClient<F: VowpalFormatter> {
    formatter: F,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    batch_size: usize,
    write_only: bool,
    audit_mode: bool,
    close_timeout: Duration,
    /// Line count of every batch sent but not yet read back, oldest first.
    in_flight: VecDeque<usize>,
    closed: bool,
}

impl<F: VowpalFormatter> VowpalClient<F> {
    pub fn builder(formatter: F) -> VowpalClientBuilder<F> {
        VowpalClientBuilder::new(formatter)
    }

    /// Turns an iterable of item features into a lazy sequence of
    /// predictions, in item order.
    ///
    /// With a `timeout` the sequence stops feeding new batches once the
    /// deadline passes; results of batches already sent are still read and
    /// yielded, so the engine stays in sync.
    pub fn predict<'c, I>(
        &'c mut self,
        common: &'c F::Common,
        items: I,
        timeout: Option<Duration>,
    ) -> Result<BlockingPredictions<'c, F, I::IntoIter>, VowpalError>
    where
        I: IntoIterator<Item = F::Item>,
    {
        self.predict_inner(common, items, timeout, None)
    }

    /// Like [`predict`](Self::predict), additionally populating `metrics`.
    pub fn predict_with_metrics<'c, I>(
        &'c mut self,
        common: &'c F::Common,
        items: I,
        timeout: Option<Duration>,
        metrics: &'c mut PredictMetrics,
    ) -> Result<BlockingPredictions<'c, F, I::IntoIter>, VowpalError>
    where
        I: IntoIterator<Item = F::Item>,
    {
        self.predict_inner(common, items, timeout, Some(metrics))
    }

    fn predict_inner<'c, I>(
        &'c mut self,
        common: &'c F::Common,
        items: I,
        timeout: Option<Duration>,
        mut metrics: Option<&'c mut PredictMetrics>,
    ) -> Result<BlockingPredictions<'c, F, I::IntoIter>, VowpalError>
    where
        I: IntoIterator<Item = F::Item>,
    {
        if self.write_only {
            return Err(VowpalError::WriteOnlyClient);
        }
        if self.audit_mode {
            return Err(VowpalError::AuditOnly);
        }
        let started = Instant::now();
        let deadline = timeout.map(|timeout| started + timeout);
        let common_part = self.formatter.format_common_features(common);
        if let Some(m) = metrics.as_deref_mut() {
            *m = PredictMetrics::default();
            m.prepare_time = started.elapsed();
        }
        Ok(BlockingPredictions {
            client: self,
            common,
            common_part,
            items: items.into_iter(),
            batch: Vec::new(),
            ready: VecDeque::new(),
            deadline,
            exhausted: false,
            timed_out: false,
            started,
            metrics,
            done: false,
        })
    }

    /// Sends labeled lines to the engine for training.
    ///
    /// `labels` and `weights` are consumed in lock step with `items`. The
    /// engine acknowledges every line on its prediction stream; those
    /// acknowledgements are consumed and discarded here, otherwise a later
    /// predict call would read them as its own results. A `write_only`
    /// client skips that entirely, which is the fast path for bulk
    /// training.
    pub fn train<I, L, Wt>(
        &mut self,
        common: &F::Common,
        items: I,
        labels: L,
        weights: Wt,
    ) -> Result<(), VowpalError>
    where
        I: IntoIterator<Item = F::Item>,
        L: IntoIterator<Item = f64>,
        Wt: IntoIterator<Item = Option<f64>>,
    {
        if self.audit_mode {
            return Err(VowpalError::AuditOnly);
        }
        let common_part = self.formatter.format_common_features(common);
        let mut labels = labels.into_iter();
        let mut weights = weights.into_iter();
        let mut batch = Vec::new();
        for item in items {
            let Some(label) = labels.next() else { break };
            let Some(weight) = weights.next() else { break };
            let item_part = self.formatter.format_item_features(common, &item);
            batch.push(
                self.formatter
                    .compose_line(&common_part, &item_part, Some(label), weight),
            );
            if batch.len() >= self.batch_size {
                self.send_batch(&std::mem::take(&mut batch))?;
                // Keep one batch in flight while the next one is built.
                while self.in_flight.len() > 1 {
                    if let Some(expected) = self.in_flight.pop_front() {
                        self.read_scores(expected)?;
                    }
                }
            }
        }
        if !batch.is_empty() {
            self.send_batch(&batch)?;
        }
        while let Some(expected) = self.in_flight.pop_front() {
            self.read_scores(expected)?;
        }
        Ok(())
    }

    /// Synchronously scores one already-formatted line and returns the raw
    /// score together with vw's explanation of it. Audit mode only, and
    /// only while no batch acknowledgements are outstanding.
    pub fn explain_line(
        &mut self,
        line: &str,
        link_function: bool,
    ) -> Result<(f64, String), VowpalError> {
        if !self.audit_mode {
            return Err(VowpalError::NotInAuditMode);
        }
        if !self.in_flight.is_empty() {
            return Err(VowpalError::PendingBatches);
        }
        let sanitized = line.replace('\n', "");
        let sanitized = sanitized.trim();
        let sink = self.stdin.as_mut().ok_or(VowpalError::StdinUnavailable)?;
        sink.write_all(sanitized.as_bytes()).map_err(VowpalError::PipeWrite)?;
        sink.write_all(b"\n").map_err(VowpalError::PipeWrite)?;
        sink.flush().map_err(VowpalError::PipeWrite)?;

        let source = self.stdout.as_mut().ok_or(VowpalError::StdoutUnavailable)?;
        let mut prediction = String::new();
        source.read_line(&mut prediction).map_err(VowpalError::PipeRead)?;
        let mut explanation = String::new();
        source.read_line(&mut explanation).map_err(VowpalError::PipeRead)?;
        if link_function {
            // With a link function vw returns the linked score as a third
            // line; the raw score above is the one callers explain.
            let mut linked = String::new();
            source.read_line(&mut linked).map_err(VowpalError::PipeRead)?;
        }
        let score = prediction.trim().parse::<f64>().map_err(|_| VowpalError::Protocol {
            line: prediction.trim().to_string(),
        })?;
        Ok((score, explanation.trim().to_string()))
    }

    /// Gracefully stops the engine: closes its stdin, drains any unread
    /// output so the child cannot deadlock on a full pipe, then waits for
    /// it to exit. A non-zero exit status is fatal.
    pub fn close(mut self) -> Result<(), VowpalError> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<(), VowpalError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        drop(self.stdin.take());
        if let Some(mut source) = self.stdout.take() {
            let mut residue = Vec::new();
            source.read_to_end(&mut residue).map_err(VowpalError::PipeRead)?;
            if !residue.is_empty() {
                warn!(bytes = residue.len(), "data left in vw stdout at close");
            }
        }
        process::wait_for_exit(&mut self.child, self.close_timeout)
    }

    fn send_batch(&mut self, lines: &[String]) -> Result<(), VowpalError> {
        if lines.is_empty() {
            return Ok(());
        }
        for line in lines {
            if line.contains('\n') {
                return Err(VowpalError::EmbeddedNewline { line: line.clone() });
            }
        }
        let mut payload = Vec::new();
        for line in lines {
            payload.extend_from_slice(line.as_bytes());
            payload.push(b'\n');
        }
        let sink = self.stdin.as_mut().ok_or(VowpalError::StdinUnavailable)?;
        sink.write_all(&payload).map_err(VowpalError::PipeWrite)?;
        sink.flush().map_err(VowpalError::PipeWrite)?;
        if !self.write_only {
            self.in_flight.push_back(lines.len());
        }
        Ok(())
    }

    fn read_scores(&mut self, expected: usize) -> Result<Vec<f64>, VowpalError> {
        let source = self.stdout.as_mut().ok_or(VowpalError::StdoutUnavailable)?;
        let mut scores = Vec::with_capacity(expected);
        let mut line = String::new();
        for _ in 0..expected {
            line.clear();
            let n = source.read_line(&mut line).map_err(VowpalError::PipeRead)?;
            if n == 0 {
                return Err(VowpalError::EngineEof {
                    pending: expected - scores.len(),
                });
            }
            // vw may append a tag after the score; the first token is the
            // score itself.
            let token = line.split_whitespace().next().ok_or_else(|| VowpalError::Protocol {
                line: line.trim().to_string(),
            })?;
            let score = token.parse::<f64>().map_err(|_| VowpalError::Protocol {
                line: line.trim().to_string(),
            })?;
            scores.push(score);
        }
        Ok(scores)
    }
}

impl<F: VowpalFormatter> Drop for VowpalClient<F> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close_inner() {
                warn!(%err, "failed to close vw engine on drop");
            }
        }
    }
}

/// Lazy, single-pass stream of predictions from the blocking client.
///
/// Yields batch by batch: while one batch's results are read, the next one
/// is already with the engine.
pub struct BlockingPredictions<'c, F, I>
where
    F: VowpalFormatter,
{
    client: &'c mut VowpalClient<F>,
    common: &'c F::Common,
    common_part: String,
    items: I,
    batch: Vec<String>,
    ready: VecDeque<f64>,
    deadline: Option<Instant>,
    exhausted: bool,
    timed_out: bool,
    started: Instant,
    metrics: Option<&'c mut PredictMetrics>,
    done: bool,
}

impl<'c, F, I> Iterator for BlockingPredictions<'c, F, I>
where
    F: VowpalFormatter,
    I: Iterator<Item = F::Item>,
{
    type Item = Result<f64, VowpalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(score) = self.ready.pop_front() {
                if let Some(m) = self.metrics.as_deref_mut() {
                    m.num_lines += 1;
                }
                return Some(Ok(score));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.step() {
                self.done = true;
                // Scores read before the failure can no longer be trusted
                // to pair with the right items; the error fuses the stream.
                self.ready.clear();
                self.finish();
                return Some(Err(err));
            }
        }
    }
}

impl<'c, F, I> BlockingPredictions<'c, F, I>
where
    F: VowpalFormatter,
    I: Iterator<Item = F::Item>,
{
    fn step(&mut self) -> Result<(), VowpalError> {
        // Build one batch, stopping at the deadline or the end of the
        // items.
        while !self.exhausted && self.batch.len() < self.client.batch_size {
            if self.deadline.is_some_and(|deadline| Instant::now() > deadline) {
                self.exhausted = true;
                self.timed_out = true;
                break;
            }
            match self.items.next() {
                None => self.exhausted = true,
                Some(item) => {
                    let item_part = self.client.formatter.format_item_features(self.common, &item);
                    self.batch.push(self.client.formatter.compose_line(
                        &self.common_part,
                        &item_part,
                        None,
                        None,
                    ));
                }
            }
        }

        if !self.exhausted {
            // Full batch: ship it, then collect the previous batch's
            // results, keeping one batch in flight.
            self.client.send_batch(&std::mem::take(&mut self.batch))?;
            while self.client.in_flight.len() > 1 {
                if let Some(expected) = self.client.in_flight.pop_front() {
                    let scores = self.client.read_scores(expected)?;
                    self.ready.extend(scores);
                }
            }
            return Ok(());
        }

        // Tail: ship the last partial batch unless the deadline already
        // passed, then read back everything still in flight. Lines already
        // sent are always read, or the next call would inherit them.
        if !self.batch.is_empty() && !self.timed_out {
            self.client.send_batch(&std::mem::take(&mut self.batch))?;
        }
        while let Some(expected) = self.client.in_flight.pop_front() {
            let scores = self.client.read_scores(expected)?;
            self.ready.extend(scores);
        }
        self.done = true;
        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        if let Some(m) = self.metrics.as_deref_mut() {
            m.total_time = self.started.elapsed();
        }
    }
}
