use std::collections::VecDeque;
use std::io::{self, Read};

use crate::{pending::PendingLines, VowpalError};

/// Upper bound on bytes pulled from the pipe per drain attempt.
pub(crate) const READ_CHUNK_BYTES: usize = 4096;

/// Inbound half of the pipe pair.
///
/// Reassembles complete result lines out of whatever chunk boundaries the
/// kernel delivers; bytes after the last newline are carried over to the
/// next attempt.
#[derive(Debug, Default)]
pub(crate) struct ScoreReader {
    fragment: Vec<u8>,
}

impl ScoreReader {
    /// Makes exactly one read attempt against `source` and parses every line
    /// completed by it, in arrival order, into `out`.
    ///
    /// The ledger is consumed once per parsed line. A line that does not
    /// parse as a float means the streams have desynchronized and is fatal,
    /// as is end-of-file while lines are still pending. Returns the number
    /// of bytes read.
    pub(crate) fn drain(
        &mut self,
        source: &mut impl Read,
        pending: &mut PendingLines,
        out: &mut VecDeque<f64>,
    ) -> Result<usize, VowpalError> {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        let read = match source.read(&mut chunk) {
            Ok(0) => {
                return Err(VowpalError::EngineEof {
                    pending: pending.get(),
                })
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(VowpalError::PipeRead(err)),
        };
        let chunk = &chunk[..read];

        let Some(last_newline) = chunk.iter().rposition(|&b| b == b'\n') else {
            // Data arrived but no line completed yet.
            self.fragment.extend_from_slice(chunk);
            return Ok(read);
        };

        let mut complete = std::mem::take(&mut self.fragment);
        complete.extend_from_slice(&chunk[..=last_newline]);
        self.fragment.extend_from_slice(&chunk[last_newline + 1..]);

        let mut parsed = 0usize;
        for line in complete.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let score = std::str::from_utf8(line)
                .ok()
                .and_then(|text| text.trim().parse::<f64>().ok())
                .ok_or_else(|| VowpalError::Protocol {
                    line: String::from_utf8_lossy(line).into_owned(),
                })?;
            out.push_back(score);
            parsed += 1;
        }
        pending.consume(parsed)?;
        Ok(read)
    }
}
