use std::io::{self, Write};

use crate::{pending::PendingLines, VowpalError};

/// Outbound half of the pipe pair.
///
/// Retains whatever the kernel did not accept and replays it byte-for-byte
/// ahead of any new lines, so the stream on the wire is identical no matter
/// how the kernel split the writes.
#[derive(Debug, Default)]
pub(crate) struct LineWriter {
    unwritten: Vec<u8>,
}

impl LineWriter {
    pub(crate) fn has_remainder(&self) -> bool {
        !self.unwritten.is_empty()
    }

    /// Queues `lines` behind any unwritten remainder and makes exactly one
    /// write attempt against `sink`.
    ///
    /// The pending ledger grows by `lines.len()` regardless of how many
    /// bytes the kernel accepted; the remainder buffer, not the ledger,
    /// absorbs partial writes. A line containing a newline would
    /// desynchronize the framing and is rejected before any byte is
    /// buffered. Returns the number of bytes accepted.
    pub(crate) fn send(
        &mut self,
        sink: &mut impl Write,
        lines: &[String],
        pending: &mut PendingLines,
    ) -> Result<usize, VowpalError> {
        for line in lines {
            if line.contains('\n') {
                return Err(VowpalError::EmbeddedNewline { line: line.clone() });
            }
        }

        let mut payload = std::mem::take(&mut self.unwritten);
        for line in lines {
            payload.extend_from_slice(line.as_bytes());
            payload.push(b'\n');
        }
        if payload.is_empty() {
            return Ok(0);
        }

        let written = match sink.write(&payload) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => 0,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => 0,
            Err(err) => return Err(VowpalError::PipeWrite(err)),
        };
        if written < payload.len() {
            payload.drain(..written);
            self.unwritten = payload;
        }

        pending.add(lines.len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingLines;
    use crate::testutil::ScriptedSink;

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn empty_buffer_all_written() {
        let mut writer = LineWriter::default();
        let mut pending = PendingLines::default();
        let mut sink = ScriptedSink::new(&[Some(24)]);

        let written = writer
            .send(&mut sink, &lines(&["|a u2 |b u2", "|a u3 |b u3"]), &mut pending)
            .unwrap();

        assert_eq!(written, 24);
        assert_eq!(sink.wire, b"|a u2 |b u2\n|a u3 |b u3\n");
        assert!(!writer.has_remainder());
        assert_eq!(pending.get(), 2);
    }

    #[test]
    fn nonempty_buffer_all_written() {
        let mut writer = LineWriter {
            unwritten: b"|a u1 |b i1\n".to_vec(),
        };
        let mut pending = PendingLines::default();
        let mut sink = ScriptedSink::new(&[Some(36)]);

        writer
            .send(&mut sink, &lines(&["|a u2 |b u2", "|a u3 |b u3"]), &mut pending)
            .unwrap();

        assert_eq!(sink.wire, b"|a u1 |b i1\n|a u2 |b u2\n|a u3 |b u3\n");
        assert!(!writer.has_remainder());
        assert_eq!(pending.get(), 2);
    }

    #[test]
    fn empty_buffer_partially_written() {
        let mut writer = LineWriter::default();
        let mut pending = PendingLines::default();
        let mut sink = ScriptedSink::new(&[Some(12)]);

        writer
            .send(&mut sink, &lines(&["|a u2 |b u2", "|a u3 |b u3"]), &mut pending)
            .unwrap();

        assert_eq!(sink.wire, b"|a u2 |b u2\n");
        assert_eq!(writer.unwritten, b"|a u3 |b u3\n");
        assert_eq!(pending.get(), 2);
    }

    #[test]
    fn nonempty_buffer_partially_written() {
        let mut writer = LineWriter {
            unwritten: b"|a u1 |b i1\n".to_vec(),
        };
        let mut pending = PendingLines::default();
        let mut sink = ScriptedSink::new(&[Some(12)]);

        writer
            .send(&mut sink, &lines(&["|a u2 |b u2", "|a u3 |b u3"]), &mut pending)
            .unwrap();

        assert_eq!(sink.wire, b"|a u1 |b i1\n");
        assert_eq!(writer.unwritten, b"|a u2 |b u2\n|a u3 |b u3\n");
        assert_eq!(pending.get(), 2);
    }

    #[test]
    fn system_buffer_full_counts_lines_anyway() {
        let mut writer = LineWriter {
            unwritten: b"|a u1 |b i1\n".to_vec(),
        };
        let mut pending = PendingLines::default();
        let mut sink = ScriptedSink::new(&[None]);

        let written = writer
            .send(&mut sink, &lines(&["|a u2 |b u2", "|a u3 |b u3"]), &mut pending)
            .unwrap();

        assert_eq!(written, 0);
        assert!(sink.wire.is_empty());
        assert_eq!(writer.unwritten, b"|a u1 |b i1\n|a u2 |b u2\n|a u3 |b u3\n");
        // The ledger tracks lines, not bytes: +2 even though nothing moved.
        assert_eq!(pending.get(), 2);
    }

    #[test]
    fn nothing_to_write_is_a_noop() {
        let mut writer = LineWriter::default();
        let mut pending = PendingLines::default();
        let mut sink = ScriptedSink::new(&[]);

        let written = writer.send(&mut sink, &[], &mut pending).unwrap();

        assert_eq!(written, 0);
        assert!(sink.writes.is_empty());
        assert_eq!(pending.get(), 0);
    }

    #[test]
    fn split_writes_reproduce_the_single_write_stream() {
        let texts = ["|a u2 |b u2", "|a u3 |b u3"];
        let mut single = ScriptedSink::new(&[Some(24)]);
        let mut writer = LineWriter::default();
        let mut pending = PendingLines::default();
        writer.send(&mut single, &lines(&texts), &mut pending).unwrap();

        for splits in [[24, 0, 0], [10, 10, 4], [1, 22, 1]] {
            let mut writer = LineWriter::default();
            let mut pending = PendingLines::default();
            let mut sink = ScriptedSink::new(&[Some(splits[0]), Some(splits[1]), Some(splits[2])]);
            writer.send(&mut sink, &lines(&texts), &mut pending).unwrap();
            while writer.has_remainder() {
                writer.send(&mut sink, &[], &mut pending).unwrap();
            }
            assert_eq!(sink.wire, single.wire);
            assert_eq!(pending.get(), 2);
        }
    }

    #[test]
    fn embedded_newline_is_rejected_before_buffering() {
        let mut writer = LineWriter::default();
        let mut pending = PendingLines::default();
        let mut sink = ScriptedSink::new(&[]);

        match writer.send(&mut sink, &lines(&["|a u1\n|a u2"]), &mut pending) {
            Err(VowpalError::EmbeddedNewline { line }) => assert_eq!(line, "|a u1\n|a u2"),
            other => panic!("expected embedded newline rejection, got {other:?}"),
        }
        assert!(!writer.has_remainder());
        assert_eq!(pending.get(), 0);
    }
}
