//! Scripted pipe endpoints for exercising the buffering machinery without
//! a child process.

use std::collections::VecDeque;
use std::io;

/// Accepts a scripted number of bytes per write call; `None` simulates a
/// full pipe (would-block).
pub(crate) struct ScriptedSink {
    accepts: VecDeque<Option<usize>>,
    /// Every byte the "kernel" accepted, in order.
    pub(crate) wire: Vec<u8>,
    /// Payload length of each write attempt.
    pub(crate) writes: Vec<usize>,
}

impl ScriptedSink {
    pub(crate) fn new(accepts: &[Option<usize>]) -> Self {
        Self {
            accepts: accepts.iter().copied().collect(),
            wire: Vec::new(),
            writes: Vec::new(),
        }
    }
}

impl io::Write for ScriptedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.len());
        match self.accepts.pop_front().expect("unexpected write attempt") {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(n) => {
                let n = n.min(buf.len());
                self.wire.extend_from_slice(&buf[..n]);
                Ok(n)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Yields a scripted chunk per read call; `None` simulates an empty pipe
/// (would-block), an exhausted script simulates end-of-file.
pub(crate) struct ScriptedSource {
    chunks: VecDeque<Option<Vec<u8>>>,
}

impl ScriptedSource {
    pub(crate) fn new(chunks: &[Option<&[u8]>]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.map(|b| b.to_vec())).collect(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl io::Read for ScriptedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.chunks.pop_front() {
            None => Ok(0),
            Some(None) => Err(io::ErrorKind::WouldBlock.into()),
            Some(Some(chunk)) => {
                assert!(chunk.len() <= buf.len(), "scripted chunk exceeds read buffer");
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
        }
    }
}
