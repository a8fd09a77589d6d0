use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::VowpalError;

/// Resolves the engine binary: explicit builder path, then the `VW_BINARY`
/// environment variable, then `vw` on `PATH`.
pub(crate) fn resolve_binary(binary: Option<&Path>) -> PathBuf {
    if let Some(binary) = binary {
        return binary.to_path_buf();
    }
    if let Ok(value) = std::env::var("VW_BINARY") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    PathBuf::from("vw")
}

pub(crate) fn spawn_engine(
    binary: &Path,
    argv: &[String],
    capture_stdout: bool,
) -> Result<Child, VowpalError> {
    let mut command = Command::new(binary);
    command.args(argv).stdin(Stdio::piped()).stdout(if capture_stdout {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    spawn_with_retry(&mut command, binary)
}

fn spawn_with_retry(command: &mut Command, binary: &Path) -> Result<Child, VowpalError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(VowpalError::Spawn {
                    binary: binary.to_path_buf(),
                    source,
                });
            }
        }
    }

    unreachable!("spawn_with_retry should return before exhausting retries")
}

/// Reads the engine's stdout to end-of-file so `wait` cannot deadlock on a
/// full pipe. Tolerates `WouldBlock` on descriptors left in non-blocking
/// mode, bounded by `timeout`. Returns whatever bytes were still queued.
pub(crate) fn drain_to_eof(source: &mut impl Read, timeout: Duration) -> Result<Vec<u8>, VowpalError> {
    let started = Instant::now();
    let mut residue = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match source.read(&mut chunk) {
            Ok(0) => return Ok(residue),
            Ok(n) => residue.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if started.elapsed() > timeout {
                    return Err(VowpalError::CloseTimeout { timeout });
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(VowpalError::PipeRead(err)),
        }
    }
}

/// Waits for the engine to exit after its stdin was closed. The engine is
/// killed if it overruns `timeout`; a non-zero exit status is fatal.
pub(crate) fn wait_for_exit(child: &mut Child, timeout: Duration) -> Result<(), VowpalError> {
    let status = child
        .wait_timeout(timeout)
        .map_err(|source| VowpalError::Wait { source })?;
    let Some(status) = status else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(VowpalError::CloseTimeout { timeout });
    };
    if !status.success() {
        return Err(VowpalError::NonZeroExit { status });
    }
    Ok(())
}

/// Blocking single-line read used by audit mode, where the pipes are left
/// in blocking mode. Reads one byte at a time so nothing past the newline
/// is consumed.
pub(crate) fn read_line_raw(source: &mut impl Read) -> Result<String, VowpalError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match source.read(&mut byte) {
            Ok(0) => {
                if line.is_empty() {
                    return Err(VowpalError::EngineEof { pending: 0 });
                }
                break;
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(VowpalError::PipeRead(err)),
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
