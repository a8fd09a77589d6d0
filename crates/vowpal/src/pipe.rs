use std::io;
use std::os::unix::io::AsRawFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::VowpalError;

/// Switches a child pipe descriptor to non-blocking mode, so reads and
/// writes report `WouldBlock` instead of parking the calling thread.
pub(crate) fn set_nonblocking(fd: &impl AsRawFd, pipe: &'static str) -> Result<(), VowpalError> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(|errno| VowpalError::SetNonBlocking {
        pipe,
        source: io::Error::from(errno),
    })?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(|errno| VowpalError::SetNonBlocking {
        pipe,
        source: io::Error::from(errno),
    })?;
    Ok(())
}

/// Resizes the kernel buffer of the engine's stdin pipe. A bigger buffer
/// lets more batches queue before writes start reporting `WouldBlock`.
#[cfg(target_os = "linux")]
pub(crate) fn set_pipe_buffer_size(fd: &impl AsRawFd, bytes: usize) -> Result<(), VowpalError> {
    let bytes = nix::libc::c_int::try_from(bytes).map_err(|_| VowpalError::SetPipeBufferSize {
        source: io::Error::new(io::ErrorKind::InvalidInput, "pipe buffer size out of range"),
    })?;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETPIPE_SZ(bytes)).map_err(|errno| {
        VowpalError::SetPipeBufferSize {
            source: io::Error::from(errno),
        }
    })?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_pipe_buffer_size(_fd: &impl AsRawFd, _bytes: usize) -> Result<(), VowpalError> {
    Err(VowpalError::SetPipeBufferSize {
        source: io::Error::new(io::ErrorKind::Unsupported, "F_SETPIPE_SZ is Linux-only"),
    })
}
