use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

/// Errors that may occur while driving the `vw` engine.
///
/// None of these are retried internally: once the byte streams may have
/// desynchronized, a result could be attributed to the wrong input line, so
/// every failure here ends the session.
#[derive(Debug, Error)]
pub enum VowpalError {
    #[error("vw binary `{binary}` could not be spawned: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set O_NONBLOCK on vw {pipe} pipe: {source}")]
    SetNonBlocking {
        pipe: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resize vw stdin pipe buffer: {source}")]
    SetPipeBufferSize {
        #[source]
        source: std::io::Error,
    },
    #[error("argument `{arg}` is managed by the client and must not appear in vw_args")]
    ReservedArg { arg: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("composed vw line contains an embedded newline: {line:?}")]
    EmbeddedNewline { line: String },
    #[error("failed writing to vw stdin: {0}")]
    PipeWrite(#[source] std::io::Error),
    #[error("failed reading from vw stdout: {0}")]
    PipeRead(#[source] std::io::Error),
    #[error("vw emitted a line that does not parse as a prediction: {line:?}")]
    Protocol { line: String },
    #[error("pending-line accounting went negative ({consumed} consumed with {pending} pending)")]
    LedgerUnderflow { pending: usize, consumed: usize },
    #[error("vw closed its stdout with {pending} lines still pending")]
    EngineEof { pending: usize },
    #[error("failed to parse explanation: {reason}")]
    Explanation { reason: String },
    #[error("failed to wait for vw process: {source}")]
    Wait {
        #[source]
        source: std::io::Error,
    },
    #[error("vw did not exit within {timeout:?} after its stdin was closed")]
    CloseTimeout { timeout: Duration },
    #[error("vw exited with {status:?}")]
    NonZeroExit { status: ExitStatus },
    #[error("internal error: missing stdin pipe")]
    StdinUnavailable,
    #[error("internal error: missing stdout pipe")]
    StdoutUnavailable,
    #[error("training is not supported on the non-blocking client, use the blocking client")]
    TrainUnsupported,
    #[error("client was built write-only, predictions are unavailable")]
    WriteOnlyClient,
    #[error("client is in audit mode, only explain_line is available")]
    AuditOnly,
    #[error("explain_line requires a client built with audit mode")]
    NotInAuditMode,
    #[error("batch acknowledgements are outstanding, a synchronous request would desynchronize the stream")]
    PendingBatches,
}
