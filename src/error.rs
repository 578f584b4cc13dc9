// ABOUTME: Error type hierarchy for the stream relay server
// ABOUTME: Layers transport/framing errors under protocol errors under a top-level server error

use thiserror::Error;

/// Errors raised while discovering or transferring a single length-prefixed frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended (or a transport error occurred) after some, but not
    /// all, of a frame's bytes had been read.
    #[error("short read: connection closed mid-frame")]
    ShortRead,

    /// The declared frame length was below the minimum of 8 bytes.
    #[error("frame too small: length {0} is below the 8-byte minimum")]
    FrameTooSmall(u32),

    /// The declared frame length exceeded the configured maximum.
    #[error("frame too large: length {length} exceeds the {max} byte maximum")]
    FrameTooLarge { length: u32, max: u32 },

    /// The underlying socket returned an I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Errors raised while parsing or building a packet body (version, command, payload).
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload ended before a field the command requires could be read.
    #[error("short payload: expected more data for field '{0}'")]
    ShortPayload(&'static str),

    /// The command field did not match any known command identifier.
    #[error("unknown command: {0}")]
    UnknownCommand(u32),

    /// The version field was not the single supported protocol version.
    #[error("version mismatch: expected 1, got {0}")]
    VersionMismatch(u32),
}

/// Errors a session surfaces while handling a single request, after framing succeeded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A command not valid in the session's current role/state.
    #[error("unsupported command in this context: {0}")]
    UnsupportedCommand(u32),

    /// A second producer attempted to attach to a stream that already has one.
    #[error("session already running")]
    AlreadyRunning,

    /// `START_FILE_STREAM_VIEWING` / `RESTORE_STREAMING`: reserved, unimplemented.
    #[error("not implemented")]
    NotImplemented,
}

impl ProtocolError {
    /// Render the text that goes into an `ERROR_STREAMING_RESPONSE` payload.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}

/// Errors that prevent the server from starting or from shutting down cleanly.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}
