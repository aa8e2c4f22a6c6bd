/// Errors on the socket-level message stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream is no longer aligned on a frame boundary. There is no way
    /// to resynchronize; the connection has to go.
    #[error("stream desynchronized: expected magic \"SH\", found {found:02x?}")]
    Desynchronized { found: [u8; 2] },

    /// A frame declares more payload than this endpoint accepts.
    #[error("frame of {declared} bytes exceeds the {limit}-byte limit")]
    Oversize { declared: usize, limit: usize },

    /// The peer went away, possibly mid-frame.
    #[error("peer closed the stream")]
    Disconnected,

    /// The underlying stream failed.
    #[error("stream I/O failed: {0}")]
    Stream(#[from] std::io::Error),
}

/// Errors decoding an SPI response or a hub protocol message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The buffer is shorter than the fixed response header.
    #[error("message too short ({len} bytes)")]
    MsgTooShort { len: usize },

    /// The declared payload length overruns the buffer.
    #[error("message truncated (declared {declared} bytes, {available} available)")]
    MessageTruncated { declared: usize, available: usize },

    /// A batch sub-record does not start with the expected preamble byte.
    #[error("bad message preamble (0x{found:02x})")]
    Preamble { found: u8 },

    /// The frame declares an unsupported protocol version.
    #[error("unsupported protocol version {found}")]
    Version { found: u8 },

    /// The frame carries a command this side does not accept.
    #[error("unexpected protocol command {found}")]
    Command { found: u8 },
}

pub type Result<T, E = FrameError> = std::result::Result<T, E>;
