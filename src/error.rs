//! Error types for the player daemon

use thiserror::Error;

/// Main error type for the daemon.
///
/// Each variant is one kind in the command protocol's failure taxonomy;
/// [`Error::is_client_fault`] decides whether a command acknowledgement
/// reports it as `WHAT` (the client asked for something impossible) or
/// `FAIL` (the server could not do something reasonable).
#[derive(Error, Debug)]
pub enum Error {
    /// An operation needed a loaded file and none was present.
    #[error("no file loaded")]
    NoFile,

    /// A source factory failed to open or parse the file.
    #[error("cannot load file: {0}")]
    Load(String),

    /// The decoder reported a fault mid-stream.
    #[error("decode error: {0}")]
    Decode(String),

    /// A seek target was out of range or the decoder refused it.
    #[error("seek failed: {0}")]
    Seek(String),

    /// A malformed argument (non-numeric position, bad verb, bad arity).
    #[error("{0}")]
    Invalid(String),

    /// TCP bind/listen/accept failure at startup.
    #[error("network error: {0}")]
    Net(String),

    /// The audio device or its stream failed.
    #[error("device error: {0}")]
    Device(String),

    /// Invariant violation; fatal.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is the client's fault (`ACK WHAT`) rather than
    /// the server's (`ACK FAIL`).
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Error::NoFile | Error::Invalid(_))
    }
}

/// Result type alias for the daemon
pub type Result<T> = std::result::Result<T, Error>;
