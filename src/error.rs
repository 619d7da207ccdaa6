use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors detected while encoding or decoding a single datagram.
///
/// On the receive path these are local to one datagram: the ack listener logs the frame and
///  keeps reading, it never tears down the loop over a malformed datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The datagram ended before the field being read was complete.
    #[error("datagram truncated while reading {0}")]
    Truncated(&'static str),

    /// The length field disagrees with the number of bytes that actually arrived after it.
    #[error("length field declares {declared} bytes, datagram carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The ack host in the ack block is not valid UTF-8.
    #[error("ack host is not valid UTF-8")]
    HostNotUtf8,

    /// The ack host does not fit the one-byte length field of the ack block.
    #[error("ack host must fit into 255 bytes, was {0}")]
    AckHostTooLong(usize),

    /// The frame body does not fit the u32 length field.
    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLong(usize),
}

/// Errors surfaced to callers of the send operations.
#[derive(Debug, Error)]
pub enum SendError {
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The deadline passed before enough distinct receivers acknowledged the send. This is the
    ///  expected outcome of a lost datagram or a silent peer, not a fault in the local process.
    #[error("no acknowledgment within {timeout:?}: got {received} of {required} required acks")]
    AckTimeout {
        timeout: Duration,
        required: usize,
        received: usize,
    },

    /// Binding, resolving or sending failed at the OS level. Surfaced immediately, never retried.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The handler was stopped while this send was waiting for acknowledgment.
    #[error("handler stopped while waiting for acknowledgment")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, SendError>;
