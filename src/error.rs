/// Errors surfaced by the transfer engine.
///
/// Timeout and Malformed are consumed inside the protocol loops; the rest
/// bubble up to the binary, which reports them and exits non-zero.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum TransferError {
    /// Socket or file I/O failed in a way the protocol cannot retry.
    Io(io::Error),
    /// No datagram arrived within the deadline.
    Timeout,
    /// A datagram shorter than the 9-byte header.
    Malformed { len: usize },
    /// All 20 handshake attempts went unanswered; a reset has been sent.
    HandshakeFailed,
    /// The same data seq was emitted 20 times in a row without progress.
    StuckTransmission { seq: u16 },
    /// The server reset the connection.
    ResetByPeer,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Io(e) => write!(f, "I/O error: {}", e),
            TransferError::Timeout => write!(f, "timed out waiting for a packet"),
            TransferError::Malformed { len } => {
                write!(f, "received a {}-byte datagram, shorter than the header", len)
            }
            TransferError::HandshakeFailed => {
                write!(f, "handshake failed after 20 attempts, connection reset")
            }
            TransferError::StuckTransmission { seq } => {
                write!(f, "sending a packet with seq {} 20 times in a row", seq)
            }
            TransferError::ResetByPeer => write!(f, "server has reset the connection"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::Io(e)
    }
}
