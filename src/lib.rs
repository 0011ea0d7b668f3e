/// Robot transfer protocol — reliable photo download and firmware upload
/// over UDP.
///
/// The robot server speaks a small stop-and-go-back-N protocol on port 4000:
/// 9-byte big-endian headers, up to 255 data bytes per datagram, an 8-packet
/// sliding window, and 16-bit wrapping sequence numbers that count cumulative
/// bytes. A SYN handshake assigns the connection id, EMPTY packets carry data
/// and acks, FIN closes a transfer, RST aborts it.
///
/// Download runs a single-threaded reorder loop into `foto.png`; upload runs
/// an ack receiver and a retransmit ticker over a shared send window.

pub mod connection;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod transport;

pub use connection::{Connection, LOCAL_PORT, REMOTE_PORT};
pub use error::TransferError;
pub use protocol::{Mode, Packet, WINDOW_SIZE};
pub use receiver::{run_download, DownloadResult, PHOTO_FILENAME};
pub use sender::{run_upload, UploadResult};
pub use transport::Transport;
