/// UDP transport: one socket, one fixed remote endpoint.
///
/// Every packet crossing the socket is traced (`SEND` / `RECV`) in the
/// diagnostic form rendered by `Packet`'s `Display` impl.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::TransferError;
use crate::protocol::{Packet, MAX_PACKET_LEN};

pub struct Transport {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl Transport {
    /// Bind the local port and fix the remote endpoint. Port 0 lets the OS
    /// pick, which the loopback tests rely on.
    pub fn bind(local_port: u16, remote: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))?;
        Ok(Transport { socket, remote })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Serialize and transmit. I/O failures are not fatal at this layer:
    /// the resend machinery covers the loss, so log and report `false`.
    pub fn send(&self, packet: &Packet) -> bool {
        tracing::debug!("SEND {}", packet);
        match self.socket.send_to(&packet.encode(), self.remote) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("send failed: {}", e);
                false
            }
        }
    }

    /// Block for the next datagram, up to `deadline` (or indefinitely with
    /// `None`). Datagrams shorter than the header surface as `Malformed`.
    pub fn recv(&self, deadline: Option<Duration>) -> Result<Packet, TransferError> {
        self.socket.set_read_timeout(deadline)?;
        let mut buf = [0u8; MAX_PACKET_LEN];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _)) => {
                let packet = Packet::decode(&buf[..len])?;
                tracing::debug!("RECV {}", packet);
                Ok(packet)
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Err(TransferError::Timeout)
            }
            Err(e) => Err(TransferError::Io(e)),
        }
    }
}
