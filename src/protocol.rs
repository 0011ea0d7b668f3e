/// Robot transfer protocol — packet format and serialization.
///
/// One UDP datagram carries one packet (big-endian):
///
/// ```text
/// [0..4]  Connection id (u32)
/// [4..6]  Sequence number (u16)
/// [6..8]  Acknowledgement number (u16)
/// [8]     Flag
/// [9..]   Data (up to 255 bytes)
/// ```
///
/// 9-byte header + up to 255 bytes payload = 264 bytes max.

use std::fmt;

use crate::error::TransferError;

/// Header size in bytes.
pub const HEADER_LEN: usize = 9;

/// Maximum payload bytes per packet; also the chunk size of a full window slot.
pub const MAX_DATA_LEN: usize = 255;

/// Maximum datagram size (header + payload).
pub const MAX_PACKET_LEN: usize = HEADER_LEN + MAX_DATA_LEN;

/// Sliding window size, in packets. 8 packets of up to 255 bytes = 2040.
pub const WINDOW_SIZE: usize = 8;

/// Packet flags. Exactly one may be set; 0 marks data and ack packets.
pub const FLAG_EMPTY: u8 = 0x00;
pub const FLAG_RST: u8 = 0x01;
pub const FLAG_FIN: u8 = 0x02;
pub const FLAG_SYN: u8 = 0x04;

/// Transfer direction, selected by the one-byte SYN payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Download,
    Upload,
}

impl Mode {
    /// The mode selector byte carried in the initial packet.
    pub fn selector(self) -> u8 {
        match self {
            Mode::Download => 0x01,
            Mode::Upload => 0x02,
        }
    }
}

/// A parsed packet. The flag byte is kept raw so that handlers can still
/// read the connection id off a packet carrying an invalid flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub conn_id: u32,
    pub seq: u16,
    pub ack: u16,
    pub flag: u8,
    pub data: Vec<u8>,
}

impl Packet {
    /// The handshake opener: no connection id yet, SYN, one mode byte.
    pub fn initial(mode: Mode) -> Self {
        Packet {
            conn_id: 0,
            seq: 0,
            ack: 0,
            flag: FLAG_SYN,
            data: vec![mode.selector()],
        }
    }

    /// A data packet carrying a file chunk at the given wire seq.
    pub fn data(conn_id: u32, seq: u16, payload: Vec<u8>) -> Self {
        Packet {
            conn_id,
            seq,
            ack: 0,
            flag: FLAG_EMPTY,
            data: payload,
        }
    }

    /// A cumulative acknowledgement of the given wire offset.
    pub fn ack(conn_id: u32, ack: u16) -> Self {
        Packet {
            conn_id,
            seq: 0,
            ack,
            flag: FLAG_EMPTY,
            data: Vec::new(),
        }
    }

    /// A FIN. In download mode the server's last seq is echoed in the ack
    /// field; in upload mode the final byte offset travels in the seq field.
    pub fn fin(conn_id: u32, last_seq: u16, mode: Mode) -> Self {
        let (seq, ack) = match mode {
            Mode::Download => (0, last_seq),
            Mode::Upload => (last_seq, 0),
        };
        Packet {
            conn_id,
            seq,
            ack,
            flag: FLAG_FIN,
            data: Vec::new(),
        }
    }

    /// A reset for the given connection id.
    pub fn rst(conn_id: u32) -> Self {
        Packet {
            conn_id,
            seq: 0,
            ack: 0,
            flag: FLAG_RST,
            data: Vec::new(),
        }
    }

    /// Serialize to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len());
        buf.extend_from_slice(&self.conn_id.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.push(self.flag);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parse from wire format. Fails on datagrams shorter than the header.
    pub fn decode(buf: &[u8]) -> Result<Self, TransferError> {
        if buf.len() < HEADER_LEN {
            return Err(TransferError::Malformed { len: buf.len() });
        }
        let conn_id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let seq = u16::from_be_bytes([buf[4], buf[5]]);
        let ack = u16::from_be_bytes([buf[6], buf[7]]);
        let flag = buf[8];
        Ok(Packet {
            conn_id,
            seq,
            ack,
            flag,
            data: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// True for a usable response to the initial packet. The mode byte is
    /// deliberately not matched against the requested direction.
    pub fn is_valid_initial_response(&self) -> bool {
        self.conn_id != 0 && self.flag == FLAG_SYN && self.seq == 0 && self.data.len() == 1
    }

    /// True if the flag byte is one of the four singletons.
    pub fn has_valid_flag(&self) -> bool {
        matches!(self.flag, FLAG_EMPTY | FLAG_RST | FLAG_FIN | FLAG_SYN)
    }

    /// False if the packet shape calls for resetting the connection.
    pub fn is_valid(&self) -> bool {
        if self.flag == FLAG_FIN && !self.data.is_empty() {
            return false;
        }
        self.has_valid_flag()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connID: {:x} seq: {} ack: {} flag: {} data: {}",
            self.conn_id,
            self.seq,
            self.ack,
            self.flag,
            hex::encode(&self.data)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_data_packet() {
        let pkt = Packet::data(0xDEADBEEF, 510, vec![1, 2, 3, 4, 5]);
        let parsed = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn roundtrip_full_payload() {
        let pkt = Packet::data(7, 0, vec![0xAB; MAX_DATA_LEN]);
        let bytes = pkt.encode();
        assert_eq!(bytes.len(), MAX_PACKET_LEN);
        assert_eq!(Packet::decode(&bytes).unwrap(), pkt);
    }

    #[test]
    fn reject_short_datagram() {
        let err = Packet::decode(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, TransferError::Malformed { len: 8 }));
    }

    #[test]
    fn header_only_decodes_to_empty_data() {
        let pkt = Packet::decode(&Packet::rst(42).encode()).unwrap();
        assert_eq!(pkt.conn_id, 42);
        assert_eq!(pkt.flag, FLAG_RST);
        assert!(pkt.data.is_empty());
    }

    #[test]
    fn initial_packet_shape() {
        let pkt = Packet::initial(Mode::Download);
        assert_eq!(pkt.conn_id, 0);
        assert_eq!(pkt.seq, 0);
        assert_eq!(pkt.ack, 0);
        assert_eq!(pkt.flag, FLAG_SYN);
        assert_eq!(pkt.data, vec![0x01]);
        assert_eq!(Packet::initial(Mode::Upload).data, vec![0x02]);
    }

    #[test]
    fn fin_places_offset_by_mode() {
        let down = Packet::fin(1, 2040, Mode::Download);
        assert_eq!((down.seq, down.ack), (0, 2040));
        let up = Packet::fin(1, 865, Mode::Upload);
        assert_eq!((up.seq, up.ack), (865, 0));
        assert!(down.data.is_empty() && up.data.is_empty());
    }

    #[test]
    fn initial_response_validation() {
        let mut resp = Packet {
            conn_id: 0x12345678,
            seq: 0,
            ack: 0,
            flag: FLAG_SYN,
            data: vec![0x01],
        };
        assert!(resp.is_valid_initial_response());
        // any one-byte payload is accepted
        resp.data = vec![0x7F];
        assert!(resp.is_valid_initial_response());
        resp.conn_id = 0;
        assert!(!resp.is_valid_initial_response());
        resp.conn_id = 1;
        resp.seq = 1;
        assert!(!resp.is_valid_initial_response());
        resp.seq = 0;
        resp.data = vec![];
        assert!(!resp.is_valid_initial_response());
    }

    #[test]
    fn flag_validation() {
        let mut pkt = Packet::rst(1);
        assert!(pkt.has_valid_flag() && pkt.is_valid());
        pkt.flag = FLAG_FIN | FLAG_SYN;
        assert!(!pkt.has_valid_flag());
        pkt.flag = FLAG_FIN;
        pkt.data = vec![1];
        assert!(!pkt.is_valid());
    }
}
