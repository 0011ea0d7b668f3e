/// Download side: reorder window and the receive loop.
///
/// ```text
/// [recv] ---> [window] ---> [foto.png]
/// datagram     8 slots       contiguous
/// filter       indexed by    prefix is
/// by conn id   offset        drained
/// ```
///
/// The window holds up to 8 out-of-order chunks. Slot i belongs to the chunk
/// whose logical offset is `written + 255 * i`; whenever slot 0 fills, the
/// contiguous prefix drains to the file and the window slides. The ack sent
/// back is always the cumulative byte count written so far.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::connection::Connection;
use crate::error::TransferError;
use crate::protocol::{Mode, Packet, FLAG_EMPTY, FLAG_FIN, FLAG_RST, WINDOW_SIZE};
use crate::seq;

/// Where the downloaded photo lands, overwriting any previous run.
pub const PHOTO_FILENAME: &str = "foto.png";

/// The 8-slot reorder buffer and the count of bytes already flushed.
pub struct ReceiveWindow {
    slots: VecDeque<Option<Vec<u8>>>,
    written: u64,
}

impl ReceiveWindow {
    pub fn new() -> Self {
        ReceiveWindow {
            slots: VecDeque::from(vec![None; WINDOW_SIZE]),
            written: 0,
        }
    }

    /// Cumulative bytes flushed; equals the next expected logical seq.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// The ack value for the current state.
    pub fn ack(&self) -> u16 {
        seq::wire(self.written)
    }

    /// Store an arriving chunk if it lands in the window on an empty slot.
    /// Duplicates and out-of-window seqs are dropped; returns whether the
    /// chunk was kept.
    pub fn accept(&mut self, wire_seq: u16, data: Vec<u8>) -> bool {
        match seq::window_slot(wire_seq, self.written) {
            Some(slot) if self.slots[slot].is_none() => {
                self.slots[slot] = Some(data);
                true
            }
            _ => false,
        }
    }

    /// Flush the contiguous prefix, sliding the window over it. Returns the
    /// number of bytes written.
    pub fn drain_into<W: Write>(&mut self, out: &mut W) -> io::Result<usize> {
        let mut drained = 0;
        loop {
            let chunk = match self.slots.front_mut().and_then(Option::take) {
                Some(chunk) => chunk,
                None => break,
            };
            self.slots.pop_front();
            out.write_all(&chunk)?;
            self.written += chunk.len() as u64;
            drained += chunk.len();
            self.slots.push_back(None);
        }
        Ok(drained)
    }
}

impl Default for ReceiveWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// What a completed download looked like.
pub struct DownloadResult {
    pub total_bytes: u64,
    /// Packets dropped as duplicates or out-of-window strays.
    pub discarded: u64,
    pub elapsed: Duration,
    pub throughput_bps: u64,
}

/// Pull the photo. Runs single-threaded: block on the socket, slot the
/// chunk, drain, ack, until the server's FIN.
pub fn run_download(conn: &Connection, output: &Path) -> Result<DownloadResult, TransferError> {
    let mut out = BufWriter::new(File::create(output)?);
    let mut window = ReceiveWindow::new();
    let mut discarded: u64 = 0;
    let start = Instant::now();

    loop {
        let packet = match conn.recv(None) {
            Ok(p) => p,
            // a single short datagram is not worth dying over
            Err(TransferError::Malformed { .. }) => continue,
            Err(e) => return Err(e),
        };
        if packet.conn_id != conn.conn_id() {
            continue;
        }
        match packet.flag {
            FLAG_FIN => {
                conn.send_packet(&Packet::fin(conn.conn_id(), packet.seq, Mode::Download))?;
                break;
            }
            FLAG_RST => {
                out.flush()?;
                conn.close();
                return Err(TransferError::ResetByPeer);
            }
            FLAG_EMPTY if !packet.data.is_empty() => {
                if !window.accept(packet.seq, packet.data) {
                    discarded += 1;
                }
                window.drain_into(&mut out)?;
                conn.send_packet(&Packet::ack(conn.conn_id(), window.ack()))?;
            }
            // dataless EMPTY or a stray SYN: nothing for us
            _ => {}
        }
    }

    out.flush()?;
    conn.close();
    let elapsed = start.elapsed();
    let throughput_bps = if elapsed.as_secs_f64() > 0.0 {
        (window.written() as f64 / elapsed.as_secs_f64()) as u64
    } else {
        0
    };
    tracing::info!(
        bytes = window.written(),
        discarded,
        "download complete in {:.1}s ({} B/s)",
        elapsed.as_secs_f64(),
        throughput_bps
    );
    Ok(DownloadResult {
        total_bytes: window.written(),
        discarded,
        elapsed,
        throughput_bps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_DATA_LEN;

    fn chunk(fill: u8, len: usize) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn in_order_delivery_drains_immediately() {
        let mut window = ReceiveWindow::new();
        let mut out = Vec::new();
        for i in 0..4u8 {
            let wire = seq::wire(u64::from(i) * MAX_DATA_LEN as u64);
            assert!(window.accept(wire, chunk(i, MAX_DATA_LEN)));
            window.drain_into(&mut out).unwrap();
        }
        assert_eq!(window.written(), 4 * MAX_DATA_LEN as u64);
        assert_eq!(out.len(), 4 * MAX_DATA_LEN);
        assert_eq!(&out[..MAX_DATA_LEN], &chunk(0, MAX_DATA_LEN)[..]);
        assert_eq!(&out[3 * MAX_DATA_LEN..], &chunk(3, MAX_DATA_LEN)[..]);
    }

    #[test]
    fn reversed_window_drains_in_one_burst() {
        let mut window = ReceiveWindow::new();
        let mut out = Vec::new();
        for i in (0..WINDOW_SIZE).rev() {
            let wire = seq::wire((i * MAX_DATA_LEN) as u64);
            assert!(window.accept(wire, chunk(i as u8, MAX_DATA_LEN)));
            window.drain_into(&mut out).unwrap();
            if i > 0 {
                // nothing contiguous yet
                assert_eq!(window.written(), 0);
            }
        }
        assert_eq!(window.written(), (WINDOW_SIZE * MAX_DATA_LEN) as u64);
        for i in 0..WINDOW_SIZE {
            let start = i * MAX_DATA_LEN;
            assert!(out[start..start + MAX_DATA_LEN].iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn duplicate_chunk_never_moves_written() {
        let mut window = ReceiveWindow::new();
        let mut out = Vec::new();
        assert!(window.accept(255, chunk(1, MAX_DATA_LEN)));
        // same slot again while still buffered
        assert!(!window.accept(255, chunk(9, MAX_DATA_LEN)));
        window.drain_into(&mut out).unwrap();
        assert_eq!(window.written(), 0);
        // deliver the head, drain both, then replay the old seq
        assert!(window.accept(0, chunk(0, MAX_DATA_LEN)));
        window.drain_into(&mut out).unwrap();
        assert_eq!(window.written(), 2 * MAX_DATA_LEN as u64);
        assert!(!window.accept(255, chunk(9, MAX_DATA_LEN)));
        assert_eq!(window.written(), 2 * MAX_DATA_LEN as u64);
        assert!(out[MAX_DATA_LEN..].iter().all(|&b| b == 1));
    }

    #[test]
    fn short_final_chunk() {
        let mut window = ReceiveWindow::new();
        let mut out = Vec::new();
        assert!(window.accept(0, chunk(7, 100)));
        window.drain_into(&mut out).unwrap();
        assert_eq!(window.written(), 100);
        assert_eq!(window.ack(), 100);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn three_hundred_packets_across_the_wrap() {
        // a transfer whose tail starts at logical 65025 and wraps at 65536
        let mut window = ReceiveWindow {
            slots: VecDeque::from(vec![None; WINDOW_SIZE]),
            written: 65_025,
        };
        let mut out = Vec::new();
        let mut last_ack = window.ack();
        for i in 0..300u64 {
            let logical = 65_025 + i * MAX_DATA_LEN as u64;
            assert!(window.accept(seq::wire(logical), chunk((i % 251) as u8, MAX_DATA_LEN)));
            window.drain_into(&mut out).unwrap();
            // acks advance monotonically modulo 65536
            let ack = window.ack();
            assert_eq!(
                u64::from(ack.wrapping_sub(last_ack)),
                MAX_DATA_LEN as u64,
                "packet {}",
                i
            );
            last_ack = ack;
        }
        assert_eq!(out.len(), 300 * MAX_DATA_LEN);
        assert_eq!(window.written(), 65_025 + 300 * MAX_DATA_LEN as u64);
        for (i, piece) in out.chunks(MAX_DATA_LEN).enumerate() {
            assert!(piece.iter().all(|&b| b == (i % 251) as u8), "gap at chunk {}", i);
        }
    }
}
