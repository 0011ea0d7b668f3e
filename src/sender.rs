/// Upload side: sliding send window and the two upload threads.
///
/// ```text
/// [ack receiver] --+-- mutex --+-- [resend ticker]
/// recv 100ms       |           |   sleep until
/// slide window     v           |   last_sent + 100ms
/// refill + burst  window       +-> re-burst window
/// ```
///
/// The window holds up to 8 chunks read sequentially from the firmware file;
/// the head chunk always starts at `requested_seq`, the cumulative offset the
/// server has acked. An advancing ack slides the window, refills it from the
/// file and bursts it; a 100 ms lull re-bursts the whole window (go-back-N).
/// An empty window turns the burst into a FIN carrying the final offset.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::error::TransferError;
use crate::protocol::{Mode, Packet, FLAG_EMPTY, FLAG_FIN, FLAG_RST, MAX_DATA_LEN, WINDOW_SIZE};
use crate::seq;

/// A silent server triggers a full-window retransmit after this long.
pub const RESEND_TIMEOUT: Duration = Duration::from_millis(100);

/// What an incoming ack did to the window.
#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// The window slid forward by this many bytes.
    Advanced(u64),
    /// Duplicate or stale; nothing changed.
    Stale,
}

/// The in-flight FIFO plus the server's cumulative progress mark.
pub struct SendWindow {
    chunks: VecDeque<Vec<u8>>,
    requested_seq: u64,
    last_sent: Instant,
    eof: bool,
    /// High-water mark of emitted offsets; emissions below it are resends.
    highest_sent: u64,
    retransmits: u64,
}

impl SendWindow {
    pub fn new() -> Self {
        SendWindow {
            chunks: VecDeque::with_capacity(WINDOW_SIZE),
            requested_seq: 0,
            last_sent: Instant::now(),
            eof: false,
            highest_sent: 0,
            retransmits: 0,
        }
    }

    /// Cumulative bytes the server has acked; the head chunk starts here.
    pub fn requested_seq(&self) -> u64 {
        self.requested_seq
    }

    /// True once the file is exhausted and every chunk is acked.
    pub fn is_drained(&self) -> bool {
        self.eof && self.chunks.is_empty()
    }

    fn buffered_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// Top the window back up to 8 chunks. Chunks are 255 bytes each; a
    /// shorter one can only be the final chunk of the file.
    pub fn refill<R: Read>(&mut self, input: &mut R) -> io::Result<()> {
        while !self.eof && self.chunks.len() < WINDOW_SIZE {
            let mut buf = [0u8; MAX_DATA_LEN];
            let filled = read_chunk(input, &mut buf)?;
            if filled == 0 {
                self.eof = true;
                break;
            }
            if filled < MAX_DATA_LEN {
                self.eof = true;
            }
            self.chunks.push_back(buf[..filled].to_vec());
        }
        Ok(())
    }

    /// Apply a cumulative ack. The lift is taken against `requested_seq`;
    /// anything at the mark is a duplicate, anything past the buffered bytes
    /// is a stale value from before the last wrap, and both are ignored.
    pub fn on_ack(&mut self, wire_ack: u16) -> AckOutcome {
        let ack_log = seq::lift(wire_ack, self.requested_seq);
        let advance = ack_log - self.requested_seq;
        if advance == 0 || advance > self.buffered_bytes() {
            return AckOutcome::Stale;
        }
        let mut remaining = advance;
        while remaining > 0 {
            match self.chunks.pop_front() {
                Some(chunk) => remaining = remaining.saturating_sub(chunk.len() as u64),
                None => break,
            }
        }
        self.requested_seq = ack_log;
        AckOutcome::Advanced(advance)
    }
}

impl Default for SendWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Read up to `buf.len()` bytes, short only at end of file.
fn read_chunk<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Window state plus the file cursor, shared by both upload threads.
struct UploadState {
    window: SendWindow,
    input: BufReader<File>,
}

/// Burst the whole window in one go, or a FIN once there is nothing left.
/// The caller holds the state lock, so a burst is never interleaved with an
/// ack moving `requested_seq`.
fn send_window(conn: &Connection, window: &mut SendWindow) -> Result<(), TransferError> {
    if window.chunks.is_empty() {
        if !conn.is_closed() {
            let fin = Packet::fin(conn.conn_id(), seq::wire(window.requested_seq), Mode::Upload);
            conn.send_packet(&fin)?;
        }
    } else {
        let mut packet_seq = window.requested_seq;
        let mut resent = 0u64;
        for chunk in &window.chunks {
            if packet_seq < window.highest_sent {
                resent += 1;
            }
            conn.send_packet(&Packet::data(conn.conn_id(), seq::wire(packet_seq), chunk.clone()))?;
            packet_seq += chunk.len() as u64;
        }
        window.retransmits += resent;
        window.highest_sent = window.highest_sent.max(packet_seq);
    }
    window.last_sent = Instant::now();
    Ok(())
}

/// What a completed upload looked like.
pub struct UploadResult {
    pub total_bytes: u64,
    pub retransmits: u64,
    pub elapsed: Duration,
    pub throughput_bps: u64,
}

/// Push the firmware file. Blocks until the server closes the transfer.
pub fn run_upload(conn: &Connection, input_path: &Path) -> Result<UploadResult, TransferError> {
    let input = BufReader::new(File::open(input_path)?);
    let state = Mutex::new(UploadState {
        window: SendWindow::new(),
        input,
    });
    let start = Instant::now();

    {
        let mut st = state.lock();
        let UploadState { window, input } = &mut *st;
        window.refill(input)?;
        send_window(conn, window)?;
    }

    let (ack_result, tick_result) = thread::scope(|s| {
        let ack_handle = s.spawn(|| {
            let result = ack_loop(conn, &state);
            // unblock the ticker whatever happened
            conn.close();
            result
        });
        let tick_handle = s.spawn(|| {
            let result = resend_loop(conn, &state);
            conn.close();
            result
        });
        (join_thread(ack_handle), join_thread(tick_handle))
    });

    ack_result?;
    tick_result?;

    let st = state.lock();
    let total_bytes = st.window.requested_seq();
    let retransmits = st.window.retransmits;
    let elapsed = start.elapsed();
    let throughput_bps = if elapsed.as_secs_f64() > 0.0 {
        (total_bytes as f64 / elapsed.as_secs_f64()) as u64
    } else {
        0
    };
    tracing::info!(
        bytes = total_bytes,
        retransmits,
        "upload complete in {:.1}s ({} B/s)",
        elapsed.as_secs_f64(),
        throughput_bps
    );
    Ok(UploadResult {
        total_bytes,
        retransmits,
        elapsed,
        throughput_bps,
    })
}

fn join_thread(handle: thread::ScopedJoinHandle<'_, Result<(), TransferError>>) -> Result<(), TransferError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(TransferError::Io(io::Error::other("upload thread panicked"))))
}

/// Blocks on the socket and drives the window off incoming acks. The 100 ms
/// receive deadline bounds how long it takes to notice the connection closing
/// underneath us.
fn ack_loop(conn: &Connection, state: &Mutex<UploadState>) -> Result<(), TransferError> {
    while !conn.is_closed() {
        let packet = match conn.recv(Some(RESEND_TIMEOUT)) {
            Ok(p) => p,
            Err(TransferError::Timeout) | Err(TransferError::Malformed { .. }) => continue,
            Err(e) => return Err(e),
        };
        if packet.conn_id != conn.conn_id() || !packet.is_valid() {
            conn.send_packet(&Packet::rst(packet.conn_id))?;
            continue;
        }
        match packet.flag {
            FLAG_RST => {
                tracing::warn!("server has reset the connection");
                conn.close();
                return Err(TransferError::ResetByPeer);
            }
            FLAG_FIN => {
                conn.close();
                return Ok(());
            }
            FLAG_EMPTY => {
                let mut st = state.lock();
                let UploadState { window, input } = &mut *st;
                if let AckOutcome::Advanced(_) = window.on_ack(packet.ack) {
                    window.refill(input)?;
                    send_window(conn, window)?;
                }
            }
            // a stray but well-formed SYN: a late handshake duplicate
            _ => {}
        }
    }
    Ok(())
}

/// Re-bursts the window whenever 100 ms pass without an emission. Sleeps up
/// to the deadline rather than polling.
fn resend_loop(conn: &Connection, state: &Mutex<UploadState>) -> Result<(), TransferError> {
    while !conn.is_closed() {
        let wait = {
            let st = state.lock();
            RESEND_TIMEOUT.checked_sub(st.window.last_sent.elapsed())
        };
        match wait {
            Some(remaining) => thread::sleep(remaining),
            None => {
                let mut st = state.lock();
                if st.window.last_sent.elapsed() >= RESEND_TIMEOUT && !conn.is_closed() {
                    send_window(conn, &mut st.window)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn refill_cuts_exact_chunks_with_short_tail() {
        let data = patterned(865); // 255 + 255 + 255 + 100
        let mut window = SendWindow::new();
        window.refill(&mut Cursor::new(&data)).unwrap();
        let lens: Vec<usize> = window.chunks.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![255, 255, 255, 100]);
        assert!(window.eof);
        assert_eq!(window.buffered_bytes(), 865);
    }

    #[test]
    fn refill_stops_at_window_size() {
        let data = patterned(WINDOW_SIZE * MAX_DATA_LEN + 500);
        let mut cursor = Cursor::new(&data);
        let mut window = SendWindow::new();
        window.refill(&mut cursor).unwrap();
        assert_eq!(window.chunks.len(), WINDOW_SIZE);
        assert!(!window.eof);
        assert!(window.chunks.iter().all(|c| c.len() == MAX_DATA_LEN));
    }

    #[test]
    fn ack_slides_and_refills() {
        let data = patterned(3000);
        let mut cursor = Cursor::new(&data);
        let mut window = SendWindow::new();
        window.refill(&mut cursor).unwrap();

        assert_eq!(window.on_ack(510), AckOutcome::Advanced(510));
        assert_eq!(window.requested_seq(), 510);
        assert_eq!(window.chunks.len(), WINDOW_SIZE - 2);
        // head chunk is now the one starting at 510
        assert_eq!(window.chunks[0][0], data[510]);

        window.refill(&mut cursor).unwrap();
        assert_eq!(window.chunks.len(), WINDOW_SIZE);
    }

    #[test]
    fn duplicate_and_stale_acks_are_ignored() {
        let data = patterned(3000);
        let mut window = SendWindow::new();
        window.refill(&mut Cursor::new(&data)).unwrap();

        assert_eq!(window.on_ack(255), AckOutcome::Advanced(255));
        // the same ack again
        assert_eq!(window.on_ack(255), AckOutcome::Stale);
        assert_eq!(window.requested_seq(), 255);
        // an ack from before the window start lifts far past the buffered
        // bytes and must not tear the window
        assert_eq!(window.on_ack(100), AckOutcome::Stale);
        assert_eq!(window.requested_seq(), 255);
        assert_eq!(window.chunks.len(), WINDOW_SIZE - 1);
    }

    #[test]
    fn ack_across_the_wrap_boundary() {
        let mut window = SendWindow::new();
        window.requested_seq = 65_450;
        window.chunks = VecDeque::from(vec![vec![1u8; 255], vec![2u8; 255]]);
        window.eof = true;

        // 65450 + 255 = 65705, which wires to 169
        assert_eq!(window.on_ack(169), AckOutcome::Advanced(255));
        assert_eq!(window.requested_seq(), 65_705);
        assert_eq!(window.chunks.len(), 1);
        assert_eq!(window.on_ack(seq::wire(65_960)), AckOutcome::Advanced(255));
        assert!(window.is_drained());
    }

    #[test]
    fn full_ack_drains_the_window() {
        let data = patterned(865);
        let mut window = SendWindow::new();
        window.refill(&mut Cursor::new(&data)).unwrap();
        assert_eq!(window.on_ack(865), AckOutcome::Advanced(865));
        assert!(window.is_drained());
        assert_eq!(window.requested_seq(), 865);
    }

    #[test]
    fn empty_file_is_drained_immediately() {
        let mut window = SendWindow::new();
        window.refill(&mut Cursor::new(Vec::new())).unwrap();
        assert!(window.is_drained());
        assert_eq!(window.requested_seq(), 0);
    }
}
