/// Connection state and the handshake controller.
///
/// A connection starts with id 0 and acquires its non-zero id from the first
/// valid SYN response, after which the id is frozen. The handshake runs a
/// receiver worker blocked on the socket alongside the main thread, which
/// re-emits the initial packet every 100 ms for up to 20 attempts before
/// giving up with a reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::TransferError;
use crate::protocol::{Mode, Packet, FLAG_EMPTY};
use crate::transport::Transport;

/// Local port packets are sent from.
pub const LOCAL_PORT: u16 = 4000;

/// Remote port packets are sent to.
pub const REMOTE_PORT: u16 = 4000;

/// Deadline for one handshake attempt.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// How many initial packets to emit before resetting.
pub const HANDSHAKE_RETRIES: u32 = 20;

/// How many consecutive identical-seq data sends are tolerated.
const MAX_SEQ_REPEATS: u32 = 20;

/// Duplicate-send bookkeeping: data packets only, reset on a fresh seq.
struct SendGuard {
    last_data_seq: Option<u16>,
    repeats: u32,
}

pub struct Connection {
    transport: Transport,
    conn_id: u32,
    closed: AtomicBool,
    guard: Mutex<SendGuard>,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Connection {
            transport,
            conn_id: 0,
            closed: AtomicBool::new(false),
            guard: Mutex::new(SendGuard {
                last_data_seq: None,
                repeats: 0,
            }),
        }
    }

    /// The id adopted during the handshake; 0 before `open` succeeds.
    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Monotonic: once closed, a connection never reopens.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Send through the duplicate-send guard. Emitting the same data seq 20
    /// times in a row means the window is stuck and the transfer is hopeless.
    /// Only data packets participate; handshake and control traffic repeat
    /// legitimately.
    pub fn send_packet(&self, packet: &Packet) -> Result<bool, TransferError> {
        if packet.flag == FLAG_EMPTY && !packet.data.is_empty() {
            let mut guard = self.guard.lock();
            guard.repeats = if guard.last_data_seq == Some(packet.seq) {
                guard.repeats + 1
            } else {
                1
            };
            guard.last_data_seq = Some(packet.seq);
            if guard.repeats > MAX_SEQ_REPEATS {
                return Err(TransferError::StuckTransmission { seq: packet.seq });
            }
        }
        Ok(self.transport.send(packet))
    }

    pub fn recv(&self, deadline: Option<Duration>) -> Result<Packet, TransferError> {
        self.transport.recv(deadline)
    }

    /// Run the handshake: emit the initial packet, adopt the conn id from the
    /// first valid SYN response, retry up to 20 times on silence or garbage.
    /// A failed handshake resets the connection and aborts.
    pub fn open(&mut self, mode: Mode) -> Result<(), TransferError> {
        let this: &Connection = self;
        let stop = AtomicBool::new(false);
        let (tx, rx) = crossbeam_channel::bounded::<u32>(1);

        let adopted = thread::scope(|s| -> Result<Option<u32>, TransferError> {
            s.spawn(|| {
                // worker: deliver the first valid response, drop the rest
                while !stop.load(Ordering::Relaxed) {
                    match this.transport.recv(Some(HANDSHAKE_TIMEOUT)) {
                        Ok(p) if p.is_valid_initial_response() => {
                            let _ = tx.send(p.conn_id);
                            return;
                        }
                        Ok(_)
                        | Err(TransferError::Timeout)
                        | Err(TransferError::Malformed { .. }) => {}
                        // a broken socket: the retry loop will run dry
                        Err(_) => return,
                    }
                }
            });

            let mut adopted = None;
            for attempt in 1..=HANDSHAKE_RETRIES {
                this.send_packet(&Packet::initial(mode))?;
                match rx.recv_timeout(HANDSHAKE_TIMEOUT) {
                    Ok(id) => {
                        adopted = Some(id);
                        break;
                    }
                    Err(_) => {
                        tracing::debug!("no valid response to initial packet (attempt {})", attempt);
                    }
                }
            }
            stop.store(true, Ordering::Relaxed);
            Ok(adopted)
        })?;

        match adopted {
            Some(id) => {
                self.conn_id = id;
                tracing::info!("connection established, connId: {:x}", id);
                Ok(())
            }
            None => {
                self.send_packet(&Packet::rst(0))?;
                Err(TransferError::HandshakeFailed)
            }
        }
    }
}
