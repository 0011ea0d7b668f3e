/// Wrapping 16-bit sequence arithmetic.
///
/// The wire carries the low 16 bits of an unbounded byte offset. Both sides
/// track a running reference (bytes written for the receiver, bytes acked for
/// the sender) that offsets never fall below, so a wire value lifts to the
/// smallest logical value at or above the reference that is congruent to it
/// modulo 65536.

use crate::protocol::{MAX_DATA_LEN, WINDOW_SIZE};

/// Lift a wire value onto the logical offset line against `reference`.
#[inline]
pub fn lift(wire: u16, reference: u64) -> u64 {
    let delta = wire.wrapping_sub(reference as u16);
    reference + u64::from(delta)
}

/// Project a logical offset back to its wire representation.
#[inline]
pub fn wire(logical: u64) -> u16 {
    logical as u16
}

/// Map an arriving wire seq to its slot in the window starting at
/// `reference`. Chunks within a window start at multiples of 255 from the
/// reference; anything misaligned or beyond the window is not ours.
pub fn window_slot(wire_seq: u16, reference: u64) -> Option<usize> {
    let delta = usize::from(wire_seq.wrapping_sub(reference as u16));
    if delta % MAX_DATA_LEN != 0 {
        return None;
    }
    let slot = delta / MAX_DATA_LEN;
    (slot < WINDOW_SIZE).then_some(slot)
}
