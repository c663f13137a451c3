//! Outbound frame state for stop-and-wait reliability.
//!
//! [`Sender`] tracks the alternating sequence bit and the single in-flight
//! information frame.  It does **not** touch the transport;
//! [`crate::link::Link`] calls these methods and owns the actual
//! send/receive loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** frame is in flight at any moment (`unacked`).
//! - A new frame may only be built once `unacked` is `None`.
//! - On RR naming the other bit: flip `next_bit`; clear `unacked`.
//! - On timeout or REJ: resend the same bytes unchanged.  The link's retry
//!   budget counts the transmissions.

use std::time::Instant;

use crate::frame::{self, Address, FrameError, SeqBit};

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// A frame that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Sequence bit carried by the frame.
    pub bit: SeqBit,
    /// Caller-visible payload length (before BCC2 and stuffing).
    pub payload_len: usize,
    /// Wall-clock time of the first transmission.
    pub sent_at: Instant,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one link.
#[derive(Debug, Default)]
pub struct Sender {
    /// Sequence bit the **next** information frame will carry.
    ///
    /// Flips each time an acknowledgment naming the other bit arrives.
    next_bit: SeqBit,

    /// The in-flight frame, or `None` when the sender is idle.
    unacked: Option<InFlight>,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_bit(&self) -> SeqBit {
        self.next_bit
    }

    /// Build the wire bytes for `payload` using the current sequence bit.
    ///
    /// The caller must subsequently call [`Sender::record_sent`] before waiting
    /// for the acknowledgment.
    pub fn build_frame(&self, address: Address, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        frame::encode_information(address, self.next_bit, payload)
    }

    /// Mark a freshly built frame as in flight (first transmission).
    pub fn record_sent(&mut self, payload_len: usize) {
        debug_assert!(
            self.unacked.is_none(),
            "record_sent called while a frame is already in flight"
        );
        self.unacked = Some(InFlight {
            bit: self.next_bit,
            payload_len,
            sent_at: Instant::now(),
        });
    }

    /// Process a positive acknowledgment naming `next`.
    ///
    /// Returns `true` if it covers the in-flight frame (it names the other
    /// bit); the sequence bit then advances.  Returns `false` for a stale
    /// acknowledgment.
    pub fn on_ack(&mut self, next: SeqBit) -> bool {
        match self.unacked {
            Some(ref entry) if next == entry.bit.flip() => {
                self.next_bit = next;
                self.unacked = None;
                true
            }
            _ => false,
        }
    }

    /// Give up on the in-flight frame without advancing the sequence bit.
    ///
    /// A later send reuses the same bit, so a receiver that did get the
    /// abandoned frame treats the next one as a duplicate.
    pub fn abandon(&mut self) -> Option<InFlight> {
        self.unacked.take()
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.unacked.as_ref()
    }

    /// Return to the post-handshake state.
    pub fn reset(&mut self) {
        self.next_bit = SeqBit::Zero;
        self.unacked = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let s = Sender::new();
        assert_eq!(s.next_bit(), SeqBit::Zero);
        assert!(s.in_flight().is_none());
    }

    #[test]
    fn ack_naming_other_bit_advances() {
        let mut s = Sender::new();
        s.record_sent(10);
        assert!(s.on_ack(SeqBit::One));
        assert_eq!(s.next_bit(), SeqBit::One);
        assert!(s.in_flight().is_none());
    }

    #[test]
    fn stale_ack_is_ignored() {
        let mut s = Sender::new();
        s.record_sent(10);
        assert!(!s.on_ack(SeqBit::Zero));
        assert_eq!(s.next_bit(), SeqBit::Zero);
        assert_eq!(s.in_flight().map(|e| e.bit), Some(SeqBit::Zero));
    }

    #[test]
    fn ack_without_frame_in_flight_is_ignored() {
        let mut s = Sender::new();
        assert!(!s.on_ack(SeqBit::One));
        assert_eq!(s.next_bit(), SeqBit::Zero);
    }

    #[test]
    fn bit_after_n_acks_is_n_mod_2() {
        let mut s = Sender::new();
        for n in 1..=7usize {
            s.record_sent(1);
            assert!(s.on_ack(s.next_bit().flip()));
            assert_eq!(s.next_bit(), SeqBit::from(n));
        }
    }

    #[test]
    fn abandon_keeps_the_bit() {
        let mut s = Sender::new();
        s.record_sent(4);

        let dropped = s.abandon().unwrap();
        assert_eq!(dropped.payload_len, 4);
        assert_eq!(dropped.bit, SeqBit::Zero);
        assert_eq!(s.next_bit(), SeqBit::Zero);
        assert!(s.in_flight().is_none());
    }

    #[test]
    fn build_frame_uses_current_bit() {
        let mut s = Sender::new();
        s.record_sent(0);
        s.on_ack(SeqBit::One);
        let f = s.build_frame(Address::Initiator, b"hi").unwrap();
        assert_eq!(f[2], 0x80);
    }
}
