//! Inbound frame state for stop-and-wait reliability.
//!
//! The [`Receiver`] decides what happens to a validated information frame:
//! deliver it (expected bit) or treat it as a duplicate (the peer missed our
//! last acknowledgment).  It also counts consecutive invalid frames so a
//! hopeless channel ends the call instead of rejecting forever.
//!
//! The [`Receiver`] does **not** send anything itself; it returns the
//! acknowledgment that [`crate::link::Link`] must put on the wire.

use crate::config::DEFAULT_MAX_REJECTIONS;
use crate::frame::{Control, SeqBit};

/// What to do with a validated information frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// New data: hand the payload to the caller and send `ack`.
    Deliver { ack: Control },
    /// Already delivered: repeat `ack`, deliver nothing.
    Duplicate { ack: Control },
}

/// Stop-and-wait receive-side state for one link.
#[derive(Debug)]
pub struct Receiver {
    /// Sequence bit of the next frame to deliver.
    expected: SeqBit,
    /// Consecutive duplicates seen (diagnostic).
    duplicates: u32,
    /// Consecutive invalid frames rejected.
    rejections: u32,
    max_rejections: u32,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REJECTIONS)
    }
}

impl Receiver {
    pub fn new(max_rejections: u32) -> Self {
        Self {
            expected: SeqBit::Zero,
            duplicates: 0,
            rejections: 0,
            max_rejections,
        }
    }

    pub fn expected(&self) -> SeqBit {
        self.expected
    }

    pub fn duplicates(&self) -> u32 {
        self.duplicates
    }

    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    /// Classify a valid information frame carrying `bit`.
    pub fn on_frame(&mut self, bit: SeqBit) -> Verdict {
        self.rejections = 0;
        if bit == self.expected {
            self.expected = self.expected.flip();
            self.duplicates = 0;
            Verdict::Deliver {
                ack: Control::Rr(self.expected),
            }
        } else {
            self.duplicates += 1;
            Verdict::Duplicate {
                ack: Control::Rr(self.expected),
            }
        }
    }

    /// Record an invalid frame.
    ///
    /// Returns the rejection to send, or `None` once the limit of consecutive
    /// rejections has been exceeded.
    pub fn on_invalid(&mut self) -> Option<Control> {
        self.rejections += 1;
        if self.rejections > self.max_rejections {
            return None;
        }
        Some(Control::Rej(self.expected))
    }

    /// Return to the post-handshake state.
    pub fn reset(&mut self) {
        self.expected = SeqBit::Zero;
        self.duplicates = 0;
        self.rejections = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_frame_is_delivered_and_acked_with_other_bit() {
        let mut r = Receiver::default();
        assert_eq!(
            r.on_frame(SeqBit::Zero),
            Verdict::Deliver {
                ack: Control::Rr(SeqBit::One)
            }
        );
        assert_eq!(r.expected(), SeqBit::One);
        assert_eq!(
            r.on_frame(SeqBit::One),
            Verdict::Deliver {
                ack: Control::Rr(SeqBit::Zero)
            }
        );
    }

    #[test]
    fn duplicate_repeats_last_ack() {
        let mut r = Receiver::default();
        r.on_frame(SeqBit::Zero);
        // Same frame again: our RR1 was lost.
        assert_eq!(
            r.on_frame(SeqBit::Zero),
            Verdict::Duplicate {
                ack: Control::Rr(SeqBit::One)
            }
        );
        assert_eq!(r.expected(), SeqBit::One);
        assert_eq!(r.duplicates(), 1);

        r.on_frame(SeqBit::One);
        assert_eq!(r.duplicates(), 0);
    }

    #[test]
    fn rejections_name_expected_bit_and_are_bounded() {
        let mut r = Receiver::new(2);
        r.on_frame(SeqBit::Zero);
        assert_eq!(r.on_invalid(), Some(Control::Rej(SeqBit::One)));
        assert_eq!(r.on_invalid(), Some(Control::Rej(SeqBit::One)));
        assert_eq!(r.on_invalid(), None);
    }

    #[test]
    fn valid_frame_resets_rejection_count() {
        let mut r = Receiver::new(1);
        assert!(r.on_invalid().is_some());
        r.on_frame(SeqBit::Zero);
        assert_eq!(r.rejections(), 0);
        assert!(r.on_invalid().is_some());
    }

    #[test]
    fn reset_restores_bit_zero() {
        let mut r = Receiver::default();
        r.on_frame(SeqBit::Zero);
        r.reset();
        assert_eq!(r.expected(), SeqBit::Zero);
    }
}
