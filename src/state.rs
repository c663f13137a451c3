//! Finite-state-machine types.
//!
//! Two layers of state live here:
//! - [`LinkState`]: the lifecycle of a whole [`crate::link::Link`].
//! - [`ExchangeState`]: the progress of one request/reply exchange (SET/UA,
//!   I-frame/RR, DISC/DISC, DISC/UA).  Each [`Exchange`] kind has its own
//!   transition table in [`Exchange::next`]; the link's retry loop feeds it
//!   [`Event`]s and acts on the resulting state.
//!
//! ```text
//!            Transmitted            Reply(match)
//!  Idle ───────────────▶ AwaitingReply ─────────────▶ Success
//!                          │      ▲
//!   TimedOut / Reply(REJ)  │      │ Transmitted
//!                          ▼      │
//!                          Retry ─┘──(budget spent)──▶ Failed
//! ```
//!
//! The transition tables are pure; budget accounting and I/O belong to the
//! caller.

use std::fmt;

use crate::frame::{Control, SeqBit};

/// Lifecycle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No session: before establishment or after teardown.
    #[default]
    Closed,
    /// Handshake complete; data transfer allowed.
    Established,
    /// The peer sent DISC while we were receiving; only `close` remains.
    PeerClosing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Why an exchange gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Every allowed transmission went unanswered or was rejected.
    BudgetExhausted,
    /// The peer asked to disconnect in the middle of a transfer.
    PeerDisconnected,
}

/// Progress of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing sent yet.
    Idle,
    /// Frame sent, timer armed, waiting for the peer.
    AwaitingReply,
    /// The frame must be sent again.
    Retry,
    Success,
    Failed(Failure),
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed(_))
    }
}

/// Inputs to an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Our frame went out on the wire.
    Transmitted,
    /// A valid supervision frame arrived from the peer.
    Reply(Control),
    /// The retransmission timer expired before a useful reply.
    TimedOut,
}

/// The request/reply exchanges a link performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Initiator: SET, expecting UA.
    Establish,
    /// Sender: I-frame with `bit`, expecting RR naming the other bit.
    Transfer { bit: SeqBit },
    /// Initiator: DISC, expecting the peer's DISC.
    Disconnect,
    /// Responder: DISC, expecting the initiator's final UA.
    AwaitFinalAck,
}

impl Exchange {
    /// Transition table shared by every exchange kind.
    pub fn next(self, state: ExchangeState, event: Event) -> ExchangeState {
        use ExchangeState::{AwaitingReply, Idle, Retry};

        match (state, event) {
            (Idle | Retry, Event::Transmitted) => AwaitingReply,
            (AwaitingReply, Event::TimedOut) => Retry,
            (AwaitingReply, Event::Reply(control)) => self.on_reply(control),
            (other, _) => other,
        }
    }

    /// Per-exchange reaction to a reply while awaiting one.
    fn on_reply(self, control: Control) -> ExchangeState {
        use ExchangeState::{AwaitingReply, Failed, Retry, Success};

        match (self, control) {
            (Self::Establish, Control::Ua) => Success,

            (Self::Transfer { bit }, Control::Rr(next)) if next == bit.flip() => Success,
            (Self::Transfer { .. }, Control::Rej(_)) => Retry,
            (Self::Transfer { .. }, Control::Disc) => Failed(Failure::PeerDisconnected),

            (Self::Disconnect, Control::Disc) => Success,

            (Self::AwaitFinalAck, Control::Ua) => Success,
            // The initiator repeated DISC: our reply was lost.
            (Self::AwaitFinalAck, Control::Disc) => Retry,

            // Stale acknowledgments and anything else: keep waiting.
            _ => AwaitingReply,
        }
    }

    /// Control field of the frame this exchange transmits.
    pub fn request(self) -> Control {
        match self {
            Self::Establish => Control::Set,
            Self::Transfer { bit } => Control::Info(bit),
            Self::Disconnect | Self::AwaitFinalAck => Control::Disc,
        }
    }

    /// The reply that completes this exchange, for logging.
    pub fn expected_reply(self) -> Control {
        match self {
            Self::Establish | Self::AwaitFinalAck => Control::Ua,
            Self::Transfer { bit } => Control::Rr(bit.flip()),
            Self::Disconnect => Control::Disc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::ExchangeState::*;

    fn reply(exchange: Exchange, control: Control) -> ExchangeState {
        exchange.next(AwaitingReply, Event::Reply(control))
    }

    #[test]
    fn transmission_moves_to_awaiting_reply() {
        for ex in [
            Exchange::Establish,
            Exchange::Transfer { bit: SeqBit::One },
            Exchange::Disconnect,
            Exchange::AwaitFinalAck,
        ] {
            assert_eq!(ex.next(Idle, Event::Transmitted), AwaitingReply);
            assert_eq!(ex.next(Retry, Event::Transmitted), AwaitingReply);
            assert_eq!(ex.next(AwaitingReply, Event::TimedOut), Retry);
        }
    }

    #[test]
    fn establish_completes_only_on_ua() {
        assert_eq!(reply(Exchange::Establish, Control::Ua), Success);
        assert_eq!(reply(Exchange::Establish, Control::Set), AwaitingReply);
        assert_eq!(reply(Exchange::Establish, Control::Disc), AwaitingReply);
    }

    #[test]
    fn transfer_table() {
        let ex = Exchange::Transfer { bit: SeqBit::Zero };
        assert_eq!(reply(ex, Control::Rr(SeqBit::One)), Success);
        // Stale acknowledgment naming our own bit.
        assert_eq!(reply(ex, Control::Rr(SeqBit::Zero)), AwaitingReply);
        assert_eq!(reply(ex, Control::Rej(SeqBit::Zero)), Retry);
        assert_eq!(reply(ex, Control::Rej(SeqBit::One)), Retry);
        assert_eq!(
            reply(ex, Control::Disc),
            Failed(Failure::PeerDisconnected)
        );
        assert_eq!(reply(ex, Control::Ua), AwaitingReply);
    }

    #[test]
    fn teardown_tables() {
        assert_eq!(reply(Exchange::Disconnect, Control::Disc), Success);
        assert_eq!(
            reply(Exchange::Disconnect, Control::Rr(SeqBit::One)),
            AwaitingReply
        );
        assert_eq!(reply(Exchange::AwaitFinalAck, Control::Ua), Success);
        assert_eq!(reply(Exchange::AwaitFinalAck, Control::Disc), Retry);
    }

    #[test]
    fn terminal_states_absorb_events() {
        let ex = Exchange::Establish;
        assert_eq!(ex.next(Success, Event::TimedOut), Success);
        assert_eq!(
            ex.next(Failed(Failure::BudgetExhausted), Event::Transmitted),
            Failed(Failure::BudgetExhausted)
        );
        assert!(Success.is_terminal());
        assert!(!Retry.is_terminal());
    }

    #[test]
    fn expected_replies() {
        assert_eq!(
            Exchange::Transfer { bit: SeqBit::One }.expected_reply(),
            Control::Rr(SeqBit::Zero)
        );
        assert_eq!(Exchange::Disconnect.expected_reply(), Control::Disc);
        assert_eq!(
            Exchange::Transfer { bit: SeqBit::One }.request(),
            Control::Info(SeqBit::One)
        );
        assert_eq!(Exchange::AwaitFinalAck.request(), Control::Disc);
    }

    #[test]
    fn link_state_defaults_to_closed() {
        assert_eq!(LinkState::default(), LinkState::Closed);
        assert_eq!(LinkState::PeerClosing.to_string(), "PeerClosing");
    }
}
