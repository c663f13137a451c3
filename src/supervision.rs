//! Supervision frame exchange.
//!
//! Supervision frames are the fixed 5-byte control frames (SET, UA, DISC, RR,
//! REJ).  Sending one is a single write; receiving one is a scan over the
//! inbound byte stream driven by [`SupervisionParser`], which silently drops
//! anything that is not a well-formed frame from the expected address and
//! realigns on the next delimiter.

use crate::frame::{self, bcc1, Address, Control, FLAG};
use crate::link::LinkError;
use crate::timer::RetransmitTimer;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Start,
    Flag,
    Address,
    Control,
    Bcc,
}

/// Byte-at-a-time recogniser for supervision frames.
#[derive(Debug)]
pub struct SupervisionParser {
    expected: Address,
    state: ParseState,
    control: u8,
    bcc: u8,
}

impl SupervisionParser {
    pub fn new(expected: Address) -> Self {
        Self {
            expected,
            state: ParseState::Start,
            control: 0,
            bcc: 0,
        }
    }

    /// Feed one byte; returns the control field once a valid frame completes.
    pub fn push(&mut self, byte: u8) -> Option<Control> {
        let address = self.expected.to_byte();
        self.state = match self.state {
            ParseState::Start if byte == FLAG => ParseState::Flag,
            ParseState::Start => ParseState::Start,

            ParseState::Flag if byte == address => ParseState::Address,
            ParseState::Flag if byte == FLAG => ParseState::Flag,
            ParseState::Flag => ParseState::Start,

            // A delimiter inside the header means the frame was cut short;
            // treat it as the start of the next one.
            ParseState::Address | ParseState::Control if byte == FLAG => ParseState::Flag,
            ParseState::Address => {
                self.control = byte;
                ParseState::Control
            }
            ParseState::Control => {
                self.bcc = byte;
                ParseState::Bcc
            }

            ParseState::Bcc if byte == FLAG => {
                if self.bcc == bcc1(address, self.control) {
                    if let Some(control) = Control::from_byte(self.control) {
                        if control.is_supervision() {
                            self.state = ParseState::Start;
                            return Some(control);
                        }
                    }
                }
                log::trace!(
                    "[link] dropped malformed supervision frame C=0x{:02x} BCC=0x{:02x}",
                    self.control,
                    self.bcc
                );
                ParseState::Flag
            }
            ParseState::Bcc => ParseState::Start,
        };
        None
    }
}

/// Write one supervision frame.  Succeeds only if all five bytes were accepted.
pub async fn send_supervision<T: Transport>(
    transport: &mut T,
    address: Address,
    control: Control,
) -> Result<(), LinkError> {
    let bytes = frame::encode_supervision(address, control);
    let written = transport.write_bytes(&bytes).await?;
    if written != bytes.len() {
        return Err(LinkError::ShortWrite {
            written,
            expected: bytes.len(),
        });
    }
    log::debug!("[link] → {control}");
    Ok(())
}

/// Wait for a supervision frame from `expected`.
///
/// With a timer, returns `Ok(None)` as soon as it has fired; without one,
/// blocks until a frame arrives or the transport fails.
pub async fn recv_supervision<T: Transport>(
    transport: &mut T,
    expected: Address,
    timer: Option<&RetransmitTimer>,
) -> Result<Option<Control>, LinkError> {
    let mut parser = SupervisionParser::new(expected);
    loop {
        if timer.is_some_and(RetransmitTimer::fired) {
            return Ok(None);
        }
        if let Some(byte) = transport.read_byte().await? {
            if let Some(control) = parser.push(byte) {
                log::debug!("[link] ← {control}");
                return Ok(Some(control));
            }
        }
    }
}
