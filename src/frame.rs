//! Wire-format definitions for link-layer frames.
//!
//! Every exchange between peers is a [`Frame`] delimited by [`FLAG`] bytes.
//! This module is responsible for:
//! - Byte stuffing / destuffing so payload bytes never look like delimiters.
//! - The two XOR checksums ([`bcc1`] over the header, [`bcc2`] over the payload).
//! - Building supervision and information frames ready for transmission.
//! - Parsing the bytes found between two delimiters back into a [`Frame`].
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! ```text
//!  supervision:  FLAG | A | C | BCC1 | FLAG
//!  information:  FLAG | A | C | BCC1 | stuffed(payload ++ BCC2) | FLAG
//! ```
//!
//! `A` names the role that originated the frame, `C` the frame kind.  For
//! information, RR and REJ frames the high bit of `C` carries the sequence bit.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

/// Start / end delimiter.
pub const FLAG: u8 = 0x7E;
/// Escape byte introducing a stuffed octet.
pub const ESC: u8 = 0x7D;
/// Mask XORed into an escaped octet.
pub const ESC_MASK: u8 = 0x20;

/// Largest packet a single information frame may carry.
pub const MAX_PAYLOAD_SIZE: usize = 1024;
/// Upper bound on the bytes between two delimiters (worst-case stuffing plus header).
pub const MAX_FRAME_SIZE: usize = 2 * MAX_PAYLOAD_SIZE + 64;
/// Length of a supervision frame on the wire.
pub const SUPERVISION_LEN: usize = 5;

/// Header length inside the delimiters: address, control, BCC1.
const HEADER_LEN: usize = 3;
/// Sequence bit position inside the control byte.
const SEQ_MASK: u8 = 0x80;

// ---------------------------------------------------------------------------
// Header fields
// ---------------------------------------------------------------------------

/// Address field: which side of the link originated the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// Frames sent by the initiator (the side that issues SET).
    Initiator,
    /// Frames sent by the responder.
    Responder,
}

impl Address {
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Initiator => 0x03,
            Self::Responder => 0x01,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::Initiator),
            0x01 => Some(Self::Responder),
            _ => None,
        }
    }
}

/// Alternating one-bit sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeqBit {
    #[default]
    Zero,
    One,
}

impl SeqBit {
    /// The other bit.
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }

    const fn mask(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => SEQ_MASK,
        }
    }

    const fn from_control(byte: u8) -> Self {
        if byte & SEQ_MASK == 0 {
            Self::Zero
        } else {
            Self::One
        }
    }
}

impl From<usize> for SeqBit {
    fn from(n: usize) -> Self {
        if n % 2 == 0 {
            Self::Zero
        } else {
            Self::One
        }
    }
}

impl fmt::Display for SeqBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Control field: the kind of frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Connection request.
    Set,
    /// Unnumbered acknowledgment (connection accept, final teardown ack).
    Ua,
    /// Disconnect request.
    Disc,
    /// Information frame carrying the given sequence bit.
    Info(SeqBit),
    /// Receiver ready: positive acknowledgment naming the next expected bit.
    Rr(SeqBit),
    /// Rejection: the frame with this bit must be resent.
    Rej(SeqBit),
}

impl Control {
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Set => 0x03,
            Self::Ua => 0x07,
            Self::Disc => 0x0B,
            Self::Info(bit) => bit.mask(),
            Self::Rr(bit) => 0x05 | bit.mask(),
            Self::Rej(bit) => 0x01 | bit.mask(),
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        let bit = SeqBit::from_control(byte);
        match byte & !SEQ_MASK {
            0x00 => Some(Self::Info(bit)),
            0x05 => Some(Self::Rr(bit)),
            0x01 => Some(Self::Rej(bit)),
            // SET, UA and DISC never carry a sequence bit.
            0x03 if byte == 0x03 => Some(Self::Set),
            0x07 if byte == 0x07 => Some(Self::Ua),
            0x0B if byte == 0x0B => Some(Self::Disc),
            _ => None,
        }
    }

    /// `true` for every kind that travels without a payload.
    pub const fn is_supervision(self) -> bool {
        !matches!(self, Self::Info(_))
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => write!(f, "SET"),
            Self::Ua => write!(f, "UA"),
            Self::Disc => write!(f, "DISC"),
            Self::Info(bit) => write!(f, "I{bit}"),
            Self::Rr(bit) => write!(f, "RR{bit}"),
            Self::Rej(bit) => write!(f, "REJ{bit}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise while building or parsing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("stuffed output would exceed {capacity} bytes")]
    Overflow { capacity: usize },
    #[error("escape byte at end of frame")]
    DanglingEscape,
    #[error("frame body too short ({0} bytes)")]
    Truncated(usize),
    #[error("frame body exceeds {} bytes", MAX_FRAME_SIZE)]
    FrameTooLong,
    #[error("unexpected address 0x{0:02x}")]
    UnexpectedAddress(u8),
    #[error("unknown control byte 0x{0:02x}")]
    UnknownControl(u8),
    #[error("header checksum mismatch (expected 0x{expected:02x}, found 0x{found:02x})")]
    HeaderChecksum { expected: u8, found: u8 },
    #[error("payload checksum mismatch (expected 0x{expected:02x}, found 0x{found:02x})")]
    PayloadChecksum { expected: u8, found: u8 },
    #[error("payload of {0} bytes exceeds the {}-byte maximum", MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
    #[error("{0} frame carries {1} unexpected trailing bytes")]
    TrailingBytes(Control, usize),
}

// ---------------------------------------------------------------------------
// Checksums and transparency
// ---------------------------------------------------------------------------

/// Header checksum: `address XOR control`.
#[inline]
pub const fn bcc1(address: u8, control: u8) -> u8 {
    address ^ control
}

/// Payload checksum: XOR fold of every byte.
pub fn bcc2(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, b| acc ^ b)
}

/// Escape every [`FLAG`] and [`ESC`] byte in `raw`.
///
/// Fails when the stuffed output would exceed `capacity` bytes.
pub fn stuff(raw: &[u8], capacity: usize) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(raw.len().min(capacity));
    for &byte in raw {
        if byte == FLAG || byte == ESC {
            if out.len() + 2 > capacity {
                return Err(FrameError::Overflow { capacity });
            }
            out.push(ESC);
            out.push(byte ^ ESC_MASK);
        } else {
            if out.len() + 1 > capacity {
                return Err(FrameError::Overflow { capacity });
            }
            out.push(byte);
        }
    }
    Ok(out)
}

/// Reverse [`stuff`].  An [`ESC`] must always be followed by another byte.
pub fn destuff(stuffed: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(stuffed.len());
    let mut bytes = stuffed.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESC {
            let &next = bytes.next().ok_or(FrameError::DanglingEscape)?;
            out.push(next ^ ESC_MASK);
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Frame construction
// ---------------------------------------------------------------------------

/// Build a 5-byte supervision frame.
pub fn encode_supervision(address: Address, control: Control) -> [u8; SUPERVISION_LEN] {
    let a = address.to_byte();
    let c = control.to_byte();
    [FLAG, a, c, bcc1(a, c), FLAG]
}

/// Build a complete information frame carrying `payload` with sequence `bit`.
///
/// BCC2 is appended to the payload before stuffing, so it is protected by the
/// same transparency rules.
pub fn encode_information(
    address: Address,
    bit: SeqBit,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut raw = Vec::with_capacity(payload.len() + 1);
    raw.extend_from_slice(payload);
    raw.push(bcc2(payload));
    let stuffed = stuff(&raw, MAX_FRAME_SIZE - HEADER_LEN)?;

    let a = address.to_byte();
    let c = Control::Info(bit).to_byte();
    let mut frame = Vec::with_capacity(stuffed.len() + HEADER_LEN + 2);
    frame.extend_from_slice(&[FLAG, a, c, bcc1(a, c)]);
    frame.extend_from_slice(&stuffed);
    frame.push(FLAG);
    Ok(frame)
}

// ---------------------------------------------------------------------------
// Frame parsing
// ---------------------------------------------------------------------------

/// A validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Control-only frame (SET, UA, DISC, RR, REJ).
    Supervision(Control),
    /// Data frame with its destuffed, checksum-verified payload.
    Information { bit: SeqBit, payload: Bytes },
}

/// Parse and validate the bytes found between two [`FLAG`] delimiters.
///
/// Three bytes make a supervision frame; anything longer must be an
/// information frame whose destuffed tail ends in a matching BCC2.
pub fn decode_body(body: &[u8], expected: Address) -> Result<Frame, FrameError> {
    if body.len() < HEADER_LEN {
        return Err(FrameError::Truncated(body.len()));
    }
    if body.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLong);
    }

    let (a, c, found) = (body[0], body[1], body[2]);
    if a != expected.to_byte() {
        return Err(FrameError::UnexpectedAddress(a));
    }
    let expected_bcc = bcc1(a, c);
    if found != expected_bcc {
        return Err(FrameError::HeaderChecksum {
            expected: expected_bcc,
            found,
        });
    }
    let control = Control::from_byte(c).ok_or(FrameError::UnknownControl(c))?;

    let tail = &body[HEADER_LEN..];
    match control {
        Control::Info(_) if tail.is_empty() => Err(FrameError::Truncated(body.len())),
        Control::Info(bit) => {
            let mut raw = destuff(tail)?;
            // destuff of a non-empty tail yields at least one byte: BCC2.
            let received = raw.pop().ok_or(FrameError::Truncated(body.len()))?;
            let computed = bcc2(&raw);
            if computed != received {
                return Err(FrameError::PayloadChecksum {
                    expected: computed,
                    found: received,
                });
            }
            if raw.len() > MAX_PAYLOAD_SIZE {
                return Err(FrameError::PayloadTooLarge(raw.len()));
            }
            Ok(Frame::Information {
                bit,
                payload: Bytes::from(raw),
            })
        }
        _ if tail.is_empty() => Ok(Frame::Supervision(control)),
        _ => Err(FrameError::TrailingBytes(control, tail.len())),
    }
}

/// Result of feeding a byte into a [`FrameAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// Bytes found between two delimiters (not yet validated).
    Body(Vec<u8>),
    /// The body grew past [`MAX_FRAME_SIZE`]; the rest is skipped up to the next [`FLAG`].
    Oversized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    /// Waiting for the first delimiter.
    Hunting,
    /// Inside a frame, accumulating body bytes.
    Collecting,
    /// Skipping the remainder of an oversized frame.
    Discarding,
}

/// Byte-at-a-time delimiter tracker for inbound information frames.
///
/// An end delimiter is also treated as a potential start delimiter, and an
/// empty body (two adjacent flags) is skipped, so the assembler realigns on
/// its own after lost or stray bytes.
#[derive(Debug)]
pub struct FrameAssembler {
    state: AssemblerState,
    body: Vec<u8>,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            state: AssemblerState::Hunting,
            body: Vec::new(),
        }
    }

    /// Feed one byte; returns a completed body or an overflow notice.
    pub fn push(&mut self, byte: u8) -> Option<Assembled> {
        match self.state {
            AssemblerState::Hunting => {
                if byte == FLAG {
                    self.state = AssemblerState::Collecting;
                    self.body.clear();
                }
                None
            }
            AssemblerState::Collecting => {
                if byte == FLAG {
                    if self.body.is_empty() {
                        return None;
                    }
                    return Some(Assembled::Body(std::mem::take(&mut self.body)));
                }
                if self.body.len() >= MAX_FRAME_SIZE {
                    self.body.clear();
                    self.state = AssemblerState::Discarding;
                    return Some(Assembled::Oversized);
                }
                self.body.push(byte);
                None
            }
            AssemblerState::Discarding => {
                if byte == FLAG {
                    self.state = AssemblerState::Collecting;
                }
                None
            }
        }
    }
}
