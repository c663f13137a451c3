//! Stop-and-wait link: handshake, data transfer and teardown.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  open / send / receive / close
//!      ▼
//!  Link ──── RetransmitTimer  (one-shot expiry, polled between reads)
//!    ├── Sender   (send bit, in-flight frame)
//!    ├── Receiver (expected bit, duplicate / rejection counters)
//!    ├── FrameAssembler (delimiter hunting for inbound I-frames)
//!    └── T: Transport (owned byte channel)
//! ```
//!
//! Every request/reply exchange (SET/UA, I/RR, DISC/DISC, DISC/UA) goes
//! through one retry loop (`run_exchange`), which feeds the pure tables in
//! [`crate::state`] and does the I/O, timer and budget bookkeeping.
//!
//! ```ignore
//! let config = LinkConfig::new(Role::Initiator, "/dev/ttyS0");
//! let mut link = Link::open_device(config).await?;
//! link.send(b"hello").await?;
//! link.close().await?;
//! ```

use std::io;

use bytes::Bytes;
use thiserror::Error;

use crate::config::{ConfigError, LinkConfig, Role};
use crate::frame::{
    self, decode_body, Assembled, Control, Frame, FrameAssembler, FrameError, SeqBit,
    MAX_PAYLOAD_SIZE,
};
use crate::receiver::{Receiver, Verdict};
use crate::sender::Sender;
use crate::state::{Event, Exchange, ExchangeState, Failure, LinkState};
use crate::supervision::{recv_supervision, send_supervision};
use crate::timer::{RetransmitTimer, RetryBudget};
use crate::transport::{self, DeviceTransport, Transport};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by [`Link`] operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The channel failed; the session cannot continue.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("short write: channel accepted {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("payload of {0} bytes exceeds the maximum of {}", MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),

    /// The peer asked to disconnect; only [`Link::close`] remains.
    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("no acknowledgment after {attempts} transmissions")]
    BudgetExhausted { attempts: u32 },

    #[error("more than {0} consecutive invalid frames")]
    TooManyRejections(u32),

    #[error("link is not established")]
    NotEstablished,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Cumulative counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames written by this endpoint, supervision frames included.
    pub frames_sent: u64,
    pub retransmissions: u64,
    /// Exchanges that waited out the timer.
    pub timeouts: u64,
    pub rejections_sent: u64,
    pub rejections_received: u64,
    /// Information frames received a second time.
    pub duplicates: u64,
    pub packets_delivered: u64,
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// One end of an established (or closing) serial link.
///
/// Obtain one via [`Link::open`] or [`Link::open_device`]; it owns its
/// transport until [`Link::close`] releases it.
#[derive(Debug)]
pub struct Link<T> {
    config: LinkConfig,
    transport: T,
    state: LinkState,
    sender: Sender,
    receiver: Receiver,
    assembler: FrameAssembler,
    timer: RetransmitTimer,
    stats: LinkStats,
}

impl Link<DeviceTransport> {
    /// Open the device named by `config.channel` and establish the link.
    pub async fn open_device(config: LinkConfig) -> Result<Self, LinkError> {
        config.validate()?;
        let device =
            transport::open(&config.channel, config.baud_rate, config.poll_interval).await?;
        Self::open(config, device).await
    }
}

impl<T: Transport> Link<T> {
    // -----------------------------------------------------------------------
    // Establishment
    // -----------------------------------------------------------------------

    /// Run the SET/UA handshake over `transport`.
    ///
    /// The configuration is validated before any byte is written.  An
    /// initiator that exhausts its budget closes the transport and returns
    /// [`LinkError::BudgetExhausted`]; a responder waits without a deadline.
    pub async fn open(config: LinkConfig, transport: T) -> Result<Self, LinkError> {
        config.validate()?;

        let mut link = Self {
            receiver: Receiver::new(config.max_rejections),
            config,
            transport,
            state: LinkState::Closed,
            sender: Sender::new(),
            assembler: FrameAssembler::new(),
            timer: RetransmitTimer::new(),
            stats: LinkStats::default(),
        };
        log::info!(
            "[link] opening {} as {}",
            link.config.channel,
            link.config.role
        );

        match link.config.role {
            Role::Initiator => {
                let set = frame::encode_supervision(link.local(), Control::Set);
                if let Err(e) = link.run_exchange(Exchange::Establish, &set).await {
                    log::warn!("[link] establishment failed: {e}");
                    link.release_transport().await;
                    return Err(e);
                }
            }
            Role::Responder => {
                link.wait_for(Control::Set).await?;
                link.reply(Control::Ua).await?;
            }
        }

        link.sender.reset();
        link.receiver.reset();
        link.state = LinkState::Established;
        log::info!("[link] established");
        Ok(link)
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Deliver one packet reliably.  Returns the payload length.
    ///
    /// Oversized payloads fail before any I/O.  On
    /// [`LinkError::BudgetExhausted`] the session stays open and the send
    /// bit does not advance.
    pub async fn send(&mut self, payload: &[u8]) -> Result<usize, LinkError> {
        self.ensure_established()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge(payload.len()));
        }

        let bit = self.sender.next_bit();
        let wire = self.sender.build_frame(self.local(), payload)?;
        self.sender.record_sent(payload.len());

        match self.run_exchange(Exchange::Transfer { bit }, &wire).await {
            Ok(attempts) => {
                if let Some(entry) = self.sender.in_flight() {
                    log::debug!(
                        "[link] I{bit} acknowledged after {attempts} transmission(s), {:?}",
                        entry.sent_at.elapsed()
                    );
                }
                if !self.sender.on_ack(bit.flip()) {
                    log::warn!("[link] acknowledgment for I{bit} did not match the frame in flight");
                }
                Ok(payload.len())
            }
            Err(e) => {
                self.sender.abandon();
                if matches!(e, LinkError::PeerDisconnected) {
                    self.state = LinkState::PeerClosing;
                }
                Err(e)
            }
        }
    }

    /// Wait for the next information frame.
    ///
    /// Returns `Ok(Some(payload))` for new data and `Ok(None)` for a duplicate
    /// (acknowledged again, not redelivered).  Invalid frames are rejected
    /// and the wait continues.  A DISC from the peer yields
    /// [`LinkError::PeerDisconnected`]; call [`Link::close`] next.
    pub async fn receive(&mut self) -> Result<Option<Bytes>, LinkError> {
        self.ensure_established()?;
        let peer = self.config.role.peer_address();

        loop {
            let Some(byte) = self.transport.read_byte().await? else {
                continue;
            };
            let decoded = match self.assembler.push(byte) {
                None => continue,
                Some(Assembled::Body(body)) => decode_body(&body, peer),
                Some(Assembled::Oversized) => Err(FrameError::FrameTooLong),
            };

            match decoded {
                Ok(Frame::Information { bit, payload }) => match self.receiver.on_frame(bit) {
                    Verdict::Deliver { ack } => {
                        log::debug!("[link] ← I{bit} len={}", payload.len());
                        self.reply(ack).await?;
                        self.stats.packets_delivered += 1;
                        return Ok(Some(payload));
                    }
                    Verdict::Duplicate { ack } => {
                        log::debug!("[link] ← I{bit} duplicate, acknowledging again");
                        self.stats.duplicates += 1;
                        self.reply(ack).await?;
                        return Ok(None);
                    }
                },
                Ok(Frame::Supervision(Control::Set)) => {
                    // Our UA was lost; the peer is still establishing.
                    log::debug!("[link] ← SET while established");
                    self.reply(Control::Ua).await?;
                }
                Ok(Frame::Supervision(Control::Disc)) => {
                    log::info!("[link] ← DISC, peer is closing");
                    self.state = LinkState::PeerClosing;
                    return Err(LinkError::PeerDisconnected);
                }
                Ok(Frame::Supervision(other)) => {
                    log::debug!("[link] ← {other} ignored while receiving");
                }
                Err(e) => {
                    log::debug!("[link] ← invalid frame: {e}");
                    let Some(rej) = self.receiver.on_invalid() else {
                        log::warn!("[link] rejection limit reached");
                        return Err(LinkError::TooManyRejections(self.config.max_rejections));
                    };
                    self.stats.rejections_sent += 1;
                    self.reply(rej).await?;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Run the DISC/DISC/UA teardown and release the transport.
    ///
    /// The transport is closed on every path, including failures.  Closing
    /// an already closed link is a no-op.
    pub async fn close(&mut self) -> Result<(), LinkError> {
        if self.state == LinkState::Closed {
            return Ok(());
        }
        log::info!("[link] closing ({})", self.state);

        let result = match self.config.role {
            Role::Initiator => self.close_as_initiator().await,
            Role::Responder => self.close_as_responder().await,
        };
        self.state = LinkState::Closed;
        let released = self.transport.close().await;

        match result {
            Ok(()) => {
                released?;
                log::info!("[link] closed");
                Ok(())
            }
            Err(e) => {
                log::warn!("[link] teardown failed: {e}");
                Err(e)
            }
        }
    }

    async fn close_as_initiator(&mut self) -> Result<(), LinkError> {
        let disc = frame::encode_supervision(self.local(), Control::Disc);
        self.run_exchange(Exchange::Disconnect, &disc).await?;
        self.reply(Control::Ua).await
    }

    async fn close_as_responder(&mut self) -> Result<(), LinkError> {
        if self.state != LinkState::PeerClosing {
            self.wait_for(Control::Disc).await?;
        }
        let disc = frame::encode_supervision(self.local(), Control::Disc);
        self.run_exchange(Exchange::AwaitFinalAck, &disc).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Sequence bit the next `send` will use.
    pub fn send_bit(&self) -> SeqBit {
        self.sender.next_bit()
    }

    /// Sequence bit the next delivered frame must carry.
    pub fn expected_bit(&self) -> SeqBit {
        self.receiver.expected()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn local(&self) -> frame::Address {
        self.config.role.local_address()
    }

    fn ensure_established(&self) -> Result<(), LinkError> {
        match self.state {
            LinkState::Established => Ok(()),
            LinkState::PeerClosing => Err(LinkError::PeerDisconnected),
            LinkState::Closed => Err(LinkError::NotEstablished),
        }
    }

    /// Transmit `wire` and drive `exchange` until it succeeds or fails.
    ///
    /// Returns the number of transmissions it took.  The timer is cancelled
    /// on every exit.
    async fn run_exchange(&mut self, exchange: Exchange, wire: &[u8]) -> Result<u32, LinkError> {
        let outcome = self.drive_exchange(exchange, wire).await;
        self.timer.cancel();
        outcome
    }

    async fn drive_exchange(&mut self, exchange: Exchange, wire: &[u8]) -> Result<u32, LinkError> {
        let peer = self.config.role.peer_address();
        let mut budget = RetryBudget::new(self.config.max_retransmissions);
        let mut state = ExchangeState::Idle;

        while !state.is_terminal() {
            state = match state {
                ExchangeState::Idle | ExchangeState::Retry => {
                    if !budget.try_consume() {
                        ExchangeState::Failed(Failure::BudgetExhausted)
                    } else {
                        if state == ExchangeState::Retry {
                            self.stats.retransmissions += 1;
                        }
                        self.write_frame(wire).await?;
                        self.timer.arm(self.config.timeout());
                        log::debug!(
                            "[link] → {} len={} attempt={}/{}",
                            exchange.request(),
                            wire.len(),
                            budget.used(),
                            self.config.max_retransmissions
                        );
                        exchange.next(state, Event::Transmitted)
                    }
                }
                ExchangeState::AwaitingReply => {
                    let event = match recv_supervision(&mut self.transport, peer, Some(&self.timer))
                        .await?
                    {
                        Some(control) => {
                            if matches!(control, Control::Rej(_)) {
                                self.stats.rejections_received += 1;
                            }
                            Event::Reply(control)
                        }
                        None => {
                            self.stats.timeouts += 1;
                            log::debug!(
                                "[link] timeout waiting for {}",
                                exchange.expected_reply()
                            );
                            Event::TimedOut
                        }
                    };
                    exchange.next(state, event)
                }
                terminal => terminal,
            };
        }

        match state {
            ExchangeState::Failed(Failure::BudgetExhausted) => {
                log::warn!(
                    "[link] gave up on {} after {} transmissions",
                    exchange.request(),
                    budget.used()
                );
                Err(LinkError::BudgetExhausted {
                    attempts: budget.used(),
                })
            }
            ExchangeState::Failed(Failure::PeerDisconnected) => {
                log::info!("[link] ← DISC during {}", exchange.request());
                Err(LinkError::PeerDisconnected)
            }
            _ => Ok(budget.used()),
        }
    }

    /// Block (no deadline) until the peer sends `wanted`.
    async fn wait_for(&mut self, wanted: Control) -> Result<(), LinkError> {
        let peer = self.config.role.peer_address();
        loop {
            if let Some(control) = recv_supervision(&mut self.transport, peer, None).await? {
                if control == wanted {
                    return Ok(());
                }
                log::debug!("[link] ← {control} ignored while waiting for {wanted}");
            }
        }
    }

    /// Send a one-off supervision frame (UA, RR, REJ).
    async fn reply(&mut self, control: Control) -> Result<(), LinkError> {
        let local = self.local();
        send_supervision(&mut self.transport, local, control).await?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    async fn write_frame(&mut self, wire: &[u8]) -> Result<(), LinkError> {
        let written = self.transport.write_bytes(wire).await?;
        if written != wire.len() {
            return Err(LinkError::ShortWrite {
                written,
                expected: wire.len(),
            });
        }
        self.stats.frames_sent += 1;
        Ok(())
    }

    async fn release_transport(&mut self) {
        if let Err(e) = self.transport.close().await {
            log::warn!("[link] closing transport: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use tokio::io::duplex;

    #[tokio::test]
    async fn invalid_config_is_rejected_before_io() {
        let (a, _b) = duplex(64);
        let config = LinkConfig::new(Role::Initiator, "pipe").with_retransmissions(0);
        let err = Link::open(config, StreamTransport::new(a)).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::Config(ConfigError::ZeroRetransmissions)
        ));
    }

    #[test]
    fn errors_render_readably() {
        assert_eq!(
            LinkError::BudgetExhausted { attempts: 3 }.to_string(),
            "no acknowledgment after 3 transmissions"
        );
        assert_eq!(
            LinkError::PayloadTooLarge(2000).to_string(),
            "payload of 2000 bytes exceeds the maximum of 1024"
        );
    }
}
