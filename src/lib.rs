//! `serial-link`: a stop-and-wait data-link protocol over a serial byte stream.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  I-frames   ┌──────────┐
//!  │  Sender  │────────────▶│ Receiver │
//!  └────┬─────┘             └─────┬────┘
//!       │                         │
//!       │       RR / REJ          │
//!       │◀────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │              Link                 │
//!  │ (owns exchange FSMs + transport)  │
//!  └────┬──────────────────────────────┘
//!       │ stuffed, FLAG-delimited frames
//!  ┌────▼──────┐
//!  │ Transport │  (serial device, pipe, or fault simulator)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]: wire format (stuffing, checksums, encode / decode)
//! - [`supervision`]: sending and recognising 5-byte control frames
//! - [`link`]: handshake, stop-and-wait transfer, teardown
//! - [`state`]: finite-state-machine types
//! - [`sender`]: stop-and-wait outbound frame state
//! - [`receiver`]: stop-and-wait inbound frame state
//! - [`timer`]: retransmission timer and retry budget
//! - [`config`]: connection parameters and validation
//! - [`transport`]: async byte channel abstraction
//! - [`simulator`]: fault-injecting channel for testing

pub mod config;
pub mod frame;
pub mod link;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod state;
pub mod supervision;
pub mod timer;
pub mod transport;

pub use config::{ConfigError, LinkConfig, Role};
pub use frame::{Control, FrameError, SeqBit, MAX_PAYLOAD_SIZE};
pub use link::{Link, LinkError, LinkStats};
pub use state::LinkState;
pub use transport::{StreamTransport, Transport};
