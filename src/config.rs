//! Connection parameters.
//!
//! A [`LinkConfig`] is supplied by the caller when a link is opened and stays
//! immutable for the lifetime of the session.  [`LinkConfig::validate`] runs
//! before any I/O so a bad combination never touches the channel.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::frame::Address;

/// Default line rate in bits per second.
pub const DEFAULT_BAUD_RATE: u32 = 9600;
/// Default per-attempt timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;
/// Default number of transmissions per exchange.
pub const DEFAULT_RETRANSMISSIONS: u32 = 3;
/// Consecutive rejections tolerated by the receive half before giving up.
pub const DEFAULT_MAX_REJECTIONS: u32 = 10;
/// How long a single transport read waits before reporting "no byte yet".
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends SET and DISC, drives retransmission of the handshakes.
    Initiator,
    /// Waits for SET and DISC.
    Responder,
}

impl Role {
    /// Address stamped on frames this role originates.
    pub fn local_address(self) -> Address {
        match self {
            Self::Initiator => Address::Initiator,
            Self::Responder => Address::Responder,
        }
    }

    /// Address expected on frames coming from the peer.
    pub fn peer_address(self) -> Address {
        match self {
            Self::Initiator => Address::Responder,
            Self::Responder => Address::Initiator,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tx" | "initiator" => Ok(Self::Initiator),
            "rx" | "responder" => Ok(Self::Responder),
            _ => Err(ConfigError::UnknownRole(s.to_owned())),
        }
    }
}

/// Errors raised by [`LinkConfig::validate`] and [`Role::from_str`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown role {0:?} (expected tx/initiator or rx/responder)")]
    UnknownRole(String),
    #[error("channel identifier is empty")]
    EmptyChannel,
    #[error("timeout must be at least one second")]
    ZeroTimeout,
    #[error("at least one transmission per exchange is required")]
    ZeroRetransmissions,
    #[error("rejection limit must be at least one")]
    ZeroRejectionLimit,
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
}

/// Parameters for one link session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub role: Role,
    /// Channel identifier, e.g. `/dev/ttyS0`.
    pub channel: String,
    /// Line rate in bits per second.
    pub baud_rate: u32,
    /// Per-attempt reply timeout, whole seconds.
    pub timeout_secs: u64,
    /// Transmissions allowed per exchange (first send included).
    pub max_retransmissions: u32,
    /// Consecutive invalid frames tolerated by `receive`.
    pub max_rejections: u32,
    /// Upper bound on a single blocking read.
    pub poll_interval: Duration,
}

impl LinkConfig {
    /// Parameters with defaults for everything except role and channel.
    pub fn new(role: Role, channel: impl Into<String>) -> Self {
        Self {
            role,
            channel: channel.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retransmissions: DEFAULT_RETRANSMISSIONS,
            max_rejections: DEFAULT_MAX_REJECTIONS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_retransmissions(mut self, n: u32) -> Self {
        self.max_retransmissions = n;
        self
    }

    pub fn with_max_rejections(mut self, n: u32) -> Self {
        self.max_rejections = n;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Per-attempt timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject parameter combinations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_retransmissions == 0 {
            return Err(ConfigError::ZeroRetransmissions);
        }
        if self.max_rejections == 0 {
            return Err(ConfigError::ZeroRejectionLimit);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}
