//! Fault-injecting channel for deterministic testing.
//!
//! Real serial lines lose and corrupt bytes.  To exercise the reliability
//! mechanisms without depending on actual line noise, this module provides a
//! [`Simulator`] that wraps any [`Transport`] and intercepts writes, applying
//! a configurable fault model:
//!
//! | Fault       | Description                                           |
//! |-------------|-------------------------------------------------------|
//! | Loss        | Drop a write with probability `loss_rate`.            |
//! | Corruption  | Flip bits in one byte with probability `corrupt_rate`.|
//! | Duplication | Deliver a write twice with probability `duplicate_rate`.|
//!
//! Faults can also be scripted per write index (the link writes exactly one
//! frame per call), which is how the integration tests provoke a specific
//! lost acknowledgment or a specific bad checksum.  A shared [`WireTap`]
//! records every frame both endpoints put on the wire, in order.
//!
//! Random faults come from a seeded [`StdRng`], so a failing run can be
//! replayed with the same seed.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Role;
use crate::frame::{Control, FLAG};
use crate::transport::Transport;

/// Configuration for the random fault model.
///
/// All probabilities are in the range `[0.0, 1.0]`; out-of-range values are
/// clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that a write is silently dropped.
    pub loss_rate: f64,
    /// Probability that one byte of a write is corrupted.
    pub corrupt_rate: f64,
    /// Probability that a write is delivered twice.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// A fault applied to one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The bytes never reach the peer; the writer still sees success.
    Drop,
    /// `buf[offset] ^= mask` before delivery.
    Corrupt { offset: usize, mask: u8 },
    /// The bytes are delivered twice back to back.
    Duplicate,
}

// ---------------------------------------------------------------------------
// WireTap
// ---------------------------------------------------------------------------

/// One write observed by a [`WireTap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapEntry {
    /// Which endpoint wrote the frame.
    pub origin: Role,
    /// The frame as the writer produced it (before any fault).
    pub frame: Vec<u8>,
    pub fault: Option<Fault>,
}

impl TapEntry {
    /// Control field of the recorded frame, if it is well formed.
    pub fn control(&self) -> Option<Control> {
        match self.frame.as_slice() {
            [FLAG, _, c, ..] => Control::from_byte(*c),
            _ => None,
        }
    }

    pub fn delivered(&self) -> bool {
        self.fault != Some(Fault::Drop)
    }
}

/// Shared, ordered record of the frames written by one or more simulators.
#[derive(Debug, Clone, Default)]
pub struct WireTap {
    entries: Arc<Mutex<Vec<TapEntry>>>,
}

impl WireTap {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, entry: TapEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<TapEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Control fields of every recorded frame, dropped ones included.
    pub fn controls(&self) -> Vec<Control> {
        self.entries().iter().filter_map(TapEntry::control).collect()
    }

    /// Control fields of the frames written by `origin`.
    pub fn controls_from(&self, origin: Role) -> Vec<Control> {
        self.entries()
            .iter()
            .filter(|e| e.origin == origin)
            .filter_map(TapEntry::control)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// A fault-injecting wrapper around another [`Transport`].
///
/// Reads and `close` pass straight through; faults apply to writes only.
#[derive(Debug)]
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    rng: StdRng,
    writes: usize,
    scripted: HashMap<usize, Fault>,
    tap: Option<(WireTap, Role)>,
}

impl<T> Simulator<T> {
    pub fn new(inner: T, mut config: SimulatorConfig) -> Self {
        config.loss_rate = config.loss_rate.clamp(0.0, 1.0);
        config.corrupt_rate = config.corrupt_rate.clamp(0.0, 1.0);
        config.duplicate_rate = config.duplicate_rate.clamp(0.0, 1.0);
        Self {
            inner,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            writes: 0,
            scripted: HashMap::new(),
            tap: None,
        }
    }

    /// A simulator with no random faults.
    pub fn passthrough(inner: T) -> Self {
        Self::new(inner, SimulatorConfig::default())
    }

    /// Apply `fault` to the write with zero-based index `write_index`.
    ///
    /// Scripted faults take precedence over random ones.
    pub fn with_fault(mut self, write_index: usize, fault: Fault) -> Self {
        self.scripted.insert(write_index, fault);
        self
    }

    /// Record every write into `tap`, attributed to `origin`.
    pub fn with_tap(mut self, tap: WireTap, origin: Role) -> Self {
        self.tap = Some((tap, origin));
        self
    }

    /// Number of writes seen so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Pick the fault (if any) for the next write of `len` bytes.
    fn next_fault(&mut self, len: usize) -> Option<Fault> {
        let index = self.writes;
        self.writes += 1;

        if let Some(fault) = self.scripted.remove(&index) {
            return Some(fault);
        }
        if self.rng.gen_bool(self.config.loss_rate) {
            return Some(Fault::Drop);
        }
        // Leave the delimiters alone so corruption lands inside the frame.
        if len > 2 && self.rng.gen_bool(self.config.corrupt_rate) {
            return Some(Fault::Corrupt {
                offset: self.rng.gen_range(1..len - 1),
                mask: self.rng.gen_range(1..=u8::MAX),
            });
        }
        if self.rng.gen_bool(self.config.duplicate_rate) {
            return Some(Fault::Duplicate);
        }
        None
    }

    fn observe(&self, frame: &[u8], fault: Option<Fault>) {
        if let Some((tap, origin)) = &self.tap {
            tap.record(TapEntry {
                origin: *origin,
                frame: frame.to_vec(),
                fault,
            });
        }
    }
}

impl<T: Transport> Transport for Simulator<T> {
    async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        self.inner.read_byte().await
    }

    async fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        let fault = self.next_fault(buf.len());
        self.observe(buf, fault);

        match fault {
            None => self.inner.write_bytes(buf).await,
            Some(Fault::Drop) => {
                log::debug!("[sim] dropped {} bytes", buf.len());
                Ok(buf.len())
            }
            Some(Fault::Corrupt { offset, mask }) => {
                log::debug!("[sim] corrupting byte {offset} with 0x{mask:02x}");
                let mut damaged = buf.to_vec();
                if let Some(byte) = damaged.get_mut(offset) {
                    *byte ^= mask;
                }
                self.inner.write_bytes(&damaged).await
            }
            Some(Fault::Duplicate) => {
                log::debug!("[sim] duplicating {} bytes", buf.len());
                self.inner.write_bytes(buf).await?;
                self.inner.write_bytes(buf).await
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.close().await
    }
}
