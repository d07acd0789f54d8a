//! Radio Link Control (RLC) Layer Library
//!
//! Implements the LTE RLC layer according to 3GPP TS 36.322. Acknowledged
//! Mode is the full protocol: segmentation, reassembly, reordering,
//! STATUS reporting and selective retransmission. Transparent Mode is a
//! pass-through.
//!
//! Every entity is driven synchronously by its owner (normally the MAC
//! scheduler) through [`RlcEntity`]. For one time instant the owner calls
//! `send_opportunity(t)`, then `received(t)` zero or more times, then
//! `timer_tick(t + 1)`. Nothing runs in the background.

pub mod am;
pub mod config;
pub mod pdu;
pub mod reassembly;
pub mod rx;
pub mod status;
pub mod tm;
pub mod tx;

use bytes::Bytes;
use common::BitError;
use thiserror::Error;

pub use am::AmEntity;
pub use config::AmConfig;
pub use tm::TmEntity;

/// Errors reported by RLC entities
#[derive(Error, Debug)]
pub enum RlcError {
    #[error("Malformed PDU: {0}")]
    MalformedPdu(#[from] BitError),

    #[error("Invalid PDU: {0}")]
    InvalidPdu(&'static str),

    #[error("Unsupported control PDU type: {0}")]
    UnsupportedControlPdu(u32),

    #[error("Invalid parameter: {key}={value}")]
    InvalidParameter { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported RLC mode: {0:?}")]
    UnsupportedMode(RlcMode),
}

/// RLC operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlcMode {
    /// Transparent Mode
    Tm,
    /// Unacknowledged Mode
    Um,
    /// Acknowledged Mode
    Am,
}

/// Callbacks from an RLC entity into the layer above it.
///
/// Every callback receives the time of the entry point that triggered it.
/// Callbacks must not re-enter the entity.
pub trait UpperLayer {
    /// Hand over the next SDU to transmit, at most `max_size` bytes.
    /// Return `None` when there is nothing to send.
    fn pull_sdu(&mut self, now_ms: u32, max_size: usize) -> Option<Bytes>;

    /// A complete SDU arrived from the peer, in order
    fn sdu_received(&mut self, _now_ms: u32, _sdu: Bytes) {}

    /// The peer acknowledged a whole SDU
    fn sdu_delivered(&mut self, _now_ms: u32, _sdu: Bytes) {}

    /// Retransmissions exceeded the configured threshold; the link should
    /// be considered down until the entity is reset
    fn radio_link_failure(&mut self, _now_ms: u32) {}

    /// Called at the end of every `timer_tick`
    fn timer_tick(&mut self, _now_ms: u32) {}
}

/// Interface shared by all RLC modes, as seen from the MAC layer
pub trait RlcEntity {
    /// Apply `key=value` parameters. On error the previous parameters stay
    /// in force.
    fn set_parameters(&mut self, params: &str) -> Result<(), RlcError>;

    /// Current parameters in `key=value` form
    fn parameters(&self) -> String;

    /// Drop all protocol state. Parameters and the upper layer are kept.
    fn reset(&mut self);

    /// Fill `buffer` with at most one PDU. Returns the number of bytes
    /// written, or `None` if there is nothing to send.
    fn send_opportunity(&mut self, now_ms: u32, buffer: &mut [u8]) -> Option<usize>;

    /// Process one PDU from the peer
    fn received(&mut self, now_ms: u32, pdu: &[u8]);

    /// Advance protocol timers
    fn timer_tick(&mut self, now_ms: u32);
}

/// An RLC entity of any supported mode
pub enum Rlc<U: UpperLayer> {
    Am(AmEntity<U>),
    Tm(TmEntity<U>),
}

impl<U: UpperLayer> Rlc<U> {
    /// Create an entity for `mode` with default parameters
    pub fn new(mode: RlcMode, upper: U) -> Result<Self, RlcError> {
        match mode {
            RlcMode::Am => Ok(Rlc::Am(AmEntity::new(upper))),
            RlcMode::Tm => Ok(Rlc::Tm(TmEntity::new(upper))),
            RlcMode::Um => Err(RlcError::UnsupportedMode(mode)),
        }
    }

    pub fn mode(&self) -> RlcMode {
        match self {
            Rlc::Am(_) => RlcMode::Am,
            Rlc::Tm(_) => RlcMode::Tm,
        }
    }

    pub fn upper(&self) -> &U {
        match self {
            Rlc::Am(am) => am.upper(),
            Rlc::Tm(tm) => tm.upper(),
        }
    }

    pub fn upper_mut(&mut self) -> &mut U {
        match self {
            Rlc::Am(am) => am.upper_mut(),
            Rlc::Tm(tm) => tm.upper_mut(),
        }
    }

    /// Create an entity of the same mode and parameters bound to a
    /// different upper layer
    pub fn with_upper_layer<V: UpperLayer>(&self, upper: V) -> Rlc<V> {
        match self {
            Rlc::Am(am) => Rlc::Am(am.with_upper_layer(upper)),
            Rlc::Tm(_) => Rlc::Tm(TmEntity::new(upper)),
        }
    }
}

impl<U: UpperLayer> RlcEntity for Rlc<U> {
    fn set_parameters(&mut self, params: &str) -> Result<(), RlcError> {
        match self {
            Rlc::Am(am) => am.set_parameters(params),
            Rlc::Tm(tm) => tm.set_parameters(params),
        }
    }

    fn parameters(&self) -> String {
        match self {
            Rlc::Am(am) => am.parameters(),
            Rlc::Tm(tm) => tm.parameters(),
        }
    }

    fn reset(&mut self) {
        match self {
            Rlc::Am(am) => am.reset(),
            Rlc::Tm(tm) => tm.reset(),
        }
    }

    fn send_opportunity(&mut self, now_ms: u32, buffer: &mut [u8]) -> Option<usize> {
        match self {
            Rlc::Am(am) => am.send_opportunity(now_ms, buffer),
            Rlc::Tm(tm) => tm.send_opportunity(now_ms, buffer),
        }
    }

    fn received(&mut self, now_ms: u32, pdu: &[u8]) {
        match self {
            Rlc::Am(am) => am.received(now_ms, pdu),
            Rlc::Tm(tm) => tm.received(now_ms, pdu),
        }
    }

    fn timer_tick(&mut self, now_ms: u32) {
        match self {
            Rlc::Am(am) => am.timer_tick(now_ms),
            Rlc::Tm(tm) => tm.timer_tick(now_ms),
        }
    }
}
