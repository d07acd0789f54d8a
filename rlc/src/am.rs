//! RLC Acknowledged Mode entity
//!
//! Ties the transmit and receive sides together. The receive side hands
//! decoded STATUS reports back here and they are applied to the transmit
//! side, so neither half holds a reference to the other.

use bytes::Bytes;
use common::bytes_to_hex;
use tracing::{debug, info, trace, warn};

use crate::config::AmConfig;
use crate::rx::RxState;
use crate::tx::TxState;
use crate::{RlcEntity, RlcError, UpperLayer};

/// One AM entity, both directions of a radio bearer
pub struct AmEntity<U: UpperLayer> {
    config: AmConfig,
    tx: TxState,
    rx: RxState,
    upper: U,
    rlf_reported: bool,
}

impl<U: UpperLayer> AmEntity<U> {
    /// Create an entity with default parameters
    pub fn new(upper: U) -> Self {
        let config = AmConfig::default();
        Self {
            tx: TxState::new(&config),
            rx: RxState::new(&config),
            config,
            upper,
            rlf_reported: false,
        }
    }

    pub fn with_config(config: AmConfig, upper: U) -> Result<Self, RlcError> {
        config.validate()?;
        Ok(Self {
            tx: TxState::new(&config),
            rx: RxState::new(&config),
            config,
            upper,
            rlf_reported: false,
        })
    }

    /// Fresh entity with the same parameters bound to another upper layer
    pub fn with_upper_layer<V: UpperLayer>(&self, upper: V) -> AmEntity<V> {
        AmEntity {
            tx: TxState::new(&self.config),
            rx: RxState::new(&self.config),
            config: self.config.clone(),
            upper,
            rlf_reported: false,
        }
    }

    pub fn config(&self) -> &AmConfig {
        &self.config
    }

    pub fn upper(&self) -> &U {
        &self.upper
    }

    pub fn upper_mut(&mut self) -> &mut U {
        &mut self.upper
    }

    pub fn into_upper(self) -> U {
        self.upper
    }

    pub fn tx(&self) -> &TxState {
        &self.tx
    }

    pub fn rx(&self) -> &RxState {
        &self.rx
    }

    fn set_time(&mut self, now_ms: u32) {
        self.tx.update_timers(now_ms);
        self.rx.update_timers(now_ms);
    }

    fn flush_callbacks(&mut self, now_ms: u32) {
        while let Some(sdu) = self.rx.pop_received() {
            trace!("SDU received: {} bytes", sdu.len());
            self.upper.sdu_received(now_ms, sdu);
        }
        while let Some(sdu) = self.tx.pop_delivered() {
            trace!("SDU delivered: {} bytes", sdu.len());
            self.upper.sdu_delivered(now_ms, sdu);
        }
    }
}

impl<U: UpperLayer> RlcEntity for AmEntity<U> {
    fn set_parameters(&mut self, params: &str) -> Result<(), RlcError> {
        let config = AmConfig::from_parameters(params)?;
        info!("RLC AM parameters: {}", config.to_parameters());
        self.tx.configure(&config);
        self.rx.configure(&config);
        self.config = config;
        Ok(())
    }

    fn parameters(&self) -> String {
        format!("rlc/mode=AM {}", self.config.to_parameters())
    }

    fn reset(&mut self) {
        debug!("RLC AM reset");
        self.tx = TxState::new(&self.config);
        self.rx = RxState::new(&self.config);
        self.rlf_reported = false;
    }

    fn send_opportunity(&mut self, now_ms: u32, buffer: &mut [u8]) -> Option<usize> {
        self.set_time(now_ms);
        let capacity = buffer.len();

        let pdu = match self.rx.make_status(capacity) {
            Some(status) => status.encode(),
            None => {
                let upper = &mut self.upper;
                self.tx
                    .make_packet(capacity, |max_size| upper.pull_sdu(now_ms, max_size))?
            }
        };

        debug_assert!(
            pdu.len() <= capacity,
            "{} byte PDU for {} byte opportunity",
            pdu.len(),
            capacity
        );
        buffer[..pdu.len()].copy_from_slice(&pdu);
        trace!("TX {} bytes: {}", pdu.len(), bytes_to_hex(&pdu));
        Some(pdu.len())
    }

    fn received(&mut self, now_ms: u32, pdu: &[u8]) {
        self.set_time(now_ms);
        trace!("RX {} bytes: {}", pdu.len(), bytes_to_hex(pdu));

        match self.rx.pdu_received(Bytes::copy_from_slice(pdu)) {
            Ok(Some(status)) => self.tx.handle_status(&status),
            Ok(None) => {}
            Err(e) => warn!("Discarding PDU: {}", e),
        }
        self.flush_callbacks(now_ms);
    }

    fn timer_tick(&mut self, now_ms: u32) {
        self.set_time(now_ms);

        if !self.rlf_reported && self.tx.has_radio_link_failure() {
            warn!(
                "Radio link failure: retransmissions exceeded maxRetxThreshold={}",
                self.config.max_retx_threshold
            );
            self.rlf_reported = true;
            self.upper.radio_link_failure(now_ms);
        }
        self.upper.timer_tick(now_ms);
    }
}
