//! RLC Transparent Mode entity
//!
//! No header, no state and no timers: SDUs pass through unchanged in both
//! directions.

use bytes::Bytes;
use tracing::{trace, warn};

use crate::{RlcEntity, RlcError, UpperLayer};

pub struct TmEntity<U: UpperLayer> {
    upper: U,
}

impl<U: UpperLayer> TmEntity<U> {
    pub fn new(upper: U) -> Self {
        Self { upper }
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
}

impl<U: UpperLayer> RlcEntity for TmEntity<U> {
    /// Transparent Mode has no parameters; everything is ignored
    fn set_parameters(&mut self, params: &str) -> Result<(), RlcError> {
        trace!("RLC TM ignoring parameters: {}", params);
        Ok(())
    }

    fn parameters(&self) -> String {
        "rlc/mode=TM".to_string()
    }

    fn reset(&mut self) {}

    fn send_opportunity(&mut self, now_ms: u32, buffer: &mut [u8]) -> Option<usize> {
        let sdu = self.upper.pull_sdu(now_ms, buffer.len())?;
        if sdu.len() > buffer.len() {
            warn!(
                "Dropping {} byte SDU for {} byte opportunity",
                sdu.len(),
                buffer.len()
            );
            return None;
        }
        buffer[..sdu.len()].copy_from_slice(&sdu);
        Some(sdu.len())
    }

    fn received(&mut self, now_ms: u32, pdu: &[u8]) {
        self.upper.sdu_received(now_ms, Bytes::copy_from_slice(pdu));
    }

    fn timer_tick(&mut self, now_ms: u32) {
        self.upper.timer_tick(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Queue {
        outgoing: VecDeque<Bytes>,
        received: Vec<Bytes>,
    }

    impl UpperLayer for Queue {
        fn pull_sdu(&mut self, _now_ms: u32, _max_size: usize) -> Option<Bytes> {
            self.outgoing.pop_front()
        }

        fn sdu_received(&mut self, _now_ms: u32, sdu: Bytes) {
            self.received.push(sdu);
        }
    }

    #[test]
    fn test_pass_through() {
        let mut tm = TmEntity::new(Queue::default());
        tm.upper_mut()
            .outgoing
            .push_back(Bytes::from_static(b"transparent"));

        let mut buffer = [0u8; 32];
        let n = tm.send_opportunity(0, &mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"transparent");
        assert_eq!(tm.send_opportunity(0, &mut buffer), None);

        tm.received(0, b"inbound");
        assert_eq!(tm.upper().received, vec![Bytes::from_static(b"inbound")]);
    }

    #[test]
    fn test_oversized_sdu_dropped() {
        let mut tm = TmEntity::new(Queue::default());
        tm.upper_mut()
            .outgoing
            .push_back(Bytes::from_static(b"far too long"));
        let mut buffer = [0u8; 4];
        assert_eq!(tm.send_opportunity(0, &mut buffer), None);
        assert!(tm.upper().outgoing.is_empty());
    }

    #[test]
    fn test_parameters_ignored() {
        let mut tm = TmEntity::new(Queue::default());
        tm.set_parameters("pollPDU=garbage").unwrap();
        assert_eq!(tm.parameters(), "rlc/mode=TM");
    }
}
