//! RLC AM receive side
//!
//! Owns the receive window VR(R)..VR(MR), buffers out-of-order PDUs and
//! resegments, reassembles SDUs in sequence and builds STATUS reports.
//! Control PDUs are decoded here and handed back to the caller for the
//! transmit side.

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use common::{bits_to_bytes, Timer};
use tracing::{debug, trace, warn};

use crate::config::AmConfig;
use crate::pdu::{is_control, DataPdu, Sn, MAX_PDU_SIZE};
use crate::reassembly::IncompletePdu;
use crate::status::{Nack, StatusPdu, NACK_BITS, NACK_SEGMENT_BITS, STATUS_HEADER_BITS};
use crate::RlcError;

/// Receive state variables, queues and timers
#[derive(Debug)]
pub struct RxState {
    window_size: u32,
    /// VR(R): lowest SN not yet received in full
    vr_r: Sn,
    /// VR(H): highest SN received plus one
    vr_h: Sn,
    /// VR(X): SN that triggered t-Reordering
    vr_x: Sn,
    reordering: HashMap<Sn, DataPdu>,
    resegmentation: HashMap<Sn, IncompletePdu>,
    t_reordering: Timer,
    t_status_prohibit: Timer,
    status_requested: bool,
    partial_sdu: BytesMut,
    received_sdus: VecDeque<Bytes>,
}

impl RxState {
    pub fn new(config: &AmConfig) -> Self {
        Self {
            window_size: config.window_size,
            vr_r: Sn::default(),
            vr_h: Sn::default(),
            vr_x: Sn::default(),
            reordering: HashMap::new(),
            resegmentation: HashMap::new(),
            t_reordering: Timer::new("t-Reordering", config.t_reordering_ms),
            t_status_prohibit: Timer::new("t-StatusProhibit", config.t_status_prohibit_ms),
            status_requested: false,
            partial_sdu: BytesMut::new(),
            received_sdus: VecDeque::new(),
        }
    }

    /// Apply new parameters without touching protocol state
    pub fn configure(&mut self, config: &AmConfig) {
        self.window_size = config.window_size;
        self.t_reordering.set_timeout(config.t_reordering_ms);
        self.t_status_prohibit.set_timeout(config.t_status_prohibit_ms);
    }

    pub fn vr_r(&self) -> Sn {
        self.vr_r
    }

    pub fn vr_h(&self) -> Sn {
        self.vr_h
    }

    pub fn vr_x(&self) -> Sn {
        self.vr_x
    }

    pub fn t_reordering(&self) -> &Timer {
        &self.t_reordering
    }

    pub fn t_status_prohibit(&self) -> &Timer {
        &self.t_status_prohibit
    }

    /// VR(MR): first SN past the receive window
    fn vr_mr(&self) -> Sn {
        self.vr_r + self.window_size
    }

    /// VR(R) <= sn < VR(MR)
    fn in_window(&self, sn: Sn) -> bool {
        sn.distance_from(self.vr_r) < self.window_size
    }

    /// Advance timers to `now_ms` and act on t-Reordering expiry
    pub fn update_timers(&mut self, now_ms: u32) {
        self.t_reordering.update(now_ms);
        self.t_status_prohibit.update(now_ms);
        self.t_status_prohibit.reset();

        if self.t_reordering.is_expired() {
            debug!(
                "t-Reordering expired: VR(R)={} VR(X)={} VR(H)={}",
                self.vr_r, self.vr_x, self.vr_h
            );
            self.t_reordering.reset();
            self.status_requested = true;
            if self.vr_h != self.vr_r {
                self.t_reordering.start();
                self.vr_x = self.vr_h;
            }
        }
    }

    /// True if a STATUS report is owed and may be sent now
    pub fn status_pending(&self) -> bool {
        self.status_requested && !self.t_status_prohibit.is_running()
    }

    /// Process one PDU from the peer.
    ///
    /// Returns the STATUS report if the PDU was a control PDU.
    pub fn pdu_received(&mut self, pdu: Bytes) -> Result<Option<StatusPdu>, RlcError> {
        if pdu.is_empty() {
            return Err(RlcError::InvalidPdu("empty PDU"));
        }
        if is_control(&pdu) {
            return StatusPdu::decode(&pdu).map(Some);
        }

        let data = DataPdu::decode(pdu)?;
        let sn = data.sn;
        if data.poll {
            debug!("Poll received in SN {}", sn);
            self.status_requested = true;
        }

        if !self.in_window(sn) {
            debug!(
                "Discarding SN {} outside receive window [{}, {})",
                sn,
                self.vr_r,
                self.vr_mr()
            );
            return Ok(None);
        }

        if data.is_resegment() {
            if self.reordering.contains_key(&sn) {
                trace!("Duplicate resegment for SN {}", sn);
                return Ok(None);
            }
            let incomplete = self.resegmentation.entry(sn).or_default();
            incomplete.add(&data);
            if incomplete.is_complete() {
                if let Some(incomplete) = self.resegmentation.remove(&sn) {
                    debug!("SN {} complete from resegments", sn);
                    self.reordering.insert(sn, incomplete.into_pdu(sn));
                }
            }
        } else {
            self.resegmentation.remove(&sn);
            self.reordering.insert(sn, data);
        }

        if (sn + 1).distance_from(self.vr_r) > self.vr_h.distance_from(self.vr_r) {
            self.vr_h = sn + 1;
        }

        self.deliver_in_sequence();
        self.update_reordering_timer();

        Ok(None)
    }

    /// Hand over in-order PDUs starting at VR(R)
    fn deliver_in_sequence(&mut self) {
        while let Some(pdu) = self.reordering.remove(&self.vr_r) {
            self.resegmentation.remove(&self.vr_r);
            self.reassemble(pdu);
            self.vr_r += 1;
        }
    }

    fn update_reordering_timer(&mut self) {
        if self.t_reordering.is_running()
            && (self.vr_x == self.vr_r || (!self.in_window(self.vr_x) && self.vr_x != self.vr_mr()))
        {
            self.t_reordering.stop();
        }
        if self.t_reordering.is_idle() && self.vr_h != self.vr_r {
            self.t_reordering.start();
            self.vr_x = self.vr_h;
        }
    }

    /// Split one in-sequence PDU into SDUs
    fn reassemble(&mut self, pdu: DataPdu) {
        let count = pdu.segments.len();
        trace!(
            "Reassembling SN {}: {} segments, f0={} f1={}",
            pdu.sn,
            count,
            pdu.f0,
            pdu.f1
        );

        if pdu.f0 && pdu.f1 && count == 1 {
            self.partial_sdu.extend_from_slice(&pdu.segments[0]);
            return;
        }

        let mut segments = pdu.segments.into_iter();

        if pdu.f0 {
            if let Some(first) = segments.next() {
                if self.partial_sdu.is_empty() {
                    warn!("Dropping SDU tail in SN {}: start was never received", pdu.sn);
                } else {
                    self.partial_sdu.extend_from_slice(&first);
                    let sdu = std::mem::take(&mut self.partial_sdu).freeze();
                    self.received_sdus.push_back(sdu);
                }
            }
        } else if !self.partial_sdu.is_empty() {
            warn!(
                "Dropping {} byte partial SDU: SN {} starts a new SDU",
                self.partial_sdu.len(),
                pdu.sn
            );
            self.partial_sdu.clear();
        }

        let mut rest: Vec<Bytes> = segments.collect();
        if pdu.f1 {
            if let Some(last) = rest.pop() {
                self.partial_sdu.extend_from_slice(&last);
            }
        }
        self.received_sdus.extend(rest);
    }

    /// Next SDU ready for the upper layer
    pub fn pop_received(&mut self) -> Option<Bytes> {
        self.received_sdus.pop_front()
    }

    /// Build the owed STATUS report in at most `capacity` bytes and arm
    /// t-StatusProhibit. `None` if no report is owed or it cannot fit.
    pub fn make_status(&mut self, capacity: usize) -> Option<StatusPdu> {
        if !self.status_pending() || capacity < bits_to_bytes(STATUS_HEADER_BITS) {
            return None;
        }
        let status = self.build_status(capacity.min(MAX_PDU_SIZE));
        debug!(
            "STATUS: ACK_SN={} with {} NACKs (VR(R)={} VR(H)={})",
            status.ack_sn,
            status.nacks.len(),
            self.vr_r,
            self.vr_h
        );
        self.status_requested = false;
        self.t_status_prohibit.start();
        Some(status)
    }

    /// Report every gap in VR(R)..VR(H) that fits. When the report is cut
    /// short, ACK_SN stops at the first SN not fully reported.
    fn build_status(&self, capacity: usize) -> StatusPdu {
        let budget = capacity * 8;
        let mut bits = STATUS_HEADER_BITS;
        let mut nacks = Vec::new();
        let mut truncated_at = None;

        'scan: for sn in self.vr_r.range_to(self.vr_h) {
            if let Some(incomplete) = self.resegmentation.get(&sn) {
                let mut from = 0;
                while let Some((start, end)) = incomplete.next_unknown_range(from) {
                    if bits + NACK_SEGMENT_BITS > budget {
                        truncated_at = Some(sn);
                        break 'scan;
                    }
                    bits += NACK_SEGMENT_BITS;
                    nacks.push(Nack::segment(sn, start, end));
                    match end {
                        Some(end) => from = end,
                        None => break,
                    }
                }
            } else if !self.reordering.contains_key(&sn) {
                if bits + NACK_BITS > budget {
                    truncated_at = Some(sn);
                    break 'scan;
                }
                bits += NACK_BITS;
                nacks.push(Nack::pdu(sn));
            }
        }

        StatusPdu {
            ack_sn: truncated_at.unwrap_or(self.vr_h),
            nacks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AmConfig {
        AmConfig::default()
    }

    fn data_pdu(sn: u32, payload: &[u8]) -> DataPdu {
        DataPdu {
            sn: Sn::new(sn),
            segments: vec![Bytes::copy_from_slice(payload)],
            ..Default::default()
        }
    }

    fn receive(rx: &mut RxState, pdu: &DataPdu) {
        assert!(rx.pdu_received(pdu.encode()).unwrap().is_none());
    }

    fn drain(rx: &mut RxState) -> Vec<Bytes> {
        std::iter::from_fn(|| rx.pop_received()).collect()
    }

    #[test]
    fn test_in_order_delivery() {
        let mut rx = RxState::new(&config());
        receive(&mut rx, &data_pdu(0, b"zero"));
        receive(&mut rx, &data_pdu(1, b"one"));
        assert_eq!(drain(&mut rx), vec![Bytes::from("zero"), Bytes::from("one")]);
        assert_eq!(rx.vr_r(), Sn::new(2));
        assert_eq!(rx.vr_h(), Sn::new(2));
        assert!(rx.t_reordering().is_idle());
    }

    #[test]
    fn test_out_of_order_delivery() {
        let mut rx = RxState::new(&config());
        rx.update_timers(0);

        receive(&mut rx, &data_pdu(2, b"two"));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(rx.vr_h(), Sn::new(3));
        assert!(rx.t_reordering().is_running());
        assert_eq!(rx.vr_x(), Sn::new(3));

        receive(&mut rx, &data_pdu(0, b"zero"));
        assert_eq!(drain(&mut rx), vec![Bytes::from("zero")]);
        assert_eq!(rx.vr_r(), Sn::new(1));

        receive(&mut rx, &data_pdu(1, b"one"));
        assert_eq!(drain(&mut rx), vec![Bytes::from("one"), Bytes::from("two")]);
        assert_eq!(rx.vr_r(), Sn::new(3));
        assert!(rx.t_reordering().is_idle());
    }

    #[test]
    fn test_sdu_spanning_pdus() {
        let mut rx = RxState::new(&config());
        let head = DataPdu {
            sn: Sn::new(0),
            f1: true,
            segments: vec![Bytes::from("whole"), Bytes::from("hea")],
            ..Default::default()
        };
        let middle = DataPdu {
            sn: Sn::new(1),
            f0: true,
            f1: true,
            segments: vec![Bytes::from("d-mid")],
            ..Default::default()
        };
        let tail = DataPdu {
            sn: Sn::new(2),
            f0: true,
            segments: vec![Bytes::from("dle"), Bytes::from("next")],
            ..Default::default()
        };
        receive(&mut rx, &head);
        assert_eq!(drain(&mut rx), vec![Bytes::from("whole")]);
        receive(&mut rx, &middle);
        assert!(drain(&mut rx).is_empty());
        receive(&mut rx, &tail);
        assert_eq!(
            drain(&mut rx),
            vec![Bytes::from("head-middle"), Bytes::from("next")]
        );
    }

    #[test]
    fn test_window_discards() {
        let mut rx = RxState::new(&AmConfig {
            window_size: 4,
            ..config()
        });
        receive(&mut rx, &data_pdu(0, b"a"));
        drain(&mut rx);

        // Duplicate below VR(R)
        receive(&mut rx, &data_pdu(0, b"a"));
        // Beyond VR(MR) = 5
        receive(&mut rx, &data_pdu(5, b"f"));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(rx.vr_h(), Sn::new(1));

        receive(&mut rx, &data_pdu(4, b"e"));
        assert_eq!(rx.vr_h(), Sn::new(5));
    }

    #[test]
    fn test_window_crosses_sn_wrap() {
        let mut rx = RxState::new(&AmConfig {
            window_size: 16,
            ..config()
        });
        rx.update_timers(0);
        for sn in 0..1020 {
            receive(&mut rx, &data_pdu(sn, b"x"));
        }
        assert_eq!(drain(&mut rx).len(), 1020);
        assert_eq!(rx.vr_r(), Sn::new(1020));

        receive(&mut rx, &data_pdu(1022, b"c"));
        assert_eq!(rx.vr_h(), Sn::new(1023));
        assert_eq!(rx.vr_x(), Sn::new(1023));
        assert!(rx.t_reordering().is_running());

        receive(&mut rx, &data_pdu(1, b"f"));
        assert_eq!(rx.vr_h(), Sn::new(2));

        // VR(MR) = 12 after the wrap; 1004 is behind VR(R)
        receive(&mut rx, &data_pdu(12, b"late"));
        receive(&mut rx, &data_pdu(1004, b"old"));
        assert_eq!(rx.vr_h(), Sn::new(2));
        assert!(drain(&mut rx).is_empty());

        rx.status_requested = true;
        let status = rx.make_status(100).unwrap();
        assert_eq!(status.ack_sn, Sn::new(2));
        assert_eq!(
            status.nacks,
            vec![
                Nack::pdu(Sn::new(1020)),
                Nack::pdu(Sn::new(1021)),
                Nack::pdu(Sn::new(1023)),
                Nack::pdu(Sn::new(0)),
            ]
        );

        for (sn, payload) in [(1020, "a"), (1021, "b"), (1023, "d"), (0, "e")] {
            receive(&mut rx, &data_pdu(sn, payload.as_bytes()));
        }
        assert_eq!(
            drain(&mut rx),
            ["a", "b", "c", "d", "e", "f"].map(Bytes::from).to_vec()
        );
        assert_eq!(rx.vr_r(), Sn::new(2));
        assert!(rx.t_reordering().is_idle());
    }

    #[test]
    fn test_poll_requests_status() {
        let mut rx = RxState::new(&config());
        rx.update_timers(0);
        let mut pdu = data_pdu(0, b"x");
        pdu.poll = true;
        receive(&mut rx, &pdu);
        assert!(rx.status_pending());

        let status = rx.make_status(100).unwrap();
        assert_eq!(status.ack_sn, Sn::new(1));
        assert!(status.nacks.is_empty());
        assert!(!rx.status_pending());
        assert!(rx.t_status_prohibit().is_running());
    }

    #[test]
    fn test_status_prohibit_delays_report() {
        let mut rx = RxState::new(&config());
        rx.update_timers(0);
        let mut pdu = data_pdu(0, b"x");
        pdu.poll = true;
        receive(&mut rx, &pdu);
        rx.make_status(100).unwrap();

        let mut pdu = data_pdu(1, b"y");
        pdu.poll = true;
        receive(&mut rx, &pdu);
        assert!(rx.make_status(100).is_none());

        rx.update_timers(5);
        assert_eq!(rx.make_status(100).unwrap().ack_sn, Sn::new(2));
    }

    #[test]
    fn test_status_lists_gaps() {
        let mut rx = RxState::new(&config());
        rx.update_timers(0);
        receive(&mut rx, &data_pdu(1, b"b"));
        receive(&mut rx, &data_pdu(4, b"e"));

        let original = DataPdu {
            sn: Sn::new(3),
            segments: vec![Bytes::from(vec![7u8; 100])],
            ..Default::default()
        };
        receive(&mut rx, &original.resegment(100, 20, 50).unwrap());

        rx.status_requested = true;
        let status = rx.make_status(1000).unwrap();
        assert_eq!(status.ack_sn, Sn::new(5));
        assert_eq!(
            status.nacks,
            vec![
                Nack::pdu(Sn::new(0)),
                Nack::pdu(Sn::new(2)),
                Nack::segment(Sn::new(3), 0, Some(20)),
                Nack::segment(Sn::new(3), 50, None),
            ]
        );
    }

    #[test]
    fn test_truncated_status_acks_low_edge() {
        let mut rx = RxState::new(&config());
        rx.update_timers(0);
        receive(&mut rx, &data_pdu(1, b"b"));
        receive(&mut rx, &data_pdu(3, b"d"));

        // Room for the fixed part only
        rx.status_requested = true;
        let status = rx.make_status(2).unwrap();
        assert_eq!(status.ack_sn, rx.vr_r());
        assert!(status.nacks.is_empty());
        assert_eq!(status.encode().len(), 2);

        // Room for exactly one NACK
        rx.update_timers(100);
        rx.status_requested = true;
        let status = rx.make_status(4).unwrap();
        assert_eq!(status.nacks, vec![Nack::pdu(Sn::new(0))]);
        assert_eq!(status.ack_sn, Sn::new(2));
    }

    #[test]
    fn test_truncated_segment_nack_holds_ack_sn() {
        let mut rx = RxState::new(&config());
        rx.update_timers(0);
        let original = DataPdu {
            sn: Sn::new(0),
            segments: vec![Bytes::from(vec![7u8; 100])],
            ..Default::default()
        };
        receive(&mut rx, &original.resegment(100, 10, 20).unwrap());
        receive(&mut rx, &original.resegment(100, 30, 40).unwrap());
        receive(&mut rx, &data_pdu(1, b"b"));

        // Header + one segment NACK = 57 bits, the second does not fit
        rx.status_requested = true;
        let status = rx.make_status(8).unwrap();
        assert_eq!(status.nacks, vec![Nack::segment(Sn::new(0), 0, Some(10))]);
        assert_eq!(status.ack_sn, Sn::new(0));
    }

    #[test]
    fn test_reordering_expiry_requests_status() {
        let mut rx = RxState::new(&config());
        rx.update_timers(0);
        receive(&mut rx, &data_pdu(1, b"b"));
        assert!(rx.t_reordering().is_running());
        assert!(!rx.status_pending());

        rx.update_timers(34);
        assert!(!rx.status_pending());
        rx.update_timers(35);
        assert!(rx.status_pending());
        // Gap still open: the timer runs again from VR(H)
        assert!(rx.t_reordering().is_running());
        assert_eq!(rx.vr_x(), Sn::new(2));

        let status = rx.make_status(100).unwrap();
        assert_eq!(status.nacks, vec![Nack::pdu(Sn::new(0))]);
        assert_eq!(status.ack_sn, Sn::new(2));
    }

    #[test]
    fn test_rejects_garbage() {
        let mut rx = RxState::new(&config());
        assert!(rx.pdu_received(Bytes::new()).is_err());
        assert!(rx.pdu_received(Bytes::from_static(&[0x80])).is_err());
        assert!(rx.pdu_received(Bytes::from_static(&[0x70, 0x00])).is_err());
        assert_eq!(rx.vr_h(), Sn::new(0));
    }

    #[test]
    fn test_control_pdu_is_returned() {
        let mut rx = RxState::new(&config());
        let status = StatusPdu {
            ack_sn: Sn::new(3),
            nacks: vec![Nack::pdu(Sn::new(1))],
        };
        let decoded = rx.pdu_received(status.encode()).unwrap();
        assert_eq!(decoded, Some(status));
    }
}
