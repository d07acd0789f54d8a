//! RLC AM transmit side
//!
//! Owns the transmit window VT(A)..VT(S), the table of PDUs awaiting
//! acknowledgement, poll bookkeeping and t-PollRetransmit. On each send
//! opportunity it retransmits what the peer NACKed, or builds a new PDU
//! from upper layer SDUs.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use common::{bytes_to_hex, Timer};
use tracing::{debug, trace, warn};

use crate::config::AmConfig;
use crate::pdu::{DataPdu, PduBuilder, SduInProgress, Sn, MAX_PDU_SIZE, MAX_SDU_SIZE};
use crate::status::StatusPdu;

/// A transmitted PDU kept until the peer acknowledges it
#[derive(Debug, Clone)]
pub struct InFlightPdu {
    pub pdu: DataPdu,
    /// Whole SDU the first segment belongs to, when the PDU starts mid-SDU
    first_partial_sdu: Option<Bytes>,
    pub retx_count: u32,
    pub delivered: bool,
    pub retx_requested: bool,
    /// Payload byte ranges still to resend, oldest first
    pub retx_ranges: VecDeque<(usize, usize)>,
}

impl InFlightPdu {
    fn new(pdu: DataPdu, first_partial_sdu: Option<Bytes>) -> Self {
        Self {
            pdu,
            first_partial_sdu,
            retx_count: 0,
            delivered: false,
            retx_requested: false,
            retx_ranges: VecDeque::new(),
        }
    }

    /// Schedule for retransmission. Returns false if already delivered.
    fn request_retx(&mut self) -> bool {
        if self.delivered {
            return false;
        }
        if !self.retx_requested {
            self.retx_requested = true;
            self.retx_count += 1;
        }
        true
    }

    /// SDUs this PDU completes, in order
    fn into_completed_sdus(self) -> impl Iterator<Item = Bytes> {
        let pdu = self.pdu;
        let count = pdu.segments.len();
        let first = if pdu.f0 && !(pdu.f1 && count == 1) {
            self.first_partial_sdu
        } else {
            None
        };
        let skip = pdu.f0 as usize;
        let take = count.saturating_sub(pdu.f1 as usize).saturating_sub(skip);
        first
            .into_iter()
            .chain(pdu.segments.into_iter().skip(skip).take(take))
    }
}

/// Transmit state variables, queues and timers
#[derive(Debug)]
pub struct TxState {
    window_size: u32,
    max_retx_threshold: u32,
    poll_pdu: Option<u32>,
    poll_byte: Option<u32>,
    /// VT(A): lowest SN not yet acknowledged
    vt_a: Sn,
    /// VT(S): SN for the next new PDU
    vt_s: Sn,
    /// POLL_SN: VT(S) - 1 when the last poll went out
    poll_sn: Sn,
    pdu_without_poll: u32,
    bytes_without_poll: usize,
    t_poll_retransmit: Timer,
    sdu_in_progress: Option<SduInProgress>,
    in_flight: HashMap<Sn, InFlightPdu>,
    delivered_sdus: VecDeque<Bytes>,
}

impl TxState {
    pub fn new(config: &AmConfig) -> Self {
        Self {
            window_size: config.window_size,
            max_retx_threshold: config.max_retx_threshold,
            poll_pdu: config.poll_pdu,
            poll_byte: config.poll_byte,
            vt_a: Sn::default(),
            vt_s: Sn::default(),
            poll_sn: Sn::default(),
            pdu_without_poll: 0,
            bytes_without_poll: 0,
            t_poll_retransmit: Timer::new("t-PollRetransmit", config.t_poll_retransmit_ms),
            sdu_in_progress: None,
            in_flight: HashMap::new(),
            delivered_sdus: VecDeque::new(),
        }
    }

    /// Apply new parameters without touching protocol state
    pub fn configure(&mut self, config: &AmConfig) {
        self.window_size = config.window_size;
        self.max_retx_threshold = config.max_retx_threshold;
        self.poll_pdu = config.poll_pdu;
        self.poll_byte = config.poll_byte;
        self.t_poll_retransmit.set_timeout(config.t_poll_retransmit_ms);
    }

    pub fn vt_a(&self) -> Sn {
        self.vt_a
    }

    pub fn vt_s(&self) -> Sn {
        self.vt_s
    }

    pub fn poll_sn(&self) -> Sn {
        self.poll_sn
    }

    pub fn pdu_without_poll(&self) -> u32 {
        self.pdu_without_poll
    }

    pub fn bytes_without_poll(&self) -> usize {
        self.bytes_without_poll
    }

    pub fn t_poll_retransmit(&self) -> &Timer {
        &self.t_poll_retransmit
    }

    pub fn in_flight(&self, sn: Sn) -> Option<&InFlightPdu> {
        self.in_flight.get(&sn)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn update_timers(&mut self, now_ms: u32) {
        self.t_poll_retransmit.update(now_ms);
    }

    /// VT(S) has reached VT(MS)
    pub fn window_full(&self) -> bool {
        self.vt_s.distance_from(self.vt_a) >= self.window_size
    }

    fn need_retransmission(&self) -> bool {
        self.in_flight.values().any(|p| p.retx_requested)
    }

    fn have_data_to_send(&self) -> bool {
        self.sdu_in_progress.is_some() || self.need_retransmission()
    }

    fn want_poll(&self) -> bool {
        if self.window_full() || self.t_poll_retransmit.is_expired() {
            return true;
        }
        let pdu_trigger = self.poll_pdu.is_some_and(|n| self.pdu_without_poll >= n);
        let byte_trigger = self
            .poll_byte
            .is_some_and(|n| self.bytes_without_poll >= n as usize);
        (pdu_trigger || byte_trigger) && !self.have_data_to_send()
    }

    /// Record a poll carried by SN `sn`. POLL_SN covers everything
    /// submitted so far, not just the PDU that carried the bit.
    fn poll_sent(&mut self, sn: Sn) {
        self.pdu_without_poll = 0;
        self.bytes_without_poll = 0;
        self.poll_sn = self.vt_s - 1;
        self.t_poll_retransmit.start();
        trace!("Poll sent in SN {}, POLL_SN={}", sn, self.poll_sn);
    }

    /// True once any PDU was retransmitted more than maxRetxThreshold times
    pub fn has_radio_link_failure(&self) -> bool {
        self.in_flight
            .values()
            .any(|p| p.retx_count > self.max_retx_threshold)
    }

    /// Build the next data PDU of at most `capacity` bytes.
    ///
    /// Retransmissions go first, then new data pulled through `pull_sdu`.
    /// When neither produces anything and t-PollRetransmit has expired, the
    /// most recent unacknowledged PDU is resent with a poll. If the upper
    /// layer ran dry behind unpolled PDUs, t-PollRetransmit is armed so
    /// that resend happens once it expires.
    pub fn make_packet<F>(&mut self, capacity: usize, mut pull_sdu: F) -> Option<Bytes>
    where
        F: FnMut(usize) -> Option<Bytes>,
    {
        let capacity = capacity.min(MAX_PDU_SIZE);

        if self.need_retransmission() {
            return self.mux_retransmit(capacity);
        }

        let mut drained = false;
        if !self.window_full() {
            if let Some(pdu) = self.mux_transmit(capacity, &mut pull_sdu, &mut drained) {
                return Some(pdu);
            }
        }

        if drained
            && self.pdu_without_poll > 0
            && self.vt_a != self.vt_s
            && self.t_poll_retransmit.is_idle()
        {
            debug!(
                "Upper layer empty behind {} unpolled PDUs, arming t-PollRetransmit",
                self.pdu_without_poll
            );
            self.t_poll_retransmit.start();
        }

        if self.t_poll_retransmit.is_expired() {
            let candidate = self
                .vt_a
                .range_to(self.vt_s)
                .rev()
                .find(|sn| self.in_flight.get(sn).is_some_and(|p| !p.delivered));
            if let Some(sn) = candidate {
                debug!("t-PollRetransmit expired: resending SN {} with poll", sn);
                if let Some(entry) = self.in_flight.get_mut(&sn) {
                    entry.request_retx();
                }
                return self.mux_retransmit(capacity);
            }
        }

        None
    }

    /// Resend the oldest PDU marked for retransmission, whole if it fits,
    /// otherwise as a resegment of its oldest pending byte range
    fn mux_retransmit(&mut self, capacity: usize) -> Option<Bytes> {
        let sn = self
            .vt_a
            .range_to(self.vt_s)
            .find(|sn| self.in_flight.get(sn).is_some_and(|p| p.retx_requested))?;
        let entry = self.in_flight.get_mut(&sn)?;

        let mut pdu = if entry.retx_ranges.is_empty() && entry.pdu.total_size() <= capacity {
            entry.retx_requested = false;
            debug!("Retransmitting SN {} ({} bytes)", sn, entry.pdu.total_size());
            entry.pdu.clone()
        } else {
            if entry.retx_ranges.is_empty() {
                entry.retx_ranges.push_back((0, entry.pdu.payload_size()));
            }
            let (start, end) = entry.retx_ranges.pop_front()?;
            let Some(segment) = entry.pdu.resegment(capacity, start, end) else {
                trace!("{} bytes too small to resegment SN {}", capacity, sn);
                entry.retx_ranges.push_front((start, end));
                return None;
            };

            let sent_end = start + segment.payload_size();
            if sent_end < end.min(entry.pdu.payload_size()) {
                entry.retx_ranges.push_front((sent_end, end));
            }
            if entry.retx_ranges.is_empty() {
                entry.retx_requested = false;
            }
            debug!("Retransmitting SN {} bytes [{}, {})", sn, start, sent_end);
            segment
        };

        // Emptying the retransmission buffer also asks for a report
        pdu.poll = self.want_poll() || !self.have_data_to_send();
        if pdu.poll {
            self.poll_sent(sn);
        }
        Some(pdu.encode())
    }

    /// Build a new PDU from the SDU in progress and fresh SDUs.
    ///
    /// Sets `drained` when the upper layer had nothing more to give.
    fn mux_transmit<F>(
        &mut self,
        capacity: usize,
        pull_sdu: &mut F,
        drained: &mut bool,
    ) -> Option<Bytes>
    where
        F: FnMut(usize) -> Option<Bytes>,
    {
        let mut builder = PduBuilder::new(self.vt_s, capacity);
        if !builder.room_for_more() {
            return None;
        }
        builder.start(self.sdu_in_progress.as_ref());
        while builder.room_for_more() {
            match pull_sdu(MAX_SDU_SIZE) {
                Some(sdu) if !sdu.is_empty() => builder.add_sdu(sdu),
                _ => {
                    *drained = true;
                    break;
                }
            }
        }
        let (mut pdu, first_partial_sdu) = builder.finalize(&mut self.sdu_in_progress)?;

        self.vt_s += 1;
        self.pdu_without_poll += 1;
        self.bytes_without_poll += pdu.payload_size();

        // Nothing queued behind this PDU: last chance to poll for it
        if self.want_poll() || (*drained && !self.have_data_to_send()) {
            pdu.poll = true;
            self.poll_sent(pdu.sn);
        }

        let encoded = pdu.encode();
        debug!(
            "New PDU SN {}: {} segments, {} bytes, poll={}",
            pdu.sn,
            pdu.segments.len(),
            encoded.len(),
            pdu.poll
        );
        trace!("PDU: {}", bytes_to_hex(&encoded));

        self.in_flight
            .insert(pdu.sn, InFlightPdu::new(pdu, first_partial_sdu));
        Some(encoded)
    }

    /// Apply a STATUS report from the peer
    pub fn handle_status(&mut self, status: &StatusPdu) {
        let ack_sn = status.ack_sn;
        if ack_sn.distance_from(self.vt_a) > self.vt_s.distance_from(self.vt_a) {
            warn!(
                "Ignoring STATUS with ACK_SN {} outside [{}, {}]",
                ack_sn, self.vt_a, self.vt_s
            );
            return;
        }
        // Only VT(A) <= NACK_SN < ACK_SN is meaningful
        let acked_span = ack_sn.distance_from(self.vt_a);
        let vt_a = self.vt_a;
        let nacks: Vec<_> = status
            .nacks
            .iter()
            .filter(|nack| {
                let valid = nack.sn.distance_from(vt_a) < acked_span;
                if !valid {
                    debug!("Ignoring NACK_SN {} outside [{}, {})", nack.sn, vt_a, ack_sn);
                }
                valid
            })
            .collect();
        let nacked: HashSet<Sn> = nacks.iter().map(|nack| nack.sn).collect();

        for sn in self.vt_a.range_to(ack_sn) {
            if nacked.contains(&sn) {
                continue;
            }
            if let Some(entry) = self.in_flight.get_mut(&sn) {
                if !entry.delivered {
                    entry.delivered = true;
                    entry.retx_requested = false;
                    entry.retx_ranges.clear();
                }
            }
        }

        while self.vt_a != self.vt_s {
            if !self.in_flight.get(&self.vt_a).is_some_and(|p| p.delivered) {
                break;
            }
            if let Some(entry) = self.in_flight.remove(&self.vt_a) {
                self.delivered_sdus.extend(entry.into_completed_sdus());
            }
            self.vt_a += 1;
        }

        for sn in &nacked {
            if let Some(entry) = self.in_flight.get_mut(sn) {
                if entry.request_retx() {
                    entry.retx_ranges.clear();
                }
            }
        }
        for nack in nacks {
            let Some(segment) = nack.segment else {
                continue;
            };
            let Some(entry) = self.in_flight.get_mut(&nack.sn) else {
                continue;
            };
            if entry.delivered {
                continue;
            }
            let payload = entry.pdu.payload_size();
            let end = segment.end.unwrap_or(payload).min(payload);
            let start = segment.start.min(end);
            if start < end {
                entry.retx_ranges.push_back((start, end));
            }
        }

        debug!(
            "STATUS applied: ACK_SN={} NACKs={} VT(A)={} VT(S)={}",
            ack_sn,
            status.nacks.len(),
            self.vt_a,
            self.vt_s
        );

        if self.poll_sn.diff(ack_sn) < 0 || nacked.contains(&self.poll_sn) {
            self.t_poll_retransmit.stop();
        }
    }

    /// Next SDU acknowledged by the peer
    pub fn pop_delivered(&mut self) -> Option<Bytes> {
        self.delivered_sdus.pop_front()
    }
}
