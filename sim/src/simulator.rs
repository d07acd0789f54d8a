//! Back-to-back AM link
//!
//! An eNB side entity sends generated SDUs downlink to a UE side entity
//! over a lossy channel; STATUS reports flow back uplink. Each call to
//! [`Simulator::tick`] is one millisecond of MAC scheduling.

use std::collections::VecDeque;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rlc::{AmEntity, RlcEntity, UpperLayer};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{ChannelConfig, SimConfig};

/// Transmitting side: a queue of SDUs to send
#[derive(Default)]
pub struct Source {
    pending: VecDeque<Bytes>,
    delivered: usize,
    radio_link_failures: u32,
}

impl UpperLayer for Source {
    fn pull_sdu(&mut self, _now_ms: u32, max_size: usize) -> Option<Bytes> {
        match self.pending.front() {
            Some(sdu) if sdu.len() <= max_size => self.pending.pop_front(),
            Some(sdu) => {
                warn!("SDU of {} bytes exceeds {} byte limit, dropping", sdu.len(), max_size);
                self.pending.pop_front();
                None
            }
            None => None,
        }
    }

    fn sdu_delivered(&mut self, now_ms: u32, sdu: Bytes) {
        debug!("t={} delivered {} bytes", now_ms, sdu.len());
        self.delivered += 1;
    }

    fn radio_link_failure(&mut self, now_ms: u32) {
        warn!("t={} radio link failure", now_ms);
        self.radio_link_failures += 1;
    }
}

/// Receiving side: checks SDUs arrive intact and in order
#[derive(Default)]
pub struct Sink {
    expected: VecDeque<Bytes>,
    received: usize,
    received_bytes: usize,
    corrupted: usize,
}

impl UpperLayer for Sink {
    fn pull_sdu(&mut self, _now_ms: u32, _max_size: usize) -> Option<Bytes> {
        None
    }

    fn sdu_received(&mut self, now_ms: u32, sdu: Bytes) {
        self.received += 1;
        self.received_bytes += sdu.len();
        if self.expected.pop_front().as_ref() != Some(&sdu) {
            warn!("t={} SDU {} does not match what was sent", now_ms, self.received);
            self.corrupted += 1;
        }
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStats {
    pub elapsed_ms: u32,
    pub sdus_sent: usize,
    pub sdus_received: usize,
    pub sdus_delivered: usize,
    pub sdus_corrupted: usize,
    pub bytes_received: usize,
    pub downlink_pdus: u64,
    pub downlink_bytes: u64,
    pub downlink_lost: u64,
    pub uplink_pdus: u64,
    pub uplink_lost: u64,
    pub radio_link_failures: u32,
}

pub struct Simulator {
    now: u32,
    enb: AmEntity<Source>,
    ue: AmEntity<Sink>,
    channel: ChannelConfig,
    rng: StdRng,
    stats: SimStats,
}

impl Simulator {
    pub fn new(config: &SimConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let traffic = &config.traffic;
        let mut rng = StdRng::seed_from_u64(traffic.seed);

        let sdus: VecDeque<Bytes> = (0..traffic.sdu_count)
            .map(|_| {
                let len = rng.gen_range(traffic.min_sdu_bytes..=traffic.max_sdu_bytes);
                Bytes::from((0..len).map(|_| rng.gen::<u8>()).collect::<Vec<_>>())
            })
            .collect();

        let source = Source {
            pending: sdus.clone(),
            ..Default::default()
        };
        let sink = Sink {
            expected: sdus,
            ..Default::default()
        };

        Ok(Self {
            now: 0,
            enb: AmEntity::with_config(config.rlc.clone(), source)?,
            ue: AmEntity::with_config(config.rlc.clone(), sink)?,
            channel: config.channel.clone(),
            rng,
            stats: SimStats {
                sdus_sent: traffic.sdu_count,
                ..Default::default()
            },
        })
    }

    pub fn now(&self) -> u32 {
        self.now
    }

    fn opportunity(&mut self) -> usize {
        self.rng
            .gen_range(self.channel.min_opportunity_bytes..=self.channel.opportunity_bytes)
    }

    fn lost(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen_bool(probability)
    }

    /// Run one millisecond: downlink, uplink, then timers
    pub fn tick(&mut self) {
        let now = self.now;

        let mut buffer = vec![0u8; self.opportunity()];
        if let Some(n) = self.enb.send_opportunity(now, &mut buffer) {
            self.stats.downlink_pdus += 1;
            self.stats.downlink_bytes += n as u64;
            if self.lost(self.channel.downlink_loss) {
                self.stats.downlink_lost += 1;
            } else {
                self.ue.received(now, &buffer[..n]);
            }
        }

        let mut buffer = vec![0u8; self.opportunity()];
        if let Some(n) = self.ue.send_opportunity(now, &mut buffer) {
            self.stats.uplink_pdus += 1;
            if self.lost(self.channel.uplink_loss) {
                self.stats.uplink_lost += 1;
            } else {
                self.enb.received(now, &buffer[..n]);
            }
        }

        self.now += 1;
        self.enb.timer_tick(self.now);
        self.ue.timer_tick(self.now);
    }

    /// Every SDU received and acknowledged
    pub fn finished(&self) -> bool {
        let source = self.enb.upper();
        source.pending.is_empty() && source.delivered == self.stats.sdus_sent
    }

    pub fn stats(&self) -> SimStats {
        let source = self.enb.upper();
        let sink = self.ue.upper();
        SimStats {
            elapsed_ms: self.now,
            sdus_received: sink.received,
            sdus_delivered: source.delivered,
            sdus_corrupted: sink.corrupted,
            bytes_received: sink.received_bytes,
            radio_link_failures: source.radio_link_failures,
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(loss: f64) -> SimConfig {
        let mut config = SimConfig::default();
        config.traffic.sdu_count = 50;
        config.traffic.max_sdu_bytes = 500;
        config.channel.downlink_loss = loss;
        config.channel.uplink_loss = loss;
        config.rlc.poll_pdu = Some(1);
        config.rlc.max_retx_threshold = 64;
        config
    }

    fn run(sim: &mut Simulator, limit: u32) {
        while !sim.finished() && sim.now() < limit {
            sim.tick();
        }
    }

    #[test]
    fn test_clean_channel() {
        let mut sim = Simulator::new(&config(0.0)).unwrap();
        run(&mut sim, 10_000);
        let stats = sim.stats();
        assert!(sim.finished());
        assert_eq!(stats.sdus_received, 50);
        assert_eq!(stats.sdus_delivered, 50);
        assert_eq!(stats.sdus_corrupted, 0);
        assert_eq!(stats.downlink_lost, 0);
    }

    #[test]
    fn test_lossy_channel() {
        let mut sim = Simulator::new(&config(0.1)).unwrap();
        run(&mut sim, 50_000);
        let stats = sim.stats();
        assert!(sim.finished());
        assert_eq!(stats.sdus_received, 50);
        assert_eq!(stats.sdus_corrupted, 0);
        assert!(stats.downlink_pdus > stats.downlink_lost);
    }
}
