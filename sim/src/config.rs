//! Simulator Configuration
//!
//! TOML file with three optional tables:
//!
//! ```toml
//! [rlc]
//! poll_pdu = 16
//! t_reordering_ms = 35
//!
//! [channel]
//! downlink_loss = 0.05
//! opportunity_bytes = 200
//!
//! [traffic]
//! sdu_count = 1000
//! ```

use rlc::pdu::MAX_SDU_SIZE;
use rlc::AmConfig;
use serde::{Deserialize, Serialize};

/// Top level simulator configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimConfig {
    /// AM parameters used by both entities
    #[serde(default)]
    pub rlc: AmConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
}

/// Radio channel between the two entities
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Probability a downlink PDU is lost
    pub downlink_loss: f64,
    /// Probability an uplink PDU (STATUS reports) is lost
    pub uplink_loss: f64,
    /// Largest send opportunity in bytes
    pub opportunity_bytes: usize,
    /// Smallest send opportunity in bytes; equal to the largest for a
    /// fixed grant
    pub min_opportunity_bytes: usize,
    /// Wall clock time per simulated millisecond, in microseconds
    pub tick_us: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            downlink_loss: 0.0,
            uplink_loss: 0.0,
            opportunity_bytes: 200,
            min_opportunity_bytes: 200,
            tick_us: 100,
        }
    }
}

/// Downlink traffic source
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub sdu_count: usize,
    pub min_sdu_bytes: usize,
    pub max_sdu_bytes: usize,
    /// RNG seed for SDU contents, sizes and losses
    pub seed: u64,
    /// Give up after this many simulated milliseconds
    pub max_ticks: u32,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            sdu_count: 1000,
            min_sdu_bytes: 40,
            max_sdu_bytes: 1500,
            seed: 1,
            max_ticks: 1_000_000,
        }
    }
}

impl SimConfig {
    /// Load configuration from TOML file
    pub fn from_toml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SimConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.rlc.validate()?;

        for (name, loss) in [
            ("downlink_loss", self.channel.downlink_loss),
            ("uplink_loss", self.channel.uplink_loss),
        ] {
            if !(0.0..=1.0).contains(&loss) {
                return Err(anyhow::anyhow!("Invalid {}: {}", name, loss));
            }
        }
        if self.channel.min_opportunity_bytes == 0
            || self.channel.min_opportunity_bytes > self.channel.opportunity_bytes
        {
            return Err(anyhow::anyhow!(
                "Invalid opportunity range: {}..={} bytes",
                self.channel.min_opportunity_bytes,
                self.channel.opportunity_bytes
            ));
        }
        if self.traffic.min_sdu_bytes == 0
            || self.traffic.min_sdu_bytes > self.traffic.max_sdu_bytes
            || self.traffic.max_sdu_bytes > MAX_SDU_SIZE
        {
            return Err(anyhow::anyhow!(
                "Invalid SDU size range: {}..={} bytes",
                self.traffic.min_sdu_bytes,
                self.traffic.max_sdu_bytes
            ));
        }
        Ok(())
    }
}
