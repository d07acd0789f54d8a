//! RLC AM Configuration
//!
//! Parameters use the RRC information element names (`pollPDU`,
//! `t-Reordering`, ...) in a whitespace or comma separated `key=value`
//! list, e.g. `"pollPDU=16 pollByte=infinity t-Reordering=35"`.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::RlcError;

/// Largest window the 10-bit sequence number allows
pub const MAX_WINDOW_SIZE: u32 = 512;

/// Acknowledged Mode parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmConfig {
    /// Retransmissions tolerated per PDU before radio link failure
    pub max_retx_threshold: u32,
    /// Poll after this many PDUs; `None` never polls on PDU count
    pub poll_pdu: Option<u32>,
    /// Poll after this many payload bytes; `None` never polls on bytes
    pub poll_byte: Option<u32>,
    /// t-Reordering in milliseconds, 0 disables
    pub t_reordering_ms: u32,
    /// t-StatusProhibit in milliseconds, 0 disables
    pub t_status_prohibit_ms: u32,
    /// t-PollRetransmit in milliseconds, 0 disables
    pub t_poll_retransmit_ms: u32,
    /// Transmit and receive window size in PDUs
    pub window_size: u32,
}

impl Default for AmConfig {
    fn default() -> Self {
        Self {
            max_retx_threshold: 4,
            poll_pdu: Some(8),
            poll_byte: Some(1024),
            t_reordering_ms: 35,
            t_status_prohibit_ms: 5,
            t_poll_retransmit_ms: 5,
            window_size: MAX_WINDOW_SIZE,
        }
    }
}

impl AmConfig {
    /// Parse a `key=value` list on top of the defaults.
    ///
    /// Unknown keys and pairs without `=` are ignored.
    pub fn from_parameters(params: &str) -> Result<Self, RlcError> {
        let mut config = Self::default();

        let pairs = params
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|pair| !pair.is_empty());

        for pair in pairs {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "maxRetxThreshold" => config.max_retx_threshold = parse_u32(key, value)?,
                "amWindowSize" => config.window_size = parse_u32(key, value)?,
                "pollPDU" => config.poll_pdu = parse_threshold(key, value)?,
                "pollByte" => config.poll_byte = parse_threshold(key, value)?,
                "t-StatusProhibit" => config.t_status_prohibit_ms = parse_u32(key, value)?,
                "t-PollRetransmit" => config.t_poll_retransmit_ms = parse_u32(key, value)?,
                "t-Reordering" => config.t_reordering_ms = parse_u32(key, value)?,
                _ => {
                    // rlc/mode, rlc/debug and the UM/PDCP keys land here
                    trace!("Ignoring parameter {}={}", key, value);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Render back in the syntax accepted by [`AmConfig::from_parameters`]
    pub fn to_parameters(&self) -> String {
        format!(
            "maxRetxThreshold={} amWindowSize={} pollPDU={} pollByte={} \
             t-StatusProhibit={} t-PollRetransmit={} t-Reordering={}",
            self.max_retx_threshold,
            self.window_size,
            threshold_to_string(self.poll_pdu),
            threshold_to_string(self.poll_byte),
            self.t_status_prohibit_ms,
            self.t_poll_retransmit_ms,
            self.t_reordering_ms,
        )
    }

    /// Check values that parse but make no sense
    pub fn validate(&self) -> Result<(), RlcError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(RlcError::InvalidConfiguration(format!(
                "amWindowSize {} outside 1..={}",
                self.window_size, MAX_WINDOW_SIZE
            )));
        }
        if self.poll_pdu == Some(0) || self.poll_byte == Some(0) {
            return Err(RlcError::InvalidConfiguration(
                "poll thresholds must be positive or infinity".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, RlcError> {
    value.parse::<u32>().map_err(|_| RlcError::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// `infinity` and `0` both mean "never"
fn parse_threshold(key: &str, value: &str) -> Result<Option<u32>, RlcError> {
    if value.eq_ignore_ascii_case("infinity") {
        return Ok(None);
    }
    let threshold = parse_u32(key, value)?;
    Ok((threshold > 0).then_some(threshold))
}

fn threshold_to_string(threshold: Option<u32>) -> String {
    match threshold {
        Some(n) => n.to_string(),
        None => "infinity".to_string(),
    }
}
