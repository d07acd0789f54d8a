//! RLC AM Link Simulator
//!
//! Drives two RLC AM entities back to back over a lossy in-memory channel,
//! one MAC tick per simulated millisecond, and reports delivery statistics.

mod config;
mod simulator;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::SimConfig;
use simulator::Simulator;

/// RLC AM link simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// AM parameters applied on top of the file, e.g. "pollPDU=16 t-Reordering=35"
    #[arg(long)]
    rlc_params: Option<String>,

    /// Number of SDUs to send
    #[arg(long)]
    sdus: Option<usize>,

    /// Loss probability applied to both directions (0.0 - 1.0)
    #[arg(long)]
    loss: Option<f64>,

    /// Send opportunity size in bytes
    #[arg(long)]
    opportunity: Option<usize>,

    /// Wall clock microseconds per simulated millisecond (0 runs flat out)
    #[arg(long)]
    tick_us: Option<u64>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Print final statistics as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn into_config(self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_toml_file(path)?,
            None => SimConfig::default(),
        };

        if let Some(params) = &self.rlc_params {
            // Keys not named keep the file's values
            let merged = format!("{} {}", config.rlc.to_parameters(), params);
            config.rlc = rlc::AmConfig::from_parameters(&merged)?;
        }
        if let Some(sdus) = self.sdus {
            config.traffic.sdu_count = sdus;
        }
        if let Some(loss) = self.loss {
            config.channel.downlink_loss = loss;
            config.channel.uplink_loss = loss;
        }
        if let Some(bytes) = self.opportunity {
            config.channel.opportunity_bytes = bytes;
            config.channel.min_opportunity_bytes = bytes;
        }
        if let Some(tick_us) = self.tick_us {
            config.channel.tick_us = tick_us;
        }
        if let Some(seed) = self.seed {
            config.traffic.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let json = args.json;
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path);
    }
    let config = args.into_config()?;

    info!("Starting RLC AM link simulator");
    info!("  RLC: {}", config.rlc.to_parameters());
    info!(
        "  Channel: loss DL {} UL {}, opportunity {}..={} bytes",
        config.channel.downlink_loss,
        config.channel.uplink_loss,
        config.channel.min_opportunity_bytes,
        config.channel.opportunity_bytes
    );
    info!(
        "  Traffic: {} SDUs of {}..={} bytes, seed {}",
        config.traffic.sdu_count,
        config.traffic.min_sdu_bytes,
        config.traffic.max_sdu_bytes,
        config.traffic.seed
    );

    let mut sim = Simulator::new(&config)?;
    let max_ticks = config.traffic.max_ticks;
    let period = tokio::time::Duration::from_micros(config.channel.tick_us.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
            _ = interval.tick(), if config.channel.tick_us > 0 => {}
            _ = std::future::ready(()), if config.channel.tick_us == 0 => {
                // Yield so Ctrl-C is still noticed
                tokio::task::yield_now().await;
            }
        }

        sim.tick();

        if sim.now() % 1000 == 0 {
            let stats = sim.stats();
            info!(
                "t={} ms: received {}/{} SDUs, delivered {}, {} DL PDUs ({} lost)",
                stats.elapsed_ms,
                stats.sdus_received,
                stats.sdus_sent,
                stats.sdus_delivered,
                stats.downlink_pdus,
                stats.downlink_lost
            );
        }
        if sim.finished() {
            info!("All SDUs delivered after {} ms", sim.now());
            break;
        }
        if sim.now() >= max_ticks {
            warn!("Stopping after {} ms without completing", max_ticks);
            break;
        }
    }

    let stats = sim.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        info!("Simulation statistics:");
        info!("  Elapsed: {} ms", stats.elapsed_ms);
        info!(
            "  SDUs: sent {}, received {}, delivered {}, corrupted {}",
            stats.sdus_sent, stats.sdus_received, stats.sdus_delivered, stats.sdus_corrupted
        );
        info!(
            "  Downlink: {} PDUs, {} bytes, {} lost",
            stats.downlink_pdus, stats.downlink_bytes, stats.downlink_lost
        );
        info!("  Uplink: {} PDUs, {} lost", stats.uplink_pdus, stats.uplink_lost);
        info!("  Radio link failures: {}", stats.radio_link_failures);
    }

    if stats.sdus_corrupted > 0 {
        return Err(anyhow::anyhow!("{} SDUs arrived corrupted", stats.sdus_corrupted));
    }
    Ok(())
}
