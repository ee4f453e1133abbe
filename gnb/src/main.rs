//! DU Scheduler Application
//!
//! Entry point wiring the radio scheduler to a slot ticker: loads the
//! YAML cell configuration, initializes logging, and drives one slot
//! indication per slot duration, logging the produced results. Radio and
//! fronthaul I/O attach through the scheduler's result and indication
//! interfaces and are out of scope here.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::{CellIndex, SlotPoint, UeIndex};
use scheduler::{SchedNotifier, Scheduler};

mod config;
use config::GnbConfig;

/// 5G DU radio scheduler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: String,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

/// Logs scheduler notifications towards the DU manager
struct DuNotifier;

impl SchedNotifier for DuNotifier {
    fn on_ue_config_complete(&mut self, ue_index: UeIndex) {
        info!("ue={}: configuration complete", ue_index);
    }

    fn on_ue_delete_response(&mut self, ue_index: UeIndex) {
        info!("ue={}: removed from the scheduler", ue_index);
    }

    fn on_rlf_detected(&mut self, ue_index: UeIndex) {
        info!("ue={}: radio link failure detected", ue_index);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    info!("Loading configuration from: {}", args.config);
    let config = GnbConfig::from_yaml_file(&args.config)?;

    // Initialize logging with level from config or override.
    let log_level = args.log_level.as_ref().unwrap_or(&config.log.all_level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let sched_cfg = config.to_scheduler_config()?;
    let cell = &sched_cfg.cells[0];
    info!("Cell configuration:");
    info!("  PCI: {}", cell.pci.0);
    info!("  SCS: {:?}", cell.scs);
    info!("  Bandwidth: {:?} ({} RBs)", cell.bandwidth, cell.nof_dl_rbs);
    info!("  CORESET#0: rbs={} symbols={}", cell.coreset0.rbs, cell.coreset0.nof_symbols);

    let scs = cell.scs;
    let slots_per_frame = scs.slots_per_frame();
    let slot_duration = std::time::Duration::from_micros(scs.slot_duration_us() as u64);

    let mut sched = Scheduler::new(sched_cfg, Box::new(DuNotifier));

    info!("Starting slot loop at {:?} per slot", slot_duration);
    let mut ticker = tokio::time::interval(slot_duration);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut slot = SlotPoint::new(scs, 0, 0);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = sched.slot_indication(slot, CellIndex(0));
                let dl_grants = result.dl.ue_grants.len()
                    + result.dl.sibs.len()
                    + result.dl.rar_grants.len();
                let ul_grants = result.ul.puschs.len() + result.ul.pucchs.len();
                if dl_grants + ul_grants > 0 {
                    debug!(
                        "slot {}: {} DL allocation(s), {} UL allocation(s)",
                        slot, dl_grants, ul_grants
                    );
                }
                slot += 1;
                if slot.to_uint() % (slots_per_frame * 1024) == 0 {
                    debug!("hyperframe rollover at {}", slot);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
