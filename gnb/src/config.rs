//! YAML Configuration Structures
//!
//! The srsRAN-compatible subset of the gNodeB YAML format the DU
//! scheduler consumes, plus the translation into the scheduler's typed
//! configuration. The file is read once at startup and frozen.

use common::{Bandwidth, CellId, CellIndex, DuplexMode, Pci, SubcarrierSpacing};
use scheduler::config::{CellConfig, CoresetConfig, ExpertConfig, TddUlDlPattern};
use scheduler::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GnbConfig {
    /// Cell configuration
    pub cell_cfg: CellCfgSection,
    /// Scheduler policy overrides
    #[serde(default)]
    pub sched: SchedSection,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Cell configuration section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellCfgSection {
    /// Channel bandwidth in MHz
    #[serde(rename = "channel_bandwidth_MHz")]
    pub channel_bandwidth_mhz: u32,
    /// Common subcarrier spacing in kHz
    pub common_scs: u32,
    /// Physical Cell ID
    pub pci: u16,
    /// PDCCH configuration
    pub pdcch: PdcchSection,
    /// PRACH configuration
    pub prach: PrachSection,
    /// TDD pattern; absent for FDD cells
    #[serde(default)]
    pub tdd_ul_dl_cfg: Option<TddSection>,
}

/// Common PDCCH configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PdcchSection {
    /// CORESET#0 index from the MIB
    pub coreset0_index: u8,
    /// SearchSpace#0 index
    #[serde(default)]
    pub ss0_index: u8,
}

/// PRACH configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrachSection {
    /// PRACH configuration index
    pub prach_config_index: u8,
    /// PRACH frequency start
    #[serde(default)]
    pub prach_frequency_start: u16,
    /// Total number of RA preambles
    #[serde(default = "default_total_nof_ra_preambles")]
    pub total_nof_ra_preambles: u8,
}

fn default_total_nof_ra_preambles() -> u8 {
    64
}

/// TDD UL/DL pattern section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TddSection {
    /// Pattern period in slots
    pub dl_ul_tx_period_slots: u32,
    /// Leading DL slots
    pub nof_dl_slots: u32,
    /// Trailing UL slots
    pub nof_ul_slots: u32,
}

/// Scheduler policy overrides
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SchedSection {
    /// Maximum HARQ retransmissions
    pub max_harq_retxs: Option<u8>,
    /// Consecutive UL KOs that raise an RLF
    pub max_consecutive_kos: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GnbConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GnbConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Translate the YAML record into the scheduler's typed configuration
    pub fn to_scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let scs = match self.cell_cfg.common_scs {
            15 => SubcarrierSpacing::Scs15,
            30 => SubcarrierSpacing::Scs30,
            60 => SubcarrierSpacing::Scs60,
            _ => anyhow::bail!("unsupported subcarrier spacing: {} kHz", self.cell_cfg.common_scs),
        };
        let bandwidth = match self.cell_cfg.channel_bandwidth_mhz {
            5 => Bandwidth::Bw5,
            10 => Bandwidth::Bw10,
            15 => Bandwidth::Bw15,
            20 => Bandwidth::Bw20,
            25 => Bandwidth::Bw25,
            30 => Bandwidth::Bw30,
            40 => Bandwidth::Bw40,
            50 => Bandwidth::Bw50,
            60 => Bandwidth::Bw60,
            80 => Bandwidth::Bw80,
            100 => Bandwidth::Bw100,
            other => anyhow::bail!("unsupported bandwidth: {} MHz", other),
        };
        let nof_rbs = bandwidth
            .nof_rbs(scs)
            .ok_or_else(|| anyhow::anyhow!("invalid bandwidth and SCS combination"))?;
        let pci = Pci::new(self.cell_cfg.pci)
            .ok_or_else(|| anyhow::anyhow!("invalid PCI: {}", self.cell_cfg.pci))?;
        let coreset0 = CoresetConfig::coreset0_from_index(self.cell_cfg.pdcch.coreset0_index)
            .ok_or_else(|| {
                anyhow::anyhow!("invalid CORESET#0 index: {}", self.cell_cfg.pdcch.coreset0_index)
            })?;

        let mut cell = CellConfig::default_fdd(CellIndex(0));
        cell.cell_id = CellId(self.cell_cfg.pci);
        cell.pci = pci;
        cell.scs = scs;
        cell.bandwidth = bandwidth;
        cell.nof_dl_rbs = nof_rbs;
        cell.nof_ul_rbs = nof_rbs;
        cell.coreset0 = coreset0;
        cell.coreset1.rbs = common::RbRange::new(0, nof_rbs);
        cell.sib1_period_slots = 16 * scs.slots_per_frame();
        cell.rach.prach_config_index = self.cell_cfg.prach.prach_config_index;
        cell.rach.prach_frequency_start = self.cell_cfg.prach.prach_frequency_start;
        cell.rach.total_nof_ra_preambles = self.cell_cfg.prach.total_nof_ra_preambles;
        if let Some(tdd) = &self.cell_cfg.tdd_ul_dl_cfg {
            cell.duplex = DuplexMode::Tdd;
            cell.tdd = Some(TddUlDlPattern {
                period_slots: tdd.dl_ul_tx_period_slots,
                nof_dl_slots: tdd.nof_dl_slots,
                nof_ul_slots: tdd.nof_ul_slots,
            });
        }

        let mut expert = ExpertConfig::default();
        if let Some(v) = self.sched.max_harq_retxs {
            expert.max_nof_harq_retxs = v;
        }
        if let Some(v) = self.sched.max_consecutive_kos {
            expert.max_consecutive_kos = v;
        }

        Ok(SchedulerConfig {
            expert,
            cells: vec![cell],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cell_cfg:
  channel_bandwidth_MHz: 20
  common_scs: 15
  pci: 69
  pdcch:
    coreset0_index: 1
  prach:
    prach_config_index: 16
sched:
  max_consecutive_kos: 10
log:
  all_level: debug
"#;

    #[test]
    fn test_parse_and_translate() {
        let cfg: GnbConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.log.all_level, "debug");
        let sched = cfg.to_scheduler_config().unwrap();
        assert_eq!(sched.cells.len(), 1);
        assert_eq!(sched.cells[0].pci, Pci(69));
        assert_eq!(sched.cells[0].nof_dl_rbs, 106);
        assert_eq!(sched.expert.max_consecutive_kos, 10);
        // Unset overrides keep their defaults.
        assert_eq!(sched.expert.max_nof_harq_retxs, 4);
    }

    #[test]
    fn test_invalid_combination_rejected() {
        let mut cfg: GnbConfig = serde_yaml::from_str(SAMPLE).unwrap();
        cfg.cell_cfg.channel_bandwidth_mhz = 100;
        cfg.cell_cfg.common_scs = 15;
        assert!(cfg.to_scheduler_config().is_err());
    }
}
