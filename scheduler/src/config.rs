//! Scheduler Configuration
//!
//! Cell-level and UE-level configuration consumed by the scheduler:
//! CORESETs and SearchSpaces, time-domain resource tables, TDD patterns,
//! PRACH parameters and the expert knobs that tune scheduler policy.
//! Structures follow 3GPP TS 38.331 information elements, flattened to the
//! fields the scheduler actually reads.

use std::sync::Arc;

use common::{
    Bandwidth, BwpId, CellId, CellIndex, CoresetId, DuplexMode, LcId, LcgId, Pci, RbRange,
    SearchSpaceId, SlotPoint, SubcarrierSpacing, SymbolRange, NOF_SYMBOLS_PER_SLOT,
};
use serde::{Deserialize, Serialize};

use crate::dci::{DlDciConfigType, UlDciConfigType};

/// Control-resource set parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoresetConfig {
    /// CORESET identifier
    pub id: CoresetId,
    /// RBs occupied by the CORESET, in CRBs
    pub rbs: RbRange,
    /// Number of OFDM symbols (1-3)
    pub nof_symbols: u8,
}

impl CoresetConfig {
    /// CORESET#0 configuration from the MIB table index.
    /// Based on 3GPP TS 38.213 Table 13-1 for {15, 15} kHz SCS.
    pub fn coreset0_from_index(index: u8) -> Option<Self> {
        let (num_rbs, num_symbols, rb_offset) = match index {
            0 => (24, 2, 0),
            1 => (24, 2, 2),
            2 => (24, 2, 4),
            3 => (24, 3, 0),
            4 => (24, 3, 2),
            5 => (24, 3, 4),
            6 => (48, 1, 12),
            7 => (48, 1, 16),
            8 => (48, 2, 12),
            9 => (48, 2, 16),
            10 => (48, 3, 12),
            11 => (48, 3, 16),
            12 => (96, 1, 38),
            13 => (96, 2, 38),
            14 => (96, 3, 38),
            _ => return None,
        };
        Some(Self {
            id: CoresetId::C0,
            rbs: RbRange::new(rb_offset, rb_offset + num_rbs),
            nof_symbols: num_symbols,
        })
    }

    /// Number of CCEs the CORESET provides (1 CCE = 6 REGs, 1 REG = 1 RB x 1 symbol)
    pub fn nof_cces(&self) -> u8 {
        ((self.rbs.len() as u32 * self.nof_symbols as u32) / 6) as u8
    }

    /// Symbols occupied by the CORESET at the start of the slot
    pub fn symbols(&self) -> SymbolRange {
        SymbolRange::new(0, self.nof_symbols)
    }
}

/// SearchSpace flavour, deciding the DCI formats a C-RNTI is scheduled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchSpaceType {
    /// Common search space (fallback DCI 0_0 / 1_0)
    Common,
    /// UE-specific search space monitoring DCI 0_0 / 1_0
    UeSpecificFallback,
    /// UE-specific search space monitoring DCI 0_1 / 1_1
    UeSpecific,
}

/// SearchSpace parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpaceConfig {
    /// SearchSpace identifier
    pub id: SearchSpaceId,
    /// Associated CORESET
    pub coreset_id: CoresetId,
    /// Search space flavour
    pub ss_type: SearchSpaceType,
    /// PDCCH candidates per aggregation level {1, 2, 4, 8, 16}
    pub nof_candidates: [u8; 5],
}

impl SearchSpaceConfig {
    /// DCI format used for C-RNTI DL scheduling in this search space
    pub fn crnti_dl_dci_format(&self) -> DlDciConfigType {
        match self.ss_type {
            SearchSpaceType::Common | SearchSpaceType::UeSpecificFallback => {
                DlDciConfigType::CRntiF1_0
            }
            SearchSpaceType::UeSpecific => DlDciConfigType::CRntiF1_1,
        }
    }

    /// DCI format used for C-RNTI UL scheduling in this search space
    pub fn crnti_ul_dci_format(&self) -> UlDciConfigType {
        match self.ss_type {
            SearchSpaceType::Common | SearchSpaceType::UeSpecificFallback => {
                UlDciConfigType::CRntiF0_0
            }
            SearchSpaceType::UeSpecific => UlDciConfigType::CRntiF0_1,
        }
    }
}

/// One entry of the PDSCH time-domain allocation list
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PdschTimeDomainAlloc {
    /// PDCCH-to-PDSCH slot offset
    pub k0: u32,
    /// PDSCH symbols within the slot
    pub symbols: SymbolRange,
}

/// One entry of the PUSCH time-domain allocation list
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PuschTimeDomainAlloc {
    /// PDCCH-to-PUSCH slot offset
    pub k2: u32,
    /// PUSCH symbols within the slot
    pub symbols: SymbolRange,
}

/// TDD UL/DL slot pattern: the first `nof_dl_slots` of each period are
/// downlink, the last `nof_ul_slots` are uplink, anything in between is
/// a switching gap the scheduler leaves alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TddUlDlPattern {
    /// Pattern period in slots
    pub period_slots: u32,
    /// Leading full-DL slots
    pub nof_dl_slots: u32,
    /// Trailing full-UL slots
    pub nof_ul_slots: u32,
}

/// PRACH occasion timing derived from prach-ConfigurationIndex,
/// TS 38.211 Table 6.3.3.2-2 (FR1 paired spectrum, preamble format 0).
#[derive(Debug, Clone, Copy)]
pub struct PrachTiming {
    /// PRACH occurs when `sfn % x == y`
    pub x: u32,
    /// SFN offset within the x-frame period
    pub y: u32,
    /// Subframes of the matching frame that carry an occasion
    pub subframes: &'static [u32],
}

/// Resolve a prach-ConfigurationIndex into its timing parameters
pub fn prach_timing_from_index(index: u8) -> Option<PrachTiming> {
    let t = match index {
        0 => PrachTiming { x: 16, y: 1, subframes: &[1] },
        1 => PrachTiming { x: 16, y: 1, subframes: &[4] },
        2 => PrachTiming { x: 16, y: 1, subframes: &[7] },
        3 => PrachTiming { x: 8, y: 1, subframes: &[1] },
        4 => PrachTiming { x: 8, y: 1, subframes: &[4] },
        5 => PrachTiming { x: 8, y: 1, subframes: &[7] },
        6 => PrachTiming { x: 4, y: 1, subframes: &[1] },
        7 => PrachTiming { x: 4, y: 1, subframes: &[4] },
        8 => PrachTiming { x: 4, y: 1, subframes: &[7] },
        9 => PrachTiming { x: 2, y: 1, subframes: &[1] },
        10 => PrachTiming { x: 2, y: 1, subframes: &[4] },
        11 => PrachTiming { x: 2, y: 1, subframes: &[7] },
        12 => PrachTiming { x: 2, y: 1, subframes: &[1, 6] },
        13 => PrachTiming { x: 2, y: 1, subframes: &[2, 7] },
        14 => PrachTiming { x: 2, y: 1, subframes: &[3, 8] },
        15 => PrachTiming { x: 1, y: 0, subframes: &[1] },
        16 => PrachTiming { x: 1, y: 0, subframes: &[4] },
        17 => PrachTiming { x: 1, y: 0, subframes: &[7] },
        18 => PrachTiming { x: 1, y: 0, subframes: &[1, 6] },
        19 => PrachTiming { x: 1, y: 0, subframes: &[2, 7] },
        _ => return None,
    };
    Some(t)
}

/// RACH parameters the scheduler needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RachConfig {
    /// prach-ConfigurationIndex
    pub prach_config_index: u8,
    /// First PRB of the PRACH occasion
    pub prach_frequency_start: u16,
    /// Total number of preambles per occasion
    pub total_nof_ra_preambles: u8,
    /// RA response window length in slots
    pub ra_window_slots: u32,
    /// PDCCH-to-Msg3-PUSCH delay in slots
    pub msg3_delay_slots: u32,
}

impl Default for RachConfig {
    fn default() -> Self {
        Self {
            prach_config_index: 16,
            prach_frequency_start: 0,
            total_nof_ra_preambles: 64,
            ra_window_slots: 10,
            msg3_delay_slots: 4,
        }
    }
}

/// Periodic CSI-RS transmission parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CsiRsConfig {
    /// Transmission period in slots
    pub period_slots: u32,
    /// Slot offset within the period
    pub offset_slots: u32,
    /// OFDM symbol carrying the CSI-RS
    pub symbol: u8,
}

/// Periodic CSI reporting on PUCCH
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CsiReportConfig {
    /// Reporting period in slots
    pub period_slots: u32,
    /// Slot offset within the period
    pub offset_slots: u32,
}

/// Static configuration of one cell, frozen at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellConfig {
    /// DU-local cell index
    pub cell_index: CellIndex,
    /// NR cell identity
    pub cell_id: CellId,
    /// Physical cell identity
    pub pci: Pci,
    /// Cell numerology
    pub scs: SubcarrierSpacing,
    /// Channel bandwidth
    pub bandwidth: Bandwidth,
    /// DL transmission bandwidth in RBs
    pub nof_dl_rbs: u16,
    /// UL transmission bandwidth in RBs
    pub nof_ul_rbs: u16,
    /// Duplexing
    pub duplex: DuplexMode,
    /// TDD pattern, present iff duplex is TDD
    pub tdd: Option<TddUlDlPattern>,
    /// CORESET#0
    pub coreset0: CoresetConfig,
    /// Dedicated CORESET spanning the initial BWP
    pub coreset1: CoresetConfig,
    /// Common and dedicated search spaces broadcast by this cell
    pub search_spaces: Vec<SearchSpaceConfig>,
    /// Type-1 CSS used for RA and Msg4
    pub ra_search_space_id: SearchSpaceId,
    /// PDSCH time-domain allocation list
    pub pdsch_td_list: Vec<PdschTimeDomainAlloc>,
    /// PUSCH time-domain allocation list
    pub pusch_td_list: Vec<PuschTimeDomainAlloc>,
    /// dl-DataToUL-ACK candidate list
    pub k1_candidates: Vec<u8>,
    /// SIB1 repetition period in slots
    pub sib1_period_slots: u32,
    /// SIB1 payload length in bytes
    pub sib1_payload_bytes: u32,
    /// RACH parameters
    pub rach: RachConfig,
    /// Periodic CSI-RS, if configured
    pub csi_rs: Option<CsiRsConfig>,
}

impl CellConfig {
    /// A 20 MHz FDD cell at 15 kHz SCS with default common configuration.
    /// Used as the baseline by the binary's config translation and by tests.
    pub fn default_fdd(cell_index: CellIndex) -> Self {
        let scs = SubcarrierSpacing::Scs15;
        let bandwidth = Bandwidth::Bw20;
        let nof_rbs = bandwidth.nof_rbs(scs).unwrap();
        let coreset0 = CoresetConfig::coreset0_from_index(1).unwrap();
        let coreset1 = CoresetConfig {
            id: CoresetId(1),
            rbs: RbRange::new(0, nof_rbs),
            nof_symbols: 2,
        };
        Self {
            cell_index,
            cell_id: CellId(1),
            pci: Pci(1),
            scs,
            bandwidth,
            nof_dl_rbs: nof_rbs,
            nof_ul_rbs: nof_rbs,
            duplex: DuplexMode::Fdd,
            tdd: None,
            coreset0,
            coreset1,
            search_spaces: vec![
                SearchSpaceConfig {
                    id: SearchSpaceId::SS0,
                    coreset_id: CoresetId::C0,
                    ss_type: SearchSpaceType::Common,
                    nof_candidates: [0, 0, 2, 2, 0],
                },
                SearchSpaceConfig {
                    id: SearchSpaceId::SS1,
                    coreset_id: CoresetId::C0,
                    ss_type: SearchSpaceType::Common,
                    nof_candidates: [0, 0, 2, 2, 0],
                },
                SearchSpaceConfig {
                    id: SearchSpaceId::SS2,
                    coreset_id: CoresetId(1),
                    ss_type: SearchSpaceType::UeSpecificFallback,
                    nof_candidates: [0, 2, 4, 2, 0],
                },
            ],
            ra_search_space_id: SearchSpaceId::SS1,
            pdsch_td_list: vec![PdschTimeDomainAlloc {
                k0: 0,
                symbols: SymbolRange::new(2, NOF_SYMBOLS_PER_SLOT),
            }],
            pusch_td_list: vec![PuschTimeDomainAlloc {
                k2: 4,
                symbols: SymbolRange::new(0, NOF_SYMBOLS_PER_SLOT),
            }],
            k1_candidates: vec![4, 5, 6, 7, 8],
            sib1_period_slots: 16 * scs.slots_per_frame(),
            sib1_payload_bytes: 100,
            rach: RachConfig::default(),
            csi_rs: None,
        }
    }

    /// Whether DL transmissions may be scheduled in the slot
    pub fn is_dl_enabled(&self, slot: SlotPoint) -> bool {
        match (self.duplex, &self.tdd) {
            (DuplexMode::Fdd, _) => true,
            (DuplexMode::Tdd, Some(p)) => slot.to_uint() % p.period_slots < p.nof_dl_slots,
            (DuplexMode::Tdd, None) => false,
        }
    }

    /// Whether UL transmissions may be scheduled in the slot
    pub fn is_ul_enabled(&self, slot: SlotPoint) -> bool {
        match (self.duplex, &self.tdd) {
            (DuplexMode::Fdd, _) => true,
            (DuplexMode::Tdd, Some(p)) => {
                slot.to_uint() % p.period_slots >= p.period_slots - p.nof_ul_slots
            }
            (DuplexMode::Tdd, None) => false,
        }
    }

    /// Whether every symbol of the slot is uplink (required for PUCCH)
    pub fn is_fully_ul_enabled(&self, slot: SlotPoint) -> bool {
        self.is_ul_enabled(slot)
    }

    /// CRB limits of the initial DL BWP
    pub fn dl_crb_lims(&self) -> RbRange {
        RbRange::new(0, self.nof_dl_rbs)
    }

    /// CRB limits of the initial UL BWP
    pub fn ul_crb_lims(&self) -> RbRange {
        RbRange::new(0, self.nof_ul_rbs)
    }

    /// Look up a broadcast search space by id
    pub fn find_search_space(&self, id: SearchSpaceId) -> Option<&SearchSpaceConfig> {
        self.search_spaces.iter().find(|ss| ss.id == id)
    }

    /// Look up a CORESET by id
    pub fn find_coreset(&self, id: CoresetId) -> Option<&CoresetConfig> {
        if id == CoresetId::C0 {
            return Some(&self.coreset0);
        }
        if self.coreset1.id == id {
            return Some(&self.coreset1);
        }
        None
    }
}

/// Scheduler policy knobs, shared by all cells
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertConfig {
    /// Maximum HARQ retransmissions before a process is dropped
    pub max_nof_harq_retxs: u8,
    /// Consecutive UL CRC KOs that trigger a radio link failure indication
    pub max_consecutive_kos: u32,
    /// RV sequence walked across PDSCH retransmissions
    pub pdsch_rv_sequence: Vec<u8>,
    /// RV sequence walked across PUSCH retransmissions
    pub pusch_rv_sequence: Vec<u8>,
    /// Slots past the expected ACK after which a HARQ process times out
    pub harq_timeout_slots: u32,
    /// Exponential-averaging weight of new PUSCH SNR reports
    pub pusch_snr_ewma_alpha: f64,
}

impl Default for ExpertConfig {
    fn default() -> Self {
        Self {
            max_nof_harq_retxs: 4,
            max_consecutive_kos: 100,
            pdsch_rv_sequence: vec![0, 2, 3, 1],
            pusch_rv_sequence: vec![0, 2, 3, 1],
            harq_timeout_slots: 256,
            pusch_snr_ewma_alpha: 0.5,
        }
    }
}

/// Per-logical-channel configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LogicalChannelConfig {
    /// Logical channel id
    pub lcid: LcId,
    /// Logical channel group the channel reports BSRs under
    pub lcg: LcgId,
}

/// Periodic scheduling request opportunity on PUCCH
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SrConfig {
    /// SR period in slots
    pub period_slots: u32,
    /// Slot offset within the period
    pub offset_slots: u32,
}

/// UE-dedicated configuration delivered with the creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UeDedicatedConfig {
    /// Dedicated search spaces of the active BWP
    pub search_spaces: Vec<SearchSpaceConfig>,
    /// Number of DL and UL HARQ processes
    pub nof_harq_processes: u8,
    /// Periodic CSI report configuration, if any
    pub csi_report: Option<CsiReportConfig>,
    /// Periodic SR opportunity, if any
    pub sr: Option<SrConfig>,
    /// Active logical channels
    pub logical_channels: Vec<LogicalChannelConfig>,
}

impl UeDedicatedConfig {
    /// Default dedicated configuration: SearchSpace#2 on CORESET#1, SRB1
    pub fn default_with_ss2() -> Self {
        Self {
            search_spaces: vec![SearchSpaceConfig {
                id: SearchSpaceId::SS2,
                coreset_id: CoresetId(1),
                ss_type: SearchSpaceType::UeSpecificFallback,
                nof_candidates: [0, 2, 4, 2, 0],
            }],
            nof_harq_processes: 16,
            csi_report: None,
            sr: None,
            logical_channels: vec![LogicalChannelConfig {
                lcid: LcId::SRB1,
                lcg: LcgId(0),
            }],
        }
    }
}

/// A search space resolved against its CORESET and BWP, precomputed per UE
/// so the hot path does no configuration lookups.
#[derive(Debug, Clone)]
pub struct SearchSpaceInfo {
    /// The search space parameters
    pub cfg: SearchSpaceConfig,
    /// The CORESET the search space lives in
    pub coreset: CoresetConfig,
    /// BWP the search space belongs to
    pub bwp_id: BwpId,
    /// CRB limits for DL allocations scheduled from this search space
    pub dl_crb_lims: RbRange,
    /// CRB limits for UL allocations scheduled from this search space
    pub ul_crb_lims: RbRange,
    /// Applicable PDSCH time-domain allocations
    pub pdsch_td_list: Vec<PdschTimeDomainAlloc>,
    /// Applicable PUSCH time-domain allocations
    pub pusch_td_list: Vec<PuschTimeDomainAlloc>,
    /// dl-DataToUL-ACK candidates in preference order
    pub k1_candidates: Vec<u8>,
}

impl SearchSpaceInfo {
    /// DCI format for C-RNTI DL grants in this search space
    pub fn crnti_dl_dci_format(&self) -> DlDciConfigType {
        self.cfg.crnti_dl_dci_format()
    }

    /// DCI format for C-RNTI UL grants in this search space
    pub fn crnti_ul_dci_format(&self) -> UlDciConfigType {
        self.cfg.crnti_ul_dci_format()
    }
}

/// The complete configuration of a UE on one serving cell
#[derive(Debug, Clone)]
pub struct UeCellConfig {
    /// The cell's static configuration
    pub cell_cfg: Arc<CellConfig>,
    /// The UE-dedicated part
    pub dedicated: UeDedicatedConfig,
    /// Resolved search spaces: cell common ones plus dedicated ones
    search_spaces: Vec<SearchSpaceInfo>,
}

impl UeCellConfig {
    /// Resolve the dedicated configuration against the cell
    pub fn new(cell_cfg: Arc<CellConfig>, dedicated: UeDedicatedConfig) -> Self {
        let mut search_spaces = Vec::new();
        for ss in cell_cfg.search_spaces.iter().chain(dedicated.search_spaces.iter()) {
            let coreset = match cell_cfg.find_coreset(ss.coreset_id) {
                Some(cs) => cs.clone(),
                None => continue,
            };
            // DL allocations scheduled in a CSS are constrained to the CORESET
            // RBs; dedicated search spaces span the whole BWP.
            let dl_lims = match ss.ss_type {
                SearchSpaceType::Common => coreset.rbs,
                _ => cell_cfg.dl_crb_lims(),
            };
            search_spaces.push(SearchSpaceInfo {
                cfg: ss.clone(),
                coreset,
                bwp_id: BwpId::INITIAL,
                dl_crb_lims: dl_lims,
                ul_crb_lims: cell_cfg.ul_crb_lims(),
                pdsch_td_list: cell_cfg.pdsch_td_list.clone(),
                pusch_td_list: cell_cfg.pusch_td_list.clone(),
                k1_candidates: cell_cfg.k1_candidates.clone(),
            });
        }
        Self {
            cell_cfg,
            dedicated,
            search_spaces,
        }
    }

    /// Look up a resolved search space by id
    pub fn find_search_space(&self, id: SearchSpaceId) -> Option<&SearchSpaceInfo> {
        // Dedicated entries are appended last and take precedence.
        self.search_spaces.iter().rev().find(|ss| ss.cfg.id == id)
    }

    /// The UE-dedicated search space used for C-RNTI scheduling
    pub fn ue_search_space(&self) -> &SearchSpaceInfo {
        self.search_spaces
            .iter()
            .rev()
            .find(|ss| ss.cfg.ss_type != SearchSpaceType::Common)
            .unwrap_or_else(|| self.search_spaces.last().expect("no search spaces configured"))
    }

    /// Whether `slot` is a CSI reporting opportunity for this UE
    pub fn is_csi_slot(&self, slot: SlotPoint) -> bool {
        match &self.dedicated.csi_report {
            Some(csi) => {
                (slot.to_uint() + csi.period_slots - (csi.offset_slots % csi.period_slots))
                    % csi.period_slots
                    == 0
            }
            None => false,
        }
    }

    /// Whether `slot` is an SR opportunity for this UE
    pub fn is_sr_slot(&self, slot: SlotPoint) -> bool {
        match &self.dedicated.sr {
            Some(sr) => {
                (slot.to_uint() + sr.period_slots - (sr.offset_slots % sr.period_slots))
                    % sr.period_slots
                    == 0
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coreset0_table() {
        let cs = CoresetConfig::coreset0_from_index(1).unwrap();
        assert_eq!(cs.rbs, RbRange::new(2, 26));
        assert_eq!(cs.nof_symbols, 2);
        assert_eq!(cs.nof_cces(), 8);
        assert!(CoresetConfig::coreset0_from_index(20).is_none());
    }

    #[test]
    fn test_fdd_always_enabled() {
        let cfg = CellConfig::default_fdd(CellIndex(0));
        let sl = SlotPoint::new(cfg.scs, 3, 7);
        assert!(cfg.is_dl_enabled(sl));
        assert!(cfg.is_fully_ul_enabled(sl));
    }

    #[test]
    fn test_tdd_pattern() {
        let mut cfg = CellConfig::default_fdd(CellIndex(0));
        cfg.duplex = DuplexMode::Tdd;
        cfg.tdd = Some(TddUlDlPattern {
            period_slots: 10,
            nof_dl_slots: 6,
            nof_ul_slots: 3,
        });
        let sl0 = SlotPoint::new(cfg.scs, 0, 0);
        assert!(cfg.is_dl_enabled(sl0));
        assert!(!cfg.is_ul_enabled(sl0));
        let sl7 = SlotPoint::new(cfg.scs, 0, 7);
        assert!(!cfg.is_dl_enabled(sl7));
        assert!(cfg.is_ul_enabled(sl7));
        let sl6 = SlotPoint::new(cfg.scs, 0, 6);
        assert!(!cfg.is_dl_enabled(sl6));
        assert!(!cfg.is_ul_enabled(sl6));
    }

    #[test]
    fn test_ue_cell_config_search_spaces() {
        let cell = Arc::new(CellConfig::default_fdd(CellIndex(0)));
        let ue_cfg = UeCellConfig::new(cell, UeDedicatedConfig::default_with_ss2());
        let ss2 = ue_cfg.find_search_space(SearchSpaceId::SS2).unwrap();
        assert_eq!(ss2.crnti_dl_dci_format(), DlDciConfigType::CRntiF1_0);
        // Dedicated SS spans the BWP, common SS is CORESET#0-bound.
        assert_eq!(ss2.dl_crb_lims.len(), 106);
        let ss0 = ue_cfg.find_search_space(SearchSpaceId::SS0).unwrap();
        assert_eq!(ss0.dl_crb_lims, ss0.coreset.rbs);
    }

    #[test]
    fn test_csi_slot_periodicity() {
        let cell = Arc::new(CellConfig::default_fdd(CellIndex(0)));
        let mut ded = UeDedicatedConfig::default_with_ss2();
        ded.csi_report = Some(CsiReportConfig {
            period_slots: 40,
            offset_slots: 3,
        });
        let ue_cfg = UeCellConfig::new(cell, ded);
        assert!(ue_cfg.is_csi_slot(SlotPoint::new(SubcarrierSpacing::Scs15, 0, 3)));
        assert!(ue_cfg.is_csi_slot(SlotPoint::new(SubcarrierSpacing::Scs15, 4, 3)));
        assert!(!ue_cfg.is_csi_slot(SlotPoint::new(SubcarrierSpacing::Scs15, 0, 4)));
    }

    #[test]
    fn test_prach_timing_table() {
        let t = prach_timing_from_index(16).unwrap();
        assert_eq!(t.x, 1);
        assert_eq!(t.subframes, &[4]);
        assert!(prach_timing_from_index(200).is_none());
    }
}
