//! UE State and Repository
//!
//! Per-user scheduler state: serving-cell context with HARQ entity and
//! link-quality metrics, logical-channel buffer counters, pending
//! scheduling request, and the repository that owns every UE. References
//! into the repository are index-based; deletion is deferred to a slot
//! boundary once the user has no HARQ process in flight.

use std::sync::Arc;

use common::{
    BwpId, CellIndex, HarqId, LcId, LcgId, Rnti, SlotPoint, SymbolRange, UeIndex, MAX_NOF_LCGS,
};
use tracing::{debug, warn};

use crate::config::{ExpertConfig, UeCellConfig};
use crate::harq::{DlHarqProcess, HarqEntity, HarqOutcome, UlHarqProcess};
use crate::mcs::{self, SchConfigParams};
use crate::result::DlTbLcInfo;
use crate::SchedNotifier;

/// Wideband CQI assumed before the first report arrives
const INITIAL_WB_CQI: u8 = 7;

/// Bytes of MAC subheader overhead per multiplexed SDU
const MAC_SUBHEADER_BYTES: u32 = 3;

/// Bytes a pending MAC CE occupies in a transport block
const MAC_CE_BYTES: u32 = 2;

/// Highest LCID tracked per UE
const NOF_LCIDS: usize = 33;

/// MCS and PRB estimate for a pending-bytes amount
#[derive(Debug, Clone, Copy)]
pub struct GrantPrbsMcs {
    /// MCS to schedule with
    pub mcs: u8,
    /// PRBs required to carry the pending bytes
    pub nof_prbs: u16,
}

/// Link-quality state of a UE serving cell
#[derive(Debug, Clone, Copy)]
pub struct UeCellMetrics {
    /// PUSCH SNR exponential moving average, in dB
    pub pusch_snr_db: f64,
    /// UL CRC failures since the last success
    pub consecutive_pusch_kos: u32,
    /// DL HARQ transport blocks dropped since the last ACK
    pub consecutive_dl_kos: u32,
    /// Latest reported wideband CQI
    pub latest_wb_cqi: u8,
}

/// Context of a UE on one serving cell
#[derive(Debug)]
pub struct UeCell {
    /// Owning UE
    pub ue_index: UeIndex,
    /// Serving cell
    pub cell_index: CellIndex,
    crnti: Rnti,
    expert: Arc<ExpertConfig>,
    /// Resolved configuration of the UE on this cell
    pub cfg: UeCellConfig,
    /// DL and UL HARQ process tables
    pub harqs: HarqEntity,
    metrics: UeCellMetrics,
    active: bool,
}

impl UeCell {
    /// Build the serving-cell context
    pub fn new(
        ue_index: UeIndex,
        crnti: Rnti,
        expert: Arc<ExpertConfig>,
        cfg: UeCellConfig,
    ) -> Self {
        let cell_index = cfg.cell_cfg.cell_index;
        let nof_harqs = cfg.dedicated.nof_harq_processes;
        Self {
            ue_index,
            cell_index,
            crnti,
            expert,
            cfg,
            harqs: HarqEntity::new(ue_index, crnti, nof_harqs),
            metrics: UeCellMetrics {
                pusch_snr_db: 0.0,
                consecutive_pusch_kos: 0,
                consecutive_dl_kos: 0,
                latest_wb_cqi: INITIAL_WB_CQI,
            },
            active: true,
        }
    }

    /// The C-RNTI of the UE on this cell
    pub fn rnti(&self) -> Rnti {
        self.crnti
    }

    /// Whether the carrier is schedulable
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The active bandwidth part
    pub fn active_bwp_id(&self) -> BwpId {
        BwpId::INITIAL
    }

    /// Current link-quality metrics
    pub fn metrics(&self) -> &UeCellMetrics {
        &self.metrics
    }

    /// Apply a reconfiguration
    pub fn handle_reconfiguration(&mut self, cfg: UeCellConfig) {
        self.cfg = cfg;
    }

    /// Record a wideband CQI report
    pub fn set_latest_wb_cqi(&mut self, wb_cqi: u8) {
        self.metrics.latest_wb_cqi = wb_cqi.min(15);
    }

    /// RV for the next PDSCH transmission of a process
    pub fn pdsch_rv(&self, h: &DlHarqProcess) -> u8 {
        let seq = &self.expert.pdsch_rv_sequence;
        seq[h.nof_retxs as usize % seq.len()]
    }

    /// RV for the next PUSCH transmission of a process
    pub fn pusch_rv(&self, h: &UlHarqProcess) -> u8 {
        let seq = &self.expert.pusch_rv_sequence;
        seq[h.nof_retxs as usize % seq.len()]
    }

    /// Track a DL HARQ outcome; returns whether the dropped-TB count just
    /// crossed the consecutive-KO threshold
    pub fn note_dl_harq_outcome(&mut self, outcome: HarqOutcome) -> bool {
        match outcome {
            HarqOutcome::Acked => {
                self.metrics.consecutive_dl_kos = 0;
                false
            }
            HarqOutcome::NackRetx => false,
            HarqOutcome::Failure => {
                self.metrics.consecutive_dl_kos += 1;
                self.metrics.consecutive_dl_kos == self.expert.max_consecutive_kos
            }
        }
    }

    /// Outcome of routing a CRC PDU into the UL HARQ entity
    pub fn handle_crc_pdu(
        &mut self,
        pusch_slot: SlotPoint,
        harq_id: HarqId,
        crc_ok: bool,
        snr_db: Option<f64>,
    ) -> Option<CrcOutcome> {
        if let Some(snr) = snr_db {
            let a = self.expert.pusch_snr_ewma_alpha;
            self.metrics.pusch_snr_db = a * snr + (1.0 - a) * self.metrics.pusch_snr_db;
        }

        let (tbs_bytes, outcome) = self.harqs.ul_crc_info(pusch_slot, harq_id, crc_ok)?;

        let mut rlf_threshold_crossed = false;
        if crc_ok {
            self.metrics.consecutive_pusch_kos = 0;
        } else {
            self.metrics.consecutive_pusch_kos += 1;
            rlf_threshold_crossed =
                self.metrics.consecutive_pusch_kos == self.expert.max_consecutive_kos;
        }
        Some(CrcOutcome {
            tbs_bytes,
            outcome,
            rlf_threshold_crossed,
        })
    }

    /// Estimate the PRBs needed to carry `pending_bytes` downlink
    pub fn required_dl_prbs(&self, symbols: SymbolRange, pending_bytes: u32) -> Option<GrantPrbsMcs> {
        let mcs = mcs::map_cqi_to_mcs(self.metrics.latest_wb_cqi)?;
        let params = SchConfigParams::pdsch(symbols.len());
        let max = self.cfg.cell_cfg.nof_dl_rbs;
        let nof_prbs = mcs::required_prbs(&params, mcs, pending_bytes, max).max(1);
        Some(GrantPrbsMcs { mcs, nof_prbs })
    }

    /// Estimate the PRBs needed to carry `pending_bytes` uplink
    pub fn required_ul_prbs(&self, symbols: SymbolRange, pending_bytes: u32) -> GrantPrbsMcs {
        let mcs = mcs::map_snr_to_mcs_ul(self.metrics.pusch_snr_db);
        let params = SchConfigParams::pusch(symbols.len());
        let max = self.cfg.cell_cfg.nof_ul_rbs;
        let nof_prbs = mcs::required_prbs(&params, mcs, pending_bytes, max).max(1);
        GrantPrbsMcs { mcs, nof_prbs }
    }
}

/// Result of processing one CRC PDU
#[derive(Debug, Clone, Copy)]
pub struct CrcOutcome {
    /// Transport block size of the acknowledged transmission
    pub tbs_bytes: u32,
    /// HARQ state transition taken
    pub outcome: HarqOutcome,
    /// Whether this KO crossed the consecutive-KO threshold
    pub rlf_threshold_crossed: bool,
}

/// Scheduler state of one user
#[derive(Debug)]
pub struct Ue {
    /// DU-local index
    pub ue_index: UeIndex,
    /// Assigned C-RNTI
    pub crnti: Rnti,
    pcell: UeCell,
    dl_buffer_bytes: [u32; NOF_LCIDS],
    pending_ce_bytes: u32,
    ul_lcg_bytes: [u32; MAX_NOF_LCGS],
    sr_pending: bool,
    /// Slot the pending SR was detected in
    pub sr_slot: Option<SlotPoint>,
    /// Set once removal is requested; blocks new transmissions
    pub deletion_pending: bool,
}

impl Ue {
    /// Create a user with its primary serving cell
    pub fn new(
        ue_index: UeIndex,
        crnti: Rnti,
        expert: Arc<ExpertConfig>,
        cfg: UeCellConfig,
    ) -> Self {
        Self {
            ue_index,
            crnti,
            pcell: UeCell::new(ue_index, crnti, expert, cfg),
            dl_buffer_bytes: [0; NOF_LCIDS],
            pending_ce_bytes: 0,
            ul_lcg_bytes: [0; MAX_NOF_LCGS],
            sr_pending: false,
            sr_slot: None,
            deletion_pending: false,
        }
    }

    /// The primary serving cell
    pub fn get_pcell(&self) -> &UeCell {
        &self.pcell
    }

    /// Mutable primary serving cell
    pub fn get_pcell_mut(&mut self) -> &mut UeCell {
        &mut self.pcell
    }

    /// Serving cell by cell index, if this UE is configured on it
    pub fn find_cell(&self, cell_index: CellIndex) -> Option<&UeCell> {
        (self.pcell.cell_index == cell_index).then_some(&self.pcell)
    }

    /// Mutable serving cell by cell index
    pub fn find_cell_mut(&mut self, cell_index: CellIndex) -> Option<&mut UeCell> {
        (self.pcell.cell_index == cell_index).then(|| &mut self.pcell)
    }

    /// Replace the DL buffer occupancy of a logical channel
    pub fn handle_dl_buffer_state(&mut self, lcid: LcId, bytes: u32) {
        if (lcid.0 as usize) < NOF_LCIDS {
            self.dl_buffer_bytes[lcid.0 as usize] = bytes;
        } else {
            warn!("ue={}: DL buffer state for invalid lcid={}", self.ue_index, lcid.0);
        }
    }

    /// Queue a MAC CE for downlink transmission
    pub fn handle_dl_mac_ce(&mut self, _ce_lcid: u8) {
        self.pending_ce_bytes += MAC_CE_BYTES;
    }

    /// Apply a buffer status report
    pub fn handle_bsr(&mut self, bsr_type: BsrType, reported: &[(LcgId, u32)]) {
        if matches!(bsr_type, BsrType::Long) {
            // A long BSR reports every LCG; unreported groups are empty.
            self.ul_lcg_bytes = [0; MAX_NOF_LCGS];
        }
        for (lcg, bytes) in reported {
            if (lcg.0 as usize) < MAX_NOF_LCGS {
                self.ul_lcg_bytes[lcg.0 as usize] = *bytes;
            }
        }
    }

    /// DL bytes waiting across all logical channels and pending CEs
    pub fn pending_dl_bytes(&self) -> u32 {
        self.pending_ce_bytes + self.dl_buffer_bytes.iter().sum::<u32>()
    }

    /// UL bytes the UE reported across all logical channel groups
    pub fn pending_ul_bytes(&self) -> u32 {
        self.ul_lcg_bytes.iter().sum()
    }

    /// Whether a scheduling request is outstanding
    pub fn has_pending_sr(&self) -> bool {
        self.sr_pending
    }

    /// Record a detected scheduling request
    pub fn handle_sr_indication(&mut self, slot: SlotPoint) {
        self.sr_pending = true;
        self.sr_slot = Some(slot);
    }

    /// Clear the pending SR after an UL grant
    pub fn reset_sr_indication(&mut self) {
        self.sr_pending = false;
        self.sr_slot = None;
    }

    /// Fill a new DL transport block with pending CEs and logical-channel
    /// bytes in ascending-LCID priority order. Updates the buffer counters
    /// and returns the per-channel composition.
    pub fn build_dl_transport_block_info(&mut self, tbs_bytes: u32) -> Vec<DlTbLcInfo> {
        let mut remaining = tbs_bytes;
        let mut tb = Vec::new();

        if self.pending_ce_bytes > 0 && remaining > MAC_SUBHEADER_BYTES {
            let take = (remaining - MAC_SUBHEADER_BYTES).min(self.pending_ce_bytes);
            self.pending_ce_bytes -= take;
            remaining -= take + MAC_SUBHEADER_BYTES;
        }

        for lcid in 0..NOF_LCIDS {
            if remaining <= MAC_SUBHEADER_BYTES {
                break;
            }
            let buffered = self.dl_buffer_bytes[lcid];
            if buffered == 0 {
                continue;
            }
            let take = (remaining - MAC_SUBHEADER_BYTES).min(buffered);
            self.dl_buffer_bytes[lcid] -= take;
            remaining -= take + MAC_SUBHEADER_BYTES;
            tb.push(DlTbLcInfo {
                lcid: LcId(lcid as u8),
                nof_bytes: take,
            });
        }
        tb
    }
}

/// Buffer status report flavours, TS 38.321 clause 6.1.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BsrType {
    /// One LCG
    Short,
    /// All LCGs
    Long,
    /// One LCG, value truncated
    ShortTruncated,
    /// Subset of LCGs, values truncated
    LongTruncated,
}

/// Owner of every UE; all lookups are by dense DU UE index
#[derive(Debug, Default)]
pub struct UeRepository {
    ues: Vec<Option<Ue>>,
}

impl UeRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the index maps to a live UE
    pub fn contains(&self, ue_index: UeIndex) -> bool {
        self.ues
            .get(ue_index.0 as usize)
            .map(|u| u.is_some())
            .unwrap_or(false)
    }

    /// Insert a UE constructed off-slot
    pub fn add_ue(&mut self, ue: Ue) {
        let idx = ue.ue_index.0 as usize;
        if idx >= self.ues.len() {
            self.ues.resize_with(idx + 1, || None);
        }
        debug_assert!(self.ues[idx].is_none(), "UE index {} already in use", idx);
        self.ues[idx] = Some(ue);
    }

    /// Look up a UE
    pub fn get(&self, ue_index: UeIndex) -> Option<&Ue> {
        self.ues.get(ue_index.0 as usize)?.as_ref()
    }

    /// Look up a UE mutably
    pub fn get_mut(&mut self, ue_index: UeIndex) -> Option<&mut Ue> {
        self.ues.get_mut(ue_index.0 as usize)?.as_mut()
    }

    /// Iterate over live UEs
    pub fn iter(&self) -> impl Iterator<Item = &Ue> {
        self.ues.iter().filter_map(|u| u.as_ref())
    }

    /// Iterate over live UEs mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Ue> {
        self.ues.iter_mut().filter_map(|u| u.as_mut())
    }

    /// Number of live UEs
    pub fn len(&self) -> usize {
        self.ues.iter().filter(|u| u.is_some()).count()
    }

    /// Whether the repository holds no UE
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a UE for removal. The UE stops receiving new transmissions
    /// immediately; the entry is reclaimed once its HARQ processes clear.
    pub fn schedule_ue_rem(&mut self, ue_index: UeIndex) {
        if let Some(ue) = self.get_mut(ue_index) {
            ue.deletion_pending = true;
        }
    }

    /// Reclaim removal-pending UEs whose HARQ entities have drained. The
    /// deletion notification fires exactly once per UE.
    pub fn slot_indication(&mut self, notifier: &mut dyn SchedNotifier) {
        for entry in self.ues.iter_mut() {
            let ready = entry
                .as_ref()
                .map(|ue| ue.deletion_pending && !ue.get_pcell().harqs.has_any_busy())
                .unwrap_or(false);
            if ready {
                let ue = entry.take().unwrap();
                debug!("ue={} rnti={} removed from repository", ue.ue_index, ue.crnti);
                notifier.on_ue_delete_response(ue.ue_index);
            }
        }
    }
}
