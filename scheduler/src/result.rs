//! Scheduler Slot Result
//!
//! The immutable outcome of one slot of scheduling: control channels, data
//! assignments, uplink feedback channels and random-access occasions. Every
//! entry references RBs and symbols that are already reserved in the
//! resource grid. All lists are bounded and pre-sized; hitting a capacity
//! is reported by the allocators as a no-space condition before anything is
//! pushed.

use bytes::Bytes;
use common::{
    AggregationLevel, CoresetId, HarqId, LcId, RbRange, Rnti, SearchSpaceId, SymbolRange, UeIndex,
};

use crate::dci::{DciDl, DciUl, DlDciConfigType, UlDciConfigType};

/// Bound on DL PDCCHs per slot
pub const MAX_DL_PDCCHS_PER_SLOT: usize = 16;
/// Bound on UL PDCCHs per slot
pub const MAX_UL_PDCCHS_PER_SLOT: usize = 16;
/// Bound on UE PDSCH grants per slot
pub const MAX_UE_PDSCHS_PER_SLOT: usize = 16;
/// Bound on PUSCH grants per slot
pub const MAX_PUSCHS_PER_SLOT: usize = 16;
/// Bound on PUCCH grants per slot
pub const MAX_PUCCHS_PER_SLOT: usize = 32;
/// Bound on RAR grants per slot
pub const MAX_RARS_PER_SLOT: usize = 4;
/// Bound on SIBs per slot
pub const MAX_SIBS_PER_SLOT: usize = 2;

/// A downlink PDCCH scheduled in this slot
#[derive(Debug, Clone)]
pub struct DlPdcch {
    /// RNTI the CRC is scrambled with
    pub rnti: Rnti,
    /// SearchSpace the candidate was found in
    pub ss_id: SearchSpaceId,
    /// CORESET carrying the candidate
    pub coreset_id: CoresetId,
    /// Aggregation level
    pub aggr_lvl: AggregationLevel,
    /// First CCE of the candidate
    pub cce_start: u8,
    /// The DCI payload; filled by the grant allocator after reservation
    pub dci: Option<DciDl>,
    /// Chosen PDSCH-to-HARQ feedback delay, for tracing
    pub harq_feedback_timing: Option<u8>,
}

/// An uplink-scheduling PDCCH scheduled in this slot
#[derive(Debug, Clone)]
pub struct UlPdcch {
    /// RNTI the CRC is scrambled with
    pub rnti: Rnti,
    /// SearchSpace the candidate was found in
    pub ss_id: SearchSpaceId,
    /// CORESET carrying the candidate
    pub coreset_id: CoresetId,
    /// Aggregation level
    pub aggr_lvl: AggregationLevel,
    /// First CCE of the candidate
    pub cce_start: u8,
    /// The DCI payload; filled by the grant allocator after reservation
    pub dci: Option<DciUl>,
}

/// Parameters of one PDSCH transmission
#[derive(Debug, Clone)]
pub struct PdschInformation {
    /// Destination RNTI
    pub rnti: Rnti,
    /// Allocated CRBs
    pub crbs: RbRange,
    /// OFDM symbols
    pub symbols: SymbolRange,
    /// MCS index (64QAM table)
    pub mcs: u8,
    /// Transport block size in bytes
    pub tbs_bytes: u32,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process
    pub harq_id: HarqId,
    /// New-data indicator
    pub ndi: bool,
    /// DCI format that scheduled this PDSCH
    pub dci_format: DlDciConfigType,
}

/// Parameters of one PUSCH transmission
#[derive(Debug, Clone)]
pub struct PuschInformation {
    /// Source RNTI
    pub rnti: Rnti,
    /// Allocated CRBs
    pub crbs: RbRange,
    /// OFDM symbols
    pub symbols: SymbolRange,
    /// MCS index (64QAM table)
    pub mcs: u8,
    /// Transport block size in bytes
    pub tbs_bytes: u32,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process
    pub harq_id: HarqId,
    /// New-data indicator
    pub ndi: bool,
    /// DCI format that scheduled this PUSCH
    pub dci_format: UlDciConfigType,
}

/// System information PDSCH
#[derive(Debug, Clone)]
pub struct SibInformation {
    /// Always the SI-RNTI
    pub si_rnti: Rnti,
    /// The broadcast PDSCH
    pub pdsch: PdschInformation,
}

/// Msg3 grant carried inside a RAR
#[derive(Debug, Clone)]
pub struct RarUlGrant {
    /// Preamble the grant answers
    pub preamble_index: u8,
    /// Timing advance command
    pub timing_advance: u16,
    /// TC-RNTI assigned to the UE
    pub tc_rnti: Rnti,
    /// The Msg3 PUSCH reservation
    pub msg3: PuschInformation,
}

/// Random access response scheduled in this slot
#[derive(Debug, Clone)]
pub struct RarInformation {
    /// RA-RNTI derived from the PRACH occasion
    pub ra_rnti: Rnti,
    /// The RAR PDSCH
    pub pdsch: PdschInformation,
    /// One grant per answered preamble
    pub grants: Vec<RarUlGrant>,
    /// Assembled RAR MAC PDU carried by the PDSCH
    pub pdu: Bytes,
}

/// Paging PDSCH (surface kept for the P-RNTI path)
#[derive(Debug, Clone)]
pub struct PagingInformation {
    /// Always the P-RNTI
    pub p_rnti: Rnti,
    /// The paging PDSCH
    pub pdsch: PdschInformation,
}

/// Logical-channel share of a DL transport block
#[derive(Debug, Clone, Copy)]
pub struct DlTbLcInfo {
    /// Logical channel drained into the TB
    pub lcid: LcId,
    /// SDU bytes taken from the channel
    pub nof_bytes: u32,
}

/// Context a UE PDSCH grant carries for upper layers and tracing
#[derive(Debug, Clone, Copy)]
pub struct DlMsgContext {
    /// DU UE index
    pub ue_index: UeIndex,
    /// Chosen PDSCH-to-HARQ feedback delay
    pub k1: u8,
    /// SearchSpace used
    pub ss_id: SearchSpaceId,
    /// Retransmission count of the TB
    pub nof_retxs: u8,
}

/// A UE downlink grant: the PDSCH plus the transport-block composition
#[derive(Debug, Clone)]
pub struct DlMsgAlloc {
    /// Grant context
    pub context: DlMsgContext,
    /// The PDSCH parameters
    pub pdsch: PdschInformation,
    /// Logical channels multiplexed into the TB (new transmissions only)
    pub tb_info: Vec<DlTbLcInfo>,
}

/// Context a PUSCH grant carries
#[derive(Debug, Clone, Copy)]
pub struct UlSchedContext {
    /// DU UE index
    pub ue_index: UeIndex,
    /// SearchSpace used
    pub ss_id: SearchSpaceId,
    /// PDCCH-to-PUSCH delay used
    pub k2: u32,
    /// Retransmission count of the TB
    pub nof_retxs: u8,
}

/// UCI payload riding on a PUSCH
#[derive(Debug, Clone, Copy, Default)]
pub struct UciOnPusch {
    /// Number of HARQ-ACK bits multiplexed
    pub harq_ack_nof_bits: u8,
    /// Number of CSI part-1 bits multiplexed
    pub csi_part1_nof_bits: u8,
}

/// A PUSCH grant scheduled in this slot
#[derive(Debug, Clone)]
pub struct UlSchedInfo {
    /// Grant context
    pub context: UlSchedContext,
    /// The PUSCH parameters
    pub pusch: PuschInformation,
    /// UCI multiplexed on the PUSCH, if any
    pub uci: Option<UciOnPusch>,
}

/// PUCCH format subset the allocator hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PucchFormat {
    /// Format 1: up to 2 HARQ bits + SR
    Format1,
    /// Format 2: HARQ + SR + CSI
    Format2,
}

/// A PUCCH reservation
#[derive(Debug, Clone)]
pub struct PucchInfo {
    /// Owning RNTI
    pub rnti: Rnti,
    /// Format of the reservation
    pub format: PucchFormat,
    /// PRB(s) occupied
    pub crbs: RbRange,
    /// Symbols occupied
    pub symbols: SymbolRange,
    /// HARQ-ACK bits carried
    pub harq_ack_nof_bits: u8,
    /// Whether an SR opportunity is present
    pub sr_opportunity: bool,
    /// CSI part-1 bits carried
    pub csi_part1_nof_bits: u8,
    /// Index signalled in the DCI PUCCH-resource field
    pub pucch_res_indicator: u8,
}

/// A PRACH occasion published for the PHY receiver
#[derive(Debug, Clone)]
pub struct PrachOccasionInfo {
    /// First PRB of the occasion
    pub crbs: RbRange,
    /// Symbols of the occasion
    pub symbols: SymbolRange,
    /// Preamble format index (0 for long format 0)
    pub format: u8,
    /// Number of preambles the occasion accepts
    pub nof_preambles: u8,
}

/// CSI-RS transmission published for rate matching and channel sounding
#[derive(Debug, Clone)]
pub struct CsiRsInfo {
    /// RBs spanned by the CSI-RS
    pub crbs: RbRange,
    /// Symbol carrying the resource
    pub symbol: u8,
}

/// Downlink part of the slot result
#[derive(Debug, Clone, Default)]
pub struct DlSchedResult {
    /// Scheduled DL PDCCHs
    pub dl_pdcchs: Vec<DlPdcch>,
    /// Scheduled UL-grant PDCCHs
    pub ul_pdcchs: Vec<UlPdcch>,
    /// Broadcast PDSCHs
    pub sibs: Vec<SibInformation>,
    /// Random access responses
    pub rar_grants: Vec<RarInformation>,
    /// Paging PDSCHs
    pub paging_grants: Vec<PagingInformation>,
    /// UE data grants
    pub ue_grants: Vec<DlMsgAlloc>,
    /// CSI-RS transmissions
    pub csi_rs: Vec<CsiRsInfo>,
}

/// Uplink part of the slot result
#[derive(Debug, Clone, Default)]
pub struct UlSchedResult {
    /// PUCCH reservations
    pub pucchs: Vec<PucchInfo>,
    /// PUSCH grants
    pub puschs: Vec<UlSchedInfo>,
    /// PRACH occasions
    pub prachs: Vec<PrachOccasionInfo>,
}

/// The complete scheduling outcome for one slot
#[derive(Debug, Clone, Default)]
pub struct SlotSchedResult {
    /// Downlink allocations
    pub dl: DlSchedResult,
    /// Uplink allocations
    pub ul: UlSchedResult,
}

impl SlotSchedResult {
    /// Drop all entries, keeping the allocated capacity
    pub fn clear(&mut self) {
        self.dl.dl_pdcchs.clear();
        self.dl.ul_pdcchs.clear();
        self.dl.sibs.clear();
        self.dl.rar_grants.clear();
        self.dl.paging_grants.clear();
        self.dl.ue_grants.clear();
        self.dl.csi_rs.clear();
        self.ul.pucchs.clear();
        self.ul.puschs.clear();
        self.ul.prachs.clear();
    }

    /// Whether the DL PDCCH list reached its bound
    pub fn dl_pdcchs_full(&self) -> bool {
        self.dl.dl_pdcchs.len() >= MAX_DL_PDCCHS_PER_SLOT
    }

    /// Whether the UL PDCCH list reached its bound
    pub fn ul_pdcchs_full(&self) -> bool {
        self.dl.ul_pdcchs.len() >= MAX_UL_PDCCHS_PER_SLOT
    }

    /// Whether the UE PDSCH list reached its bound
    pub fn ue_grants_full(&self) -> bool {
        self.dl.ue_grants.len() >= MAX_UE_PDSCHS_PER_SLOT
    }

    /// Whether the PUSCH list reached its bound
    pub fn puschs_full(&self) -> bool {
        self.ul.puschs.len() >= MAX_PUSCHS_PER_SLOT
    }

    /// Whether the PUCCH list reached its bound
    pub fn pucchs_full(&self) -> bool {
        self.ul.pucchs.len() >= MAX_PUCCHS_PER_SLOT
    }

    /// Find the PUSCH of a given RNTI, if one was allocated this slot
    pub fn find_pusch_mut(&mut self, rnti: Rnti) -> Option<&mut UlSchedInfo> {
        self.ul.puschs.iter_mut().find(|p| p.pusch.rnti == rnti)
    }
}
