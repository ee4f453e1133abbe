//! Scheduler Event Manager
//!
//! Ingests asynchronous indications from MAC, PHY and upper layers and
//! applies them inside the slot handler of the right cell. Two tiers of
//! lock-free bounded queues: a common queue for events that must commit on
//! the UE's primary cell (creation, reconfiguration, removal, buffer
//! state), and one queue per cell for PHY-originated events (CRC, UCI,
//! RACH). Events of the same UE are applied in arrival order; a processed
//! event is tombstoned so it never runs twice.

use crossbeam_queue::ArrayQueue;
use tracing::{debug, info, warn};

use common::{CellIndex, HarqId, LcId, LcgId, Rnti, SlotPoint, UeIndex};

use crate::config::UeCellConfig;
use crate::metrics::SchedMetrics;
use crate::ra::{RaScheduler, RachIndication};
use crate::ue::{BsrType, Ue, UeRepository};
use crate::{SchedError, SchedNotifier};

/// Capacity of the common event queue
const COMMON_QUEUE_CAPACITY: usize = 512;
/// Capacity of each cell-specific event queue
const CELL_QUEUE_CAPACITY: usize = 512;

/// Buffer status report indication
#[derive(Debug, Clone)]
pub struct UlBsrIndication {
    /// Reporting UE
    pub ue_index: UeIndex,
    /// Reporting RNTI
    pub crnti: Rnti,
    /// Cell the BSR arrived on
    pub cell_index: CellIndex,
    /// BSR flavour
    pub bsr_type: BsrType,
    /// Reported bytes per logical channel group
    pub reported_lcgs: Vec<(LcgId, u32)>,
}

/// DL buffer occupancy update from RLC
#[derive(Debug, Clone, Copy)]
pub struct DlBufferStateIndication {
    /// Target UE
    pub ue_index: UeIndex,
    /// Logical channel
    pub lcid: LcId,
    /// Absolute buffered bytes
    pub bytes: u32,
}

/// Pending MAC CE for a UE
#[derive(Debug, Clone, Copy)]
pub struct DlMacCeIndication {
    /// Target UE
    pub ue_index: UeIndex,
    /// CE LCID
    pub ce_lcid: u8,
}

/// One CRC outcome within an `UlCrcIndication`
#[derive(Debug, Clone, Copy)]
pub struct UlCrcPdu {
    /// Transmitting UE
    pub ue_index: UeIndex,
    /// HARQ process of the PUSCH
    pub harq_id: HarqId,
    /// Whether decoding succeeded
    pub tb_crc_success: bool,
    /// PUSCH SNR measured by the PHY, in dB
    pub ul_snr_db: Option<f64>,
}

/// Batch of UL CRC outcomes for one received slot
#[derive(Debug, Clone)]
pub struct UlCrcIndication {
    /// Cell the PUSCHs were received on
    pub cell_index: CellIndex,
    /// Slot the PUSCHs were transmitted in
    pub slot_rx: SlotPoint,
    /// Outcomes
    pub crcs: Vec<UlCrcPdu>,
}

/// HARQ-ACK report value carried in UCI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqAckReport {
    /// Positive acknowledgement
    Ack,
    /// Negative acknowledgement
    Nack,
    /// The UE did not transmit
    Dtx,
}

/// Decoded UCI content, one variant per PUCCH format family
#[derive(Debug, Clone)]
pub enum UciPduVariant {
    /// PUCCH format 0 or 1
    PucchF0F1 {
        /// HARQ-ACK bits in DAI order
        harqs: Vec<HarqAckReport>,
        /// Whether an SR was detected
        sr_detected: bool,
        /// PUCCH SNR in dB
        snr_db: Option<f64>,
    },
    /// UCI multiplexed on PUSCH
    Pusch {
        /// HARQ-ACK bits in DAI order
        harqs: Vec<HarqAckReport>,
        /// CSI part-1 bits, wideband CQI first
        csi_part1: Vec<bool>,
    },
    /// PUCCH format 2, 3 or 4
    PucchF2F3F4 {
        /// HARQ-ACK bits in DAI order
        harqs: Vec<HarqAckReport>,
        /// SR bits; bit 0 set means SR detected
        sr_bits: Vec<bool>,
        /// CSI part-1 bits, wideband CQI first
        csi_part1: Vec<bool>,
        /// PUCCH SNR in dB
        snr_db: Option<f64>,
    },
}

/// One UE's UCI within a `UciIndication`
#[derive(Debug, Clone)]
pub struct UciPdu {
    /// Reporting UE
    pub ue_index: UeIndex,
    /// Decoded content
    pub pdu: UciPduVariant,
}

/// Batch of UCI PDUs for one received slot
#[derive(Debug, Clone)]
pub struct UciIndication {
    /// Cell the UCI was received on
    pub cell_index: CellIndex,
    /// Slot the UCI was received in
    pub slot_rx: SlotPoint,
    /// Decoded PDUs
    pub ucis: Vec<UciPdu>,
}

/// Events that commit on the UE's primary cell slot
enum CommonEvent {
    UeCreate(Box<Ue>),
    UeReconfig {
        ue_index: UeIndex,
        cfg: UeCellConfig,
    },
    UeRemove(UeIndex),
    Bsr(UlBsrIndication),
    DlBufferState(DlBufferStateIndication),
    DlMacCe(DlMacCeIndication),
}

impl CommonEvent {
    fn name(&self) -> &'static str {
        match self {
            CommonEvent::UeCreate(_) => "UE Create",
            CommonEvent::UeReconfig { .. } => "UE Reconfig",
            CommonEvent::UeRemove(_) => "UE Remove",
            CommonEvent::Bsr(_) => "BSR",
            CommonEvent::DlBufferState(_) => "DL Buffer State",
            CommonEvent::DlMacCe(_) => "DL MAC CE",
        }
    }
}

/// Events bound to one cell's slot context
enum CellEvent {
    Crc {
        slot_rx: SlotPoint,
        pdu: UlCrcPdu,
    },
    Uci {
        slot_rx: SlotPoint,
        pdu: UciPdu,
    },
    Rach(RachIndication),
}

/// Mutable cell context the event handlers operate on
pub struct EventCtx<'a> {
    /// The UE repository
    pub ues: &'a mut UeRepository,
    /// The cell's RA scheduler
    pub ra: &'a mut RaScheduler,
    /// Upstream notification sink
    pub notifier: &'a mut dyn SchedNotifier,
    /// Counters
    pub metrics: &'a mut SchedMetrics,
}

/// Two-tier event intake for all cells of the DU
pub struct EventManager {
    common: ArrayQueue<CommonEvent>,
    per_cell: Vec<ArrayQueue<CellEvent>>,
    /// Common events popped for the slot in flight; processed entries are
    /// tombstoned with `None`
    pending_common: Vec<Option<CommonEvent>>,
    last_slot: Option<SlotPoint>,
}

impl EventManager {
    /// Create the queues for `nof_cells` cells
    pub fn new(nof_cells: usize) -> Self {
        Self {
            common: ArrayQueue::new(COMMON_QUEUE_CAPACITY),
            per_cell: (0..nof_cells).map(|_| ArrayQueue::new(CELL_QUEUE_CAPACITY)).collect(),
            pending_common: Vec::with_capacity(COMMON_QUEUE_CAPACITY),
            last_slot: None,
        }
    }

    fn push_common(&self, ev: CommonEvent) -> Result<(), SchedError> {
        self.common.push(ev).map_err(|_| SchedError::EventOverflow)
    }

    fn push_cell(&self, cell_index: CellIndex, ev: CellEvent) -> Result<(), SchedError> {
        self.per_cell
            .get(cell_index.0 as usize)
            .ok_or(SchedError::EventOverflow)?
            .push(ev)
            .map_err(|_| SchedError::EventOverflow)
    }

    /// Enqueue a UE built off-slot; committed on its primary cell slot
    pub fn enqueue_ue_creation(&self, ue: Box<Ue>) -> Result<(), SchedError> {
        self.push_common(CommonEvent::UeCreate(ue))
    }

    /// Enqueue a reconfiguration resolved off-slot
    pub fn enqueue_ue_reconfiguration(
        &self,
        ue_index: UeIndex,
        cfg: UeCellConfig,
    ) -> Result<(), SchedError> {
        self.push_common(CommonEvent::UeReconfig { ue_index, cfg })
    }

    /// Enqueue a UE removal request
    pub fn enqueue_ue_removal(&self, ue_index: UeIndex) -> Result<(), SchedError> {
        self.push_common(CommonEvent::UeRemove(ue_index))
    }

    /// Enqueue a BSR
    pub fn enqueue_bsr(&self, bsr: UlBsrIndication) -> Result<(), SchedError> {
        self.push_common(CommonEvent::Bsr(bsr))
    }

    /// Enqueue a DL buffer state update
    pub fn enqueue_dl_buffer_state(
        &self,
        ind: DlBufferStateIndication,
    ) -> Result<(), SchedError> {
        self.push_common(CommonEvent::DlBufferState(ind))
    }

    /// Enqueue a MAC CE
    pub fn enqueue_dl_mac_ce(&self, ind: DlMacCeIndication) -> Result<(), SchedError> {
        self.push_common(CommonEvent::DlMacCe(ind))
    }

    /// Enqueue a batch of CRC outcomes
    pub fn enqueue_crc_indication(&self, ind: UlCrcIndication) -> Result<(), SchedError> {
        for pdu in ind.crcs {
            self.push_cell(
                ind.cell_index,
                CellEvent::Crc {
                    slot_rx: ind.slot_rx,
                    pdu,
                },
            )?;
        }
        Ok(())
    }

    /// Enqueue a batch of UCI PDUs
    pub fn enqueue_uci_indication(&self, ind: UciIndication) -> Result<(), SchedError> {
        for pdu in ind.ucis {
            self.push_cell(
                ind.cell_index,
                CellEvent::Uci {
                    slot_rx: ind.slot_rx,
                    pdu,
                },
            )?;
        }
        Ok(())
    }

    /// Enqueue detected PRACH preambles
    pub fn enqueue_rach_indication(&self, ind: RachIndication) -> Result<(), SchedError> {
        self.push_cell(ind.cell_index, CellEvent::Rach(ind))
    }

    /// Drain and apply the events relevant to `cell_index` at `slot`
    pub fn run(&mut self, slot: SlotPoint, cell_index: CellIndex, ctx: &mut EventCtx<'_>) {
        self.process_common(slot, cell_index, ctx);
        self.process_cell_specific(cell_index, ctx);
    }

    fn process_common(&mut self, slot: SlotPoint, cell_index: CellIndex, ctx: &mut EventCtx<'_>) {
        if self.last_slot != Some(slot) {
            // New slot: pop the queue once so every cell sees the same batch.
            self.pending_common.retain(|ev| ev.is_some());
            while let Some(ev) = self.common.pop() {
                self.pending_common.push(Some(ev));
            }
            self.last_slot = Some(slot);
        }

        for entry in self.pending_common.iter_mut() {
            let target_cell = match entry {
                None => continue,
                Some(CommonEvent::UeCreate(ue)) => Some(ue.get_pcell().cell_index),
                Some(ev) => {
                    let ue_index = match ev {
                        CommonEvent::UeReconfig { ue_index, .. } => *ue_index,
                        CommonEvent::UeRemove(idx) => *idx,
                        CommonEvent::Bsr(b) => b.ue_index,
                        CommonEvent::DlBufferState(b) => b.ue_index,
                        CommonEvent::DlMacCe(c) => c.ue_index,
                        CommonEvent::UeCreate(_) => unreachable!(),
                    };
                    match ctx.ues.get(ue_index) {
                        Some(ue) => Some(ue.get_pcell().cell_index),
                        None => {
                            warn!(
                                "{} for ue={} discarded. Cause: UE with provided Id does not exist",
                                ev.name(),
                                ue_index
                            );
                            ctx.metrics.count_error(&SchedError::UnknownUe(ue_index));
                            None
                        }
                    }
                }
            };

            let Some(target_cell) = target_cell else {
                *entry = None;
                continue;
            };
            if target_cell != cell_index {
                // Another cell's slot handler will pick this event up.
                continue;
            }
            let ev = entry.take().unwrap();
            Self::handle_common(ev, slot, ctx);
        }
    }

    fn handle_common(ev: CommonEvent, slot: SlotPoint, ctx: &mut EventCtx<'_>) {
        match ev {
            CommonEvent::UeCreate(ue) => {
                let ue_index = ue.ue_index;
                let rnti = ue.crnti;
                ctx.ues.add_ue(*ue);
                info!("ue={} rnti={} created at slot {}", ue_index, rnti, slot);
                ctx.notifier.on_ue_config_complete(ue_index);
            }
            CommonEvent::UeReconfig { ue_index, cfg } => {
                if let Some(ue) = ctx.ues.get_mut(ue_index) {
                    ue.get_pcell_mut().handle_reconfiguration(cfg);
                    debug!("ue={} reconfigured", ue_index);
                    ctx.notifier.on_ue_config_complete(ue_index);
                }
            }
            CommonEvent::UeRemove(ue_index) => {
                ctx.ues.schedule_ue_rem(ue_index);
                debug!("ue={} marked for removal", ue_index);
            }
            CommonEvent::Bsr(bsr) => {
                if let Some(ue) = ctx.ues.get_mut(bsr.ue_index) {
                    ue.handle_bsr(bsr.bsr_type, &bsr.reported_lcgs);
                }
            }
            CommonEvent::DlBufferState(ind) => {
                if let Some(ue) = ctx.ues.get_mut(ind.ue_index) {
                    ue.handle_dl_buffer_state(ind.lcid, ind.bytes);
                }
            }
            CommonEvent::DlMacCe(ind) => {
                if let Some(ue) = ctx.ues.get_mut(ind.ue_index) {
                    ue.handle_dl_mac_ce(ind.ce_lcid);
                }
            }
        }
    }

    fn process_cell_specific(&mut self, cell_index: CellIndex, ctx: &mut EventCtx<'_>) {
        let Some(queue) = self.per_cell.get(cell_index.0 as usize) else {
            return;
        };
        while let Some(ev) = queue.pop() {
            match ev {
                CellEvent::Crc { slot_rx, pdu } => Self::handle_crc(slot_rx, pdu, cell_index, ctx),
                CellEvent::Uci { slot_rx, pdu } => Self::handle_uci(slot_rx, pdu, cell_index, ctx),
                CellEvent::Rach(ind) => ctx.ra.handle_rach_indication(ind),
            }
        }
    }

    fn handle_crc(slot_rx: SlotPoint, pdu: UlCrcPdu, cell_index: CellIndex, ctx: &mut EventCtx<'_>) {
        let Some(ue) = ctx.ues.get_mut(pdu.ue_index) else {
            warn!("CRC for ue={} discarded. Cause: UE with provided Id does not exist", pdu.ue_index);
            ctx.metrics.count_error(&SchedError::UnknownUe(pdu.ue_index));
            return;
        };
        let Some(ue_cc) = ue.find_cell_mut(cell_index) else {
            warn!("CRC for ue={} ignored. Cause: cell {} is not configured", pdu.ue_index, cell_index.0);
            return;
        };
        if let Some(out) = ue_cc.handle_crc_pdu(slot_rx, pdu.harq_id, pdu.tb_crc_success, pdu.ul_snr_db)
        {
            debug!(
                "ue={} harq={} crc={} tbs={}",
                pdu.ue_index,
                pdu.harq_id.0,
                if pdu.tb_crc_success { "OK" } else { "KO" },
                out.tbs_bytes
            );
            if out.rlf_threshold_crossed {
                info!("ue={}: consecutive UL KO threshold reached, indicating RLF", pdu.ue_index);
                ctx.metrics.count_rlf();
                ctx.notifier.on_rlf_detected(pdu.ue_index);
            }
        }
    }

    fn handle_uci(slot_rx: SlotPoint, pdu: UciPdu, cell_index: CellIndex, ctx: &mut EventCtx<'_>) {
        let Some(ue) = ctx.ues.get_mut(pdu.ue_index) else {
            warn!("UCI for ue={} discarded. Cause: UE with provided Id does not exist", pdu.ue_index);
            ctx.metrics.count_error(&SchedError::UnknownUe(pdu.ue_index));
            return;
        };
        if ue.find_cell(cell_index).is_none() {
            warn!("UCI for ue={} ignored. Cause: cell {} is not configured", pdu.ue_index, cell_index.0);
            return;
        }

        let rlf_crossed = match pdu.pdu {
            UciPduVariant::PucchF0F1 {
                harqs,
                sr_detected,
                snr_db: _,
            } => {
                let crossed = Self::handle_harq_bits(ue, slot_rx, &harqs);
                if sr_detected {
                    ue.handle_sr_indication(slot_rx);
                    debug!("ue={}: SR detected", pdu.ue_index);
                }
                crossed
            }
            UciPduVariant::Pusch { harqs, csi_part1 } => {
                let crossed = Self::handle_harq_bits(ue, slot_rx, &harqs);
                Self::handle_csi_bits(ue, &csi_part1);
                crossed
            }
            UciPduVariant::PucchF2F3F4 {
                harqs,
                sr_bits,
                csi_part1,
                snr_db: _,
            } => {
                let crossed = Self::handle_harq_bits(ue, slot_rx, &harqs);
                if sr_bits.first().copied().unwrap_or(false) {
                    ue.handle_sr_indication(slot_rx);
                    debug!("ue={}: SR detected", pdu.ue_index);
                }
                Self::handle_csi_bits(ue, &csi_part1);
                crossed
            }
        };

        if rlf_crossed {
            info!("ue={}: consecutive DL KO threshold reached, indicating RLF", pdu.ue_index);
            ctx.metrics.count_rlf();
            ctx.notifier.on_rlf_detected(pdu.ue_index);
        }
    }

    /// Returns whether a dropped TB crossed the consecutive-KO threshold
    fn handle_harq_bits(ue: &mut Ue, uci_slot: SlotPoint, harqs: &[HarqAckReport]) -> bool {
        let mut crossed = false;
        for (idx, report) in harqs.iter().enumerate() {
            let ack = *report == HarqAckReport::Ack;
            let dai = (idx % 4) as u8;
            if let Some((harq_id, outcome)) =
                ue.get_pcell_mut().harqs.dl_ack_info(uci_slot, ack, dai)
            {
                debug!(
                    "ue={} harq={}: {:?} -> {:?}",
                    ue.ue_index, harq_id.0, report, outcome
                );
                crossed |= ue.get_pcell_mut().note_dl_harq_outcome(outcome);
            }
        }
        crossed
    }

    /// CSI part 1 of 4 bits decodes as the wideband CQI, MSB first
    fn handle_csi_bits(ue: &mut Ue, csi_part1: &[bool]) {
        if csi_part1.len() < 4 {
            return;
        }
        let wb_cqi = ((csi_part1[0] as u8) << 3)
            | ((csi_part1[1] as u8) << 2)
            | ((csi_part1[2] as u8) << 1)
            | (csi_part1[3] as u8);
        ue.get_pcell_mut().set_latest_wb_cqi(wb_cqi);
        debug!("ue={}: wideband CQI {}", ue.ue_index, wb_cqi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CellConfig, ExpertConfig, UeDedicatedConfig, UeCellConfig};
    use crate::metrics::SchedMetrics;
    use crate::ra::RaScheduler;
    use common::SubcarrierSpacing;
    use std::sync::Arc;

    struct Notif {
        configured: Vec<UeIndex>,
        deleted: Vec<UeIndex>,
        rlf: Vec<UeIndex>,
    }

    impl SchedNotifier for Notif {
        fn on_ue_config_complete(&mut self, ue: UeIndex) {
            self.configured.push(ue);
        }
        fn on_ue_delete_response(&mut self, ue: UeIndex) {
            self.deleted.push(ue);
        }
        fn on_rlf_detected(&mut self, ue: UeIndex) {
            self.rlf.push(ue);
        }
    }

    struct Bench {
        mgr: EventManager,
        ues: UeRepository,
        ra: RaScheduler,
        notifier: Notif,
        metrics: SchedMetrics,
        cell_cfg: Arc<CellConfig>,
        expert: Arc<ExpertConfig>,
    }

    impl Bench {
        fn new() -> Self {
            let cell_cfg = Arc::new(CellConfig::default_fdd(CellIndex(0)));
            Self {
                mgr: EventManager::new(1),
                ues: UeRepository::new(),
                ra: RaScheduler::new(cell_cfg.clone()),
                notifier: Notif {
                    configured: vec![],
                    deleted: vec![],
                    rlf: vec![],
                },
                metrics: SchedMetrics::default(),
                cell_cfg,
                expert: Arc::new(ExpertConfig::default()),
            }
        }

        fn mk_ue(&self, idx: u16) -> Box<Ue> {
            let cfg = UeCellConfig::new(self.cell_cfg.clone(), UeDedicatedConfig::default_with_ss2());
            Box::new(Ue::new(UeIndex(idx), Rnti(0x4601 + idx), self.expert.clone(), cfg))
        }

        fn run(&mut self, slot: SlotPoint) {
            let mut ctx = EventCtx {
                ues: &mut self.ues,
                ra: &mut self.ra,
                notifier: &mut self.notifier,
                metrics: &mut self.metrics,
            };
            self.mgr.run(slot, CellIndex(0), &mut ctx);
        }
    }

    fn sl(n: u32) -> SlotPoint {
        SlotPoint::new(SubcarrierSpacing::Scs15, n / 10, n % 10)
    }

    #[test]
    fn test_ue_creation_commits_at_slot() {
        let mut b = Bench::new();
        b.mgr.enqueue_ue_creation(b.mk_ue(0)).unwrap();
        assert!(!b.ues.contains(UeIndex(0)));
        b.run(sl(0));
        assert!(b.ues.contains(UeIndex(0)));
        assert_eq!(b.notifier.configured, vec![UeIndex(0)]);
    }

    #[test]
    fn test_event_for_unknown_ue_dropped_with_counter() {
        let mut b = Bench::new();
        b.mgr
            .enqueue_dl_buffer_state(DlBufferStateIndication {
                ue_index: UeIndex(9),
                lcid: LcId::SRB1,
                bytes: 100,
            })
            .unwrap();
        b.run(sl(0));
        assert_eq!(b.metrics.error_count("unknown-ue"), 1);
    }

    #[test]
    fn test_fifo_order_for_same_ue() {
        let mut b = Bench::new();
        b.mgr.enqueue_ue_creation(b.mk_ue(0)).unwrap();
        b.run(sl(0));
        // Two buffer updates in order; the last one must win.
        b.mgr
            .enqueue_dl_buffer_state(DlBufferStateIndication {
                ue_index: UeIndex(0),
                lcid: LcId::SRB1,
                bytes: 500,
            })
            .unwrap();
        b.mgr
            .enqueue_dl_buffer_state(DlBufferStateIndication {
                ue_index: UeIndex(0),
                lcid: LcId::SRB1,
                bytes: 123,
            })
            .unwrap();
        b.run(sl(1));
        assert_eq!(b.ues.get(UeIndex(0)).unwrap().pending_dl_bytes(), 123);
    }

    #[test]
    fn test_crc_ko_sequence_raises_rlf_once() {
        let mut b = Bench::new();
        b.expert = Arc::new(ExpertConfig {
            max_consecutive_kos: 4,
            ..ExpertConfig::default()
        });
        b.mgr.enqueue_ue_creation(b.mk_ue(0)).unwrap();
        b.run(sl(0));

        for i in 0..4u32 {
            let tx_slot = sl(10 + i);
            {
                let ue = b.ues.get_mut(UeIndex(0)).unwrap();
                let harqs = &mut ue.get_pcell_mut().harqs;
                if harqs.ul_harq(HarqId(0)).is_empty() {
                    harqs.ul_harq(HarqId(0)).new_tx(tx_slot, 8);
                } else {
                    harqs.ul_harq(HarqId(0)).new_retx(tx_slot);
                }
            }
            b.mgr
                .enqueue_crc_indication(UlCrcIndication {
                    cell_index: CellIndex(0),
                    slot_rx: tx_slot,
                    crcs: vec![UlCrcPdu {
                        ue_index: UeIndex(0),
                        harq_id: HarqId(0),
                        tb_crc_success: false,
                        ul_snr_db: Some(1.0),
                    }],
                })
                .unwrap();
            b.run(tx_slot + 1);
        }
        assert_eq!(b.notifier.rlf, vec![UeIndex(0)]);
    }

    #[test]
    fn test_uci_sr_and_csi_decoding() {
        let mut b = Bench::new();
        b.mgr.enqueue_ue_creation(b.mk_ue(0)).unwrap();
        b.run(sl(0));
        b.mgr
            .enqueue_uci_indication(UciIndication {
                cell_index: CellIndex(0),
                slot_rx: sl(4),
                ucis: vec![UciPdu {
                    ue_index: UeIndex(0),
                    pdu: UciPduVariant::PucchF2F3F4 {
                        harqs: vec![],
                        sr_bits: vec![true],
                        // 0b1100 = CQI 12
                        csi_part1: vec![true, true, false, false],
                        snr_db: Some(8.0),
                    },
                }],
            })
            .unwrap();
        b.run(sl(5));
        let ue = b.ues.get(UeIndex(0)).unwrap();
        assert!(ue.has_pending_sr());
        assert_eq!(ue.get_pcell().metrics().latest_wb_cqi, 12);
    }

    #[test]
    fn test_queue_overflow_reported() {
        let b = Bench::new();
        let mut overflowed = false;
        for i in 0..(COMMON_QUEUE_CAPACITY + 1) {
            let r = b.mgr.enqueue_dl_buffer_state(DlBufferStateIndication {
                ue_index: UeIndex(i as u16 % 100),
                lcid: LcId::SRB1,
                bytes: 1,
            });
            if r == Err(SchedError::EventOverflow) {
                overflowed = true;
            }
        }
        assert!(overflowed);
    }
}
