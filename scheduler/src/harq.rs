//! HARQ Entity
//!
//! Per-UE DL and UL HARQ process tables. A process moves through
//! empty -> waiting-ack -> (empty | pending-retx); the transport block
//! size, MCS and RB count are frozen between the new transmission and the
//! final ACK or failure, and the redundancy version is walked along the
//! configured RV sequence.

use common::{HarqId, RbRange, Rnti, SlotPoint, UeIndex};
use tracing::warn;

use crate::dci::{DlDciConfigType, UlDciConfigType};

/// HARQ process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqState {
    /// No transport block in flight
    Empty,
    /// Transmitted, waiting for the HARQ-ACK / CRC outcome
    WaitingAck,
    /// Negatively acknowledged, waiting to be rescheduled
    PendingRetx,
}

/// Parameters frozen for the lifetime of a transport block
#[derive(Debug, Clone, Copy)]
pub struct TbParams {
    /// Transport block size in bytes
    pub tbs_bytes: u32,
    /// MCS used for every (re)transmission
    pub mcs: u8,
    /// Allocated CRBs; the length must not change across retxs
    pub crbs: RbRange,
}

/// Outcome of feeding an ACK/NACK/CRC into a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqOutcome {
    /// Positive acknowledgement; process emptied
    Acked,
    /// Negative; the process waits for a retransmission grant
    NackRetx,
    /// Negative with the retransmission budget exhausted; process dropped
    Failure,
}

/// One downlink HARQ process
#[derive(Debug, Clone)]
pub struct DlHarqProcess {
    /// Process identifier
    pub id: HarqId,
    state: HarqState,
    /// Frozen TB parameters, valid while not empty
    tb: Option<TbParams>,
    /// Retransmissions already performed
    pub nof_retxs: u8,
    max_nof_retxs: u8,
    /// New-data indicator, toggled on every new transmission
    pub ndi: bool,
    /// Slot of the last PDSCH transmission
    pub slot_tx: Option<SlotPoint>,
    /// Slot the HARQ-ACK is expected in (PDSCH + k1)
    pub slot_ack: Option<SlotPoint>,
    /// DAI assigned to the last transmission
    pub dai: u8,
    /// DCI format used; must stay stable across retransmissions
    pub dci_format: Option<DlDciConfigType>,
}

impl DlHarqProcess {
    fn new(id: HarqId) -> Self {
        Self {
            id,
            state: HarqState::Empty,
            tb: None,
            nof_retxs: 0,
            max_nof_retxs: 0,
            ndi: false,
            slot_tx: None,
            slot_ack: None,
            dai: 0,
            dci_format: None,
        }
    }

    /// Whether the process holds no transport block
    pub fn is_empty(&self) -> bool {
        self.state == HarqState::Empty
    }

    /// Whether the process waits for a retransmission grant
    pub fn has_pending_retx(&self) -> bool {
        self.state == HarqState::PendingRetx
    }

    /// Frozen TB parameters of the in-flight transport block
    pub fn tb(&self) -> Option<&TbParams> {
        self.tb.as_ref()
    }

    /// Start a new transmission
    pub fn new_tx(&mut self, slot_tx: SlotPoint, k1: u8, max_nof_retxs: u8, dai: u8) {
        debug_assert!(self.is_empty(), "new_tx on a busy HARQ process");
        self.state = HarqState::WaitingAck;
        self.nof_retxs = 0;
        self.max_nof_retxs = max_nof_retxs;
        self.ndi = !self.ndi;
        self.slot_tx = Some(slot_tx);
        self.slot_ack = Some(slot_tx + k1 as u32);
        self.dai = dai;
        self.tb = None;
        self.dci_format = None;
    }

    /// Start a retransmission of the pending transport block
    pub fn new_retx(&mut self, slot_tx: SlotPoint, k1: u8, dai: u8) {
        debug_assert!(self.has_pending_retx(), "new_retx without pending retx");
        self.state = HarqState::WaitingAck;
        self.nof_retxs += 1;
        self.slot_tx = Some(slot_tx);
        self.slot_ack = Some(slot_tx + k1 as u32);
        self.dai = dai;
    }

    /// Record the parameters chosen by the grant allocator
    pub fn save_alloc_params(&mut self, dci_format: DlDciConfigType, tb: TbParams) {
        if let Some(prev) = &self.tb {
            debug_assert_eq!(prev.crbs.len(), tb.crbs.len());
            debug_assert_eq!(prev.tbs_bytes, tb.tbs_bytes);
        }
        self.dci_format = Some(dci_format);
        self.tb = Some(tb);
    }

    /// Feed the HARQ-ACK outcome
    pub fn ack_info(&mut self, ack: bool) -> HarqOutcome {
        debug_assert_eq!(self.state, HarqState::WaitingAck);
        if ack {
            self.reset();
            return HarqOutcome::Acked;
        }
        if self.nof_retxs >= self.max_nof_retxs {
            self.reset();
            return HarqOutcome::Failure;
        }
        self.state = HarqState::PendingRetx;
        HarqOutcome::NackRetx
    }

    fn reset(&mut self) {
        self.state = HarqState::Empty;
        self.tb = None;
        self.slot_tx = None;
        self.slot_ack = None;
        self.nof_retxs = 0;
    }
}

/// One uplink HARQ process
#[derive(Debug, Clone)]
pub struct UlHarqProcess {
    /// Process identifier
    pub id: HarqId,
    state: HarqState,
    /// Frozen TB parameters, valid while not empty
    tb: Option<TbParams>,
    /// Retransmissions already performed
    pub nof_retxs: u8,
    max_nof_retxs: u8,
    /// New-data indicator, toggled on every new transmission
    pub ndi: bool,
    /// Slot of the last PUSCH transmission (the CRC arrives for this slot)
    pub slot_tx: Option<SlotPoint>,
    /// DCI format used; must stay stable across retransmissions
    pub dci_format: Option<UlDciConfigType>,
}

impl UlHarqProcess {
    fn new(id: HarqId) -> Self {
        Self {
            id,
            state: HarqState::Empty,
            tb: None,
            nof_retxs: 0,
            max_nof_retxs: 0,
            ndi: false,
            slot_tx: None,
            dci_format: None,
        }
    }

    /// Whether the process holds no transport block
    pub fn is_empty(&self) -> bool {
        self.state == HarqState::Empty
    }

    /// Whether the process waits for a retransmission grant
    pub fn has_pending_retx(&self) -> bool {
        self.state == HarqState::PendingRetx
    }

    /// Frozen TB parameters of the in-flight transport block
    pub fn tb(&self) -> Option<&TbParams> {
        self.tb.as_ref()
    }

    /// Start a new transmission
    pub fn new_tx(&mut self, slot_tx: SlotPoint, max_nof_retxs: u8) {
        debug_assert!(self.is_empty(), "new_tx on a busy HARQ process");
        self.state = HarqState::WaitingAck;
        self.nof_retxs = 0;
        self.max_nof_retxs = max_nof_retxs;
        self.ndi = !self.ndi;
        self.slot_tx = Some(slot_tx);
        self.tb = None;
        self.dci_format = None;
    }

    /// Start a retransmission
    pub fn new_retx(&mut self, slot_tx: SlotPoint) {
        debug_assert!(self.has_pending_retx(), "new_retx without pending retx");
        self.state = HarqState::WaitingAck;
        self.nof_retxs += 1;
        self.slot_tx = Some(slot_tx);
    }

    /// Record the parameters chosen by the grant allocator
    pub fn save_alloc_params(&mut self, dci_format: UlDciConfigType, tb: TbParams) {
        self.dci_format = Some(dci_format);
        self.tb = Some(tb);
    }

    /// Feed the CRC outcome for the transmission at `slot_tx`
    pub fn crc_info(&mut self, ok: bool) -> HarqOutcome {
        debug_assert_eq!(self.state, HarqState::WaitingAck);
        if ok {
            self.reset();
            return HarqOutcome::Acked;
        }
        if self.nof_retxs >= self.max_nof_retxs {
            self.reset();
            return HarqOutcome::Failure;
        }
        self.state = HarqState::PendingRetx;
        HarqOutcome::NackRetx
    }

    fn reset(&mut self) {
        self.state = HarqState::Empty;
        self.tb = None;
        self.slot_tx = None;
        self.nof_retxs = 0;
    }
}

/// The DL and UL HARQ process tables of one UE serving cell
#[derive(Debug)]
pub struct HarqEntity {
    /// Owning UE
    pub ue_index: UeIndex,
    /// Owning RNTI, for logging
    pub rnti: Rnti,
    dl: Vec<DlHarqProcess>,
    ul: Vec<UlHarqProcess>,
}

impl HarqEntity {
    /// Create the tables with `nof_processes` DL and UL processes each
    pub fn new(ue_index: UeIndex, rnti: Rnti, nof_processes: u8) -> Self {
        debug_assert!(
            common::VALID_NOF_HARQS.contains(&nof_processes),
            "invalid HARQ process count {}",
            nof_processes
        );
        Self {
            ue_index,
            rnti,
            dl: (0..nof_processes).map(|i| DlHarqProcess::new(HarqId(i))).collect(),
            ul: (0..nof_processes).map(|i| UlHarqProcess::new(HarqId(i))).collect(),
        }
    }

    /// Access a DL process by id
    pub fn dl_harq(&mut self, id: HarqId) -> &mut DlHarqProcess {
        &mut self.dl[id.0 as usize]
    }

    /// Read a DL process by id
    pub fn dl_process(&self, id: HarqId) -> &DlHarqProcess {
        &self.dl[id.0 as usize]
    }

    /// Read an UL process by id
    pub fn ul_process(&self, id: HarqId) -> &UlHarqProcess {
        &self.ul[id.0 as usize]
    }

    /// Frozen TB parameters of a DL process, if it holds one
    pub fn dl_tb_params(&self, id: HarqId) -> Option<TbParams> {
        self.dl[id.0 as usize].tb().copied()
    }

    /// Frozen TB parameters of an UL process, if it holds one
    pub fn ul_tb_params(&self, id: HarqId) -> Option<TbParams> {
        self.ul[id.0 as usize].tb().copied()
    }

    /// Access an UL process by id
    pub fn ul_harq(&mut self, id: HarqId) -> &mut UlHarqProcess {
        &mut self.ul[id.0 as usize]
    }

    /// Lowest-index empty DL process, for a new transmission
    pub fn find_empty_dl(&self) -> Option<HarqId> {
        self.dl.iter().find(|h| h.is_empty()).map(|h| h.id)
    }

    /// Lowest-index empty UL process
    pub fn find_empty_ul(&self) -> Option<HarqId> {
        self.ul.iter().find(|h| h.is_empty()).map(|h| h.id)
    }

    /// A DL process waiting for a retransmission grant
    pub fn find_pending_retx_dl(&self) -> Option<HarqId> {
        self.dl.iter().find(|h| h.has_pending_retx()).map(|h| h.id)
    }

    /// An UL process waiting for a retransmission grant
    pub fn find_pending_retx_ul(&self) -> Option<HarqId> {
        self.ul.iter().find(|h| h.has_pending_retx()).map(|h| h.id)
    }

    /// Whether any process, DL or UL, still holds a transport block
    pub fn has_any_busy(&self) -> bool {
        self.dl.iter().any(|h| !h.is_empty()) || self.ul.iter().any(|h| !h.is_empty())
    }

    /// Route a HARQ-ACK bit received at `uci_slot` to the DL process whose
    /// expected feedback slot and DAI match. Returns the process id and
    /// outcome, or `None` when no process expects feedback in that slot.
    pub fn dl_ack_info(
        &mut self,
        uci_slot: SlotPoint,
        ack: bool,
        dai: u8,
    ) -> Option<(HarqId, HarqOutcome)> {
        for h in self.dl.iter_mut() {
            if h.state == HarqState::WaitingAck
                && h.slot_ack == Some(uci_slot)
                && h.dai % 4 == dai % 4
            {
                let id = h.id;
                return Some((id, h.ack_info(ack)));
            }
        }
        None
    }

    /// Route a CRC outcome for the PUSCH transmitted at `pusch_slot`
    pub fn ul_crc_info(
        &mut self,
        pusch_slot: SlotPoint,
        id: HarqId,
        ok: bool,
    ) -> Option<(u32, HarqOutcome)> {
        let h = &mut self.ul[id.0 as usize];
        if h.state != HarqState::WaitingAck {
            warn!(
                "rnti={} harq={}: CRC for an idle UL HARQ process discarded",
                self.rnti, id.0
            );
            return None;
        }
        if h.slot_tx != Some(pusch_slot) {
            warn!(
                "rnti={} harq={}: CRC slot {} does not match last tx, discarded",
                self.rnti, id.0, pusch_slot
            );
            return None;
        }
        let tbs = h.tb().map(|tb| tb.tbs_bytes).unwrap_or(0);
        Some((tbs, h.crc_info(ok)))
    }

    /// Expire processes whose feedback never arrived. A timed-out process
    /// behaves as if it were NACKed.
    pub fn slot_indication(&mut self, now: SlotPoint, timeout_slots: u32) -> Vec<(HarqId, HarqOutcome)> {
        let mut expired = Vec::new();
        for h in self.dl.iter_mut() {
            if h.state == HarqState::WaitingAck {
                if let Some(ack_slot) = h.slot_ack {
                    if now - ack_slot > timeout_slots as i32 {
                        let id = h.id;
                        let outcome = h.ack_info(false);
                        expired.push((id, outcome));
                    }
                }
            }
        }
        for h in self.ul.iter_mut() {
            if h.state == HarqState::WaitingAck {
                if let Some(tx_slot) = h.slot_tx {
                    if now - tx_slot > timeout_slots as i32 {
                        let id = h.id;
                        let outcome = h.crc_info(false);
                        expired.push((id, outcome));
                    }
                }
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SubcarrierSpacing;

    fn sl(n: u32) -> SlotPoint {
        SlotPoint::new(SubcarrierSpacing::Scs15, n / 10, n % 10)
    }

    fn tb() -> TbParams {
        TbParams {
            tbs_bytes: 320,
            mcs: 9,
            crbs: RbRange::new(0, 20),
        }
    }

    #[test]
    fn test_new_tx_then_ack_empties() {
        let mut ent = HarqEntity::new(UeIndex(0), Rnti(0x4601), 16);
        let id = ent.find_empty_dl().unwrap();
        assert_eq!(id, HarqId(0));
        let h = ent.dl_harq(id);
        h.new_tx(sl(10), 4, 4, 0);
        h.save_alloc_params(DlDciConfigType::CRntiF1_0, tb());
        assert!(!h.is_empty());

        let (hid, outcome) = ent.dl_ack_info(sl(14), true, 0).unwrap();
        assert_eq!(hid, id);
        assert_eq!(outcome, HarqOutcome::Acked);
        assert!(ent.dl_harq(id).is_empty());
    }

    #[test]
    fn test_nack_moves_to_pending_retx() {
        let mut ent = HarqEntity::new(UeIndex(0), Rnti(0x4601), 16);
        let id = ent.find_empty_dl().unwrap();
        ent.dl_harq(id).new_tx(sl(10), 4, 4, 0);
        ent.dl_harq(id).save_alloc_params(DlDciConfigType::CRntiF1_0, tb());

        let (_, outcome) = ent.dl_ack_info(sl(14), false, 0).unwrap();
        assert_eq!(outcome, HarqOutcome::NackRetx);
        assert_eq!(ent.find_pending_retx_dl(), Some(id));

        // A retransmission keeps TB size and RB count frozen.
        let h = ent.dl_harq(id);
        h.new_retx(sl(16), 4, 1);
        assert_eq!(h.nof_retxs, 1);
        assert_eq!(h.tb().unwrap().tbs_bytes, 320);
    }

    #[test]
    fn test_retx_budget_exhaustion_fails() {
        let mut ent = HarqEntity::new(UeIndex(0), Rnti(0x4601), 16);
        let id = HarqId(0);
        ent.dl_harq(id).new_tx(sl(0), 4, 1, 0);
        ent.dl_harq(id).save_alloc_params(DlDciConfigType::CRntiF1_0, tb());

        assert_eq!(ent.dl_ack_info(sl(4), false, 0).unwrap().1, HarqOutcome::NackRetx);
        ent.dl_harq(id).new_retx(sl(6), 4, 0);
        // Second NACK exhausts max_nof_retxs = 1.
        assert_eq!(ent.dl_ack_info(sl(10), false, 0).unwrap().1, HarqOutcome::Failure);
        assert!(ent.dl_harq(id).is_empty());
    }

    #[test]
    fn test_ndi_toggles_per_new_tx() {
        let mut ent = HarqEntity::new(UeIndex(0), Rnti(0x4601), 16);
        let id = HarqId(0);
        ent.dl_harq(id).new_tx(sl(0), 4, 4, 0);
        let first = ent.dl_harq(id).ndi;
        ent.dl_ack_info(sl(4), true, 0).unwrap();
        ent.dl_harq(id).new_tx(sl(8), 4, 4, 0);
        assert_ne!(first, ent.dl_harq(id).ndi);
    }

    #[test]
    fn test_ul_crc_flow() {
        let mut ent = HarqEntity::new(UeIndex(1), Rnti(0x4602), 16);
        let id = ent.find_empty_ul().unwrap();
        ent.ul_harq(id).new_tx(sl(20), 4);
        ent.ul_harq(id)
            .save_alloc_params(UlDciConfigType::CRntiF0_0, tb());

        // CRC for the wrong slot is discarded.
        assert!(ent.ul_crc_info(sl(21), id, true).is_none());
        let (tbs, outcome) = ent.ul_crc_info(sl(20), id, false).unwrap();
        assert_eq!(tbs, 320);
        assert_eq!(outcome, HarqOutcome::NackRetx);
    }

    #[test]
    fn test_timeout_behaves_as_nack() {
        let mut ent = HarqEntity::new(UeIndex(0), Rnti(0x4601), 16);
        let id = HarqId(0);
        ent.dl_harq(id).new_tx(sl(0), 4, 4, 0);
        assert!(ent.slot_indication(sl(8), 8).is_empty());
        let expired = ent.slot_indication(sl(13), 8);
        assert_eq!(expired, vec![(id, HarqOutcome::NackRetx)]);
        assert!(ent.dl_harq(id).has_pending_retx());
    }

    #[test]
    fn test_busy_detection() {
        let mut ent = HarqEntity::new(UeIndex(0), Rnti(0x4601), 4);
        assert!(!ent.has_any_busy());
        ent.ul_harq(HarqId(2)).new_tx(sl(0), 4);
        assert!(ent.has_any_busy());
    }
}
