//! UCI Allocation
//!
//! Binds PDSCH grants to a future uplink control opportunity: walks the k1
//! candidate list, reserves the PUCCH (or rides an already-granted PUSCH),
//! and keeps the per-UL-slot scheduled-PDSCH counters that feed the DAI
//! fields of TS 38.213 clause 9.1.3.2.

use common::{Rnti, SlotPoint};

use crate::grid::{CellResourceAllocator, SlotGrid, RING_ALLOCATOR_SIZE};
use crate::pucch::PucchAllocator;
use crate::result::UciOnPusch;

/// Outcome of a successful UCI reservation
#[derive(Debug, Clone, Copy)]
pub struct UciAllocation {
    /// PUCCH resource indicator for the DCI; `None` when the HARQ bit was
    /// multiplexed on an existing PUSCH
    pub pucch_res_indicator: Option<u8>,
    /// Counter-based DAI assigned to this PDSCH
    pub dai: u8,
}

#[derive(Debug, Default, Clone)]
struct SlotCounters {
    slot: Option<SlotPoint>,
    per_rnti: Vec<(Rnti, u8)>,
}

/// Per-cell UCI allocator
#[derive(Debug)]
pub struct UciAllocator {
    counters: Vec<SlotCounters>,
}

impl UciAllocator {
    /// Create the allocator with empty counters
    pub fn new() -> Self {
        Self {
            counters: vec![SlotCounters::default(); RING_ALLOCATOR_SIZE],
        }
    }

    fn counters_for(&mut self, slot: SlotPoint) -> &mut SlotCounters {
        let idx = slot.to_uint() as usize % RING_ALLOCATOR_SIZE;
        let c = &mut self.counters[idx];
        if c.slot != Some(slot) {
            c.slot = Some(slot);
            c.per_rnti.clear();
        }
        c
    }

    /// Number of PDSCHs whose HARQ feedback is already bound to `slot` for
    /// this RNTI
    pub fn scheduled_pdsch_counter_in_ue_uci(&self, slot: SlotPoint, rnti: Rnti) -> u8 {
        let idx = slot.to_uint() as usize % RING_ALLOCATOR_SIZE;
        let c = &self.counters[idx];
        if c.slot != Some(slot) {
            return 0;
        }
        c.per_rnti
            .iter()
            .find(|(r, _)| *r == rnti)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Reserve one HARQ-ACK bit at slot `now + k0 + k1` for `rnti`.
    ///
    /// If the UE already has a PUSCH granted in that slot the bit rides it;
    /// otherwise a PUCCH reservation is made. Returns `None` on no-space.
    pub fn alloc_uci_harq_ue(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        pucch: &mut PucchAllocator,
        rnti: Rnti,
        k0: u32,
        k1: u8,
    ) -> Option<UciAllocation> {
        let offset = k0 + k1 as u32;
        if offset as usize >= RING_ALLOCATOR_SIZE {
            return None;
        }
        let slot_grid = res_alloc.slot_grid_mut(offset);
        let uci_slot = slot_grid.slot;
        let dai = self.scheduled_pdsch_counter_in_ue_uci(uci_slot, rnti) % 4;

        let pucch_res_indicator = if let Some(pusch) = slot_grid.result.find_pusch_mut(rnti) {
            let uci = pusch.uci.get_or_insert_with(UciOnPusch::default);
            uci.harq_ack_nof_bits += 1;
            None
        } else {
            Some(pucch.alloc_harq_ue(slot_grid, rnti)?)
        };

        let counters = self.counters_for(uci_slot);
        match counters.per_rnti.iter_mut().find(|(r, _)| *r == rnti) {
            Some((_, n)) => *n += 1,
            None => counters.per_rnti.push((rnti, 1)),
        }

        Some(UciAllocation {
            pucch_res_indicator,
            dai,
        })
    }

    /// Undo the most recent `alloc_uci_harq_ue` for `rnti` at the same
    /// target slot; used when a later step of the grant transaction fails.
    pub fn cancel_uci_harq_ue(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        pucch: &mut PucchAllocator,
        rnti: Rnti,
        k0: u32,
        k1: u8,
    ) {
        let offset = k0 + k1 as u32;
        let slot_grid = res_alloc.slot_grid_mut(offset);
        let uci_slot = slot_grid.slot;

        if let Some(pusch) = slot_grid.result.find_pusch_mut(rnti) {
            if let Some(uci) = pusch.uci.as_mut() {
                if uci.harq_ack_nof_bits > 0 {
                    uci.harq_ack_nof_bits -= 1;
                }
            }
        } else {
            pucch.release_harq_bit(slot_grid, rnti);
        }

        let counters = self.counters_for(uci_slot);
        if let Some((_, n)) = counters.per_rnti.iter_mut().find(|(r, _)| *r == rnti) {
            *n = n.saturating_sub(1);
        }
    }

    /// Move any PUCCH content of `rnti` in this slot onto its PUSCH and
    /// release the PUCCH, TS 38.213 clause 9.
    pub fn multiplex_uci_on_pusch(
        &mut self,
        slot_grid: &mut SlotGrid,
        pucch: &mut PucchAllocator,
        rnti: Rnti,
    ) {
        let Some(removed) = pucch.remove_ue_uci(slot_grid, rnti) else {
            return;
        };
        if let Some(pusch) = slot_grid.result.find_pusch_mut(rnti) {
            let uci = pusch.uci.get_or_insert_with(UciOnPusch::default);
            uci.harq_ack_nof_bits += removed.harq_ack_nof_bits;
            uci.csi_part1_nof_bits += removed.csi_part1_nof_bits;
        }
    }
}

impl Default for UciAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// First DAI of a DCI format 0_1, TS 38.213 Table 9.1.3-2: the leftmost
/// column for the accumulated HARQ-ACK bit count, 3 when there is none.
pub fn compute_ul_dai(total_harq_ack_in_uci: u32) -> u8 {
    if total_harq_ack_in_uci == 0 {
        3
    } else {
        ((total_harq_ack_in_uci - 1) % 4) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dci::UlDciConfigType;
    use crate::result::{PuschInformation, UlSchedContext, UlSchedInfo};
    use common::{HarqId, RbRange, SearchSpaceId, SubcarrierSpacing, SymbolRange, UeIndex};

    fn setup() -> (CellResourceAllocator, PucchAllocator, UciAllocator) {
        let mut res = CellResourceAllocator::new(SubcarrierSpacing::Scs15, 52, 52);
        res.slot_indication(SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0));
        (res, PucchAllocator::new(52), UciAllocator::new())
    }

    fn push_pusch(res: &mut CellResourceAllocator, offset: u32, rnti: Rnti) {
        let grid = res.slot_grid_mut(offset);
        grid.result.ul.puschs.push(UlSchedInfo {
            context: UlSchedContext {
                ue_index: UeIndex(0),
                ss_id: SearchSpaceId::SS2,
                k2: offset,
                nof_retxs: 0,
            },
            pusch: PuschInformation {
                rnti,
                crbs: RbRange::new(0, 10),
                symbols: SymbolRange::new(0, 14),
                mcs: 9,
                tbs_bytes: 320,
                rv: 0,
                harq_id: HarqId(0),
                ndi: true,
                dci_format: UlDciConfigType::CRntiF0_1,
            },
            uci: None,
        });
    }

    #[test]
    fn test_alloc_reserves_pucch_and_counts() {
        let (mut res, mut pucch, mut uci) = setup();
        let rnti = Rnti(0x4601);
        let got = uci.alloc_uci_harq_ue(&mut res, &mut pucch, rnti, 0, 4).unwrap();
        assert!(got.pucch_res_indicator.is_some());
        assert_eq!(got.dai, 0);
        let uci_slot = res.slot_grid(4).slot;
        assert_eq!(uci.scheduled_pdsch_counter_in_ue_uci(uci_slot, rnti), 1);
        assert_eq!(res.slot_grid(4).result.ul.pucchs.len(), 1);
    }

    #[test]
    fn test_dai_increments_per_binding() {
        let (mut res, mut pucch, mut uci) = setup();
        let rnti = Rnti(0x4601);
        let a = uci.alloc_uci_harq_ue(&mut res, &mut pucch, rnti, 0, 4).unwrap();
        let b = uci.alloc_uci_harq_ue(&mut res, &mut pucch, rnti, 0, 4).unwrap();
        assert_eq!(a.dai, 0);
        assert_eq!(b.dai, 1);
    }

    #[test]
    fn test_harq_rides_existing_pusch_beyond_pucch_cap() {
        let (mut res, mut pucch, mut uci) = setup();
        let rnti = Rnti(0x4601);
        push_pusch(&mut res, 4, rnti);
        // Five bindings to the same UL slot, all on the PUSCH.
        for i in 0..5u32 {
            let got = uci.alloc_uci_harq_ue(&mut res, &mut pucch, rnti, 0, 4).unwrap();
            assert!(got.pucch_res_indicator.is_none());
            assert_eq!(got.dai as u32, i % 4);
        }
        let uci_slot = res.slot_grid(4).slot;
        assert_eq!(uci.scheduled_pdsch_counter_in_ue_uci(uci_slot, rnti), 5);
        // The fifth UL grant DAI wraps: (5 - 1) % 4 = 0.
        assert_eq!(compute_ul_dai(5), 0);
        let pusch_uci = res.slot_grid(4).result.ul.puschs[0].uci.unwrap();
        assert_eq!(pusch_uci.harq_ack_nof_bits, 5);
    }

    #[test]
    fn test_cancel_restores_counter_and_pucch() {
        let (mut res, mut pucch, mut uci) = setup();
        let rnti = Rnti(0x4601);
        uci.alloc_uci_harq_ue(&mut res, &mut pucch, rnti, 0, 4).unwrap();
        uci.cancel_uci_harq_ue(&mut res, &mut pucch, rnti, 0, 4);
        let uci_slot = res.slot_grid(4).slot;
        assert_eq!(uci.scheduled_pdsch_counter_in_ue_uci(uci_slot, rnti), 0);
        assert!(res.slot_grid(4).result.ul.pucchs.is_empty());
    }

    #[test]
    fn test_multiplex_moves_pucch_onto_pusch() {
        let (mut res, mut pucch, mut uci) = setup();
        let rnti = Rnti(0x4601);
        uci.alloc_uci_harq_ue(&mut res, &mut pucch, rnti, 0, 4).unwrap();
        push_pusch(&mut res, 4, rnti);
        let grid = res.slot_grid_mut(4);
        uci.multiplex_uci_on_pusch(grid, &mut pucch, rnti);
        assert!(grid.result.ul.pucchs.is_empty());
        assert_eq!(grid.result.ul.puschs[0].uci.unwrap().harq_ack_nof_bits, 1);
    }

    #[test]
    fn test_ul_dai_table() {
        assert_eq!(compute_ul_dai(0), 3);
        assert_eq!(compute_ul_dai(1), 0);
        assert_eq!(compute_ul_dai(4), 3);
        assert_eq!(compute_ul_dai(5), 0);
    }
}
