//! PUCCH Resource Allocation
//!
//! Reserves uplink feedback opportunities: format 1 for up to 2 HARQ-ACK
//! bits and SR, format 2 once CSI has to ride along. HARQ bits addressed
//! to the same uplink slot accumulate on a single reservation; when a CSI
//! report is already scheduled there, the reservation is upgraded to
//! format 2 so both fit. Resources come from two fixed pools at the top of
//! the UL carrier, one PRB each, indexed by the PUCCH resource indicator.

use common::{RbRange, Rnti, SlotPoint, SymbolRange, NOF_SYMBOLS_PER_SLOT};
use tracing::trace;

use crate::grid::{SlotGrid, RING_ALLOCATOR_SIZE};
use crate::result::{PucchFormat, PucchInfo};

/// Format-1 resources per slot (3-bit PUCCH resource indicator)
pub const MAX_F1_RESOURCES: u8 = 8;
/// Format-2 resources per slot
pub const MAX_F2_RESOURCES: u8 = 8;
/// HARQ-ACK bits a single UCI opportunity may carry.
/// Kept at 2 even for format 2; lifting it needs codebook support.
pub const MAX_HARQ_BITS_PER_UCI: u8 = 2;
/// CSI part-1 bits of a wideband CQI report
pub const CSI_PART1_BITS: u8 = 4;

/// Symbols of a format-1 resource (long format over the whole slot)
fn f1_symbols() -> SymbolRange {
    SymbolRange::new(0, NOF_SYMBOLS_PER_SLOT)
}

/// Symbols of a format-2 resource (short format at the slot end)
fn f2_symbols() -> SymbolRange {
    SymbolRange::new(12, NOF_SYMBOLS_PER_SLOT)
}

#[derive(Debug, Default, Clone, Copy)]
struct SlotUsage {
    slot: Option<SlotPoint>,
    used_f1: u8,
    used_f2: u8,
}

/// UCI content released when PUCCH moves onto a PUSCH
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovedUci {
    /// HARQ-ACK bits that were on PUCCH
    pub harq_ack_nof_bits: u8,
    /// CSI part-1 bits that were on PUCCH
    pub csi_part1_nof_bits: u8,
}

/// Per-cell PUCCH allocator
#[derive(Debug)]
pub struct PucchAllocator {
    nof_ul_rbs: u16,
    usage: Vec<SlotUsage>,
}

impl PucchAllocator {
    /// Create the allocator for a carrier width
    pub fn new(nof_ul_rbs: u16) -> Self {
        Self {
            nof_ul_rbs,
            usage: vec![SlotUsage::default(); RING_ALLOCATOR_SIZE],
        }
    }

    fn usage_for(&mut self, slot: SlotPoint) -> &mut SlotUsage {
        let idx = slot.to_uint() as usize % RING_ALLOCATOR_SIZE;
        let u = &mut self.usage[idx];
        if u.slot != Some(slot) {
            *u = SlotUsage {
                slot: Some(slot),
                used_f1: 0,
                used_f2: 0,
            };
        }
        u
    }

    fn f1_prb(&self, res_index: u8) -> RbRange {
        let prb = self.nof_ul_rbs - 1 - res_index as u16;
        RbRange::new(prb, prb + 1)
    }

    fn f2_prb(&self, res_index: u8) -> RbRange {
        let prb = self.nof_ul_rbs - 1 - MAX_F1_RESOURCES as u16 - res_index as u16;
        RbRange::new(prb, prb + 1)
    }

    /// Add one HARQ-ACK bit for `rnti` on the slot of `slot_grid`.
    /// Returns the PUCCH resource indicator, or `None` on no-space (the
    /// 2-bit cap, format mismatch, or pool exhaustion).
    pub fn alloc_harq_ue(&mut self, slot_grid: &mut SlotGrid, rnti: Rnti) -> Option<u8> {
        if let Some(entry) = slot_grid.result.ul.pucchs.iter_mut().find(|p| p.rnti == rnti) {
            if entry.harq_ack_nof_bits >= MAX_HARQ_BITS_PER_UCI {
                trace!("rnti={}: PUCCH HARQ bit cap reached at slot {}", rnti, slot_grid.slot);
                return None;
            }
            entry.harq_ack_nof_bits += 1;
            return Some(entry.pucch_res_indicator);
        }

        if slot_grid.result.pucchs_full() {
            return None;
        }
        let slot = slot_grid.slot;
        let usage = self.usage_for(slot);
        if usage.used_f1 >= MAX_F1_RESOURCES {
            return None;
        }
        let res_index = usage.used_f1;
        usage.used_f1 += 1;

        let crbs = self.f1_prb(res_index);
        let symbols = f1_symbols();
        if slot_grid.ul_res_grid.collides(symbols, crbs) {
            // The PRB was taken by a PUSCH or PRACH occasion.
            return None;
        }
        slot_grid.ul_res_grid.fill(symbols, crbs);
        slot_grid.result.ul.pucchs.push(PucchInfo {
            rnti,
            format: PucchFormat::Format1,
            crbs,
            symbols,
            harq_ack_nof_bits: 1,
            sr_opportunity: false,
            csi_part1_nof_bits: 0,
            pucch_res_indicator: res_index,
        });
        Some(res_index)
    }

    /// Undo the HARQ bit most recently added for `rnti`; inverse of
    /// `alloc_harq_ue` for the grant allocator's rollback path.
    pub fn release_harq_bit(&mut self, slot_grid: &mut SlotGrid, rnti: Rnti) {
        let Some(pos) = slot_grid.result.ul.pucchs.iter().position(|p| p.rnti == rnti) else {
            return;
        };
        let entry = &mut slot_grid.result.ul.pucchs[pos];
        debug_assert!(entry.harq_ack_nof_bits > 0);
        entry.harq_ack_nof_bits -= 1;
        if entry.harq_ack_nof_bits == 0 && !entry.sr_opportunity && entry.csi_part1_nof_bits == 0 {
            let entry = slot_grid.result.ul.pucchs.remove(pos);
            slot_grid.ul_res_grid.clear_span(entry.symbols, entry.crbs);
        }
    }

    /// Reserve the periodic CSI report opportunity for `rnti`. An existing
    /// format-1 reservation is upgraded to format 2 so HARQ and CSI share
    /// one resource; without capacity for the upgrade the CSI is dropped.
    pub fn alloc_csi(&mut self, slot_grid: &mut SlotGrid, rnti: Rnti) -> bool {
        if let Some(pos) = slot_grid.result.ul.pucchs.iter().position(|p| p.rnti == rnti) {
            match slot_grid.result.ul.pucchs[pos].format {
                PucchFormat::Format2 => {
                    slot_grid.result.ul.pucchs[pos].csi_part1_nof_bits = CSI_PART1_BITS;
                    return true;
                }
                PucchFormat::Format1 => return self.upgrade_to_f2(slot_grid, pos, CSI_PART1_BITS),
            }
        }

        if slot_grid.result.pucchs_full() {
            return false;
        }
        let slot = slot_grid.slot;
        let usage = self.usage_for(slot);
        if usage.used_f2 >= MAX_F2_RESOURCES {
            return false;
        }
        let res_index = usage.used_f2;
        usage.used_f2 += 1;

        let crbs = self.f2_prb(res_index);
        let symbols = f2_symbols();
        if slot_grid.ul_res_grid.collides(symbols, crbs) {
            return false;
        }
        slot_grid.ul_res_grid.fill(symbols, crbs);
        slot_grid.result.ul.pucchs.push(PucchInfo {
            rnti,
            format: PucchFormat::Format2,
            crbs,
            symbols,
            harq_ack_nof_bits: 0,
            sr_opportunity: false,
            csi_part1_nof_bits: CSI_PART1_BITS,
            pucch_res_indicator: res_index,
        });
        true
    }

    /// Reserve an SR opportunity for `rnti`, sharing any existing resource
    pub fn alloc_sr_opportunity(&mut self, slot_grid: &mut SlotGrid, rnti: Rnti) -> bool {
        if let Some(entry) = slot_grid.result.ul.pucchs.iter_mut().find(|p| p.rnti == rnti) {
            entry.sr_opportunity = true;
            return true;
        }
        if slot_grid.result.pucchs_full() {
            return false;
        }
        let slot = slot_grid.slot;
        let usage = self.usage_for(slot);
        if usage.used_f1 >= MAX_F1_RESOURCES {
            return false;
        }
        let res_index = usage.used_f1;
        usage.used_f1 += 1;

        let crbs = self.f1_prb(res_index);
        let symbols = f1_symbols();
        if slot_grid.ul_res_grid.collides(symbols, crbs) {
            return false;
        }
        slot_grid.ul_res_grid.fill(symbols, crbs);
        slot_grid.result.ul.pucchs.push(PucchInfo {
            rnti,
            format: PucchFormat::Format1,
            crbs,
            symbols,
            harq_ack_nof_bits: 0,
            sr_opportunity: true,
            csi_part1_nof_bits: 0,
            pucch_res_indicator: res_index,
        });
        true
    }

    fn upgrade_to_f2(&mut self, slot_grid: &mut SlotGrid, pos: usize, csi_bits: u8) -> bool {
        let slot = slot_grid.slot;
        let usage = self.usage_for(slot);
        if usage.used_f2 >= MAX_F2_RESOURCES {
            return false;
        }
        let res_index = usage.used_f2;
        let crbs = self.f2_prb(res_index);
        let symbols = f2_symbols();
        if slot_grid.ul_res_grid.collides(symbols, crbs) {
            return false;
        }
        self.usage_for(slot).used_f2 += 1;

        let old = &slot_grid.result.ul.pucchs[pos];
        let (old_symbols, old_crbs) = (old.symbols, old.crbs);
        slot_grid.ul_res_grid.clear_span(old_symbols, old_crbs);
        slot_grid.ul_res_grid.fill(symbols, crbs);

        let entry = &mut slot_grid.result.ul.pucchs[pos];
        entry.format = PucchFormat::Format2;
        entry.crbs = crbs;
        entry.symbols = symbols;
        entry.csi_part1_nof_bits = csi_bits;
        entry.pucch_res_indicator = res_index;
        true
    }

    /// Remove every PUCCH of `rnti` in the slot and release its grid
    /// cells, returning the UCI content so it can ride the UE's PUSCH.
    pub fn remove_ue_uci(&mut self, slot_grid: &mut SlotGrid, rnti: Rnti) -> Option<RemovedUci> {
        let mut removed = RemovedUci::default();
        let mut any = false;
        let mut i = 0;
        while i < slot_grid.result.ul.pucchs.len() {
            if slot_grid.result.ul.pucchs[i].rnti == rnti {
                let entry = slot_grid.result.ul.pucchs.remove(i);
                slot_grid.ul_res_grid.clear_span(entry.symbols, entry.crbs);
                removed.harq_ack_nof_bits += entry.harq_ack_nof_bits;
                removed.csi_part1_nof_bits += entry.csi_part1_nof_bits;
                any = true;
            } else {
                i += 1;
            }
        }
        any.then_some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellResourceAllocator;
    use common::SubcarrierSpacing;

    fn setup() -> (CellResourceAllocator, PucchAllocator) {
        let mut res = CellResourceAllocator::new(SubcarrierSpacing::Scs15, 52, 52);
        res.slot_indication(SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0));
        (res, PucchAllocator::new(52))
    }

    #[test]
    fn test_harq_bits_accumulate_up_to_cap() {
        let (mut res, mut pucch) = setup();
        let grid = res.slot_grid_mut(4);
        let rnti = Rnti(0x4601);
        let r0 = pucch.alloc_harq_ue(grid, rnti).unwrap();
        let r1 = pucch.alloc_harq_ue(grid, rnti).unwrap();
        assert_eq!(r0, r1);
        assert_eq!(grid.result.ul.pucchs.len(), 1);
        assert_eq!(grid.result.ul.pucchs[0].harq_ack_nof_bits, 2);
        // Third bit exceeds the per-UCI cap.
        assert!(pucch.alloc_harq_ue(grid, rnti).is_none());
    }

    #[test]
    fn test_distinct_ues_get_distinct_resources() {
        let (mut res, mut pucch) = setup();
        let grid = res.slot_grid_mut(4);
        let a = pucch.alloc_harq_ue(grid, Rnti(0x4601)).unwrap();
        let b = pucch.alloc_harq_ue(grid, Rnti(0x4602)).unwrap();
        assert_ne!(a, b);
        assert_eq!(grid.result.ul.pucchs.len(), 2);
        assert_ne!(grid.result.ul.pucchs[0].crbs, grid.result.ul.pucchs[1].crbs);
    }

    #[test]
    fn test_csi_upgrades_f1_to_f2() {
        let (mut res, mut pucch) = setup();
        let grid = res.slot_grid_mut(4);
        let rnti = Rnti(0x4601);
        pucch.alloc_harq_ue(grid, rnti).unwrap();
        assert_eq!(grid.result.ul.pucchs[0].format, PucchFormat::Format1);
        assert!(pucch.alloc_csi(grid, rnti));
        let entry = &grid.result.ul.pucchs[0];
        assert_eq!(entry.format, PucchFormat::Format2);
        assert_eq!(entry.harq_ack_nof_bits, 1);
        assert_eq!(entry.csi_part1_nof_bits, CSI_PART1_BITS);
    }

    #[test]
    fn test_harq_joins_existing_csi_f2() {
        let (mut res, mut pucch) = setup();
        let grid = res.slot_grid_mut(4);
        let rnti = Rnti(0x4601);
        assert!(pucch.alloc_csi(grid, rnti));
        pucch.alloc_harq_ue(grid, rnti).unwrap();
        let entry = &grid.result.ul.pucchs[0];
        assert_eq!(entry.format, PucchFormat::Format2);
        assert_eq!(entry.harq_ack_nof_bits, 1);
    }

    #[test]
    fn test_release_rolls_back_new_entry() {
        let (mut res, mut pucch) = setup();
        let grid = res.slot_grid_mut(4);
        let rnti = Rnti(0x4601);
        pucch.alloc_harq_ue(grid, rnti).unwrap();
        pucch.release_harq_bit(grid, rnti);
        assert!(grid.result.ul.pucchs.is_empty());
        // The PRB is free again for another UE.
        assert!(pucch.alloc_harq_ue(grid, Rnti(0x4602)).is_some());
    }

    #[test]
    fn test_remove_ue_uci_returns_content() {
        let (mut res, mut pucch) = setup();
        let grid = res.slot_grid_mut(4);
        let rnti = Rnti(0x4601);
        pucch.alloc_harq_ue(grid, rnti).unwrap();
        pucch.alloc_csi(grid, rnti);
        let removed = pucch.remove_ue_uci(grid, rnti).unwrap();
        assert_eq!(removed.harq_ack_nof_bits, 1);
        assert_eq!(removed.csi_part1_nof_bits, CSI_PART1_BITS);
        assert!(grid.result.ul.pucchs.is_empty());
        assert!(pucch.remove_ue_uci(grid, rnti).is_none());
    }

    #[test]
    fn test_sr_opportunity_shares_resource_with_harq() {
        let (mut res, mut pucch) = setup();
        let grid = res.slot_grid_mut(4);
        let rnti = Rnti(0x4601);
        assert!(pucch.alloc_sr_opportunity(grid, rnti));
        assert!(grid.result.ul.pucchs[0].sr_opportunity);
        pucch.alloc_harq_ue(grid, rnti).unwrap();
        assert_eq!(grid.result.ul.pucchs.len(), 1);
        assert_eq!(grid.result.ul.pucchs[0].harq_ack_nof_bits, 1);
        assert!(grid.result.ul.pucchs[0].sr_opportunity);
    }

    #[test]
    fn test_f1_pool_exhaustion() {
        let (mut res, mut pucch) = setup();
        let grid = res.slot_grid_mut(4);
        for i in 0..MAX_F1_RESOURCES {
            assert!(pucch.alloc_harq_ue(grid, Rnti(0x4601 + i as u16)).is_some());
        }
        assert!(pucch.alloc_harq_ue(grid, Rnti(0x4700)).is_none());
    }
}
