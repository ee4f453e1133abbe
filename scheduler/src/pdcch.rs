//! PDCCH Resource Allocation
//!
//! Places DL and UL scheduling DCIs into CORESET/SearchSpace candidates.
//! Candidate positions follow the TS 38.213 clause 10.1 hashing: common
//! search spaces use Y = 0, UE-specific search spaces walk the Y_k
//! recursion seeded by the RNTI. Allocated CCEs are mirrored into the DL
//! resource grid as CORESET RBs x CORESET symbols, and the most recent
//! allocation can be cancelled atomically for downstream rollback.

use common::{AggregationLevel, RbRange, Rnti, SlotPoint, SymbolRange};
use tracing::trace;

use crate::config::{CoresetConfig, SearchSpaceConfig, SearchSpaceType};
use crate::grid::{SlotGrid, RING_ALLOCATOR_SIZE};
use crate::result::{DlPdcch, UlPdcch};

/// Y_k multipliers per CORESET index modulo 3, TS 38.213 clause 10.1
const YK_A: [u32; 3] = [39827, 39829, 39839];
/// Y_k modulus
const YK_D: u32 = 65537;

/// A CCE span owned by one PDCCH in a slot
#[derive(Debug, Clone, Copy)]
struct CceAllocation {
    coreset_id: u8,
    cce_start: u8,
    nof_cces: u8,
}

/// Undo information for the most recent allocation in a slot
#[derive(Debug, Clone, Copy)]
struct LastPdcch {
    is_dl: bool,
    grid_rbs: RbRange,
    grid_symbols: SymbolRange,
}

#[derive(Debug, Default)]
struct SlotRecords {
    slot: Option<SlotPoint>,
    used_cces: Vec<CceAllocation>,
    last: Option<LastPdcch>,
}

impl SlotRecords {
    fn reset(&mut self, slot: SlotPoint) {
        self.slot = Some(slot);
        self.used_cces.clear();
        self.last = None;
    }
}

/// Per-cell PDCCH allocator with one record set per ring slot
#[derive(Debug)]
pub struct PdcchResourceAllocator {
    records: Vec<SlotRecords>,
}

impl PdcchResourceAllocator {
    /// Create the allocator with empty per-slot records
    pub fn new() -> Self {
        Self {
            records: (0..RING_ALLOCATOR_SIZE).map(|_| SlotRecords::default()).collect(),
        }
    }

    fn records_for(&mut self, slot: SlotPoint) -> &mut SlotRecords {
        let idx = slot.to_uint() as usize % RING_ALLOCATOR_SIZE;
        let rec = &mut self.records[idx];
        if rec.slot != Some(slot) {
            rec.reset(slot);
        }
        rec
    }

    /// Allocate a PDCCH for a DL grant in a UE search space
    pub fn alloc_dl_pdcch_ue(
        &mut self,
        slot_grid: &mut SlotGrid,
        rnti: Rnti,
        ss_cfg: &SearchSpaceConfig,
        coreset: &CoresetConfig,
        aggr_lvl: AggregationLevel,
    ) -> Option<usize> {
        self.alloc_pdcch(slot_grid, rnti, ss_cfg, coreset, aggr_lvl, true)
    }

    /// Allocate a PDCCH for an UL grant in a UE search space
    pub fn alloc_ul_pdcch_ue(
        &mut self,
        slot_grid: &mut SlotGrid,
        rnti: Rnti,
        ss_cfg: &SearchSpaceConfig,
        coreset: &CoresetConfig,
        aggr_lvl: AggregationLevel,
    ) -> Option<usize> {
        self.alloc_pdcch(slot_grid, rnti, ss_cfg, coreset, aggr_lvl, false)
    }

    /// Allocate a DL PDCCH in a common search space (SI-RNTI, RA-RNTI)
    pub fn alloc_dl_pdcch_common(
        &mut self,
        slot_grid: &mut SlotGrid,
        rnti: Rnti,
        ss_cfg: &SearchSpaceConfig,
        coreset: &CoresetConfig,
        aggr_lvl: AggregationLevel,
    ) -> Option<usize> {
        debug_assert_eq!(ss_cfg.ss_type, SearchSpaceType::Common);
        self.alloc_pdcch(slot_grid, rnti, ss_cfg, coreset, aggr_lvl, true)
    }

    fn alloc_pdcch(
        &mut self,
        slot_grid: &mut SlotGrid,
        rnti: Rnti,
        ss_cfg: &SearchSpaceConfig,
        coreset: &CoresetConfig,
        aggr_lvl: AggregationLevel,
        is_dl: bool,
    ) -> Option<usize> {
        if is_dl && slot_grid.result.dl_pdcchs_full() {
            return None;
        }
        if !is_dl && slot_grid.result.ul_pdcchs_full() {
            return None;
        }

        let slot = slot_grid.slot;
        let level = aggr_lvl.nof_cces();
        let level_index = level.trailing_zeros() as usize;
        let nof_candidates = ss_cfg.nof_candidates[level_index];
        if nof_candidates == 0 {
            return None;
        }
        let nof_cces = coreset.nof_cces();
        if nof_cces < level {
            return None;
        }

        let y = match ss_cfg.ss_type {
            SearchSpaceType::Common => 0,
            _ => compute_yk(rnti, slot, coreset.id.0),
        };

        let cce_start = {
            let rec = self.records_for(slot);
            let mut found = None;
            for m in 0..nof_candidates {
                let start = cce_candidate_start(y, m, nof_candidates, nof_cces, level);
                let free = !rec.used_cces.iter().any(|c| {
                    c.coreset_id == coreset.id.0
                        && (start < c.cce_start + c.nof_cces && c.cce_start < start + level)
                });
                if free {
                    found = Some(start);
                    break;
                }
            }
            found?
        };

        // Mirror the candidate into the DL grid; skip candidates whose RBs
        // were taken by another CORESET.
        let grid_rbs = cce_to_rbs(coreset, cce_start, level);
        let grid_symbols = coreset.symbols();
        if slot_grid.dl_res_grid.collides(grid_symbols, grid_rbs) {
            trace!("rnti={}: PDCCH candidate RBs {} taken in grid", rnti, grid_rbs);
            return None;
        }
        slot_grid.dl_res_grid.fill(grid_symbols, grid_rbs);

        let rec = self.records_for(slot);
        rec.used_cces.push(CceAllocation {
            coreset_id: coreset.id.0,
            cce_start,
            nof_cces: level,
        });
        rec.last = Some(LastPdcch {
            is_dl,
            grid_rbs,
            grid_symbols,
        });

        if is_dl {
            slot_grid.result.dl.dl_pdcchs.push(DlPdcch {
                rnti,
                ss_id: ss_cfg.id,
                coreset_id: coreset.id,
                aggr_lvl,
                cce_start,
                dci: None,
                harq_feedback_timing: None,
            });
            Some(slot_grid.result.dl.dl_pdcchs.len() - 1)
        } else {
            slot_grid.result.dl.ul_pdcchs.push(UlPdcch {
                rnti,
                ss_id: ss_cfg.id,
                coreset_id: coreset.id,
                aggr_lvl,
                cce_start,
                dci: None,
            });
            Some(slot_grid.result.dl.ul_pdcchs.len() - 1)
        }
    }

    /// Reverse the most recent allocation in `slot_grid`. Only one level of
    /// rollback is kept; calling this twice without an intervening
    /// allocation is a contract violation.
    pub fn cancel_last_pdcch(&mut self, slot_grid: &mut SlotGrid) {
        let slot = slot_grid.slot;
        let rec = self.records_for(slot);
        let last = rec.last.take().expect("cancel_last_pdcch without a pending allocation");
        rec.used_cces.pop();
        slot_grid.dl_res_grid.clear_span(last.grid_symbols, last.grid_rbs);
        if last.is_dl {
            slot_grid.result.dl.dl_pdcchs.pop();
        } else {
            slot_grid.result.dl.ul_pdcchs.pop();
        }
    }
}

impl Default for PdcchResourceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// CCE index of candidate `m`, TS 38.213 clause 10.1
fn cce_candidate_start(y: u32, m: u8, nof_candidates: u8, nof_cces: u8, level: u8) -> u8 {
    let l = level as u32;
    let m = m as u32;
    let n_cce = nof_cces as u32;
    let m_total = nof_candidates as u32;
    (((y + (m * n_cce) / (l * m_total)) % (n_cce / l)) * l) as u8
}

/// Y_k for a UE-specific search space, seeded by the RNTI and advanced by
/// the slot index within the frame.
fn compute_yk(rnti: Rnti, slot: SlotPoint, coreset_id: u8) -> u32 {
    let a = YK_A[(coreset_id % 3) as usize];
    let mut y = rnti.0 as u32;
    for _ in 0..=slot.slot_index() {
        y = (a.wrapping_mul(y)) % YK_D;
    }
    y
}

/// RBs covered by `level` CCEs starting at `cce_start` with non-interleaved
/// CCE-to-REG mapping
fn cce_to_rbs(coreset: &CoresetConfig, cce_start: u8, level: u8) -> RbRange {
    let rbs_per_cce = (6 / coreset.nof_symbols as u16).max(1);
    let start = coreset.rbs.start + cce_start as u16 * rbs_per_cce;
    let stop = (start + level as u16 * rbs_per_cce).min(coreset.rbs.stop);
    RbRange::new(start, stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CellConfig;
    use crate::grid::CellResourceAllocator;
    use common::{CellIndex, SubcarrierSpacing};

    fn setup() -> (CellConfig, CellResourceAllocator, PdcchResourceAllocator) {
        let cfg = CellConfig::default_fdd(CellIndex(0));
        let mut res = CellResourceAllocator::new(cfg.scs, cfg.nof_dl_rbs, cfg.nof_ul_rbs);
        res.slot_indication(SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0));
        (cfg, res, PdcchResourceAllocator::new())
    }

    #[test]
    fn test_common_alloc_uses_y_zero() {
        let (cfg, mut res, mut pdcch) = setup();
        let ss0 = cfg.find_search_space(common::SearchSpaceId::SS0).unwrap().clone();
        let grid = res.slot_grid_mut(0);
        let idx = pdcch
            .alloc_dl_pdcch_common(grid, Rnti::SI_RNTI, &ss0, &cfg.coreset0, AggregationLevel::L4)
            .unwrap();
        let entry = &grid.result.dl.dl_pdcchs[idx];
        assert_eq!(entry.cce_start, 0);
        assert_eq!(entry.rnti, Rnti::SI_RNTI);
    }

    #[test]
    fn test_candidates_exhaust() {
        let (cfg, mut res, mut pdcch) = setup();
        let ss0 = cfg.find_search_space(common::SearchSpaceId::SS0).unwrap().clone();
        let grid = res.slot_grid_mut(0);
        // CORESET#0 has 8 CCEs -> two L4 candidates.
        assert!(pdcch
            .alloc_dl_pdcch_common(grid, Rnti::SI_RNTI, &ss0, &cfg.coreset0, AggregationLevel::L4)
            .is_some());
        assert!(pdcch
            .alloc_dl_pdcch_common(grid, Rnti::new(0x0002), &ss0, &cfg.coreset0, AggregationLevel::L4)
            .is_some());
        assert!(pdcch
            .alloc_dl_pdcch_common(grid, Rnti::new(0x0003), &ss0, &cfg.coreset0, AggregationLevel::L4)
            .is_none());
    }

    #[test]
    fn test_cancel_last_releases_everything() {
        let (cfg, mut res, mut pdcch) = setup();
        let ss0 = cfg.find_search_space(common::SearchSpaceId::SS0).unwrap().clone();
        let grid = res.slot_grid_mut(0);
        pdcch
            .alloc_dl_pdcch_common(grid, Rnti::SI_RNTI, &ss0, &cfg.coreset0, AggregationLevel::L8)
            .unwrap();
        assert_eq!(grid.result.dl.dl_pdcchs.len(), 1);
        pdcch.cancel_last_pdcch(grid);
        assert!(grid.result.dl.dl_pdcchs.is_empty());
        // The full CORESET is free again.
        assert!(pdcch
            .alloc_dl_pdcch_common(grid, Rnti::SI_RNTI, &ss0, &cfg.coreset0, AggregationLevel::L8)
            .is_some());
    }

    #[test]
    fn test_ue_alloc_in_dedicated_coreset() {
        let (cfg, mut res, mut pdcch) = setup();
        let ss2 = cfg.find_search_space(common::SearchSpaceId::SS2).unwrap().clone();
        let grid = res.slot_grid_mut(0);
        let idx = pdcch
            .alloc_dl_pdcch_ue(grid, Rnti(0x4601), &ss2, &cfg.coreset1, AggregationLevel::L4)
            .unwrap();
        let entry = &grid.result.dl.dl_pdcchs[idx];
        assert_eq!(entry.coreset_id, cfg.coreset1.id);
        // The grid mirrors the CCEs over the CORESET symbols.
        let rbs = cce_to_rbs(&cfg.coreset1, entry.cce_start, 4);
        assert!(grid.dl_res_grid.collides(cfg.coreset1.symbols(), rbs));
    }

    #[test]
    fn test_yk_changes_with_slot() {
        let r = Rnti(0x4601);
        let s0 = SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0);
        let s1 = SlotPoint::new(SubcarrierSpacing::Scs15, 0, 1);
        assert_ne!(compute_yk(r, s0, 1), compute_yk(r, s1, 1));
    }
}
