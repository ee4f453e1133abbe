//! SIB1 Scheduling
//!
//! Places the periodic SIB1 broadcast: a Type-0 CSS PDCCH on
//! SearchSpace#0 and a PDSCH constrained to the CORESET#0 RB limits,
//! repeating with the configured period.

use std::sync::Arc;

use common::{AggregationLevel, Rnti, SearchSpaceId, SlotPoint};
use tracing::{debug, warn};

use crate::config::CellConfig;
use crate::dci::DlDciConfigType;
use crate::grid::SlotGrid;
use crate::mcs::{self, SchConfigParams};
use crate::pdcch::PdcchResourceAllocator;
use crate::result::{PdschInformation, SibInformation, MAX_SIBS_PER_SLOT};

/// Fixed MCS for SIB1, decodable at cell-edge SNR
const SIB1_MCS: u8 = 5;

/// Periodic SIB1 scheduler of one cell
#[derive(Debug)]
pub struct SibScheduler {
    cell_cfg: Arc<CellConfig>,
}

impl SibScheduler {
    /// Create the scheduler
    pub fn new(cell_cfg: Arc<CellConfig>) -> Self {
        Self { cell_cfg }
    }

    /// Whether `slot` is a SIB1 transmission opportunity
    fn is_sib1_slot(&self, slot: SlotPoint) -> bool {
        slot.to_uint() % self.cell_cfg.sib1_period_slots == 0
    }

    /// Run for the slot at offset 0; allocates PDCCH + PDSCH when due
    pub fn run_slot(&mut self, slot_grid: &mut SlotGrid, pdcch: &mut PdcchResourceAllocator) {
        let slot = slot_grid.slot;
        if !self.is_sib1_slot(slot) || !self.cell_cfg.is_dl_enabled(slot) {
            return;
        }
        if slot_grid.result.dl.sibs.len() >= MAX_SIBS_PER_SLOT {
            return;
        }

        let cfg = self.cell_cfg.clone();
        let Some(ss0) = cfg.find_search_space(SearchSpaceId::SS0) else {
            return;
        };
        let coreset0 = &cfg.coreset0;

        // The SIB1 PDSCH must lie inside the CORESET#0 RB limits.
        let td = &cfg.pdsch_td_list[0];
        let params = SchConfigParams::pdsch(td.symbols.len());
        let nof_prbs = mcs::required_prbs(&params, SIB1_MCS, cfg.sib1_payload_bytes, coreset0.rbs.len());
        let Some(crbs) =
            slot_grid
                .dl_res_grid
                .find_free_rbs(td.symbols, nof_prbs.max(1), coreset0.rbs)
        else {
            warn!("slot {}: no room for SIB1 PDSCH inside CORESET#0", slot);
            return;
        };

        if pdcch
            .alloc_dl_pdcch_common(slot_grid, Rnti::SI_RNTI, ss0, coreset0, AggregationLevel::L4)
            .is_none()
        {
            warn!("slot {}: no PDCCH candidate for SIB1", slot);
            return;
        }

        let Some(mcs_tbs) = mcs::compute_mcs_tbs(&params, SIB1_MCS, crbs.len()) else {
            pdcch.cancel_last_pdcch(slot_grid);
            return;
        };

        slot_grid.dl_res_grid.fill(td.symbols, crbs);
        slot_grid.result.dl.sibs.push(SibInformation {
            si_rnti: Rnti::SI_RNTI,
            pdsch: PdschInformation {
                rnti: Rnti::SI_RNTI,
                crbs,
                symbols: td.symbols,
                mcs: mcs_tbs.mcs,
                tbs_bytes: mcs_tbs.tbs_bytes,
                rv: 0,
                harq_id: common::HarqId(0),
                ndi: true,
                dci_format: DlDciConfigType::CRntiF1_0,
            },
        });
        debug!("slot {}: SIB1 scheduled on crbs={}", slot, crbs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellResourceAllocator;
    use common::{CellIndex, SubcarrierSpacing};

    fn setup() -> (Arc<CellConfig>, CellResourceAllocator, PdcchResourceAllocator, SibScheduler) {
        let cfg = Arc::new(CellConfig::default_fdd(CellIndex(0)));
        let res = CellResourceAllocator::new(cfg.scs, cfg.nof_dl_rbs, cfg.nof_ul_rbs);
        let sib = SibScheduler::new(cfg.clone());
        (cfg, res, PdcchResourceAllocator::new(), sib)
    }

    #[test]
    fn test_sib1_period() {
        let (cfg, mut res, mut pdcch, mut sib) = setup();
        let start = SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0);
        let mut scheduled = Vec::new();
        for i in 0..(2 * cfg.sib1_period_slots) {
            let slot = start + i;
            res.slot_indication(slot);
            sib.run_slot(res.slot_grid_mut(0), &mut pdcch);
            if !res.slot_grid(0).result.dl.sibs.is_empty() {
                scheduled.push(i);
            }
        }
        assert_eq!(scheduled, vec![0, cfg.sib1_period_slots]);
    }

    #[test]
    fn test_sib1_within_coreset0() {
        let (cfg, mut res, mut pdcch, mut sib) = setup();
        res.slot_indication(SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0));
        sib.run_slot(res.slot_grid_mut(0), &mut pdcch);
        let grid = res.slot_grid(0);
        let sib1 = &grid.result.dl.sibs[0];
        assert!(cfg.coreset0.rbs.contains(sib1.pdsch.crbs));
        assert_eq!(sib1.si_rnti, Rnti::SI_RNTI);
        // Exactly one PDCCH accompanies it.
        assert_eq!(grid.result.dl.dl_pdcchs.len(), 1);
        assert_eq!(grid.result.dl.dl_pdcchs[0].rnti, Rnti::SI_RNTI);
    }
}
