//! Per-Cell Slot Driver
//!
//! Owns every allocator of one cell and orchestrates the slot pipeline:
//! ring advance, HARQ timeout sweep, SIB and RA scheduling, CSI-RS and
//! CSI-report reservations, the UE allocation pass, the PUCCH-to-PUSCH
//! multiplex pass and the final consistency checks. The slot result for
//! slot `s` is complete before the ring window ever moves past `s`.

use std::sync::Arc;
use std::time::Instant;

use common::{Rnti, SlotPoint};
use tracing::{debug, warn};

use crate::allocator::UeCellGridAllocator;
use crate::config::{CellConfig, ExpertConfig};
use crate::grid::CellResourceAllocator;
use crate::metrics::SchedMetrics;
use crate::pdcch::PdcchResourceAllocator;
use crate::pucch::PucchAllocator;
use crate::ra::RaScheduler;
use crate::result::{CsiRsInfo, SlotSchedResult};
use crate::sanity;
use crate::sib::SibScheduler;
use crate::uci::UciAllocator;
use crate::ue::UeRepository;
use crate::ue_sched::UeScheduler;

/// Scheduler of one cell; all its state is owned here and only mutated on
/// the cell's slot indication.
pub struct CellScheduler {
    /// Static cell configuration
    pub cell_cfg: Arc<CellConfig>,
    expert: Arc<ExpertConfig>,
    /// Slot grid ring
    pub res_alloc: CellResourceAllocator,
    pdcch: PdcchResourceAllocator,
    pucch: PucchAllocator,
    uci: UciAllocator,
    sib: SibScheduler,
    /// Random access scheduler; the event manager feeds it RACH reports
    pub ra: RaScheduler,
    ue_sched: UeScheduler,
    /// Per-cell counters
    pub metrics: SchedMetrics,
}

impl CellScheduler {
    /// Build the cell scheduler
    pub fn new(cell_cfg: Arc<CellConfig>, expert: Arc<ExpertConfig>) -> Self {
        let res_alloc =
            CellResourceAllocator::new(cell_cfg.scs, cell_cfg.nof_dl_rbs, cell_cfg.nof_ul_rbs);
        Self {
            res_alloc,
            pdcch: PdcchResourceAllocator::new(),
            pucch: PucchAllocator::new(cell_cfg.nof_ul_rbs),
            uci: UciAllocator::new(),
            sib: SibScheduler::new(cell_cfg.clone()),
            ra: RaScheduler::new(cell_cfg.clone()),
            ue_sched: UeScheduler::new(),
            metrics: SchedMetrics::default(),
            expert,
            cell_cfg,
        }
    }

    /// Advance the ring window to `slot`; must precede event processing
    pub fn advance_slot(&mut self, slot: SlotPoint) {
        self.res_alloc.slot_indication(slot);
    }

    /// Run the scheduling pipeline for the current slot
    pub fn run_schedulers(&mut self, slot: SlotPoint, ues: &mut UeRepository) {
        let started = Instant::now();

        self.expire_harq_timeouts(slot, ues);

        // Broadcast and random access go first; they own CORESET#0.
        self.sib.run_slot(self.res_alloc.slot_grid_mut(0), &mut self.pdcch);
        self.ra.run_slot(&mut self.res_alloc, &mut self.pdcch);

        self.schedule_csi_rs(slot);
        self.reserve_uci_opportunities(ues);

        // UE data allocation, new transmissions and retransmissions.
        let mut alloc = UeCellGridAllocator {
            expert: &self.expert,
            cell_cfg: &self.cell_cfg,
            res_alloc: &mut self.res_alloc,
            pdcch: &mut self.pdcch,
            pucch: &mut self.pucch,
            uci: &mut self.uci,
            ues,
            metrics: &mut self.metrics,
        };
        self.ue_sched.run_slot(&mut alloc);

        // Any PUCCH landing on a slot that also carries the UE's PUSCH is
        // folded into the PUSCH, TS 38.213 clause 9.
        let rntis: Vec<Rnti> = self
            .res_alloc
            .slot_grid(0)
            .result
            .ul
            .puschs
            .iter()
            .map(|p| p.pusch.rnti)
            .collect();
        for rnti in rntis {
            let grid = self.res_alloc.slot_grid_mut(0);
            self.uci.multiplex_uci_on_pusch(grid, &mut self.pucch, rnti);
        }

        if cfg!(debug_assertions) {
            sanity::assert_slot_result_consistency(&self.cell_cfg, &self.res_alloc);
        }

        self.metrics.slots_processed += 1;
        let budget_us = (self.cell_cfg.scs.slot_duration_us() / 2) as u128;
        let took_us = started.elapsed().as_micros();
        if took_us > budget_us {
            self.metrics.rt_violations += 1;
            warn!(
                "slot {} took {} us, exceeding the {} us real-time budget",
                slot, took_us, budget_us
            );
        }
    }

    /// The finished result of the current slot
    pub fn current_result(&self) -> &SlotSchedResult {
        &self.res_alloc.slot_grid(0).result
    }

    /// Treat HARQ processes whose feedback never arrived as NACKed
    fn expire_harq_timeouts(&mut self, slot: SlotPoint, ues: &mut UeRepository) {
        let timeout = self.expert.harq_timeout_slots;
        let cell_index = self.cell_cfg.cell_index;
        for ue in ues.iter_mut() {
            if ue.get_pcell().cell_index != cell_index {
                continue;
            }
            let expired = ue.get_pcell_mut().harqs.slot_indication(slot, timeout);
            for (harq_id, outcome) in expired {
                debug!(
                    "ue={} harq={}: feedback timeout, treated as NACK ({:?})",
                    ue.ue_index, harq_id.0, outcome
                );
            }
        }
    }

    /// Publish the periodic CSI-RS of this slot, if configured
    fn schedule_csi_rs(&mut self, slot: SlotPoint) {
        let Some(csi_rs) = self.cell_cfg.csi_rs else {
            return;
        };
        if !self.cell_cfg.is_dl_enabled(slot) {
            return;
        }
        if (slot.to_uint() + csi_rs.period_slots - (csi_rs.offset_slots % csi_rs.period_slots))
            % csi_rs.period_slots
            != 0
        {
            return;
        }
        let crbs = self.cell_cfg.dl_crb_lims();
        self.res_alloc
            .slot_grid_mut(0)
            .result
            .dl
            .csi_rs
            .push(CsiRsInfo {
                crbs,
                symbol: csi_rs.symbol,
            });
        debug!("slot {}: CSI-RS published", slot);
    }

    /// Reserve periodic CSI report and SR PUCCHs one feedback window
    /// ahead, so HARQ bits bound later to the same slot merge into a
    /// single resource (format 2 when CSI is present).
    fn reserve_uci_opportunities(&mut self, ues: &UeRepository) {
        let Some(ahead) = self.cell_cfg.k1_candidates.last().copied() else {
            return;
        };
        let target_slot = self.res_alloc.slot_grid(ahead as u32).slot;
        if !self.cell_cfg.is_fully_ul_enabled(target_slot) {
            return;
        }
        let cell_index = self.cell_cfg.cell_index;
        let due: Vec<(Rnti, bool, bool)> = ues
            .iter()
            .filter(|ue| ue.get_pcell().cell_index == cell_index)
            .map(|ue| {
                let cc = ue.get_pcell();
                (ue.crnti, cc.cfg.is_csi_slot(target_slot), cc.cfg.is_sr_slot(target_slot))
            })
            .filter(|(_, csi, sr)| *csi || *sr)
            .collect();
        for (rnti, csi_due, sr_due) in due {
            let grid = self.res_alloc.slot_grid_mut(ahead as u32);
            if csi_due && !self.pucch.alloc_csi(grid, rnti) {
                debug!("rnti={}: CSI report dropped, no PUCCH capacity at {}", rnti, target_slot);
            }
            let grid = self.res_alloc.slot_grid_mut(ahead as u32);
            if sr_due && !self.pucch.alloc_sr_opportunity(grid, rnti) {
                debug!("rnti={}: SR opportunity dropped at {}", rnti, target_slot);
            }
        }
    }
}
