//! Time-Domain UE Scheduling
//!
//! Chooses which users get a grant in the current slot and with what
//! resources, then drives the transactional grid allocator. Pending
//! retransmissions go first with their frozen RB count; new transmissions
//! are sized from the pending bytes and the UE's link quality. Users take
//! turns in round-robin order so one heavy buffer cannot starve the rest.

use common::{AggregationLevel, RbRange, UeIndex};
use tracing::trace;

use crate::allocator::{UeCellGridAllocator, UePdschGrant, UePuschGrant};

/// Aggregation level used for UE grants
const UE_AGGR_LVL: AggregationLevel = AggregationLevel::L4;

/// Bytes granted to answer a scheduling request with no BSR yet
const SR_GRANT_BYTES: u32 = 128;

/// Round-robin time-domain scheduler of one cell
#[derive(Debug, Default)]
pub struct UeScheduler {
    rr_offset: usize,
}

impl UeScheduler {
    /// Create the scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate DL and UL grants for the current slot
    pub fn run_slot(&mut self, ctx: &mut UeCellGridAllocator<'_>) {
        let cell_index = ctx.cell_cfg.cell_index;
        let candidates: Vec<UeIndex> = ctx
            .ues
            .iter()
            .filter(|ue| ue.get_pcell().cell_index == cell_index)
            .map(|ue| ue.ue_index)
            .collect();
        if candidates.is_empty() {
            return;
        }

        let n = candidates.len();
        let start = self.rr_offset % n;
        self.rr_offset = self.rr_offset.wrapping_add(1);

        for i in 0..n {
            let ue_index = candidates[(start + i) % n];
            self.schedule_dl_ue(ctx, ue_index);
        }
        for i in 0..n {
            let ue_index = candidates[(start + i) % n];
            self.schedule_ul_ue(ctx, ue_index);
        }
    }

    /// One DL grant attempt for a UE: retransmission first, then new data
    fn schedule_dl_ue(&mut self, ctx: &mut UeCellGridAllocator<'_>, ue_index: UeIndex) {
        let Some(grant) = Self::build_dl_grant(ctx, ue_index) else {
            return;
        };
        if let Err(err) = ctx.allocate_dl_grant(grant) {
            trace!("ue={}: DL grant skipped ({})", ue_index, err.kind());
        }
    }

    fn build_dl_grant(ctx: &UeCellGridAllocator<'_>, ue_index: UeIndex) -> Option<UePdschGrant> {
        let ue = ctx.ues.get(ue_index)?;
        let ue_cc = ue.get_pcell();
        let ss = ue_cc.cfg.ue_search_space();
        let ss_id = ss.cfg.id;
        let td = ss.pdsch_td_list[0];
        let lims = ss.dl_crb_lims;
        let grid = ctx.res_alloc.slot_grid(td.k0);

        // Retransmissions keep their RB count and MCS.
        if let Some(harq_id) = ue_cc.harqs.find_pending_retx_dl() {
            let (len, mcs) = ue_cc
                .harqs
                .dl_tb_params(harq_id)
                .map(|tb| (tb.crbs.len(), tb.mcs))?;
            let crbs = grid.dl_res_grid.find_free_rbs(td.symbols, len, lims)?;
            return Some(UePdschGrant {
                ue_index,
                cell_index: ue_cc.cell_index,
                harq_id,
                ss_id,
                time_res_index: 0,
                crbs,
                aggr_lvl: UE_AGGR_LVL,
                mcs,
            });
        }

        // New transmissions need data, a free process, and no pending removal.
        if ue.deletion_pending {
            return None;
        }
        let pending = ue.pending_dl_bytes();
        if pending == 0 {
            return None;
        }
        let harq_id = ue_cc.harqs.find_empty_dl()?;
        let est = ue_cc.required_dl_prbs(td.symbols, pending)?;
        let crbs = Self::fit_rbs(grid.dl_res_grid.find_free_rbs(td.symbols, est.nof_prbs, lims), || {
            grid.dl_res_grid.largest_free_run(td.symbols, lims)
        })?;
        Some(UePdschGrant {
            ue_index,
            cell_index: ue_cc.cell_index,
            harq_id,
            ss_id,
            time_res_index: 0,
            crbs,
            aggr_lvl: UE_AGGR_LVL,
            mcs: est.mcs,
        })
    }

    /// One UL grant attempt for a UE
    fn schedule_ul_ue(&mut self, ctx: &mut UeCellGridAllocator<'_>, ue_index: UeIndex) {
        let Some(grant) = Self::build_ul_grant(ctx, ue_index) else {
            return;
        };
        if let Err(err) = ctx.allocate_ul_grant(grant) {
            trace!("ue={}: UL grant skipped ({})", ue_index, err.kind());
        }
    }

    fn build_ul_grant(ctx: &UeCellGridAllocator<'_>, ue_index: UeIndex) -> Option<UePuschGrant> {
        let ue = ctx.ues.get(ue_index)?;
        let ue_cc = ue.get_pcell();
        let ss = ue_cc.cfg.ue_search_space();
        let ss_id = ss.cfg.id;
        let td = ss.pusch_td_list[0];
        let lims = ss.ul_crb_lims;
        let grid = ctx.res_alloc.slot_grid(td.k2);

        if let Some(harq_id) = ue_cc.harqs.find_pending_retx_ul() {
            let (len, mcs) = ue_cc
                .harqs
                .ul_tb_params(harq_id)
                .map(|tb| (tb.crbs.len(), tb.mcs))?;
            let crbs = grid.ul_res_grid.find_free_rbs(td.symbols, len, lims)?;
            return Some(UePuschGrant {
                ue_index,
                cell_index: ue_cc.cell_index,
                harq_id,
                ss_id,
                time_res_index: 0,
                crbs,
                aggr_lvl: UE_AGGR_LVL,
                mcs,
            });
        }

        if ue.deletion_pending {
            return None;
        }
        let mut pending = ue.pending_ul_bytes();
        if pending == 0 && ue.has_pending_sr() {
            // An SR without a BSR gets a small probing grant.
            pending = SR_GRANT_BYTES;
        }
        if pending == 0 {
            return None;
        }
        let harq_id = ue_cc.harqs.find_empty_ul()?;
        let est = ue_cc.required_ul_prbs(td.symbols, pending);
        let crbs = Self::fit_rbs(grid.ul_res_grid.find_free_rbs(td.symbols, est.nof_prbs, lims), || {
            grid.ul_res_grid.largest_free_run(td.symbols, lims)
        })?;
        Some(UePuschGrant {
            ue_index,
            cell_index: ue_cc.cell_index,
            harq_id,
            ss_id,
            time_res_index: 0,
            crbs,
            aggr_lvl: UE_AGGR_LVL,
            mcs: est.mcs,
        })
    }

    /// Take the estimated span, or whatever contiguous room is left
    fn fit_rbs(
        exact: Option<RbRange>,
        largest: impl FnOnce() -> RbRange,
    ) -> Option<RbRange> {
        if let Some(r) = exact {
            return Some(r);
        }
        let run = largest();
        (!run.is_empty()).then_some(run)
    }
}

