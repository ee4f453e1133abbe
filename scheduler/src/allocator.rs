//! UE Grant Allocation
//!
//! The transactional entry point that turns a candidate grant into PDCCH,
//! PDSCH/PUSCH, HARQ and UCI state. Every step validates before reserving;
//! the reserving steps (PDCCH, UCI, grid) each have an explicit inverse
//! that is invoked on any later failure, so a rejected grant leaves no
//! trace in the slot.

use common::{AggregationLevel, CellIndex, HarqId, RbRange, SearchSpaceId, UeIndex};
use tracing::{info, warn};

use crate::config::{CellConfig, ExpertConfig};
use crate::dci::{
    self, DlDciConfigType, DlDciParams, UlDciConfigType, UlDciParams,
};
use crate::grid::CellResourceAllocator;
use crate::harq::TbParams;
use crate::mcs::{self, McsTbs, SchConfigParams};
use crate::metrics::SchedMetrics;
use crate::pdcch::PdcchResourceAllocator;
use crate::pucch::{PucchAllocator, MAX_HARQ_BITS_PER_UCI};
use crate::result::{
    DlMsgAlloc, DlMsgContext, PdschInformation, PuschInformation, UlSchedContext, UlSchedInfo,
};
use crate::uci::{self, UciAllocator};
use crate::ue::UeRepository;
use crate::SchedError;

/// A candidate downlink grant produced by the time-domain scheduler
#[derive(Debug, Clone, Copy)]
pub struct UePdschGrant {
    /// Target UE
    pub ue_index: UeIndex,
    /// Serving cell
    pub cell_index: CellIndex,
    /// HARQ process to transmit on
    pub harq_id: HarqId,
    /// SearchSpace to schedule from
    pub ss_id: SearchSpaceId,
    /// Index into the PDSCH time-domain list
    pub time_res_index: usize,
    /// CRBs to allocate
    pub crbs: RbRange,
    /// PDCCH aggregation level
    pub aggr_lvl: AggregationLevel,
    /// Starting MCS from link adaptation
    pub mcs: u8,
}

/// A candidate uplink grant produced by the time-domain scheduler
#[derive(Debug, Clone, Copy)]
pub struct UePuschGrant {
    /// Target UE
    pub ue_index: UeIndex,
    /// Serving cell
    pub cell_index: CellIndex,
    /// HARQ process to transmit on
    pub harq_id: HarqId,
    /// SearchSpace to schedule from
    pub ss_id: SearchSpaceId,
    /// Index into the PUSCH time-domain list
    pub time_res_index: usize,
    /// CRBs to allocate
    pub crbs: RbRange,
    /// PDCCH aggregation level
    pub aggr_lvl: AggregationLevel,
    /// Starting MCS from link adaptation
    pub mcs: u8,
}

/// Borrowed cell state the allocator operates on for one slot
pub struct UeCellGridAllocator<'a> {
    /// Policy knobs
    pub expert: &'a ExpertConfig,
    /// Cell configuration
    pub cell_cfg: &'a CellConfig,
    /// Slot grid ring
    pub res_alloc: &'a mut CellResourceAllocator,
    /// PDCCH allocator
    pub pdcch: &'a mut PdcchResourceAllocator,
    /// PUCCH allocator
    pub pucch: &'a mut PucchAllocator,
    /// UCI allocator
    pub uci: &'a mut UciAllocator,
    /// UE repository
    pub ues: &'a mut UeRepository,
    /// Counters
    pub metrics: &'a mut SchedMetrics,
}

impl<'a> UeCellGridAllocator<'a> {
    fn fail(&mut self, err: SchedError) -> Result<(), SchedError> {
        self.metrics.count_error(&err);
        Err(err)
    }

    /// Allocate a downlink grant: PDCCH now, PDSCH at k0, HARQ feedback at
    /// the first feasible k1. Rolls back every reservation on failure.
    pub fn allocate_dl_grant(&mut self, grant: UePdschGrant) -> Result<(), SchedError> {
        let Some(ue) = self.ues.get(grant.ue_index) else {
            return self.fail(SchedError::UnknownUe(grant.ue_index));
        };
        let Some(ue_cc) = ue.find_cell(grant.cell_index) else {
            warn!("PDSCH allocation failed. Cause: ue={} has no carrier on cell {}",
                grant.ue_index, grant.cell_index.0);
            return self.fail(SchedError::InactiveCarrier);
        };
        if !ue_cc.is_active() {
            warn!("PDSCH allocation failed. Cause: the ue={} carrier is inactive", grant.ue_index);
            return self.fail(SchedError::InactiveCarrier);
        }
        let rnti = ue_cc.rnti();

        // Resolve the SearchSpace and check it belongs to the active BWP.
        let Some(ss_info) = ue_cc.cfg.find_search_space(grant.ss_id).cloned() else {
            warn!("Failed to allocate PDSCH. Cause: no valid SearchSpace found");
            return self.fail(SchedError::SsBwpMismatch);
        };
        if ss_info.bwp_id != ue_cc.active_bwp_id() {
            warn!("Failed to allocate PDSCH. Cause: SearchSpace not valid for active BWP");
            return self.fail(SchedError::SsBwpMismatch);
        }
        let dci_type = ss_info.crnti_dl_dci_format();

        // A retransmission must keep the DCI format of the first transmission.
        let (h_empty, h_prev_tb, h_prev_fmt) = {
            let ue_mut = self.ues.get_mut(grant.ue_index).unwrap();
            let h = ue_mut.get_pcell_mut().harqs.dl_harq(grant.harq_id);
            (h.is_empty(), h.tb().copied(), h.dci_format)
        };
        if !h_empty && h_prev_fmt != Some(dci_type) {
            return self.fail(SchedError::DciFormatMismatchRetx);
        }

        let td = ss_info.pdsch_td_list[grant.time_res_index];
        let pdcch_slot = self.res_alloc.slot_grid(0).slot;
        let pdsch_slot = self.res_alloc.slot_grid(td.k0).slot;
        if !self.cell_cfg.is_dl_enabled(pdcch_slot) || !self.cell_cfg.is_dl_enabled(pdsch_slot) {
            warn!("Failed to allocate PDSCH in slot={}. Cause: DL is not active", pdsch_slot);
            return self.fail(SchedError::GridCollision);
        }

        // Output-list capacity.
        if self.res_alloc.slot_grid(td.k0).result.ue_grants_full()
            || self.res_alloc.slot_grid(0).result.dl_pdcchs_full()
        {
            warn!("Failed to allocate PDSCH. Cause: no space available in scheduler output list");
            return self.fail(SchedError::NoSpacePdcch);
        }

        // CRB bounds and retx size stability.
        if !ss_info.dl_crb_lims.contains(grant.crbs) {
            warn!(
                "Failed to allocate PDSCH. Cause: CRBs={} outside the valid limits={}",
                grant.crbs, ss_info.dl_crb_lims
            );
            return self.fail(SchedError::RbLimitViolation);
        }
        if let Some(prev) = &h_prev_tb {
            if grant.crbs.len() != prev.crbs.len() {
                warn!(
                    "Failed to allocate PDSCH. Cause: number of CRBs has to remain constant during retxs (harq-id={}, {}!={})",
                    grant.harq_id.0,
                    prev.crbs.len(),
                    grant.crbs.len()
                );
                return self.fail(SchedError::RbLimitViolation);
            }
        }

        // Grid collision on the PDSCH span.
        if self
            .res_alloc
            .slot_grid(td.k0)
            .dl_collides(self.cell_cfg.scs, td.symbols, grant.crbs)
        {
            warn!("Failed to allocate PDSCH. Cause: no space available in scheduler RB resource grid");
            return self.fail(SchedError::GridCollision);
        }

        // Step 6: reserve the PDCCH.
        let Some(pdcch_idx) = self.pdcch.alloc_dl_pdcch_ue(
            self.res_alloc.slot_grid_mut(0),
            rnti,
            &ss_info.cfg,
            &ss_info.coreset,
            grant.aggr_lvl,
        ) else {
            info!("Failed to allocate PDSCH. Cause: no space in PDCCH");
            return self.fail(SchedError::NoSpacePdcch);
        };

        // Step 7: bind the HARQ feedback to a k1 candidate.
        let ue_cfg_csi = self.ues.get(grant.ue_index).unwrap().get_pcell().cfg.clone();
        let mut chosen: Option<(u8, u8, uci::UciAllocation)> = None;
        for (k1_index, k1) in ss_info.k1_candidates.iter().enumerate() {
            let uci_slot = pdsch_slot + *k1 as u32;
            if !self.cell_cfg.is_fully_ul_enabled(uci_slot) {
                continue;
            }
            // Keep CSI slots below the per-UCI HARQ cap so the report fits.
            if ue_cfg_csi.is_csi_slot(uci_slot)
                && self.uci.scheduled_pdsch_counter_in_ue_uci(uci_slot, rnti)
                    >= MAX_HARQ_BITS_PER_UCI
            {
                continue;
            }
            if let Some(alloc) =
                self.uci
                    .alloc_uci_harq_ue(self.res_alloc, self.pucch, rnti, td.k0, *k1)
            {
                chosen = Some((*k1, k1_index as u8, alloc));
                break;
            }
        }
        let Some((k1, k1_index, uci_alloc)) = chosen else {
            info!("Failed to allocate PDSCH. Cause: no space in PUCCH");
            self.pdcch.cancel_last_pdcch(self.res_alloc.slot_grid_mut(0));
            return self.fail(SchedError::NoSpacePucch);
        };

        // Step 8: MCS and TBS. CSI-RS in the PDSCH slot costs one MCS step.
        let params = SchConfigParams::pdsch(td.symbols.len());
        let mut adjusted_mcs = grant.mcs;
        if !self.res_alloc.slot_grid(td.k0).result.dl.csi_rs.is_empty() && adjusted_mcs > 0 {
            adjusted_mcs -= 1;
        }
        let mcs_tbs = if h_empty {
            mcs::compute_mcs_tbs(&params, adjusted_mcs, grant.crbs.len())
        } else {
            h_prev_tb.map(|tb| McsTbs {
                mcs: tb.mcs,
                tbs_bytes: tb.tbs_bytes,
            })
        };
        let Some(mcs_tbs) = mcs_tbs else {
            warn!("Failed to allocate PDSCH. Cause: no MCS such that code rate <= 0.95");
            self.uci
                .cancel_uci_harq_ue(self.res_alloc, self.pucch, rnti, td.k0, k1);
            self.pdcch.cancel_last_pdcch(self.res_alloc.slot_grid_mut(0));
            return self.fail(SchedError::NoMcsFeasible);
        };

        // Step 9: commit. Grid first, then HARQ, DCI and the PDSCH entry.
        self.res_alloc
            .slot_grid_mut(td.k0)
            .dl_res_grid
            .fill(td.symbols, grant.crbs);

        let ue = self.ues.get_mut(grant.ue_index).unwrap();
        let (rv, ndi, nof_retxs) = {
            let ue_cc = ue.get_pcell_mut();
            let h = ue_cc.harqs.dl_harq(grant.harq_id);
            if h.is_empty() {
                h.new_tx(pdsch_slot, k1, self.expert.max_nof_harq_retxs, uci_alloc.dai);
            } else {
                h.new_retx(pdsch_slot, k1, uci_alloc.dai);
            }
            h.save_alloc_params(
                dci_type,
                TbParams {
                    tbs_bytes: mcs_tbs.tbs_bytes,
                    mcs: mcs_tbs.mcs,
                    crbs: grant.crbs,
                },
            );
            let seq = &self.expert.pdsch_rv_sequence;
            (seq[h.nof_retxs as usize % seq.len()], h.ndi, h.nof_retxs)
        };

        let dci_params = DlDciParams {
            nof_bwp_rbs: ss_info.dl_crb_lims.len(),
            bwp_start_rb: ss_info.dl_crb_lims.start,
            crbs: grant.crbs,
            time_assignment: grant.time_res_index as u8,
            k1_index,
            pucch_resource_indicator: uci_alloc.pucch_res_indicator.unwrap_or(0),
            dai: uci_alloc.dai,
            mcs: mcs_tbs.mcs,
            rv,
            harq_id: grant.harq_id.0,
            ndi,
        };
        let dci_payload = match dci_type {
            DlDciConfigType::TcRntiF1_0 => dci::build_dci_f1_0_tc_rnti(&dci_params),
            DlDciConfigType::CRntiF1_0 => dci::build_dci_f1_0_c_rnti(&dci_params),
            DlDciConfigType::CRntiF1_1 => dci::build_dci_f1_1_c_rnti(&dci_params),
        };
        {
            let pdcch_grid = self.res_alloc.slot_grid_mut(0);
            let entry = &mut pdcch_grid.result.dl.dl_pdcchs[pdcch_idx];
            entry.dci = Some(dci_payload);
            entry.harq_feedback_timing = Some(k1);
        }

        // Step 10: new transmissions carry logical-channel bytes.
        let tb_info = if h_empty {
            self.ues
                .get_mut(grant.ue_index)
                .unwrap()
                .build_dl_transport_block_info(mcs_tbs.tbs_bytes)
        } else {
            Vec::new()
        };

        let pdsch_grid = self.res_alloc.slot_grid_mut(td.k0);
        pdsch_grid.result.dl.ue_grants.push(DlMsgAlloc {
            context: DlMsgContext {
                ue_index: grant.ue_index,
                k1,
                ss_id: grant.ss_id,
                nof_retxs,
            },
            pdsch: PdschInformation {
                rnti,
                crbs: grant.crbs,
                symbols: td.symbols,
                mcs: mcs_tbs.mcs,
                tbs_bytes: mcs_tbs.tbs_bytes,
                rv,
                harq_id: grant.harq_id,
                ndi,
                dci_format: dci_type,
            },
            tb_info,
        });
        Ok(())
    }

    /// Allocate an uplink grant: PDCCH now, PUSCH at k2. Rolls back the
    /// PDCCH reservation on any later failure.
    pub fn allocate_ul_grant(&mut self, grant: UePuschGrant) -> Result<(), SchedError> {
        let Some(ue) = self.ues.get(grant.ue_index) else {
            return self.fail(SchedError::UnknownUe(grant.ue_index));
        };
        let Some(ue_cc) = ue.find_cell(grant.cell_index) else {
            warn!("PUSCH allocation failed. Cause: ue={} has no carrier on cell {}",
                grant.ue_index, grant.cell_index.0);
            return self.fail(SchedError::InactiveCarrier);
        };
        if !ue_cc.is_active() {
            warn!("PUSCH allocation failed. Cause: the ue={} carrier is inactive", grant.ue_index);
            return self.fail(SchedError::InactiveCarrier);
        }
        let rnti = ue_cc.rnti();

        let Some(ss_info) = ue_cc.cfg.find_search_space(grant.ss_id).cloned() else {
            warn!("Failed to allocate PUSCH. Cause: no valid SearchSpace found");
            return self.fail(SchedError::SsBwpMismatch);
        };
        if ss_info.bwp_id != ue_cc.active_bwp_id() {
            warn!(
                "Failed to allocate PUSCH. Cause: SearchSpace {} does not belong to the active BWP",
                grant.ss_id.0
            );
            return self.fail(SchedError::SsBwpMismatch);
        }
        let mut dci_type = ss_info.crnti_ul_dci_format();

        let (h_empty, h_prev_tb, h_prev_fmt) = {
            let ue_mut = self.ues.get_mut(grant.ue_index).unwrap();
            let h = ue_mut.get_pcell_mut().harqs.ul_harq(grant.harq_id);
            (h.is_empty(), h.tb().copied(), h.dci_format)
        };
        if !h_empty {
            match h_prev_fmt {
                Some(prev) if prev == dci_type => dci_type = prev,
                _ => {
                    info!(
                        "Failed to allocate PUSCH. Cause: DCI format of the HARQ retx is not supported in SearchSpace {}",
                        grant.ss_id.0
                    );
                    return self.fail(SchedError::DciFormatMismatchRetx);
                }
            }
        }

        let td = ss_info.pusch_td_list[grant.time_res_index];
        let pdcch_slot = self.res_alloc.slot_grid(0).slot;
        let pusch_slot = self.res_alloc.slot_grid(td.k2).slot;
        if !self.cell_cfg.is_dl_enabled(pdcch_slot) {
            warn!("Failed to allocate PUSCH in slot={}. Cause: DL is not active in the PDCCH slot", pusch_slot);
            return self.fail(SchedError::GridCollision);
        }
        if !self.cell_cfg.is_ul_enabled(pusch_slot) {
            warn!(
                "Failed to allocate PUSCH in slot={}. Cause: UL is not active in the PUSCH slot (k2={})",
                pusch_slot, td.k2
            );
            return self.fail(SchedError::GridCollision);
        }

        if self.res_alloc.slot_grid(td.k2).result.puschs_full()
            || self.res_alloc.slot_grid(0).result.ul_pdcchs_full()
        {
            warn!("Failed to allocate PUSCH in slot={}. Cause: no space available in scheduler output list", pusch_slot);
            return self.fail(SchedError::NoSpacePusch);
        }

        if !ss_info.ul_crb_lims.contains(grant.crbs) {
            warn!("Failed to allocate PUSCH. Cause: CRBs allocated outside the BWP");
            return self.fail(SchedError::RbLimitViolation);
        }
        if let Some(prev) = &h_prev_tb {
            if grant.crbs.len() != prev.crbs.len() {
                warn!(
                    "Failed to allocate PUSCH. Cause: number of CRBs has to remain constant during retxs (harq-id={}, {}!={})",
                    grant.harq_id.0,
                    prev.crbs.len(),
                    grant.crbs.len()
                );
                return self.fail(SchedError::RbLimitViolation);
            }
        }

        if self
            .res_alloc
            .slot_grid(td.k2)
            .ul_collides(self.cell_cfg.scs, td.symbols, grant.crbs)
        {
            warn!("Failed to allocate PUSCH. Cause: no space available in scheduler RB resource grid");
            return self.fail(SchedError::GridCollision);
        }

        // Reserve the PDCCH.
        if self
            .pdcch
            .alloc_ul_pdcch_ue(
                self.res_alloc.slot_grid_mut(0),
                rnti,
                &ss_info.cfg,
                &ss_info.coreset,
                grant.aggr_lvl,
            )
            .is_none()
        {
            info!("Failed to allocate PUSCH. Cause: no space in PDCCH");
            return self.fail(SchedError::NoSpacePdcch);
        }
        let pdcch_idx = self.res_alloc.slot_grid(0).result.dl.ul_pdcchs.len() - 1;

        // MCS and TBS.
        let params = SchConfigParams::pusch(td.symbols.len());
        let mcs_tbs = if h_empty {
            mcs::compute_mcs_tbs(&params, grant.mcs, grant.crbs.len())
        } else {
            h_prev_tb.map(|tb| McsTbs {
                mcs: tb.mcs,
                tbs_bytes: tb.tbs_bytes,
            })
        };
        let Some(mcs_tbs) = mcs_tbs else {
            warn!("Failed to allocate PUSCH. Cause: no MCS such that code rate <= 0.95");
            self.pdcch.cancel_last_pdcch(self.res_alloc.slot_grid_mut(0));
            return self.fail(SchedError::NoMcsFeasible);
        };

        // Total DAI over the HARQ-ACK bits already bound to this UL slot,
        // TS 38.213 clause 9.1.3.2.
        let dai = if dci_type == UlDciConfigType::CRntiF0_1 {
            uci::compute_ul_dai(
                self.uci.scheduled_pdsch_counter_in_ue_uci(pusch_slot, rnti) as u32,
            )
        } else {
            3
        };

        // Commit.
        self.res_alloc
            .slot_grid_mut(td.k2)
            .ul_res_grid
            .fill(td.symbols, grant.crbs);

        let ue = self.ues.get_mut(grant.ue_index).unwrap();
        let (rv, ndi, nof_retxs) = {
            let ue_cc = ue.get_pcell_mut();
            let h = ue_cc.harqs.ul_harq(grant.harq_id);
            if h.is_empty() {
                h.new_tx(pusch_slot, self.expert.max_nof_harq_retxs);
            } else {
                h.new_retx(pusch_slot);
            }
            h.save_alloc_params(
                dci_type,
                TbParams {
                    tbs_bytes: mcs_tbs.tbs_bytes,
                    mcs: mcs_tbs.mcs,
                    crbs: grant.crbs,
                },
            );
            let seq = &self.expert.pusch_rv_sequence;
            (seq[h.nof_retxs as usize % seq.len()], h.ndi, h.nof_retxs)
        };
        ue.reset_sr_indication();

        let dci_params = UlDciParams {
            nof_bwp_rbs: ss_info.ul_crb_lims.len(),
            bwp_start_rb: ss_info.ul_crb_lims.start,
            crbs: grant.crbs,
            time_assignment: grant.time_res_index as u8,
            mcs: mcs_tbs.mcs,
            rv,
            harq_id: grant.harq_id.0,
            ndi,
            dai,
        };
        let dci_payload = match dci_type {
            UlDciConfigType::TcRntiF0_0 => dci::build_dci_f0_0_tc_rnti(&dci_params),
            UlDciConfigType::CRntiF0_0 => dci::build_dci_f0_0_c_rnti(&dci_params),
            UlDciConfigType::CRntiF0_1 => dci::build_dci_f0_1_c_rnti(&dci_params),
        };
        self.res_alloc.slot_grid_mut(0).result.dl.ul_pdcchs[pdcch_idx].dci = Some(dci_payload);

        let pusch_grid = self.res_alloc.slot_grid_mut(td.k2);
        pusch_grid.result.ul.puschs.push(UlSchedInfo {
            context: UlSchedContext {
                ue_index: grant.ue_index,
                ss_id: grant.ss_id,
                k2: td.k2,
                nof_retxs,
            },
            pusch: PuschInformation {
                rnti,
                crbs: grant.crbs,
                symbols: td.symbols,
                mcs: mcs_tbs.mcs,
                tbs_bytes: mcs_tbs.tbs_bytes,
                rv,
                harq_id: grant.harq_id,
                ndi,
                dci_format: dci_type,
            },
            uci: None,
        });

        // Any UCI already reserved on PUCCH for this slot moves to the PUSCH.
        self.uci.multiplex_uci_on_pusch(pusch_grid, self.pucch, rnti);
        Ok(())
    }
}
