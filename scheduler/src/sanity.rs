//! Slot Result Consistency Checks
//!
//! Cross-checks a scheduled slot against the cell configuration: grid
//! exclusivity, PDCCH-to-data coupling, CORESET#0 containment of broadcast
//! PDSCHs, and RNTI uniqueness in the RA set. These depend only on the
//! immutable cell configuration, not on scheduler internals, so tests and
//! the debug build of the slot driver share them. Violations are bugs and
//! panic.

use common::{RbRange, Rnti, SymbolRange};

use crate::config::CellConfig;
use crate::dci::{range_from_riv, DciDl, DciUl};
use crate::grid::CellResourceAllocator;
use crate::result::SlotSchedResult;

#[derive(Debug, Clone, Copy)]
struct Span {
    rnti: Rnti,
    crbs: RbRange,
    symbols: SymbolRange,
}

fn overlap(a: &Span, b: &Span) -> bool {
    a.crbs.overlaps(b.crbs) && a.symbols.overlaps(b.symbols)
}

fn assert_disjoint(spans: &[Span], direction: &str) {
    for (i, a) in spans.iter().enumerate() {
        for b in spans.iter().skip(i + 1) {
            assert!(
                !overlap(a, b),
                "{} grid overlap between rnti={} ({} x {}) and rnti={} ({} x {})",
                direction,
                a.rnti,
                a.crbs,
                a.symbols,
                b.rnti,
                b.crbs,
                b.symbols
            );
        }
    }
}

/// No two DL data allocations overlap in (RB x symbol)
pub fn assert_dl_grid_exclusivity(result: &SlotSchedResult) {
    let mut spans = Vec::new();
    for sib in &result.dl.sibs {
        spans.push(Span {
            rnti: sib.si_rnti,
            crbs: sib.pdsch.crbs,
            symbols: sib.pdsch.symbols,
        });
    }
    for rar in &result.dl.rar_grants {
        spans.push(Span {
            rnti: rar.ra_rnti,
            crbs: rar.pdsch.crbs,
            symbols: rar.pdsch.symbols,
        });
    }
    for pg in &result.dl.paging_grants {
        spans.push(Span {
            rnti: pg.p_rnti,
            crbs: pg.pdsch.crbs,
            symbols: pg.pdsch.symbols,
        });
    }
    for g in &result.dl.ue_grants {
        spans.push(Span {
            rnti: g.pdsch.rnti,
            crbs: g.pdsch.crbs,
            symbols: g.pdsch.symbols,
        });
    }
    assert_disjoint(&spans, "DL");
}

/// No two UL allocations overlap in (RB x symbol)
pub fn assert_ul_grid_exclusivity(result: &SlotSchedResult) {
    let mut spans = Vec::new();
    for p in &result.ul.puschs {
        spans.push(Span {
            rnti: p.pusch.rnti,
            crbs: p.pusch.crbs,
            symbols: p.pusch.symbols,
        });
    }
    for p in &result.ul.pucchs {
        spans.push(Span {
            rnti: p.rnti,
            crbs: p.crbs,
            symbols: p.symbols,
        });
    }
    for p in &result.ul.prachs {
        spans.push(Span {
            rnti: Rnti::INVALID,
            crbs: p.crbs,
            symbols: p.symbols,
        });
    }
    assert_disjoint(&spans, "UL");
}

/// SIB and RAR PDSCHs stay inside the CORESET#0 RB limits
pub fn assert_broadcast_rb_limits(cell_cfg: &CellConfig, result: &SlotSchedResult) {
    for sib in &result.dl.sibs {
        assert!(
            cell_cfg.coreset0.rbs.contains(sib.pdsch.crbs),
            "SIB PDSCH crbs={} outside CORESET#0 {}",
            sib.pdsch.crbs,
            cell_cfg.coreset0.rbs
        );
    }
    for rar in &result.dl.rar_grants {
        assert!(
            cell_cfg.coreset0.rbs.contains(rar.pdsch.crbs),
            "RAR PDSCH crbs={} outside CORESET#0 {}",
            rar.pdsch.crbs,
            cell_cfg.coreset0.rbs
        );
    }
}

/// No RA-RNTI or Msg3 TC-RNTI repeats in a slot's RA set
pub fn assert_unique_ra_rntis(result: &SlotSchedResult) {
    let mut ra_rntis = Vec::new();
    let mut tc_rntis = Vec::new();
    for rar in &result.dl.rar_grants {
        assert!(
            !ra_rntis.contains(&rar.ra_rnti),
            "repeated ra-rnti={} in one slot",
            rar.ra_rnti
        );
        ra_rntis.push(rar.ra_rnti);
        for g in &rar.grants {
            assert!(
                !tc_rntis.contains(&g.tc_rnti),
                "repeated tc-rnti={} in one slot",
                g.tc_rnti
            );
            tc_rntis.push(g.tc_rnti);
        }
    }
}

/// Every UE DL PDCCH in the current slot has exactly one PDSCH at the k0
/// it encodes, with matching RNTI, RBs and symbols; symmetrically for UL
/// PDCCHs and PUSCHs at k2.
pub fn assert_pdcch_data_coupling(cell_cfg: &CellConfig, res_alloc: &CellResourceAllocator) {
    let pdcch_result = &res_alloc.slot_grid(0).result;

    for pdcch in &pdcch_result.dl.dl_pdcchs {
        if pdcch.rnti.kind() != common::RntiKind::Crnti {
            continue;
        }
        let (riv, time_res) = match &pdcch.dci {
            Some(DciDl::TcRntiF1_0(f)) | Some(DciDl::CRntiF1_0(f)) => {
                (f.freq_assignment, f.time_assignment)
            }
            Some(DciDl::CRntiF1_1(f)) => (f.freq_assignment, f.time_assignment),
            None => continue,
        };
        let td = &cell_cfg.pdsch_td_list[time_res as usize];
        let data_result = &res_alloc.slot_grid(td.k0).result;
        let matches: Vec<_> = data_result
            .dl
            .ue_grants
            .iter()
            .filter(|g| g.pdsch.rnti == pdcch.rnti)
            .collect();
        assert_eq!(
            matches.len(),
            1,
            "DL PDCCH for rnti={} has {} PDSCHs at k0={}",
            pdcch.rnti,
            matches.len(),
            td.k0
        );
        let pdsch = &matches[0].pdsch;
        assert_eq!(pdsch.symbols, td.symbols, "PDSCH symbols do not match the DCI time assignment");
        let lims = cell_cfg.dl_crb_lims();
        let prbs = range_from_riv(lims.len(), riv);
        let expected = RbRange::new(prbs.start + lims.start, prbs.stop + lims.start);
        assert_eq!(
            pdsch.crbs, expected,
            "PDSCH crbs do not match the DCI frequency assignment for rnti={}",
            pdcch.rnti
        );
    }

    for pdcch in &pdcch_result.dl.ul_pdcchs {
        let (riv, time_res) = match &pdcch.dci {
            Some(DciUl::TcRntiF0_0(f)) | Some(DciUl::CRntiF0_0(f)) => {
                (f.freq_assignment, f.time_assignment)
            }
            Some(DciUl::CRntiF0_1(f)) => (f.freq_assignment, f.time_assignment),
            None => continue,
        };
        let td = &cell_cfg.pusch_td_list[time_res as usize];
        let data_result = &res_alloc.slot_grid(td.k2).result;
        let matches: Vec<_> = data_result
            .ul
            .puschs
            .iter()
            .filter(|p| p.pusch.rnti == pdcch.rnti)
            .collect();
        assert_eq!(
            matches.len(),
            1,
            "UL PDCCH for rnti={} has {} PUSCHs at k2={}",
            pdcch.rnti,
            matches.len(),
            td.k2
        );
        let pusch = &matches[0].pusch;
        assert_eq!(pusch.symbols, td.symbols, "PUSCH symbols do not match the DCI time assignment");
        let lims = cell_cfg.ul_crb_lims();
        let prbs = range_from_riv(lims.len(), riv);
        let expected = RbRange::new(prbs.start + lims.start, prbs.stop + lims.start);
        assert_eq!(
            pusch.crbs, expected,
            "PUSCH crbs do not match the DCI frequency assignment for rnti={}",
            pdcch.rnti
        );
    }
}

/// Run every consistency check for the slot at offset 0
pub fn assert_slot_result_consistency(cell_cfg: &CellConfig, res_alloc: &CellResourceAllocator) {
    let result = &res_alloc.slot_grid(0).result;
    assert_dl_grid_exclusivity(result);
    assert_ul_grid_exclusivity(result);
    assert_broadcast_rb_limits(cell_cfg, result);
    assert_unique_ra_rntis(result);
    assert_pdcch_data_coupling(cell_cfg, res_alloc);
}
