//! Random Access Scheduling
//!
//! Publishes PRACH occasions according to prach-ConfigurationIndex, and
//! answers detected preambles with a RAR inside the response window: a
//! Type-1 CSS PDCCH, a RAR PDSCH constrained to CORESET#0, and one Msg3
//! PUSCH grant per preamble with a freshly allocated TC-RNTI. RA-RNTIs
//! derive from the PRACH occasion indices; no RA-RNTI or TC-RNTI repeats
//! within a slot.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use common::{
    AggregationLevel, CellIndex, HarqId, RbRange, Rnti, SlotPoint, SymbolRange,
    NOF_SYMBOLS_PER_SLOT,
};
use tracing::{debug, info, warn};

use crate::config::{prach_timing_from_index, CellConfig};
use crate::dci::{DlDciConfigType, UlDciConfigType};
use crate::grid::{CellResourceAllocator, RING_ALLOCATOR_SIZE};
use crate::mcs::{self, SchConfigParams};
use crate::pdcch::PdcchResourceAllocator;
use crate::result::{
    PdschInformation, PrachOccasionInfo, PuschInformation, RarInformation, RarUlGrant,
    UlSchedContext, UlSchedInfo, MAX_RARS_PER_SLOT,
};

/// PRBs of a long-format PRACH occasion
const PRACH_NOF_PRBS: u16 = 6;

/// PRBs granted to each Msg3 PUSCH
const MSG3_NOF_PRBS: u16 = 3;

/// MCS of RAR PDSCHs
const RAR_MCS: u8 = 2;

/// MAC RAR size: subheader + TA/grant + TC-RNTI
const RAR_GRANT_BYTES: u32 = 8;

/// A preamble detected inside one PRACH occasion
#[derive(Debug, Clone, Copy)]
pub struct RachPreamble {
    /// Detected preamble index
    pub preamble_index: u8,
    /// Timing advance command derived from the delay estimate
    pub timing_advance: u16,
}

/// One detected PRACH occasion
#[derive(Debug, Clone)]
pub struct RachOccasion {
    /// First symbol of the occasion
    pub start_symbol: u8,
    /// Frequency-domain occasion index
    pub frequency_index: u8,
    /// Detected preambles
    pub preambles: Vec<RachPreamble>,
}

/// PRACH detection report from the PHY
#[derive(Debug, Clone)]
pub struct RachIndication {
    /// Cell the PRACH was received on
    pub cell_index: CellIndex,
    /// Slot the occasion was received in
    pub slot_rx: SlotPoint,
    /// Detected occasions
    pub occasions: Vec<RachOccasion>,
}

#[derive(Debug)]
struct PendingRar {
    ra_rnti: Rnti,
    window_start: SlotPoint,
    window_end: SlotPoint,
    preambles: Vec<(RachPreamble, Rnti)>,
}

/// RA-RNTI of a PRACH occasion, TS 38.321 clause 5.1.3
fn ra_rnti(slot_rx: SlotPoint, start_symbol: u8, frequency_index: u8) -> Rnti {
    let s_id = start_symbol as u32;
    let t_id = slot_rx.slot_index() % 80;
    let f_id = frequency_index as u32;
    Rnti((1 + s_id + 14 * t_id + 14 * 80 * f_id) as u16)
}

/// Per-cell random access scheduler
#[derive(Debug)]
pub struct RaScheduler {
    cell_cfg: Arc<CellConfig>,
    pending: Vec<PendingRar>,
    next_tc_rnti: u16,
    prach_window_primed: bool,
}

impl RaScheduler {
    /// Create the scheduler
    pub fn new(cell_cfg: Arc<CellConfig>) -> Self {
        Self {
            cell_cfg,
            pending: Vec::new(),
            next_tc_rnti: Rnti::MIN_CRNTI.0,
            prach_window_primed: false,
        }
    }

    /// Record detected preambles; RARs are emitted on later slots inside
    /// the response window.
    pub fn handle_rach_indication(&mut self, ind: RachIndication) {
        for occ in ind.occasions {
            if occ.preambles.is_empty() {
                continue;
            }
            let rnti = ra_rnti(ind.slot_rx, occ.start_symbol, occ.frequency_index);
            let preambles = occ
                .preambles
                .iter()
                .map(|p| {
                    let tc_rnti = Rnti(self.next_tc_rnti);
                    self.next_tc_rnti = self.next_tc_rnti.wrapping_add(1).max(Rnti::MIN_CRNTI.0);
                    (*p, tc_rnti)
                })
                .collect::<Vec<_>>();
            info!(
                "slot {}: {} preamble(s) detected, ra-rnti={}",
                ind.slot_rx,
                preambles.len(),
                rnti
            );
            self.pending.push(PendingRar {
                ra_rnti: rnti,
                window_start: ind.slot_rx + 1,
                window_end: ind.slot_rx + self.cell_cfg.rach.ra_window_slots,
                preambles,
            });
        }
    }

    /// Run for the current slot: publish PRACH occasions and emit due RARs
    pub fn run_slot(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchResourceAllocator,
    ) {
        self.publish_prach_occasions(res_alloc);
        self.schedule_pending_rars(res_alloc, pdcch);
    }

    /// Reserve upcoming PRACH occasions. Occasions are placed into a slot
    /// grid as soon as the slot enters the ring window, before any PUSCH
    /// can claim the PRBs; the first call primes the whole window.
    fn publish_prach_occasions(&mut self, res_alloc: &mut CellResourceAllocator) {
        if self.prach_window_primed {
            self.maybe_publish_occasion(res_alloc, RING_ALLOCATOR_SIZE as u32 - 1);
        } else {
            for offset in 0..RING_ALLOCATOR_SIZE as u32 {
                self.maybe_publish_occasion(res_alloc, offset);
            }
            self.prach_window_primed = true;
        }
    }

    fn maybe_publish_occasion(&mut self, res_alloc: &mut CellResourceAllocator, offset: u32) {
        let cfg = self.cell_cfg.clone();
        let Some(timing) = prach_timing_from_index(cfg.rach.prach_config_index) else {
            return;
        };
        let grid = res_alloc.slot_grid_mut(offset);
        let slot = grid.slot;
        if slot.sfn() % timing.x != timing.y
            || !timing.subframes.contains(&slot.subframe_index())
            || slot.subframe_slot_index() != 0
            || !cfg.is_ul_enabled(slot)
        {
            return;
        }

        let crbs = RbRange::new(
            cfg.rach.prach_frequency_start,
            cfg.rach.prach_frequency_start + PRACH_NOF_PRBS,
        );
        let symbols = SymbolRange::new(0, NOF_SYMBOLS_PER_SLOT);
        if grid.ul_res_grid.collides(symbols, crbs) {
            warn!("slot {}: PRACH PRBs already reserved", slot);
            return;
        }
        grid.ul_res_grid.fill(symbols, crbs);
        grid.result.ul.prachs.push(PrachOccasionInfo {
            crbs,
            symbols,
            format: 0,
            nof_preambles: cfg.rach.total_nof_ra_preambles,
        });
        debug!("slot {}: PRACH occasion published on crbs={}", slot, crbs);
    }

    fn schedule_pending_rars(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchResourceAllocator,
    ) {
        let cfg = self.cell_cfg.clone();
        let now = res_alloc.current_slot();

        // Drop requests whose window closed before a DL slot was found.
        self.pending.retain(|p| {
            if now - p.window_end > 0 {
                warn!("ra-rnti={}: response window expired, dropping request", p.ra_rnti);
                return false;
            }
            true
        });

        if !cfg.is_dl_enabled(now) {
            return;
        }
        let msg3_offset = cfg.rach.msg3_delay_slots;
        let msg3_slot = now + msg3_offset;
        if !cfg.is_ul_enabled(msg3_slot) {
            return;
        }

        let mut i = 0;
        while i < self.pending.len() {
            let in_window = {
                let p = &self.pending[i];
                now - p.window_start >= 0 && p.window_end - now >= 0
            };
            if !in_window || res_alloc.slot_grid(0).result.dl.rar_grants.len() >= MAX_RARS_PER_SLOT
            {
                i += 1;
                continue;
            }
            if self.try_schedule_rar(res_alloc, pdcch, i, msg3_offset) {
                self.pending.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn try_schedule_rar(
        &mut self,
        res_alloc: &mut CellResourceAllocator,
        pdcch: &mut PdcchResourceAllocator,
        pending_idx: usize,
        msg3_offset: u32,
    ) -> bool {
        let cfg = self.cell_cfg.clone();
        let p = &self.pending[pending_idx];
        let ra_rnti = p.ra_rnti;
        let nof_grants = p.preambles.len() as u32;

        let Some(ss_ra) = cfg.find_search_space(cfg.ra_search_space_id) else {
            return false;
        };
        let coreset0 = &cfg.coreset0;
        let td = &cfg.pdsch_td_list[0];
        let params = SchConfigParams::pdsch(td.symbols.len());

        // Size the RAR PDSCH and probe for space before reserving anything.
        let payload = 1 + nof_grants * RAR_GRANT_BYTES;
        let nof_prbs = mcs::required_prbs(&params, RAR_MCS, payload, coreset0.rbs.len()).max(1);
        let pdsch_crbs = {
            let grid = res_alloc.slot_grid(0);
            match grid.dl_res_grid.find_free_rbs(td.symbols, nof_prbs, coreset0.rbs) {
                Some(r) => r,
                None => return false,
            }
        };

        // Probe Msg3 space: consecutive runs in the UL grid at +msg3_delay.
        let msg3_symbols = cfg.pusch_td_list[0].symbols;
        let mut msg3_crbs = Vec::with_capacity(nof_grants as usize);
        {
            let msg3_grid = res_alloc.slot_grid(msg3_offset);
            if msg3_grid.result.ul.puschs.len() + nof_grants as usize
                > crate::result::MAX_PUSCHS_PER_SLOT
            {
                return false;
            }
            let mut lims = cfg.ul_crb_lims();
            for _ in 0..nof_grants {
                match msg3_grid
                    .ul_res_grid
                    .find_free_rbs(msg3_symbols, MSG3_NOF_PRBS, lims)
                {
                    Some(r) => {
                        lims = RbRange::new(r.stop, lims.stop);
                        msg3_crbs.push(r);
                    }
                    None => return false,
                }
            }
        }

        // Reserve the PDCCH last among the probes; it is the only step
        // needing rollback from here on.
        if pdcch
            .alloc_dl_pdcch_common(
                res_alloc.slot_grid_mut(0),
                ra_rnti,
                ss_ra,
                coreset0,
                AggregationLevel::L4,
            )
            .is_none()
        {
            debug!("ra-rnti={}: no PDCCH candidate this slot", ra_rnti);
            return false;
        }

        let Some(mcs_tbs) = mcs::compute_mcs_tbs(&params, RAR_MCS, pdsch_crbs.len()) else {
            pdcch.cancel_last_pdcch(res_alloc.slot_grid_mut(0));
            return false;
        };

        // Commit: fill grids and emit the RAR with its Msg3 grants.
        let p = &self.pending[pending_idx];
        let mut grants = Vec::with_capacity(p.preambles.len());
        for ((preamble, tc_rnti), crbs) in p.preambles.iter().zip(msg3_crbs.iter()) {
            grants.push(RarUlGrant {
                preamble_index: preamble.preamble_index,
                timing_advance: preamble.timing_advance,
                tc_rnti: *tc_rnti,
                msg3: PuschInformation {
                    rnti: *tc_rnti,
                    crbs: *crbs,
                    symbols: msg3_symbols,
                    mcs: 0,
                    tbs_bytes: mcs::calculate_tbs(&SchConfigParams::pusch(msg3_symbols.len()), 0, MSG3_NOF_PRBS),
                    rv: 0,
                    harq_id: HarqId(0),
                    ndi: true,
                    dci_format: UlDciConfigType::TcRntiF0_0,
                },
            });
        }
        let pdu = build_rar_pdu(&grants);

        let msg3_grid = res_alloc.slot_grid_mut(msg3_offset);
        for (crbs, grant) in msg3_crbs.iter().zip(grants.iter()) {
            msg3_grid.ul_res_grid.fill(msg3_symbols, *crbs);
            msg3_grid.result.ul.puschs.push(UlSchedInfo {
                context: UlSchedContext {
                    ue_index: common::UeIndex::INVALID,
                    ss_id: cfg.ra_search_space_id,
                    k2: msg3_offset,
                    nof_retxs: 0,
                },
                pusch: grant.msg3.clone(),
                uci: None,
            });
        }

        let grid = res_alloc.slot_grid_mut(0);
        grid.dl_res_grid.fill(td.symbols, pdsch_crbs);
        info!(
            "slot {}: RAR for ra-rnti={} with {} grant(s), pdu {} bytes",
            grid.slot,
            ra_rnti,
            grants.len(),
            pdu.len()
        );
        grid.result.dl.rar_grants.push(RarInformation {
            ra_rnti,
            pdsch: PdschInformation {
                rnti: ra_rnti,
                crbs: pdsch_crbs,
                symbols: td.symbols,
                mcs: mcs_tbs.mcs,
                tbs_bytes: mcs_tbs.tbs_bytes,
                rv: 0,
                harq_id: HarqId(0),
                ndi: true,
                dci_format: DlDciConfigType::TcRntiF1_0,
            },
            grants,
            pdu,
        });
        true
    }
}

/// Assemble the RAR MAC PDU: one E/T/RAPID subheader and MAC RAR per
/// answered preamble, TS 38.321 clause 6.1.5.
fn build_rar_pdu(grants: &[RarUlGrant]) -> Bytes {
    let mut buf = BytesMut::with_capacity(grants.len() * RAR_GRANT_BYTES as usize);
    for (i, grant) in grants.iter().enumerate() {
        let is_last = i + 1 == grants.len();
        // E/T/RAPID: E=1 while more subheaders follow, T=1 for RAPID.
        let e_bit = if is_last { 0x00 } else { 0x80 };
        buf.put_u8(e_bit | 0x40 | (grant.preamble_index & 0x3F));

        // Timing Advance Command (12 bits) + UL grant (20 bits).
        let ta = grant.timing_advance & 0x0FFF;
        buf.put_u8((ta >> 4) as u8);
        let grant_riv = crate::dci::riv_from_range(
            grant.msg3.crbs.stop.max(MSG3_NOF_PRBS),
            grant.msg3.crbs,
        ) as u32;
        buf.put_u8((((ta & 0x0F) as u8) << 4) | ((grant_riv >> 16) & 0x0F) as u8);
        buf.put_u16((grant_riv & 0xFFFF) as u16);

        // Temporary C-RNTI.
        buf.put_u16(grant.tc_rnti.0);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CellIndex, SubcarrierSpacing};

    fn setup() -> (Arc<CellConfig>, CellResourceAllocator, PdcchResourceAllocator, RaScheduler) {
        let cfg = Arc::new(CellConfig::default_fdd(CellIndex(0)));
        let res = CellResourceAllocator::new(cfg.scs, cfg.nof_dl_rbs, cfg.nof_ul_rbs);
        let ra = RaScheduler::new(cfg.clone());
        (cfg, res, PdcchResourceAllocator::new(), ra)
    }

    fn sl(n: u32) -> SlotPoint {
        SlotPoint::new(SubcarrierSpacing::Scs15, n / 10, n % 10)
    }

    fn one_preamble(slot_rx: SlotPoint) -> RachIndication {
        RachIndication {
            cell_index: CellIndex(0),
            slot_rx,
            occasions: vec![RachOccasion {
                start_symbol: 0,
                frequency_index: 0,
                preambles: vec![RachPreamble {
                    preamble_index: 17,
                    timing_advance: 12,
                }],
            }],
        }
    }

    #[test]
    fn test_prach_occasion_published_on_config_slot() {
        let (cfg, mut res, mut pdcch, mut ra) = setup();
        // Index 16: every frame, subframe 4.
        assert_eq!(cfg.rach.prach_config_index, 16);
        res.slot_indication(sl(4));
        ra.run_slot(&mut res, &mut pdcch);
        assert_eq!(res.slot_grid(0).result.ul.prachs.len(), 1);

        res.slot_indication(sl(5));
        ra.run_slot(&mut res, &mut pdcch);
        assert!(res.slot_grid(0).result.ul.prachs.is_empty());
    }

    #[test]
    fn test_rar_emitted_in_window() {
        let (cfg, mut res, mut pdcch, mut ra) = setup();
        res.slot_indication(sl(4));
        ra.handle_rach_indication(one_preamble(sl(4)));

        res.slot_indication(sl(5));
        ra.run_slot(&mut res, &mut pdcch);
        let grid = res.slot_grid(0);
        assert_eq!(grid.result.dl.rar_grants.len(), 1);
        let rar = &grid.result.dl.rar_grants[0];
        assert_eq!(rar.grants.len(), 1);
        assert_eq!(rar.grants[0].preamble_index, 17);
        assert_eq!(rar.grants[0].tc_rnti, Rnti::MIN_CRNTI);
        // RAR PDSCH stays inside CORESET#0.
        assert!(cfg.coreset0.rbs.contains(rar.pdsch.crbs));
        // Msg3 is reserved at +msg3_delay.
        let msg3 = res.slot_grid(cfg.rach.msg3_delay_slots);
        assert!(msg3
            .ul_res_grid
            .collides(cfg.pusch_td_list[0].symbols, rar.grants[0].msg3.crbs));
    }

    #[test]
    fn test_no_repeated_rntis_in_slot() {
        let (_cfg, mut res, mut pdcch, mut ra) = setup();
        res.slot_indication(sl(4));
        // Two occasions at different frequency indices in the same slot.
        ra.handle_rach_indication(RachIndication {
            cell_index: CellIndex(0),
            slot_rx: sl(4),
            occasions: vec![
                RachOccasion {
                    start_symbol: 0,
                    frequency_index: 0,
                    preambles: vec![RachPreamble { preamble_index: 1, timing_advance: 0 }],
                },
                RachOccasion {
                    start_symbol: 0,
                    frequency_index: 1,
                    preambles: vec![RachPreamble { preamble_index: 2, timing_advance: 0 }],
                },
            ],
        });
        res.slot_indication(sl(5));
        ra.run_slot(&mut res, &mut pdcch);
        let rars = &res.slot_grid(0).result.dl.rar_grants;
        assert_eq!(rars.len(), 2);
        assert_ne!(rars[0].ra_rnti, rars[1].ra_rnti);
        assert_ne!(rars[0].grants[0].tc_rnti, rars[1].grants[0].tc_rnti);
    }

    #[test]
    fn test_window_expiry_drops_request() {
        let (cfg, mut res, mut pdcch, mut ra) = setup();
        res.slot_indication(sl(4));
        ra.handle_rach_indication(one_preamble(sl(4)));
        // Jump past the window without scheduling.
        let past = sl(4 + cfg.rach.ra_window_slots + 2);
        res.slot_indication(past);
        ra.run_slot(&mut res, &mut pdcch);
        assert!(res.slot_grid(0).result.dl.rar_grants.is_empty());
        // Nothing left pending afterwards either.
        res.slot_indication(past + 1);
        ra.run_slot(&mut res, &mut pdcch);
        assert!(res.slot_grid(0).result.dl.rar_grants.is_empty());
    }

    #[test]
    fn test_rar_pdu_layout() {
        let grants = vec![RarUlGrant {
            preamble_index: 5,
            timing_advance: 0x123,
            tc_rnti: Rnti(0x4601),
            msg3: PuschInformation {
                rnti: Rnti(0x4601),
                crbs: RbRange::new(0, 3),
                symbols: SymbolRange::new(0, 14),
                mcs: 0,
                tbs_bytes: 7,
                rv: 0,
                harq_id: HarqId(0),
                ndi: true,
                dci_format: UlDciConfigType::TcRntiF0_0,
            },
        }];
        let pdu = build_rar_pdu(&grants);
        assert_eq!(pdu.len(), 7);
        // Last (only) subheader: E=0, T=1, RAPID=5.
        assert_eq!(pdu[0], 0x45);
        // TA 0x123 split across the next 12 bits.
        assert_eq!(pdu[1], 0x12);
        assert_eq!(pdu[2] >> 4, 0x3);
        // TC-RNTI in the trailing two bytes.
        assert_eq!(u16::from_be_bytes([pdu[5], pdu[6]]), 0x4601);
    }
}
