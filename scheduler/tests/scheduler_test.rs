//! End-to-end scheduler scenarios: a cell is brought up with its default
//! configuration, slots are run one by one, and the emitted results are
//! inspected the way the MAC would consume them.

use std::sync::{Arc, Mutex};

use common::{CellIndex, HarqId, LcId, Rnti, SlotPoint, SubcarrierSpacing, UeIndex};
use scheduler::config::{CellConfig, ExpertConfig, UeDedicatedConfig};
use scheduler::events::{
    DlBufferStateIndication, HarqAckReport, UciIndication, UciPdu, UciPduVariant, UlBsrIndication,
    UlCrcIndication, UlCrcPdu,
};
use scheduler::mcs;
use scheduler::result::{DlMsgAlloc, PucchInfo, SlotSchedResult, UlSchedInfo};
use scheduler::scheduler::{SchedUeCreationRequest, SchedulerConfig};
use scheduler::ue::BsrType;
use scheduler::{SchedNotifier, Scheduler};

#[derive(Default)]
struct NotifState {
    configured: Vec<UeIndex>,
    deleted: Vec<UeIndex>,
    rlf: Vec<UeIndex>,
}

struct SharedNotifier(Arc<Mutex<NotifState>>);

impl SchedNotifier for SharedNotifier {
    fn on_ue_config_complete(&mut self, ue: UeIndex) {
        self.0.lock().unwrap().configured.push(ue);
    }
    fn on_ue_delete_response(&mut self, ue: UeIndex) {
        self.0.lock().unwrap().deleted.push(ue);
    }
    fn on_rlf_detected(&mut self, ue: UeIndex) {
        self.0.lock().unwrap().rlf.push(ue);
    }
}

struct TestBench {
    sched: Scheduler,
    cell_cfg: CellConfig,
    slot: SlotPoint,
    state: Arc<Mutex<NotifState>>,
    last: SlotSchedResult,
    last_slot: SlotPoint,
}

impl TestBench {
    fn new() -> Self {
        Self::with_expert(ExpertConfig::default())
    }

    fn with_expert(expert: ExpertConfig) -> Self {
        let cell_cfg = CellConfig::default_fdd(CellIndex(0));
        let state = Arc::new(Mutex::new(NotifState::default()));
        let sched = Scheduler::new(
            SchedulerConfig {
                expert,
                cells: vec![cell_cfg.clone()],
            },
            Box::new(SharedNotifier(state.clone())),
        );
        let slot = SlotPoint::new(SubcarrierSpacing::Scs15, 0, 0);
        Self {
            sched,
            cell_cfg,
            slot,
            state,
            last: SlotSchedResult::default(),
            last_slot: slot,
        }
    }

    fn run_slot(&mut self) -> &SlotSchedResult {
        self.last_slot = self.slot;
        self.last = self.sched.slot_indication(self.slot, CellIndex(0)).clone();
        self.slot = self.slot + 1;
        &self.last
    }

    fn add_ue(&mut self, ue_index: UeIndex, crnti: Rnti) {
        self.sched
            .handle_ue_creation_request(SchedUeCreationRequest {
                ue_index,
                crnti,
                pcell_index: CellIndex(0),
                dedicated: UeDedicatedConfig::default_with_ss2(),
            })
            .unwrap();
        self.run_slot();
        assert!(self.state.lock().unwrap().configured.contains(&ue_index));
    }

    fn push_dl_buffer_state(&self, ue_index: UeIndex, lcid: LcId, bytes: u32) {
        self.sched
            .handle_dl_buffer_state_indication(DlBufferStateIndication { ue_index, lcid, bytes })
            .unwrap();
    }
}

fn find_ue_pdsch<'a>(rnti: Rnti, result: &'a SlotSchedResult) -> Option<&'a DlMsgAlloc> {
    result.dl.ue_grants.iter().find(|g| g.pdsch.rnti == rnti)
}

fn find_ue_pucch<'a>(rnti: Rnti, result: &'a SlotSchedResult) -> Option<&'a PucchInfo> {
    result.ul.pucchs.iter().find(|p| p.rnti == rnti)
}

fn find_ue_pusch<'a>(rnti: Rnti, result: &'a SlotSchedResult) -> Option<&'a UlSchedInfo> {
    result
        .ul
        .puschs
        .iter()
        .find(|p| p.pusch.rnti == rnti)
}

const UE: UeIndex = UeIndex(0);
const RNTI: Rnti = Rnti(0x4601);

#[test]
fn empty_scheduler_emits_only_broadcast() {
    let mut bench = TestBench::new();
    let period = bench.cell_cfg.sib1_period_slots;
    let mut sib_slots = Vec::new();
    for i in 0..=period {
        let result = bench.run_slot();
        assert!(result.dl.ue_grants.is_empty());
        assert!(result.ul.pucchs.is_empty());
        assert!(result.ul.puschs.is_empty());
        if !result.dl.sibs.is_empty() {
            sib_slots.push(i);
        }
    }
    // SIB1 appears exactly at the configured period.
    assert_eq!(sib_slots, vec![0, period]);
}

#[test]
fn single_ue_dl_burst_gets_pdsch_pdcch_and_pucch() {
    let mut bench = TestBench::new();
    bench.add_ue(UE, RNTI);
    bench.push_dl_buffer_state(UE, LcId::SRB1, 10_000_000);

    // A PDSCH for the UE appears within ten slots.
    let mut alloc: Option<(SlotPoint, u8, u32, u8, u16)> = None;
    for _ in 0..10 {
        let slot = bench.slot;
        let result = bench.run_slot();
        if let Some(g) = find_ue_pdsch(RNTI, result) {
            // Exactly one PDCCH references it, with matching assignment.
            let pdcchs: Vec<_> = result
                .dl
                .dl_pdcchs
                .iter()
                .filter(|p| p.rnti == RNTI)
                .collect();
            assert_eq!(pdcchs.len(), 1);
            // The TB respects the effective code-rate ceiling.
            let params = mcs::SchConfigParams::pdsch(g.pdsch.symbols.len());
            let rate = mcs::effective_code_rate(
                g.pdsch.tbs_bytes,
                g.pdsch.mcs,
                params.nof_re(g.pdsch.crbs.len()),
            );
            assert!(rate <= mcs::MAX_CODE_RATE);
            alloc = Some((
                slot,
                g.context.k1,
                g.pdsch.tbs_bytes,
                g.pdsch.mcs,
                g.pdsch.crbs.len(),
            ));
            break;
        }
    }
    let (pdsch_slot, k1, _, _, _) = alloc.expect("no PDSCH scheduled within 10 slots");

    // Run forward to the feedback slot: one PUCCH with HARQ bits.
    while bench.last_slot != pdsch_slot + k1 as u32 {
        bench.run_slot();
    }
    let pucchs: Vec<_> = bench
        .last
        .ul
        .pucchs
        .iter()
        .filter(|p| p.rnti == RNTI)
        .collect();
    assert_eq!(pucchs.len(), 1, "expected a single PUCCH at pdsch+k1");
    assert!(pucchs[0].harq_ack_nof_bits >= 1);
}

#[test]
fn nack_triggers_retransmission_with_frozen_params() {
    let mut bench = TestBench::new();
    bench.add_ue(UE, RNTI);
    // Small buffer: a single transport block drains it.
    bench.push_dl_buffer_state(UE, LcId::SRB1, 200);

    let mut first: Option<(SlotPoint, DlMsgAlloc)> = None;
    for _ in 0..10 {
        let slot = bench.slot;
        let result = bench.run_slot();
        if let Some(g) = find_ue_pdsch(RNTI, result) {
            first = Some((slot, g.clone()));
            break;
        }
    }
    let (pdsch_slot, first) = first.expect("no PDSCH scheduled");
    assert_eq!(first.context.nof_retxs, 0);
    assert_eq!(first.pdsch.rv, 0);

    // NACK the transmission at its feedback slot.
    bench
        .sched
        .handle_uci_indication(UciIndication {
            cell_index: CellIndex(0),
            slot_rx: pdsch_slot + first.context.k1 as u32,
            ucis: vec![UciPdu {
                ue_index: UE,
                pdu: UciPduVariant::PucchF0F1 {
                    harqs: vec![HarqAckReport::Nack],
                    sr_detected: false,
                    snr_db: Some(10.0),
                },
            }],
        })
        .unwrap();

    let mut retx: Option<DlMsgAlloc> = None;
    for _ in 0..10 {
        let result = bench.run_slot();
        if let Some(g) = find_ue_pdsch(RNTI, result) {
            retx = Some(g.clone());
            break;
        }
    }
    let retx = retx.expect("no retransmission scheduled");
    assert_eq!(retx.context.nof_retxs, 1);
    assert_eq!(retx.pdsch.harq_id, first.pdsch.harq_id);
    assert_eq!(retx.pdsch.tbs_bytes, first.pdsch.tbs_bytes);
    assert_eq!(retx.pdsch.crbs.len(), first.pdsch.crbs.len());
    assert_eq!(retx.pdsch.mcs, first.pdsch.mcs);
    // RV walks the {0, 2, 3, 1} sequence.
    assert_eq!(retx.pdsch.rv, 2);
    assert_eq!(retx.pdsch.dci_format, first.pdsch.dci_format);
    // Retransmissions do not carry fresh logical-channel data.
    assert!(retx.tb_info.is_empty());
}

#[test]
fn ue_removal_waits_for_inflight_harq() {
    let mut bench = TestBench::new();
    bench.add_ue(UE, RNTI);
    bench.push_dl_buffer_state(UE, LcId::SRB1, 200);

    let mut first: Option<(SlotPoint, u8, HarqId)> = None;
    for _ in 0..10 {
        let slot = bench.slot;
        let result = bench.run_slot();
        if let Some(g) = find_ue_pdsch(RNTI, result) {
            first = Some((slot, g.context.k1, g.pdsch.harq_id));
            break;
        }
    }
    let (pdsch_slot, k1, _harq_id) = first.expect("no PDSCH scheduled");

    // Request removal while the HARQ is waiting for its ACK.
    bench.sched.handle_ue_removal_request(UE).unwrap();

    let ack_slot = pdsch_slot + k1 as u32;
    while bench.last_slot != ack_slot {
        bench.run_slot();
        assert!(
            find_ue_pdsch(RNTI, &bench.last).is_none(),
            "UE allocated a new PDSCH while marked for removal"
        );
    }
    // The standing PUCCH reservation survives the removal request.
    assert!(
        find_ue_pucch(RNTI, &bench.last).is_some(),
        "PUCCH reservation was dropped by the removal"
    );
    assert!(bench.state.lock().unwrap().deleted.is_empty());

    // The ACK clears the process; deletion then fires exactly once.
    bench
        .sched
        .handle_uci_indication(UciIndication {
            cell_index: CellIndex(0),
            slot_rx: ack_slot,
            ucis: vec![UciPdu {
                ue_index: UE,
                pdu: UciPduVariant::PucchF0F1 {
                    harqs: vec![HarqAckReport::Ack],
                    sr_detected: false,
                    snr_db: None,
                },
            }],
        })
        .unwrap();
    for _ in 0..3 {
        let result = bench.run_slot();
        assert!(find_ue_pdsch(RNTI, result).is_none());
        assert!(find_ue_pucch(RNTI, result).is_none());
    }
    assert_eq!(bench.state.lock().unwrap().deleted, vec![UE]);
}

#[test]
fn consecutive_crc_kos_raise_rlf_once() {
    let mut bench = TestBench::with_expert(ExpertConfig {
        max_consecutive_kos: 4,
        ..ExpertConfig::default()
    });
    bench.add_ue(UE, RNTI);
    bench
        .sched
        .handle_ul_bsr_indication(UlBsrIndication {
            ue_index: UE,
            crnti: RNTI,
            cell_index: CellIndex(0),
            bsr_type: BsrType::Short,
            reported_lcgs: vec![(common::LcgId(0), 5000)],
        })
        .unwrap();

    let mut kos = 0;
    for _ in 0..40 {
        let slot = bench.last_slot;
        let fail = find_ue_pusch(RNTI, &bench.last).map(|p| (slot, p.pusch.harq_id));
        if let Some((pusch_slot, harq_id)) = fail {
            if kos < 4 {
                bench
                    .sched
                    .handle_crc_indication(UlCrcIndication {
                        cell_index: CellIndex(0),
                        slot_rx: pusch_slot,
                        crcs: vec![UlCrcPdu {
                            ue_index: UE,
                            harq_id,
                            tb_crc_success: false,
                            ul_snr_db: Some(2.0),
                        }],
                    })
                    .unwrap();
                kos += 1;
            }
        }
        bench.run_slot();
        if kos == 4 && !bench.state.lock().unwrap().rlf.is_empty() {
            break;
        }
    }
    assert_eq!(bench.state.lock().unwrap().rlf, vec![UE]);

    // A successful CRC re-arms the counter; no second RLF.
    let mut acked = false;
    for _ in 0..20 {
        let slot = bench.last_slot;
        let ok = find_ue_pusch(RNTI, &bench.last).map(|p| (slot, p.pusch.harq_id));
        if let Some((pusch_slot, harq_id)) = ok {
            bench
                .sched
                .handle_crc_indication(UlCrcIndication {
                    cell_index: CellIndex(0),
                    slot_rx: pusch_slot,
                    crcs: vec![UlCrcPdu {
                        ue_index: UE,
                        harq_id,
                        tb_crc_success: true,
                        ul_snr_db: Some(15.0),
                    }],
                })
                .unwrap();
            acked = true;
            bench.run_slot();
            break;
        }
        bench.run_slot();
    }
    assert!(acked, "no PUSCH available to acknowledge");
    assert_eq!(bench.state.lock().unwrap().rlf.len(), 1);
}

#[test]
fn pdsch_and_pdcch_share_slot_with_consistent_assignment() {
    // The driver's own consistency checks run in debug builds; this test
    // re-asserts the coupling on the emitted result from the outside.
    let mut bench = TestBench::new();
    bench.add_ue(UE, RNTI);
    bench.push_dl_buffer_state(UE, LcId::SRB1, 5000);
    let expected_symbols = bench.cell_cfg.pdsch_td_list[0].symbols;

    for _ in 0..10 {
        let result = bench.run_slot();
        if let Some(g) = find_ue_pdsch(RNTI, result) {
            let pdcch = result
                .dl
                .dl_pdcchs
                .iter()
                .find(|p| p.rnti == RNTI)
                .expect("PDSCH without a PDCCH");
            assert!(pdcch.dci.is_some(), "PDCCH emitted without a DCI payload");
            assert_eq!(g.pdsch.symbols, expected_symbols);
            return;
        }
    }
    panic!("no PDSCH scheduled");
}
