//! Scheduler Facade
//!
//! The external surface of the DU scheduler: configuration-plane requests
//! (UE creation, reconfiguration, removal), data-plane indications (BSR,
//! buffer state, MAC CE, CRC, UCI, RACH) and the per-cell slot indication
//! that produces the scheduling result. Producers may call the indication
//! handlers from any thread; everything funnels through the event manager
//! into the cell-pinned slot context.

use std::sync::Arc;

use common::{CellIndex, SlotPoint, UeIndex};
use tracing::{error, info};

use crate::cell::CellScheduler;
use crate::config::{CellConfig, ExpertConfig, UeCellConfig, UeDedicatedConfig};
use crate::events::{
    DlBufferStateIndication, DlMacCeIndication, EventCtx, EventManager, UciIndication,
    UlBsrIndication, UlCrcIndication,
};
use crate::ra::RachIndication;
use crate::result::SlotSchedResult;
use crate::ue::{Ue, UeRepository};
use crate::{SchedError, SchedNotifier};

/// Request to create a UE in the scheduler
#[derive(Debug, Clone)]
pub struct SchedUeCreationRequest {
    /// DU-local index chosen by the DU manager
    pub ue_index: UeIndex,
    /// Assigned C-RNTI
    pub crnti: common::Rnti,
    /// Primary cell
    pub pcell_index: CellIndex,
    /// UE-dedicated configuration
    pub dedicated: UeDedicatedConfig,
}

/// Request to reconfigure an existing UE
#[derive(Debug, Clone)]
pub struct SchedUeReconfigurationRequest {
    /// Target UE
    pub ue_index: UeIndex,
    /// Primary cell (needed to resolve the dedicated config off-slot)
    pub pcell_index: CellIndex,
    /// Updated dedicated configuration
    pub dedicated: UeDedicatedConfig,
}

/// Top-level configuration of the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Policy knobs shared by every cell
    pub expert: ExpertConfig,
    /// One entry per served cell, indexed by `CellIndex`
    pub cells: Vec<CellConfig>,
}

/// The DU radio scheduler
pub struct Scheduler {
    expert: Arc<ExpertConfig>,
    cells: Vec<CellScheduler>,
    cell_cfgs: Vec<Arc<CellConfig>>,
    ues: UeRepository,
    events: EventManager,
    notifier: Box<dyn SchedNotifier>,
}

impl Scheduler {
    /// Build the scheduler for a set of cells
    pub fn new(cfg: SchedulerConfig, notifier: Box<dyn SchedNotifier>) -> Self {
        let expert = Arc::new(cfg.expert);
        let cell_cfgs: Vec<Arc<CellConfig>> = cfg.cells.into_iter().map(Arc::new).collect();
        let cells = cell_cfgs
            .iter()
            .map(|c| CellScheduler::new(c.clone(), expert.clone()))
            .collect();
        let events = EventManager::new(cell_cfgs.len());
        info!("scheduler created with {} cell(s)", cell_cfgs.len());
        Self {
            expert,
            cells,
            cell_cfgs,
            ues: UeRepository::new(),
            events,
            notifier,
        }
    }

    fn log_enqueue_err(&self, what: &str, r: Result<(), SchedError>) -> Result<(), SchedError> {
        if let Err(err) = &r {
            error!("{} dropped: {}", what, err);
        }
        r
    }

    /// Create a UE. The object is constructed here, off the slot path,
    /// and committed at the next slot indication of its primary cell.
    pub fn handle_ue_creation_request(
        &self,
        req: SchedUeCreationRequest,
    ) -> Result<(), SchedError> {
        let Some(cell_cfg) = self.cell_cfgs.get(req.pcell_index.0 as usize) else {
            error!("UE creation for unknown cell {}", req.pcell_index.0);
            return Err(SchedError::InactiveCarrier);
        };
        let cfg = UeCellConfig::new(cell_cfg.clone(), req.dedicated);
        let ue = Box::new(Ue::new(req.ue_index, req.crnti, self.expert.clone(), cfg));
        self.log_enqueue_err("UE creation", self.events.enqueue_ue_creation(ue))
    }

    /// Reconfigure a UE; resolved off-slot, applied at the slot boundary
    pub fn handle_ue_reconfiguration_request(
        &self,
        req: SchedUeReconfigurationRequest,
    ) -> Result<(), SchedError> {
        let Some(cell_cfg) = self.cell_cfgs.get(req.pcell_index.0 as usize) else {
            error!("UE reconfiguration for unknown cell {}", req.pcell_index.0);
            return Err(SchedError::InactiveCarrier);
        };
        let cfg = UeCellConfig::new(cell_cfg.clone(), req.dedicated);
        self.log_enqueue_err(
            "UE reconfiguration",
            self.events.enqueue_ue_reconfiguration(req.ue_index, cfg),
        )
    }

    /// Remove a UE once its HARQ processes drain
    pub fn handle_ue_removal_request(&self, ue_index: UeIndex) -> Result<(), SchedError> {
        self.log_enqueue_err("UE removal", self.events.enqueue_ue_removal(ue_index))
    }

    /// Uplink buffer status report
    pub fn handle_ul_bsr_indication(&self, bsr: UlBsrIndication) -> Result<(), SchedError> {
        self.log_enqueue_err("BSR", self.events.enqueue_bsr(bsr))
    }

    /// Downlink buffer occupancy update
    pub fn handle_dl_buffer_state_indication(
        &self,
        ind: DlBufferStateIndication,
    ) -> Result<(), SchedError> {
        self.log_enqueue_err("DL buffer state", self.events.enqueue_dl_buffer_state(ind))
    }

    /// Pending MAC CE
    pub fn handle_dl_mac_ce_indication(&self, ind: DlMacCeIndication) -> Result<(), SchedError> {
        self.log_enqueue_err("DL MAC CE", self.events.enqueue_dl_mac_ce(ind))
    }

    /// UL CRC outcomes from the PHY
    pub fn handle_crc_indication(&self, ind: UlCrcIndication) -> Result<(), SchedError> {
        self.log_enqueue_err("CRC indication", self.events.enqueue_crc_indication(ind))
    }

    /// Decoded UCI from the PHY
    pub fn handle_uci_indication(&self, ind: UciIndication) -> Result<(), SchedError> {
        self.log_enqueue_err("UCI indication", self.events.enqueue_uci_indication(ind))
    }

    /// Detected PRACH preambles from the PHY
    pub fn handle_rach_indication(&self, ind: RachIndication) -> Result<(), SchedError> {
        self.log_enqueue_err("RACH indication", self.events.enqueue_rach_indication(ind))
    }

    /// Process one slot of one cell and hand out the immutable result.
    /// This is the only entry point that mutates scheduler state.
    pub fn slot_indication(&mut self, slot: SlotPoint, cell_index: CellIndex) -> &SlotSchedResult {
        let cell = &mut self.cells[cell_index.0 as usize];
        cell.advance_slot(slot);

        {
            let mut ctx = EventCtx {
                ues: &mut self.ues,
                ra: &mut cell.ra,
                notifier: &mut *self.notifier,
                metrics: &mut cell.metrics,
            };
            self.events.run(slot, cell_index, &mut ctx);
        }

        cell.run_schedulers(slot, &mut self.ues);

        // Commit pending removals whose HARQs have drained.
        self.ues.slot_indication(&mut *self.notifier);

        cell.current_result()
    }

    /// Read access to a cell's counters
    pub fn metrics(&self, cell_index: CellIndex) -> Option<&crate::metrics::SchedMetrics> {
        self.cells.get(cell_index.0 as usize).map(|c| &c.metrics)
    }

    /// Number of live UEs
    pub fn nof_ues(&self) -> usize {
        self.ues.len()
    }
}
