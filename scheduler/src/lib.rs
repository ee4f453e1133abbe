//! 5G NR DU Radio Scheduler
//!
//! Per-slot downlink and uplink scheduling for a gNodeB distributed unit:
//! PDCCH/PDSCH/PUSCH/PUCCH allocation, HARQ management, random access and
//! system information, according to 3GPP TS 38.211/213/214/321.
//!
//! The scheduler is cell-pinned and synchronous: all state mutation for a
//! cell happens on the slot indication path, and external producers feed it
//! through lock-free bounded queues.

pub mod allocator;
pub mod cell;
pub mod config;
pub mod dci;
pub mod events;
pub mod grid;
pub mod harq;
pub mod mcs;
pub mod metrics;
pub mod pdcch;
pub mod pucch;
pub mod ra;
pub mod result;
pub mod sanity;
pub mod scheduler;
pub mod sib;
pub mod uci;
pub mod ue;
pub mod ue_sched;

use common::UeIndex;
use thiserror::Error;

pub use config::{CellConfig, ExpertConfig, UeDedicatedConfig};
pub use result::SlotSchedResult;
pub use scheduler::Scheduler;

/// Expected runtime conditions that make a scheduling operation fail.
///
/// These are bounded-resource or misbehaving-input outcomes: they are
/// logged, counted, and never propagate past the slot handler. Each kind
/// carries a stable name for observability pipelines.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    #[error("no space in PDCCH")]
    NoSpacePdcch,

    #[error("no space in PUCCH")]
    NoSpacePucch,

    #[error("no space in PUSCH")]
    NoSpacePusch,

    #[error("no MCS with code rate <= 0.95")]
    NoMcsFeasible,

    #[error("allocation collides with reserved grid")]
    GridCollision,

    #[error("unknown UE index {0}")]
    UnknownUe(UeIndex),

    #[error("UE carrier is inactive")]
    InactiveCarrier,

    #[error("SearchSpace does not belong to the active BWP")]
    SsBwpMismatch,

    #[error("RBs outside the SearchSpace CRB limits")]
    RbLimitViolation,

    #[error("DCI format changed across retransmissions")]
    DciFormatMismatchRetx,

    #[error("event queue overflow")]
    EventOverflow,
}

impl SchedError {
    /// Stable identifier used by metrics counters and log pipelines
    pub fn kind(&self) -> &'static str {
        match self {
            SchedError::NoSpacePdcch => "no-space-pdcch",
            SchedError::NoSpacePucch => "no-space-pucch",
            SchedError::NoSpacePusch => "no-space-pusch",
            SchedError::NoMcsFeasible => "no-mcs-feasible",
            SchedError::GridCollision => "grid-collision",
            SchedError::UnknownUe(_) => "unknown-ue",
            SchedError::InactiveCarrier => "inactive-carrier",
            SchedError::SsBwpMismatch => "ss-bwp-mismatch",
            SchedError::RbLimitViolation => "rb-limit-violation",
            SchedError::DciFormatMismatchRetx => "dci-format-mismatch-retx",
            SchedError::EventOverflow => "event-overflow",
        }
    }
}

/// Upstream notifications emitted by the scheduler.
///
/// The DU manager implements this to learn when configurations commit,
/// when a UE has been fully torn down, and when a radio link failure is
/// detected (repeated HARQ/CRC KOs).
pub trait SchedNotifier: Send {
    /// A UE creation or reconfiguration has been applied
    fn on_ue_config_complete(&mut self, ue_index: UeIndex);

    /// A removed UE has released all its resources; fires exactly once
    fn on_ue_delete_response(&mut self, ue_index: UeIndex);

    /// The UE crossed the consecutive-KO threshold
    fn on_rlf_detected(&mut self, ue_index: UeIndex);
}
