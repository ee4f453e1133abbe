//! Common Types for 5G NR Scheduling
//!
//! Defines fundamental identifiers and radio parameters used throughout the
//! DU scheduler, following 3GPP TS 38.211/38.321 value ranges.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

/// RNTI category, derived from the value ranges of TS 38.321 Table 7.1-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RntiKind {
    /// 0x0000, never assigned
    Invalid,
    /// Random-access RNTI, derived from the PRACH occasion
    Ra,
    /// C-RNTI or TC-RNTI assigned to a connected UE
    Crnti,
    /// Paging RNTI (0xFFFE)
    Paging,
    /// System-information RNTI (0xFFFF)
    Si,
}

impl Rnti {
    /// 0x0000 is reserved and never assigned
    pub const INVALID: Self = Self(0x0000);
    /// Paging RNTI
    pub const P_RNTI: Self = Self(0xFFFE);
    /// System Information RNTI
    pub const SI_RNTI: Self = Self(0xFFFF);
    /// First C-RNTI handed out to connecting UEs
    pub const MIN_CRNTI: Self = Self(0x4601);
    /// Upper bound of the assignable C-RNTI range
    pub const MAX_CRNTI: Self = Self(0xFFEF);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Classify this RNTI by its value range
    pub fn kind(&self) -> RntiKind {
        match self.0 {
            0x0000 => RntiKind::Invalid,
            0x0001..=0x0008 => RntiKind::Ra,
            0xFFFE => RntiKind::Paging,
            0xFFFF => RntiKind::Si,
            _ => RntiKind::Crnti,
        }
    }
}

impl std::fmt::Display for Rnti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// DU-local UE index, dense and small so it can index per-UE tables directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UeIndex(pub u16);

/// Maximum number of UEs a DU instance tracks
pub const MAX_NOF_DU_UES: usize = 1024;

impl UeIndex {
    /// Sentinel for allocations not yet bound to a UE (Msg3 before Msg4)
    pub const INVALID: Self = Self(u16::MAX);

    /// Create a new UE index
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Whether the index is within the DU UE table
    pub fn is_valid(&self) -> bool {
        (self.0 as usize) < MAX_NOF_DU_UES
    }
}

impl std::fmt::Display for UeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DU-local cell index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellIndex(pub u8);

/// Maximum number of cells a DU instance serves
pub const MAX_NOF_DU_CELLS: usize = 16;

/// Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub u16);

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology index mu as in TS 38.211 Table 4.3.2-1
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Number of slots per 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        10 << self.numerology()
    }

    /// Number of slots per 1 ms subframe
    pub fn slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    /// Slot duration in microseconds
    pub fn slot_duration_us(&self) -> u32 {
        1000 >> self.numerology()
    }
}

/// Bandwidth values in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    /// 5 MHz
    Bw5,
    /// 10 MHz
    Bw10,
    /// 15 MHz
    Bw15,
    /// 20 MHz
    Bw20,
    /// 25 MHz
    Bw25,
    /// 30 MHz
    Bw30,
    /// 40 MHz
    Bw40,
    /// 50 MHz
    Bw50,
    /// 60 MHz
    Bw60,
    /// 80 MHz
    Bw80,
    /// 100 MHz
    Bw100,
}

impl Bandwidth {
    /// Get bandwidth in Hz
    pub fn as_hz(&self) -> u32 {
        match self {
            Bandwidth::Bw5 => 5_000_000,
            Bandwidth::Bw10 => 10_000_000,
            Bandwidth::Bw15 => 15_000_000,
            Bandwidth::Bw20 => 20_000_000,
            Bandwidth::Bw25 => 25_000_000,
            Bandwidth::Bw30 => 30_000_000,
            Bandwidth::Bw40 => 40_000_000,
            Bandwidth::Bw50 => 50_000_000,
            Bandwidth::Bw60 => 60_000_000,
            Bandwidth::Bw80 => 80_000_000,
            Bandwidth::Bw100 => 100_000_000,
        }
    }

    /// Transmission bandwidth in resource blocks, 3GPP TS 38.104 Table 5.3.2-1
    pub fn nof_rbs(&self, scs: SubcarrierSpacing) -> Option<u16> {
        let n = match (self, scs) {
            (Bandwidth::Bw5, SubcarrierSpacing::Scs15) => 25,
            (Bandwidth::Bw5, SubcarrierSpacing::Scs30) => 11,
            (Bandwidth::Bw10, SubcarrierSpacing::Scs15) => 52,
            (Bandwidth::Bw10, SubcarrierSpacing::Scs30) => 24,
            (Bandwidth::Bw10, SubcarrierSpacing::Scs60) => 11,
            (Bandwidth::Bw15, SubcarrierSpacing::Scs15) => 79,
            (Bandwidth::Bw15, SubcarrierSpacing::Scs30) => 38,
            (Bandwidth::Bw15, SubcarrierSpacing::Scs60) => 18,
            (Bandwidth::Bw20, SubcarrierSpacing::Scs15) => 106,
            (Bandwidth::Bw20, SubcarrierSpacing::Scs30) => 51,
            (Bandwidth::Bw20, SubcarrierSpacing::Scs60) => 24,
            (Bandwidth::Bw25, SubcarrierSpacing::Scs15) => 133,
            (Bandwidth::Bw25, SubcarrierSpacing::Scs30) => 65,
            (Bandwidth::Bw25, SubcarrierSpacing::Scs60) => 31,
            (Bandwidth::Bw30, SubcarrierSpacing::Scs15) => 160,
            (Bandwidth::Bw30, SubcarrierSpacing::Scs30) => 78,
            (Bandwidth::Bw30, SubcarrierSpacing::Scs60) => 38,
            (Bandwidth::Bw40, SubcarrierSpacing::Scs15) => 216,
            (Bandwidth::Bw40, SubcarrierSpacing::Scs30) => 106,
            (Bandwidth::Bw40, SubcarrierSpacing::Scs60) => 51,
            (Bandwidth::Bw50, SubcarrierSpacing::Scs15) => 270,
            (Bandwidth::Bw50, SubcarrierSpacing::Scs30) => 133,
            (Bandwidth::Bw50, SubcarrierSpacing::Scs60) => 65,
            (Bandwidth::Bw60, SubcarrierSpacing::Scs30) => 162,
            (Bandwidth::Bw60, SubcarrierSpacing::Scs60) => 79,
            (Bandwidth::Bw80, SubcarrierSpacing::Scs30) => 217,
            (Bandwidth::Bw80, SubcarrierSpacing::Scs60) => 107,
            (Bandwidth::Bw100, SubcarrierSpacing::Scs30) => 273,
            (Bandwidth::Bw100, SubcarrierSpacing::Scs60) => 135,
            _ => return None,
        };
        Some(n)
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplexMode {
    /// Frequency Division Duplex
    Fdd,
    /// Time Division Duplex
    Tdd,
}

/// PDCCH CCE aggregation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationLevel {
    /// 1 CCE
    L1,
    /// 2 CCEs
    L2,
    /// 4 CCEs
    L4,
    /// 8 CCEs
    L8,
    /// 16 CCEs
    L16,
}

impl AggregationLevel {
    /// Number of CCEs the level occupies
    pub fn nof_cces(&self) -> u8 {
        match self {
            AggregationLevel::L1 => 1,
            AggregationLevel::L2 => 2,
            AggregationLevel::L4 => 4,
            AggregationLevel::L8 => 8,
            AggregationLevel::L16 => 16,
        }
    }
}

/// HARQ process identifier, 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HarqId(pub u8);

/// Largest number of HARQ processes a UE may be configured with
pub const MAX_NOF_HARQS: usize = 16;

/// Permitted HARQ process counts, TS 38.331 nrofHARQ-ProcessesForPDSCH
pub const VALID_NOF_HARQS: [u8; 7] = [2, 4, 6, 8, 10, 12, 16];

/// Logical channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LcId(pub u8);

impl LcId {
    /// SRB0 (CCCH)
    pub const SRB0: Self = Self(0);
    /// SRB1
    pub const SRB1: Self = Self(1);
    /// SRB2
    pub const SRB2: Self = Self(2);
    /// First DRB LCID
    pub const MIN_DRB: Self = Self(4);
    /// Last valid LCID for SDUs
    pub const MAX: Self = Self(32);
}

/// Logical channel group identifier carried in BSRs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LcgId(pub u8);

/// Number of logical channel groups
pub const MAX_NOF_LCGS: usize = 8;

/// SearchSpace identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchSpaceId(pub u8);

impl SearchSpaceId {
    /// SearchSpace#0, Type-0 CSS for SIB1
    pub const SS0: Self = Self(0);
    /// SearchSpace#1, Type-1 CSS for RA
    pub const SS1: Self = Self(1);
    /// SearchSpace#2, first UE-dedicated search space
    pub const SS2: Self = Self(2);
}

/// CORESET identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoresetId(pub u8);

impl CoresetId {
    /// CORESET#0, configured by the MIB
    pub const C0: Self = Self(0);
}

/// Bandwidth part identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BwpId(pub u8);

impl BwpId {
    /// The initial BWP
    pub const INITIAL: Self = Self(0);
}

/// Half-open range of resource blocks `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RbRange {
    /// First RB of the range
    pub start: u16,
    /// One past the last RB of the range
    pub stop: u16,
}

impl RbRange {
    /// Create a new range; `start` must not exceed `stop`
    pub fn new(start: u16, stop: u16) -> Self {
        debug_assert!(start <= stop, "invalid RB range [{}, {})", start, stop);
        Self { start, stop }
    }

    /// Number of RBs in the range
    pub fn len(&self) -> u16 {
        self.stop - self.start
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    /// Whether `other` is fully contained in `self`
    pub fn contains(&self, other: RbRange) -> bool {
        self.start <= other.start && other.stop <= self.stop
    }

    /// Whether the two ranges overlap
    pub fn overlaps(&self, other: RbRange) -> bool {
        self.start < other.stop && other.start < self.stop
    }
}

impl std::fmt::Display for RbRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// Half-open range of OFDM symbols `[start, stop)` within a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SymbolRange {
    /// First symbol of the range
    pub start: u8,
    /// One past the last symbol of the range
    pub stop: u8,
}

/// OFDM symbols per slot with normal cyclic prefix
pub const NOF_SYMBOLS_PER_SLOT: u8 = 14;

impl SymbolRange {
    /// Create a new range; bounds are checked against the slot length
    pub fn new(start: u8, stop: u8) -> Self {
        debug_assert!(start <= stop && stop <= NOF_SYMBOLS_PER_SLOT);
        Self { start, stop }
    }

    /// Number of symbols in the range
    pub fn len(&self) -> u8 {
        self.stop - self.start
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    /// Whether the two ranges overlap
    pub fn overlaps(&self, other: SymbolRange) -> bool {
        self.start < other.stop && other.start < self.stop
    }
}

impl std::fmt::Display for SymbolRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rnti_kinds() {
        assert_eq!(Rnti::INVALID.kind(), RntiKind::Invalid);
        assert_eq!(Rnti::new(0x0003).kind(), RntiKind::Ra);
        assert_eq!(Rnti::P_RNTI.kind(), RntiKind::Paging);
        assert_eq!(Rnti::SI_RNTI.kind(), RntiKind::Si);
        assert_eq!(Rnti::MIN_CRNTI.kind(), RntiKind::Crnti);
    }

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_scs_timing() {
        assert_eq!(SubcarrierSpacing::Scs15.slots_per_frame(), 10);
        assert_eq!(SubcarrierSpacing::Scs30.slots_per_frame(), 20);
        assert_eq!(SubcarrierSpacing::Scs30.slot_duration_us(), 500);
        assert_eq!(SubcarrierSpacing::Scs120.numerology(), 3);
    }

    #[test]
    fn test_bandwidth_rbs() {
        assert_eq!(Bandwidth::Bw20.nof_rbs(SubcarrierSpacing::Scs15), Some(106));
        assert_eq!(Bandwidth::Bw100.nof_rbs(SubcarrierSpacing::Scs30), Some(273));
        assert_eq!(Bandwidth::Bw100.nof_rbs(SubcarrierSpacing::Scs15), None);
    }

    #[test]
    fn test_rb_range_ops() {
        let a = RbRange::new(0, 10);
        let b = RbRange::new(5, 12);
        let c = RbRange::new(10, 20);
        assert!(a.overlaps(b));
        assert!(!a.overlaps(c));
        assert!(RbRange::new(0, 20).contains(b));
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn test_aggregation_levels() {
        assert_eq!(AggregationLevel::L4.nof_cces(), 4);
        assert_eq!(AggregationLevel::L16.nof_cces(), 16);
    }
}
