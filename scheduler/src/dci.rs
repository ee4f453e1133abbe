//! Downlink Control Information
//!
//! DCI payload variants and builders for formats 0_0/0_1/1_0/1_1 with the
//! field widths of 3GPP TS 38.212 clause 7.3.1. Payloads are tagged
//! variants so the PHY-facing consumer can dispatch with exhaustive
//! matching instead of virtual calls.

use common::RbRange;

/// DCI format + RNTI-type combination used for DL scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlDciConfigType {
    /// Format 1_0 scrambled by TC-RNTI (Msg4 path)
    TcRntiF1_0,
    /// Format 1_0 scrambled by C-RNTI
    CRntiF1_0,
    /// Format 1_1 scrambled by C-RNTI
    CRntiF1_1,
}

/// DCI format + RNTI-type combination used for UL scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlDciConfigType {
    /// Format 0_0 scrambled by TC-RNTI (Msg3 retx path)
    TcRntiF0_0,
    /// Format 0_0 scrambled by C-RNTI
    CRntiF0_0,
    /// Format 0_1 scrambled by C-RNTI
    CRntiF0_1,
}

/// Fields of DCI format 1_0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciF1_0 {
    /// Frequency-domain resource assignment (type-1 RIV)
    pub freq_assignment: u16,
    /// Index into the PDSCH time-domain allocation list
    pub time_assignment: u8,
    /// VRB-to-PRB interleaving flag
    pub vrb_to_prb_interleaving: bool,
    /// Modulation and coding scheme
    pub mcs: u8,
    /// New-data indicator
    pub ndi: bool,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process number
    pub harq_id: u8,
    /// Downlink assignment index
    pub dai: u8,
    /// TPC command for PUCCH
    pub tpc: u8,
    /// PUCCH resource indicator
    pub pucch_resource_indicator: u8,
    /// PDSCH-to-HARQ feedback timing indicator (index into k1 list)
    pub pdsch_harq_timing: u8,
    /// Size of the frequency-assignment field, from the CORESET/BWP width
    pub freq_assignment_bits: u8,
}

/// Fields of DCI format 1_1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciF1_1 {
    /// Bandwidth part indicator
    pub bwp_indicator: u8,
    /// Frequency-domain resource assignment (type-1 RIV over the BWP)
    pub freq_assignment: u16,
    /// Index into the PDSCH time-domain allocation list
    pub time_assignment: u8,
    /// Modulation and coding scheme
    pub mcs: u8,
    /// New-data indicator
    pub ndi: bool,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process number
    pub harq_id: u8,
    /// Downlink assignment index
    pub dai: u8,
    /// TPC command for PUCCH
    pub tpc: u8,
    /// PUCCH resource indicator
    pub pucch_resource_indicator: u8,
    /// PDSCH-to-HARQ feedback timing indicator
    pub pdsch_harq_timing: u8,
    /// Size of the frequency-assignment field
    pub freq_assignment_bits: u8,
}

/// Fields of DCI format 0_0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciF0_0 {
    /// Frequency-domain resource assignment (type-1 RIV)
    pub freq_assignment: u16,
    /// Index into the PUSCH time-domain allocation list
    pub time_assignment: u8,
    /// Frequency hopping flag
    pub freq_hopping: bool,
    /// Modulation and coding scheme
    pub mcs: u8,
    /// New-data indicator
    pub ndi: bool,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process number
    pub harq_id: u8,
    /// TPC command for PUSCH
    pub tpc: u8,
    /// Size of the frequency-assignment field
    pub freq_assignment_bits: u8,
}

/// Fields of DCI format 0_1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciF0_1 {
    /// Bandwidth part indicator
    pub bwp_indicator: u8,
    /// Frequency-domain resource assignment (type-1 RIV)
    pub freq_assignment: u16,
    /// Index into the PUSCH time-domain allocation list
    pub time_assignment: u8,
    /// Modulation and coding scheme
    pub mcs: u8,
    /// New-data indicator
    pub ndi: bool,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process number
    pub harq_id: u8,
    /// First downlink assignment index, TS 38.213 Table 9.1.3-2
    pub dai: u8,
    /// TPC command for PUSCH
    pub tpc: u8,
    /// Size of the frequency-assignment field
    pub freq_assignment_bits: u8,
}

/// Downlink DCI, tagged by format and scrambling RNTI type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciDl {
    /// Format 1_0 for a TC-RNTI
    TcRntiF1_0(DciF1_0),
    /// Format 1_0 for a C-RNTI
    CRntiF1_0(DciF1_0),
    /// Format 1_1 for a C-RNTI
    CRntiF1_1(DciF1_1),
}

impl DciDl {
    /// The configuration type of this payload
    pub fn config_type(&self) -> DlDciConfigType {
        match self {
            DciDl::TcRntiF1_0(_) => DlDciConfigType::TcRntiF1_0,
            DciDl::CRntiF1_0(_) => DlDciConfigType::CRntiF1_0,
            DciDl::CRntiF1_1(_) => DlDciConfigType::CRntiF1_1,
        }
    }
}

/// Uplink DCI, tagged by format and scrambling RNTI type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciUl {
    /// Format 0_0 for a TC-RNTI
    TcRntiF0_0(DciF0_0),
    /// Format 0_0 for a C-RNTI
    CRntiF0_0(DciF0_0),
    /// Format 0_1 for a C-RNTI
    CRntiF0_1(DciF0_1),
}

impl DciUl {
    /// The configuration type of this payload
    pub fn config_type(&self) -> UlDciConfigType {
        match self {
            DciUl::TcRntiF0_0(_) => UlDciConfigType::TcRntiF0_0,
            DciUl::CRntiF0_0(_) => UlDciConfigType::CRntiF0_0,
            DciUl::CRntiF0_1(_) => UlDciConfigType::CRntiF0_1,
        }
    }
}

/// A packed DCI payload, MSB-first in the low `nof_bits` of `bits`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciPayload {
    /// The packed field values
    pub bits: u64,
    /// Payload size before CRC attachment
    pub nof_bits: u8,
}

/// MSB-first bit packer for DCI payload assembly
struct BitPacker {
    bits: u64,
    nof_bits: u8,
}

impl BitPacker {
    fn new() -> Self {
        Self { bits: 0, nof_bits: 0 }
    }

    fn push(&mut self, value: u64, width: u8) {
        debug_assert!(width == 64 || value < (1u64 << width), "field overflows {} bits", width);
        self.bits = (self.bits << width) | value;
        self.nof_bits += width;
    }

    fn finish(self) -> DciPayload {
        DciPayload {
            bits: self.bits,
            nof_bits: self.nof_bits,
        }
    }
}

/// Resource indication value for a type-1 frequency assignment,
/// TS 38.214 clause 5.1.2.2.2.
pub fn riv_from_range(nof_bwp_rbs: u16, rbs: RbRange) -> u16 {
    let n = nof_bwp_rbs as u32;
    let start = (rbs.start) as u32;
    let len = rbs.len() as u32;
    debug_assert!(len >= 1 && start + len <= n);
    if (len - 1) <= n / 2 {
        (n * (len - 1) + start) as u16
    } else {
        (n * (n - len + 1) + (n - 1 - start)) as u16
    }
}

/// Invert a type-1 RIV back into an RB range
pub fn range_from_riv(nof_bwp_rbs: u16, riv: u16) -> RbRange {
    let n = nof_bwp_rbs as u32;
    let riv = riv as u32;
    let mut len = riv / n + 1;
    let mut start = riv % n;
    if start + len > n {
        len = n - len + 2;
        start = n - 1 - start;
    }
    RbRange::new(start as u16, (start + len) as u16)
}

/// Number of bits of the type-1 frequency-assignment field for a BWP width
pub fn freq_assignment_bits(nof_bwp_rbs: u16) -> u8 {
    let combos = (nof_bwp_rbs as u32 * (nof_bwp_rbs as u32 + 1)) / 2;
    (32 - (combos - 1).leading_zeros()) as u8
}

impl DciF1_0 {
    /// Pack the fields into a payload, TS 38.212 clause 7.3.1.2.1
    pub fn payload(&self) -> DciPayload {
        let mut p = BitPacker::new();
        // DCI format identifier: 1 for a DL format.
        p.push(1, 1);
        p.push(self.freq_assignment as u64, self.freq_assignment_bits);
        p.push(self.time_assignment as u64, 4);
        p.push(self.vrb_to_prb_interleaving as u64, 1);
        p.push(self.mcs as u64, 5);
        p.push(self.ndi as u64, 1);
        p.push(self.rv as u64, 2);
        p.push(self.harq_id as u64, 4);
        p.push(self.dai as u64, 2);
        p.push(self.tpc as u64, 2);
        p.push(self.pucch_resource_indicator as u64, 3);
        p.push(self.pdsch_harq_timing as u64, 3);
        p.finish()
    }
}

impl DciF1_1 {
    /// Pack the fields into a payload, TS 38.212 clause 7.3.1.2.2
    pub fn payload(&self) -> DciPayload {
        let mut p = BitPacker::new();
        p.push(1, 1);
        p.push(self.bwp_indicator as u64, 1);
        p.push(self.freq_assignment as u64, self.freq_assignment_bits);
        p.push(self.time_assignment as u64, 4);
        p.push(self.mcs as u64, 5);
        p.push(self.ndi as u64, 1);
        p.push(self.rv as u64, 2);
        p.push(self.harq_id as u64, 4);
        p.push(self.dai as u64, 2);
        p.push(self.tpc as u64, 2);
        p.push(self.pucch_resource_indicator as u64, 3);
        p.push(self.pdsch_harq_timing as u64, 3);
        p.finish()
    }
}

impl DciF0_0 {
    /// Pack the fields into a payload, TS 38.212 clause 7.3.1.1.1
    pub fn payload(&self) -> DciPayload {
        let mut p = BitPacker::new();
        // DCI format identifier: 0 for an UL format.
        p.push(0, 1);
        p.push(self.freq_assignment as u64, self.freq_assignment_bits);
        p.push(self.time_assignment as u64, 4);
        p.push(self.freq_hopping as u64, 1);
        p.push(self.mcs as u64, 5);
        p.push(self.ndi as u64, 1);
        p.push(self.rv as u64, 2);
        p.push(self.harq_id as u64, 4);
        p.push(self.tpc as u64, 2);
        p.finish()
    }
}

impl DciF0_1 {
    /// Pack the fields into a payload, TS 38.212 clause 7.3.1.1.2
    pub fn payload(&self) -> DciPayload {
        let mut p = BitPacker::new();
        p.push(0, 1);
        p.push(self.bwp_indicator as u64, 1);
        p.push(self.freq_assignment as u64, self.freq_assignment_bits);
        p.push(self.time_assignment as u64, 4);
        p.push(self.mcs as u64, 5);
        p.push(self.ndi as u64, 1);
        p.push(self.rv as u64, 2);
        p.push(self.harq_id as u64, 4);
        p.push(self.dai as u64, 2);
        p.push(self.tpc as u64, 2);
        p.finish()
    }
}

/// Arguments shared by every DL DCI builder
#[derive(Debug, Clone, Copy)]
pub struct DlDciParams {
    /// RB width of the region the frequency assignment is computed against
    pub nof_bwp_rbs: u16,
    /// First RB of that region (CRBs are made region-relative)
    pub bwp_start_rb: u16,
    /// Allocated CRBs
    pub crbs: RbRange,
    /// Index into the PDSCH time-domain list
    pub time_assignment: u8,
    /// Index of the chosen k1 within the candidate list
    pub k1_index: u8,
    /// PUCCH resource indicator returned by the UCI allocator
    pub pucch_resource_indicator: u8,
    /// Downlink assignment index
    pub dai: u8,
    /// MCS index
    pub mcs: u8,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process id
    pub harq_id: u8,
    /// New-data indicator
    pub ndi: bool,
}

fn prb_range(params: &DlDciParams) -> RbRange {
    // The frequency assignment counts PRBs from the region start.
    RbRange::new(
        params.crbs.start - params.bwp_start_rb,
        params.crbs.stop - params.bwp_start_rb,
    )
}

/// Build a format 1_0 DCI scrambled by a TC-RNTI
pub fn build_dci_f1_0_tc_rnti(params: &DlDciParams) -> DciDl {
    let prbs = prb_range(params);
    DciDl::TcRntiF1_0(DciF1_0 {
        freq_assignment: riv_from_range(params.nof_bwp_rbs, prbs),
        time_assignment: params.time_assignment,
        vrb_to_prb_interleaving: false,
        mcs: params.mcs,
        ndi: params.ndi,
        rv: params.rv,
        harq_id: params.harq_id,
        dai: params.dai,
        tpc: 1,
        pucch_resource_indicator: params.pucch_resource_indicator,
        pdsch_harq_timing: params.k1_index,
        freq_assignment_bits: freq_assignment_bits(params.nof_bwp_rbs),
    })
}

/// Build a format 1_0 DCI scrambled by a C-RNTI
pub fn build_dci_f1_0_c_rnti(params: &DlDciParams) -> DciDl {
    match build_dci_f1_0_tc_rnti(params) {
        DciDl::TcRntiF1_0(f) => DciDl::CRntiF1_0(f),
        _ => unreachable!(),
    }
}

/// Build a format 1_1 DCI scrambled by a C-RNTI
pub fn build_dci_f1_1_c_rnti(params: &DlDciParams) -> DciDl {
    let prbs = prb_range(params);
    DciDl::CRntiF1_1(DciF1_1 {
        bwp_indicator: 0,
        freq_assignment: riv_from_range(params.nof_bwp_rbs, prbs),
        time_assignment: params.time_assignment,
        mcs: params.mcs,
        ndi: params.ndi,
        rv: params.rv,
        harq_id: params.harq_id,
        dai: params.dai,
        tpc: 1,
        pucch_resource_indicator: params.pucch_resource_indicator,
        pdsch_harq_timing: params.k1_index,
        freq_assignment_bits: freq_assignment_bits(params.nof_bwp_rbs),
    })
}

/// Arguments shared by every UL DCI builder
#[derive(Debug, Clone, Copy)]
pub struct UlDciParams {
    /// RB width of the active UL BWP
    pub nof_bwp_rbs: u16,
    /// First RB of the BWP
    pub bwp_start_rb: u16,
    /// Allocated CRBs
    pub crbs: RbRange,
    /// Index into the PUSCH time-domain list
    pub time_assignment: u8,
    /// MCS index
    pub mcs: u8,
    /// Redundancy version
    pub rv: u8,
    /// HARQ process id
    pub harq_id: u8,
    /// New-data indicator
    pub ndi: bool,
    /// First downlink assignment index (format 0_1 only)
    pub dai: u8,
}

fn ul_prb_range(params: &UlDciParams) -> RbRange {
    RbRange::new(
        params.crbs.start - params.bwp_start_rb,
        params.crbs.stop - params.bwp_start_rb,
    )
}

/// Build a format 0_0 DCI scrambled by a TC-RNTI
pub fn build_dci_f0_0_tc_rnti(params: &UlDciParams) -> DciUl {
    let prbs = ul_prb_range(params);
    DciUl::TcRntiF0_0(DciF0_0 {
        freq_assignment: riv_from_range(params.nof_bwp_rbs, prbs),
        time_assignment: params.time_assignment,
        freq_hopping: false,
        mcs: params.mcs,
        ndi: params.ndi,
        rv: params.rv,
        harq_id: params.harq_id,
        tpc: 1,
        freq_assignment_bits: freq_assignment_bits(params.nof_bwp_rbs),
    })
}

/// Build a format 0_0 DCI scrambled by a C-RNTI
pub fn build_dci_f0_0_c_rnti(params: &UlDciParams) -> DciUl {
    match build_dci_f0_0_tc_rnti(params) {
        DciUl::TcRntiF0_0(f) => DciUl::CRntiF0_0(f),
        _ => unreachable!(),
    }
}

/// Build a format 0_1 DCI scrambled by a C-RNTI
pub fn build_dci_f0_1_c_rnti(params: &UlDciParams) -> DciUl {
    let prbs = ul_prb_range(params);
    DciUl::CRntiF0_1(DciF0_1 {
        bwp_indicator: 0,
        freq_assignment: riv_from_range(params.nof_bwp_rbs, prbs),
        time_assignment: params.time_assignment,
        mcs: params.mcs,
        ndi: params.ndi,
        rv: params.rv,
        harq_id: params.harq_id,
        dai: params.dai,
        tpc: 1,
        freq_assignment_bits: freq_assignment_bits(params.nof_bwp_rbs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_riv_round_trip() {
        for (n, start, len) in [(106u16, 0u16, 106u16), (106, 10, 20), (24, 2, 22), (51, 50, 1)] {
            let rbs = RbRange::new(start, start + len);
            let riv = riv_from_range(n, rbs);
            assert_eq!(range_from_riv(n, riv), rbs, "n={} start={} len={}", n, start, len);
        }
    }

    #[test]
    fn test_freq_assignment_bits() {
        // N=106: ceil(log2(106*107/2)) = 13.
        assert_eq!(freq_assignment_bits(106), 13);
        // N=24: ceil(log2(300)) = 9.
        assert_eq!(freq_assignment_bits(24), 9);
    }

    #[test]
    fn test_f1_0_payload_size() {
        let dci = DciF1_0 {
            freq_assignment: 100,
            time_assignment: 0,
            vrb_to_prb_interleaving: false,
            mcs: 9,
            ndi: true,
            rv: 0,
            harq_id: 3,
            dai: 1,
            tpc: 1,
            pucch_resource_indicator: 2,
            pdsch_harq_timing: 0,
            freq_assignment_bits: 13,
        };
        let p = dci.payload();
        // 1 + 13 + 4 + 1 + 5 + 1 + 2 + 4 + 2 + 2 + 3 + 3 = 41 bits.
        assert_eq!(p.nof_bits, 41);
        // Leading bit identifies the DL format.
        assert_eq!(p.bits >> (p.nof_bits - 1), 1);
    }

    #[test]
    fn test_f0_0_payload_starts_with_zero() {
        let dci = DciF0_0 {
            freq_assignment: 1,
            time_assignment: 0,
            freq_hopping: false,
            mcs: 5,
            ndi: false,
            rv: 0,
            harq_id: 0,
            tpc: 1,
            freq_assignment_bits: 13,
        };
        let p = dci.payload();
        assert_eq!(p.nof_bits, 33);
        assert_eq!(p.bits >> (p.nof_bits - 1), 0);
    }

    #[test]
    fn test_builder_converts_crbs_to_prbs() {
        let params = DlDciParams {
            nof_bwp_rbs: 24,
            bwp_start_rb: 2,
            crbs: RbRange::new(2, 26),
            time_assignment: 0,
            k1_index: 0,
            pucch_resource_indicator: 0,
            dai: 0,
            mcs: 4,
            rv: 0,
            harq_id: 0,
            ndi: true,
        };
        match build_dci_f1_0_tc_rnti(&params) {
            DciDl::TcRntiF1_0(f) => {
                assert_eq!(range_from_riv(24, f.freq_assignment), RbRange::new(0, 24));
            }
            _ => panic!("wrong variant"),
        }
    }
}
