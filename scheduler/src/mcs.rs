//! MCS and Transport Block Size Calculation
//!
//! Link adaptation helpers: wideband-CQI and PUSCH-SNR to MCS mapping,
//! the 64QAM MCS table of TS 38.214 Table 5.1.3.1-1, and the transport
//! block size determination of TS 38.214 clause 5.1.3.2. The grant
//! allocator uses these to find the largest MCS whose effective code rate
//! stays at or below 0.95.

/// Highest usable index of the 64QAM MCS table
pub const MAX_MCS: u8 = 28;

/// Effective code rate ceiling for any scheduled transport block
pub const MAX_CODE_RATE: f32 = 0.95;

/// CRC bits attached to a transport block
const TB_CRC_BITS: u32 = 24;

/// (modulation order, target code rate x 1024), TS 38.214 Table 5.1.3.1-1
const MCS_TABLE_QAM64: [(u8, u16); 29] = [
    (2, 120),
    (2, 157),
    (2, 193),
    (2, 251),
    (2, 308),
    (2, 379),
    (2, 449),
    (2, 526),
    (2, 602),
    (2, 679),
    (4, 340),
    (4, 378),
    (4, 434),
    (4, 490),
    (4, 553),
    (4, 616),
    (4, 658),
    (6, 438),
    (6, 466),
    (6, 517),
    (6, 567),
    (6, 616),
    (6, 666),
    (6, 719),
    (6, 772),
    (6, 822),
    (6, 873),
    (6, 910),
    (6, 948),
];

/// Highest MCS a reported wideband CQI sustains (CQI table 1)
const CQI_TO_MCS: [Option<u8>; 16] = [
    None,
    Some(0),
    Some(0),
    Some(2),
    Some(4),
    Some(6),
    Some(8),
    Some(11),
    Some(13),
    Some(15),
    Some(18),
    Some(20),
    Some(22),
    Some(24),
    Some(26),
    Some(28),
];

/// Minimum PUSCH SNR in dB sustaining each UL MCS, from link-level curves
const UL_SNR_MCS_THRESHOLDS: [f64; 29] = [
    -4.0998, -3.0500, -2.1125, -1.8625, -0.0500, 0.98266, 1.6250, 2.5425, 3.4175, 4.3548, 5.3695,
    5.8250, 6.6375, 7.6375, 8.5875, 9.4000, 10.1540, 10.9070, 11.1250, 12.0625, 13.0875, 13.6375,
    14.4125, 15.5375, 16.4000, 17.1875, 17.8875, 18.8875, 20.1250,
];

/// TBS values for N_info <= 3824, TS 38.214 Table 5.1.3.2-1
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176, 184,
    192, 208, 224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480, 504, 528,
    552, 576, 608, 640, 672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064, 1128, 1160, 1192,
    1224, 1256, 1288, 1320, 1352, 1416, 1480, 1544, 1608, 1672, 1736, 1800, 1864, 1928, 2024,
    2088, 2152, 2216, 2280, 2408, 2472, 2536, 2600, 2664, 2728, 2792, 2856, 2976, 3104, 3240,
    3368, 3496, 3624, 3752, 3824,
];

/// Modulation order and target code rate of an MCS index
pub fn mcs_entry(mcs: u8) -> (u8, u16) {
    MCS_TABLE_QAM64[mcs as usize]
}

/// Highest MCS supported by a reported wideband CQI; `None` when the UE is
/// out of range (CQI 0)
pub fn map_cqi_to_mcs(cqi: u8) -> Option<u8> {
    CQI_TO_MCS.get(cqi as usize).copied().flatten()
}

/// Highest UL MCS whose SNR requirement the reported PUSCH SNR satisfies
pub fn map_snr_to_mcs_ul(snr_db: f64) -> u8 {
    let mut mcs = 0u8;
    for (i, th) in UL_SNR_MCS_THRESHOLDS.iter().enumerate() {
        if snr_db >= *th {
            mcs = i as u8;
        } else {
            break;
        }
    }
    mcs
}

/// Reference parameters of the shared-channel transmission the TBS is
/// computed against.
#[derive(Debug, Clone, Copy)]
pub struct SchConfigParams {
    /// Scheduled OFDM symbols
    pub nof_symbols: u8,
    /// DMRS resource elements per PRB over the allocation
    pub nof_dmrs_per_prb: u16,
    /// Configured overhead resource elements per PRB
    pub nof_oh_per_prb: u16,
    /// Transmission layers
    pub nof_layers: u8,
}

impl SchConfigParams {
    /// PDSCH defaults: DMRS type A, two DMRS symbols of 6 REs each
    pub fn pdsch(nof_symbols: u8) -> Self {
        Self {
            nof_symbols,
            nof_dmrs_per_prb: 12,
            nof_oh_per_prb: 0,
            nof_layers: 1,
        }
    }

    /// PUSCH defaults: one DMRS symbol of 12 REs
    pub fn pusch(nof_symbols: u8) -> Self {
        Self {
            nof_symbols,
            nof_dmrs_per_prb: 12,
            nof_oh_per_prb: 0,
            nof_layers: 1,
        }
    }

    /// Resource elements available for data in the allocation
    pub fn nof_re(&self, nof_prbs: u16) -> u32 {
        let per_prb = 12 * self.nof_symbols as u32;
        let per_prb = per_prb
            .saturating_sub(self.nof_dmrs_per_prb as u32)
            .saturating_sub(self.nof_oh_per_prb as u32);
        per_prb.min(156) * nof_prbs as u32
    }
}

/// Transport block size in bytes, TS 38.214 clause 5.1.3.2
pub fn calculate_tbs(params: &SchConfigParams, mcs: u8, nof_prbs: u16) -> u32 {
    let (qm, r1024) = mcs_entry(mcs);
    let nof_re = params.nof_re(nof_prbs);
    let n_info =
        nof_re as f64 * (r1024 as f64 / 1024.0) * qm as f64 * params.nof_layers as f64;

    let tbs_bits = if n_info <= 3824.0 {
        let n_info = n_info.max(24.0);
        let n = ((n_info.log2().floor() as u32).saturating_sub(6)).max(3);
        let quantized = ((n_info as u64 >> n) << n).max(24) as u32;
        *TBS_TABLE
            .iter()
            .find(|&&t| t >= quantized)
            .unwrap_or(&TBS_TABLE[TBS_TABLE.len() - 1])
    } else {
        let n = ((n_info - 24.0).log2().floor() as u32) - 5;
        let step = 1u64 << n;
        let quantized = (((n_info - 24.0) / step as f64).round() as u64 * step).max(3840) as u32;
        let r = r1024 as f64 / 1024.0;
        if r <= 0.25 {
            let c = (quantized + 24 + 3815) / 3816;
            8 * c * ((quantized + 24 + 8 * c - 1) / (8 * c)) - 24
        } else if quantized > 8424 {
            let c = (quantized + 24 + 8423) / 8424;
            8 * c * ((quantized + 24 + 8 * c - 1) / (8 * c)) - 24
        } else {
            8 * ((quantized + 24 + 7) / 8) - 24
        }
    };
    tbs_bits / 8
}

/// Effective code rate of a TB over an allocation
pub fn effective_code_rate(tbs_bytes: u32, mcs: u8, nof_re: u32) -> f32 {
    let (qm, _) = mcs_entry(mcs);
    if nof_re == 0 {
        return f32::INFINITY;
    }
    (tbs_bytes * 8 + TB_CRC_BITS) as f32 / (nof_re * qm as u32) as f32
}

/// MCS and TBS chosen for a transport block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McsTbs {
    /// Chosen MCS index
    pub mcs: u8,
    /// Transport block size in bytes
    pub tbs_bytes: u32,
}

/// Search the largest MCS not above `starting_mcs` whose effective code
/// rate over the allocation stays within the 0.95 ceiling. Returns `None`
/// when even MCS 0 exceeds it.
pub fn compute_mcs_tbs(params: &SchConfigParams, starting_mcs: u8, nof_prbs: u16) -> Option<McsTbs> {
    let nof_re = params.nof_re(nof_prbs);
    let mut mcs = starting_mcs.min(MAX_MCS);
    loop {
        let tbs_bytes = calculate_tbs(params, mcs, nof_prbs);
        if effective_code_rate(tbs_bytes, mcs, nof_re) <= MAX_CODE_RATE {
            return Some(McsTbs { mcs, tbs_bytes });
        }
        if mcs == 0 {
            return None;
        }
        mcs -= 1;
    }
}

/// Estimate the PRBs needed to carry `pending_bytes` at the given MCS
pub fn required_prbs(params: &SchConfigParams, mcs: u8, pending_bytes: u32, max_prbs: u16) -> u16 {
    if pending_bytes == 0 {
        return 0;
    }
    let per_prb = calculate_tbs(params, mcs, 1).max(1);
    let prbs = (pending_bytes + per_prb - 1) / per_prb;
    (prbs as u16).min(max_prbs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mcs_table_entries() {
        assert_eq!(mcs_entry(0), (2, 120));
        assert_eq!(mcs_entry(9), (2, 679));
        assert_eq!(mcs_entry(10), (4, 340));
        assert_eq!(mcs_entry(28), (6, 948));
    }

    #[test]
    fn test_cqi_mapping() {
        assert_eq!(map_cqi_to_mcs(0), None);
        assert_eq!(map_cqi_to_mcs(1), Some(0));
        assert_eq!(map_cqi_to_mcs(15), Some(28));
        assert_eq!(map_cqi_to_mcs(7), Some(11));
    }

    #[test]
    fn test_snr_mapping() {
        assert_eq!(map_snr_to_mcs_ul(-10.0), 0);
        assert_eq!(map_snr_to_mcs_ul(0.5), 4);
        assert!(map_snr_to_mcs_ul(25.0) == 28);
    }

    #[test]
    fn test_tbs_monotonic_in_prbs() {
        let p = SchConfigParams::pdsch(12);
        let mut prev = 0;
        for prbs in [1u16, 2, 5, 10, 25, 50, 100] {
            let tbs = calculate_tbs(&p, 9, prbs);
            assert!(tbs >= prev, "TBS not monotonic at {} PRBs", prbs);
            prev = tbs;
        }
    }

    #[test]
    fn test_tbs_small_allocation() {
        // 1 PRB, 12 symbols, MCS 0: N_re = 132, N_info = 132 * 2 * 120/1024
        // = 30.9 -> quantized 24 -> first table entry >= 24.
        let p = SchConfigParams::pdsch(12);
        assert_eq!(calculate_tbs(&p, 0, 1), 24 / 8);
    }

    #[test]
    fn test_tbs_large_allocation_exceeds_3824() {
        let p = SchConfigParams::pdsch(12);
        let tbs = calculate_tbs(&p, 28, 100);
        assert!(tbs * 8 > 3824);
        // The +24 CRC quantization keeps TBS byte aligned.
        assert_eq!((tbs * 8 + 24) % 8, 0);
    }

    #[test]
    fn test_compute_mcs_tbs_respects_rate_ceiling() {
        let p = SchConfigParams::pdsch(12);
        let got = compute_mcs_tbs(&p, 28, 20).unwrap();
        let rate = effective_code_rate(got.tbs_bytes, got.mcs, p.nof_re(20));
        assert!(rate <= MAX_CODE_RATE);
        assert!(got.mcs <= 28);
    }

    #[test]
    fn test_required_prbs_covers_pending() {
        let p = SchConfigParams::pdsch(12);
        let prbs = required_prbs(&p, 9, 1000, 106);
        let tbs = calculate_tbs(&p, 9, prbs);
        assert!(tbs >= 1000 || prbs == 106);
    }
}
