//! Scheduler Metrics
//!
//! Counters for the recoverable-error taxonomy and notable events. Kept as
//! plain integers updated on the slot path; an exporter can snapshot them
//! from outside the cell executor between slots.

use crate::SchedError;

/// Stable error kinds, in counter order
const ERROR_KINDS: [&str; 11] = [
    "no-space-pdcch",
    "no-space-pucch",
    "no-space-pusch",
    "no-mcs-feasible",
    "grid-collision",
    "unknown-ue",
    "inactive-carrier",
    "ss-bwp-mismatch",
    "rb-limit-violation",
    "dci-format-mismatch-retx",
    "event-overflow",
];

/// Per-cell scheduler counters
#[derive(Debug, Default, Clone)]
pub struct SchedMetrics {
    errors: [u64; ERROR_KINDS.len()],
    rlf_indications: u64,
    /// Slots whose handler exceeded the real-time budget
    pub rt_violations: u64,
    /// Total slots processed
    pub slots_processed: u64,
}

impl SchedMetrics {
    /// Increment the counter of an error kind
    pub fn count_error(&mut self, err: &SchedError) {
        let kind = err.kind();
        if let Some(pos) = ERROR_KINDS.iter().position(|k| *k == kind) {
            self.errors[pos] += 1;
        }
    }

    /// Read the counter of an error kind by its stable name
    pub fn error_count(&self, kind: &str) -> u64 {
        ERROR_KINDS
            .iter()
            .position(|k| *k == kind)
            .map(|pos| self.errors[pos])
            .unwrap_or(0)
    }

    /// Record a radio-link-failure indication
    pub fn count_rlf(&mut self) {
        self.rlf_indications += 1;
    }

    /// Number of RLF indications raised
    pub fn rlf_count(&self) -> u64 {
        self.rlf_indications
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UeIndex;

    #[test]
    fn test_counters_by_stable_name() {
        let mut m = SchedMetrics::default();
        m.count_error(&SchedError::NoSpacePdcch);
        m.count_error(&SchedError::NoSpacePdcch);
        m.count_error(&SchedError::UnknownUe(UeIndex(3)));
        assert_eq!(m.error_count("no-space-pdcch"), 2);
        assert_eq!(m.error_count("unknown-ue"), 1);
        assert_eq!(m.error_count("grid-collision"), 0);
    }
}
