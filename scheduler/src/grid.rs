//! Slot Resource Grids
//!
//! A per-slot, per-direction bitmap over (OFDM symbol x resource block)
//! plus the ring of upcoming slot grids the allocators write into. The
//! bitmap enforces the single-writer invariant: filling an already-set
//! cell is a programming error, not a runtime condition.

use bitvec::prelude::*;

use common::{RbRange, SlotPoint, SubcarrierSpacing, SymbolRange, NOF_SYMBOLS_PER_SLOT};

use crate::result::SlotSchedResult;

/// Number of slot grids the cell allocator keeps ahead of "now".
/// Must cover max(k0, k2, k1 + k0) plus RAR/Msg3 look-ahead.
pub const RING_ALLOCATOR_SIZE: usize = 40;

/// Occupancy bitmap over the (symbol, RB) plane of one slot and direction
#[derive(Debug, Clone)]
pub struct RbSymbolBitmap {
    nof_rbs: u16,
    bits: BitVec<u64, Lsb0>,
}

impl RbSymbolBitmap {
    /// Create an all-free bitmap for a carrier width
    pub fn new(nof_rbs: u16) -> Self {
        Self {
            nof_rbs,
            bits: bitvec![u64, Lsb0; 0; nof_rbs as usize * NOF_SYMBOLS_PER_SLOT as usize],
        }
    }

    fn index(&self, symbol: u8, rb: u16) -> usize {
        symbol as usize * self.nof_rbs as usize + rb as usize
    }

    /// Carrier width in RBs
    pub fn nof_rbs(&self) -> u16 {
        self.nof_rbs
    }

    /// Whether any cell of the span is already reserved
    pub fn collides(&self, symbols: SymbolRange, rbs: RbRange) -> bool {
        debug_assert!(rbs.stop <= self.nof_rbs && symbols.stop <= NOF_SYMBOLS_PER_SLOT);
        for sym in symbols.start..symbols.stop {
            let base = self.index(sym, rbs.start);
            if self.bits[base..base + rbs.len() as usize].any() {
                return true;
            }
        }
        false
    }

    /// Reserve the span. Double reservation is a contract violation.
    pub fn fill(&mut self, symbols: SymbolRange, rbs: RbRange) {
        assert!(
            !self.collides(symbols, rbs),
            "double fill of grid cells, symbols={} rbs={}",
            symbols,
            rbs
        );
        for sym in symbols.start..symbols.stop {
            let base = self.index(sym, rbs.start);
            self.bits[base..base + rbs.len() as usize].fill(true);
        }
    }

    /// Release the span; inverse of `fill` for allocation rollback
    pub fn clear_span(&mut self, symbols: SymbolRange, rbs: RbRange) {
        for sym in symbols.start..symbols.stop {
            let base = self.index(sym, rbs.start);
            self.bits[base..base + rbs.len() as usize].fill(false);
        }
    }

    /// Drop every reservation
    pub fn reset(&mut self) {
        self.bits.fill(false);
    }

    /// Find the first run of `len` RBs inside `lims` that is free over the
    /// whole symbol range. Returns `None` when no such run exists.
    pub fn find_free_rbs(&self, symbols: SymbolRange, len: u16, lims: RbRange) -> Option<RbRange> {
        if len == 0 || lims.len() < len {
            return None;
        }
        let mut start = lims.start;
        'outer: while start + len <= lims.stop {
            let cand = RbRange::new(start, start + len);
            for sym in symbols.start..symbols.stop {
                let base = self.index(sym, cand.start);
                if let Some(pos) =
                    self.bits[base..base + len as usize].iter_ones().next()
                {
                    // Jump past the blocking RB.
                    start = cand.start + pos as u16 + 1;
                    continue 'outer;
                }
            }
            return Some(cand);
        }
        None
    }

    /// The widest free run inside `lims` over the symbol range
    pub fn largest_free_run(&self, symbols: SymbolRange, lims: RbRange) -> RbRange {
        let mut best = RbRange::new(lims.start, lims.start);
        let mut run_start: Option<u16> = None;
        for rb in lims.start..=lims.stop {
            let occupied = rb == lims.stop
                || (symbols.start..symbols.stop)
                    .any(|sym| self.bits[self.index(sym, rb)]);
            match (occupied, run_start) {
                (false, None) => run_start = Some(rb),
                (true, Some(s)) => {
                    if rb - s > best.len() {
                        best = RbRange::new(s, rb);
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        best
    }
}

/// One slot of grid state: DL and UL occupancy plus the result under
/// construction for that slot.
#[derive(Debug)]
pub struct SlotGrid {
    /// The slot this grid currently represents
    pub slot: SlotPoint,
    /// Cell numerology, fixed for the lifetime of the grid
    scs: SubcarrierSpacing,
    /// DL occupancy
    pub dl_res_grid: RbSymbolBitmap,
    /// UL occupancy
    pub ul_res_grid: RbSymbolBitmap,
    /// Scheduling outcome being assembled for this slot
    pub result: SlotSchedResult,
}

impl SlotGrid {
    fn new(slot: SlotPoint, scs: SubcarrierSpacing, nof_dl_rbs: u16, nof_ul_rbs: u16) -> Self {
        Self {
            slot,
            scs,
            dl_res_grid: RbSymbolBitmap::new(nof_dl_rbs),
            ul_res_grid: RbSymbolBitmap::new(nof_ul_rbs),
            result: SlotSchedResult::default(),
        }
    }

    /// Whether a DL span collides; `scs` must match the cell numerology
    pub fn dl_collides(&self, scs: SubcarrierSpacing, symbols: SymbolRange, rbs: RbRange) -> bool {
        debug_assert_eq!(scs, self.scs);
        self.dl_res_grid.collides(symbols, rbs)
    }

    /// Whether an UL span collides; `scs` must match the cell numerology
    pub fn ul_collides(&self, scs: SubcarrierSpacing, symbols: SymbolRange, rbs: RbRange) -> bool {
        debug_assert_eq!(scs, self.scs);
        self.ul_res_grid.collides(symbols, rbs)
    }

    fn recycle(&mut self, slot: SlotPoint) {
        self.slot = slot;
        self.dl_res_grid.reset();
        self.ul_res_grid.reset();
        self.result.clear();
    }
}

/// Circular buffer of slot grids, accessed by non-negative offset from the
/// slot currently being scheduled (offset 0 = the PDCCH slot).
#[derive(Debug)]
pub struct CellResourceAllocator {
    ring: Vec<SlotGrid>,
    last_slot: Option<SlotPoint>,
}

impl CellResourceAllocator {
    /// Build the ring for a carrier
    pub fn new(scs: SubcarrierSpacing, nof_dl_rbs: u16, nof_ul_rbs: u16) -> Self {
        let origin = SlotPoint::new(scs, 0, 0);
        let ring = (0..RING_ALLOCATOR_SIZE)
            .map(|i| SlotGrid::new(origin + i as u32, scs, nof_dl_rbs, nof_ul_rbs))
            .collect();
        Self {
            ring,
            last_slot: None,
        }
    }

    fn ring_index(&self, slot: SlotPoint) -> usize {
        slot.to_uint() as usize % RING_ALLOCATOR_SIZE
    }

    /// Advance the window to `slot`, recycling every grid that expired.
    /// The grid recycled for slot `s` is re-labelled `s + RING_SIZE`.
    pub fn slot_indication(&mut self, slot: SlotPoint) {
        match self.last_slot {
            None => {
                for i in 0..RING_ALLOCATOR_SIZE {
                    let sl = slot + i as u32;
                    let idx = self.ring_index(sl);
                    self.ring[idx].recycle(sl);
                }
            }
            Some(last) => {
                let gap = slot - last;
                assert!(gap > 0, "slot indication went backwards: {} after {}", slot, last);
                for step in 0..gap as u32 {
                    let recycled = last + step + RING_ALLOCATOR_SIZE as u32;
                    let idx = self.ring_index(recycled);
                    self.ring[idx].recycle(recycled);
                }
            }
        }
        self.last_slot = Some(slot);
    }

    /// The slot currently at offset 0
    pub fn current_slot(&self) -> SlotPoint {
        self.last_slot.expect("slot_indication never called")
    }

    /// Grid at `offset` slots ahead of now
    pub fn slot_grid(&self, offset: u32) -> &SlotGrid {
        assert!((offset as usize) < RING_ALLOCATOR_SIZE, "offset {} outside ring", offset);
        let slot = self.current_slot() + offset;
        let grid = &self.ring[self.ring_index(slot)];
        debug_assert_eq!(grid.slot, slot);
        grid
    }

    /// Mutable grid at `offset` slots ahead of now
    pub fn slot_grid_mut(&mut self, offset: u32) -> &mut SlotGrid {
        assert!((offset as usize) < RING_ALLOCATOR_SIZE, "offset {} outside ring", offset);
        let slot = self.current_slot() + offset;
        let idx = self.ring_index(slot);
        let grid = &mut self.ring[idx];
        debug_assert_eq!(grid.slot, slot);
        grid
    }

    /// Grid for an absolute slot inside the window
    pub fn grid_at(&self, slot: SlotPoint) -> Option<&SlotGrid> {
        let dist = slot - self.current_slot();
        if dist < 0 || dist as usize >= RING_ALLOCATOR_SIZE {
            return None;
        }
        Some(self.slot_grid(dist as u32))
    }

    /// Mutable grid for an absolute slot inside the window
    pub fn grid_at_mut(&mut self, slot: SlotPoint) -> Option<&mut SlotGrid> {
        let dist = slot - self.current_slot();
        if dist < 0 || dist as usize >= RING_ALLOCATOR_SIZE {
            return None;
        }
        Some(self.slot_grid_mut(dist as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_bitmap() -> RbSymbolBitmap {
        RbSymbolBitmap::new(52)
    }

    #[test]
    fn test_fill_then_collides() {
        let mut g = mk_bitmap();
        let sym = SymbolRange::new(2, 14);
        let rbs = RbRange::new(10, 20);
        assert!(!g.collides(sym, rbs));
        g.fill(sym, rbs);
        assert!(g.collides(sym, rbs));
        assert!(g.collides(SymbolRange::new(0, 3), RbRange::new(19, 25)));
        assert!(!g.collides(sym, RbRange::new(20, 30)));
        assert!(!g.collides(SymbolRange::new(0, 2), rbs));
    }

    #[test]
    #[should_panic(expected = "double fill")]
    fn test_double_fill_panics() {
        let mut g = mk_bitmap();
        let sym = SymbolRange::new(0, 14);
        g.fill(sym, RbRange::new(0, 10));
        g.fill(sym, RbRange::new(5, 6));
    }

    #[test]
    fn test_clear_span_releases() {
        let mut g = mk_bitmap();
        let sym = SymbolRange::new(0, 14);
        let rbs = RbRange::new(0, 10);
        g.fill(sym, rbs);
        g.clear_span(sym, rbs);
        assert!(!g.collides(sym, rbs));
    }

    #[test]
    fn test_find_free_rbs_skips_reserved() {
        let mut g = mk_bitmap();
        let sym = SymbolRange::new(2, 14);
        g.fill(sym, RbRange::new(0, 8));
        g.fill(sym, RbRange::new(12, 20));
        let free = g.find_free_rbs(sym, 4, RbRange::new(0, 52)).unwrap();
        assert_eq!(free, RbRange::new(8, 12));
        let free = g.find_free_rbs(sym, 30, RbRange::new(0, 52)).unwrap();
        assert_eq!(free, RbRange::new(20, 50));
        assert!(g.find_free_rbs(sym, 40, RbRange::new(0, 52)).is_none());
    }

    #[test]
    fn test_largest_free_run() {
        let mut g = mk_bitmap();
        let sym = SymbolRange::new(0, 14);
        g.fill(sym, RbRange::new(10, 12));
        let run = g.largest_free_run(sym, RbRange::new(0, 52));
        assert_eq!(run, RbRange::new(12, 52));
    }

    #[test]
    fn test_ring_advance_recycles() {
        let scs = SubcarrierSpacing::Scs15;
        let mut alloc = CellResourceAllocator::new(scs, 52, 52);
        let sl = SlotPoint::new(scs, 1, 0);
        alloc.slot_indication(sl);
        assert_eq!(alloc.current_slot(), sl);
        assert_eq!(alloc.slot_grid(0).slot, sl);
        assert_eq!(alloc.slot_grid(5).slot, sl + 5);

        // Reserve in the current slot, advance, and confirm the recycled
        // grid comes back clean when the ring wraps around to it.
        let sym = SymbolRange::new(0, 14);
        alloc.slot_grid_mut(0).dl_res_grid.fill(sym, RbRange::new(0, 10));
        for i in 1..=RING_ALLOCATOR_SIZE as u32 {
            alloc.slot_indication(sl + i);
        }
        let wrapped = alloc.grid_at(sl + RING_ALLOCATOR_SIZE as u32).unwrap();
        assert!(!wrapped.dl_res_grid.collides(sym, RbRange::new(0, 10)));
    }

    #[test]
    fn test_grid_at_outside_window() {
        let scs = SubcarrierSpacing::Scs15;
        let mut alloc = CellResourceAllocator::new(scs, 52, 52);
        let sl = SlotPoint::new(scs, 0, 0);
        alloc.slot_indication(sl);
        assert!(alloc.grid_at(sl - 1).is_none());
        assert!(alloc.grid_at(sl + RING_ALLOCATOR_SIZE as u32).is_none());
        assert!(alloc.grid_at(sl + 3).is_some());
    }
}
