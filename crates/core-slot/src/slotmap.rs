//! The bounded context window rule matching and action code operate on.

use crate::segment::Segment;
use crate::SlotIx;

/// Maximum slots one rule context can cover (left context + match).
pub const MAX_SLOTS: usize = 64;

/// An indexed window of slot handles over the segment stream.
///
/// Entry `-1` (the slot just before the window) is kept so action code can
/// look one slot left of the context without re-walking the stream. The
/// `highwater` mark and `highpassed` flag belong to the pass runner's
/// progress discipline and travel with the window.
pub struct SlotMap {
    map: [Option<SlotIx>; MAX_SLOTS + 1],
    size: usize,
    precontext: u16,
    highwater: Option<SlotIx>,
    highpassed: bool,
}

impl Default for SlotMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotMap {
    pub fn new() -> Self {
        Self {
            map: [None; MAX_SLOTS + 1],
            size: 0,
            precontext: 0,
            highwater: None,
            highpassed: false,
        }
    }

    /// Begin a new window whose first pushed slot follows `before`.
    /// `precontext` records how many of the pushed slots are left context.
    pub fn reset(&mut self, before: Option<SlotIx>, precontext: u16) {
        self.size = 0;
        self.precontext = precontext;
        self.map[0] = before;
    }

    /// Push the next slot (or the end-of-stream marker) into the window.
    /// Returns false when the window is already full.
    pub fn push_slot(&mut self, slot: Option<SlotIx>) -> bool {
        if self.size >= MAX_SLOTS {
            return false;
        }
        self.map[self.size + 1] = slot;
        self.size += 1;
        true
    }

    pub fn at(&self, i: usize) -> Option<SlotIx> {
        if i < self.size { self.map[i + 1] } else { None }
    }

    pub fn set_at(&mut self, i: usize, slot: Option<SlotIx>) {
        if i < self.size {
            self.map[i + 1] = slot;
        }
    }

    /// The slot immediately preceding the window, if any.
    pub fn before_window(&self) -> Option<SlotIx> {
        self.map[0]
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_full(&self) -> bool {
        self.size >= MAX_SLOTS
    }

    /// Window index of the cursor: the number of left-context slots.
    pub fn context(&self) -> u16 {
        self.precontext
    }

    pub fn highwater(&self) -> Option<SlotIx> {
        self.highwater
    }

    /// Advance the highwater mark. Moving it always re-arms the
    /// not-yet-passed state.
    pub fn set_highwater(&mut self, hw: Option<SlotIx>) {
        self.highwater = hw;
        self.highpassed = false;
    }

    pub fn highpassed(&self) -> bool {
        self.highpassed
    }

    pub fn set_highpassed(&mut self, hp: bool) {
        self.highpassed = hp;
    }

    /// Reclaim deleted and copied slots covered by the window. The final
    /// entry is the continuation point and is left alone.
    pub fn collect_garbage(&self, seg: &mut Segment) {
        for i in 0..self.size.saturating_sub(1) {
            if let Some(ix) = self.map[i + 1] {
                let s = seg.slot(ix);
                if s.is_deleted() || s.is_copied() {
                    seg.free_slot(ix);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_rejects_overflow() {
        let mut m = SlotMap::new();
        m.reset(None, 0);
        for i in 0..MAX_SLOTS {
            assert!(m.push_slot(Some(SlotIx::new(i))));
        }
        assert!(!m.push_slot(Some(SlotIx::new(99))));
        assert_eq!(m.size(), MAX_SLOTS);
        assert_eq!(m.at(0), Some(SlotIx::new(0)));
        assert_eq!(m.at(MAX_SLOTS), None);
    }

    #[test]
    fn reset_keeps_highwater_but_clears_window() {
        let mut m = SlotMap::new();
        m.push_slot(Some(SlotIx::new(1)));
        m.set_highwater(Some(SlotIx::new(5)));
        m.reset(Some(SlotIx::new(0)), 2);
        assert_eq!(m.size(), 0);
        assert_eq!(m.context(), 2);
        assert_eq!(m.before_window(), Some(SlotIx::new(0)));
        assert_eq!(m.highwater(), Some(SlotIx::new(5)));
    }
}
