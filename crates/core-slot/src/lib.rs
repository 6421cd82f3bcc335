//! Mutable data plane of the shaping core: the slot arena, the segment that
//! owns it, per-slot collision state, glyph metrics, and the bounded context
//! window the rule machinery operates through.
//!
//! Slots form a doubly-linked stream plus an attachment forest. All links are
//! small integer handles into the segment's arena, never owning references,
//! so the cyclic shape of the graph costs nothing to mutate and deleted slots
//! can be recycled through a free list.

pub mod attr;
pub mod collision;
pub mod glyphs;
pub mod segment;
pub mod slot;
pub mod slotmap;

pub use attr::AttrCode;
pub use collision::{CollisionFlags, SlotCollision};
pub use glyphs::{GlyphMetric, GlyphStore};
pub use segment::{CharInfo, SegFlags, Segment};
pub use slot::{Slot, SlotFlags};
pub use slotmap::{MAX_SLOTS, SlotMap};

/// Handle to a slot inside its segment's arena.
///
/// A handle stays valid until the segment frees the slot; the free list may
/// then reuse it for a newly inserted slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIx(u32);

impl SlotIx {
    pub fn new(raw: usize) -> Self {
        SlotIx(raw as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}
