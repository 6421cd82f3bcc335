//! The kern collider: slice-based horizontal gap measurement along a
//! cluster, used by the final avoidance phase to move kernable slots.

use crate::shift::slot_boxes;
use core_slot::{Segment, SlotIx};
use core_types::{Dir, Position, Rect};

/// Measures how close following material approaches the leading edge of a
/// kernable slot, in horizontal slices of roughly margin height. The
/// resolved shift moves the slot so the tightest slice is left exactly one
/// margin of clearance.
#[derive(Debug, Default)]
pub struct KernCollider {
    target: Option<SlotIx>,
    margin: f32,
    limit: Rect,
    ymin: f32,
    slice_h: f32,
    /// Per-slice leading edge of the target (x of its right face).
    edges: Vec<f32>,
    /// Per-slice smallest gap to merged neighbors.
    gaps: Vec<f32>,
}

impl KernCollider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin measurement for `slot` at its current trial position.
    /// `curr_kern` carries kerning already granted to preceding clusters
    /// but not yet folded into slot positions.
    pub fn init_slot(
        &mut self,
        seg: &Segment,
        slot: SlotIx,
        limit: Rect,
        margin: f32,
        shift: Position,
        curr_kern: f32,
    ) {
        self.target = Some(slot);
        self.margin = margin;
        self.limit = limit;
        let at = shift + Position::new(curr_kern, 0.0);
        let boxes = slot_boxes(seg, slot, at);
        let ymin = boxes.iter().map(|b| b.bl.y).fold(f32::MAX, f32::min);
        let ymax = boxes.iter().map(|b| b.tr.y).fold(f32::MIN, f32::max);
        self.ymin = ymin;
        self.slice_h = if margin > 0.0 { margin } else { 1.0 };
        let n = (((ymax - ymin) / self.slice_h).ceil() as usize).max(1);
        self.edges = vec![f32::MIN; n];
        self.gaps = vec![f32::MAX; n];
        for b in &boxes {
            for (i, edge) in self.edges.iter_mut().enumerate() {
                let lo = ymin + i as f32 * self.slice_h;
                let hi = lo + self.slice_h;
                if b.bl.y < hi && b.tr.y > lo {
                    *edge = edge.max(b.tr.x);
                }
            }
        }
    }

    /// Merge one following neighbor. `curr_space` is the whitespace advance
    /// accumulated between the target and this neighbor; designed space is
    /// consumed from the measured gap rather than treated as free
    /// clearance. Returns whether the neighbor crowds inside the margin.
    pub fn merge_slot(
        &mut self,
        seg: &Segment,
        neighbor: SlotIx,
        nshift: Position,
        curr_space: f32,
    ) -> bool {
        if self.target.is_none() {
            return false;
        }
        let nb_boxes = slot_boxes(seg, neighbor, nshift);
        let mut collides = false;
        for nb in &nb_boxes {
            for i in 0..self.gaps.len() {
                let lo = self.ymin + i as f32 * self.slice_h;
                let hi = lo + self.slice_h;
                if nb.bl.y >= hi || nb.tr.y <= lo || self.edges[i] == f32::MIN {
                    continue;
                }
                let gap = nb.bl.x - self.edges[i] - curr_space;
                if gap < self.gaps[i] {
                    self.gaps[i] = gap;
                }
                if gap < self.margin {
                    collides = true;
                }
            }
        }
        collides
    }

    /// Shift that restores one margin of clearance at the tightest slice.
    /// Positive x moves with the run direction; the caller applies it to
    /// the target's collision shift.
    pub fn resolve(&self, dir: Dir) -> Position {
        let mindiff = self
            .gaps
            .iter()
            .copied()
            .filter(|g| *g != f32::MAX)
            .fold(f32::MAX, f32::min);
        if mindiff == f32::MAX || mindiff >= self.margin {
            return Position::zero();
        }
        let mut dx = mindiff - self.margin;
        if dir.is_rtl() {
            dx = -dx;
        }
        let shift = Position::new(dx, 0.0);
        if self.limit.width() != 0.0 || self.limit.height() != 0.0 {
            Position::new(
                shift.x.clamp(self.limit.bl.x, self.limit.tr.x),
                shift.y.clamp(self.limit.bl.y, self.limit.tr.y),
            )
        } else {
            shift
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_slot::{GlyphMetric, GlyphStore};
    use std::sync::Arc;

    fn fixture(advances: &[f32]) -> (Segment, Vec<SlotIx>) {
        let metric = |adv: f32| GlyphMetric {
            advance: adv,
            bbox: Rect::new(Position::zero(), Position::new(8.0, 10.0)),
            sub_boxes: Vec::new(),
        };
        let store = Arc::new(GlyphStore::new(advances.iter().map(|&a| metric(a)).collect()));
        let mut seg = Segment::new(store, Dir::LeftToRight, 0);
        for (i, _) in advances.iter().enumerate() {
            seg.append_slot(i as u16, i);
        }
        seg.position_slots();
        let slots = seg.iter().collect();
        (seg, slots)
    }

    #[test]
    fn crowded_follower_is_pushed_out_to_margin() {
        // Target box 0..8, follower at origin 10 (box 10..18): gap 2.
        let (seg, slots) = fixture(&[10.0, 10.0]);
        let mut coll = KernCollider::new();
        coll.init_slot(&seg, slots[0], Rect::default(), 5.0, Position::zero(), 0.0);
        assert!(coll.merge_slot(&seg, slots[1], Position::zero(), 0.0));
        let mv = coll.resolve(Dir::LeftToRight);
        assert_eq!(mv, Position::new(-3.0, 0.0));
    }

    #[test]
    fn whitespace_advance_is_consumed_from_the_gap() {
        // Geometric gap of 12, but 10 of it is designed whitespace.
        let (seg, slots) = fixture(&[20.0, 10.0]);
        let mut coll = KernCollider::new();
        coll.init_slot(&seg, slots[0], Rect::default(), 5.0, Position::zero(), 0.0);
        assert!(coll.merge_slot(&seg, slots[1], Position::zero(), 10.0));
        let mv = coll.resolve(Dir::LeftToRight);
        // Usable gap 2, margin 5: the slot gives back 3 units.
        assert_eq!(mv, Position::new(-3.0, 0.0));
    }

    #[test]
    fn clear_follower_requires_no_kern() {
        let (seg, slots) = fixture(&[20.0, 10.0]);
        let mut coll = KernCollider::new();
        coll.init_slot(&seg, slots[0], Rect::default(), 5.0, Position::zero(), 0.0);
        assert!(!coll.merge_slot(&seg, slots[1], Position::zero(), 0.0));
        assert_eq!(coll.resolve(Dir::LeftToRight), Position::zero());
    }
}
