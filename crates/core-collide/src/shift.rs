//! The shift collider: accumulates non-overlap constraints against a
//! target slot and resolves them to the smallest clearing displacement.

use crate::SHIFT_SENTINEL;
use core_slot::{Segment, SlotIx};
use core_types::{Position, Rect};

/// Escape directions, in preference order for equal-magnitude candidates.
const LEFT: usize = 0;
const RIGHT: usize = 1;
const DOWN: usize = 2;
const UP: usize = 3;

/// Constraint accumulator for one target slot.
///
/// Constraints are expressed against the target's unshifted origin, so a
/// later resolve pulls the glyph no further from home than the neighbors
/// require, regardless of the shift it currently carries.
#[derive(Debug, Default)]
pub struct ShiftCollider {
    target: Option<SlotIx>,
    margin: f32,
    limit: Rect,
    curr_shift: Position,
    target_boxes: Vec<Rect>,
    /// Required clearance per direction to escape every merged neighbor.
    moves: [f32; 4],
    any_constraint: bool,
}

impl ShiftCollider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin resolution for `slot`. `shift` is the slot's current trial
    /// shift, kept only for change detection by the caller.
    pub fn init_slot(
        &mut self,
        seg: &Segment,
        slot: SlotIx,
        limit: Rect,
        margin: f32,
        shift: Position,
    ) {
        self.target = Some(slot);
        self.margin = margin;
        self.limit = limit;
        self.curr_shift = shift;
        self.moves = [0.0; 4];
        self.any_constraint = false;
        self.target_boxes = slot_boxes(seg, slot, Position::zero());
    }

    /// Merge one neighbor (at its own trial shift) into the constraint set.
    /// Returns whether the neighbor overlaps the target's unshifted boxes.
    pub fn merge_slot(&mut self, seg: &Segment, neighbor: SlotIx, nshift: Position) -> bool {
        let Some(_target) = self.target else {
            return false;
        };
        let nb_boxes = slot_boxes(seg, neighbor, nshift);
        let mut collides = false;
        for tb in &self.target_boxes {
            let guard = tb.expanded(self.margin);
            for nb in &nb_boxes {
                if !guard.overlaps(nb) {
                    continue;
                }
                collides = true;
                self.any_constraint = true;
                self.moves[LEFT] = self.moves[LEFT].max(tb.tr.x - nb.bl.x + self.margin);
                self.moves[RIGHT] = self.moves[RIGHT].max(nb.tr.x - tb.bl.x + self.margin);
                self.moves[DOWN] = self.moves[DOWN].max(tb.tr.y - nb.bl.y + self.margin);
                self.moves[UP] = self.moves[UP].max(nb.tr.y - tb.bl.y + self.margin);
            }
        }
        collides
    }

    /// Choose the smallest displacement clearing every constraint, staying
    /// inside the limit rectangle. Returns the shift and whether the slot
    /// is still colliding (no legal escape existed).
    pub fn resolve(&self) -> (Position, bool) {
        if !self.any_constraint {
            return (Position::zero(), false);
        }
        let candidates = [
            Position::new(-self.moves[LEFT], 0.0),
            Position::new(self.moves[RIGHT], 0.0),
            Position::new(0.0, -self.moves[DOWN]),
            Position::new(0.0, self.moves[UP]),
        ];
        let mut best: Option<Position> = None;
        for cand in candidates {
            if !shift_within(&self.limit, cand) {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => magnitude2(cand) < magnitude2(b),
            };
            if better {
                best = Some(cand);
            }
        }
        match best {
            Some(shift) => (shift, false),
            None => (Position::new(SHIFT_SENTINEL, SHIFT_SENTINEL), true),
        }
    }
}

/// Collision boxes of a slot at its stored origin plus `extra`: the glyph's
/// sub-boxes when the font provides them, else the outer bounding box.
pub(crate) fn slot_boxes(seg: &Segment, slot: SlotIx, extra: Position) -> Vec<Rect> {
    let gid = seg.slot(slot).gid();
    let at = seg.slot(slot).origin() + extra;
    let subs = seg.glyphs().sub_boxes(gid);
    if subs.is_empty() {
        vec![seg.glyphs().bbox(gid).shifted(at)]
    } else {
        subs.iter().map(|b| b.shifted(at)).collect()
    }
}

/// A zero limit imposes no bound on the shift.
fn shift_within(limit: &Rect, shift: Position) -> bool {
    (limit.width() == 0.0 && limit.height() == 0.0) || limit.contains(shift)
}

fn magnitude2(p: Position) -> f32 {
    p.x * p.x + p.y * p.y
}
