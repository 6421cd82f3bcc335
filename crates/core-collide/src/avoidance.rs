//! The three-phase collision-avoidance orchestrator.

use crate::kern::KernCollider;
use crate::shift::ShiftCollider;
use crate::SHIFT_SENTINEL;
use core_slot::{CollisionFlags, Segment, SlotIx};
use core_trace::{CollisionMove, CollisionPhase};
use core_types::{Dir, Position};
use tracing::debug;

/// Resolve residual collisions across every `[START, END]` cluster of the
/// segment, then fold the negotiated shifts into persistent offsets and
/// reposition. `num_loops` is the pass's permitted fixup iteration count
/// (its low three flag bits); kerning is not counted against it.
///
/// The returned flag reports whether any slot was still marked colliding;
/// it is advisory only once kerning is involved.
pub fn collision_avoidance(
    seg: &mut Segment,
    dir: Dir,
    num_loops: u8,
    mut phases: Option<&mut Vec<CollisionPhase>>,
) -> bool {
    let mut shiftcoll = ShiftCollider::new();
    let mut kerncoll = KernCollider::new();
    let mut has_collisions = false;
    let mut has_kerns = false;
    let mut moved = false;

    let mut start = seg.first();
    while start.is_some() {
        has_collisions = false;
        let mut end: Option<SlotIx> = None;

        // Phase 1: position shiftable glyphs forward, ignoring kernables.
        let mut moves = Vec::new();
        let mut s = start;
        while let Some(ix) = s {
            let c = seg.collision(ix);
            if c.status().contains(CollisionFlags::FIX)
                && !c.flags().contains(CollisionFlags::KERN)
            {
                has_collisions |= resolve_collisions(
                    seg,
                    ix,
                    start.expect("cluster start"),
                    &mut shiftcoll,
                    false,
                    &mut moved,
                    record_into(&mut phases, &mut moves),
                );
            } else if c.flags().contains(CollisionFlags::KERN) {
                has_kerns = true;
            }
            if seg.collision(ix).flags().contains(CollisionFlags::END) {
                end = seg.next_of(ix);
                break;
            }
            s = seg.next_of(ix);
        }
        push_phase(&mut phases, "1", None, moves);

        // Phase 2: iterate until happy.
        for i in 0..num_loops.saturating_sub(1) {
            if !(has_collisions || moved) {
                continue;
            }
            // Phase 2a: when glyphs still collide, clear the cluster's
            // shifts and fix only the colliding ones backward from the end.
            // Working backward breaks logjams.
            if has_collisions {
                has_collisions = false;
                moved = false;
                let mut moves = Vec::new();
                let mut s = start;
                while let Some(ix) = s {
                    if s == end {
                        break;
                    }
                    seg.collision_mut(ix).set_shift(Position::zero());
                    s = seg.next_of(ix);
                }
                let back_end = match end {
                    Some(e) => seg.prev_of(e),
                    None => seg.last(),
                };
                let mut s = back_end;
                while let Some(ix) = s {
                    if Some(ix) == start {
                        break;
                    }
                    let c = seg.collision(ix);
                    if c.status().contains(CollisionFlags::FIX)
                        && !c.flags().contains(CollisionFlags::KERN)
                        && c.status().contains(CollisionFlags::ISCOL)
                    {
                        has_collisions |= resolve_collisions(
                            seg,
                            ix,
                            back_end.expect("cluster tail"),
                            &mut shiftcoll,
                            true,
                            &mut moved,
                            record_into(&mut phases, &mut moves),
                        );
                    }
                    s = seg.prev_of(ix);
                }
                push_phase(&mut phases, "2a", Some(i), moves);
            }
            // Phase 2b: redo the forward pass for every fixable glyph.
            // Each loop re-resolves from constraints anchored at the
            // original locations, settling the cluster.
            if moved {
                moved = false;
                let mut moves = Vec::new();
                let mut s = start;
                while let Some(ix) = s {
                    if s == end {
                        break;
                    }
                    let c = seg.collision(ix);
                    if c.status().contains(CollisionFlags::FIX)
                        && !c.flags().contains(CollisionFlags::KERN)
                    {
                        has_collisions |= resolve_collisions(
                            seg,
                            ix,
                            start.expect("cluster start"),
                            &mut shiftcoll,
                            false,
                            &mut moved,
                            record_into(&mut phases, &mut moves),
                        );
                    }
                    s = seg.next_of(ix);
                }
                push_phase(&mut phases, "2b", Some(i), moves);
            }
        }

        // Advance to the next cluster start.
        start = None;
        let mut s = end;
        while let Some(ix) = s {
            if seg.collision(ix).flags().contains(CollisionFlags::START) {
                start = Some(ix);
                break;
            }
            s = seg.next_of(ix);
        }
    }

    // Phase 3: kerning across clusters.
    if has_kerns {
        let mut moves = Vec::new();
        let mut curr_kern = 0.0f32;
        let mut cluster = seg.first();
        let mut s = seg.first();
        while let Some(ix) = s {
            let c = seg.collision(ix);
            if cluster.is_some()
                && c.flags().contains(CollisionFlags::KERN)
                && c.status().contains(CollisionFlags::FIX)
            {
                curr_kern = resolve_kern(
                    seg,
                    ix,
                    &mut kerncoll,
                    dir,
                    curr_kern,
                    record_into(&mut phases, &mut moves),
                );
            }
            let c = seg.collision(ix);
            if c.flags().contains(CollisionFlags::END) {
                cluster = None;
            }
            if c.flags().contains(CollisionFlags::START) {
                cluster = Some(ix);
            }
            s = seg.next_of(ix);
        }
        push_phase(&mut phases, "3", None, moves);
    }

    // Fold shifts into persistent offsets and re-derive origins.
    let slots: Vec<SlotIx> = seg.iter().collect();
    for ix in slots {
        let c = seg.collision_mut(ix);
        let folded = c.shift() + c.offset();
        c.set_offset(folded);
        c.set_shift(Position::zero());
    }
    seg.position_slots();

    debug!(target: "collide", has_collisions, has_kerns, "avoidance done");
    has_collisions
}

/// Fix collisions for one slot against its cluster neighbors. Returns true
/// when the slot is still colliding afterwards. `is_rev` marks the
/// backward phase, which relaxes the kern-neighbor exclusion.
fn resolve_collisions(
    seg: &mut Segment,
    slot: SlotIx,
    from: SlotIx,
    coll: &mut ShiftCollider,
    is_rev: bool,
    moved: &mut bool,
    mut moves: Option<&mut Vec<CollisionMove>>,
) -> bool {
    let cslot = seg.collision(slot);
    coll.init_slot(seg, slot, cslot.limit(), cslot.margin(), cslot.shift());
    let mut collides = false;
    // Kernable glyphs preceding the target stay out of the constraint set.
    let mut ignore_for_kern = !is_rev;

    let mut s = Some(from);
    while let Some(ix) = s {
        let c = seg.collision(ix);
        if ix != slot {
            let kern_excluded = ignore_for_kern && c.flags().contains(CollisionFlags::KERN);
            let rev_excluded = is_rev
                && ignore_for_kern
                && c.status().contains(CollisionFlags::FIX)
                && !c.flags().contains(CollisionFlags::KERN);
            if !c.status().contains(CollisionFlags::IGNORE) && !kern_excluded && !rev_excluded {
                collides |= coll.merge_slot(seg, ix, c.shift());
            }
        } else {
            ignore_for_kern = !ignore_for_kern;
        }
        let boundary = if is_rev {
            CollisionFlags::START
        } else {
            CollisionFlags::END
        };
        if ix != from && seg.collision(ix).flags().contains(boundary) {
            break;
        }
        s = if is_rev { seg.prev_of(ix) } else { seg.next_of(ix) };
    }

    let curr = seg.collision(slot).shift();
    let mut is_col = false;
    if collides || curr.x != 0.0 || curr.y != 0.0 {
        let (shift, still) = coll.resolve();
        is_col = still;
        if shift.x.abs() < SHIFT_SENTINEL && shift.y.abs() < SHIFT_SENTINEL {
            if shift.x != curr.x || shift.y != curr.y {
                *moved = true;
                if let Some(out) = moves.as_deref_mut() {
                    out.push(CollisionMove {
                        slot: seg.slot_index(slot),
                        x: shift.x,
                        y: shift.y,
                    });
                }
            }
            seg.collision_mut(slot).set_shift(shift);
        }
    }

    let c = seg.collision_mut(slot);
    if is_col {
        c.set_status(c.status() | CollisionFlags::ISCOL | CollisionFlags::KNOWN);
    } else {
        c.set_status((c.status() - CollisionFlags::ISCOL) | CollisionFlags::KNOWN);
    }
    is_col
}

/// Kern one slot forward through its cluster, accumulating whitespace
/// advances; returns the x shift granted (fed to the next kern slot).
fn resolve_kern(
    seg: &mut Segment,
    slot: SlotIx,
    coll: &mut KernCollider,
    dir: Dir,
    curr_kern: f32,
    mut moves: Option<&mut Vec<CollisionMove>>,
) -> f32 {
    let cslot = seg.collision(slot);
    let mut seen_end = cslot.flags().contains(CollisionFlags::END);
    coll.init_slot(
        seg,
        slot,
        cslot.limit(),
        cslot.margin(),
        cslot.shift(),
        curr_kern,
    );

    let mut collides = false;
    let mut curr_space = 0.0f32;
    let mut s = seg.next_of(slot);
    while let Some(ix) = s {
        let c = seg.collision(ix);
        let bb = seg.glyphs().bbox(seg.slot(ix).gid());
        if bb.bl.y == 0.0 && bb.tr.y == 0.0 {
            curr_space += seg.slot(ix).advance().x;
        } else if !c.status().contains(CollisionFlags::IGNORE) && !seg.is_child_of(ix, slot) {
            collides |= coll.merge_slot(seg, ix, c.shift(), curr_space);
        }
        if c.flags().contains(CollisionFlags::END) {
            if seen_end {
                break;
            }
            seen_end = true;
        }
        s = seg.next_of(ix);
    }

    if collides {
        let mv = coll.resolve(dir);
        seg.collision_mut(slot).set_shift(mv);
        if let Some(out) = moves.as_deref_mut() {
            out.push(CollisionMove {
                slot: seg.slot_index(slot),
                x: mv.x,
                y: mv.y,
            });
        }
        mv.x
    } else {
        0.0
    }
}

fn push_phase(
    phases: &mut Option<&mut Vec<CollisionPhase>>,
    phase: &'static str,
    iteration: Option<u8>,
    moves: Vec<CollisionMove>,
) {
    if let Some(out) = phases.as_deref_mut() {
        out.push(CollisionPhase {
            phase,
            iteration,
            moves,
        });
    }
}

/// Borrow the per-phase move list only when a trace consumer exists, so
/// the untraced path does no bookkeeping.
fn record_into<'a>(
    phases: &mut Option<&mut Vec<CollisionPhase>>,
    moves: &'a mut Vec<CollisionMove>,
) -> Option<&'a mut Vec<CollisionMove>> {
    phases.as_ref().map(|_| moves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_slot::{GlyphMetric, GlyphStore};
    use core_types::Rect;
    use std::sync::Arc;

    fn diacritic_store() -> Arc<GlyphStore> {
        let metric = GlyphMetric {
            advance: 0.0,
            bbox: Rect::new(Position::zero(), Position::new(8.0, 10.0)),
            sub_boxes: Vec::new(),
        };
        Arc::new(GlyphStore::new(vec![metric.clone(), metric]))
    }

    fn stacked_diacritics() -> Segment {
        let mut seg = Segment::new(diacritic_store(), Dir::LeftToRight, 0);
        let a = seg.append_slot(0, 0);
        let b = seg.append_slot(1, 0);
        seg.position_slots();
        seg.collision_mut(a).init(
            CollisionFlags::FIX | CollisionFlags::START,
            0.0,
            Rect::default(),
        );
        seg.collision_mut(b).init(
            CollisionFlags::FIX | CollisionFlags::END,
            0.0,
            Rect::default(),
        );
        seg
    }

    #[test]
    fn three_phase_run_separates_stacked_diacritics() {
        let mut seg = stacked_diacritics();
        let mut phases = Vec::new();
        let still = collision_avoidance(&mut seg, Dir::LeftToRight, 2, Some(&mut phases));
        assert!(!still);

        let slots: Vec<SlotIx> = seg.iter().collect();
        // Exactly one slot moved, by one box width.
        let offsets: Vec<Position> = slots
            .iter()
            .map(|&ix| seg.collision(ix).offset())
            .collect();
        let moved: Vec<&Position> = offsets.iter().filter(|o| o.x != 0.0).collect();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].x.abs(), 8.0);
        // Shifts folded away, collision state settled.
        for &ix in &slots {
            let c = seg.collision(ix);
            assert_eq!(c.shift(), Position::zero());
            assert!(c.status().contains(CollisionFlags::KNOWN));
            assert!(!c.status().contains(CollisionFlags::ISCOL));
        }
        // Phase 1 recorded the move; phase 2a had nothing left to do.
        assert_eq!(phases[0].phase, "1");
        assert_eq!(phases[0].moves.len(), 1);
        assert!(phases
            .iter()
            .filter(|p| p.phase == "2a")
            .all(|p| p.moves.is_empty()));
        // Origins no longer coincide.
        let x0 = seg.slot(slots[0]).origin().x;
        let x1 = seg.slot(slots[1]).origin().x;
        assert_ne!(x0, x1);
    }

    #[test]
    fn untraced_run_produces_identical_geometry() {
        let mut a = stacked_diacritics();
        let mut b = stacked_diacritics();
        let mut phases = Vec::new();
        collision_avoidance(&mut a, Dir::LeftToRight, 2, Some(&mut phases));
        collision_avoidance(&mut b, Dir::LeftToRight, 2, None);
        let pa: Vec<f32> = a.iter().map(|ix| a.slot(ix).origin().x).collect();
        let pb: Vec<f32> = b.iter().map(|ix| b.slot(ix).origin().x).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn ignored_slots_are_skipped() {
        let mut seg = stacked_diacritics();
        let slots: Vec<SlotIx> = seg.iter().collect();
        // The second slot is neither fixable nor mergeable.
        let c = seg.collision_mut(slots[1]);
        c.init(CollisionFlags::END, 0.0, Rect::default());
        c.set_status(c.status() | CollisionFlags::IGNORE);
        collision_avoidance(&mut seg, Dir::LeftToRight, 2, None);
        // Nothing merged against the ignored neighbor, so nothing moved.
        for &ix in &slots {
            assert_eq!(seg.collision(ix).offset(), Position::zero());
        }
    }

    #[test]
    fn kern_phase_applies_x_shift() {
        let metric_inked = GlyphMetric {
            advance: 10.0,
            bbox: Rect::new(Position::zero(), Position::new(8.0, 10.0)),
            sub_boxes: Vec::new(),
        };
        let store = Arc::new(GlyphStore::new(vec![metric_inked.clone(), metric_inked]));
        let mut seg = Segment::new(store, Dir::LeftToRight, 0);
        let a = seg.append_slot(0, 0);
        let b = seg.append_slot(1, 1);
        seg.position_slots();
        seg.collision_mut(a).init(
            CollisionFlags::FIX | CollisionFlags::KERN | CollisionFlags::START,
            5.0,
            Rect::default(),
        );
        seg.collision_mut(b)
            .init(CollisionFlags::END, 0.0, Rect::default());
        collision_avoidance(&mut seg, Dir::LeftToRight, 1, None);
        // Gap was 2 against a margin of 5: the kern slot yields 3.
        assert_eq!(seg.collision(a).offset(), Position::new(-3.0, 0.0));
        assert_eq!(seg.collision(b).offset(), Position::zero());
    }
}
