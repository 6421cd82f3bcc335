//! Per-slot collision state consumed by the collision-avoidance phases.

use bitflags::bitflags;
use core_types::{Position, Rect};

bitflags! {
    /// Collision behavior and state bits.
    ///
    /// `FIX`..`KERN` are declared by the font through slot attributes;
    /// `ISCOL` and `KNOWN` are maintained by the resolver. Together the
    /// latter two form a per-slot three-state machine:
    /// unknown -> known-clean | known-colliding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CollisionFlags: u16 {
        const FIX    = 0x0001;
        const IGNORE = 0x0002;
        const START  = 0x0004;
        const END    = 0x0008;
        const KERN   = 0x0010;
        const ISCOL  = 0x0020;
        const KNOWN  = 0x0040;
    }
}

/// Mutable collision record attached to every slot of a segment.
///
/// `shift` is the transient adjustment being negotiated by the current
/// avoidance run; `offset` is the accumulated persistent adjustment. The
/// orchestrator folds shift into offset at the end of each run.
#[derive(Debug, Clone, Default)]
pub struct SlotCollision {
    flags: CollisionFlags,
    status: CollisionFlags,
    shift: Position,
    offset: Position,
    margin: f32,
    limit: Rect,
}

impl SlotCollision {
    /// Initialize from font-declared behavior bits; status starts as a copy
    /// so behavior bits remain visible through either accessor.
    pub fn init(&mut self, flags: CollisionFlags, margin: f32, limit: Rect) {
        self.flags = flags;
        self.status = flags;
        self.margin = margin;
        self.limit = limit;
        self.shift = Position::zero();
        self.offset = Position::zero();
    }

    pub fn flags(&self) -> CollisionFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: CollisionFlags) {
        self.flags = flags;
    }

    pub fn status(&self) -> CollisionFlags {
        self.status
    }

    pub fn set_status(&mut self, status: CollisionFlags) {
        self.status = status;
    }

    pub fn shift(&self) -> Position {
        self.shift
    }

    pub fn set_shift(&mut self, shift: Position) {
        self.shift = shift;
    }

    pub fn offset(&self) -> Position {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Position) {
        self.offset = offset;
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    pub fn set_margin(&mut self, margin: f32) {
        self.margin = margin;
    }

    pub fn limit(&self) -> Rect {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Rect) {
        self.limit = limit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_copies_flags_into_status() {
        let mut c = SlotCollision::default();
        c.init(
            CollisionFlags::FIX | CollisionFlags::START,
            5.0,
            Rect::default(),
        );
        assert_eq!(c.status(), c.flags());
        assert_eq!(c.margin(), 5.0);
    }

    #[test]
    fn status_tracks_resolver_bits_independently() {
        let mut c = SlotCollision::default();
        c.init(CollisionFlags::FIX, 0.0, Rect::default());
        c.set_status(c.status() | CollisionFlags::ISCOL | CollisionFlags::KNOWN);
        assert!(c.status().contains(CollisionFlags::ISCOL));
        assert!(!c.flags().contains(CollisionFlags::ISCOL));
    }
}
