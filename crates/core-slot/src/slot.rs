//! One positioned glyph occurrence and its intrinsic state.

use crate::SlotIx;
use bitflags::bitflags;
use core_types::{GlyphId, Position};

bitflags! {
    /// Lifecycle bits. Deleted and copied slots stay in the arena (with
    /// their own links intact) until the garbage collector reclaims them at
    /// a rule boundary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlotFlags: u8 {
        const DELETED  = 0x01;
        const INSERTED = 0x02;
        const COPIED   = 0x04;
    }
}

/// Number of justification attributes carried per slot (stretch, shrink,
/// step, weight, width).
pub const NUM_JUST: usize = 5;

/// One glyph slot. Links are arena handles owned by the segment; everything
/// else is plain per-slot state addressable through the attribute codes.
#[derive(Debug, Clone)]
pub struct Slot {
    gid: GlyphId,
    /// Character index this slot originates from.
    original: usize,
    /// First and one-past-last character indices this slot covers.
    before: usize,
    after: usize,

    pub(crate) prev: Option<SlotIx>,
    pub(crate) next: Option<SlotIx>,
    pub(crate) parent: Option<SlotIx>,
    pub(crate) child: Option<SlotIx>,
    pub(crate) sibling: Option<SlotIx>,

    pub(crate) position: Position,
    pub(crate) advance: Position,
    pub(crate) shift: Position,
    /// Anchor on the parent this slot attaches at.
    pub(crate) attach_offset: Position,
    /// Anchor on this slot that meets the parent anchor.
    pub(crate) attach_with: Position,
    pub(crate) attach_level: i16,
    pub(crate) break_weight: i16,
    pub(crate) comp_ref: i16,
    pub(crate) insert_before: bool,
    pub(crate) just: [i32; NUM_JUST],
    pub(crate) user: Vec<i16>,
    flags: SlotFlags,
}

impl Slot {
    pub fn new(gid: GlyphId, char_ix: usize, num_user: usize) -> Self {
        Self {
            gid,
            original: char_ix,
            before: char_ix,
            after: char_ix,
            prev: None,
            next: None,
            parent: None,
            child: None,
            sibling: None,
            position: Position::zero(),
            advance: Position::zero(),
            shift: Position::zero(),
            attach_offset: Position::zero(),
            attach_with: Position::zero(),
            attach_level: 0,
            break_weight: 0,
            comp_ref: 0,
            insert_before: true,
            just: [0; NUM_JUST],
            user: vec![0; num_user],
            flags: SlotFlags::empty(),
        }
    }

    /// Reinitialize a recycled slot in place, keeping the allocation of the
    /// user-attribute array.
    pub fn reuse(&mut self, gid: GlyphId, char_ix: usize) {
        let num_user = self.user.len();
        self.user.iter_mut().for_each(|u| *u = 0);
        let user = std::mem::take(&mut self.user);
        *self = Slot::new(gid, char_ix, 0);
        self.user = user;
        debug_assert_eq!(self.user.len(), num_user);
    }

    pub fn gid(&self) -> GlyphId {
        self.gid
    }

    pub fn set_gid(&mut self, gid: GlyphId) {
        self.gid = gid;
    }

    pub fn original(&self) -> usize {
        self.original
    }

    pub fn set_original(&mut self, original: usize) {
        self.original = original;
    }

    pub fn before(&self) -> usize {
        self.before
    }

    pub fn after(&self) -> usize {
        self.after
    }

    pub fn set_before(&mut self, before: usize) {
        self.before = before;
    }

    pub fn set_after(&mut self, after: usize) {
        self.after = after;
    }

    pub fn next(&self) -> Option<SlotIx> {
        self.next
    }

    pub fn prev(&self) -> Option<SlotIx> {
        self.prev
    }

    pub fn attached_to(&self) -> Option<SlotIx> {
        self.parent
    }

    pub fn first_attachment(&self) -> Option<SlotIx> {
        self.child
    }

    pub fn next_sibling_attachment(&self) -> Option<SlotIx> {
        self.sibling
    }

    pub fn origin(&self) -> Position {
        self.position
    }

    pub fn advance(&self) -> Position {
        self.advance
    }

    pub fn set_advance(&mut self, advance: Position) {
        self.advance = advance;
    }

    pub fn shift(&self) -> Position {
        self.shift
    }

    pub fn is_base(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(SlotFlags::DELETED)
    }

    pub fn mark_deleted(&mut self, deleted: bool) {
        self.flags.set(SlotFlags::DELETED, deleted);
    }

    pub fn is_copied(&self) -> bool {
        self.flags.contains(SlotFlags::COPIED)
    }

    pub fn mark_copied(&mut self, copied: bool) {
        self.flags.set(SlotFlags::COPIED, copied);
    }

    pub fn is_inserted(&self) -> bool {
        self.flags.contains(SlotFlags::INSERTED)
    }

    pub fn mark_inserted(&mut self, inserted: bool) {
        self.flags.set(SlotFlags::INSERTED, inserted);
    }

    pub fn is_insert_before(&self) -> bool {
        self.insert_before
    }

    pub fn attach_offset(&self) -> Position {
        self.attach_offset
    }

    pub fn set_attach_offset(&mut self, p: Position) {
        self.attach_offset = p;
    }

    pub fn attach_with(&self) -> Position {
        self.attach_with
    }

    pub fn set_attach_with(&mut self, p: Position) {
        self.attach_with = p;
    }

    pub fn user_attrs(&self) -> &[i16] {
        &self.user
    }

    /// Bulk-restore user attributes, clamped to this slot's capacity.
    pub fn set_user_attrs(&mut self, vals: &[i16]) {
        for (dst, &src) in self.user.iter_mut().zip(vals) {
            *dst = src;
        }
    }

    /// Copy content (not links) from another slot; used by the copy action.
    pub fn copy_content_from(&mut self, other: &Slot) {
        self.gid = other.gid;
        self.original = other.original;
        self.before = other.before;
        self.after = other.after;
        self.position = other.position;
        self.advance = other.advance;
        self.shift = other.shift;
        self.attach_offset = other.attach_offset;
        self.attach_with = other.attach_with;
        self.attach_level = other.attach_level;
        self.break_weight = other.break_weight;
        self.comp_ref = other.comp_ref;
        self.insert_before = other.insert_before;
        self.just = other.just;
        self.user.clear();
        self.user.extend_from_slice(&other.user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_clears_state_but_keeps_user_capacity() {
        let mut s = Slot::new(5, 2, 8);
        s.user[3] = 7;
        s.mark_deleted(true);
        s.reuse(9, 0);
        assert_eq!(s.gid(), 9);
        assert_eq!(s.user.len(), 8);
        assert_eq!(s.user[3], 0);
        assert!(!s.is_deleted());
    }

    #[test]
    fn copy_content_preserves_links() {
        let mut a = Slot::new(1, 0, 4);
        let b = {
            let mut b = Slot::new(2, 1, 4);
            b.user[0] = 11;
            b
        };
        a.next = Some(crate::SlotIx::new(3));
        a.copy_content_from(&b);
        assert_eq!(a.gid(), 2);
        assert_eq!(a.user[0], 11);
        assert_eq!(a.next, Some(crate::SlotIx::new(3)));
    }
}
