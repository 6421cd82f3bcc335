//! The segment: one shaping unit owning the slot arena and stream.

use crate::attr::{AttrCode, AttrRef};
use crate::collision::SlotCollision;
use crate::glyphs::GlyphStore;
use crate::slot::Slot;
use crate::slotmap::SlotMap;
use crate::SlotIx;
use bitflags::bitflags;
use core_types::{Dir, GlyphId, Position};
use std::sync::Arc;
use tracing::trace;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SegFlags: u8 {
        /// Baseline positions have been materialized for collision passes.
        const INIT_COLLISIONS = 0x01;
    }
}

/// Source-character record kept alongside the slot stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharInfo {
    pub unicode: u32,
    /// Byte/char offset in the source text this character came from.
    pub offset: usize,
    /// First slot index (in stream order) covering this character.
    pub before: usize,
    /// Last slot index covering this character.
    pub after: usize,
}

/// A contiguous run of slots being shaped. Exclusive owner of its slots;
/// the free list recycles arena entries reclaimed by garbage collection.
pub struct Segment {
    slots: Vec<Slot>,
    collisions: Vec<SlotCollision>,
    free: Vec<SlotIx>,
    first: Option<SlotIx>,
    last: Option<SlotIx>,
    charinfo: Vec<CharInfo>,
    glyphs: Arc<GlyphStore>,
    dir: Dir,
    advance: Position,
    flags: SegFlags,
    num_user: usize,
}

impl Segment {
    pub fn new(glyphs: Arc<GlyphStore>, dir: Dir, num_user: usize) -> Self {
        Self {
            slots: Vec::new(),
            collisions: Vec::new(),
            free: Vec::new(),
            first: None,
            last: None,
            charinfo: Vec::new(),
            glyphs,
            dir,
            advance: Position::zero(),
            flags: SegFlags::empty(),
            num_user,
        }
    }

    pub fn glyphs(&self) -> &GlyphStore {
        &self.glyphs
    }

    pub fn glyph_store(&self) -> Arc<GlyphStore> {
        Arc::clone(&self.glyphs)
    }

    pub fn dir(&self) -> Dir {
        self.dir
    }

    pub fn flags(&self) -> SegFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: SegFlags) {
        self.flags = flags;
    }

    pub fn advance(&self) -> Position {
        self.advance
    }

    pub fn first(&self) -> Option<SlotIx> {
        self.first
    }

    pub fn last(&self) -> Option<SlotIx> {
        self.last
    }

    pub fn slot(&self, ix: SlotIx) -> &Slot {
        &self.slots[ix.index()]
    }

    pub fn slot_mut(&mut self, ix: SlotIx) -> &mut Slot {
        &mut self.slots[ix.index()]
    }

    pub fn collision(&self, ix: SlotIx) -> &SlotCollision {
        &self.collisions[ix.index()]
    }

    pub fn collision_mut(&mut self, ix: SlotIx) -> &mut SlotCollision {
        &mut self.collisions[ix.index()]
    }

    pub fn next_of(&self, ix: SlotIx) -> Option<SlotIx> {
        self.slot(ix).next()
    }

    pub fn prev_of(&self, ix: SlotIx) -> Option<SlotIx> {
        self.slot(ix).prev()
    }

    pub fn char_info(&self, ix: usize) -> Option<&CharInfo> {
        self.charinfo.get(ix)
    }

    pub fn char_info_mut(&mut self, ix: usize) -> Option<&mut CharInfo> {
        self.charinfo.get_mut(ix)
    }

    pub fn num_chars(&self) -> usize {
        self.charinfo.len()
    }

    pub fn push_char(&mut self, unicode: u32, offset: usize) -> usize {
        let ix = self.charinfo.len();
        self.charinfo.push(CharInfo {
            unicode,
            offset,
            before: ix,
            after: ix,
        });
        ix
    }

    /// Number of live (linked) slots in the stream.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Stream-order iterator over live slot handles.
    pub fn iter(&self) -> SlotStream<'_> {
        SlotStream {
            seg: self,
            cur: self.first,
        }
    }

    /// Allocate a slot, reusing the free list when possible.
    pub fn new_slot(&mut self, gid: GlyphId, char_ix: usize) -> SlotIx {
        if let Some(ix) = self.free.pop() {
            self.slots[ix.index()].reuse(gid, char_ix);
            self.collisions[ix.index()] = SlotCollision::default();
            self.set_glyph(ix, gid);
            return ix;
        }
        let ix = SlotIx::new(self.slots.len());
        self.slots.push(Slot::new(gid, char_ix, self.num_user));
        self.collisions.push(SlotCollision::default());
        self.set_glyph(ix, gid);
        ix
    }

    /// Replace the glyph of a slot, refreshing its advance from the store.
    pub fn set_glyph(&mut self, ix: SlotIx, gid: GlyphId) {
        let adv = self.glyphs.advance(gid);
        let slot = self.slot_mut(ix);
        slot.set_gid(gid);
        slot.set_advance(Position::new(adv, 0.0));
    }

    /// Append a freshly allocated slot at the end of the stream.
    pub fn append_slot(&mut self, gid: GlyphId, char_ix: usize) -> SlotIx {
        let ix = self.new_slot(gid, char_ix);
        self.link_after(self.last, ix);
        ix
    }

    /// Link `ix` into the stream immediately before `before`, or at the end
    /// of the stream when `before` is `None`.
    pub fn link_before(&mut self, before: Option<SlotIx>, ix: SlotIx) {
        match before {
            Some(b) => {
                let prev = self.slot(b).prev();
                self.slot_mut(ix).prev = prev;
                self.slot_mut(ix).next = Some(b);
                self.slot_mut(b).prev = Some(ix);
                match prev {
                    Some(p) => self.slot_mut(p).next = Some(ix),
                    None => self.first = Some(ix),
                }
            }
            None => self.link_after(self.last, ix),
        }
    }

    fn link_after(&mut self, after: Option<SlotIx>, ix: SlotIx) {
        match after {
            Some(a) => {
                let next = self.slot(a).next();
                self.slot_mut(ix).prev = Some(a);
                self.slot_mut(ix).next = next;
                self.slot_mut(a).next = Some(ix);
                match next {
                    Some(n) => self.slot_mut(n).prev = Some(ix),
                    None => self.last = Some(ix),
                }
            }
            None => {
                self.slot_mut(ix).prev = None;
                self.slot_mut(ix).next = None;
                self.first = Some(ix);
                self.last = Some(ix);
            }
        }
    }

    /// Unlink `ix` from the stream, relinking its neighbors. The slot keeps
    /// its own `prev`/`next` so a cursor standing on it can still walk off.
    pub fn unlink(&mut self, ix: SlotIx) {
        let (prev, next) = {
            let s = self.slot(ix);
            (s.prev(), s.next())
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.last = prev,
        }
    }

    /// Return a slot to the free list. The slot must already be unlinked
    /// from the stream (deleted slots are; copied slots were never linked).
    pub fn free_slot(&mut self, ix: SlotIx) {
        debug_assert!(
            self.first != Some(ix) && self.last != Some(ix),
            "freeing a slot still anchoring the stream"
        );
        self.free.push(ix);
    }

    /// Attach `child` to `parent`, appending it to the parent's attachment
    /// chain. Rejects self-attachment and cycles up the parent chain.
    pub fn attach(&mut self, child: SlotIx, parent: SlotIx) -> bool {
        if child == parent {
            return false;
        }
        // Refuse if `parent` is already below `child` in the forest.
        let mut walk = Some(parent);
        while let Some(w) = walk {
            if w == child {
                return false;
            }
            walk = self.slot(w).attached_to();
        }
        self.slot_mut(child).parent = Some(parent);
        match self.slot(parent).first_attachment() {
            None => self.slot_mut(parent).child = Some(child),
            Some(mut c) => {
                while let Some(sib) = self.slot(c).next_sibling_attachment() {
                    c = sib;
                }
                self.slot_mut(c).sibling = Some(child);
            }
        }
        true
    }

    /// Whether `ix` sits somewhere below `ancestor` in the attachment
    /// forest.
    pub fn is_child_of(&self, ix: SlotIx, ancestor: SlotIx) -> bool {
        let mut walk = self.slot(ix).attached_to();
        while let Some(w) = walk {
            if w == ancestor {
                return true;
            }
            walk = self.slot(w).attached_to();
        }
        false
    }

    /// Stream position of a slot, counted from `first`.
    pub fn slot_index(&self, ix: SlotIx) -> usize {
        self.iter().position(|s| s == ix).unwrap_or(0)
    }

    /// Derive every slot origin from advances, attachments, and collision
    /// offsets, and recompute the segment advance. Recomputes from scratch,
    /// so repeated calls on unshifted input are idempotent.
    pub fn position_slots(&mut self) -> Position {
        let order: Vec<SlotIx> = self.iter().collect();
        let visual: Vec<SlotIx> = if self.dir.is_rtl() {
            order.iter().rev().copied().collect()
        } else {
            order.clone()
        };

        let mut pen = Position::zero();
        for &ix in &visual {
            if !self.slot(ix).is_base() {
                continue;
            }
            let off = self.collision(ix).offset();
            let slot = &self.slots[ix.index()];
            let origin = Position::new(pen.x, pen.y) + slot.shift + off;
            let adv = slot.advance.x;
            self.slots[ix.index()].position = origin;
            pen.x += adv;
        }
        for &ix in &order {
            if self.slot(ix).is_base() {
                continue;
            }
            let origin = self.resolve_attached_origin(ix);
            self.slots[ix.index()].position = origin;
        }
        self.advance = pen;
        trace!(target: "segment", advance = pen.x, slots = order.len(), "positioned");
        pen
    }

    fn resolve_attached_origin(&self, ix: SlotIx) -> Position {
        // Walk up the attachment chain accumulating anchor offsets until a
        // base slot supplies the absolute origin.
        let mut origin = Position::zero();
        let mut cur = ix;
        while let Some(parent) = self.slot(cur).attached_to() {
            let s = self.slot(cur);
            origin += s.shift + self.collision(cur).offset() + s.attach_offset - s.attach_with;
            if self.slot(parent).is_base() {
                return self.slot(parent).position + origin;
            }
            cur = parent;
        }
        self.slot(cur).position + origin
    }

    /// Read a slot attribute as the observation API and bytecode see it.
    pub fn slot_attr(&self, ix: SlotIx, aref: AttrRef) -> i32 {
        let s = self.slot(ix);
        match aref.code {
            AttrCode::AdvX => s.advance.x as i32,
            AttrCode::AdvY => s.advance.y as i32,
            AttrCode::AttTo => s
                .attached_to()
                .map(|p| self.slot_index(p) as i32)
                .unwrap_or(-1),
            AttrCode::AttX => s.attach_offset.x as i32,
            AttrCode::AttY => s.attach_offset.y as i32,
            AttrCode::AttWithX => s.attach_with.x as i32,
            AttrCode::AttWithY => s.attach_with.y as i32,
            AttrCode::AttLevel => i32::from(s.attach_level),
            AttrCode::Break => i32::from(s.break_weight),
            AttrCode::CompRef => i32::from(s.comp_ref),
            AttrCode::Dir => self.dir.is_rtl() as i32,
            AttrCode::Insert => s.insert_before as i32,
            AttrCode::PosX => s.position.x as i32,
            AttrCode::PosY => s.position.y as i32,
            AttrCode::ShiftX => s.shift.x as i32,
            AttrCode::ShiftY => s.shift.y as i32,
            AttrCode::UserDefnV1 => s
                .user
                .get(aref.subindex as usize)
                .copied()
                .map(i32::from)
                .unwrap_or(0),
            AttrCode::JStretch
            | AttrCode::JShrink
            | AttrCode::JStep
            | AttrCode::JWeight
            | AttrCode::JWidth => {
                let j = aref.code as usize - AttrCode::JStretch as usize;
                s.just[j]
            }
            // Glyph-point attachment and measure attributes need tables the
            // core does not carry; they read as zero.
            AttrCode::AttGpt
            | AttrCode::AttXOff
            | AttrCode::AttYOff
            | AttrCode::WithGpt
            | AttrCode::AttWithXOff
            | AttrCode::AttWithYOff
            | AttrCode::MeasureSol
            | AttrCode::MeasureEol
            | AttrCode::Max => 0,
        }
    }

    /// Write a slot attribute from action bytecode. `AttTo` resolves its
    /// operand as an index into the rule's slot-map window.
    pub fn set_slot_attr(&mut self, ix: SlotIx, aref: AttrRef, value: i32, map: &SlotMap) {
        match aref.code {
            AttrCode::AdvX => self.slot_mut(ix).advance.x = value as f32,
            AttrCode::AdvY => self.slot_mut(ix).advance.y = value as f32,
            AttrCode::AttTo => {
                if value >= 0 {
                    if let Some(target) = map.at(value as usize) {
                        if self.attach(ix, target) {
                            trace!(target: "segment", child = ix.index(), parent = target.index(), "attach");
                        }
                    }
                }
            }
            AttrCode::AttX => self.slot_mut(ix).attach_offset.x = value as f32,
            AttrCode::AttY => self.slot_mut(ix).attach_offset.y = value as f32,
            AttrCode::AttXOff => self.slot_mut(ix).attach_offset.x += value as f32,
            AttrCode::AttYOff => self.slot_mut(ix).attach_offset.y += value as f32,
            AttrCode::AttWithX => self.slot_mut(ix).attach_with.x = value as f32,
            AttrCode::AttWithY => self.slot_mut(ix).attach_with.y = value as f32,
            AttrCode::AttWithXOff => self.slot_mut(ix).attach_with.x += value as f32,
            AttrCode::AttWithYOff => self.slot_mut(ix).attach_with.y += value as f32,
            AttrCode::AttLevel => self.slot_mut(ix).attach_level = value as i16,
            AttrCode::Break => self.slot_mut(ix).break_weight = value as i16,
            AttrCode::CompRef => self.slot_mut(ix).comp_ref = value as i16,
            AttrCode::Insert => self.slot_mut(ix).insert_before = value != 0,
            AttrCode::PosX => self.slot_mut(ix).position.x = value as f32,
            AttrCode::PosY => self.slot_mut(ix).position.y = value as f32,
            AttrCode::ShiftX => self.slot_mut(ix).shift.x = value as f32,
            AttrCode::ShiftY => self.slot_mut(ix).shift.y = value as f32,
            AttrCode::UserDefnV1 => {
                if let Some(u) = self.slot_mut(ix).user.get_mut(aref.subindex as usize) {
                    *u = value as i16;
                }
            }
            AttrCode::JStretch
            | AttrCode::JShrink
            | AttrCode::JStep
            | AttrCode::JWeight
            | AttrCode::JWidth => {
                let j = aref.code as usize - AttrCode::JStretch as usize;
                self.slot_mut(ix).just[j] = value;
            }
            AttrCode::AttGpt
            | AttrCode::WithGpt
            | AttrCode::Dir
            | AttrCode::MeasureSol
            | AttrCode::MeasureEol
            | AttrCode::Max => {}
        }
    }
}

/// Stream-order iterator over live slots.
pub struct SlotStream<'a> {
    seg: &'a Segment,
    cur: Option<SlotIx>,
}

impl Iterator for SlotStream<'_> {
    type Item = SlotIx;

    fn next(&mut self) -> Option<SlotIx> {
        let cur = self.cur?;
        self.cur = self.seg.slot(cur).next();
        Some(cur)
    }
}
