//! The stack machine.
//!
//! Registers: an instruction pointer, a window position (`map`), and the
//! current stream slot (`is`). The stack carries guard words at both ends;
//! guards are verified after every instruction, so a single instruction can
//! over- or under-run by its arity without corrupting anything, and the
//! violation is reported before the next instruction executes.

use crate::code::Code;
use crate::opcode::{GlyphMetricId, Instr};
use core_slot::{AttrCode, Segment, SlotIx, SlotMap};
use tracing::trace;

/// Total stack cells, including the guard regions.
pub const STACK_SIZE: usize = 96;
/// Guard words at each end of the stack.
pub const STACK_GUARD: usize = 2;

/// Terminal state of one program run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MachineStatus {
    #[default]
    Finished,
    StackUnderflow,
    StackOverflow,
    DiedEarly,
}

/// One execution context over a segment and its rule window.
pub struct Machine<'a> {
    seg: &'a mut Segment,
    smap: &'a mut SlotMap,
    stack: [i32; STACK_SIZE],
    sp: usize,
    status: MachineStatus,
}

impl<'a> Machine<'a> {
    pub fn new(seg: &'a mut Segment, smap: &'a mut SlotMap) -> Self {
        Self {
            seg,
            smap,
            stack: [0; STACK_SIZE],
            sp: STACK_GUARD,
            status: MachineStatus::Finished,
        }
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn segment(&mut self) -> &mut Segment {
        self.seg
    }

    pub fn slot_map(&mut self) -> &mut SlotMap {
        self.smap
    }

    /// Run `code` with the window cursor starting at `start`. Returns the
    /// program's value and the final cursor slot. On any fault the status
    /// reflects the cause and the guarded top-of-stack is returned.
    pub fn run(&mut self, code: &Code, start: usize) -> (i32, Option<SlotIx>) {
        self.status = MachineStatus::Finished;
        self.sp = STACK_GUARD;
        let instrs = code.instrs();
        let mut pos = start;
        let mut cursor = self.smap.at(start);
        let mut ip = 0usize;
        let mut ret = 0i32;

        while ip < instrs.len() {
            match &instrs[ip] {
                Instr::Nop => {}
                Instr::PushByte(v) => self.push(i32::from(*v)),
                Instr::PushByteU(v) => self.push(i32::from(*v)),
                Instr::PushShort(v) => self.push(i32::from(*v)),
                Instr::PushShortU(v) => self.push(i32::from(*v)),
                Instr::PushLong(v) => self.push(*v),
                Instr::Add => self.binop(|a, b| a.wrapping_add(b)),
                Instr::Sub => self.binop(|a, b| a.wrapping_sub(b)),
                Instr::Mul => self.binop(|a, b| a.wrapping_mul(b)),
                Instr::Div => {
                    let b = self.pop();
                    let a = self.pop();
                    if b == 0 {
                        self.status = MachineStatus::DiedEarly;
                        break;
                    }
                    self.push(a.wrapping_div(b));
                }
                Instr::Min => self.binop(i32::min),
                Instr::Max => self.binop(i32::max),
                Instr::Neg => {
                    let a = self.pop();
                    self.push(a.wrapping_neg());
                }
                Instr::Trunc8 => {
                    let a = self.pop();
                    self.push(a & 0xFF);
                }
                Instr::Trunc16 => {
                    let a = self.pop();
                    self.push(a & 0xFFFF);
                }
                Instr::Cond => {
                    let f = self.pop();
                    let t = self.pop();
                    let c = self.pop();
                    self.push(if c != 0 { t } else { f });
                }
                Instr::And => self.binop(|a, b| (a != 0 && b != 0) as i32),
                Instr::Or => self.binop(|a, b| (a != 0 || b != 0) as i32),
                Instr::Not => {
                    let a = self.pop();
                    self.push((a == 0) as i32);
                }
                Instr::Equal => self.binop(|a, b| (a == b) as i32),
                Instr::NotEq => self.binop(|a, b| (a != b) as i32),
                Instr::Less => self.binop(|a, b| (a < b) as i32),
                Instr::Gtr => self.binop(|a, b| (a > b) as i32),
                Instr::LessEq => self.binop(|a, b| (a <= b) as i32),
                Instr::GtrEq => self.binop(|a, b| (a >= b) as i32),
                Instr::BitOr => self.binop(|a, b| a | b),
                Instr::BitAnd => self.binop(|a, b| a & b),
                Instr::BitNot => {
                    let a = self.pop();
                    self.push(!a);
                }
                Instr::BitXor => self.binop(|a, b| a ^ b),
                Instr::CntxtItem { offset, skip } => {
                    let target_ix = i32::from(self.smap.context()) + i32::from(*offset);
                    let target = if target_ix >= 0 {
                        self.smap.at(target_ix as usize)
                    } else {
                        None
                    };
                    if cursor != target {
                        ip += *skip as usize;
                    }
                }
                Instr::PushSlotAttr { attr, slot_ref } => {
                    let v = self
                        .slot_at(pos, *slot_ref)
                        .and_then(|s| {
                            AttrCode::decode(*attr, 0).map(|aref| self.seg.slot_attr(s, aref))
                        })
                        .unwrap_or(0);
                    self.push(v);
                }
                Instr::PushAttToSlotAttr { attr, slot_ref } => {
                    let v = self
                        .slot_at(pos, *slot_ref)
                        .and_then(|s| self.seg.slot(s).attached_to())
                        .and_then(|p| {
                            AttrCode::decode(*attr, 0).map(|aref| self.seg.slot_attr(p, aref))
                        })
                        .unwrap_or(0);
                    self.push(v);
                }
                Instr::PushGlyphMetric {
                    metric,
                    slot_ref,
                    attr_level: _,
                } => {
                    let v = self
                        .slot_at(pos, *slot_ref)
                        .map(|s| self.glyph_metric(s, *metric))
                        .unwrap_or(0);
                    self.push(v);
                }
                Instr::PopRet => {
                    ret = self.pop();
                    break;
                }
                Instr::RetZero => {
                    ret = 0;
                    break;
                }
                Instr::RetTrue => {
                    ret = 1;
                    break;
                }
                Instr::Next => {
                    if pos >= self.smap.size() {
                        self.status = MachineStatus::DiedEarly;
                        break;
                    }
                    if cursor.is_some() && cursor == self.smap.highwater() {
                        self.smap.set_highpassed(true);
                    }
                    cursor = cursor.and_then(|c| self.seg.slot(c).next());
                    pos += 1;
                }
                Instr::CopyNext => {
                    cursor = cursor.and_then(|c| self.seg.slot(c).next());
                    pos += 1;
                }
                Instr::Insert => {
                    // Insert before the first live slot at or after the
                    // cursor; at stream end, append.
                    let mut at = cursor;
                    while let Some(ix) = at {
                        if self.seg.slot(ix).is_deleted() {
                            at = self.seg.slot(ix).next();
                        } else {
                            break;
                        }
                    }
                    let char_ix = at
                        .or(self.seg.last())
                        .map(|ix| self.seg.slot(ix).original())
                        .unwrap_or(0);
                    let new = self.seg.new_slot(0, char_ix);
                    self.seg.slot_mut(new).mark_inserted(true);
                    self.seg.link_before(at, new);
                    cursor = Some(new);
                    self.smap.set_at(pos, cursor);
                }
                Instr::Delete => {
                    let Some(c) = cursor.filter(|&c| !self.seg.slot(c).is_deleted()) else {
                        self.status = MachineStatus::DiedEarly;
                        break;
                    };
                    self.seg.slot_mut(c).mark_deleted(true);
                    self.seg.unlink(c);
                    if self.smap.highwater() == Some(c) {
                        self.smap.set_highwater(self.seg.slot(c).next());
                    }
                    if let Some(p) = self.seg.slot(c).prev() {
                        cursor = Some(p);
                    }
                }
                Instr::PutGlyph { gid } => {
                    let Some(c) = cursor else {
                        self.status = MachineStatus::DiedEarly;
                        break;
                    };
                    self.seg.set_glyph(c, *gid);
                }
                Instr::PutCopy { slot_ref } => {
                    if let Some(c) = cursor {
                        if let Some(src) = self.slot_at(pos, *slot_ref) {
                            if src != c {
                                let content = self.seg.slot(src).clone();
                                let dst = self.seg.slot_mut(c);
                                dst.copy_content_from(&content);
                                dst.mark_copied(false);
                                dst.mark_deleted(false);
                            }
                        }
                    }
                }
                Instr::Assoc { refs } => {
                    if let Some(c) = cursor {
                        let mut before = usize::MAX;
                        let mut after = 0usize;
                        for &r in refs {
                            if let Some(s) = self.slot_at(pos, r) {
                                before = before.min(self.seg.slot(s).before());
                                after = after.max(self.seg.slot(s).after());
                            }
                        }
                        if before != usize::MAX {
                            let slot = self.seg.slot_mut(c);
                            slot.set_before(before);
                            slot.set_after(after);
                        }
                    }
                }
                Instr::AttrSet { attr } => {
                    let v = self.pop();
                    self.write_attr(cursor, *attr, 0, v, WriteMode::Set);
                }
                Instr::AttrAdd { attr } => {
                    let v = self.pop();
                    self.write_attr(cursor, *attr, 0, v, WriteMode::Add);
                }
                Instr::AttrSub { attr } => {
                    let v = self.pop();
                    self.write_attr(cursor, *attr, 0, v, WriteMode::Sub);
                }
                Instr::IAttrSet { attr, index } => {
                    let v = self.pop();
                    self.write_attr(cursor, *attr, *index, v, WriteMode::Set);
                }
                Instr::IAttrAdd { attr, index } => {
                    let v = self.pop();
                    self.write_attr(cursor, *attr, *index, v, WriteMode::Add);
                }
                Instr::IAttrSub { attr, index } => {
                    let v = self.pop();
                    self.write_attr(cursor, *attr, *index, v, WriteMode::Sub);
                }
            }
            ip += 1;

            if self.sp < STACK_GUARD {
                self.status = MachineStatus::StackUnderflow;
                break;
            }
            if self.sp > STACK_SIZE - STACK_GUARD {
                self.status = MachineStatus::StackOverflow;
                break;
            }
        }

        // Final stack audit: a balanced program ends on the empty mark.
        // Deficit means something popped through the guard; residue means
        // pushes were never consumed.
        if self.status == MachineStatus::Finished && self.sp != STACK_GUARD {
            self.status = if self.sp < STACK_GUARD {
                MachineStatus::StackUnderflow
            } else {
                MachineStatus::StackOverflow
            };
        }
        if self.status != MachineStatus::Finished {
            ret = self.top();
            trace!(target: "vm", status = ?self.status, "program fault");
        }
        (ret, cursor)
    }

    fn push(&mut self, v: i32) {
        if self.sp < STACK_SIZE {
            self.stack[self.sp] = v;
            self.sp += 1;
        }
    }

    fn pop(&mut self) -> i32 {
        if self.sp == 0 {
            return 0;
        }
        self.sp -= 1;
        self.stack[self.sp]
    }

    fn top(&self) -> i32 {
        if self.sp == 0 {
            0
        } else {
            self.stack[self.sp.min(STACK_SIZE) - 1]
        }
    }

    fn binop(&mut self, f: impl Fn(i32, i32) -> i32) {
        let b = self.pop();
        let a = self.pop();
        self.push(f(a, b));
    }

    /// Resolve a window-relative slot reference against the current cursor
    /// position.
    fn slot_at(&self, pos: usize, slot_ref: i8) -> Option<SlotIx> {
        let ix = pos as i32 + i32::from(slot_ref);
        if ix < 0 {
            return None;
        }
        self.smap.at(ix as usize)
    }

    fn glyph_metric(&self, slot: SlotIx, metric: u8) -> i32 {
        let gid = self.seg.slot(slot).gid();
        let glyphs = self.seg.glyphs();
        let bbox = glyphs.bbox(gid);
        let adv = glyphs.advance(gid);
        let v = match GlyphMetricId::from_byte(metric) {
            Some(GlyphMetricId::Lsb) => bbox.bl.x,
            Some(GlyphMetricId::Rsb) => adv - bbox.tr.x,
            Some(GlyphMetricId::BbTop) => bbox.tr.y,
            Some(GlyphMetricId::BbBottom) => bbox.bl.y,
            Some(GlyphMetricId::BbLeft) => bbox.bl.x,
            Some(GlyphMetricId::BbRight) => bbox.tr.x,
            Some(GlyphMetricId::BbHeight) => bbox.height(),
            Some(GlyphMetricId::BbWidth) => bbox.width(),
            Some(GlyphMetricId::AdvWidth) => adv,
            Some(GlyphMetricId::AdvHeight) => 0.0,
            None => 0.0,
        };
        v as i32
    }

    fn write_attr(&mut self, cursor: Option<SlotIx>, attr: u8, index: u8, v: i32, mode: WriteMode) {
        let Some(c) = cursor else { return };
        let Some(aref) = AttrCode::decode(attr, index) else {
            return;
        };
        let value = match mode {
            WriteMode::Set => v,
            WriteMode::Add => self.seg.slot_attr(c, aref).wrapping_add(v),
            WriteMode::Sub => self.seg.slot_attr(c, aref).wrapping_sub(v),
        };
        self.seg.set_slot_attr(c, aref, value, self.smap);
    }
}

enum WriteMode {
    Set,
    Add,
    Sub,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Code;
    use crate::opcode::Opcode as Op;
    use core_slot::{GlyphMetric, GlyphStore};
    use core_types::{Dir, Position, Rect};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn store() -> Arc<GlyphStore> {
        let metrics = (0..8)
            .map(|i| GlyphMetric {
                advance: 10.0,
                bbox: Rect::new(Position::zero(), Position::new(8.0, 10.0 + i as f32)),
                sub_boxes: Vec::new(),
            })
            .collect();
        Arc::new(GlyphStore::new(metrics))
    }

    fn fixture(gids: &[u16]) -> (Segment, SlotMap) {
        let mut seg = Segment::new(store(), Dir::LeftToRight, 4);
        for (i, &g) in gids.iter().enumerate() {
            seg.push_char(u32::from(g), i);
            seg.append_slot(g, i);
        }
        let mut smap = SlotMap::new();
        smap.reset(None, 0);
        let slots: Vec<_> = seg.iter().collect();
        for s in slots {
            smap.push_slot(Some(s));
        }
        (seg, smap)
    }

    #[test]
    fn constraint_push_one_finishes_clean() {
        let (mut seg, mut smap) = fixture(&[1, 2]);
        let code = Code::load(true, &[Op::PushByte as u8, 1, Op::PopRet as u8]).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let (ret, _) = m.run(&code, 0);
        assert_eq!(ret, 1);
        assert_eq!(m.status(), MachineStatus::Finished);
    }

    #[test]
    fn popping_past_empty_underflows() {
        let (mut seg, mut smap) = fixture(&[1]);
        // One value pushed, two consumed.
        let code = Code::load(
            true,
            &[Op::PushByte as u8, 1, Op::Add as u8, Op::PopRet as u8],
        )
        .unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let _ = m.run(&code, 0);
        assert_eq!(m.status(), MachineStatus::StackUnderflow);
    }

    #[test]
    fn runaway_pushes_overflow() {
        let (mut seg, mut smap) = fixture(&[1]);
        let mut prog = Vec::new();
        for _ in 0..STACK_SIZE {
            prog.extend_from_slice(&[Op::PushByte as u8, 1]);
        }
        prog.push(Op::PopRet as u8);
        let code = Code::load(true, &prog).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let _ = m.run(&code, 0);
        assert_eq!(m.status(), MachineStatus::StackOverflow);
    }

    #[test]
    fn arithmetic_and_cond() {
        let (mut seg, mut smap) = fixture(&[1]);
        // (3 + 4) == 7 ? 11 : 22
        let prog = [
            Op::PushByte as u8, 3,
            Op::PushByte as u8, 4,
            Op::Add as u8,
            Op::PushByte as u8, 7,
            Op::Equal as u8,
            Op::PushByte as u8, 11,
            Op::PushByte as u8, 22,
            Op::Cond as u8,
            Op::PopRet as u8,
        ];
        let code = Code::load(true, &prog).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let (ret, _) = m.run(&code, 0);
        assert_eq!(ret, 11);
        assert_eq!(m.status(), MachineStatus::Finished);
    }

    #[test]
    fn division_by_zero_dies_early() {
        let (mut seg, mut smap) = fixture(&[1]);
        let prog = [
            Op::PushByte as u8, 4,
            Op::PushByte as u8, 0,
            Op::Div as u8,
            Op::PopRet as u8,
        ];
        let code = Code::load(true, &prog).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let _ = m.run(&code, 0);
        assert_eq!(m.status(), MachineStatus::DiedEarly);
    }

    #[test]
    fn put_glyph_rewrites_cursor_slot() {
        let (mut seg, mut smap) = fixture(&[1, 2]);
        let prog = [Op::PutGlyph as u8, 0, 5, Op::RetZero as u8];
        let code = Code::load(false, &prog).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let (_, cursor) = m.run(&code, 0);
        assert_eq!(m.status(), MachineStatus::Finished);
        let c = cursor.unwrap();
        assert_eq!(seg.slot(c).gid(), 5);
        assert_eq!(seg.slot(c).advance().x, 10.0);
    }

    #[test]
    fn insert_links_before_cursor_and_becomes_cursor() {
        let (mut seg, mut smap) = fixture(&[1, 2]);
        let prog = [
            Op::Insert as u8,
            Op::PutGlyph as u8, 0, 7,
            Op::RetZero as u8,
        ];
        let code = Code::load(false, &prog).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let (_, cursor) = m.run(&code, 1);
        let gids: Vec<u16> = seg.iter().map(|ix| seg.slot(ix).gid()).collect();
        assert_eq!(gids, vec![1, 7, 2]);
        assert!(seg.slot(cursor.unwrap()).is_inserted());
    }

    #[test]
    fn delete_unlinks_and_steps_back() {
        let (mut seg, mut smap) = fixture(&[1, 2, 3]);
        let prog = [Op::Delete as u8, Op::RetZero as u8];
        let code = Code::load(false, &prog).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let (_, cursor) = m.run(&code, 1);
        let gids: Vec<u16> = seg.iter().map(|ix| seg.slot(ix).gid()).collect();
        assert_eq!(gids, vec![1, 3]);
        // Cursor stepped back onto the predecessor.
        assert_eq!(seg.slot(cursor.unwrap()).gid(), 1);
    }

    #[test]
    fn slot_attr_round_trip_through_vm() {
        let (mut seg, mut smap) = fixture(&[1]);
        let user_attr = core_slot::AttrCode::UserDefnV1 as u8;
        let prog = [
            Op::PushByte as u8, 9,
            Op::IAttrSet as u8, user_attr, 2,
            Op::PushSlotAttr as u8, user_attr, 0,
            Op::PopRet as u8,
        ];
        let code = Code::load(false, &prog).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let (ret, _) = m.run(&code, 0);
        // PushSlotAttr reads subindex 0; the set went to subindex 2.
        assert_eq!(ret, 0);
        let ix = seg.first().unwrap();
        let aref = core_slot::AttrCode::decode(user_attr, 2).unwrap();
        assert_eq!(seg.slot_attr(ix, aref), 9);
    }

    #[test]
    fn glyph_metric_reads_bbox() {
        let (mut seg, mut smap) = fixture(&[3]);
        let prog = [
            Op::PushGlyphMetric as u8,
            GlyphMetricId::BbTop as u8,
            0,
            0,
            Op::PopRet as u8,
        ];
        let code = Code::load(true, &prog).unwrap();
        let mut m = Machine::new(&mut seg, &mut smap);
        let (ret, _) = m.run(&code, 0);
        assert_eq!(ret, 13);
    }
}
