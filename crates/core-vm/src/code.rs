//! Program loading and validation.
//!
//! All structural checking happens here, before a single instruction runs:
//! unknown opcodes, exhausted operand bytes, context-item skips that leave
//! the program, and malformed attribute or metric selectors are all load
//! failures. The loader also computes the two analysis bits the pass loader
//! depends on: whether the program is immutable (legal as a constraint) and
//! whether it deletes slots (forces garbage collection after the rule).

use crate::opcode::{self, Instr, Opcode, ParamShape};
use core_slot::AttrCode;

/// Why a program failed to load. The discriminant is surfaced inside the
/// pass loader's code-failure error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodeStatus {
    InvalidOpcode = 1,
    ArgumentsExhausted = 2,
    JumpPastEnd = 3,
    NestedContextItem = 4,
    MissingReturn = 5,
    OutOfRangeData = 6,
}

/// A validated rule program.
#[derive(Debug, Clone, Default)]
pub struct Code {
    instrs: Vec<Instr>,
    constrained: bool,
    immutable: bool,
    deletes: bool,
}

impl Code {
    /// Decode and validate `bytes`. `constrained` records the mode the
    /// program will run in; mutating instructions are still decoded so the
    /// caller can distinguish "mutable constraint" from "garbage".
    pub fn load(constrained: bool, bytes: &[u8]) -> Result<Code, CodeStatus> {
        if bytes.is_empty() {
            return Ok(Code {
                instrs: Vec::new(),
                constrained,
                immutable: true,
                deletes: false,
            });
        }

        let mut instrs = Vec::new();
        let mut starts = Vec::new();
        // (instruction index, absolute target byte) for skip fixups
        let mut fixups: Vec<(usize, usize)> = Vec::new();
        let mut region_end: Option<usize> = None;
        let mut immutable = true;
        let mut deletes = false;
        let mut ip = 0usize;

        while ip < bytes.len() {
            let at = ip;
            starts.push(at);
            let byte = bytes[ip];
            ip += 1;
            let info = opcode::lookup(byte, false).ok_or(CodeStatus::InvalidOpcode)?;
            immutable &= opcode::lookup(byte, true).is_some();

            let nparams = match info.params {
                ParamShape::Fixed(n) => n as usize,
                ParamShape::Counted => {
                    if ip >= bytes.len() {
                        return Err(CodeStatus::ArgumentsExhausted);
                    }
                    1 + bytes[ip] as usize
                }
            };
            if ip + nparams > bytes.len() {
                return Err(CodeStatus::ArgumentsExhausted);
            }
            let params = &bytes[ip..ip + nparams];
            ip += nparams;

            let instr = match info.op {
                Opcode::Nop => Instr::Nop,
                Opcode::PushByte => Instr::PushByte(params[0] as i8),
                Opcode::PushByteU => Instr::PushByteU(params[0]),
                Opcode::PushShort => {
                    Instr::PushShort(i16::from_be_bytes([params[0], params[1]]))
                }
                Opcode::PushShortU => {
                    Instr::PushShortU(u16::from_be_bytes([params[0], params[1]]))
                }
                Opcode::PushLong => Instr::PushLong(i32::from_be_bytes([
                    params[0], params[1], params[2], params[3],
                ])),
                Opcode::Add => Instr::Add,
                Opcode::Sub => Instr::Sub,
                Opcode::Mul => Instr::Mul,
                Opcode::Div => Instr::Div,
                Opcode::Min => Instr::Min,
                Opcode::Max => Instr::Max,
                Opcode::Neg => Instr::Neg,
                Opcode::Trunc8 => Instr::Trunc8,
                Opcode::Trunc16 => Instr::Trunc16,
                Opcode::Cond => Instr::Cond,
                Opcode::And => Instr::And,
                Opcode::Or => Instr::Or,
                Opcode::Not => Instr::Not,
                Opcode::Equal => Instr::Equal,
                Opcode::NotEq => Instr::NotEq,
                Opcode::Less => Instr::Less,
                Opcode::Gtr => Instr::Gtr,
                Opcode::LessEq => Instr::LessEq,
                Opcode::GtrEq => Instr::GtrEq,
                Opcode::BitOr => Instr::BitOr,
                Opcode::BitAnd => Instr::BitAnd,
                Opcode::BitNot => Instr::BitNot,
                Opcode::BitXor => Instr::BitXor,
                Opcode::CntxtItem => {
                    if region_end.is_some_and(|end| at < end) {
                        return Err(CodeStatus::NestedContextItem);
                    }
                    let target = ip + params[1] as usize;
                    if target > bytes.len() {
                        return Err(CodeStatus::JumpPastEnd);
                    }
                    region_end = Some(target);
                    fixups.push((instrs.len(), target));
                    Instr::CntxtItem {
                        offset: params[0] as i8,
                        skip: 0,
                    }
                }
                Opcode::PushSlotAttr => {
                    check_attr(params[0])?;
                    Instr::PushSlotAttr {
                        attr: params[0],
                        slot_ref: params[1] as i8,
                    }
                }
                Opcode::PushGlyphMetric => {
                    opcode::GlyphMetricId::from_byte(params[0])
                        .ok_or(CodeStatus::OutOfRangeData)?;
                    Instr::PushGlyphMetric {
                        metric: params[0],
                        slot_ref: params[1] as i8,
                        attr_level: params[2],
                    }
                }
                Opcode::PushAttToSlotAttr => {
                    check_attr(params[0])?;
                    Instr::PushAttToSlotAttr {
                        attr: params[0],
                        slot_ref: params[1] as i8,
                    }
                }
                Opcode::PopRet => Instr::PopRet,
                Opcode::RetZero => Instr::RetZero,
                Opcode::RetTrue => Instr::RetTrue,
                Opcode::Next => Instr::Next,
                Opcode::CopyNext => Instr::CopyNext,
                Opcode::Insert => Instr::Insert,
                Opcode::Delete => {
                    deletes = true;
                    Instr::Delete
                }
                Opcode::PutGlyph => Instr::PutGlyph {
                    gid: u16::from_be_bytes([params[0], params[1]]),
                },
                Opcode::PutCopy => Instr::PutCopy {
                    slot_ref: params[0] as i8,
                },
                Opcode::Assoc => Instr::Assoc {
                    refs: params[1..].iter().map(|&b| b as i8).collect(),
                },
                Opcode::AttrSet => {
                    check_attr(params[0])?;
                    Instr::AttrSet { attr: params[0] }
                }
                Opcode::AttrAdd => {
                    check_attr(params[0])?;
                    Instr::AttrAdd { attr: params[0] }
                }
                Opcode::AttrSub => {
                    check_attr(params[0])?;
                    Instr::AttrSub { attr: params[0] }
                }
                Opcode::IAttrSet => {
                    check_attr(params[0])?;
                    Instr::IAttrSet {
                        attr: params[0],
                        index: params[1],
                    }
                }
                Opcode::IAttrAdd => {
                    check_attr(params[0])?;
                    Instr::IAttrAdd {
                        attr: params[0],
                        index: params[1],
                    }
                }
                Opcode::IAttrSub => {
                    check_attr(params[0])?;
                    Instr::IAttrSub {
                        attr: params[0],
                        index: params[1],
                    }
                }
            };
            instrs.push(instr);
        }

        // A skip must land exactly on an instruction boundary (or the end).
        for (item, target) in fixups {
            let landing = if target == bytes.len() {
                instrs.len()
            } else {
                starts
                    .binary_search(&target)
                    .map_err(|_| CodeStatus::JumpPastEnd)?
            };
            let skip = (landing - (item + 1)) as u16;
            if let Instr::CntxtItem { skip: s, .. } = &mut instrs[item] {
                *s = skip;
            }
        }

        match instrs.last() {
            Some(Instr::PopRet | Instr::RetZero | Instr::RetTrue) => {}
            _ => return Err(CodeStatus::MissingReturn),
        }

        Ok(Code {
            instrs,
            constrained,
            immutable,
            deletes,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn constrained(&self) -> bool {
        self.constrained
    }

    /// True when the program contains no mutating instructions, i.e. it is
    /// legal to run in constraint mode.
    pub fn immutable(&self) -> bool {
        self.immutable
    }

    /// True when the program can delete slots; the rule driver must collect
    /// garbage after running it.
    pub fn deletes(&self) -> bool {
        self.deletes
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }
}

fn check_attr(raw: u8) -> Result<(), CodeStatus> {
    AttrCode::decode(raw, 0)
        .map(|_| ())
        .ok_or(CodeStatus::OutOfRangeData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode as Op;

    #[test]
    fn empty_program_is_immutable_noop() {
        let c = Code::load(true, &[]).unwrap();
        assert!(c.is_empty());
        assert!(c.immutable());
        assert!(!c.deletes());
    }

    #[test]
    fn mutators_clear_immutability_but_still_load() {
        let prog = [Op::Delete as u8, Op::RetTrue as u8];
        let c = Code::load(true, &prog).unwrap();
        assert!(!c.immutable());
        assert!(c.deletes());
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert_eq!(
            Code::load(false, &[0xEE, Op::RetTrue as u8]).unwrap_err(),
            CodeStatus::InvalidOpcode
        );
    }

    #[test]
    fn exhausted_params_rejected() {
        assert_eq!(
            Code::load(false, &[Op::PushShort as u8, 0x01]).unwrap_err(),
            CodeStatus::ArgumentsExhausted
        );
    }

    #[test]
    fn missing_return_rejected() {
        assert_eq!(
            Code::load(false, &[Op::PushByte as u8, 1]).unwrap_err(),
            CodeStatus::MissingReturn
        );
    }

    #[test]
    fn cntxt_item_skip_converts_to_instruction_count() {
        // cntxt_item(0, skip over push_byte(5)) ret_true
        let prog = [
            Op::CntxtItem as u8,
            0,
            2,
            Op::PushByte as u8,
            5,
            Op::RetTrue as u8,
        ];
        let c = Code::load(false, &prog).unwrap();
        assert_eq!(
            c.instrs()[0],
            Instr::CntxtItem { offset: 0, skip: 1 }
        );
    }

    #[test]
    fn cntxt_item_skip_into_operand_bytes_rejected() {
        let prog = [
            Op::CntxtItem as u8,
            0,
            1, // lands inside push_byte's operand
            Op::PushByte as u8,
            5,
            Op::RetTrue as u8,
        ];
        assert_eq!(Code::load(false, &prog).unwrap_err(), CodeStatus::JumpPastEnd);
    }

    #[test]
    fn bad_attr_byte_rejected() {
        let prog = [Op::AttrSet as u8, 0xEF, Op::RetZero as u8];
        // 0xEF folds into the user-defined block, so use Max instead.
        assert!(Code::load(false, &prog).is_ok());
        let prog = [Op::AttrSet as u8, 30, Op::RetZero as u8];
        assert_eq!(Code::load(false, &prog).unwrap_err(), CodeStatus::OutOfRangeData);
    }
}
