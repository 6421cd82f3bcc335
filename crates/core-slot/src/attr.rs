//! The closed enumeration of slot attributes addressable from rule bytecode
//! and from the slot observation API.

/// Slot attribute codes. The numbering is part of the bytecode contract:
/// attribute operands in rule programs are these discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttrCode {
    AdvX = 0,
    AdvY,
    AttTo,
    AttX,
    AttY,
    AttGpt,
    AttXOff,
    AttYOff,
    AttWithX,
    AttWithY,
    WithGpt,
    AttWithXOff,
    AttWithYOff,
    AttLevel,
    Break,
    CompRef,
    Dir,
    Insert,
    PosX,
    PosY,
    ShiftX,
    ShiftY,
    UserDefnV1,
    MeasureSol,
    MeasureEol,
    JStretch,
    JShrink,
    JStep,
    JWeight,
    JWidth,
    Max,
}

/// User-defined attributes are addressed `JStretch + 30` and beyond in the
/// wire encoding; the decoder folds that range onto `UserDefn` + subindex.
pub const USER_DEFN_BASE: u8 = AttrCode::JStretch as u8 + 30;

/// Decoded attribute reference: a code plus the subindex it applies to
/// (justification level or user-attribute slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrRef {
    pub code: AttrCode,
    pub subindex: u8,
}

impl AttrCode {
    /// Decode a raw wire attribute byte, folding the user-defined block.
    /// Returns `None` for bytes past the closed enumeration.
    pub fn decode(raw: u8, subindex: u8) -> Option<AttrRef> {
        if raw >= USER_DEFN_BASE {
            return Some(AttrRef {
                code: AttrCode::UserDefnV1,
                subindex: raw - USER_DEFN_BASE,
            });
        }
        let code = match raw {
            0 => AttrCode::AdvX,
            1 => AttrCode::AdvY,
            2 => AttrCode::AttTo,
            3 => AttrCode::AttX,
            4 => AttrCode::AttY,
            5 => AttrCode::AttGpt,
            6 => AttrCode::AttXOff,
            7 => AttrCode::AttYOff,
            8 => AttrCode::AttWithX,
            9 => AttrCode::AttWithY,
            10 => AttrCode::WithGpt,
            11 => AttrCode::AttWithXOff,
            12 => AttrCode::AttWithYOff,
            13 => AttrCode::AttLevel,
            14 => AttrCode::Break,
            15 => AttrCode::CompRef,
            16 => AttrCode::Dir,
            17 => AttrCode::Insert,
            18 => AttrCode::PosX,
            19 => AttrCode::PosY,
            20 => AttrCode::ShiftX,
            21 => AttrCode::ShiftY,
            22 => AttrCode::UserDefnV1,
            23 => AttrCode::MeasureSol,
            24 => AttrCode::MeasureEol,
            25 => AttrCode::JStretch,
            26 => AttrCode::JShrink,
            27 => AttrCode::JStep,
            28 => AttrCode::JWeight,
            29 => AttrCode::JWidth,
            _ => return None,
        };
        Some(AttrRef { code, subindex })
    }
}
