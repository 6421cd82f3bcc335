//! Load-time error taxonomy for untrusted font tables.
//!
//! Every structural defect found while validating a pass table maps to one
//! code here, together with a packed context word locating the defect
//! (which component of which pass, and the index within it). Runtime VM
//! faults are deliberately *not* errors of this kind; they are status codes
//! local to one rule application.

use thiserror::Error;

/// Structural error codes surfaced while reading a pass table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoadErrorCode {
    #[error("pass subtable length out of bounds")]
    BadPassLength,
    #[error("pass has no rules and no collision work")]
    BadEmptyPass,
    #[error("transition count exceeds state count")]
    BadNumTrans,
    #[error("success-state count exceeds state count")]
    BadNumSuccess,
    #[error("success + transition states fail to cover the state array")]
    BadNumStates,
    #[error("pass has rules but no glyph ranges")]
    NoRanges,
    #[error("pre-context bounds are inverted or out of range")]
    BadCtxtLenBounds,
    #[error("rule-map index extends past the subtable")]
    BadRuleMapLen,
    #[error("pass-constraint code block is misplaced")]
    BadPassCCodePtr,
    #[error("rule-constraint code block is misplaced")]
    BadRuleCCodePtr,
    #[error("action code block is misplaced")]
    BadActionCodePtr,
    #[error("constraint code block length mismatch")]
    BadCCodeLen,
    #[error("state index out of range")]
    BadState,
    #[error("rule number out of range")]
    BadRuleNum,
    #[error("glyph range is inverted, out of bounds, or overlapping")]
    BadRange,
    #[error("success state carries an invalid rule slice")]
    BadRuleMapping,
    #[error("constraint program contains mutating instructions")]
    MutableCCode,
    #[error("table sizes overflow the allocator budget")]
    OutOfMem,
    #[error("bytecode failed to load (status {0})")]
    CodeFailure(u8),
}

/// Which part of the pass the context index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Component {
    Pass = 1,
    ARule = 2,
    AStarts = 3,
    ATrans = 4,
    ARuleMap = 5,
}

impl Component {
    fn from_bits(b: u32) -> Component {
        match b {
            2 => Component::ARule,
            3 => Component::AStarts,
            4 => Component::ATrans,
            5 => Component::ARuleMap,
            _ => Component::Pass,
        }
    }
}

/// Packed error-context word: component in the low byte, the owning pass
/// number in the middle sixteen bits, and the offending element index in the
/// top byte. Mirrors the 24-bit component+index encoding of the table
/// diagnostics this format is historically reported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrCtx(u32);

impl ErrCtx {
    pub fn new(component: Component) -> Self {
        ErrCtx(component as u32)
    }

    /// Replace the component, keeping pass number and index.
    pub fn with_component(self, component: Component) -> Self {
        ErrCtx((self.0 & 0xFFFF_FF00) | component as u32)
    }

    /// Record the owning pass.
    pub fn with_pass(self, pass: u16) -> Self {
        ErrCtx((self.0 & 0xFF00_00FF) | (u32::from(pass) << 8))
    }

    /// Record the element index within the component (truncated to a byte,
    /// as the encoding allows).
    pub fn with_index(self, index: usize) -> Self {
        ErrCtx((self.0 & 0x00FF_FFFF) | ((index as u32 & 0xFF) << 24))
    }

    /// Bump the index field by one (used while loading nested code blocks).
    pub fn bumped(self) -> Self {
        self.with_index(self.index() + 1)
    }

    pub fn component(self) -> Component {
        Component::from_bits(self.0 & 0xFF)
    }

    pub fn pass(self) -> u16 {
        ((self.0 >> 8) & 0xFFFF) as u16
    }

    pub fn index(self) -> usize {
        (self.0 >> 24) as usize
    }
}

/// A structural load failure: code plus packed context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{code} (pass {}, {:?}[{}])", .ctx.pass(), .ctx.component(), .ctx.index())]
pub struct LoadError {
    pub code: LoadErrorCode,
    pub ctx: ErrCtx,
}

impl LoadError {
    pub fn new(code: LoadErrorCode, ctx: ErrCtx) -> Self {
        Self { code, ctx }
    }
}

pub type LoadResult<T> = Result<T, LoadError>;

/// Guard helper mirroring the original reader's test-and-bail pattern:
/// `fail_if(bad, code, ctx)?` aborts the load when `bad` holds.
pub fn fail_if(bad: bool, code: LoadErrorCode, ctx: ErrCtx) -> LoadResult<()> {
    if bad { Err(LoadError::new(code, ctx)) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctx_round_trips_fields() {
        let ctx = ErrCtx::new(Component::ATrans).with_pass(7).with_index(42);
        assert_eq!(ctx.component(), Component::ATrans);
        assert_eq!(ctx.pass(), 7);
        assert_eq!(ctx.index(), 42);
    }

    #[test]
    fn with_component_preserves_pass_and_index() {
        let ctx = ErrCtx::new(Component::Pass).with_pass(3).with_index(9);
        let ctx = ctx.with_component(Component::ARule);
        assert_eq!(ctx.component(), Component::ARule);
        assert_eq!(ctx.pass(), 3);
        assert_eq!(ctx.index(), 9);
    }

    #[test]
    fn fail_if_propagates_code() {
        let err = fail_if(true, LoadErrorCode::BadState, ErrCtx::new(Component::AStarts))
            .unwrap_err();
        assert_eq!(err.code, LoadErrorCode::BadState);
        assert!(fail_if(false, LoadErrorCode::BadState, ErrCtx::default()).is_ok());
    }
}
