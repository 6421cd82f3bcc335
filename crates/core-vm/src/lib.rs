//! The rule bytecode machine: a small stack VM with two execution modes.
//!
//! Constraint programs are pure predicates over the slot window; action
//! programs may rewrite the slot stream through the window cursor. The
//! split is enforced at load time: the constraint dispatch table simply
//! does not contain the mutating instructions, so a constraint program
//! using one fails analysis and the pass loader rejects the font.

pub mod code;
pub mod machine;
pub mod opcode;

pub use code::{Code, CodeStatus};
pub use machine::{Machine, MachineStatus, STACK_GUARD, STACK_SIZE};
pub use opcode::{GlyphMetricId, Instr, Opcode, OpcodeInfo, table};
