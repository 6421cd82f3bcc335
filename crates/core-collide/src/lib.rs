//! Collision avoidance: geometric resolution of residual overlaps between
//! positioned glyphs, run as the final stage of collision-enabled passes.
//!
//! Two resolvers cooperate under a three-phase orchestrator. The shift
//! collider negotiates two-dimensional escapes for fixable glyphs; the kern
//! collider closes or opens horizontal gaps along a cluster. Phases are
//! strictly ordered: forward shifting, iterated backward/forward settling,
//! then kerning.

pub mod avoidance;
pub mod kern;
pub mod shift;

pub use avoidance::collision_avoidance;
pub use kern::KernCollider;
pub use shift::ShiftCollider;

/// Shifts at or beyond this magnitude signal an unresolvable position.
pub const SHIFT_SENTINEL: f32 = 1e38;
