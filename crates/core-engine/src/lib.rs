//! The shaping facade: collaborator traits, segment construction from
//! character input, pass-sequence execution, and the cached shaping path.

pub mod demo;
pub mod face;
pub mod shaper;

pub use face::{char_runs, Face, Font};
pub use shaper::{build_segment, CachedShaper, Shaper};
