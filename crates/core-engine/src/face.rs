//! Collaborator interfaces the shaping core consumes.

use core_slot::GlyphStore;
use core_types::GlyphId;
use std::sync::Arc;

/// A loaded font face: table access, glyph metrics, and character mapping.
/// Real table location and cmap decoding live outside the core; tests and
/// the demo binary supply synthetic implementations.
pub trait Face {
    /// Raw table bytes by tag, if the face carries the table.
    fn table(&self, tag: [u8; 4]) -> Option<&[u8]>;

    /// Shared glyph metrics for segments shaped against this face.
    fn glyph_store(&self) -> Arc<GlyphStore>;

    /// cmap lookup for one codepoint.
    fn gid_for_char(&self, ch: char) -> Option<GlyphId>;

    /// Per-slot user-attribute capacity declared by the font.
    fn num_user_attrs(&self) -> usize {
        8
    }
}

/// A sized font instance over a face.
#[derive(Debug, Clone, Copy)]
pub struct Font {
    pub ppem: f32,
    pub units_per_em: f32,
}

impl Font {
    pub fn new(ppem: f32, units_per_em: f32) -> Self {
        Self { ppem, units_per_em }
    }

    /// Advance of a glyph in pixels at this size.
    pub fn pixel_advance(&self, face: &dyn Face, gid: GlyphId) -> f32 {
        face.glyph_store().advance(gid) * self.ppem / self.units_per_em
    }
}

/// The cmap-processor input stream: `(codepoint, byte offset)` pairs in
/// text order.
pub fn char_runs(text: &str) -> impl Iterator<Item = (char, usize)> + '_ {
    text.char_indices().map(|(o, c)| (c, o))
}
