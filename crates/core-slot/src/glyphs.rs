//! Static per-glyph metrics the engine positions and collides with.

use core_types::{GlyphId, Rect};

/// Metrics for one glyph: advance, outer bounding box, and an optional set
/// of tighter sub-boxes used by the collider when the outer box is a poor
/// fit (deep descenders, wide marks).
#[derive(Debug, Clone, Default)]
pub struct GlyphMetric {
    pub advance: f32,
    pub bbox: Rect,
    pub sub_boxes: Vec<Rect>,
}

/// Immutable store of glyph metrics, indexed by glyph id. Out-of-range ids
/// resolve to empty metrics rather than failing: a malformed font must not
/// be able to push an invalid index into the geometry code.
#[derive(Debug, Default)]
pub struct GlyphStore {
    metrics: Vec<GlyphMetric>,
}

impl GlyphStore {
    pub fn new(metrics: Vec<GlyphMetric>) -> Self {
        Self { metrics }
    }

    pub fn num_glyphs(&self) -> usize {
        self.metrics.len()
    }

    pub fn advance(&self, gid: GlyphId) -> f32 {
        self.metrics
            .get(gid as usize)
            .map(|m| m.advance)
            .unwrap_or(0.0)
    }

    pub fn bbox(&self, gid: GlyphId) -> Rect {
        self.metrics
            .get(gid as usize)
            .map(|m| m.bbox)
            .unwrap_or_default()
    }

    pub fn sub_boxes(&self, gid: GlyphId) -> &[Rect] {
        self.metrics
            .get(gid as usize)
            .map(|m| m.sub_boxes.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Position;

    #[test]
    fn out_of_range_gid_yields_empty_metrics() {
        let store = GlyphStore::new(vec![GlyphMetric {
            advance: 10.0,
            bbox: Rect::new(Position::zero(), Position::new(8.0, 12.0)),
            sub_boxes: Vec::new(),
        }]);
        assert_eq!(store.advance(0), 10.0);
        assert_eq!(store.advance(9), 0.0);
        assert!(store.bbox(9).is_empty());
        assert!(store.sub_boxes(9).is_empty());
    }
}
