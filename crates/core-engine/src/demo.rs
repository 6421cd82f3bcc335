//! A synthetic face and profile for tests and the demo binary.
//!
//! The face maps a handful of Latin letters onto glyph ids with simple
//! metrics, and carries one embedded pass table that ligates the "ab"
//! pair, so the whole pipeline can be exercised without a font file.

use crate::face::Face;
use crate::shaper::{Shaper, PASS_TABLE_TAG};
use byteorder::{BigEndian, ByteOrder};
use core_pass::{PassBuilder, RuleSpec};
use core_slot::{GlyphMetric, GlyphStore};
use core_types::{GlyphId, Position, Rect};
use core_vm::Opcode as Op;
use std::collections::HashMap;
use std::sync::Arc;

/// Glyph id of the space glyph in the demo face.
pub const SPACE_GID: GlyphId = 3;
/// Glyph id produced by the demo "ab" ligature.
pub const LIGATURE_GID: GlyphId = 20;

const FIRST_LETTER_GID: GlyphId = 10;

pub struct DemoFace {
    glyphs: Arc<GlyphStore>,
    tables: HashMap<[u8; 4], Vec<u8>>,
}

impl Default for DemoFace {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoFace {
    pub fn new() -> Self {
        let mut metrics = vec![GlyphMetric::default(); 21];
        // .notdef
        metrics[0] = GlyphMetric {
            advance: 10.0,
            bbox: Rect::new(Position::zero(), Position::new(8.0, 14.0)),
            sub_boxes: Vec::new(),
        };
        // Space: designed advance, no ink.
        metrics[SPACE_GID as usize] = GlyphMetric {
            advance: 5.0,
            bbox: Rect::default(),
            sub_boxes: Vec::new(),
        };
        for i in 0..6u16 {
            metrics[(FIRST_LETTER_GID + i) as usize] = GlyphMetric {
                advance: 10.0 + f32::from(i),
                bbox: Rect::new(Position::zero(), Position::new(8.0 + f32::from(i), 12.0)),
                sub_boxes: Vec::new(),
            };
        }
        metrics[LIGATURE_GID as usize] = GlyphMetric {
            advance: 18.0,
            bbox: Rect::new(Position::zero(), Position::new(16.0, 12.0)),
            sub_boxes: Vec::new(),
        };

        let mut tables = HashMap::new();
        tables.insert(PASS_TABLE_TAG, pass_table(&[ligature_pass_blob()]));
        Self {
            glyphs: Arc::new(GlyphStore::new(metrics)),
            tables,
        }
    }
}

impl Face for DemoFace {
    fn table(&self, tag: [u8; 4]) -> Option<&[u8]> {
        self.tables.get(&tag).map(Vec::as_slice)
    }

    fn glyph_store(&self) -> Arc<GlyphStore> {
        Arc::clone(&self.glyphs)
    }

    fn gid_for_char(&self, ch: char) -> Option<GlyphId> {
        match ch {
            ' ' => Some(SPACE_GID),
            'a'..='f' => Some(FIRST_LETTER_GID + (ch as u16 - 'a' as u16)),
            _ => None,
        }
    }
}

/// Frame pass blobs into the container format `Shaper::from_table` reads.
pub fn pass_table(blobs: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; 2];
    BigEndian::write_u16(&mut out, blobs.len() as u16);
    for blob in blobs {
        let mut len = [0u8; 4];
        BigEndian::write_u32(&mut len, blob.len() as u32);
        out.extend_from_slice(&len);
        out.extend_from_slice(blob);
    }
    out
}

/// One pass that rewrites the glyph pair (a, b) into the ligature glyph.
pub fn ligature_pass_blob() -> Vec<u8> {
    let a = FIRST_LETTER_GID;
    let b = FIRST_LETTER_GID + 1;
    let mut builder = PassBuilder::new();
    builder.num_columns = 2;
    builder.ranges = vec![(a, a, 0), (b, b, 1)];
    builder.start_states = vec![1];
    builder.transitions = vec![vec![0, 0], vec![2, 0], vec![0, 3]];
    builder.success_rules = vec![vec![0]];
    builder.rules = vec![RuleSpec {
        sort: 2,
        pre_context: 0,
        constraint: Vec::new(),
        action: vec![
            Op::PutGlyph as u8,
            (LIGATURE_GID >> 8) as u8,
            (LIGATURE_GID & 0xFF) as u8,
            Op::Next as u8,
            Op::Delete as u8,
            Op::PushByte as u8,
            1,
            Op::PopRet as u8,
        ],
    }];
    builder.build()
}

/// The demo shaping profile: the embedded ligature pass.
pub fn demo_shaper(face: &dyn Face) -> Shaper {
    let table = face.table(PASS_TABLE_TAG).expect("demo pass table");
    Shaper::from_table(table).expect("demo profile loads")
}
