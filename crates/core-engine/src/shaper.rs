//! Pass-sequence execution and the cached shaping path.

use crate::face::Face;
use byteorder::{BigEndian, ByteOrder};
use core_cache::{CachedCharInfo, CachedSlot, SegCache, SegCacheEntry, MAX_CACHED_SEG};
use core_pass::{Fsm, Pass};
use core_slot::{Segment, SlotIx};
use core_trace::TraceSink;
use core_types::error::{Component, ErrCtx, LoadError, LoadErrorCode, LoadResult};
use core_types::{Dir, GlyphId};
use tracing::{debug, info};

/// Tag of the embedded pass-sequence table.
pub const PASS_TABLE_TAG: [u8; 4] = *b"shap";

/// Build a segment from text via the face's character map. Unknown
/// codepoints map to glyph zero.
pub fn build_segment(face: &dyn Face, text: &str) -> Segment {
    let mut seg = Segment::new(face.glyph_store(), Dir::LeftToRight, face.num_user_attrs());
    for (ch, offset) in crate::face::char_runs(text) {
        let gid = face.gid_for_char(ch).unwrap_or(0);
        let char_ix = seg.push_char(ch as u32, offset);
        seg.append_slot(gid, char_ix);
    }
    seg
}

/// An ordered sequence of loaded passes.
pub struct Shaper {
    passes: Vec<Pass>,
}

impl Shaper {
    pub fn from_passes(passes: Vec<Pass>) -> Self {
        Self { passes }
    }

    /// Load each blob as one pass.
    pub fn from_blobs(blobs: &[Vec<u8>]) -> LoadResult<Self> {
        let passes = blobs
            .iter()
            .enumerate()
            .map(|(i, b)| Pass::read(b, 0, i as u16))
            .collect::<LoadResult<Vec<_>>>()?;
        Ok(Self { passes })
    }

    /// Parse the embedded container: a pass count followed by
    /// length-prefixed pass blobs.
    pub fn from_table(data: &[u8]) -> LoadResult<Self> {
        let ctx = ErrCtx::new(Component::Pass);
        let bad = |_| LoadError::new(LoadErrorCode::BadPassLength, ctx);
        let count = usize::from(
            data.get(..2)
                .map(BigEndian::read_u16)
                .ok_or(())
                .map_err(bad)?,
        );
        let mut passes = Vec::with_capacity(count);
        let mut pos = 2usize;
        for i in 0..count {
            let len = data
                .get(pos..pos + 4)
                .map(BigEndian::read_u32)
                .ok_or(())
                .map_err(bad)? as usize;
            pos += 4;
            let blob = data.get(pos..pos + len).ok_or(()).map_err(bad)?;
            passes.push(Pass::read(blob, 0, i as u16)?);
            pos += len;
        }
        info!(target: "runtime", passes = passes.len(), "profile loaded");
        Ok(Self { passes })
    }

    pub fn num_passes(&self) -> usize {
        self.passes.len()
    }

    /// Run every pass over the segment, then derive final positions.
    pub fn shape_segment<'a, 'b: 'a>(
        &self,
        seg: &mut Segment,
        mut sink: Option<&'a mut (dyn TraceSink + 'b)>,
    ) {
        let mut fsm = Fsm::default();
        for (i, pass) in self.passes.iter().enumerate() {
            pass.run_pass(seg, &mut fsm, i, sink.as_deref_mut());
        }
        seg.position_slots();
    }

    /// Shape text end to end against a face.
    pub fn shape(&self, face: &dyn Face, text: &str, sink: Option<&mut dyn TraceSink>) -> Segment {
        let mut seg = build_segment(face, text);
        self.shape_segment(&mut seg, sink);
        seg
    }
}

/// A shaper with a segment cache over whitespace-delimited sub-runs.
pub struct CachedShaper {
    shaper: Shaper,
    cache: SegCache,
    space: GlyphId,
}

impl CachedShaper {
    pub fn new(shaper: Shaper, max_segments: usize, space: GlyphId) -> Self {
        Self {
            shaper,
            cache: SegCache::new(max_segments),
            space,
        }
    }

    pub fn cache(&self) -> &SegCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut SegCache {
        &mut self.cache
    }

    pub fn shaper(&self) -> &Shaper {
        &self.shaper
    }

    /// Shape text, consulting the cache per whitespace-delimited word.
    /// Space glyphs pass through unshaped; words short enough to cache are
    /// replayed on hit and inserted after shaping on miss.
    pub fn shape<'a, 'b: 'a>(
        &mut self,
        face: &dyn Face,
        text: &str,
        mut sink: Option<&'a mut (dyn TraceSink + 'b)>,
    ) -> Segment {
        let mut out = Segment::new(face.glyph_store(), Dir::LeftToRight, face.num_user_attrs());
        let mapped: Vec<(char, usize, GlyphId)> = crate::face::char_runs(text)
            .map(|(ch, off)| (ch, off, face.gid_for_char(ch).unwrap_or(0)))
            .collect();

        let mut i = 0usize;
        while i < mapped.len() {
            if mapped[i].2 == self.space {
                let (ch, off, gid) = mapped[i];
                let char_ix = out.push_char(ch as u32, off);
                out.append_slot(gid, char_ix);
                i += 1;
                continue;
            }
            let mut j = i;
            while j < mapped.len() && mapped[j].2 != self.space {
                j += 1;
            }
            self.shape_word(face, &mapped[i..j], &mut out, sink.as_deref_mut());
            i = j;
        }
        out.position_slots();
        out
    }

    fn shape_word<'a, 'b: 'a>(
        &mut self,
        face: &dyn Face,
        word: &[(char, usize, GlyphId)],
        out: &mut Segment,
        sink: Option<&'a mut (dyn TraceSink + 'b)>,
    ) {
        let gids: Vec<GlyphId> = word.iter().map(|&(_, _, g)| g).collect();
        let base_char = out.num_chars();

        if let Some(entry) = self.cache.find(&gids) {
            let entry = entry.clone();
            debug!(target: "cache", word_len = gids.len(), "replaying cached word");
            replay_entry(&entry, out, base_char);
            return;
        }

        let mut wseg = Segment::new(face.glyph_store(), Dir::LeftToRight, face.num_user_attrs());
        for &(ch, off, gid) in word {
            let char_ix = wseg.push_char(ch as u32, off);
            wseg.append_slot(gid, char_ix);
        }
        self.shaper.shape_segment(&mut wseg, sink);

        if gids.len() <= MAX_CACHED_SEG {
            let (chars, slots) = snapshot_segment(&wseg);
            self.cache.insert(&gids, chars, slots);
        }
        splice_segment(&wseg, out, base_char);
    }
}

/// Flatten a shaped word segment into cacheable form.
fn snapshot_segment(seg: &Segment) -> (Vec<CachedCharInfo>, Vec<CachedSlot>) {
    let chars = (0..seg.num_chars())
        .map(|i| {
            let c = seg.char_info(i).expect("char info");
            CachedCharInfo {
                unicode: c.unicode,
                before: c.before,
                after: c.after,
            }
        })
        .collect();
    let order: Vec<SlotIx> = seg.iter().collect();
    let slots = order
        .iter()
        .map(|&ix| {
            let s = seg.slot(ix);
            CachedSlot {
                gid: s.gid(),
                original: s.original(),
                before: s.before(),
                after: s.after(),
                origin: s.origin(),
                advance: s.advance(),
                offset: seg.collision(ix).offset(),
                parent: s
                    .attached_to()
                    .and_then(|p| order.iter().position(|&o| o == p)),
                attach_offset: s.attach_offset(),
                attach_with: s.attach_with(),
                user: s.user_attrs().to_vec(),
            }
        })
        .collect();
    (chars, slots)
}

/// Append a cached shaped word to the output segment, rebasing character
/// indices and rebuilding attachments.
fn replay_entry(entry: &SegCacheEntry, out: &mut Segment, base_char: usize) {
    for c in entry.char_info() {
        let ix = out.push_char(c.unicode, 0);
        if let Some(info) = out.char_info_mut(ix) {
            info.before = base_char + c.before;
            info.after = base_char + c.after;
        }
    }
    let mut added = Vec::with_capacity(entry.slots().len());
    for s in entry.slots() {
        let ix = out.append_slot(s.gid, base_char + s.original);
        let slot = out.slot_mut(ix);
        slot.set_before(base_char + s.before);
        slot.set_after(base_char + s.after);
        slot.set_advance(s.advance);
        slot.set_attach_offset(s.attach_offset);
        slot.set_attach_with(s.attach_with);
        slot.set_user_attrs(&s.user);
        out.collision_mut(ix).set_offset(s.offset);
        added.push(ix);
    }
    for (i, s) in entry.slots().iter().enumerate() {
        if let Some(p) = s.parent {
            out.attach(added[i], added[p]);
        }
    }
}

/// Append a freshly shaped word segment to the output segment.
fn splice_segment(wseg: &Segment, out: &mut Segment, base_char: usize) {
    for i in 0..wseg.num_chars() {
        let c = *wseg.char_info(i).expect("char info");
        let ix = out.push_char(c.unicode, c.offset);
        if let Some(info) = out.char_info_mut(ix) {
            info.before = base_char + c.before;
            info.after = base_char + c.after;
        }
    }
    let order: Vec<SlotIx> = wseg.iter().collect();
    let mut added = Vec::with_capacity(order.len());
    for &wix in &order {
        let s = wseg.slot(wix);
        let ix = out.append_slot(s.gid(), base_char + s.original());
        let slot = out.slot_mut(ix);
        slot.set_before(base_char + s.before());
        slot.set_after(base_char + s.after());
        slot.set_advance(s.advance());
        slot.set_attach_offset(s.attach_offset());
        slot.set_attach_with(s.attach_with());
        slot.set_user_attrs(s.user_attrs());
        out.collision_mut(ix).set_offset(wseg.collision(wix).offset());
        added.push(ix);
    }
    for (i, &wix) in order.iter().enumerate() {
        if let Some(p) = wseg.slot(wix).attached_to() {
            if let Some(pi) = order.iter().position(|&o| o == p) {
                out.attach(added[i], added[pi]);
            }
        }
    }
}
