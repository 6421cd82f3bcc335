//! End-to-end segment-cache accounting over the demo face, mirroring the
//! classic store/reuse/purge sequence.

use core_engine::demo::{DemoFace, SPACE_GID};
use core_engine::{CachedShaper, Face, Shaper};
use core_types::GlyphId;

const TEST_STRINGS: [&str; 11] = [
    "a", "aa", "aaa", "aaab", "aaac", "a b c", "aaa ", " aa", "aaaf", "aaad", "aaaa",
];

fn glyph_string(face: &DemoFace, text: &str) -> Vec<GlyphId> {
    text.chars()
        .map(|c| face.gid_for_char(c).unwrap_or(0))
        .collect()
}

/// Probe the cache the way a caller validating shaped output would: the
/// full glyph string first, then each whitespace-delimited word.
fn check_entries(shaper: &mut CachedShaper, face: &DemoFace, text: &str) -> bool {
    let glyphs = glyph_string(face, text);
    if shaper.cache_mut().find(&glyphs).is_some() {
        return true;
    }
    let mut any = false;
    for word in text.split(' ') {
        if word.is_empty() {
            continue;
        }
        let word_glyphs = glyph_string(face, word);
        if shaper.cache_mut().find(&word_glyphs).is_none() {
            return false;
        }
        any = true;
    }
    any
}

#[test]
fn cache_accounting_across_shape_and_reuse() {
    let face = DemoFace::new();
    // An identity profile: caching behavior is independent of rules.
    let mut shaper = CachedShaper::new(Shaper::from_passes(Vec::new()), 10, SPACE_GID);

    for s in TEST_STRINGS {
        let seg = shaper.shape(&face, s, None);
        assert!(!seg.is_empty(), "{s:?} must produce slots");
    }
    for s in TEST_STRINGS {
        assert!(check_entries(&mut shaper, &face, s), "{s:?} not cached");
    }
    assert_eq!(shaper.cache().segment_count(), 10);
    assert_eq!(shaper.cache().total_access_count(), 16);

    // Probing everything again only adds accesses.
    for s in TEST_STRINGS {
        assert!(check_entries(&mut shaper, &face, s), "{s:?} lost from cache");
    }
    assert_eq!(shaper.cache().segment_count(), 10);
    assert_eq!(shaper.cache().total_access_count(), 29);

    // One more word at capacity: an eviction keeps the count bounded and
    // the new entry is immediately findable.
    shaper.shape(&face, "ba", None);
    assert!(check_entries(&mut shaper, &face, "ba"));
    assert!(shaper.cache().segment_count() <= 10);
    assert_eq!(shaper.cache().total_access_count(), 30);
}

#[test]
fn whitespace_runs_are_cached_per_word() {
    let face = DemoFace::new();
    let mut shaper = CachedShaper::new(Shaper::from_passes(Vec::new()), 10, SPACE_GID);
    shaper.shape(&face, "ab cd", None);
    assert_eq!(shaper.cache().segment_count(), 2);
    assert!(shaper.cache_mut().find(&glyph_string(&face, "ab")).is_some());
    assert!(shaper.cache_mut().find(&glyph_string(&face, "cd")).is_some());
    assert!(shaper
        .cache_mut()
        .find(&glyph_string(&face, "ab cd"))
        .is_none());
}
