//! Full-pipeline scenarios: rules plus collision avoidance, with and
//! without tracing.

use core_engine::demo::{demo_shaper, ligature_pass_blob, DemoFace, LIGATURE_GID};
use core_engine::{build_segment, Shaper};
use core_pass::PassBuilder;
use core_slot::{CollisionFlags, Segment};
use core_trace::VecSink;
use core_types::{GlyphId, Position, Rect};

fn gids(seg: &Segment) -> Vec<GlyphId> {
    seg.iter().map(|ix| seg.slot(ix).gid()).collect()
}

fn origins(seg: &Segment) -> Vec<(f32, f32)> {
    seg.iter()
        .map(|ix| {
            let o = seg.slot(ix).origin();
            (o.x, o.y)
        })
        .collect()
}

/// A rules-free collision pass permitting one fixup loop.
fn collision_pass_blob() -> Vec<u8> {
    let mut b = PassBuilder::new();
    b.flags = 2;
    b.start_states = vec![0];
    b.build()
}

#[test]
fn ligature_then_collision_pass_runs_in_order() {
    let face = DemoFace::new();
    let shaper =
        Shaper::from_blobs(&[ligature_pass_blob(), collision_pass_blob()]).expect("profile");
    let seg = shaper.shape(&face, "abc", None);
    assert_eq!(gids(&seg), vec![LIGATURE_GID, 12]);
}

#[test]
fn tracing_sink_observes_without_perturbing() {
    let face = DemoFace::new();
    let shaper = demo_shaper(&face);
    let mut sink = VecSink::default();
    let traced = shaper.shape(&face, "ab ab fab", Some(&mut sink));
    let silent = shaper.shape(&face, "ab ab fab", None);
    assert_eq!(gids(&traced), gids(&silent));
    assert_eq!(origins(&traced), origins(&silent));
    // One record per pass invocation, each carrying the fired ligatures.
    assert!(!sink.records.is_empty());
    let fired: usize = sink
        .records
        .iter()
        .flat_map(|r| &r.rules)
        .filter(|e| e.output.is_some())
        .count();
    assert_eq!(fired, 3);
}

#[test]
fn collision_pass_resolves_overlap_marked_by_attributes() {
    let face = DemoFace::new();
    let shaper = Shaper::from_blobs(&[collision_pass_blob()]).expect("profile");
    let mut seg = build_segment(&face, "aa");
    // Force the two glyphs onto the same origin and mark them fixable.
    let slots: Vec<_> = seg.iter().collect();
    seg.slot_mut(slots[0]).set_advance(Position::zero());
    seg.collision_mut(slots[0]).init(
        CollisionFlags::FIX | CollisionFlags::START,
        0.0,
        Rect::default(),
    );
    seg.collision_mut(slots[1]).init(
        CollisionFlags::FIX | CollisionFlags::END,
        0.0,
        Rect::default(),
    );
    shaper.shape_segment(&mut seg, None);
    let pos = origins(&seg);
    assert_ne!(pos[0], pos[1], "collider must separate the overlap");
    for ix in seg.iter().collect::<Vec<_>>() {
        let c = seg.collision(ix);
        assert!(c.status().contains(CollisionFlags::KNOWN));
        assert!(!c.status().contains(CollisionFlags::ISCOL));
        assert_eq!(c.shift(), Position::zero());
    }
}

#[test]
fn unknown_codepoints_map_to_notdef_and_still_shape() {
    let face = DemoFace::new();
    let shaper = demo_shaper(&face);
    let seg = shaper.shape(&face, "a?b", None);
    // '?' is outside the demo cmap; the pair never forms, so no ligature.
    assert_eq!(gids(&seg), vec![10, 0, 11]);
}
