//! Loader robustness: arbitrary bytes must never panic the reader, only
//! produce load errors or, for well-formed input, a pass.

use core_pass::{Pass, PassBuilder, RuleSpec};
use core_vm::Opcode as Op;
use proptest::prelude::*;

fn valid_blob() -> Vec<u8> {
    let mut b = PassBuilder::new();
    b.num_columns = 2;
    b.ranges = vec![(1, 1, 0), (2, 2, 1)];
    b.start_states = vec![1];
    b.transitions = vec![vec![0, 0], vec![2, 0], vec![0, 3]];
    b.success_rules = vec![vec![0]];
    b.rules = vec![RuleSpec {
        sort: 2,
        pre_context: 0,
        constraint: vec![Op::RetTrue as u8],
        action: vec![Op::PutGlyph as u8, 0, 9, Op::RetZero as u8],
    }];
    b.build()
}

proptest! {
    #[test]
    fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = Pass::read(&data, 0, 0);
    }

    #[test]
    fn mutated_valid_blob_never_panics(
        pos in 0usize..512,
        byte in any::<u8>(),
    ) {
        let mut blob = valid_blob();
        let at = pos % blob.len();
        blob[at] = byte;
        let _ = Pass::read(&blob, 0, 0);
    }

    #[test]
    fn truncated_valid_blob_always_errors(cut in 1usize..41) {
        let blob = valid_blob();
        let keep = blob.len().saturating_sub(cut);
        prop_assert!(Pass::read(&blob[..keep], 0, 0).is_err());
    }
}
