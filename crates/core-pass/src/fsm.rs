//! The finite-state matcher walking the slot stream through a pass's
//! transition table.

use crate::Pass;
use core_slot::{Segment, SlotIx, SlotMap, MAX_SLOTS};
use core_types::NO_COLUMN;
use smallvec::SmallVec;

/// Cap on candidate rules retained per cursor position.
pub const MAX_RULES: usize = 128;

/// Accumulator of candidate rules collected at accept states, kept in the
/// load-time order (sort desc, pre-context asc) and deduplicated.
#[derive(Default)]
pub struct RuleAccumulator {
    rules: SmallVec<[u16; 32]>,
}

impl RuleAccumulator {
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Sorted merge of an accept state's rule slice, retaining at most
    /// `MAX_RULES` entries.
    pub fn accumulate(&mut self, pass: &Pass, slice: &[u16]) {
        if slice.is_empty() {
            return;
        }
        let mut merged: SmallVec<[u16; 32]> = SmallVec::new();
        let mut a = self.rules.iter().copied().peekable();
        let mut b = slice.iter().copied().peekable();
        while merged.len() < MAX_RULES {
            let next = match (a.peek(), b.peek()) {
                (Some(&x), Some(&y)) => {
                    if x == y {
                        b.next();
                        continue;
                    }
                    let kx = pass.rules[x as usize].cmp_key(x);
                    let ky = pass.rules[y as usize].cmp_key(y);
                    if kx <= ky {
                        a.next();
                        x
                    } else {
                        b.next();
                        y
                    }
                }
                (Some(&x), None) => {
                    a.next();
                    x
                }
                (None, Some(&y)) => {
                    b.next();
                    y
                }
                (None, None) => break,
            };
            if merged.last() != Some(&next) {
                merged.push(next);
            }
        }
        self.rules = merged;
    }
}

/// Matcher scratch state: the context window plus the rule accumulator.
/// Allocated once per shaping run and reset per cursor position.
#[derive(Default)]
pub struct Fsm {
    pub map: SlotMap,
    pub rules: RuleAccumulator,
}

impl Pass {
    /// Walk the stream from `slot` through the transition table, filling
    /// the window with the left context plus matched slots and collecting
    /// rule candidates at accept states. Returns false when the available
    /// left context is shorter than the pass requires or the window
    /// overflows.
    pub fn run_fsm(&self, seg: &Segment, fsm: &mut Fsm, slot: SlotIx) -> bool {
        fsm.rules.clear();

        // Rewind into the left context.
        let mut ctxt: u16 = 0;
        let mut start = slot;
        while ctxt < u16::from(self.max_pre_ctxt) {
            match seg.prev_of(start) {
                Some(p) => {
                    start = p;
                    ctxt += 1;
                }
                None => break,
            }
        }
        fsm.map.reset(seg.prev_of(start), ctxt);
        if ctxt < u16::from(self.min_pre_ctxt) {
            return false;
        }

        let mut state = self.start_states[(u16::from(self.max_pre_ctxt) - ctxt) as usize];
        let mut free_slots = MAX_SLOTS;
        let mut cur = start;
        loop {
            fsm.map.push_slot(Some(cur));
            free_slots -= 1;
            let col = self.column_of(seg.slot(cur).gid());
            if free_slots == 0 || col == NO_COLUMN || state >= self.num_transition {
                return free_slots != 0;
            }
            state = self.transitions[state as usize * self.num_columns as usize + col as usize];
            if state >= self.success_start {
                let slice = self.state_rules(state);
                fsm.rules.accumulate(self, slice);
            }
            match seg.next_of(cur) {
                Some(next) if state != 0 => cur = next,
                next => {
                    // Terminate: push the continuation slot (possibly the
                    // end of the stream) and report success.
                    fsm.map.push_slot(next);
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{PassBuilder, RuleSpec};
    use core_vm::Opcode as Op;

    fn two_rule_pass() -> Pass {
        let mut b = PassBuilder::new();
        b.num_columns = 2;
        b.ranges = vec![(1, 1, 0), (2, 2, 1)];
        b.start_states = vec![1];
        b.transitions = vec![vec![0, 0], vec![2, 0], vec![0, 3]];
        b.success_rules = vec![vec![0, 1]];
        b.rules = vec![
            RuleSpec {
                sort: 1,
                pre_context: 0,
                constraint: Vec::new(),
                action: vec![Op::RetZero as u8],
            },
            RuleSpec {
                sort: 2,
                pre_context: 0,
                constraint: Vec::new(),
                action: vec![Op::RetZero as u8],
            },
        ];
        Pass::read(&b.build(), 0, 0).unwrap()
    }

    #[test]
    fn accumulator_merges_sorted_and_dedups() {
        let pass = two_rule_pass();
        let mut acc = RuleAccumulator::default();
        // Rule 1 carries the longer sort, so it stays in front.
        acc.accumulate(&pass, &[0]);
        acc.accumulate(&pass, &[1, 0]);
        assert_eq!(acc.as_slice(), &[1, 0]);
        acc.accumulate(&pass, &[1]);
        assert_eq!(acc.as_slice(), &[1, 0]);
    }
}
