//! Programmatic construction of pass tables.
//!
//! Emits the exact binary layout the reader validates, so fixtures and the
//! demo face need no pre-compiled font files. Offsets are computed in a
//! sizing pass before serialization; code offsets in the header are
//! emitted relative to the same base the reader subtracts.

use byteorder::{BigEndian, ByteOrder};

/// One rule being assembled: match length, pre-context, and raw programs.
#[derive(Debug, Clone, Default)]
pub struct RuleSpec {
    pub sort: u16,
    pub pre_context: u8,
    pub constraint: Vec<u8>,
    pub action: Vec<u8>,
}

/// Assembles one pass table.
#[derive(Debug, Clone)]
pub struct PassBuilder {
    pub flags: u8,
    pub max_loop: u8,
    pub num_columns: u16,
    pub min_pre_ctxt: u8,
    pub max_pre_ctxt: u8,
    /// `(first_gid, last_gid, column)` triples; the final range's last
    /// glyph determines the column-map size.
    pub ranges: Vec<(u16, u16, u16)>,
    /// Start state per missing-context amount.
    pub start_states: Vec<u16>,
    /// Row-major transition rows, one per transition state.
    pub transitions: Vec<Vec<u16>>,
    /// Rule-index lists, one per success state (appended after the
    /// transition states in the state numbering).
    pub success_rules: Vec<Vec<u16>>,
    pub rules: Vec<RuleSpec>,
    pub pass_constraint: Vec<u8>,
}

impl Default for PassBuilder {
    fn default() -> Self {
        Self {
            flags: 0,
            max_loop: 8,
            num_columns: 0,
            min_pre_ctxt: 0,
            max_pre_ctxt: 0,
            ranges: Vec::new(),
            start_states: Vec::new(),
            transitions: Vec::new(),
            success_rules: Vec::new(),
            rules: Vec::new(),
            pass_constraint: Vec::new(),
        }
    }
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    let mut b = [0u8; 2];
    BigEndian::write_u16(&mut b, v);
    out.extend_from_slice(&b);
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    BigEndian::write_u32(&mut b, v);
    out.extend_from_slice(&b);
}

impl PassBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize with code offsets relative to base 0 (the reader must be
    /// handed `subtable_base = 0`).
    pub fn build(&self) -> Vec<u8> {
        let num_rules = self.rules.len();
        let num_transition = self.transitions.len();
        let num_success = self.success_rules.len();
        let num_states = num_transition + num_success;

        // Rule map: concatenated per-success-state rule index lists.
        let mut rule_map_index = Vec::with_capacity(num_success + 1);
        let mut rule_map = Vec::new();
        rule_map_index.push(0u16);
        for rules in &self.success_rules {
            rule_map.extend_from_slice(rules);
            rule_map_index.push(rule_map.len() as u16);
        }

        // Constraint block: offset 0 means "no constraint", so the block
        // starts with one pad byte and real offsets begin at 1.
        let mut rc_block = vec![0u8];
        let mut rc_offsets = Vec::with_capacity(num_rules + 1);
        for rule in &self.rules {
            if rule.constraint.is_empty() {
                rc_offsets.push(0u16);
            } else {
                rc_offsets.push(rc_block.len() as u16);
                rc_block.extend_from_slice(&rule.constraint);
            }
        }
        rc_offsets.push(rc_block.len() as u16);

        let mut a_block = Vec::new();
        let mut a_offsets = Vec::with_capacity(num_rules + 1);
        for rule in &self.rules {
            a_offsets.push(a_block.len() as u16);
            a_block.extend_from_slice(&rule.action);
        }
        a_offsets.push(a_block.len() as u16);

        // Sizing: everything between the header and the code blocks.
        let n_starts = usize::from(self.max_pre_ctxt - self.min_pre_ctxt) + 1;
        debug_assert_eq!(self.start_states.len(), n_starts, "start-state count");
        let body = 6 * self.ranges.len()
            + 2 * (num_success + 1)
            + 2 * rule_map.len()
            + 2
            + 2 * n_starts
            + 2 * num_rules
            + num_rules
            + 1
            + 2
            + 2 * (num_rules + 1)
            + 2 * (num_rules + 1)
            + 2 * num_transition * usize::from(self.num_columns)
            + 1;
        let pc_off = 40 + body;
        let rc_off = pc_off + self.pass_constraint.len();
        let a_off = rc_off + rc_block.len();

        let mut out = Vec::with_capacity(a_off + a_block.len());
        // Header.
        out.push(self.flags);
        out.push(self.max_loop);
        out.push(self.max_pre_ctxt); // maxContext
        out.push(0); // maxBackup
        push_u16(&mut out, num_rules as u16);
        push_u16(&mut out, 0); // fsmOffset
        push_u32(&mut out, pc_off as u32);
        push_u32(&mut out, rc_off as u32);
        push_u32(&mut out, a_off as u32);
        push_u32(&mut out, 0); // reserved
        push_u16(&mut out, num_states as u16);
        push_u16(&mut out, num_transition as u16);
        push_u16(&mut out, num_success as u16);
        push_u16(&mut out, self.num_columns);
        push_u16(&mut out, self.ranges.len() as u16);
        push_u16(&mut out, 0); // searchRange
        push_u16(&mut out, 0); // entrySelector
        push_u16(&mut out, 0); // rangeShift
        debug_assert_eq!(out.len(), 40);

        for &(first, last, col) in &self.ranges {
            push_u16(&mut out, first);
            push_u16(&mut out, last);
            push_u16(&mut out, col);
        }
        for &ix in &rule_map_index {
            push_u16(&mut out, ix);
        }
        for &entry in &rule_map {
            push_u16(&mut out, entry);
        }
        out.push(self.min_pre_ctxt);
        out.push(self.max_pre_ctxt);
        for &s in &self.start_states {
            push_u16(&mut out, s);
        }
        for rule in &self.rules {
            push_u16(&mut out, rule.sort);
        }
        for rule in &self.rules {
            out.push(rule.pre_context);
        }
        out.push(0); // reserved
        push_u16(&mut out, self.pass_constraint.len() as u16);
        for &off in &rc_offsets {
            push_u16(&mut out, off);
        }
        for &off in &a_offsets {
            push_u16(&mut out, off);
        }
        for row in &self.transitions {
            debug_assert_eq!(row.len(), usize::from(self.num_columns), "row width");
            for &t in row {
                push_u16(&mut out, t);
            }
        }
        out.push(0); // reserved
        debug_assert_eq!(out.len(), pc_off);
        out.extend_from_slice(&self.pass_constraint);
        out.extend_from_slice(&rc_block);
        out.extend_from_slice(&a_block);
        out
    }
}
