//! Pass-table reading and validation.
//!
//! The layout is big-endian with a 40-byte header, followed by the glyph
//! ranges, rule map, context tables, per-rule offset arrays, the transition
//! table, and finally the three code blocks whose positions must agree with
//! the header's offsets. Every offset and length is proven in bounds before
//! it is dereferenced, and all validation completes before any bytecode is
//! examined.

use crate::rule::Rule;
use crate::{Pass, COLLISION_LOOP_MASK};
use byteorder::{BigEndian, ByteOrder};
use core_types::error::{fail_if, Component, ErrCtx, LoadError, LoadErrorCode, LoadResult};
use core_types::NO_COLUMN;
use core_vm::Code;
use tracing::debug;

/// Big-endian cursor over the pass blob. Every read is bounds-checked and
/// reports truncation as a bad-length error at the current context.
struct Be<'a> {
    buf: &'a [u8],
    pos: usize,
    ctx: ErrCtx,
}

impl<'a> Be<'a> {
    fn new(buf: &'a [u8], ctx: ErrCtx) -> Self {
        Self { buf, pos: 0, ctx }
    }

    fn take(&mut self, n: usize) -> LoadResult<&'a [u8]> {
        fail_if(
            self.pos + n > self.buf.len(),
            LoadErrorCode::BadPassLength,
            self.ctx,
        )?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> LoadResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> LoadResult<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> LoadResult<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    fn skip(&mut self, n: usize) -> LoadResult<()> {
        self.take(n).map(|_| ())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn peek_u16(&self, at: usize) -> LoadResult<u16> {
        fail_if(
            at + 2 > self.buf.len(),
            LoadErrorCode::BadPassLength,
            self.ctx,
        )?;
        Ok(BigEndian::read_u16(&self.buf[at..]))
    }
}

impl Pass {
    /// Read one pass from `data`. Header code offsets are relative to
    /// `subtable_base`; `pass_ix` seeds the diagnostic context.
    pub fn read(data: &[u8], subtable_base: usize, pass_ix: u16) -> LoadResult<Pass> {
        let ctx = ErrCtx::new(Component::Pass).with_pass(pass_ix);
        fail_if(data.len() < 40, LoadErrorCode::BadPassLength, ctx)?;

        let mut r = Be::new(data, ctx);
        let flags = r.u8()?;
        // A loop budget of zero cannot bound rule application; floor at 1
        // so the runner's termination guarantee holds for any input.
        let max_loop = r.u8()?.max(1);
        r.skip(2)?; // maxContext, maxBackup
        let num_rules = r.u16()?;
        fail_if(
            num_rules == 0 && flags & COLLISION_LOOP_MASK == 0,
            LoadErrorCode::BadEmptyPass,
            ctx,
        )?;
        r.skip(2)?; // fsmOffset
        let pc_off = i64::from(r.u32()?) - subtable_base as i64;
        let rc_off = i64::from(r.u32()?) - subtable_base as i64;
        let a_off = i64::from(r.u32()?) - subtable_base as i64;
        r.skip(4)?; // reserved
        let num_states = r.u16()?;
        let num_transition = r.u16()?;
        let num_success = r.u16()?;
        let num_columns = r.u16()?;
        let num_ranges = r.u16()? as usize;
        r.skip(6)?; // searchRange, entrySelector, rangeShift
        debug_assert_eq!(r.pos(), 40);

        fail_if(
            num_transition > num_states,
            LoadErrorCode::BadNumTrans,
            ctx,
        )?;
        fail_if(
            num_success > num_states,
            LoadErrorCode::BadNumSuccess,
            ctx,
        )?;
        fail_if(
            u32::from(num_success) + u32::from(num_transition) < u32::from(num_states),
            LoadErrorCode::BadNumStates,
            ctx,
        )?;
        fail_if(
            num_rules != 0 && num_ranges == 0,
            LoadErrorCode::NoRanges,
            ctx,
        )?;
        let success_start = num_states - num_success;

        // The glyph count comes from the last range's final glyph id.
        let num_glyphs = if num_ranges > 0 {
            fail_if(
                40 + num_ranges * 6 > data.len(),
                LoadErrorCode::BadPassLength,
                ctx,
            )?;
            usize::from(r.peek_u16(40 + num_ranges * 6 - 4)?) + 1
        } else {
            0
        };

        let ranges_pos = r.pos();
        r.skip(num_ranges * 6)?;
        let rule_map_index_pos = r.pos();
        fail_if(
            rule_map_index_pos + 2 * (usize::from(num_success) + 1) > data.len(),
            LoadErrorCode::BadRuleMapLen,
            ctx,
        )?;
        r.skip(2 * (usize::from(num_success) + 1))?;
        let num_entries = usize::from(r.peek_u16(rule_map_index_pos + 2 * usize::from(num_success))?);
        let rule_map_pos = r.pos();
        r.skip(2 * num_entries)?;

        let min_pre_ctxt = r.u8()?;
        let max_pre_ctxt = r.u8()?;
        fail_if(
            min_pre_ctxt > max_pre_ctxt,
            LoadErrorCode::BadCtxtLenBounds,
            ctx,
        )?;
        let start_states_pos = r.pos();
        r.skip(2 * (usize::from(max_pre_ctxt - min_pre_ctxt) + 1))?;
        let sort_keys_pos = r.pos();
        r.skip(2 * usize::from(num_rules))?;
        let pre_context_pos = r.pos();
        r.skip(usize::from(num_rules))?;
        r.skip(1)?; // reserved

        let pass_constraint_len = usize::from(r.u16()?);
        let o_constraint_pos = r.pos();
        r.skip(2 * (usize::from(num_rules) + 1))?;
        let o_actions_pos = r.pos();
        r.skip(2 * (usize::from(num_rules) + 1))?;
        let transitions_pos = r.pos();
        r.skip(2 * usize::from(num_transition) * usize::from(num_columns))?;
        r.skip(1)?; // reserved

        // The three code blocks must sit exactly where the header claims.
        fail_if(
            r.pos() as i64 != pc_off,
            LoadErrorCode::BadPassCCodePtr,
            ctx,
        )?;
        r.skip(pass_constraint_len)?;
        fail_if(r.pos() as i64 != rc_off, LoadErrorCode::BadRuleCCodePtr, ctx)?;
        fail_if(
            rc_off - pc_off != pass_constraint_len as i64,
            LoadErrorCode::BadCCodeLen,
            ctx,
        )?;
        let rc_total = usize::from(r.peek_u16(o_constraint_pos + 2 * usize::from(num_rules))?);
        let rc_pos = r.pos();
        r.skip(rc_total)?;
        fail_if(r.pos() as i64 != a_off, LoadErrorCode::BadActionCodePtr, ctx)?;
        let a_total = usize::from(r.peek_u16(o_actions_pos + 2 * usize::from(num_rules))?);
        let a_pos = r.pos();
        r.skip(a_total)?;
        fail_if(r.pos() > data.len(), LoadErrorCode::BadPassLength, ctx)?;

        // Structure proven; load the programs.
        let pass_constraint = if pass_constraint_len > 0 {
            let cctx = ctx.bumped();
            let bytes = &data[pc_off as usize..pc_off as usize + pass_constraint_len];
            let code = Code::load(true, bytes)
                .map_err(|st| LoadError::new(LoadErrorCode::CodeFailure(st as u8), cctx))?;
            fail_if(!code.immutable(), LoadErrorCode::MutableCCode, cctx)?;
            code
        } else {
            Code::default()
        };

        let mut pass = Pass {
            flags,
            max_loop,
            num_rules,
            num_states,
            num_transition,
            num_success,
            num_columns,
            min_pre_ctxt,
            max_pre_ctxt,
            success_start,
            cols: Vec::new(),
            start_states: Vec::new(),
            transitions: Vec::new(),
            states: Vec::new(),
            rule_map: Vec::new(),
            rules: Vec::new(),
            pass_constraint,
        };

        if num_rules != 0 {
            pass.read_ranges(&data[ranges_pos..], num_ranges, num_glyphs, ctx)?;
            pass.read_rules(
                data,
                rule_map_pos,
                num_entries,
                pre_context_pos,
                sort_keys_pos,
                o_constraint_pos,
                rc_pos,
                o_actions_pos,
                a_pos,
                ctx,
            )?;
            pass.read_states(data, start_states_pos, transitions_pos, rule_map_index_pos, ctx)?;
        }

        debug!(
            target: "pass.load",
            pass = pass_ix,
            rules = num_rules,
            states = num_states,
            columns = num_columns,
            collision_loops = flags & COLLISION_LOOP_MASK,
            "pass loaded"
        );
        Ok(pass)
    }

    fn read_ranges(
        &mut self,
        ranges: &[u8],
        num_ranges: usize,
        num_glyphs: usize,
        ctx: ErrCtx,
    ) -> LoadResult<()> {
        self.cols = vec![NO_COLUMN; num_glyphs];
        for n in 0..num_ranges {
            let first = usize::from(BigEndian::read_u16(&ranges[n * 6..]));
            let last = usize::from(BigEndian::read_u16(&ranges[n * 6 + 2..]));
            let col = BigEndian::read_u16(&ranges[n * 6 + 4..]);
            fail_if(
                first > last || last >= num_glyphs || col >= self.num_columns,
                LoadErrorCode::BadRange,
                ctx.with_index(n),
            )?;
            for cell in &mut self.cols[first..=last] {
                // A glyph belongs to at most one column.
                fail_if(*cell != NO_COLUMN, LoadErrorCode::BadRange, ctx.with_index(n))?;
                *cell = col;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_rules(
        &mut self,
        data: &[u8],
        rule_map_pos: usize,
        num_entries: usize,
        pre_context_pos: usize,
        sort_keys_pos: usize,
        o_constraint_pos: usize,
        rc_pos: usize,
        o_actions_pos: usize,
        a_pos: usize,
        ctx: ErrCtx,
    ) -> LoadResult<()> {
        let num_rules = usize::from(self.num_rules);
        let rc_total = usize::from(BigEndian::read_u16(&data[o_constraint_pos + 2 * num_rules..]));
        let a_total = usize::from(BigEndian::read_u16(&data[o_actions_pos + 2 * num_rules..]));

        // Walk the rules back to front so each rule's code region ends
        // where the next one begins; a zero constraint offset means the
        // rule has no constraint.
        let mut rules: Vec<Option<Rule>> = (0..num_rules).map(|_| None).collect();
        let mut ac_end = a_total;
        let mut rc_end = rc_total;
        for n in (0..num_rules).rev() {
            let rctx = ctx.with_component(Component::ARule).with_index(n);
            let pre_context = data[pre_context_pos + n];
            let sort = BigEndian::read_u16(&data[sort_keys_pos + 2 * n..]);
            fail_if(
                sort > 63
                    || u16::from(pre_context) >= sort
                    || pre_context > self.max_pre_ctxt
                    || pre_context < self.min_pre_ctxt,
                LoadErrorCode::BadCtxtLenBounds,
                rctx,
            )?;

            let ac_begin = usize::from(BigEndian::read_u16(&data[o_actions_pos + 2 * n..]));
            let rc_off = usize::from(BigEndian::read_u16(&data[o_constraint_pos + 2 * n..]));
            let rc_begin = if rc_off != 0 { rc_off } else { rc_end };
            fail_if(
                ac_begin > ac_end || ac_end > a_total || rc_begin > rc_end || rc_end > rc_total,
                LoadErrorCode::BadCCodeLen,
                rctx,
            )?;

            let action = Code::load(false, &data[a_pos + ac_begin..a_pos + ac_end])
                .map_err(|st| LoadError::new(LoadErrorCode::CodeFailure(st as u8), rctx))?;
            let constraint = Code::load(true, &data[rc_pos + rc_begin..rc_pos + rc_end])
                .map_err(|st| LoadError::new(LoadErrorCode::CodeFailure(st as u8), rctx))?;
            fail_if(!constraint.immutable(), LoadErrorCode::MutableCCode, rctx)?;

            rules[n] = Some(Rule {
                pre_context,
                sort,
                constraint,
                action,
            });
            ac_end = ac_begin;
            rc_end = rc_begin;
        }
        self.rules = rules.into_iter().map(|r| r.expect("rule filled")).collect();

        // Rule-entry map: indices into the rule bank.
        let mctx = ctx.with_component(Component::Pass);
        self.rule_map = Vec::with_capacity(num_entries);
        for n in 0..num_entries {
            let rn = BigEndian::read_u16(&data[rule_map_pos + 2 * n..]);
            fail_if(
                usize::from(rn) >= num_rules,
                LoadErrorCode::BadRuleNum,
                mctx.with_index(n),
            )?;
            self.rule_map.push(rn);
        }
        Ok(())
    }

    fn read_states(
        &mut self,
        data: &[u8],
        start_states_pos: usize,
        transitions_pos: usize,
        rule_map_index_pos: usize,
        ctx: ErrCtx,
    ) -> LoadResult<()> {
        let n_starts = usize::from(self.max_pre_ctxt - self.min_pre_ctxt) + 1;
        self.start_states = Vec::with_capacity(n_starts);
        for n in 0..n_starts {
            let s = BigEndian::read_u16(&data[start_states_pos + 2 * n..]);
            fail_if(
                s >= self.num_states,
                LoadErrorCode::BadState,
                ctx.with_component(Component::AStarts).with_index(n),
            )?;
            self.start_states.push(s);
        }

        let n_cells = usize::from(self.num_transition) * usize::from(self.num_columns);
        self.transitions = Vec::with_capacity(n_cells);
        for n in 0..n_cells {
            let t = BigEndian::read_u16(&data[transitions_pos + 2 * n..]);
            fail_if(
                t >= self.num_states,
                LoadErrorCode::BadState,
                ctx.with_component(Component::ATrans)
                    .with_index(n / usize::from(self.num_columns).max(1)),
            )?;
            self.transitions.push(t);
        }

        let num_entries = self.rule_map.len();
        self.states = Vec::with_capacity(usize::from(self.num_states));
        for s in 0..self.num_states {
            if s < self.success_start {
                self.states.push((0, 0));
                continue;
            }
            let k = usize::from(s - self.success_start);
            let begin = usize::from(BigEndian::read_u16(&data[rule_map_index_pos + 2 * k..]));
            let end = usize::from(BigEndian::read_u16(&data[rule_map_index_pos + 2 * (k + 1)..]));
            fail_if(
                begin > num_entries || end > num_entries || begin > end,
                LoadErrorCode::BadRuleMapping,
                ctx.with_component(Component::ARuleMap).with_index(usize::from(s)),
            )?;
            let end = end.min(begin + crate::fsm::MAX_RULES);
            // First-match order: most specific candidates first.
            let rules = &self.rules;
            self.rule_map[begin..end].sort_by_key(|&ri| rules[ri as usize].cmp_key(ri));
            self.states.push((begin as u32, end as u32));
        }
        Ok(())
    }
}
