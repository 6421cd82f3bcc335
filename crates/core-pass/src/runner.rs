//! The per-pass main loop: match, constrain, act, advance.

use crate::fsm::Fsm;
use crate::Pass;
use core_collide::collision_avoidance;
use core_slot::{CollisionFlags, SegFlags, Segment, SlotIx, SlotMap};
use core_trace::{PassRecord, RuleConsidered, RuleEvent, RuleOutput, TraceSink};
use core_vm::{Code, Machine, MachineStatus};
use tracing::{debug, trace};

impl Pass {
    /// Run this pass over the segment. `pass_ix` labels trace records; the
    /// sink is an observer only and never alters shaping.
    pub fn run_pass<'a, 'b: 'a>(
        &self,
        seg: &mut Segment,
        fsm: &mut Fsm,
        pass_ix: usize,
        mut sink: Option<&'a mut (dyn TraceSink + 'b)>,
    ) {
        let Some(first) = seg.first() else { return };
        if !self.test_pass_constraint(seg, fsm) {
            debug!(target: "pass.run", pass = pass_ix, "pass constraint rejected");
            return;
        }

        let mut record = sink.as_ref().map(|_| PassRecord {
            pass: pass_ix,
            ..Default::default()
        });

        if self.is_collision_pass() {
            if !seg.flags().contains(SegFlags::INIT_COLLISIONS) {
                seg.position_slots();
            }
            let dir = seg.dir();
            let phases = record.as_mut().map(|r| &mut r.collisions);
            let still_colliding = collision_avoidance(seg, dir, self.collision_loops(), phases);
            if !still_colliding {
                submit(&mut sink, record);
                return;
            }
        }
        if self.num_rules == 0 {
            submit(&mut sink, record);
            return;
        }

        fsm.map.set_highwater(seg.next_of(first));
        let mut lc = i32::from(self.max_loop);
        let mut s = Some(first);
        while let Some(cur) = s {
            if !self.is_collision_pass()
                || seg
                    .collision(cur)
                    .status()
                    .contains(CollisionFlags::ISCOL)
            {
                s = self.find_n_do_rule(seg, fsm, cur, &mut record);
            } else {
                s = seg.next_of(cur);
            }
            if let Some(c) = s {
                let mut reset = Some(c) == fsm.map.highwater() || fsm.map.highpassed();
                if !reset {
                    lc -= 1;
                    reset = lc == 0;
                }
                if reset {
                    if lc == 0 {
                        s = fsm.map.highwater();
                    }
                    lc = i32::from(self.max_loop);
                    if let Some(c) = s {
                        fsm.map.set_highwater(seg.next_of(c));
                    }
                }
            }
        }
        submit(&mut sink, record);
    }

    /// Match at `slot`, pick the first rule whose constraint holds, apply
    /// its action, and return the next cursor position.
    fn find_n_do_rule(
        &self,
        seg: &mut Segment,
        fsm: &mut Fsm,
        slot: SlotIx,
        record: &mut Option<PassRecord>,
    ) -> Option<SlotIx> {
        if self.run_fsm(seg, fsm, slot) {
            let candidates: smallvec::SmallVec<[u16; 32]> =
                fsm.rules.as_slice().iter().copied().collect();
            let mut considered = Vec::new();
            let mut chosen = None;
            for &ri in &candidates {
                if self.test_constraint(seg, &mut fsm.map, ri) {
                    chosen = Some(ri);
                    break;
                }
                if record.is_some() {
                    considered.push(self.considered_event(seg, &fsm.map, ri, true));
                }
            }

            if let Some(ri) = chosen {
                let rule = &self.rules[ri as usize];
                let (adv, out) = do_action(seg, &mut fsm.map, &rule.action);
                let failed = out.is_none() && fsm.map.highwater().is_none() && adv == 0
                    && !rule.action.is_empty();
                if rule.action.deletes() {
                    fsm.map.collect_garbage(seg);
                }
                let out = adjust_slot(seg, &mut fsm.map, out, adv);
                trace!(
                    target: "pass.run",
                    rule = ri,
                    advance = adv,
                    failed,
                    "rule fired"
                );
                if let Some(rec) = record.as_mut() {
                    rec.rules.push(RuleEvent {
                        considered,
                        output: Some(RuleOutput {
                            id: usize::from(ri),
                            start: self.match_start(seg, &fsm.map, ri),
                            length: rule.sort - u16::from(rule.pre_context),
                        }),
                        cursor: out.map(|ix| seg.slot_index(ix)),
                    });
                }
                return out;
            }
            if let Some(rec) = record.as_mut() {
                if !candidates.is_empty() {
                    rec.rules.push(RuleEvent {
                        considered,
                        output: None,
                        cursor: seg.next_of(slot).map(|ix| seg.slot_index(ix)),
                    });
                }
            }
        }
        seg.next_of(slot)
    }

    /// Evaluate a rule's constraint once per covered slot of the window.
    /// A faulted or zero run anywhere rejects the rule.
    fn test_constraint(&self, seg: &mut Segment, map: &mut SlotMap, rule_ix: u16) -> bool {
        let r = &self.rules[rule_ix as usize];
        let context = i32::from(map.context());
        let covered = i32::from(r.sort) - i32::from(r.pre_context);
        if covered > map.size() as i32 - context || context - i32::from(r.pre_context) < 0 {
            return false;
        }
        if r.constraint.is_empty() {
            return true;
        }
        let base = (context - i32::from(r.pre_context)) as usize;
        for n in 0..usize::from(r.sort) {
            let at = base + n;
            if at >= map.size() || map.at(at).is_none() {
                continue;
            }
            let mut machine = Machine::new(seg, map);
            let (ret, _) = machine.run(&r.constraint, at);
            if ret == 0 || machine.status() != MachineStatus::Finished {
                return false;
            }
        }
        true
    }

    /// Evaluate the pass constraint once against the first slot; a false
    /// result skips the whole pass.
    fn test_pass_constraint(&self, seg: &mut Segment, fsm: &mut Fsm) -> bool {
        if self.pass_constraint.is_empty() {
            return true;
        }
        let first = seg.first();
        fsm.map.reset(None, 0);
        fsm.map.push_slot(first);
        let mut machine = Machine::new(seg, &mut fsm.map);
        let (ret, _) = machine.run(&self.pass_constraint, 0);
        let ok = ret != 0 && machine.status() == MachineStatus::Finished;
        trace!(target: "pass.run", constraint = ok, "pass constraint");
        ok
    }

    fn considered_event(
        &self,
        seg: &Segment,
        map: &SlotMap,
        rule_ix: u16,
        failed: bool,
    ) -> RuleConsidered {
        RuleConsidered {
            id: usize::from(rule_ix),
            failed,
            start: self.match_start(seg, map, rule_ix),
            length: self.rules[rule_ix as usize].sort,
        }
    }

    /// Stream index of the first slot a rule's match covers.
    fn match_start(&self, seg: &Segment, map: &SlotMap, rule_ix: u16) -> usize {
        let pre = i32::from(self.rules[rule_ix as usize].pre_context);
        let at = i32::from(map.context()) - pre;
        if at >= 0 {
            if let Some(ix) = map.at(at as usize) {
                return seg.slot_index(ix);
            }
        }
        0
    }
}

/// Run an action program at the window context. A fault clears the cursor
/// and the highwater mark and contributes no advance.
fn do_action(seg: &mut Segment, map: &mut SlotMap, code: &Code) -> (i32, Option<SlotIx>) {
    let context = usize::from(map.context());
    if code.is_empty() {
        return (0, map.at(context));
    }
    map.set_highpassed(false);
    let mut machine = Machine::new(seg, map);
    let (ret, cursor) = machine.run(code, context);
    if machine.status() != MachineStatus::Finished {
        map.set_highwater(None);
        return (0, None);
    }
    (ret, cursor)
}

/// Move the cursor by `delta` stream steps, wrapping from the null cursor
/// to the segment edges and maintaining the highwater/highpassed pair.
fn adjust_slot(
    seg: &Segment,
    map: &mut SlotMap,
    mut slot: Option<SlotIx>,
    mut delta: i32,
) -> Option<SlotIx> {
    if delta < 0 {
        if slot.is_none() {
            slot = seg.last();
            delta += 1;
            if map.highpassed() && map.highwater().is_none() {
                map.set_highpassed(false);
            }
        }
        loop {
            delta += 1;
            if delta > 0 {
                break;
            }
            let Some(cur) = slot else { break };
            if map.highpassed() && map.highwater() == Some(cur) {
                map.set_highpassed(false);
            }
            slot = seg.prev_of(cur);
        }
    } else if delta > 0 {
        if slot.is_none() {
            slot = seg.first();
            delta -= 1;
        }
        loop {
            delta -= 1;
            if delta < 0 {
                break;
            }
            let Some(cur) = slot else { break };
            slot = seg.next_of(cur);
            if slot.is_some() && slot == map.highwater() {
                map.set_highpassed(true);
            }
        }
    }
    slot
}

fn submit<'a, 'b: 'a>(sink: &mut Option<&'a mut (dyn TraceSink + 'b)>, record: Option<PassRecord>) {
    if let (Some(sink), Some(record)) = (sink.as_deref_mut(), record) {
        sink.record_pass(record);
    }
}
