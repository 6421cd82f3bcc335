//! Structured shaping trace: one record per pass, carrying the rules that
//! were considered or fired and the collision moves that were applied.
//!
//! The sink is strictly an observer. Shaping never branches on whether a
//! sink is installed; the runner only skips building records when nobody is
//! listening.

use serde::Serialize;

/// A rule the matcher offered at some cursor position.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleConsidered {
    /// Rule index within its pass.
    pub id: usize,
    /// Whether the rule's constraint rejected it.
    pub failed: bool,
    /// Stream index of the first matched slot.
    pub start: usize,
    /// Match length in slots.
    pub length: u16,
}

/// The rule that fired and where the cursor went afterwards.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleOutput {
    pub id: usize,
    /// Stream index range rewritten by the action.
    pub start: usize,
    pub length: u16,
}

/// One cursor position's worth of rule matching.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleEvent {
    pub considered: Vec<RuleConsidered>,
    pub output: Option<RuleOutput>,
    /// Stream index of the cursor after the event, if still in the stream.
    pub cursor: Option<usize>,
}

/// One applied collision adjustment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollisionMove {
    /// Stream index of the adjusted slot.
    pub slot: usize,
    pub x: f32,
    pub y: f32,
}

/// One collider phase within a pass.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollisionPhase {
    /// "1", "2a", "2b", or "3".
    pub phase: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u8>,
    pub moves: Vec<CollisionMove>,
}

/// Everything one pass did to the segment.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct PassRecord {
    pub pass: usize,
    pub rules: Vec<RuleEvent>,
    pub collisions: Vec<CollisionPhase>,
}

/// Receiver for pass records.
pub trait TraceSink {
    fn record_pass(&mut self, record: PassRecord);
}

/// Sink that retains every record; used by tests and the JSON emitter.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<PassRecord>,
}

impl TraceSink for VecSink {
    fn record_pass(&mut self, record: PassRecord) {
        self.records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_serialize_to_json() {
        let rec = PassRecord {
            pass: 1,
            rules: vec![RuleEvent {
                considered: vec![RuleConsidered {
                    id: 0,
                    failed: true,
                    start: 0,
                    length: 2,
                }],
                output: Some(RuleOutput {
                    id: 1,
                    start: 0,
                    length: 2,
                }),
                cursor: Some(2),
            }],
            collisions: vec![CollisionPhase {
                phase: "1",
                iteration: None,
                moves: vec![CollisionMove {
                    slot: 1,
                    x: -3.0,
                    y: 0.0,
                }],
            }],
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"pass\":1"));
        assert!(json.contains("\"phase\":\"1\""));
        assert!(!json.contains("iteration"));
    }

    #[test]
    fn vec_sink_accumulates() {
        let mut sink = VecSink::default();
        sink.record_pass(PassRecord::default());
        sink.record_pass(PassRecord {
            pass: 1,
            ..Default::default()
        });
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[1].pass, 1);
    }
}
