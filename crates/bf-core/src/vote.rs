//! # Vote reconciliation
//!
//! Given the voter's current record (if any) and the requested value, decide
//! what happens to the record and how the subject's aggregate counters move.
//! Pure: stores apply the resulting [`VoteTransition`] atomically.

use serde::{Deserialize, Serialize};

use crate::error::ForumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    pub fn as_i64(self) -> i64 {
        match self {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            VoteValue::Up => VoteValue::Down,
            VoteValue::Down => VoteValue::Up,
        }
    }
}

impl TryFrom<i64> for VoteValue {
    type Error = ForumError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteValue::Up),
            -1 => Ok(VoteValue::Down),
            other => Err(ForumError::Validation(format!("vote must be 1 or -1, got {other}"))),
        }
    }
}

impl From<VoteValue> for i64 {
    fn from(value: VoteValue) -> Self {
        value.as_i64()
    }
}

/// Materialized aggregate of every vote record on a subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub vote_count: i64,
    pub upvotes: i64,
    pub downvotes: i64,
}

impl VoteTally {
    pub fn apply(&mut self, delta: CounterDelta) {
        self.vote_count += delta.vote_count;
        self.upvotes += delta.upvotes;
        self.downvotes += delta.downvotes;
    }

    /// `vote_count == upvotes - downvotes`
    pub fn is_consistent(&self) -> bool {
        self.vote_count == self.upvotes - self.downvotes && self.upvotes >= 0 && self.downvotes >= 0
    }
}

/// Signed adjustments to a subject's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub vote_count: i64,
    pub upvotes: i64,
    pub downvotes: i64,
}

impl CounterDelta {
    fn polarity(value: VoteValue, by: i64) -> Self {
        match value {
            VoteValue::Up => Self { upvotes: by, ..Self::default() },
            VoteValue::Down => Self { downvotes: by, ..Self::default() },
        }
    }
}

/// What to do with the voter's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordChange {
    Create(VoteValue),
    Flip(VoteValue),
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTransition {
    /// Record value the decision was made from; stores re-check it on commit.
    pub previous: Option<VoteValue>,
    pub record: RecordChange,
    pub delta: CounterDelta,
}

impl VoteTransition {
    /// The voter's effective vote once the transition is committed.
    pub fn outcome(&self) -> Option<VoteValue> {
        match self.record {
            RecordChange::Create(v) | RecordChange::Flip(v) => Some(v),
            RecordChange::Remove => None,
        }
    }
}

pub fn reconcile(existing: Option<VoteValue>, requested: VoteValue) -> VoteTransition {
    let v = requested.as_i64();
    let (record, delta) = match existing {
        None => {
            let mut delta = CounterDelta::polarity(requested, 1);
            delta.vote_count = v;
            (RecordChange::Create(requested), delta)
        }
        Some(current) if current == requested => {
            let mut delta = CounterDelta::polarity(requested, -1);
            delta.vote_count = -v;
            (RecordChange::Remove, delta)
        }
        Some(current) => {
            let gained = CounterDelta::polarity(requested, 1);
            let lost = CounterDelta::polarity(current, -1);
            let delta = CounterDelta {
                vote_count: 2 * v,
                upvotes: gained.upvotes + lost.upvotes,
                downvotes: gained.downvotes + lost.downvotes,
            };
            (RecordChange::Flip(requested), delta)
        }
    };

    VoteTransition {
        previous: existing,
        record,
        delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs a voter's requests against a single subject, returning outcomes.
    fn replay(requests: &[VoteValue]) -> (Vec<Option<VoteValue>>, VoteTally) {
        let mut record = None;
        let mut tally = VoteTally::default();
        let mut outcomes = Vec::new();
        for &requested in requests {
            let transition = reconcile(record, requested);
            tally.apply(transition.delta);
            assert!(tally.is_consistent(), "tally drifted: {tally:?}");
            record = transition.outcome();
            outcomes.push(record);
        }
        (outcomes, tally)
    }

    #[test]
    fn repeated_same_vote_toggles_off() {
        let (outcomes, tally) = replay(&[VoteValue::Up, VoteValue::Up, VoteValue::Down, VoteValue::Down]);
        assert_eq!(outcomes, vec![Some(VoteValue::Up), None, Some(VoteValue::Down), None]);
        assert_eq!(tally, VoteTally::default());
    }

    #[test]
    fn alternating_votes_flip_and_stay_consistent() {
        let (outcomes, tally) = replay(&[VoteValue::Up, VoteValue::Down, VoteValue::Up, VoteValue::Down]);
        assert_eq!(
            outcomes,
            vec![Some(VoteValue::Up), Some(VoteValue::Down), Some(VoteValue::Up), Some(VoteValue::Down)]
        );
        assert_eq!(tally, VoteTally { vote_count: -1, upvotes: 0, downvotes: 1 });
    }

    #[test]
    fn flip_moves_vote_count_by_two() {
        let up_to_down = reconcile(Some(VoteValue::Up), VoteValue::Down);
        assert_eq!(up_to_down.delta, CounterDelta { vote_count: -2, upvotes: -1, downvotes: 1 });
        assert_eq!(up_to_down.record, RecordChange::Flip(VoteValue::Down));

        let down_to_up = reconcile(Some(VoteValue::Down), VoteValue::Up);
        assert_eq!(down_to_up.delta, CounterDelta { vote_count: 2, upvotes: 1, downvotes: -1 });
    }

    #[test]
    fn removing_a_downvote_restores_counters() {
        let t = reconcile(Some(VoteValue::Down), VoteValue::Down);
        assert_eq!(t.record, RecordChange::Remove);
        assert_eq!(t.outcome(), None);
        assert_eq!(t.delta, CounterDelta { vote_count: 1, upvotes: 0, downvotes: -1 });
    }

    #[test]
    fn upvote_toggle_then_downvote_scenario() {
        let (outcomes, tally) = replay(&[VoteValue::Up, VoteValue::Up, VoteValue::Down]);
        assert_eq!(outcomes, vec![Some(VoteValue::Up), None, Some(VoteValue::Down)]);
        assert_eq!(tally, VoteTally { vote_count: -1, upvotes: 0, downvotes: 1 });
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert_eq!(VoteValue::try_from(1).unwrap(), VoteValue::Up);
        assert_eq!(VoteValue::try_from(-1).unwrap(), VoteValue::Down);
        assert!(matches!(VoteValue::try_from(0), Err(ForumError::Validation(_))));
        assert!(serde_json::from_str::<VoteValue>("2").is_err());
        assert_eq!(serde_json::to_string(&VoteValue::Down).unwrap(), "-1");
    }
}
