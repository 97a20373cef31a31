//! Per-participant accumulator: the trials seen so far and the final summary.

use serde::{Deserialize, Serialize};

/// Column order of the trials file.
pub const TRIAL_COLUMNS: [&str; 4] = ["trial", "condition", "result", "reaction_time"];

/// Column order of the summary file.
pub const SUMMARY_COLUMNS: [&str; 7] = [
    "normal_avg",
    "disgust_avg",
    "total_avg",
    "normal_early",
    "disgust_early",
    "normal_wrong",
    "disgust_wrong",
];

/// One timed stimulus-response attempt, exactly as the device reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial: u32,
    pub condition: String,
    pub result: String,
    /// Microseconds.
    pub reaction_time: u64,
}

impl TrialRecord {
    /// The device marks a touch on the wrong target with this result tag.
    pub fn is_wrong(&self) -> bool {
        self.result == "wrong"
    }
}

/// End-of-run report. Averages are microseconds, the rest are counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub normal_avg: u64,
    pub disgust_avg: u64,
    pub total_avg: u64,
    pub normal_early: u32,
    pub disgust_early: u32,
    pub normal_wrong: u32,
    pub disgust_wrong: u32,
}

/// State of the current participant run.
///
/// Trials are append-only and kept in arrival order. The summary is present
/// only between an `end` event and the following reset.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionState {
    trials: Vec<TrialRecord>,
    summary: Option<SessionSummary>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_trial(&mut self, record: TrialRecord) {
        self.trials.push(record);
    }

    /// Attaches the summary, discarding any earlier one.
    pub fn finish(&mut self, summary: SessionSummary) {
        self.summary = Some(summary);
    }

    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty() && self.summary.is_none()
    }

    /// Clears everything for the next participant.
    pub fn reset(&mut self) {
        self.trials.clear();
        self.summary = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(trial: u32, result: &str) -> TrialRecord {
        TrialRecord {
            trial,
            condition: String::from("normal"),
            result: result.to_string(),
            reaction_time: 250_000,
        }
    }

    #[test]
    fn new_state_is_empty() {
        let state = SessionState::new();
        assert!(state.is_empty());
        assert!(state.trials().is_empty());
        assert_eq!(state.summary(), None);
    }

    #[test]
    fn trials_keep_arrival_order() {
        let mut state = SessionState::new();
        state.push_trial(record(2, "success"));
        state.push_trial(record(1, "wrong"));
        state.push_trial(record(3, "success"));

        let order: Vec<u32> = state.trials().iter().map(|t| t.trial).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn second_summary_replaces_first() {
        let mut state = SessionState::new();
        state.finish(SessionSummary {
            normal_avg: 1,
            normal_wrong: 9,
            ..Default::default()
        });
        let replacement = SessionSummary {
            disgust_avg: 2,
            ..Default::default()
        };
        state.finish(replacement);
        assert_eq!(state.summary(), Some(&replacement));
    }

    #[test]
    fn reset_clears_trials_and_summary() {
        let mut state = SessionState::new();
        state.push_trial(record(1, "success"));
        state.finish(SessionSummary::default());
        assert!(!state.is_empty());

        state.reset();
        assert!(state.trials().is_empty());
        assert_eq!(state.summary(), None);
    }

    #[test]
    fn only_wrong_tag_counts_as_wrong() {
        assert!(record(1, "wrong").is_wrong());
        assert!(!record(1, "success").is_wrong());
        assert!(!record(1, "correct").is_wrong());
        assert!(!record(1, "Wrong").is_wrong());
    }
}
