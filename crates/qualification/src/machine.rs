//! The qualification state machine.

use std::collections::BTreeMap;

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

/// A step on the qualification ladder. Ordered; `Qualified` is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Situation,
    Problem,
    Implication,
    NeedPayoff,
    Qualified,
}

impl Stage {
    /// The stage after this one, or `None` from the terminal stage.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Situation => Some(Self::Problem),
            Self::Problem => Some(Self::Implication),
            Self::Implication => Some(Self::NeedPayoff),
            Self::NeedPayoff => Some(Self::Qualified),
            Self::Qualified => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Qualified
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Situation => "situation",
            Self::Problem => "problem",
            Self::Implication => "implication",
            Self::NeedPayoff => "needPayoff",
            Self::Qualified => "qualified",
        }
    }
}

/// One free-text answer collected for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageAnswer {
    pub text: String,
    pub recorded_at_ms: u64,
}

/// Collection progress for a single non-terminal stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    pub answers: Vec<StageAnswer>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_answered_at_ms: Option<u64>,
}

/// Qualification state of one conversation.
///
/// Mutated only through the methods below; a [`ConversationSnapshot`] is the
/// read surface and always reflects the last fully-applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualificationState {
    stage: Stage,
    stages: BTreeMap<Stage, StageProgress>,
    score: u8,
    last_activity_at_ms: u64,
}

/// Read-only copy of a conversation's qualification state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub stage: Stage,
    pub stages: BTreeMap<Stage, StageProgress>,
    pub score: u8,
    pub last_activity_at_ms: u64,
}

impl QualificationState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            stage: Stage::Situation,
            stages: BTreeMap::new(),
            score: 0,
            last_activity_at_ms: now_ms,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    /// Append an answer to `stage`'s collection.
    ///
    /// Recording against a stage behind or ahead of the current one never
    /// moves `stage`; the reply collaborator may back-fill earlier stages,
    /// and the machine stays monotonic regardless.
    pub fn record_answer(&mut self, stage: Stage, text: impl Into<String>, now_ms: u64) {
        if stage.is_terminal() {
            debug!("ignoring answer recorded against the terminal stage");
            return;
        }
        let progress = self.stages.entry(stage).or_default();
        progress.answers.push(StageAnswer {
            text: text.into(),
            recorded_at_ms: now_ms,
        });
        progress.last_answered_at_ms = Some(now_ms);
        self.last_activity_at_ms = now_ms;
    }

    /// Record the collaborator's judgment that `stage`'s collection criteria
    /// are satisfied. The machine never judges answer text itself.
    pub fn mark_completed(&mut self, stage: Stage) {
        if stage.is_terminal() {
            return;
        }
        self.stages.entry(stage).or_default().completed = true;
    }

    /// Move to the next stage if the current one is completed.
    ///
    /// Returns `true` if the stage changed. From `Qualified`, or with an
    /// incomplete current stage, this is a no-op: malformed transitions are
    /// rejected silently to keep the machine monotonic and crash-safe.
    pub fn advance(&mut self, now_ms: u64) -> bool {
        let Some(next) = self.stage.next() else {
            return false;
        };
        let completed = self
            .stages
            .get(&self.stage)
            .is_some_and(|progress| progress.completed);
        if !completed {
            return false;
        }
        debug!(from = self.stage.as_str(), to = next.as_str(), "stage advanced");
        self.stage = next;
        self.last_activity_at_ms = now_ms;
        true
    }

    /// Set the numeric qualification score, clamped to [0, 100].
    pub fn set_score(&mut self, score: u8) {
        self.score = score.min(100);
    }

    /// Explicit restart, the one allowed regression. Collected answers and
    /// score are discarded; used when a conversation is superseded.
    pub fn reset(&mut self, now_ms: u64) {
        *self = Self::new(now_ms);
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            stage: self.stage,
            stages: self.stages.clone(),
            score: self.score,
            last_activity_at_ms: self.last_activity_at_ms,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(Stage::Situation, Some(Stage::Problem))]
    #[case(Stage::Problem, Some(Stage::Implication))]
    #[case(Stage::Implication, Some(Stage::NeedPayoff))]
    #[case(Stage::NeedPayoff, Some(Stage::Qualified))]
    #[case(Stage::Qualified, None)]
    fn stage_ladder(#[case] stage: Stage, #[case] expected: Option<Stage>) {
        assert_eq!(stage.next(), expected);
    }

    #[test]
    fn advance_requires_completion() {
        let mut state = QualificationState::new(0);
        state.record_answer(Stage::Situation, "we run a shop", 1);
        assert!(!state.advance(2));
        assert_eq!(state.stage(), Stage::Situation);

        state.mark_completed(Stage::Situation);
        assert!(state.advance(3));
        assert_eq!(state.stage(), Stage::Problem);
    }

    #[test]
    fn completed_stage_answers_survive_advance() {
        let mut state = QualificationState::new(0);
        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            state.record_answer(Stage::Situation, *text, i as u64);
        }
        state.mark_completed(Stage::Situation);
        assert!(state.advance(10));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.stage, Stage::Problem);
        assert_eq!(snapshot.stages[&Stage::Situation].answers.len(), 3);
        assert_eq!(snapshot.stages[&Stage::Situation].answers[0].text, "a");
    }

    #[test]
    fn advance_from_qualified_is_noop() {
        let mut state = QualificationState::new(0);
        for stage in [
            Stage::Situation,
            Stage::Problem,
            Stage::Implication,
            Stage::NeedPayoff,
        ] {
            state.mark_completed(stage);
            assert!(state.advance(1));
        }
        assert_eq!(state.stage(), Stage::Qualified);
        assert!(!state.advance(2));
        assert_eq!(state.stage(), Stage::Qualified);
    }

    #[test]
    fn recording_behind_does_not_regress() {
        let mut state = QualificationState::new(0);
        state.mark_completed(Stage::Situation);
        state.advance(1);
        assert_eq!(state.stage(), Stage::Problem);

        state.record_answer(Stage::Situation, "late detail", 2);
        assert_eq!(state.stage(), Stage::Problem);
        assert_eq!(state.snapshot().stages[&Stage::Situation].answers.len(), 1);
    }

    #[test]
    fn recording_ahead_does_not_skip() {
        let mut state = QualificationState::new(0);
        state.record_answer(Stage::Implication, "early jump", 1);
        assert_eq!(state.stage(), Stage::Situation);
    }

    #[test]
    fn terminal_stage_collects_nothing() {
        let mut state = QualificationState::new(0);
        state.record_answer(Stage::Qualified, "noise", 1);
        assert!(state.snapshot().stages.is_empty());
        state.mark_completed(Stage::Qualified);
        assert!(state.snapshot().stages.is_empty());
    }

    #[test]
    fn score_is_clamped() {
        let mut state = QualificationState::new(0);
        state.set_score(250);
        assert_eq!(state.score(), 100);
        state.set_score(73);
        assert_eq!(state.score(), 73);
    }

    #[test]
    fn reset_restarts_the_ladder() {
        let mut state = QualificationState::new(0);
        state.record_answer(Stage::Situation, "a", 1);
        state.mark_completed(Stage::Situation);
        state.advance(2);
        state.set_score(40);

        state.reset(100);
        assert_eq!(state.stage(), Stage::Situation);
        assert_eq!(state.score(), 0);
        assert!(state.snapshot().stages.is_empty());
        assert_eq!(state.snapshot().last_activity_at_ms, 100);
    }

    #[test]
    fn record_answer_bumps_activity() {
        let mut state = QualificationState::new(0);
        state.record_answer(Stage::Situation, "a", 42);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.last_activity_at_ms, 42);
        assert_eq!(
            snapshot.stages[&Stage::Situation].last_answered_at_ms,
            Some(42)
        );
    }

    #[test]
    fn state_roundtrips_through_json() {
        let mut state = QualificationState::new(0);
        state.record_answer(Stage::Situation, "we sell shoes", 1);
        state.mark_completed(Stage::Situation);
        state.advance(2);

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"problem\""));
        let back: QualificationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
