use crate::trial::TrialOutcome;
use serde::Serialize;
use std::collections::VecDeque;

const RECENT_CAPACITY: usize = 200;

/// Running performance over the trials a session recorded.
///
/// Timeouts are tallied but left out of the accuracy figures, which only look
/// at trials where the subject actually chose.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeStats {
    pub correct: u32,
    pub incorrect: u32,
    pub timeouts: u32,
    pub trials: u32,
    #[serde(skip)]
    recent: VecDeque<bool>,
    pub learning_at_trial: Option<u32>,
    pub learned_at_trial: Option<u32>,
    pub mastered_at_trial: Option<u32>,
}

impl OutcomeStats {
    pub fn new() -> Self {
        Self {
            correct: 0,
            incorrect: 0,
            timeouts: 0,
            trials: 0,
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            learning_at_trial: None,
            learned_at_trial: None,
            mastered_at_trial: None,
        }
    }

    fn update_milestones(&mut self) {
        // Gate on a minimum number of choices to avoid "instant" mastery on tiny samples.
        if self.recent.len() < 20 {
            return;
        }

        let r = self.last_100_rate();
        if self.learning_at_trial.is_none() && r >= 0.70 {
            self.learning_at_trial = Some(self.trials);
        }
        if self.learned_at_trial.is_none() && r >= 0.85 {
            self.learned_at_trial = Some(self.trials);
        }
        if self.mastered_at_trial.is_none() && r >= 0.95 {
            self.mastered_at_trial = Some(self.trials);
        }
    }

    pub fn record(&mut self, outcome: TrialOutcome) {
        let is_correct = match outcome {
            TrialOutcome::Correct => {
                self.correct += 1;
                true
            }
            TrialOutcome::Incorrect => {
                self.incorrect += 1;
                false
            }
            TrialOutcome::Timeout => {
                self.timeouts += 1;
                self.trials += 1;
                return;
            }
            TrialOutcome::Quit => return,
        };

        self.recent.push_back(is_correct);
        if self.recent.len() > RECENT_CAPACITY {
            self.recent.pop_front();
        }

        self.trials += 1;
        self.update_milestones();
    }

    pub fn accuracy(&self) -> f32 {
        let total = self.correct + self.incorrect;
        if total == 0 {
            0.5
        } else {
            self.correct as f32 / total as f32
        }
    }

    pub fn recent_rate(&self) -> f32 {
        if self.recent.is_empty() {
            return 0.5;
        }
        let correct_count = self.recent.iter().filter(|&&x| x).count();
        correct_count as f32 / self.recent.len() as f32
    }

    pub fn last_100_rate(&self) -> f32 {
        if self.recent.len() < 10 {
            return self.recent_rate();
        }
        let skip = self.recent.len().saturating_sub(100);
        let slice: Vec<bool> = self.recent.iter().skip(skip).copied().collect();
        let correct_count = slice.iter().filter(|&&x| x).count();
        correct_count as f32 / slice.len() as f32
    }
}

impl Default for OutcomeStats {
    fn default() -> Self {
        Self::new()
    }
}
