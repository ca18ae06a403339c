//! Adaptive block scheduler.
//!
//! Samples conditions from the active block, tallies outcomes in the block's
//! window and, once the quota is met, follows the first matching transition.

use crate::block::{Block, BlockId, BlockTable, BlockWindow};
use crate::prng::Prng;
use crate::trial::TrialOutcome;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Active,
    /// Quota met with no rule to follow.
    Finished,
    /// Stopped by a quit.
    Halted,
}

/// What the scheduler did with one trial outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduled {
    /// Timeout under a retrying block: not counted, not recorded.
    Retried,
    Counted { completed: u32, length: u32 },
    Transition { from: BlockId, to: BlockId, rule: usize },
    Finished { block: BlockId },
    Halted,
}

#[derive(Debug, Clone)]
pub struct BlockScheduler<'a> {
    table: &'a BlockTable,
    active: &'a Block,
    window: BlockWindow,
    rng: Prng,
    state: SchedulerState,
    retries: u32,
    path: Vec<BlockId>,
}

impl<'a> BlockScheduler<'a> {
    pub fn new(table: &'a BlockTable, seed: u64) -> Self {
        let active = table.resolved(table.start());
        info!(block = %active.id, "block active");
        Self {
            table,
            active,
            window: BlockWindow::with_capacity(active.length as usize),
            rng: Prng::new(seed),
            state: SchedulerState::Active,
            retries: 0,
            path: vec![active.id.clone()],
        }
    }

    pub fn active(&self) -> &'a Block {
        self.active
    }

    pub fn window(&self) -> &BlockWindow {
        &self.window
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Every block activation so far, starting with the start block.
    pub fn path(&self) -> &[BlockId] {
        &self.path
    }

    /// Draw one condition key from the active pool, uniformly and with
    /// replacement. `None` once the scheduler has stopped.
    pub fn sample(&mut self) -> Option<&'a str> {
        if self.state != SchedulerState::Active {
            return None;
        }
        let active = self.active;
        self.rng.choose(&active.conditions).map(String::as_str)
    }

    pub fn halt(&mut self) {
        if self.state == SchedulerState::Active {
            info!(block = %self.active.id, "session halted");
        }
        self.state = SchedulerState::Halted;
    }

    pub fn record(&mut self, outcome: TrialOutcome) -> Scheduled {
        match self.state {
            SchedulerState::Active => {}
            SchedulerState::Halted => return Scheduled::Halted,
            SchedulerState::Finished => {
                return Scheduled::Finished {
                    block: self.active.id.clone(),
                }
            }
        }

        if outcome == TrialOutcome::Quit {
            self.halt();
            return Scheduled::Halted;
        }

        if outcome == TrialOutcome::Timeout && self.active.retry.timeout {
            self.retries += 1;
            debug!(block = %self.active.id, "timeout retried");
            return Scheduled::Retried;
        }

        self.window.push(outcome);
        let completed = self.window.len() as u32;
        if completed < self.active.length {
            return Scheduled::Counted {
                completed,
                length: self.active.length,
            };
        }

        self.transition()
    }

    fn transition(&mut self) -> Scheduled {
        let from = self.active;
        let Some((rule, next)) = from.evaluate(&self.window) else {
            info!(block = %from.id, "no further transition; session complete");
            self.state = SchedulerState::Finished;
            return Scheduled::Finished {
                block: from.id.clone(),
            };
        };

        info!(
            from = %from.id,
            to = %next.next,
            rule,
            correct = self.window.count(TrialOutcome::Correct),
            "block transition"
        );
        self.active = self.table.resolved(&next.next);
        self.window = BlockWindow::with_capacity(self.active.length as usize);
        self.path.push(self.active.id.clone());
        Scheduled::Transition {
            from: from.id.clone(),
            to: self.active.id.clone(),
            rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::forced_conditions;
    use crate::block::{BlockSpec, RetryPolicy, TransitionRule};
    use hashbrown::HashMap;

    fn spec(conditions: &[&str], length: u32, retry: bool, transitions: Vec<TransitionRule>) -> BlockSpec {
        BlockSpec {
            conditions: conditions.iter().map(|c| c.to_string()).collect(),
            length,
            retry: RetryPolicy { timeout: retry },
            transitions,
        }
    }

    fn table(blocks: Vec<(&str, BlockSpec)>, start: &str) -> BlockTable {
        let conds = forced_conditions(&["f3left", "f3right", "f1left"]);
        let specs: HashMap<BlockId, BlockSpec> = blocks.into_iter().map(|(id, s)| (BlockId::from(id), s)).collect();
        BlockTable::build(&specs, Some(start.into()), &conds).unwrap()
    }

    use TrialOutcome::{Correct as C, Incorrect as I, Quit as Q, Timeout as T};

    #[test]
    fn retry_on_timeout_counts_only_real_outcomes() {
        let t = table(
            vec![
                ("warmup", spec(&["f3left", "f3right"], 10, true, vec![TransitionRule::otherwise("next")])),
                ("next", spec(&["f1left"], 1, false, vec![])),
            ],
            "warmup",
        );
        let mut s = BlockScheduler::new(&t, 1);

        let first_ten = [C, C, T, C, C, C, T, C, C, C];
        for o in first_ten {
            assert!(s.sample().is_some());
            assert!(!matches!(s.record(o), Scheduled::Transition { .. }));
        }
        assert_eq!(s.active().id.as_str(), "warmup");
        assert_eq!(s.window().len(), 8);
        assert_eq!(s.retries(), 2);

        assert_eq!(s.record(C), Scheduled::Counted { completed: 9, length: 10 });
        assert_eq!(s.record(T), Scheduled::Retried);
        assert_eq!(
            s.record(I),
            Scheduled::Transition {
                from: "warmup".into(),
                to: "next".into(),
                rule: 0,
            }
        );
        assert!(s.window().is_empty());
    }

    #[test]
    fn timeouts_count_without_retry() {
        let t = table(vec![("b", spec(&["f3left"], 3, false, vec![]))], "b");
        let mut s = BlockScheduler::new(&t, 1);
        assert_eq!(s.record(T), Scheduled::Counted { completed: 1, length: 3 });
        assert_eq!(s.record(T), Scheduled::Counted { completed: 2, length: 3 });
        assert_eq!(s.retries(), 0);
        assert_eq!(s.record(T), Scheduled::Finished { block: "b".into() });
        assert_eq!(s.state(), SchedulerState::Finished);
        assert_eq!(s.sample(), None);
    }

    #[test]
    fn self_loop_resets_window_and_keeps_pool() {
        let t = table(
            vec![(
                "hold",
                spec(
                    &["f3left", "f3right"],
                    4,
                    false,
                    vec![TransitionRule::when(C, 4, "done"), TransitionRule::otherwise("hold")],
                ),
            ),
            ("done", spec(&["f1left"], 1, false, vec![]))],
            "hold",
        );
        let mut s = BlockScheduler::new(&t, 9);
        for o in [C, I, C, C] {
            s.record(o);
        }
        assert_eq!(s.active().id.as_str(), "hold");
        assert!(s.window().is_empty());
        assert_eq!(s.active().conditions, vec!["f3left".to_string(), "f3right".to_string()]);
        assert_eq!(s.path().len(), 2);

        for o in [C, C, C, C] {
            s.record(o);
        }
        assert_eq!(s.active().id.as_str(), "done");
    }

    #[test]
    fn staircase_picks_first_matching_rule() {
        let rules = |up: &str, here: &str, down: &str| {
            vec![
                TransitionRule::when(C, 15, up),
                TransitionRule::when(C, 12, here),
                TransitionRule::otherwise(down),
            ]
        };
        let t = table(
            vec![
                ("A", spec(&["f1left"], 20, false, vec![])),
                ("B", spec(&["f3left"], 20, false, rules("A", "B", "C"))),
                ("C", spec(&["f3right"], 20, false, vec![])),
            ],
            "B",
        );
        let mut s = BlockScheduler::new(&t, 5);
        let mut last = None;
        for i in 0..20 {
            last = Some(s.record(if i < 13 { C } else { I }));
        }
        assert_eq!(
            last,
            Some(Scheduled::Transition {
                from: "B".into(),
                to: "B".into(),
                rule: 1,
            })
        );
    }

    #[test]
    fn quit_halts_without_evaluating() {
        let t = table(
            vec![("b", spec(&["f3left"], 2, false, vec![TransitionRule::otherwise("b")]))],
            "b",
        );
        let mut s = BlockScheduler::new(&t, 1);
        s.record(C);
        assert_eq!(s.record(Q), Scheduled::Halted);
        assert_eq!(s.state(), SchedulerState::Halted);
        assert_eq!(s.window().len(), 1);
        assert_eq!(s.sample(), None);
        assert_eq!(s.record(C), Scheduled::Halted);
        assert_eq!(s.path().len(), 1);
    }

    #[test]
    fn same_seed_same_draws() {
        let t = table(
            vec![("b", spec(&["f3left", "f3right", "f1left"], 50, false, vec![]))],
            "b",
        );
        let mut a = BlockScheduler::new(&t, 77);
        let mut b = BlockScheduler::new(&t, 77);
        let draws_a: Vec<_> = (0..50).map(|_| a.sample()).collect();
        let draws_b: Vec<_> = (0..50).map(|_| b.sample()).collect();
        assert_eq!(draws_a, draws_b);
        // Drawn with replacement: 50 draws from a pool of 3 must repeat.
        assert!(draws_a.iter().filter(|d| **d == Some("f3left")).count() > 1);
    }
}
