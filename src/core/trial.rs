//! A single trial: present targets, resolve the choice, run one follow-up.
//!
//! Forced and two-alternative trials share this state machine; they differ
//! only in how many options the condition carries and which one is correct.

use crate::adapters::{ChoiceDetector, ProgressStyle, RewardDelivery, RewardPulseAdapter, TimeCounter};
use crate::condition::{Condition, TrialOption, TrialShape};
use crate::pulse::{ChannelId, PulseBus};
use crate::scene::{Point, RenderItem, Rgb, Scene, SceneResult, SceneRunner, Size, Surface, TargetId};
use crate::time::{Clock, Duration};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Correct,
    Incorrect,
    Timeout,
    Quit,
}

impl TrialOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialOutcome::Correct => "correct",
            TrialOutcome::Incorrect => "incorrect",
            TrialOutcome::Timeout => "timeout",
            TrialOutcome::Quit => "quit",
        }
    }
}

impl fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-experiment presentation and feedback parameters shared by all trials.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSettings {
    pub response_window: Duration,
    pub stimulus_size: Size,
    /// Touch box around each stimulus.
    pub bbox: Size,
    /// Where the reward progress bar is drawn.
    pub center: Point,
    pub reward_channels: Vec<ChannelId>,
    pub error_duration: Duration,
    pub timeout_duration: Duration,
    /// When set, an incorrect choice shows the error screen instead of
    /// paying out the chosen option's reward.
    pub cue_incorrect: bool,
}

impl Default for TrialSettings {
    fn default() -> Self {
        let stimulus_size = Size::new(200.0, 200.0);
        Self {
            response_window: Duration::from_secs(5),
            stimulus_size,
            bbox: stimulus_size.scaled(1.5),
            center: Point::new(640.0, 360.0),
            reward_channels: vec![ChannelId(1), ChannelId(2)],
            error_duration: Duration::from_secs(2),
            timeout_duration: Duration::from_secs(2),
            cue_incorrect: false,
        }
    }
}

/// Everything a trial drives while it runs.
pub struct TrialContext<'a> {
    pub runner: &'a SceneRunner,
    pub surface: &'a mut dyn Surface,
    pub clock: &'a mut dyn Clock,
    pub pulses: &'a PulseBus,
    pub settings: &'a TrialSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub outcome: TrialOutcome,
    /// `false` once any scene of this trial saw a quit.
    pub continue_session: bool,
    pub selection: Option<TargetId>,
    pub reward: Option<RewardDelivery>,
}

#[derive(Debug)]
enum TrialPhase {
    Presenting,
    Resolving(SceneResult),
    FollowUp(TrialOutcome),
    Done(TrialOutcome),
}

/// Map the presentation scene's result to an outcome.
pub fn resolve_outcome(condition: &Condition, result: &SceneResult) -> TrialOutcome {
    if result.quit {
        return TrialOutcome::Quit;
    }
    let Some(selected) = result.selection else {
        return TrialOutcome::Timeout;
    };
    match &condition.shape {
        TrialShape::Forced { option } if selected == option.target => TrialOutcome::Correct,
        TrialShape::Forced { .. } => TrialOutcome::Timeout,
        TrialShape::Choice { correct, .. } if selected == *correct => TrialOutcome::Correct,
        TrialShape::Choice { .. } => TrialOutcome::Incorrect,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Trial<'a> {
    condition: &'a Condition,
}

impl<'a> Trial<'a> {
    pub fn new(condition: &'a Condition) -> Self {
        Self { condition }
    }

    pub fn condition(&self) -> &'a Condition {
        self.condition
    }

    fn render_items(&self, size: Size) -> Vec<RenderItem> {
        self.condition
            .options()
            .iter()
            .map(|o| RenderItem {
                target: o.target,
                stimulus: o.stimulus.clone(),
                position: o.position,
                size,
            })
            .collect()
    }

    pub fn run(&self, ctx: &mut TrialContext<'_>) -> TrialResult {
        let mut phase = TrialPhase::Presenting;
        let mut quit_seen = false;
        let mut selection = None;
        let mut reward = None;

        loop {
            phase = match phase {
                TrialPhase::Presenting => {
                    let mut detector =
                        ChoiceDetector::new(self.render_items(ctx.settings.stimulus_size), ctx.settings.bbox);
                    let result = ctx.runner.run(
                        Scene {
                            adapter: &mut detector,
                            time_limit: ctx.settings.response_window,
                            background: Rgb::GREY,
                        },
                        &mut *ctx.surface,
                        &mut *ctx.clock,
                    );
                    TrialPhase::Resolving(result)
                }
                TrialPhase::Resolving(result) => {
                    selection = result.selection;
                    let outcome = resolve_outcome(self.condition, &result);
                    debug!(condition = %self.condition.key, %outcome, "trial resolved");
                    if outcome == TrialOutcome::Quit {
                        quit_seen = true;
                        TrialPhase::Done(outcome)
                    } else {
                        TrialPhase::FollowUp(outcome)
                    }
                }
                TrialPhase::FollowUp(outcome) => {
                    let (result, delivery) = self.follow_up(outcome, selection, ctx);
                    reward = delivery;
                    if result.quit {
                        quit_seen = true;
                    }
                    TrialPhase::Done(outcome)
                }
                TrialPhase::Done(outcome) => {
                    return TrialResult {
                        outcome,
                        continue_session: !quit_seen,
                        selection,
                        reward,
                    };
                }
            };
        }
    }

    /// Run the single scene that follows a resolved (non-quit) outcome.
    fn follow_up(
        &self,
        outcome: TrialOutcome,
        selection: Option<TargetId>,
        ctx: &mut TrialContext<'_>,
    ) -> (SceneResult, Option<RewardDelivery>) {
        let chosen = selection.and_then(|t| self.condition.option(t));
        match (outcome, chosen) {
            (TrialOutcome::Correct, Some(option)) => self.reward_scene(option, ctx),
            (TrialOutcome::Incorrect, Some(option)) if !ctx.settings.cue_incorrect => self.reward_scene(option, ctx),
            (TrialOutcome::Incorrect, _) => (
                Self::cue_scene(ctx.settings.error_duration, Rgb::RED, ctx),
                None,
            ),
            (TrialOutcome::Quit, _) => (SceneResult::default(), None),
            _ => (
                Self::cue_scene(ctx.settings.timeout_duration, Rgb::BLUE, ctx),
                None,
            ),
        }
    }

    fn reward_scene(&self, option: &TrialOption, ctx: &mut TrialContext<'_>) -> (SceneResult, Option<RewardDelivery>) {
        let lease = ctx.pulses.acquire(&ctx.settings.reward_channels);
        if let Err(e) = &lease {
            warn!(condition = %self.condition.key, "reward skipped: {}", e);
        }
        let mut adapter = RewardPulseAdapter::new(
            option.magnitude,
            option.reward,
            lease,
            ProgressStyle::centred_at(ctx.settings.center),
        );
        let result = ctx.runner.run(
            Scene {
                adapter: &mut adapter,
                time_limit: option.reward.total(),
                background: Rgb::GREEN,
            },
            &mut *ctx.surface,
            &mut *ctx.clock,
        );
        (result, Some(adapter.delivery()))
    }

    fn cue_scene(duration: Duration, background: Rgb, ctx: &mut TrialContext<'_>) -> SceneResult {
        let mut adapter = TimeCounter::new();
        ctx.runner.run(
            Scene {
                adapter: &mut adapter,
                time_limit: duration,
                background,
            },
            &mut *ctx.surface,
            &mut *ctx.clock,
        )
    }
}
