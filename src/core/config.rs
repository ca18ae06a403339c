//! Experiment files and their validated, ready-to-run form.

use crate::block::{BlockId, BlockSpec, BlockTable, RetryPolicy, TransitionRule};
use crate::condition::{ConditionSpec, ConditionTable, ResolveContext, RewardParams};
use crate::error::ConfigError;
use crate::pulse::ChannelId;
use crate::scene::{Point, Size, MAX_TICK_HZ};
use crate::time::{Duration, TimeWindow};
use crate::trial::{TrialOutcome, TrialSettings};
use chrono::NaiveTime;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_name() -> String {
    "session".to_string()
}

fn default_duration() -> f32 {
    5.0
}

fn default_size() -> Size {
    Size::new(200.0, 200.0)
}

fn default_reward_channels() -> Vec<ChannelId> {
    vec![ChannelId(1), ChannelId(2)]
}

fn default_feedback_duration() -> f32 {
    2.0
}

fn default_valid_times() -> Vec<TimeWindow> {
    match (NaiveTime::from_hms_opt(8, 0, 0), NaiveTime::from_hms_opt(18, 0, 0)) {
        (Some(start), Some(end)) => vec![TimeWindow { start, end }],
        _ => Vec::new(),
    }
}

fn default_tick_hz() -> u32 {
    60
}

/// One pulse per magnitude, 1 s for magnitude 1 rising by 0.5 s per step.
fn default_magnitude_mapping() -> HashMap<u8, RewardParams> {
    (1..=5u8)
        .map(|m| {
            (
                m,
                RewardParams {
                    n_pulses: 1,
                    duration_s: 0.5 + 0.5 * m as f32,
                    interpulse_interval_s: 0.2,
                },
            )
        })
        .collect()
}

/// Upper bounds that keep every reward schedule representable.
const MAX_PULSES: u32 = 1_000;
const MAX_PULSE_SECONDS: f32 = 60.0;

const DEFAULT_CENTER: Point = Point::new(640.0, 360.0);

/// An experiment as written on disk (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Response window in seconds.
    #[serde(default = "default_duration")]
    pub duration: f32,

    /// Drawn stimulus size.
    #[serde(default = "default_size")]
    pub size: Size,

    /// Touch box around each stimulus; defaults to 1.5 x `size`.
    #[serde(default)]
    pub bbox: Option<Size>,

    #[serde(default = "default_magnitude_mapping")]
    pub magnitude_mapping: HashMap<u8, RewardParams>,

    /// Stimulus image per magnitude.
    pub items: HashMap<u8, String>,

    /// Named screen positions. `center` places the reward progress bar.
    pub locations: HashMap<String, Point>,

    pub conditions: HashMap<String, ConditionSpec>,

    pub blocks: HashMap<BlockId, BlockSpec>,

    #[serde(default)]
    pub start_block: Option<BlockId>,

    #[serde(default = "default_reward_channels")]
    pub reward_channels: Vec<ChannelId>,

    #[serde(default = "default_feedback_duration")]
    pub error_duration: f32,

    #[serde(default = "default_feedback_duration")]
    pub timeout_duration: f32,

    #[serde(default)]
    pub cue_incorrect: bool,

    #[serde(default = "default_valid_times")]
    pub valid_times: Vec<TimeWindow>,

    /// Fixed seed for condition sampling. Unset: derived from the start time.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

fn seconds(field: &'static str, value: f32) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidTiming { field, value });
    }
    Ok(Duration::from_millis((value * 1000.0).round() as u64))
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Resolve and validate everything the session will need.
    pub fn build(&self) -> Result<Experiment, ConfigError> {
        Experiment::from_config(self)
    }

    /// Two-alternative value staircase over magnitudes 1..=5.
    ///
    /// Blocks `valuediff4` .. `valuediff1` present pairs whose magnitudes
    /// differ by that amount. 15/20 correct moves one step harder, 12/20 holds,
    /// anything less moves one step easier.
    pub fn value_staircase(name: &str) -> Self {
        const MAGNITUDES: std::ops::RangeInclusive<u8> = 1..=5;
        const CENTER: Point = Point::new(540.0, 960.0);
        const OFFSET: f32 = 250.0;

        let magnitude_mapping = MAGNITUDES
            .map(|m| {
                (
                    m,
                    RewardParams {
                        n_pulses: m as u32,
                        duration_s: 1.0,
                        interpulse_interval_s: 0.2,
                    },
                )
            })
            .collect();
        let items = MAGNITUDES
            .map(|m| (m, format!("stimuli/aada{}.png", (b'a' + m - 1) as char)))
            .collect();

        let mut locations = HashMap::new();
        locations.insert("left".to_string(), Point::new(CENTER.x - OFFSET, CENTER.y));
        locations.insert("right".to_string(), Point::new(CENTER.x + OFFSET, CENTER.y));
        locations.insert("center".to_string(), CENTER);

        let mut conditions = HashMap::new();
        for m in MAGNITUDES {
            for loc in ["left", "right"] {
                conditions.insert(
                    format!("f{m}{loc}"),
                    ConditionSpec::Forced {
                        magnitude: m,
                        location: loc.to_string(),
                    },
                );
            }
        }
        for a in MAGNITUDES {
            for b in MAGNITUDES.filter(|&b| b != a) {
                for (l1, l2) in [("left", "right"), ("right", "left")] {
                    conditions.insert(
                        format!("c{a}v{b}_opt1{l1}"),
                        ConditionSpec::Choice {
                            magnitudes: [a, b],
                            locations: [l1.to_string(), l2.to_string()],
                        },
                    );
                }
            }
        }

        let block_id = |d: u8| BlockId::new(format!("valuediff{d}"));
        let mut blocks = HashMap::new();
        for d in (1..=4u8).rev() {
            let mut pool = Vec::new();
            for a in MAGNITUDES {
                if let Some(b) = a.checked_sub(d).filter(|b| MAGNITUDES.contains(b)) {
                    pool.push(format!("c{a}v{b}_opt1left"));
                    pool.push(format!("c{a}v{b}_opt1right"));
                }
            }
            blocks.insert(
                block_id(d),
                BlockSpec {
                    conditions: pool,
                    length: 20,
                    retry: RetryPolicy { timeout: true },
                    transitions: vec![
                        TransitionRule::when(TrialOutcome::Correct, 15, block_id(d.saturating_sub(1).max(1))),
                        TransitionRule::when(TrialOutcome::Correct, 12, block_id(d)),
                        TransitionRule::otherwise(block_id((d + 1).min(4))),
                    ],
                },
            );
        }

        Self {
            name: name.to_string(),
            duration: 10.0,
            size: default_size(),
            bbox: Some(Size::new(300.0, 300.0)),
            magnitude_mapping,
            items,
            locations,
            conditions,
            blocks,
            start_block: Some(block_id(4)),
            reward_channels: default_reward_channels(),
            error_duration: default_feedback_duration(),
            timeout_duration: default_feedback_duration(),
            cue_incorrect: false,
            valid_times: default_valid_times(),
            seed: None,
            tick_hz: default_tick_hz(),
        }
    }
}

/// A validated experiment. Everything here is read-only during a session.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub name: String,
    pub conditions: ConditionTable,
    pub blocks: BlockTable,
    pub settings: TrialSettings,
    pub valid_times: Vec<TimeWindow>,
    pub seed: Option<u64>,
    pub tick_hz: u32,
}

impl Experiment {
    pub fn from_config(cfg: &ExperimentConfig) -> Result<Self, ConfigError> {
        let mut magnitudes: Vec<_> = cfg.magnitude_mapping.iter().collect();
        magnitudes.sort_by_key(|(m, _)| **m);
        for (m, params) in magnitudes {
            if params.n_pulses == 0 {
                return Err(ConfigError::ZeroPulses(*m));
            }
            if params.n_pulses > MAX_PULSES {
                return Err(ConfigError::TooManyPulses {
                    magnitude: *m,
                    n_pulses: params.n_pulses,
                    max: MAX_PULSES,
                });
            }
            seconds("magnitude_mapping.duration", params.duration_s)?;
            if params.duration_s > MAX_PULSE_SECONDS {
                return Err(ConfigError::InvalidTiming {
                    field: "magnitude_mapping.duration",
                    value: params.duration_s,
                });
            }
            let gap = params.interpulse_interval_s;
            if !gap.is_finite() || !(0.0..=MAX_PULSE_SECONDS).contains(&gap) {
                return Err(ConfigError::InvalidTiming {
                    field: "magnitude_mapping.interpulse_interval",
                    value: gap,
                });
            }
        }
        if cfg.tick_hz == 0 || cfg.tick_hz > MAX_TICK_HZ {
            return Err(ConfigError::InvalidTiming {
                field: "tick_hz",
                value: cfg.tick_hz as f32,
            });
        }
        if cfg.reward_channels.is_empty() {
            return Err(ConfigError::NoRewardChannels);
        }

        let conditions = ConditionTable::resolve(
            &cfg.conditions,
            ResolveContext {
                items: &cfg.items,
                locations: &cfg.locations,
                magnitude_mapping: &cfg.magnitude_mapping,
            },
        )?;
        let blocks = BlockTable::build(&cfg.blocks, cfg.start_block.clone(), &conditions)?;

        let settings = TrialSettings {
            response_window: seconds("duration", cfg.duration)?,
            stimulus_size: cfg.size,
            bbox: cfg.bbox.unwrap_or_else(|| cfg.size.scaled(1.5)),
            center: cfg.locations.get("center").copied().unwrap_or(DEFAULT_CENTER),
            reward_channels: cfg.reward_channels.clone(),
            error_duration: seconds("error_duration", cfg.error_duration)?,
            timeout_duration: seconds("timeout_duration", cfg.timeout_duration)?,
            cue_incorrect: cfg.cue_incorrect,
        };

        Ok(Self {
            name: cfg.name.clone(),
            conditions,
            blocks,
            settings,
            valid_times: cfg.valid_times.clone(),
            seed: cfg.seed,
            tick_hz: cfg.tick_hz,
        })
    }
}
