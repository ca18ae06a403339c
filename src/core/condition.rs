//! Conditions: named, immutable trial parameterisations.
//!
//! Conditions are written in the experiment file as a shape tag plus
//! magnitude and location keys ([`ConditionSpec`]) and resolved once, at load,
//! into [`Condition`]s that carry stimulus paths, screen positions and reward
//! schedules. The session only ever reads the resolved table.

use crate::error::ConfigError;
use crate::scene::{Point, TargetId};
use crate::time::Duration;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Reward schedule for one magnitude. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardParams {
    pub n_pulses: u32,
    #[serde(rename = "duration")]
    pub duration_s: f32,
    #[serde(rename = "interpulse_interval", default = "default_interpulse_interval")]
    pub interpulse_interval_s: f32,
}

fn default_interpulse_interval() -> f32 {
    0.2
}

fn millis(seconds: f32) -> Duration {
    Duration::from_millis((seconds.max(0.0) * 1000.0).round() as u64)
}

impl RewardParams {
    pub fn pulse_duration(&self) -> Duration {
        millis(self.duration_s)
    }

    pub fn interpulse_interval(&self) -> Duration {
        millis(self.interpulse_interval_s)
    }

    /// Start-to-start distance between pulses.
    pub fn period(&self) -> Duration {
        self.pulse_duration().saturating_add(self.interpulse_interval())
    }

    /// Time until the whole train, including the trailing gap, has elapsed.
    pub fn total(&self) -> Duration {
        self.period().saturating_mul(self.n_pulses)
    }
}

/// A condition as written in the experiment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trial_type", rename_all = "snake_case")]
pub enum ConditionSpec {
    Forced {
        magnitude: u8,
        #[serde(rename = "loc")]
        location: String,
    },
    Choice {
        magnitudes: [u8; 2],
        #[serde(rename = "locs")]
        locations: [String; 2],
    },
}

/// One touchable option of a resolved condition.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOption {
    pub target: TargetId,
    pub magnitude: u8,
    pub stimulus: String,
    pub location: String,
    pub position: Point,
    pub reward: RewardParams,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialShape {
    /// A single target; touching it is correct.
    Forced { option: TrialOption },
    /// Two targets; the higher magnitude is correct. Ties never get this far.
    Choice {
        options: [TrialOption; 2],
        correct: TargetId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub key: String,
    pub shape: TrialShape,
}

impl Condition {
    pub fn options(&self) -> &[TrialOption] {
        match &self.shape {
            TrialShape::Forced { option } => std::slice::from_ref(option),
            TrialShape::Choice { options, .. } => options,
        }
    }

    pub fn option(&self, target: TargetId) -> Option<&TrialOption> {
        self.options().iter().find(|o| o.target == target)
    }

    pub fn correct_target(&self) -> TargetId {
        match &self.shape {
            TrialShape::Forced { option } => option.target,
            TrialShape::Choice { correct, .. } => *correct,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.shape {
            TrialShape::Forced { .. } => "forced",
            TrialShape::Choice { .. } => "choice",
        }
    }

    pub fn magnitudes(&self) -> Vec<u8> {
        self.options().iter().map(|o| o.magnitude).collect()
    }

    pub fn locations(&self) -> Vec<String> {
        self.options().iter().map(|o| o.location.clone()).collect()
    }
}

/// Lookup tables a [`ConditionSpec`] is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub items: &'a HashMap<u8, String>,
    pub locations: &'a HashMap<String, Point>,
    pub magnitude_mapping: &'a HashMap<u8, RewardParams>,
}

impl ResolveContext<'_> {
    fn option(&self, key: &str, target: TargetId, magnitude: u8, location: &str) -> Result<TrialOption, ConfigError> {
        let stimulus = self
            .items
            .get(&magnitude)
            .ok_or_else(|| ConfigError::MissingStimulus {
                condition: key.to_string(),
                magnitude,
            })?;
        let reward = self
            .magnitude_mapping
            .get(&magnitude)
            .ok_or_else(|| ConfigError::UnmappedMagnitude {
                condition: key.to_string(),
                magnitude,
            })?;
        let position = self
            .locations
            .get(location)
            .ok_or_else(|| ConfigError::UnknownLocation {
                condition: key.to_string(),
                location: location.to_string(),
            })?;
        Ok(TrialOption {
            target,
            magnitude,
            stimulus: stimulus.clone(),
            location: location.to_string(),
            position: *position,
            reward: *reward,
        })
    }

    pub fn resolve(&self, key: &str, spec: &ConditionSpec) -> Result<Condition, ConfigError> {
        let shape = match spec {
            ConditionSpec::Forced { magnitude, location } => TrialShape::Forced {
                option: self.option(key, TargetId::Target, *magnitude, location)?,
            },
            ConditionSpec::Choice {
                magnitudes: [m1, m2],
                locations: [l1, l2],
            } => {
                if m1 == m2 {
                    return Err(ConfigError::TiedMagnitudes {
                        condition: key.to_string(),
                        magnitude: *m1,
                    });
                }
                let correct = if m1 > m2 {
                    TargetId::Option1
                } else {
                    TargetId::Option2
                };
                TrialShape::Choice {
                    options: [
                        self.option(key, TargetId::Option1, *m1, l1)?,
                        self.option(key, TargetId::Option2, *m2, l2)?,
                    ],
                    correct,
                }
            }
        };
        Ok(Condition {
            key: key.to_string(),
            shape,
        })
    }
}

/// Static, read-only condition lookup.
#[derive(Debug, Clone, Default)]
pub struct ConditionTable {
    conditions: HashMap<String, Condition>,
}

impl ConditionTable {
    pub fn resolve(specs: &HashMap<String, ConditionSpec>, ctx: ResolveContext<'_>) -> Result<Self, ConfigError> {
        // Sorted so the first reported error does not depend on hash order.
        let mut keys: Vec<&String> = specs.keys().collect();
        keys.sort();

        let mut conditions = HashMap::with_capacity(specs.len());
        for key in keys {
            let condition = ctx.resolve(key, &specs[key])?;
            conditions.insert(key.clone(), condition);
        }
        Ok(Self { conditions })
    }

    pub fn from_conditions(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            conditions: conditions.into_iter().map(|c| (c.key.clone(), c)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Condition> {
        self.conditions.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.conditions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tables {
        items: HashMap<u8, String>,
        locations: HashMap<String, Point>,
        mapping: HashMap<u8, RewardParams>,
    }

    impl Tables {
        fn new() -> Self {
            let mut items = HashMap::new();
            let mut mapping = HashMap::new();
            for m in 1..=5u8 {
                items.insert(m, format!("stim{m}.png"));
                mapping.insert(
                    m,
                    RewardParams {
                        n_pulses: m as u32,
                        duration_s: 1.0,
                        interpulse_interval_s: 0.2,
                    },
                );
            }
            let mut locations = HashMap::new();
            locations.insert("left".to_string(), Point::new(290.0, 960.0));
            locations.insert("right".to_string(), Point::new(790.0, 960.0));
            Self {
                items,
                locations,
                mapping,
            }
        }

        fn ctx(&self) -> ResolveContext<'_> {
            ResolveContext {
                items: &self.items,
                locations: &self.locations,
                magnitude_mapping: &self.mapping,
            }
        }
    }

    fn choice(a: u8, b: u8) -> ConditionSpec {
        ConditionSpec::Choice {
            magnitudes: [a, b],
            locations: ["left".to_string(), "right".to_string()],
        }
    }

    #[test]
    fn higher_magnitude_is_correct() {
        let t = Tables::new();
        let c = t.ctx().resolve("c3v5", &choice(3, 5)).unwrap();
        assert_eq!(c.correct_target(), TargetId::Option2);
        assert_eq!(c.magnitudes(), vec![3, 5]);
        assert_eq!(c.option(TargetId::Option1).unwrap().position, Point::new(290.0, 960.0));

        let c = t.ctx().resolve("c5v3", &choice(5, 3)).unwrap();
        assert_eq!(c.correct_target(), TargetId::Option1);
    }

    #[test]
    fn ties_are_rejected_at_load() {
        let t = Tables::new();
        let err = t.ctx().resolve("c2v2", &choice(2, 2)).unwrap_err();
        assert!(matches!(err, ConfigError::TiedMagnitudes { magnitude: 2, .. }));
    }

    #[test]
    fn unknown_references_fail() {
        let t = Tables::new();
        let bad_loc = ConditionSpec::Forced {
            magnitude: 1,
            location: "top".to_string(),
        };
        assert!(matches!(
            t.ctx().resolve("f1top", &bad_loc),
            Err(ConfigError::UnknownLocation { .. })
        ));

        let bad_mag = ConditionSpec::Forced {
            magnitude: 9,
            location: "left".to_string(),
        };
        assert!(matches!(
            t.ctx().resolve("f9left", &bad_mag),
            Err(ConfigError::MissingStimulus { magnitude: 9, .. })
        ));
    }

    #[test]
    fn conditions_use_file_field_names() {
        let spec: ConditionSpec =
            serde_json::from_str(r#"{"trial_type":"choice","magnitudes":[3,5],"locs":["right","left"]}"#).unwrap();
        assert_eq!(
            spec,
            ConditionSpec::Choice {
                magnitudes: [3, 5],
                locations: ["right".to_string(), "left".to_string()],
            }
        );
        let spec: ConditionSpec = serde_json::from_str(r#"{"trial_type":"forced","magnitude":2,"loc":"left"}"#).unwrap();
        assert!(matches!(spec, ConditionSpec::Forced { magnitude: 2, .. }));
    }

    #[test]
    fn reward_timing_is_millisecond_exact() {
        let p = RewardParams {
            n_pulses: 3,
            duration_s: 1.0,
            interpulse_interval_s: 0.2,
        };
        assert_eq!(p.period(), Duration::from_millis(1200));
        assert_eq!(p.total(), Duration::from_millis(3600));
    }
}
