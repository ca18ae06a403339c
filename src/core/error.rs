//! Error types for trialrig.
//!
//! Configuration problems are caught once, at load time. Hardware problems are
//! reported and degrade the current reward only. Sink failures stop the
//! session, since trials must not run unrecorded.

use crate::block::BlockId;
use crate::pulse::ChannelId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read experiment file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse experiment file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no blocks defined")]
    NoBlocks,

    #[error("start block must be set when more than one block is defined")]
    MissingStartBlock,

    #[error("start block '{0}' is not defined")]
    UnknownStartBlock(BlockId),

    #[error("block '{block}' references unknown condition '{condition}'")]
    UnknownCondition { block: BlockId, condition: String },

    #[error("block '{0}' has an empty condition pool")]
    EmptyPool(BlockId),

    #[error("block '{0}' has length 0 (must be >= 1)")]
    ZeroLength(BlockId),

    #[error("block '{block}': unconditional rule at position {index} must be the last rule")]
    DefaultRuleNotLast { block: BlockId, index: usize },

    #[error("block '{block}': rule {index} predicates on 'quit', which never counts")]
    QuitPredicate { block: BlockId, index: usize },

    #[error("block '{block}' transitions to unknown block '{next}'")]
    UnknownNextBlock { block: BlockId, next: BlockId },

    #[error("condition '{condition}' uses unknown location '{location}'")]
    UnknownLocation { condition: String, location: String },

    #[error("condition '{condition}' uses magnitude {magnitude} with no reward mapping")]
    UnmappedMagnitude { condition: String, magnitude: u8 },

    #[error("condition '{condition}' uses magnitude {magnitude} with no stimulus item")]
    MissingStimulus { condition: String, magnitude: u8 },

    #[error("condition '{condition}' offers equal magnitudes ({magnitude}); the higher option is undefined")]
    TiedMagnitudes { condition: String, magnitude: u8 },

    #[error("reward mapping for magnitude {0} must deliver at least one pulse")]
    ZeroPulses(u8),

    #[error("reward mapping for magnitude {magnitude} asks for {n_pulses} pulses (at most {max})")]
    TooManyPulses { magnitude: u8, n_pulses: u32, max: u32 },

    #[error("reward_channels is empty; rewards could never be delivered")]
    NoRewardChannels,

    #[error("invalid timing value for '{field}': {value}")]
    InvalidTiming { field: &'static str, value: f32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("pulse channel {0} is already held by another reward")]
    ChannelBusy(ChannelId),

    #[error("pulse channel {channel} failed to actuate: {message}")]
    Actuation { channel: ChannelId, message: String },

    #[error("no pulse channels leased")]
    NoChannels,

    #[error("pulse device disconnected")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("record sink failed: {0}")]
    Sink(#[from] std::io::Error),

    #[error("failed to encode trial record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("scheduler sampled condition '{0}' that is not in the condition table")]
    MissingCondition(String),
}
