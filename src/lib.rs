//! # trialrig
//!
//! Runs touch-based choice tasks: presents stimuli, waits for a response
//! within a time limit, pays out a calibrated reward and moves a subject
//! through a staircase of blocks based on recent performance.
//!
//! ## Quick Start
//!
//! ```no_run
//! use trialrig::prelude::*;
//!
//! # fn surface() -> Box<dyn Surface> { unimplemented!() }
//! let experiment = ExperimentConfig::value_staircase("demo").build()?;
//! let bus = PulseBus::new(RecordingPump::new());
//! let mut sink = MemorySink::new();
//! let mut clock = SystemClock::new();
//! let mut display = surface();
//!
//! let summary = run_session(
//!     &experiment,
//!     SessionIo {
//!         surface: display.as_mut(),
//!         clock: &mut clock,
//!         pulses: &bus,
//!         sink: &mut sink,
//!     },
//! )?;
//! println!("{:?} after {} trials", summary.end, summary.trials_run);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Modules
//!
//! - [`scene`]: the per-tick scene loop and the display/input surface contract
//! - [`adapters`]: timer, choice detector and reward pulse train
//! - [`trial`]: forced and two-alternative trials
//! - [`block`], [`scheduler`]: the block graph and adaptive sequencing
//! - [`session`]: the loop that ties it together and feeds the record sink

#[path = "core/adapters.rs"]
pub mod adapters;

#[path = "core/block.rs"]
pub mod block;

#[path = "core/condition.rs"]
pub mod condition;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/pulse.rs"]
pub mod pulse;

#[path = "core/scene.rs"]
pub mod scene;

#[path = "core/scheduler.rs"]
pub mod scheduler;

#[path = "core/session.rs"]
pub mod session;

#[path = "core/stats.rs"]
pub mod stats;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/time.rs"]
pub mod time;

#[path = "core/trial.rs"]
pub mod trial;

#[cfg(test)]
#[path = "core/scripted.rs"]
mod scripted;

/// Prelude module for convenient imports.
///
/// ```
/// use trialrig::prelude::*;
/// ```
pub mod prelude {
    pub use crate::block::{BlockId, BlockTable, BlockWindow, TransitionRule};
    pub use crate::config::{Experiment, ExperimentConfig};
    pub use crate::error::{ConfigError, HardwareError, SessionError};
    pub use crate::pulse::{ChannelId, PulseBus, PulseChannel, RecordingPump};
    pub use crate::scene::{InputEvent, Point, RenderSpec, Surface, TargetId};
    pub use crate::scheduler::{BlockScheduler, Scheduled};
    pub use crate::session::{run_session, EndReason, SessionIo, SessionSummary, TrialRecord};
    pub use crate::storage::{JsonlSink, MemorySink, RecordSink};
    pub use crate::time::{Clock, ManualClock, SystemClock};
    pub use crate::trial::TrialOutcome;
}
