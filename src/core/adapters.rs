//! Scene adapters: the per-episode behaviour the scene runner polls.

use crate::condition::RewardParams;
use crate::error::HardwareError;
use crate::pulse::ChannelLease;
use crate::scene::{HitRegion, InputEvent, Point, ProgressBar, RenderItem, RenderSpec, Rgb, Size, TargetId};
use crate::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub trait SceneAdapter {
    /// Advance to `elapsed` (time since the scene started). Returns `true` once
    /// the adapter considers the episode finished.
    fn tick(&mut self, elapsed: Duration) -> bool;

    fn on_input(&mut self, _event: InputEvent) {}

    /// The frame to draw; the runner fills in the background.
    fn visual_state(&self) -> RenderSpec;

    fn selection(&self) -> Option<TargetId> {
        None
    }

    /// The scene is being abandoned because of a quit.
    fn interrupt(&mut self) {}
}

// ─────────────────────────────────────────────────────────────────────────
// TimeCounter: an empty screen that only ends on the runner's time limit.
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TimeCounter;

impl TimeCounter {
    pub fn new() -> Self {
        Self
    }
}

impl SceneAdapter for TimeCounter {
    fn tick(&mut self, _elapsed: Duration) -> bool {
        false
    }

    fn visual_state(&self) -> RenderSpec {
        RenderSpec::blank()
    }
}

// ─────────────────────────────────────────────────────────────────────────
// ChoiceDetector: shows targets and records the first touch that lands in one.
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChoiceDetector {
    items: Vec<RenderItem>,
    regions: Vec<(TargetId, HitRegion)>,
    chosen: Option<TargetId>,
}

impl ChoiceDetector {
    /// Hit regions are `bbox`-sized boxes centred on each item, checked in
    /// item order: where regions overlap, the earlier target wins.
    pub fn new(items: Vec<RenderItem>, bbox: Size) -> Self {
        let regions = items
            .iter()
            .map(|item| {
                (
                    item.target,
                    HitRegion {
                        center: item.position,
                        size: bbox,
                    },
                )
            })
            .collect();
        Self {
            items,
            regions,
            chosen: None,
        }
    }

    pub fn chosen(&self) -> Option<TargetId> {
        self.chosen
    }

    fn hit(&self, p: Point) -> Option<TargetId> {
        self.regions
            .iter()
            .find(|(_, region)| region.contains(p))
            .map(|(id, _)| *id)
    }
}

impl SceneAdapter for ChoiceDetector {
    fn tick(&mut self, _elapsed: Duration) -> bool {
        self.chosen.is_some()
    }

    fn on_input(&mut self, event: InputEvent) {
        if self.chosen.is_some() {
            return;
        }
        let InputEvent::Touch(p) = event;
        self.chosen = self.hit(p);
        if let Some(id) = self.chosen {
            debug!(target = ?id, x = p.x, y = p.y, "target selected");
        }
    }

    fn visual_state(&self) -> RenderSpec {
        RenderSpec {
            items: self.items.clone(),
            ..RenderSpec::blank()
        }
    }

    fn selection(&self) -> Option<TargetId> {
        self.chosen
    }
}

// ─────────────────────────────────────────────────────────────────────────
// RewardPulseAdapter: timed pulse train with a progress bar.
// Pulse k starts at k * (duration + interpulse_interval).
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressStyle {
    pub position: Point,
    pub size: Size,
    pub colour: Rgb,
    pub gap: f32,
}

impl ProgressStyle {
    pub fn centred_at(position: Point) -> Self {
        Self {
            position,
            size: Size::new(400.0, 50.0),
            colour: Rgb::BLACK,
            gap: 10.0,
        }
    }
}

/// What a reward scene actually delivered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardDelivery {
    pub magnitude: u8,
    pub params: RewardParams,
    pub pulses_delivered: u32,
    pub failed: bool,
}

#[derive(Debug)]
pub struct RewardPulseAdapter {
    magnitude: u8,
    params: RewardParams,
    lease: Option<ChannelLease>,
    style: ProgressStyle,
    issued: u32,
    failure: Option<HardwareError>,
    interrupted: bool,
    elapsed: Duration,
}

impl RewardPulseAdapter {
    /// If the pump channels could not be acquired the adapter finishes on its
    /// first tick with a failed delivery.
    pub fn new(
        magnitude: u8,
        params: RewardParams,
        lease: Result<ChannelLease, HardwareError>,
        style: ProgressStyle,
    ) -> Self {
        let (lease, failure) = match lease {
            Ok(lease) => (Some(lease), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            magnitude,
            params,
            lease,
            style,
            issued: 0,
            failure,
            interrupted: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn issued(&self) -> u32 {
        self.issued
    }

    pub fn failure(&self) -> Option<&HardwareError> {
        self.failure.as_ref()
    }

    pub fn delivery(&self) -> RewardDelivery {
        RewardDelivery {
            magnitude: self.magnitude,
            params: self.params,
            pulses_delivered: self.issued,
            failed: self.failure.is_some(),
        }
    }

    fn pulse_start(&self, k: u32) -> Duration {
        self.params.period().saturating_mul(k)
    }
}

impl SceneAdapter for RewardPulseAdapter {
    fn tick(&mut self, elapsed: Duration) -> bool {
        self.elapsed = elapsed;
        if self.interrupted || self.failure.is_some() {
            return true;
        }
        let Some(lease) = self.lease.as_ref() else {
            return true;
        };

        while self.issued < self.params.n_pulses && elapsed >= self.pulse_start(self.issued) {
            match lease.emit(self.params.pulse_duration()) {
                Ok(()) => {
                    self.issued += 1;
                    debug!(pulse = self.issued, of = self.params.n_pulses, "reward pulse");
                }
                Err(e) => {
                    warn!(
                        "reward delivery stopped after {}/{} pulses: {}",
                        self.issued, self.params.n_pulses, e
                    );
                    self.failure = Some(e);
                    return true;
                }
            }
        }

        self.issued == self.params.n_pulses && elapsed >= self.params.total()
    }

    fn visual_state(&self) -> RenderSpec {
        let fraction = if self.params.n_pulses == 0 {
            1.0
        } else {
            self.issued as f32 / self.params.n_pulses as f32
        };
        RenderSpec {
            progress: Some(ProgressBar {
                position: self.style.position,
                size: self.style.size,
                fraction,
                colour: self.style.colour,
                gap: self.style.gap,
            }),
            ..RenderSpec::blank()
        }
    }

    fn interrupt(&mut self) {
        self.interrupted = true;
        if self.issued > 0 {
            let last_end = self
                .pulse_start(self.issued - 1)
                .saturating_add(self.params.pulse_duration());
            if self.elapsed < last_end {
                debug!(
                    remaining_ms = (last_end - self.elapsed).as_millis() as u64,
                    "quit during a pulse; letting it finish"
                );
            }
        }
    }
}
