//! A simulated subject that plays the task on its own.
//!
//! It watches each presentation screen, waits a few ticks, then touches the
//! stimulus it prefers. Preference follows the stimulus -> magnitude map, so
//! `accuracy` is the chance of picking the larger reward.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use trialrig::prng::Prng;
use trialrig::scene::{InputEvent, Point, RenderItem, RenderSpec, Surface};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubjectProfile {
    /// Probability of touching the larger-magnitude stimulus.
    pub accuracy: f32,
    /// Probability of not responding at all.
    pub timeout_rate: f32,
    /// Minimum ticks between the screen appearing and the touch.
    pub reaction_ticks: u32,
}

impl Default for SubjectProfile {
    fn default() -> Self {
        Self {
            accuracy: 0.8,
            timeout_rate: 0.05,
            reaction_ticks: 20,
        }
    }
}

pub struct SimulatedSubject {
    profile: SubjectProfile,
    rng: Prng,
    magnitudes: HashMap<String, u8>,
    quit: Arc<AtomicBool>,
    in_presentation: bool,
    pending: Option<(u32, Point)>,
    presentations: u64,
}

impl SimulatedSubject {
    pub fn new(
        profile: SubjectProfile,
        seed: u64,
        magnitudes: HashMap<String, u8>,
        quit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            profile,
            rng: Prng::new(seed),
            magnitudes,
            quit,
            in_presentation: false,
            pending: None,
            presentations: 0,
        }
    }

    pub fn presentations(&self) -> u64 {
        self.presentations
    }

    fn magnitude(&self, item: &RenderItem) -> u8 {
        self.magnitudes.get(&item.stimulus).copied().unwrap_or(0)
    }

    fn respond(&mut self, items: &[RenderItem]) -> Option<Point> {
        if self.rng.chance(self.profile.timeout_rate) {
            return None;
        }
        let target = match items {
            [] => return None,
            [only] => only,
            [a, b, ..] => {
                let (best, worst) = if self.magnitude(a) >= self.magnitude(b) {
                    (a, b)
                } else {
                    (b, a)
                };
                if self.rng.chance(self.profile.accuracy) {
                    best
                } else {
                    worst
                }
            }
        };
        Some(target.position)
    }
}

impl Surface for SimulatedSubject {
    fn render(&mut self, frame: &RenderSpec) {
        if frame.items.is_empty() {
            self.in_presentation = false;
            self.pending = None;
            return;
        }
        if self.in_presentation {
            return;
        }
        self.in_presentation = true;
        self.presentations += 1;

        let base = self.profile.reaction_ticks;
        let jitter = self.rng.gen_range_usize(0, base as usize / 2 + 1) as u32;
        self.pending = self.respond(&frame.items).map(|p| (base + jitter, p));
    }

    fn poll_input(&mut self) -> Option<InputEvent> {
        let (ticks, at) = self.pending.as_mut()?;
        if *ticks > 0 {
            *ticks -= 1;
            return None;
        }
        let at = *at;
        self.pending = None;
        Some(InputEvent::Touch(at))
    }

    fn poll_quit(&mut self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }
}
