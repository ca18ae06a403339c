//! Scene runner: one bounded, time-limited episode on the display surface.
//!
//! Each tick renders the adapter's frame, polls quit and input once, forwards
//! input, then checks adapter completion and the time limit. Quit wins over
//! completion, completion wins over timeout.

use crate::adapters::SceneAdapter;
use crate::time::{Clock, Duration};
use serde::{Deserialize, Serialize};

/// Screen position in pixels. Written as `[x, y]` in experiment files.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Point {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn scaled(self, k: f32) -> Self {
        Self::new(self.width * k, self.height * k)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const GREY: Rgb = Rgb(200, 200, 200);
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const RED: Rgb = Rgb(255, 0, 0);
    pub const BLUE: Rgb = Rgb(0, 0, 255);
    pub const BLACK: Rgb = Rgb(0, 0, 0);
}

/// Identity of a touchable target within one presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetId {
    /// The only target of a forced trial.
    Target,
    Option1,
    Option2,
}

/// Axis-aligned box centred on a target's position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitRegion {
    pub center: Point,
    pub size: Size,
}

impl HitRegion {
    pub fn contains(&self, p: Point) -> bool {
        (p.x - self.center.x).abs() <= self.size.width / 2.0
            && (p.y - self.center.y).abs() <= self.size.height / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderItem {
    pub target: TargetId,
    pub stimulus: String,
    pub position: Point,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressBar {
    pub position: Point,
    pub size: Size,
    /// Filled share in `[0, 1]`.
    pub fraction: f32,
    pub colour: Rgb,
    pub gap: f32,
}

/// Everything the surface needs to draw one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderSpec {
    pub background: Rgb,
    pub items: Vec<RenderItem>,
    pub progress: Option<ProgressBar>,
}

impl RenderSpec {
    pub fn blank() -> Self {
        Self {
            background: Rgb::GREY,
            items: Vec::new(),
            progress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Touch(Point),
}

/// Display + input surface driven by the scene runner once per tick.
pub trait Surface {
    fn render(&mut self, frame: &RenderSpec);
    fn poll_input(&mut self) -> Option<InputEvent>;
    fn poll_quit(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneResult {
    pub completed_normally: bool,
    pub quit: bool,
    pub selection: Option<TargetId>,
}

/// One episode: an adapter, its time limit and the background it is drawn on.
pub struct Scene<'a> {
    pub adapter: &'a mut dyn SceneAdapter,
    pub time_limit: Duration,
    pub background: Rgb,
}

/// Fastest tick rate the runner supports.
pub const MAX_TICK_HZ: u32 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct SceneRunner {
    tick: Duration,
}

impl SceneRunner {
    pub fn new(tick_hz: u32) -> Self {
        let tick_hz = tick_hz.clamp(1, MAX_TICK_HZ);
        Self {
            tick: Duration::from_secs_f64(1.0 / tick_hz as f64),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn run(&self, scene: Scene<'_>, surface: &mut dyn Surface, clock: &mut dyn Clock) -> SceneResult {
        let Scene {
            adapter,
            time_limit,
            background,
        } = scene;
        let started = clock.now();

        loop {
            let elapsed = clock.now().saturating_sub(started);

            let mut frame = adapter.visual_state();
            frame.background = background;
            surface.render(&frame);

            if surface.poll_quit() {
                adapter.interrupt();
                return SceneResult {
                    completed_normally: false,
                    quit: true,
                    selection: None,
                };
            }

            if let Some(event) = surface.poll_input() {
                adapter.on_input(event);
            }

            if adapter.tick(elapsed) {
                return SceneResult {
                    completed_normally: true,
                    quit: false,
                    selection: adapter.selection(),
                };
            }

            if elapsed >= time_limit {
                return SceneResult {
                    completed_normally: false,
                    quit: false,
                    selection: None,
                };
            }

            clock.sleep(self.tick);
        }
    }
}
