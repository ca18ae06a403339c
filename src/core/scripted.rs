//! Deterministic surface for unit tests.
//!
//! Every presentation screen (a frame that shows targets) consumes the next
//! scripted response. Running out of script quits, so a test can never spin
//! forever on a retrying block.

use crate::scene::{InputEvent, Point, RenderSpec, Surface, TargetId};
use crate::time::ManualClock;
use chrono::{Local, TimeZone};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptedResponse {
    Choose(TargetId),
    TouchAt(Point),
    Withhold,
    Quit,
    /// Touch and quit on the same tick.
    ChooseAndQuit(TargetId),
    /// Choose, then quit as soon as the follow-up screen appears.
    ChooseThenQuit(TargetId),
}

pub struct ScriptedSurface {
    script: VecDeque<ScriptedResponse>,
    current: Option<ScriptedResponse>,
    in_presentation: bool,
    touch: Option<Point>,
    quit_on_follow_up: bool,
    frames: Vec<RenderSpec>,
}

impl ScriptedSurface {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: script.into(),
            current: None,
            in_presentation: false,
            touch: None,
            quit_on_follow_up: false,
            frames: Vec::new(),
        }
    }

    pub fn frames(&self) -> &[RenderSpec] {
        &self.frames
    }

    fn begin_presentation(&mut self, frame: &RenderSpec) {
        let response = self.script.pop_front().unwrap_or(ScriptedResponse::Quit);
        let position_of = |t: TargetId| {
            frame
                .items
                .iter()
                .find(|i| i.target == t)
                .map(|i| i.position)
        };
        self.touch = match response {
            ScriptedResponse::Choose(t)
            | ScriptedResponse::ChooseAndQuit(t)
            | ScriptedResponse::ChooseThenQuit(t) => position_of(t),
            ScriptedResponse::TouchAt(p) => Some(p),
            ScriptedResponse::Withhold | ScriptedResponse::Quit => None,
        };
        self.current = Some(response);
    }
}

impl Surface for ScriptedSurface {
    fn render(&mut self, frame: &RenderSpec) {
        let presenting = !frame.items.is_empty();
        if presenting && !self.in_presentation {
            self.begin_presentation(frame);
        }
        if !presenting && self.in_presentation {
            if let Some(ScriptedResponse::ChooseThenQuit(_)) = self.current {
                self.quit_on_follow_up = true;
            }
        }
        self.in_presentation = presenting;
        self.frames.push(frame.clone());
    }

    fn poll_input(&mut self) -> Option<InputEvent> {
        if self.in_presentation {
            self.touch.take().map(InputEvent::Touch)
        } else {
            None
        }
    }

    fn poll_quit(&mut self) -> bool {
        if self.in_presentation {
            matches!(
                self.current,
                Some(ScriptedResponse::Quit) | Some(ScriptedResponse::ChooseAndQuit(_))
            )
        } else {
            self.quit_on_follow_up
        }
    }
}

pub fn test_clock() -> ManualClock {
    let start = Local
        .with_ymd_and_hms(2026, 1, 5, 10, 0, 0)
        .single()
        .unwrap_or_else(Local::now);
    ManualClock::new(start)
}
