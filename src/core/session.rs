//! Session loop: scheduler -> trial -> record sink, until quit or exhaustion.

use crate::adapters::RewardDelivery;
use crate::block::BlockId;
use crate::config::Experiment;
use crate::error::SessionError;
use crate::pulse::PulseBus;
use crate::scene::{SceneRunner, Surface, TargetId};
use crate::scheduler::{BlockScheduler, Scheduled};
use crate::stats::OutcomeStats;
use crate::storage::RecordSink;
use crate::time::{within_valid_times, Clock};
use crate::trial::{Trial, TrialContext, TrialOutcome};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One recorded trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based position among recorded trials.
    pub trial: u32,
    pub block: BlockId,
    pub condition: String,
    pub trial_type: String,
    pub outcome: TrialOutcome,
    pub selection: Option<TargetId>,
    pub correct_target: TargetId,
    pub magnitudes: Vec<u8>,
    pub locations: Vec<String>,
    pub reward: Option<RewardDelivery>,
    /// When the trial started.
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EndReason {
    Quit,
    /// A block met its quota with nowhere left to go.
    Exhausted { block: BlockId },
    OutsideValidTimes,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub seed: u64,
    /// Every trial started, retried ones included.
    pub trials_run: u32,
    pub records_appended: u32,
    pub retries: u32,
    pub block_path: Vec<BlockId>,
    pub end: EndReason,
    pub stats: OutcomeStats,
}

/// The collaborators a session drives.
pub struct SessionIo<'a> {
    pub surface: &'a mut dyn Surface,
    pub clock: &'a mut dyn Clock,
    pub pulses: &'a PulseBus,
    pub sink: &'a mut dyn RecordSink,
}

pub fn run_session(experiment: &Experiment, io: SessionIo<'_>) -> Result<SessionSummary, SessionError> {
    let SessionIo {
        surface,
        clock,
        pulses,
        sink,
    } = io;

    let runner = SceneRunner::new(experiment.tick_hz);
    let seed = experiment
        .seed
        .unwrap_or_else(|| clock.wall_time().timestamp_millis() as u64);
    info!(experiment = %experiment.name, seed, "session starting");

    let mut scheduler = BlockScheduler::new(&experiment.blocks, seed);
    let mut stats = OutcomeStats::new();
    let mut trials_run = 0u32;
    let mut appended = 0u32;

    let end = loop {
        if !within_valid_times(&experiment.valid_times, clock.wall_time().time()) {
            info!("outside valid session times");
            break EndReason::OutsideValidTimes;
        }
        let Some(key) = scheduler.sample() else {
            break EndReason::Exhausted {
                block: scheduler.active().id.clone(),
            };
        };
        let condition = experiment
            .conditions
            .get(key)
            .ok_or_else(|| SessionError::MissingCondition(key.to_string()))?;
        let block = scheduler.active().id.clone();
        let retrying_timeouts = scheduler.active().retry.timeout;
        let timestamp = clock.wall_time();

        let result = {
            let mut ctx = TrialContext {
                runner: &runner,
                surface: &mut *surface,
                clock: &mut *clock,
                pulses,
                settings: &experiment.settings,
            };
            Trial::new(condition).run(&mut ctx)
        };
        trials_run += 1;

        let recorded = match result.outcome {
            TrialOutcome::Quit => false,
            TrialOutcome::Timeout => !retrying_timeouts,
            TrialOutcome::Correct | TrialOutcome::Incorrect => true,
        };
        if recorded {
            appended += 1;
            stats.record(result.outcome);
            sink.append(&TrialRecord {
                trial: appended,
                block,
                condition: condition.key.clone(),
                trial_type: condition.kind().to_string(),
                outcome: result.outcome,
                selection: result.selection,
                correct_target: condition.correct_target(),
                magnitudes: condition.magnitudes(),
                locations: condition.locations(),
                reward: result.reward,
                timestamp,
            })?;
        }

        // A quit anywhere in the trial ends the session before any
        // transition is considered.
        if !result.continue_session {
            scheduler.halt();
            break EndReason::Quit;
        }

        if let Scheduled::Finished { block } = scheduler.record(result.outcome) {
            break EndReason::Exhausted { block };
        }
    };

    sink.flush()?;
    info!(
        trials = trials_run,
        recorded = appended,
        retries = scheduler.retries(),
        accuracy = stats.accuracy(),
        end = ?end,
        "session finished"
    );

    Ok(SessionSummary {
        seed,
        trials_run,
        records_appended: appended,
        retries: scheduler.retries(),
        block_path: scheduler.path().to_vec(),
        end,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentConfig;
    use crate::pulse::RecordingPump;
    use crate::scripted::{test_clock, ScriptedResponse, ScriptedSurface};
    use crate::storage::{read_jsonl, JsonlSink, MemorySink};
    use crate::time::{ManualClock, TimeWindow};
    use chrono::{NaiveTime, TimeZone};
    use ScriptedResponse::{Choose, ChooseThenQuit, Quit, Withhold};

    const T: TargetId = TargetId::Target;

    /// Two forced-choice blocks: `warm` (retry on timeout, 4 trials, then `main`)
    /// and `main` (no retry, 3 trials, terminal).
    fn experiment(seed: u64) -> Experiment {
        let raw = r#"{
            "name": "test",
            "duration": 1.0,
            "error_duration": 0.2,
            "timeout_duration": 0.2,
            "tick_hz": 20,
            "valid_times": [],
            "magnitude_mapping": {"3": {"n_pulses": 2, "duration": 0.1, "interpulse_interval": 0.1}},
            "items": {"3": "stim3.png"},
            "locations": {"left": [290, 960], "right": [790, 960]},
            "conditions": {
                "f3left": {"trial_type": "forced", "magnitude": 3, "loc": "left"},
                "f3right": {"trial_type": "forced", "magnitude": 3, "loc": "right"}
            },
            "blocks": {
                "warm": {"conditions": ["f3left", "f3right"], "length": 4, "retry": {"timeout": true},
                         "transition": [{"next": "main"}]},
                "main": {"conditions": ["f3left", "f3right"], "length": 3}
            },
            "start_block": "warm"
        }"#;
        let mut cfg = ExperimentConfig::from_json(raw).unwrap();
        cfg.seed = Some(seed);
        cfg.build().unwrap()
    }

    fn run(exp: &Experiment, script: Vec<ScriptedResponse>, clock: &mut ManualClock) -> (SessionSummary, MemorySink) {
        let mut surface = ScriptedSurface::new(script);
        let bus = PulseBus::new(RecordingPump::new());
        let mut sink = MemorySink::new();
        let summary = run_session(
            exp,
            SessionIo {
                surface: &mut surface,
                clock,
                pulses: &bus,
                sink: &mut sink,
            },
        )
        .unwrap();
        (summary, sink)
    }

    #[test]
    fn retried_timeouts_never_reach_the_sink() {
        let exp = experiment(3);
        let script = vec![
            Choose(T),
            Withhold,
            Choose(T),
            Withhold,
            Choose(T),
            Choose(T),
            // main: timeouts count here
            Withhold,
            Choose(T),
            Withhold,
        ];
        let (summary, sink) = run(&exp, script, &mut test_clock());

        assert_eq!(summary.trials_run, 9);
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.records_appended, 7);
        assert_eq!(
            summary.end,
            EndReason::Exhausted {
                block: "main".into()
            }
        );
        assert_eq!(summary.block_path, vec![BlockId::from("warm"), BlockId::from("main")]);

        let warm: Vec<_> = sink.records.iter().filter(|r| r.block.as_str() == "warm").collect();
        assert_eq!(warm.len(), 4);
        assert!(warm.iter().all(|r| r.outcome == TrialOutcome::Correct));

        let main: Vec<_> = sink.records.iter().filter(|r| r.block.as_str() == "main").collect();
        let outcomes: Vec<_> = main.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![TrialOutcome::Timeout, TrialOutcome::Correct, TrialOutcome::Timeout]
        );
        assert_eq!(sink.records.iter().map(|r| r.trial).collect::<Vec<_>>(), (1..=7).collect::<Vec<_>>());
        assert_eq!(summary.stats.timeouts, 2);
    }

    #[test]
    fn quit_stops_everything() {
        let exp = experiment(3);
        let (summary, sink) = run(&exp, vec![Choose(T), Quit, Choose(T)], &mut test_clock());
        assert_eq!(summary.end, EndReason::Quit);
        assert_eq!(summary.trials_run, 2);
        assert_eq!(sink.records.len(), 1);
        assert_eq!(summary.block_path.len(), 1);
    }

    #[test]
    fn quit_in_follow_up_records_the_trial_then_stops() {
        let exp = experiment(3);
        // The fourth warm trial would complete the block; quitting during its
        // reward must not trigger the transition to `main`.
        let script = vec![Choose(T), Choose(T), Choose(T), ChooseThenQuit(T), Choose(T)];
        let (summary, sink) = run(&exp, script, &mut test_clock());
        assert_eq!(summary.end, EndReason::Quit);
        assert_eq!(sink.records.len(), 4);
        assert_eq!(sink.records[3].outcome, TrialOutcome::Correct);
        assert_eq!(summary.block_path, vec![BlockId::from("warm")]);
    }

    #[test]
    fn fixed_seed_reproduces_the_session() {
        let script = || vec![Choose(T), Withhold, Choose(T), Choose(T), Choose(T), Choose(T), Withhold, Choose(T)];
        let exp = experiment(1234);
        let (a, sink_a) = run(&exp, script(), &mut test_clock());
        let (b, sink_b) = run(&exp, script(), &mut test_clock());
        assert_eq!(a.block_path, b.block_path);
        assert_eq!(sink_a.records, sink_b.records);
        assert!(!sink_a.records.is_empty());
    }

    #[test]
    fn outside_valid_times_ends_before_any_trial() {
        let mut exp = experiment(1);
        exp.valid_times = vec![TimeWindow {
            start: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        }];
        // The test clock starts at 10:00.
        let (summary, sink) = run(&exp, vec![Choose(T)], &mut test_clock());
        assert_eq!(summary.end, EndReason::OutsideValidTimes);
        assert_eq!(summary.trials_run, 0);
        assert!(sink.records.is_empty());
    }

    #[test]
    fn session_stops_when_the_window_closes() {
        let mut exp = experiment(1);
        exp.valid_times = vec![TimeWindow {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }];
        let start = Local.with_ymd_and_hms(2026, 1, 5, 17, 59, 58).unwrap();
        let mut clock = ManualClock::new(start);
        // Each withheld trial takes ~1.2 s of virtual time.
        let (summary, _) = run(&exp, vec![Withhold; 10], &mut clock);
        assert_eq!(summary.end, EndReason::OutsideValidTimes);
        assert!(summary.trials_run >= 1 && summary.trials_run <= 3);
    }

    #[test]
    fn jsonl_sink_round_trips_records() {
        let exp = experiment(5);
        let mut surface = ScriptedSurface::new(vec![Choose(T), Choose(T), Quit]);
        let bus = PulseBus::new(RecordingPump::new());
        let mut sink = JsonlSink::new(Vec::new());
        let mut clock = test_clock();
        run_session(
            &exp,
            SessionIo {
                surface: &mut surface,
                clock: &mut clock,
                pulses: &bus,
                sink: &mut sink,
            },
        )
        .unwrap();
        assert_eq!(sink.written(), 2);
        let bytes = sink.into_inner();
        let records = read_jsonl(bytes.as_slice()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reward.map(|r| r.pulses_delivered), Some(2));
        assert_eq!(records[1].trial, 2);
    }
}
