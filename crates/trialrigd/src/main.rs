//! trialrigd - runs an experiment session against a simulated subject.
//!
//! Examples:
//!   trialrigd --preset staircase --name monkey-a
//!   trialrigd --config experiment.json --seed 42 --accuracy 0.9
//!   trialrigd --config experiment.json --realtime
//!
//! Without `--realtime` the session runs on virtual time and finishes as fast
//! as the machine allows. Ctrl-C ends the session after the current scene.
//!
//! Records are appended to `<data dir>/trialrig/<name>/session-<timestamp>.jsonl`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trialrig::prelude::*;

mod paths;
mod pump;
mod subject;

use paths::AppPaths;
use pump::LoggingPump;
use subject::{SimulatedSubject, SubjectProfile};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("could not determine the OS data directory")]
    NoDataDir,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

enum Source {
    File(PathBuf),
    Staircase,
}

struct Options {
    source: Source,
    name: Option<String>,
    seed: Option<u64>,
    realtime: bool,
    profile: SubjectProfile,
    ignore_valid_times: bool,
    cue_incorrect: bool,
}

fn usage() -> ! {
    eprintln!("Usage: trialrigd (--config PATH | --preset staircase) [options]\n");
    eprintln!("Options:");
    eprintln!("  --name NAME            experiment name (record directory)");
    eprintln!("  --seed N               fix the condition sampling seed");
    eprintln!("  --realtime             run on the wall clock instead of virtual time");
    eprintln!("  --accuracy P           simulated subject accuracy (default 0.8)");
    eprintln!("  --timeout-rate P       simulated subject no-response rate (default 0.05)");
    eprintln!("  --ignore-valid-times   run regardless of the configured time windows");
    eprintln!("  --cue-incorrect        show the error screen instead of rewarding wrong choices");
    process::exit(2);
}

fn fail(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(2);
}

fn parse_probability(flag: &str, raw: Option<String>) -> f32 {
    match raw.as_deref().map(str::parse::<f32>) {
        Some(Ok(p)) if (0.0..=1.0).contains(&p) => p,
        _ => fail(&format!("{flag} needs a probability between 0 and 1")),
    }
}

fn parse_args() -> Options {
    let mut args = std::env::args().skip(1);
    let mut source = None;
    let mut opts = Options {
        source: Source::Staircase,
        name: None,
        seed: None,
        realtime: false,
        profile: SubjectProfile::default(),
        ignore_valid_times: false,
        cue_incorrect: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => source = Some(Source::File(PathBuf::from(path))),
                None => usage(),
            },
            "--preset" => match args.next().as_deref() {
                Some("staircase") => source = Some(Source::Staircase),
                Some(other) => fail(&format!("unknown preset '{other}' (available: staircase)")),
                None => usage(),
            },
            "--name" => opts.name = Some(args.next().unwrap_or_else(|| usage())),
            "--seed" => match args.next().map(|s| s.parse::<u64>()) {
                Some(Ok(seed)) => opts.seed = Some(seed),
                _ => fail("--seed needs an unsigned integer"),
            },
            "--realtime" => opts.realtime = true,
            "--accuracy" => opts.profile.accuracy = parse_probability("--accuracy", args.next()),
            "--timeout-rate" => {
                opts.profile.timeout_rate = parse_probability("--timeout-rate", args.next())
            }
            "--ignore-valid-times" => opts.ignore_valid_times = true,
            "--cue-incorrect" => opts.cue_incorrect = true,
            "-h" | "--help" => usage(),
            other => fail(&format!("unknown argument '{other}'")),
        }
    }

    match source {
        Some(s) => opts.source = s,
        None => usage(),
    }
    opts
}

fn load_config(opts: &Options) -> Result<ExperimentConfig, DaemonError> {
    let mut cfg = match &opts.source {
        Source::File(path) => {
            info!(path = %path.display(), "loading experiment");
            ExperimentConfig::load(path)?
        }
        Source::Staircase => {
            ExperimentConfig::value_staircase(opts.name.as_deref().unwrap_or("value_staircase"))
        }
    };
    if let Some(name) = &opts.name {
        cfg.name = name.clone();
    }
    if opts.seed.is_some() {
        cfg.seed = opts.seed;
    }
    if opts.ignore_valid_times {
        cfg.valid_times.clear();
    }
    if opts.cue_incorrect {
        cfg.cue_incorrect = true;
    }
    Ok(cfg)
}

async fn run(opts: Options) -> Result<SessionSummary, DaemonError> {
    let cfg = load_config(&opts)?;
    let experiment = cfg.build()?;
    info!(
        experiment = %experiment.name,
        conditions = experiment.conditions.len(),
        blocks = experiment.blocks.len(),
        start = %experiment.blocks.start(),
        "experiment ready"
    );

    let started = Local::now();
    let paths = AppPaths::new(&experiment.name)?;
    let record_file = paths.session_file(started);
    let mut sink = JsonlSink::create(&record_file)?;
    info!(file = %record_file.display(), "recording trials");

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C: ending session after the current scene");
                quit.store(true, Ordering::Relaxed);
            }
        });
    }

    let stimuli: HashMap<String, u8> = cfg
        .items
        .iter()
        .map(|(magnitude, path)| (path.clone(), *magnitude))
        .collect();
    let subject_seed = experiment
        .seed
        .map(|s| s ^ 0x5eed)
        .unwrap_or_else(|| started.timestamp_millis() as u64);
    info!(profile = ?opts.profile, "simulated subject");
    let mut surface = SimulatedSubject::new(opts.profile, subject_seed, stimuli, quit);
    let bus = PulseBus::new(LoggingPump::new());
    let realtime = opts.realtime;

    let summary = tokio::task::spawn_blocking(move || {
        let mut system = SystemClock::new();
        let mut manual = ManualClock::new(started);
        let clock: &mut dyn Clock = if realtime { &mut system } else { &mut manual };
        let summary = run_session(
            &experiment,
            SessionIo {
                surface: &mut surface,
                clock,
                pulses: &bus,
                sink: &mut sink,
            },
        );
        info!(
            presentations = surface.presentations(),
            written = sink.written(),
            "session finished"
        );
        summary
    })
    .await??;

    Ok(summary)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = parse_args();
    match run(opts).await {
        Ok(summary) => {
            info!(
                end = ?summary.end,
                seed = summary.seed,
                trials = summary.trials_run,
                recorded = summary.records_appended,
                retries = summary.retries,
                accuracy = summary.stats.accuracy(),
                "summary"
            );
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("could not encode summary: {}", e),
            }
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
