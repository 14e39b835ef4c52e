use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Context;
use clap::Parser;
use conductor::{
    error_chain, Camera, Classifier, CoilBus, Config, Recorder, RobotLink, SimulatedClassifier,
    SimulatedRig, SubmitError, TcpCoilBus, TurnEngine, TurnWorker, VisionHelper,
};
use memory_game::{Difficulty, FlipRejection, GameEvent, UiCommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Plays the memory game on the robot rig.
///
/// Reads commands as JSON lines from stdin and writes game events as JSON
/// lines to stdout. Logs go to stderr.
#[derive(Parser)]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Play on a simulated rig instead of the robot
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// AI difficulty among "easy", "medium", "hard"; overrides the config file
    #[arg(short, long)]
    difficulty: Option<Difficulty>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Record each game's events as JSON files into this directory
    #[arg(short, long)]
    record_games_to_directory: Option<PathBuf>,

    /// A log level among "off", "error", "warn", "info", "debug", "trace"
    #[arg(short, long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    initialize_logging(args.log_level);

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(difficulty) = args.difficulty {
        config.difficulty = difficulty;
    }

    // Get a random seed
    let seed = args.seed.unwrap_or_else(rand::random);
    info!(seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let recorder = if let Some(dir_path) = args.record_games_to_directory {
        Some(Recorder::new(dir_path)?)
    } else {
        None
    };

    if args.simulate {
        let rig = SimulatedRig::shuffled(&mut rng);
        debug!(layout = ?rig.layout(), "Simulated rig");
        let camera = rig.camera(config.camera.roi);
        run(rig, camera, SimulatedClassifier, &config, rng, recorder)
    } else {
        let bus = TcpCoilBus::new(
            &config.robot.host,
            config.robot.port,
            config.robot.unit_id,
            config.io_timeout(),
        );
        let helper_path = config
            .vision
            .helper
            .as_deref()
            .context("No vision helper configured, use --simulate to play without hardware")?;
        let helper_args: Vec<&str> = config.vision.args.iter().map(String::as_str).collect();
        let (camera, classifier) =
            VisionHelper::spawn(helper_path, &helper_args)?.into_parts(config.camera.roi);
        run(bus, camera, classifier, &config, rng, recorder)
    }
}

fn run<B, C, K>(
    bus: B,
    mut camera: C,
    classifier: K,
    config: &Config,
    mut rng: StdRng,
    recorder: Option<Recorder>,
) -> anyhow::Result<()>
where
    B: CoilBus + 'static,
    C: Camera + 'static,
    K: Classifier + 'static,
{
    let mut link = RobotLink::new(bus, config.poll_interval());
    link.connect().with_context(|| {
        format!(
            "Could not connect to the robot at {}:{}",
            config.robot.host, config.robot.port
        )
    })?;
    if let Err(err) = camera.start() {
        link.disconnect();
        return Err(err.context("Could not start the camera"));
    }

    let engine = TurnEngine::new(
        Arc::new(Mutex::new(link)),
        camera,
        classifier,
        config.timing(),
        config.difficulty,
        StdRng::seed_from_u64(rng.gen()),
    );
    let (events, events_rx) = mpsc::channel();
    let worker = TurnWorker::spawn(engine, events.clone());
    let output = thread::spawn(move || write_events(events_rx, recorder));

    read_commands(&worker, &events);

    info!("Shutting down");
    let stopped = worker.shutdown(config.shutdown_wait());
    drop(events);
    if stopped && output.join().is_err() {
        error!("The event writer panicked");
    }
    Ok(())
}

/// Feeds commands from stdin to the worker until EOF or `Quit`.
fn read_commands<B: CoilBus + 'static>(worker: &TurnWorker<B>, events: &Sender<GameEvent>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                error!(%err, "Could not read from stdin");
                return;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cmd = match serde_json::from_str::<UiCommand>(line) {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!(%err, line, "Ignoring malformed command");
                continue;
            }
        };
        if cmd == UiCommand::Quit {
            return;
        }
        match worker.try_submit(cmd) {
            Ok(()) => {}
            Err(SubmitError::Busy(cmd)) => {
                debug!(?cmd, "Worker busy");
                let _ = events.send(GameEvent::FlipRejected {
                    reason: FlipRejection::Busy,
                });
            }
            Err(err @ SubmitError::Stopped(_)) => {
                error!(err = %error_chain(&err), "Cannot continue");
                return;
            }
        }
    }
}

/// Writes every event as one JSON line to stdout.
fn write_events(events: Receiver<GameEvent>, mut recorder: Option<Recorder>) {
    let stdout = std::io::stdout();
    for event in events {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(err) => {
                error!(%err, ?event, "Could not serialize event");
                continue;
            }
        };
        let mut out = stdout.lock();
        if let Err(err) = writeln!(out, "{}", json).and_then(|()| out.flush()) {
            error!(%err, "Could not write to stdout");
            return;
        }
        if let Some(recorder) = &mut recorder {
            if let Err(err) = recorder.observe(&event) {
                warn!(err = %format!("{:#}", err), "Could not record the game");
            }
        }
    }
}

fn initialize_logging(level: LevelFilter) {
    let format = tracing_subscriber::fmt::format()
        .with_target(false)
        .compact();

    let filter = Targets::new().with_default(level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(format)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}
