use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, PoisonError, RwLock, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use memory_game::{Actor, FlipRejection, GameEvent, UiCommand};
use tracing::{debug, error, info, warn};

use crate::{
    error_chain, Camera, Classifier, CoilBus, FlipOutcome, GameSnapshot, Phase, SharedLink,
    TurnEngine, TurnError,
};

/// How often shutdown checks whether the worker or the link became free.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why a command was not accepted by the worker.
#[derive(Debug)]
pub enum SubmitError {
    /// The worker is still handling an earlier command.
    Busy(UiCommand),
    /// The worker has exited.
    Stopped(UiCommand),
}

impl std::error::Error for SubmitError {}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Busy(cmd) => write!(f, "Cannot handle {:?} while a turn is in progress", cmd),
            SubmitError::Stopped(cmd) => write!(f, "Cannot handle {:?}, the game has stopped", cmd),
        }
    }
}

/// Runs a [`TurnEngine`] on its own thread, one command at a time.
///
/// Commands are handed over through a rendezvous channel, so the worker only
/// accepts a new command once it is done with the previous one. The state of
/// the game is published as a [`GameSnapshot`] after every command, and
/// everything that happens is reported as [`GameEvent`]s.
pub struct TurnWorker<B> {
    requests: Option<SyncSender<UiCommand>>,
    snapshot: Arc<RwLock<GameSnapshot>>,
    link: SharedLink<B>,
    handle: Option<JoinHandle<()>>,
}

impl<B: CoilBus + 'static> TurnWorker<B> {
    pub fn spawn<C, K>(engine: TurnEngine<B, C, K>, events: Sender<GameEvent>) -> Self
    where
        C: Camera + 'static,
        K: Classifier + 'static,
    {
        let (requests, rx) = mpsc::sync_channel(0);
        let snapshot = Arc::new(RwLock::new(engine.snapshot()));
        let link = Arc::clone(engine.link());
        let published = Arc::clone(&snapshot);
        let handle = thread::Builder::new()
            .name(String::from("turn-worker"))
            .spawn(move || worker_thread(engine, rx, events, published))
            .expect("Could not spawn the turn worker");
        Self {
            requests: Some(requests),
            snapshot,
            link,
            handle: Some(handle),
        }
    }

    /// Hands `cmd` to the worker if it is idle.
    pub fn try_submit(&self, cmd: UiCommand) -> Result<(), SubmitError> {
        let Some(requests) = &self.requests else {
            return Err(SubmitError::Stopped(cmd));
        };
        requests.try_send(cmd).map_err(|err| match err {
            TrySendError::Full(cmd) => SubmitError::Busy(cmd),
            TrySendError::Disconnected(cmd) => SubmitError::Stopped(cmd),
        })
    }

    /// Hands `cmd` to the worker, waiting until it is idle.
    pub fn submit(&self, cmd: UiCommand) -> Result<(), SubmitError> {
        let Some(requests) = &self.requests else {
            return Err(SubmitError::Stopped(cmd));
        };
        requests
            .send(cmd)
            .map_err(|mpsc::SendError(cmd)| SubmitError::Stopped(cmd))
    }

    /// The state of the game after the last command the worker finished.
    pub fn snapshot(&self) -> GameSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops the worker and disconnects the robot.
    ///
    /// Waits at most `wait` in total. If a flip is still in progress after
    /// that, the robot is left connected and the worker is abandoned.
    /// Returns whether the worker has exited.
    pub fn shutdown(mut self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        // Closing the channel ends the worker's loop after the current command.
        self.requests = None;
        let mut stopped = true;
        if let Some(handle) = self.handle.take() {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(SHUTDOWN_POLL_INTERVAL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("The turn worker panicked");
                }
            } else {
                warn!("The turn worker is still busy, shutting down anyway");
                stopped = false;
            }
        }

        loop {
            match self.link.try_lock() {
                Ok(mut link) => {
                    link.disconnect();
                    break;
                }
                Err(TryLockError::Poisoned(poisoned)) => {
                    poisoned.into_inner().disconnect();
                    break;
                }
                Err(TryLockError::WouldBlock) if Instant::now() < deadline => {
                    thread::sleep(SHUTDOWN_POLL_INTERVAL);
                }
                Err(TryLockError::WouldBlock) => {
                    error!("Could not disconnect from the robot, a flip is still in progress");
                    break;
                }
            }
        }
        stopped
    }
}

fn worker_thread<B, C, K>(
    mut engine: TurnEngine<B, C, K>,
    rx: Receiver<UiCommand>,
    events: Sender<GameEvent>,
    snapshot: Arc<RwLock<GameSnapshot>>,
) where
    B: CoilBus,
    C: Camera,
    K: Classifier,
{
    let mut session = Session {
        events,
        human_name: String::from("Player"),
    };
    session.emit(GameEvent::GameStarted {
        difficulty: engine.snapshot().difficulty,
    });
    while let Ok(cmd) = rx.recv() {
        debug!(?cmd, "Handling command");
        let keep_going = session.handle(&mut engine, cmd);
        *snapshot.write().unwrap_or_else(PoisonError::into_inner) = engine.snapshot();
        if !keep_going {
            break;
        }
    }
    engine.stop_camera();
    info!("Turn worker stopped");
}

struct Session {
    events: Sender<GameEvent>,
    human_name: String,
}

impl Session {
    fn emit(&self, event: GameEvent) {
        // Nobody listening is not a reason to stop playing.
        let _ = self.events.send(event);
    }

    /// Returns `false` once the worker should exit.
    fn handle<B: CoilBus, C: Camera, K: Classifier>(
        &mut self,
        engine: &mut TurnEngine<B, C, K>,
        cmd: UiCommand,
    ) -> bool {
        match cmd {
            UiCommand::SelectCell { cell } => {
                let result = start_turn_if_needed(engine, Actor::Human)
                    .and_then(|()| engine.flip_human(cell));
                self.report(Actor::Human, result);
            }
            UiCommand::BeginAiTurn => self.play_ai_turn(engine),
            UiCommand::Calibrate => match engine.calibrate() {
                Ok(_) => self.emit(GameEvent::Calibrated),
                Err(err) => self.emit(GameEvent::CalibrationFailed {
                    reason: error_chain(&err),
                }),
            },
            UiCommand::NewGame => {
                engine.new_game();
                self.emit(GameEvent::GameStarted {
                    difficulty: engine.snapshot().difficulty,
                });
            }
            UiCommand::SetName { name } => {
                info!(name = %name, "Human player renamed");
                self.human_name = name;
            }
            UiCommand::SetDifficulty { difficulty } => engine.set_difficulty(difficulty),
            UiCommand::Quit => return false,
        }
        true
    }

    /// Lets the AI flip until it is the human's turn, the game is over, or a
    /// flip fails.
    fn play_ai_turn<B: CoilBus, C: Camera, K: Classifier>(
        &mut self,
        engine: &mut TurnEngine<B, C, K>,
    ) {
        if let Err(err) = start_turn_if_needed(engine, Actor::Ai) {
            self.report(Actor::Ai, Err(err));
            return;
        }
        while engine.next_actor() == Some(Actor::Ai) {
            if !self.report(Actor::Ai, engine.flip_ai()) {
                break;
            }
        }
    }

    /// Emits the events for one flip. Returns whether it went through.
    fn report(&self, actor: Actor, result: Result<FlipOutcome, TurnError>) -> bool {
        match result {
            Ok(outcome) => {
                self.emit(GameEvent::FlipAccepted {
                    actor: outcome.actor,
                    cell: outcome.cell,
                    label: outcome.label,
                });
                if let Some(resolution) = outcome.resolution {
                    self.emit(GameEvent::TurnResolved {
                        actor: outcome.actor,
                        resolution,
                        scores: outcome.scores,
                    });
                }
                if let Some(outcome_of_game) = outcome.game_over {
                    self.emit(GameEvent::GameOver {
                        outcome: outcome_of_game,
                        human: self.human_name.clone(),
                        scores: outcome.scores,
                    });
                }
                true
            }
            Err(TurnError::Rejected(reason)) => {
                debug!(%actor, ?reason, "Flip rejected");
                self.emit(GameEvent::FlipRejected { reason });
                false
            }
            Err(TurnError::WrongPhase { phase }) => {
                debug!(%actor, %phase, "Flip not possible now");
                self.emit(GameEvent::FlipRejected {
                    reason: FlipRejection::NotYourTurn,
                });
                false
            }
            Err(err @ (TurnError::Link(_) | TurnError::Vision(_))) => {
                self.emit(GameEvent::FlipAborted {
                    actor,
                    reason: error_chain(&err),
                });
                false
            }
        }
    }
}

/// Begins a turn of `actor` unless one is already running.
fn start_turn_if_needed<B: CoilBus, C: Camera, K: Classifier>(
    engine: &mut TurnEngine<B, C, K>,
    actor: Actor,
) -> Result<(), TurnError> {
    match engine.phase() {
        Phase::Idle | Phase::Handoff(_) => engine.begin_turn(actor),
        _ => Ok(()),
    }
}
