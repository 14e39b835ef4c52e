use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use memory_game::{
    visualize_board, Actor, BoardMemory, CellIndex, Difficulty, FlipRejection, GameOutcome,
    Label, Resolution, Scores, Strategist,
};
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error_chain, Camera, Classifier, CoilBus, Frame, RobotLink, Signal, TurnError,
    FRAMES_PER_DISCOVERY,
};

/// The robot link, shared between the turn engine and whoever needs to shut it down.
pub type SharedLink<B> = Arc<Mutex<RobotLink<B>>>;

/// Locks the link, ignoring poisoning.
///
/// A panic while holding the lock cannot leave the link in a state that is
/// worse than an aborted command, which the protocol recovers from anyway.
pub fn lock_link<B>(link: &Mutex<RobotLink<B>>) -> MutexGuard<'_, RobotLink<B>> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How long to wait for the robot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Until a tile is at the camera, or lifted in place.
    pub camera_timeout: Duration,
    /// Until the robot is back home after a flip.
    pub home_timeout: Duration,
    /// Pause after ordering the next camera waypoint.
    pub settle: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            camera_timeout: Duration::from_secs(30),
            home_timeout: Duration::from_secs(30),
            settle: Duration::from_millis(100),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No turn has started in this game.
    Idle,
    AwaitingFirstFlip,
    AwaitingSecondFlip,
    /// Only observable from within a flip.
    Resolving,
    /// The given actor plays next.
    Handoff(Actor),
    GameOver(GameOutcome),
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::AwaitingFirstFlip => write!(f, "waiting for the first flip"),
            Phase::AwaitingSecondFlip => write!(f, "waiting for the second flip"),
            Phase::Resolving => write!(f, "resolving a turn"),
            Phase::Handoff(actor) => write!(f, "waiting for the {} to begin", actor),
            Phase::GameOver(_) => write!(f, "over"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TurnState {
    pub active_actor: Actor,
    /// The cell flipped first in this turn, and what it showed.
    pub first_flip: Option<(CellIndex, Label)>,
}

/// The result of a successful flip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlipOutcome {
    pub actor: Actor,
    pub cell: CellIndex,
    pub label: Label,
    /// Whether the label was learned by this flip, rather than recalled.
    pub discovered: bool,
    /// Set on the second flip of a turn.
    pub resolution: Option<Resolution>,
    pub scores: Scores,
    pub game_over: Option<GameOutcome>,
}

/// What the user interface needs to draw the game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameSnapshot {
    pub phase: Phase,
    pub active_actor: Actor,
    pub scores: Scores,
    pub difficulty: Difficulty,
    /// Cells turned face up in the current turn.
    pub face_up: Vec<CellIndex>,
    /// Cells whose pair has been scored.
    pub revealed: Vec<CellIndex>,
}

/// Runs the game: sequences the robot, the camera and the classifier for
/// each flip, keeps the board memory and the score, and decides whose turn
/// it is.
///
/// All methods block until the robot is done. A flip that fails for any
/// reason leaves the game exactly as it was.
pub struct TurnEngine<B, C, K> {
    link: SharedLink<B>,
    camera: C,
    classifier: K,
    timing: Timing,
    rng: StdRng,
    memory: BoardMemory,
    scores: Scores,
    strategist: Strategist,
    /// Takes effect with the next game, unless no turn has started yet.
    difficulty: Difficulty,
    phase: Phase,
    turn: TurnState,
}

impl<B: CoilBus, C: Camera, K: Classifier> TurnEngine<B, C, K> {
    pub fn new(
        link: SharedLink<B>,
        camera: C,
        classifier: K,
        timing: Timing,
        difficulty: Difficulty,
        rng: StdRng,
    ) -> Self {
        Self {
            link,
            camera,
            classifier,
            timing,
            rng,
            memory: BoardMemory::new(),
            scores: Scores::default(),
            strategist: Strategist::new(difficulty),
            difficulty,
            phase: Phase::Idle,
            turn: TurnState {
                active_actor: Actor::Human,
                first_flip: None,
            },
        }
    }

    pub fn link(&self) -> &SharedLink<B> {
        &self.link
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn(&self) -> TurnState {
        self.turn
    }

    pub fn scores(&self) -> Scores {
        self.scores
    }

    pub fn memory(&self) -> &BoardMemory {
        &self.memory
    }

    /// The actor who may flip next, if the game is still running.
    pub fn next_actor(&self) -> Option<Actor> {
        match self.phase {
            Phase::Idle => Some(Actor::Human),
            Phase::AwaitingFirstFlip | Phase::AwaitingSecondFlip | Phase::Resolving => {
                Some(self.turn.active_actor)
            }
            Phase::Handoff(actor) => Some(actor),
            Phase::GameOver(_) => None,
        }
    }

    /// Forgets the board and the scores. The human begins.
    pub fn new_game(&mut self) {
        self.memory = BoardMemory::new();
        self.scores = Scores::default();
        self.strategist = Strategist::new(self.difficulty);
        self.phase = Phase::Idle;
        self.turn = TurnState {
            active_actor: Actor::Human,
            first_flip: None,
        };
        info!(difficulty = %self.difficulty, "New game");
    }

    pub fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.difficulty = difficulty;
        if self.phase == Phase::Idle {
            self.strategist.set_difficulty(difficulty);
        }
        debug!(%difficulty, "Difficulty set");
    }

    /// Starts a turn of `actor`.
    pub fn begin_turn(&mut self, actor: Actor) -> Result<(), TurnError> {
        match self.phase {
            Phase::Idle => {}
            Phase::Handoff(next) if next == actor => {}
            Phase::Handoff(_) => return Err(FlipRejection::NotYourTurn.into()),
            phase => return Err(TurnError::WrongPhase { phase }),
        }
        self.turn = TurnState {
            active_actor: actor,
            first_flip: None,
        };
        self.strategist.reset_turn();
        self.phase = Phase::AwaitingFirstFlip;
        debug!(%actor, "Turn begins");
        Ok(())
    }

    /// Flips the cell the human selected.
    ///
    /// Invalid selections are rejected before the robot moves, and do not
    /// use up the flip.
    pub fn flip_human(&mut self, selection: Option<usize>) -> Result<FlipOutcome, TurnError> {
        self.expect_flip_by(Actor::Human)?;
        let idx = selection.ok_or(FlipRejection::NoSelection)?;
        let cell = CellIndex::new(idx).ok_or(FlipRejection::OutOfBounds)?;
        if matches!(self.turn.first_flip, Some((first, _)) if first == cell) {
            return Err(FlipRejection::SameCellTwice.into());
        }
        if self.memory.is_revealed(cell) {
            return Err(FlipRejection::AlreadyRevealed.into());
        }
        self.perform_flip(Actor::Human, cell)
    }

    /// Flips the cell the strategist picks.
    pub fn flip_ai(&mut self) -> Result<FlipOutcome, TurnError> {
        self.expect_flip_by(Actor::Ai)?;
        let cell = self.strategist.choose(self.memory.view(), &mut self.rng);
        debug!(%cell, difficulty = %self.strategist.difficulty(), "AI chose");
        self.perform_flip(Actor::Ai, cell)
    }

    fn expect_flip_by(&self, actor: Actor) -> Result<(), TurnError> {
        match self.phase {
            Phase::AwaitingFirstFlip | Phase::AwaitingSecondFlip
                if self.turn.active_actor == actor =>
            {
                Ok(())
            }
            Phase::AwaitingFirstFlip | Phase::AwaitingSecondFlip => {
                Err(FlipRejection::NotYourTurn.into())
            }
            Phase::Handoff(next) if next != actor => Err(FlipRejection::NotYourTurn.into()),
            phase => Err(TurnError::WrongPhase { phase }),
        }
    }

    fn perform_flip(&mut self, actor: Actor, cell: CellIndex) -> Result<FlipOutcome, TurnError> {
        let known = self.memory.known_label(cell);
        let label = match self.present(cell, known) {
            Ok(label) => label,
            Err(err) => {
                warn!(%actor, %cell, err = %error_chain(&err), "Flip aborted");
                return Err(err);
            }
        };

        // Nothing is recorded until the robot is back home.
        let discovered = known.is_none();
        if discovered {
            self.memory.record_discovery(cell, label);
        }
        if actor == Actor::Ai {
            self.strategist.record_choice(cell);
        }
        info!(%actor, %cell, %label, discovered, "Flip");

        let resolution = match self.turn.first_flip {
            None => {
                self.turn.first_flip = Some((cell, label));
                self.phase = Phase::AwaitingSecondFlip;
                None
            }
            Some((first_cell, first_label)) => {
                Some(self.resolve(actor, [first_cell, cell], [first_label, label]))
            }
        };

        Ok(FlipOutcome {
            actor,
            cell,
            label,
            discovered,
            resolution,
            scores: self.scores,
            game_over: match self.phase {
                Phase::GameOver(outcome) => Some(outcome),
                _ => None,
            },
        })
    }

    fn resolve(&mut self, actor: Actor, cells: [CellIndex; 2], labels: [Label; 2]) -> Resolution {
        self.phase = Phase::Resolving;
        self.turn.first_flip = None;
        let resolution = if labels[0] == labels[1] {
            self.scores.award_pair(actor);
            self.memory.mark_revealed(labels[0]);
            self.phase = Phase::AwaitingFirstFlip;
            Resolution::Match {
                label: labels[0],
                cells,
            }
        } else {
            let next = actor.other();
            self.turn.active_actor = next;
            self.phase = Phase::Handoff(next);
            Resolution::NoMatch { cells, next }
        };
        info!(%actor, ?resolution, human = self.scores.human, ai = self.scores.ai, "Turn resolved");

        if let Some(outcome) = self.scores.decided() {
            info!(?outcome, "Game over");
            self.phase = Phase::GameOver(outcome);
        }
        debug!("Board:\n{}", visualize_board(self.memory.view()));
        resolution
    }

    /// Has the robot present the tile at `cell` and returns its label.
    ///
    /// Touches neither the memory nor the score.
    fn present(&mut self, cell: CellIndex, known: Option<Label>) -> Result<Label, TurnError> {
        let link = Arc::clone(&self.link);
        let mut link = lock_link(&link);
        link.send_cell(cell, known.is_none())?;
        let result = self.inspect(&mut link, known);
        let put_back = match known {
            // A tile lifted in place goes back down once the bank is cleared.
            Some(_) => link.clear_commands(),
            None => link.restore_and_clear(cell),
        };
        match result {
            Ok(label) => {
                put_back?;
                link.await_signal(Signal::HomeReached, self.timing.home_timeout)?;
                Ok(label)
            }
            Err(err) => {
                // Get the tile back on the board before giving up, so that
                // the next flip starts from home.
                let homed = put_back.and_then(|()| {
                    link.await_signal(Signal::HomeReached, self.timing.home_timeout)
                });
                if let Err(restore_err) = homed {
                    warn!(
                        %cell,
                        err = %error_chain(&restore_err),
                        "Could not place the tile back"
                    );
                }
                Err(err)
            }
        }
    }

    fn inspect(
        &mut self,
        link: &mut RobotLink<B>,
        known: Option<Label>,
    ) -> Result<Label, TurnError> {
        if let Some(label) = known {
            link.await_signal(Signal::CameraReached, self.timing.camera_timeout)?;
            return Ok(label);
        }
        let frames = self.capture_frames(link)?;
        self.classifier
            .classify(&frames)
            .map_err(TurnError::Vision)
    }

    /// Takes one frame per camera pose. After each frame the robot is sent
    /// on to the next waypoint, and the next frame waits until it is there.
    fn capture_frames(
        &mut self,
        link: &mut RobotLink<B>,
    ) -> Result<[Frame; FRAMES_PER_DISCOVERY], TurnError> {
        let mut frames: [Frame; FRAMES_PER_DISCOVERY] = Default::default();
        for frame in frames.iter_mut() {
            link.await_signal(Signal::CameraReached, self.timing.camera_timeout)?;
            *frame = self.camera.capture().map_err(TurnError::Vision)?;
            let waypoint = link.advance_camera_leg();
            link.goto_waypoint(waypoint)?;
            thread::sleep(self.timing.settle);
        }
        Ok(frames)
    }

    /// Brings a tile to the camera and takes a picture of it, so that the
    /// camera can be aligned.
    ///
    /// Not possible while a tile of the current turn is face up.
    pub fn calibrate(&mut self) -> Result<Frame, TurnError> {
        if self.phase == Phase::AwaitingSecondFlip || self.phase == Phase::Resolving {
            return Err(TurnError::WrongPhase { phase: self.phase });
        }
        let link = Arc::clone(&self.link);
        let mut link = lock_link(&link);
        link.set_test_mode(true)?;
        let result = link
            .await_signal(Signal::CameraReached, self.timing.camera_timeout)
            .map_err(TurnError::from)
            .and_then(|()| self.camera.capture().map_err(TurnError::Vision));
        match result {
            Ok(frame) => {
                link.set_test_mode(false)?;
                link.await_signal(Signal::HomeReached, self.timing.home_timeout)?;
                info!(width = frame.width, height = frame.height, "Calibration frame taken");
                Ok(frame)
            }
            Err(err) => {
                if let Err(reset_err) = link.set_test_mode(false) {
                    warn!(err = %error_chain(&reset_err), "Could not leave test mode");
                }
                Err(err)
            }
        }
    }

    /// Stops the camera, e.g. before exiting.
    pub fn stop_camera(&mut self) {
        self.camera.stop();
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let view = self.memory.view();
        GameSnapshot {
            phase: self.phase,
            active_actor: self.next_actor().unwrap_or(self.turn.active_actor),
            scores: self.scores,
            difficulty: self.strategist.difficulty(),
            face_up: self.turn.first_flip.iter().map(|&(cell, _)| cell).collect(),
            revealed: CellIndex::all()
                .filter(|&cell| view.is_revealed(cell))
                .collect(),
        }
    }
}
