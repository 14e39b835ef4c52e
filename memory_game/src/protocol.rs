use serde::{Deserialize, Serialize};

use crate::{Actor, CellIndex, Difficulty, FlipRejection, GameOutcome, Label, Scores};

/// An input from the user interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UiCommand {
    /// The human player selected a cell.
    ///
    /// `cell` may be omitted when the click did not land on a cell.
    SelectCell {
        #[serde(default)]
        cell: Option<usize>,
    },
    /// The AI should play its turn.
    BeginAiTurn,
    /// Move a tile to the camera so the camera can be aligned.
    Calibrate,
    /// Forget everything and start over, with the human moving first.
    NewGame,
    /// Name shown for the human player.
    SetName { name: String },
    /// Applies to the next game.
    SetDifficulty { difficulty: Difficulty },
    /// Disconnect from the robot and exit.
    Quit,
}

/// How a turn ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Both cells showed `label`. The same actor plays again.
    Match {
        label: Label,
        cells: [CellIndex; 2],
    },
    /// The cells differ and are turned face down again.
    NoMatch {
        cells: [CellIndex; 2],
        next: Actor,
    },
}

/// An output for the user interface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameEvent {
    /// The board was reset. The human moves first.
    GameStarted { difficulty: Difficulty },
    /// A tile was presented and identified.
    FlipAccepted {
        actor: Actor,
        cell: CellIndex,
        label: Label,
    },
    /// The selection was refused, the player may select again.
    FlipRejected { reason: FlipRejection },
    /// The robot or camera failed during the flip.
    ///
    /// Nothing was recorded and the actor keeps the turn.
    FlipAborted { actor: Actor, reason: String },
    TurnResolved {
        actor: Actor,
        resolution: Resolution,
        scores: Scores,
    },
    GameOver {
        outcome: GameOutcome,
        human: String,
        scores: Scores,
    },
    Calibrated,
    CalibrationFailed { reason: String },
}
