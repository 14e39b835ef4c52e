use serde::{Deserialize, Serialize};

/// Why a selected cell was not flipped.
///
/// A rejected flip changes nothing: the turn is not consumed and the same
/// player may select again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipRejection {
    /// The player did not select a cell.
    NoSelection,
    /// The cell was already flipped earlier in this turn.
    SameCellTwice,
    /// The cell belongs to a pair that has already been scored.
    AlreadyRevealed,
    /// The index does not name a cell on the board.
    OutOfBounds,
    /// It is the other player's turn, or the game is over.
    NotYourTurn,
    /// Another turn is still being carried out by the robot.
    Busy,
}

impl std::error::Error for FlipRejection {}

impl std::fmt::Display for FlipRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlipRejection::NoSelection => write!(f, "No cell was selected"),
            FlipRejection::SameCellTwice => {
                write!(f, "The cell was already flipped in this turn")
            }
            FlipRejection::AlreadyRevealed => {
                write!(f, "The cell belongs to a pair that was already found")
            }
            FlipRejection::OutOfBounds => write!(f, "The selection is not a cell on the board"),
            FlipRejection::NotYourTurn => write!(f, "It is not this player's turn"),
            FlipRejection::Busy => write!(f, "The robot is still busy with another turn"),
        }
    }
}
