use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::PAIR_COUNT;

/// One of the two sides of the game.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Human,
    Ai,
}

impl Actor {
    pub fn other(self) -> Actor {
        match self {
            Actor::Human => Actor::Ai,
            Actor::Ai => Actor::Human,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Human => write!(f, "human"),
            Actor::Ai => write!(f, "AI"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "actor", rename_all = "snake_case")]
pub enum GameOutcome {
    WonBy(Actor),
    Tie,
}

/// Pairs found by each side.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub human: u32,
    pub ai: u32,
}

impl Scores {
    pub fn get(&self, actor: Actor) -> u32 {
        match actor {
            Actor::Human => self.human,
            Actor::Ai => self.ai,
        }
    }

    pub fn award_pair(&mut self, actor: Actor) {
        match actor {
            Actor::Human => self.human += 1,
            Actor::Ai => self.ai += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.human + self.ai
    }

    /// Returns the outcome once the game is decided.
    ///
    /// A side wins as soon as it holds more than half of all pairs, even if
    /// tiles remain face down. If every pair is claimed without that
    /// happening, the game ends in a tie.
    pub fn decided(&self) -> Option<GameOutcome> {
        let majority = (PAIR_COUNT / 2) as u32;
        if self.human.max(self.ai) > majority || self.total() as usize >= PAIR_COUNT {
            Some(self.leader())
        } else {
            None
        }
    }

    /// The side with more pairs, regardless of whether the game is over.
    pub fn leader(&self) -> GameOutcome {
        match self.human.cmp(&self.ai) {
            Ordering::Less => GameOutcome::WonBy(Actor::Ai),
            Ordering::Equal => GameOutcome::Tie,
            Ordering::Greater => GameOutcome::WonBy(Actor::Human),
        }
    }
}
