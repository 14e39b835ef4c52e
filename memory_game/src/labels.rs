use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of distinct symbols printed on the tiles.
pub const LABEL_COUNT: usize = 14;

/// The identity of the image printed on a tile.
///
/// Every label exists on exactly two tiles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Label {
    Bee,
    Bird,
    Cow,
    Duck,
    Elephant,
    Fox,
    Frog,
    Groundhog,
    Ladybug,
    Monkey,
    Octopus,
    Owl,
    Pig,
    Seal,
}

impl Label {
    /// All labels, in the order the vision model reports its classes.
    ///
    /// This order is also used to break ties in a majority vote.
    pub const ALL: [Label; LABEL_COUNT] = [
        Label::Bee,
        Label::Bird,
        Label::Cow,
        Label::Duck,
        Label::Elephant,
        Label::Fox,
        Label::Frog,
        Label::Groundhog,
        Label::Ladybug,
        Label::Monkey,
        Label::Octopus,
        Label::Owl,
        Label::Pig,
        Label::Seal,
    ];

    /// An index in `0..LABEL_COUNT`, the position in [`Label::ALL`].
    pub fn to_index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Label> {
        Self::ALL.get(idx).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Label::Bee => "bee",
            Label::Bird => "bird",
            Label::Cow => "cow",
            Label::Duck => "duck",
            Label::Elephant => "elephant",
            Label::Fox => "fox",
            Label::Frog => "frog",
            Label::Groundhog => "groundhog",
            Label::Ladybug => "ladybug",
            Label::Monkey => "monkey",
            Label::Octopus => "octopus",
            Label::Owl => "owl",
            Label::Pig => "pig",
            Label::Seal => "seal",
        }
    }

    /// Two-letter abbreviation used by the board visualization.
    pub fn short_name(self) -> &'static str {
        &self.name()[..2]
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|label| label.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown label '{}'", s))
    }
}

/// Picks the label predicted most often.
///
/// Ties are broken in favor of the label that comes first in [`Label::ALL`].
/// Returns `None` only for an empty input.
pub fn majority_vote(predictions: impl IntoIterator<Item = Label>) -> Option<Label> {
    let mut votes = [0usize; LABEL_COUNT];
    let mut any = false;
    for label in predictions {
        votes[label.to_index()] += 1;
        any = true;
    }
    if !any {
        return None;
    }
    let mut best = 0;
    for idx in 1..LABEL_COUNT {
        if votes[idx] > votes[best] {
            best = idx;
        }
    }
    Label::from_index(best)
}
