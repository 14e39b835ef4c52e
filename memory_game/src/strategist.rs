use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{BoardMemoryView, CellIndex};

/// How well the AI makes use of what it has seen.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(format!("Unknown difficulty '{}'", s)),
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// Easy only plays a remembered pair once this many are fully known.
const EASY_KNOWN_PAIRS_THRESHOLD: usize = 3;

/// Medium only looks at this many of the earliest discovered labels.
const MEDIUM_MEMORY_SPAN: usize = 3;

/// Picks the cells the AI flips.
///
/// Besides the difficulty, it only remembers where it is within the current
/// turn: whether the next flip is the first or the second one, and which cell
/// the first flip took.
#[derive(Clone, Debug)]
pub struct Strategist {
    difficulty: Difficulty,
    second_flip: bool,
    previous_choice: Option<CellIndex>,
}

impl Strategist {
    pub fn new(difficulty: Difficulty) -> Self {
        Self {
            difficulty,
            second_flip: false,
            previous_choice: None,
        }
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.difficulty = difficulty;
    }

    pub fn previous_choice(&self) -> Option<CellIndex> {
        self.previous_choice
    }

    /// Picks the next cell to flip.
    ///
    /// This does not change the turn state, call [`Self::record_choice()`]
    /// once the flip has actually happened.
    ///
    /// Panics if no cell can be chosen, which only happens when no cell is
    /// left in play.
    pub fn choose<R: Rng + ?Sized>(&self, view: BoardMemoryView<'_>, rng: &mut R) -> CellIndex {
        // Labels that are still in play and have at least one known location,
        // earliest discovery first.
        let matchable: Vec<&[CellIndex]> = view
            .discovered_labels()
            .filter(|&label| !view.is_label_revealed(label))
            .map(|label| view.known_cells(label))
            .collect();

        let remembered_pair = match self.difficulty {
            Difficulty::Easy => {
                let known_pairs: Vec<&[CellIndex]> = matchable
                    .iter()
                    .copied()
                    .filter(|cells| cells.len() == 2)
                    .collect();
                if known_pairs.len() >= EASY_KNOWN_PAIRS_THRESHOLD {
                    known_pairs.first().copied()
                } else {
                    None
                }
            }
            Difficulty::Medium => matchable
                .iter()
                .take(MEDIUM_MEMORY_SPAN)
                .copied()
                .find(|cells| cells.len() == 2),
            Difficulty::Hard => matchable.iter().copied().find(|cells| cells.len() == 2),
        };
        if let Some(cells) = remembered_pair {
            return self.pick_from_pair(cells);
        }

        // Nothing worth remembering, so guess. Hard avoids re-flipping any
        // known tile, the others only avoid tiles that are out of play.
        let avoid_known = self.difficulty == Difficulty::Hard;
        let candidates: Vec<CellIndex> = view
            .unrevealed_cells()
            .filter(|&cell| Some(cell) != self.previous_choice)
            .filter(|&cell| !avoid_known || view.known_label(cell).is_none())
            .collect();
        *candidates
            .choose(rng)
            .expect("Strategist asked for a move, but no cell is left to flip")
    }

    fn pick_from_pair(&self, cells: &[CellIndex]) -> CellIndex {
        let choice = if self.second_flip { cells[1] } else { cells[0] };
        if Some(choice) == self.previous_choice {
            cells[0]
        } else {
            choice
        }
    }

    /// Advances the turn state after a flip of `cell` went through.
    pub fn record_choice(&mut self, cell: CellIndex) {
        if self.second_flip {
            self.reset_turn();
        } else {
            self.previous_choice = Some(cell);
            self.second_flip = true;
        }
    }

    /// Forgets the current turn, so that the next flip counts as the first.
    pub fn reset_turn(&mut self) {
        self.second_flip = false;
        self.previous_choice = None;
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::arbitrary::KnownBoard;
    use crate::{BoardMemory, Label};

    fn cell(idx: usize) -> CellIndex {
        CellIndex::new(idx).unwrap()
    }

    fn memory_with(discoveries: &[(usize, Label)]) -> BoardMemory {
        let mut memory = BoardMemory::new();
        for &(idx, label) in discoveries {
            memory.record_discovery(cell(idx), label);
        }
        memory
    }

    #[test]
    fn hard_guesses_only_unknown_cells_on_empty_board() {
        let memory = memory_with(&[(0, Label::Bee), (9, Label::Cow)]);
        let strategist = Strategist::new(Difficulty::Hard);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let choice = strategist.choose(memory.view(), &mut rng);
            assert!(memory.known_label(choice).is_none());
        }
    }

    #[test]
    fn hard_plays_remembered_pair_in_order() {
        let memory = memory_with(&[(3, Label::Owl), (17, Label::Owl)]);
        let mut strategist = Strategist::new(Difficulty::Hard);
        let mut rng = StdRng::seed_from_u64(0);

        let first = strategist.choose(memory.view(), &mut rng);
        assert_eq!(first, cell(3));
        strategist.record_choice(first);

        let second = strategist.choose(memory.view(), &mut rng);
        assert_eq!(second, cell(17));
        strategist.record_choice(second);
        assert_eq!(strategist.previous_choice(), None);
    }

    #[test]
    fn second_flip_never_repeats_the_first() {
        // The first flip discovered the second half of the fox pair.
        let memory = memory_with(&[(2, Label::Fox), (6, Label::Fox)]);
        let mut strategist = Strategist::new(Difficulty::Hard);
        strategist.record_choice(cell(6));
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(strategist.choose(memory.view(), &mut rng), cell(2));
    }

    #[test]
    fn easy_ignores_fewer_than_three_known_pairs() {
        let memory = memory_with(&[
            (0, Label::Owl),
            (1, Label::Owl),
            (2, Label::Pig),
            (3, Label::Pig),
        ]);
        let strategist = Strategist::new(Difficulty::Easy);
        let mut rng = StdRng::seed_from_u64(11);
        let picks: Vec<CellIndex> = (0..200)
            .map(|_| strategist.choose(memory.view(), &mut rng))
            .collect();
        assert!(picks.iter().any(|c| c.get() > 3));
    }

    #[test]
    fn easy_plays_pair_once_three_are_known() {
        let memory = memory_with(&[
            (10, Label::Owl),
            (11, Label::Owl),
            (12, Label::Pig),
            (13, Label::Pig),
            (14, Label::Cow),
            (15, Label::Cow),
        ]);
        let strategist = Strategist::new(Difficulty::Easy);
        let mut rng = StdRng::seed_from_u64(11);
        assert_eq!(strategist.choose(memory.view(), &mut rng), cell(10));
    }

    #[test]
    fn medium_only_remembers_earliest_labels() {
        let memory = memory_with(&[
            (0, Label::Bee),
            (1, Label::Bird),
            (2, Label::Cow),
            (3, Label::Duck),
            (4, Label::Duck),
        ]);
        let strategist = Strategist::new(Difficulty::Medium);
        let mut rng = StdRng::seed_from_u64(3);
        let picks: Vec<CellIndex> = (0..200)
            .map(|_| strategist.choose(memory.view(), &mut rng))
            .collect();
        assert!(picks.iter().any(|&c| c != cell(3)));

        let memory = memory_with(&[(0, Label::Bee), (1, Label::Bird), (2, Label::Bird)]);
        assert_eq!(strategist.choose(memory.view(), &mut rng), cell(1));
    }

    #[test]
    fn revealed_pairs_are_never_chosen() {
        let mut memory = memory_with(&[(0, Label::Seal), (1, Label::Seal)]);
        memory.mark_revealed(Label::Seal);
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            let strategist = Strategist::new(difficulty);
            let mut rng = StdRng::seed_from_u64(5);
            for _ in 0..100 {
                let choice = strategist.choose(memory.view(), &mut rng);
                assert!(!memory.is_revealed(choice));
            }
        }
    }

    #[test]
    #[should_panic(expected = "no cell is left")]
    fn choosing_on_finished_board_panics() {
        let mut memory = BoardMemory::new();
        for (idx, label) in Label::ALL.into_iter().enumerate() {
            memory.record_discovery(cell(2 * idx), label);
            memory.record_discovery(cell(2 * idx + 1), label);
            memory.mark_revealed(label);
        }
        let strategist = Strategist::new(Difficulty::Medium);
        strategist.choose(memory.view(), &mut StdRng::seed_from_u64(0));
    }

    #[test]
    fn difficulty_parses() {
        assert_eq!("HARD".parse::<Difficulty>(), Ok(Difficulty::Hard));
        assert!("impossible".parse::<Difficulty>().is_err());
    }

    quickcheck! {
        fn choice_is_deterministic_for_seed(board: KnownBoard, difficulty: Difficulty, seed: u64) -> bool {
            let strategist = Strategist::new(difficulty);
            let a = strategist.choose(board.memory.view(), &mut StdRng::seed_from_u64(seed));
            let b = strategist.choose(board.memory.view(), &mut StdRng::seed_from_u64(seed));
            a == b
        }

        fn hard_takes_known_pair_when_one_exists(board: KnownBoard, seed: u64) -> bool {
            let view = board.memory.view();
            let strategist = Strategist::new(Difficulty::Hard);
            let choice = strategist.choose(view, &mut StdRng::seed_from_u64(seed));
            let pair_known = view
                .discovered_labels()
                .any(|l| !view.is_label_revealed(l) && view.is_pair_known(l));
            match view.known_label(choice) {
                Some(label) => pair_known && view.is_pair_known(label),
                None => !pair_known,
            }
        }

        fn choice_is_always_in_play(board: KnownBoard, difficulty: Difficulty, seed: u64) -> bool {
            let strategist = Strategist::new(difficulty);
            let choice = strategist.choose(board.memory.view(), &mut StdRng::seed_from_u64(seed));
            !board.memory.is_revealed(choice)
        }
    }
}
