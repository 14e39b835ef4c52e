use quickcheck::{Arbitrary, Gen};

use crate::{BoardMemory, CellIndex, Difficulty, Label, CELL_COUNT};

/// A hidden board: which label lies on every cell.
#[derive(Clone, Debug)]
pub struct Layout(pub [Label; CELL_COUNT]);

/// A valid sequence of discoveries, drawn from a random [`Layout`].
#[derive(Clone, Debug)]
pub struct Discoveries(pub Vec<(CellIndex, Label)>);

/// A memory state reachable in a real game, with at least one cell in play.
#[derive(Clone, Debug)]
pub struct KnownBoard {
    pub memory: BoardMemory,
}

fn shuffle<T>(g: &mut Gen, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = usize::arbitrary(g) % (i + 1);
        items.swap(i, j);
    }
}

impl Arbitrary for Label {
    fn arbitrary(g: &mut Gen) -> Self {
        *g.choose(&Label::ALL).unwrap()
    }
}

impl Arbitrary for CellIndex {
    fn arbitrary(g: &mut Gen) -> Self {
        CellIndex::new(usize::arbitrary(g) % CELL_COUNT).unwrap()
    }
}

impl Arbitrary for Difficulty {
    fn arbitrary(g: &mut Gen) -> Self {
        *g.choose(&[Difficulty::Easy, Difficulty::Medium, Difficulty::Hard])
            .unwrap()
    }
}

impl Arbitrary for Layout {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut labels: Vec<Label> = Label::ALL.into_iter().chain(Label::ALL).collect();
        shuffle(g, &mut labels);
        Layout(labels.try_into().unwrap())
    }
}

impl Arbitrary for Discoveries {
    fn arbitrary(g: &mut Gen) -> Self {
        let layout = Layout::arbitrary(g);
        let mut cells: Vec<CellIndex> = CellIndex::all().collect();
        shuffle(g, &mut cells);
        cells.truncate(usize::arbitrary(g) % (CELL_COUNT + 1));
        Discoveries(
            cells
                .into_iter()
                .map(|cell| (cell, layout.0[cell.get()]))
                .collect(),
        )
    }
}

impl Arbitrary for KnownBoard {
    fn arbitrary(g: &mut Gen) -> Self {
        let Discoveries(discoveries) = Discoveries::arbitrary(g);
        let mut memory = BoardMemory::new();
        for (cell, label) in discoveries {
            memory.record_discovery(cell, label);
        }
        for label in Label::ALL {
            let remaining = memory.view().unrevealed_cells().count();
            if memory.is_pair_known(label) && remaining > 2 && bool::arbitrary(g) {
                memory.mark_revealed(label);
            }
        }
        KnownBoard { memory }
    }
}
