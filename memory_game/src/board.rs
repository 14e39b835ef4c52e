use serde::{Deserialize, Serialize};

use crate::{Label, LABEL_COUNT};

/// Number of tile positions on the rig.
pub const CELL_COUNT: usize = 28;

/// Number of pairs in a full game.
pub const PAIR_COUNT: usize = CELL_COUNT / 2;

/// Side length of the square grid the cells are laid out on.
pub const GRID_SIZE: u8 = 6;

/// Grid positions `(column, row)` that hold no tile.
///
/// The rig's last row is taken by the confirmation buttons and the two right
/// corners by the camera mount.
pub const EXCLUDED_POSITIONS: [(u8, u8); 8] = [
    (0, 4),
    (0, 5),
    (5, 4),
    (5, 5),
    (1, 5),
    (2, 5),
    (3, 5),
    (4, 5),
];

/// A stable cell identity in `0..CELL_COUNT`.
///
/// Cells are numbered column by column, skipping [`EXCLUDED_POSITIONS`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct CellIndex(u8);

impl CellIndex {
    pub fn new(idx: usize) -> Option<Self> {
        (idx < CELL_COUNT).then(|| Self(idx as u8))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// Iterates over all cells in index order.
    pub fn all() -> impl Iterator<Item = CellIndex> {
        (0..CELL_COUNT as u8).map(CellIndex)
    }

    /// The `(column, row)` of this cell on the grid.
    pub fn grid_position(self) -> (u8, u8) {
        grid_positions()
            .nth(self.get())
            .expect("every cell index has a grid position")
    }

    /// The cell at `(column, row)`, if that position holds a tile.
    pub fn at(column: u8, row: u8) -> Option<CellIndex> {
        grid_positions()
            .position(|pos| pos == (column, row))
            .and_then(CellIndex::new)
    }
}

impl TryFrom<usize> for CellIndex {
    type Error = String;

    fn try_from(idx: usize) -> Result<Self, Self::Error> {
        CellIndex::new(idx).ok_or_else(|| format!("Cell index {} out of range", idx))
    }
}

impl From<CellIndex> for usize {
    fn from(cell: CellIndex) -> usize {
        cell.get()
    }
}

impl std::fmt::Display for CellIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn grid_positions() -> impl Iterator<Item = (u8, u8)> {
    (0..GRID_SIZE)
        .flat_map(|column| (0..GRID_SIZE).map(move |row| (column, row)))
        .filter(|pos| !EXCLUDED_POSITIONS.contains(pos))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct CellMemory {
    known: Option<Label>,
    revealed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SymbolMemory {
    /// At most two entries, in discovery order.
    cells: Vec<CellIndex>,
    revealed: bool,
}

/// Everything that has been learned about the board during one game.
///
/// Knowledge only ever grows: a cell's symbol is learned once and a pair is
/// revealed once, and neither is forgotten.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardMemory {
    cells: [CellMemory; CELL_COUNT],
    symbols: [SymbolMemory; LABEL_COUNT],
    /// Labels in the order they were first seen.
    discovery_order: Vec<Label>,
}

impl Default for BoardMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardMemory {
    /// Creates an empty memory, where nothing is known.
    pub fn new() -> Self {
        Self {
            cells: [CellMemory::default(); CELL_COUNT],
            symbols: std::array::from_fn(|_| SymbolMemory::default()),
            discovery_order: Vec::with_capacity(LABEL_COUNT),
        }
    }

    /// Records that `cell` holds `label`.
    ///
    /// Panics if the cell was already known, or if both cells of `label`
    /// are already known. Either means the vision model or the caller
    /// contradicted earlier observations.
    pub fn record_discovery(&mut self, cell: CellIndex, label: Label) {
        let cell_memory = &mut self.cells[cell.get()];
        assert!(
            cell_memory.known.is_none(),
            "Cell {} was already discovered as {:?}",
            cell,
            cell_memory.known
        );
        let symbol = &mut self.symbols[label.to_index()];
        assert!(
            symbol.cells.len() < 2,
            "Third discovery of {} at {}, already known at {:?}",
            label,
            cell,
            symbol.cells
        );
        cell_memory.known = Some(label);
        if symbol.cells.is_empty() {
            self.discovery_order.push(label);
        }
        symbol.cells.push(cell);
    }

    /// Marks the pair of `label` as scored and both its cells as revealed.
    ///
    /// Panics unless both cells of the pair are known.
    pub fn mark_revealed(&mut self, label: Label) {
        let symbol = &mut self.symbols[label.to_index()];
        assert!(
            symbol.cells.len() == 2,
            "Cannot reveal {} with known cells {:?}",
            label,
            symbol.cells
        );
        symbol.revealed = true;
        for cell in &symbol.cells {
            self.cells[cell.get()].revealed = true;
        }
    }

    pub fn is_pair_known(&self, label: Label) -> bool {
        self.view().is_pair_known(label)
    }

    pub fn known_label(&self, cell: CellIndex) -> Option<Label> {
        self.view().known_label(cell)
    }

    pub fn is_revealed(&self, cell: CellIndex) -> bool {
        self.view().is_revealed(cell)
    }

    /// A read-only view, e.g. for the [`Strategist`](crate::Strategist).
    pub fn view(&self) -> BoardMemoryView<'_> {
        BoardMemoryView { memory: self }
    }
}

/// Read-only access to a [`BoardMemory`].
#[derive(Clone, Copy, Debug)]
pub struct BoardMemoryView<'a> {
    memory: &'a BoardMemory,
}

impl<'a> BoardMemoryView<'a> {
    pub fn known_label(self, cell: CellIndex) -> Option<Label> {
        self.memory.cells[cell.get()].known
    }

    /// Whether the cell belongs to a pair that has been scored.
    pub fn is_revealed(self, cell: CellIndex) -> bool {
        self.memory.cells[cell.get()].revealed
    }

    /// The cells known to hold `label`, in discovery order.
    pub fn known_cells(self, label: Label) -> &'a [CellIndex] {
        &self.memory.symbols[label.to_index()].cells
    }

    pub fn is_pair_known(self, label: Label) -> bool {
        self.known_cells(label).len() == 2
    }

    pub fn is_label_revealed(self, label: Label) -> bool {
        self.memory.symbols[label.to_index()].revealed
    }

    /// Labels with at least one known cell, in the order they were first seen.
    pub fn discovered_labels(self) -> impl Iterator<Item = Label> + 'a {
        self.memory.discovery_order.iter().copied()
    }

    /// Cells that are still in play.
    pub fn unrevealed_cells(self) -> impl Iterator<Item = CellIndex> + 'a {
        CellIndex::all().filter(move |&cell| !self.is_revealed(cell))
    }

    /// Number of pairs that have been scored by either player.
    pub fn revealed_pairs(self) -> usize {
        self.memory.symbols.iter().filter(|s| s.revealed).count()
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;
    use crate::arbitrary::Discoveries;

    fn cell(idx: usize) -> CellIndex {
        CellIndex::new(idx).unwrap()
    }

    #[test]
    fn layout_skips_excluded_positions() {
        assert_eq!(grid_positions().count(), CELL_COUNT);
        assert_eq!(cell(0).grid_position(), (0, 0));
        assert_eq!(cell(3).grid_position(), (0, 3));
        // Column 0 only has four cells
        assert_eq!(cell(4).grid_position(), (1, 0));
        assert_eq!(cell(27).grid_position(), (5, 3));
        assert_eq!(CellIndex::at(0, 5), None);
        for c in CellIndex::all() {
            let (column, row) = c.grid_position();
            assert_eq!(CellIndex::at(column, row), Some(c));
        }
    }

    #[test]
    fn cell_index_bounds() {
        assert!(CellIndex::new(CELL_COUNT - 1).is_some());
        assert!(CellIndex::new(CELL_COUNT).is_none());
        assert!(serde_json::from_str::<CellIndex>("28").is_err());
        assert_eq!(serde_json::from_str::<CellIndex>("5").unwrap(), cell(5));
    }

    #[test]
    fn pair_becomes_known_after_two_discoveries() {
        let mut memory = BoardMemory::new();
        memory.record_discovery(cell(3), Label::Owl);
        assert!(!memory.is_pair_known(Label::Owl));
        memory.record_discovery(cell(17), Label::Owl);
        assert!(memory.is_pair_known(Label::Owl));
        assert_eq!(memory.view().known_cells(Label::Owl), &[cell(3), cell(17)]);
        assert_eq!(memory.known_label(cell(17)), Some(Label::Owl));
    }

    #[test]
    fn mark_revealed_reveals_both_cells() {
        let mut memory = BoardMemory::new();
        memory.record_discovery(cell(1), Label::Pig);
        memory.record_discovery(cell(8), Label::Pig);
        memory.mark_revealed(Label::Pig);
        assert!(memory.is_revealed(cell(1)));
        assert!(memory.is_revealed(cell(8)));
        assert!(memory.view().is_label_revealed(Label::Pig));
        assert_eq!(memory.view().revealed_pairs(), 1);
        assert_eq!(memory.view().unrevealed_cells().count(), CELL_COUNT - 2);
    }

    #[test]
    #[should_panic(expected = "Third discovery")]
    fn third_discovery_panics() {
        let mut memory = BoardMemory::new();
        memory.record_discovery(cell(0), Label::Fox);
        memory.record_discovery(cell(1), Label::Fox);
        memory.record_discovery(cell(2), Label::Fox);
    }

    #[test]
    #[should_panic(expected = "already discovered")]
    fn rediscovering_a_cell_panics() {
        let mut memory = BoardMemory::new();
        memory.record_discovery(cell(0), Label::Fox);
        memory.record_discovery(cell(0), Label::Cow);
    }

    #[test]
    fn discovery_order_is_first_seen() {
        let mut memory = BoardMemory::new();
        memory.record_discovery(cell(5), Label::Seal);
        memory.record_discovery(cell(6), Label::Bee);
        memory.record_discovery(cell(7), Label::Seal);
        let order: Vec<Label> = memory.view().discovered_labels().collect();
        assert_eq!(order, vec![Label::Seal, Label::Bee]);
    }

    quickcheck! {
        fn known_label_never_changes(discoveries: Discoveries) -> bool {
            let mut memory = BoardMemory::new();
            let mut seen = Vec::new();
            for (cell, label) in discoveries.0 {
                memory.record_discovery(cell, label);
                seen.push((cell, label));
                let consistent = seen.iter().all(|&(c, l)| memory.known_label(c) == Some(l));
                if !consistent {
                    return false;
                }
            }
            true
        }

        fn at_most_two_cells_per_label(discoveries: Discoveries) -> bool {
            let mut memory = BoardMemory::new();
            for (cell, label) in discoveries.0 {
                memory.record_discovery(cell, label);
            }
            Label::ALL.into_iter().all(|label| memory.view().known_cells(label).len() <= 2)
        }
    }
}
