use crate::{BoardMemoryView, CellIndex, GRID_SIZE};

/// Draws the rig as seen from above, one column of cells per text column.
///
/// Unknown tiles are shown as `??`, known ones by their label's short name,
/// scored ones as `**`. Positions without a tile stay blank.
pub fn visualize_board(view: BoardMemoryView<'_>) -> String {
    let mut result = String::from("╭");
    for _ in 0..GRID_SIZE {
        result += "───";
    }
    result += "╮\n";
    for row in 0..GRID_SIZE {
        result += "│";
        for column in 0..GRID_SIZE {
            let cell_str = match CellIndex::at(column, row) {
                None => "  ",
                Some(cell) if view.is_revealed(cell) => "**",
                Some(cell) => view.known_label(cell).map_or("??", |label| label.short_name()),
            };
            result += &format!("{} ", cell_str);
        }
        result += "│\n";
    }
    result += "╰";
    for _ in 0..GRID_SIZE {
        result += "───";
    }
    result += "╯";
    result
}
