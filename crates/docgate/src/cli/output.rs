//! Table output for CLI commands

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Build a table with cyan headers; each cell may carry a color
pub fn build_table(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| match color {
                Some(c) => Cell::new(text).fg(c),
                None => Cell::new(text),
            })
            .collect();
        table.add_row(cells);
    }
    table
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    println!("{}", build_table(headers, rows));
}

/// Plain cell
pub fn cell(text: impl Into<String>) -> (String, Option<Color>) {
    (text.into(), None)
}
