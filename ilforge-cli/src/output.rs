use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Print `data` as JSON (if `--json`) or call `display_fn` for human-readable output.
pub fn print_output<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    display_fn: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        display_fn(data);
    }
    Ok(())
}

/// A borderless table. Columns listed in `numeric` are right aligned.
pub struct Listing {
    table: Table,
}

impl Listing {
    pub fn new(headers: &[&str], numeric: &[usize]) -> Self {
        let mut table = Table::new();
        table
            .load_preset(presets::NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(headers.to_vec());
        for index in 0..headers.len() {
            if let Some(column) = table.column_mut(index) {
                if numeric.contains(&index) {
                    column.set_cell_alignment(CellAlignment::Right);
                }
                column.set_padding((u16::from(index > 0), 1));
            }
        }
        Listing { table }
    }

    pub fn row(&mut self, values: Vec<String>) {
        self.table.add_row(values);
    }

    /// Print indented by two spaces, without trailing whitespace.
    pub fn print(&self) {
        for line in self.table.to_string().lines() {
            println!("  {}", line.trim_end());
        }
    }
}
