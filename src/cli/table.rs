//! Borderless comfy-table helpers.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};

/// A list table with uppercase headers and no borders.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render `table` under a count line, or a "none" message when empty.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{total} {noun}:\n{table}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_list() {
        let mut table = list_table(&["id", "status"]);
        table.add_row(vec!["t1", "pending"]);
        let rendered = render_list("test", &table, 1);
        assert!(rendered.starts_with("1 test:\n"));
        assert!(rendered.contains("STATUS"));
        assert_eq!(render_list("test", &list_table(&["id"]), 0), "No tests found.");
    }
}
