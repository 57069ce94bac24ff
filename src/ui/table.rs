use std::fmt::Display;

use comfy_table::{presets::NOTHING, Attribute, Cell, ContentArrangement, Table};

const COLUMN_PADDING: (u16, u16) = (0, 4);

/// Borderless, non-wrapping table with dim bold headers. Column padding is
/// applied after the header so every column gets it.
pub fn report_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Disabled);
    table.set_header(headers.iter().map(|text| {
        Cell::new(text)
            .add_attribute(Attribute::Bold)
            .add_attribute(Attribute::Dim)
    }));
    for i in 0..table.column_count() {
        if let Some(col) = table.column_mut(i) {
            col.set_padding(COLUMN_PADDING);
        }
    }
    table
}

/// Renders `value`, or `-` when absent.
pub fn or_dash<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
