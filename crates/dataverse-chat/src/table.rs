//! Rendering query results as the markdown section revealed under an answer.

use serde_json::{Map, Number, Value};

/// Shown in place of a table when the query matched nothing.
pub const NO_ROWS: &str = "No rows returned.";
/// Shown in place of a table when the first row has no columns.
pub const NO_FIELDS: &str = "No fields available.";
/// Written into the result field when executing the query failed.
pub const QUERY_FAILED: &str = "Failed to execute query. Please try again.";

/// One result row: column name to value, in column order.
pub type Row = Map<String, Value>;

/// Render rows as a markdown table.
///
/// Columns come from the first row's keys. Later rows missing a column
/// render an empty cell.
pub fn markdown_table(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return NO_ROWS.to_string();
    };

    let headers: Vec<&str> = first.keys().map(String::as_str).collect();
    if headers.is_empty() {
        return NO_FIELDS.to_string();
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!("| {} |", headers.join(" | ")));
    lines.push(format!(
        "| {} |",
        headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|header| render_cell(row.get(*header)))
            .collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }

    lines.join("\n")
}

/// The full result section: heading, optional row count, then the table.
pub fn result_section(rows: &[Row], row_count: Option<&Number>) -> String {
    let mut lines = vec!["\n\n### Query Results".to_string()];
    if let Some(count) = row_count {
        lines.push(format!("Rows returned: {}", render_number(count)));
    }
    lines.push(markdown_table(rows));
    lines.join("\n")
}

fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => render_number(n),
        // Objects and arrays serialize to compact JSON, booleans to their literal.
        Some(other) => other.to_string(),
    }
}

/// Integral floats print without a fractional part (`1.0` as `1`).
pub fn render_number(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() => f.to_string(),
        _ => n.to_string(),
    }
}
