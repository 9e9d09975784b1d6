//! Output formatting for CLI

use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Pretty JSON for `data`
pub fn to_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// Rows as JSON, a table, or one line per row
pub fn format_rows<T: Serialize + Tabled>(rows: &[T], format: OutputFormat, line: impl Fn(&T) -> String) -> String {
    match format {
        OutputFormat::Json => to_json(&rows),
        OutputFormat::Table => Table::new(rows).to_string(),
        OutputFormat::Text => rows.iter().map(line).collect::<Vec<_>>().join("\n"),
    }
}
