//! Output formatting utilities for the CLI.
//!
//! Human output goes through `to_human`; `--json` swaps in `to_json`
//! with a `success` flag merged in. Failures are printed by `fail`.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Print a successful command's output in the selected mode.
pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        let mut value = result.to_json();
        if let serde_json::Value::Object(ref mut map) = value {
            map.insert("success".to_string(), serde_json::json!(true));
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_default()
        );
    } else {
        println!("{}", result.to_human());
    }
}

/// Print a failure in the selected mode. JSON goes to stdout, human
/// diagnostics to stderr.
pub fn fail(error: &dyn std::fmt::Display, json_mode: bool) {
    if json_mode {
        let value = serde_json::json!({
            "success": false,
            "error": error.to_string(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_default()
        );
    } else {
        eprintln!("Error: {error}");
    }
}

/// Borderless list table.
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

/// Truncate a string for table cells, appending an ellipsis on cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_len.saturating_sub(1)).collect();
    format!("{cut}…")
}
