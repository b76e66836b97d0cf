//! Output formatting for CLI commands.

use serde::Serialize;

/// Result of a CLI command, printable as text or JSON.
pub trait CommandOutput: Serialize {
    /// Plain-text rendering.
    fn to_human(&self) -> String;

    /// JSON rendering; defaults to the serialized value.
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Print `result` in the selected mode.
pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Single-line JSON, used for streamed per-event results.
pub fn output_line<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", result.to_json());
    } else {
        println!("{}", result.to_human());
    }
}
