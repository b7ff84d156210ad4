use crate::exit_codes;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Serialize a value to JSON (pretty or compact).
pub fn to_json<T: Serialize>(value: &T, compact: bool) -> Result<String, String> {
    let json = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    json.map_err(|e| format!("JSON serialization failed: {}", e))
}

/// Write a JSON document to stdout or a file.
pub fn write_output(json: &str, path: Option<&Path>) -> Result<(), String> {
    match path {
        Some(path) => std::fs::write(path, format!("{}\n", json))
            .map_err(|e| format!("Failed to write '{}': {}", path.display(), e)),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json).map_err(|e| format!("Failed to write to stdout: {}", e))
        }
    }
}

/// Print a value as JSON on stdout and turn the outcome into an exit code.
pub fn emit_json<T: Serialize>(value: &T, compact: bool) -> i32 {
    match to_json(value, compact).and_then(|json| write_output(&json, None)) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}
