use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use espapi_client::LogEntry;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One JSON document per line.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_log(entry: &LogEntry, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(entry),
        OutputFormat::Table | OutputFormat::Pretty => println!("{}", log_line(entry)),
        OutputFormat::Raw => println!("{}", entry.message),
    }
}

/// `[I][wifi]: connected`, the way the device prints it on its serial port.
pub fn log_line(entry: &LogEntry) -> String {
    let letter = match serde_json::to_value(entry.level) {
        Ok(serde_json::Value::String(name)) => match name.as_str() {
            "very_verbose" => "VV".to_string(),
            other => other.chars().next().unwrap_or('?').to_ascii_uppercase().to_string(),
        },
        _ => "?".to_string(),
    };
    format!("[{letter}][{}]: {}", entry.tag, entry.message)
}

/// Compact rendering of a serialized state for table cells.
pub fn state_cell(state: &serde_json::Value) -> String {
    match state {
        serde_json::Value::Object(fields) if fields.len() == 1 => fields
            .values()
            .next()
            .map(scalar)
            .unwrap_or_default(),
        serde_json::Value::Object(fields) => fields
            .iter()
            .map(|(name, value)| format!("{name}={}", scalar(value)))
            .collect::<Vec<_>>()
            .join(" "),
        other => scalar(other),
    }
}

fn scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use espapi_client::LogLevel;
    use serde_json::json;

    fn entry(level: LogLevel) -> LogEntry {
        LogEntry {
            level,
            tag: "wifi".into(),
            message: "connected".into(),
            send_failed: false,
        }
    }

    #[test]
    fn log_lines_use_level_letters() {
        assert_eq!(log_line(&entry(LogLevel::Info)), "[I][wifi]: connected");
        assert_eq!(log_line(&entry(LogLevel::VeryVerbose)), "[VV][wifi]: connected");
    }

    #[test]
    fn single_field_states_render_bare() {
        assert_eq!(state_cell(&json!({ "value": 21.5 })), "21.5");
        assert_eq!(state_cell(&json!({ "on": true })), "true");
    }

    #[test]
    fn multi_field_states_render_as_pairs() {
        assert_eq!(
            state_cell(&json!({ "on": true, "effect": "Rainbow", "last_frame": null })),
            "effect=Rainbow last_frame=- on=true"
        );
    }
}
