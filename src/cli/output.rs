//! Output formatting for CLI commands: JSON or a plain table.

use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Table,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            _ => anyhow::bail!("Unsupported output format: '{}'. Use 'json' or 'table'.", s),
        }
    }
}

pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Truncate string to maximum length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

pub fn print_table_header(columns: &[(&str, usize)]) {
    println!();
    let mut header = String::new();
    for (name, width) in columns {
        header.push_str(&format!("{:<width$} ", name, width = width));
    }
    println!("{}", header.trim());

    let total_width: usize = columns.iter().map(|(_, w)| w + 1).sum();
    println!("{}", "-".repeat(total_width.saturating_sub(1)));
}

/// Flatten a nested configuration tree into sorted `a.b.c` keys. Leaf values
/// are replaced by `[REDACTED]` unless `show_values` is set.
pub fn flatten_config(value: &Value, show_values: bool) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    flatten_into(String::new(), value, show_values, &mut entries);
    entries.sort();
    entries
}

fn flatten_into(prefix: String, value: &Value, show_values: bool, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                flatten_into(path, child, show_values, out);
            }
        }
        leaf => {
            let rendered = if !show_values {
                "[REDACTED]".to_string()
            } else if let Value::String(s) = leaf {
                s.clone()
            } else {
                leaf.to_string()
            };
            out.push((prefix, rendered));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hello", 3), "...");
    }

    #[test]
    fn test_flatten_config_redacts_by_default() {
        let tree = json!({
            "connectionstrings": { "appconfig": "Endpoint=https://x;Id=a;Secret=b" },
            "port": 5001
        });

        let redacted = flatten_config(&tree, false);
        assert_eq!(
            redacted,
            vec![
                ("connectionstrings.appconfig".to_string(), "[REDACTED]".to_string()),
                ("port".to_string(), "[REDACTED]".to_string()),
            ]
        );

        let shown = flatten_config(&tree, true);
        assert_eq!(shown[1], ("port".to_string(), "5001".to_string()));
    }
}
