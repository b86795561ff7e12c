use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

const SCHEMA_BASE: &str = "https://schemas.3leaps.dev/chanprims/cli/v1";

#[derive(Clone, Debug, Copy, ValueEnum)]
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

pub fn schema_id(name: &str) -> String {
    format!("{SCHEMA_BASE}/{name}.schema.json")
}

/// Print one command result.
///
/// `raw` is what `--format raw` writes; without it raw output falls back to
/// one value per line.
pub fn print_record<T: Serialize>(record: &T, raw: Option<&[u8]>, format: OutputFormat) {
    let value = serde_json::to_value(record).unwrap_or(Value::Null);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in fields(&value) {
                table.add_row(vec![key.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = fields(&value)
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
        OutputFormat::Raw => match raw {
            Some(bytes) => print_raw(bytes),
            None => {
                for (_, value) in fields(&value) {
                    println!("{value}");
                }
            }
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn fields(value: &Value) -> impl Iterator<Item = (&str, String)> {
    value
        .as_object()
        .into_iter()
        .flat_map(|object| object.iter())
        .filter(|(key, _)| key.as_str() != "schema_id")
        .map(|(key, value)| (key.as_str(), display(value)))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        schema_id: String,
        name: &'static str,
        size: usize,
        note: Option<&'static str>,
    }

    #[test]
    fn fields_skip_the_schema_id() {
        let value = serde_json::to_value(Sample {
            schema_id: schema_id("sample"),
            name: "x",
            size: 3,
            note: None,
        })
        .unwrap();
        let rendered: Vec<_> = fields(&value)
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        assert_eq!(rendered, vec!["name=x", "note=-", "size=3"]);
    }
}
