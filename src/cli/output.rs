// Output formatting for the CLI

use std::io::Write;

use clap::ValueEnum;

use crate::cli::CliResult;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    #[default]
    Pretty,
    /// Compact JSON
    Json,
    /// Key-value pairs
    KeyValue,
}

/// Formats command output and status messages.
pub struct OutputFormatter {
    format: OutputFormat,
    quiet: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }

    /// Write one JSON document in the selected format.
    pub fn output(&self, value: &serde_json::Value, writer: &mut dyn Write) -> CliResult<()> {
        match self.format {
            OutputFormat::Pretty => writeln!(writer, "{}", serde_json::to_string_pretty(value)?)?,
            OutputFormat::Json => writeln!(writer, "{}", serde_json::to_string(value)?)?,
            OutputFormat::KeyValue => self.output_key_value(value, writer)?,
        }
        Ok(())
    }

    fn output_key_value(&self, value: &serde_json::Value, writer: &mut dyn Write) -> CliResult<()> {
        if let Some(object) = value.as_object() {
            let mut entries: Vec<_> = object.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                writeln!(writer, "{key}: {}", Self::scalar(value))?;
            }
        } else {
            writeln!(writer, "{value}")?;
        }
        Ok(())
    }

    fn scalar(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => "(null)".to_string(),
            serde_json::Value::Array(items) => format!("[{} items]", items.len()),
            serde_json::Value::Object(map) => format!("{{{} entries}}", map.len()),
            other => other.to_string(),
        }
    }

    pub fn print_success(&self, message: &str) {
        if !self.quiet {
            println!("\u{2713} {message}");
        }
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("\u{2717} {message}");
    }

    pub fn print_info(&self, message: &str) {
        if !self.quiet {
            println!("  {message}");
        }
    }
}
