//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use wpharness_common::ProcessExit;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print rows in the requested format; `empty` is shown when there are none
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat, empty: &str) {
    if items.is_empty() && !matches!(format, OutputFormat::Json) {
        println!("{}", empty);
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Severity of a one-line status message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Done,
    Failed,
    Warn,
    Note,
}

impl Notice {
    fn tag(self) -> &'static str {
        match self {
            Notice::Done => "done",
            Notice::Failed => "failed",
            Notice::Warn => "warn",
            Notice::Note => "note",
        }
    }

    fn render(self, message: &str) -> String {
        let padded = format!("{:>6}", self.tag());
        let tag = padded.as_str();
        let tag = match self {
            Notice::Done => tag.green().bold(),
            Notice::Failed => tag.red().bold(),
            Notice::Warn => tag.yellow().bold(),
            Notice::Note => tag.cyan(),
        };
        format!("{} {}", tag, message)
    }
}

/// Print a status line; failures go to stderr
pub fn notice(kind: Notice, message: impl AsRef<str>) {
    let line = kind.render(message.as_ref());
    match kind {
        Notice::Failed => eprintln!("{}", line),
        _ => println!("{}", line),
    }
}

/// Outcome line for a stopped service
pub fn stopped(service: impl std::fmt::Display, exit: ProcessExit) {
    let kind = if exit.success() || exit == ProcessExit::Unknown {
        Notice::Done
    } else {
        Notice::Warn
    };
    notice(kind, format!("{} stopped ({})", service, exit));
}
