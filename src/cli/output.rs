//! CLI output formatting
//!
//! Provides colored output, spinners, and formatting utilities.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::core::state::RunStatus;

/// Output helper for consistent CLI formatting
pub struct Output;

impl Output {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue(), message);
    }

    /// Print a header
    pub fn header(message: &str) {
        println!("\n{}", message.bold());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.dimmed(), value);
    }

    /// Print a list item
    pub fn list_item(item: &str) {
        println!("  • {}", item);
    }

    /// Print captured step output, indented and dimmed
    pub fn captured(output: &str) {
        for line in output.lines() {
            eprintln!("    {}", line.dimmed());
        }
    }

    /// Create a spinner with a message
    pub fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Format a branch name consistently
    pub fn branch_name(name: &str) -> String {
        name.magenta().to_string()
    }

    /// Format a commit id (short form)
    pub fn commit_id(id: &str) -> String {
        id.get(..7).unwrap_or(id).yellow().to_string()
    }

    /// Format a run status
    pub fn status(status: RunStatus) -> String {
        match status {
            RunStatus::Succeeded => "succeeded".green().to_string(),
            RunStatus::Failed => "failed".red().to_string(),
            RunStatus::Skipped => "skipped".yellow().to_string(),
            RunStatus::Running => "running".cyan().to_string(),
        }
    }

    /// Format a duration in milliseconds for humans
    pub fn duration_ms(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else if ms < 60_000 {
            format!("{:.1}s", ms as f64 / 1000.0)
        } else {
            format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
        }
    }
}

/// Table builder for formatted output
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    column_widths: Vec<usize>,
}

impl Table {
    /// Create a new table with headers
    pub fn new(headers: Vec<&str>) -> Self {
        let headers: Vec<String> = headers.into_iter().map(|s| s.to_string()).collect();
        let column_widths = headers.iter().map(|h| h.len()).collect();
        Self {
            headers,
            rows: Vec::new(),
            column_widths,
        }
    }

    /// Add a row to the table
    pub fn add_row(&mut self, row: Vec<&str>) {
        let row: Vec<String> = row.into_iter().map(|s| s.to_string()).collect();
        for (i, cell) in row.iter().enumerate() {
            if i < self.column_widths.len() {
                self.column_widths[i] = self.column_widths[i].max(cell.chars().count());
            }
        }
        self.rows.push(row);
    }

    /// Render the table, one line per row after the header and separator
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.rows.len() + 2);

        lines.push(
            self.headers
                .iter()
                .enumerate()
                .map(|(i, h)| format!("{:width$}", h, width = self.column_widths[i]))
                .collect::<Vec<_>>()
                .join("  "),
        );

        lines.push(
            self.column_widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("  "),
        );

        for row in &self.rows {
            lines.push(
                row.iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        let width = self.column_widths.get(i).copied().unwrap_or(cell.len());
                        format!("{:width$}", cell, width = width)
                    })
                    .collect::<Vec<_>>()
                    .join("  "),
            );
        }

        lines
    }

    /// Print the table
    pub fn print(&self) {
        for (i, line) in self.render().iter().enumerate() {
            match i {
                0 => println!("{}", line.bold()),
                1 => println!("{}", line.dimmed()),
                _ => println!("{}", line),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_columns_align() {
        let mut table = Table::new(vec!["Run", "Status", "Commit"]);
        table.add_row(vec!["20240319T030000.000Z-1", "succeeded", "abc1234"]);
        table.add_row(vec!["r2", "failed", "-"]);

        let lines = table.render();
        assert_eq!(lines.len(), 4);
        let status_col = lines[0].find("Status").unwrap();
        assert_eq!(lines[2].find("succeeded").unwrap(), status_col);
        assert_eq!(lines[3].find("failed").unwrap(), status_col);
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(Output::duration_ms(250), "250ms");
        assert_eq!(Output::duration_ms(1500), "1.5s");
        assert_eq!(Output::duration_ms(125_000), "2m05s");
    }
}
