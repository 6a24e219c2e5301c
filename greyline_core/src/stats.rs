use crate::coverage::Location;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Formats a duration as `HH:MM:SS`. Hours are not wrapped at 24, so runs
/// longer than a day keep counting up.
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn center(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let left = (width - len) / 2;
    let right = width - len - left;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(right))
}

/// Renders the periodic box-drawing progress table.
///
/// The "Total Paths" column only appears for path-aware schedules; every
/// other column is always present.
pub struct StatusTable {
    path_aware: bool,
}

impl StatusTable {
    const BASE_LEFT: [(&'static str, usize); 3] = [
        ("Run Time", 23),
        ("Last Uniq Crash", 23),
        ("Total Execs", 19),
    ];
    const PATHS_COLUMN: (&'static str, usize) = ("Total Paths", 19);
    const BASE_RIGHT: [(&'static str, usize); 2] = [("Uniq Crashes", 16), ("Covered Lines", 19)];

    pub fn new(path_aware: bool) -> Self {
        Self { path_aware }
    }

    fn columns(&self) -> Vec<(&'static str, usize)> {
        let mut columns: Vec<(&'static str, usize)> = Self::BASE_LEFT.to_vec();
        if self.path_aware {
            columns.push(Self::PATHS_COLUMN);
        }
        columns.extend(Self::BASE_RIGHT);
        columns
    }

    fn border(&self, left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = self
            .columns()
            .iter()
            .map(|(_, width)| "─".repeat(*width))
            .collect();
        format!("{left}{}{right}", segments.join(&mid.to_string()))
    }

    fn cells(&self, values: &[String]) -> String {
        let padded: Vec<String> = self
            .columns()
            .iter()
            .zip(values)
            .map(|((_, width), value)| center(value, *width))
            .collect();
        format!("│{}│", padded.join("│"))
    }

    /// Top border plus the title row and its separator.
    pub fn header(&self) -> String {
        let titles: Vec<String> = self
            .columns()
            .iter()
            .map(|(title, _)| (*title).to_string())
            .collect();
        format!(
            "{}\n{}\n{}",
            self.border('┌', '┬', '┐'),
            self.cells(&titles),
            self.border('├', '┼', '┤'),
        )
    }

    /// One data row followed by a separator line.
    pub fn row(
        &self,
        run_time: Duration,
        last_crash: Duration,
        total_execs: u64,
        total_paths: Option<usize>,
        uniq_crashes: usize,
        covered: usize,
    ) -> String {
        let mut values = vec![
            format_hms(run_time),
            format_hms(last_crash),
            total_execs.to_string(),
        ];
        if self.path_aware {
            values.push(total_paths.unwrap_or(0).to_string());
        }
        values.push(uniq_crashes.to_string());
        values.push(covered.to_string());
        format!("{}\n{}", self.cells(&values), self.border('├', '┼', '┤'))
    }

    /// Closing border after the final row.
    pub fn footer(&self) -> String {
        self.border('└', '┴', '┘')
    }
}

/// End-of-run artifact: what was covered, which crash signatures were found
/// and when the run happened, serialized as JSON.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub covered_locations: Vec<Location>,
    pub unique_crash_signatures: Vec<String>,
    pub total_execs: u64,
    pub start_unix: u64,
    pub end_unix: u64,
}

impl RunSummary {
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create summary file {path:?}"))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("failed to serialize run summary to {path:?}"))?;
        Ok(())
    }
}
