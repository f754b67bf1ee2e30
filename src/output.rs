use std::io::{self, Write};

use chrono::Local;
use serde::Serialize;

use crate::app::{BuildSummary, FailureKind, ProgressEvent, ProgressSink, Session};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// What `build` and `run` report once the archive is on disk.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport<'a> {
    pub archive: String,
    pub entries: Vec<String>,
    #[serde(flatten)]
    pub summary: &'a BuildSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectReport<'a> {
    pub name: &'a str,
    pub selected: Vec<&'a str>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_session(session: &Session) -> io::Result<()> {
        Self::print_json(session)
    }

    pub fn print_build(report: &BuildReport<'_>) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_select(report: &SelectReport<'_>) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Timestamped progress lines on stderr.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        eprintln!("{}", format_event(&event, &Local::now().format("%H:%M:%S").to_string()));
    }
}

pub fn format_event(event: &ProgressEvent, timestamp: &str) -> String {
    let mut line = format!("[{timestamp}] phase={}", event.phase);
    if let Some(source) = &event.source {
        line.push_str(&format!("; source={source}"));
    }
    line.push_str(&format!("; {}", event.message));
    if let Some(elapsed) = event.elapsed {
        line.push_str(&format!(" ({:.1}s)", elapsed.as_secs_f64()));
    }
    line
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_session_summary(session: &Session) {
    println!("{CYAN}OpenAlex candidates{RESET}");
    for entry in &session.entries {
        if let Some(failure) = &entry.failure {
            println!("{RED}x {}: {}{RESET}", entry.name, failure.message);
            continue;
        }
        println!("{GREEN}{}{RESET}", entry.name);
        if entry.candidates.is_empty() && !entry.selected.is_empty() {
            for id in &entry.selected {
                println!("{GREEN}  [x] {id}{RESET}");
            }
        }
        for candidate in &entry.candidates {
            let mark = if entry.selected.contains(&candidate.source_id) {
                "[x]"
            } else {
                "[ ]"
            };
            println!("  {mark} {}", candidate.label());
        }
    }
}

pub fn print_build_summary(report: &BuildReport<'_>) {
    let summary = report.summary;
    println!("{CYAN}OpenAlex preprint export{RESET}");
    println!(
        "{GREEN}Packaged sources: {}{RESET}",
        summary.processed.len()
    );
    println!("{YELLOW}Failures: {}{RESET}", summary.failures.len());

    for source in &summary.processed {
        let coverage = match (source.works_scanned, source.works_expected) {
            (Some(scanned), Some(expected)) => format!(", works {scanned}/{expected}"),
            (Some(scanned), None) => format!(", works {scanned}"),
            _ => String::new(),
        };
        println!(
            "{GREEN}  {} {} ({} ms{coverage}){RESET}",
            source.source_id, source.display_name, source.elapsed_ms
        );
    }
    for failure in &summary.failures {
        let kind = match failure.kind {
            FailureKind::NotFound => "not found",
            FailureKind::Fetch => "fetch failed",
        };
        println!(
            "{RED}  {} {}: {}{RESET}",
            failure.source_id.as_deref().unwrap_or(&failure.input),
            kind,
            failure.message
        );
    }
    for merged in &summary.merged {
        println!(
            "{YELLOW}  {} is the same source as {}, packaged once{RESET}",
            merged.selected, merged.source_id
        );
    }
    if summary.stopped {
        println!(
            "{YELLOW}Stopped early, skipped: {}{RESET}",
            summary.skipped.join(", ")
        );
    }
    println!("{CYAN}Archive: {} ({} entries){RESET}", report.archive, report.entries.len());
}
