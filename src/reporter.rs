use crate::checks::Severity;
use colored::{ColoredString, Colorize};
use std::io::{self, IsTerminal, Write};

/// Outcome class of a host block or of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Passed,
    Warning,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus<'a> {
    Connected,
    Failed(&'a str),
    Interrupted,
}

/// Semantic output sink. Implementations decide how severities look; the
/// callers only classify.
pub trait Reporter: Send {
    fn raw(&mut self, line: &str);

    fn section(&mut self, title: &str);

    fn host_connection(&mut self, host: &str, status: ConnectionStatus<'_>);

    /// Opens the block of a host (or of the cluster) that has findings.
    /// Opens a host or cluster block with the severity of its first finding.
    fn start_block(&mut self, label: &str, severity: Severity);

    fn finding(&mut self, severity: Severity, code: &str, message: &str);

    fn finish_block(&mut self, label: &str, status: BlockStatus);

    fn summary(&mut self, line: &str, status: BlockStatus);
}

pub struct TerminalReporter<W: Write + Send = io::Stdout> {
    out: W,
}

impl TerminalReporter<io::Stdout> {
    /// Colour is disabled when asked to, or when stdout is not a terminal.
    pub fn stdout(no_color: bool) -> Self {
        let out = io::stdout();
        if no_color || !out.is_terminal() {
            colored::control::set_override(false);
        }
        Self { out }
    }
}

impl<W: Write + Send> TerminalReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn line(&mut self, text: impl std::fmt::Display) {
        // A closed stdout (e.g. piped into `head`) is not worth aborting a run for.
        let _ = writeln!(self.out, "{text}");
    }
}

impl<W: Write + Send> Reporter for TerminalReporter<W> {
    fn raw(&mut self, line: &str) {
        self.line(line);
    }

    fn section(&mut self, title: &str) {
        self.line(format!("\n[{title:^15}]\n").bold());
    }

    fn host_connection(&mut self, host: &str, status: ConnectionStatus<'_>) {
        let status = match status {
            ConnectionStatus::Connected => "connected".green(),
            ConnectionStatus::Failed(_) => "failed".red(),
            ConnectionStatus::Interrupted => "interrupted".yellow(),
        };
        self.line(format!("Host: {host:<40}  connection: [{status}]"));
    }

    fn start_block(&mut self, label: &str, severity: Severity) {
        self.line(format!(" {}", block_label(label, severity)));
    }

    fn finding(&mut self, severity: Severity, code: &str, message: &str) {
        let code = match severity {
            Severity::Error => code.red(),
            Severity::Warning => code.yellow(),
        };
        self.line(format!("   {code}: {message}"));
    }

    fn finish_block(&mut self, label: &str, status: BlockStatus) {
        // Failing blocks were already opened with their label.
        if status == BlockStatus::Passed {
            self.line(format!(" {}", label.green()));
        }
    }

    fn summary(&mut self, line: &str, status: BlockStatus) {
        let line = match status {
            BlockStatus::Passed => line.green(),
            BlockStatus::Warning => line.yellow(),
            BlockStatus::Failed => line.red(),
        };
        self.line(format!("\n{line}"));
        let _ = self.out.flush();
    }
}

fn block_label(label: &str, severity: Severity) -> ColoredString {
    match severity {
        Severity::Error => label.red(),
        Severity::Warning => label.yellow(),
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        Raw(String),
        Section(String),
        Connection(String, String),
        StartBlock(String, Severity),
        Finding(Severity, String, String),
        FinishBlock(String, BlockStatus),
        Summary(String, BlockStatus),
    }

    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        pub events: Vec<Event>,
    }

    impl RecordingReporter {
        pub fn findings(&self) -> Vec<(Severity, &str)> {
            self.events
                .iter()
                .filter_map(|event| match event {
                    Event::Finding(severity, code, _) => Some((*severity, code.as_str())),
                    _ => None,
                })
                .collect()
        }

        pub fn summary(&self) -> Option<&str> {
            self.events.iter().rev().find_map(|event| match event {
                Event::Summary(line, _) => Some(line.as_str()),
                _ => None,
            })
        }
    }

    impl Reporter for RecordingReporter {
        fn raw(&mut self, line: &str) {
            self.events.push(Event::Raw(line.to_string()));
        }

        fn section(&mut self, title: &str) {
            self.events.push(Event::Section(title.to_string()));
        }

        fn host_connection(&mut self, host: &str, status: ConnectionStatus<'_>) {
            let status = match status {
                ConnectionStatus::Connected => "connected".to_string(),
                ConnectionStatus::Failed(reason) => format!("failed: {reason}"),
                ConnectionStatus::Interrupted => "interrupted".to_string(),
            };
            self.events.push(Event::Connection(host.to_string(), status));
        }

        fn start_block(&mut self, label: &str, severity: Severity) {
            self.events.push(Event::StartBlock(label.to_string(), severity));
        }

        fn finding(&mut self, severity: Severity, code: &str, message: &str) {
            self.events
                .push(Event::Finding(severity, code.to_string(), message.to_string()));
        }

        fn finish_block(&mut self, label: &str, status: BlockStatus) {
            self.events.push(Event::FinishBlock(label.to_string(), status));
        }

        fn summary(&mut self, line: &str, status: BlockStatus) {
            self.events.push(Event::Summary(line.to_string(), status));
        }
    }
}
