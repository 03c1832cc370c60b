//! Terminal output for runs.
//!
//! Owns the stdout/stderr writers, the display log level, and the mapping
//! from semantic styles to terminal styling. Write failures are swallowed:
//! losing a log line must never fail a run.

use colored::Colorize;
use parking_lot::Mutex;
use sewing_core::LogLevel;
use std::fmt::Display;
use std::io::Write;
use std::sync::Arc;

/// Width used when the terminal width is unknown.
const DEFAULT_COLUMNS: usize = 30;

/// Semantic styles used in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Success,
    Error,
    Info,
    Subdued,
    Emphasis,
    Code,
    Title,
}

type Writer = Box<dyn Write + Send>;

pub struct Ui {
    stdout: Mutex<Writer>,
    stderr: Mutex<Writer>,
    level: LogLevel,
    styled: bool,
    columns: usize,
}

impl std::fmt::Debug for Ui {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ui")
            .field("level", &self.level)
            .field("styled", &self.styled)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl Ui {
    /// Ui over the process stdio. Styling is only used when stdout is a
    /// terminal and `color` is enabled.
    pub fn stdio(level: LogLevel, color: bool) -> Self {
        let styled = color && stdout_is_terminal();
        Self::with_writers(
            Box::new(std::io::stdout()),
            Box::new(std::io::stderr()),
            level,
            styled,
            terminal_columns(),
        )
    }

    pub fn with_writers(
        stdout: Writer,
        stderr: Writer,
        level: LogLevel,
        styled: bool,
        columns: usize,
    ) -> Self {
        Self {
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
            level,
            styled,
            columns: columns.max(1),
        }
    }

    pub fn can_log_level(&self, level: LogLevel) -> bool {
        self.level.allows(level)
    }

    /// Write a line to stdout if `level` passes the display level.
    pub fn log(&self, text: &str, level: LogLevel) {
        if !self.can_log_level(level) {
            return;
        }
        let mut out = self.stdout.lock();
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    /// Write a line to stderr if `level` passes the display level.
    pub fn error(&self, text: &str, level: LogLevel) {
        if !self.can_log_level(level) {
            return;
        }
        let mut err = self.stderr.lock();
        let _ = writeln!(err, "{text}");
        let _ = err.flush();
    }

    /// Write raw text (including control sequences) to stdout.
    pub fn write(&self, text: &str) {
        let mut out = self.stdout.lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    /// Apply a semantic style. Plain text when styling is off.
    pub fn style(&self, style: Style, text: impl Display) -> String {
        let text = text.to_string();
        if !self.styled {
            return text;
        }
        match style {
            Style::Success => text.green().to_string(),
            Style::Error => text.red().to_string(),
            Style::Info => text.blue().to_string(),
            Style::Subdued => text.dimmed().to_string(),
            Style::Emphasis => text.bold().to_string(),
            Style::Code => text.reversed().to_string(),
            Style::Title => text.bold().underline().to_string(),
        }
    }

    /// `ch` repeated across the terminal width.
    pub fn rule(&self, ch: char) -> String {
        std::iter::repeat(ch).take(self.columns).collect()
    }
}

fn stdout_is_terminal() -> bool {
    atty::is(atty::Stream::Stdout)
}

fn terminal_columns() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .filter(|columns: &usize| *columns > 0)
        .unwrap_or(DEFAULT_COLUMNS)
}

/// Whether process stdout is an interactive terminal.
pub fn is_interactive_terminal() -> bool {
    stdout_is_terminal()
}

/// `HH:MM:SS.mmm` in local time.
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// In-memory writer for capturing output, cloneable so the reader keeps a
/// handle after the writer is moved into a [`Ui`].
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(level: LogLevel, styled: bool) -> (Ui, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let ui = Ui::with_writers(
            Box::new(out.clone()),
            Box::new(err.clone()),
            level,
            styled,
            10,
        );
        (ui, out, err)
    }

    #[test]
    fn log_respects_level() {
        let (ui, out, _) = captured(LogLevel::Info, false);
        ui.log("shown", LogLevel::Info);
        ui.log("hidden", LogLevel::Debug);
        assert_eq!(out.contents(), "shown\n");
    }

    #[test]
    fn errors_go_to_stderr() {
        let (ui, out, err) = captured(LogLevel::Info, false);
        ui.error("boom", LogLevel::Errors);
        assert!(out.contents().is_empty());
        assert_eq!(err.contents(), "boom\n");
    }

    #[test]
    fn unstyled_output_is_plain() {
        let (ui, _, _) = captured(LogLevel::Info, false);
        assert_eq!(ui.style(Style::Error, "x"), "x");
        assert_eq!(ui.style(Style::Code, 42), "42");
    }

    #[test]
    fn styled_output_wraps_text() {
        colored::control::set_override(true);
        let (ui, _, _) = captured(LogLevel::Info, true);
        let styled = ui.style(Style::Success, "ok");
        assert!(styled.contains("ok"));
        assert!(styled.starts_with("\u{1b}["));
    }

    #[test]
    fn rule_spans_columns() {
        let (ui, _, _) = captured(LogLevel::Info, false);
        assert_eq!(ui.rule('='), "==========");
    }

    #[test]
    fn timestamp_has_millis() {
        let ts = timestamp();
        assert_eq!(ts.len(), 12);
        assert_eq!(&ts[2..3], ":");
        assert_eq!(&ts[8..9], ".");
    }
}
