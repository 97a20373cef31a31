//! Operator-facing narration.

use std::fmt::Display;
use std::io::Write;

use crossterm::style::Stylize;

/// Whether narration should be styled: only on a terminal, and never when
/// `--no-color` was given.
pub fn color_wanted(no_color: bool, stdout_is_terminal: bool) -> bool {
    !no_color && stdout_is_terminal
}

/// Turns ANSI styling on or off for everything printed afterwards.
pub fn set_color_enabled(enabled: bool) {
    crossterm::style::force_color_output(enabled);
}

/// Renders microseconds as milliseconds with one to three decimals.
///
/// `452000` becomes `452.0` and `452123` becomes `452.123`.
pub fn format_ms(micros: u64) -> String {
    let text = format!("{:.3}", micros as f64 / 1000.0);
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    }
}

/// Line-oriented writer for narration and diagnostics.
///
/// Write failures are logged and otherwise ignored so that a closed console
/// never stops the monitor.
#[derive(Debug)]
pub struct Console<W: Write> {
    out: W,
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn say(&mut self, text: impl Display) {
        self.emit(format_args!("{text}"));
    }

    pub fn blank(&mut self) {
        self.emit(format_args!(""));
    }

    pub fn heading(&mut self, text: &str) {
        self.emit(format_args!("{}", text.bold()));
    }

    pub fn error(&mut self, text: impl Display) {
        self.emit(format_args!("{} {text}", "[ERROR]".red().bold()));
    }

    pub fn warning(&mut self, text: impl Display) {
        self.emit(format_args!("{} {text}", "[WARNING]".yellow().bold()));
    }

    fn emit(&mut self, args: std::fmt::Arguments<'_>) {
        if let Err(err) = writeln!(self.out, "{args}").and_then(|()| self.out.flush()) {
            tracing::debug!(error = %err, "console write failed");
        }
    }
}
