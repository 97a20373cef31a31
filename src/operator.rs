//! Blocking questions to the person running the experiment.

use std::io::{self, BufRead, Write};

/// Capability to ask the operator something and wait for the answer.
pub trait OperatorInput {
    /// Shows `message` and returns the answer without its line ending, or
    /// `None` once input is closed.
    fn prompt(&mut self, message: &str) -> io::Result<Option<String>>;
}

/// Prompts on stdout and reads answers from stdin.
#[derive(Debug, Default)]
pub struct StdinOperator;

impl OperatorInput for StdinOperator {
    fn prompt(&mut self, message: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{message}")?;
        stdout.flush()?;
        drop(stdout);

        let mut answer = String::new();
        let read = io::stdin().lock().read_line(&mut answer)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(answer.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Case-insensitive yes. Anything else is a no.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
