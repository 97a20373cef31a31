//! Saving a finished session as two CSV files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::console::Console;
use crate::operator::{is_affirmative, OperatorInput};
use crate::session::{SessionState, SUMMARY_COLUMNS, TRIAL_COLUMNS};

/// Local-time stamp used in saved file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Suffixes tried before giving up on finding an unused file name.
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("participant id is empty")]
    EmptyParticipant,
    #[error("session has no summary yet")]
    MissingSummary,
    #[error("no unused file name left for '{0}'")]
    NameExhausted(String),
    #[error("could not create {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("could not flush {}: {source}", .path.display())]
    Flush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Paths of one saved session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFiles {
    pub trials: PathBuf,
    pub summary: PathBuf,
}

/// How the save prompt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(SavedFiles),
    Declined,
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Trims the id and replaces characters that cannot appear in a file name.
pub fn sanitize_participant(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Writes sessions into a fixed directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `{id}_{timestamp}_trials.csv` and `{id}_{timestamp}_summary.csv`.
    ///
    /// Existing files are never touched. When either name is taken, `_2`,
    /// `_3`, ... is appended to the stem until both names are free.
    pub fn save(
        &self,
        state: &SessionState,
        participant: &str,
        timestamp: &str,
    ) -> Result<SavedFiles, PersistError> {
        let summary = state.summary().ok_or(PersistError::MissingSummary)?;
        let participant = sanitize_participant(participant);
        if participant.is_empty() {
            return Err(PersistError::EmptyParticipant);
        }

        let base = format!("{participant}_{timestamp}");
        let files = self.free_names(&base)?;

        let mut created = CreatedFiles::default();
        let trials_file = created.create(&files.trials)?;
        let summary_file = created.create(&files.summary)?;

        let mut writer = csv_writer(trials_file);
        writer
            .write_record(TRIAL_COLUMNS)
            .map_err(|source| write_err(&files.trials, source))?;
        for record in state.trials() {
            writer
                .serialize(record)
                .map_err(|source| write_err(&files.trials, source))?;
        }
        writer.flush().map_err(|source| PersistError::Flush {
            path: files.trials.clone(),
            source,
        })?;

        let mut writer = csv_writer(summary_file);
        writer
            .write_record(SUMMARY_COLUMNS)
            .map_err(|source| write_err(&files.summary, source))?;
        writer
            .serialize(summary)
            .map_err(|source| write_err(&files.summary, source))?;
        writer.flush().map_err(|source| PersistError::Flush {
            path: files.summary.clone(),
            source,
        })?;
        created.keep();

        tracing::info!(
            trials = %files.trials.display(),
            summary = %files.summary.display(),
            records = state.trials().len(),
            "session saved"
        );
        Ok(files)
    }

    fn free_names(&self, base: &str) -> Result<SavedFiles, PersistError> {
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let stem = if attempt == 1 {
                base.to_string()
            } else {
                format!("{base}_{attempt}")
            };
            let files = SavedFiles {
                trials: self.dir.join(format!("{stem}_trials.csv")),
                summary: self.dir.join(format!("{stem}_summary.csv")),
            };
            if !files.trials.exists() && !files.summary.exists() {
                return Ok(files);
            }
            tracing::debug!(stem = %stem, "file name taken");
        }
        Err(PersistError::NameExhausted(base.to_string()))
    }
}

/// Files created by one save. Unless [`CreatedFiles::keep`] is called they
/// are removed again on drop, so a failed save leaves nothing behind.
#[derive(Default)]
struct CreatedFiles {
    paths: Vec<PathBuf>,
}

impl CreatedFiles {
    fn create(&mut self, path: &Path) -> Result<File, PersistError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| PersistError::Create {
                path: path.to_path_buf(),
                source,
            })?;
        self.paths.push(path.to_path_buf());
        Ok(file)
    }

    fn keep(mut self) {
        self.paths.clear();
    }
}

impl Drop for CreatedFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(err) = fs::remove_file(path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "could not remove partial file"
                );
            }
        }
    }
}

fn csv_writer(file: File) -> csv::Writer<File> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file)
}

fn write_err(path: &Path, source: csv::Error) -> PersistError {
    PersistError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// Asks whether to keep the finished session and saves it if so.
///
/// A failed save is reported and the question is asked again, so nothing is
/// lost until the operator either saves successfully or declines. The state
/// is reset on both of those paths.
pub fn save_prompt<O, W>(
    state: &mut SessionState,
    operator: &mut O,
    store: &SessionStore,
    console: &mut Console<W>,
) -> SaveOutcome
where
    O: OperatorInput + ?Sized,
    W: Write,
{
    let outcome = loop {
        let Some(answer) = ask(operator, "\nSave results? (y/n): ") else {
            break SaveOutcome::Declined;
        };
        if !is_affirmative(&answer) {
            break SaveOutcome::Declined;
        }

        let Some(participant) = ask_participant(operator, console) else {
            break SaveOutcome::Declined;
        };

        match store.save(state, &participant, &timestamp_now()) {
            Ok(files) => {
                console.blank();
                console.say(format_args!(
                    "Saved to {} and {}",
                    files.trials.display(),
                    files.summary.display()
                ));
                break SaveOutcome::Saved(files);
            }
            Err(err) => {
                tracing::error!(error = %err, "saving session failed");
                console.error(format_args!("Could not save results: {err}"));
            }
        }
    };

    if outcome == SaveOutcome::Declined {
        tracing::info!(records = state.trials().len(), "session discarded");
    }
    state.reset();
    outcome
}

fn ask_participant<O, W>(operator: &mut O, console: &mut Console<W>) -> Option<String>
where
    O: OperatorInput + ?Sized,
    W: Write,
{
    loop {
        let answer = ask(operator, "Enter participant ID: ")?;
        if !sanitize_participant(&answer).is_empty() {
            return Some(answer);
        }
        console.warning("Participant ID cannot be empty.");
    }
}

fn ask<O: OperatorInput + ?Sized>(operator: &mut O, message: &str) -> Option<String> {
    match operator.prompt(message) {
        Ok(answer) => answer,
        Err(err) => {
            tracing::error!(error = %err, "reading operator input failed");
            None
        }
    }
}
