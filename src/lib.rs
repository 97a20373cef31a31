//! # Reaction Monitor Library
//!
//! This library contains the core logic of the desktop monitor for the touch
//! reaction-time experiment. The device reports the run over a serial link as
//! comma-separated lines; the monitor narrates each event, plays an audio cue,
//! collects the trials of the current participant and, once the run ends,
//! offers to save them as CSV.
//!
//! Every outside dependency sits behind a small capability so the dispatcher
//! can be driven from tests: [`CuePlayer`] for sound, [`OperatorInput`] for
//! prompts, any [`std::io::Read`] for the link and any [`std::io::Write`] for
//! the console.

pub mod config;
pub mod console;
pub mod cues;
pub mod monitor;
pub mod operator;
pub mod persistence;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::MonitorConfig;
pub use console::Console;
pub use cues::{CpalCuePlayer, Cue, CueError, CuePlayer};
pub use monitor::{Monitor, Phase};
pub use operator::{OperatorInput, StdinOperator};
pub use persistence::{PersistError, SaveOutcome, SavedFiles, SessionStore};
pub use protocol::{Event, ProtocolError};
pub use session::{SessionState, SessionSummary, TrialRecord};
pub use transport::{LineReader, PortEntry, TransportError};
