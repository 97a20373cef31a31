//! The protocol dispatcher.
//!
//! A [`Monitor`] takes one line at a time, decodes it into an [`Event`] and
//! applies it: narration on the console, cues on the speaker, trials into the
//! [`SessionState`], and the save prompt once the device reports the end of a
//! run. A bad line is reported and dropped without touching the session.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::console::{format_ms, Console};
use crate::cues::{Cue, CuePlayer};
use crate::operator::OperatorInput;
use crate::persistence::{save_prompt, SessionStore};
use crate::protocol::{Event, ProtocolError};
use crate::session::{SessionState, SessionSummary, TrialRecord};
use crate::transport::LineReader;

/// Where the monitor believes the device is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing connected yet, or a run just finished.
    Idle,
    /// Connected and waiting for the device to announce a run.
    AwaitingReady,
    /// A run is in progress.
    AwaitingTrials,
    /// The end report arrived and the operator is deciding what to keep.
    Reporting,
}

pub struct Monitor<P, O, W: Write> {
    state: SessionState,
    phase: Phase,
    expected_trials: Option<u32>,
    cues: P,
    operator: O,
    store: SessionStore,
    console: Console<W>,
}

impl<P, O, W> Monitor<P, O, W>
where
    P: CuePlayer,
    O: OperatorInput,
    W: Write,
{
    pub fn new(cues: P, operator: O, store: SessionStore, console: Console<W>) -> Self {
        Self {
            state: SessionState::new(),
            phase: Phase::Idle,
            expected_trials: None,
            cues,
            operator,
            store,
            console,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn expected_trials(&self) -> Option<u32> {
        self.expected_trials
    }

    pub fn cues(&self) -> &P {
        &self.cues
    }

    pub fn console(&self) -> &Console<W> {
        &self.console
    }

    /// Announces the open link and starts waiting for the device.
    pub fn connected(&mut self, port: &str) {
        tracing::info!(port, "connected");
        self.console.say(format_args!("Connected to {port}"));
        self.console
            .say("Connect the device now or press its reset button to start capture!");
        self.phase = Phase::AwaitingReady;
    }

    /// Reads and dispatches lines until `stop` is set.
    ///
    /// The flag is checked between reads, so shutdown latency is bounded by
    /// the reader's timeout. Only a failing read ends the loop early.
    pub fn run<R: Read>(
        &mut self,
        reader: &mut LineReader<R>,
        stop: &AtomicBool,
    ) -> io::Result<()> {
        while !stop.load(Ordering::SeqCst) {
            if let Some(line) = reader.next_line()? {
                self.dispatch_line(&line);
            }
        }
        Ok(())
    }

    /// Handles one raw line. Errors are reported and contained.
    pub fn dispatch_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        tracing::debug!(line, "received");

        if let Err(err) = self.handle_line(line) {
            tracing::warn!(line, error = %err, "discarded protocol line");
            self.console
                .error(format_args!("Could not handle line '{line}': {err}"));
        }
    }

    /// Decodes and applies one line.
    pub fn handle_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let event = Event::parse(line)?;
        self.apply(event)
    }

    pub fn apply(&mut self, event: Event) -> Result<(), ProtocolError> {
        self.check_order(&event);

        match event {
            Event::Ready { trial_count } => {
                self.console.blank();
                self.console
                    .say(format_args!("Test ready for {trial_count} trials!"));
                self.expected_trials = Some(trial_count);
                self.phase = Phase::AwaitingTrials;
            }
            Event::Start => {
                self.console.blank();
                self.console.say("Starting test in 3 seconds!");
                self.cues.play(Cue::Countdown);
                self.phase = Phase::AwaitingTrials;
            }
            Event::Early => {
                self.console.blank();
                self.console
                    .say("Whoops, that was too early! Resetting trial...");
                self.cues.play(Cue::Wrong);
            }
            Event::Test(record) => self.on_trial(record),
            Event::End(summary) => self.on_end(summary),
            Event::Unknown { tag } => return Err(ProtocolError::UnknownTag(tag)),
        }
        Ok(())
    }

    fn check_order(&self, event: &Event) {
        let expected = match event {
            Event::Unknown { .. } => return,
            Event::Ready { .. } => matches!(self.phase, Phase::Idle | Phase::AwaitingReady),
            _ => self.phase == Phase::AwaitingTrials,
        };
        if !expected {
            tracing::warn!(tag = event.tag(), phase = ?self.phase, "event arrived out of order");
        }
    }

    fn on_trial(&mut self, record: TrialRecord) {
        let reaction = format_ms(record.reaction_time);
        let wrong = record.is_wrong();
        let (trial, condition) = (record.trial, record.condition.clone());
        self.state.push_trial(record);
        self.phase = Phase::AwaitingTrials;

        self.console.blank();
        if wrong {
            self.console.say(format_args!(
                "Whoops! Participant hit the wrong fruit in {reaction} ms"
            ));
            self.cues.play(Cue::Wrong);
        } else {
            match self.expected_trials {
                Some(total) => self
                    .console
                    .say(format_args!("Results of trial {trial} of {total}:")),
                None => self.console.say(format_args!("Results of trial {trial}:")),
            }
            self.console.say(format_args!("Category: {condition}"));
            self.console
                .say(format_args!("Reaction time: {reaction} ms"));
            self.cues.play(Cue::Success);
        }
    }

    fn on_end(&mut self, summary: SessionSummary) {
        self.phase = Phase::Reporting;
        self.state.finish(summary);
        self.cues.play(Cue::FinalResult);
        self.print_report(&summary);

        let completed = self.state.trials().iter().filter(|t| !t.is_wrong()).count();
        tracing::info!(
            trials = self.state.trials().len(),
            completed,
            "session finished"
        );
        if let Some(total) = self.expected_trials {
            if completed < total as usize {
                self.console.warning(format_args!(
                    "Only {completed} of {total} trials were captured by this monitor."
                ));
            }
        }

        save_prompt(
            &mut self.state,
            &mut self.operator,
            &self.store,
            &mut self.console,
        );

        self.expected_trials = None;
        self.phase = Phase::Idle;
        self.console.blank();
        self.console
            .say("Ready for next participant. Press reset on the device to start.");
    }

    fn print_report(&mut self, summary: &SessionSummary) {
        let console = &mut self.console;
        console.blank();
        console.heading("Test finished!");
        console.blank();
        console.heading("Results:");
        console.say(format_args!(
            "Normal average: {} ms",
            format_ms(summary.normal_avg)
        ));
        console.say(format_args!(
            "Disgust average: {} ms",
            format_ms(summary.disgust_avg)
        ));
        console.say(format_args!(
            "Total average: {} ms",
            format_ms(summary.total_avg)
        ));
        console.blank();
        console.say(format_args!("Earlies on normal: {}", summary.normal_early));
        console.say(format_args!("Earlies on disgust: {}", summary.disgust_early));
        console.blank();
        console.say(format_args!("Wrongs on normal: {}", summary.normal_wrong));
        console.say(format_args!("Wrongs on disgust: {}", summary.disgust_wrong));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cues::testing::RecordingPlayer;
    use crate::operator::testing::ScriptedOperator;
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;

    type TestMonitor = Monitor<RecordingPlayer, ScriptedOperator, Vec<u8>>;

    fn monitor(dir: &Path, answers: &[&str]) -> TestMonitor {
        Monitor::new(
            RecordingPlayer::default(),
            ScriptedOperator::new(answers.iter().copied()),
            SessionStore::new(dir),
            Console::new(Vec::new()),
        )
    }

    fn output(monitor: &TestMonitor) -> String {
        String::from_utf8(monitor.console().get_ref().clone()).unwrap()
    }

    fn files_in(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    /// Sets the stop flag once the wrapped input is exhausted.
    struct StopAtEof {
        inner: Cursor<Vec<u8>>,
        stop: Arc<AtomicBool>,
    }

    impl Read for StopAtEof {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let read = self.inner.read(buf)?;
            if read == 0 {
                self.stop.store(true, Ordering::SeqCst);
            }
            Ok(read)
        }
    }

    #[test]
    fn starts_idle_and_connects() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        assert_eq!(m.phase(), Phase::Idle);

        m.connected("/dev/ttyUSB0");
        assert_eq!(m.phase(), Phase::AwaitingReady);
        assert!(output(&m).contains("Connected to /dev/ttyUSB0"));
    }

    #[test]
    fn ready_announces_trial_count_without_touching_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        m.connected("COM3");
        m.dispatch_line("ready,10");

        assert!(output(&m).contains("10 trials"));
        assert!(m.state().is_empty());
        assert!(m.cues().played().is_empty());
        assert_eq!(m.expected_trials(), Some(10));
        assert_eq!(m.phase(), Phase::AwaitingTrials);
    }

    #[test]
    fn start_plays_countdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        m.dispatch_line("ready,4");
        m.dispatch_line("start");

        assert!(output(&m).contains("Starting test in 3 seconds!"));
        assert_eq!(m.cues().played(), vec![Cue::Countdown]);
        assert!(m.state().is_empty());
    }

    #[test]
    fn correct_trial_is_recorded_and_timed() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        m.dispatch_line("test,3,disgust,correct,452000");

        assert_eq!(
            m.state().trials(),
            &[TrialRecord {
                trial: 3,
                condition: String::from("disgust"),
                result: String::from("correct"),
                reaction_time: 452_000,
            }]
        );
        let out = output(&m);
        assert!(out.contains("Results of trial 3:"));
        assert!(out.contains("Category: disgust"));
        assert!(out.contains("452.0 ms"));
        assert_eq!(m.cues().played(), vec![Cue::Success]);
    }

    #[test]
    fn trial_progress_uses_announced_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        m.dispatch_line("ready,12");
        m.dispatch_line("test,5,normal,success,301500");
        let out = output(&m);
        assert!(out.contains("Results of trial 5 of 12:"));
        assert!(out.contains("Reaction time: 301.5 ms"));
    }

    #[test]
    fn wrong_trial_is_recorded_with_wrong_cue() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        m.dispatch_line("test,3,disgust,wrong,100000");

        assert_eq!(m.state().trials().len(), 1);
        assert_eq!(m.state().trials()[0].result, "wrong");
        assert!(output(&m).contains("Whoops! Participant hit the wrong fruit in 100.0 ms"));
        assert_eq!(m.cues().played(), vec![Cue::Wrong]);
    }

    #[test]
    fn early_plays_wrong_without_state_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        m.dispatch_line("early");

        assert!(output(&m).contains("too early"));
        assert_eq!(m.cues().played(), vec![Cue::Wrong]);
        assert!(m.state().is_empty());
    }

    #[test]
    fn end_prints_report_and_declines_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &["n"]);
        m.dispatch_line("ready,2");
        m.dispatch_line("test,1,normal,success,110000");
        m.dispatch_line("test,2,disgust,success,190000");
        m.dispatch_line("end,120000,180000,150000,2,1,0,3");

        let out = output(&m);
        assert!(out.contains("Normal average: 120.0 ms"));
        assert!(out.contains("Disgust average: 180.0 ms"));
        assert!(out.contains("Total average: 150.0 ms"));
        assert!(out.contains("Earlies on normal: 2"));
        assert!(out.contains("Earlies on disgust: 1"));
        assert!(out.contains("Wrongs on normal: 0"));
        assert!(out.contains("Wrongs on disgust: 3"));
        assert!(out.contains("Ready for next participant."));
        assert!(!out.contains("were captured"));

        assert_eq!(m.cues().played().last(), Some(&Cue::FinalResult));
        assert_eq!(files_in(dir.path()), 0);
        assert!(m.state().trials().is_empty());
        assert_eq!(m.state().summary(), None);
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.expected_trials(), None);
    }

    #[test]
    fn end_with_save_writes_session_then_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &["y", "P01"]);
        m.dispatch_line("ready,1");
        m.dispatch_line("test,1,normal,wrong,50000");
        m.dispatch_line("test,1,normal,success,250000");
        m.dispatch_line("end,250000,0,125000,0,0,1,0");

        assert_eq!(files_in(dir.path()), 2);
        assert!(m.state().is_empty());

        let trials = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.to_string_lossy().ends_with("_trials.csv"))
            .unwrap();
        let mut reader = csv::Reader::from_path(trials).unwrap();
        let rows: Vec<TrialRecord> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].result, "wrong");
        assert_eq!(rows[1].reaction_time, 250_000);
    }

    #[test]
    fn sessions_do_not_leak_into_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &["n", "y", "P02"]);
        m.dispatch_line("test,1,normal,success,1000");
        m.dispatch_line("end,1000,0,500,0,0,0,0");
        m.dispatch_line("test,1,disgust,success,2000");
        m.dispatch_line("end,0,2000,1000,0,0,0,0");

        let summary = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.to_string_lossy().ends_with("_summary.csv"))
            .unwrap();
        let mut reader = csv::Reader::from_path(summary).unwrap();
        let rows: Vec<SessionSummary> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(
            rows,
            vec![SessionSummary {
                normal_avg: 0,
                disgust_avg: 2000,
                total_avg: 1000,
                ..Default::default()
            }]
        );
    }

    #[test]
    fn short_session_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &["n"]);
        m.dispatch_line("ready,4");
        m.dispatch_line("test,1,normal,success,1000");
        m.dispatch_line("end,1000,0,500,0,0,0,0");
        assert!(output(&m).contains("Only 1 of 4 trials were captured"));
    }

    #[test]
    fn malformed_line_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        m.dispatch_line("test,abc,x");
        assert!(m.state().trials().is_empty());
        assert!(m.cues().played().is_empty());
        assert!(output(&m).contains("Could not handle line 'test,abc,x'"));

        m.dispatch_line("test,1,normal,success,1000");
        assert_eq!(m.state().trials().len(), 1);
    }

    #[test]
    fn bad_end_leaves_session_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &["y", "P03"]);
        m.dispatch_line("test,1,normal,success,1000");
        m.dispatch_line("end,1,2,3");

        assert_eq!(m.state().trials().len(), 1);
        assert_eq!(m.state().summary(), None);
        assert_eq!(m.operator.remaining(), 2);
        assert_eq!(files_in(dir.path()), 0);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        assert_eq!(
            m.handle_line("calibrate,3").unwrap_err(),
            ProtocolError::UnknownTag(String::from("calibrate"))
        );

        m.dispatch_line("calibrate,3");
        assert!(output(&m).contains("unknown event tag 'calibrate'"));
        assert!(m.state().is_empty());
    }

    #[test]
    fn blank_lines_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        m.dispatch_line("");
        m.dispatch_line("  \r");
        assert!(output(&m).is_empty());
    }

    #[test]
    fn run_processes_stream_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &["n"]);
        let stop = Arc::new(AtomicBool::new(false));
        let input = b"ready,2\nstart\ntest,abc,x\nearly\r\ntest,1,normal,success,1000\n\
                      test,2,disgust,success,3000\nend,1000,3000,2000,0,1,0,0\n"
            .to_vec();
        let mut reader = LineReader::new(StopAtEof {
            inner: Cursor::new(input),
            stop: Arc::clone(&stop),
        });

        m.run(&mut reader, &stop).unwrap();

        assert_eq!(
            m.cues().played(),
            vec![
                Cue::Countdown,
                Cue::Wrong,
                Cue::Success,
                Cue::Success,
                Cue::FinalResult
            ]
        );
        assert!(output(&m).contains("Could not handle line 'test,abc,x'"));
        assert!(m.state().is_empty());
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn run_returns_immediately_when_already_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(dir.path(), &[]);
        let stop = AtomicBool::new(true);
        let mut reader = LineReader::new(Cursor::new(b"start\n".to_vec()));
        m.run(&mut reader, &stop).unwrap();
        assert!(m.cues().played().is_empty());
    }
}
