//! Decoding of the device's line protocol.
//!
//! Every line is `tag,field,field,...` with no quoting. The tag selects the
//! event and fixes how many fields follow and what type each one has.

use std::num::ParseIntError;
use std::str::FromStr;

use thiserror::Error;

use crate::session::{SessionSummary, TrialRecord};

/// Errors produced while decoding a single line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Nothing but whitespace on the line.
    #[error("line is empty")]
    EmptyLine,
    /// The tag is known but the number of fields after it is wrong.
    #[error("'{tag}' expects {expected} field(s) after the tag, got {found}")]
    FieldCount {
        tag: &'static str,
        expected: usize,
        found: usize,
    },
    /// A field that must be a non-negative integer is not one.
    #[error("field '{field}' is not a valid integer ('{value}'): {source}")]
    InvalidInteger {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    /// Trials are numbered from 1.
    #[error("trial number must be at least 1")]
    ZeroTrial,
    /// The tag is not part of the protocol.
    #[error("unknown event tag '{0}'")]
    UnknownTag(String),
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The device finished setup and will run this many trials.
    Ready { trial_count: u32 },
    /// The participant armed the test; the countdown begins.
    Start,
    /// All trials are done.
    End(SessionSummary),
    /// The participant touched before the stimulus; the trial restarts.
    Early,
    /// A timed response.
    Test(TrialRecord),
    /// A tag outside the protocol. Decoding succeeds so the caller decides.
    Unknown { tag: String },
}

impl Event {
    /// Decodes one line. Surrounding whitespace and a trailing `\r` are ignored.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }

        let mut parts = line.split(',').map(str::trim);
        // split always yields at least one item
        let tag = parts.next().unwrap_or_default();
        let fields: Vec<&str> = parts.collect();

        match tag {
            "ready" => {
                let [count] = expect_fields::<1>("ready", &fields)?;
                Ok(Event::Ready {
                    trial_count: parse_int("trial_count", count)?,
                })
            }
            "start" => {
                expect_fields::<0>("start", &fields)?;
                Ok(Event::Start)
            }
            "early" => {
                expect_fields::<0>("early", &fields)?;
                Ok(Event::Early)
            }
            "end" => {
                let [
                    normal_avg,
                    disgust_avg,
                    total_avg,
                    normal_early,
                    disgust_early,
                    normal_wrong,
                    disgust_wrong,
                ] = expect_fields::<7>("end", &fields)?;
                Ok(Event::End(SessionSummary {
                    normal_avg: parse_int("normal_avg", normal_avg)?,
                    disgust_avg: parse_int("disgust_avg", disgust_avg)?,
                    total_avg: parse_int("total_avg", total_avg)?,
                    normal_early: parse_int("normal_early", normal_early)?,
                    disgust_early: parse_int("disgust_early", disgust_early)?,
                    normal_wrong: parse_int("normal_wrong", normal_wrong)?,
                    disgust_wrong: parse_int("disgust_wrong", disgust_wrong)?,
                }))
            }
            "test" => {
                let [trial, condition, result, reaction_time] =
                    expect_fields::<4>("test", &fields)?;
                let trial: u32 = parse_int("trial", trial)?;
                if trial == 0 {
                    return Err(ProtocolError::ZeroTrial);
                }
                Ok(Event::Test(TrialRecord {
                    trial,
                    condition: condition.to_string(),
                    result: result.to_string(),
                    reaction_time: parse_int("reaction_time", reaction_time)?,
                }))
            }
            other => Ok(Event::Unknown {
                tag: other.to_string(),
            }),
        }
    }

    /// The wire tag this event was decoded from.
    pub fn tag(&self) -> &str {
        match self {
            Event::Ready { .. } => "ready",
            Event::Start => "start",
            Event::End(_) => "end",
            Event::Early => "early",
            Event::Test(_) => "test",
            Event::Unknown { tag } => tag,
        }
    }
}

fn expect_fields<'a, const N: usize>(
    tag: &'static str,
    fields: &[&'a str],
) -> Result<[&'a str; N], ProtocolError> {
    <[&str; N]>::try_from(fields).map_err(|_| ProtocolError::FieldCount {
        tag,
        expected: N,
        found: fields.len(),
    })
}

fn parse_int<T>(field: &'static str, value: &str) -> Result<T, ProtocolError>
where
    T: FromStr<Err = ParseIntError>,
{
    value.parse().map_err(|source| ProtocolError::InvalidInteger {
        field,
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ready() {
        assert_eq!(
            Event::parse("ready,10").unwrap(),
            Event::Ready { trial_count: 10 }
        );
    }

    #[test]
    fn parse_bare_tags() {
        assert_eq!(Event::parse("start").unwrap(), Event::Start);
        assert_eq!(Event::parse("early").unwrap(), Event::Early);
    }

    #[test]
    fn parse_strips_carriage_return_and_spaces() {
        assert_eq!(Event::parse("start\r\n").unwrap(), Event::Start);
        assert_eq!(
            Event::parse("  ready , 12 ").unwrap(),
            Event::Ready { trial_count: 12 }
        );
    }

    #[test]
    fn parse_test_keeps_fields_verbatim() {
        let event = Event::parse("test,3,disgust,correct,452000").unwrap();
        assert_eq!(
            event,
            Event::Test(TrialRecord {
                trial: 3,
                condition: String::from("disgust"),
                result: String::from("correct"),
                reaction_time: 452_000,
            })
        );
    }

    #[test]
    fn parse_end_maps_fields_in_order() {
        let event = Event::parse("end,120000,180000,150000,2,1,0,3").unwrap();
        assert_eq!(
            event,
            Event::End(SessionSummary {
                normal_avg: 120_000,
                disgust_avg: 180_000,
                total_avg: 150_000,
                normal_early: 2,
                disgust_early: 1,
                normal_wrong: 0,
                disgust_wrong: 3,
            })
        );
    }

    #[test]
    fn reject_empty_line() {
        assert_eq!(Event::parse("").unwrap_err(), ProtocolError::EmptyLine);
        assert_eq!(Event::parse(" \r\n").unwrap_err(), ProtocolError::EmptyLine);
    }

    #[test]
    fn reject_too_few_fields() {
        assert_eq!(
            Event::parse("test,abc,x").unwrap_err(),
            ProtocolError::FieldCount {
                tag: "test",
                expected: 4,
                found: 2
            }
        );
        assert!(matches!(
            Event::parse("ready").unwrap_err(),
            ProtocolError::FieldCount { tag: "ready", .. }
        ));
    }

    #[test]
    fn reject_extra_fields() {
        assert_eq!(
            Event::parse("start,1").unwrap_err(),
            ProtocolError::FieldCount {
                tag: "start",
                expected: 0,
                found: 1
            }
        );
        assert!(Event::parse("end,1,2,3,4,5,6,7,8").is_err());
    }

    #[test]
    fn reject_non_numeric_field() {
        let err = Event::parse("test,abc,normal,success,1000").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidInteger { field: "trial", ref value, .. } if value == "abc"
        ));

        let err = Event::parse("end,1,2,3,4,5,x,7").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidInteger { field: "normal_wrong", .. }
        ));
    }

    #[test]
    fn reject_negative_reaction_time() {
        let err = Event::parse("test,1,normal,success,-5").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidInteger { field: "reaction_time", .. }
        ));
    }

    #[test]
    fn reject_trial_zero() {
        assert_eq!(
            Event::parse("test,0,normal,success,1000").unwrap_err(),
            ProtocolError::ZeroTrial
        );
    }

    #[test]
    fn unknown_tag_decodes_to_unknown() {
        let event = Event::parse("reboot,now").unwrap();
        assert_eq!(
            event,
            Event::Unknown {
                tag: String::from("reboot")
            }
        );
        assert_eq!(event.tag(), "reboot");
    }

    #[test]
    fn tags_are_case_sensitive() {
        assert!(matches!(Event::parse("READY,4").unwrap(), Event::Unknown { .. }));
    }
}
