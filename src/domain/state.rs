//! Pipeline state tags.
//!
//! Stages produce transitions; the executor only reads the current state
//! to evaluate gates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// State of a pipeline run, carried in the context under `state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Seed state before any stage ran
    #[default]
    Init,

    /// Requirements text has been produced
    RequirementsWritten,

    /// Requirements passed review
    RequirementsApproved,

    /// An artifact has been generated
    CodeWritten,

    /// The artifact passed review
    CodeApproved,

    /// Pipeline produced its final result
    Finished,

    /// Absorbing failure state
    Error,
}

impl State {
    /// All states in pipeline order
    pub const ALL: [State; 7] = [
        State::Init,
        State::RequirementsWritten,
        State::RequirementsApproved,
        State::CodeWritten,
        State::CodeApproved,
        State::Finished,
        State::Error,
    ];

    /// Wire name of the state
    pub fn as_str(self) -> &'static str {
        match self {
            State::Init => "INIT",
            State::RequirementsWritten => "REQUIREMENTS_WRITTEN",
            State::RequirementsApproved => "REQUIREMENTS_APPROVED",
            State::CodeWritten => "CODE_WRITTEN",
            State::CodeApproved => "CODE_APPROVED",
            State::Finished => "FINISHED",
            State::Error => "ERROR",
        }
    }

    /// `FINISHED` and `ERROR` end a run
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Finished | State::Error)
    }

    pub fn is_error(self) -> bool {
        self == State::Error
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown pipeline state: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_names_match_serde() {
        for state in State::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<State> = State::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![State::Finished, State::Error]);
        assert_eq!(State::default(), State::Init);
    }

    #[test]
    fn test_parse_unknown_state() {
        assert!("REVIEWED".parse::<State>().is_err());
        assert_eq!("code_written".parse::<State>().unwrap(), State::CodeWritten);
    }
}
