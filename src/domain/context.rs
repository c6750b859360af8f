//! The shared context threaded through one pipeline run, and the partial
//! results stages return to be merged into it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::state::State;

/// Key holding the state tag in the serialized context
pub const STATE_KEY: &str = "state";

/// Key holding the caller's original input
pub const USER_INPUT_KEY: &str = "user_input";

/// Key holding the error text that ended a run
pub const ERROR_KEY: &str = "pipeline_error";

/// String-keyed store owned by the executor for the duration of a run.
///
/// Serializes as one flat object: `{"state": "INIT", "user_input": ..., ...}`.
/// The state is kept as a typed field so stages can only change it through
/// [`StageOutput::state`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    state: State,

    #[serde(flatten)]
    values: Map<String, Value>,
}

impl Context {
    /// Seed a context with the user's input and `state = INIT`
    pub fn new(user_input: impl Into<String>) -> Self {
        let mut values = Map::new();
        values.insert(USER_INPUT_KEY.to_string(), Value::String(user_input.into()));

        Self {
            state: State::Init,
            values,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The original input the run was seeded with
    pub fn user_input(&self) -> &str {
        self.get_str(USER_INPUT_KEY).unwrap_or_default()
    }

    /// Error text attached when the run aborted, if any
    pub fn error(&self) -> Option<&str> {
        self.get_str(ERROR_KEY)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a value as text, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys currently present, excluding `state`
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Merge a stage's partial result, overwriting on key collision.
    ///
    /// `ERROR` is absorbing: once set, a later output cannot move the state.
    pub fn merge(&mut self, output: StageOutput) {
        if !self.state.is_error() {
            self.state = output.state;
        }

        for (key, value) in output.values {
            if key == STATE_KEY {
                continue;
            }
            self.values.insert(key, value);
        }
    }

    /// Transition into `ERROR` and record the causing error text
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = State::Error;
        self.values
            .insert(ERROR_KEY.to_string(), Value::String(error.into()));
    }

    /// Render the whole context, including `state`, as a JSON value
    pub fn to_value(&self) -> Value {
        let mut map = self.values.clone();
        map.insert(
            STATE_KEY.to_string(),
            Value::String(self.state.as_str().to_string()),
        );
        Value::Object(map)
    }
}

/// Partial result returned by a stage.
///
/// Always carries a state: a forward state on success, or `ERROR` when the
/// stage rejects its own output.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    /// State the run moves to once this output is merged
    pub state: State,

    /// Keys contributed to the shared context
    pub values: Map<String, Value>,
}

impl StageOutput {
    /// An output carrying only a state transition
    pub fn new(state: State) -> Self {
        Self {
            state,
            values: Map::new(),
        }
    }

    /// A self-reported failure with a diagnostic payload under `key`
    pub fn rejected(key: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self::new(State::Error).with(key, payload)
    }

    /// Add a key to the output
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_rejection(&self) -> bool {
        self.state.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_seed() {
        let ctx = Context::new("build X");

        assert_eq!(ctx.state(), State::Init);
        assert_eq!(ctx.user_input(), "build X");
        assert!(ctx.error().is_none());
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec![USER_INPUT_KEY]);
    }

    #[test]
    fn test_merge_overwrites_on_collision() {
        let mut ctx = Context::new("input");
        ctx.merge(StageOutput::new(State::RequirementsWritten).with("requirements", "v1"));
        ctx.merge(
            StageOutput::new(State::RequirementsApproved)
                .with("requirements", "v2")
                .with("score", 8),
        );

        assert_eq!(ctx.state(), State::RequirementsApproved);
        assert_eq!(ctx.get_str("requirements"), Some("v2"));
        assert_eq!(ctx.get("score"), Some(&json!(8)));
    }

    #[test]
    fn test_output_cannot_smuggle_state_key() {
        let mut ctx = Context::new("input");
        ctx.merge(StageOutput::new(State::CodeWritten).with(STATE_KEY, "FINISHED"));

        assert_eq!(ctx.state(), State::CodeWritten);
        assert!(!ctx.contains(STATE_KEY));
    }

    #[test]
    fn test_error_is_absorbing() {
        let mut ctx = Context::new("input");
        ctx.fail("boom");
        ctx.merge(StageOutput::new(State::Finished));

        assert_eq!(ctx.state(), State::Error);
        assert_eq!(ctx.error(), Some("boom"));
    }

    #[test]
    fn test_context_serializes_flat() {
        let mut ctx = Context::new("input");
        ctx.merge(StageOutput::new(State::RequirementsWritten).with("requirements", "text"));

        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(
            value,
            json!({
                "state": "REQUIREMENTS_WRITTEN",
                "user_input": "input",
                "requirements": "text",
            })
        );
        assert_eq!(ctx.to_value(), value);

        let parsed: Context = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, ctx);
    }

    #[test]
    fn test_rejected_output() {
        let output = StageOutput::rejected("code_review", json!({"approved": false}));
        assert!(output.is_rejection());
        assert_eq!(output.get("code_review"), Some(&json!({"approved": false})));
    }
}
