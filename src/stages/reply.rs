//! Helpers for pulling structured data out of free-form model replies.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const FENCE: &str = "```";

/// Verdict of the requirements critic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementsReview {
    #[serde(default)]
    pub approved: bool,

    #[serde(default)]
    pub comments: String,

    /// 1-10 when the model complies; 0 for locally produced rejections
    #[serde(default)]
    pub score: Option<serde_json::Number>,
}

impl RequirementsReview {
    /// A rejection produced without consulting the model
    pub fn rejected(comments: impl Into<String>) -> Self {
        Self {
            approved: false,
            comments: comments.into(),
            score: Some(0u64.into()),
        }
    }
}

/// Verdict of the code critic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeReview {
    #[serde(default)]
    pub approved: bool,

    #[serde(default)]
    pub comments: String,

    #[serde(default)]
    pub issues: Vec<String>,
}

impl CodeReview {
    pub fn rejected(comments: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            approved: false,
            comments: comments.into(),
            issues: vec![issue.into()],
        }
    }
}

/// Slice from the first `{` to the last `}`.
///
/// Without any `{` the whole reply is returned; without a closing brace
/// after it the result is empty.
pub fn extract_json_object(reply: &str) -> &str {
    let Some(start) = reply.find('{') else {
        return reply;
    };

    match reply.rfind('}') {
        Some(end) if end > start => &reply[start..=end],
        _ => "",
    }
}

/// Code inside the first fenced block, or the whole reply when unfenced.
///
/// A language tag on the opening fence line is skipped.
pub fn extract_code(reply: &str) -> String {
    let Some(open) = reply.find(FENCE) else {
        return reply.trim().to_string();
    };

    let after = &reply[open + FENCE.len()..];
    let body_start = match after.find('\n') {
        Some(newline) if is_info_string(&after[..newline]) => newline + 1,
        _ => 0,
    };
    let body = &after[body_start..];

    let body = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };

    body.trim().to_string()
}

fn is_info_string(line: &str) -> bool {
    let tag = line.trim();
    !tag.contains(char::is_whitespace) && !tag.contains(FENCE)
}

/// Parse a code review, requiring `issues` (when present) to be a list
pub fn parse_code_review(candidate: &str) -> Result<CodeReview> {
    let value: Value = serde_json::from_str(candidate).context("review is not valid JSON")?;

    match value.get("issues") {
        None | Some(Value::Array(_)) => {}
        Some(_) => anyhow::bail!("issues should be a list"),
    }

    serde_json::from_value(value).context("review does not match the expected fields")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("Sure! {\"approved\": true} Hope this helps."),
            "{\"approved\": true}"
        );
        assert_eq!(
            extract_json_object("{\"a\": {\"b\": 1}} trailing }"),
            "{\"a\": {\"b\": 1}} trailing }"
        );
        assert_eq!(extract_json_object("no json here"), "no json here");
        assert_eq!(extract_json_object("broken { only"), "");
    }

    #[test]
    fn test_extract_code_from_tagged_fence() {
        let reply = "Here you go:\n```python\nprint('hi')\n```\nDone.";
        assert_eq!(extract_code(reply), "print('hi')");
    }

    #[test]
    fn test_extract_code_from_bare_fence() {
        assert_eq!(extract_code("```\nx = 1\n```"), "x = 1");
        assert_eq!(extract_code("```x = (1)```"), "x = (1)");
    }

    #[test]
    fn test_extract_code_unfenced_or_unclosed() {
        assert_eq!(extract_code("  x = 1  "), "x = 1");
        assert_eq!(extract_code("```py\ny = 2"), "y = 2");
        assert_eq!(extract_code("```python\n```"), "");
    }

    #[test]
    fn test_parse_code_review() {
        let review =
            parse_code_review(r#"{"approved": false, "comments": "c", "issues": ["a", "b"]}"#)
                .unwrap();
        assert_eq!(review.issues, vec!["a", "b"]);

        let review = parse_code_review(r#"{"approved": true, "comments": "ok"}"#).unwrap();
        assert!(review.approved);
        assert!(review.issues.is_empty());

        let err = parse_code_review(r#"{"approved": true, "issues": "none"}"#).unwrap_err();
        assert!(err.to_string().contains("issues should be a list"));
    }

    #[test]
    fn test_requirements_review_defaults() {
        let review: RequirementsReview =
            serde_json::from_str(r#"{"approved": true, "comments": "fine", "score": 8}"#).unwrap();
        assert!(review.approved);
        assert_eq!(review.score, Some(8u64.into()));

        let rejected = serde_json::to_value(RequirementsReview::rejected("empty")).unwrap();
        assert_eq!(rejected["score"], 0);
        assert_eq!(rejected["approved"], false);
    }
}
