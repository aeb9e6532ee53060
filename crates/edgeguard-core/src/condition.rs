//! Boolean condition trees over request attributes.
//!
//! A [`Condition`] is either a single [`MatchStatement`] or a combination of
//! conditions with `and`, `or`, and `not`. Evaluation is a pure recursive
//! function of the condition and the request.

use serde::{Deserialize, Serialize};

use crate::request::InboundRequest;

/// The request attribute a match statement inspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Field {
    /// A single header. The name is matched case-insensitively.
    Header {
        /// Header name.
        name: String,
    },
    /// The HTTP method.
    Method,
    /// The URI path, without the query string.
    UriPath,
    /// The raw query string (empty when absent).
    QueryString,
    /// Any label attached to the request by the gateway.
    Label,
}

impl Field {
    /// Creates a header field.
    pub fn header(name: impl Into<String>) -> Self {
        Field::Header { name: name.into() }
    }

    /// Returns a short description for logs and error messages.
    pub fn describe(&self) -> String {
        match self {
            Field::Header { name } => format!("header:{}", name.to_ascii_lowercase()),
            Field::Method => "method".to_string(),
            Field::UriPath => "uri_path".to_string(),
            Field::QueryString => "query_string".to_string(),
            Field::Label => "label".to_string(),
        }
    }
}

/// How the (transformed) field value is compared with the search string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchOperator {
    /// The field contains the search string.
    Contains,
    /// The field equals the search string.
    Exactly,
    /// The field starts with the search string.
    StartsWith,
    /// The field ends with the search string.
    EndsWith,
}

impl MatchOperator {
    fn apply(self, haystack: &str, needle: &str) -> bool {
        match self {
            MatchOperator::Contains => haystack.contains(needle),
            MatchOperator::Exactly => haystack == needle,
            MatchOperator::StartsWith => haystack.starts_with(needle),
            MatchOperator::EndsWith => haystack.ends_with(needle),
        }
    }
}

/// Transformation applied to the field value before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextTransform {
    /// Identity.
    #[default]
    None,
    /// ASCII lowercase.
    Lowercase,
}

impl TextTransform {
    fn apply<'a>(self, value: &'a str) -> std::borrow::Cow<'a, str> {
        match self {
            TextTransform::None => std::borrow::Cow::Borrowed(value),
            TextTransform::Lowercase => std::borrow::Cow::Owned(value.to_ascii_lowercase()),
        }
    }
}

/// A leaf condition: compare one request field against a search string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStatement {
    /// The field to inspect.
    pub field: Field,
    /// Comparison operator.
    pub operator: MatchOperator,
    /// Search string. Compared case-sensitively.
    pub value: String,
    /// Transform applied to the field value.
    #[serde(default)]
    pub transform: TextTransform,
}

impl MatchStatement {
    /// Creates a match statement with the identity transform.
    pub fn new(field: Field, operator: MatchOperator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
            transform: TextTransform::None,
        }
    }

    /// Sets the transform.
    pub fn with_transform(mut self, transform: TextTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Evaluates the statement against a request.
    pub fn matches(&self, request: &InboundRequest) -> bool {
        let test = |candidate: &str| {
            let candidate = self.transform.apply(candidate);
            self.operator.apply(&candidate, &self.value)
        };

        match &self.field {
            Field::Header { name } => request.header_values(name).any(test),
            Field::Method => test(request.method.as_str()),
            Field::UriPath => test(request.path.as_str()),
            Field::QueryString => test(request.query.as_deref().unwrap_or("")),
            Field::Label => request.labels.iter().any(|label| test(label.as_str())),
        }
    }
}

/// A boolean expression tree over request attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// All children must match.
    And(Vec<Condition>),
    /// At least one child must match.
    Or(Vec<Condition>),
    /// The child must not match.
    Not(Box<Condition>),
    /// A leaf comparison.
    Match(MatchStatement),
}

impl Condition {
    /// Leaf: `field operator value` with no transform.
    pub fn leaf(field: Field, operator: MatchOperator, value: impl Into<String>) -> Self {
        Condition::Match(MatchStatement::new(field, operator, value))
    }

    /// Leaf on a header.
    pub fn header(name: &str, operator: MatchOperator, value: impl Into<String>) -> Self {
        Self::leaf(Field::header(name), operator, value)
    }

    /// Leaf: method equals `method`.
    pub fn method(method: impl Into<String>) -> Self {
        Self::leaf(Field::Method, MatchOperator::Exactly, method)
    }

    /// Leaf: URI path starts with `prefix`.
    pub fn path_prefix(prefix: impl Into<String>) -> Self {
        Self::leaf(Field::UriPath, MatchOperator::StartsWith, prefix)
    }

    /// Leaf: the label is attached.
    pub fn label(label: impl Into<String>) -> Self {
        Self::leaf(Field::Label, MatchOperator::Exactly, label)
    }

    /// Negation.
    pub fn negate(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    /// Evaluates the condition against a request.
    pub fn matches(&self, request: &InboundRequest) -> bool {
        match self {
            Condition::And(children) => children.iter().all(|c| c.matches(request)),
            Condition::Or(children) => children.iter().any(|c| c.matches(request)),
            Condition::Not(child) => !child.matches(request),
            Condition::Match(statement) => statement.matches(request),
        }
    }

    /// Checks structural validity, returning a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Condition::And(children) | Condition::Or(children) => {
                if children.is_empty() {
                    return Err("and/or statement has no children".to_string());
                }
                children.iter().try_for_each(Condition::validate)
            }
            Condition::Not(child) => child.validate(),
            Condition::Match(statement) => {
                if let Field::Header { name } = &statement.field {
                    if name.trim().is_empty() {
                        return Err("header match has an empty header name".to_string());
                    }
                }
                if statement.value.is_empty() {
                    return Err(format!(
                        "match on {} has an empty search string",
                        statement.field.describe()
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html_get() -> Condition {
        Condition::And(vec![
            Condition::header("Accept", MatchOperator::Contains, "text/html"),
            Condition::method("GET"),
        ])
    }

    #[test]
    fn and_requires_all_children() {
        let cond = html_get();

        let req = InboundRequest::new("GET", "/").with_header("accept", "text/html,*/*");
        assert!(cond.matches(&req));

        let req = InboundRequest::new("POST", "/").with_header("accept", "text/html");
        assert!(!cond.matches(&req));

        let req = InboundRequest::new("GET", "/").with_header("accept", "application/json");
        assert!(!cond.matches(&req));

        let req = InboundRequest::new("GET", "/");
        assert!(!cond.matches(&req));
    }

    #[test]
    fn or_requires_any_child() {
        let cond = Condition::Or(vec![Condition::method("PUT"), Condition::method("DELETE")]);
        assert!(cond.matches(&InboundRequest::new("DELETE", "/")));
        assert!(!cond.matches(&InboundRequest::new("GET", "/")));
    }

    #[test]
    fn not_inverts() {
        let cond = Condition::negate(Condition::header(
            "Accept-Language",
            MatchOperator::Contains,
            "-",
        ));
        assert!(cond.matches(&InboundRequest::new("GET", "/")));
        assert!(!cond.matches(&InboundRequest::new("GET", "/").with_header("accept-language", "en-US")));
    }

    #[test]
    fn values_are_case_sensitive_without_transform() {
        let cond = Condition::method("GET");
        assert!(!cond.matches(&InboundRequest::new("get", "/")));

        let lower = Condition::Match(
            MatchStatement::new(Field::Method, MatchOperator::Exactly, "get")
                .with_transform(TextTransform::Lowercase),
        );
        assert!(lower.matches(&InboundRequest::new("GET", "/")));
    }

    #[test]
    fn path_prefix() {
        let cond = Condition::path_prefix("/api");
        assert!(cond.matches(&InboundRequest::new("GET", "/api/tasks")));
        assert!(cond.matches(&InboundRequest::new("GET", "/api")));
        assert!(!cond.matches(&InboundRequest::new("GET", "/index.html")));
        assert!(!cond.matches(&InboundRequest::new("GET", "/static/api")));
    }

    #[test]
    fn operators() {
        let req = InboundRequest::new("GET", "/assets/app.js?v=3");
        assert!(Condition::leaf(Field::UriPath, MatchOperator::EndsWith, ".js").matches(&req));
        assert!(Condition::leaf(Field::QueryString, MatchOperator::Exactly, "v=3").matches(&req));
        assert!(!Condition::leaf(Field::QueryString, MatchOperator::Exactly, "v=4").matches(&req));
    }

    #[test]
    fn label_match() {
        let cond = Condition::label("volumetric:session");
        assert!(cond.matches(&InboundRequest::new("GET", "/").with_label("volumetric:session")));
        assert!(!cond.matches(&InboundRequest::new("GET", "/")));
    }

    #[test]
    fn validate_rejects_empty_combinators_and_values() {
        assert!(Condition::And(vec![]).validate().is_err());
        assert!(Condition::Or(vec![]).validate().is_err());
        assert!(Condition::header(" ", MatchOperator::Contains, "x").validate().is_err());
        assert!(Condition::method("").validate().is_err());
        assert!(Condition::negate(Condition::And(vec![])).validate().is_err());
        assert!(html_get().validate().is_ok());
    }

    #[test]
    fn condition_serialization() {
        let cond = html_get();
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["and"][0]["match"]["operator"], "CONTAINS");
        assert_eq!(json["and"][0]["match"]["field"]["type"], "header");
        assert_eq!(json["and"][1]["match"]["field"]["type"], "method");

        let back: Condition = serde_json::from_value(json).unwrap();
        assert_eq!(back, cond);
    }
}
