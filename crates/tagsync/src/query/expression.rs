//! Operator tree produced by the query compiler.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{OrderBy, TagId};

/// A compiled search predicate.
///
/// The serde representation is the JSON transport form:
/// `{"tag":1}`, `{"attribute":["k","v"]}`, `{"not":..}`, `{"and":[..,..]}`,
/// `{"or":[..,..]}`, `{"minid":n}`, `{"maxid":n}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Not(Box<Operator>),
    And(Box<Operator>, Box<Operator>),
    Or(Box<Operator>, Box<Operator>),
    Tag(TagId),
    Attribute(String, String),
    MinId(u64),
    MaxId(u64),
}

impl Operator {
    pub fn negate(inner: Operator) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn and(left: Operator, right: Operator) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Operator, right: Operator) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Every variant serializes to a plain JSON object.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

}

/// Canonical human-readable form. Reparses to the same tree.
impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not(inner) => write!(f, "not {inner}"),
            Self::And(left, right) => write!(f, "({left} and {right})"),
            Self::Or(left, right) => write!(f, "({left} or {right})"),
            Self::Tag(id) => write!(f, "tag:{id}"),
            Self::Attribute(key, value) => {
                if attribute_value_needs_quotes(value) {
                    write!(f, "{key}=\"")?;
                    for ch in value.chars() {
                        if matches!(ch, '"' | '\\') {
                            write!(f, "\\")?;
                        }
                        write!(f, "{ch}")?;
                    }
                    write!(f, "\"")
                } else {
                    write!(f, "{key}={value}")
                }
            }
            Self::MinId(id) => write!(f, "min_id:{id}"),
            Self::MaxId(id) => write!(f, "max_id:{id}"),
        }
    }
}

fn attribute_value_needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | '\\'))
}

/// Result of compiling one search string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledQuery {
    /// The trimmed source text.
    pub text: String,
    /// `None` matches everything.
    pub operator: Option<Operator>,
    pub order_by: Option<OrderBy>,
}

impl CompiledQuery {
    pub fn is_unconstrained(&self) -> bool {
        self.operator.is_none()
    }

    /// Query text sent in the `query` URL parameter.
    pub fn to_query_text(&self) -> String {
        self.operator
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.operator
            .as_ref()
            .map(Operator::to_json)
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Operator {
        Operator::and(
            Operator::Tag(4),
            Operator::or(
                Operator::negate(Operator::Attribute("source".into(), "web".into())),
                Operator::MinId(100),
            ),
        )
    }

    #[test]
    fn json_form_matches_transport_shape() {
        assert_eq!(
            sample().to_json(),
            json!({
                "and": [
                    { "tag": 4 },
                    { "or": [
                        { "not": { "attribute": ["source", "web"] } },
                        { "minid": 100 }
                    ] }
                ]
            })
        );
        assert_eq!(Operator::MaxId(9).to_json(), json!({ "maxid": 9 }));
    }

    #[test]
    fn json_form_parses_back() {
        let parsed: Operator = serde_json::from_value(sample().to_json()).expect("parse");
        assert_eq!(parsed, sample());
    }

    #[test]
    fn display_renders_canonical_text() {
        assert_eq!(
            sample().to_string(),
            "(tag:4 and (not source=web or min_id:100))"
        );
    }

    #[test]
    fn display_quotes_attribute_values_with_spaces() {
        let op = Operator::Attribute("caption".into(), "a \"big\" cat".into());
        assert_eq!(op.to_string(), r#"caption="a \"big\" cat""#);
    }

    #[test]
    fn unconstrained_query_has_empty_text() {
        let compiled = CompiledQuery::default();
        assert!(compiled.is_unconstrained());
        assert_eq!(compiled.to_query_text(), "");
        assert_eq!(compiled.to_json(), serde_json::Value::Null);
    }
}
