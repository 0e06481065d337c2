use crate::document::{Document, Sort};
use crate::error::{CollectionDbError, Result};
use crate::store::{Collection, Filter};
use regex::RegexBuilder;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Records returned when a query names no limit.
pub const DEFAULT_LIMIT: usize = 30;
/// Ceiling on agent-facing queries.
pub const AGENT_LIMIT_CAP: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Count,
    Range,
    Value,
    ValueExact,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Count => "count",
            QueryType::Range => "range",
            QueryType::Value => "value",
            QueryType::ValueExact => "value_exact",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = CollectionDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(QueryType::Count),
            "range" => Ok(QueryType::Range),
            "value" => Ok(QueryType::Value),
            "value_exact" => Ok(QueryType::ValueExact),
            other => Err(CollectionDbError::InvalidQueryType(format!(
                "'{other}' (expected count, range, value or value_exact)"
            ))),
        }
    }
}

/// Who a query is served to, which decides how its limit is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitPolicy {
    /// Defaults to [`DEFAULT_LIMIT`], never above [`AGENT_LIMIT_CAP`].
    #[default]
    Agent,
    /// Export and other bulk paths: `0` or no limit means unlimited.
    Bulk,
}

impl LimitPolicy {
    pub fn effective(self, requested: Option<usize>) -> Option<usize> {
        match (self, requested) {
            (LimitPolicy::Agent, None | Some(0)) => Some(DEFAULT_LIMIT),
            (LimitPolicy::Agent, Some(n)) => Some(n.min(AGENT_LIMIT_CAP)),
            (LimitPolicy::Bulk, None | Some(0)) => None,
            (LimitPolicy::Bulk, Some(n)) => Some(n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub collection: String,
    pub query_type: QueryType,
    /// Dotted field path, required by `value` and `value_exact`.
    pub attribute: Option<String>,
    /// A pattern for `value`; the JSON value to compare for `value_exact`.
    pub value: Option<Value>,
    pub limit: Option<usize>,
    pub policy: LimitPolicy,
}

impl QueryRequest {
    pub fn new(collection: impl Into<String>, query_type: QueryType) -> Self {
        QueryRequest {
            collection: collection.into(),
            query_type,
            attribute: None,
            value: None,
            limit: None,
            policy: LimitPolicy::Agent,
        }
    }

    pub fn attribute(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute = Some(attribute.into());
        self.value = Some(value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn policy(mut self, policy: LimitPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Count(usize),
    Records(Vec<Document>),
}

/// Run a query against a collection handle.
pub fn run(collection: &Collection<'_>, request: &QueryRequest) -> Result<QueryOutcome> {
    let limit = request.policy.effective(request.limit);

    match request.query_type {
        QueryType::Count => Ok(QueryOutcome::Count(collection.count(&Filter::All)?)),
        QueryType::Range => Ok(QueryOutcome::Records(collection.find_live(
            &Filter::All,
            Some(Sort::ByOrderNewestFirst),
            limit,
        )?)),
        QueryType::Value | QueryType::ValueExact => {
            let filter = build_filter(request)?;
            Ok(QueryOutcome::Records(collection.find_live(
                &filter,
                Some(Sort::ByOrder),
                limit,
            )?))
        }
    }
}

fn build_filter(request: &QueryRequest) -> Result<Filter> {
    let (Some(path), Some(value)) = (&request.attribute, &request.value) else {
        return Err(CollectionDbError::MalformedInput(format!(
            "'{}' queries require both attribute and value",
            request.query_type
        )));
    };
    let path = path.clone();

    if request.query_type == QueryType::ValueExact {
        return Ok(Filter::Equals {
            path,
            value: value.clone(),
        });
    }

    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let pattern = RegexBuilder::new(&raw)
        .case_insensitive(true)
        .build()
        .map_err(|e| CollectionDbError::MalformedInput(format!("invalid pattern '{raw}': {e}")))?;
    Ok(Filter::Matches { path, pattern })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_type() {
        assert_eq!("range".parse::<QueryType>().unwrap(), QueryType::Range);
        assert_eq!("value_exact".parse::<QueryType>().unwrap(), QueryType::ValueExact);
        assert!(matches!(
            "latest".parse::<QueryType>(),
            Err(CollectionDbError::InvalidQueryType(_))
        ));
    }

    #[test]
    fn test_agent_limits_are_capped() {
        assert_eq!(LimitPolicy::Agent.effective(None), Some(30));
        assert_eq!(LimitPolicy::Agent.effective(Some(0)), Some(30));
        assert_eq!(LimitPolicy::Agent.effective(Some(5)), Some(5));
        assert_eq!(LimitPolicy::Agent.effective(Some(500)), Some(30));
    }

    #[test]
    fn test_bulk_zero_is_unlimited() {
        assert_eq!(LimitPolicy::Bulk.effective(None), None);
        assert_eq!(LimitPolicy::Bulk.effective(Some(0)), None);
        assert_eq!(LimitPolicy::Bulk.effective(Some(500)), Some(500));
    }

    #[test]
    fn test_value_query_needs_attribute() {
        let request = QueryRequest::new("notes", QueryType::Value);
        assert!(matches!(
            build_filter(&request),
            Err(CollectionDbError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_invalid_pattern_is_malformed() {
        let request = QueryRequest::new("notes", QueryType::Value).attribute("title", "(unclosed");
        let err = build_filter(&request).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }
}
