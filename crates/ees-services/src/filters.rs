//! Inline filter evaluation
//!
//! Filters are either inline rules, `*type:element:values`, or IDs of named
//! profiles from `ees.filter_profiles`. Elements and values prefixed with
//! `~` are read from the data provider; values are `;`-separated and a rule
//! passes when any value matches.
//!
//! Supported types: `*string`, `*prefix`, `*suffix`, `*exists`, `*empty`,
//! `*gt`, `*gte`, `*lt`, `*lte`, each negated by the `*not` prefix
//! (`*notstring`, `*notexists`, ...).

use ees_core::models::value_to_string;
use ees_core::traits::{DataProvider, FilterService};
use ees_core::{EesError, EesResult};
use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

const DYNAMIC_PREFIX: char = '~';
const NOT_PREFIX: &str = "*not";
const VALUES_SEP: char = ';';

/// Filter type of an inline rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    String,
    Prefix,
    Suffix,
    Exists,
    Empty,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RuleKind {
    fn parse(tag: &str) -> Option<Self> {
        let kind = match tag {
            "*string" => Self::String,
            "*prefix" => Self::Prefix,
            "*suffix" => Self::Suffix,
            "*exists" => Self::Exists,
            "*empty" => Self::Empty,
            "*gt" => Self::Gt,
            "*gte" => Self::Gte,
            "*lt" => Self::Lt,
            "*lte" => Self::Lte,
            _ => return None,
        };
        Some(kind)
    }
}

/// Parsed inline rule
#[derive(Debug, Clone, PartialEq)]
struct InlineRule {
    kind: RuleKind,
    negated: bool,
    element: String,
    values: Vec<String>,
}

impl InlineRule {
    fn parse(rule: &str) -> EesResult<Self> {
        let parts: Vec<&str> = rule.splitn(3, ':').collect();
        if parts.len() < 3 {
            return Err(EesError::Filter(format!(
                "inline parse error for string: <{}>",
                rule
            )));
        }

        let (tag, negated) = match parts[0].strip_prefix(NOT_PREFIX) {
            Some(rest) => (format!("*{}", rest), true),
            None => (parts[0].to_string(), false),
        };
        let kind = RuleKind::parse(&tag)
            .ok_or_else(|| EesError::Filter(format!("unsupported filter type: <{}>", parts[0])))?;

        let values = parts[2]
            .split(VALUES_SEP)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            kind,
            negated,
            element: parts[1].to_string(),
            values,
        })
    }

    fn pass(&self, dp: &dyn DataProvider) -> bool {
        let field = resolve(&self.element, dp);
        let matched = match self.kind {
            RuleKind::Exists => field.is_some(),
            RuleKind::Empty => field.as_ref().map_or(false, is_empty_value),
            _ => match field {
                None => false,
                Some(field) => self
                    .values
                    .iter()
                    .filter_map(|v| resolve(v, dp))
                    .any(|v| self.matches(&field, &v)),
            },
        };
        matched != self.negated
    }

    fn matches(&self, field: &Value, value: &Value) -> bool {
        let field_str = value_to_string(field);
        let value_str = value_to_string(value);
        match self.kind {
            RuleKind::String => field_str == value_str,
            RuleKind::Prefix => field_str.starts_with(&value_str),
            RuleKind::Suffix => field_str.ends_with(&value_str),
            RuleKind::Gt | RuleKind::Gte | RuleKind::Lt | RuleKind::Lte => {
                match (as_number(field), as_number(value)) {
                    (Some(f), Some(v)) => match self.kind {
                        RuleKind::Gt => f > v,
                        RuleKind::Gte => f >= v,
                        RuleKind::Lt => f < v,
                        _ => f <= v,
                    },
                    _ => false,
                }
            }
            RuleKind::Exists | RuleKind::Empty => false,
        }
    }
}

fn resolve(element: &str, dp: &dyn DataProvider) -> Option<Value> {
    match element.strip_prefix(DYNAMIC_PREFIX) {
        Some(path) => dp.field_as_value(path),
        None => Some(Value::String(element.to_string())),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Default filter engine: inline rules plus named profiles
#[derive(Debug, Clone, Default)]
pub struct InlineFilterS {
    profiles: HashMap<String, Vec<String>>,
}

impl InlineFilterS {
    pub fn new(profiles: HashMap<String, Vec<String>>) -> Self {
        Self { profiles }
    }

    fn pass_one(&self, tenant: &str, filter: &str, dp: &dyn DataProvider) -> EesResult<bool> {
        if filter.starts_with('*') {
            return Ok(InlineRule::parse(filter)?.pass(dp));
        }

        let rules = self
            .profiles
            .get(filter)
            .ok_or_else(|| EesError::FilterNotFound(format!("{}:{}", tenant, filter)))?;
        for rule in rules {
            if !InlineRule::parse(rule)?.pass(dp) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl FilterService for InlineFilterS {
    fn pass(&self, tenant: &str, filters: &[String], dp: &dyn DataProvider) -> EesResult<bool> {
        for filter in filters {
            if !self.pass_one(tenant, filter, dp)? {
                trace!("<EEs> filter <{}> did not pass", filter);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::EventDataProvider;
    use ees_core::models::CgrEvent;

    fn event() -> CgrEvent {
        CgrEvent::new("cgrates.org", "ev1")
            .with_field("Account", "1001")
            .with_field("Destination", "+4986517174963")
            .with_field("Cost", 1.5)
            .with_field("Subject", "")
            .with_opt("*context", "*ees")
    }

    fn pass(filters: &[&str]) -> EesResult<bool> {
        let ev = event();
        let dp = EventDataProvider::new(&ev);
        let filters: Vec<String> = filters.iter().map(|f| f.to_string()).collect();
        InlineFilterS::default().pass("cgrates.org", &filters, &dp)
    }

    #[test]
    fn test_string_and_negation() {
        assert!(pass(&["*string:~*req.Account:1001"]).unwrap());
        assert!(pass(&["*string:~*req.Account:1002;1001"]).unwrap());
        assert!(!pass(&["*string:~*req.Account:1002"]).unwrap());
        assert!(pass(&["*notstring:~*req.Account:1002"]).unwrap());
        assert!(!pass(&["*string:~*req.Missing:1001"]).unwrap());
    }

    #[test]
    fn test_prefix_suffix() {
        assert!(pass(&["*prefix:~*req.Destination:+49"]).unwrap());
        assert!(!pass(&["*prefix:~*req.Destination:+40"]).unwrap());
        assert!(pass(&["*suffix:~*req.Destination:963"]).unwrap());
        assert!(pass(&["*notprefix:~*req.Destination:+40"]).unwrap());
    }

    #[test]
    fn test_exists_empty() {
        assert!(pass(&["*exists:~*req.Account:"]).unwrap());
        assert!(!pass(&["*exists:~*req.Missing:"]).unwrap());
        assert!(pass(&["*notexists:~*req.Missing:"]).unwrap());
        assert!(pass(&["*empty:~*req.Subject:"]).unwrap());
        assert!(!pass(&["*empty:~*req.Account:"]).unwrap());
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(pass(&["*gt:~*req.Cost:1"]).unwrap());
        assert!(pass(&["*gte:~*req.Cost:1.5"]).unwrap());
        assert!(!pass(&["*lt:~*req.Cost:1.5"]).unwrap());
        assert!(pass(&["*lte:~*req.Cost:1.5"]).unwrap());
        assert!(!pass(&["*gt:~*req.Account:abc"]).unwrap());
    }

    #[test]
    fn test_opts_namespace() {
        assert!(pass(&["*string:~*opts.*context:*ees"]).unwrap());
    }

    #[test]
    fn test_all_filters_must_pass() {
        assert!(!pass(&["*string:~*req.Account:1001", "*prefix:~*req.Destination:+40"]).unwrap());
        assert!(pass(&[]).unwrap());
    }

    #[test]
    fn test_parse_error() {
        let err = pass(&["*wrong-type"]).unwrap_err();
        assert_eq!(err.to_string(), "inline parse error for string: <*wrong-type>");

        let err = pass(&["*regex:~*req.Account:1.*"]).unwrap_err();
        assert!(matches!(err, EesError::Filter(_)));
    }

    #[test]
    fn test_named_profiles() {
        let filters = InlineFilterS::new(HashMap::from([(
            "FLTR_1001".to_string(),
            vec![
                "*string:~*req.Account:1001".to_string(),
                "*gt:~*req.Cost:1".to_string(),
            ],
        )]));
        let ev = event();
        let dp = EventDataProvider::new(&ev);

        assert!(filters.pass("cgrates.org", &["FLTR_1001".to_string()], &dp).unwrap());
        let err = filters
            .pass("cgrates.org", &["FLTR_MISSING".to_string()], &dp)
            .unwrap_err();
        assert!(matches!(err, EesError::FilterNotFound(_)));
    }
}
