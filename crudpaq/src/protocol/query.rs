//! Query filters, sort keys and count policies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JsonPointer;
use crate::error::{ResourceException, ResourceResult};

/// How precisely a query should count its total results
///
/// A provider may answer `Estimate` with `Exact`, and a provider that cannot
/// count answers with `None`. It never reports a made-up number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountPolicy {
    /// No count requested or available
    #[default]
    None,
    /// A cheap approximation is acceptable
    Estimate,
    /// Exact count
    Exact,
}

impl fmt::Display for CountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Estimate => write!(f, "ESTIMATE"),
            Self::Exact => write!(f, "EXACT"),
        }
    }
}

impl FromStr for CountPolicy {
    type Err = ResourceException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "ESTIMATE" => Ok(Self::Estimate),
            "EXACT" => Ok(Self::Exact),
            _ => Err(ResourceException::bad_request(format!(
                "'{s}' is not a valid count policy"
            ))),
        }
    }
}

/// A field to sort by, with direction
///
/// The string form is the field pointer optionally prefixed by `+`
/// (ascending, the default) or `-` (descending).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    field: JsonPointer,
    ascending: bool,
}

impl SortKey {
    /// Ascending sort on `field`
    pub fn ascending(field: impl Into<JsonPointer>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    /// Descending sort on `field`
    pub fn descending(field: impl Into<JsonPointer>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    /// Parse `+field`, `-field` or `field`
    pub fn parse(key: &str) -> ResourceResult<Self> {
        let key = key.trim();
        let (ascending, field) = match key.as_bytes().first() {
            Some(b'-') => (false, &key[1..]),
            Some(b'+') => (true, &key[1..]),
            _ => (true, key),
        };
        if field.is_empty() {
            return Err(ResourceException::bad_request(format!(
                "'{key}' is not a valid sort key"
            )));
        }
        Ok(Self {
            field: JsonPointer::parse(field),
            ascending,
        })
    }

    /// Field to sort on
    pub fn field(&self) -> &JsonPointer {
        &self.field
    }

    /// Whether the sort is ascending
    pub fn is_ascending(&self) -> bool {
        self.ascending
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.ascending { '+' } else { '-' };
        write!(f, "{sign}{}", self.field)
    }
}

/// Comparison operators understood by [`QueryFilter::Comparison`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOperator {
    /// `eq`
    Equals,
    /// `co`
    Contains,
    /// `sw`
    StartsWith,
    /// `gt`
    GreaterThan,
    /// `ge`
    GreaterThanOrEqual,
    /// `lt`
    LessThan,
    /// `le`
    LessThanOrEqual,
}

impl ComparisonOperator {
    /// Short operator name used in the string form
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "eq",
            Self::Contains => "co",
            Self::StartsWith => "sw",
            Self::GreaterThan => "gt",
            Self::GreaterThanOrEqual => "ge",
            Self::LessThan => "lt",
            Self::LessThanOrEqual => "le",
        }
    }
}

/// Query filter expression tree
///
/// # Example
///
/// ```rust
/// use crudpaq::protocol::QueryFilter;
/// use serde_json::json;
///
/// let filter = QueryFilter::and(vec![
///     QueryFilter::equals("/status", json!("active")),
///     QueryFilter::not(QueryFilter::present("/deleted")),
/// ]);
/// assert_eq!(filter.to_string(), r#"(/status eq "active" and !(/deleted pr))"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueryFilter {
    /// Constant result
    Boolean {
        /// The constant
        value: bool,
    },
    /// All sub-filters match
    And {
        /// Operands
        filters: Vec<QueryFilter>,
    },
    /// Any sub-filter matches
    Or {
        /// Operands
        filters: Vec<QueryFilter>,
    },
    /// Negation
    Not {
        /// Operand
        filter: Box<QueryFilter>,
    },
    /// Field exists and is not null
    Present {
        /// Field
        field: JsonPointer,
    },
    /// Field compared against a value
    Comparison {
        /// Field
        field: JsonPointer,
        /// Operator
        operator: ComparisonOperator,
        /// Assertion value
        value: Value,
    },
    /// Application-defined operator
    Extended {
        /// Field
        field: JsonPointer,
        /// Operator name
        operator: String,
        /// Assertion value
        value: Value,
    },
}

impl QueryFilter {
    /// Filter that always matches
    pub fn always_true() -> Self {
        Self::Boolean { value: true }
    }

    /// Filter that never matches
    pub fn always_false() -> Self {
        Self::Boolean { value: false }
    }

    /// Conjunction
    pub fn and(filters: Vec<QueryFilter>) -> Self {
        Self::And { filters }
    }

    /// Disjunction
    pub fn or(filters: Vec<QueryFilter>) -> Self {
        Self::Or { filters }
    }

    /// Negation
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: QueryFilter) -> Self {
        Self::Not {
            filter: Box::new(filter),
        }
    }

    /// Presence test
    pub fn present(field: impl Into<JsonPointer>) -> Self {
        Self::Present {
            field: field.into(),
        }
    }

    /// Generic comparison
    pub fn comparison(field: impl Into<JsonPointer>, operator: ComparisonOperator, value: Value) -> Self {
        Self::Comparison {
            field: field.into(),
            operator,
            value,
        }
    }

    /// `field eq value`
    pub fn equals(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::comparison(field, ComparisonOperator::Equals, value)
    }

    /// `field co value`
    pub fn contains(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::comparison(field, ComparisonOperator::Contains, value)
    }

    /// `field sw value`
    pub fn starts_with(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::comparison(field, ComparisonOperator::StartsWith, value)
    }

    /// `field gt value`
    pub fn greater_than(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::comparison(field, ComparisonOperator::GreaterThan, value)
    }

    /// `field ge value`
    pub fn greater_than_or_equal(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::comparison(field, ComparisonOperator::GreaterThanOrEqual, value)
    }

    /// `field lt value`
    pub fn less_than(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::comparison(field, ComparisonOperator::LessThan, value)
    }

    /// `field le value`
    pub fn less_than_or_equal(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::comparison(field, ComparisonOperator::LessThanOrEqual, value)
    }

    /// Application-defined comparison
    pub fn extended(field: impl Into<JsonPointer>, operator: impl Into<String>, value: Value) -> Self {
        Self::Extended {
            field: field.into(),
            operator: operator.into(),
            value,
        }
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, filters: &[QueryFilter], op: &str) -> fmt::Result {
            f.write_str("(")?;
            for (i, filter) in filters.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{filter}")?;
            }
            f.write_str(")")
        }

        match self {
            Self::Boolean { value } => write!(f, "{value}"),
            Self::And { filters } => join(f, filters, "and"),
            Self::Or { filters } => join(f, filters, "or"),
            Self::Not { filter } => write!(f, "!({filter})"),
            Self::Present { field } => write!(f, "{field} pr"),
            Self::Comparison {
                field,
                operator,
                value,
            } => write!(f, "{field} {} {value}", operator.as_str()),
            Self::Extended {
                field,
                operator,
                value,
            } => write!(f, "{field} {operator} {value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_key_parse() {
        let asc = SortKey::parse("name").unwrap();
        assert!(asc.is_ascending());
        assert_eq!(asc.field(), &JsonPointer::parse("/name"));

        let desc = SortKey::parse("-age").unwrap();
        assert!(!desc.is_ascending());
        assert_eq!(desc.to_string(), "-/age");

        assert!(SortKey::parse("+").is_err());
        assert!(SortKey::parse("").is_err());
    }

    #[test]
    fn test_count_policy_parse() {
        assert_eq!("exact".parse::<CountPolicy>().unwrap(), CountPolicy::Exact);
        assert_eq!("ESTIMATE".parse::<CountPolicy>().unwrap(), CountPolicy::Estimate);
        assert!("sometimes".parse::<CountPolicy>().is_err());
        assert_eq!(CountPolicy::default(), CountPolicy::None);
    }

    #[test]
    fn test_filter_display() {
        let filter = QueryFilter::or(vec![
            QueryFilter::greater_than("/age", json!(18)),
            QueryFilter::always_false(),
        ]);
        assert_eq!(filter.to_string(), "(/age gt 18 or false)");
    }

    #[test]
    fn test_filter_serde_shape() {
        let filter = QueryFilter::equals("/name", json!("bob"));
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["type"], "comparison");
        assert_eq!(json["operator"], "equals");
        assert_eq!(json["field"], "/name");
        let back: QueryFilter = serde_json::from_value(json).unwrap();
        assert_eq!(back, filter);
    }
}
