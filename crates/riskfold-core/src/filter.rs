//! Structured row filters
//!
//! Feature and label definitions narrow their source rows with filters instead of
//! free-text SQL. Backends either evaluate them in memory with [`Filter::matches`] or
//! translate them into a WHERE clause whose values are bound as parameters.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Filter condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Column to filter on
    pub column: String,

    /// Operator
    pub op: FilterOp,

    /// Value(s) to compare against; ignored by `is_null` / `not_null`
    #[serde(default)]
    pub value: FilterValue,
}

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,      // =
    Ne,      // !=
    Gt,      // >
    Ge,      // >=
    Lt,      // <
    Le,      // <=
    In,      // IN
    NotIn,   // NOT IN
    IsNull,  // IS NULL
    NotNull, // IS NOT NULL
}

impl FilterOp {
    /// SQL spelling of comparison operators
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
            FilterOp::IsNull => "IS NULL",
            FilterOp::NotNull => "IS NOT NULL",
        }
    }
}

/// A single value or a list of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Many(Vec<Value>),
    One(Value),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::One(Value::Null)
    }
}

impl FilterValue {
    pub fn values(&self) -> Vec<&Value> {
        match self {
            FilterValue::Many(values) => values.iter().collect(),
            FilterValue::One(value) => vec![value],
        }
    }
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: FilterValue::One(value.into()),
        }
    }

    pub fn any_of(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::In,
            value: FilterValue::Many(values),
        }
    }

    /// Evaluate against a cell. SQL three-valued logic: comparisons with NULL are false.
    pub fn matches(&self, cell: &Value) -> bool {
        match self.op {
            FilterOp::IsNull => cell.is_null(),
            FilterOp::NotNull => !cell.is_null(),
            FilterOp::In => {
                !cell.is_null() && self.value.values().iter().any(|v| values_equal(cell, v))
            }
            FilterOp::NotIn => {
                !cell.is_null() && !self.value.values().iter().any(|v| values_equal(cell, v))
            }
            op => {
                let FilterValue::One(expected) = &self.value else {
                    return false;
                };
                if cell.is_null() || expected.is_null() {
                    return false;
                }
                match compare(cell, expected) {
                    Some(ordering) => match op {
                        FilterOp::Eq => ordering.is_eq(),
                        FilterOp::Ne => ordering.is_ne(),
                        FilterOp::Gt => ordering.is_gt(),
                        FilterOp::Ge => ordering.is_ge(),
                        FilterOp::Lt => ordering.is_lt(),
                        FilterOp::Le => ordering.is_le(),
                        _ => false,
                    },
                    None => false,
                }
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    matches!(compare(a, b), Some(std::cmp::Ordering::Equal))
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Date(_), _) | (_, Value::Date(_)) => {
            Some(a.as_date()?.cmp(&b.as_date()?))
        }
        (Value::Number(_), Value::Text(_)) | (Value::Text(_), Value::Number(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters_from_yaml() {
        let yaml = r#"
- column: reason
  op: in
  value: ["SUICIDE ATTEMPT", "OVERDOSE"]
- column: severity
  op: ge
  value: 3
- column: disposition
  op: not_null
"#;
        let filters: Vec<Filter> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0].op, FilterOp::In);
        assert!(filters[0].matches(&Value::from("OVERDOSE")));
        assert!(!filters[0].matches(&Value::from("FALL")));
        assert!(filters[1].matches(&Value::Number(4.0)));
        assert!(!filters[1].matches(&Value::Number(2.0)));
        assert!(filters[2].matches(&Value::from("TRANSPORTED")));
        assert!(!filters[2].matches(&Value::Null));
    }

    #[test]
    fn test_null_comparisons_are_false() {
        let filter = Filter::new("severity", FilterOp::Ne, 3.0);
        assert!(!filter.matches(&Value::Null));
        let filter = Filter::any_of("reason", vec![Value::from("X")]);
        assert!(!filter.matches(&Value::Null));
    }
}
