//! Choice rules: the data-test expressions that drive branching.

use serde_json::{Value, json};

use crate::path::JsonPath;

/// A comparison applied to the value a choice rule's variable selects.
#[derive(Debug, Clone, PartialEq)]
pub enum DataTest {
    StringEquals(String),
    StringLessThan(String),
    StringGreaterThan(String),
    StringLessThanEquals(String),
    StringGreaterThanEquals(String),
    NumericEquals(f64),
    NumericLessThan(f64),
    NumericGreaterThan(f64),
    NumericLessThanEquals(f64),
    NumericGreaterThanEquals(f64),
    BooleanEquals(bool),
    IsPresent(bool),
    IsNull(bool),
}

impl DataTest {
    /// The field name this test compiles to in Amazon States Language.
    pub(crate) fn asl_field(&self) -> &'static str {
        match self {
            DataTest::StringEquals(_) => "StringEquals",
            DataTest::StringLessThan(_) => "StringLessThan",
            DataTest::StringGreaterThan(_) => "StringGreaterThan",
            DataTest::StringLessThanEquals(_) => "StringLessThanEquals",
            DataTest::StringGreaterThanEquals(_) => "StringGreaterThanEquals",
            DataTest::NumericEquals(_) => "NumericEquals",
            DataTest::NumericLessThan(_) => "NumericLessThan",
            DataTest::NumericGreaterThan(_) => "NumericGreaterThan",
            DataTest::NumericLessThanEquals(_) => "NumericLessThanEquals",
            DataTest::NumericGreaterThanEquals(_) => "NumericGreaterThanEquals",
            DataTest::BooleanEquals(_) => "BooleanEquals",
            DataTest::IsPresent(_) => "IsPresent",
            DataTest::IsNull(_) => "IsNull",
        }
    }

    /// The literal operand this test compiles to.
    pub(crate) fn asl_value(&self) -> Value {
        match self {
            DataTest::StringEquals(s)
            | DataTest::StringLessThan(s)
            | DataTest::StringGreaterThan(s)
            | DataTest::StringLessThanEquals(s)
            | DataTest::StringGreaterThanEquals(s) => json!(s),
            DataTest::NumericEquals(n)
            | DataTest::NumericLessThan(n)
            | DataTest::NumericGreaterThan(n)
            | DataTest::NumericLessThanEquals(n)
            | DataTest::NumericGreaterThanEquals(n) => json!(n),
            DataTest::BooleanEquals(b) | DataTest::IsPresent(b) | DataTest::IsNull(b) => json!(b),
        }
    }
}

/// One ordered rule of a Choice state: a variable path, a data test, and
/// the state to transition to when the test holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceRule {
    pub variable: JsonPath,
    pub test: DataTest,
    pub next: String,
}

impl ChoiceRule {
    pub fn new(variable: JsonPath, test: DataTest, next: impl Into<String>) -> Self {
        Self {
            variable,
            test,
            next: next.into(),
        }
    }

    /// Evaluate the rule against the state's effective input.
    ///
    /// A variable that does not resolve evaluates to false (except for
    /// `IsPresent`, which tests exactly that), as does a comparison against
    /// a value of the wrong type.
    pub fn evaluate(&self, data: &Value) -> bool {
        let found = self.variable.select(data).ok();
        match &self.test {
            DataTest::IsPresent(expected) => found.is_some() == *expected,
            DataTest::IsNull(expected) => found.is_some_and(|v| v.is_null() == *expected),
            test => {
                let Some(value) = found else {
                    return false;
                };
                Self::compare(test, &value)
            }
        }
    }

    fn compare(test: &DataTest, value: &Value) -> bool {
        match test {
            DataTest::StringEquals(s) => value.as_str() == Some(s.as_str()),
            DataTest::StringLessThan(s) => value.as_str().is_some_and(|v| v < s.as_str()),
            DataTest::StringGreaterThan(s) => value.as_str().is_some_and(|v| v > s.as_str()),
            DataTest::StringLessThanEquals(s) => value.as_str().is_some_and(|v| v <= s.as_str()),
            DataTest::StringGreaterThanEquals(s) => value.as_str().is_some_and(|v| v >= s.as_str()),
            DataTest::NumericEquals(n) => value.as_f64().is_some_and(|v| v == *n),
            DataTest::NumericLessThan(n) => value.as_f64().is_some_and(|v| v < *n),
            DataTest::NumericGreaterThan(n) => value.as_f64().is_some_and(|v| v > *n),
            DataTest::NumericLessThanEquals(n) => value.as_f64().is_some_and(|v| v <= *n),
            DataTest::NumericGreaterThanEquals(n) => value.as_f64().is_some_and(|v| v >= *n),
            DataTest::BooleanEquals(b) => value.as_bool() == Some(*b),
            // Handled before the value comparison in evaluate().
            DataTest::IsPresent(_) | DataTest::IsNull(_) => false,
        }
    }
}
