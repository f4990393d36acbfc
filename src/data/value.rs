use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar (or list-of-scalar) value stored in a field entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
    IntegerList(Vec<i64>),
    DecimalList(Vec<f64>),
    TextList(Vec<String>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(items: &[T]) -> String {
            items
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",")
        }
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::IntegerList(v) => write!(f, "[{}]", join(v)),
            Self::DecimalList(v) => write!(f, "[{}]", join(v)),
            Self::TextList(v) => write!(f, "[{}]", join(v)),
        }
    }
}
