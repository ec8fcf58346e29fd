use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::index::btree::key::GenericKey;

#[derive(Error, Debug)]
pub enum TupleError {
    #[error("Serialization failed: {0}")]
    Codec(String),

    #[error("Column index {0} out of range")]
    ColumnOutOfRange(usize),

    #[error("Type mismatch: expected {0}")]
    TypeMismatch(&'static str),
}

/// A single column value. Only types with a total order and a stable hash
/// are representable, which keeps group-by keys and index keys simple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Text(String),
    Boolean(bool),
    Null,
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => write!(f, "NULL"),
        }
    }
}

/// A row of values, stored bincode-encoded in heap pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value_at(&self, index: usize) -> Result<&Value, TupleError> {
        self.values.get(index).ok_or(TupleError::ColumnOutOfRange(index))
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TupleError> {
        bincode::serialize(&self.values).map_err(|e| TupleError::Codec(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TupleError> {
        let values = bincode::deserialize(bytes).map_err(|e| TupleError::Codec(e.to_string()))?;
        Ok(Self { values })
    }

    /// Build an index key from the indexed column. Indexes in this engine
    /// key on a single integer column.
    pub fn key_from_tuple<const N: usize>(&self, key_attrs: &[usize]) -> Result<GenericKey<N>, TupleError> {
        let attr = *key_attrs.first().ok_or(TupleError::ColumnOutOfRange(0))?;
        match self.value_at(attr)? {
            Value::Integer(v) => Ok(GenericKey::from_i64(*v)),
            _ => Err(TupleError::TypeMismatch("Integer")),
        }
    }

    /// Concatenate two tuples (join output)
    pub fn join(&self, other: &Tuple) -> Tuple {
        let mut values = self.values.clone();
        values.extend(other.values.iter().cloned());
        Tuple::new(values)
    }
}
