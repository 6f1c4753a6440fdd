//! Detached value trees handed to mutators, and read results.

use crate::id::Id;
use serde_json::Value;

/// Description of a value before it is attached to a document.
///
/// Scalars stay plain JSON. The three container variants become nodes with
/// freshly minted ids when a mutator consumes the tree; scalars handed to a
/// map or list are wrapped in an internal register node at that point.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveValue {
    Scalar(Value),
    Object(Vec<(String, LiveValue)>),
    Map(Vec<(String, LiveValue)>),
    List(Vec<LiveValue>),
}

impl LiveValue {
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, LiveValue)>,
        K: Into<String>,
    {
        LiveValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, LiveValue)>,
        K: Into<String>,
    {
        LiveValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = LiveValue>,
    {
        LiveValue::List(items.into_iter().collect())
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, LiveValue::Scalar(_))
    }
}

impl From<Value> for LiveValue {
    fn from(value: Value) -> Self {
        LiveValue::Scalar(value)
    }
}

macro_rules! scalar_into_live_value {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for LiveValue {
            fn from(value: $ty) -> Self {
                LiveValue::Scalar(Value::from(value))
            }
        })*
    };
}

scalar_into_live_value!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, &str, String);

/// Result of reading a key or index.
///
/// Scalars are cloned out of the tree; register children are unwrapped to
/// their scalar before they reach the caller. Container children come back as
/// ids to be resolved through the document.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRef {
    Scalar(Value),
    Node(Id),
}

impl ValueRef {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ValueRef::Scalar(value) => Some(value),
            ValueRef::Node(_) => None,
        }
    }

    pub fn node_id(&self) -> Option<Id> {
        match self {
            ValueRef::Scalar(_) => None,
            ValueRef::Node(id) => Some(*id),
        }
    }
}
