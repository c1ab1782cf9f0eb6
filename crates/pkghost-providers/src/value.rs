//! Values that cross the provider boundary.
//!
//! Every argument and result of a contract member is a [`Dynamic`]: plain
//! data travels as JSON, while the three host-side object kinds (yield
//! callbacks, capability routers and candidate objects) travel by handle.
//! Member signatures are described with [`ValueKind`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::candidate::Candidate;
use crate::error::CallResult;
use crate::router::CapabilityRouter;

/// Push-style result callback handed to a provider.
///
/// Each call carries one flat tuple of primitives. The return value is
/// "ok to continue": once it is `false` the provider must stop yielding.
pub type YieldFn = Arc<dyn Fn(Vec<Value>) -> bool + Send + Sync>;

/// A type-erased callable, used for members backed by a property.
pub type Callable = Arc<dyn Fn(Vec<Dynamic>) -> CallResult<Dynamic> + Send + Sync>;

/// The kind of a parameter or return value in a member signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value (`null`).
    Unit,
    /// A boolean.
    Bool,
    /// An integer.
    Int,
    /// A string.
    Str,
    /// A list of strings.
    List,
    /// Arbitrary JSON.
    Json,
    /// A [`YieldFn`].
    Callback,
    /// A [`CapabilityRouter`].
    Router,
    /// A [`Candidate`] object.
    Object,
    /// Anything at all.
    Any,
}

impl ValueKind {
    /// Whether a value of this kind may be used where `target` is expected.
    #[must_use]
    pub fn is_assignable_to(self, target: Self) -> bool {
        if target == Self::Any || self == target {
            return true;
        }
        target == Self::Json
            && matches!(
                self,
                Self::Unit | Self::Bool | Self::Int | Self::Str | Self::List
            )
    }
}

/// Parameter and return kinds of one member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Parameter kinds, in order.
    pub params: Vec<ValueKind>,
    /// Return kind.
    pub returns: ValueKind,
}

impl Signature {
    /// Create a signature.
    #[must_use]
    pub fn new(params: &[ValueKind], returns: ValueKind) -> Self {
        Self {
            params: params.to_vec(),
            returns,
        }
    }
}

/// A value passed to or returned from a contract member.
#[derive(Clone)]
pub enum Dynamic {
    /// Plain data.
    Value(Value),
    /// A result callback.
    Callback(YieldFn),
    /// A capability router.
    Router(CapabilityRouter),
    /// An object that can itself be bound to a contract.
    Object(Arc<dyn Candidate>),
}

impl Dynamic {
    /// The `null` value.
    #[must_use]
    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    /// The runtime kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Value(Value::Null) => ValueKind::Unit,
            Self::Value(Value::Bool(_)) => ValueKind::Bool,
            Self::Value(Value::Number(n)) if n.is_i64() || n.is_u64() => ValueKind::Int,
            Self::Value(Value::String(_)) => ValueKind::Str,
            Self::Value(Value::Array(items)) if items.iter().all(Value::is_string) => {
                ValueKind::List
            },
            Self::Value(_) => ValueKind::Json,
            Self::Callback(_) => ValueKind::Callback,
            Self::Router(_) => ValueKind::Router,
            Self::Object(_) => ValueKind::Object,
        }
    }

    /// Whether this is `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// Borrow the JSON payload, if this is plain data.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow a string payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    /// Read a boolean payload.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    /// Read an integer payload.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    /// Read a list of strings. A single string reads as a one-element list.
    #[must_use]
    pub fn to_string_list(&self) -> Option<Vec<String>> {
        match self.as_value()? {
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_owned))
                .collect(),
            Value::String(s) => Some(vec![s.clone()]),
            Value::Null => Some(Vec::new()),
            _ => None,
        }
    }

    /// Borrow the callback, if this is one.
    #[must_use]
    pub fn as_callback(&self) -> Option<&YieldFn> {
        match self {
            Self::Callback(f) => Some(f),
            _ => None,
        }
    }

    /// Borrow the router, if this is one.
    #[must_use]
    pub fn as_router(&self) -> Option<&CapabilityRouter> {
        match self {
            Self::Router(r) => Some(r),
            _ => None,
        }
    }

    /// Take the object, if this is one.
    #[must_use]
    pub fn into_object(self) -> Option<Arc<dyn Candidate>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "Value({v})"),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Router(_) => f.write_str("Router(..)"),
            Self::Object(o) => write!(f, "Object({})", o.shape().type_name()),
        }
    }
}

impl From<Value> for Dynamic {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<&str> for Dynamic {
    fn from(s: &str) -> Self {
        Self::Value(Value::String(s.to_owned()))
    }
}

impl From<String> for Dynamic {
    fn from(s: String) -> Self {
        Self::Value(Value::String(s))
    }
}

impl From<bool> for Dynamic {
    fn from(b: bool) -> Self {
        Self::Value(Value::Bool(b))
    }
}

impl From<i64> for Dynamic {
    fn from(n: i64) -> Self {
        Self::Value(Value::from(n))
    }
}

impl From<Vec<String>> for Dynamic {
    fn from(items: Vec<String>) -> Self {
        Self::Value(Value::Array(items.into_iter().map(Value::String).collect()))
    }
}

impl From<YieldFn> for Dynamic {
    fn from(f: YieldFn) -> Self {
        Self::Callback(f)
    }
}

impl From<CapabilityRouter> for Dynamic {
    fn from(r: CapabilityRouter) -> Self {
        Self::Router(r)
    }
}

impl From<Arc<dyn Candidate>> for Dynamic {
    fn from(o: Arc<dyn Candidate>) -> Self {
        Self::Object(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn runtime_kinds() {
        assert_eq!(Dynamic::null().kind(), ValueKind::Unit);
        assert_eq!(Dynamic::from(true).kind(), ValueKind::Bool);
        assert_eq!(Dynamic::from(7_i64).kind(), ValueKind::Int);
        assert_eq!(Dynamic::from("zip").kind(), ValueKind::Str);
        assert_eq!(Dynamic::from(json!(["a", "b"])).kind(), ValueKind::List);
        assert_eq!(Dynamic::from(json!([1, 2])).kind(), ValueKind::Json);
        assert_eq!(Dynamic::from(json!({"a": 1})).kind(), ValueKind::Json);
        assert_eq!(
            Dynamic::from(CapabilityRouter::empty()).kind(),
            ValueKind::Router
        );
    }

    #[test]
    fn assignability() {
        assert!(ValueKind::Str.is_assignable_to(ValueKind::Str));
        assert!(ValueKind::Str.is_assignable_to(ValueKind::Any));
        assert!(ValueKind::List.is_assignable_to(ValueKind::Json));
        assert!(!ValueKind::Json.is_assignable_to(ValueKind::List));
        assert!(!ValueKind::Str.is_assignable_to(ValueKind::Bool));
        assert!(!ValueKind::Callback.is_assignable_to(ValueKind::Json));
    }

    #[test]
    fn string_lists() {
        assert_eq!(
            Dynamic::from(json!(["a", "b"])).to_string_list(),
            Some(vec!["a".to_owned(), "b".to_owned()])
        );
        assert_eq!(
            Dynamic::from("solo").to_string_list(),
            Some(vec!["solo".to_owned()])
        );
        assert_eq!(Dynamic::null().to_string_list(), Some(Vec::new()));
        assert_eq!(Dynamic::from(json!([1])).to_string_list(), None);
    }
}
