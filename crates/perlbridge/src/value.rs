//! Host Value Representation
//!
//! [`HostValue`] is the host side of every crossing. Primitives and the
//! host-owned collections (`List`, `Mapping`) are plain Rust data; the
//! bridge variants (`Array`, `Hash`, `Callable`, `Object`) are live views of
//! interpreter cells.
//!
//! ## Type Mapping
//!
//! | Host                | Interpreter                     |
//! |---------------------|---------------------------------|
//! | `None`              | `undef`                         |
//! | `Bool`              | boolean scalar                  |
//! | `Int`               | integer scalar                  |
//! | `Float`             | numeric scalar                  |
//! | `Str`               | UTF-8 string scalar             |
//! | `Bytes`             | byte string scalar              |
//! | `List` / `Array`    | array reference                 |
//! | `Mapping` / `Hash`  | hash reference                  |
//! | `Callable`          | code reference                  |
//! | `Object`            | blessed reference               |

use std::fmt;

use indexmap::IndexMap;

use crate::callable::CallableBridge;
use crate::container::{ArrayBridge, HashBridge};
use crate::convert::FromHost;
use crate::error::BridgeResult;
use crate::object::ObjectProxy;

/// A value on the host side of the bridge.
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    /// `undef`
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Host-owned list, copied into a new array on crossing
    List(Vec<HostValue>),
    /// Host-owned mapping, copied into a new hash on crossing
    Mapping(IndexMap<String, HostValue>),
    /// Live view of an interpreter array
    Array(ArrayBridge),
    /// Live view of an interpreter hash
    Hash(HashBridge),
    /// Subroutine or bound method
    Callable(CallableBridge),
    /// Blessed reference
    Object(ObjectProxy),
}

impl HostValue {
    /// Build a list from anything convertible
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<HostValue>,
    {
        HostValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a mapping from key-value pairs
    pub fn mapping<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<HostValue>,
    {
        HostValue::Mapping(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Get the type name
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::None => "none",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "str",
            HostValue::Bytes(_) => "bytes",
            HostValue::List(_) => "list",
            HostValue::Mapping(_) => "mapping",
            HostValue::Array(_) => "array",
            HostValue::Hash(_) => "hash",
            HostValue::Callable(_) => "callable",
            HostValue::Object(_) => "object",
        }
    }

    /// Check if this is `None`
    pub fn is_none(&self) -> bool {
        matches!(self, HostValue::None)
    }

    /// Check if this value is a live view of an interpreter cell
    pub fn is_bridge(&self) -> bool {
        matches!(
            self,
            HostValue::Array(_) | HostValue::Hash(_) | HostValue::Callable(_) | HostValue::Object(_)
        )
    }

    /// Extract a typed value
    pub fn extract<T: FromHost>(&self) -> BridgeResult<T> {
        T::from_host(self)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            HostValue::Float(n) => Some(*n),
            HostValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HostValue::Bytes(b) => Some(b),
            HostValue::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, HostValue>> {
        match self {
            HostValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayBridge> {
        match self {
            HostValue::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashBridge> {
        match self {
            HostValue::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&CallableBridge> {
        match self {
            HostValue::Callable(callable) => Some(callable),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectProxy> {
        match self {
            HostValue::Object(object) => Some(object),
            _ => None,
        }
    }
}

/// Bridge variants compare by the identity of the interpreter cell they
/// view, not by content.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::None, HostValue::None) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Str(a), HostValue::Str(b)) => a == b,
            (HostValue::Bytes(a), HostValue::Bytes(b)) => a == b,
            (HostValue::List(a), HostValue::List(b)) => a == b,
            (HostValue::Mapping(a), HostValue::Mapping(b)) => a == b,
            (HostValue::Array(a), HostValue::Array(b)) => a == b,
            (HostValue::Hash(a), HostValue::Hash(b)) => a == b,
            (HostValue::Callable(a), HostValue::Callable(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => write!(f, "undef"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Int(n) => write!(f, "{}", n),
            HostValue::Float(n) => write!(f, "{}", n),
            HostValue::Str(s) => write!(f, "{:?}", s),
            HostValue::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            HostValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            HostValue::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            HostValue::Array(array) => write!(f, "ARRAY({})", array.handle().raw()),
            HostValue::Hash(hash) => write!(f, "HASH({})", hash.handle().raw()),
            HostValue::Callable(callable) => match callable.method_name() {
                Some(name) => write!(f, "METHOD({})", name),
                None => write!(f, "CODE({})", callable.code_handle().map_or(0, |h| h.raw().bits())),
            },
            HostValue::Object(object) => {
                write!(f, "{}=({})", object.class_name(), object.handle().raw())
            }
        }
    }
}

// ============================================================================
// Conversions into HostValue
// ============================================================================

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::None
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

macro_rules! from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for HostValue {
                fn from(n: $ty) -> Self {
                    HostValue::Int(i64::from(n))
                }
            }
        )*
    };
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for HostValue {
    fn from(n: f32) -> Self {
        HostValue::Float(f64::from(n))
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Float(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::Str(s)
    }
}

impl From<&[u8]> for HostValue {
    fn from(b: &[u8]) -> Self {
        HostValue::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(b: Vec<u8>) -> Self {
        HostValue::Bytes(b)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::List(items)
    }
}

impl From<IndexMap<String, HostValue>> for HostValue {
    fn from(map: IndexMap<String, HostValue>) -> Self {
        HostValue::Mapping(map)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::None, Into::into)
    }
}

impl From<ArrayBridge> for HostValue {
    fn from(array: ArrayBridge) -> Self {
        HostValue::Array(array)
    }
}

impl From<HashBridge> for HostValue {
    fn from(hash: HashBridge) -> Self {
        HostValue::Hash(hash)
    }
}

impl From<CallableBridge> for HostValue {
    fn from(callable: CallableBridge) -> Self {
        HostValue::Callable(callable)
    }
}

impl From<ObjectProxy> for HostValue {
    fn from(object: ObjectProxy) -> Self {
        HostValue::Object(object)
    }
}
