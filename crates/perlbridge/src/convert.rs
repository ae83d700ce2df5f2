//! Value Conversion
//!
//! Converts between [`HostValue`]s and interpreter cells.
//!
//! ## Scalars
//!
//! Interpreter scalars can hold several representations at once. The
//! conversion prefers, in order: the boolean marker, the integer slot, the
//! floating-point slot, then the string slot. A numeric-looking string
//! therefore stays a string unless the interpreter has already used it as a
//! number. String slots flagged UTF-8 become [`HostValue::Str`], the rest
//! [`HostValue::Bytes`].
//!
//! ## References
//!
//! - Blessed references become [`ObjectProxy`]s
//! - Array, hash and code references become bridges over the referent
//! - Scalar references and globs have no host representation
//!
//! Host-owned lists and mappings are copied into new interpreter arrays and
//! hashes and cross as references. Bridges cross as references to the cell
//! they view, without copying.

use std::rc::Rc;

use indexmap::IndexMap;
use perlbridge_abi::{CellKind, ScalarFlags};
use smol_str::SmolStr;
use tracing::trace;

use crate::callable::CallableBridge;
use crate::container::{ArrayBridge, HashBridge};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::ForeignHandle;
use crate::object::ObjectProxy;
use crate::session::SessionCore;
use crate::translate::boundary;
use crate::value::HostValue;

// ============================================================================
// Host to interpreter
// ============================================================================

/// Create a new interpreter cell holding `value`
pub(crate) fn to_foreign(core: &Rc<SessionCore>, value: &HostValue) -> BridgeResult<ForeignHandle> {
    trace!(kind = value.type_name(), "converting to foreign");
    match value {
        HostValue::None => boundary(core, "to_foreign", |api| api.new_undef()),
        HostValue::Bool(b) => boundary(core, "to_foreign", |api| api.new_bool(*b)),
        HostValue::Int(n) => boundary(core, "to_foreign", |api| api.new_iv(*n)),
        HostValue::Float(n) => boundary(core, "to_foreign", |api| api.new_nv(*n)),
        HostValue::Str(s) => boundary(core, "to_foreign", |api| api.new_pv(s.as_bytes(), true)),
        HostValue::Bytes(b) => boundary(core, "to_foreign", |api| api.new_pv(b, false)),
        HostValue::List(items) => {
            let array = boundary(core, "to_foreign", |api| api.new_av())?;
            for (index, item) in items.iter().enumerate() {
                let element = to_foreign(core, item)?;
                boundary(core, "to_foreign", |api| {
                    api.av_store(array.raw(), index, element.raw())
                })?;
            }
            reference_to(core, &array)
        }
        HostValue::Mapping(map) => {
            let hash = boundary(core, "to_foreign", |api| api.new_hv())?;
            for (key, item) in map {
                let element = to_foreign(core, item)?;
                boundary(core, "to_foreign", |api| {
                    api.hv_store(hash.raw(), key, element.raw())
                })?;
            }
            reference_to(core, &hash)
        }
        HostValue::Array(array) => {
            check_session(core, array.handle(), value)?;
            reference_to(core, array.handle())
        }
        HostValue::Hash(hash) => {
            check_session(core, hash.handle(), value)?;
            reference_to(core, hash.handle())
        }
        HostValue::Callable(callable) => match callable.code_handle() {
            Some(code) => {
                check_session(core, code, value)?;
                reference_to(core, code)
            }
            None => Err(BridgeError::type_conversion(
                "bound method",
                "foreign value",
                "a method bound to its receiver has no interpreter representation",
            )),
        },
        HostValue::Object(object) => {
            check_session(core, object.handle(), value)?;
            let raw = object.handle().raw();
            let target = boundary(core, "to_foreign", |api| api.deref(raw))?;
            reference_to(core, &target)
        }
    }
}

fn reference_to(core: &Rc<SessionCore>, target: &ForeignHandle) -> BridgeResult<ForeignHandle> {
    boundary(core, "to_foreign", |api| api.new_rv(target.raw()))
}

fn check_session(core: &Rc<SessionCore>, handle: &ForeignHandle, value: &HostValue) -> BridgeResult<()> {
    if handle.belongs_to(core) {
        Ok(())
    } else {
        Err(BridgeError::type_conversion(
            value.type_name(),
            "foreign value",
            "the value belongs to a different interpreter session",
        ))
    }
}

// ============================================================================
// Interpreter to host
// ============================================================================

/// Convert the cell behind `handle` into a host value
pub(crate) fn to_host(handle: &ForeignHandle) -> BridgeResult<HostValue> {
    let core = handle.core();
    let raw = handle.raw();
    let kind = boundary(core, "to_host", |api| api.kind(raw))?;
    trace!(sv = %raw, %kind, "converting to host");

    match kind {
        CellKind::Undef => Ok(HostValue::None),
        CellKind::Scalar => scalar_to_host(handle),
        CellKind::Ref => reference_to_host(handle),
        CellKind::Array => Ok(HostValue::Array(ArrayBridge::new(handle.clone()))),
        CellKind::Hash => Ok(HostValue::Hash(HashBridge::new(handle.clone()))),
        CellKind::Code => Ok(HostValue::Callable(CallableBridge::code(handle.clone()))),
        CellKind::Glob => Err(BridgeError::type_conversion(
            "GLOB",
            "host value",
            "globs have no host representation",
        )),
    }
}

fn scalar_to_host(handle: &ForeignHandle) -> BridgeResult<HostValue> {
    let core = handle.core();
    let raw = handle.raw();
    let flags = boundary(core, "to_host", |api| api.flags(raw))?;

    if flags.contains(ScalarFlags::BOOL) {
        let n = boundary(core, "to_host", |api| api.iv(raw))?;
        Ok(HostValue::Bool(n != 0))
    } else if flags.contains(ScalarFlags::IOK) {
        Ok(HostValue::Int(boundary(core, "to_host", |api| api.iv(raw))?))
    } else if flags.contains(ScalarFlags::NOK) {
        Ok(HostValue::Float(boundary(core, "to_host", |api| api.nv(raw))?))
    } else if flags.contains(ScalarFlags::POK) {
        let bytes = boundary(core, "to_host", |api| api.pv(raw))?;
        if flags.contains(ScalarFlags::UTF8) {
            String::from_utf8(bytes).map(HostValue::Str).map_err(|e| {
                BridgeError::type_conversion("string scalar", "str", e.to_string())
            })
        } else {
            Ok(HostValue::Bytes(bytes))
        }
    } else {
        Ok(HostValue::None)
    }
}

fn reference_to_host(handle: &ForeignHandle) -> BridgeResult<HostValue> {
    let core = handle.core();
    let raw = handle.raw();

    if let Some(class) = boundary(core, "to_host", |api| api.blessed(raw))? {
        // A fresh reference, so the proxy is unaffected if the original
        // scalar is later reassigned.
        let target = boundary(core, "to_host", |api| api.deref(raw))?;
        let object = boundary(core, "to_host", |api| api.new_rv(target.raw()))?;
        return Ok(HostValue::Object(ObjectProxy::new(object, SmolStr::new(class))));
    }

    let target = boundary(core, "to_host", |api| api.deref(raw))?;
    let kind = target.kind()?;
    match kind {
        CellKind::Array => Ok(HostValue::Array(ArrayBridge::new(target))),
        CellKind::Hash => Ok(HostValue::Hash(HashBridge::new(target))),
        CellKind::Code => Ok(HostValue::Callable(CallableBridge::code(target))),
        other => Err(BridgeError::type_conversion(
            format!("{} reference", other.reftype()),
            "host value",
            "only array, hash, code and blessed references cross the bridge",
        )),
    }
}

// ============================================================================
// Typed extraction
// ============================================================================

/// Trait for extracting Rust values from host values
pub trait FromHost: Sized {
    /// Extract from a host value
    fn from_host(value: &HostValue) -> BridgeResult<Self>;
}

impl FromHost for HostValue {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        Ok(value.clone())
    }
}

impl FromHost for () {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::None => Ok(()),
            other => Err(BridgeError::type_mismatch("none", other.type_name())),
        }
    }
}

impl FromHost for bool {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Bool(b) => Ok(*b),
            HostValue::Int(n) => Ok(*n != 0),
            HostValue::None => Ok(false),
            other => Err(BridgeError::type_mismatch("bool", other.type_name())),
        }
    }
}

impl FromHost for i64 {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Int(n) => Ok(*n),
            HostValue::Bool(b) => Ok(i64::from(*b)),
            HostValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
            other => Err(BridgeError::type_mismatch("int", other.type_name())),
        }
    }
}

impl FromHost for i32 {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        let n = i64::from_host(value)?;
        i32::try_from(n).map_err(|_| {
            BridgeError::type_conversion("int", "i32", format!("{} out of range", n))
        })
    }
}

impl FromHost for usize {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        let n = i64::from_host(value)?;
        usize::try_from(n).map_err(|_| {
            BridgeError::type_conversion("int", "usize", format!("{} out of range", n))
        })
    }
}

impl FromHost for f64 {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        value
            .as_float()
            .ok_or_else(|| BridgeError::type_mismatch("float", value.type_name()))
    }
}

impl FromHost for String {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Str(s) => Ok(s.clone()),
            HostValue::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|e| BridgeError::type_conversion("bytes", "str", e.to_string())),
            other => Err(BridgeError::type_mismatch("str", other.type_name())),
        }
    }
}

impl FromHost for Vec<u8> {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BridgeError::type_mismatch("bytes", value.type_name()))
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::None => Ok(None),
            other => T::from_host(other).map(Some),
        }
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::List(items) => items.iter().map(T::from_host).collect(),
            HostValue::Array(array) => array.to_vec()?.iter().map(T::from_host).collect(),
            other => Err(BridgeError::type_mismatch("list", other.type_name())),
        }
    }
}

impl<T: FromHost> FromHost for IndexMap<String, T> {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        let convert = |(key, item): (&String, &HostValue)| -> BridgeResult<(String, T)> {
            Ok((key.clone(), T::from_host(item)?))
        };
        match value {
            HostValue::Mapping(map) => map.iter().map(convert).collect(),
            HostValue::Hash(hash) => hash.to_map()?.iter().map(convert).collect(),
            other => Err(BridgeError::type_mismatch("mapping", other.type_name())),
        }
    }
}

macro_rules! from_host_bridge {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl FromHost for $ty {
            fn from_host(value: &HostValue) -> BridgeResult<Self> {
                match value {
                    HostValue::$variant(inner) => Ok(inner.clone()),
                    other => Err(BridgeError::type_mismatch($name, other.type_name())),
                }
            }
        }
    };
}

from_host_bridge!(ArrayBridge, Array, "array");
from_host_bridge!(HashBridge, Hash, "hash");
from_host_bridge!(CallableBridge, Callable, "callable");
from_host_bridge!(ObjectProxy, Object, "object");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use perlbridge_abi::{PackageDef, ReferenceInterpreter};
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        Session::new(
            ReferenceInterpreter::new().preload(
                PackageDef::new("Values")
                    .sub("numeric_string", |cx| {
                        let sv = cx.string("42");
                        Ok(vec![sv])
                    })
                    .sub("used_as_number", |cx| {
                        let sv = cx.string("42");
                        cx.numify(sv);
                        Ok(vec![sv])
                    })
                    .sub("scalar_ref", |cx| {
                        let inner = cx.int(1);
                        let rv = cx.new_ref(inner)?;
                        Ok(vec![rv])
                    })
                    .sub("glob", |cx| Ok(vec![cx.glob("main::STDOUT")])),
            ),
        )
    }

    #[test]
    fn test_primitive_round_trip() {
        let session = session();
        for value in [
            HostValue::None,
            HostValue::Bool(true),
            HostValue::Bool(false),
            HostValue::Int(-7),
            HostValue::Float(2.5),
            HostValue::from("héllo"),
            HostValue::Bytes(vec![0xff, 0x00]),
        ] {
            let handle = session.to_foreign(&value).unwrap();
            assert_eq!(session.to_host(&handle).unwrap(), value);
        }
    }

    #[test]
    fn test_numeric_string_stays_string() {
        let session = session();
        let result = session.call("Values::numeric_string", &[]).unwrap();
        assert_eq!(result, vec![HostValue::from("42")]);
    }

    #[test]
    fn test_numeric_flags_win() {
        let session = session();
        let result = session.call("Values::used_as_number", &[]).unwrap();
        assert_eq!(result, vec![HostValue::Int(42)]);
    }

    #[test]
    fn test_list_crosses_as_array_reference() {
        let session = session();
        let handle = session.to_foreign(&HostValue::list([1, 2, 3])).unwrap();
        assert_eq!(handle.kind().unwrap(), CellKind::Ref);

        let value = session.to_host(&handle).unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.to_vec().unwrap(), vec![1.into(), 2.into(), 3.into()]);
    }

    #[test]
    fn test_mapping_crosses_as_hash_reference() {
        let session = session();
        let handle = session
            .to_foreign(&HostValue::mapping([("a", 1), ("b", 2)]))
            .unwrap();
        let value = session.to_host(&handle).unwrap();
        let map: IndexMap<String, i64> = value.extract().unwrap();
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.get("b"), Some(&2));
    }

    #[test]
    fn test_unsupported_references() {
        let session = session();
        let err = session.call("Values::scalar_ref", &[]).unwrap_err();
        assert!(err.is_type_error());
        assert!(err.to_string().contains("SCALAR reference"));

        let err = session.call("Values::glob", &[]).unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn test_cross_session_value_rejected() {
        let first = session();
        let second = session();
        let array = first.new_array([1, 2]).unwrap();

        let err = second.to_foreign(&HostValue::Array(array)).unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn test_extract() {
        assert_eq!(HostValue::Int(3).extract::<i64>().unwrap(), 3);
        assert_eq!(HostValue::Float(3.0).extract::<i64>().unwrap(), 3);
        assert_eq!(HostValue::None.extract::<Option<String>>().unwrap(), None);
        assert_eq!(
            HostValue::list(["a", "b"]).extract::<Vec<String>>().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(HostValue::from("x").extract::<i64>().unwrap_err().is_type_error());
        assert!(HostValue::Int(1 << 40).extract::<i32>().is_err());
    }
}
