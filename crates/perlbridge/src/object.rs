//! Object Proxies
//!
//! An [`ObjectProxy`] stands for a blessed reference. Attribute access
//! yields a callable bound to the object; the method itself is resolved
//! through the object's class, and its `@ISA` chain, each time the callable
//! is invoked.

use std::fmt;

use smol_str::SmolStr;

use crate::callable::CallableBridge;
use crate::convert::FromHost;
use crate::error::BridgeResult;
use crate::handle::ForeignHandle;
use crate::value::HostValue;

/// A proxy for a blessed interpreter object.
#[derive(Clone)]
pub struct ObjectProxy {
    handle: ForeignHandle,
    class: SmolStr,
}

impl ObjectProxy {
    pub(crate) fn new(handle: ForeignHandle, class: SmolStr) -> Self {
        Self { handle, class }
    }

    /// Handle to the blessed reference
    pub fn handle(&self) -> &ForeignHandle {
        &self.handle
    }

    /// Class the object was blessed into when the proxy was created
    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// A callable that invokes method `name` on this object.
    ///
    /// Never fails: a missing method surfaces as a runtime error when the
    /// callable is invoked.
    pub fn getattr(&self, name: &str) -> CallableBridge {
        CallableBridge::method(self.handle.clone(), name)
    }

    /// Invoke method `name` with positional arguments
    pub fn call_method(&self, name: &str, args: &[HostValue]) -> BridgeResult<Vec<HostValue>> {
        self.getattr(name).call(args)
    }

    /// Whether the object's class is or inherits from `class`
    pub fn isa(&self, class: &str) -> BridgeResult<bool> {
        let answer = self
            .getattr("isa")
            .call_one(&[HostValue::from(class)])?;
        Ok(truthy(&answer))
    }

    /// The method `name` resolves to, if the object supports it
    pub fn can(&self, name: &str) -> BridgeResult<Option<CallableBridge>> {
        let answer = self.getattr("can").call_one(&[HostValue::from(name)])?;
        Option::<CallableBridge>::from_host(&answer)
    }

    /// Identity of the underlying object
    pub fn identity(&self) -> BridgeResult<u64> {
        self.handle.identity()
    }
}

/// Two proxies are equal when they refer to the same object.
impl PartialEq for ObjectProxy {
    fn eq(&self, other: &Self) -> bool {
        matches!((self.identity(), other.identity()), (Ok(a), Ok(b)) if a == b)
    }
}

impl fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectProxy({} @ {})", self.class, self.handle.raw())
    }
}

fn truthy(value: &HostValue) -> bool {
    match value {
        HostValue::None => false,
        HostValue::Bool(b) => *b,
        HostValue::Int(n) => *n != 0,
        HostValue::Float(n) => *n != 0.0,
        HostValue::Str(s) => !(s.is_empty() || s == "0"),
        HostValue::Bytes(b) => !(b.is_empty() || b.as_slice() == b"0"),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use perlbridge_abi::{PackageDef, ReferenceInterpreter};
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        Session::new(
            ReferenceInterpreter::new()
                .preload(
                    PackageDef::new("Shape")
                        .sub("new", |cx| {
                            let class = cx.str_arg(0);
                            let sides = cx.arg(1).unwrap_or_else(|| cx.int(0));
                            let hash = cx.hash_ref(&[("sides", sides)])?;
                            let object = cx.bless(hash, &class)?;
                            Ok(vec![object])
                        })
                        .sub("sides", |cx| {
                            let this = cx.arg(0).unwrap_or_else(|| cx.undef());
                            let sides = cx.fetch(this, "sides")?.unwrap_or_else(|| cx.undef());
                            Ok(vec![sides])
                        })
                        .sub("name", |cx| Ok(vec![cx.string("shape")])),
                )
                .preload(
                    PackageDef::new("Square")
                        .isa(["Shape"])
                        .sub("name", |cx| Ok(vec![cx.string("square")])),
                ),
        )
    }

    fn square(session: &Session) -> ObjectProxy {
        let square = session.load("Square").unwrap();
        square
            .new(&[HostValue::Int(4)])
            .unwrap()
            .extract::<ObjectProxy>()
            .unwrap()
    }

    #[test]
    fn test_method_resolution() {
        let session = session();
        let object = square(&session);

        assert_eq!(object.class_name(), "Square");
        assert_eq!(object.call_method("name", &[]).unwrap(), vec![HostValue::from("square")]);
        assert_eq!(object.call_method("sides", &[]).unwrap(), vec![HostValue::Int(4)]);
    }

    #[test]
    fn test_missing_method_fails_on_call() {
        let session = session();
        let object = square(&session);

        let method = object.getattr("area");
        let err = method.call(&[]).unwrap_err();
        assert!(err.is_runtime_error());
        assert!(err
            .to_string()
            .contains("Can't locate object method \"area\" via package \"Square\""));
    }

    #[test]
    fn test_isa_and_can() {
        let session = session();
        let object = square(&session);

        assert!(object.isa("Shape").unwrap());
        assert!(!object.isa("Circle").unwrap());
        assert!(object.can("sides").unwrap().is_some());
        assert!(object.can("area").unwrap().is_none());
    }

    #[test]
    fn test_identity_equality() {
        let session = session();
        let object = square(&session);
        let other = square(&session);

        session.set_global("$current", object.clone()).unwrap();
        let stored = session.get_global("$current").unwrap();

        assert_eq!(stored.as_object(), Some(&object));
        assert_ne!(object, other);
    }
}
