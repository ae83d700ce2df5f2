//! Callables
//!
//! A [`CallableBridge`] invokes either a code cell directly or a method by
//! name on a receiver. Method lookup happens at call time through the
//! receiver's class, so a subclass override or a redefined method is
//! always honored.
//!
//! Calls run in list context and always return a vector, which may be
//! empty.

use std::fmt;

use indexmap::IndexMap;
use perlbridge_abi::{CallContext, CallTarget, RawSv};
use smol_str::SmolStr;
use tracing::debug;

use crate::convert;
use crate::error::BridgeResult;
use crate::handle::ForeignHandle;
use crate::translate::boundary;
use crate::value::HostValue;

#[derive(Clone)]
enum Dispatch {
    Code(ForeignHandle),
    Method { receiver: ForeignHandle, name: SmolStr },
}

/// A subroutine or bound method.
#[derive(Clone)]
pub struct CallableBridge {
    dispatch: Dispatch,
}

impl CallableBridge {
    pub(crate) fn code(handle: ForeignHandle) -> Self {
        Self {
            dispatch: Dispatch::Code(handle),
        }
    }

    pub(crate) fn method(receiver: ForeignHandle, name: impl Into<SmolStr>) -> Self {
        Self {
            dispatch: Dispatch::Method {
                receiver,
                name: name.into(),
            },
        }
    }

    /// Handle to the code cell, for plain subroutines
    pub fn code_handle(&self) -> Option<&ForeignHandle> {
        match &self.dispatch {
            Dispatch::Code(handle) => Some(handle),
            Dispatch::Method { .. } => None,
        }
    }

    /// Method name, for bound methods
    pub fn method_name(&self) -> Option<&str> {
        match &self.dispatch {
            Dispatch::Method { name, .. } => Some(name.as_str()),
            Dispatch::Code(_) => None,
        }
    }

    /// Receiver (object or class name), for bound methods
    pub fn receiver(&self) -> Option<&ForeignHandle> {
        match &self.dispatch {
            Dispatch::Method { receiver, .. } => Some(receiver),
            Dispatch::Code(_) => None,
        }
    }

    /// Call with positional arguments.
    ///
    /// Bound methods pass the receiver as the first argument.
    pub fn call(&self, args: &[HostValue]) -> BridgeResult<Vec<HostValue>> {
        let core = self.anchor().core();
        let args = args
            .iter()
            .map(|arg| convert::to_foreign(core, arg))
            .collect::<BridgeResult<Vec<_>>>()?;
        self.invoke(&args)
    }

    /// Call with positional arguments followed by keyword arguments.
    ///
    /// Keywords are flattened into `key, value` pairs after the positional
    /// arguments, the calling convention for named parameters.
    pub fn call_with_kwargs(
        &self,
        args: &[HostValue],
        kwargs: &IndexMap<String, HostValue>,
    ) -> BridgeResult<Vec<HostValue>> {
        let mut flat = Vec::with_capacity(args.len() + kwargs.len() * 2);
        flat.extend(args.iter().cloned());
        for (key, value) in kwargs {
            flat.push(HostValue::Str(key.clone()));
            flat.push(value.clone());
        }
        self.call(&flat)
    }

    /// Call and return the first result, or `None` when there is none
    pub fn call_one(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        Ok(self.call(args)?.into_iter().next().unwrap_or_default())
    }

    fn anchor(&self) -> &ForeignHandle {
        match &self.dispatch {
            Dispatch::Code(handle) => handle,
            Dispatch::Method { receiver, .. } => receiver,
        }
    }

    fn invoke(&self, args: &[ForeignHandle]) -> BridgeResult<Vec<HostValue>> {
        let core = self.anchor().core();
        let raw_args: Vec<RawSv> = args.iter().map(ForeignHandle::raw).collect();

        let results = match &self.dispatch {
            Dispatch::Code(code) => {
                debug!(code = %code.raw(), args = raw_args.len(), "calling subroutine");
                boundary(core, "call", |api| {
                    api.call(CallTarget::Code(code.raw()), &raw_args, CallContext::List)
                })?
            }
            Dispatch::Method { receiver, name } => {
                debug!(method = %name, args = raw_args.len(), "calling method");
                let target = CallTarget::Method {
                    invocant: receiver.raw(),
                    name: name.as_str(),
                };
                boundary(core, "method call", |api| {
                    api.call(target, &raw_args, CallContext::List)
                })?
            }
        };

        results.iter().map(convert::to_host).collect()
    }
}

impl PartialEq for CallableBridge {
    fn eq(&self, other: &Self) -> bool {
        match (&self.dispatch, &other.dispatch) {
            (Dispatch::Code(a), Dispatch::Code(b)) => {
                a.raw() == b.raw()
                    || matches!((a.identity(), b.identity()), (Ok(x), Ok(y)) if x == y)
            }
            (
                Dispatch::Method { receiver: a, name: m },
                Dispatch::Method { receiver: b, name: n },
            ) => m == n && matches!((a.identity(), b.identity()), (Ok(x), Ok(y)) if x == y),
            _ => false,
        }
    }
}

impl fmt::Debug for CallableBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dispatch {
            Dispatch::Code(code) => write!(f, "CallableBridge(CODE {})", code.raw()),
            Dispatch::Method { receiver, name } => {
                write!(f, "CallableBridge({}->{})", receiver.raw(), name)
            }
        }
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
            ReferenceInterpreter::new().preload(
                PackageDef::new("Util")
                    .sub("nothing", |_| Ok(Vec::new()))
                    .sub("pair", |cx| Ok(vec![cx.int(1), cx.string("two")]))
                    .sub("triple", |cx| Ok(vec![cx.int(1), cx.string("two"), cx.num(3.5)]))
                    .sub("count", |cx| {
                        let n = cx.args().len() as i64;
                        Ok(vec![cx.int(n)])
                    })
                    .sub("join", |cx| {
                        let parts: Vec<String> =
                            (0..cx.args().len()).map(|i| cx.str_arg(i)).collect();
                        let joined = parts.join(",");
                        Ok(vec![cx.string(&joined)])
                    }),
            ),
        )
    }

    #[test]
    fn test_call_returns_list() {
        let session = session();
        let pair = session.function("Util::pair").unwrap();
        assert_eq!(
            pair.call(&[]).unwrap(),
            vec![HostValue::Int(1), HostValue::from("two")]
        );
    }

    #[test]
    fn test_call_returns_every_value_in_order() {
        let session = session();
        let triple = session.function("Util::triple").unwrap();
        let values = triple.call(&[]).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(
            values,
            vec![HostValue::Int(1), HostValue::from("two"), HostValue::Float(3.5)]
        );
        assert_eq!(triple.call_one(&[]).unwrap(), HostValue::Int(1));
    }

    #[test]
    fn test_call_with_no_results() {
        let session = session();
        let nothing = session.function("Util::nothing").unwrap();
        assert_eq!(nothing.call(&[]).unwrap(), Vec::<HostValue>::new());
        assert_eq!(nothing.call_one(&[]).unwrap(), HostValue::None);
    }

    #[test]
    fn test_kwargs_flatten_after_positionals() {
        let session = session();
        let join = session.function("Util::join").unwrap();

        let mut kwargs = IndexMap::new();
        kwargs.insert("size".to_string(), HostValue::Int(3));
        kwargs.insert("color".to_string(), HostValue::from("red"));

        let result = join
            .call_with_kwargs(&[HostValue::from("pos")], &kwargs)
            .unwrap();
        assert_eq!(result, vec![HostValue::from("pos,size,3,color,red")]);
    }

    #[test]
    fn test_code_reference_round_trips() {
        let session = session();
        let count = session.function("Util::count").unwrap();
        session.set_global("$handler", count.clone()).unwrap();

        let stored = session.get_global("$handler").unwrap();
        assert_eq!(stored.as_callable(), Some(&count));

        let result = stored.as_callable().unwrap().call(&[1.into(), 2.into()]).unwrap();
        assert_eq!(result, vec![HostValue::Int(2)]);
    }
}
