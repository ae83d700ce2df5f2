//! Error Translation at the Boundary
//!
//! Every call into the interpreter goes through [`boundary`], which:
//!
//! 1. refuses to run unless the session is initialized
//! 2. adopts every returned cell into a [`ForeignHandle`] immediately
//! 3. checks `$@` after the call, even when the call reported success
//! 4. turns interpreter failures into [`BridgeError`]s
//!
//! A `die` becomes [`BridgeError::ForeignRuntime`] carrying both the
//! stringified message and the original value. A `die` with an object
//! therefore surfaces the object itself as an [`ObjectProxy`] in
//! [`BridgeError::foreign_value`].
//!
//! [`ObjectProxy`]: crate::ObjectProxy

use std::rc::Rc;

use perlbridge_abi::{AbiError, AbiResult, EmbeddingApi};
use tracing::{trace, warn};

use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Adopt, ForeignHandle};
use crate::session::SessionCore;

/// Run one embedding API call and translate its outcome.
pub(crate) fn boundary<T: Adopt>(
    core: &Rc<SessionCore>,
    operation: &str,
    f: impl FnOnce(&mut dyn EmbeddingApi) -> AbiResult<T>,
) -> BridgeResult<T::Owned> {
    core.ensure_live(operation)?;
    trace!(operation, "entering interpreter");

    let outcome = core.with_api(f).map(|value| value.adopt(core));
    let pending = core
        .with_api(|api| api.take_error())
        .map(|error| error.adopt(core));

    match (outcome, pending) {
        (Ok(value), Ok(None)) => Ok(value),
        (Ok(_discarded), Ok(Some(error))) => Err(runtime_error(operation, &error)),
        (Err(AbiError::Died(raw)), _) => {
            let error = ForeignHandle::adopt(core, raw);
            Err(runtime_error(operation, &error))
        }
        (Err(err), _) | (Ok(_), Err(err)) => Err(translate(operation, err)),
    }
}

/// Build a runtime error from a foreign error value
fn runtime_error(operation: &str, error: &ForeignHandle) -> BridgeError {
    let message = stringify(error);
    warn!(operation, message = %message, "foreign code raised an error");

    match convert::to_host(error) {
        Ok(value) => BridgeError::runtime_with_value(message, value),
        Err(_) => BridgeError::runtime(message),
    }
}

/// The interpreter's string form of an error value, minus the trailing
/// newline `die` appends
fn stringify(error: &ForeignHandle) -> String {
    let raw = error.raw();
    match error.core().with_api(|api| api.pv(raw)) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim_end_matches('\n').to_string(),
        Err(err) => format!("unprintable error value ({})", err),
    }
}

/// Translate a non-`die` embedding API failure
fn translate(operation: &str, err: AbiError) -> BridgeError {
    let translated = match &err {
        AbiError::FreedCell(_) => {
            BridgeError::lifecycle(operation, format!("dangling foreign handle: {}", err))
        }
        AbiError::NotConstructed => {
            BridgeError::lifecycle(operation, "the interpreter is not constructed")
        }
        AbiError::WrongKind { .. } | AbiError::Unsupported(_) | AbiError::Died(_) => {
            BridgeError::runtime(format!("{}: {}", operation, err))
        }
    };
    warn!(operation, error = %err, "interpreter call failed");
    translated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::value::HostValue;
    use perlbridge_abi::{CallContext, PackageDef, ReferenceInterpreter};
    use pretty_assertions::assert_eq;

    fn interpreter() -> ReferenceInterpreter {
        ReferenceInterpreter::new().preload(
            PackageDef::new("Err")
                .sub("boom", |cx| Err(cx.die("boom at Err.pm line 1.\n")))
                .sub("quiet", |cx| {
                    let error = cx.string("left behind");
                    cx.set_error(error)?;
                    Ok(vec![cx.int(1)])
                }),
        )
    }

    #[test]
    fn test_die_becomes_runtime_error() {
        let session = Session::new(interpreter());
        let err = session.call("Err::boom", &[]).unwrap_err();

        assert!(err.is_runtime_error());
        assert_eq!(err.to_string(), "foreign runtime error: boom at Err.pm line 1.");
        assert_eq!(
            err.foreign_value(),
            Some(&HostValue::from("boom at Err.pm line 1.\n"))
        );
    }

    #[test]
    fn test_error_indicator_checked_after_success() {
        let session = Session::new(interpreter());
        let err = session.call("Err::quiet", &[]).unwrap_err();
        assert!(err.is_runtime_error());
        assert!(err.to_string().contains("left behind"));

        // The indicator was cleared by the failed call.
        assert_eq!(session.get_global("$@").unwrap(), HostValue::Bytes(Vec::new()));
    }

    #[test]
    fn test_wrong_kind_is_runtime_error() {
        let session = Session::new(interpreter());
        session.initialize().unwrap();
        let scalar = session.to_foreign(&HostValue::Int(3)).unwrap();
        let core = Rc::clone(scalar.core());

        let err = boundary(&core, "array length", |api| api.av_len(scalar.raw())).unwrap_err();
        assert!(err.is_runtime_error());
        assert!(err.to_string().contains("array length"));
    }

    #[test]
    fn test_boundary_refuses_after_shutdown() {
        let session = Session::new(interpreter());
        let handle = session.to_foreign(&HostValue::Int(3)).unwrap();
        let core = Rc::clone(handle.core());
        session.shutdown().unwrap();

        let err = boundary(&core, "eval", |api| api.eval("1", CallContext::List)).unwrap_err();
        assert!(err.is_lifecycle_error());
    }
}
