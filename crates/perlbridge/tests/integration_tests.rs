//! Integration tests for the bridge.
//!
//! Every test drives a [`Session`] over the reference interpreter, with
//! packages described in Rust.

use indexmap::IndexMap;
use perlbridge::{
    BridgeError, ContainerBridge, ContainerKey, HostValue, ObjectProxy, Session, SessionConfig,
    SessionState,
};
use perlbridge_abi::{Literal, NativeResult, PackageDef, ReferenceInterpreter, SubContext};
use pretty_assertions::assert_eq;

/// Packages shared by the tests below.
fn interpreter() -> ReferenceInterpreter {
    ReferenceInterpreter::new()
        .preload(
            PackageDef::new("Runtime")
                .sub("cells", |cx| {
                    let cells = cx.live_cells() as i64;
                    Ok(vec![cx.int(cells)])
                })
                .sub("clobber", |cx| {
                    // `$_[0] = "gone"`
                    let target = cx.arg(0).unwrap_or_else(|| cx.undef());
                    let gone = cx.string("gone");
                    cx.assign(target, gone)?;
                    Ok(Vec::new())
                }),
        )
        .provide(
            PackageDef::new("Calc")
                .sub("add", |cx| {
                    let sum = cx.int_arg(0) + cx.int_arg(1);
                    Ok(vec![cx.int(sum)])
                })
                .sub("divide", |cx| {
                    let divisor = cx.num_arg(1);
                    if divisor == 0.0 {
                        return Err(cx.die("Illegal division by zero at Calc.pm line 9.\n"));
                    }
                    let quotient = cx.num_arg(0) / divisor;
                    Ok(vec![cx.num(quotient)])
                })
                .sub("around", |cx| {
                    let n = cx.int_arg(0);
                    Ok(vec![cx.int(n - 1), cx.int(n), cx.int(n + 1)])
                }),
        )
        .provide(
            PackageDef::new("Animal")
                .scalar("VERSION", Literal::Str("0.3".to_string()))
                .sub("new", construct)
                .sub("name", |cx| {
                    let this = cx.arg(0).unwrap_or_else(|| cx.undef());
                    let name = cx.fetch(this, "name")?.unwrap_or_else(|| cx.undef());
                    Ok(vec![name])
                })
                .sub("speak", |cx| Ok(vec![cx.string("...")]))
                .sub("describe", |cx| {
                    // Late-bound call back into the object: overrides win.
                    let this = cx.arg(0).unwrap_or_else(|| cx.undef());
                    let sound = cx.call_method(this, "speak", &[])?;
                    let sound = sound.first().map(|sv| cx.str_of(*sv)).unwrap_or_default();
                    let text = format!("{} says {}", cx.class_of(this).unwrap_or_default(), sound);
                    Ok(vec![cx.string(&text)])
                }),
        )
        .provide(
            PackageDef::new("Dog")
                .isa(["Animal"])
                .sub("speak", |cx| Ok(vec![cx.string("woof")])),
        )
        .provide(
            PackageDef::new("Failure")
                .sub("new", construct)
                .sub("message", |cx| {
                    let this = cx.arg(0).unwrap_or_else(|| cx.undef());
                    let message = cx.fetch(this, "name")?.unwrap_or_else(|| cx.undef());
                    Ok(vec![message])
                })
                .sub("throw", |cx| {
                    let message = cx.string("disk full");
                    let error = cx.hash_ref(&[("name", message)])?;
                    let error = cx.bless(error, "Failure")?;
                    Err(cx.die_with(error))
                }),
        )
        .provide(PackageDef::new("Broken").compile_error("syntax error at Broken.pm line 3, near \"sub {\""))
}

/// `Class->new(name => ...)` storing the pairs in a blessed hash
fn construct(cx: &mut SubContext<'_>) -> NativeResult {
    let class = cx.str_arg(0);
    let mut pairs = Vec::new();
    let mut index = 1;
    while let (Some(key), Some(value)) = (cx.arg(index), cx.arg(index + 1)) {
        pairs.push((cx.str_of(key), value));
        index += 2;
    }
    let pairs: Vec<(&str, _)> = pairs.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let hash = cx.hash_ref(&pairs)?;
    let object = cx.bless(hash, &class)?;
    Ok(vec![object])
}

fn kwargs<const N: usize>(pairs: [(&str, HostValue); N]) -> IndexMap<String, HostValue> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn live_cells(session: &Session) -> i64 {
    session.call("Runtime::cells", &[]).unwrap()[0]
        .extract::<i64>()
        .unwrap()
}

// ============================================================================
// End to end
// ============================================================================

mod end_to_end {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_and_call() {
        let session = Session::new(interpreter());
        let calc = session.load("Calc").unwrap();

        assert_eq!(calc.call("add", &[2.into(), 3.into()]).unwrap(), vec![HostValue::Int(5)]);
        assert_eq!(
            calc.call("divide", &[7.into(), 2.into()]).unwrap(),
            vec![HostValue::Float(3.5)]
        );
    }

    #[test]
    fn test_list_context_keeps_every_value() {
        let session = Session::new(interpreter());
        let calc = session.load("Calc").unwrap();

        let values = calc.call("around", &[10.into()]).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(
            values,
            vec![HostValue::Int(9), HostValue::Int(10), HostValue::Int(11)]
        );
    }

    #[test]
    fn test_array_grows_with_pushes() {
        let session = Session::new(interpreter());
        let array = session.new_array(Vec::<HostValue>::new()).unwrap();

        for k in 0..5 {
            array.push(k).unwrap();
        }
        assert_eq!(array.len().unwrap(), 5);
        assert_eq!(
            array.to_vec().unwrap(),
            (0..5).map(HostValue::Int).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_object_construction_and_methods() {
        let session = Session::new(interpreter());
        let animal = session.load("Animal").unwrap();

        let object = animal
            .method("new")
            .unwrap()
            .call_with_kwargs(&[], &kwargs([("name", "Rex".into())]))
            .unwrap()
            .remove(0);
        let object = object.extract::<ObjectProxy>().unwrap();

        assert_eq!(object.class_name(), "Animal");
        assert_eq!(object.call_method("name", &[]).unwrap(), vec![HostValue::from("Rex")]);
        assert_eq!(animal.get_var("$VERSION").unwrap(), HostValue::from("0.3"));
    }

    #[test]
    fn test_hash_bridge_shared_with_interpreter() {
        let session = Session::new(interpreter());
        let hash = session.new_hash([("a", 1), ("b", 2)]).unwrap();
        session.set_global("$config", hash.clone()).unwrap();

        let container = ContainerBridge::from(hash);
        assert_eq!(container.get("a").unwrap(), HostValue::Int(1));
        assert_eq!(container.len().unwrap(), 2);

        // Writes through the bridge are visible through the global.
        container.set("c", 3).unwrap();
        assert_eq!(container.len().unwrap(), 3);
        let global = session.get_global("$config").unwrap();
        assert_eq!(global.as_hash().unwrap().get("c").unwrap(), HostValue::Int(3));

        let mut keys: Vec<String> = container
            .iter()
            .map(|entry| match entry.unwrap().0 {
                ContainerKey::Name(name) => name,
                ContainerKey::Index(index) => index.to_string(),
            })
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_eval_with_evaluator() {
        let perl = interpreter().with_evaluator(|cx, source| {
            let sum: i64 = source
                .split('+')
                .map(|term| term.trim().parse::<i64>().unwrap_or(0))
                .sum();
            Ok(vec![cx.int(sum)])
        });
        let session = Session::new(perl);
        assert_eq!(session.eval("1 + 2 + 39").unwrap(), vec![HostValue::Int(42)]);
    }

    #[test]
    fn test_eval_without_evaluator() {
        let session = Session::new(interpreter());
        let err = session.eval("1").unwrap_err();
        assert!(err.is_runtime_error());
        assert!(err.to_string().contains("no source evaluator"));
    }

    #[test]
    fn test_preload_from_config() {
        let config = SessionConfig::from_toml_str(r#"preload = ["Animal"]"#).unwrap();
        let session = Session::with_config(interpreter(), config);

        assert_eq!(session.get_global("$Animal::VERSION").unwrap(), HostValue::from("0.3"));
    }

    #[test]
    fn test_nested_structures() {
        let session = Session::new(interpreter());
        let value = HostValue::mapping([
            ("numbers", HostValue::list([1, 2, 3])),
            ("name", HostValue::from("set")),
        ]);
        session.set_global("$data", value).unwrap();

        let data = session.get_global("$data").unwrap();
        let data = data.as_hash().unwrap();
        let numbers: Vec<i64> = data.get("numbers").unwrap().extract().unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}

// ============================================================================
// Dispatch
// ============================================================================

mod dispatch {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dog(session: &Session) -> ObjectProxy {
        session
            .load("Dog")
            .unwrap()
            .new(&["name".into(), "Fido".into()])
            .unwrap()
            .extract()
            .unwrap()
    }

    #[test]
    fn test_subclass_override() {
        let session = Session::new(interpreter());
        session.load("Animal").unwrap();
        let dog = dog(&session);

        assert_eq!(dog.class_name(), "Dog");
        assert_eq!(dog.call_method("speak", &[]).unwrap(), vec![HostValue::from("woof")]);
        assert_eq!(dog.call_method("name", &[]).unwrap(), vec![HostValue::from("Fido")]);
    }

    #[test]
    fn test_inherited_method_sees_override() {
        let session = Session::new(interpreter());
        session.load("Animal").unwrap();
        let dog = dog(&session);

        assert_eq!(
            dog.call_method("describe", &[]).unwrap(),
            vec![HostValue::from("Dog says woof")]
        );
    }

    #[test]
    fn test_getattr_is_late_bound() {
        let session = Session::new(interpreter());
        session.load("Animal").unwrap();
        let dog = dog(&session);

        let speak = dog.getattr("speak");
        assert_eq!(speak.method_name(), Some("speak"));
        assert_eq!(speak.call(&[]).unwrap(), vec![HostValue::from("woof")]);
        assert!(dog.isa("Animal").unwrap());
    }

    #[test]
    fn test_class_method_through_package() {
        let session = Session::new(interpreter());
        session.load("Animal").unwrap();
        let dog = session.load("Dog").unwrap();

        assert_eq!(dog.call_method("speak", &[]).unwrap(), vec![HostValue::from("woof")]);
    }
}

// ============================================================================
// Errors
// ============================================================================

mod errors {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_die_with_string() {
        let session = Session::new(interpreter());
        let calc = session.load("Calc").unwrap();

        let err = calc.call("divide", &[1.into(), 0.into()]).unwrap_err();
        match &err {
            BridgeError::ForeignRuntime { message, .. } => {
                assert_eq!(message, "Illegal division by zero at Calc.pm line 9.")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_die_with_object() {
        let session = Session::new(interpreter());
        let failure = session.load("Failure").unwrap();

        let err = failure.call("throw", &[]).unwrap_err();
        assert!(err.is_runtime_error());
        assert!(err.to_string().starts_with("foreign runtime error: Failure=HASH(0x"));

        let error = err.foreign_value().unwrap().as_object().unwrap();
        assert_eq!(error.class_name(), "Failure");
        assert_eq!(
            error.call_method("message", &[]).unwrap(),
            vec![HostValue::from("disk full")]
        );
    }

    #[test]
    fn test_missing_package() {
        let session = Session::new(interpreter());
        let err = session.load("Missing::Module").unwrap_err();

        match &err {
            BridgeError::ForeignLoad { package, message } => {
                assert_eq!(package, "Missing::Module");
                assert!(message.starts_with("Can't locate Missing/Module.pm in @INC"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_package_with_compile_error() {
        let session = Session::new(interpreter());
        let err = session.load("Broken").unwrap_err();
        assert!(err.is_load_error());
        assert!(err.to_string().contains("Compilation failed in require"));
    }

    #[test]
    fn test_session_usable_after_error() {
        let session = Session::new(interpreter());
        let calc = session.load("Calc").unwrap();

        assert!(calc.call("divide", &[1.into(), 0.into()]).is_err());
        assert_eq!(calc.call("add", &[1.into(), 1.into()]).unwrap(), vec![HostValue::Int(2)]);
    }

    #[test]
    fn test_bound_method_cannot_cross() {
        let session = Session::new(interpreter());
        let dog = session.load("Dog").unwrap();
        session.load("Animal").unwrap();
        let method = dog.method("speak").unwrap();

        let err = session.set_global("$m", method).unwrap_err();
        assert!(err.is_type_error());
    }
}

// ============================================================================
// Lifetimes
// ============================================================================

mod lifetimes {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_released_values_are_freed() {
        let session = Session::new(interpreter());
        let animal = session.load("Animal").unwrap();
        let baseline = live_cells(&session);

        {
            let object = animal.new(&["name".into(), "Tmp".into()]).unwrap();
            let object = object.as_object().unwrap();
            let copy = object.clone();
            assert_eq!(copy.call_method("name", &[]).unwrap(), vec![HostValue::from("Tmp")]);

            let list = session.to_foreign(&HostValue::list(["a", "b"])).unwrap();
            let _view = session.to_host(&list).unwrap();
        }

        assert_eq!(live_cells(&session), baseline);
        assert_eq!(session.live_handles(), 0);
    }

    #[test]
    fn test_handle_refcounts() {
        let session = Session::new(interpreter());
        let animal = session.load("Animal").unwrap();
        let object: ObjectProxy = animal.new(&[]).unwrap().extract().unwrap();
        assert_eq!(object.handle().refcount().unwrap(), 1);

        let copy = object.clone();
        let handle = object.handle().clone();
        assert_eq!(handle.refcount().unwrap(), 3);

        drop(copy);
        drop(object);
        assert_eq!(handle.refcount().unwrap(), 1);
        assert_eq!(session.live_handles(), 1);
    }

    #[test]
    fn test_bridge_wrappers_share_one_cell() {
        const COPIES: usize = 4;
        let session = Session::new(interpreter());
        session.load("Calc").unwrap();

        let array = session.new_array([1, 2]).unwrap();
        let hash = session.new_hash([("a", 1)]).unwrap();
        let add = session.function("Calc::add").unwrap();
        let code = add.code_handle().unwrap();

        let array_base = array.handle().refcount().unwrap();
        let hash_base = hash.handle().refcount().unwrap();
        let code_base = code.refcount().unwrap();

        let arrays: Vec<_> = (0..COPIES).map(|_| array.clone()).collect();
        let hashes: Vec<_> = (0..COPIES).map(|_| hash.clone()).collect();
        let callables: Vec<_> = (0..COPIES).map(|_| add.clone()).collect();
        assert_eq!(array.handle().refcount().unwrap(), array_base + COPIES);
        assert_eq!(hash.handle().refcount().unwrap(), hash_base + COPIES);
        assert_eq!(code.refcount().unwrap(), code_base + COPIES);
        assert_eq!(arrays[0], array);
        assert_eq!(
            callables[COPIES - 1].call(&[1.into(), 2.into()]).unwrap(),
            vec![HostValue::Int(3)]
        );

        drop(arrays);
        drop(hashes);
        drop(callables);
        assert_eq!(array.handle().refcount().unwrap(), array_base);
        assert_eq!(hash.handle().refcount().unwrap(), hash_base);
        assert_eq!(code.refcount().unwrap(), code_base);
        assert_eq!(session.live_handles(), 3);
    }

    #[test]
    fn test_object_argument_is_not_rebound() {
        let session = Session::new(interpreter());
        let animal = session.load("Animal").unwrap();
        let object: ObjectProxy = animal
            .new(&["name".into(), "Rex".into()])
            .unwrap()
            .extract()
            .unwrap();

        session.call("Runtime::clobber", &[object.clone().into()]).unwrap();

        assert_eq!(object.class_name(), "Animal");
        assert_eq!(object.call_method("name", &[]).unwrap(), vec![HostValue::from("Rex")]);
        assert_eq!(object.handle().refcount().unwrap(), 1);
    }

    #[test]
    fn test_object_outlives_global() {
        let session = Session::new(interpreter());
        let animal = session.load("Animal").unwrap();
        session
            .set_global("$pet", animal.new(&["name".into(), "Kept".into()]).unwrap())
            .unwrap();

        let pet: ObjectProxy = session.get_global("$pet").unwrap().extract().unwrap();
        session.set_global("$pet", HostValue::None).unwrap();

        assert_eq!(pet.call_method("name", &[]).unwrap(), vec![HostValue::from("Kept")]);
    }

    #[test]
    fn test_errors_release_their_values() {
        let session = Session::new(interpreter());
        let failure = session.load("Failure").unwrap();
        let baseline = live_cells(&session);

        for _ in 0..3 {
            let err = failure.call("throw", &[]).unwrap_err();
            assert!(err.foreign_value().is_some());
        }

        assert_eq!(live_cells(&session), baseline);
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operations_after_shutdown() {
        let session = Session::new(interpreter());
        let calc = session.load("Calc").unwrap();
        let add = calc.function("add").unwrap();
        let array = session.new_array([1, 2]).unwrap();

        session.shutdown().unwrap();
        assert_eq!(session.state(), SessionState::ShutDown);

        assert!(add.call(&[1.into(), 2.into()]).unwrap_err().is_lifecycle_error());
        assert!(array.get(0).unwrap_err().is_lifecycle_error());
        assert!(session.load("Calc").unwrap_err().is_lifecycle_error());
        assert!(session.get_global("x").unwrap_err().is_lifecycle_error());

        // Dropping stale handles is harmless.
        drop(add);
        drop(array);
        assert_eq!(session.live_handles(), 0);
    }

    #[test]
    fn test_handles_keep_interpreter_alive() {
        let array = {
            let session = Session::new(interpreter());
            session.new_array(["still", "here"]).unwrap()
        };
        assert_eq!(array.get(1).unwrap(), HostValue::from("here"));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let session = Session::new(interpreter());
        session.shutdown().unwrap();
        session.shutdown().unwrap();
        assert_eq!(session.state(), SessionState::ShutDown);
    }
}
