//! Integration tests for the reference interpreter through the embedding
//! API.

use perlbridge_abi::{
    AbiError, CallContext, CallTarget, CellKind, EmbeddingApi, PackageDef, ReferenceInterpreter,
    ScalarFlags,
};
use pretty_assertions::assert_eq;

fn interpreter() -> ReferenceInterpreter {
    let mut perl = ReferenceInterpreter::new()
        .provide(
            PackageDef::new("List")
                .sub("three", |cx| Ok(vec![cx.int(1), cx.int(2), cx.int(3)]))
                .sub("fail", |cx| Err(cx.die("failed\n"))),
        )
        .provide(PackageDef::new("Base").sub("hello", |cx| Ok(vec![cx.string("base")])))
        .provide(PackageDef::new("Derived").isa(["Base"]));
    perl.construct(&["".to_string(), "-Ilib".to_string()]).unwrap();
    perl
}

fn string(perl: &ReferenceInterpreter, sv: perlbridge_abi::RawSv) -> String {
    String::from_utf8(perl.pv(sv).unwrap()).unwrap()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_construct_twice_fails() {
    let mut perl = interpreter();
    assert!(matches!(perl.construct(&[]), Err(AbiError::Unsupported(_))));

    perl.destruct();
    assert!(!perl.is_constructed());
    assert_eq!(perl.new_undef(), Err(AbiError::NotConstructed));
}

#[test]
fn test_include_switches_populate_inc() {
    let mut perl = interpreter();
    let inc = perl.get_av("INC", false).unwrap().unwrap();
    assert_eq!(perl.av_len(inc).unwrap(), 1);
    let first = perl.av_fetch(inc, 0).unwrap().unwrap();
    assert_eq!(string(&perl, first), "lib");
}

// ============================================================================
// Calls and errors
// ============================================================================

#[test]
fn test_call_contexts() {
    let mut perl = interpreter();
    perl.require("List").unwrap();

    let list = perl
        .call(CallTarget::Named("List::three"), &[], CallContext::List)
        .unwrap();
    assert_eq!(list.len(), 3);

    let scalar = perl
        .call(CallTarget::Named("List::three"), &[], CallContext::Scalar)
        .unwrap();
    assert_eq!(scalar.len(), 1);
    assert_eq!(perl.iv(scalar[0]).unwrap(), 3);

    let void = perl
        .call(CallTarget::Named("List::three"), &[], CallContext::Void)
        .unwrap();
    assert!(void.is_empty());
}

#[test]
fn test_die_sets_error_indicator() {
    let mut perl = interpreter();
    perl.require("List").unwrap();

    let err = perl
        .call(CallTarget::Named("List::fail"), &[], CallContext::List)
        .unwrap_err();
    let value = err.died_value().unwrap();
    assert_eq!(string(&perl, value), "failed\n");

    let pending = perl.take_error().unwrap().unwrap();
    assert_eq!(string(&perl, pending), "failed\n");
    assert_eq!(perl.take_error().unwrap(), None);
}

#[test]
fn test_undefined_subroutine() {
    let mut perl = interpreter();
    let err = perl
        .call(CallTarget::Named("nowhere"), &[], CallContext::List)
        .unwrap_err();
    let value = err.died_value().unwrap();
    assert_eq!(string(&perl, value), "Undefined subroutine &main::nowhere called");
}

#[test]
fn test_require_messages() {
    let mut perl = interpreter();
    let err = perl.require("No::Such").unwrap_err();
    let message = string(&perl, err.died_value().unwrap());
    assert_eq!(
        message,
        "Can't locate No/Such.pm in @INC (you may need to install the No::Such module) (@INC contains: lib)"
    );
}

#[test]
fn test_class_method_inherits() {
    let mut perl = interpreter();
    perl.require("Base").unwrap();
    perl.require("Derived").unwrap();

    let class = perl.new_pv(b"Derived", true).unwrap();
    let out = perl
        .call(
            CallTarget::Method {
                invocant: class,
                name: "hello",
            },
            &[],
            CallContext::List,
        )
        .unwrap();
    assert_eq!(string(&perl, out[0]), "base");
}

// ============================================================================
// Data model
// ============================================================================

#[test]
fn test_reference_keeps_target_alive() {
    let mut perl = interpreter();
    let baseline = perl.live_cells();

    let av = perl.new_av().unwrap();
    let rv = perl.new_rv(av).unwrap();
    perl.refcnt_dec(av).unwrap();
    assert_eq!(perl.refcnt(av).unwrap(), 1);
    assert_eq!(perl.kind(rv).unwrap(), CellKind::Ref);

    perl.refcnt_dec(rv).unwrap();
    assert_eq!(perl.refcnt(av), Err(AbiError::FreedCell(av)));
    assert_eq!(perl.live_cells(), baseline);
}

#[test]
fn test_hash_iteration_order() {
    let mut perl = interpreter();
    let hv = perl.new_hv().unwrap();
    for (key, n) in [("z", 1), ("a", 2)] {
        let value = perl.new_iv(n).unwrap();
        perl.hv_store(hv, key, value).unwrap();
        perl.refcnt_dec(value).unwrap();
    }

    perl.hv_iter_init(hv).unwrap();
    let mut keys = Vec::new();
    while let Some((key, value)) = perl.hv_iter_next(hv).unwrap() {
        keys.push(key);
        perl.refcnt_dec(value).unwrap();
    }
    assert_eq!(keys, vec!["z".to_string(), "a".to_string()]);
}

#[test]
fn test_string_flags() {
    let mut perl = interpreter();
    let text = perl.new_pv("ü".as_bytes(), true).unwrap();
    let bytes = perl.new_pv(&[0xff], false).unwrap();

    assert!(perl.flags(text).unwrap().contains(ScalarFlags::UTF8));
    assert!(!perl.flags(bytes).unwrap().contains(ScalarFlags::UTF8));
    assert!(perl.flags(bytes).unwrap().contains(ScalarFlags::POK));
}

#[test]
fn test_blessed_identity() {
    let mut perl = interpreter();
    let hv = perl.new_hv().unwrap();
    let a = perl.new_rv(hv).unwrap();
    let b = perl.new_rv(hv).unwrap();

    assert_eq!(perl.identity(a).unwrap(), perl.identity(b).unwrap());
    assert_eq!(perl.blessed(a).unwrap(), None);
}
