//! Call protocol and native reference attachment

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{TestEngine, install_native_ref_registry, throwing_fn};
use jsb_bridge::{EngineConfig, JsbError, Object, Value, native_fn};
use jsb_host::{HostRuntime, RawValue};

fn function_on_global(env: &TestEngine, name: &str, f: jsb_bridge::NativeFn) -> Object {
    let global = env.engine.global_object().unwrap();
    global.define_function(name, f).unwrap();
    global
        .get_property(name)
        .unwrap()
        .and_then(Value::into_object)
        .unwrap()
}

#[test]
fn test_receiver_defaults_to_undefined() {
    let env = TestEngine::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let f = function_on_global(
        &env,
        "whoami",
        native_fn(move |_, this, _| {
            sink.borrow_mut().push(this.clone());
            Ok(RawValue::Undefined)
        }),
    );
    let receiver = Object::create_plain().unwrap();

    assert_eq!(f.call(&[], None).unwrap(), None);
    assert_eq!(f.call(&[], Some(&receiver)).unwrap(), None);

    assert_eq!(
        *seen.borrow(),
        vec![RawValue::Undefined, RawValue::Object(receiver.handle())]
    );
}

#[test]
fn test_arguments_and_result_are_marshalled() {
    let env = TestEngine::new();
    let add = function_on_global(
        &env,
        "add",
        native_fn(|_, _, args| {
            let sum: f64 = args.iter().filter_map(RawValue::as_number).sum();
            Ok(RawValue::Number(sum))
        }),
    );

    let result = add
        .call(&[Value::from(2), Value::from(3.5), Value::from("skip")], None)
        .unwrap();
    assert_eq!(result, Some(Value::Number(5.5)));
}

#[test]
fn test_thrown_exception_becomes_error() {
    let env = TestEngine::new();
    let fail = function_on_global(&env, "fail", throwing_fn("RangeError", "out of range"));

    let err = fail.call(&[], None).unwrap_err();

    assert!(err.is_script_error());
    assert_eq!(err.error_type(), "RangeError");
    assert!(matches!(
        err,
        JsbError::Script { ref message, .. } if message == "out of range"
    ));
    assert!(!env.host.has_exception());
}

#[test]
fn test_thrown_primitive_becomes_error() {
    let env = TestEngine::new();
    let fail = function_on_global(
        &env,
        "failPlain",
        native_fn(|_, _, _| Err(RawValue::String("plain".into()))),
    );

    let err = fail.call(&[], None).unwrap_err();

    assert_eq!(err.error_type(), "Error");
    assert_eq!(err.to_string(), "Error: plain");
    assert!(!env.host.has_exception());
}

#[test]
fn test_calling_non_function_is_type_error() {
    let _env = TestEngine::new();
    let obj = Object::create_plain().unwrap();

    assert!(matches!(
        obj.call(&[], None),
        Err(JsbError::TypeError { ref expected, .. }) if expected == "function"
    ));
}

#[test]
fn test_object_arguments_rooted_during_call() {
    let env = TestEngine::new();
    let arg = Object::create_plain().unwrap();
    let handle = arg.handle();
    let during = Rc::new(Cell::new(None));

    let host = env.host.clone();
    let record = during.clone();
    let inspect = function_on_global(
        &env,
        "inspect",
        native_fn(move |_, _, _| {
            record.set(host.protect_count(handle).ok());
            Ok(RawValue::Undefined)
        }),
    );

    inspect.call(&[Value::Object(arg.clone())], None).unwrap();

    assert_eq!(during.get(), Some(1));
    assert_eq!(env.host.protect_count(handle).unwrap(), 0);
    assert!(!arg.is_rooted());
}

#[test]
fn test_temporary_roots_released_when_call_throws() {
    let env = TestEngine::new();
    let arg = Object::create_plain().unwrap();
    let fail = function_on_global(&env, "boom", throwing_fn("Error", "boom"));

    assert!(fail.call(&[Value::Object(arg.clone())], None).is_err());

    assert_eq!(env.host.protect_count(arg.handle()).unwrap(), 0);
    assert_eq!(arg.root_count(), 0);
}

#[test]
fn test_already_rooted_arguments_untouched() {
    let env = TestEngine::new();
    let arg = Object::create_plain().unwrap();
    arg.root();
    let noop = function_on_global(&env, "noop", native_fn(|_, _, _| Ok(RawValue::Undefined)));
    let before = env.host.stats();

    noop.call(&[Value::Object(arg.clone())], None).unwrap();

    let after = env.host.stats();
    assert_eq!(after.add_ref_calls, before.add_ref_calls);
    assert_eq!(after.release_calls, before.release_calls);
    assert_eq!(arg.root_count(), 1);
}

#[test]
fn test_arguments_survive_collection_inside_call() {
    let env = TestEngine::new();
    let arg = Object::create_plain().unwrap();
    let handle = arg.handle();
    let alive = Rc::new(Cell::new(false));

    let host = env.host.clone();
    let record = alive.clone();
    let collect = function_on_global(
        &env,
        "collect",
        native_fn(move |runtime, _, _| {
            runtime.collect_garbage();
            record.set(host.is_alive(handle));
            Ok(RawValue::Undefined)
        }),
    );

    collect.call(&[Value::Object(arg.clone())], None).unwrap();

    assert!(alive.get());
}

#[test]
fn test_attach_keeps_target_alive() {
    let env = TestEngine::new();
    install_native_ref_registry(&env.host);

    let owner = Object::create_plain().unwrap();
    owner.root();
    let target = Object::create_plain().unwrap();
    let handle = target.handle();

    assert!(owner.attach_object(&target));
    drop(target);
    env.gc();

    assert!(env.host.is_alive(handle));
    assert!(!env.host.has_exception());
}

#[test]
fn test_detach_lets_target_be_collected() {
    let env = TestEngine::new();
    install_native_ref_registry(&env.host);

    let owner = Object::create_plain().unwrap();
    owner.root();
    let target = Object::create_plain().unwrap();
    let handle = target.handle();

    assert!(owner.attach_object(&target));
    assert!(owner.detach_object(&target));
    drop(target);
    env.gc();

    assert!(!env.host.is_alive(handle));
}

#[test]
fn test_attach_without_registry_returns_false() {
    let env = TestEngine::new();
    let owner = Object::create_plain().unwrap();
    let target = Object::create_plain().unwrap();

    assert!(!owner.attach_object(&target));
    assert!(!owner.detach_object(&target));
    assert!(!env.host.has_exception());
}

#[test]
fn test_attach_survives_throwing_registry() {
    let env = TestEngine::new();
    let global = env.engine.global_object().unwrap();
    let jsb = Object::create_plain().unwrap();
    jsb.define_function("registerNativeRef", throwing_fn("Error", "refused"))
        .unwrap();
    global.set_property("jsb", jsb).unwrap();

    let owner = Object::create_plain().unwrap();
    let target = Object::create_plain().unwrap();

    assert!(owner.attach_object(&target));
    assert!(!env.host.has_exception());
    assert_eq!(target.root_count(), 0);
    assert_eq!(env.host.protect_count(target.handle()).unwrap(), 0);
}

#[test]
fn test_attach_uses_configured_names() {
    let config = EngineConfig::new().native_ref_namespace("bridge");
    let env = TestEngine::with_config(config);
    let calls = Rc::new(Cell::new(0));

    let global = env.engine.global_object().unwrap();
    let namespace = Object::create_plain().unwrap();
    let counter = calls.clone();
    namespace
        .define_function(
            "registerNativeRef",
            native_fn(move |_, _, args| {
                assert_eq!(args.len(), 2);
                counter.set(counter.get() + 1);
                Ok(RawValue::Undefined)
            }),
        )
        .unwrap();
    global.set_property("bridge", namespace).unwrap();

    let owner = Object::create_plain().unwrap();
    let target = Object::create_plain().unwrap();
    assert!(owner.attach_object(&target));
    assert_eq!(calls.get(), 1);
}
