//! Engine lifecycle and the teardown sweep

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{Native, TestEngine};
use jsb_bridge::{
    Class, EngineConfig, EnginePhase, JsbError, Object, ScriptEngine, registry, sweep_registries,
};
use jsb_host::{HostRuntime, NativePtr, SandboxRuntime};

#[test]
fn test_second_engine_on_thread_fails() {
    let env = TestEngine::new();

    let result = ScriptEngine::init(SandboxRuntime::new(), EngineConfig::default());

    assert!(matches!(result, Err(JsbError::EngineAlreadyRunning)));
    assert!(Rc::ptr_eq(&ScriptEngine::current().unwrap(), &env.engine));
}

#[test]
fn test_init_on_disposed_host_fails() {
    let host = SandboxRuntime::new();
    host.dispose();

    let result = ScriptEngine::init(host, EngineConfig::default());

    assert!(matches!(result, Err(JsbError::EngineNotRunning)));
    assert!(ScriptEngine::current().is_none());
}

#[test]
fn test_cleanup_is_idempotent_and_ordered() {
    let env = TestEngine::new();
    let events = Rc::new(RefCell::new(Vec::new()));

    let log = events.clone();
    let host = env.host.clone();
    env.engine.add_before_cleanup_hook(move || {
        log.borrow_mut().push(format!("before:{}", host.is_valid()));
        let written = Object::create_plain()
            .ok_or(JsbError::EngineNotRunning)
            .and_then(|obj| {
                obj.set_property("x", 1)?;
                obj.get_property("x")
            });
        log.borrow_mut().push(format!("write:{:?}", written.ok().flatten()));
    });
    let log = events.clone();
    env.engine.add_after_cleanup_hook(move || {
        log.borrow_mut().push(format!("after:{}", registry::len()));
    });

    env.engine.cleanup();
    env.engine.cleanup();

    assert_eq!(
        *events.borrow(),
        ["before:true", "write:Some(Number(1.0))", "after:0"]
    );
    assert_eq!(env.engine.phase(), EnginePhase::TearingDown);
    assert!(env.engine.is_in_cleanup());
    assert!(!env.engine.is_running());
    assert!(ScriptEngine::current().is_none());
    assert!(env.engine.global_object().is_none());
}

#[test]
fn test_operations_after_cleanup() {
    let env = TestEngine::new();
    let obj = Object::create_plain().unwrap();

    env.engine.cleanup();

    assert!(Object::create_plain().is_none());
    assert!(Object::create_array_buffer(&[1]).is_none());
    assert!(matches!(
        obj.set_property("x", 1),
        Err(JsbError::EngineNotRunning)
    ));
    assert!(matches!(obj.call(&[], None), Err(JsbError::EngineNotRunning)));
    assert!(!env.engine.can_release_roots());
    // No-op once the host is gone
    env.engine.garbage_collect();
}

#[test]
fn test_teardown_sweeps_registry() {
    let env = TestEngine::new();
    let natives: Vec<_> = (0..8).map(Native::boxed).collect();
    let mut wrappers = Vec::new();
    for (index, native) in natives.iter().enumerate() {
        let obj = Object::create_plain().unwrap();
        obj.set_private_data(native.ptr()).unwrap();
        if index % 2 == 0 {
            obj.root();
        }
        wrappers.push(obj);
    }
    assert_eq!(registry::len(), natives.len());

    env.engine.cleanup();

    assert!(registry::is_empty());
    assert!(!registry::is_sweeping());
    for obj in &wrappers {
        assert!(obj.is_cleaned_up());
        assert_eq!(obj.root_count(), 0);
        assert!(matches!(obj.set_property("x", 1), Err(JsbError::CleanedUp)));
    }
    for native in &natives {
        assert!(Object::for_native_ptr(native.ptr()).is_none());
    }
}

#[test]
fn test_teardown_skips_native_finalizers() {
    let env = TestEngine::new();
    let calls = Rc::new(Cell::new(0));
    let native = Native::boxed(1);

    let obj = Object::create_plain().unwrap();
    obj.set_private_data(native.ptr()).unwrap();
    let counter = calls.clone();
    obj.set_finalize_callback(Rc::new(move |_: NativePtr| counter.set(counter.get() + 1)));
    drop(obj);

    env.engine.cleanup();

    assert_eq!(calls.get(), 0);
    assert!(registry::is_empty());
}

#[test]
fn test_teardown_clears_ctor_set() {
    let env = TestEngine::new();
    let class = Rc::new(Class::new("Node"));
    let natives: Vec<_> = (0..3).map(Native::boxed).collect();
    let instances: Vec<_> = natives
        .iter()
        .map(|native| class.instantiate(native.ptr()).unwrap())
        .collect();
    assert_eq!(registry::created_by_ctor_len(), 3);

    env.engine.cleanup();

    assert_eq!(registry::created_by_ctor_len(), 0);
    assert!(instances.iter().all(Object::is_cleaned_up));
}

#[test]
fn test_rooted_wrapper_dropped_after_teardown() {
    let env = TestEngine::new();
    let obj = Object::create_plain().unwrap();
    obj.root();
    obj.root();

    env.engine.cleanup();
    let releases = env.host.stats().release_calls;
    drop(obj);

    assert_eq!(env.host.stats().release_calls, releases);
}

#[test]
fn test_sweep_registries_directly() {
    let _env = TestEngine::new();
    let natives: Vec<_> = (0..3).map(Native::boxed).collect();
    let wrappers: Vec<_> = natives
        .iter()
        .map(|native| {
            let obj = Object::create_plain().unwrap();
            obj.set_private_data(native.ptr()).unwrap();
            obj
        })
        .collect();

    assert_eq!(sweep_registries(), 3);
    assert!(registry::is_empty());
    assert!(wrappers.iter().all(Object::is_cleaned_up));
    assert_eq!(wrappers[0].ref_count(), 1);

    assert_eq!(sweep_registries(), 0);
}

#[test]
fn test_engine_restarts_after_cleanup() {
    let first = TestEngine::new();
    let native = Native::boxed(1);
    let obj = Object::create_plain().unwrap();
    obj.set_private_data(native.ptr()).unwrap();
    drop(first);
    assert!(ScriptEngine::current().is_none());

    let second = TestEngine::new();
    assert!(Rc::ptr_eq(&ScriptEngine::current().unwrap(), &second.engine));
    let fresh = Object::create_plain().unwrap();
    fresh.set_private_data(native.ptr()).unwrap();

    assert_eq!(Object::for_native_ptr(native.ptr()).unwrap(), fresh);
    assert!(obj.is_cleaned_up());
}
