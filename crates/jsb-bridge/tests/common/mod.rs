//! Shared setup for bridge integration tests

#![allow(dead_code)]

use std::rc::Rc;

use jsb_bridge::{EngineConfig, ScriptEngine};
use jsb_host::{HostRuntime, NativeFn, NativePtr, ObjectRef, RawValue, SandboxConfig, SandboxRuntime, native_fn};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A sandbox host with manual collection and an engine running on it
///
/// The engine is torn down when this is dropped.
pub struct TestEngine {
    pub host: Rc<SandboxRuntime>,
    pub engine: Rc<ScriptEngine>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let host = SandboxRuntime::with_config(SandboxConfig::new().manual_gc());
        let engine = ScriptEngine::init(host.clone(), config).expect("engine init");
        Self { host, engine }
    }

    pub fn global(&self) -> ObjectRef {
        self.host.global_object().expect("global object")
    }

    pub fn gc(&self) {
        self.engine.garbage_collect();
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        self.engine.cleanup();
    }
}

/// A native object with a stable address
pub struct Native {
    pub id: u32,
}

impl Native {
    pub fn boxed(id: u32) -> Box<Self> {
        Box::new(Self { id })
    }

    pub fn ptr(&self) -> NativePtr {
        NativePtr::of(self)
    }
}

/// Build an error object `{ name, message }` to throw from a native function
pub fn error_object(host: &dyn HostRuntime, name: &str, message: &str) -> RawValue {
    let error = host.create_object_with_class(name).expect("error object");
    host.set_property(error, "name", RawValue::String(name.into()))
        .expect("error name");
    host.set_property(error, "message", RawValue::String(message.into()))
        .expect("error message");
    RawValue::Object(error)
}

/// A native function that always throws `name: message`
pub fn throwing_fn(name: &'static str, message: &'static str) -> NativeFn {
    native_fn(move |host, _this, _args| Err(error_object(host, name, message)))
}

/// Install `jsb.registerNativeRef` / `jsb.unregisterNativeRef`
///
/// Registration stores the target in the owner's `__nativeRefs` array, which
/// makes it reachable for as long as the owner is.
pub fn install_native_ref_registry(host: &SandboxRuntime) {
    let global = host.global_object().expect("global object");
    let jsb = host.create_object().expect("jsb namespace");
    host.set_property(global, "jsb", RawValue::Object(jsb))
        .expect("install jsb");

    let register = host
        .create_function(
            "registerNativeRef",
            native_fn(|host, _this, args| {
                let (owner, target) = owner_and_target(args)?;
                let refs = native_refs(host, owner)?;
                let length = host
                    .get_property(refs, "length")
                    .ok()
                    .and_then(|len| len.as_number())
                    .unwrap_or(0.0) as u32;
                host.set_index(refs, length, target)
                    .map_err(|err| RawValue::String(err.to_string()))?;
                Ok(RawValue::Undefined)
            }),
        )
        .expect("registerNativeRef");
    host.set_property(jsb, "registerNativeRef", RawValue::Object(register))
        .expect("install registerNativeRef");

    let unregister = host
        .create_function(
            "unregisterNativeRef",
            native_fn(|host, _this, args| {
                let (owner, target) = owner_and_target(args)?;
                let refs = native_refs(host, owner)?;
                let length = host
                    .get_property(refs, "length")
                    .ok()
                    .and_then(|len| len.as_number())
                    .unwrap_or(0.0) as u32;
                let mut kept = Vec::new();
                for index in 0..length {
                    let entry = host
                        .get_index(refs, index)
                        .map_err(|err| RawValue::String(err.to_string()))?;
                    if !host.strict_equals(&entry, &target).unwrap_or(false) {
                        kept.push(entry);
                    }
                }
                host.set_property(refs, "length", RawValue::Number(0.0))
                    .map_err(|err| RawValue::String(err.to_string()))?;
                for (index, entry) in kept.into_iter().enumerate() {
                    host.set_index(refs, index as u32, entry)
                        .map_err(|err| RawValue::String(err.to_string()))?;
                }
                Ok(RawValue::Undefined)
            }),
        )
        .expect("unregisterNativeRef");
    host.set_property(jsb, "unregisterNativeRef", RawValue::Object(unregister))
        .expect("install unregisterNativeRef");
}

fn owner_and_target(args: &[RawValue]) -> Result<(ObjectRef, RawValue), RawValue> {
    match args {
        [RawValue::Object(owner), target, ..] => Ok((*owner, target.clone())),
        _ => Err(RawValue::String("expected (owner, target)".into())),
    }
}

fn native_refs(host: &dyn HostRuntime, owner: ObjectRef) -> Result<ObjectRef, RawValue> {
    let to_thrown = |err: jsb_host::HostError| RawValue::String(err.to_string());
    if let RawValue::Object(refs) = host.get_property(owner, "__nativeRefs").map_err(to_thrown)? {
        return Ok(refs);
    }
    let refs = host.create_array(0).map_err(to_thrown)?;
    host.set_property(owner, "__nativeRefs", RawValue::Object(refs))
        .map_err(to_thrown)?;
    Ok(refs)
}
