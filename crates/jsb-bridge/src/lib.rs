//! Object-lifetime bridge between native objects and a garbage-collected
//! script runtime.
//!
//! Native code sees every script object through an [`Object`] wrapper. A
//! wrapper can carry a native pointer in the host object's private slot; the
//! thread-local [`registry`] maps that pointer back to its one wrapper so
//! host finalization and later lookups land on the same handle.
//!
//! Native holders keep a host value alive with [`Object::root`]. Only the
//! first root and the last unroot reach the host, and the last unroot is
//! skipped while the [`ScriptEngine`] collects or tears down.
//!
//! # Example
//!
//! ```
//! use jsb_bridge::{EngineConfig, Object, ScriptEngine, Value};
//! use jsb_host::SandboxRuntime;
//!
//! let engine = ScriptEngine::init(SandboxRuntime::new(), EngineConfig::default()).unwrap();
//!
//! let obj = Object::create_plain().unwrap();
//! obj.set_property("answer", 42).unwrap();
//! assert_eq!(obj.get_property("answer").unwrap(), Some(Value::Number(42.0)));
//!
//! engine.cleanup();
//! ```
//!
//! # Thread Safety
//!
//! Nothing here is `Send` or `Sync`. The engine, the registry and every
//! wrapper belong to the thread that owns the host runtime.

mod access;
mod call;
mod class;
pub mod cleanup;
mod config;
mod engine;
mod error;
pub mod marshal;
mod native_ref;
mod object;
pub mod registry;
mod value;

pub use class::Class;
pub use cleanup::sweep_registries;
pub use config::EngineConfig;
pub use engine::{EnginePhase, ScriptEngine};
pub use error::{JsbError, JsbResult};
pub use object::Object;
pub use value::Value;

pub use jsb_host::{FinalizeCallback, NativeFn, NativePtr, native_fn};
