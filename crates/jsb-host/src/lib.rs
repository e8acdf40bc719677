//! Host script runtime capability set.
//!
//! The bridge in `jsb-bridge` never talks to a concrete engine. It consumes the
//! small set of capabilities described by [`HostRuntime`]: allocation of
//! objects, arrays and buffers, named and indexed property access, function
//! invocation, protection from collection, private slots with finalizers and
//! pending-exception management.
//!
//! [`SandboxRuntime`] is an in-process host with a mark/sweep collector. It is
//! what the bridge is tested and benchmarked against, and it doubles as the
//! reference for how a real engine binding should behave at this boundary.
//!
//! # Example
//!
//! ```
//! use jsb_host::{HostRuntime, RawValue, SandboxRuntime};
//!
//! let host = SandboxRuntime::new();
//! let obj = host.create_object().unwrap();
//! host.set_property(obj, "answer", RawValue::Number(42.0)).unwrap();
//! assert_eq!(host.get_property(obj, "answer").unwrap(), RawValue::Number(42.0));
//! ```
//!
//! # Thread Safety
//!
//! Hosts are confined to the thread that created them. [`SandboxRuntime`] is
//! `!Send` and `!Sync`; native callbacks are `Rc` closures.

mod error;
mod runtime;
pub mod sandbox;
mod value;

pub use error::{HostError, HostResult};
pub use runtime::{
    Accessor, CollectionEvent, CollectionObserver, FinalizeCallback, HostRuntime, NativeFn,
    native_fn,
};
pub use sandbox::{SandboxConfig, SandboxRuntime, SandboxStats};
pub use value::{NativePtr, ObjectRef, RawValue, ValueType};
