//! Native reference relationships between wrapped objects
//!
//! `attach_object` keeps `other` alive for as long as `self` is alive by
//! handing both to the script-side `jsb.registerNativeRef`; `detach_object`
//! undoes it through `jsb.unregisterNativeRef`. The namespace and function
//! names come from [`EngineConfig`](crate::EngineConfig).

use tracing::{debug, warn};

use crate::error::{JsbError, JsbResult};
use crate::object::Object;
use crate::value::Value;

impl Object {
    /// Make `other` reachable from `self` on the script side
    ///
    /// Returns false only when the registry function cannot be found. Once it
    /// is invoked the attachment counts as made; an exception it throws is
    /// logged and cleared.
    pub fn attach_object(&self, other: &Object) -> bool {
        let function = self.engine().config().register_native_ref.clone();
        self.native_ref_call(&function, other)
    }

    /// Undo [`attach_object`](Self::attach_object)
    pub fn detach_object(&self, other: &Object) -> bool {
        let function = self.engine().config().unregister_native_ref.clone();
        self.native_ref_call(&function, other)
    }

    fn native_ref_call(&self, function: &str, other: &Object) -> bool {
        match self.try_native_ref_call(function, other) {
            Ok(()) => true,
            Err(err @ JsbError::MissingCapability(_)) => {
                debug!("{} unavailable: {}", function, err);
                false
            }
            Err(err) => {
                warn!("{} failed: {}", function, err);
                false
            }
        }
    }

    fn try_native_ref_call(&self, function: &str, other: &Object) -> JsbResult<()> {
        let (global, callee) = self.native_ref_function(function)?;
        if let Err(err) = callee.call(
            &[Value::Object(self.clone()), Value::Object(other.clone())],
            Some(&global),
        ) {
            warn!("{} threw: {}", function, err);
        }
        Ok(())
    }

    fn native_ref_function(&self, function: &str) -> JsbResult<(Object, Object)> {
        self.live_host()?;
        let engine = self.engine();
        let namespace = &engine.config().native_ref_namespace;
        let global = engine.global_object().ok_or(JsbError::EngineNotRunning)?;

        let registry = global
            .get_property(namespace)?
            .and_then(Value::into_object)
            .ok_or_else(|| JsbError::MissingCapability(namespace.clone()))?;
        let callee = registry
            .get_property(function)?
            .and_then(Value::into_object)
            .filter(Object::is_function)
            .ok_or_else(|| JsbError::MissingCapability(format!("{}.{}", namespace, function)))?;
        Ok((global, callee))
    }
}
