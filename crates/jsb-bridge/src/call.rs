//! Invoking wrapped functions

use jsb_host::RawValue;
use tracing::{debug, trace};

use crate::error::{JsbError, JsbResult};
use crate::marshal;
use crate::object::Object;
use crate::value::Value;

impl Object {
    /// Call this function with `args`, `this` defaulting to `undefined`
    ///
    /// Object arguments that are not rooted are rooted for the duration of
    /// the call and unrooted afterwards on every path. `Ok(None)` means the
    /// function returned `undefined`. A thrown exception is cleared from the
    /// host and returned as [`JsbError::Script`].
    pub fn call(&self, args: &[Value], this: Option<&Object>) -> JsbResult<Option<Value>> {
        let host = self.live_host()?;
        if !self.is_function() {
            let actual = host.type_of(&RawValue::Object(self.handle()))?;
            return Err(JsbError::type_error("function", actual.name()));
        }

        let mut temporary_roots = Vec::new();
        for arg in args {
            if let Value::Object(obj) = arg {
                if !obj.is_rooted() && !obj.is_cleaned_up() {
                    obj.root();
                    temporary_roots.push(obj.clone());
                }
            }
        }
        let _unroot = scopeguard::guard(temporary_roots, |objects| {
            for obj in objects {
                obj.unroot();
            }
        });

        let receiver = this
            .map(|obj| RawValue::Object(obj.handle()))
            .unwrap_or_default();
        let raw_args = marshal::to_raw_args(args);
        trace!("call {} with {} args", self.handle(), raw_args.len());

        match host.call_function(self.handle(), &receiver, &raw_args) {
            Ok(raw) if raw.is_undefined() => Ok(None),
            Ok(raw) => Ok(Some(marshal::from_raw(self.engine(), raw)?)),
            Err(err) => {
                let error = self
                    .engine()
                    .clear_exception()
                    .unwrap_or_else(|| JsbError::from(err));
                debug!("call {} failed: {}", self.handle(), error);
                Err(error)
            }
        }
    }
}
