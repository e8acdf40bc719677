//! Native class descriptors

use std::fmt;
use std::rc::Rc;

use jsb_host::{FinalizeCallback, NativePtr};

use crate::error::{JsbError, JsbResult};
use crate::object::Object;
use crate::registry;

/// A constructible native type exposed to script
pub struct Class {
    name: String,
    finalizer: Option<FinalizeCallback>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            finalizer: None,
        }
    }

    /// Finalizer run for instances without their own finalize callback
    pub fn with_finalizer(mut self, finalizer: FinalizeCallback) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn finalizer(&self) -> Option<&FinalizeCallback> {
        self.finalizer.as_ref()
    }

    /// Create an instance bound to `native`, as a script-side `new` would
    ///
    /// The pointer is recorded as constructor-created until the host
    /// finalizes the instance or the engine tears down.
    pub fn instantiate(self: &Rc<Self>, native: NativePtr) -> JsbResult<Object> {
        let object = Object::create_with_class(self)
            .ok_or_else(|| JsbError::Allocation(format!("instance of {}", self.name)))?;
        object.set_private_data(native)?;
        registry::mark_created_by_ctor(native);
        Ok(object)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("finalizer", &self.finalizer.is_some())
            .finish()
    }
}
