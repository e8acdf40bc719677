//! Wrapper entity pairing one host object with an optional native pointer
//!
//! [`Object`] is reference counted: cloning a handle makes the caller a
//! co-owner, dropping the last handle runs [`Object::cleanup`]. The root count
//! is separate from that count. It only says whether native code insists the
//! host value survives collection, and only its 0→1 and 1→0 edges reach the
//! host's protect/release primitives.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use jsb_host::{FinalizeCallback, HostRuntime, NativePtr, ObjectRef, RawValue};
use tracing::{debug, trace, warn};

use crate::class::Class;
use crate::engine::ScriptEngine;
use crate::error::{JsbError, JsbResult};
use crate::registry;

/// A native handle to one host object
#[derive(Clone)]
pub struct Object(Rc<ObjectInner>);

pub(crate) struct ObjectInner {
    engine: Rc<ScriptEngine>,
    handle: ObjectRef,
    class: Option<Rc<Class>>,
    private_data: Cell<Option<NativePtr>>,
    finalize: RefCell<Option<FinalizeCallback>>,
    root_count: Cell<u32>,
    cleaned_up: Cell<bool>,
}

impl Object {
    /// Wrap an existing host object without rooting it
    pub(crate) fn wrap(engine: Rc<ScriptEngine>, handle: ObjectRef, class: Option<Rc<Class>>) -> Self {
        trace!("wrap {}", handle);
        Self(Rc::new(ObjectInner {
            engine,
            handle,
            class,
            private_data: Cell::new(None),
            finalize: RefCell::new(None),
            root_count: Cell::new(0),
            cleaned_up: Cell::new(false),
        }))
    }

    /// Allocate through `alloc` on the current engine and wrap the result
    ///
    /// Failures are logged and reported as `None`.
    fn create_with(
        kind: &str,
        alloc: impl FnOnce(&dyn HostRuntime) -> JsbResult<ObjectRef>,
    ) -> Option<Self> {
        let result = ScriptEngine::current()
            .ok_or(JsbError::EngineNotRunning)
            .and_then(|engine| {
                let host = engine.live_host()?;
                let handle = alloc(host)?;
                Ok(Self::wrap(engine.clone(), handle, None))
            });
        match result {
            Ok(object) => Some(object),
            Err(err) => {
                warn!("failed to create {}: {}", kind, err);
                None
            }
        }
    }

    /// Create an empty plain object
    pub fn create_plain() -> Option<Self> {
        Self::create_with("plain object", |host| Ok(host.create_object()?))
    }

    /// Create an array of `length` undefined elements
    pub fn create_array(length: u32) -> Option<Self> {
        Self::create_with("array", |host| Ok(host.create_array(length)?))
    }

    /// Create an `ArrayBuffer` holding a copy of `bytes`
    pub fn create_array_buffer(bytes: &[u8]) -> Option<Self> {
        Self::create_with("array buffer", |host| {
            let handle = host.create_array_buffer(bytes.len())?;
            let (data, len) = host.array_buffer_storage(handle)?;
            copy_into(data, len, bytes)?;
            Ok(handle)
        })
    }

    /// Create a `Uint8Array` holding a copy of `bytes`
    pub fn create_uint8_array(bytes: &[u8]) -> Option<Self> {
        Self::create_with("typed array", |host| {
            let handle = host.create_uint8_array(bytes.len())?;
            let (data, len) = host.typed_array_storage(handle)?;
            copy_into(data, len, bytes)?;
            Ok(handle)
        })
    }

    /// Parse `text` with the global `JSON.parse` and wrap the result
    ///
    /// A parse failure clears the pending exception and returns `None`.
    pub fn create_from_json(text: &str) -> Option<Self> {
        let engine = ScriptEngine::current()?;
        match Self::parse_json(&engine, text) {
            Ok(object) => Some(object),
            Err(err) => {
                debug!("create_from_json failed: {}", err);
                None
            }
        }
    }

    fn parse_json(engine: &Rc<ScriptEngine>, text: &str) -> JsbResult<Self> {
        let (json, parse) = engine.json_function("parse")?;
        let parsed = parse.call(&[crate::Value::String(text.to_string())], Some(&json))?;
        match parsed {
            Some(crate::Value::Object(object)) => Ok(object),
            Some(other) => Err(JsbError::type_error("object", other.type_name())),
            None => Err(JsbError::type_error("object", "undefined")),
        }
    }

    /// Create an instance of a native class
    pub fn create_with_class(class: &Rc<Class>) -> Option<Self> {
        let engine = ScriptEngine::current()?;
        let result = engine
            .live_host()
            .and_then(|host| Ok(host.create_object_with_class(class.name())?));
        match result {
            Ok(handle) => Some(Self::wrap(engine.clone(), handle, Some(class.clone()))),
            Err(err) => {
                warn!("failed to create instance of {}: {}", class.name(), err);
                None
            }
        }
    }

    /// Wrapper bound to `ptr`, if any
    ///
    /// The returned handle is a co-owner of the wrapper.
    pub fn for_native_ptr(ptr: NativePtr) -> Option<Self> {
        registry::lookup(ptr)
    }

    /// The host object this wrapper stands for
    pub fn handle(&self) -> ObjectRef {
        self.0.handle
    }

    /// The engine this wrapper belongs to
    pub fn engine(&self) -> &Rc<ScriptEngine> {
        &self.0.engine
    }

    /// The native class this object was created from
    pub fn class(&self) -> Option<&Rc<Class>> {
        self.0.class.as_ref()
    }

    /// Number of live handles to this wrapper, the registry's included
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub(crate) fn identity(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }

    /// Host access for an operation on this wrapper
    pub(crate) fn live_host(&self) -> JsbResult<&dyn HostRuntime> {
        if self.0.cleaned_up.get() {
            return Err(JsbError::CleanedUp);
        }
        self.0.engine.live_host()
    }

    /// Bind a native pointer into the host object's private slot
    ///
    /// The registry takes a reference to this wrapper until the host finalizes
    /// the object or the data is cleared.
    pub fn set_private_data(&self, ptr: NativePtr) -> JsbResult<()> {
        let host = self.live_host()?;
        if self.private_data().is_some() {
            return Err(JsbError::PrivateDataAlreadySet);
        }
        if registry::contains(ptr) {
            return Err(JsbError::NativePtrAlreadyBound(ptr));
        }

        let handle = self.0.handle;
        let finalize: FinalizeCallback = Rc::new(move |ptr: NativePtr| finalize_native(ptr, handle));
        host.set_private(handle, ptr, Some(finalize))?;
        if let Err(err) = registry::register(ptr, self.clone()) {
            if let Err(rollback) = host.clear_private(handle) {
                warn!("failed to unbind {} from {} after {}: {}", ptr, handle, err, rollback);
            }
            return Err(err);
        }
        self.0.private_data.set(Some(ptr));
        debug!("bound {} to {}", ptr, self.0.handle);
        Ok(())
    }

    /// The bound native pointer
    ///
    /// Falls back to the host's private slot when this wrapper did not bind it
    /// itself.
    pub fn private_data(&self) -> Option<NativePtr> {
        self.0.resolve_private_data()
    }

    /// Unbind the native pointer; a no-op when none is bound
    pub fn clear_private_data(&self) {
        let Some(ptr) = self.private_data() else {
            return;
        };
        let removed = registry::unregister(ptr, self.identity());
        if let Ok(host) = self.live_host() {
            if let Err(err) = host.clear_private(self.0.handle) {
                warn!("failed to clear private slot of {}: {}", self.0.handle, err);
            }
        }
        self.0.private_data.set(None);
        debug!("unbound {} from {}", ptr, self.0.handle);
        drop(removed);
    }

    /// Callback run with the native pointer when the host finalizes this object
    ///
    /// Takes precedence over the class finalizer.
    pub fn set_finalize_callback(&self, callback: FinalizeCallback) {
        *self.0.finalize.borrow_mut() = Some(callback);
    }

    /// Protect the host object from collection
    pub fn root(&self) {
        let inner = &self.0;
        if inner.cleaned_up.get() {
            return;
        }
        let count = inner.root_count.get();
        if count == 0 {
            let protected = inner
                .engine
                .live_host()
                .and_then(|host| Ok(host.add_ref(inner.handle)?));
            if let Err(err) = protected {
                warn!("failed to root {}: {}", inner.handle, err);
                return;
            }
            trace!("rooted {}", inner.handle);
        }
        inner.root_count.set(count.saturating_add(1));
    }

    /// Drop one root; the last one lets the host collect the object again
    ///
    /// While the engine collects or tears down the host is not called and the
    /// protection stays in place.
    pub fn unroot(&self) {
        let inner = &self.0;
        let count = inner.root_count.get();
        if count == 0 {
            return;
        }
        if count == 1 {
            inner.release_root();
        }
        inner.root_count.set(count - 1);
    }

    pub fn is_rooted(&self) -> bool {
        self.0.root_count.get() > 0
    }

    pub fn root_count(&self) -> u32 {
        self.0.root_count.get()
    }

    /// Unbind from the registry and drop every root; idempotent
    ///
    /// `ptr` names the bound native pointer when the caller already knows it.
    /// After cleanup the wrapper makes no further host calls.
    pub fn cleanup(&self, ptr: Option<NativePtr>) {
        self.0.cleanup(ptr, true);
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.0.cleaned_up.get()
    }

    /// Mark cleaned up without calling the host or the registry
    pub(crate) fn mark_cleaned_up(&self) {
        self.0.cleaned_up.set(true);
        self.0.root_count.set(0);
    }

    /// Host strict equality (`===`) of the two underlying values
    pub fn strict_equals(&self, other: &Object) -> bool {
        self.live_host()
            .and_then(|host| {
                Ok(host.strict_equals(
                    &RawValue::Object(self.0.handle),
                    &RawValue::Object(other.0.handle),
                )?)
            })
            .unwrap_or(false)
    }
}

impl ObjectInner {
    fn resolve_private_data(&self) -> Option<NativePtr> {
        if let Some(ptr) = self.private_data.get() {
            return Some(ptr);
        }
        if self.cleaned_up.get() || !self.engine.can_release_roots() {
            return None;
        }
        let host = self.engine.live_host().ok()?;
        host.get_private(self.handle).ok().flatten()
    }

    /// Empty the host private slot this wrapper filled, so a later collection
    /// of the host object does not finalize `ptr` again
    fn clear_bound_slot(&self, ptr: NativePtr) {
        if self.private_data.get() != Some(ptr) || !self.engine.can_release_roots() {
            return;
        }
        let Ok(host) = self.engine.live_host() else {
            return;
        };
        match host.get_private(self.handle) {
            Ok(Some(current)) if current == ptr => {
                if let Err(err) = host.clear_private(self.handle) {
                    warn!("failed to clear private slot of {}: {}", self.handle, err);
                }
            }
            Ok(_) => {}
            Err(err) => trace!("private slot of {} is gone: {}", self.handle, err),
        }
    }

    fn release_root(&self) {
        if !self.engine.can_release_roots() {
            debug!(
                "keeping protection on {} during {:?}",
                self.handle,
                self.engine.phase()
            );
            return;
        }
        match self.engine.live_host() {
            Ok(host) => {
                if let Err(err) = host.release(self.handle) {
                    warn!("failed to unroot {}: {}", self.handle, err);
                } else {
                    trace!("unrooted {}", self.handle);
                }
            }
            Err(err) => debug!("skipping release of {}: {}", self.handle, err),
        }
    }

    /// `clear_slot` is false when the host is finalizing the object itself
    fn cleanup(&self, ptr: Option<NativePtr>, clear_slot: bool) {
        if self.cleaned_up.get() {
            return;
        }

        let ptr = ptr.or_else(|| self.resolve_private_data());
        let removed = ptr.and_then(|ptr| registry::unregister(ptr, self as *const Self as *const ()));
        if clear_slot {
            if let Some(ptr) = ptr {
                self.clear_bound_slot(ptr);
            }
        }

        if self.root_count.get() > 0 {
            self.release_root();
            self.root_count.set(0);
        }

        self.cleaned_up.set(true);
        trace!("cleaned up {}", self.handle);
        drop(removed);
    }
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        self.cleanup(None, true);
    }
}

impl PartialEq for Object {
    /// Same host object (handle identity)
    fn eq(&self, other: &Self) -> bool {
        self.0.handle == other.0.handle
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("handle", &self.0.handle)
            .field("private_data", &self.0.private_data.get())
            .field("root_count", &self.0.root_count.get())
            .field("cleaned_up", &self.0.cleaned_up.get())
            .finish()
    }
}

/// Host finalizer installed with every bound native pointer
///
/// Removes the registry entry, runs the per-object (else class) finalize
/// callback, cleans the wrapper up and releases the registry's reference.
fn finalize_native(ptr: NativePtr, handle: ObjectRef) {
    let Some(object) = registry::take_bound_to(ptr, handle) else {
        trace!("finalize {} of {}: not bound", ptr, handle);
        return;
    };

    let callback = object.0.finalize.borrow().clone().or_else(|| {
        object
            .0
            .class
            .as_ref()
            .and_then(|class| class.finalizer().cloned())
    });
    if let Some(callback) = callback {
        callback(ptr);
    }

    registry::forget_created_by_ctor(ptr);
    object.0.cleanup(Some(ptr), false);
    debug!("finalized {} bound to {}", ptr, object.0.handle);
}

fn copy_into(data: *mut u8, len: usize, bytes: &[u8]) -> JsbResult<()> {
    if len != bytes.len() {
        return Err(JsbError::internal(format!(
            "backing store holds {} bytes, expected {}",
            len,
            bytes.len()
        )));
    }
    if !bytes.is_empty() {
        // SAFETY: the host just allocated `len` bytes at `data` for this object
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, len) };
    }
    Ok(())
}
