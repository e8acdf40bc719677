//! Property, array, key and buffer access on wrapped objects
//!
//! Every operation resolves the host object first and fails without touching
//! the host when the wrapper is cleaned up or the engine is gone. Operations
//! that need a particular kind of object check it up front and report
//! [`JsbError::TypeError`] instead of mutating anything.

use jsb_host::{Accessor, HostRuntime, NativeFn, RawValue, ValueType};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{JsbError, JsbResult};
use crate::marshal;
use crate::object::Object;
use crate::value::Value;

impl Object {
    fn value_type(&self) -> JsbResult<ValueType> {
        let host = self.live_host()?;
        Ok(host.type_of(&RawValue::Object(self.handle()))?)
    }

    fn is_kind(&self, kind: ValueType) -> bool {
        self.value_type().is_ok_and(|actual| actual == kind)
    }

    fn require_kind(&self, kind: ValueType) -> JsbResult<&dyn HostRuntime> {
        let actual = self.value_type()?;
        if actual != kind {
            return Err(JsbError::type_error(kind.name(), actual.name()));
        }
        self.live_host()
    }

    /// Read a property
    ///
    /// `Ok(None)` means the property does not exist; a property holding
    /// `undefined` comes back as `Some(Value::Undefined)`.
    pub fn get_property(&self, name: &str) -> JsbResult<Option<Value>> {
        let host = self.live_host()?;
        if !host.has_property(self.handle(), name)? {
            return Ok(None);
        }
        let raw = host.get_property(self.handle(), name)?;
        Ok(Some(marshal::from_raw(self.engine(), raw)?))
    }

    /// Write a property, overwriting any existing one
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> JsbResult<()> {
        let host = self.live_host()?;
        let value = value.into();
        trace!("set {}.{} = {}", self.handle(), name, value.type_name());
        host.set_property(self.handle(), name, marshal::to_raw(&value))?;
        Ok(())
    }

    /// Install a configurable, enumerable get/set accessor pair
    pub fn define_property(
        &self,
        name: &str,
        getter: Option<NativeFn>,
        setter: Option<NativeFn>,
    ) -> JsbResult<()> {
        let host = self.live_host()?;
        host.define_accessor(self.handle(), name, Accessor::new(getter, setter))?;
        Ok(())
    }

    /// Install a native function as property `name`
    pub fn define_function(&self, name: &str, callback: NativeFn) -> JsbResult<()> {
        let host = self.live_host()?;
        let function = host.create_function(name, callback)?;
        host.set_property(self.handle(), name, RawValue::Object(function))?;
        Ok(())
    }

    pub fn is_array(&self) -> bool {
        self.is_kind(ValueType::Array)
    }

    /// Value of `length`, truncated to 32 bits
    pub fn array_length(&self) -> JsbResult<u32> {
        let host = self.require_kind(ValueType::Array)?;
        let length = host
            .get_property(self.handle(), "length")?
            .as_number()
            .unwrap_or(0.0);
        Ok(length as u32)
    }

    pub fn get_array_element(&self, index: u32) -> JsbResult<Value> {
        let host = self.require_kind(ValueType::Array)?;
        let raw = host.get_index(self.handle(), index)?;
        marshal::from_raw(self.engine(), raw)
    }

    pub fn set_array_element(&self, index: u32, value: impl Into<Value>) -> JsbResult<()> {
        let host = self.require_kind(ValueType::Array)?;
        host.set_index(self.handle(), index, marshal::to_raw(&value.into()))?;
        Ok(())
    }

    /// Own property names in host enumeration order
    pub fn all_keys(&self) -> JsbResult<Vec<String>> {
        let host = self.live_host()?;
        let names = host.own_property_names(self.handle())?;
        let count = host
            .get_property(names, "length")?
            .as_number()
            .unwrap_or(0.0) as u32;

        let mut keys = Vec::with_capacity(count as usize);
        for index in 0..count {
            match host.get_index(names, index)? {
                RawValue::String(key) => keys.push(key),
                other => keys.push(host.to_display_string(&other)?),
            }
        }
        Ok(keys)
    }

    pub fn is_function(&self) -> bool {
        self.is_kind(ValueType::Function)
    }

    /// Check if this is a function installed by the engine rather than script
    pub fn is_native_function(&self) -> bool {
        if !self.is_function() {
            return false;
        }
        let marker = &self.engine().config().native_code_marker;
        self.live_host()
            .and_then(|host| Ok(host.to_display_string(&RawValue::Object(self.handle()))?))
            .is_ok_and(|source| source.contains(marker.as_str()))
    }

    pub fn is_typed_array(&self) -> bool {
        self.is_kind(ValueType::TypedArray)
    }

    /// Backing store of a typed array
    ///
    /// The memory belongs to the host. The pointer is valid while the host
    /// object is alive; root the wrapper to keep it so.
    pub fn typed_array_data(&self) -> JsbResult<(*mut u8, usize)> {
        let host = self.require_kind(ValueType::TypedArray)?;
        Ok(host.typed_array_storage(self.handle())?)
    }

    /// Run `f` over the bytes of a typed array, rooted for the duration
    pub fn with_typed_array_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> JsbResult<R> {
        let (data, len) = self.typed_array_data()?;
        Ok(self.with_rooted_bytes(data, len, f))
    }

    pub fn is_array_buffer(&self) -> bool {
        self.is_kind(ValueType::ArrayBuffer)
    }

    /// Backing store of an array buffer
    ///
    /// The memory belongs to the host. The pointer is valid while the host
    /// object is alive; root the wrapper to keep it so.
    pub fn array_buffer_data(&self) -> JsbResult<(*mut u8, usize)> {
        let host = self.require_kind(ValueType::ArrayBuffer)?;
        Ok(host.array_buffer_storage(self.handle())?)
    }

    /// Run `f` over the bytes of an array buffer, rooted for the duration
    pub fn with_array_buffer_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> JsbResult<R> {
        let (data, len) = self.array_buffer_data()?;
        Ok(self.with_rooted_bytes(data, len, f))
    }

    fn with_rooted_bytes<R>(&self, data: *mut u8, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.root();
        let _unroot = scopeguard::guard((), |_| self.unroot());
        if len == 0 {
            return f(&mut []);
        }
        // SAFETY: the host owns `len` bytes at `data` for as long as the object
        // lives, and the root taken above keeps it alive until the guard runs
        let bytes = unsafe { std::slice::from_raw_parts_mut(data, len) };
        f(bytes)
    }

    /// Serialize through the global `JSON.stringify`
    pub fn to_json(&self) -> JsbResult<String> {
        self.live_host()?;
        let (json, stringify) = self.engine().json_function("stringify")?;
        match stringify.call(&[Value::Object(self.clone())], Some(&json))? {
            Some(Value::String(text)) => Ok(text),
            Some(other) => Err(JsbError::type_error("string", other.type_name())),
            None => Err(JsbError::type_error("string", "undefined")),
        }
    }

    /// Deserialize the object's JSON form into `T`
    pub fn deserialize<T: DeserializeOwned>(&self) -> JsbResult<T> {
        Ok(serde_json::from_str(&self.to_json()?)?)
    }
}
