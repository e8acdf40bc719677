//! Conversion between native tagged values and host values

use std::rc::Rc;

use jsb_host::RawValue;

use crate::engine::ScriptEngine;
use crate::error::JsbResult;
use crate::object::Object;
use crate::registry;
use crate::value::Value;

/// Native value to host value
pub fn to_raw(value: &Value) -> RawValue {
    match value {
        Value::Undefined => RawValue::Undefined,
        Value::Null => RawValue::Null,
        Value::Boolean(b) => RawValue::Boolean(*b),
        Value::Number(n) => RawValue::Number(*n),
        Value::String(s) => RawValue::String(s.clone()),
        Value::Object(obj) => RawValue::Object(obj.handle()),
    }
}

/// Host value to native value
///
/// An object whose private slot holds a bound native pointer comes back as
/// the registered wrapper; any other object gets a fresh, unrooted wrapper.
pub fn from_raw(engine: &Rc<ScriptEngine>, raw: RawValue) -> JsbResult<Value> {
    Ok(match raw {
        RawValue::Undefined => Value::Undefined,
        RawValue::Null => Value::Null,
        RawValue::Boolean(b) => Value::Boolean(b),
        RawValue::Number(n) => Value::Number(n),
        RawValue::String(s) => Value::String(s),
        RawValue::Object(handle) => {
            let host = engine.live_host()?;
            let registered = host
                .get_private(handle)?
                .and_then(registry::lookup)
                .filter(|obj| obj.handle() == handle);
            match registered {
                Some(obj) => Value::Object(obj),
                None => Value::Object(Object::wrap(engine.clone(), handle, None)),
            }
        }
    })
}

/// Native values to host values, in order
pub fn to_raw_args(args: &[Value]) -> Vec<RawValue> {
    args.iter().map(to_raw).collect()
}
