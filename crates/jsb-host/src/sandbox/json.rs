//! `JSON.parse` / `JSON.stringify` builtins
//!
//! Both are plain native functions written against [`HostRuntime`], so they
//! behave the same for script callers and for the bridge.

use serde_json::{Map, Number, Value as Json};

use crate::error::{HostError, HostResult};
use crate::runtime::{HostRuntime, native_fn};
use crate::value::{ObjectRef, RawValue, ValueType};

use super::MAX_DISPLAY_ELEMENTS;

/// Nesting beyond this is treated as a cycle
const MAX_DEPTH: usize = 256;

pub(super) fn install(host: &dyn HostRuntime, global: ObjectRef) -> HostResult<()> {
    let json = host.create_object()?;
    host.set_property(global, "JSON", RawValue::Object(json))?;

    let parse = host.create_function(
        "parse",
        native_fn(|host, _this, args| {
            let text = match args.first() {
                Some(RawValue::String(s)) => s.clone(),
                Some(other) => host
                    .to_display_string(other)
                    .map_err(|err| error_value(host, "TypeError", &err.to_string()))?,
                None => "undefined".to_string(),
            };
            parse(host, &text)
        }),
    )?;
    host.set_property(json, "parse", RawValue::Object(parse))?;

    let stringify = host.create_function(
        "stringify",
        native_fn(|host, _this, args| {
            let value = args.first().cloned().unwrap_or_default();
            stringify(host, &value)
        }),
    )?;
    host.set_property(json, "stringify", RawValue::Object(stringify))?;
    Ok(())
}

fn parse(host: &dyn HostRuntime, text: &str) -> Result<RawValue, RawValue> {
    let parsed: Json = serde_json::from_str(text)
        .map_err(|err| error_value(host, "SyntaxError", &format!("JSON.parse: {}", err)))?;
    to_raw(host, &parsed).map_err(|err| error_value(host, "Error", &err.to_string()))
}

fn to_raw(host: &dyn HostRuntime, json: &Json) -> HostResult<RawValue> {
    Ok(match json {
        Json::Null => RawValue::Null,
        Json::Bool(b) => RawValue::Boolean(*b),
        Json::Number(n) => RawValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => RawValue::String(s.clone()),
        Json::Array(items) => {
            let array = host.create_array(items.len() as u32)?;
            for (index, item) in items.iter().enumerate() {
                let value = to_raw(host, item)?;
                host.set_index(array, index as u32, value)?;
            }
            RawValue::Object(array)
        }
        Json::Object(map) => {
            let object = host.create_object()?;
            for (key, item) in map {
                let value = to_raw(host, item)?;
                host.set_property(object, key, value)?;
            }
            RawValue::Object(object)
        }
    })
}

fn stringify(host: &dyn HostRuntime, value: &RawValue) -> Result<RawValue, RawValue> {
    let mut stack = Vec::new();
    match to_json(host, value, &mut stack) {
        Ok(Some(json)) => Ok(RawValue::String(json.to_string())),
        Ok(None) => Ok(RawValue::Undefined),
        Err(StringifyError::Cyclic) => Err(error_value(
            host,
            "TypeError",
            "JSON.stringify: cyclic object value",
        )),
        Err(StringifyError::Host(err)) => Err(error_value(host, "Error", &err.to_string())),
    }
}

enum StringifyError {
    Cyclic,
    Host(HostError),
}

impl From<HostError> for StringifyError {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

/// Convert to JSON; `None` for values JSON cannot represent (functions, undefined)
fn to_json(
    host: &dyn HostRuntime,
    value: &RawValue,
    stack: &mut Vec<ObjectRef>,
) -> Result<Option<Json>, StringifyError> {
    let object = match value {
        RawValue::Undefined => return Ok(None),
        RawValue::Null => return Ok(Some(Json::Null)),
        RawValue::Boolean(b) => return Ok(Some(Json::Bool(*b))),
        RawValue::Number(n) => return Ok(Some(number(*n))),
        RawValue::String(s) => return Ok(Some(Json::String(s.clone()))),
        RawValue::Object(obj) => *obj,
    };

    if stack.contains(&object) || stack.len() >= MAX_DEPTH {
        return Err(StringifyError::Cyclic);
    }

    let kind = host.type_of(value)?;
    if kind == ValueType::Function {
        return Ok(None);
    }

    stack.push(object);
    let json = if kind == ValueType::Array {
        let length = host
            .get_property(object, "length")?
            .as_number()
            .unwrap_or(0.0) as u32;
        if length > MAX_DISPLAY_ELEMENTS {
            return Err(StringifyError::Host(HostError::InvalidArgument(format!(
                "JSON.stringify: array of length {} is too long",
                length
            ))));
        }
        let mut items = Vec::with_capacity(length as usize);
        for index in 0..length {
            let element = host.get_index(object, index)?;
            items.push(to_json(host, &element, stack)?.unwrap_or(Json::Null));
        }
        Json::Array(items)
    } else {
        let names = host.own_property_names(object)?;
        let count = host
            .get_property(names, "length")?
            .as_number()
            .unwrap_or(0.0) as u32;
        let mut map = Map::new();
        for index in 0..count {
            let RawValue::String(key) = host.get_index(names, index)? else {
                continue;
            };
            let member = host.get_property(object, &key)?;
            if let Some(json) = to_json(host, &member, stack)? {
                map.insert(key, json);
            }
        }
        Json::Object(map)
    };
    stack.pop();
    Ok(Some(json))
}

fn number(n: f64) -> Json {
    if !n.is_finite() {
        return Json::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Json::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
}

/// Build an error object `{ name, message }` to throw
fn error_value(host: &dyn HostRuntime, name: &str, message: &str) -> RawValue {
    let build = || -> HostResult<RawValue> {
        let error = host.create_object_with_class(name)?;
        host.set_property(error, "name", RawValue::String(name.to_string()))?;
        host.set_property(error, "message", RawValue::String(message.to_string()))?;
        Ok(RawValue::Object(error))
    };
    build().unwrap_or_else(|_| RawValue::String(format!("{}: {}", name, message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxRuntime;

    fn json_fn(host: &SandboxRuntime, name: &str) -> ObjectRef {
        let global = host.global_object().unwrap();
        let json = host.get_property(global, "JSON").unwrap().as_object().unwrap();
        host.get_property(json, name).unwrap().as_object().unwrap()
    }

    #[test]
    fn test_parse_builds_ordered_object() {
        let host = SandboxRuntime::new();
        let parse = json_fn(&host, "parse");
        let result = host
            .call_function(
                parse,
                &RawValue::Undefined,
                &[RawValue::String(r#"{"b":1,"a":[true,null]}"#.into())],
            )
            .unwrap();

        let obj = result.as_object().unwrap();
        assert_eq!(host.get_property(obj, "b").unwrap(), RawValue::Number(1.0));
        let arr = host.get_property(obj, "a").unwrap().as_object().unwrap();
        assert_eq!(host.get_index(arr, 0).unwrap(), RawValue::Boolean(true));
        assert_eq!(host.get_index(arr, 1).unwrap(), RawValue::Null);

        let names = host.own_property_names(obj).unwrap();
        assert_eq!(host.get_index(names, 0).unwrap(), RawValue::String("b".into()));
    }

    #[test]
    fn test_parse_error_is_pending_syntax_error() {
        let host = SandboxRuntime::new();
        let parse = json_fn(&host, "parse");
        let err = host
            .call_function(parse, &RawValue::Undefined, &[RawValue::String("{oops".into())])
            .unwrap_err();

        assert!(err.is_exception());
        assert!(err.to_string().contains("SyntaxError"));
        let thrown = host.clear_exception().unwrap().as_object().unwrap();
        assert_eq!(
            host.get_property(thrown, "name").unwrap(),
            RawValue::String("SyntaxError".into())
        );
    }

    #[test]
    fn test_stringify_skips_functions_and_formats_integers() {
        let host = SandboxRuntime::new();
        let obj = host.create_object().unwrap();
        host.set_property(obj, "n", RawValue::Number(3.0)).unwrap();
        host.set_property(obj, "f", RawValue::Object(json_fn(&host, "parse")))
            .unwrap();
        host.set_property(obj, "s", RawValue::String("x".into())).unwrap();

        let stringify = json_fn(&host, "stringify");
        let text = host
            .call_function(stringify, &RawValue::Undefined, &[RawValue::Object(obj)])
            .unwrap();
        assert_eq!(text, RawValue::String(r#"{"n":3,"s":"x"}"#.into()));
    }

    #[test]
    fn test_stringify_rejects_cycles() {
        let host = SandboxRuntime::new();
        let obj = host.create_object().unwrap();
        host.set_property(obj, "me", RawValue::Object(obj)).unwrap();

        let stringify = json_fn(&host, "stringify");
        let err = host
            .call_function(stringify, &RawValue::Undefined, &[RawValue::Object(obj)])
            .unwrap_err();
        assert!(err.to_string().contains("cyclic"));
        assert!(host.clear_exception().is_some());
    }
}
